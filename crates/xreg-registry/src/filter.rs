//! `?filter=` expressions and their evaluation against a [`TreeView`].
//!
//! Each `filter` query parameter is one AND-group of comma-separated
//! expressions; repeating the parameter ORs the groups together. The
//! selection is the set of matching entities plus everything needed to
//! reach them, so a rendered hit always has its full containment chain.

use std::collections::BTreeSet;

use xreg_model::Model;
use xreg_types::{EntityKind, PropPath, Value};

use crate::error::{bad_request, RegistryResult};
use crate::view::{Node, TreeView};

/// Comparison a filter expression performs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterOp {
    /// `attr`: present with a non-null value.
    Present,
    /// `attr=null`: absent or null.
    Absent,
    /// `attr=value`, where `*` matches any run of characters.
    Equal(String),
    /// `attr!=value`.
    NotEqual(String),
}

/// One `path.attr<op>value` expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterExpr {
    /// Abstract path of the entity level the expression tests
    /// (`dirs/files/versions`).
    pub level: String,
    pub attr: PropPath,
    pub op: FilterOp,
}

impl FilterExpr {
    /// Parse one expression relative to the entity level `base`.
    pub fn parse(model: &Model, base: &str, src: &str) -> RegistryResult<Self> {
        let (lhs, op) = match src.split_once('=') {
            None => (src, FilterOp::Present),
            Some((lhs, rhs)) => match lhs.strip_suffix('!') {
                Some(lhs) if rhs == "null" => (lhs, FilterOp::Present),
                Some(lhs) => (lhs, FilterOp::NotEqual(rhs.to_string())),
                None if rhs == "null" => (lhs, FilterOp::Absent),
                None => (lhs, FilterOp::Equal(rhs.to_string())),
            },
        };
        if lhs.is_empty() {
            return Err(bad_request(format!("Invalid filter expression: {src:?}")));
        }

        let mut level = base.to_string();
        let mut rest = lhs;
        while let Some((head, tail)) = rest.split_once('.') {
            if !child_levels(model, &level).iter().any(|c| c == head) {
                break;
            }
            level = join(&level, head);
            rest = tail;
        }
        let attr = PropPath::parse(rest)
            .map_err(|_| bad_request(format!("Invalid filter attribute: {lhs:?}")))?;
        Ok(Self { level, attr, op })
    }

    /// Whether `props` (the attributes of one entity) satisfy the expression.
    pub fn matches(&self, props: &Value) -> bool {
        let found = props.lookup(&self.attr).filter(|v| !v.is_null());
        match &self.op {
            FilterOp::Present => found.is_some(),
            FilterOp::Absent => found.is_none(),
            FilterOp::Equal(pattern) => found
                .and_then(Value::filter_text)
                .is_some_and(|text| wildcard_match(pattern, &text)),
            FilterOp::NotEqual(pattern) => !found
                .and_then(Value::filter_text)
                .is_some_and(|text| wildcard_match(pattern, &text)),
        }
    }
}

/// A parsed set of filters: OR of AND-groups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Filters {
    groups: Vec<Vec<FilterExpr>>,
}

impl Filters {
    /// Parse the raw `filter` parameters relative to the entity level
    /// `base` (the addressed entity, or a member of the addressed
    /// collection).
    pub fn parse(model: &Model, base: &str, raw: &[String]) -> RegistryResult<Self> {
        let mut groups = Vec::new();
        for param in raw {
            let group = param
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|expr| FilterExpr::parse(model, base, expr))
                .collect::<RegistryResult<Vec<_>>>()?;
            if !group.is_empty() {
                groups.push(group);
            }
        }
        Ok(Self { groups })
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> &[Vec<FilterExpr>] {
        &self.groups
    }

    /// Whether any expression tests entities at or below `level`.
    pub fn touches_level(&self, level: &str) -> bool {
        self.groups
            .iter()
            .flatten()
            .any(|e| e.level == level || e.level.starts_with(&format!("{level}/")))
    }

    /// Paths of the view selected by these filters, or `None` when there
    /// are no filters (everything is selected).
    ///
    /// Every expression of an AND-group contributes the leaf entities at or
    /// under its matches; a Meta match counts for its owning Resource. A
    /// leaf survives the group only when every expression contributed it.
    /// The surviving leaves of all groups are unioned, then closed over
    /// their ancestors, and each selected Resource brings its Meta along.
    pub fn select(&self, view: &TreeView) -> Option<BTreeSet<String>> {
        if self.is_empty() {
            return None;
        }
        let leaves = leaves(view);
        let mut hits = BTreeSet::new();
        for group in &self.groups {
            let mut acc: Option<BTreeSet<String>> = None;
            for expr in group {
                let under = leaves_of(view, &leaves, expr);
                acc = Some(match acc {
                    None => under,
                    Some(prev) => prev.intersection(&under).cloned().collect(),
                });
            }
            hits.extend(acc.unwrap_or_default());
        }

        let mut selected = BTreeSet::new();
        for path in hits {
            let mut parent = view.get(&path).and_then(Node::parent_path);
            selected.insert(path);
            while let Some(p) = parent {
                if selected.contains(&p) {
                    break;
                }
                parent = view.get(&p).and_then(Node::parent_path);
                selected.insert(p);
            }
        }
        let metas: Vec<String> = selected
            .iter()
            .filter_map(|p| view.get(p))
            .filter(|n| n.kind == EntityKind::Resource)
            .map(|n| format!("{}/meta", n.path))
            .filter(|p| view.contains(p))
            .collect();
        selected.extend(metas);
        Some(selected)
    }
}

/// Entities with no children other than a Meta. A Meta is never a leaf.
fn leaves(view: &TreeView) -> BTreeSet<&str> {
    let parents: BTreeSet<String> = view
        .nodes()
        .filter(|n| n.kind != EntityKind::Meta)
        .filter_map(Node::parent_path)
        .collect();
    view.nodes()
        .filter(|n| n.kind != EntityKind::Meta && !parents.contains(&n.path))
        .map(|n| n.path.as_str())
        .collect()
}

/// Leaves at or under the matches of `expr`.
fn leaves_of(view: &TreeView, leaves: &BTreeSet<&str>, expr: &FilterExpr) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let matched = view
        .nodes()
        .filter(|n| n.abstract_path == expr.level)
        .filter(|n| expr.matches(&Value::Object(view.filter_props(n))));
    for node in matched {
        let root = match node.kind {
            EntityKind::Meta => node.parent_path().unwrap_or_default(),
            _ => node.path.clone(),
        };
        out.extend(
            view.subtree(&root)
                .filter(|n| leaves.contains(n.path.as_str()))
                .map(|n| n.path.clone()),
        );
    }
    out
}

/// Collection names one level below the entity level `level`.
pub(crate) fn child_levels(model: &Model, level: &str) -> Vec<String> {
    let parts: Vec<&str> = if level.is_empty() {
        Vec::new()
    } else {
        level.split('/').collect()
    };
    match parts.as_slice() {
        [] => model.groups.keys().cloned().collect(),
        [g] => model
            .find_group_model(g)
            .map(|gm| gm.resources.keys().cloned().collect())
            .unwrap_or_default(),
        [_, _] => vec!["meta".into(), "versions".into()],
        _ => Vec::new(),
    }
}

pub(crate) fn join(base: &str, name: &str) -> String {
    if base.is_empty() {
        name.to_string()
    } else {
        format!("{base}/{name}")
    }
}

/// Case-insensitive match where `*` matches any run of characters and
/// `\*` is a literal star.
fn wildcard_match(pattern: &str, text: &str) -> bool {
    #[derive(PartialEq)]
    enum Tok {
        Char(char),
        Any,
    }
    let mut toks = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => toks.push(Tok::Char(next)),
                None => toks.push(Tok::Char('\\')),
            },
            '*' => toks.push(Tok::Any),
            c => toks.push(Tok::Char(c)),
        }
    }
    let text: Vec<char> = text.chars().collect();

    // Classic two-pointer glob match with backtracking to the last star.
    let (mut t, mut p) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        match toks.get(p) {
            Some(Tok::Char(c)) if c.to_lowercase().eq(text[t].to_lowercase()) => {
                t += 1;
                p += 1;
            }
            Some(Tok::Any) => {
                star = Some((p, t));
                p += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }
    toks[p..].iter().all(|tok| *tok == Tok::Any)
}
