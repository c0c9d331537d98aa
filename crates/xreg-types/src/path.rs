//! Property paths into attribute values.
//!
//! A [`PropPath`] addresses a (possibly nested) attribute: `labels.env`,
//! `list[2]`, or `labels['a.b']` when a key itself contains a dot.

use std::fmt;

use crate::error::TypeError;

/// One step of a property path.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed property path. Always starts with a key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PropPath {
    segments: Vec<PathSegment>,
}

impl PropPath {
    /// A single-key path.
    pub fn key(name: impl Into<String>) -> Self {
        Self {
            segments: vec![PathSegment::Key(name.into())],
        }
    }

    /// Build a path from already split segments.
    pub fn from_segments(segments: Vec<PathSegment>) -> Self {
        Self { segments }
    }

    /// Parse the textual form.
    pub fn parse(src: &str) -> Result<Self, TypeError> {
        let err = |reason: &str| TypeError::InvalidPropPath {
            path: src.to_string(),
            reason: reason.to_string(),
        };

        if src.is_empty() {
            return Err(err("empty path"));
        }

        let chars: Vec<char> = src.chars().collect();
        let mut segments = Vec::new();
        let mut i = 0;

        while i < chars.len() {
            if chars[i] == '[' {
                if segments.is_empty() {
                    return Err(err("must start with an attribute name"));
                }
                i += 1;
                if chars.get(i) == Some(&'\'') {
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != '\'' {
                        i += 1;
                    }
                    if i >= chars.len() || chars.get(i + 1) != Some(&']') {
                        return Err(err("unterminated quoted key"));
                    }
                    let key: String = chars[start..i].iter().collect();
                    if key.is_empty() {
                        return Err(err("empty key"));
                    }
                    segments.push(PathSegment::Key(key));
                    i += 2;
                } else {
                    let start = i;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    if start == i || chars.get(i) != Some(&']') {
                        return Err(err("bad array index"));
                    }
                    let digits: String = chars[start..i].iter().collect();
                    let idx = digits.parse::<usize>().map_err(|_| err("bad array index"))?;
                    segments.push(PathSegment::Index(idx));
                    i += 1;
                }
                match chars.get(i) {
                    None | Some('[') => {}
                    Some('.') => {
                        i += 1;
                        if i == chars.len() {
                            return Err(err("trailing '.'"));
                        }
                    }
                    Some(_) => return Err(err("unexpected character after ']'")),
                }
            } else {
                let start = i;
                while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                    i += 1;
                }
                if start == i {
                    return Err(err("empty segment"));
                }
                segments.push(PathSegment::Key(chars[start..i].iter().collect()));
                if chars.get(i) == Some(&'.') {
                    i += 1;
                    if i == chars.len() {
                        return Err(err("trailing '.'"));
                    }
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The leading attribute name.
    pub fn first_key(&self) -> Option<&str> {
        match self.segments.first() {
            Some(PathSegment::Key(k)) => Some(k),
            _ => None,
        }
    }

    /// The path without its first segment, if anything remains.
    pub fn rest(&self) -> Option<PropPath> {
        if self.segments.len() < 2 {
            return None;
        }
        Some(Self {
            segments: self.segments[1..].to_vec(),
        })
    }
}

impl fmt::Display for PropPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Key(k) if k.contains('.') || k.contains('[') => {
                    write!(f, "['{k}']")?
                }
                PathSegment::Key(k) if i == 0 => write!(f, "{k}")?,
                PathSegment::Key(k) => write!(f, ".{k}")?,
                PathSegment::Index(idx) => write!(f, "[{idx}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_dotted_and_indexed() {
        let p = PropPath::parse("a.b[3].c").unwrap();
        assert_eq!(
            p.segments(),
            &[
                PathSegment::Key("a".into()),
                PathSegment::Key("b".into()),
                PathSegment::Index(3),
                PathSegment::Key("c".into()),
            ]
        );
        assert_eq!(p.first_key(), Some("a"));
        assert_eq!(p.rest().unwrap().to_string(), "b[3].c");
    }

    #[test]
    fn quoted_keys_keep_dots() {
        let p = PropPath::parse("labels['x.y']").unwrap();
        assert_eq!(p.segments()[1], PathSegment::Key("x.y".into()));
        assert_eq!(p.to_string(), "labels['x.y']");
    }

    #[test]
    fn rejects_malformed() {
        for bad in ["", ".a", "a.", "a..b", "[0]", "a[x]", "a['x]", "a[0]b"] {
            assert!(PropPath::parse(bad).is_err(), "{bad:?} should fail");
        }
    }

    proptest! {
        #[test]
        fn display_parses_back(keys in prop::collection::vec("[a-z_][a-z0-9_]{0,8}", 1..5)) {
            let path = PropPath::from_segments(keys.into_iter().map(PathSegment::Key).collect());
            let reparsed = PropPath::parse(&path.to_string()).unwrap();
            prop_assert_eq!(reparsed, path);
        }
    }
}
