use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value as Json};
use tracing::debug;

use xreg_model::{parse_model, Capabilities};
use xreg_registry::{GroupKey, Registry, RenderOptions, ResourceKey, Target, WriteMode};
use xreg_types::{new_uuid, Object, Value};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::state::{blocking, SharedState};

// ---------------------------------------------------------------------------
// Query parameters
// ---------------------------------------------------------------------------

/// The query string as ordered pairs. Repeated parameters (`filter`) and
/// bare ones (`?doc`, `?inline`) are kept as they appear.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(transparent)]
pub struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs)
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.iter().any(|(k, _)| k == name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn all(&self, name: &str) -> Vec<String> {
        self.0
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Values of a parameter the capabilities gate. Disabled flags are
    /// ignored.
    fn flagged(&self, caps: &Capabilities, name: &str) -> Vec<String> {
        if caps.has_flag(name) {
            self.all(name)
        } else {
            Vec::new()
        }
    }

    fn flagged_one(&self, caps: &Capabilities, name: &str) -> Option<String> {
        self.flagged(caps, name).into_iter().next()
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// A successful response: pretty JSON with a trailing newline.
#[derive(Debug)]
pub struct Reply {
    status: StatusCode,
    body: Option<Json>,
    location: Option<String>,
}

impl Reply {
    fn ok(body: Json) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(body),
            location: None,
        }
    }

    fn created(body: Json, location: String) -> Self {
        Self {
            status: StatusCode::CREATED,
            body: Some(body),
            location: Some(location),
        }
    }

    fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            body: None,
            location: None,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let Some(body) = self.body else {
            return self.status.into_response();
        };
        let mut text = match serde_json::to_string_pretty(&body) {
            Ok(text) => text,
            Err(e) => return ServerError::Internal(e.to_string()).into_response(),
        };
        text.push('\n');
        let mut resp = (
            self.status,
            [(header::CONTENT_TYPE, "application/json")],
            text,
        )
            .into_response();
        if let Some(loc) = self.location.and_then(|l| HeaderValue::from_str(&l).ok()) {
            resp.headers_mut().insert(header::LOCATION, loc);
        }
        resp
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Every verb on `/` and `/<path>`.
pub async fn entity_handler(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    Query(query): Query<QueryParams>,
    body: Bytes,
) -> ServerResult<Reply> {
    let path = uri.path().to_string();
    debug!(%method, %path, "entity request");
    blocking(state, move |reg, cfg| {
        dispatch(reg, cfg, &method, &path, &query, &body)
    })
    .await
}

pub async fn get_model(State(state): State<SharedState>) -> ServerResult<Reply> {
    blocking(state, |reg, _| Ok(Reply::ok(reg.model().to_document()?))).await
}

/// Merge a model document into the live model.
pub async fn put_model(State(state): State<SharedState>, body: Bytes) -> ServerResult<Reply> {
    blocking(state, move |reg, _| {
        check_mutable(reg, "model")?;
        let incoming = parse_model(&body)?;
        reg.apply_model(&incoming)?;
        Ok(Reply::ok(reg.model().to_document()?))
    })
    .await
}

pub async fn get_capabilities(
    State(state): State<SharedState>,
    Query(query): Query<QueryParams>,
) -> ServerResult<Reply> {
    if query.has("offered") {
        return Ok(Reply::ok(Capabilities::offered()));
    }
    blocking(state, |reg, _| capabilities_doc(reg.capabilities())).await
}

pub async fn put_capabilities(
    State(state): State<SharedState>,
    body: Bytes,
) -> ServerResult<Reply> {
    blocking(state, move |reg, _| {
        check_mutable(reg, "capabilities")?;
        let caps = Capabilities::parse(&body)?;
        reg.set_capabilities(caps)?;
        capabilities_doc(reg.capabilities())
    })
    .await
}

/// The whole registry as one self-contained document.
pub async fn export_handler(
    State(state): State<SharedState>,
    Query(query): Query<QueryParams>,
) -> ServerResult<Reply> {
    blocking(state, move |reg, cfg| {
        let caps = reg.capabilities().clone();
        let opts = RenderOptions::export(
            reg.model(),
            cfg.base_url.as_str(),
            &query.flagged(&caps, "inline"),
            &query.flagged(&caps, "filter"),
        )?;
        Ok(Reply::ok(reg.render(&Target::Registry, &opts)?))
    })
    .await
}

fn capabilities_doc(caps: &Capabilities) -> ServerResult<Reply> {
    serde_json::to_value(caps)
        .map(Reply::ok)
        .map_err(|e| ServerError::Internal(e.to_string()))
}

// ---------------------------------------------------------------------------
// Entity dispatch
// ---------------------------------------------------------------------------

fn dispatch(
    reg: &mut Registry,
    cfg: &ServerConfig,
    method: &Method,
    path: &str,
    query: &QueryParams,
    body: &[u8],
) -> ServerResult<Reply> {
    let target = Target::parse(reg.model(), path)?;
    let ctx = Ctx { cfg, query };
    match *method {
        Method::GET => ctx.get(reg, &target),
        Method::PUT => ctx.put(reg, &target, body, WriteMode::Replace),
        Method::PATCH => ctx.put(reg, &target, body, WriteMode::Merge),
        Method::POST => ctx.post(reg, &target, body),
        Method::DELETE => ctx.delete(reg, &target, body),
        _ => Err(ServerError::not_allowed(format!("{method} not allowed"))),
    }
}

struct Ctx<'a> {
    cfg: &'a ServerConfig,
    query: &'a QueryParams,
}

impl Ctx<'_> {
    fn get(&self, reg: &mut Registry, target: &Target) -> ServerResult<Reply> {
        let caps = reg.capabilities().clone();
        let opts = RenderOptions::new(self.cfg.base_url.as_str())
            .with_doc(caps.has_flag("doc") && self.query.has("doc"))
            .with_query(
                reg.model(),
                target,
                &self.query.flagged(&caps, "inline"),
                &self.query.flagged(&caps, "filter"),
            )?;
        Ok(Reply::ok(reg.render(target, &opts)?))
    }

    fn put(
        &self,
        reg: &mut Registry,
        target: &Target,
        body: &[u8],
        mode: WriteMode,
    ) -> ServerResult<Reply> {
        check_mutable(reg, "entities")?;
        let verb = if mode == WriteMode::Merge { "PATCH" } else { "PUT" };
        let obj = parse_body(body)?;
        let created = match target {
            Target::Registry => {
                reg.update(obj, mode)?;
                false
            }
            Target::Group(key) => reg.upsert_group(key, obj, mode)?,
            Target::Resource(key) => {
                let created = reg.upsert_resource(key, obj, mode)?;
                // The body was written to the default Version.
                let written = reg
                    .get_row(&key.meta_path())?
                    .and_then(|m| m.get_str("defaultversionid").map(str::to_string));
                self.apply_default_version(reg, key, written.as_deref())?;
                created
            }
            Target::Meta(key) => reg.upsert_meta(key, obj, mode)?,
            Target::Version(vkey) => {
                let created = reg.upsert_version(vkey, obj, mode)?;
                self.apply_default_version(reg, &vkey.resource, Some(vkey.id.as_str()))?;
                created
            }
            Target::Groups { .. } | Target::Resources { .. } | Target::Versions(_) => {
                return Err(ServerError::not_allowed(format!(
                    "{verb} not allowed on collections"
                )));
            }
        };
        self.written(reg, target, created)
    }

    fn post(&self, reg: &mut Registry, target: &Target, body: &[u8]) -> ServerResult<Reply> {
        check_mutable(reg, "entities")?;
        match target {
            Target::Registry => Err(ServerError::not_allowed("POST not allowed on the root of the registry")),
            Target::Group(_) => Err(ServerError::not_allowed("POST not allowed on a 'group'")),
            Target::Meta(_) => Err(ServerError::not_allowed("POST not allowed on a 'meta'")),
            Target::Version(_) => Err(ServerError::not_allowed("POST not allowed on a 'version'")),
            Target::Resource(key) => {
                let (vkey, created) = reg.create_resource_version(key, parse_body(body)?)?;
                self.apply_default_version(reg, key, Some(vkey.id.as_str()))?;
                self.written(reg, &Target::Version(vkey), created)
            }
            Target::Versions(key) => {
                let obj = parse_body(body)?;
                if is_single_entity(&obj, "versionid") {
                    let (vkey, created) = reg.create_resource_version(key, obj)?;
                    self.apply_default_version(reg, key, Some(vkey.id.as_str()))?;
                    return self.written(reg, &Target::Version(vkey), created);
                }
                let ids: Vec<String> = reg
                    .upsert_versions(key, obj, WriteMode::Replace)?
                    .into_iter()
                    .map(|(vid, _)| vid)
                    .collect();
                self.apply_default_version(reg, key, None)?;
                let members = ids.into_iter().map(|vid| Target::Version(key.version(vid))).collect();
                self.render_members(reg, members)
            }
            Target::Groups { plural } => {
                let id_attr = format!("{}id", reg.group_model(plural)?.singular);
                self.post_collection(reg, body, &id_attr, |id| {
                    Target::Group(GroupKey::new(plural.clone(), id))
                })
            }
            Target::Resources { group, plural } => {
                let singular = reg.resource_model(&group.plural, plural)?.singular;
                self.post_collection(reg, body, &format!("{singular}id"), |id| {
                    Target::Resource(ResourceKey::new(group.clone(), plural.clone(), id))
                })
            }
        }
    }

    /// POST to a Group or Resource collection. A map of bodies upserts each
    /// member; a single body creates one new member, with a generated id
    /// unless it names one.
    fn post_collection(
        &self,
        reg: &mut Registry,
        body: &[u8],
        id_attr: &str,
        member: impl Fn(String) -> Target,
    ) -> ServerResult<Reply> {
        let obj = parse_body(body)?;
        if is_single_entity(&obj, id_attr) {
            let id = match obj.get(id_attr) {
                Some(Value::String(s)) => s.clone(),
                _ => new_uuid(),
            };
            let target = member(id);
            let created = write_member(reg, &target, obj, WriteMode::Create)?;
            return self.written(reg, &target, created);
        }
        let mut members = Vec::new();
        for (id, body) in obj {
            let target = member(id);
            write_member(reg, &target, body.into_object().unwrap_or_default(), WriteMode::Replace)?;
            members.push(target);
        }
        self.render_members(reg, members)
    }

    fn delete(&self, reg: &mut Registry, target: &Target, body: &[u8]) -> ServerResult<Reply> {
        check_mutable(reg, "entities")?;
        let caps = reg.capabilities().clone();
        let epoch = self.query.flagged_one(&caps, "epoch");
        let epoch = epoch.as_deref();
        match target {
            Target::Registry => {
                return Err(ServerError::not_allowed("DELETE is not allowed on the registry"));
            }
            Target::Meta(_) => {
                return Err(ServerError::not_allowed("DELETE is not allowed on a \"meta\""));
            }
            Target::Groups { plural } => reg.delete_groups(plural, delete_list(body)?)?,
            Target::Group(key) => reg.delete_group(key, epoch)?,
            Target::Resources { group, plural } => {
                reg.delete_resources(group, plural, delete_list(body)?)?
            }
            Target::Resource(key) => reg.delete_resource(key, epoch)?,
            Target::Versions(key) => reg.delete_versions(key, delete_list(body)?)?,
            Target::Version(vkey) => {
                let next = self.query.flagged_one(&caps, "setdefaultversionid");
                reg.delete_version(vkey, next.as_deref(), epoch)?
            }
        }
        Ok(Reply::no_content())
    }

    /// Honor `?setdefaultversionid=`: `null` unsticks, `request` names the
    /// Version this request wrote.
    fn apply_default_version(
        &self,
        reg: &mut Registry,
        key: &ResourceKey,
        written: Option<&str>,
    ) -> ServerResult<()> {
        let caps = reg.capabilities().clone();
        let Some(vid) = self.query.flagged_one(&caps, "setdefaultversionid") else {
            return Ok(());
        };
        let vid = match vid.as_str() {
            "null" => None,
            "request" => match written {
                Some(w) => Some(w.to_string()),
                None => {
                    return Err(ServerError::bad_request(
                        "Can't use 'request' if a version wasn't processed",
                    ))
                }
            },
            _ => Some(vid),
        };
        reg.set_default_version(key, vid.as_deref())?;
        Ok(())
    }

    fn write_options(&self, reg: &Registry) -> RenderOptions {
        RenderOptions::new(self.cfg.base_url.as_str())
            .with_doc(reg.capabilities().has_flag("doc") && self.query.has("doc"))
    }

    /// Render what a write produced: 201 with a `Location` when it was
    /// created, 200 otherwise.
    fn written(&self, reg: &mut Registry, target: &Target, created: bool) -> ServerResult<Reply> {
        let opts = self.write_options(reg);
        let doc = reg.render(target, &opts)?;
        if created {
            let location = format!("{}/{}", opts.base_url, target.path());
            Ok(Reply::created(doc, location))
        } else {
            Ok(Reply::ok(doc))
        }
    }

    fn render_members(&self, reg: &mut Registry, members: Vec<Target>) -> ServerResult<Reply> {
        let opts = self.write_options(reg);
        let mut out = Map::new();
        for target in members {
            let id = target.path().rsplit('/').next().unwrap_or_default().to_string();
            out.insert(id, reg.render(&target, &opts)?);
        }
        Ok(Reply::ok(Json::Object(out)))
    }
}

fn write_member(reg: &mut Registry, target: &Target, obj: Object, mode: WriteMode) -> ServerResult<bool> {
    let created = match target {
        Target::Group(key) => reg.upsert_group(key, obj, mode)?,
        Target::Resource(key) => reg.upsert_resource(key, obj, mode)?,
        other => {
            return Err(ServerError::Internal(format!("{other} is not a collection member")));
        }
    };
    Ok(created)
}

fn check_mutable(reg: &Registry, what: &str) -> ServerResult<()> {
    if reg.capabilities().is_mutable(what) {
        Ok(())
    } else {
        Err(ServerError::not_allowed(format!("Updating {what} is not allowed")))
    }
}

/// Decode a request body as one JSON object. An empty body is `{}`.
fn parse_body(body: &[u8]) -> ServerResult<Object> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Object::new());
    }
    let json: Json = serde_json::from_slice(body)
        .map_err(|e| ServerError::bad_request(format!("Error parsing json: {e}")))?;
    match Value::from(json) {
        Value::Object(obj) => Ok(obj),
        other => Err(ServerError::bad_request(format!(
            "Body must be a JSON object, not {}",
            other.kind_name()
        ))),
    }
}

/// A collection body is one new entity (rather than a map of id → entity)
/// when it is empty, names its own id, or holds any non-object value.
fn is_single_entity(obj: &Object, id_attr: &str) -> bool {
    obj.is_empty() || obj.contains_key(id_attr) || obj.values().any(|v| v.as_object().is_none())
}

/// Ids (and optional epochs) to delete from a collection. An empty body
/// means every member.
fn delete_list(body: &[u8]) -> ServerResult<Option<Vec<(String, Option<String>)>>> {
    let obj = parse_body(body)?;
    if obj.is_empty() {
        return Ok(None);
    }
    let ids = obj
        .into_iter()
        .map(|(id, entry)| {
            let epoch = entry
                .as_object()
                .and_then(|o| o.get("epoch"))
                .filter(|v| !v.is_null())
                .map(Value::to_string);
            (id, epoch)
        })
        .collect();
    Ok(Some(ids))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obj(v: serde_json::Value) -> Object {
        Value::from(v).into_object().unwrap()
    }

    #[test]
    fn query_params() {
        let q = QueryParams::new(vec![
            ("filter".into(), "a=b".into()),
            ("doc".into(), String::new()),
            ("filter".into(), "c=d".into()),
        ]);
        assert!(q.has("doc"));
        assert!(!q.has("inline"));
        assert_eq!(q.all("filter"), vec!["a=b", "c=d"]);
        assert_eq!(q.get("doc"), Some(""));

        let mut caps = Capabilities::default();
        caps.flags.retain(|f| f != "filter");
        assert!(q.flagged(&caps, "filter").is_empty());
    }

    #[test]
    fn bodies() {
        assert!(parse_body(b"  ").unwrap().is_empty());
        assert_eq!(
            parse_body(b"[1]").unwrap_err().to_string(),
            "Body must be a JSON object, not array"
        );
        assert!(parse_body(b"{").unwrap_err().to_string().starts_with("Error parsing json"));
    }

    #[test]
    fn single_or_map() {
        assert!(is_single_entity(&Object::new(), "dirid"));
        assert!(is_single_entity(&obj(serde_json::json!({"name": "x"})), "dirid"));
        assert!(is_single_entity(&obj(serde_json::json!({"dirid": "d9", "labels": {}})), "dirid"));
        assert!(!is_single_entity(&obj(serde_json::json!({"d1": {}, "d2": {}})), "dirid"));
    }

    #[test]
    fn delete_lists() {
        assert_eq!(delete_list(b"").unwrap(), None);
        let ids = delete_list(br#"{"d1": {"epoch": 3}, "d2": {}}"#).unwrap().unwrap();
        assert_eq!(
            ids,
            vec![("d1".to_string(), Some("3".to_string())), ("d2".to_string(), None)]
        );
    }
}
