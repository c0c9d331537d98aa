//! HTTP server for the xRegistry engine.
//!
//! Maps request paths onto [`xreg_registry::Target`]s, turns query strings
//! into render options and write modes, and runs every request as one
//! registry transaction. Successful replies are pretty JSON; errors are a
//! single plain-text line.

pub mod config;
pub mod error;
pub mod handler;
pub mod router;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::QueryParams;
pub use router::build_router;
pub use server::XregServer;
pub use state::{AppState, SharedState};

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use tower::util::ServiceExt;

    const MODEL: &str = r#"{
        "groups": {
            "dirs": {
                "singular": "dir",
                "resources": { "files": { "singular": "file" } }
            }
        }
    }"#;

    struct Reply {
        status: StatusCode,
        location: Option<String>,
        body: String,
    }

    impl Reply {
        fn json(&self) -> serde_json::Value {
            serde_json::from_str(&self.body).unwrap()
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: &str) -> Reply {
        let resp = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = resp.status();
        let location = resp
            .headers()
            .get("location")
            .map(|v| v.to_str().unwrap().to_string());
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        Reply {
            status,
            location,
            body: String::from_utf8(bytes.to_vec()).unwrap(),
        }
    }

    /// A server with the dirs/files model and `f1` holding `v1` then `v2`.
    async fn app() -> Router {
        let app = XregServer::new(ServerConfig::default()).unwrap().router();
        assert_eq!(send(&app, "PUT", "/model", MODEL).await.status, StatusCode::OK);
        let r = send(&app, "PUT", "/dirs/d1/files/f1/versions/v1", "{}").await;
        assert_eq!(r.status, StatusCode::CREATED);
        let r = send(&app, "POST", "/dirs/d1/files/f1", r#"{"versionid": "v2"}"#).await;
        assert_eq!(r.status, StatusCode::CREATED);
        app
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn created_entities_carry_location() {
        let app = XregServer::new(ServerConfig::default()).unwrap().router();
        send(&app, "PUT", "/model", MODEL).await;

        let r = send(&app, "PUT", "/dirs/d1", r#"{"name": "first"}"#).await;
        assert_eq!(r.status, StatusCode::CREATED);
        assert_eq!(r.location.as_deref(), Some("http://localhost:8181/dirs/d1"));
        assert_eq!(r.json()["name"], "first");
        assert!(r.body.ends_with("}\n"));

        let r = send(&app, "PUT", "/dirs/d1", r#"{"name": "again"}"#).await;
        assert_eq!(r.status, StatusCode::OK);
        assert!(r.location.is_none());
        assert_eq!(r.json()["epoch"], 2);

        let r = send(&app, "PATCH", "/dirs/d1", r#"{"description": "d"}"#).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.json()["name"], "again");
        assert_eq!(r.json()["description"], "d");
    }

    #[tokio::test]
    async fn post_to_collections() {
        let app = XregServer::new(ServerConfig::default()).unwrap().router();
        send(&app, "PUT", "/model", MODEL).await;

        // A map of bodies upserts each member.
        let r = send(&app, "POST", "/dirs", r#"{"d1": {}, "d2": {"name": "two"}}"#).await;
        assert_eq!(r.status, StatusCode::OK);
        let doc = r.json();
        assert_eq!(doc["d2"]["name"], "two");
        assert_eq!(doc["d1"]["dirid"], "d1");

        // A single body gets a generated id.
        let r = send(&app, "POST", "/dirs/d1/files", "").await;
        assert_eq!(r.status, StatusCode::CREATED);
        let id = r.json()["fileid"].as_str().unwrap().to_string();
        assert_eq!(
            r.location.unwrap(),
            format!("http://localhost:8181/dirs/d1/files/{id}")
        );

        let r = send(&app, "POST", "/dirs/d1/files/f9/versions", r#"{"a": {}, "b": {}}"#).await;
        assert_eq!(r.status, StatusCode::OK);
        let r = send(&app, "GET", "/dirs/d1/files/f9", "").await;
        assert_eq!(r.json()["versionscount"], 2);
    }

    #[tokio::test]
    async fn bad_bodies() {
        let app = app().await;
        let r = send(&app, "PUT", "/dirs/d1", "{").await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert!(r.body.starts_with("Error parsing json"));

        let r = send(&app, "PUT", "/dirs/d1", "[]").await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(r.body, "Body must be a JSON object, not array\n");
    }

    #[tokio::test]
    async fn disallowed_methods() {
        let app = app().await;
        for (method, uri, message) in [
            ("POST", "/", "POST not allowed on the root of the registry"),
            ("POST", "/dirs/d1", "POST not allowed on a 'group'"),
            ("POST", "/dirs/d1/files/f1/meta", "POST not allowed on a 'meta'"),
            ("POST", "/dirs/d1/files/f1/versions/v1", "POST not allowed on a 'version'"),
            ("DELETE", "/", "DELETE is not allowed on the registry"),
            ("DELETE", "/dirs/d1/files/f1/meta", "DELETE is not allowed on a \"meta\""),
            ("PUT", "/dirs", "PUT not allowed on collections"),
            ("PATCH", "/dirs/d1/files", "PATCH not allowed on collections"),
        ] {
            let r = send(&app, method, uri, "").await;
            assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED, "{method} {uri}");
            assert_eq!(r.body, format!("{message}\n"));
        }
    }

    #[tokio::test]
    async fn immutable_entities() {
        let app = app().await;
        let r = send(&app, "PUT", "/capabilities", r#"{"mutable": ["capabilities"]}"#).await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.json()["mutable"], serde_json::json!(["capabilities"]));

        let r = send(&app, "PUT", "/dirs/d2", "{}").await;
        assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
        let r = send(&app, "PUT", "/model", MODEL).await;
        assert_eq!(r.status, StatusCode::METHOD_NOT_ALLOWED);
    }

    // -----------------------------------------------------------------------
    // Default versions
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn default_version_follows_newest() {
        let app = app().await;
        let r = send(&app, "GET", "/dirs/d1/files/f1", "").await;
        assert_eq!(r.json()["versionid"], "v2");
        assert_eq!(r.json()["versionscount"], 2);

        let r = send(&app, "DELETE", "/dirs/d1/files/f1/versions/v2", "").await;
        assert_eq!(r.status, StatusCode::NO_CONTENT);
        assert!(r.body.is_empty());
        let r = send(&app, "GET", "/dirs/d1/files/f1/meta", "").await;
        assert_eq!(r.json()["defaultversionid"], "v1");
    }

    #[tokio::test]
    async fn sticky_default_version() {
        let app = app().await;
        let r = send(
            &app,
            "PUT",
            "/dirs/d1/files/f1/meta",
            r#"{"defaultversionid": "v1", "defaultversionsticky": true}"#,
        )
        .await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.json()["defaultversionid"], "v1");
        assert_eq!(r.json()["defaultversionsticky"], true);

        let r = send(&app, "POST", "/dirs/d1/files/f1", r#"{"versionid": "v3"}"#).await;
        assert_eq!(r.status, StatusCode::CREATED);
        let r = send(&app, "GET", "/dirs/d1/files/f1/meta", "").await;
        assert_eq!(r.json()["defaultversionid"], "v1");
    }

    #[tokio::test]
    async fn non_sticky_default_must_be_newest() {
        let app = app().await;
        let r = send(&app, "PUT", "/dirs/d1/files/f1/meta", r#"{"defaultversionid": "v1"}"#).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
        assert_eq!(
            r.body,
            "Attribute \"defaultversionid\" must be \"v2\" since \"defaultversionsticky\" is \"false\"\n"
        );
    }

    #[tokio::test]
    async fn setdefaultversionid_query() {
        let app = app().await;
        let r = send(&app, "POST", "/dirs/d1/files/f1?setdefaultversionid=v1", r#"{"versionid": "v3"}"#).await;
        assert_eq!(r.status, StatusCode::CREATED);
        let meta = send(&app, "GET", "/dirs/d1/files/f1/meta", "").await.json();
        assert_eq!(meta["defaultversionid"], "v1");
        assert_eq!(meta["defaultversionsticky"], true);

        let r = send(&app, "PUT", "/dirs/d1/files/f1/versions/v4?setdefaultversionid=request", "{}").await;
        assert_eq!(r.status, StatusCode::CREATED);
        let meta = send(&app, "GET", "/dirs/d1/files/f1/meta", "").await.json();
        assert_eq!(meta["defaultversionid"], "v4");

        let r = send(&app, "PUT", "/dirs/d1/files/f1?setdefaultversionid=null", "{}").await;
        assert_eq!(r.status, StatusCode::OK);
        let meta = send(&app, "GET", "/dirs/d1/files/f1/meta", "").await.json();
        assert_eq!(meta["defaultversionsticky"], false);
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn filter_moves_meta_after_versions() {
        let app = app().await;
        let r = send(&app, "GET", "/?filter=dirs.files.versions.versionid=v2&inline=*", "").await;
        assert_eq!(r.status, StatusCode::OK);
        let doc = r.json();
        let file = &doc["dirs"]["d1"]["files"]["f1"];
        assert_eq!(file["versionscount"], 1);
        let versions = file["versions"].as_object().unwrap();
        assert_eq!(versions.keys().collect::<Vec<_>>(), vec!["v2"]);

        let keys: Vec<&String> = file.as_object().unwrap().keys().collect();
        let pos = |k: &str| keys.iter().position(|x| *x == k).unwrap();
        assert!(pos("metaurl") < pos("versionsurl"));
        assert!(pos("versions") < pos("meta"));
    }

    #[tokio::test]
    async fn meta_filter_keeps_every_version() {
        let app = app().await;
        let r = send(&app, "GET", "/?inline=*&filter=dirs.files.meta.readonly=false", "").await;
        assert_eq!(r.status, StatusCode::OK);
        let file = &r.json()["dirs"]["d1"]["files"]["f1"];
        assert_eq!(file["versionscount"], 2);
        let versions = file["versions"].as_object().unwrap();
        assert_eq!(versions.keys().collect::<Vec<_>>(), vec!["v1", "v2"]);
        assert_eq!(file["meta"]["readonly"], false);

        let r = send(&app, "GET", "/?filter=dirs.files.fileid=f1,dirs.dirid=dx", "").await;
        assert_eq!(r.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn url_too_long() {
        let app = app().await;
        for method in ["GET", "PUT", "DELETE"] {
            let r = send(&app, method, "/dirs/d1/files/f1/versions/v1/foo", "").await;
            assert_eq!(r.status, StatusCode::NOT_FOUND);
            assert_eq!(r.body, "URL is too long\n");
        }
        let r = send(&app, "GET", "/dirs/dx/files/fx/versions/vx/foo", "").await;
        assert_eq!(r.body, "URL is too long\n");
    }

    #[tokio::test]
    async fn missing_entities() {
        let app = app().await;
        let r = send(&app, "GET", "/dirs/d1/files/nope", "").await;
        assert_eq!(r.status, StatusCode::NOT_FOUND);
        let r = send(&app, "GET", "/things", "").await;
        assert_eq!(r.status, StatusCode::NOT_FOUND);
        assert_eq!(r.body, "Unknown Group type: things\n");
    }

    #[tokio::test]
    async fn export_is_inlined_doc_view() {
        let app = app().await;
        let export = send(&app, "GET", "/export", "").await;
        assert_eq!(export.status, StatusCode::OK);
        let manual = send(&app, "GET", "/?doc&inline=*,capabilities,model", "").await;
        assert_eq!(export.body, manual.body);

        let doc = export.json();
        assert!(doc.get("model").is_some());
        assert!(doc.get("capabilities").is_some());
        assert_eq!(doc["dirs"]["d1"]["files"]["f1"]["self"], "#/dirs/d1/files/f1");
    }

    #[tokio::test]
    async fn model_and_capabilities() {
        let app = app().await;
        let r = send(&app, "GET", "/model", "").await;
        assert_eq!(r.status, StatusCode::OK);
        assert_eq!(r.json()["groups"]["dirs"]["resources"]["files"]["singular"], "file");

        let r = send(&app, "GET", "/capabilities?offered", "").await;
        assert!(r.json()["flags"]["enum"].as_array().unwrap().len() > 5);

        let r = send(&app, "PUT", "/capabilities", r#"{"flags": ["bogus"]}"#).await;
        assert_eq!(r.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn disabled_flags_are_ignored() {
        let app = app().await;
        send(&app, "PUT", "/capabilities", r#"{"flags": [], "mutable": ["*"]}"#).await;
        let r = send(&app, "GET", "/?inline=*", "").await;
        assert_eq!(r.status, StatusCode::OK);
        assert!(r.json().get("dirs").is_none());
        assert!(r.json().get("dirsurl").is_some());
    }
}
