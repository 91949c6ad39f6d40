// REST client for the database server.

use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use percent_encoding::percent_decode_str;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const REPLICATOR_DB: &str = "_replicator";

/// Query-string parameters; JSON-valued ones (`key`, `startkey`, …) are passed pre-encoded.
pub type Params = Vec<(&'static str, String)>;

/// A non-2xx response, decoded from the server's `{"error", "reason"}` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CouchError {
    pub status: u16,
    pub error: String,
    pub reason: String,
}

impl fmt::Display for CouchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.reason.is_empty() {
            write!(f, "server returned {} {}", self.status, self.error)
        } else {
            write!(f, "server returned {} {}: {}", self.status, self.error, self.reason)
        }
    }
}

impl std::error::Error for CouchError {}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub couchdb: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct CouchClient {
    http: reqwest::Client,
    /// Base URL with any userinfo removed.
    base: Url,
    user: Option<String>,
    password: Option<String>,
}

impl CouchClient {
    /// Credentials embedded in `base_url` are used unless `user`/`password` are given.
    pub fn new(base_url: &str, user: Option<String>, password: Option<String>) -> Result<Self> {
        let mut base = Url::parse(base_url).with_context(|| format!("invalid server URL `{base_url}`"))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("server URL `{base_url}` must be an http(s) URL");
        }

        let url_user = Some(percent_decode(base.username())).filter(|name| !name.is_empty());
        let url_password = base.password().map(percent_decode);
        let _ = base.set_username("");
        let _ = base.set_password(None);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base,
            user: user.or(url_user),
            password: password.or(url_password),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str], params: &[(&'static str, String)]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("server URL `{}` cannot carry a path", self.base))?
            .pop_if_empty()
            .extend(segments);
        if !params.is_empty() {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, method: Method, url: Url, body: Option<&Value>) -> Result<T> {
        debug!(%method, path = url.path(), "request");
        let mut request = self.http.request(method.clone(), url.clone());
        if let Some(user) = &self.user {
            request = request.basic_auth(user, self.password.as_deref());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("failed to reach server at {}", self.base))?;
        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(status, response.text().await.unwrap_or_default()).into());
        }

        response.json::<T>().await.with_context(|| format!("failed to decode response from {method} {}", url.path()))
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str], params: &[(&'static str, String)]) -> Result<T> {
        self.send(Method::GET, self.endpoint(segments, params)?, None).await
    }

    // ── Server ──────────────────────────────────────────────────────

    pub async fn server_info(&self) -> Result<ServerInfo> {
        self.get(&[], &[]).await
    }

    pub async fn up(&self) -> Result<Value> {
        self.get(&["_up"], &[]).await
    }

    pub async fn all_dbs(&self) -> Result<Vec<String>> {
        self.get(&["_all_dbs"], &[]).await
    }

    pub async fn membership(&self) -> Result<Value> {
        self.get(&["_membership"], &[]).await
    }

    pub async fn node_stats(&self, node: &str) -> Result<Value> {
        self.get(&["_node", node, "_stats"], &[]).await
    }

    pub async fn scheduler_jobs(&self) -> Result<Value> {
        self.get(&["_scheduler", "jobs"], &[]).await
    }

    pub async fn scheduler_docs(&self) -> Result<Value> {
        self.get(&["_scheduler", "docs"], &[]).await
    }

    // ── Databases ───────────────────────────────────────────────────

    pub async fn create_db(&self, db: &str, partitioned: bool) -> Result<Value> {
        let params: Params = if partitioned { vec![("partitioned", "true".into())] } else { Vec::new() };
        self.send(Method::PUT, self.endpoint(&[db], &params)?, None).await
    }

    pub async fn delete_db(&self, db: &str) -> Result<Value> {
        self.send(Method::DELETE, self.endpoint(&[db], &[])?, None).await
    }

    pub async fn db_info(&self, db: &str) -> Result<Value> {
        self.get(&[db], &[]).await
    }

    // ── Documents ───────────────────────────────────────────────────

    pub async fn get_doc(&self, db: &str, id: &str, params: &[(&'static str, String)]) -> Result<Value> {
        self.get(&doc_path(db, id), params).await
    }

    pub async fn put_doc(&self, db: &str, id: &str, doc: &Value) -> Result<Value> {
        self.send(Method::PUT, self.endpoint(&doc_path(db, id), &[])?, Some(doc)).await
    }

    /// Create a document with a server-assigned id.
    pub async fn post_doc(&self, db: &str, doc: &Value) -> Result<Value> {
        self.send(Method::POST, self.endpoint(&[db], &[])?, Some(doc)).await
    }

    pub async fn delete_doc(&self, db: &str, id: &str, rev: &str) -> Result<Value> {
        let url = self.endpoint(&doc_path(db, id), &[("rev", rev.to_string())])?;
        self.send(Method::DELETE, url, None).await
    }

    /// Current revision of a document.
    pub async fn current_rev(&self, db: &str, id: &str) -> Result<String> {
        let doc = self.get_doc(db, id, &[]).await?;
        doc.get("_rev")
            .and_then(Value::as_str)
            .map(str::to_string)
            .with_context(|| format!("document `{id}` has no `_rev`"))
    }

    pub async fn all_docs(&self, db: &str, partition: Option<&str>, params: &[(&'static str, String)]) -> Result<Value> {
        self.get(&partitioned_path(db, partition, &["_all_docs"]), params).await
    }

    pub async fn bulk_docs(&self, db: &str, docs: Vec<Value>) -> Result<Value> {
        let body = json!({ "docs": docs });
        self.send(Method::POST, self.endpoint(&[db, "_bulk_docs"], &[])?, Some(&body)).await
    }

    /// `revisions` maps document ids to the revisions to purge.
    pub async fn purge(&self, db: &str, revisions: &Value) -> Result<Value> {
        self.send(Method::POST, self.endpoint(&[db, "_purge"], &[])?, Some(revisions)).await
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub async fn view(
        &self,
        db: &str,
        ddoc: &str,
        view: &str,
        partition: Option<&str>,
        params: &[(&'static str, String)],
    ) -> Result<Value> {
        let path = partitioned_path(db, partition, &["_design", ddoc, "_view", view]);
        self.get(&path, params).await
    }

    pub async fn find(&self, db: &str, partition: Option<&str>, query: &Value) -> Result<Value> {
        let url = self.endpoint(&partitioned_path(db, partition, &["_find"]), &[])?;
        self.send(Method::POST, url, Some(query)).await
    }

    pub async fn search(&self, db: &str, ddoc: &str, index: &str, params: &[(&'static str, String)]) -> Result<Value> {
        self.get(&[db, "_design", ddoc, "_search", index], params).await
    }

    // ── Replication ─────────────────────────────────────────────────

    /// One-shot (or continuous, non-persistent) replication.
    pub async fn replicate(&self, request: &Value) -> Result<Value> {
        self.send(Method::POST, self.endpoint(&["_replicate"], &[])?, Some(request)).await
    }

    /// Persist a replication document so the scheduler keeps it running.
    pub async fn create_replication(&self, id: Option<&str>, doc: &Value) -> Result<Value> {
        match id {
            Some(id) => self.put_doc(REPLICATOR_DB, id, doc).await,
            None => self.post_doc(REPLICATOR_DB, doc).await,
        }
    }

    pub async fn list_replications(&self) -> Result<Vec<Value>> {
        let listing: Value = self.all_docs(REPLICATOR_DB, None, &[("include_docs", "true".into())]).await?;
        Ok(listing["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter(|row| !row["id"].as_str().unwrap_or_default().starts_with("_design/"))
                    .filter_map(|row| row.get("doc").cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    pub async fn delete_replication(&self, id: &str) -> Result<Value> {
        let rev = self.current_rev(REPLICATOR_DB, id).await?;
        self.delete_doc(REPLICATOR_DB, id, &rev).await
    }
}

/// Design and local document ids keep their prefix as a separate path segment.
fn doc_path<'a>(db: &'a str, id: &'a str) -> Vec<&'a str> {
    for prefix in ["_design/", "_local/"] {
        if let Some(name) = id.strip_prefix(prefix) {
            return vec![db, &prefix[..prefix.len() - 1], name];
        }
    }
    vec![db, id]
}

fn partitioned_path<'a>(db: &'a str, partition: Option<&'a str>, rest: &[&'a str]) -> Vec<&'a str> {
    let mut path = vec![db];
    if let Some(partition) = partition {
        path.extend(["_partition", partition]);
    }
    path.extend_from_slice(rest);
    path
}

fn error_from_response(status: StatusCode, body: String) -> CouchError {
    let parsed: ErrorBody = serde_json::from_str(&body).unwrap_or_default();
    let error = if parsed.error.is_empty() {
        status.canonical_reason().unwrap_or("error").to_ascii_lowercase().replace(' ', "_")
    } else {
        parsed.error
    };
    let reason = if parsed.reason.is_empty() && !body.trim_start().starts_with('{') {
        body.trim().to_string()
    } else {
        parsed.reason
    };
    CouchError { status: status.as_u16(), error, reason }
}

/// Userinfo from a parsed URL is still percent-encoded.
fn percent_decode(input: &str) -> String {
    percent_decode_str(input).decode_utf8_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::{HeaderMap, StatusCode as HttpStatus, Uri};
    use axum::response::IntoResponse;
    use axum::Router;
    use tokio::net::TcpListener;

    /// Echoes the request back; paths under `/missing` answer 404.
    async fn echo(method: axum::http::Method, uri: Uri, headers: HeaderMap, body: Bytes) -> axum::response::Response {
        if uri.path().starts_with("/missing") {
            let body = json!({"error": "not_found", "reason": "Database does not exist."});
            return (HttpStatus::NOT_FOUND, axum::Json(body)).into_response();
        }
        if uri.path().starts_with("/conflict") {
            let body = json!({"error": "conflict", "reason": "Document update conflict."});
            return (HttpStatus::CONFLICT, axum::Json(body)).into_response();
        }
        let auth = headers.get("authorization").and_then(|value| value.to_str().ok()).map(str::to_string);
        let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
        axum::Json(json!({
            "couchdb": "Welcome",
            "version": "3.3.3",
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "auth": auth,
            "body": body,
        }))
        .into_response()
    }

    async fn serve() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().fallback(echo)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn sends_basic_auth_from_explicit_credentials() {
        let base = serve().await;
        let client = CouchClient::new(&base, Some("admin".into()), Some("password".into())).unwrap();

        let info = client.server_info().await.unwrap();
        assert_eq!(info.version, "3.3.3");

        let echoed: Value = client.get(&[], &[]).await.unwrap();
        assert_eq!(echoed["auth"], "Basic YWRtaW46cGFzc3dvcmQ=");
    }

    #[tokio::test]
    async fn url_userinfo_is_decoded_and_stripped() {
        let base = serve().await.replace("http://", "http://admin:p%40ss@");
        let client = CouchClient::new(&base, None, None).unwrap();

        assert!(client.base_url().username().is_empty());
        let echoed = client.db_info("db").await.unwrap();
        assert_eq!(echoed["auth"], "Basic YWRtaW46cEBzcw==");
    }

    #[tokio::test]
    async fn explicit_credentials_override_url_userinfo() {
        let base = serve().await.replace("http://", "http://admin:password@");
        let client = CouchClient::new(&base, Some("cli".into()), Some("secret".into())).unwrap();
        let echoed = client.db_info("db").await.unwrap();
        assert_eq!(echoed["auth"], "Basic Y2xpOnNlY3JldA==");
    }

    #[tokio::test]
    async fn document_ids_are_encoded_as_single_segments() {
        let client = CouchClient::new(&serve().await, None, None).unwrap();

        let echoed = client.get_doc("my db", "a/b c", &[]).await.unwrap();
        assert_eq!(echoed["path"], "/my%20db/a%2Fb%20c");
        assert!(echoed["auth"].is_null());

        let design = client.get_doc("db", "_design/app", &[]).await.unwrap();
        assert_eq!(design["path"], "/db/_design/app");
    }

    #[tokio::test]
    async fn partitioned_queries_use_partition_prefix() {
        let client = CouchClient::new(&serve().await, None, None).unwrap();

        let echoed = client
            .view("db", "app", "by_type", Some("sensor"), &[("key", "\"temp\"".into()), ("limit", "5".into())])
            .await
            .unwrap();
        assert_eq!(echoed["path"], "/db/_partition/sensor/_design/app/_view/by_type");
        assert_eq!(echoed["query"], "key=%22temp%22&limit=5");

        let found = client.find("db", None, &json!({"selector": {"type": "temp"}})).await.unwrap();
        assert_eq!(found["method"], "POST");
        assert_eq!(found["path"], "/db/_find");
        assert_eq!(found["body"]["selector"]["type"], "temp");
    }

    #[tokio::test]
    async fn create_db_passes_partitioned_flag() {
        let client = CouchClient::new(&serve().await, None, None).unwrap();
        let echoed = client.create_db("events", true).await.unwrap();
        assert_eq!(echoed["method"], "PUT");
        assert_eq!(echoed["query"], "partitioned=true");
    }

    #[tokio::test]
    async fn bulk_docs_wraps_documents() {
        let client = CouchClient::new(&serve().await, None, None).unwrap();
        let echoed = client.bulk_docs("db", vec![json!({"_id": "a"}), json!({"_id": "b"})]).await.unwrap();
        assert_eq!(echoed["path"], "/db/_bulk_docs");
        assert_eq!(echoed["body"]["docs"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn error_responses_become_couch_errors() {
        let client = CouchClient::new(&serve().await, None, None).unwrap();

        let error = client.db_info("missing").await.expect_err("404");
        let couch = error.downcast_ref::<CouchError>().expect("typed error");
        assert_eq!(couch.status, 404);
        assert_eq!(couch.error, "not_found");
        assert_eq!(couch.reason, "Database does not exist.");

        let error = client.put_doc("conflict", "doc", &json!({})).await.expect_err("409");
        assert_eq!(error.downcast_ref::<CouchError>().map(|e| e.status), Some(409));
    }

    #[tokio::test]
    async fn refused_connection_keeps_reqwest_error_in_chain() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = CouchClient::new(&format!("http://{addr}"), None, None).unwrap();
        let error = client.server_info().await.expect_err("nothing listens");
        let reqwest_error = error.chain().find_map(|cause| cause.downcast_ref::<reqwest::Error>()).unwrap();
        assert!(reqwest_error.is_connect());
        assert!(format!("{error:#}").contains("failed to reach server"));
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(CouchClient::new("file:///tmp/db", None, None).is_err());
        assert!(CouchClient::new("not a url", None, None).is_err());
    }

    #[test]
    fn error_body_falls_back_to_status_text() {
        let error = error_from_response(StatusCode::BAD_GATEWAY, "upstream down".into());
        assert_eq!(error.error, "bad_gateway");
        assert_eq!(error.reason, "upstream down");
        assert_eq!(error.to_string(), "server returned 502 bad_gateway: upstream down");
    }

    #[test]
    fn percent_decoding_handles_malformed_escapes() {
        assert_eq!(percent_decode("p%40ss"), "p@ss");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        assert_eq!(percent_decode("secret%21"), "secret!");
        assert_eq!(percent_decode("caf%C3%A9"), "café");
    }
}
