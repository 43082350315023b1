//! Neon control-plane client (projects, branches, connection URIs)

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::context::ApiKey;
use crate::error::{Result, SwarmError};

pub const DEFAULT_BASE_URL: &str = "https://console.neon.tech/api/v2";
pub const DEFAULT_PG_VERSION: u32 = 16;
pub const DEFAULT_DATABASE_NAME: &str = "neondb";
pub const DEFAULT_ROLE_NAME: &str = "neondb_owner";

/// Authenticated account details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub plan: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default)]
    pub pg_version: Option<u32>,
    #[serde(default)]
    pub org_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub current_state: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateProject {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
    #[serde(default = "default_pg_version")]
    pub pg_version: u32,
}

fn default_pg_version() -> u32 {
    DEFAULT_PG_VERSION
}

/// Compute endpoint type requested alongside a new branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    ReadWrite,
    ReadOnly,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateBranch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_type: Option<EndpointType>,
}

impl CreateBranch {
    fn to_payload(&self) -> Value {
        let mut branch = serde_json::Map::new();
        if let Some(parent_id) = &self.parent_id {
            branch.insert("parent_id".into(), Value::String(parent_id.clone()));
        }
        if let Some(name) = &self.name {
            branch.insert("name".into(), Value::String(name.clone()));
        }
        let mut payload = serde_json::json!({ "branch": branch });
        if let Some(endpoint_type) = self.endpoint_type {
            payload["endpoints"] = serde_json::json!([{ "type": endpoint_type }]);
        }
        payload
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionUriRequest {
    pub project_id: String,
    pub database_name: String,
    pub role_name: String,
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub endpoint_id: Option<String>,
    #[serde(default)]
    pub pooled: Option<bool>,
}

impl ConnectionUriRequest {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            role_name: DEFAULT_ROLE_NAME.to_string(),
            branch_id: None,
            endpoint_id: None,
            pooled: None,
        }
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("database_name", self.database_name.clone()),
            ("role_name", self.role_name.clone()),
        ];
        if let Some(branch_id) = &self.branch_id {
            params.push(("branch_id", branch_id.clone()));
        }
        if let Some(endpoint_id) = &self.endpoint_id {
            params.push(("endpoint_id", endpoint_id.clone()));
        }
        if let Some(pooled) = self.pooled {
            params.push(("pooled", pooled.to_string()));
        }
        params
    }
}

/// Operations against the hosted database-control API.
///
/// Every call takes the session credential explicitly; implementations hold
/// no credential of their own.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn current_user(&self, api_key: &ApiKey) -> Result<UserInfo>;
    async fn list_projects(&self, api_key: &ApiKey) -> Result<Vec<Project>>;
    async fn get_project(&self, api_key: &ApiKey, project_id: &str) -> Result<Project>;
    async fn create_project(&self, api_key: &ApiKey, request: &CreateProject) -> Result<Project>;
    async fn delete_project(&self, api_key: &ApiKey, project_id: &str) -> Result<Project>;
    async fn connection_uri(&self, api_key: &ApiKey, request: &ConnectionUriRequest)
    -> Result<String>;
    async fn create_branch(
        &self,
        api_key: &ApiKey,
        project_id: &str,
        request: &CreateBranch,
    ) -> Result<Branch>;
    async fn list_branches(&self, api_key: &ApiKey, project_id: &str) -> Result<Vec<Branch>>;
    async fn get_branch(&self, api_key: &ApiKey, project_id: &str, branch_id: &str)
    -> Result<Branch>;
    async fn delete_branch(
        &self,
        api_key: &ApiKey,
        project_id: &str,
        branch_id: &str,
    ) -> Result<Branch>;
}

#[derive(Deserialize)]
struct ProjectEnvelope {
    project: Project,
}

#[derive(Deserialize)]
struct ProjectsEnvelope {
    #[serde(default)]
    projects: Vec<Project>,
}

#[derive(Deserialize)]
struct BranchEnvelope {
    branch: Branch,
}

#[derive(Deserialize)]
struct BranchesEnvelope {
    #[serde(default)]
    branches: Vec<Branch>,
}

#[derive(Deserialize)]
struct UriEnvelope {
    uri: String,
}

/// `reqwest` implementation of [`ControlPlane`] for the Neon v2 API
#[derive(Clone)]
pub struct NeonClient {
    client: Client,
    base_url: Url,
}

impl std::fmt::Debug for NeonClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NeonClient")
            .field("client", &"<reqwest::Client>")
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

impl NeonClient {
    /// Build a client. The request timeout is the only latency bound on
    /// control-plane calls.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let raw = base_url.into();
        let base_url = Url::parse(raw.trim_end_matches('/'))
            .map_err(|e| anyhow::anyhow!("invalid Neon API base URL {}: {}", raw, e))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("Neon API base URL cannot carry a path: {}", raw);
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Append path segments to the base URL. Each segment is escaped on its
    /// own, so an id can never reach a different endpoint.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SwarmError::invalid("Neon API base URL cannot carry a path"))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(
        &self,
        method: Method,
        segments: &[&str],
        api_key: &ApiKey,
    ) -> Result<RequestBuilder> {
        let url = self.endpoint(segments)?;
        debug!("Neon API {} {}", method, url);
        Ok(self
            .client
            .request(method, url)
            .bearer_auth(api_key.expose())
            .header("Accept", "application/json"))
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| SwarmError::remote(0, format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message(&body)
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
            warn!("Neon API returned {}: {}", status, message);
            return Err(SwarmError::remote(status.as_u16(), message));
        }

        debug!("Neon API returned {}", status);
        response
            .json::<T>()
            .await
            .map_err(|e| SwarmError::remote(status.as_u16(), format!("unexpected response body: {}", e)))
    }
}

/// Ids the model supplies become single path segments. Dot segments and
/// control characters would be dropped or folded by URL normalization.
fn path_id<'a>(field: &str, id: &'a str) -> Result<&'a str> {
    if id.is_empty() || id == "." || id == ".." || id.chars().any(char::is_control) {
        return Err(SwarmError::invalid(format!("{} is not a valid id: {:?}", field, id)));
    }
    Ok(id)
}

/// Pull a human-readable message out of an error body
fn error_message(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(json) => json
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .or_else(|| Some(trimmed.to_string())),
        Err(_) => Some(trimmed.to_string()),
    }
}

#[async_trait]
impl ControlPlane for NeonClient {
    async fn current_user(&self, api_key: &ApiKey) -> Result<UserInfo> {
        self.send(self.request(Method::GET, &["users", "me"], api_key)?)
            .await
    }

    async fn list_projects(&self, api_key: &ApiKey) -> Result<Vec<Project>> {
        let envelope: ProjectsEnvelope = self
            .send(self.request(Method::GET, &["projects"], api_key)?)
            .await?;
        Ok(envelope.projects)
    }

    async fn get_project(&self, api_key: &ApiKey, project_id: &str) -> Result<Project> {
        let segments = ["projects", path_id("project_id", project_id)?];
        let envelope: ProjectEnvelope = self
            .send(self.request(Method::GET, &segments, api_key)?)
            .await?;
        Ok(envelope.project)
    }

    async fn create_project(&self, api_key: &ApiKey, request: &CreateProject) -> Result<Project> {
        let payload = serde_json::json!({ "project": request });
        let envelope: ProjectEnvelope = self
            .send(self.request(Method::POST, &["projects"], api_key)?.json(&payload))
            .await?;
        Ok(envelope.project)
    }

    async fn delete_project(&self, api_key: &ApiKey, project_id: &str) -> Result<Project> {
        let segments = ["projects", path_id("project_id", project_id)?];
        let envelope: ProjectEnvelope = self
            .send(self.request(Method::DELETE, &segments, api_key)?)
            .await?;
        Ok(envelope.project)
    }

    async fn connection_uri(
        &self,
        api_key: &ApiKey,
        request: &ConnectionUriRequest,
    ) -> Result<String> {
        let segments = [
            "projects",
            path_id("project_id", &request.project_id)?,
            "connection_uri",
        ];
        let envelope: UriEnvelope = self
            .send(self.request(Method::GET, &segments, api_key)?.query(&request.query()))
            .await?;
        Ok(envelope.uri)
    }

    async fn create_branch(
        &self,
        api_key: &ApiKey,
        project_id: &str,
        request: &CreateBranch,
    ) -> Result<Branch> {
        let segments = ["projects", path_id("project_id", project_id)?, "branches"];
        let envelope: BranchEnvelope = self
            .send(self.request(Method::POST, &segments, api_key)?.json(&request.to_payload()))
            .await?;
        Ok(envelope.branch)
    }

    async fn list_branches(&self, api_key: &ApiKey, project_id: &str) -> Result<Vec<Branch>> {
        let segments = ["projects", path_id("project_id", project_id)?, "branches"];
        let envelope: BranchesEnvelope = self
            .send(self.request(Method::GET, &segments, api_key)?)
            .await?;
        Ok(envelope.branches)
    }

    async fn get_branch(
        &self,
        api_key: &ApiKey,
        project_id: &str,
        branch_id: &str,
    ) -> Result<Branch> {
        let segments = [
            "projects",
            path_id("project_id", project_id)?,
            "branches",
            path_id("branch_id", branch_id)?,
        ];
        let envelope: BranchEnvelope = self
            .send(self.request(Method::GET, &segments, api_key)?)
            .await?;
        Ok(envelope.branch)
    }

    async fn delete_branch(
        &self,
        api_key: &ApiKey,
        project_id: &str,
        branch_id: &str,
    ) -> Result<Branch> {
        let segments = [
            "projects",
            path_id("project_id", project_id)?,
            "branches",
            path_id("branch_id", branch_id)?,
        ];
        let envelope: BranchEnvelope = self
            .send(self.request(Method::DELETE, &segments, api_key)?)
            .await?;
        Ok(envelope.branch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_json_message() {
        let body = r#"{"code":"","message":"project not found"}"#;
        assert_eq!(error_message(body).as_deref(), Some("project not found"));
    }

    #[test]
    fn test_error_message_falls_back_to_raw_body() {
        assert_eq!(error_message("upstream timeout").as_deref(), Some("upstream timeout"));
        assert_eq!(error_message("   "), None);
    }

    #[test]
    fn test_create_project_defaults_pg_version() {
        let request: CreateProject = serde_json::from_value(serde_json::json!({"name": "demo"})).unwrap();
        assert_eq!(request.pg_version, 16);
        let payload = serde_json::json!({ "project": request });
        assert_eq!(payload["project"]["name"], "demo");
        assert!(payload["project"].get("region_id").is_none());
    }

    #[test]
    fn test_create_branch_payload() {
        let request = CreateBranch {
            parent_id: Some("br-main".into()),
            name: Some("dev".into()),
            endpoint_type: Some(EndpointType::ReadWrite),
        };
        let payload = request.to_payload();
        assert_eq!(payload["branch"]["parent_id"], "br-main");
        assert_eq!(payload["branch"]["name"], "dev");
        assert_eq!(payload["endpoints"][0]["type"], "read_write");

        let empty = CreateBranch::default().to_payload();
        assert_eq!(empty, serde_json::json!({"branch": {}}));
    }

    #[test]
    fn test_connection_uri_query_defaults() {
        let mut request = ConnectionUriRequest::new("proj-1");
        assert_eq!(
            request.query(),
            vec![
                ("database_name", "neondb".to_string()),
                ("role_name", "neondb_owner".to_string()),
            ]
        );
        request.pooled = Some(true);
        request.branch_id = Some("br-1".into());
        let query = request.query();
        assert!(query.contains(&("pooled", "true".to_string())));
        assert!(query.contains(&("branch_id", "br-1".to_string())));
    }

    #[test]
    fn test_project_deserializes_partial_body() {
        let project: Project = serde_json::from_value(serde_json::json!({
            "id": "proj-1",
            "name": "demo",
            "pg_version": 16,
            "unrelated_field": true
        }))
        .unwrap();
        assert_eq!(project.id, "proj-1");
        assert_eq!(project.pg_version, Some(16));
        assert!(project.region_id.is_none());
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = NeonClient::new("https://example.test/api/v2/", Duration::from_secs(5)).unwrap();
        assert_eq!(client.base_url(), "https://example.test/api/v2");
        assert!(NeonClient::new("not a url", Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_endpoint_escapes_each_segment() {
        let client = NeonClient::new("https://example.test/api/v2", Duration::from_secs(5)).unwrap();
        let url = client
            .endpoint(&["projects", "proj-1", "branches", "a/b?c#d"])
            .unwrap();
        assert_eq!(url.path(), "/api/v2/projects/proj-1/branches/a%2Fb%3Fc%23d");
        assert!(url.query().is_none());
        assert!(url.fragment().is_none());

        let url = client.endpoint(&["projects", "%2e%2e"]).unwrap();
        assert_eq!(url.path(), "/api/v2/projects/%252e%252e");
    }

    #[test]
    fn test_path_id_rejects_segments_that_collapse() {
        for id in ["", ".", "..", ".\t.", "br-1\n"] {
            let err = path_id("branch_id", id).unwrap_err();
            assert_eq!(err.kind(), "invalid_argument_error");
        }
        assert_eq!(path_id("branch_id", "br-1").unwrap(), "br-1");
    }

    /// Serve one HTTP exchange and hand back the request line
    async fn capture_request_line(
        body: &'static str,
    ) -> (String, tokio::sync::oneshot::Receiver<String>) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}/api/v2", listener.local_addr().unwrap());
        let (tx, rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 8192];
            let mut read = 0;
            while !buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf[read..]).await.unwrap();
                if n == 0 {
                    break;
                }
                read += n;
            }
            let head = String::from_utf8_lossy(&buf[..read]).to_string();
            let line = head.lines().next().unwrap_or_default().to_string();
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
            let _ = tx.send(line);
        });
        (base_url, rx)
    }

    #[tokio::test]
    async fn test_branch_delete_hits_the_branch_endpoint() {
        let (base_url, request_line) =
            capture_request_line(r#"{"branch":{"id":"a/b","project_id":"proj-1"}}"#).await;
        let client = NeonClient::new(base_url, Duration::from_secs(5)).unwrap();
        let key = ApiKey::new("test-key").unwrap();

        let branch = client.delete_branch(&key, "proj-1", "a/b").await.unwrap();
        assert_eq!(branch.id, "a/b");
        assert_eq!(
            request_line.await.unwrap(),
            "DELETE /api/v2/projects/proj-1/branches/a%2Fb HTTP/1.1"
        );
    }

    #[tokio::test]
    async fn test_dot_branch_id_never_reaches_the_network() {
        let (base_url, request_line) =
            capture_request_line(r#"{"project":{"id":"proj-1","name":"p"}}"#).await;
        let client = NeonClient::new(base_url, Duration::from_secs(5)).unwrap();
        let key = ApiKey::new("test-key").unwrap();

        for id in ["..", ".", ""] {
            let err = client.delete_branch(&key, "proj-1", id).await.unwrap_err();
            assert!(matches!(err, SwarmError::InvalidArgument(_)));
        }
        let err = client.delete_project(&key, "..").await.unwrap_err();
        assert!(matches!(err, SwarmError::InvalidArgument(_)));

        // Nothing was sent, so the listener is still waiting
        let pending = tokio::time::timeout(Duration::from_millis(100), request_line).await;
        assert!(pending.is_err());
    }
}
