//! Project lifecycle tools for the control-plane agent

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ToolHandler, ToolOutcome, json_schema, parse_params};
use crate::context::SessionContext;
use crate::control_plane::{
    ConnectionUriRequest, ControlPlane, CreateProject, DEFAULT_DATABASE_NAME, DEFAULT_ROLE_NAME,
};
use crate::error::{Result, SwarmError};

/// Explicit project id, else the active one
pub(crate) fn resolve_project(ctx: &SessionContext, explicit: Option<String>) -> Result<String> {
    explicit
        .or_else(|| ctx.active_project_id().map(str::to_string))
        .ok_or_else(|| {
            SwarmError::precondition(
                "no project_id given and no active project; create or select a project first",
            )
        })
}

#[derive(Deserialize)]
struct ProjectIdParams {
    project_id: String,
}

/// List the account's projects
pub struct ListProjectsTool {
    client: Arc<dyn ControlPlane>,
}

impl ListProjectsTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for ListProjectsTool {
    fn name(&self) -> &str {
        "list_projects"
    }

    fn description(&self) -> &str {
        "List all Neon projects for the authenticated user with their id, name, region and Postgres version."
    }

    fn input_schema(&self) -> Value {
        json_schema(serde_json::json!({}), vec![])
    }

    async fn execute(&self, _input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let projects = self.client.list_projects(ctx.api_key()?).await?;
        debug!("Listed {} projects", projects.len());
        ctx.set_known_projects(projects.clone());
        ToolOutcome::output(serde_json::json!({ "projects": projects }))
    }
}

pub struct GetProjectTool {
    client: Arc<dyn ControlPlane>,
}

impl GetProjectTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for GetProjectTool {
    fn name(&self) -> &str {
        "get_project"
    }

    fn description(&self) -> &str {
        "Get details of a specific project."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "project_id": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The ID of the project to retrieve"
                }
            }),
            vec!["project_id"],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: ProjectIdParams = parse_params(input)?;
        let project = self.client.get_project(ctx.api_key()?, &params.project_id).await?;
        ToolOutcome::output(project)
    }
}

/// Create a project and make it the active one
pub struct CreateProjectTool {
    client: Arc<dyn ControlPlane>,
}

impl CreateProjectTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for CreateProjectTool {
    fn name(&self) -> &str {
        "create_project"
    }

    fn description(&self) -> &str {
        "Create a new Neon project. The new project becomes the active project for this session."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "name": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The name of the project"
                },
                "region_id": {
                    "type": "string",
                    "description": "Region for the project, e.g. 'aws-us-east-2'"
                },
                "pg_version": {
                    "type": "integer",
                    "description": "Postgres major version (default: 16)"
                }
            }),
            vec!["name"],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let request: CreateProject = parse_params(input)?;
        let project = self.client.create_project(ctx.api_key()?, &request).await?;

        info!("Created project {} ({})", project.name, project.id);
        ctx.set_active_project(project.id.clone());
        ToolOutcome::output(project)
    }
}

/// Permanently delete a project and everything in it
pub struct DeleteProjectTool {
    client: Arc<dyn ControlPlane>,
}

impl DeleteProjectTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for DeleteProjectTool {
    fn name(&self) -> &str {
        "delete_project"
    }

    fn description(&self) -> &str {
        "Delete a project and all its branches, databases, roles and endpoints. \
         This is permanent and cannot be undone."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "project_id": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The ID of the project to delete"
                }
            }),
            vec!["project_id"],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: ProjectIdParams = parse_params(input)?;
        let project = self
            .client
            .delete_project(ctx.api_key()?, &params.project_id)
            .await?;

        info!("Deleted project {}", project.id);
        if ctx.active_project_id() == Some(params.project_id.as_str()) {
            ctx.clear_active_project();
        }
        ToolOutcome::output(project)
    }
}

/// Make an existing project the active one
pub struct SelectProjectTool {
    client: Arc<dyn ControlPlane>,
}

impl SelectProjectTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for SelectProjectTool {
    fn name(&self) -> &str {
        "select_project"
    }

    fn description(&self) -> &str {
        "Make an existing project the active project for this session. \
         Branch and connection tools default to the active project."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "project_id": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The ID of the project to activate"
                }
            }),
            vec!["project_id"],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: ProjectIdParams = parse_params(input)?;
        // Confirm it exists before touching the context
        let project = self.client.get_project(ctx.api_key()?, &params.project_id).await?;
        ctx.set_active_project(project.id.clone());
        ToolOutcome::output(project)
    }
}

#[derive(Deserialize)]
struct ConnectionUriParams {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    database_name: Option<String>,
    #[serde(default)]
    role_name: Option<String>,
    #[serde(default)]
    branch_id: Option<String>,
    #[serde(default)]
    endpoint_id: Option<String>,
    #[serde(default)]
    pooled: Option<bool>,
}

/// Fetch a connection URI and remember it for `connect_database`
pub struct GetConnectionUriTool {
    client: Arc<dyn ControlPlane>,
}

impl GetConnectionUriTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for GetConnectionUriTool {
    fn name(&self) -> &str {
        "get_connection_uri"
    }

    fn description(&self) -> &str {
        "Get the connection URI for a database in a project. Required before handing off \
         to the query executor. Defaults to the active project and branch."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "project_id": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Project ID (default: the active project)"
                },
                "database_name": {
                    "type": "string",
                    "description": "Database name (default: neondb)"
                },
                "role_name": {
                    "type": "string",
                    "description": "Role name (default: neondb_owner)"
                },
                "branch_id": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Branch ID (default: the active branch)"
                },
                "endpoint_id": {
                    "type": "string",
                    "description": "Endpoint ID"
                },
                "pooled": {
                    "type": "boolean",
                    "description": "Use the pooled connection endpoint"
                }
            }),
            vec![],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: ConnectionUriParams = parse_params(input)?;
        let project_id = resolve_project(ctx, params.project_id)?;
        let branch_id = params.branch_id.or_else(|| {
            (ctx.active_project_id() == Some(project_id.as_str()))
                .then(|| ctx.active_branch_id().map(str::to_string))
                .flatten()
        });

        let request = ConnectionUriRequest {
            project_id,
            database_name: params
                .database_name
                .unwrap_or_else(|| DEFAULT_DATABASE_NAME.to_string()),
            role_name: params
                .role_name
                .unwrap_or_else(|| DEFAULT_ROLE_NAME.to_string()),
            branch_id,
            endpoint_id: params.endpoint_id,
            pooled: params.pooled,
        };

        let uri = self.client.connection_uri(ctx.api_key()?, &request).await?;
        ctx.remember_connection_uri(uri.clone());
        ToolOutcome::output(serde_json::json!({ "uri": uri }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SessionMode;
    use crate::testing::{FakeConnector, FakeControlPlane};

    async fn ctx_with_key(key: &str) -> SessionContext {
        SessionContext::init(SessionMode::ControlPlane, Some(key), None, &FakeConnector::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_project_sets_active_project() {
        let client = Arc::new(FakeControlPlane::new());
        let tool = CreateProjectTool::new(client.clone());
        let mut ctx = ctx_with_key("valid-key").await;

        let outcome = tool
            .execute(serde_json::json!({"name": "demo"}), &mut ctx)
            .await
            .unwrap();

        let ToolOutcome::Output(value) = outcome else {
            panic!("expected output");
        };
        let id = value["id"].as_str().unwrap();
        assert!(!id.is_empty());
        assert_eq!(ctx.active_project_id(), Some(id));
        assert_eq!(value["name"], "demo");
    }

    #[tokio::test]
    async fn test_failed_create_leaves_context_unchanged() {
        let client = Arc::new(FakeControlPlane::new());
        let tool = CreateProjectTool::new(client.clone());
        let mut ctx = ctx_with_key("valid-key").await;
        ctx.set_active_project("proj-existing");
        ctx.set_active_branch("br-existing").unwrap();

        client.fail_next(SwarmError::remote(422, "project limit exceeded"));
        let result = tool.execute(serde_json::json!({"name": "demo"}), &mut ctx).await;

        assert_eq!(
            result.unwrap_err(),
            SwarmError::remote(422, "project limit exceeded")
        );
        assert_eq!(ctx.active_project_id(), Some("proj-existing"));
        assert_eq!(ctx.active_branch_id(), Some("br-existing"));
    }

    #[tokio::test]
    async fn test_create_with_rejected_key_is_remote_error() {
        let client = Arc::new(FakeControlPlane::new());
        let tool = CreateProjectTool::new(client);
        let mut ctx = ctx_with_key("wrong-key").await;

        let result = tool.execute(serde_json::json!({"name": "demo"}), &mut ctx).await;
        assert!(matches!(result, Err(SwarmError::RemoteService { status: 401, .. })));
        assert!(ctx.active_project_id().is_none());
    }

    #[tokio::test]
    async fn test_list_projects_refreshes_known_projects() {
        let client = Arc::new(FakeControlPlane::new().with_project("proj-1", "alpha"));
        let tool = ListProjectsTool::new(client);
        let mut ctx = ctx_with_key("valid-key").await;

        let outcome = tool.execute(serde_json::json!({}), &mut ctx).await.unwrap();
        let ToolOutcome::Output(value) = outcome else {
            panic!("expected output");
        };
        assert_eq!(value["projects"][0]["id"], "proj-1");
        assert_eq!(ctx.known_projects().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_active_project_clears_selection() {
        let client = Arc::new(
            FakeControlPlane::new()
                .with_project("proj-1", "alpha")
                .with_project("proj-2", "beta"),
        );
        let tool = DeleteProjectTool::new(client.clone());
        let mut ctx = ctx_with_key("valid-key").await;
        ctx.set_active_project("proj-1");
        ctx.set_active_branch("br-1").unwrap();

        tool.execute(serde_json::json!({"project_id": "proj-2"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.active_project_id(), Some("proj-1"));

        tool.execute(serde_json::json!({"project_id": "proj-1"}), &mut ctx)
            .await
            .unwrap();
        assert!(ctx.active_project_id().is_none());
        assert!(ctx.active_branch_id().is_none());
        assert_eq!(client.project_count(), 0);
    }

    #[tokio::test]
    async fn test_select_unknown_project_keeps_selection() {
        let client = Arc::new(FakeControlPlane::new().with_project("proj-1", "alpha"));
        let tool = SelectProjectTool::new(client);
        let mut ctx = ctx_with_key("valid-key").await;

        tool.execute(serde_json::json!({"project_id": "proj-1"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.active_project_id(), Some("proj-1"));

        let result = tool
            .execute(serde_json::json!({"project_id": "proj-missing"}), &mut ctx)
            .await;
        assert!(matches!(result, Err(SwarmError::RemoteService { status: 404, .. })));
        assert_eq!(ctx.active_project_id(), Some("proj-1"));
    }

    #[tokio::test]
    async fn test_connection_uri_defaults_to_active_project() {
        let client = Arc::new(FakeControlPlane::new().with_project("proj-1", "alpha"));
        let tool = GetConnectionUriTool::new(client.clone());
        let mut ctx = ctx_with_key("valid-key").await;

        let result = tool.execute(serde_json::json!({}), &mut ctx).await;
        assert!(matches!(result, Err(SwarmError::Precondition(_))));
        assert_eq!(client.call_count(), 0);

        ctx.set_active_project("proj-1");
        let outcome = tool.execute(serde_json::json!({}), &mut ctx).await.unwrap();
        let ToolOutcome::Output(value) = outcome else {
            panic!("expected output");
        };
        let uri = value["uri"].as_str().unwrap();
        assert!(uri.contains("neondb_owner"));
        assert!(uri.ends_with("/neondb"));
        assert_eq!(ctx.connection_uri(), Some(uri));
    }

    #[test]
    fn test_connection_uri_rejects_empty_ids() {
        let tool = GetConnectionUriTool::new(Arc::new(FakeControlPlane::new()));
        let schema = tool.input_schema();
        for input in [
            serde_json::json!({"project_id": ""}),
            serde_json::json!({"project_id": "proj-1", "branch_id": "  "}),
        ] {
            let err = crate::tools::schema::validate(&schema, &input).unwrap_err();
            assert!(matches!(err, SwarmError::InvalidArgument(_)));
        }
        assert!(crate::tools::schema::validate(&schema, &serde_json::json!({})).is_ok());
    }

    #[tokio::test]
    async fn test_resolve_project_prefers_explicit() {
        let mut ctx = ctx_with_key("valid-key").await;
        ctx.set_active_project("proj-active");
        assert_eq!(resolve_project(&ctx, Some("proj-x".into())).unwrap(), "proj-x");
        assert_eq!(resolve_project(&ctx, None).unwrap(), "proj-active");
    }
}
