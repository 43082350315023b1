//! Branch tools for the control-plane agent

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use super::projects::resolve_project;
use super::{ToolHandler, ToolOutcome, json_schema, parse_params};
use crate::context::SessionContext;
use crate::control_plane::{ControlPlane, CreateBranch, EndpointType};
use crate::error::{Result, SwarmError};

#[derive(Deserialize)]
struct CreateBranchParams {
    #[serde(default)]
    project_id: Option<String>,
    #[serde(default)]
    parent_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    endpoint_type: Option<EndpointType>,
}

#[derive(Deserialize)]
struct ProjectScopeParams {
    #[serde(default)]
    project_id: Option<String>,
}

#[derive(Deserialize)]
struct BranchParams {
    #[serde(default)]
    project_id: Option<String>,
    branch_id: String,
}

fn project_id_property() -> Value {
    serde_json::json!({
        "type": "string",
        "minLength": 1,
        "description": "Project ID (default: the active project)"
    })
}

fn branch_schema(branch_description: &str) -> Value {
    json_schema(
        serde_json::json!({
            "project_id": project_id_property(),
            "branch_id": {
                "type": "string",
                "minLength": 1,
                "description": branch_description
            }
        }),
        vec!["branch_id"],
    )
}

/// Create a branch; it becomes the active branch
pub struct CreateBranchTool {
    client: Arc<dyn ControlPlane>,
}

impl CreateBranchTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for CreateBranchTool {
    fn name(&self) -> &str {
        "create_branch"
    }

    fn description(&self) -> &str {
        "Create a new branch in a project. The new branch becomes the active branch."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "project_id": project_id_property(),
                "parent_id": {
                    "type": "string",
                    "description": "ID of the parent branch (default: the project's default branch)"
                },
                "name": {
                    "type": "string",
                    "description": "Name of the new branch"
                },
                "endpoint_type": {
                    "type": "string",
                    "enum": ["read_write", "read_only"],
                    "description": "Create a compute endpoint of this type for the branch"
                }
            }),
            vec![],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: CreateBranchParams = parse_params(input)?;
        let project_id = resolve_project(ctx, params.project_id)?;
        let request = CreateBranch {
            parent_id: params.parent_id,
            name: params.name,
            endpoint_type: params.endpoint_type,
        };

        let branch = self
            .client
            .create_branch(ctx.api_key()?, &project_id, &request)
            .await?;

        info!("Created branch {} in project {}", branch.id, project_id);
        ctx.set_active_project(project_id);
        ctx.set_active_branch(branch.id.clone())?;
        ToolOutcome::output(branch)
    }
}

pub struct ListBranchesTool {
    client: Arc<dyn ControlPlane>,
}

impl ListBranchesTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for ListBranchesTool {
    fn name(&self) -> &str {
        "list_branches"
    }

    fn description(&self) -> &str {
        "List all branches in a project."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({ "project_id": project_id_property() }),
            vec![],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: ProjectScopeParams = parse_params(input)?;
        let project_id = resolve_project(ctx, params.project_id)?;
        let branches = self.client.list_branches(ctx.api_key()?, &project_id).await?;
        ToolOutcome::output(serde_json::json!({ "branches": branches }))
    }
}

pub struct GetBranchTool {
    client: Arc<dyn ControlPlane>,
}

impl GetBranchTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for GetBranchTool {
    fn name(&self) -> &str {
        "get_branch"
    }

    fn description(&self) -> &str {
        "Get details of a specific branch in a project."
    }

    fn input_schema(&self) -> Value {
        branch_schema("The ID of the branch")
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: BranchParams = parse_params(input)?;
        let project_id = resolve_project(ctx, params.project_id)?;
        let branch = self
            .client
            .get_branch(ctx.api_key()?, &project_id, &params.branch_id)
            .await?;
        ToolOutcome::output(branch)
    }
}

pub struct DeleteBranchTool {
    client: Arc<dyn ControlPlane>,
}

impl DeleteBranchTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for DeleteBranchTool {
    fn name(&self) -> &str {
        "delete_branch"
    }

    fn description(&self) -> &str {
        "Delete a branch from a project. This is permanent."
    }

    fn input_schema(&self) -> Value {
        branch_schema("The ID of the branch to delete")
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: BranchParams = parse_params(input)?;
        let project_id = resolve_project(ctx, params.project_id)?;
        let branch = self
            .client
            .delete_branch(ctx.api_key()?, &project_id, &params.branch_id)
            .await?;

        info!("Deleted branch {} from project {}", branch.id, project_id);
        if ctx.active_project_id() == Some(project_id.as_str())
            && ctx.active_branch_id() == Some(params.branch_id.as_str())
        {
            ctx.clear_active_branch();
        }
        ToolOutcome::output(branch)
    }
}

#[derive(Deserialize)]
struct SelectBranchParams {
    branch_id: String,
}

/// Make a branch of the active project the active branch
pub struct SelectBranchTool {
    client: Arc<dyn ControlPlane>,
}

impl SelectBranchTool {
    pub fn new(client: Arc<dyn ControlPlane>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolHandler for SelectBranchTool {
    fn name(&self) -> &str {
        "select_branch"
    }

    fn description(&self) -> &str {
        "Make a branch of the active project the active branch. Requires an active project."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "branch_id": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The ID of the branch to activate"
                }
            }),
            vec!["branch_id"],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: SelectBranchParams = parse_params(input)?;
        let project_id = ctx
            .active_project_id()
            .map(str::to_string)
            .ok_or_else(|| {
                SwarmError::precondition("no active project; select a project before a branch")
            })?;

        let branch = self
            .client
            .get_branch(ctx.api_key()?, &project_id, &params.branch_id)
            .await?;
        ctx.set_active_branch(branch.id.clone())?;
        ToolOutcome::output(branch)
    }
}
