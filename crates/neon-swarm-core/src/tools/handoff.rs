//! Handoff tools: transfer control to another agent role

use async_trait::async_trait;
use serde_json::Value;

use super::{ToolHandler, ToolOutcome, json_schema};
use crate::agents::AgentRole;
use crate::context::SessionContext;
use crate::error::Result;

/// Yields [`ToolOutcome::Handoff`] and never touches the context
pub struct HandoffTool {
    target: AgentRole,
    name: String,
    description: String,
}

impl HandoffTool {
    pub fn to(target: AgentRole) -> Self {
        Self {
            target,
            name: target.handoff_tool_name().to_string(),
            description: format!(
                "Transfer the conversation to the {}. {}",
                target.display_name(),
                target.summary()
            ),
        }
    }

    pub fn target(&self) -> AgentRole {
        self.target
    }
}

#[async_trait]
impl ToolHandler for HandoffTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        json_schema(serde_json::json!({}), vec![])
    }

    async fn execute(&self, _input: Value, _ctx: &mut SessionContext) -> Result<ToolOutcome> {
        Ok(ToolOutcome::Handoff(self.target))
    }
}
