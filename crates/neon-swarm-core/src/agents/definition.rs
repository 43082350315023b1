//! Agent definition: name, instructions, tools, handoff targets

use serde_json::Value;
use tracing::debug;

use super::role::AgentRole;
use crate::api::ToolDefinition;
use crate::context::SessionContext;
use crate::error::Result;
use crate::tools::{ToolOutcome, ToolRegistry};

/// Instruction text, fixed or rendered from the session context
pub enum Instructions {
    Static(String),
    Dynamic(fn(&SessionContext) -> String),
}

impl Instructions {
    pub fn render(&self, ctx: &SessionContext) -> String {
        match self {
            Self::Static(text) => text.clone(),
            Self::Dynamic(render) => render(ctx),
        }
    }
}

impl std::fmt::Debug for Instructions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(text) => f.debug_tuple("Static").field(&text.len()).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(<fn>)"),
        }
    }
}

/// Immutable once built. All mutable state lives in the [`SessionContext`]
/// passed alongside.
pub struct Agent {
    role: AgentRole,
    instructions: Instructions,
    tools: ToolRegistry,
    handoff_targets: Vec<AgentRole>,
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("role", &self.role)
            .field("tools", &self.tools.names())
            .field("handoff_targets", &self.handoff_targets)
            .finish()
    }
}

impl Agent {
    pub fn new(
        role: AgentRole,
        instructions: Instructions,
        tools: ToolRegistry,
        handoff_targets: Vec<AgentRole>,
    ) -> Self {
        Self {
            role,
            instructions,
            tools,
            handoff_targets,
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn name(&self) -> &'static str {
        self.role.display_name()
    }

    pub fn instructions(&self, ctx: &SessionContext) -> String {
        self.instructions.render(ctx)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.definitions()
    }

    pub fn handoff_targets(&self) -> &[AgentRole] {
        &self.handoff_targets
    }

    pub fn can_hand_off_to(&self, role: AgentRole) -> bool {
        self.handoff_targets.contains(&role)
    }

    /// Run one of this agent's tools against the context
    pub async fn call(
        &self,
        tool_name: &str,
        input: Value,
        ctx: &mut SessionContext,
    ) -> Result<ToolOutcome> {
        debug!("{} calling {}", self.name(), tool_name);
        self.tools.dispatch(tool_name, input, ctx).await
    }
}

/// Assemble a system prompt from the role description, session facts and
/// rules
pub fn build_system_prompt(identity: &str, session_facts: &str, rules: &str) -> String {
    let mut prompt = String::new();

    if !identity.is_empty() {
        prompt.push_str("# IDENTITY\n\n");
        prompt.push_str(identity);
        prompt.push_str("\n\n");
    }

    if !session_facts.is_empty() {
        prompt.push_str("# SESSION\n\n");
        prompt.push_str(session_facts);
        prompt.push_str("\n\n");
    }

    prompt.push_str("# CURRENT TIME\n\n");
    prompt.push_str(&chrono::Utc::now().to_rfc3339());
    prompt.push_str("\n\n");

    prompt.push_str("# INSTRUCTIONS\n\n");
    prompt.push_str(rules);
    prompt.push('\n');

    debug!("Built system prompt ({} chars)", prompt.len());
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_system_prompt() {
        let prompt = build_system_prompt("I manage projects", "Active project: p1", "Be brief.");
        assert!(prompt.contains("IDENTITY"));
        assert!(prompt.contains("SESSION"));
        assert!(prompt.contains("Active project: p1"));
        assert!(prompt.ends_with("Be brief.\n"));
    }

    #[test]
    fn test_build_system_prompt_empty_sections() {
        let prompt = build_system_prompt("", "", "rules");
        assert!(prompt.contains("INSTRUCTIONS"));
        assert!(prompt.contains("CURRENT TIME"));
        assert!(!prompt.contains("IDENTITY"));
        assert!(!prompt.contains("SESSION"));
    }

    #[test]
    fn test_static_instructions() {
        let agent = Agent::new(
            AgentRole::QueryExecution,
            Instructions::Static("run sql".into()),
            ToolRegistry::new(),
            vec![AgentRole::ControlPlane],
        );
        assert_eq!(agent.name(), "Query-Execution Agent");
        assert!(agent.can_hand_off_to(AgentRole::ControlPlane));
        assert!(!agent.can_hand_off_to(AgentRole::QueryExecution));
        assert!(format!("{:?}", agent).contains("QueryExecution"));
    }
}
