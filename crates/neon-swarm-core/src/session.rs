//! Active-agent state machine over one session context

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::agents::{Agent, AgentRole, Roster};
use crate::api::ToolDefinition;
use crate::context::SessionContext;
use crate::error::{Result, SwarmError};
use crate::tools::handoff::HandoffTool;
use crate::tools::{ToolHandler, ToolOutcome, schema};

/// A tool call chosen by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

#[derive(Debug)]
pub struct ToolCallResult {
    pub id: String,
    pub name: String,
    pub result: Result<ToolOutcome>,
}

impl ToolCallResult {
    /// Text folded back into the conversation, and whether it reports a failure.
    /// Errors read `<kind>: <message>` with the message untouched.
    pub fn render(&self) -> (String, bool) {
        match &self.result {
            Ok(ToolOutcome::Output(value)) => (value.to_string(), false),
            Ok(ToolOutcome::Handoff(role)) => (
                serde_json::json!({
                    "handoff": role,
                    "agent": role.display_name(),
                })
                .to_string(),
                false,
            ),
            Err(e) => (render_error(e), true),
        }
    }
}

pub fn render_error(e: &SwarmError) -> String {
    format!("{}: {}", e.kind(), e)
}

/// One conversation: the context plus whichever agent currently has control.
///
/// The active agent changes only when a tool call returns a handoff.
pub struct Session {
    roster: Arc<Roster>,
    active: Arc<Agent>,
    ctx: SessionContext,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("active", &self.active.role())
            .field("ctx", &self.ctx)
            .finish()
    }
}

impl Session {
    pub fn new(roster: Arc<Roster>, initial: AgentRole, ctx: SessionContext) -> Self {
        let active = roster.get(initial);
        info!("Session {} starting with {}", ctx.id(), active.name());
        Self {
            roster,
            active,
            ctx,
        }
    }

    pub fn active_agent(&self) -> &Arc<Agent> {
        &self.active
    }

    pub fn active_role(&self) -> AgentRole {
        self.active.role()
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut SessionContext {
        &mut self.ctx
    }

    /// System prompt of the active agent, rendered against the current context
    pub fn instructions(&self) -> String {
        self.active.instructions(&self.ctx)
    }

    pub fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.active.tool_definitions()
    }

    /// Run one tool of the active agent; a handoff takes effect immediately
    pub async fn call_tool(&mut self, name: &str, input: Value) -> Result<ToolOutcome> {
        let outcome = dispatch(&self.active.clone(), name, input, &mut self.ctx).await?;
        if let ToolOutcome::Handoff(target) = outcome {
            self.apply_handoff(target);
        }
        Ok(outcome)
    }

    /// Run every call of one model response in order.
    ///
    /// All calls go to the agent that was active when the batch started,
    /// since that agent selected them. If several calls hand off, the last
    /// target wins and is applied once the batch is done.
    pub async fn run_batch(&mut self, calls: Vec<ToolCall>) -> Vec<ToolCallResult> {
        let agent = self.active.clone();
        let mut handoff = None;
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let result = dispatch(&agent, &call.name, call.input, &mut self.ctx).await;
            if let Ok(ToolOutcome::Handoff(target)) = &result {
                handoff = Some(*target);
            }
            results.push(ToolCallResult {
                id: call.id,
                name: call.name,
                result,
            });
        }

        if let Some(target) = handoff {
            self.apply_handoff(target);
        }
        results
    }

    /// Make `target` the active agent
    fn apply_handoff(&mut self, target: AgentRole) {
        if self.active.role() == target {
            debug!("Handoff to {} ignored: already active", target);
            return;
        }
        if !self.active.can_hand_off_to(target) {
            warn!("{} has no handoff to {}", self.active.name(), target);
            return;
        }
        let next = self.roster.get(target);
        info!(
            "Session {}: handoff {} -> {}",
            self.ctx.id(),
            self.active.name(),
            next.name()
        );
        self.active = next;
    }

    /// Close the connection and clear project/branch; the active agent stays
    pub async fn reset(&mut self) {
        self.ctx.reset().await;
    }

    pub async fn close(&mut self) {
        self.ctx.close().await;
    }
}

/// Run a tool of `agent`. A transfer to the role that already has control
/// resolves to a handoff that changes nothing.
async fn dispatch(
    agent: &Agent,
    name: &str,
    input: Value,
    ctx: &mut SessionContext,
) -> Result<ToolOutcome> {
    if let Some(target) = AgentRole::from_handoff_tool(name)
        && target == agent.role()
    {
        schema::validate(&HandoffTool::to(target).input_schema(), &input)?;
        debug!("{} already has control; {} is a no-op", agent.name(), name);
        return Ok(ToolOutcome::Handoff(target));
    }
    agent.call(name, input, ctx).await
}
