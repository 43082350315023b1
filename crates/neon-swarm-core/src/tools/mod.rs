//! Tool adapters: declared name + parameter schema + handler over the
//! session context

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::agents::AgentRole;
use crate::api::ToolDefinition;
use crate::context::SessionContext;
use crate::error::{Result, SwarmError};

pub mod branches;
pub mod handoff;
pub mod projects;
pub mod schema;
pub mod sql;

/// What a successful tool call produced. Never both a value and a handoff.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Output(Value),
    Handoff(AgentRole),
}

impl ToolOutcome {
    /// Encode a result value. A value JSON cannot represent is a query error.
    pub fn output(value: impl serde::Serialize) -> Result<Self> {
        serde_json::to_value(value)
            .map(Self::Output)
            .map_err(|e| SwarmError::Query(format!("tool output could not be encoded: {}", e)))
    }

    pub fn handoff_target(&self) -> Option<AgentRole> {
        match self {
            Self::Handoff(role) => Some(*role),
            Self::Output(_) => None,
        }
    }
}

/// Individual tool handler
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    /// Runs after `input` has been validated against `input_schema`
    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome>;
}

/// Ordered set of tools exposed by one agent
pub struct ToolRegistry {
    tools: Vec<Arc<dyn ToolHandler>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Register a tool handler. A second registration under the same name
    /// replaces the first in place.
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        debug!("Registering tool: {}", name);
        match self.index.get(&name) {
            Some(&slot) => {
                warn!("Tool {} registered twice; replacing", name);
                self.tools[slot] = handler;
            }
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(handler);
            }
        }
    }

    pub fn with(mut self, handler: Arc<dyn ToolHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.index.get(name).map(|&slot| self.tools[slot].clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions in registration order, as sent to the model
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|handler| ToolDefinition {
                name: handler.name().to_string(),
                description: handler.description().to_string(),
                input_schema: handler.input_schema(),
            })
            .collect()
    }

    /// Resolve a model-chosen name, validate the input, then run the handler.
    ///
    /// Unknown names and schema violations fail with `InvalidArgument`
    /// before the context or any external system is touched.
    pub async fn dispatch(
        &self,
        tool_name: &str,
        input: Value,
        ctx: &mut SessionContext,
    ) -> Result<ToolOutcome> {
        let handler = self
            .get(tool_name)
            .ok_or_else(|| SwarmError::invalid(format!("unknown tool: {}", tool_name)))?;

        schema::validate(&handler.input_schema(), &input)?;
        debug!("Executing tool: {} with input: {}", tool_name, input);

        match handler.execute(input, ctx).await {
            Ok(outcome) => {
                debug!("Tool {} succeeded", tool_name);
                Ok(outcome)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", tool_name, e);
                Err(e)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper function to create a JSON schema for tool input
pub fn json_schema(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
        "additionalProperties": false,
    })
}

/// Deserialize validated input into a typed parameter struct. Explicit
/// nulls are treated as absent so serde defaults apply.
pub fn parse_params<T: DeserializeOwned>(mut input: Value) -> Result<T> {
    if let Value::Object(map) = &mut input {
        map.retain(|_, v| !v.is_null());
    }
    serde_json::from_value(input).map_err(|e| SwarmError::invalid(e.to_string()))
}
