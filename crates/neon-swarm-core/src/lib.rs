//! neon-swarm-core - Multi-agent task routing for Neon Postgres
//!
//! This crate provides:
//! - A session context holding the control-plane key, active project/branch
//!   and the single database connection of a conversation
//! - Tool adapters over the Neon control-plane API and a Postgres connection
//! - Two agent roles (control plane, query execution) with handoff between them
//! - An Anthropic API client and the turn loop that drives the active agent

pub mod agents;
pub mod api;
pub mod context;
pub mod control_plane;
pub mod database;
pub mod driver;
pub mod error;
pub mod session;
pub mod swarm;
pub mod tools;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use agents::{Agent, AgentRole, Instructions, Roster};
pub use api::{
    ApiClient, ApiMessage, ApiResponse, CompletionModel, ContentBlock, MessageContent,
    ToolDefinition,
};
pub use context::{ApiKey, SessionContext, SessionMode, mask_secret};
pub use control_plane::{ControlPlane, NeonClient};
pub use database::{DatabaseConnection, DatabaseConnector, PgConnector, QueryOutput};
pub use driver::{DEFAULT_MAX_ITERATIONS, TurnOutput, run_turn};
pub use error::{Result, SwarmError};
pub use session::{Session, ToolCall, ToolCallResult};
pub use swarm::Swarm;
pub use tools::{ToolHandler, ToolOutcome, ToolRegistry};
