//! Agent roles, definitions and the roster that binds tools to them
//!
//! Two fixed roles split the tool surface: the control-plane agent manages
//! projects and branches, the query-execution agent talks to the database.
//! Each can hand the conversation to the other.

pub mod definition;
pub mod role;
pub mod roster;

pub use definition::{Agent, Instructions, build_system_prompt};
pub use role::AgentRole;
pub use roster::Roster;
