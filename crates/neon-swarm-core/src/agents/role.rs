//! The two fixed agent roles

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Project and branch lifecycle
    ControlPlane,
    /// Connect, query, inspect schema
    QueryExecution,
}

impl AgentRole {
    pub const ALL: [AgentRole; 2] = [AgentRole::ControlPlane, AgentRole::QueryExecution];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ControlPlane => "control_plane",
            Self::QueryExecution => "query_execution",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ControlPlane => "Control-Plane Agent",
            Self::QueryExecution => "Query-Execution Agent",
        }
    }

    /// Name of the tool that hands control to this role
    pub fn handoff_tool_name(&self) -> &'static str {
        match self {
            Self::ControlPlane => "transfer_to_control_plane",
            Self::QueryExecution => "transfer_to_query_executor",
        }
    }

    /// The role a `transfer_to_*` tool name hands control to
    pub fn from_handoff_tool(name: &str) -> Option<AgentRole> {
        Self::ALL
            .into_iter()
            .find(|role| role.handoff_tool_name() == name)
    }

    pub fn summary(&self) -> &'static str {
        match self {
            Self::ControlPlane => {
                "It manages Neon projects and branches and obtains connection URIs."
            }
            Self::QueryExecution => {
                "It connects to a database, inspects its schema and executes SQL."
            }
        }
    }

    /// The role each role can hand off to
    pub fn counterpart(&self) -> AgentRole {
        match self {
            Self::ControlPlane => Self::QueryExecution,
            Self::QueryExecution => Self::ControlPlane,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "control_plane" | "control-plane" | "neon" => Ok(Self::ControlPlane),
            "query_execution" | "query-execution" | "query" | "sql" => Ok(Self::QueryExecution),
            other => Err(format!("unknown agent role: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_are_each_others_counterpart() {
        for role in AgentRole::ALL {
            assert_eq!(role.counterpart().counterpart(), role);
            assert_ne!(role.counterpart(), role);
        }
    }

    #[test]
    fn test_role_from_handoff_tool() {
        for role in AgentRole::ALL {
            assert_eq!(AgentRole::from_handoff_tool(role.handoff_tool_name()), Some(role));
        }
        assert_eq!(AgentRole::from_handoff_tool("list_projects"), None);
    }

    #[test]
    fn test_parse_role() {
        assert_eq!("query".parse::<AgentRole>().unwrap(), AgentRole::QueryExecution);
        assert_eq!("control-plane".parse::<AgentRole>().unwrap(), AgentRole::ControlPlane);
        assert!("triage".parse::<AgentRole>().is_err());
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(
            serde_json::to_value(AgentRole::QueryExecution).unwrap(),
            serde_json::json!("query_execution")
        );
        assert_eq!(AgentRole::ControlPlane.to_string(), "control_plane");
    }
}
