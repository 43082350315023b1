//! Data-plane tools for the query-execution agent

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{ToolHandler, ToolOutcome, json_schema, parse_params};
use crate::context::SessionContext;
use crate::database::DatabaseConnector;
use crate::error::{Result, SwarmError};

#[derive(Deserialize)]
struct ConnectParams {
    #[serde(default)]
    connection_uri: Option<String>,
}

/// Open (or replace) the session's database connection
pub struct ConnectDatabaseTool {
    connector: Arc<dyn DatabaseConnector>,
}

impl ConnectDatabaseTool {
    pub fn new(connector: Arc<dyn DatabaseConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl ToolHandler for ConnectDatabaseTool {
    fn name(&self) -> &str {
        "connect_database"
    }

    fn description(&self) -> &str {
        "Open a connection to a Postgres database. Uses the given connection URI, or the one \
         most recently obtained in this session. Replaces any open connection."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "connection_uri": {
                    "type": "string",
                    "description": "postgres:// connection URI (default: the last URI obtained in this session)"
                }
            }),
            vec![],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: ConnectParams = parse_params(input)?;
        let uri = params
            .connection_uri
            .or_else(|| ctx.connection_uri().map(str::to_string))
            .ok_or_else(|| {
                SwarmError::precondition(
                    "no connection URI available; pass connection_uri or fetch one with get_connection_uri",
                )
            })?;

        // Open the new connection first so a failure leaves the old one in place
        let conn = self.connector.connect(&uri).await?;
        ctx.replace_connection(conn, &uri).await;
        ToolOutcome::output(serde_json::json!({ "connected": true }))
    }
}

#[derive(Deserialize)]
struct ExecuteParams {
    sql_query: String,
}

/// Run SQL exactly as given
pub struct ExecuteSqlTool;

#[async_trait]
impl ToolHandler for ExecuteSqlTool {
    fn name(&self) -> &str {
        "execute_sql"
    }

    fn description(&self) -> &str {
        "Execute a SQL statement on the connected database and return the resulting rows. \
         Database errors are returned verbatim."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "sql_query": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The SQL to execute"
                }
            }),
            vec!["sql_query"],
        )
    }

    async fn execute(&self, input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let params: ExecuteParams = parse_params(input)?;
        let conn = ctx.connection()?;
        let output = conn.execute(&params.sql_query).await?;
        debug!("execute_sql returned {} rows", output.row_count());
        ToolOutcome::output(output)
    }
}

/// Describe the tables of the `public` schema
pub struct FetchSchemaTool;

#[async_trait]
impl ToolHandler for FetchSchemaTool {
    fn name(&self) -> &str {
        "fetch_database_schema"
    }

    fn description(&self) -> &str {
        "Fetch the schema of the connected database: every table in the public schema with \
         its columns, data types and nullability."
    }

    fn input_schema(&self) -> Value {
        json_schema(serde_json::json!({}), vec![])
    }

    async fn execute(&self, _input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let tables = ctx.connection()?.fetch_schema().await?;
        debug!("Fetched schema with {} tables", tables.len());
        ToolOutcome::output(serde_json::json!({ "tables": tables }))
    }
}

pub struct DisconnectDatabaseTool;

#[async_trait]
impl ToolHandler for DisconnectDatabaseTool {
    fn name(&self) -> &str {
        "disconnect_database"
    }

    fn description(&self) -> &str {
        "Close the open database connection, if any."
    }

    fn input_schema(&self) -> Value {
        json_schema(serde_json::json!({}), vec![])
    }

    async fn execute(&self, _input: Value, ctx: &mut SessionContext) -> Result<ToolOutcome> {
        let was_connected = ctx.is_connected();
        ctx.close().await;
        info!("disconnect_database (was connected: {})", was_connected);
        ToolOutcome::output(serde_json::json!({ "disconnected": was_connected }))
    }
}
