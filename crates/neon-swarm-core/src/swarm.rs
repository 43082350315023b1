//! Initialization entry points: one per starting role

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::agents::{Agent, AgentRole, Roster};
use crate::context::{SessionContext, SessionMode};
use crate::control_plane::{ControlPlane, NeonClient};
use crate::database::{DatabaseConnector, PgConnector};
use crate::error::{Result, SwarmError};
use crate::session::Session;

/// Owns the external clients and the agent roster shared by every session
pub struct Swarm {
    control_plane: Arc<dyn ControlPlane>,
    connector: Arc<dyn DatabaseConnector>,
    roster: Arc<Roster>,
    api_key: Option<String>,
}

impl std::fmt::Debug for Swarm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Swarm")
            .field("roster", &self.roster)
            .field("api_key", &self.api_key.as_deref().map(crate::context::mask_secret))
            .finish()
    }
}

impl Swarm {
    pub fn new(control_plane: Arc<dyn ControlPlane>, connector: Arc<dyn DatabaseConnector>) -> Self {
        let roster = Arc::new(Roster::new(control_plane.clone(), connector.clone()));
        Self {
            control_plane,
            connector,
            roster,
            api_key: None,
        }
    }

    /// Live Neon API client plus a Postgres connector
    pub fn neon(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = NeonClient::new(base_url, timeout)?;
        Ok(Self::new(Arc::new(client), Arc::new(PgConnector::new())))
    }

    /// Control-plane key handed to sessions that start in query mode, so
    /// they can still manage projects after a handoff
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    /// Start in the control-plane role.
    ///
    /// Verifies the key against the control plane and captures the user
    /// profile and project list for the agent's instructions.
    pub async fn control_plane_agent_init(
        &self,
        api_key: &str,
    ) -> Result<(Arc<Agent>, SessionContext)> {
        let mut ctx = SessionContext::init(
            SessionMode::ControlPlane,
            Some(api_key),
            None,
            self.connector.as_ref(),
        )
        .await?;

        let key = ctx.api_key()?.clone();
        let user = self
            .control_plane
            .current_user(&key)
            .await
            .map_err(rejected_as_auth)?;
        let projects = self
            .control_plane
            .list_projects(&key)
            .await
            .map_err(rejected_as_auth)?;

        info!(
            "Control-plane session for user {} ({} projects)",
            user.id,
            projects.len()
        );
        ctx.set_user_info(user);
        ctx.set_known_projects(projects);

        Ok((self.roster.get(AgentRole::ControlPlane), ctx))
    }

    /// Start in the query-execution role with an eagerly opened connection
    pub async fn query_execution_agent_init(
        &self,
        connection_uri: &str,
    ) -> Result<(Arc<Agent>, SessionContext)> {
        let ctx = SessionContext::init(
            SessionMode::QueryExecution,
            self.api_key.as_deref(),
            Some(connection_uri),
            self.connector.as_ref(),
        )
        .await?;

        if !ctx.has_api_key() {
            warn!("Query session has no control-plane key; project tools will fail with auth_error");
        }
        Ok((self.roster.get(AgentRole::QueryExecution), ctx))
    }

    /// Wrap an initialized pair into a session driven by handoffs
    pub fn session(&self, agent: Arc<Agent>, ctx: SessionContext) -> Session {
        Session::new(self.roster.clone(), agent.role(), ctx)
    }
}

fn rejected_as_auth(e: SwarmError) -> SwarmError {
    match e {
        SwarmError::RemoteService { status: 401 | 403, message } => SwarmError::Auth(message),
        other => other,
    }
}
