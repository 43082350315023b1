//! Session context: credentials, active project/branch, and the one
//! database connection a session may hold

use tracing::{debug, info, warn};

use crate::control_plane::{Project, UserInfo};
use crate::database::{DatabaseConnection, DatabaseConnector, redact_uri};
use crate::error::{Result, SwarmError};

/// Control-plane credential. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Rejects empty or whitespace-only keys
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(SwarmError::Auth("control-plane API key is not set".to_string()));
        }
        Ok(Self(key))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ApiKey({})", mask_secret(&self.0))
    }
}

/// `abc...wxyz` for long secrets, `***` otherwise
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}

/// Which entry point created the context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Requires a control-plane credential
    ControlPlane,
    /// Requires a database connection URI
    QueryExecution,
}

/// Mutable state shared by every tool call of one conversation.
///
/// Invariant: `active_branch_id` is `Some` only while `active_project_id` is
/// `Some`. The connection handle is owned here and nowhere else; callers
/// borrow it for the duration of one call via [`SessionContext::connection`].
pub struct SessionContext {
    id: String,
    api_key: Option<ApiKey>,
    active_project_id: Option<String>,
    active_branch_id: Option<String>,
    connection: Option<Box<dyn DatabaseConnection>>,
    connection_uri: Option<String>,
    user_info: Option<UserInfo>,
    known_projects: Vec<Project>,
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("id", &self.id)
            .field("api_key", &self.api_key)
            .field("active_project_id", &self.active_project_id)
            .field("active_branch_id", &self.active_branch_id)
            .field("connected", &self.connection.is_some())
            .field("connection_uri", &self.connection_uri.as_deref().map(redact_uri))
            .finish()
    }
}

impl SessionContext {
    /// Create a context, failing fast rather than returning a partial one.
    ///
    /// In control-plane mode a non-empty `api_key` is mandatory. When a
    /// `connection_uri` is supplied the connection is opened eagerly.
    pub async fn init(
        mode: SessionMode,
        api_key: Option<&str>,
        connection_uri: Option<&str>,
        connector: &dyn DatabaseConnector,
    ) -> Result<Self> {
        let api_key = match (mode, api_key) {
            (SessionMode::ControlPlane, None) => {
                return Err(SwarmError::Auth("control-plane API key is not set".to_string()));
            }
            (SessionMode::ControlPlane, Some(key)) => Some(ApiKey::new(key)?),
            (SessionMode::QueryExecution, key) => {
                key.filter(|k| !k.trim().is_empty()).map(ApiKey::new).transpose()?
            }
        };

        let mut ctx = Self::empty(api_key);

        if let Some(uri) = connection_uri {
            let conn = connector.connect(uri).await?;
            ctx.connection = Some(conn);
            ctx.connection_uri = Some(uri.to_string());
        } else if mode == SessionMode::QueryExecution {
            return Err(SwarmError::Connection("no connection URI supplied".to_string()));
        }

        info!("Session {} initialized ({:?})", ctx.id, mode);
        Ok(ctx)
    }

    fn empty(api_key: Option<ApiKey>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            api_key,
            active_project_id: None,
            active_branch_id: None,
            connection: None,
            connection_uri: None,
            user_info: None,
            known_projects: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The session credential, or `Auth` when the session has none
    pub fn api_key(&self) -> Result<&ApiKey> {
        self.api_key.as_ref().ok_or_else(|| {
            SwarmError::Auth("this session has no control-plane API key".to_string())
        })
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn active_project_id(&self) -> Option<&str> {
        self.active_project_id.as_deref()
    }

    pub fn active_branch_id(&self) -> Option<&str> {
        self.active_branch_id.as_deref()
    }

    /// Switching to a different project drops the active branch
    pub fn set_active_project(&mut self, project_id: impl Into<String>) {
        let project_id = project_id.into();
        if self.active_project_id.as_deref() != Some(project_id.as_str()) {
            self.active_branch_id = None;
        }
        debug!("Session {}: active project -> {}", self.id, project_id);
        self.active_project_id = Some(project_id);
    }

    /// Clears the project and the branch in one step
    pub fn clear_active_project(&mut self) {
        debug!("Session {}: active project cleared", self.id);
        self.active_project_id = None;
        self.active_branch_id = None;
    }

    pub fn set_active_branch(&mut self, branch_id: impl Into<String>) -> Result<()> {
        if self.active_project_id.is_none() {
            return Err(SwarmError::precondition(
                "no active project; create or select a project before choosing a branch",
            ));
        }
        let branch_id = branch_id.into();
        debug!("Session {}: active branch -> {}", self.id, branch_id);
        self.active_branch_id = Some(branch_id);
        Ok(())
    }

    pub fn clear_active_branch(&mut self) {
        self.active_branch_id = None;
    }

    /// Borrow the open connection for the duration of one call
    pub fn connection(&mut self) -> Result<&mut dyn DatabaseConnection> {
        match self.connection.as_mut() {
            Some(conn) => Ok(conn.as_mut()),
            None => Err(SwarmError::NotConnected),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Install a freshly opened connection, releasing the previous one
    pub async fn replace_connection(&mut self, conn: Box<dyn DatabaseConnection>, uri: &str) {
        if let Some(previous) = self.connection.replace(conn) {
            if let Err(e) = previous.close().await {
                warn!("Session {}: closing replaced connection failed: {}", self.id, e);
            }
        }
        self.connection_uri = Some(uri.to_string());
        info!("Session {}: connected to {}", self.id, redact_uri(uri));
    }

    /// Last connection URI obtained or used in this session
    pub fn connection_uri(&self) -> Option<&str> {
        self.connection_uri.as_deref()
    }

    pub fn remember_connection_uri(&mut self, uri: impl Into<String>) {
        let uri = uri.into();
        debug!("Session {}: remembered connection URI {}", self.id, redact_uri(&uri));
        self.connection_uri = Some(uri);
    }

    pub fn user_info(&self) -> Option<&UserInfo> {
        self.user_info.as_ref()
    }

    pub fn set_user_info(&mut self, user_info: UserInfo) {
        self.user_info = Some(user_info);
    }

    pub fn known_projects(&self) -> &[Project] {
        &self.known_projects
    }

    pub fn set_known_projects(&mut self, projects: Vec<Project>) {
        self.known_projects = projects;
    }

    /// Release the connection. Safe to call any number of times; the
    /// handle is taken out before closing, so it is released at most once
    /// even when closing fails.
    pub async fn close(&mut self) {
        match self.connection.take() {
            Some(conn) => match conn.close().await {
                Ok(()) => info!("Session {}: connection closed", self.id),
                Err(e) => warn!("Session {}: connection close failed: {}", self.id, e),
            },
            None => debug!("Session {}: close with no open connection", self.id),
        }
    }

    /// Close the connection and forget project/branch selection
    pub async fn reset(&mut self) {
        self.close().await;
        self.clear_active_project();
        info!("Session {} reset", self.id);
    }
}
