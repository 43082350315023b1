//! Error taxonomy shared by the session context, tool adapters and agents

pub type Result<T> = std::result::Result<T, SwarmError>;

/// Every failure a tool call can produce.
///
/// Errors are scoped to the call that produced them: none of them poison the
/// session, and the context is left in its last valid state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SwarmError {
    /// Missing or rejected credential
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Database unreachable, URI invalid, or login rejected
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("no database connection is open; call connect_database first")]
    NotConnected,

    /// Context state required by the operation has not been established
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// Local parameter validation failure; nothing external was touched
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Control-plane call failed
    #[error("remote service error ({status}): {message}")]
    RemoteService { status: u16, message: String },

    /// Database execution failure. Displays the database message verbatim.
    #[error("{0}")]
    Query(String),
}

impl SwarmError {
    /// Stable tag used when folding the error back into the conversation
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Auth(_) => "auth_error",
            Self::Connection(_) => "connection_error",
            Self::NotConnected => "not_connected_error",
            Self::Precondition(_) => "precondition_error",
            Self::InvalidArgument(_) => "invalid_argument_error",
            Self::RemoteService { .. } => "remote_service_error",
            Self::Query(_) => "query_error",
        }
    }

    /// True for errors resolved without contacting any external system
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidArgument(_) | Self::Precondition(_) | Self::NotConnected
        )
    }

    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::RemoteService {
            status,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}
