use thiserror::Error;

/// Unified error type for the core crate.
///
/// Fatal kinds abort the running task; item-local kinds are logged by the
/// task, counted, and never propagate past the item that raised them.
#[derive(Debug, Error)]
pub enum TaskError {
    // ── Fatal: transport / auth / configuration ─────────────────────
    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication error: {0}")]
    Auth(String),

    #[error("rate limit retries exhausted: {0}")]
    RateLimitExhausted(String),

    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("invalid recipe: {0}")]
    InvalidRecipe(String),

    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("transform produced duplicate {info} names: {names}")]
    NameCollision { info: String, names: String },

    #[error("failed {context}")]
    ActionFailed { context: String },

    // ── Item-local ──────────────────────────────────────────────────
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("{kind} not supported by target controller")]
    VersionUnsupported { kind: String },

    #[error("invalid backup: {0}")]
    InvalidBackup(String),

    #[error("action timed out: {0}")]
    ActionTimeout(String),

    #[error("unresolved reference: {0}")]
    DependencyUnresolved(String),

    // ── Plumbing ────────────────────────────────────────────────────
    #[error("controller API error: {0}")]
    Api(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("invalid JSON: {0}")]
    Json(String),
}

impl TaskError {
    /// Fatal errors abort the whole task; everything else is item-local.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::Auth(_)
                | Self::RateLimitExhausted(_)
                | Self::InvalidTag(_)
                | Self::InvalidRecipe(_)
                | Self::InvalidArg(_)
                | Self::NameCollision { .. }
        )
    }
}

impl From<sastre_api::Error> for TaskError {
    fn from(err: sastre_api::Error) -> Self {
        use sastre_api::Error as Api;
        match err {
            Api::Authentication { message } => Self::Auth(message),
            Api::RateLimitExhausted { attempts } => {
                Self::RateLimitExhausted(format!("{attempts} attempts"))
            }
            Api::Transport(e) => Self::Connection(e.to_string()),
            Api::InvalidUrl(e) => Self::Connection(e.to_string()),
            Api::Tls(message) => Self::Connection(message),
            Api::ActionTimeout {
                action_id,
                timeout_secs,
            } => Self::ActionTimeout(format!("action {action_id} after {timeout_secs}s")),
            Api::Status { status: 404, .. } => Self::NotFound(err.to_string()),
            Api::Status { status: 409, .. } => Self::Conflict(err.to_string()),
            Api::Status { .. } => Self::Api(err.to_string()),
            Api::Deserialization { message, .. } => Self::Json(message),
        }
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<zip::result::ZipError> for TaskError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Archive(err.to_string())
    }
}
