use thiserror::Error;

/// Top-level error type for the `sastre-api` crate.
///
/// Covers every failure mode of the transport layer: authentication,
/// connection, rate limiting and controller-reported request errors.
/// `sastre-core` maps these into task-level error kinds.
#[derive(Debug, Error)]
pub enum Error {
    /// Login failed (wrong credentials, locked account) or the session was
    /// rejected with 401/403. Never retried.
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    /// HTTP transport error (connection refused, DNS failure, read timeout)
    /// that persisted through the transient-retry budget.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The controller kept returning 429 past the retry budget.
    #[error("rate limit retries exhausted after {attempts} attempts")]
    RateLimitExhausted { attempts: u32 },

    /// Non-success HTTP status from the controller, with the error message
    /// extracted from the response body when one was provided.
    #[error("{method} {path} failed ({status}): {message}")]
    Status {
        status: u16,
        method: &'static str,
        path: String,
        message: String,
    },

    /// Response body could not be parsed as JSON.
    #[error("deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// A long-running action did not reach a terminal state in time.
    #[error("action {action_id} still in progress after {timeout_secs}s")]
    ActionTimeout {
        action_id: String,
        timeout_secs: u64,
    },
}

impl Error {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Returns `true` for a 404 from the controller.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// Returns `true` for a 409 (in-use or duplicate) from the controller.
    pub fn is_conflict(&self) -> bool {
        self.status() == Some(409)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
