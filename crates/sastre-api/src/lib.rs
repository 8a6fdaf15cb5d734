//! Async Rust client for the Cisco SD-WAN (vManage) controller REST API.
//!
//! This crate provides the HTTP transport layer used by `sastre-core`. It
//! covers:
//!
//! - **Session management** ([`Rest`]) — form-based login against
//!   `/j_security_check`, cookie-backed sessions, CSRF token propagation and
//!   an optional tenant session header for multi-tenant controllers.
//!
//! - **Typed verbs** — `get_json` / `post_json` / `put_json` / `delete`
//!   against `/dataservice/<path>`, with adaptive backoff on rate-limit
//!   responses and bounded retries on transient transport failures.
//!
//! - **Long-running actions** ([`ActionStatus`]) — controller-side attach,
//!   detach, activate and certificate-sync operations return an action id
//!   which [`Rest::poll_action`] observes until a terminal state.
//!
//! TLS verification is off by default ([`TlsMode::DangerAcceptInvalid`]):
//! controllers overwhelmingly ship self-signed certificates. Strict
//! verification and custom CA bundles are opt-in through [`TransportConfig`].
//!
//! Higher-level consumers (`sastre-core`) drive backup/restore/delete
//! pipelines on top of this crate and never touch reqwest directly.

pub mod action;
pub mod error;
pub mod session;
pub mod transport;

pub use action::{ActionOutcome, ActionStatus};
pub use error::Error;
pub use session::Rest;
pub use transport::{TlsMode, TransportConfig};
