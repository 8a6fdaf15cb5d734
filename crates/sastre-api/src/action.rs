// Long-running controller action polling.
//
// Attach, detach, activate and certificate-sync requests return an action id
// immediately; the real work is tracked through `device/action/status/<id>`
// until every per-device sub-task reaches a terminal state.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::error::Error;
use crate::session::Rest;

/// Default interval between action status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Default overall deadline for one action.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Snapshot of a controller action's status document.
#[derive(Debug, Clone)]
pub struct ActionStatus {
    data: Value,
}

/// Terminal outcome of one device within an action.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub hostname: String,
    pub status: String,
    pub activity: String,
}

impl ActionStatus {
    pub fn new(data: Value) -> Self {
        Self { data }
    }

    /// Aggregate status from the summary block, e.g. `in_progress` or `done`.
    pub fn status(&self) -> Option<&str> {
        self.data.get("summary")?.get("status")?.as_str()
    }

    /// The action has reached its terminal state.
    pub fn is_completed(&self) -> bool {
        self.status() == Some("done")
    }

    /// All per-device sub-tasks succeeded. An empty record set means the
    /// action failed validation before reaching any device.
    pub fn is_successful(&self) -> bool {
        let records = self.records();
        !records.is_empty()
            && records
                .iter()
                .all(|entry| entry.get("status").and_then(Value::as_str) == Some("Success"))
    }

    /// Per-device terminal records.
    pub fn outcomes(&self) -> Vec<ActionOutcome> {
        self.records()
            .iter()
            .map(|entry| ActionOutcome {
                hostname: entry
                    .get("host-name")
                    .and_then(Value::as_str)
                    .unwrap_or("<unknown>")
                    .to_owned(),
                status: entry
                    .get("status")
                    .and_then(Value::as_str)
                    .unwrap_or("<unknown>")
                    .to_owned(),
                activity: entry
                    .get("activity")
                    .and_then(Value::as_array)
                    .map(|lines| {
                        lines
                            .iter()
                            .filter_map(Value::as_str)
                            .collect::<Vec<_>>()
                            .join(", ")
                    })
                    .unwrap_or_default(),
            })
            .collect()
    }

    /// One-line per-device activity summary for log messages.
    pub fn activity_details(&self) -> String {
        let outcomes = self.outcomes();
        if outcomes.is_empty() {
            return "no data in action status".into();
        }
        outcomes
            .iter()
            .map(|o| format!("{}: {}", o.hostname, o.activity))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn records(&self) -> &[Value] {
        self.data
            .get("data")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

impl Rest {
    /// Poll an action until it completes or `timeout` expires.
    ///
    /// Polls `device/action/status/<id>` every `interval`. Returns the
    /// terminal [`ActionStatus`] on completion, or [`Error::ActionTimeout`]
    /// when the deadline fires -- the controller may still finish the action
    /// on its own afterwards.
    pub async fn poll_action(
        &self,
        action_id: &str,
        timeout: Duration,
        interval: Duration,
    ) -> Result<ActionStatus, Error> {
        let deadline = Instant::now() + timeout;
        loop {
            let status =
                ActionStatus::new(self.get_json(&format!("device/action/status/{action_id}")).await?);
            if status.is_completed() {
                return Ok(status);
            }
            if Instant::now() + interval > deadline {
                return Err(Error::ActionTimeout {
                    action_id: action_id.to_owned(),
                    timeout_secs: timeout.as_secs(),
                });
            }
            debug!(action_id, status = ?status.status(), "action in progress");
            tokio::time::sleep(interval).await;
        }
    }
}
