// ── Async action engine ──
//
// Controller-side attach, detach, activate, deactivate and certificate-sync
// are long-running: submission returns an action id, completion is observed
// by polling. This module submits device chunks and drives a bounded pool
// of pollers over the resulting action ids.
//
// Category ordering (attach WAN edge -> attach vSmart -> activate policy,
// and the reverse for teardown) is enforced by the calling task awaiting
// each category before submitting the next.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use sastre_api::Rest;

use crate::error::TaskError;

const ATTACH_FEATURE_PATH: &str = "template/device/config/attachfeature";
const ATTACH_CLI_PATH: &str = "template/device/config/attachcli";
const DEVICE_MODE_CLI_PATH: &str = "template/config/device/mode/cli";
const VSMART_ACTIVATE_PATH: &str = "template/policy/vsmart/activate";
const VSMART_DEACTIVATE_PATH: &str = "template/policy/vsmart/deactivate";
const VSMART_STATUS_PATH: &str = "template/policy/vsmart/connectivity/status";
const CERT_SYNC_PATH: &str = "certificate/vedge/list?action=push";

/// Devices per attach/detach request.
pub const DEFAULT_CHUNK_SIZE: usize = 10;
/// Concurrent action pollers.
const POLLER_POOL: usize = 10;

/// One device template attach request: the template plus the per-device
/// variable input records to attach with.
pub struct AttachInput {
    pub template_id: String,
    pub template_name: String,
    pub is_cli: bool,
    pub device_inputs: Vec<Value>,
}

/// One template detach request: the devices to flip back to CLI mode.
pub struct DetachInput {
    pub template_name: String,
    pub device_type: String,
    pub device_ids: Vec<String>,
}

/// A submitted action being tracked to completion.
pub struct PendingAction {
    pub action_id: String,
    pub info: String,
}

/// Submits chunked long-running actions and awaits their completion.
pub struct ActionEngine<'a> {
    api: &'a Rest,
    pub chunk_size: usize,
    pub poll_interval: Duration,
    pub action_timeout: Duration,
    cancel: CancellationToken,
}

impl<'a> ActionEngine<'a> {
    pub fn new(api: &'a Rest, cancel: CancellationToken) -> Self {
        Self {
            api,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: sastre_api::action::DEFAULT_POLL_INTERVAL,
            action_timeout: sastre_api::action::DEFAULT_ACTION_TIMEOUT,
            cancel,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_timing(mut self, timeout: Duration, interval: Duration) -> Self {
        self.action_timeout = timeout;
        self.poll_interval = interval;
        self
    }

    // ── Submission ───────────────────────────────────────────────────

    /// Submit template attach requests, one action per device chunk.
    pub async fn submit_attach(
        &self,
        requests: Vec<AttachInput>,
        is_edited: bool,
    ) -> Result<Vec<PendingAction>, TaskError> {
        let mut pending = Vec::new();
        for request in requests {
            let path = if request.is_cli {
                ATTACH_CLI_PATH
            } else {
                ATTACH_FEATURE_PATH
            };
            for chunk in chunk_device_inputs(request.device_inputs, self.chunk_size) {
                self.check_cancelled()?;
                let count = chunk.len();
                let payload = json!({
                    "deviceTemplateList": [{
                        "templateId": request.template_id.clone(),
                        "device": chunk,
                        "isEdited": is_edited,
                        "isMasterEdited": false,
                    }]
                });
                let reply = self.api.post_json(path, &payload).await?;
                let action_id = action_id(&reply)?;
                debug!(%action_id, template = %request.template_name, "attach requested");
                pending.push(PendingAction {
                    action_id,
                    info: format!("attach {} ({count} devices)", request.template_name),
                });
            }
        }
        Ok(pending)
    }

    /// Submit template detach requests (device mode back to CLI), one
    /// action per device chunk.
    pub async fn submit_detach(
        &self,
        requests: Vec<DetachInput>,
    ) -> Result<Vec<PendingAction>, TaskError> {
        let mut pending = Vec::new();
        for request in requests {
            let mut device_ids = request.device_ids;
            device_ids.sort_unstable();
            for chunk in device_ids.chunks(self.chunk_size) {
                self.check_cancelled()?;
                let payload = json!({
                    "deviceType": request.device_type.clone(),
                    "devices": chunk.iter().map(|id| json!({"deviceId": id})).collect::<Vec<_>>(),
                });
                let reply = self.api.post_json(DEVICE_MODE_CLI_PATH, &payload).await?;
                let action_id = action_id(&reply)?;
                debug!(%action_id, template = %request.template_name, "detach requested");
                pending.push(PendingAction {
                    action_id,
                    info: format!("detach {} ({} devices)", request.template_name, chunk.len()),
                });
            }
        }
        Ok(pending)
    }

    /// Activate a vSmart policy. Skipped (empty result) when the vSmarts
    /// are not in vManage mode or not ready.
    pub async fn submit_activate_policy(
        &self,
        policy_id: &str,
        policy_name: &str,
        is_edited: bool,
    ) -> Result<Vec<PendingAction>, TaskError> {
        if !self.vsmarts_ready().await {
            debug!("vSmarts not in vManage mode or not ready, skipping policy activate");
            return Ok(Vec::new());
        }
        let payload = if is_edited {
            json!({"isEdited": true})
        } else {
            json!({})
        };
        let reply = self
            .api
            .post_json(&format!("{VSMART_ACTIVATE_PATH}/{policy_id}"), &payload)
            .await?;
        let action_id = action_id(&reply)?;
        debug!(%action_id, policy = policy_name, "policy activate requested");
        Ok(vec![PendingAction {
            action_id,
            info: format!("activate policy {policy_name}"),
        }])
    }

    pub async fn submit_deactivate_policy(
        &self,
        policy_id: &str,
        policy_name: &str,
    ) -> Result<Vec<PendingAction>, TaskError> {
        let reply = self
            .api
            .post_json(&format!("{VSMART_DEACTIVATE_PATH}/{policy_id}"), &json!({}))
            .await?;
        let action_id = action_id(&reply)?;
        debug!(%action_id, policy = policy_name, "policy deactivate requested");
        Ok(vec![PendingAction {
            action_id,
            info: format!("deactivate policy {policy_name}"),
        }])
    }

    /// Push WAN edge certificate state to the controllers.
    pub async fn submit_certificate_sync(&self) -> Result<Vec<PendingAction>, TaskError> {
        let reply = self.api.post_json(CERT_SYNC_PATH, &json!({})).await?;
        let action_id = action_id(&reply)?;
        Ok(vec![PendingAction {
            action_id,
            info: "certificate sync".into(),
        }])
    }

    // ── Completion ───────────────────────────────────────────────────

    /// Wait for every submitted action to reach a terminal state.
    ///
    /// Actions are polled concurrently by a bounded pool. A chunk failure
    /// never aborts the others; the aggregate surfaces as `Ok(false)` (or
    /// [`TaskError::ActionFailed`] when `raise_on_failure`). An expired
    /// per-action deadline counts as a failure -- the controller may still
    /// complete it on its own.
    pub async fn wait_actions(
        &self,
        actions: Vec<PendingAction>,
        context: &str,
        raise_on_failure: bool,
    ) -> Result<bool, TaskError> {
        if actions.is_empty() {
            return Ok(true);
        }
        info!("{context}");

        let results: Vec<bool> = stream::iter(actions)
            .map(|action| self.poll_one(action))
            .buffer_unordered(POLLER_POOL)
            .collect()
            .await;

        let all_ok = results.iter().all(|&ok| ok);
        if all_ok {
            info!("completed {context}");
            Ok(true)
        } else if raise_on_failure {
            Err(TaskError::ActionFailed {
                context: context.to_owned(),
            })
        } else {
            warn!("failed {context}");
            Ok(false)
        }
    }

    async fn poll_one(&self, action: PendingAction) -> bool {
        if self.cancel.is_cancelled() {
            warn!(info = %action.info, "cancelled before polling");
            return false;
        }
        let poll = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!(info = %action.info, "cancelled while polling");
                return false;
            }
            status = self.api.poll_action(
                &action.action_id,
                self.action_timeout,
                self.poll_interval,
            ) => status,
        };

        match poll {
            Ok(status) if status.is_successful() => {
                info!("completed {}", action.info);
                true
            }
            Ok(status) => {
                warn!("failed {}: {}", action.info, status.activity_details());
                false
            }
            Err(e) => {
                warn!("failed {}: {e}", action.info);
                false
            }
        }
    }

    async fn vsmarts_ready(&self) -> bool {
        let Ok(reply) = self.api.get_json(VSMART_STATUS_PATH).await else {
            return false;
        };
        let records = reply
            .get("data")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        !records.is_empty()
            && records.iter().all(|entry| {
                entry.get("operationMode").and_then(Value::as_str) == Some("vmanage")
                    && entry.get("isOnline").and_then(Value::as_bool).unwrap_or(false)
            })
    }

    fn check_cancelled(&self) -> Result<(), TaskError> {
        if self.cancel.is_cancelled() {
            return Err(TaskError::ActionFailed {
                context: "cancelled".into(),
            });
        }
        Ok(())
    }
}

/// Split attach inputs into request chunks, ordered by system IP ascending
/// for reproducible requests.
fn chunk_device_inputs(mut inputs: Vec<Value>, chunk_size: usize) -> Vec<Vec<Value>> {
    inputs.sort_by_key(|entry| {
        (
            entry
                .get("csv-deviceIP")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            entry
                .get("csv-deviceId")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        )
    });
    inputs
        .chunks(chunk_size.max(1))
        .map(<[Value]>::to_vec)
        .collect()
}

fn action_id(reply: &Value) -> Result<String, TaskError> {
    reply
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| TaskError::Api("action submission returned no action id".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(ip: &str, id: &str) -> Value {
        json!({"csv-deviceIP": ip, "csv-deviceId": id})
    }

    #[test]
    fn chunks_are_ordered_by_system_ip() {
        let inputs = vec![
            input("10.0.0.3", "c"),
            input("10.0.0.1", "a"),
            input("10.0.0.2", "b"),
        ];
        let chunks = chunk_device_inputs(inputs, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0][0]["csv-deviceIP"], "10.0.0.1");
        assert_eq!(chunks[0][1]["csv-deviceIP"], "10.0.0.2");
        assert_eq!(chunks[1][0]["csv-deviceIP"], "10.0.0.3");
    }

    #[test]
    fn chunking_is_stable_across_runs() {
        let build = || {
            vec![
                input("10.0.0.2", "b"),
                input("10.0.0.1", "a"),
            ]
        };
        assert_eq!(
            chunk_device_inputs(build(), 10),
            chunk_device_inputs(build(), 10)
        );
    }

    #[test]
    fn action_id_extraction() {
        assert_eq!(action_id(&json!({"id": "act-1"})).unwrap(), "act-1");
        assert!(action_id(&json!({})).is_err());
    }
}
