// ── Certificate task ──
//
// Manage WAN edge certificate validity status: restore statuses saved in a
// backup, or set every matched device to a fixed status. Changes are pushed
// in one batch, then a certificate sync action propagates them to the
// controllers.

use std::collections::HashMap;
use std::path::PathBuf;

use serde_json::{json, Value};
use tracing::{debug, info};

use sastre_api::Rest;

use crate::actions::ActionEngine;
use crate::error::TaskError;
use crate::store::{Workdir, EDGE_CERTS_FILE};
use crate::tasks::{
    compile_filter, matches_filter, TaskContext, TaskOutcome, EDGE_CERTS_PATH,
    EDGE_CERTS_SAVE_PATH,
};

/// Where the desired validity status comes from.
pub enum StatusSource {
    /// Statuses recorded in a backup workdir.
    Workdir(PathBuf),
    /// One fixed status for every matched device: `invalid`, `staging` or
    /// `valid`.
    Fixed(String),
}

pub struct CertificateOptions {
    pub source: StatusSource,
    /// Device filter: matches hostname or chassis/uuid. `^-$` matches
    /// devices without a hostname.
    pub regex: Option<String>,
    pub dry_run: bool,
}

pub struct CertificateTask {
    pub options: CertificateOptions,
}

struct EdgeCert {
    uuid: String,
    status: String,
    hostname: Option<String>,
    chassis: String,
    serial: String,
}

impl CertificateTask {
    pub async fn run(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let opts = &self.options;
        let filter = compile_filter(&opts.regex)?;
        let log_prefix = if opts.dry_run { "DRY-RUN: " } else { "" };

        info!("loading WAN edge certificate list from target controller");
        let target_doc = api.get_json(EDGE_CERTS_PATH).await?;
        let target_certs = parse_certs(&target_doc);

        let desired: HashMap<String, String> = match &opts.source {
            StatusSource::Fixed(status) => target_certs
                .iter()
                .map(|c| (c.uuid.clone(), status.clone()))
                .collect(),
            StatusSource::Workdir(path) => {
                let workdir = Workdir::open(path)?;
                let saved = workdir.read_json(EDGE_CERTS_FILE)?.ok_or_else(|| {
                    TaskError::InvalidBackup(
                        "WAN edge certificates were not found in the backup".into(),
                    )
                })?;
                parse_certs(&saved)
                    .into_iter()
                    .map(|c| (c.uuid, c.status))
                    .collect()
            }
        };

        info!("{log_prefix}identifying status changes to be pushed");
        let mut update_records: Vec<Value> = Vec::new();
        for cert in &target_certs {
            let device_label = cert.hostname.as_deref().unwrap_or("-");
            if !matches_filter(&filter, &[device_label, cert.uuid.as_str()]) {
                continue;
            }
            let Some(new_status) = desired.get(&cert.uuid) else {
                continue;
            };
            if *new_status == cert.status {
                debug!(device = device_label, "no certificate status change");
                continue;
            }
            info!(
                "{log_prefix}will update {device_label} status: {} -> {new_status}",
                cert.status
            );
            update_records.push(json!({
                "chasisNumber": cert.chassis,
                "serialNumber": cert.serial,
                "validity": new_status,
            }));
        }

        if update_records.is_empty() {
            info!("{log_prefix}no certificate status updates to push");
            return Ok(ctx.outcome());
        }
        if opts.dry_run {
            return Ok(ctx.outcome());
        }

        info!("pushing certificate status changes to target controller");
        api.post_json(EDGE_CERTS_SAVE_PATH, &Value::Array(update_records))
            .await?;

        let engine = ActionEngine::new(api, ctx.cancel.clone());
        let pending = engine.submit_certificate_sync().await?;
        engine
            .wait_actions(pending, "certificate sync with controllers", true)
            .await?;

        Ok(ctx.outcome())
    }
}

/// Parse the extended WAN edge certificate records the controller lists.
/// The `chasisNumber` spelling is the controller's own.
fn parse_certs(doc: &Value) -> Vec<EdgeCert> {
    doc.get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|r| {
            Some(EdgeCert {
                uuid: r.get("uuid")?.as_str()?.to_owned(),
                status: r
                    .get("validity")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                hostname: r
                    .get("host-name")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
                chassis: r
                    .get("chasisNumber")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
                serial: r
                    .get("serialNumber")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned(),
            })
        })
        .collect()
}
