// ── Backup task ──
//
// Snapshot selected item kinds from a controller into a workdir: one index
// plus one body file per item, attachment records and variable values for
// device templates, and (with the `all` tag) WAN edge certificates and
// device running configurations.

use std::collections::HashSet;
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info};

use sastre_api::Rest;

use crate::catalog::{self, Tag, TAG_ALL};
use crate::error::TaskError;
use crate::item::ServerInfo;
use crate::store::{self, Workdir, EDGE_CERTS_FILE};
use crate::tasks::{
    attached_records, compile_filter, fetch_index, fetch_item, fetch_template_values,
    inventory_hostnames, matches_filter, TaskContext, TaskOutcome, DEVICE_CONFIG_PATH,
    DEVICE_CONFIG_RFS_PATH, EDGE_CERTS_PATH, TEMPLATE_ATTACHED_PATH,
};

pub struct BackupOptions {
    pub workdir: PathBuf,
    /// Package the snapshot as a zip archive instead of a directory tree.
    pub archive: bool,
    pub no_rollover: bool,
    /// Item-name filter within the selected tags.
    pub regex: Option<String>,
    pub tags: Vec<String>,
    /// Also save device running configurations (only with the `all` tag).
    pub save_running: bool,
}

pub struct BackupTask {
    pub options: BackupOptions,
}

impl BackupTask {
    pub async fn run(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let opts = &self.options;
        let filter = compile_filter(&opts.regex)?;
        let tags = catalog::expand_tags(&opts.tags)?;
        let include_all = opts.tags.iter().any(|t| t.as_str() == TAG_ALL);

        info!(
            "starting backup: {} -> {}",
            api.base_url(),
            opts.workdir.display()
        );

        let (workdir, saved) =
            Workdir::create(&opts.workdir, opts.archive, !opts.no_rollover)?;
        if let Some(saved) = saved {
            info!(
                "previous backup under {} was saved as {}",
                opts.workdir.display(),
                saved.display()
            );
        }

        workdir.save_server_info(&ServerInfo {
            server_version: api.server_version().to_owned(),
        })?;
        info!("saved server information");

        if include_all {
            self.backup_certificates(api, &workdir, ctx).await;
            if opts.save_running {
                self.backup_device_configs(api, &workdir, ctx).await?;
            }
        }

        for tag in tags {
            if ctx.is_cancelled() {
                ctx.tally.warn("backup cancelled, snapshot is partial");
                break;
            }
            self.backup_tag(api, &workdir, ctx, tag, &filter).await?;
        }

        workdir.close()?;
        Ok(ctx.outcome())
    }

    async fn backup_tag(
        &self,
        api: &Rest,
        workdir: &Workdir,
        ctx: &mut TaskContext,
        tag: Tag,
        filter: &Option<regex::Regex>,
    ) -> Result<(), TaskError> {
        for entry in catalog::entries_for_tag(tag, Some(api.server_version())) {
            let Some(index) = fetch_index(api, entry).await? else {
                debug!(kind = entry.kind, "not served by this controller, skipped");
                continue;
            };

            let mut omitted: HashSet<String> = HashSet::new();
            for summary in index.iter() {
                if ctx.is_cancelled() {
                    return Ok(());
                }
                if !matches_filter(filter, &[summary.name.as_str()]) {
                    continue;
                }

                let Some(body) = fetch_item(api, entry, &summary.id).await? else {
                    ctx.tally
                        .warn(format!("failed backup {} {}", entry.info, summary.name));
                    omitted.insert(summary.id.clone());
                    continue;
                };
                workdir.save_item_json(
                    entry,
                    &summary.name,
                    &summary.id,
                    index.need_extended_name,
                    "",
                    &body,
                )?;
                info!("done {} {}", entry.info, summary.name);

                if entry.kind == "template_device" {
                    self.backup_attachments(
                        api,
                        workdir,
                        ctx,
                        &index,
                        &summary.name,
                        &summary.id,
                    )
                    .await?;
                }
            }

            // The index reflects what the backup actually holds: entries
            // whose body could not be fetched are omitted.
            let index_doc = if omitted.is_empty() {
                index.to_value()
            } else {
                prune_index(index.to_value(), entry.id_field, &omitted)
            };
            workdir.write_json(&entry.index_file(), &index_doc)?;
            info!("saved {} index", entry.info);
        }
        Ok(())
    }

    async fn backup_attachments(
        &self,
        api: &Rest,
        workdir: &Workdir,
        ctx: &mut TaskContext,
        index: &crate::item::ItemIndex,
        name: &str,
        id: &str,
    ) -> Result<(), TaskError> {
        let entry = index.entry;
        let attached = match api
            .get_json(&format!("{TEMPLATE_ATTACHED_PATH}/{id}"))
            .await
        {
            Ok(doc) => doc,
            Err(e) => {
                ctx.tally
                    .warn(format!("failed backup {name} attached devices: {e}"));
                return Ok(());
            }
        };
        let uuids: Vec<String> = attached_records(&attached)
            .iter()
            .filter_map(|r| r.get("uuid").and_then(Value::as_str))
            .map(str::to_owned)
            .collect();
        if uuids.is_empty() {
            debug!(template = name, "no attached devices");
            return Ok(());
        }

        workdir.save_item_json(entry, name, id, index.need_extended_name, "_attached", &attached)?;
        info!("done {} {name} attached devices", entry.info);

        match fetch_template_values(api, id, &uuids).await {
            Ok(values) => {
                workdir.save_item_json(
                    entry,
                    name,
                    id,
                    index.need_extended_name,
                    "_values",
                    &values,
                )?;
                info!("done {} {name} values", entry.info);
            }
            Err(e) => ctx.tally.warn(format!("failed backup {name} values: {e}")),
        }
        Ok(())
    }

    async fn backup_certificates(&self, api: &Rest, workdir: &Workdir, ctx: &mut TaskContext) {
        match api.get_json(EDGE_CERTS_PATH).await {
            Ok(certs) => match workdir.write_json(EDGE_CERTS_FILE, &certs) {
                Ok(()) => info!("saved WAN edge certificates"),
                Err(e) => ctx
                    .tally
                    .error(format!("failed saving WAN edge certificates: {e}")),
            },
            Err(e) => ctx
                .tally
                .error(format!("failed backup WAN edge certificates: {e}")),
        }
    }

    async fn backup_device_configs(
        &self,
        api: &Rest,
        workdir: &Workdir,
        ctx: &mut TaskContext,
    ) -> Result<(), TaskError> {
        for (uuid, hostname) in inventory_hostnames(api).await? {
            if ctx.is_cancelled() {
                return Ok(());
            }
            for (path, suffix) in [(DEVICE_CONFIG_PATH, ""), (DEVICE_CONFIG_RFS_PATH, "_rfs")] {
                match api.get_json(&format!("{path}/{uuid}")).await {
                    Ok(reply) => {
                        let config = reply
                            .get("config")
                            .and_then(Value::as_str)
                            .map(str::to_owned)
                            .unwrap_or_else(|| reply.to_string());
                        let file = store::device_config_file(&format!("{hostname}{suffix}"));
                        workdir.write_text(&file, &config)?;
                        info!("done device configuration {hostname}{suffix}");
                    }
                    Err(e) => ctx.tally.warn(format!(
                        "failed backup device configuration {hostname}{suffix}: {e}"
                    )),
                }
            }
        }
        Ok(())
    }
}

fn prune_index(mut doc: Value, id_field: &str, omitted: &HashSet<String>) -> Value {
    if let Some(records) = doc.get_mut("data").and_then(Value::as_array_mut) {
        records.retain(|r| {
            r.get(id_field)
                .and_then(Value::as_str)
                .map(|id| !omitted.contains(id))
                .unwrap_or(true)
        });
    }
    doc
}
