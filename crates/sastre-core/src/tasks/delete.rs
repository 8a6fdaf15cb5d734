// ── Delete task ──
//
// Remove selected items from a controller, walking kinds in delete order
// (dependents first). With `--detach`, attached templates are detached and
// the active vSmart policy deactivated first, allowing referenced items to
// be removed. In-use items (409) are logged and reported at the end; the
// task never aborts on them.

use tracing::{debug, info};

use sastre_api::Rest;

use crate::actions::ActionEngine;
use crate::catalog::{self, TAG_ALL};
use crate::error::TaskError;
use crate::item::ConfigItem;
use crate::tasks::{
    compile_filter, detach_inputs, fetch_index, fetch_item, matches_filter, TaskContext,
    TaskOutcome,
};

pub struct DeleteOptions {
    pub tag: String,
    /// Item-name filter within the selected tag.
    pub regex: Option<String>,
    pub dry_run: bool,
    /// Detach templates and deactivate the vSmart policy before deleting.
    pub detach: bool,
}

pub struct DeleteTask {
    pub options: DeleteOptions,
}

impl DeleteTask {
    pub async fn run(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let opts = &self.options;
        let filter = compile_filter(&opts.regex)?;
        // A specific tag deletes only that tag; `all` walks the full
        // delete order.
        let tags = if opts.tag == TAG_ALL {
            catalog::ordered_tags(TAG_ALL)?
        } else {
            vec![opts.tag.parse()?]
        };

        info!(
            "starting delete{}: {}",
            if opts.dry_run { " (dry-run)" } else { "" },
            api.base_url()
        );

        if opts.detach && !opts.dry_run {
            if let Err(e) = self.detach_phase(api, ctx).await {
                ctx.tally.error(format!("detach failed: {e}"));
            }
        }

        let mut in_use: Vec<String> = Vec::new();
        for tag in tags {
            if ctx.is_cancelled() {
                ctx.tally.warn("delete cancelled, remaining items untouched");
                break;
            }
            info!("inspecting {tag} items");
            for entry in catalog::entries_for_tag(tag, Some(api.server_version())) {
                let Some(index) = fetch_index(api, entry).await? else {
                    continue;
                };
                for summary in index.iter() {
                    if ctx.is_cancelled() {
                        break;
                    }
                    if !matches_filter(&filter, &[summary.name.as_str()]) {
                        continue;
                    }

                    let Some(body) = fetch_item(api, entry, &summary.id).await? else {
                        ctx.tally.warn(format!(
                            "failed retrieving {} {}",
                            entry.info, summary.name
                        ));
                        continue;
                    };
                    let item = ConfigItem::new(entry, body);
                    if item.is_readonly() || item.is_system() {
                        debug!(
                            kind = entry.kind,
                            name = %summary.name,
                            "read-only or system item, skipping"
                        );
                        continue;
                    }
                    if opts.dry_run {
                        info!("DRY-RUN: delete {} {}", entry.info, summary.name);
                        continue;
                    }

                    match api.delete(&entry.item_delete_path(&summary.id)).await {
                        Ok(()) => info!("done: delete {} {}", entry.info, summary.name),
                        Err(e) if e.is_conflict() => {
                            ctx.tally.warn(format!(
                                "{} {} is in use, not deleted",
                                entry.info, summary.name
                            ));
                            in_use.push(format!("{} {}", entry.info, summary.name));
                        }
                        Err(e) => {
                            let err: TaskError = e.into();
                            if err.is_fatal() {
                                return Err(err);
                            }
                            ctx.tally.error(format!(
                                "failed deleting {} {}: {err}",
                                entry.info, summary.name
                            ));
                        }
                    }
                }
            }
        }

        if !in_use.is_empty() {
            ctx.tally.warn(format!(
                "items still referenced and not deleted: {}",
                in_use.join(", ")
            ));
        }
        Ok(ctx.outcome())
    }

    /// Teardown runs in the reverse of the attach ordering: detach WAN
    /// edge templates, deactivate the vSmart policy, then detach vSmart
    /// templates.
    async fn detach_phase(&self, api: &Rest, ctx: &mut TaskContext) -> Result<(), TaskError> {
        let device_entry = catalog::entry_for_kind("template_device")
            .expect("template_device catalog entry");
        let vsmart_entry =
            catalog::entry_for_kind("policy_vsmart").expect("policy_vsmart catalog entry");
        let engine = ActionEngine::new(api, ctx.cancel.clone());

        let template_index = fetch_index(api, device_entry).await?.ok_or_else(|| {
            TaskError::NotFound("device template index not served by controller".into())
        })?;

        // WAN edge templates first.
        let edge_templates: Vec<(String, String)> = template_index
            .attached_templates(false)
            .into_iter()
            .map(|e| (e.id, e.name))
            .collect();
        let inputs = detach_inputs(api, edge_templates, None, &mut ctx.tally).await?;
        let pending = engine.submit_detach(inputs).await?;
        if pending.is_empty() {
            info!("no WAN edge attached");
        } else if !engine
            .wait_actions(pending, "detaching WAN edge templates", false)
            .await?
        {
            ctx.tally.warn("WAN edge detach completed with failures");
        }

        // Deactivate the vSmart policy before touching vSmart templates.
        match fetch_index(api, vsmart_entry)
            .await?
            .and_then(|index| index.active_policy())
        {
            None => info!("no vSmart policy activated"),
            Some(active) => {
                let pending = engine
                    .submit_deactivate_policy(&active.id, &active.name)
                    .await?;
                if !engine
                    .wait_actions(pending, "deactivating vSmart policy", false)
                    .await?
                {
                    ctx.tally.warn("vSmart policy deactivation failed");
                }
            }
        }

        // vSmart templates last.
        let vsmart_templates: Vec<(String, String)> = template_index
            .attached_templates(true)
            .into_iter()
            .map(|e| (e.id, e.name))
            .collect();
        let inputs = detach_inputs(api, vsmart_templates, None, &mut ctx.tally).await?;
        let pending = engine.submit_detach(inputs).await?;
        if pending.is_empty() {
            info!("no vSmart attached");
        } else if !engine
            .wait_actions(pending, "detaching vSmart template", false)
            .await?
        {
            ctx.tally.warn("vSmart detach completed with failures");
        }
        Ok(())
    }
}
