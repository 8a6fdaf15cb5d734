// ── Restore task ──
//
// Push a workdir snapshot to a target controller in dependency order:
// referenced kinds first, referenced items within a kind first. Controller
// ids are not portable, so identity across source and target is
// `(kind, name)`; embedded source ids are rewritten through an id map
// populated as items land on the target.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info};

use sastre_api::Rest;

use crate::actions::ActionEngine;
use crate::catalog::{
    self, is_version_newer, CatalogEntry, Tag, TAG_ALL, TAG_DELETE_ORDER,
};
use crate::error::TaskError;
use crate::graph;
use crate::item::{filename_safe, ConfigItem, IdMap, UpdateEval};
use crate::store::Workdir;
use crate::tasks::{
    attach_inputs_from_workdir, compile_filter, edge_device_set, fetch_index, fetch_item,
    load_index, load_items, matches_filter, reattach_inputs_from_target, vbond_configured,
    vsmart_device_set, AttachCandidate, TaskContext, TaskOutcome,
};

const DEVICE_TEMPLATE_CLI_POST_PATH: &str = "template/device/cli";

pub struct RestoreOptions {
    pub workdir: PathBuf,
    pub tag: String,
    /// Item-name filter within the selected tag.
    pub regex: Option<String>,
    /// List planned writes without performing any.
    pub dry_run: bool,
    /// Update target items whose body differs; default is skip-existing.
    pub update: bool,
    /// Attach device templates and activate the vSmart policy afterwards.
    pub attach: bool,
    /// Convert matched factory-default items even when nothing depends on
    /// them. Depended-upon factory defaults are always converted.
    pub convert_factory_defaults: bool,
}

struct PlanItem {
    item_id: String,
    item: ConfigItem,
    target_id: Option<String>,
    is_dependency: bool,
}

struct KindPlan {
    entry: &'static CatalogEntry,
    items: Vec<PlanItem>,
}

pub struct RestoreTask {
    pub options: RestoreOptions,
}

impl RestoreTask {
    pub async fn run(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let opts = &self.options;
        let filter = compile_filter(&opts.regex)?;
        let tags = catalog::ordered_tags(&opts.tag)?;
        let log_prefix = if opts.dry_run { "DRY-RUN: " } else { "" };

        info!(
            "starting restore{}: {} -> {}",
            if opts.dry_run { " (dry-run)" } else { "" },
            opts.workdir.display(),
            api.base_url()
        );

        let workdir = Workdir::open(&opts.workdir)?;
        if let Some(local_info) = workdir.load_server_info()? {
            if is_version_newer(api.server_version(), &local_info.server_version) {
                ctx.tally.warn(format!(
                    "target controller release ({}) is older than the release used in the \
                     backup ({}); items may fail to restore",
                    api.server_version(),
                    local_info.server_version
                ));
            }
        }

        let vbond = vbond_configured(api).await;
        if vbond.is_none() {
            ctx.tally.warn(
                "failed retrieving vBond settings; restoring device templates will fail if \
                 vBond is not configured",
            );
        }

        info!("loading existing items from target controller");
        let target_maps = self.load_target_maps(api).await?;

        info!("identifying items to be pushed");
        let mut id_map = IdMap::new();
        let mut dependency_set: BTreeSet<String> = BTreeSet::new();
        let mut restore_list: Vec<KindPlan> = Vec::new();
        let mut snapshot_items: Vec<ConfigItem> = Vec::new();

        for tag in &tags {
            if *tag == Tag::TemplateDevice && vbond == Some(false) {
                ctx.tally.warn(
                    "will skip device templates because vBond is not configured \
                     (Administration > Settings > vBond)",
                );
                continue;
            }
            info!("inspecting {tag} items");
            self.plan_tag(
                api,
                &workdir,
                ctx,
                *tag,
                &filter,
                &target_maps,
                &mut id_map,
                &mut dependency_set,
                &mut restore_list,
                &mut snapshot_items,
            )?;
        }

        // References whose target is missing from the snapshot indicate
        // source-controller inconsistency; they are reported and the push
        // proceeds.
        graph::ReferenceGraph::new(&snapshot_items).report_dangling();
        let snapshot_ids: HashSet<String> = snapshot_items
            .iter()
            .filter_map(|item| item.id().map(str::to_owned))
            .collect();

        if restore_list.iter().all(|plan| plan.items.is_empty()) {
            info!("{log_prefix}no items to push");
        } else {
            info!("{log_prefix}pushing items to target controller");
            // The plan was collected in delete order; push in reverse so
            // referenced items land first.
            for plan in restore_list.into_iter().rev() {
                if ctx.is_cancelled() {
                    ctx.tally
                        .warn("restore cancelled; target left mid-plan, items already \
                               written stay written");
                    break;
                }
                self.push_kind(api, ctx, plan, &mut id_map, &snapshot_ids)
                    .await?;
            }
        }

        if opts.attach && !opts.dry_run && !ctx.is_cancelled() {
            self.attach_phase(api, ctx, &workdir).await;
        }

        Ok(ctx.outcome())
    }

    // ── Planning ─────────────────────────────────────────────────────

    async fn load_target_maps(
        &self,
        api: &Rest,
    ) -> Result<HashMap<&'static str, HashMap<String, String>>, TaskError> {
        let mut maps = HashMap::new();
        for tag in TAG_DELETE_ORDER {
            for entry in catalog::entries_for_tag(*tag, Some(api.server_version())) {
                if let Some(index) = fetch_index(api, entry).await? {
                    maps.insert(entry.kind, index.by_name());
                }
            }
        }
        Ok(maps)
    }

    #[allow(clippy::too_many_arguments)]
    fn plan_tag(
        &self,
        api: &Rest,
        workdir: &Workdir,
        ctx: &mut TaskContext,
        tag: Tag,
        filter: &Option<regex::Regex>,
        target_maps: &HashMap<&'static str, HashMap<String, String>>,
        id_map: &mut IdMap,
        dependency_set: &mut BTreeSet<String>,
        restore_list: &mut Vec<KindPlan>,
        snapshot_items: &mut Vec<ConfigItem>,
    ) -> Result<(), TaskError> {
        let opts = &self.options;
        let tag_requested = opts.tag == TAG_ALL || opts.tag == tag.as_str();

        for entry in catalog::entries_for_tag(tag, None) {
            // An unreadable index or body is fatal for this kind only;
            // other kinds continue.
            let index = match load_index(workdir, entry) {
                Ok(Some(index)) => index,
                Ok(None) => continue,
                Err(e) if !e.is_fatal() => {
                    ctx.tally
                        .error(format!("failed loading {} index: {e}", entry.info));
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !entry.is_supported(api.server_version()) {
                // The backup has this kind; the target cannot take it.
                ctx.tally.warn(format!(
                    "will skip {}, not supported by target controller",
                    entry.info
                ));
                continue;
            }
            let target_map = target_maps.get(entry.kind).cloned().unwrap_or_default();

            let mut plan_items = Vec::new();
            let items = match load_items(workdir, &index) {
                Ok(items) => items,
                Err(e) if !e.is_fatal() => {
                    ctx.tally
                        .error(format!("failed loading {} items: {e}", entry.info));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let ids_by_position: HashMap<String, String> =
                index.iter().map(|e| (e.name, e.id)).collect();

            for mut item in items {
                snapshot_items.push(item.clone());
                let Some(name) = item.name().map(str::to_owned) else {
                    debug!(kind = entry.kind, "unnamed item in backup, skipping");
                    continue;
                };
                let Some(item_id) = item
                    .id()
                    .map(str::to_owned)
                    .or_else(|| ids_by_position.get(&name).cloned())
                else {
                    debug!(kind = entry.kind, %name, "item without id in backup, skipping");
                    continue;
                };

                let target_id = target_map.get(&name).cloned();
                if let Some(ref tid) = target_id {
                    // Same logical item already on target: record the id
                    // mapping so references resolve, then skip or update.
                    id_map.insert(item_id.clone(), tid.clone());
                    if !opts.update {
                        debug!(kind = entry.kind, %name, "already on target, skipping");
                        continue;
                    }
                }

                let item_matches = tag_requested && matches_filter(filter, &[name.as_str()]);
                let is_dependency = dependency_set.contains(&item_id);

                if item.is_readonly() {
                    let convertible = item.is_factory_default()
                        && target_id.is_none()
                        && (is_dependency || (opts.convert_factory_defaults && item_matches));
                    if convertible {
                        ctx.tally.warn(format!(
                            "converting factory-default {} {name} to non-default for push",
                            entry.info
                        ));
                        item.clear_factory_default();
                    } else {
                        debug!(kind = entry.kind, %name, "read-only item, skipping");
                        continue;
                    }
                }

                if item_matches || is_dependency {
                    dependency_set.extend(item.id_references());
                    plan_items.push(PlanItem {
                        item_id,
                        item,
                        target_id,
                        is_dependency: is_dependency && !item_matches,
                    });
                }
            }

            if !plan_items.is_empty() {
                restore_list.push(KindPlan {
                    entry,
                    items: plan_items,
                });
            }
        }
        Ok(())
    }

    // ── Execution ────────────────────────────────────────────────────

    async fn push_kind(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
        plan: KindPlan,
        id_map: &mut IdMap,
        snapshot_ids: &HashSet<String>,
    ) -> Result<(), TaskError> {
        let opts = &self.options;
        let log_prefix = if opts.dry_run { "DRY-RUN: " } else { "" };
        let entry = plan.entry;
        let ordered = order_plan_items(plan.items);
        let mut pushed: Vec<(String, String)> = Vec::new(); // (name, old id)

        for plan_item in ordered {
            if ctx.is_cancelled() {
                break;
            }
            let name = plan_item.item.name().unwrap_or_default().to_owned();
            let reason = if plan_item.is_dependency {
                " (dependency)"
            } else {
                ""
            };

            match plan_item.target_id {
                None => {
                    if opts.dry_run {
                        info!("{log_prefix}create {} {name}{reason}", entry.info);
                        continue;
                    }
                    // Snapshot-internal references that never received a
                    // target-side id (their parent failed or was skipped)
                    // stay unrewritten; the push below will most likely
                    // fail on them.
                    for reference in plan_item.item.id_references() {
                        if snapshot_ids.contains(&reference) && !id_map.contains_key(&reference) {
                            ctx.tally.warn(TaskError::DependencyUnresolved(format!(
                                "{} {name} references {reference}, which is not on the target",
                                entry.info
                            )));
                        }
                    }
                    let body = plan_item.item.post_body(id_map);
                    match api.post_json(post_path(entry, &plan_item.item), &body).await {
                        Ok(_) => {
                            info!("done: create {} {name}{reason}", entry.info);
                            pushed.push((name, plan_item.item_id));
                        }
                        Err(e) => {
                            let err: TaskError = e.into();
                            if err.is_fatal() {
                                return Err(err);
                            }
                            ctx.tally.error(format!(
                                "failed create {} {name}{reason}: {err} [{}]",
                                entry.info,
                                body_digest(&body)
                            ));
                        }
                    }
                }
                Some(ref target_id) => {
                    self.update_item(api, ctx, entry, &plan_item, target_id, id_map, &name)
                        .await?;
                }
            }
        }

        // Read the controller-assigned ids back and fill the placeholders
        // so dependent kinds rewrite correctly.
        if !pushed.is_empty() {
            match fetch_index(api, entry).await? {
                Some(new_index) => {
                    let new_map = new_index.by_name();
                    for (name, old_id) in pushed {
                        match new_map.get(&name) {
                            Some(new_id) => {
                                id_map.insert(old_id, new_id.clone());
                            }
                            None => ctx.tally.error(format!(
                                "{} {name} not listed by target after create",
                                entry.info
                            )),
                        }
                    }
                }
                None => ctx.tally.error(format!(
                    "failed retrieving {} index after create",
                    entry.info
                )),
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn update_item(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
        entry: &'static CatalogEntry,
        plan_item: &PlanItem,
        target_id: &str,
        id_map: &IdMap,
        name: &str,
    ) -> Result<(), TaskError> {
        let opts = &self.options;
        let log_prefix = if opts.dry_run { "DRY-RUN: " } else { "" };

        let update_body = plan_item.item.put_body(id_map);
        let Some(target_body) = fetch_item(api, entry, target_id).await? else {
            ctx.tally.error(format!(
                "failed update {} {name}: not retrievable from target",
                entry.info
            ));
            return Ok(());
        };
        let candidate = ConfigItem::new(entry, update_body.clone());
        if candidate.is_equal(&target_body) {
            debug!("{log_prefix}update skipped (no diffs) {} {name}", entry.info);
            return Ok(());
        }
        if opts.dry_run {
            info!("{log_prefix}update {} {name}", entry.info);
            return Ok(());
        }

        let reply = match api
            .put_json(&entry.item_put_path(target_id), &update_body)
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                let err: TaskError = e.into();
                if err.is_fatal() {
                    return Err(err);
                }
                ctx.tally.error(format!(
                    "failed update {} {name}: {err} [{}]",
                    entry.info,
                    body_digest(&update_body)
                ));
                return Ok(());
            }
        };
        info!("done: update {} {name}", entry.info);

        // The PUT response tells us whether attachments or the active
        // policy were invalidated by this write.
        let eval = UpdateEval::new(reply);
        if eval.need_reattach() {
            if let Err(e) = self
                .reattach_after_update(api, ctx, &eval, name, target_id)
                .await
            {
                ctx.tally
                    .error(format!("failed update {} {name}: {e}", entry.info));
            }
        } else if eval.need_reactivate() {
            if let Err(e) = self.reactivate_after_update(api, ctx).await {
                ctx.tally
                    .error(format!("failed update {} {name}: {e}", entry.info));
            }
        }
        Ok(())
    }

    async fn reattach_after_update(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
        eval: &UpdateEval,
        name: &str,
        target_id: &str,
    ) -> Result<(), TaskError> {
        let templates = if eval.is_master() {
            info!("updating {name} requires re-attach");
            vec![(name.to_owned(), target_id.to_owned())]
        } else {
            info!("updating {name} requires re-attach of affected templates");
            let device_entry = catalog::entry_for_kind("template_device")
                .expect("template_device catalog entry");
            let target_templates: HashMap<String, String> = fetch_index(api, device_entry)
                .await?
                .map(|index| index.iter().map(|e| (e.id, e.name)).collect())
                .unwrap_or_default();
            eval.templates_affected()
                .into_iter()
                .filter_map(|id| target_templates.get(&id).map(|n| (n.clone(), id)))
                .collect()
        };

        // Re-attach with the target-side values: the controller holds the
        // authoritative, possibly hand-edited variable bindings.
        let inputs = reattach_inputs_from_target(api, templates).await?;
        let engine = ActionEngine::new(api, ctx.cancel.clone());
        let pending = engine.submit_attach(inputs, true).await?;
        engine
            .wait_actions(pending, "reattaching templates", true)
            .await?;
        Ok(())
    }

    async fn reactivate_after_update(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
    ) -> Result<(), TaskError> {
        let vsmart_entry =
            catalog::entry_for_kind("policy_vsmart").expect("policy_vsmart catalog entry");
        let Some(active) = fetch_index(api, vsmart_entry)
            .await?
            .and_then(|index| index.active_policy())
        else {
            debug!("no active vSmart policy, skipping re-activate");
            return Ok(());
        };
        info!("update requires vSmart policy re-activate");
        let engine = ActionEngine::new(api, ctx.cancel.clone());
        let pending = engine
            .submit_activate_policy(&active.id, &active.name, true)
            .await?;
        engine
            .wait_actions(pending, "reactivating vSmart policy", true)
            .await?;
        Ok(())
    }

    // ── Attach phase ─────────────────────────────────────────────────

    async fn attach_phase(&self, api: &Rest, ctx: &mut TaskContext, workdir: &Workdir) {
        if let Err(e) = self.attach_phase_inner(api, ctx, workdir).await {
            ctx.tally.error(format!("attach failed: {e}"));
        }
    }

    async fn attach_phase_inner(
        &self,
        api: &Rest,
        ctx: &mut TaskContext,
        workdir: &Workdir,
    ) -> Result<(), TaskError> {
        let device_entry = catalog::entry_for_kind("template_device")
            .expect("template_device catalog entry");
        let vsmart_entry =
            catalog::entry_for_kind("policy_vsmart").expect("policy_vsmart catalog entry");

        let target_templates = fetch_index(api, device_entry)
            .await?
            .map(|i| i.by_name())
            .unwrap_or_default();
        let saved_index = load_index(workdir, device_entry)?.ok_or_else(|| {
            TaskError::InvalidBackup("device template index not found in backup".into())
        })?;
        let engine = ActionEngine::new(api, ctx.cancel.clone());

        // Attach WAN edge templates first.
        let edge_candidates: Vec<AttachCandidate> = saved_index
            .attached_templates(false)
            .into_iter()
            .map(|e| AttachCandidate {
                target_id: target_templates.get(&e.name).cloned(),
                name: e.name,
                saved_id: e.id,
            })
            .collect();
        let edge_set = edge_device_set(api).await?;
        let inputs = attach_inputs_from_workdir(
            api,
            workdir,
            saved_index.need_extended_name,
            edge_candidates,
            Some(&edge_set),
            &mut ctx.tally,
        )
        .await?;
        let pending = engine.submit_attach(inputs, false).await?;
        if pending.is_empty() {
            info!("no WAN edge attachments needed");
        } else if !engine
            .wait_actions(pending, "attaching WAN edge templates", false)
            .await?
        {
            ctx.tally.warn("WAN edge attach completed with failures");
        }

        // Then vSmart templates.
        let vsmart_candidates: Vec<AttachCandidate> = saved_index
            .attached_templates(true)
            .into_iter()
            .map(|e| AttachCandidate {
                target_id: target_templates.get(&e.name).cloned(),
                name: e.name,
                saved_id: e.id,
            })
            .collect();
        let vsmart_set = vsmart_device_set(api).await?;
        let inputs = attach_inputs_from_workdir(
            api,
            workdir,
            saved_index.need_extended_name,
            vsmart_candidates,
            Some(&vsmart_set),
            &mut ctx.tally,
        )
        .await?;
        let pending = engine.submit_attach(inputs, false).await?;
        if pending.is_empty() {
            info!("no vSmart attachments needed");
        } else if !engine
            .wait_actions(pending, "attaching vSmart template", false)
            .await?
        {
            ctx.tally.warn("vSmart attach completed with failures");
        }

        // Policy activation strictly after all attaches completed.
        let saved_policies = load_index(workdir, vsmart_entry)?;
        let saved_active = saved_policies.and_then(|index| index.active_policy());
        match saved_active {
            None => info!("no vSmart policy to activate"),
            Some(saved) => {
                let target_policies = fetch_index(api, vsmart_entry)
                    .await?
                    .map(|i| i.by_name())
                    .unwrap_or_default();
                match target_policies.get(&saved.name) {
                    None => ctx.tally.warn(format!(
                        "saved active policy {} not present on target",
                        saved.name
                    )),
                    Some(policy_id) => {
                        let pending = engine
                            .submit_activate_policy(policy_id, &saved.name, false)
                            .await?;
                        if pending.is_empty() {
                            info!("vSmarts not ready, policy activation skipped");
                        } else if !engine
                            .wait_actions(pending, "activating vSmart policy", false)
                            .await?
                        {
                            ctx.tally.warn("vSmart policy activation failed");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// POST path for an item; CLI device templates use a dedicated endpoint.
fn post_path(entry: &'static CatalogEntry, item: &ConfigItem) -> &'static str {
    if entry.kind == "template_device" && item.is_type_cli() {
        DEVICE_TEMPLATE_CLI_POST_PATH
    } else {
        entry.post_path
    }
}

fn body_digest(body: &Value) -> String {
    let mut text = body.to_string();
    if text.len() > 120 {
        let mut end = 120;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
        text.push_str("...");
    }
    text
}

/// Order plan items so that within the kind every referenced item comes
/// before its referrers, ties broken by filename-safe name.
fn order_plan_items(items: Vec<PlanItem>) -> Vec<PlanItem> {
    let ids: HashSet<&str> = items.iter().map(|p| p.item_id.as_str()).collect();
    let refs: Vec<Vec<usize>> = items
        .iter()
        .map(|p| {
            p.item
                .id_references()
                .into_iter()
                .filter(|r| ids.contains(r.as_str()))
                .filter_map(|r| items.iter().position(|other| other.item_id == r))
                .collect()
        })
        .collect();

    let members: Vec<usize> = (0..items.len()).collect();
    let order = graph::topo_order(
        &members,
        |idx| refs[idx].clone(),
        |idx| {
            (
                filename_safe(items[idx].item.name().unwrap_or_default()),
                items[idx].item_id.clone(),
            )
        },
        |idx| {
            tracing::error!(
                name = items[idx].item.name().unwrap_or("<unnamed>"),
                "reference cycle within kind, breaking at lowest name"
            );
        },
    );

    let mut slots: Vec<Option<PlanItem>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .filter_map(|idx| slots[idx].take())
        .collect()
}
