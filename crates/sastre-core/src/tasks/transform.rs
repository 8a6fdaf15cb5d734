// ── Transform task ──
//
// Read a snapshot (workdir or live controller), apply a rename/copy recipe,
// and write the transformed snapshot to a fresh workdir. Cross-references
// follow: in copy mode, references to a copied item are pointed at the new
// copy; in rename mode items keep their ids so references stay intact. The
// output is pushable via restore.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use serde_json::Value;
use tracing::{debug, info};

use uuid::Uuid;

use crate::catalog::{self, CatalogEntry, TAG_DELETE_ORDER};
use crate::error::TaskError;
use crate::item::{update_ids, ConfigItem, IdMap, ItemIndex, ServerInfo};
use crate::store::Workdir;
use crate::tasks::{Backend, TaskContext, TaskOutcome};
use crate::transform::{NameRewriter, TransformRecipe};

pub struct TransformOptions {
    pub recipe: TransformRecipe,
    pub output: PathBuf,
    /// Read from this workdir instead of the target controller.
    pub workdir: Option<PathBuf>,
    pub no_rollover: bool,
}

pub struct TransformTask {
    pub options: TransformOptions,
}

impl TransformTask {
    pub async fn run(
        &self,
        api: Option<&sastre_api::Rest>,
        ctx: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let opts = &self.options;
        let rewriter = NameRewriter::from_recipe(&opts.recipe)?;

        let source_workdir = match &opts.workdir {
            Some(path) => Some(Workdir::open(path)?),
            None => None,
        };
        let backend = match (&source_workdir, api) {
            (Some(workdir), _) => Backend::Workdir(workdir),
            (None, Some(api)) => Backend::Api(api),
            (None, None) => {
                return Err(TaskError::InvalidArg(
                    "transform needs a source workdir or a controller session".into(),
                ))
            }
        };

        info!("starting transform -> {}", opts.output.display());
        let (output, saved) = Workdir::create(&opts.output, false, !opts.no_rollover)?;
        if let Some(saved) = saved {
            info!("previous output was saved as {}", saved.display());
        }

        let server_version = backend.server_version()?;
        if let Some(version) = &server_version {
            output.save_server_info(&ServerInfo {
                server_version: version.clone(),
            })?;
        }

        let mut id_map = IdMap::new();
        // Walk in push order so copied referents get their new ids mapped
        // before the items referencing them are evaluated.
        for tag in TAG_DELETE_ORDER.iter().rev() {
            info!("inspecting {tag} items");
            for entry in catalog::entries_for_tag(*tag, server_version.as_deref()) {
                if ctx.is_cancelled() {
                    ctx.tally.warn("transform cancelled, output is partial");
                    output.close()?;
                    return Ok(ctx.outcome());
                }
                self.transform_kind(&backend, &output, ctx, entry, *tag, &rewriter, &mut id_map)
                    .await?;
            }
        }

        output.close()?;
        Ok(ctx.outcome())
    }

    #[allow(clippy::too_many_arguments)]
    async fn transform_kind(
        &self,
        backend: &Backend<'_>,
        output: &Workdir,
        ctx: &mut TaskContext,
        entry: &'static CatalogEntry,
        tag: catalog::Tag,
        rewriter: &NameRewriter,
        id_map: &mut IdMap,
    ) -> Result<(), TaskError> {
        // An unreadable index is fatal for this kind only; other kinds
        // continue.
        let index = match backend.index(entry).await {
            Ok(Some(index)) => index,
            Ok(None) => {
                debug!(kind = entry.kind, "none found, skipped");
                return Ok(());
            }
            Err(e) if !e.is_fatal() => {
                ctx.tally
                    .error(format!("failed loading {} index: {e}", entry.info));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut name_set: HashSet<String> = index.iter().map(|e| e.name).collect();
        let mut id_hints: HashMap<String, String> =
            index.iter().map(|e| (e.name, e.id)).collect();
        let mut collisions: Vec<String> = Vec::new();
        let mut invalid: Vec<String> = Vec::new();
        // (item, source id for attachment lookup, source name)
        let mut export: Vec<(ConfigItem, String, String)> = Vec::new();

        for summary in index.iter() {
            let body = match backend
                .item(entry, &summary.id, &summary.name, index.need_extended_name)
                .await
            {
                Ok(Some(body)) => body,
                Ok(None) => {
                    ctx.tally
                        .error(format!("failed loading {} {}", entry.info, summary.name));
                    continue;
                }
                Err(e) if !e.is_fatal() => {
                    ctx.tally.error(format!(
                        "failed loading {} {}: {e}",
                        entry.info, summary.name
                    ));
                    continue;
                }
                Err(e) => return Err(e),
            };
            let item = ConfigItem::new(entry, body);

            let Some(new_name) = rewriter.new_name(&summary.name, tag) else {
                export.push((item, summary.id.clone(), summary.name.clone()));
                continue;
            };
            info!("matched {} {}", entry.info, summary.name);

            if !is_name_valid(&new_name) {
                ctx.tally
                    .error(format!("new {} name is not valid: {new_name}", entry.info));
                invalid.push(new_name);
                export.push((item, summary.id.clone(), summary.name.clone()));
                continue;
            }
            if name_set.contains(&new_name) {
                collisions.push(format!("{} -> {new_name}", summary.name));
                export.push((item, summary.id.clone(), summary.name.clone()));
                continue;
            }

            let new_id = if rewriter.replace_source {
                summary.id.clone()
            } else {
                Uuid::new_v4().to_string()
            };
            let new_item = ConfigItem::new(
                entry,
                update_ids(id_map, &evaluate(&item, entry, &new_name, &new_id)),
            );

            if rewriter.replace_source {
                info!("replacing {}: {} -> {new_name}", entry.info, summary.name);
                export.push((new_item, summary.id.clone(), summary.name.clone()));
            } else {
                info!("adding {}: {new_name}", entry.info);
                // References to the original now resolve to the copy.
                id_map.insert(summary.id.clone(), new_id.clone());
                export.push((new_item, summary.id.clone(), summary.name.clone()));
                export.push((item, summary.id.clone(), summary.name.clone()));
            }
            name_set.insert(new_name.clone());
            id_hints.insert(new_name, new_id);
        }

        if !invalid.is_empty() {
            return Err(TaskError::InvalidArg(format!(
                "one or more new {} names are not valid: {}",
                entry.info,
                invalid.join(", ")
            )));
        }
        if !collisions.is_empty() {
            return Err(TaskError::NameCollision {
                info: entry.info.to_owned(),
                names: collisions.join(", "),
            });
        }
        if export.is_empty() {
            debug!(kind = entry.kind, "nothing to export");
            return Ok(());
        }

        let items: Vec<ConfigItem> = export.iter().map(|(item, _, _)| item.clone()).collect();
        let out_index = ItemIndex::create(entry, &items, &id_hints);
        output.write_json(&entry.index_file(), &out_index.to_value())?;
        debug!(kind = entry.kind, "saved index");

        for (item, source_id, source_name) in export {
            let Some(name) = item.name().map(str::to_owned) else {
                continue;
            };
            let id = item
                .id()
                .map(str::to_owned)
                .or_else(|| id_hints.get(&name).cloned())
                .unwrap_or_default();
            // In copy mode, references anywhere in the snapshot follow the
            // copy. The original of a copied item is the one exception: its
            // own id is a map key and must survive as-is.
            let data = if item.id().is_some_and(|item_id| id_map.contains_key(item_id)) {
                item.data.clone()
            } else {
                update_ids(id_map, &item.data)
            };
            output.save_item_json(
                entry,
                &name,
                &id,
                out_index.need_extended_name,
                "",
                &data,
            )?;
            debug!(kind = entry.kind, %name, "saved");

            // Attachments and values ride along untransformed, filed under
            // the (possibly renamed) template.
            if entry.kind == "template_device" {
                if let Some((attached, values)) = backend
                    .attachments(entry, &source_id, &source_name, index.need_extended_name)
                    .await?
                {
                    output.save_item_json(
                        entry,
                        &name,
                        &id,
                        out_index.need_extended_name,
                        "_attached",
                        &attached,
                    )?;
                    output.save_item_json(
                        entry,
                        &name,
                        &id,
                        out_index.need_extended_name,
                        "_values",
                        &values,
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Build the transformed payload: new name, new id (when the body carries
/// one), read-only flags reset so the result is pushable.
fn evaluate(item: &ConfigItem, entry: &CatalogEntry, new_name: &str, new_id: &str) -> Value {
    let mut payload = item.data.clone();
    payload[entry.name_field] = Value::String(new_name.to_owned());
    if payload.get(entry.id_field).is_some() {
        payload[entry.id_field] = Value::String(new_id.to_owned());
    }
    for flag in ["factoryDefault", "readOnly"] {
        if payload.get(flag).and_then(Value::as_bool).unwrap_or(false) {
            debug!(name = new_name, flag, "resetting read-only flag");
            payload[flag] = Value::Bool(false);
        }
    }
    payload
}

/// Controller item-name rule: 1..=128 characters, none of `&<>! "`.
fn is_name_valid(name: &str) -> bool {
    let count = name.chars().count();
    (1..=128).contains(&count)
        && !name
            .chars()
            .any(|c| matches!(c, '&' | '<' | '>' | '!' | ' ' | '"'))
}
