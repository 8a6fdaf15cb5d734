// ── Migrate task ──
//
// Translate an 18.4/19.2/19.3 snapshot into a 20.1-compatible one.
// Feature templates gain migrated cEdge copies (originals are kept);
// device templates that reference migrated sub-templates are rewritten in
// place. Everything else is carried over unchanged. Attachments and
// values are not migrated.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, info};
use uuid::Uuid;

use crate::catalog::{self, CatalogEntry, TAG_DELETE_ORDER};
use crate::error::TaskError;
use crate::item::{update_ids, ConfigItem, IdMap, ItemIndex, ServerInfo};
use crate::migrate::{factory_cedge_aaa, factory_cedge_global, TemplateMigrator};
use crate::store::Workdir;
use crate::tasks::{Backend, TaskContext, TaskOutcome};
use crate::transform::NameTemplate;

pub struct MigrateOptions {
    /// Migrate all eligible feature templates, or only those attached to
    /// device templates.
    pub scope_all: bool,
    pub output: PathBuf,
    /// Name template for migrated items, default `migrated_{name}`.
    pub name_template: String,
    pub from_version: String,
    pub to_version: String,
    /// Read from this workdir instead of the target controller.
    pub workdir: Option<PathBuf>,
    pub no_rollover: bool,
}

pub struct MigrateTask {
    pub options: MigrateOptions,
}

impl MigrateTask {
    pub async fn run(
        &self,
        api: Option<&sastre_api::Rest>,
        ctx: &mut TaskContext,
    ) -> Result<TaskOutcome, TaskError> {
        let opts = &self.options;
        let migrator = TemplateMigrator::new(&opts.from_version, &opts.to_version)?;
        let name_template = NameTemplate::parse(&opts.name_template)?;

        let source_workdir = match &opts.workdir {
            Some(path) => Some(Workdir::open(path)?),
            None => None,
        };
        let backend = match (&source_workdir, api) {
            (Some(workdir), _) => Backend::Workdir(workdir),
            (None, Some(api)) => Backend::Api(api),
            (None, None) => {
                return Err(TaskError::InvalidArg(
                    "migrate needs a source workdir or a controller session".into(),
                ))
            }
        };

        info!(
            "starting migrate {} -> {}: output {}",
            opts.from_version,
            opts.to_version,
            opts.output.display()
        );
        let (output, saved) = Workdir::create(&opts.output, false, !opts.no_rollover)?;
        if let Some(saved) = saved {
            info!("previous migration was saved as {}", saved.display());
        }
        output.save_server_info(&ServerInfo {
            server_version: migrator.to_version().to_owned(),
        })?;

        let server_version = backend.server_version()?;
        let mut id_map = IdMap::new();

        // Push order: feature templates are evaluated before the device
        // templates that reference them.
        for tag in TAG_DELETE_ORDER.iter().rev() {
            info!("inspecting {tag} items");
            for entry in catalog::entries_for_tag(*tag, server_version.as_deref()) {
                if ctx.is_cancelled() {
                    ctx.tally.warn("migrate cancelled, output is partial");
                    output.close()?;
                    return Ok(ctx.outcome());
                }
                self.migrate_kind(
                    &backend,
                    &output,
                    ctx,
                    entry,
                    &migrator,
                    &name_template,
                    &mut id_map,
                )
                .await?;
            }
        }

        output.close()?;
        Ok(ctx.outcome())
    }

    #[allow(clippy::too_many_arguments)]
    async fn migrate_kind(
        &self,
        backend: &Backend<'_>,
        output: &Workdir,
        ctx: &mut TaskContext,
        entry: &'static CatalogEntry,
        migrator: &TemplateMigrator,
        name_template: &NameTemplate,
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
        let mut invalid: Vec<String> = Vec::new();
        let mut export: Vec<ConfigItem> = Vec::new();

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

            match entry.kind {
                "template_feature" if migrator.feature_in_scope(&item, self.options.scope_all) => {
                    debug!(name = %summary.name, "evaluating feature template");
                    let new_name = name_template.apply(&summary.name);
                    if !valid_new_name(&new_name, &name_set) {
                        ctx.tally.error(format!(
                            "new {} name is not valid or collides: {new_name}",
                            entry.info
                        ));
                        invalid.push(new_name);
                        export.push(item);
                        continue;
                    }
                    let new_id = Uuid::new_v4().to_string();
                    let payload = migrator.migrate_feature(&item, &new_name, &new_id);
                    if item.is_equal(&payload) {
                        debug!(name = %summary.name, "no changes, skipping");
                        export.push(item);
                        continue;
                    }
                    let migrated = ConfigItem::new(entry, update_ids(id_map, &payload));
                    id_map.insert(summary.id.clone(), new_id.clone());
                    name_set.insert(new_name.clone());
                    id_hints.insert(new_name, new_id);
                    // Migrated copy is added beside the original.
                    export.push(migrated);
                    export.push(item);
                }
                "template_device" if migrator.device_in_scope(&item) => {
                    debug!(name = %summary.name, "evaluating device template");
                    let new_name = name_template.apply(&summary.name);
                    if !valid_new_name(&new_name, &name_set) {
                        ctx.tally.error(format!(
                            "new {} name is not valid or collides: {new_name}",
                            entry.info
                        ));
                        invalid.push(new_name);
                        export.push(item);
                        continue;
                    }
                    let new_id = Uuid::new_v4().to_string();
                    let payload = migrator.migrate_device(&item, &new_name, &new_id);
                    let migrated = ConfigItem::new(entry, update_ids(id_map, &payload));
                    id_map.insert(summary.id.clone(), new_id.clone());
                    // Migrated device template replaces the original.
                    info!("migrated replaces original: {} -> {new_name}", summary.name);
                    name_set.insert(new_name.clone());
                    id_hints.insert(new_name, new_id);
                    export.push(migrated);
                }
                _ => export.push(item),
            }
        }

        if !invalid.is_empty() {
            return Err(TaskError::InvalidArg(format!(
                "one or more new {} names are not valid: {}",
                entry.info,
                invalid.join(", ")
            )));
        }

        // Device migration recipes reference the factory cEdge templates by
        // their built-in ids; make sure the snapshot carries them.
        if entry.kind == "template_feature" && !export.is_empty() {
            for factory in [factory_cedge_aaa(), factory_cedge_global()] {
                let Some(factory_name) = factory.name().map(str::to_owned) else {
                    continue;
                };
                let Some(factory_id) = factory.id().map(str::to_owned) else {
                    continue;
                };
                if name_set.contains(&factory_name) {
                    if let Some(existing_id) = id_hints.get(&factory_name) {
                        debug!(name = %factory_name, "using existing factory template");
                        id_map.insert(factory_id, existing_id.clone());
                    }
                } else {
                    debug!(name = %factory_name, "added factory template");
                    name_set.insert(factory_name.clone());
                    id_hints.insert(factory_name, factory_id);
                    export.push(factory);
                }
            }
        }

        if export.is_empty() {
            info!("no {} migrated", entry.info);
            return Ok(());
        }

        let out_index = ItemIndex::create(entry, &export, &id_hints);
        output.write_json(&entry.index_file(), &out_index.to_value())?;
        info!("saved {} index", entry.info);

        for item in export {
            let Some(name) = item.name().map(str::to_owned) else {
                continue;
            };
            let id = item
                .id()
                .map(str::to_owned)
                .or_else(|| id_hints.get(&name).cloned())
                .unwrap_or_default();
            output.save_item_json(
                entry,
                &name,
                &id,
                out_index.need_extended_name,
                "",
                &item.data,
            )?;
            info!("saved {} {name}", entry.info);
        }
        Ok(())
    }
}

fn valid_new_name(name: &str, taken: &HashSet<String>) -> bool {
    let count = name.chars().count();
    (1..=128).contains(&count)
        && !name
            .chars()
            .any(|c| matches!(c, '&' | '<' | '>' | '!' | ' ' | '"'))
        && !taken.contains(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_name_validity() {
        let mut taken = HashSet::new();
        taken.insert("migrated_X".to_owned());
        assert!(valid_new_name("migrated_Y", &taken));
        assert!(!valid_new_name("migrated_X", &taken));
        assert!(!valid_new_name("bad name", &taken));
    }
}
