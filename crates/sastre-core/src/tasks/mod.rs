// ── Task orchestration ──
//
// Each user-facing task is a struct with an options value and an async
// `run` entry point. Shared state (cancellation, warning/error tally) is
// threaded through a `TaskContext` -- no globals. Item-local failures are
// logged and tallied; only fatal errors propagate out of `run`.

pub mod attach;
pub mod backup;
pub mod certificate;
pub mod delete;
pub mod migrate;
pub mod restore;
pub mod transform;

use std::collections::HashSet;

use regex::Regex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use sastre_api::Rest;

use crate::actions::{AttachInput, DetachInput};
use crate::catalog::CatalogEntry;
use crate::error::TaskError;
use crate::item::{ConfigItem, ItemIndex};
use crate::store::Workdir;

// Auxiliary endpoints shared by several tasks.
pub(crate) const SETTINGS_VBOND_PATH: &str = "settings/configuration/device";
pub(crate) const EDGE_INVENTORY_PATH: &str = "system/device/vedges";
pub(crate) const CONTROL_INVENTORY_PATH: &str = "system/device/controllers";
pub(crate) const TEMPLATE_ATTACHED_PATH: &str = "template/device/config/attached";
pub(crate) const TEMPLATE_VALUES_PATH: &str = "template/device/config/input";
pub(crate) const EDGE_CERTS_PATH: &str = "certificate/vedge/list";
pub(crate) const EDGE_CERTS_SAVE_PATH: &str = "certificate/save/vedge/list";
pub(crate) const DEVICE_CONFIG_PATH: &str = "template/config/attached";
pub(crate) const DEVICE_CONFIG_RFS_PATH: &str = "template/config/rfs";

/// Warning/error counters determining the task outcome message.
#[derive(Debug, Default, Clone, Copy)]
pub struct Tally {
    pub warnings: u32,
    pub errors: u32,
}

impl Tally {
    pub fn warn(&mut self, message: impl std::fmt::Display) {
        warn!("{message}");
        self.warnings += 1;
    }

    pub fn error(&mut self, message: impl std::fmt::Display) {
        error!("{message}");
        self.errors += 1;
    }

    pub fn is_clean(&self) -> bool {
        self.warnings == 0 && self.errors == 0
    }
}

/// Final task outcome handed back to the caller.
#[derive(Debug, Clone, Copy)]
pub struct TaskOutcome {
    pub warnings: u32,
    pub errors: u32,
}

impl TaskOutcome {
    pub fn success(&self) -> bool {
        self.errors == 0
    }

    /// Summary line in the style `completed with 2 errors, 1 warning`.
    pub fn summary(&self, task: &str) -> String {
        if self.warnings == 0 && self.errors == 0 {
            return format!("{task} completed successfully");
        }
        let mut parts = Vec::new();
        if self.errors > 0 {
            parts.push(format!("{} errors", self.errors));
        }
        if self.warnings > 0 {
            parts.push(format!("{} warnings", self.warnings));
        }
        format!("{task} completed with {}", parts.join(", "))
    }
}

/// Mutable state shared by one task run.
pub struct TaskContext {
    pub cancel: CancellationToken,
    pub tally: Tally,
}

impl TaskContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            tally: Tally::default(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn outcome(&self) -> TaskOutcome {
        TaskOutcome {
            warnings: self.tally.warnings,
            errors: self.tally.errors,
        }
    }
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

/// Compile an optional user regex, surfacing errors as `InvalidArg`.
pub(crate) fn compile_filter(regex: &Option<String>) -> Result<Option<Regex>, TaskError> {
    match regex {
        None => Ok(None),
        Some(pattern) => Regex::new(pattern).map(Some).map_err(|_| {
            TaskError::InvalidArg(format!("\"{pattern}\" is not a valid regular expression"))
        }),
    }
}

pub(crate) fn matches_filter(filter: &Option<Regex>, fields: &[&str]) -> bool {
    match filter {
        None => true,
        Some(regex) => fields.iter().any(|f| regex.is_match(f)),
    }
}

// ── Controller-side loaders ─────────────────────────────────────────

/// Fetch a kind index from the controller. `None` when the controller does
/// not serve this kind.
pub(crate) async fn fetch_index(
    api: &Rest,
    entry: &'static CatalogEntry,
) -> Result<Option<ItemIndex>, TaskError> {
    match api.get_json(entry.index_path).await {
        Ok(raw) => Ok(Some(ItemIndex::new(entry, raw))),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Fetch one item body. `None` on 404.
pub(crate) async fn fetch_item(
    api: &Rest,
    entry: &'static CatalogEntry,
    item_id: &str,
) -> Result<Option<Value>, TaskError> {
    match api.get_json(&entry.item_get_path(item_id)).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

// ── Workdir-side loaders ────────────────────────────────────────────

pub(crate) fn load_index(
    workdir: &Workdir,
    entry: &'static CatalogEntry,
) -> Result<Option<ItemIndex>, TaskError> {
    Ok(workdir
        .read_json(&entry.index_file())?
        .map(|raw| ItemIndex::new(entry, raw)))
}

/// Load every item of a kind from the workdir, following its index.
pub(crate) fn load_items(
    workdir: &Workdir,
    index: &ItemIndex,
) -> Result<Vec<ConfigItem>, TaskError> {
    let mut items = Vec::with_capacity(index.len());
    for entry in index.iter() {
        match workdir.load_item_json(
            index.entry,
            &entry.name,
            &entry.id,
            index.need_extended_name,
            "",
        )? {
            Some(body) => items.push(ConfigItem::new(index.entry, body)),
            None => debug!(
                kind = index.entry.kind,
                name = %entry.name,
                "no body in backup, skipping"
            ),
        }
    }
    Ok(items)
}

/// Source of a snapshot: a live controller or a workdir on disk.
///
/// Transform and migrate read from either; the write side is always a
/// fresh workdir.
pub enum Backend<'a> {
    Api(&'a Rest),
    Workdir(&'a Workdir),
}

impl Backend<'_> {
    /// Source controller version, when known. Workdirs from older releases
    /// may not record one.
    pub fn server_version(&self) -> Result<Option<String>, TaskError> {
        match self {
            Backend::Api(api) => Ok(Some(api.server_version().to_owned())),
            Backend::Workdir(workdir) => {
                Ok(workdir.load_server_info()?.map(|info| info.server_version))
            }
        }
    }

    pub async fn index(
        &self,
        entry: &'static CatalogEntry,
    ) -> Result<Option<ItemIndex>, TaskError> {
        match self {
            Backend::Api(api) => fetch_index(api, entry).await,
            Backend::Workdir(workdir) => load_index(workdir, entry),
        }
    }

    pub async fn item(
        &self,
        entry: &'static CatalogEntry,
        item_id: &str,
        name: &str,
        ext_name: bool,
    ) -> Result<Option<Value>, TaskError> {
        match self {
            Backend::Api(api) => fetch_item(api, entry, item_id).await,
            Backend::Workdir(workdir) => workdir.load_item_json(entry, name, item_id, ext_name, ""),
        }
    }

    /// Device-template attachment records and variable values, when any
    /// devices are attached.
    pub async fn attachments(
        &self,
        entry: &'static CatalogEntry,
        item_id: &str,
        name: &str,
        ext_name: bool,
    ) -> Result<Option<(Value, Value)>, TaskError> {
        match self {
            Backend::Api(api) => {
                let attached = api
                    .get_json(&format!("{TEMPLATE_ATTACHED_PATH}/{item_id}"))
                    .await?;
                let uuids: Vec<String> = attached_records(&attached)
                    .iter()
                    .filter_map(|r| r.get("uuid").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect();
                if uuids.is_empty() {
                    return Ok(None);
                }
                let values = fetch_template_values(api, item_id, &uuids).await?;
                Ok(Some((attached, values)))
            }
            Backend::Workdir(workdir) => {
                let attached =
                    workdir.load_item_json(entry, name, item_id, ext_name, "_attached")?;
                let values = workdir.load_item_json(entry, name, item_id, ext_name, "_values")?;
                Ok(attached.zip(values))
            }
        }
    }
}

// ── Controller settings and inventories ─────────────────────────────

/// Whether the target has a vBond configured. `None` when the settings
/// endpoint could not be read.
pub(crate) async fn vbond_configured(api: &Rest) -> Option<bool> {
    let reply = api.get_json(SETTINGS_VBOND_PATH).await.ok()?;
    let domain_ip = reply
        .get("data")?
        .as_array()?
        .first()?
        .get("domainIp")?
        .as_str()?;
    Some(!domain_ip.is_empty() && domain_ip != "Not Configured")
}

/// WAN edge device uuids known to the target.
pub(crate) async fn edge_device_set(api: &Rest) -> Result<HashSet<String>, TaskError> {
    inventory_uuids(api, EDGE_INVENTORY_PATH, None).await
}

/// vSmart controller uuids known to the target.
pub(crate) async fn vsmart_device_set(api: &Rest) -> Result<HashSet<String>, TaskError> {
    inventory_uuids(api, CONTROL_INVENTORY_PATH, Some("vsmart")).await
}

async fn inventory_uuids(
    api: &Rest,
    path: &str,
    device_type: Option<&str>,
) -> Result<HashSet<String>, TaskError> {
    let reply = api.get_json(path).await?;
    Ok(reply
        .get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|r| match device_type {
            Some(wanted) => r.get("deviceType").and_then(Value::as_str) == Some(wanted),
            None => true,
        })
        .filter_map(|r| r.get("uuid").and_then(Value::as_str))
        .map(str::to_owned)
        .collect())
}

/// `(uuid, hostname)` pairs from both inventories, for device-config backup.
pub(crate) async fn inventory_hostnames(api: &Rest) -> Result<Vec<(String, String)>, TaskError> {
    let mut out = Vec::new();
    for path in [EDGE_INVENTORY_PATH, CONTROL_INVENTORY_PATH] {
        let reply = api.get_json(path).await?;
        for record in reply
            .get("data")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let Some(uuid) = record.get("uuid").and_then(Value::as_str) else {
                continue;
            };
            match record.get("host-name").and_then(Value::as_str) {
                Some(hostname) => out.push((uuid.to_owned(), hostname.to_owned())),
                None => debug!(uuid, "skipping device without hostname"),
            }
        }
    }
    Ok(out)
}

// ── Attachment plumbing ─────────────────────────────────────────────

/// Device uuids currently attached to a template on the controller.
pub(crate) async fn attached_device_uuids(
    api: &Rest,
    template_id: &str,
) -> Result<Vec<String>, TaskError> {
    let reply = api
        .get_json(&format!("{TEMPLATE_ATTACHED_PATH}/{template_id}"))
        .await?;
    Ok(attached_records(&reply)
        .iter()
        .filter_map(|r| r.get("uuid").and_then(Value::as_str))
        .map(str::to_owned)
        .collect())
}

pub(crate) fn attached_records(doc: &Value) -> Vec<Value> {
    doc.get("data")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

/// Fetch per-device variable values for a template from the controller.
pub(crate) async fn fetch_template_values(
    api: &Rest,
    template_id: &str,
    device_uuids: &[String],
) -> Result<Value, TaskError> {
    let payload = json!({
        "deviceIds": device_uuids,
        "isEdited": false,
        "isMasterEdited": false,
        "templateId": template_id,
    });
    Ok(api.post_json(TEMPLATE_VALUES_PATH, &payload).await?)
}

/// Extract per-device input records from a values document, optionally
/// restricted to an allowed uuid set.
pub(crate) fn values_input_list(doc: &Value, allowed: Option<&HashSet<String>>) -> Vec<Value> {
    doc.get("data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(|entry| match allowed {
            None => true,
            Some(set) => entry
                .get("csv-deviceId")
                .and_then(Value::as_str)
                .is_some_and(|uuid| set.contains(uuid)),
        })
        .cloned()
        .collect()
}

/// A device template selected for attach: saved identity plus its id on the
/// target controller (when present there).
pub(crate) struct AttachCandidate {
    pub name: String,
    pub saved_id: String,
    pub target_id: Option<String>,
}

/// Build attach inputs from workdir-saved attachment records and values.
///
/// When `target_device_set` is given, only devices that were attached in
/// the backup, exist on the target, and are not yet attached there are
/// included (cold attach). Without it, all currently-attached devices on
/// the target are re-attached (values still come from the workdir).
pub(crate) async fn attach_inputs_from_workdir(
    api: &Rest,
    workdir: &Workdir,
    ext_name: bool,
    candidates: Vec<AttachCandidate>,
    target_device_set: Option<&HashSet<String>>,
    tally: &mut Tally,
) -> Result<Vec<AttachInput>, TaskError> {
    let template_entry = crate::catalog::entry_for_kind("template_device")
        .expect("template_device catalog entry");

    let mut inputs = Vec::new();
    for candidate in candidates {
        let Some(target_id) = candidate.target_id else {
            debug!(template = %candidate.name, "saved template not on target, skipping");
            continue;
        };

        let Some(values) = workdir.load_item_json(
            template_entry,
            &candidate.name,
            &candidate.saved_id,
            ext_name,
            "_values",
        )?
        else {
            tally.error(format!(
                "no saved attachment values for {}",
                candidate.name
            ));
            continue;
        };

        let target_attached: HashSet<String> = attached_device_uuids(api, &target_id)
            .await?
            .into_iter()
            .collect();

        let allowed: HashSet<String> = match target_device_set {
            None => target_attached,
            Some(on_target) => {
                let Some(saved_attached) = workdir.load_item_json(
                    template_entry,
                    &candidate.name,
                    &candidate.saved_id,
                    ext_name,
                    "_attached",
                )?
                else {
                    tally.error(format!(
                        "no saved attachment records for {}",
                        candidate.name
                    ));
                    continue;
                };
                let saved: HashSet<String> = attached_records(&saved_attached)
                    .iter()
                    .filter_map(|r| r.get("uuid").and_then(Value::as_str))
                    .map(str::to_owned)
                    .collect();
                saved
                    .intersection(on_target)
                    .filter(|uuid| !target_attached.contains(*uuid))
                    .cloned()
                    .collect()
            }
        };

        let device_inputs = values_input_list(&values, Some(&allowed));
        if device_inputs.is_empty() {
            debug!(template = %candidate.name, "no devices to attach");
            continue;
        }

        let is_cli = workdir
            .load_item_json(template_entry, &candidate.name, &candidate.saved_id, ext_name, "")?
            .map(|body| ConfigItem::new(template_entry, body).is_type_cli())
            .unwrap_or(false);

        inputs.push(AttachInput {
            template_id: target_id,
            template_name: candidate.name,
            is_cli,
            device_inputs,
        });
    }
    Ok(inputs)
}

/// Build re-attach inputs with the target controller as the source of truth
/// for variable values (the authoritative, possibly hand-edited copy).
pub(crate) async fn reattach_inputs_from_target(
    api: &Rest,
    templates: Vec<(String, String)>,
) -> Result<Vec<AttachInput>, TaskError> {
    let template_entry = crate::catalog::entry_for_kind("template_device")
        .expect("template_device catalog entry");

    let mut inputs = Vec::new();
    for (name, template_id) in templates {
        let uuids = attached_device_uuids(api, &template_id).await?;
        if uuids.is_empty() {
            debug!(template = %name, "no devices attached, skipping re-attach");
            continue;
        }
        let values = fetch_template_values(api, &template_id, &uuids).await?;
        let device_inputs = values_input_list(&values, None);
        if device_inputs.is_empty() {
            continue;
        }
        let is_cli = fetch_item(api, template_entry, &template_id)
            .await?
            .map(|body| ConfigItem::new(template_entry, body).is_type_cli())
            .unwrap_or(false);

        inputs.push(AttachInput {
            template_id,
            template_name: name,
            is_cli,
            device_inputs,
        });
    }
    Ok(inputs)
}

/// Build detach inputs for templates currently attached on the target.
/// Personalities are uniform across devices attached to one template.
pub(crate) async fn detach_inputs(
    api: &Rest,
    templates: Vec<(String, String)>,
    device_filter: Option<&HashSet<String>>,
    tally: &mut Tally,
) -> Result<Vec<DetachInput>, TaskError> {
    let mut inputs = Vec::new();
    for (template_id, name) in templates {
        let reply = match api
            .get_json(&format!("{TEMPLATE_ATTACHED_PATH}/{template_id}"))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                tally.warn(format!("failed to retrieve {name} attached devices: {e}"));
                continue;
            }
        };
        let records = attached_records(&reply);
        let device_type = records
            .first()
            .and_then(|r| r.get("personality").and_then(Value::as_str))
            .unwrap_or("vedge")
            .to_owned();
        let device_ids: Vec<String> = records
            .iter()
            .filter_map(|r| r.get("uuid").and_then(Value::as_str))
            .filter(|uuid| device_filter.map_or(true, |set| set.contains(*uuid)))
            .map(str::to_owned)
            .collect();
        if device_ids.is_empty() {
            continue;
        }
        inputs.push(DetachInput {
            template_name: name,
            device_type,
            device_ids,
        });
    }
    Ok(inputs)
}
