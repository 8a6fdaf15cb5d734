// ── Item model ──
//
// `ConfigItem` wraps one opaque configuration payload together with its
// catalog entry. The engine never interprets kind-specific fields beyond
// what the entry's identity descriptors name; everything else rides along
// untouched.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::CatalogEntry;

const FACTORY_DEFAULT_FIELD: &str = "factoryDefault";
const READ_ONLY_FIELD: &str = "readOnly";
const OWNER_FIELD: &str = "owner";
const INFO_TAG_FIELD: &str = "infoTag";

// Fields the controller owns; never sent back on create/update.
const WRITE_FILTERED_FIELDS: &[&str] = &["@rid", "createdOn", "lastUpdatedOn"];

/// Mapping of source item ids to target item ids, populated at push time.
pub type IdMap = HashMap<String, String>;

fn uuid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
            .unwrap()
    })
}

/// One configuration artifact: an opaque body plus its catalog descriptor.
#[derive(Debug, Clone)]
pub struct ConfigItem {
    pub entry: &'static CatalogEntry,
    pub data: Value,
}

impl ConfigItem {
    pub fn new(entry: &'static CatalogEntry, data: Value) -> Self {
        Self { entry, data }
    }

    /// Controller-assigned id, when the body carries one.
    pub fn id(&self) -> Option<&str> {
        self.data.get(self.entry.id_field).and_then(Value::as_str)
    }

    pub fn name(&self) -> Option<&str> {
        self.data.get(self.entry.name_field).and_then(Value::as_str)
    }

    pub fn is_factory_default(&self) -> bool {
        self.data
            .get(FACTORY_DEFAULT_FIELD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Factory-default or read-only items cannot be pushed or deleted.
    pub fn is_readonly(&self) -> bool {
        self.is_factory_default()
            || self
                .data
                .get(READ_ONLY_FIELD)
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    pub fn is_system(&self) -> bool {
        self.data.get(OWNER_FIELD).and_then(Value::as_str) == Some("system")
            || self.data.get(INFO_TAG_FIELD).and_then(Value::as_str) == Some("aci")
    }

    /// CLI device templates attach through a different endpoint.
    pub fn is_type_cli(&self) -> bool {
        self.data.get("configType").and_then(Value::as_str) == Some("file")
    }

    /// Clear the flags that would make this item read-only on the target.
    /// Used when a depended-upon factory default is absent on the target and
    /// must be recreated as a regular item.
    pub fn clear_factory_default(&mut self) {
        for field in [FACTORY_DEFAULT_FIELD, READ_ONLY_FIELD] {
            if let Some(slot) = self.data.get_mut(field) {
                *slot = Value::Bool(false);
            }
        }
    }

    /// Payload for POST requests: controller-owned fields stripped, embedded
    /// references rewritten through `id_map`.
    pub fn post_body(&self, id_map: &IdMap) -> Value {
        let mut filtered: HashSet<&str> = WRITE_FILTERED_FIELDS.iter().copied().collect();
        filtered.insert(self.entry.id_field);
        filtered.extend(self.entry.post_filtered_fields);

        update_ids(id_map, &self.strip_fields(&filtered))
    }

    /// Payload for PUT requests. The item id is kept -- the controller wants
    /// it in the body on updates.
    pub fn put_body(&self, id_map: &IdMap) -> Value {
        let filtered: HashSet<&str> = WRITE_FILTERED_FIELDS.iter().copied().collect();
        update_ids(id_map, &self.strip_fields(&filtered))
    }

    /// All item ids this body references, excluding its own.
    pub fn id_references(&self) -> BTreeSet<String> {
        let own_id = self.id().map(str::to_owned);
        let serialized =
            serde_json::to_string(&self.strip_fields(&HashSet::from([self.entry.id_field])))
                .unwrap_or_default();

        uuid_regex()
            .find_iter(&serialized)
            .map(|m| m.as_str().to_owned())
            .filter(|id| Some(id) != own_id.as_ref())
            .collect()
    }

    /// Compare against another body, ignoring the volatile fields the
    /// controller rewrites on every touch.
    pub fn is_equal(&self, other: &Value) -> bool {
        let mut skip: HashSet<&str> = self.entry.skip_cmp_fields.iter().copied().collect();
        skip.insert(self.entry.id_field);

        canonicalize(&self.strip_fields(&skip)) == canonicalize(&strip_fields(other, &skip))
    }

    fn strip_fields(&self, fields: &HashSet<&str>) -> Value {
        strip_fields(&self.data, fields)
    }
}

fn strip_fields(value: &Value, fields: &HashSet<&str>) -> Value {
    match value.as_object() {
        Some(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !fields.contains(key.as_str()))
                .map(|(key, val)| (key.clone(), val.clone()))
                .collect(),
        ),
        None => value.clone(),
    }
}

/// Rewrite every embedded item id found in `value` through `id_map`.
/// Ids without a mapping are left as-is.
pub fn update_ids(id_map: &IdMap, value: &Value) -> Value {
    if id_map.is_empty() {
        return value.clone();
    }
    let serialized = serde_json::to_string(value).unwrap_or_default();
    let rewritten = uuid_regex().replace_all(&serialized, |caps: &regex::Captures<'_>| {
        let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
        id_map
            .get(matched)
            .cloned()
            .unwrap_or_else(|| matched.to_owned())
    });
    serde_json::from_str(&rewritten).unwrap_or_else(|_| value.clone())
}

/// Deterministic filename-safe transform: anything outside
/// `[A-Za-z0-9 _-]` becomes `_`.
pub fn filename_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Recursively rebuild a value with object keys in sorted order, so
/// serialization is deterministic across backups.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, &Value> = map.iter().collect();
            let mut out = Map::with_capacity(sorted.len());
            for (key, val) in sorted {
                out.insert(key.clone(), canonicalize(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Canonical pretty form used for everything persisted to a workdir:
/// sorted keys, 2-space indent.
pub fn to_canonical_pretty(value: &Value) -> String {
    serde_json::to_string_pretty(&canonicalize(value)).unwrap_or_else(|_| "null".into())
}

// ── Index ───────────────────────────────────────────────────────────

/// One index entry: the summary the controller lists for an item.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub id: String,
    pub name: String,
}

/// Per-kind index of `(id, name)` summaries, as listed by the controller.
#[derive(Debug, Clone)]
pub struct ItemIndex {
    pub entry: &'static CatalogEntry,
    records: Vec<Value>,
    /// Filename-safe names collide within this kind; store filenames carry
    /// the item id suffix.
    pub need_extended_name: bool,
}

impl ItemIndex {
    /// Parse an index document (`{"data": [...]}` envelope or bare array).
    pub fn new(entry: &'static CatalogEntry, raw: Value) -> Self {
        let records = match raw {
            Value::Object(mut map) => match map.remove("data") {
                Some(Value::Array(items)) => items,
                _ => Vec::new(),
            },
            Value::Array(items) => items,
            _ => Vec::new(),
        };

        let safe_names: HashSet<String> = records
            .iter()
            .filter_map(|r| r.get(entry.name_field).and_then(Value::as_str))
            .map(|name| filename_safe(name).to_lowercase())
            .collect();
        let named_records = records
            .iter()
            .filter(|r| r.get(entry.name_field).and_then(Value::as_str).is_some())
            .count();
        let need_extended_name = safe_names.len() != named_records;

        Self {
            entry,
            records,
            need_extended_name,
        }
    }

    /// Build an index document from a list of items, used when writing a
    /// transformed or migrated snapshot. `id_hints` supplies ids for items
    /// whose bodies don't carry one.
    pub fn create(
        entry: &'static CatalogEntry,
        items: &[ConfigItem],
        id_hints: &HashMap<String, String>,
    ) -> Self {
        let records = items
            .iter()
            .map(|item| {
                let id = item
                    .id()
                    .map(str::to_owned)
                    .or_else(|| item.name().and_then(|n| id_hints.get(n).cloned()))
                    .unwrap_or_default();
                let name = item.name().unwrap_or_default().to_owned();
                serde_json::json!({entry.id_field: id, entry.name_field: name})
            })
            .collect();
        Self::new(entry, Value::Array(records))
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Raw index records, for kinds whose summaries carry extra fields
    /// (device type, attach counts, activation flags).
    pub fn records(&self) -> &[Value] {
        &self.records
    }

    /// `(id, name)` pairs; records missing either field are skipped.
    pub fn iter(&self) -> impl Iterator<Item = IndexEntry> + '_ {
        self.records.iter().filter_map(|r| {
            Some(IndexEntry {
                id: r.get(self.entry.id_field)?.as_str()?.to_owned(),
                name: r.get(self.entry.name_field)?.as_str()?.to_owned(),
            })
        })
    }

    /// Map of name to id for target-side identity lookups.
    pub fn by_name(&self) -> HashMap<String, String> {
        self.iter().map(|e| (e.name, e.id)).collect()
    }

    /// The serializable index document (canonical envelope).
    pub fn to_value(&self) -> Value {
        serde_json::json!({ "data": self.records })
    }

    // ── Device-template index specifics ──────────────────────────────

    /// Device templates with at least one device attached, split by vSmart
    /// vs WAN edge. Only meaningful on the `template_device` index.
    pub fn attached_templates(&self, vsmart: bool) -> Vec<IndexEntry> {
        self.records
            .iter()
            .filter(|r| {
                let device_type = r.get("deviceType").and_then(Value::as_str).unwrap_or("");
                let attached = r
                    .get("devicesAttached")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                attached > 0 && (device_type == "vsmart") == vsmart
            })
            .filter_map(|r| {
                Some(IndexEntry {
                    id: r.get(self.entry.id_field)?.as_str()?.to_owned(),
                    name: r.get(self.entry.name_field)?.as_str()?.to_owned(),
                })
            })
            .collect()
    }

    /// Active vSmart policy, if any. Only meaningful on the `policy_vsmart`
    /// index.
    pub fn active_policy(&self) -> Option<IndexEntry> {
        self.records
            .iter()
            .find(|r| {
                r.get("isPolicyActivated")
                    .and_then(Value::as_bool)
                    .unwrap_or(false)
            })
            .and_then(|r| {
                Some(IndexEntry {
                    id: r.get(self.entry.id_field)?.as_str()?.to_owned(),
                    name: r.get(self.entry.name_field)?.as_str()?.to_owned(),
                })
            })
    }
}

// ── Update evaluation ───────────────────────────────────────────────

/// Interpretation of a PUT response: the controller signals whether the
/// update invalidated template attachments or an active policy.
#[derive(Debug)]
pub struct UpdateEval {
    is_policy: bool,
    is_master: bool,
    data: Value,
}

impl UpdateEval {
    pub fn new(response: Value) -> Self {
        let is_policy = response.is_array();
        // Master template updates return a dict containing a 'data' key.
        let is_master = response
            .as_object()
            .map(|m| m.contains_key("data"))
            .unwrap_or(false);
        let data = if is_master {
            response.get("data").cloned().unwrap_or(Value::Null)
        } else {
            response
        };
        Self {
            is_policy,
            is_master,
            data,
        }
    }

    /// The updated item is a master template with attachments to redo.
    pub fn is_master(&self) -> bool {
        self.is_master
    }

    pub fn need_reattach(&self) -> bool {
        !self.is_policy
            && self
                .data
                .as_object()
                .map(|m| m.contains_key("processId"))
                .unwrap_or(false)
    }

    pub fn need_reactivate(&self) -> bool {
        self.is_policy
            && self
                .data
                .as_array()
                .map(|a| !a.is_empty())
                .unwrap_or(false)
    }

    /// Master template ids whose attachments are affected by this update.
    pub fn templates_affected(&self) -> Vec<String> {
        self.data
            .get("masterTemplatesAffected")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(Value::as_str)
            .map(str::to_owned)
            .collect()
    }
}

// ── Server info ─────────────────────────────────────────────────────

/// Source controller facts recorded at the root of every workdir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub server_version: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::entry_for_kind;
    use serde_json::json;

    fn site_list_item(data: Value) -> ConfigItem {
        ConfigItem::new(entry_for_kind("policy_list.site").unwrap(), data)
    }

    #[test]
    fn filename_safe_replaces_specials() {
        assert_eq!(filename_safe("DC-1 core/edge"), "DC-1 core_edge");
        assert_eq!(filename_safe("plain_Name-1"), "plain_Name-1");
        assert_eq!(filename_safe("a:b*c"), "a_b_c");
    }

    #[test]
    fn filename_safe_is_stable() {
        let name = "Branch/Office: #42";
        assert_eq!(filename_safe(name), filename_safe(name));
    }

    #[test]
    fn id_references_exclude_own_id() {
        let item = site_list_item(json!({
            "listId": "11111111-2222-3333-4444-555555555555",
            "name": "DC1",
            "entries": [{"ref": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"}],
        }));
        let refs = item.id_references();
        assert_eq!(refs.len(), 1);
        assert!(refs.contains("aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee"));
    }

    #[test]
    fn post_body_strips_id_and_rewrites_references() {
        let item = site_list_item(json!({
            "listId": "11111111-2222-3333-4444-555555555555",
            "name": "DC1",
            "@rid": 42,
            "createdOn": 1700000000,
            "ref": "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee",
        }));
        let mut id_map = IdMap::new();
        id_map.insert(
            "aaaaaaaa-bbbb-cccc-dddd-eeeeeeeeeeee".into(),
            "99999999-8888-7777-6666-555555555555".into(),
        );
        let body = item.post_body(&id_map);
        assert!(body.get("listId").is_none());
        assert!(body.get("@rid").is_none());
        assert!(body.get("createdOn").is_none());
        assert_eq!(body["ref"], "99999999-8888-7777-6666-555555555555");
    }

    #[test]
    fn is_equal_ignores_volatile_fields() {
        let item = site_list_item(json!({
            "listId": "11111111-2222-3333-4444-555555555555",
            "name": "DC1",
            "entries": [{"siteId": "100"}],
            "lastUpdated": 1700000000,
            "referenceCount": 3,
        }));
        let other = json!({
            "listId": "99999999-8888-7777-6666-555555555555",
            "name": "DC1",
            "entries": [{"siteId": "100"}],
            "lastUpdated": 1800000000,
            "referenceCount": 7,
        });
        assert!(item.is_equal(&other));

        let different = json!({
            "name": "DC1",
            "entries": [{"siteId": "200"}],
        });
        assert!(!item.is_equal(&different));
    }

    #[test]
    fn canonical_pretty_sorts_keys() {
        let value = json!({"zeta": 1, "alpha": {"b": 2, "a": 1}});
        let text = to_canonical_pretty(&value);
        let alpha = text.find("\"alpha\"").unwrap();
        let zeta = text.find("\"zeta\"").unwrap();
        assert!(alpha < zeta);
    }

    #[test]
    fn factory_default_conversion() {
        let mut item = site_list_item(json!({
            "name": "Default_List",
            "factoryDefault": true,
            "readOnly": true,
        }));
        assert!(item.is_factory_default());
        assert!(item.is_readonly());
        item.clear_factory_default();
        assert!(!item.is_readonly());
    }

    #[test]
    fn index_detects_name_collisions() {
        let entry = entry_for_kind("policy_list.site").unwrap();
        let index = ItemIndex::new(
            entry,
            json!({"data": [
                {"listId": "id-1", "name": "DC/1"},
                {"listId": "id-2", "name": "DC:1"},
            ]}),
        );
        // Both names collapse to "dc_1".
        assert!(index.need_extended_name);

        let index = ItemIndex::new(
            entry,
            json!({"data": [
                {"listId": "id-1", "name": "DC1"},
                {"listId": "id-2", "name": "DC2"},
            ]}),
        );
        assert!(!index.need_extended_name);
    }

    #[test]
    fn update_eval_master_template() {
        let eval = UpdateEval::new(json!({
            "data": {
                "processId": "push-1",
                "masterTemplatesAffected": ["tmpl-1", "tmpl-2"],
            }
        }));
        assert!(eval.is_master());
        assert!(eval.need_reattach());
        assert_eq!(eval.templates_affected(), vec!["tmpl-1", "tmpl-2"]);
    }

    #[test]
    fn update_eval_policy_reactivate() {
        let eval = UpdateEval::new(json!(["policy-ref-1"]));
        assert!(!eval.need_reattach());
        assert!(eval.need_reactivate());

        let noop = UpdateEval::new(json!([]));
        assert!(!noop.need_reactivate());
    }

    #[test]
    fn vsmart_index_active_policy() {
        let entry = entry_for_kind("policy_vsmart").unwrap();
        let index = ItemIndex::new(
            entry,
            json!({"data": [
                {"policyId": "pol-1", "policyName": "Standby", "isPolicyActivated": false},
                {"policyId": "pol-2", "policyName": "Central", "isPolicyActivated": true},
            ]}),
        );
        let active = index.active_policy().unwrap();
        assert_eq!(active.name, "Central");
    }
}
