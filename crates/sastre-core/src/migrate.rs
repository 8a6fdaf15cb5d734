// ── Template migration ──
//
// Translates an 18.4/19.2/19.3-era snapshot into a 20.1-compatible one.
// Combined vEdge/cEdge feature templates become cEdge-only templates: the
// template type is renamed, incompatible fields are removed or clamped,
// and vEdge-only device types are filtered out. Device templates have
// their sub-template type references remapped to the new cEdge names.
//
// Recipes are declarative: per-template-type field operations over the
// vip-structured `templateDefinition` tree.

use serde_json::{json, Value};

use crate::catalog::entry_for_kind;
use crate::error::TaskError;
use crate::item::ConfigItem;

/// Source versions the 20.1 recipe set covers.
const SUPPORTED_FROM: &[&str] = &["18.4", "19.2", "19.3"];
const SUPPORTED_TO: &str = "20.1";

/// Device types that never carry cEdge templates; dropped from migrated
/// templates.
const DEVICE_TYPES_TO_FILTER: &[&str] = &[
    "vedge-ISR1100-6G",
    "vedge-ISR1100-4G",
    "vedge-ISR1100-4GLTE",
    "vedge-cloud",
    "vedge-1000",
    "vedge-2000",
    "vedge-5000",
    "vedge-100",
    "vedge-100-B",
    "vedge-100-M",
    "vedge-100-WM",
    "vsmart",
    "vbond",
    "vmanage",
];

/// Field operation applied to a feature template definition.
enum FieldOp {
    /// Remove the leaf field at this path.
    Remove(&'static [&'static str]),
    /// Clamp a numeric vipValue into [min, max].
    Range {
        path: &'static [&'static str],
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Force an ignored field to a constant default.
    Default {
        path: &'static [&'static str],
        value: &'static str,
    },
}

struct FeatureRecipe {
    from_type: &'static str,
    to_type: &'static str,
    ops: &'static [FieldOp],
}

/// Per-template-type migration recipes for the 20.1 target.
static FEATURE_RECIPES: &[FeatureRecipe] = &[
    FeatureRecipe {
        from_type: "aaa",
        to_type: "cedge_aaa",
        ops: &[
            FieldOp::Remove(&["aaa", "auth-fallback"]),
            FieldOp::Remove(&["aaa", "admin-auth-order"]),
            FieldOp::Remove(&["aaa", "logs"]),
            FieldOp::Remove(&["aaa", "audit-disable"]),
            FieldOp::Remove(&["aaa", "netconf-disable"]),
            FieldOp::Remove(&["aaa", "task"]),
        ],
    },
    FeatureRecipe {
        from_type: "system-vedge",
        to_type: "cisco_system",
        ops: &[
            FieldOp::Remove(&["system", "daemon-restart"]),
            FieldOp::Range {
                path: &["system", "port-hop", "port-offset"],
                min: Some(0.0),
                max: Some(19.0),
            },
        ],
    },
    FeatureRecipe {
        from_type: "omp-vedge",
        to_type: "cisco_omp",
        ops: &[FieldOp::Range {
            path: &["omp", "timers", "advertisement-interval"],
            min: Some(1.0),
            max: Some(65535.0),
        }],
    },
    FeatureRecipe {
        from_type: "bfd-vedge",
        to_type: "cisco_bfd",
        ops: &[FieldOp::Range {
            path: &["bfd", "app-route", "poll-interval"],
            min: Some(1.0),
            max: Some(4294967295.0),
        }],
    },
    FeatureRecipe {
        from_type: "logging",
        to_type: "cisco_logging",
        ops: &[FieldOp::Remove(&["logging", "server", "priority"])],
    },
    FeatureRecipe {
        from_type: "ntp",
        to_type: "cisco_ntp",
        ops: &[],
    },
    FeatureRecipe {
        from_type: "banner",
        to_type: "cisco_banner",
        ops: &[],
    },
    FeatureRecipe {
        from_type: "snmp",
        to_type: "cisco_snmp",
        ops: &[FieldOp::Remove(&["snmp", "trap", "group"])],
    },
    FeatureRecipe {
        from_type: "security-vedge",
        to_type: "cisco_security",
        ops: &[FieldOp::Default {
            path: &["security", "ipsec", "replay-window"],
            value: "512",
        }],
    },
    FeatureRecipe {
        from_type: "vpn-vedge",
        to_type: "cisco_vpn",
        ops: &[FieldOp::Remove(&["vpn", "dns", "role"])],
    },
    FeatureRecipe {
        from_type: "vpn-vedge-interface",
        to_type: "cisco_vpn_interface",
        ops: &[
            FieldOp::Remove(&["vpn-interface", "access-list"]),
            FieldOp::Range {
                path: &["vpn-interface", "mtu"],
                min: Some(576.0),
                max: Some(9216.0),
            },
        ],
    },
];

/// Built-in factory cEdge global settings template, appended to migrated
/// snapshots. Device recipes reference it by this fixed id.
pub fn factory_cedge_global() -> ConfigItem {
    feature_template_item(json!({
        "templateId": "300d7759-cc0a-4cd7-90c0-eb52adc27f2f",
        "templateName": "Factory_Default_Global_CISCO_Template",
        "templateDescription": "Factory Default Global CISCO Template",
        "templateType": "cedge_global",
        "templateMinVersion": "15.0.0",
        "deviceType": ["vedge-CSR-1000v"],
        "factoryDefault": true,
        "gTemplateClass": "cedge",
        "templateDefinition": {},
    }))
}

/// Built-in factory cEdge AAA template.
pub fn factory_cedge_aaa() -> ConfigItem {
    feature_template_item(json!({
        "templateId": "add276c5-45b0-4493-a559-5a07b15cbdeb",
        "templateName": "Factory_Default_AAA_CISCO_Template",
        "templateDescription": "Factory Default AAA CISCO Template",
        "templateType": "cedge_aaa",
        "templateMinVersion": "15.0.0",
        "deviceType": ["vedge-CSR-1000v"],
        "factoryDefault": true,
        "gTemplateClass": "cedge",
        "templateDefinition": {},
    }))
}

fn feature_template_item(data: Value) -> ConfigItem {
    let entry = entry_for_kind("template_feature").expect("template_feature catalog entry");
    ConfigItem::new(entry, data)
}

/// Applies the recipe set for one `from -> to` version pair.
pub struct TemplateMigrator {
    from_version: String,
    to_version: String,
}

impl TemplateMigrator {
    pub fn new(from_version: &str, to_version: &str) -> Result<Self, TaskError> {
        if !SUPPORTED_FROM.contains(&from_version) || to_version != SUPPORTED_TO {
            return Err(TaskError::InvalidArg(format!(
                "no migration recipe from {from_version} to {to_version}"
            )));
        }
        Ok(Self {
            from_version: from_version.to_owned(),
            to_version: to_version.to_owned(),
        })
    }

    pub fn from_version(&self) -> &str {
        &self.from_version
    }

    pub fn to_version(&self) -> &str {
        &self.to_version
    }

    /// Feature templates in scope: writable, and applicable to at least one
    /// cEdge device type. `migrate_all` false restricts to templates with
    /// masters attached.
    pub fn feature_in_scope(&self, item: &ConfigItem, migrate_all: bool) -> bool {
        if item.is_readonly() {
            return false;
        }
        if !device_types(&item.data).iter().any(|t| is_cedge(t)) {
            return false;
        }
        if !migrate_all {
            return item
                .data
                .get("attachedMastersCount")
                .and_then(Value::as_u64)
                .unwrap_or(0)
                > 0;
        }
        true
    }

    /// Produce the migrated payload of a feature template. The original is
    /// kept beside the migrated copy; the caller assigns `new_name` and
    /// `new_id`.
    pub fn migrate_feature(&self, item: &ConfigItem, new_name: &str, new_id: &str) -> Value {
        let mut payload = item.data.clone();

        let template_type = payload
            .get("templateType")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();

        if let Some(recipe) = FEATURE_RECIPES
            .iter()
            .find(|r| r.from_type == template_type)
        {
            if let Some(definition) = payload.get_mut("templateDefinition") {
                for op in recipe.ops {
                    apply_field_op(definition, op);
                }
            }
            payload["templateType"] = Value::String(recipe.to_type.to_owned());
        }

        if payload.get("gTemplateClass").is_some() {
            payload["gTemplateClass"] = Value::String("cedge".into());
        }
        payload["templateName"] = Value::String(new_name.to_owned());
        payload["templateId"] = Value::String(new_id.to_owned());

        let kept: Vec<Value> = device_types(&payload)
            .into_iter()
            .filter(|t| !DEVICE_TYPES_TO_FILTER.contains(&t.as_str()))
            .map(Value::String)
            .collect();
        payload["deviceType"] = Value::Array(kept);

        payload
    }

    /// Device templates in scope: templates whose sub-template type names
    /// appear in the recipe set (i.e. the migration would change them).
    pub fn device_in_scope(&self, item: &ConfigItem) -> bool {
        let mut found = false;
        collect_field_values(&item.data, &["generalTemplates", "templateType"], &mut |v| {
            if FEATURE_RECIPES.iter().any(|r| r.from_type == v) {
                found = true;
            }
        });
        found
    }

    /// Produce the migrated payload of a device template: sub-template type
    /// names remapped to their cEdge equivalents, vEdge-only device type
    /// dropped.
    pub fn migrate_device(&self, item: &ConfigItem, new_name: &str, new_id: &str) -> Value {
        let mut payload = item.data.clone();

        replace_field_values(
            &mut payload,
            &["generalTemplates", "templateType"],
            &|old| {
                FEATURE_RECIPES
                    .iter()
                    .find(|r| r.from_type == old)
                    .map(|r| r.to_type.to_owned())
            },
        );

        payload["templateName"] = Value::String(new_name.to_owned());
        if payload.get("templateId").is_some() {
            payload["templateId"] = Value::String(new_id.to_owned());
        }
        if let Some(device_type) = payload.get("deviceType").and_then(Value::as_str) {
            if DEVICE_TYPES_TO_FILTER.contains(&device_type) {
                // Combined templates keep their type; the catalog push will
                // reject truly incompatible ones.
                payload["deviceType"] = Value::String("vedge-CSR-1000v".into());
            }
        }

        payload
    }
}

fn device_types(payload: &Value) -> Vec<String> {
    payload
        .get("deviceType")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::to_owned)
        .collect()
}

fn is_cedge(device_type: &str) -> bool {
    const CEDGE_PREFIXES: &[&str] = &[
        "vedge-CSR",
        "vedge-C1",
        "vedge-C8",
        "vedge-ISR-",
        "vedge-ISRv",
        "vedge-ASR",
        "vedge-IR1",
    ];
    CEDGE_PREFIXES.iter().any(|p| device_type.starts_with(p))
}

// ── Field operations over vip-structured definitions ────────────────

fn apply_field_op(definition: &mut Value, op: &FieldOp) {
    match op {
        FieldOp::Remove(path) => {
            if let Some((last, parents)) = path.split_last() {
                for_each_leaf(definition, parents, &mut |leaf| remove_in(leaf, last));
            }
        }
        FieldOp::Range { path, min, max } => {
            for_each_leaf(definition, path, &mut |leaf| {
                let Some(map) = leaf.as_object_mut() else {
                    return;
                };
                let Some(value) = map.get("vipValue").and_then(Value::as_f64) else {
                    return;
                };
                if let Some(min) = min {
                    if value < *min {
                        map.insert("vipValue".into(), clamp_value(*min));
                        return;
                    }
                }
                if let Some(max) = max {
                    if value > *max {
                        map.insert("vipValue".into(), clamp_value(*max));
                    }
                }
            });
        }
        FieldOp::Default { path, value } => {
            for_each_leaf(definition, path, &mut |leaf| {
                let Some(map) = leaf.as_object_mut() else {
                    return;
                };
                let ignored = map.get("vipType").and_then(Value::as_str) == Some("ignore");
                let current = map.get("vipValue").and_then(Value::as_str);
                if ignored && current != Some(value) {
                    map.insert("vipType".into(), Value::String("constant".into()));
                    map.insert("vipValue".into(), Value::String((*value).to_owned()));
                }
            });
        }
    }
}

fn clamp_value(v: f64) -> Value {
    if v.fract() == 0.0 {
        json!(v as i64)
    } else {
        json!(v)
    }
}

/// Visit every leaf object matching a field path, descending through
/// vip `tree` containers whose `vipValue` holds nested objects.
fn for_each_leaf(obj: &mut Value, path: &[&str], f: &mut dyn FnMut(&mut Value)) {
    if path.is_empty() {
        f(obj);
        return;
    }
    let Some(map) = obj.as_object_mut() else {
        return;
    };
    if map.contains_key(path[0]) {
        if let Some(next) = map.get_mut(path[0]) {
            for_each_leaf(next, &path[1..], f);
        }
        return;
    }
    if map.get("vipObjectType").and_then(Value::as_str) == Some("tree") {
        if let Some(Value::Array(items)) = map.get_mut("vipValue") {
            for item in items {
                for_each_leaf(item, path, f);
            }
        }
    }
}

fn remove_in(container: &mut Value, key: &str) {
    let Some(map) = container.as_object_mut() else {
        return;
    };
    if map.remove(key).is_some() {
        return;
    }
    if map.get("vipObjectType").and_then(Value::as_str) == Some("tree") {
        if let Some(Value::Array(items)) = map.get_mut("vipValue") {
            for item in items {
                remove_in(item, key);
            }
        }
    }
}

/// Visit string values of `path`-addressed fields anywhere in the payload.
fn collect_field_values(obj: &Value, path: &[&str], f: &mut dyn FnMut(&str)) {
    let Some(first) = path.first() else {
        return;
    };
    match obj {
        Value::Object(map) => {
            for (key, value) in map {
                if key == *first {
                    if path.len() > 1 {
                        collect_field_values(value, &path[1..], f);
                    } else if let Some(text) = value.as_str() {
                        f(text);
                    }
                } else {
                    collect_field_values(value, path, f);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_field_values(item, path, f);
            }
        }
        _ => {}
    }
}

/// Replace values of `path`-addressed fields anywhere in the payload
/// through the given mapping, searching nested containers like the
/// controller's own template migrator does.
fn replace_field_values(
    obj: &mut Value,
    path: &[&str],
    mapping: &dyn Fn(&str) -> Option<String>,
) {
    let Some(first) = path.first() else {
        return;
    };
    match obj {
        Value::Object(map) => {
            // Collect keys first: replacement mutates the map values.
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                let Some(value) = map.get_mut(&key) else {
                    continue;
                };
                if key == *first {
                    if path.len() > 1 {
                        replace_field_values(value, &path[1..], mapping);
                    } else if let Some(old) = value.as_str() {
                        if let Some(new) = mapping(old) {
                            *value = Value::String(new);
                        }
                    }
                } else {
                    replace_field_values(value, path, mapping);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                replace_field_values(item, path, mapping);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrator() -> TemplateMigrator {
        TemplateMigrator::new("18.4", "20.1").unwrap()
    }

    #[test]
    fn unsupported_version_pair_is_rejected() {
        assert!(TemplateMigrator::new("20.1", "20.4").is_err());
        assert!(TemplateMigrator::new("17.2", "20.1").is_err());
    }

    #[test]
    fn feature_migration_renames_type_and_filters_devices() {
        let item = feature_template_item(json!({
            "templateId": "11111111-2222-3333-4444-555555555555",
            "templateName": "AAA_Template",
            "templateType": "aaa",
            "gTemplateClass": "vedge",
            "deviceType": ["vedge-cloud", "vedge-CSR-1000v", "vsmart"],
            "templateDefinition": {
                "aaa": {
                    "auth-fallback": {"vipType": "constant", "vipValue": "true"},
                    "server": {"vipType": "ignore"},
                }
            },
        }));

        let migrated = migrator().migrate_feature(
            &item,
            "migrated_AAA_Template",
            "99999999-8888-7777-6666-555555555555",
        );
        assert_eq!(migrated["templateType"], "cedge_aaa");
        assert_eq!(migrated["gTemplateClass"], "cedge");
        assert_eq!(migrated["templateName"], "migrated_AAA_Template");
        assert_eq!(
            migrated["deviceType"],
            json!(["vedge-CSR-1000v"]),
        );
        assert!(migrated["templateDefinition"]["aaa"]
            .get("auth-fallback")
            .is_none());
        assert!(migrated["templateDefinition"]["aaa"].get("server").is_some());
    }

    #[test]
    fn range_op_clamps_through_vip_trees() {
        let mut definition = json!({
            "system": {
                "port-hop": {
                    "vipObjectType": "tree",
                    "vipValue": [
                        {"port-offset": {"vipType": "constant", "vipValue": 100}},
                        {"port-offset": {"vipType": "constant", "vipValue": 5}},
                    ]
                }
            }
        });
        apply_field_op(
            &mut definition,
            &FieldOp::Range {
                path: &["system", "port-hop", "port-offset"],
                min: Some(0.0),
                max: Some(19.0),
            },
        );
        let entries = definition["system"]["port-hop"]["vipValue"]
            .as_array()
            .unwrap();
        assert_eq!(entries[0]["port-offset"]["vipValue"], 19);
        assert_eq!(entries[1]["port-offset"]["vipValue"], 5);
    }

    #[test]
    fn default_op_forces_ignored_fields() {
        let mut definition = json!({
            "security": {
                "ipsec": {
                    "replay-window": {"vipType": "ignore", "vipValue": "64"},
                }
            }
        });
        apply_field_op(
            &mut definition,
            &FieldOp::Default {
                path: &["security", "ipsec", "replay-window"],
                value: "512",
            },
        );
        let field = &definition["security"]["ipsec"]["replay-window"];
        assert_eq!(field["vipType"], "constant");
        assert_eq!(field["vipValue"], "512");
    }

    #[test]
    fn device_migration_remaps_subtemplate_types() {
        let entry = entry_for_kind("template_device").unwrap();
        let item = ConfigItem::new(
            entry,
            json!({
                "templateName": "DT1",
                "templateId": "11111111-2222-3333-4444-555555555555",
                "deviceType": "vedge-CSR-1000v",
                "generalTemplates": [
                    {"templateId": "ft-1", "templateType": "aaa", "subTemplates": [
                        {"templateId": "ft-2", "templateType": "logging"},
                    ]},
                ],
            }),
        );
        let migrated = migrator().migrate_device(&item, "migrated_DT1", "new-id");
        assert_eq!(migrated["generalTemplates"][0]["templateType"], "cedge_aaa");
        assert_eq!(
            migrated["generalTemplates"][0]["subTemplates"][0]["templateType"],
            "cisco_logging"
        );
    }

    #[test]
    fn factory_templates_are_well_formed() {
        let aaa = factory_cedge_aaa();
        assert!(aaa.is_factory_default());
        assert_eq!(aaa.name(), Some("Factory_Default_AAA_CISCO_Template"));
        let global = factory_cedge_global();
        assert_eq!(global.id(), Some("300d7759-cc0a-4cd7-90c0-eb52adc27f2f"));
    }
}
