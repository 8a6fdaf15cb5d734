// Transform task flows over workdir snapshots (no controller needed).

use std::path::Path;

use serde_json::{json, Value};

use sastre_core::tasks::TaskContext;
use sastre_core::transform::TransformRecipe;
use sastre_core::{TaskError, TransformOptions, TransformTask};

const FT_ID: &str = "22222222-2222-2222-2222-222222222222";
const DT_ID: &str = "33333333-3333-3333-3333-333333333333";

fn write_json(root: &Path, rel: &str, value: &Value) {
    write_text(root, rel, &serde_json::to_string_pretty(value).unwrap());
}

fn write_text(root: &Path, rel: &str, text: &str) {
    let target = root.join(rel);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(target, text).unwrap();
}

fn read_json(root: &Path, rel: &str) -> Option<Value> {
    let bytes = std::fs::read(root.join(rel)).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn seed_workdir(root: &Path) {
    write_json(root, "server_info.json", &json!({"server_version": "20.4.1"}));
    write_json(
        root,
        "feature_templates/index.json",
        &json!({"data": [
            {"templateId": FT_ID, "templateName": "Logging_Template_cEdge"},
        ]}),
    );
    write_json(
        root,
        "feature_templates/Logging_Template_cEdge.json",
        &json!({
            "templateId": FT_ID,
            "templateName": "Logging_Template_cEdge",
            "templateType": "cisco_logging",
            "templateDefinition": {},
        }),
    );
    write_json(
        root,
        "device_templates/index.json",
        &json!({"data": [
            {"templateId": DT_ID, "templateName": "DT1", "devicesAttached": 0},
        ]}),
    );
    write_json(
        root,
        "device_templates/DT1.json",
        &json!({
            "templateId": DT_ID,
            "templateName": "DT1",
            "configType": "template",
            "generalTemplates": [{"templateId": FT_ID, "templateType": "cisco_logging"}],
        }),
    );
}

#[tokio::test]
async fn rename_recipe_renames_in_place() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let output = tmp.path().join("output");
    seed_workdir(&source);

    let recipe = TransformRecipe::from_yaml(
        "tag: template_feature\n\
         name_map:\n\
         \x20 Logging_Template_cEdge: Logging_Template_v01\n",
    )
    .unwrap();

    let task = TransformTask {
        options: TransformOptions {
            recipe,
            output: output.clone(),
            workdir: Some(source),
            no_rollover: false,
        },
    };
    let outcome = task.run(None, &mut TaskContext::default()).await.unwrap();
    assert!(outcome.success());

    // The renamed template is written under its new name, same id.
    let renamed = read_json(&output, "feature_templates/Logging_Template_v01.json").unwrap();
    assert_eq!(renamed["templateName"], "Logging_Template_v01");
    assert_eq!(renamed["templateId"], FT_ID);
    assert!(read_json(&output, "feature_templates/Logging_Template_cEdge.json").is_none());

    let index = read_json(&output, "feature_templates/index.json").unwrap();
    let names: Vec<&str> = index["data"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|r| r["templateName"].as_str())
        .collect();
    assert_eq!(names, vec!["Logging_Template_v01"]);

    // The device template rides along untouched: same id reference, so a
    // later `restore --update` resolves it against the renamed item.
    let device = read_json(&output, "device_templates/DT1.json").unwrap();
    assert_eq!(device["generalTemplates"][0]["templateId"], FT_ID);
}

#[tokio::test]
async fn copy_recipe_points_references_at_the_copy() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let output = tmp.path().join("output");
    seed_workdir(&source);

    let recipe = TransformRecipe::copy(
        "template_feature",
        None,
        None,
        "{name (.+)_cEdge}_v01",
    );
    let task = TransformTask {
        options: TransformOptions {
            recipe,
            output: output.clone(),
            workdir: Some(source),
            no_rollover: false,
        },
    };
    let outcome = task.run(None, &mut TaskContext::default()).await.unwrap();
    assert!(outcome.success());

    // Both the original and the copy exist; the copy has a fresh id.
    let original = read_json(&output, "feature_templates/Logging_Template_cEdge.json").unwrap();
    let copy = read_json(&output, "feature_templates/Logging_Template_v01.json").unwrap();
    assert_eq!(original["templateId"], FT_ID);
    let copy_id = copy["templateId"].as_str().unwrap().to_owned();
    assert_ne!(copy_id, FT_ID);

    // The device template now references the copy.
    let device = read_json(&output, "device_templates/DT1.json").unwrap();
    assert_eq!(device["generalTemplates"][0]["templateId"], copy_id);
}

#[tokio::test]
async fn corrupt_kind_index_skips_that_kind_and_continues() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let output = tmp.path().join("output");
    write_json(
        &source,
        "server_info.json",
        &json!({"server_version": "20.4.1"}),
    );
    write_json(
        &source,
        "policy_lists/site/index.json",
        &json!({"data": [{"listId": FT_ID, "name": "DC1"}]}),
    );
    write_json(
        &source,
        "policy_lists/site/DC1.json",
        &json!({"listId": FT_ID, "name": "DC1", "entries": []}),
    );
    // One kind's index is unreadable JSON: fatal for that kind only.
    write_text(&source, "feature_templates/index.json", "{ not json");

    let recipe = TransformRecipe::from_yaml(
        "tag: all\n\
         name_map:\n\
         \x20 DC1: DC1_v01\n",
    )
    .unwrap();
    let task = TransformTask {
        options: TransformOptions {
            recipe,
            output: output.clone(),
            workdir: Some(source),
            no_rollover: false,
        },
    };
    let outcome = task.run(None, &mut TaskContext::default()).await.unwrap();

    // The corrupt feature template index is tallied; the site list kind is
    // still transformed into the output.
    assert!(outcome.errors >= 1);
    let renamed = read_json(&output, "policy_lists/site/DC1_v01.json").unwrap();
    assert_eq!(renamed["name"], "DC1_v01");
    assert!(read_json(&output, "feature_templates/index.json").is_none());
}

#[tokio::test]
async fn colliding_names_fail_the_transform() {
    let tmp = tempfile::tempdir().unwrap();
    let source = tmp.path().join("source");
    let output = tmp.path().join("output");
    write_json(
        &source,
        "server_info.json",
        &json!({"server_version": "20.4.1"}),
    );
    write_json(
        &source,
        "feature_templates/index.json",
        &json!({"data": [
            {"templateId": FT_ID, "templateName": "FT_a"},
            {"templateId": DT_ID, "templateName": "FT_b"},
        ]}),
    );
    write_json(
        &source,
        "feature_templates/FT_a.json",
        &json!({"templateId": FT_ID, "templateName": "FT_a"}),
    );
    write_json(
        &source,
        "feature_templates/FT_b.json",
        &json!({"templateId": DT_ID, "templateName": "FT_b"}),
    );

    // Both names collapse to "FT".
    let recipe = TransformRecipe::rename("template_feature", None, None, "{name (FT)_.+}");
    let task = TransformTask {
        options: TransformOptions {
            recipe,
            output,
            workdir: Some(source),
            no_rollover: false,
        },
    };
    let err = task
        .run(None, &mut TaskContext::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::NameCollision { .. }));
}
