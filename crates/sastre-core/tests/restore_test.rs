// End-to-end restore/delete flows against a mock controller.
//
// The mock serves only the endpoints each scenario needs; every other
// kind index comes back 404, which the engine treats as "not served".

use std::path::Path;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sastre_api::{Rest, TransportConfig};
use sastre_core::tasks::TaskContext;
use sastre_core::{DeleteOptions, DeleteTask, RestoreOptions, RestoreTask};

// Source-side ids (as recorded in the backup).
const SRC_DC1: &str = "11111111-1111-1111-1111-111111111111";
const SRC_FT1: &str = "22222222-2222-2222-2222-222222222222";
const SRC_DT1: &str = "33333333-3333-3333-3333-333333333333";
// Target-side ids (assigned by the mock controller).
const TGT_DC1: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
const TGT_FT1: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";
const TGT_DT1: &str = "cccccccc-cccc-cccc-cccc-cccccccccccc";

async fn mock_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/j_security_check"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dataservice/client/server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"platformVersion": "19.2.1"}
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dataservice/settings/configuration/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"domainIp": "10.10.10.10", "port": "12346"}]
        })))
        .mount(server)
        .await;
}

async fn connect(server: &MockServer) -> Rest {
    Rest::connect(
        server.uri().parse().unwrap(),
        "admin",
        "secret",
        None,
        &TransportConfig::default(),
    )
    .await
    .unwrap()
}

fn write_json(root: &Path, rel: &str, value: &Value) {
    write_text(root, rel, &serde_json::to_string_pretty(value).unwrap());
}

fn write_text(root: &Path, rel: &str, text: &str) {
    let target = root.join(rel);
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(target, text).unwrap();
}

/// Backup fixture: site list DC1 <- feature template FT1 <- device
/// template DT1.
fn seed_workdir(root: &Path) {
    write_json(root, "server_info.json", &json!({"server_version": "19.2.1"}));
    write_json(
        root,
        "policy_lists/site/index.json",
        &json!({"data": [{"listId": SRC_DC1, "name": "DC1"}]}),
    );
    write_json(
        root,
        "policy_lists/site/DC1.json",
        &json!({"listId": SRC_DC1, "name": "DC1", "entries": [{"siteId": "100"}]}),
    );
    write_json(
        root,
        "feature_templates/index.json",
        &json!({"data": [{"templateId": SRC_FT1, "templateName": "FT1"}]}),
    );
    write_json(
        root,
        "feature_templates/FT1.json",
        &json!({
            "templateId": SRC_FT1,
            "templateName": "FT1",
            "templateType": "banner",
            "templateDefinition": {"siteList": {"vipValue": SRC_DC1}},
        }),
    );
    write_json(
        root,
        "device_templates/index.json",
        &json!({"data": [{
            "templateId": SRC_DT1,
            "templateName": "DT1",
            "deviceType": "vedge-cloud",
            "devicesAttached": 0,
        }]}),
    );
    write_json(
        root,
        "device_templates/DT1.json",
        &json!({
            "templateId": SRC_DT1,
            "templateName": "DT1",
            "configType": "template",
            "generalTemplates": [{"templateId": SRC_FT1, "templateType": "banner"}],
        }),
    );
}

/// Mount an index that is empty on the first GET and populated afterwards
/// (the controller listing the item once it has been created).
async fn mock_index_before_after(server: &MockServer, endpoint: &str, populated: Value) {
    Mock::given(method("GET"))
        .and(path(endpoint.to_owned()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .up_to_n_times(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(endpoint.to_owned()))
        .respond_with(ResponseTemplate::new(200).set_body_json(populated))
        .mount(server)
        .await;
}

#[tokio::test]
async fn cold_restore_pushes_in_dependency_order_and_rewrites_ids() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    mock_index_before_after(
        &server,
        "/dataservice/template/policy/list/site",
        json!({"data": [{"listId": TGT_DC1, "name": "DC1"}]}),
    )
    .await;
    mock_index_before_after(
        &server,
        "/dataservice/template/feature",
        json!({"data": [{"templateId": TGT_FT1, "templateName": "FT1"}]}),
    )
    .await;
    mock_index_before_after(
        &server,
        "/dataservice/template/device",
        json!({"data": [{"templateId": TGT_DT1, "templateName": "DT1"}]}),
    )
    .await;

    for endpoint in [
        "/dataservice/template/policy/list/site",
        "/dataservice/template/feature",
        "/dataservice/template/device/feature",
    ] {
        Mock::given(method("POST"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
    }

    let tmp = tempfile::tempdir().unwrap();
    seed_workdir(tmp.path());

    let api = connect(&server).await;
    let mut ctx = TaskContext::default();
    let task = RestoreTask {
        options: RestoreOptions {
            workdir: tmp.path().to_owned(),
            tag: "template_device".into(),
            regex: None,
            dry_run: false,
            update: false,
            attach: false,
            convert_factory_defaults: false,
        },
    };
    let outcome = task.run(&api, &mut ctx).await.unwrap();
    assert!(outcome.success());

    // POST order must follow the dependency chain DC1 -> FT1 -> DT1.
    let posts: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path().starts_with("/dataservice/template"))
        .map(|r| r.url.path().to_owned())
        .collect();
    assert_eq!(
        posts,
        vec![
            "/dataservice/template/policy/list/site",
            "/dataservice/template/feature",
            "/dataservice/template/device/feature",
        ]
    );

    // The pushed bodies must reference target ids, not source ids.
    let bodies: Vec<Value> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "POST" && r.url.path().starts_with("/dataservice/template"))
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .collect();

    let ft_body = bodies[1].to_string();
    assert!(ft_body.contains(TGT_DC1));
    assert!(!ft_body.contains(SRC_DC1));
    let dt_body = bodies[2].to_string();
    assert!(dt_body.contains(TGT_FT1));
    assert!(!dt_body.contains(SRC_FT1));
    // Controller-assigned item ids are never posted.
    assert!(bodies[0].get("listId").is_none());
    assert!(bodies[2].get("templateId").is_none());
}

#[tokio::test]
async fn restore_without_update_is_idempotent() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    // Target already holds every item by name.
    for (endpoint, body) in [
        (
            "/dataservice/template/policy/list/site",
            json!({"data": [{"listId": TGT_DC1, "name": "DC1"}]}),
        ),
        (
            "/dataservice/template/feature",
            json!({"data": [{"templateId": TGT_FT1, "templateName": "FT1"}]}),
        ),
        (
            "/dataservice/template/device",
            json!({"data": [{"templateId": TGT_DT1, "templateName": "DT1"}]}),
        ),
    ] {
        Mock::given(method("GET"))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;
    }

    let tmp = tempfile::tempdir().unwrap();
    seed_workdir(tmp.path());

    let api = connect(&server).await;
    let mut ctx = TaskContext::default();
    let task = RestoreTask {
        options: RestoreOptions {
            workdir: tmp.path().to_owned(),
            tag: "template_device".into(),
            regex: None,
            dry_run: false,
            update: false,
            attach: false,
            convert_factory_defaults: false,
        },
    };
    let outcome = task.run(&api, &mut ctx).await.unwrap();
    assert!(outcome.success());

    // Zero writes: the only POST on record is the login form.
    let writes = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| {
            matches!(r.method.as_str(), "POST" | "PUT" | "DELETE")
                && r.url.path().starts_with("/dataservice")
        })
        .count();
    assert_eq!(writes, 0);
}

#[tokio::test]
async fn factory_default_dependency_is_converted_and_pushed() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    mock_index_before_after(
        &server,
        "/dataservice/template/policy/list/site",
        json!({"data": [{"listId": TGT_DC1, "name": "Default_List"}]}),
    )
    .await;
    mock_index_before_after(
        &server,
        "/dataservice/template/feature",
        json!({"data": [{"templateId": TGT_FT1, "templateName": "FT1"}]}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/dataservice/template/policy/list/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dataservice/template/feature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    write_json(
        tmp.path(),
        "server_info.json",
        &json!({"server_version": "19.2.1"}),
    );
    write_json(
        tmp.path(),
        "policy_lists/site/index.json",
        &json!({"data": [{"listId": SRC_DC1, "name": "Default_List"}]}),
    );
    write_json(
        tmp.path(),
        "policy_lists/site/Default_List.json",
        &json!({
            "listId": SRC_DC1,
            "name": "Default_List",
            "factoryDefault": true,
            "entries": [],
        }),
    );
    write_json(
        tmp.path(),
        "feature_templates/index.json",
        &json!({"data": [{"templateId": SRC_FT1, "templateName": "FT1"}]}),
    );
    write_json(
        tmp.path(),
        "feature_templates/FT1.json",
        &json!({
            "templateId": SRC_FT1,
            "templateName": "FT1",
            "templateDefinition": {"siteList": {"vipValue": SRC_DC1}},
        }),
    );

    let api = connect(&server).await;
    let mut ctx = TaskContext::default();
    let task = RestoreTask {
        options: RestoreOptions {
            workdir: tmp.path().to_owned(),
            tag: "template_feature".into(),
            regex: None,
            dry_run: false,
            update: false,
            attach: false,
            convert_factory_defaults: false,
        },
    };
    let outcome = task.run(&api, &mut ctx).await.unwrap();

    // The conversion is reported as a warning, and the pushed body carries
    // factoryDefault=false.
    assert!(outcome.warnings >= 1);
    let list_post: Value = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .find(|r| {
            r.method.as_str() == "POST"
                && r.url.path() == "/dataservice/template/policy/list/site"
        })
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .expect("factory default list was not pushed");
    assert_eq!(list_post["factoryDefault"], false);
}

#[tokio::test]
async fn update_triggers_reattach_with_target_values() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/dataservice/template/feature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"templateId": TGT_FT1, "templateName": "FT1"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dataservice/template/device"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{
                "templateId": TGT_DT1,
                "templateName": "DT1",
                "deviceType": "vedge-cloud",
                "devicesAttached": 2,
            }]
        })))
        .mount(&server)
        .await;
    // Target body differs from the backup, so an update PUT is due.
    Mock::given(method("GET"))
        .and(path(format!("/dataservice/template/feature/object/{TGT_FT1}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "templateId": TGT_FT1,
            "templateName": "FT1",
            "templateType": "banner",
            "templateDefinition": {"siteList": {"vipValue": "old-value"}},
        })))
        .mount(&server)
        .await;
    // The PUT response flags affected master templates. Feature template
    // updates return the process document directly (no data envelope --
    // that marks master template updates).
    Mock::given(method("PUT"))
        .and(path(format!("/dataservice/template/feature/{TGT_FT1}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "processId": "proc-1", "masterTemplatesAffected": [TGT_DT1]
        })))
        .mount(&server)
        .await;
    // Re-attach plumbing: attached devices, target-side values, template
    // body (feature-based), attach submission, action status.
    Mock::given(method("GET"))
        .and(path(format!(
            "/dataservice/template/device/config/attached/{TGT_DT1}"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"uuid": "d1", "personality": "vedge"},
                {"uuid": "d2", "personality": "vedge"},
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dataservice/template/device/config/input"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"csv-deviceId": "d1", "csv-deviceIP": "10.0.0.1", "csv-host-name": "edge1"},
                {"csv-deviceId": "d2", "csv-deviceIP": "10.0.0.2", "csv-host-name": "edge2"},
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/dataservice/template/device/object/{TGT_DT1}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "templateId": TGT_DT1,
            "templateName": "DT1",
            "configType": "template",
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dataservice/template/device/config/attachfeature"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "attach-1"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/dataservice/device/action/status/attach-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "summary": {"status": "done"},
            "data": [
                {"status": "Success", "host-name": "edge1", "activity": ["Done"]},
                {"status": "Success", "host-name": "edge2", "activity": ["Done"]},
            ]
        })))
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    write_json(
        tmp.path(),
        "server_info.json",
        &json!({"server_version": "19.2.1"}),
    );
    write_json(
        tmp.path(),
        "feature_templates/index.json",
        &json!({"data": [{"templateId": SRC_FT1, "templateName": "FT1"}]}),
    );
    write_json(
        tmp.path(),
        "feature_templates/FT1.json",
        &json!({
            "templateId": SRC_FT1,
            "templateName": "FT1",
            "templateType": "banner",
            "templateDefinition": {"siteList": {"vipValue": "new-value"}},
        }),
    );

    let api = connect(&server).await;
    let mut ctx = TaskContext::default();
    let task = RestoreTask {
        options: RestoreOptions {
            workdir: tmp.path().to_owned(),
            tag: "template_feature".into(),
            regex: None,
            dry_run: false,
            update: true,
            attach: false,
            convert_factory_defaults: false,
        },
    };
    let outcome = task.run(&api, &mut ctx).await.unwrap();
    assert!(outcome.success(), "outcome: {outcome:?}");

    // The attach request carried both devices with target-side values.
    let attach_body: Value = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .find(|r| r.url.path() == "/dataservice/template/device/config/attachfeature")
        .map(|r| serde_json::from_slice(&r.body).unwrap())
        .unwrap();
    let devices = attach_body["deviceTemplateList"][0]["device"]
        .as_array()
        .unwrap();
    assert_eq!(devices.len(), 2);
    assert_eq!(attach_body["deviceTemplateList"][0]["isEdited"], true);
}

#[tokio::test]
async fn corrupt_kind_index_is_fatal_for_that_kind_only() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    mock_index_before_after(
        &server,
        "/dataservice/template/policy/list/site",
        json!({"data": [{"listId": TGT_DC1, "name": "DC1"}]}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/dataservice/template/policy/list/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    write_json(
        tmp.path(),
        "server_info.json",
        &json!({"server_version": "19.2.1"}),
    );
    write_json(
        tmp.path(),
        "policy_lists/site/index.json",
        &json!({"data": [{"listId": SRC_DC1, "name": "DC1"}]}),
    );
    write_json(
        tmp.path(),
        "policy_lists/site/DC1.json",
        &json!({"listId": SRC_DC1, "name": "DC1", "entries": []}),
    );
    // One kind's index is unreadable JSON: fatal for that kind only.
    write_text(tmp.path(), "feature_templates/index.json", "{ not json");

    let api = connect(&server).await;
    let mut ctx = TaskContext::default();
    let task = RestoreTask {
        options: RestoreOptions {
            workdir: tmp.path().to_owned(),
            tag: "all".into(),
            regex: None,
            dry_run: false,
            update: false,
            attach: false,
            convert_factory_defaults: false,
        },
    };
    let outcome = task.run(&api, &mut ctx).await.unwrap();

    // The corrupt feature template index is tallied, the site list is
    // still pushed (the expect(1) on its POST mock verifies the write).
    assert!(outcome.errors >= 1);
}

#[tokio::test]
async fn rate_limited_create_retries_without_duplicates() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    mock_index_before_after(
        &server,
        "/dataservice/template/policy/list/site",
        json!({"data": [{"listId": TGT_DC1, "name": "DC1"}]}),
    )
    .await;
    // Two 429s, then acceptance.
    Mock::given(method("POST"))
        .and(path("/dataservice/template/policy/list/site"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/dataservice/template/policy/list/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let tmp = tempfile::tempdir().unwrap();
    write_json(
        tmp.path(),
        "server_info.json",
        &json!({"server_version": "19.2.1"}),
    );
    write_json(
        tmp.path(),
        "policy_lists/site/index.json",
        &json!({"data": [{"listId": SRC_DC1, "name": "DC1"}]}),
    );
    write_json(
        tmp.path(),
        "policy_lists/site/DC1.json",
        &json!({"listId": SRC_DC1, "name": "DC1", "entries": []}),
    );

    let api = connect(&server).await;
    let mut ctx = TaskContext::default();
    let task = RestoreTask {
        options: RestoreOptions {
            workdir: tmp.path().to_owned(),
            tag: "policy_list".into(),
            regex: None,
            dry_run: false,
            update: false,
            attach: false,
            convert_factory_defaults: false,
        },
    };
    let outcome = task.run(&api, &mut ctx).await.unwrap();
    assert!(outcome.success());
}

#[tokio::test]
async fn delete_in_use_item_is_logged_and_others_proceed() {
    let server = MockServer::start().await;
    mock_login(&server).await;

    Mock::given(method("GET"))
        .and(path("/dataservice/template/policy/list/site"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                {"listId": TGT_DC1, "name": "DC_BASIC"},
                {"listId": TGT_FT1, "name": "DC_SPARE"},
            ]
        })))
        .mount(&server)
        .await;
    for id in [TGT_DC1, TGT_FT1] {
        Mock::given(method("GET"))
            .and(path(format!("/dataservice/template/policy/list/site/{id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "listId": id, "name": "whatever", "entries": []
            })))
            .mount(&server)
            .await;
    }
    // DC_BASIC is attached: DELETE returns 409. DC_SPARE deletes fine.
    Mock::given(method("DELETE"))
        .and(path(format!("/dataservice/template/policy/list/site/{TGT_DC1}")))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "error": {"message": "List is in use"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path(format!("/dataservice/template/policy/list/site/{TGT_FT1}")))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let api = connect(&server).await;
    let mut ctx = TaskContext::default();
    let task = DeleteTask {
        options: DeleteOptions {
            tag: "policy_list".into(),
            regex: Some("^DC".into()),
            dry_run: false,
            detach: false,
        },
    };
    let outcome = task.run(&api, &mut ctx).await.unwrap();

    // The in-use item surfaces as warnings, not a task failure.
    assert!(outcome.success());
    assert!(outcome.warnings >= 1);
}
