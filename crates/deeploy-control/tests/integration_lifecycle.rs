//! Integration tests for the deployment lifecycle: create, update, scale up
//! and delete against an in-memory fleet.

mod common;

use common::{TestDeeploy, JOB_ID, NODES};
use deeploy_control::fleet::{FleetCommand, FleetView};
use deeploy_control::pending::Outcome;
use deeploy_control::{DeeployStatus, UpdateStrategy};
use deeploy_state::KvBackend;
use serde_json::{json, Value};

fn app_id_of(envelope: &deeploy_control::Envelope) -> String {
    envelope.app_id.clone().unwrap()
}

#[tokio::test]
async fn create_confirms_once_nodes_answer() {
    let t = TestDeeploy::new();

    let env = t.create_app(json!({})).await;

    assert_eq!(env.status, DeeployStatus::Success, "{:?}", env.error);
    let app_id = app_id_of(&env);
    assert!(app_id.starts_with("web_"));
    assert_eq!(env.job_id, Some(JOB_ID));

    let app = t.fleet.app(NODES[0].0, &app_id).unwrap();
    assert!(app.pipeline.is_deeployed);
    assert!(app.pipeline.is_owned_by(&t.owner.address));

    let details = env.status_details.unwrap();
    assert_eq!(details.as_object().unwrap().len(), 1);
    assert!(details
        .as_object()
        .unwrap()
        .values()
        .all(|v| v["status"] == "ok"));

    assert_eq!(
        t.ledger.submissions(),
        vec![(JOB_ID, vec![NODES[0].1.to_owned()])]
    );
    assert!(t
        .engine
        .orchestrator()
        .jobs()
        .get(JOB_ID)
        .await
        .unwrap()
        .is_some());
    assert_eq!(t.engine.scheduler().pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn unconfirmable_create_is_delivered_at_once() {
    let t = TestDeeploy::new();
    let body = json!({
        "app_alias": "web",
        "job_id": JOB_ID,
        "target_nodes_count": 1,
        "plugins": common::fixtures::container_plugins(),
        "chainstore_response": false,
    });

    let outcome = t.engine.create_pipeline(t.signed(body)).await;

    let Outcome::Ready(env) = outcome else {
        panic!("expected an immediate answer");
    };
    assert_eq!(env.status, DeeployStatus::CommandDelivered);
    assert!(env.app_id.is_some());
    assert_eq!(t.engine.scheduler().pending_count().await.unwrap(), 0);
    assert_eq!(t.ledger.submissions().len(), 1);
}

#[tokio::test]
async fn silent_nodes_time_out_even_if_they_answer_late() {
    let t = TestDeeploy::silent();
    let body = json!({
        "app_alias": "web",
        "job_id": JOB_ID,
        "target_nodes_count": 1,
        "plugins": common::fixtures::container_plugins(),
        "chainstore_response": true,
    });

    let Outcome::Postponed(pending_id) = t.engine.create_pipeline(t.signed(body)).await else {
        panic!("expected a postponed request");
    };

    t.clock.advance(chrono::Duration::seconds(11));
    let app = t.fleet.apps().await.unwrap().remove(0);
    assert_eq!(app.node, NODES[0].0);
    for (_, key) in app.pipeline.response_keys() {
        t.kv.put(&key, b"\"late\"", None).await.unwrap();
    }

    let Outcome::Ready(env) = t.engine.solve(&pending_id).await else {
        panic!("expected the request to finish");
    };
    assert_eq!(env.status, DeeployStatus::Timeout);
    let pending_keys = &env.status_details.unwrap()["pending_keys"];
    assert_eq!(pending_keys.as_array().unwrap().len(), 1);
    assert!(t.ledger.submissions().is_empty());
}

#[tokio::test]
async fn recreate_update_keeps_the_node_set() {
    let t = TestDeeploy::new();
    let app_id = app_id_of(&t.create_app(json!({})).await);
    t.fleet.clear_commands();

    let body = json!({
        "app_id": app_id,
        "job_id": JOB_ID,
        "plugins": [{
            "signature": "CONTAINER_APP_RUNNER",
            "IMAGE": "nginx:1.27",
            "CONTAINER_RESOURCES": {"cpu": 1, "memory": "512m"},
        }],
        "chainstore_response": true,
    });
    let outcome = t.engine.update_pipeline(t.signed(body)).await;
    let env = t.settle(outcome).await;

    assert_eq!(env.status, DeeployStatus::Success, "{:?}", env.error);
    assert_eq!(
        t.fleet.commands(),
        vec![
            FleetCommand::Stop {
                node: NODES[0].0.to_owned(),
                app_id: app_id.clone(),
            },
            FleetCommand::Start {
                node: NODES[0].0.to_owned(),
                app_id: app_id.clone(),
            },
        ]
    );
    let app = t.fleet.app(NODES[0].0, &app_id).unwrap();
    assert_eq!(app.pipeline.instances()[0].config["IMAGE"], "nginx:1.27");
    // Unchanged node set: only the create was submitted.
    assert_eq!(t.ledger.submissions().len(), 1);
}

#[tokio::test]
async fn update_can_move_the_app_to_other_nodes() {
    let t = TestDeeploy::new();
    let app_id = app_id_of(&t.create_app(json!({})).await);
    t.fleet.clear_commands();

    let body = json!({
        "app_id": app_id,
        "job_id": JOB_ID,
        "target_nodes": [NODES[1].1],
        "plugins": common::fixtures::container_plugins(),
        "chainstore_response": true,
    });
    let outcome = t.engine.update_pipeline(t.signed(body)).await;
    let env = t.settle(outcome).await;

    assert_eq!(env.status, DeeployStatus::Success, "{:?}", env.error);
    assert_eq!(
        t.fleet.commands(),
        vec![
            FleetCommand::Stop {
                node: NODES[0].0.to_owned(),
                app_id: app_id.clone(),
            },
            FleetCommand::Start {
                node: NODES[1].0.to_owned(),
                app_id: app_id.clone(),
            },
        ]
    );
    assert!(t.fleet.app(NODES[0].0, &app_id).is_none());
    assert!(t.fleet.app(NODES[1].0, &app_id).is_some());
    assert_eq!(
        t.ledger.submissions(),
        vec![
            (JOB_ID, vec![NODES[0].1.to_owned()]),
            (JOB_ID, vec![NODES[1].1.to_owned()]),
        ]
    );
}

#[tokio::test]
async fn in_place_update_refreshes_running_nodes() {
    let t = TestDeeploy::with_strategy(UpdateStrategy::InPlace);
    let app_id = app_id_of(&t.create_app(json!({})).await);
    t.fleet.clear_commands();

    let body = json!({
        "app_id": app_id,
        "plugins": common::fixtures::container_plugins(),
        "chainstore_response": true,
    });
    let outcome = t.engine.update_pipeline(t.signed(body)).await;
    let env = t.settle(outcome).await;

    assert_eq!(env.status, DeeployStatus::Success, "{:?}", env.error);
    assert_eq!(env.job_id, Some(JOB_ID));
    assert_eq!(
        t.fleet.commands(),
        vec![FleetCommand::Update {
            node: NODES[0].0.to_owned(),
            app_id,
        }]
    );
}

#[tokio::test]
async fn update_refuses_to_change_the_node_count() {
    let t = TestDeeploy::new();
    let app_id = app_id_of(&t.create_app(json!({})).await);

    let body = json!({
        "app_id": app_id,
        "target_nodes_count": 2,
        "plugins": common::fixtures::container_plugins(),
    });
    let outcome = t.engine.update_pipeline(t.signed(body)).await;
    let env = t.settle(outcome).await;

    assert_eq!(env.status, DeeployStatus::Fail);
    assert!(env.error.unwrap().contains("scale_up_job_workers"));
}

#[tokio::test]
async fn scale_up_adds_the_next_best_node() {
    let t = TestDeeploy::new();
    let app_id = app_id_of(&t.create_app(json!({})).await);
    t.fleet.clear_commands();

    let body = json!({
        "job_id": JOB_ID,
        "target_nodes_count": 1,
        "chainstore_response": true,
    });
    let outcome = t.engine.scale_up_job_workers(t.signed(body)).await;
    let env = t.settle(outcome).await;

    assert_eq!(env.status, DeeployStatus::Success, "{:?}", env.error);
    assert_eq!(env.app_id.as_deref(), Some(app_id.as_str()));
    assert_eq!(
        t.fleet.commands(),
        vec![
            FleetCommand::Update {
                node: NODES[0].0.to_owned(),
                app_id: app_id.clone(),
            },
            FleetCommand::Start {
                node: NODES[1].0.to_owned(),
                app_id: app_id.clone(),
            },
        ]
    );
    assert_eq!(env.status_details.unwrap().as_object().unwrap().len(), 2);
    assert_eq!(
        t.ledger.submissions().last().unwrap(),
        &(JOB_ID, vec![NODES[0].1.to_owned(), NODES[1].1.to_owned()])
    );
}

#[tokio::test]
async fn delete_stops_the_app_everywhere() {
    let t = TestDeeploy::new();
    let app_id = app_id_of(&t.create_app(json!({})).await);

    let env = t
        .engine
        .delete_pipeline(t.signed(json!({"app_id": app_id})))
        .await;

    assert_eq!(env.status, DeeployStatus::Success, "{:?}", env.error);
    let targets = env.request["targets"].as_array().unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0]["node"], NODES[0].0);
    assert!(t.fleet.app(NODES[0].0, &app_id).is_none());
}

#[tokio::test]
async fn deleting_nothing_needs_allow_missing() {
    let t = TestDeeploy::new();

    let env = t
        .engine
        .delete_pipeline(t.signed(json!({"job_id": 99})))
        .await;
    assert_eq!(env.status, DeeployStatus::Fail);
    assert!(env.error.unwrap().starts_with("NODES3"));

    let env = t
        .engine
        .delete_pipeline(t.signed(json!({"job_id": 99, "allow_missing": true})))
        .await;
    assert_eq!(env.status, DeeployStatus::Success);
    assert_eq!(env.request["targets"], json!([]));
}

#[tokio::test]
async fn instance_and_app_commands_reach_the_nodes() {
    let t = TestDeeploy::new();
    let app_id = app_id_of(&t.create_app(json!({})).await);
    let instance = t.fleet.app(NODES[0].0, &app_id).unwrap().pipeline.instances()[0].clone();
    t.fleet.clear_commands();

    let env = t
        .engine
        .send_instance_command(t.signed(json!({
            "app_id": app_id,
            "target_nodes": [NODES[0].1],
            "plugin_signature": "container_app_runner",
            "instance_id": instance.instance_id,
            "instance_command": "RESTART",
        })))
        .await;
    assert_eq!(env.status, DeeployStatus::CommandDelivered, "{:?}", env.error);
    assert_eq!(env.request["target_nodes"], json!([NODES[0].0]));

    let env = t
        .engine
        .send_app_command(t.signed(json!({"job_id": JOB_ID, "app_command": "STOP"})))
        .await;
    assert_eq!(env.status, DeeployStatus::CommandDelivered, "{:?}", env.error);
    assert_eq!(
        env.extra["targets"],
        json!([[NODES[0].0, app_id, "CONTAINER_APP_RUNNER", instance.instance_id]])
    );

    let commands = t.fleet.commands();
    assert_eq!(commands.len(), 2);
    assert!(commands.iter().all(|c| matches!(
        c,
        FleetCommand::Instance { signature, .. } if signature == "CONTAINER_APP_RUNNER"
    )));
}

#[tokio::test]
async fn unknown_instance_is_rejected() {
    let t = TestDeeploy::new();
    let app_id = app_id_of(&t.create_app(json!({})).await);

    let env = t
        .engine
        .send_instance_command(t.signed(json!({
            "app_id": app_id,
            "target_nodes": [NODES[0].0],
            "plugin_signature": "CONTAINER_APP_RUNNER",
            "instance_id": "nope",
            "instance_command": Value::Null,
        })))
        .await;
    assert_eq!(env.status, DeeployStatus::Fail);
    assert!(env.error.unwrap().starts_with("PLUGINS1"));
}
