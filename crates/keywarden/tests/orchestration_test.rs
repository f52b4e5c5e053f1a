//! end-to-end orchestration: http api driving the fsm, the transitioner
//! worker fanning out to a mock node agent, and the auto-expiry sweep
//! retiring the superseded configuration.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use keywarden::node_agent::MockNodeAgent;
use keywarden::transitioner::Transitioner;
use keywarden_db::Database;
use keywarden_types::Config;

use common::{send, test_app_with, test_key};

const CNS: [&str; 3] = [
    "15966912-8fad-41cd-bd82-abe6468354b5",
    "57665ad2-bd09-4f22-8199-a6eed5a55e6c",
    "89b25a1a-8c25-4b8c-b7f1-a3c1a0a9f97e",
];

/// stage then activate a second configuration across a three-node fleet.
#[tokio::test]
async fn test_stage_activate_happy_path() {
    let config = Config::default();
    let (app, db) = test_app_with(config.clone()).await;
    let agent = MockNodeAgent::new();
    let worker = Transitioner::new(db.clone(), agent.clone(), &config);

    // bootstrap configuration c1, then a three-node fleet under it
    let (_, c1, _) = send(
        &app,
        "POST",
        "/recovery-configurations",
        Some(json!({ "template": "AAAA==" })),
        None,
    )
    .await;
    let c1_uuid = c1["uuid"].as_str().unwrap().to_string();

    for (i, cn) in CNS.iter().enumerate() {
        let key = test_key();
        let (status, _, _) = send(
            &app,
            "POST",
            "/pivtokens",
            Some(json!({
                "guid": format!("{:032X}", i + 1),
                "cn_uuid": cn,
                "pin": "123456",
                "pubkeys": serde_json::to_value(&key.pubkeys).unwrap(),
            })),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // install and stage c2
    let (_, c2, _) = send(
        &app,
        "POST",
        "/recovery-configurations",
        Some(json!({ "template": "BBBB==" })),
        None,
    )
    .await;
    let c2_uuid = c2["uuid"].as_str().unwrap().to_string();

    let (status, _, _) = send(
        &app,
        "PUT",
        &format!("/recovery-configurations/{}?action=stage", c2_uuid),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(worker.run_once().await.unwrap());

    let (_, c2_now, _) = send(
        &app,
        "GET",
        &format!("/recovery-configurations/{}", c2_uuid),
        None,
        None,
    )
    .await;
    assert_eq!(c2_now["state"].as_str().unwrap(), "staged");

    // the fleet distribution shows a staged token on every node
    let (_, distribution, _) = send(
        &app,
        "GET",
        &format!("/recovery-configurations/{}/recovery-tokens", c2_uuid),
        None,
        None,
    )
    .await;
    let entries = distribution.as_array().unwrap();
    assert_eq!(entries.len(), 3);
    for entry in entries {
        assert!(entry["staged"].is_string());
        assert!(entry.get("activated").is_none());
        assert!(entry["cn_uuid"].is_string());
    }
    assert_eq!(agent.submitted().len(), 3);

    // activate c2
    let (status, _, _) = send(
        &app,
        "PUT",
        &format!("/recovery-configurations/{}?action=activate", c2_uuid),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    assert!(worker.run_once().await.unwrap());

    let (_, c2_now, _) = send(
        &app,
        "GET",
        &format!("/recovery-configurations/{}", c2_uuid),
        None,
        None,
    )
    .await;
    assert_eq!(c2_now["state"].as_str().unwrap(), "active");

    // c1's tokens were expired by the activation; the sweep retired c1
    let (_, c1_now, _) = send(
        &app,
        "GET",
        &format!("/recovery-configurations/{}", c1_uuid),
        None,
        None,
    )
    .await;
    assert_eq!(c1_now["state"].as_str().unwrap(), "expired");

    let c1_id: uuid::Uuid = c1_uuid.parse().unwrap();
    for token in db.list_recovery_tokens_for_configuration(c1_id).await.unwrap() {
        assert!(token.is_expired());
    }

    // the watch endpoint reports both finished transitions
    for name in ["stage", "activate"] {
        let (status, t, _) = send(
            &app,
            "GET",
            &format!(
                "/recovery-configurations/{}?action=watch&transition={}",
                c2_uuid, name
            ),
            None,
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(t["finished"].is_string());
        assert_eq!(t["completed"].as_array().unwrap().len(), 3);
        assert!(t["errs"].as_array().unwrap().is_empty());
    }
}

/// a failing node blocks the configuration from advancing; re-issuing the
/// action drives only the failed node.
#[tokio::test]
async fn test_partial_failure_and_retry() {
    let config = Config::default();
    let (app, db) = test_app_with(config.clone()).await;
    let agent = MockNodeAgent::new();
    let worker = Transitioner::new(db.clone(), agent.clone(), &config);

    send(
        &app,
        "POST",
        "/recovery-configurations",
        Some(json!({ "template": "AAAA==" })),
        None,
    )
    .await;

    for (i, cn) in CNS.iter().enumerate() {
        let key = test_key();
        send(
            &app,
            "POST",
            "/pivtokens",
            Some(json!({
                "guid": format!("{:032X}", i + 1),
                "cn_uuid": cn,
                "pin": "123456",
                "pubkeys": serde_json::to_value(&key.pubkeys).unwrap(),
            })),
            None,
        )
        .await;
    }

    let (_, c2, _) = send(
        &app,
        "POST",
        "/recovery-configurations",
        Some(json!({ "template": "BBBB==" })),
        None,
    )
    .await;
    let c2_uuid = c2["uuid"].as_str().unwrap().to_string();

    let bad_cn: uuid::Uuid = CNS[1].parse().unwrap();
    agent.fail_cn(bad_cn, "node agent unreachable");

    send(
        &app,
        "PUT",
        &format!("/recovery-configurations/{}?action=stage", c2_uuid),
        None,
        None,
    )
    .await;
    worker.run_once().await.unwrap();

    // the transition finished with one structured error; no advance
    let (_, t, _) = send(
        &app,
        "GET",
        &format!(
            "/recovery-configurations/{}?action=watch&transition=stage",
            c2_uuid
        ),
        None,
        None,
    )
    .await;
    assert!(t["finished"].is_string());
    assert_eq!(t["completed"].as_array().unwrap().len(), 3);
    let errs = t["errs"].as_array().unwrap();
    assert_eq!(errs.len(), 1);
    assert_eq!(errs[0]["cn_uuid"].as_str().unwrap(), CNS[1]);

    let (_, c2_now, _) = send(
        &app,
        "GET",
        &format!("/recovery-configurations/{}", c2_uuid),
        None,
        None,
    )
    .await;
    assert_eq!(c2_now["state"].as_str().unwrap(), "created");

    // heal the node and retry: only the failed target is re-driven
    agent.clear_failures();
    let before = agent.submitted().len();

    let (status, _, _) = send(
        &app,
        "PUT",
        &format!("/recovery-configurations/{}?action=stage", c2_uuid),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    worker.run_once().await.unwrap();

    assert_eq!(agent.submitted().len() - before, 1);
    assert_eq!(agent.submitted().last().unwrap().0, bad_cn);

    let (_, c2_now, _) = send(
        &app,
        "GET",
        &format!("/recovery-configurations/{}", c2_uuid),
        None,
        None,
    )
    .await;
    assert_eq!(c2_now["state"].as_str().unwrap(), "staged");
}
