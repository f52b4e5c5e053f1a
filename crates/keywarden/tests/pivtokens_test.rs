//! integration tests for the piv token endpoints.
//!
//! exercises the create/refresh idempotence window, field stripping on
//! public routes, the authenticated pin endpoint, delete-with-archive, the
//! immutable-update rule, and the hmac-authenticated replacement flow.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use keywarden_types::Config;

use common::{
    date_header, ed25519_authorization, hmac_authorization, send, test_app, test_app_with,
    test_key, TestKey,
};

const GUID: &str = "97496DD1C8F053DE7450CD854D9C95B4";
const CN_UUID: &str = "15966912-8fad-41cd-bd82-abe6468354b5";

async fn bootstrap_config(app: &axum::Router) {
    let (status, _, _) = send(
        app,
        "POST",
        "/recovery-configurations",
        Some(json!({ "template": "AAAA==" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

fn create_body(key: &TestKey) -> serde_json::Value {
    json!({
        "guid": GUID,
        "cn_uuid": CN_UUID,
        "pin": "123456",
        "pubkeys": serde_json::to_value(&key.pubkeys).unwrap(),
    })
}

/// scenario: create, refresh within the freshness window, refresh after it.
#[tokio::test]
async fn test_create_then_refresh() {
    // one-second freshness window so the test can outlive it
    let config = Config {
        recovery_token_duration_secs: 1,
        ..Config::default()
    };
    let (app, _db) = test_app_with(config).await;
    bootstrap_config(&app).await;
    let key = test_key();

    // first create: anonymous, 201, one born-active recovery token
    let (status, body, _) = send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["guid"].as_str().unwrap(), GUID);
    let tokens = body["recovery_tokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 1);
    assert!(tokens[0]["activated"].is_string());
    let first_uuid = tokens[0]["uuid"].as_str().unwrap().to_string();

    // immediate repeat: authenticated, 200, chain unchanged
    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, body, _) = send(
        &app,
        "POST",
        "/pivtokens",
        Some(create_body(&key)),
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tokens = body["recovery_tokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 1);
    assert_eq!(tokens[0]["uuid"].as_str().unwrap(), first_uuid);

    // repeat after the freshness window: a second token joins the chain,
    // the first entry unchanged
    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, body, _) = send(
        &app,
        "POST",
        "/pivtokens",
        Some(create_body(&key)),
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let tokens = body["recovery_tokens"].as_array().unwrap();
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0]["uuid"].as_str().unwrap(), first_uuid);
    assert!(tokens[0]["activated"].is_string());
}

/// repeat create without a signature is rejected.
#[tokio::test]
async fn test_repeat_create_requires_signature() {
    let (app, _db) = test_app().await;
    bootstrap_config(&app).await;
    let key = test_key();

    send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;

    let (status, body, _) = send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"].as_str().unwrap(), "Unauthorized");
}

/// validation failures come back as one multi-error response.
#[tokio::test]
async fn test_create_collects_field_errors() {
    let (app, _db) = test_app().await;
    bootstrap_config(&app).await;

    let (status, body, _) = send(
        &app,
        "POST",
        "/pivtokens",
        Some(json!({ "guid": "nope", "cn_uuid": "also nope" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"].as_str().unwrap(), "InvalidParameters");
    let errors = body["errors"].as_array().unwrap();
    assert!(errors.len() >= 3, "guid, cn_uuid, pubkeys, pin: {:?}", errors);
}

/// a piv token cannot exist without an active recovery configuration.
#[tokio::test]
async fn test_create_without_active_configuration() {
    let (app, _db) = test_app().await;
    let key = test_key();

    let (status, body, _) = send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"].as_str().unwrap(), "MissingParameter");
}

/// public routes strip the pin and the raw token bodies.
#[tokio::test]
async fn test_public_views_strip_secrets() {
    let (app, _db) = test_app().await;
    bootstrap_config(&app).await;
    let key = test_key();
    send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;

    let (status, body, _) = send(&app, "GET", &format!("/pivtokens/{}", GUID), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("pin").is_none());
    let tokens = body["recovery_tokens"].as_array().unwrap();
    assert!(tokens[0].get("token").is_none());

    let (status, list, _) = send(&app, "GET", "/pivtokens", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(list[0].get("pin").is_none());
}

/// the pin endpoint requires a signature and returns the full record.
#[tokio::test]
async fn test_pin_endpoint() {
    let (app, _db) = test_app().await;
    bootstrap_config(&app).await;
    let key = test_key();
    send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;

    let uri = format!("/pivtokens/{}/pin", GUID);

    let (status, _, _) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, body, _) = send(&app, "GET", &uri, None, Some((&auth, &date))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pin"].as_str().unwrap(), "123456");
    // the full view carries the token body, hex-encoded
    let token_hex = body["recovery_tokens"][0]["token"].as_str().unwrap();
    assert_eq!(token_hex.len(), 80);
}

/// only cn_uuid is mutable; anything else is an invalid update.
#[tokio::test]
async fn test_update_cn_uuid_only() {
    let (app, _db) = test_app().await;
    bootstrap_config(&app).await;
    let key = test_key();
    send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;

    let uri = format!("/pivtokens/{}", GUID);
    let new_cn = "57665ad2-bd09-4f22-8199-a6eed5a55e6c";

    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, body, _) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({ "cn_uuid": new_cn })),
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cn_uuid"].as_str().unwrap(), new_cn);

    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, body, _) = send(
        &app,
        "PUT",
        &uri,
        Some(json!({ "model": "Yubikey 5" })),
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"].as_str().unwrap(), "InvalidUpdate");
}

/// delete requires a signature, archives the token, and cascades to its
/// recovery tokens.
#[tokio::test]
async fn test_delete_archives() {
    let (app, db) = test_app().await;
    bootstrap_config(&app).await;
    let key = test_key();
    send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;

    let uri = format!("/pivtokens/{}", GUID);

    let (status, _, _) = send(&app, "DELETE", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, _, _) = send(&app, "DELETE", &uri, None, Some((&auth, &date))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _, _) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // exactly one history row remains
    use keywarden_db::Database;
    let guid: keywarden_types::Guid = GUID.parse().unwrap();
    let history = db.list_pivtoken_history(&guid).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].recovery_tokens.len(), 1);
}

/// replacement is authenticated by hmac with the newest recovery token and
/// atomically swaps the tokens.
#[tokio::test]
async fn test_replace_flow() {
    let (app, db) = test_app().await;
    bootstrap_config(&app).await;
    let key = test_key();
    send(&app, "POST", "/pivtokens", Some(create_body(&key)), None).await;

    // fetch the recovery token body through the pin endpoint
    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (_, full, _) = send(
        &app,
        "GET",
        &format!("/pivtokens/{}/pin", GUID),
        None,
        Some((&auth, &date)),
    )
    .await;
    let token_hex = full["recovery_tokens"][0]["token"]
        .as_str()
        .unwrap()
        .to_string();

    let new_key = test_key();
    let new_guid = "1263BAE0D9B271CC2E3B2BEE4A4F8E4A";
    let body = json!({
        "guid": new_guid,
        "cn_uuid": CN_UUID,
        "pin": "654321",
        "pubkeys": serde_json::to_value(&new_key.pubkeys).unwrap(),
    });

    // an asymmetric signature is not accepted on the replace route
    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, _, _) = send(
        &app,
        "POST",
        &format!("/pivtokens/{}/replace", GUID),
        Some(body.clone()),
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let date = date_header();
    let auth = hmac_authorization(&token_hex, GUID, &date);
    let (status, created, _) = send(
        &app,
        "POST",
        &format!("/pivtokens/{}/replace", GUID),
        Some(body),
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["guid"].as_str().unwrap(), new_guid);
    assert_eq!(created["cn_uuid"].as_str().unwrap(), CN_UUID);

    // the replaced token is archived and gone
    let (status, _, _) = send(&app, "GET", &format!("/pivtokens/{}", GUID), None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    use keywarden_db::Database;
    let old_guid: keywarden_types::Guid = GUID.parse().unwrap();
    assert_eq!(db.list_pivtoken_history(&old_guid).await.unwrap().len(), 1);
}
