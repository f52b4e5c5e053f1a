//! integration tests for request authentication.
//!
//! the interesting property is hmac key selection: always the newest
//! recovery token by `created` whose `expired` is unset, never storage
//! order, and never an expired token.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use keywarden_types::Config;

use common::{
    date_header, ed25519_authorization, hmac_authorization, send, test_app, test_app_with,
    test_key,
};

const GUID: &str = "97496DD1C8F053DE7450CD854D9C95B4";
const CN_UUID: &str = "15966912-8fad-41cd-bd82-abe6468354b5";

async fn provision(app: &axum::Router, key: &common::TestKey) {
    let (status, _, _) = send(
        app,
        "POST",
        "/recovery-configurations",
        Some(json!({ "template": "AAAA==" })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _, _) = send(
        app,
        "POST",
        "/pivtokens",
        Some(json!({
            "guid": GUID,
            "cn_uuid": CN_UUID,
            "pin": "123456",
            "pubkeys": serde_json::to_value(&key.pubkeys).unwrap(),
        })),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn token_bodies(app: &axum::Router, key: &common::TestKey) -> Vec<(String, String)> {
    let date = date_header();
    let auth = ed25519_authorization(key, GUID, &date);
    let (status, full, _) = send(
        app,
        "GET",
        &format!("/pivtokens/{}/pin", GUID),
        None,
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    full["recovery_tokens"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| {
            (
                t["uuid"].as_str().unwrap().to_string(),
                t["token"].as_str().unwrap().to_string(),
            )
        })
        .collect()
}

/// a non-signature authorization scheme is rejected outright.
#[tokio::test]
async fn test_bearer_scheme_rejected() {
    let (app, _db) = test_app().await;
    let key = test_key();
    provision(&app, &key).await;

    let date = date_header();
    let (status, _, _) = send(
        &app,
        "GET",
        &format!("/pivtokens/{}/pin", GUID),
        None,
        Some(("Bearer abc123", &date)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// a signature from the wrong key fails even if well-formed.
#[tokio::test]
async fn test_wrong_key_rejected() {
    let (app, _db) = test_app().await;
    let key = test_key();
    provision(&app, &key).await;

    let other = test_key();
    let date = date_header();
    let auth = ed25519_authorization(&other, GUID, &date);
    let (status, _, _) = send(
        &app,
        "GET",
        &format!("/pivtokens/{}/pin", GUID),
        None,
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

/// hmac verification uses the newest unexpired token by created ordering.
#[tokio::test]
async fn test_hmac_uses_newest_unexpired_token() {
    // widen nothing: a fresh second token must be mintable right away
    let config = Config {
        recovery_token_duration_secs: 0,
        ..Config::default()
    };
    let (app, _db) = test_app_with(config).await;
    let key = test_key();
    provision(&app, &key).await;

    // append a second recovery token to the chain
    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, _, _) = send(
        &app,
        "POST",
        &format!("/pivtokens/{}/recovery-tokens", GUID),
        Some(json!({})),
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let bodies = token_bodies(&app, &key).await;
    assert_eq!(bodies.len(), 2);
    let (_, old_hex) = bodies[0].clone();
    let (_, new_hex) = bodies[1].clone();
    assert_ne!(old_hex, new_hex);

    let uri = format!("/pivtokens/{}/pin", GUID);

    // the newest token verifies
    let date = date_header();
    let auth = hmac_authorization(&new_hex, GUID, &date);
    let (status, _, _) = send(&app, "GET", &uri, None, Some((&auth, &date))).await;
    assert_eq!(status, StatusCode::OK);

    // the stale one does not
    let date = date_header();
    let auth = hmac_authorization(&old_hex, GUID, &date);
    let (status, _, _) = send(&app, "GET", &uri, None, Some((&auth, &date))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // expire the newest token: selection falls back to the older sibling
    let bodies = token_bodies(&app, &key).await;
    let newest_uuid = bodies[1].0.clone();
    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, _, _) = send(
        &app,
        "PUT",
        &format!("/pivtokens/{}/recovery-tokens/{}", GUID, newest_uuid),
        Some(json!({ "expired": chrono::Utc::now().to_rfc3339() })),
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let date = date_header();
    let auth = hmac_authorization(&new_hex, GUID, &date);
    let (status, _, _) = send(&app, "GET", &uri, None, Some((&auth, &date))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "expired token is not a key");

    let date = date_header();
    let auth = hmac_authorization(&old_hex, GUID, &date);
    let (status, _, _) = send(&app, "GET", &uri, None, Some((&auth, &date))).await;
    assert_eq!(status, StatusCode::OK, "falls back to older unexpired token");
}

/// the configured admin key is accepted when per-token verification fails.
#[tokio::test]
async fn test_admin_key_fallback() {
    let admin = test_key();
    let config = Config {
        admin_authorized_key: Some(admin.pubkeys.slot_9e.clone()),
        ..Config::default()
    };
    let (app, _db) = test_app_with(config).await;
    let key = test_key();
    provision(&app, &key).await;

    let date = date_header();
    let auth = ed25519_authorization(&admin, GUID, &date);
    let (status, body, _) = send(
        &app,
        "GET",
        &format!("/pivtokens/{}/pin", GUID),
        None,
        Some((&auth, &date)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pin"].as_str().unwrap(), "123456");
}

/// recovery-token routes require authentication too.
#[tokio::test]
async fn test_recovery_token_routes_authenticated() {
    let (app, _db) = test_app().await;
    let key = test_key();
    provision(&app, &key).await;

    let uri = format!("/pivtokens/{}/recovery-tokens", GUID);
    let (status, _, _) = send(&app, "GET", &uri, None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let date = date_header();
    let auth = ed25519_authorization(&key, GUID, &date);
    let (status, body, _) = send(&app, "GET", &uri, None, Some((&auth, &date))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
}
