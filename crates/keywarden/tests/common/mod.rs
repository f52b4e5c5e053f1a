//! shared helpers for keywarden integration tests.

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use ed25519_dalek::Signer;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tower::ServiceExt;

use keywarden::create_app;
use keywarden_db::KeywardenDb;
use keywarden_types::{Config, Pubkeys};

/// build an app over a fresh in-memory database.
pub async fn test_app() -> (Router, KeywardenDb) {
    test_app_with(Config::default()).await
}

/// build an app with a custom config.
pub async fn test_app_with(config: Config) -> (Router, KeywardenDb) {
    let db = KeywardenDb::new_in_memory()
        .await
        .expect("failed to create in-memory database");
    let app = create_app(db.clone(), config).await;
    (app, db)
}

/// an ed25519 keypair with its openssh-format 9e record.
pub struct TestKey {
    pub signing: ed25519_dalek::SigningKey,
    pub pubkeys: Pubkeys,
}

/// generate a keypair whose public half can be registered as a 9e key.
pub fn test_key() -> TestKey {
    let signing = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
    let public = ssh_key::PublicKey::from(ssh_key::public::KeyData::Ed25519(
        ssh_key::public::Ed25519PublicKey(signing.verifying_key().to_bytes()),
    ));
    TestKey {
        signing,
        pubkeys: Pubkeys {
            slot_9a: None,
            slot_9d: None,
            slot_9e: public.to_openssh().expect("encode public key"),
        },
    }
}

/// a date header value for signing.
pub fn date_header() -> String {
    Utc::now().to_rfc2822()
}

/// authorization header for an ed25519 signature over the date header.
pub fn ed25519_authorization(key: &TestKey, guid: &str, date: &str) -> String {
    let signature = key.signing.sign(format!("date: {}", date).as_bytes());
    format!(
        "Signature keyId=\"/pivtokens/{}\",algorithm=\"ed25519\",headers=\"date\",signature=\"{}\"",
        guid,
        BASE64.encode(signature.to_bytes())
    )
}

/// authorization header for an hmac-sha256 signature keyed with a recovery
/// token body (hex as returned by the pin endpoint).
pub fn hmac_authorization(token_hex: &str, guid: &str, date: &str) -> String {
    let key = hex::decode(token_hex).expect("token hex");
    let mut mac = Hmac::<Sha256>::new_from_slice(&key).expect("hmac key");
    mac.update(format!("date: {}", date).as_bytes());
    let tag = mac.finalize().into_bytes();
    format!(
        "Signature keyId=\"/pivtokens/{}\",algorithm=\"hmac-sha256\",headers=\"date\",signature=\"{}\"",
        guid,
        BASE64.encode(tag)
    )
}

/// send a request and return (status, parsed body, response headers).
pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    authorization: Option<(&str, &str)>,
) -> (StatusCode, Value, axum::http::HeaderMap) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some((auth, date)) = authorization {
        builder = builder
            .header(header::AUTHORIZATION, auth)
            .header("date", date);
    }
    let request = match body {
        Some(value) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(value.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("failed to build request");

    let response = app.clone().oneshot(request).await.expect("request failed");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, body, headers)
}
