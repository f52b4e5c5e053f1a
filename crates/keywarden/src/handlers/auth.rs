//! http-signature authentication for piv token routes.
//!
//! requests from a compute node are signed by the node's hardware token:
//! either an asymmetric signature with the token's 9e key (rsa / ecdsa /
//! ed25519), or an hmac keyed with the piv token's newest unexpired recovery
//! token (the replacement flow, where the old 9e key is gone). an operator
//! admin key, when configured, is accepted as a fallback for asymmetric
//! signatures.
//!
//! ## Authentication Flow
//!
//! 1. Extract `Authorization: Signature keyId=...,algorithm=...,signature=...`
//! 2. Build the signing string from the named request headers (default `date`)
//! 3. Select the key: newest unexpired recovery token for `hmac-*`, the
//!    token's 9e public key otherwise
//! 4. Verify; on asymmetric failure retry against the admin key
//! 5. Any failure is a plain 401 - no detail leaks to the caller

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;

use keywarden_db::Database;
use keywarden_types::{PivToken, newest_unexpired_token};

use crate::AppState;
use super::error::ApiError;

/// a parsed http-signature with its reconstructed signing string.
#[derive(Debug, Clone)]
pub struct HttpSignature {
    /// the keyId parameter, informational.
    pub key_id: String,
    /// signature algorithm ("rsa-sha256", "hmac-sha256", "ed25519", ...).
    pub algorithm: String,
    /// decoded signature bytes.
    pub signature: Vec<u8>,
    /// the string that was signed, rebuilt from the request headers.
    pub signing_string: String,
}

impl HttpSignature {
    /// whether the algorithm family is hmac.
    pub fn is_hmac(&self) -> bool {
        self.algorithm.starts_with("hmac-")
    }
}

/// extractor for an optional http-signature.
///
/// absent header extracts to `None` (the create route decides whether that
/// is acceptable); a present but malformed header is rejected outright.
pub struct OptionalSignature(pub Option<HttpSignature>);

impl<S: Send + Sync> FromRequestParts<S> for OptionalSignature {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(Self(None));
        };
        let header = header
            .to_str()
            .map_err(|_| ApiError::unauthorized("invalid Authorization header"))?;

        let Some(params) = header.strip_prefix("Signature ") else {
            return Err(ApiError::unauthorized(
                "Authorization scheme must be Signature",
            ));
        };

        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;
        for pair in params.split(',') {
            let Some((k, v)) = pair.split_once('=') else {
                continue;
            };
            let v = v.trim().trim_matches('"');
            match k.trim() {
                "keyId" => key_id = Some(v.to_string()),
                "algorithm" => algorithm = Some(v.to_string()),
                "headers" => headers = Some(v.to_string()),
                "signature" => signature = Some(v.to_string()),
                _ => {} // unknown parameters are ignored
            }
        }

        let algorithm =
            algorithm.ok_or_else(|| ApiError::unauthorized("signature missing algorithm"))?;
        let signature = signature
            .and_then(|s| BASE64.decode(s).ok())
            .ok_or_else(|| ApiError::unauthorized("signature is not valid base64"))?;

        // rebuild the signing string from the named headers; `date` when
        // the signature does not name any
        let names = headers.unwrap_or_else(|| "date".to_string());
        let mut lines = Vec::new();
        for name in names.split_ascii_whitespace() {
            if name == "(request-target)" {
                lines.push(format!(
                    "(request-target): {} {}",
                    parts.method.as_str().to_lowercase(),
                    parts.uri.path()
                ));
                continue;
            }
            let value = parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .ok_or_else(|| {
                    ApiError::unauthorized(format!("signed header {} missing", name))
                })?;
            lines.push(format!("{}: {}", name, value));
        }

        Ok(Self(Some(HttpSignature {
            key_id: key_id.unwrap_or_default(),
            algorithm,
            signature,
            signing_string: lines.join("\n"),
        })))
    }
}

/// how a request ended up authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// asymmetric signature against the token's 9e key.
    TokenKey,
    /// hmac against the newest unexpired recovery token.
    RecoveryToken,
    /// asymmetric signature against the configured admin key.
    AdminKey,
}

/// authenticate a request against a loaded piv token.
pub async fn authenticate(
    state: &AppState,
    piv: &PivToken,
    sig: Option<&HttpSignature>,
) -> Result<AuthMethod, ApiError> {
    let Some(sig) = sig else {
        return Err(ApiError::unauthorized("signature required"));
    };

    if sig.is_hmac() {
        return authenticate_hmac(state, piv, Some(sig)).await;
    }

    let key = piv.pubkeys.auth_key().map_err(ApiError::internal)?;
    if verify_signature_with_key(&key, sig) {
        return Ok(AuthMethod::TokenKey);
    }

    if let Some(admin) = &state.admin_key
        && verify_signature_with_key(admin, sig)
    {
        return Ok(AuthMethod::AdminKey);
    }

    Err(ApiError::unauthorized("signature verification failed"))
}

/// authenticate a request that must be hmac-signed with the piv token's
/// newest unexpired recovery token (the replacement flow).
pub async fn authenticate_hmac(
    state: &AppState,
    piv: &PivToken,
    sig: Option<&HttpSignature>,
) -> Result<AuthMethod, ApiError> {
    let Some(sig) = sig else {
        return Err(ApiError::unauthorized("signature required"));
    };
    if !sig.is_hmac() {
        return Err(ApiError::unauthorized("hmac signature required"));
    }

    let tokens = state
        .db
        .list_recovery_tokens_for_pivtoken(&piv.guid)
        .await?;
    // key selection is by created ordering over unexpired tokens, never by
    // storage position; with every token expired there is no valid key
    let Some(token) = newest_unexpired_token(&tokens) else {
        return Err(ApiError::unauthorized("no usable recovery token"));
    };

    if verify_hmac(&token.token, sig) {
        Ok(AuthMethod::RecoveryToken)
    } else {
        Err(ApiError::unauthorized("signature verification failed"))
    }
}

/// verify an asymmetric http-signature against an openssh public key.
pub fn verify_signature_with_key(key: &ssh_key::PublicKey, sig: &HttpSignature) -> bool {
    use ssh_key::public::KeyData;

    let msg = sig.signing_string.as_bytes();
    match key.key_data() {
        KeyData::Rsa(rsa_key) => verify_rsa(rsa_key, &sig.algorithm, msg, &sig.signature),
        KeyData::Ecdsa(ecdsa_key) => {
            sig.algorithm == "ecdsa-sha256" && verify_p256(ecdsa_key, msg, &sig.signature)
        }
        KeyData::Ed25519(ed_key) => {
            sig.algorithm.starts_with("ed25519") && verify_ed25519(ed_key, msg, &sig.signature)
        }
        _ => false,
    }
}

fn verify_rsa(
    key: &ssh_key::public::RsaPublicKey,
    algorithm: &str,
    msg: &[u8],
    sig: &[u8],
) -> bool {
    use rsa::signature::Verifier;

    let (Some(n), Some(e)) = (key.n.as_positive_bytes(), key.e.as_positive_bytes()) else {
        return false;
    };
    let Ok(key) = rsa::RsaPublicKey::new(
        rsa::BigUint::from_bytes_be(n),
        rsa::BigUint::from_bytes_be(e),
    ) else {
        return false;
    };
    let Ok(sig) = rsa::pkcs1v15::Signature::try_from(sig) else {
        return false;
    };
    match algorithm {
        "rsa-sha256" => rsa::pkcs1v15::VerifyingKey::<Sha256>::new(key)
            .verify(msg, &sig)
            .is_ok(),
        "rsa-sha512" => rsa::pkcs1v15::VerifyingKey::<Sha512>::new(key)
            .verify(msg, &sig)
            .is_ok(),
        _ => false,
    }
}

fn verify_p256(key: &ssh_key::public::EcdsaPublicKey, msg: &[u8], sig: &[u8]) -> bool {
    use p256::ecdsa::signature::Verifier;

    let ssh_key::public::EcdsaPublicKey::NistP256(point) = key else {
        return false;
    };
    let Ok(key) = p256::ecdsa::VerifyingKey::from_sec1_bytes(point.as_bytes()) else {
        return false;
    };
    // signers emit either asn.1 der or the fixed 64-byte form
    let Ok(sig) = p256::ecdsa::Signature::from_der(sig)
        .or_else(|_| p256::ecdsa::Signature::from_slice(sig))
    else {
        return false;
    };
    key.verify(msg, &sig).is_ok()
}

fn verify_ed25519(key: &ssh_key::public::Ed25519PublicKey, msg: &[u8], sig: &[u8]) -> bool {
    use ed25519_dalek::Verifier;

    let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(&key.0) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::from_slice(sig) else {
        return false;
    };
    key.verify(msg, &sig).is_ok()
}

/// verify an hmac http-signature keyed with a recovery token body.
pub fn verify_hmac(key: &[u8], sig: &HttpSignature) -> bool {
    match sig.algorithm.as_str() {
        "hmac-sha256" => {
            let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(key) else {
                return false;
            };
            mac.update(sig.signing_string.as_bytes());
            let computed = mac.finalize().into_bytes();
            computed.as_slice().ct_eq(&sig.signature).into()
        }
        "hmac-sha512" => {
            let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(key) else {
                return false;
            };
            mac.update(sig.signing_string.as_bytes());
            let computed = mac.finalize().into_bytes();
            computed.as_slice().ct_eq(&sig.signature).into()
        }
        _ => false,
    }
}
