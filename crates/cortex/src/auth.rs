//! HMAC-signed auth tokens gating the admin/inspection HTTP surface.
//!
//! A token is `base64url(canonical_json(claims)) + "." + base64url(hmac)`.
//! The HMAC covers the base64url-encoded body text, not the raw claims
//! bytes, so verification never needs to re-canonicalize untrusted input
//! before checking the signature.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::audit::canonical_json;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub scope: Vec<String>,
    pub iat: u64,
    pub exp: u64,
    pub nonce: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed token: expected exactly one '.' separator")]
    Malformed,
    #[error("invalid base64 in token")]
    InvalidBase64,
    #[error("invalid claims JSON")]
    InvalidClaims,
    #[error("signature mismatch")]
    BadSignature,
    #[error("token expired at {exp}, now {now}")]
    Expired { exp: u64, now: u64 },
    #[error("audience mismatch: expected {expected}, got {actual}")]
    WrongAudience { expected: String, actual: String },
}

/// Sign `claims` with `secret`, producing the two-part token text.
pub fn sign(claims: &Claims, secret: &[u8]) -> String {
    let body = URL_SAFE_NO_PAD.encode(canonical_json(claims));
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    let sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    format!("{body}.{sig}")
}

/// Verify `token` against `secret`, `expected_aud`, and the current unix
/// time in seconds. Returns the decoded claims on success.
pub fn verify(token: &str, secret: &[u8], expected_aud: &str, now_unix_s: u64) -> Result<Claims, AuthError> {
    let mut parts = token.splitn(2, '.');
    let (body, sig) = match (parts.next(), parts.next(), parts.next()) {
        (Some(body), Some(sig), None) => (body, sig),
        _ => return Err(AuthError::Malformed),
    };

    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts keys of any length");
    mac.update(body.as_bytes());
    let expected_sig = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    if expected_sig.len() != sig.len() || !constant_time_eq(expected_sig.as_bytes(), sig.as_bytes()) {
        return Err(AuthError::BadSignature);
    }

    let claims_bytes = URL_SAFE_NO_PAD.decode(body).map_err(|_| AuthError::InvalidBase64)?;
    let claims: Claims = serde_json::from_slice(&claims_bytes).map_err(|_| AuthError::InvalidClaims)?;

    if claims.exp <= now_unix_s {
        return Err(AuthError::Expired { exp: claims.exp, now: now_unix_s });
    }
    if claims.aud != expected_aud {
        return Err(AuthError::WrongAudience { expected: expected_aud.to_string(), actual: claims.aud });
    }

    Ok(claims)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
