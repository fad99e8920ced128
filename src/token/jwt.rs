//! Embedded expiry claim extraction.
//!
//! Only the payload segment is decoded; the signature is not verified. The
//! claim is used for scheduling, never for trust decisions.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    exp: Option<serde_json::Value>,
}

/// Returns the `exp` claim of a three-part JWT as an absolute time.
///
/// Returns `None` for anything that is not a JWT, has no `exp`, or whose
/// `exp` is not a number of seconds since the epoch.
pub fn expiry_claim(token: &str) -> Option<DateTime<Utc>> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    // Some issuers pad their segments
    let payload = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&payload).ok()?;

    let seconds = match claims.exp? {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?,
        serde_json::Value::String(s) => s.trim().parse::<i64>().ok()?,
        _ => return None,
    };

    DateTime::from_timestamp(seconds, 0)
}
