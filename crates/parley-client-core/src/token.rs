//! Unverified inspection of access-token expiry claims.
//!
//! The client never checks signatures. It only reads `exp` from the payload
//! segment to decide when to refresh.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Value;

/// Refresh this many seconds before the token expires.
pub const REFRESH_LEAD_SECONDS: i64 = 300;

/// Returns the `exp` claim (seconds since epoch) if the token is a
/// three-segment token whose payload decodes to a JSON object with a numeric
/// `exp`.
#[must_use]
pub fn token_expiry(token: &str) -> Option<i64> {
    let mut segments = token.trim().split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };

    let decoded = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    let claims: Value = serde_json::from_slice(&decoded).ok()?;
    let exp = claims.get("exp")?;
    exp.as_i64()
        .or_else(|| exp.as_f64().filter(|value| value.is_finite()).map(|value| value.floor() as i64))
}

/// Seconds left before expiry, or `None` when the token has no valid expiry
/// or has already expired.
#[must_use]
pub fn seconds_until_expiry(token: &str, now_unix: i64) -> Option<i64> {
    let remaining = token_expiry(token)?.saturating_sub(now_unix);
    (remaining > 0).then_some(remaining)
}

/// How long to wait before refreshing proactively. Clamped to zero when the
/// token expires within [`REFRESH_LEAD_SECONDS`].
#[must_use]
pub fn refresh_delay(token: &str, now_unix: i64) -> Option<Duration> {
    let remaining = seconds_until_expiry(token, now_unix)?;
    let delay = remaining.saturating_sub(REFRESH_LEAD_SECONDS).max(0);
    Some(Duration::from_secs(delay as u64))
}

#[must_use]
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub(crate) fn token_with_claims(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.signature")
}
