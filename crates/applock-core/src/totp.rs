//! Time-based one-time codes.
//!
//! HOTP (RFC 4226) over HMAC-SHA1 with the counter taken from 30-second Unix
//! time steps (RFC 6238). Every function is a pure function of its inputs;
//! callers supply `now`.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::secret::Secret;

pub const TIME_STEP_SECS: i64 = 30;
pub const CODE_DIGITS: usize = 6;
pub const DEFAULT_SKEW_STEPS: u8 = 1;

/// Returned by [`derive_code`] when the secret cannot be decoded.
pub const FALLBACK_CODE: &str = "000000";

const CODE_MODULUS: u32 = 1_000_000;

type HmacSha1 = Hmac<Sha1>;

/// What a display loop shows: the live code and how long it stays valid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSnapshot {
    pub code: String,
    pub remaining_seconds: u32,
}

pub fn time_step(instant: DateTime<Utc>) -> i64 {
    instant.timestamp().div_euclid(TIME_STEP_SECS)
}

/// Seconds until the code changes, in `1..=30`.
pub fn remaining_seconds(now: DateTime<Utc>) -> u32 {
    (TIME_STEP_SECS - now.timestamp().rem_euclid(TIME_STEP_SECS)) as u32
}

/// RFC 4226 HOTP value before zero padding.
pub fn hotp(key: &[u8], counter: u64) -> u32 {
    let mut mac = HmacSha1::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(&counter.to_be_bytes());
    let digest = mac.finalize().into_bytes();

    let offset = usize::from(digest[19] & 0x0f);
    let truncated = u32::from_be_bytes([
        digest[offset],
        digest[offset + 1],
        digest[offset + 2],
        digest[offset + 3],
    ]);
    (truncated & 0x7fff_ffff) % CODE_MODULUS
}

fn format_code(value: u32) -> String {
    format!("{value:0width$}", width = CODE_DIGITS)
}

fn code_for_key(key: &[u8], step: i64) -> String {
    // pre-epoch steps keep their two's-complement counter bytes
    format_code(hotp(key, step as u64))
}

/// Code for `step`, surfacing a secret that does not decode.
pub fn try_derive_code(secret: &Secret, step: i64) -> Result<String, DecodeError> {
    let key = secret.decode()?;
    Ok(code_for_key(&key, step))
}

/// Code for `step`; a corrupt secret yields [`FALLBACK_CODE`].
pub fn derive_code(secret: &Secret, step: i64) -> String {
    try_derive_code(secret, step).unwrap_or_else(|err| {
        warn!(error = %err, "secret does not decode; showing fallback code");
        FALLBACK_CODE.to_string()
    })
}

pub fn current_code(secret: &Secret, now: DateTime<Utc>) -> String {
    derive_code(secret, time_step(now))
}

pub fn snapshot(secret: &Secret, now: DateTime<Utc>) -> CodeSnapshot {
    CodeSnapshot {
        code: current_code(secret, now),
        remaining_seconds: remaining_seconds(now),
    }
}

/// Exactly six ASCII digits.
pub fn is_well_formed(candidate: &str) -> bool {
    candidate.len() == CODE_DIGITS && candidate.bytes().all(|b| b.is_ascii_digit())
}

/// Accepts the code of the current step or of one step either side.
pub fn verify(secret: &Secret, candidate: &str, now: DateTime<Utc>) -> bool {
    verify_with_drift(secret, candidate, now, DEFAULT_SKEW_STEPS).is_some()
}

/// Returns the step offset that matched, searching `±skew_steps` around the
/// step of `now`. All candidates are derived from the one `now`.
pub fn verify_with_drift(
    secret: &Secret,
    candidate: &str,
    now: DateTime<Utc>,
    skew_steps: u8,
) -> Option<i64> {
    if !is_well_formed(candidate) {
        return None;
    }
    let key = match secret.decode() {
        Ok(key) => key,
        Err(err) => {
            warn!(error = %err, "secret does not decode; rejecting code");
            return None;
        }
    };

    let step = time_step(now);
    let skew = i64::from(skew_steps);
    let mut matched = None;
    for drift in -skew..=skew {
        let expected = code_for_key(&key, step.wrapping_add(drift));
        let equal: bool = expected.as_bytes().ct_eq(candidate.as_bytes()).into();
        if equal && (matched.is_none() || drift == 0) {
            matched = Some(drift);
        }
    }
    if let Some(drift) = matched {
        debug!(drift, "code accepted");
    }
    matched
}
