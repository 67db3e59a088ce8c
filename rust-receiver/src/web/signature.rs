//! Webhook signature verification.
//!
//! Callers sign each request with HMAC-SHA256 over a versioned document:
//!
//! ```text
//! X-Request-Timestamp: 1700000000
//! X-Signature: v0=hex(HMAC-SHA256(secret, "v0:1700000000:<raw body>"))
//! ```
//!
//! A request is accepted only if its timestamp lies within the replay window
//! (symmetric, so clock skew into the future is bounded too) and the
//! signature matches under a constant-time comparison.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::debug;

use crate::error::VerifyError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the integer Unix timestamp the caller signed.
pub const TIMESTAMP_HEADER: &str = "x-request-timestamp";

/// Header carrying the `v0=<hex>` signature.
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Default replay window in seconds.
pub const DEFAULT_REPLAY_WINDOW_SECS: u64 = 60;

const SIGNATURE_VERSION: &str = "v0";

/// The signing secret was rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("signing secret must not be empty")]
pub struct InvalidSecret;

/// Verifies signed webhook requests against the process-wide secret.
///
/// The secret is keyed into an HMAC state once; each verification clones
/// that state so nothing is shared between requests.
#[derive(Clone)]
pub struct Verifier {
    keyed: HmacSha256,
    replay_window_secs: u64,
}

impl Verifier {
    /// Create a verifier with the default 60 second replay window.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, InvalidSecret> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(InvalidSecret);
        }
        let keyed = HmacSha256::new_from_slice(secret).map_err(|_| InvalidSecret)?;
        Ok(Self {
            keyed,
            replay_window_secs: DEFAULT_REPLAY_WINDOW_SECS,
        })
    }

    /// Override the replay window.
    pub fn with_replay_window(mut self, secs: u64) -> Self {
        self.replay_window_secs = secs;
        self
    }

    pub fn replay_window_secs(&self) -> u64 {
        self.replay_window_secs
    }

    /// Verify a request's headers and raw body at time `now_secs`.
    ///
    /// Header lookup is case-insensitive. The timestamp is checked before the
    /// signature, so a stale request is reported as `StaleRequest` whether or
    /// not its signature is valid.
    pub fn verify(&self, headers: &HeaderMap, body: &[u8], now_secs: i64) -> Result<(), VerifyError> {
        let timestamp = header_str(headers, TIMESTAMP_HEADER)
            .ok_or(VerifyError::MissingHeader("X-Request-Timestamp"))?;
        let provided = header_str(headers, SIGNATURE_HEADER)
            .ok_or(VerifyError::MissingHeader("X-Signature"))?;

        let signed_at: i64 = timestamp
            .trim()
            .parse()
            .map_err(|_| VerifyError::InvalidTimestamp)?;

        let age_secs = now_secs.abs_diff(signed_at);
        if age_secs > self.replay_window_secs {
            return Err(VerifyError::StaleRequest { age_secs });
        }

        let expected = self.sign(timestamp, body);

        // Length is not secret; `ct_eq` on slices of unequal length is false.
        let valid: bool = expected.as_bytes().ct_eq(provided.as_bytes()).into();
        if !valid {
            debug!(
                expected_length = expected.len(),
                actual_length = provided.len(),
                "signature_mismatch"
            );
            return Err(VerifyError::SignatureMismatch);
        }

        Ok(())
    }

    /// Compute the `v0=<hex>` signature for a timestamp and raw body.
    pub fn sign(&self, timestamp: &str, body: &[u8]) -> String {
        let mut mac = self.keyed.clone();
        mac.update(SIGNATURE_VERSION.as_bytes());
        mac.update(b":");
        mac.update(timestamp.as_bytes());
        mac.update(b":");
        mac.update(body);
        format!("{}={}", SIGNATURE_VERSION, hex::encode(mac.finalize().into_bytes()))
    }
}

impl fmt::Debug for Verifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Verifier")
            .field("secret", &"<redacted>")
            .field("replay_window_secs", &self.replay_window_secs)
            .finish()
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Current Unix time in whole seconds.
pub fn unix_now() -> i64 {
    unix_now_f64() as i64
}

/// Current Unix time in seconds, with fractional part.
pub fn unix_now_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "s3cr3t";
    const BODY: &[u8] = b"text=hello&response_url=http://example/cb";
    const NOW: i64 = 1_700_000_000;

    fn reference_signature(secret: &str, timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        let mut document = format!("v0:{}:", timestamp).into_bytes();
        document.extend_from_slice(body);
        mac.update(&document);
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn signed_headers(timestamp: &str, signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_str(timestamp).unwrap());
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_str(signature).unwrap());
        headers
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert_eq!(Verifier::new("").unwrap_err(), InvalidSecret);
    }

    #[test]
    fn test_sign_matches_reference_hmac() {
        let verifier = Verifier::new(SECRET).unwrap();
        for (ts, body) in [
            ("1700000000", BODY),
            ("0", b"".as_slice()),
            ("1531420618", "text=h\u{e9}llo w\u{f6}rld".as_bytes()),
        ] {
            assert_eq!(verifier.sign(ts, body), reference_signature(SECRET, ts, body));
        }
    }

    #[test]
    fn test_sign_known_answer() {
        let verifier = Verifier::new(SECRET).unwrap();
        let expected = "v0=e708b894342e331ae6eb69c8b9218164cb47d171ff1b539c619de1af6177caeb";
        assert_eq!(verifier.sign("1700000000", BODY), expected);

        let headers = signed_headers("1700000000", expected);
        assert_eq!(verifier.verify(&headers, BODY, NOW + 60), Ok(()));
        assert_eq!(
            verifier.verify(&headers, BODY, NOW + 61),
            Err(VerifyError::StaleRequest { age_secs: 61 })
        );
    }

    #[test]
    fn test_unix_now_agrees_with_fractional_clock() {
        let whole = unix_now();
        let fractional = unix_now_f64();
        assert!(whole > 1_600_000_000);
        assert!((fractional - whole as f64).abs() < 2.0);
    }

    #[test]
    fn test_verify_valid() {
        let verifier = Verifier::new(SECRET).unwrap();
        let ts = NOW.to_string();
        let headers = signed_headers(&ts, &reference_signature(SECRET, &ts, BODY));
        assert_eq!(verifier.verify(&headers, BODY, NOW), Ok(()));
    }

    #[test]
    fn test_verify_header_lookup_is_case_insensitive() {
        let verifier = Verifier::new(SECRET).unwrap();
        let ts = NOW.to_string();
        let signature = verifier.sign(&ts, BODY);

        let mut headers = HeaderMap::new();
        headers.insert("X-REQUEST-TIMESTAMP", HeaderValue::from_str(&ts).unwrap());
        headers.insert("X-Signature", HeaderValue::from_str(&signature).unwrap());

        assert_eq!(verifier.verify(&headers, BODY, NOW), Ok(()));
    }

    #[test]
    fn test_verify_missing_headers() {
        let verifier = Verifier::new(SECRET).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("v0=abc"));
        assert_eq!(
            verifier.verify(&headers, BODY, NOW),
            Err(VerifyError::MissingHeader("X-Request-Timestamp"))
        );

        let mut headers = HeaderMap::new();
        headers.insert(TIMESTAMP_HEADER, HeaderValue::from_static("1700000000"));
        assert_eq!(
            verifier.verify(&headers, BODY, NOW),
            Err(VerifyError::MissingHeader("X-Signature"))
        );
    }

    #[test]
    fn test_verify_invalid_timestamp() {
        let verifier = Verifier::new(SECRET).unwrap();
        for ts in ["not-a-number", "", "17e8", "1700000000.5"] {
            let headers = signed_headers(ts, "v0=abc");
            assert_eq!(
                verifier.verify(&headers, BODY, NOW),
                Err(VerifyError::InvalidTimestamp),
                "timestamp {:?}",
                ts
            );
        }
    }

    #[test]
    fn test_replay_window_boundaries() {
        let verifier = Verifier::new(SECRET).unwrap();

        for offset in [-60, 0, 60] {
            let ts = (NOW + offset).to_string();
            let headers = signed_headers(&ts, &verifier.sign(&ts, BODY));
            assert_eq!(verifier.verify(&headers, BODY, NOW), Ok(()), "offset {}", offset);
        }

        for offset in [-61, 61] {
            let ts = (NOW + offset).to_string();
            let headers = signed_headers(&ts, &verifier.sign(&ts, BODY));
            assert_eq!(
                verifier.verify(&headers, BODY, NOW),
                Err(VerifyError::StaleRequest { age_secs: 61 }),
                "offset {}",
                offset
            );
        }
    }

    #[test]
    fn test_stale_wins_over_bad_signature() {
        let verifier = Verifier::new(SECRET).unwrap();
        let ts = (NOW - 120).to_string();
        let headers = signed_headers(&ts, "v0=garbage");
        assert_eq!(
            verifier.verify(&headers, BODY, NOW),
            Err(VerifyError::StaleRequest { age_secs: 120 })
        );
    }

    #[test]
    fn test_custom_replay_window() {
        let verifier = Verifier::new(SECRET).unwrap().with_replay_window(300);
        let ts = (NOW - 120).to_string();
        let headers = signed_headers(&ts, &verifier.sign(&ts, BODY));
        assert_eq!(verifier.verify(&headers, BODY, NOW), Ok(()));
    }

    #[test]
    fn test_every_flipped_byte_is_rejected() {
        let verifier = Verifier::new(SECRET).unwrap();
        let ts = NOW.to_string();
        let good = verifier.sign(&ts, BODY);

        for position in 0..good.len() {
            let mut bytes = good.clone().into_bytes();
            // Stay inside printable ASCII so the header value stays valid.
            bytes[position] = if bytes[position] == b'0' { b'1' } else { b'0' };
            let flipped = String::from_utf8(bytes).unwrap();

            let headers = signed_headers(&ts, &flipped);
            assert_eq!(
                verifier.verify(&headers, BODY, NOW),
                Err(VerifyError::SignatureMismatch),
                "position {}",
                position
            );
        }
    }

    #[test]
    fn test_truncated_and_extended_signatures_rejected() {
        let verifier = Verifier::new(SECRET).unwrap();
        let ts = NOW.to_string();
        let good = verifier.sign(&ts, BODY);
        let extended = format!("{}0", good);

        for candidate in [&good[..good.len() - 1], extended.as_str(), "", "v0="] {
            let headers = signed_headers(&ts, candidate);
            assert_eq!(
                verifier.verify(&headers, BODY, NOW),
                Err(VerifyError::SignatureMismatch)
            );
        }
    }

    #[test]
    fn test_body_is_bound_to_signature() {
        let verifier = Verifier::new(SECRET).unwrap();
        let ts = NOW.to_string();
        let headers = signed_headers(&ts, &verifier.sign(&ts, BODY));
        assert_eq!(
            verifier.verify(&headers, b"text=goodbye&response_url=http://example/cb", NOW),
            Err(VerifyError::SignatureMismatch)
        );
    }

    #[test]
    fn test_other_secret_rejected() {
        let verifier = Verifier::new(SECRET).unwrap();
        let ts = NOW.to_string();
        let headers = signed_headers(&ts, &reference_signature("other", &ts, BODY));
        assert_eq!(
            verifier.verify(&headers, BODY, NOW),
            Err(VerifyError::SignatureMismatch)
        );
    }

    #[test]
    fn test_debug_redacts_secret() {
        let verifier = Verifier::new(SECRET).unwrap();
        let rendered = format!("{:?}", verifier);
        assert!(!rendered.contains(SECRET));
        assert!(rendered.contains("<redacted>"));
    }
}
