//! Capture request authentication
//!
//! Capture callers authenticate with a pre-shared secret rather than a
//! session: the request carries a unix timestamp and an HMAC-SHA256 over
//! `timestamp || body`. Requests outside the replay window are rejected
//! even when the MAC itself is valid.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a claimed capture signature.
///
/// Pure function of its inputs plus the caller-supplied current time, so
/// clock-skew cases are testable without a real clock. Returns accept or
/// reject only; the caller decides the response.
pub fn verify(
    secret: &str,
    signature: Option<&str>,
    timestamp: Option<&str>,
    body: &[u8],
    now: i64,
    window_secs: i64,
) -> bool {
    let (Some(signature), Some(timestamp)) = (signature, timestamp) else {
        return false;
    };

    let Ok(ts) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - ts).abs() > window_secs {
        return false;
    }

    let Ok(claimed) = hex::decode(signature) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(body);

    // verify_slice is constant-time; never compare digests with ==
    mac.verify_slice(&claimed).is_ok()
}

/// Produce the hex signature a well-behaved caller sends.
pub fn sign(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.as_bytes());
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "s3cret";
    const WINDOW: i64 = 300;

    #[test]
    fn accepts_valid_signature() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let body = br#"{"service":"ssh"}"#;
        let sig = sign(SECRET, &ts, body);
        assert!(verify(SECRET, Some(&sig), Some(&ts), body, now, WINDOW));
    }

    #[test]
    fn accepts_empty_body() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let sig = sign(SECRET, &ts, b"");
        assert!(verify(SECRET, Some(&sig), Some(&ts), b"", now, WINDOW));
    }

    #[test]
    fn accepts_skew_inside_window() {
        let now = 1_700_000_000;
        let ts = (now - 299).to_string();
        let body = b"{}";
        let sig = sign(SECRET, &ts, body);
        assert!(verify(SECRET, Some(&sig), Some(&ts), body, now, WINDOW));
    }

    #[test]
    fn rejects_missing_headers() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let sig = sign(SECRET, &ts, b"{}");
        assert!(!verify(SECRET, None, Some(&ts), b"{}", now, WINDOW));
        assert!(!verify(SECRET, Some(&sig), None, b"{}", now, WINDOW));
        assert!(!verify(SECRET, None, None, b"{}", now, WINDOW));
    }

    #[test]
    fn rejects_non_numeric_timestamp() {
        let now = 1_700_000_000;
        let sig = sign(SECRET, "yesterday", b"{}");
        assert!(!verify(SECRET, Some(&sig), Some("yesterday"), b"{}", now, WINDOW));
    }

    #[test]
    fn rejects_expired_timestamp() {
        // 400 seconds of skew, both directions, with an otherwise valid MAC
        let now = 1_700_000_000;
        for ts in [now - 400, now + 400] {
            let ts = ts.to_string();
            let body = br#"{"service":"ssh"}"#;
            let sig = sign(SECRET, &ts, body);
            assert!(!verify(SECRET, Some(&sig), Some(&ts), body, now, WINDOW));
        }
    }

    #[test]
    fn rejects_tampered_body() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let body = br#"{"service":"ssh"}"#.to_vec();
        let sig = sign(SECRET, &ts, &body);

        // Flipping any single byte must invalidate the signature
        for i in 0..body.len() {
            let mut tampered = body.clone();
            tampered[i] ^= 0x01;
            assert!(
                !verify(SECRET, Some(&sig), Some(&ts), &tampered, now, WINDOW),
                "tampered byte {} was accepted",
                i
            );
        }
    }

    #[test]
    fn rejects_wrong_secret() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        let sig = sign("other-secret", &ts, b"{}");
        assert!(!verify(SECRET, Some(&sig), Some(&ts), b"{}", now, WINDOW));
    }

    #[test]
    fn rejects_malformed_hex() {
        let now = 1_700_000_000;
        let ts = now.to_string();
        assert!(!verify(SECRET, Some("not-hex!"), Some(&ts), b"{}", now, WINDOW));
    }
}
