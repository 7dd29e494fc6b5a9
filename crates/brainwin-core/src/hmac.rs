use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::BrainwinError;

type HmacSha256 = Hmac<Sha256>;

/// Maximum age of a signed webhook timestamp before it is treated as a replay.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Compute HMAC-SHA256 over `body` and return the hex-encoded MAC.
pub fn compute_hmac(secret: &[u8], body: &[u8]) -> String {
    let mut mac = keyed(secret);
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex HMAC-SHA256 signature in constant time.
///
/// An invalid hex signature is compared against zeros so the MAC is always
/// computed.
pub fn verify_hmac(secret: &[u8], body: &[u8], signature: &str) -> bool {
    let mut mac = keyed(secret);
    mac.update(body);
    let expected = hex::decode(signature).unwrap_or_else(|_| vec![0u8; 32]);
    mac.verify_slice(&expected).is_ok()
}

fn keyed(secret: &[u8]) -> HmacSha256 {
    // HMAC accepts keys of any length, including empty ones.
    HmacSha256::new_from_slice(secret).unwrap_or_else(|_| unreachable!())
}

fn signed_payload(timestamp: &str, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(timestamp.len() + 1 + payload.len());
    buf.extend_from_slice(timestamp.as_bytes());
    buf.push(b'.');
    buf.extend_from_slice(payload);
    buf
}

/// Build a `t=<ts>,v1=<hex>` header for `payload`.
pub fn sign_webhook_payload(secret: &[u8], timestamp: i64, payload: &[u8]) -> String {
    let ts = timestamp.to_string();
    let sig = compute_hmac(secret, &signed_payload(&ts, payload));
    format!("t={ts},v1={sig}")
}

/// Verify a payment-provider webhook signature header.
///
/// Header format: `t=<unix ts>,v1=<hex hmac>[,v1=<hex hmac>...]`. The MAC
/// covers `"<ts>.<raw payload>"`. Any `v1` entry matching is accepted, and
/// the timestamp must be within [`SIGNATURE_TOLERANCE_SECS`] of `now`.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &[u8],
    now: i64,
) -> Result<(), BrainwinError> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", v)) => timestamp = Some(v),
            Some(("v1", v)) => candidates.push(v),
            _ => {}
        }
    }

    let ts_raw =
        timestamp.ok_or_else(|| BrainwinError::Signature("missing timestamp".to_string()))?;
    if candidates.is_empty() {
        return Err(BrainwinError::Signature("missing v1 signature".to_string()));
    }
    let ts: i64 = ts_raw
        .parse()
        .map_err(|_| BrainwinError::Signature("malformed timestamp".to_string()))?;

    let signed = signed_payload(ts_raw, payload);
    let matched = candidates
        .iter()
        .fold(false, |acc, sig| verify_hmac(secret, &signed, sig) | acc);
    if !matched {
        return Err(BrainwinError::Signature("signature mismatch".to_string()));
    }

    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BrainwinError::Signature(
            "timestamp outside tolerance".to_string(),
        ));
    }
    Ok(())
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        bytes.as_ref().iter().fold(String::new(), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{b:02x}");
            s
        })
    }

    pub fn decode(s: &str) -> Result<Vec<u8>, ()> {
        if s.len() % 2 != 0 || !s.is_ascii() {
            return Err(());
        }
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|_| ()))
            .collect()
    }
}
