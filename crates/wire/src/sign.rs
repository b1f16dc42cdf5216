// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request signing for runner↔gateway traffic.
//!
//! A signed request is HMAC-SHA256 over the newline-joined tuple
//! `UPPER(method) \n path \n hex(sha256(body)) \n timestamp \n nonce \n
//! run_id \n capability_token` (absent fields sign as empty strings), keyed
//! by the deployment-wide shared secret. Signatures travel as lowercase hex
//! in `X-Signature`; verification is constant-time via `ring::hmac::verify`.

use rand::RngCore;
use ring::{digest, hmac};

/// Minimum accepted length of the shared secret, in bytes.
pub const MIN_SECRET_LEN: usize = 32;

/// Default tolerated clock skew between signer and verifier, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 300;

/// Default nonce retention window, in seconds. Must be at least the skew
/// tolerance or a replayed request could outlive its nonce record.
pub const DEFAULT_NONCE_EXPIRY_SECS: i64 = 600;

pub const HEADER_TIMESTAMP: &str = "x-timestamp";
pub const HEADER_NONCE: &str = "x-nonce";
pub const HEADER_SIGNATURE: &str = "x-signature";
pub const HEADER_RUN_ID: &str = "x-run-id";
pub const HEADER_CAPABILITY_TOKEN: &str = "x-capability-token";

/// The field tuple bound by a request signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedRequest<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub body: &'a [u8],
    /// Unix seconds at signing time.
    pub timestamp: i64,
    pub nonce: &'a str,
    /// Empty for requests not scoped to a run.
    pub run_id: &'a str,
    /// Empty for requests not scoped to a run.
    pub capability_token: &'a str,
}

/// Hex SHA-256 of a request body.
pub fn body_sha256_hex(body: &[u8]) -> String {
    hex_encode(digest::digest(&digest::SHA256, body).as_ref())
}

/// The canonical byte string a signature covers.
fn canonical_message(req: &SignedRequest<'_>) -> Vec<u8> {
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}\n{}",
        req.method.to_uppercase(),
        req.path,
        body_sha256_hex(req.body),
        req.timestamp,
        req.nonce,
        req.run_id,
        req.capability_token,
    )
    .into_bytes()
}

/// Sign a request tuple, returning the lowercase-hex signature.
pub fn sign(secret: &[u8], req: &SignedRequest<'_>) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hex_encode(hmac::sign(&key, &canonical_message(req)).as_ref())
}

/// Verify a hex signature against a request tuple in constant time.
///
/// Returns `false` for malformed hex rather than erroring — a garbled
/// signature is indistinguishable from a wrong one to the caller.
pub fn verify(secret: &[u8], req: &SignedRequest<'_>, signature_hex: &str) -> bool {
    let Some(sig) = hex_decode(signature_hex) else {
        return false;
    };
    let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
    hmac::verify(&key, &canonical_message(req), &sig).is_ok()
}

/// Whether a signed timestamp is within the skew window around `now`.
pub fn timestamp_in_window(timestamp: i64, now: i64, skew_secs: i64) -> bool {
    (now - timestamp).abs() <= skew_secs
}

/// Constant-time equality for tokens and other short secrets.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    ring::constant_time::verify_slices_are_equal(a, b).is_ok()
}

/// Generate a single-use request nonce (16 random bytes, hex).
pub fn generate_nonce() -> String {
    random_hex(16)
}

/// Generate a per-run capability token (32 random bytes, hex).
pub fn generate_capability_token() -> String {
    random_hex(32)
}

/// Generate an ephemeral signing secret (32 random bytes, hex).
///
/// Used when no `HMAC_SECRET` is configured; runners must then be launched
/// with the generated value, so this is a dev-only convenience.
pub fn generate_secret() -> String {
    random_hex(32)
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::rng().fill_bytes(&mut bytes);
    hex_encode(&bytes)
}

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Lowercase hex encoding.
pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from(HEX[(b >> 4) as usize]));
        out.push(char::from(HEX[(b & 0xf) as usize]));
    }
    out
}

/// Decode lowercase or uppercase hex; `None` on odd length or bad digits.
pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    let digits = s.as_bytes();
    let mut out = Vec::with_capacity(digits.len() / 2);
    for pair in digits.chunks_exact(2) {
        let hi = hex_val(pair[0])?;
        let lo = hex_val(pair[1])?;
        out.push((hi << 4) | lo);
    }
    Some(out)
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
#[path = "sign_tests.rs"]
mod tests;
