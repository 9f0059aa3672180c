// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Short-lived bearer tokens for the `GET|PUT /fs/{r2-key}` route (spec §6).
//!
//! `fs.authorize` mints one of these over the RPC channel; the token itself
//! carries its own claim (`r2Key`, `expiresAtMs`) plus a keyed hash so the
//! HTTP route can verify it without a lookup table. Same shape as the
//! gateway's own connect-time bearer check (`connection::ConnCtx` handshake
//! in `handlers::connect`): a secret known only to this process, a
//! constant-time comparison, nothing persisted.

use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use subtle::ConstantTimeEq;

/// Process-lifetime signing secret. Tokens do not survive a restart, which
/// is fine — they are minted with a five-minute default TTL (spec §6
/// `fs.authorize`) and re-mintable on demand.
fn signing_key() -> &'static [u8; 32] {
    static KEY: OnceLock<[u8; 32]> = OnceLock::new();
    KEY.get_or_init(|| {
        use rand::RngCore;
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        key
    })
}

fn sign(r2_key: &str, expires_at_ms: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(signing_key());
    hasher.update(r2_key.as_bytes());
    hasher.update(b":");
    hasher.update(expires_at_ms.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Mints `{r2Key}.{expiresAtMs}.{signature}`, the token `fs_authorize`
/// returns to the caller.
pub fn mint_fs_token(r2_key: &str, expires_at_ms: i64) -> String {
    let sig = sign(r2_key, expires_at_ms);
    format!("{r2_key}.{expires_at_ms}.{sig}")
}

/// Verifies a token presented to `GET|PUT /fs/{r2-key}`: the signature must
/// match, the key in the token must match the requested key exactly, and
/// `now_ms` must be before the embedded expiry.
pub fn verify_fs_token(token: &str, requested_key: &str, now_ms: i64) -> bool {
    let mut parts = token.rsplitn(3, '.');
    let (Some(sig), Some(expires_at_str), Some(r2_key)) = (parts.next(), parts.next(), parts.next()) else {
        return false;
    };
    let Ok(expires_at_ms) = expires_at_str.parse::<i64>() else { return false };
    if r2_key != requested_key || now_ms >= expires_at_ms {
        return false;
    }
    let expected = sign(r2_key, expires_at_ms);
    expected.as_bytes().ct_eq(sig.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_freshly_minted_token_verifies_against_its_own_key() {
        let token = mint_fs_token("uploads/a.txt", 10_000);
        assert!(verify_fs_token(&token, "uploads/a.txt", 1_000));
    }

    #[test]
    fn an_expired_token_is_rejected() {
        let token = mint_fs_token("uploads/a.txt", 10_000);
        assert!(!verify_fs_token(&token, "uploads/a.txt", 10_000));
    }

    #[test]
    fn a_token_minted_for_one_key_does_not_verify_another() {
        let token = mint_fs_token("uploads/a.txt", 10_000);
        assert!(!verify_fs_token(&token, "uploads/b.txt", 1_000));
    }

    #[test]
    fn a_tampered_signature_is_rejected() {
        let mut token = mint_fs_token("uploads/a.txt", 10_000);
        token.push('0');
        assert!(!verify_fs_token(&token, "uploads/a.txt", 1_000));
    }
}
