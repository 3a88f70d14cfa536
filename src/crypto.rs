//! cryptographic primitives shared across the protocol
//!
//! - SHA-256 over domain-separated concatenations
//! - constant-time comparison
//! - hex codec
//! - proof-of-work solve/verify
//! - nullifier and package-hash derivation

use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// generate cryptographically secure random bytes
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// sha256 over a sequence of byte slices, for domain-separated hashing
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
    }
    hasher.finalize().into()
}

/// constant-time equality check for secrets and MACs
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

pub fn hex_encode(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

pub fn hex_decode(s: &str) -> crate::Result<Vec<u8>> {
    Ok(hex::decode(s)?)
}

/// derive a nullifier: SHA-256(secret || utf8(token_id) || be64(timestamp_ms))
///
/// deterministic in (secret, token_id, timestamp); the defining double-spend
/// signal is reuse of this value across distinct spend events of one token.
pub fn derive_nullifier(secret: &[u8], token_id: &str, timestamp_ms: i64) -> [u8; 32] {
    sha256(&[secret, token_id.as_bytes(), &timestamp_ms.to_be_bytes()])
}

/// package hash, the input submitted to the Witness federation for timestamping
pub fn package_hash(token_id: &str, amount: u64, commitment: &[u8], nullifier: &[u8]) -> [u8; 32] {
    sha256(&[
        token_id.as_bytes(),
        &amount.to_be_bytes(),
        commitment,
        nullifier,
    ])
}

/// find the smallest nonce such that SHA-256(challenge || be64(nonce)) has at
/// least `difficulty` leading zero bits. difficulty 0 always succeeds at nonce 0.
pub fn pow_solve(challenge: &[u8], difficulty: u32) -> u64 {
    if difficulty == 0 {
        return 0;
    }
    let mut nonce: u64 = 0;
    loop {
        if leading_zero_bits(&sha256(&[challenge, &nonce.to_be_bytes()])) >= difficulty {
            return nonce;
        }
        nonce += 1;
    }
}

/// recompute and check a proof-of-work solution
pub fn pow_verify(challenge: &[u8], nonce: u64, difficulty: u32) -> bool {
    if difficulty == 0 {
        return true;
    }
    leading_zero_bits(&sha256(&[challenge, &nonce.to_be_bytes()])) >= difficulty
}

fn leading_zero_bits(hash: &[u8; 32]) -> u32 {
    let mut count = 0;
    for byte in hash {
        if *byte == 0 {
            count += 8;
        } else {
            count += byte.leading_zeros();
            break;
        }
    }
    count
}
