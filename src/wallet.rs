//! persisted state: keypair, token store, and config, all serde-serializable
//! so an outer CLI/UI (out of scope here) can read and write them to disk
//!
//! Follows `ghettobox::account::Account` for seed-derived keys and
//! `ghettobox::share::Share` for the hex/base64 codec helpers layered on a
//! serde type.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::token::Token;

/// the wallet's long-lived identity: a single seed from which every
/// per-token signing key (`token::TokenKey`) and the holder's spend secret
/// are derived, so only this seed needs to be backed up
pub struct WalletKey {
    seed: [u8; 32],
    signing_key: SigningKey,
}

impl WalletKey {
    pub fn from_seed(seed: [u8; 32]) -> Result<Self> {
        let hk = Hkdf::<Sha256>::new(None, &seed);
        let mut signing_bytes = [0u8; 32];
        hk.expand(b"scarcity:wallet:ed25519:v1", &mut signing_bytes)
            .map_err(|_| Error::InvalidInput("key derivation failed".into()))?;
        Ok(Self {
            seed,
            signing_key: SigningKey::from_bytes(&signing_bytes),
        })
    }

    pub fn generate() -> Self {
        let seed = crate::crypto::random_bytes::<32>();
        Self::from_seed(seed).expect("hkdf expand of fixed-size output cannot fail")
    }

    /// the holder secret mixed into every nullifier this wallet derives;
    /// distinct from the signing key so key rotation and spend-secret
    /// rotation can be reasoned about independently
    pub fn holder_secret(&self) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(None, &self.seed);
        let mut out = [0u8; 32];
        hk.expand(b"scarcity:wallet:holder-secret:v1", &mut out)
            .expect("hkdf expand of fixed-size output cannot fail");
        out
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.public_key().verify(message, signature).is_ok()
    }

    pub fn seed_hex(&self) -> String {
        crate::crypto::hex_encode(&self.seed)
    }

    pub fn from_seed_hex(s: &str) -> Result<Self> {
        let bytes = crate::crypto::hex_decode(s)?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| Error::Malformed("wallet seed must be 32 bytes".into()))?;
        Self::from_seed(seed)
    }
}

/// the set of tokens a wallet currently holds, persisted as a single JSON
/// document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenStore {
    pub tokens: Vec<Token>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, token: Token) {
        self.tokens.push(token);
    }

    pub fn remove(&mut self, token_id: &str) -> Option<Token> {
        let pos = self.tokens.iter().position(|t| t.id == token_id)?;
        Some(self.tokens.remove(pos))
    }

    pub fn total_balance(&self) -> u64 {
        self.tokens.iter().map(|t| t.amount).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_gives_same_identity() {
        let a = WalletKey::from_seed([4u8; 32]).unwrap();
        let b = WalletKey::from_seed([4u8; 32]).unwrap();
        assert_eq!(a.public_key(), b.public_key());
        assert_eq!(a.holder_secret(), b.holder_secret());
    }

    #[test]
    fn different_seeds_give_different_identities() {
        let a = WalletKey::from_seed([4u8; 32]).unwrap();
        let b = WalletKey::from_seed([5u8; 32]).unwrap();
        assert_ne!(a.public_key(), b.public_key());
    }

    #[test]
    fn sign_and_verify_round_trip() {
        let key = WalletKey::generate();
        let sig = key.sign(b"hello");
        assert!(key.verify(b"hello", &sig));
        assert!(!key.verify(b"goodbye", &sig));
    }

    #[test]
    fn seed_hex_round_trips() {
        let key = WalletKey::from_seed([9u8; 32]).unwrap();
        let hex = key.seed_hex();
        let restored = WalletKey::from_seed_hex(&hex).unwrap();
        assert_eq!(key.public_key(), restored.public_key());
    }

    #[test]
    fn token_store_tracks_balance() {
        let mut store = TokenStore::new();
        store.add(crate::token::mint("tok".into(), 30, &[1u8; 32], 0));
        store.add(crate::token::mint("tok".into(), 70, &[1u8; 32], 0));
        assert_eq!(store.total_balance(), 100);
    }

    #[test]
    fn token_store_json_round_trips() {
        let mut store = TokenStore::new();
        store.add(crate::token::mint("tok".into(), 42, &[1u8; 32], 0));
        let json = store.to_json().unwrap();
        let restored = TokenStore::from_json(&json).unwrap();
        assert_eq!(restored.total_balance(), 42);
    }
}
