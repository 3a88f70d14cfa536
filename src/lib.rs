//! # scarcity
//!
//! serverless, privacy-preserving value transfer.
//!
//! three independently-untrusted subsystems combine to let bearer tokens
//! move between holders without a ledger:
//!
//! ```text
//! ┌──────────────┐     blind/finalize      ┌──────────────┐
//! │ token holder │ ───────────────────────▶│   freebird   │
//! └──────┬───────┘                          │   issuers    │
//!        │ spend nullifier                   └──────────────┘
//!        ▼
//! ┌──────────────┐      package hash        ┌──────────────┐
//! │   gossip     │◀────────────────────────▶│   witness    │
//! │    peers     │      timestamp quorum     │  federation  │
//! └──────┬───────┘                          └──────────────┘
//!        │ peer tally
//!        ▼
//! ┌──────────────┐
//! │  validator   │  fast / standard / deep confidence tiers
//! └──────────────┘
//! ```
//!
//! nullifier gossip (epidemic broadcast) plus threshold-signed timestamp
//! attestation (Witness) stand in for a blockchain's double-spend
//! prevention; blinded VOPRF-issued tokens (Freebird) stand in for its
//! anonymity set. no component alone needs to be trusted; the validator's
//! tiers let a recipient choose how much confirmation to wait for.
//!
//! ## usage
//!
//! ```rust,ignore
//! use scarcity::{wallet::WalletKey, token};
//!
//! let wallet = WalletKey::generate();
//! let mut token = token::mint("freebird-token-b64".into(), 100, &wallet.holder_secret(), 0);
//! let spend = engine.transfer(&mut token, &recipient_pubkey, &wallet.holder_secret(), 1_000).await?;
//! ```

pub mod bls;
pub mod config;
pub mod crypto;
pub mod error;
pub mod freebird;
pub mod gossip;
pub mod harness;
pub mod token;
pub mod transport;
pub mod validator;
pub mod voprf;
pub mod wallet;
pub mod witness;

pub use error::{Error, Result};
pub use token::Token;
pub use wallet::WalletKey;

#[cfg(feature = "software")]
pub use gossip::GossipCore;
