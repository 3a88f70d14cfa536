//! cross-federation bridge: lock a token in the source federation, then
//! mint its equivalent in the destination federation
//!
//! The two-phase status modeling follows `chain_client::transfers`'
//! `TransferStatus`/`DepositRoute` tagged enums: a `BridgeStatus` tracks the
//! lock/mint handoff the same way that module tracks submit/confirm/
//! in-flight/complete for on-chain deposits.

use serde::{Deserialize, Serialize};

use super::Token;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BridgeStatus {
    /// lock request constructed, not yet submitted to the source federation
    Pending,
    /// source federation has attested the lock
    Locked { lock_attestation_hash: [u8; 32] },
    /// destination federation has minted the bridged token
    Minted { new_token_id: String },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub token: Token,
    pub source_federation: String,
    pub dest_federation: String,
    pub status: BridgeStatus,
}

/// phase 1: lock a token against its source federation, given the
/// attestation hash the Witness federation returned for the lock event
pub fn lock(token: Token, source_federation: String, dest_federation: String) -> BridgeRequest {
    BridgeRequest {
        token,
        source_federation,
        dest_federation,
        status: BridgeStatus::Pending,
    }
}

pub fn confirm_lock(request: &mut BridgeRequest, lock_attestation_hash: [u8; 32]) -> Result<()> {
    match request.status {
        BridgeStatus::Pending => {
            request.status = BridgeStatus::Locked { lock_attestation_hash };
            Ok(())
        }
        _ => Err(Error::InvalidInput("bridge request is not pending".into())),
    }
}

/// phase 2: once the lock is attested, mint the equivalent token under the
/// destination federation's own Freebird issuer
pub fn mint_on_destination(
    request: &mut BridgeRequest,
    dest_freebird_token_b64: String,
    holder_secret: &[u8; 32],
    now_ms: i64,
) -> Result<Token> {
    match &request.status {
        BridgeStatus::Locked { .. } => {
            let minted = super::mint(
                dest_freebird_token_b64,
                request.token.amount,
                holder_secret,
                now_ms,
            );
            request.status = BridgeStatus::Minted {
                new_token_id: minted.id.clone(),
            };
            Ok(minted)
        }
        _ => Err(Error::InvalidInput(
            "bridge request must be locked before minting".into(),
        )),
    }
}

pub fn fail(request: &mut BridgeRequest, error: impl Into<String>) {
    request.status = BridgeStatus::Failed { error: error.into() };
}
