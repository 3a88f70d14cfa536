//! error taxonomy for scarcity

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("double-spend detected: nullifier already seen ({0})")]
    DoubleSpend(String),

    #[error("token expired: age exceeds max_token_age_ms")]
    Expired,

    #[error("invalid attestation: {0}")]
    InvalidAttestation(String),

    #[error("invalid DLEQ proof from issuer {issuer}")]
    InvalidDleq { issuer: String },

    #[error("insufficient confidence: {confidence} < {required}")]
    InsufficientConfidence { confidence: f64, required: f64 },

    #[error("external service unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("rate limited")]
    RateLimited,

    #[error("token already spent")]
    AlreadySpent,

    #[error("{0}")]
    InvalidInput(String),

    #[error("not enough shares or parties: have {have}, need {need}")]
    NotEnoughParties { have: usize, need: usize },

    #[error("amounts do not conserve value: expected {expected}, got {got}")]
    AmountMismatch { expected: u64, got: u64 },

    #[error("htlc condition not satisfied: {0}")]
    HtlcConditionFailed(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[cfg(feature = "network")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("hex decode error: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("not connected")]
    NotConnected,

    #[error("connect timeout exceeded")]
    ConnectTimeout,
}
