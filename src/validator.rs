//! tiered probabilistic transfer validator
//!
//! Structured as a staged gate-then-score pipeline, the same shape
//! `ghettobox::protocol::Ghettobox::recover` uses (load → check rate limit →
//! verify commitment → verify tag → recover), generalized here to the five
//! sequential checks the standard tier runs before scoring confidence.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::gossip::GossipCore;
use crate::transport::PeerTransport;
use crate::witness::{Attestation, WitnessClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationTier {
    /// local-only: age check plus whatever gossip tally is already cached
    Fast,
    /// runs every rejecting gate, then scores confidence against the floor
    Standard,
    /// additionally requires a verified Witness attestation
    Deep,
}

#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    pub max_token_age_ms: i64,
    /// how long `validate_standard` waits before rechecking gossip
    /// propagation if the first confidence read falls short
    pub wait_time_ms: i64,
    pub min_confidence: f64,
    /// how many hops deep the Witness federation's own attestation chain is
    /// assumed to reach, feeding the time-independent half of the
    /// confidence score
    pub federation_depth: u32,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_token_age_ms: crate::gossip::DEFAULT_MAX_NULLIFIER_AGE_MS,
            wait_time_ms: 5_000,
            min_confidence: 0.7,
            federation_depth: 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ValidationResult {
    pub valid: bool,
    pub confidence: f64,
    pub tier: ValidationTier,
}

pub struct TransferValidator<T: PeerTransport> {
    config: ValidatorConfig,
    gossip: Arc<GossipCore<T>>,
    witness: Arc<WitnessClient>,
    federation_pubkeys: Vec<[u8; 48]>,
}

impl<T: PeerTransport> TransferValidator<T> {
    pub fn new(
        config: ValidatorConfig,
        gossip: Arc<GossipCore<T>>,
        witness: Arc<WitnessClient>,
        federation_pubkeys: Vec<[u8; 48]>,
    ) -> Self {
        Self {
            config,
            gossip,
            witness,
            federation_pubkeys,
        }
    }

    /// three-term confidence score: peer corroboration (capped at 0.5),
    /// federation depth (capped at 0.3), and propagation wait elapsed
    /// (capped at 0.2) — sums to at most 1.0
    fn confidence(&self, peer_tally: u32, wait_elapsed_ms: i64) -> f64 {
        let peer_score = (peer_tally as f64 / 10.0).min(0.5);
        let witness_score = (self.config.federation_depth as f64 / 3.0).min(0.3);
        let time_score = (wait_elapsed_ms as f64 / 10_000.0).min(0.2);
        peer_score + witness_score + time_score
    }

    /// gate common to every tier: reject tokens whose claimed age already
    /// exceeds the configured maximum ("lazy demurrage")
    fn check_age(&self, token_timestamp_ms: i64, now_ms: i64) -> Result<()> {
        if now_ms.saturating_sub(token_timestamp_ms) > self.config.max_token_age_ms {
            return Err(Error::Expired);
        }
        Ok(())
    }

    /// fast tier: age gate plus whatever tally is already cached locally, no
    /// network round-trip, no rejecting double-spend gates
    pub async fn validate_fast(
        &self,
        nullifier: &[u8; 32],
        token_timestamp_ms: i64,
        now_ms: i64,
    ) -> Result<ValidationResult> {
        self.check_age(token_timestamp_ms, now_ms)?;
        let peer_tally = self.gossip.peer_tally(nullifier).await.unwrap_or(0);
        let confidence = self.confidence(peer_tally, 0);
        Ok(ValidationResult {
            valid: confidence >= self.config.min_confidence,
            confidence,
            tier: ValidationTier::Fast,
        })
    }

    /// gossip tier: many peers already reporting this nullifier is the
    /// convergence signal for a spend that happened elsewhere, so a high
    /// ratio rejects rather than boosts confidence
    async fn gossip_tier_rejects(&self, nullifier: &[u8; 32]) -> bool {
        self.gossip.check_nullifier(nullifier).await > 0.5
    }

    /// federation tier: the Witness federation itself already has a record
    /// of this nullifier being spent
    async fn federation_tier_rejects(&self, nullifier: &[u8; 32]) -> bool {
        #[cfg(feature = "network")]
        {
            return self.witness.check_nullifier(*nullifier).await > 0.0;
        }
        #[cfg(not(feature = "network"))]
        {
            let _ = nullifier;
            false
        }
    }

    /// attestation tier: the proof accompanying this transfer must itself
    /// verify, or the transfer is rejected outright
    async fn attestation_tier_rejects(&self, proof: &Attestation, now_ms: i64) -> bool {
        !self
            .witness
            .verify(proof, &self.federation_pubkeys, now_ms)
            .await
            .unwrap_or(false)
    }

    /// standard tier: runs the gossip, federation, and attestation
    /// rejection gates in order; any one rejecting returns `valid: false`
    /// immediately. If none reject but the scored confidence still falls
    /// short of `min_confidence`, waits `wait_time_ms` for further gossip
    /// propagation and rechecks once before reporting final confidence.
    pub async fn validate_standard(
        &self,
        nullifier: &[u8; 32],
        proof: &Attestation,
        token_timestamp_ms: i64,
        now_ms: i64,
    ) -> Result<ValidationResult> {
        self.check_age(token_timestamp_ms, now_ms)?;

        if self.gossip_tier_rejects(nullifier).await {
            return Ok(ValidationResult {
                valid: false,
                confidence: 0.0,
                tier: ValidationTier::Standard,
            });
        }
        if self.federation_tier_rejects(nullifier).await {
            return Ok(ValidationResult {
                valid: false,
                confidence: 0.0,
                tier: ValidationTier::Standard,
            });
        }
        if self.attestation_tier_rejects(proof, now_ms).await {
            return Ok(ValidationResult {
                valid: false,
                confidence: 0.0,
                tier: ValidationTier::Standard,
            });
        }

        let peer_tally = self.gossip.peer_tally(nullifier).await.unwrap_or(0);
        let mut confidence = self.confidence(peer_tally, 0);

        if confidence < self.config.min_confidence {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.wait_time_ms as u64)).await;
            let peer_tally = self.gossip.peer_tally(nullifier).await.unwrap_or(0);
            confidence = self.confidence(peer_tally, self.config.wait_time_ms);
        }

        Ok(ValidationResult {
            valid: confidence >= self.config.min_confidence,
            confidence,
            tier: ValidationTier::Standard,
        })
    }

    /// deep tier: standard gates plus a locally-verified Witness
    /// attestation against known federation public keys, independent of
    /// whatever gateway the standard tier's `verify` call reached
    pub async fn validate_deep(
        &self,
        nullifier: &[u8; 32],
        proof: &Attestation,
        token_timestamp_ms: i64,
        now_ms: i64,
    ) -> Result<ValidationResult> {
        let standard = self.validate_standard(nullifier, proof, token_timestamp_ms, now_ms).await?;
        if !standard.valid {
            return Ok(ValidationResult {
                tier: ValidationTier::Deep,
                ..standard
            });
        }
        let verified = crate::witness::verify_locally(proof, &self.federation_pubkeys).unwrap_or(false);
        Ok(ValidationResult {
            valid: standard.valid && verified,
            confidence: standard.confidence,
            tier: ValidationTier::Deep,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::PeerId;
    use crate::witness::WitnessClient;
    use async_trait::async_trait;

    struct NullTransport {
        peers: usize,
    }

    #[async_trait]
    impl PeerTransport for NullTransport {
        async fn send(&self, _to: &PeerId, _payload: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn broadcast(&self, _payload: Vec<u8>) -> Result<()> {
            Ok(())
        }
        fn peer_count(&self) -> usize {
            self.peers
        }
        fn peers(&self) -> Vec<PeerId> {
            vec![]
        }
    }

    fn sample_proof(now_ms: i64) -> Attestation {
        Attestation::Aggregated {
            package_hash: [0u8; 32],
            timestamp_ms: now_ms,
            signature: [0u8; 96],
            signer_pubkeys: vec![[0u8; 48], [1u8; 48]],
            raw: None,
        }
    }

    fn validator(peers: usize) -> (TransferValidator<NullTransport>, Arc<GossipCore<NullTransport>>) {
        let witness = Arc::new(WitnessClient::new(vec![], 0));
        let gossip = Arc::new(GossipCore::new(
            crate::gossip::GossipConfig::default(),
            Arc::new(NullTransport { peers }),
            witness.clone(),
            vec![],
        ));
        let validator = TransferValidator::new(ValidatorConfig::default(), gossip.clone(), witness, vec![]);
        (validator, gossip)
    }

    #[tokio::test]
    async fn expired_token_rejected_at_fast_tier() {
        let (v, _gossip) = validator(1);
        let result = v.validate_fast(&[1u8; 32], 0, crate::gossip::DEFAULT_MAX_NULLIFIER_AGE_MS + 1).await;
        assert!(matches!(result, Err(Error::Expired)));
    }

    #[tokio::test]
    async fn standard_tier_rejects_when_gossip_tally_exceeds_half_of_peers() {
        let (v, gossip) = validator(2);
        let nullifier = [5u8; 32];
        gossip
            .receive(&PeerId("p1".into()), nullifier, sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        gossip
            .receive(&PeerId("p2".into()), nullifier, sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        // peer_count()==2, tally==2 -> ratio 1.0 > 0.5, gossip tier rejects
        let result = v.validate_standard(&nullifier, &sample_proof(1_000), 1_000, 1_000).await.unwrap();
        assert!(!result.valid);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn standard_tier_rejects_when_attestation_fails_to_verify() {
        let (v, _gossip) = validator(10);
        let weak_proof = Attestation::Aggregated {
            package_hash: [0u8; 32],
            timestamp_ms: 1_000,
            signature: [0u8; 96],
            signer_pubkeys: vec![[0u8; 48]],
            raw: None,
        };
        let result = v.validate_standard(&[9u8; 32], &weak_proof, 1_000, 1_000).await.unwrap();
        assert!(!result.valid);
    }

    #[tokio::test]
    async fn standard_tier_passes_with_enough_peer_confirmations() {
        let (v, gossip) = validator(10);
        let nullifier = [6u8; 32];
        for i in 0..4u8 {
            gossip
                .receive(&PeerId(format!("p{i}")), nullifier, sample_proof(1_000), None, 1_000)
                .await
                .unwrap();
        }
        let result = v.validate_standard(&nullifier, &sample_proof(1_000), 1_000, 1_000).await.unwrap();
        assert!(result.confidence >= 0.6);
    }

    #[test]
    fn confidence_formula_sums_to_at_most_one() {
        let witness = Arc::new(WitnessClient::new(vec![], 0));
        let gossip = Arc::new(GossipCore::new(
            crate::gossip::GossipConfig::default(),
            Arc::new(NullTransport { peers: 1 }),
            witness.clone(),
            vec![],
        ));
        let v = TransferValidator::new(ValidatorConfig::default(), gossip, witness, vec![]);
        assert_eq!(v.confidence(100, 100_000), 1.0);
        assert_eq!(v.confidence(0, 0), 0.3); // federation_depth term alone
    }
}
