//! nullifier gossip core: epidemic broadcast of spend nullifiers with
//! per-peer rate limiting, peer reputation, and bounded-retention pruning
//!
//! The peer-set/channel/tracing shape follows
//! `zeratul_p2p::gossip::GossipNetwork`; the `Arc<RwLock<HashMap<...>>>`
//! in-memory table plus rate-limit bookkeeping follows
//! `ghettobox::realm::software::SoftwareRealm`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::{PeerId, PeerTransport};
use crate::witness::{Attestation, WitnessClient};

/// the near-1.5-year figure kept verbatim rather than silently "corrected":
/// it documents a deliberately generous demurrage-adjacent retention
/// window, not a bug.
pub const DEFAULT_MAX_NULLIFIER_AGE_MS: i64 = 24 * 24 * 24 * 3600 * 1000;

#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// how long a nullifier stays in the seen-set before `prune` evicts it
    pub max_nullifier_age_ms: i64,
    /// hard cap on the seen-set; once exceeded the oldest entries by
    /// `first_seen_ms` are evicted, on insert and again during `prune`
    pub max_nullifiers: usize,
    /// how many peers to rebroadcast a newly-seen nullifier to
    pub rebroadcast_fanout: usize,
    /// minimum number of distinct /24-style subnets to fan out across, when
    /// peer subnet tags are available, to resist eclipse by a single AS
    pub min_subnet_diversity: usize,
    /// reputation score at or below which a peer is disconnected and its
    /// stats purged
    pub peer_score_threshold: i32,
    /// clock-skew tolerance: a claimed timestamp this far in the future is
    /// rejected
    pub max_timestamp_future_s: i64,
    /// when true, messages without an ownership proof are rejected
    pub require_ownership_proof: bool,
    /// leaky-bucket refill rate and burst capacity, per peer
    pub rate_limit_per_sec: f64,
    pub rate_limit_burst: f64,
    /// how often `prune` is expected to run
    pub prune_interval: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            max_nullifier_age_ms: DEFAULT_MAX_NULLIFIER_AGE_MS,
            max_nullifiers: 100_000,
            rebroadcast_fanout: 6,
            min_subnet_diversity: 2,
            peer_score_threshold: -50,
            max_timestamp_future_s: 5,
            require_ownership_proof: false,
            rate_limit_per_sec: 10.0,
            rate_limit_burst: 20.0,
            prune_interval: Duration::from_secs(3_600),
        }
    }
}

#[derive(Debug, Clone)]
struct NullifierRecord {
    proof: Attestation,
    first_seen_ms: i64,
    peer_count: u32,
    seen_from: HashSet<PeerId>,
}

struct LeakyBucket {
    tokens: f64,
    last_refill: Instant,
}

impl LeakyBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self, capacity: f64, refill_per_sec: f64) -> bool {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * refill_per_sec).min(capacity);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// per-peer reputation and message tallies. Score is bounded above at 100
/// but not below: a peer that keeps misbehaving just keeps sinking until
/// `maybe_disconnect` purges it.
#[derive(Debug, Clone, Copy, Default)]
struct PeerStats {
    score: i32,
    invalid_proofs: u32,
    duplicates: u32,
    valid_messages: u32,
    dropped_messages: u32,
}

const REPUTATION_CEILING: i32 = 100;
const NEW_NULLIFIER_REWARD: i32 = 1;
const DUPLICATE_PENALTY: i32 = -1;
const TOO_OLD_PENALTY: i32 = -2;
const FUTURE_TIMESTAMP_PENALTY: i32 = -5;
const MISSING_OWNERSHIP_PROOF_PENALTY: i32 = -5;
const INVALID_PROOF_PENALTY: i32 = -10;

/// outcome of `receive`, reported back to the caller for diagnostics/tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// first time this nullifier was seen; rebroadcast to peers
    NewAndRebroadcast,
    /// already known; peer tally bumped, no rebroadcast
    DuplicateTallied,
    RateLimited,
    TooOld,
    FutureTimestamp,
    MissingOwnershipProof,
    InvalidProof,
}

pub struct GossipCore<T: PeerTransport> {
    config: GossipConfig,
    transport: Arc<T>,
    witness: Arc<WitnessClient>,
    federation_pubkeys: Vec<[u8; 48]>,
    seen: Arc<RwLock<HashMap<[u8; 32], NullifierRecord>>>,
    buckets: Arc<RwLock<HashMap<PeerId, LeakyBucket>>>,
    reputation: Arc<RwLock<HashMap<PeerId, PeerStats>>>,
    known_peers: Arc<RwLock<HashSet<PeerId>>>,
}

impl<T: PeerTransport> GossipCore<T> {
    pub fn new(
        config: GossipConfig,
        transport: Arc<T>,
        witness: Arc<WitnessClient>,
        federation_pubkeys: Vec<[u8; 48]>,
    ) -> Self {
        Self {
            config,
            transport,
            witness,
            federation_pubkeys,
            seen: Arc::new(RwLock::new(HashMap::new())),
            buckets: Arc::new(RwLock::new(HashMap::new())),
            reputation: Arc::new(RwLock::new(HashMap::new())),
            known_peers: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    /// the receive pipeline: rate-limit, timestamp window, ownership-proof
    /// gate, witness verification, dedupe/age gate, record, reputation
    /// update, conditional rebroadcast, then a reputation-threshold
    /// disconnect check
    pub async fn receive(
        &self,
        from: &PeerId,
        nullifier: [u8; 32],
        proof: Attestation,
        ownership_proof: Option<Vec<u8>>,
        now_ms: i64,
    ) -> Result<ReceiveOutcome> {
        self.known_peers.write().await.insert(from.clone());

        // 1. rate limit this peer: drop silently, no reputation penalty
        {
            let mut buckets = self.buckets.write().await;
            let bucket = buckets
                .entry(from.clone())
                .or_insert_with(|| LeakyBucket::new(self.config.rate_limit_burst));
            if !bucket.try_take(self.config.rate_limit_burst, self.config.rate_limit_per_sec) {
                self.record_dropped(from).await;
                return Ok(ReceiveOutcome::RateLimited);
            }
        }

        let claimed_timestamp_ms = proof.timestamp_ms();

        // 2. timestamp window
        let max_future_ms = self.config.max_timestamp_future_s * 1_000;
        if claimed_timestamp_ms > now_ms + max_future_ms {
            warn!(peer = %from.0, "gossip message with future timestamp, dropping");
            self.penalize(from, FUTURE_TIMESTAMP_PENALTY).await;
            self.maybe_disconnect(from).await;
            return Ok(ReceiveOutcome::FutureTimestamp);
        }
        if now_ms.saturating_sub(claimed_timestamp_ms) > self.config.max_nullifier_age_ms {
            self.penalize(from, TOO_OLD_PENALTY).await;
            self.maybe_disconnect(from).await;
            return Ok(ReceiveOutcome::TooOld);
        }

        // 3. ownership-proof gate
        if self.config.require_ownership_proof && ownership_proof.is_none() {
            self.penalize(from, MISSING_OWNERSHIP_PROOF_PENALTY).await;
            self.maybe_disconnect(from).await;
            return Ok(ReceiveOutcome::MissingOwnershipProof);
        }

        // 4. witness verification; failure is never recorded
        let verified = self
            .witness
            .verify(&proof, &self.federation_pubkeys, now_ms)
            .await
            .unwrap_or(false);
        if !verified {
            self.record_invalid_proof(from).await;
            self.maybe_disconnect(from).await;
            return Ok(ReceiveOutcome::InvalidProof);
        }

        // 5 + 6. dedupe and insert under one write lock
        let mut seen = self.seen.write().await;
        if let Some(record) = seen.get_mut(&nullifier) {
            record.seen_from.insert(from.clone());
            record.peer_count = record.seen_from.len() as u32;
            drop(seen);
            self.record_duplicate(from).await;
            self.maybe_disconnect(from).await;
            return Ok(ReceiveOutcome::DuplicateTallied);
        }

        let mut seen_from = HashSet::new();
        seen_from.insert(from.clone());
        seen.insert(
            nullifier,
            NullifierRecord {
                proof,
                first_seen_ms: claimed_timestamp_ms,
                peer_count: 1,
                seen_from,
            },
        );
        evict_oldest_if_over_capacity(&mut seen, self.config.max_nullifiers);
        drop(seen);

        self.reward(from).await;

        debug!(nullifier = %crate::crypto::hex_encode(&nullifier), "new nullifier, rebroadcasting");
        let payload = encode_gossip_frame(&nullifier, claimed_timestamp_ms);
        if let Err(e) = self.transport.broadcast(payload).await {
            warn!(error = %e, "rebroadcast failed");
        }

        Ok(ReceiveOutcome::NewAndRebroadcast)
    }

    /// publish a nullifier this node itself observed (e.g. from a local
    /// spend). Rejects with `DoubleSpend` if the nullifier is already in the
    /// seen set — this is the node's own double-spend alarm.
    pub async fn publish(&self, nullifier: [u8; 32], proof: Attestation, now_ms: i64) -> Result<()> {
        let mut seen = self.seen.write().await;
        if seen.contains_key(&nullifier) {
            return Err(Error::DoubleSpend(crate::crypto::hex_encode(&nullifier)));
        }
        seen.insert(
            nullifier,
            NullifierRecord {
                proof,
                first_seen_ms: now_ms,
                peer_count: 1,
                seen_from: HashSet::new(),
            },
        );
        evict_oldest_if_over_capacity(&mut seen, self.config.max_nullifiers);
        drop(seen);

        let payload = encode_gossip_frame(&nullifier, now_ms);
        self.transport.broadcast(payload).await
    }

    /// confidence that this nullifier has already been spent: the fraction
    /// of currently connected peers that have reported seeing it, capped at
    /// 1.0. Absent nullifiers score 0.
    pub async fn check_nullifier(&self, nullifier: &[u8; 32]) -> f64 {
        let peer_count = match self.seen.read().await.get(nullifier) {
            Some(record) => record.peer_count,
            None => return 0.0,
        };
        let connected = self.transport.peer_count().max(1);
        (peer_count as f64 / connected as f64).min(1.0)
    }

    /// raw peer tally for a nullifier, used by the validator's confidence
    /// score (distinct from `check_nullifier`'s connected-peer ratio)
    pub async fn peer_tally(&self, nullifier: &[u8; 32]) -> Option<u32> {
        self.seen.read().await.get(nullifier).map(|r| r.peer_count)
    }

    /// evict entries older than `max_nullifier_age_ms`, then enforce
    /// `max_nullifiers` if the map is still over capacity
    pub async fn prune(&self, now_ms: i64) -> usize {
        let mut seen = self.seen.write().await;
        let before = seen.len();
        seen.retain(|_, record| {
            now_ms.saturating_sub(record.first_seen_ms) <= self.config.max_nullifier_age_ms
        });
        let removed_by_age = before - seen.len();
        let removed_by_cap = evict_oldest_if_over_capacity(&mut seen, self.config.max_nullifiers);
        let removed = removed_by_age + removed_by_cap;
        if removed > 0 {
            info!(removed, "pruned stale nullifiers");
        }
        removed
    }

    async fn reward(&self, peer: &PeerId) {
        let mut rep = self.reputation.write().await;
        let entry = rep.entry(peer.clone()).or_default();
        entry.score = (entry.score + NEW_NULLIFIER_REWARD).min(REPUTATION_CEILING);
        entry.valid_messages += 1;
    }

    async fn penalize(&self, peer: &PeerId, delta: i32) {
        let mut rep = self.reputation.write().await;
        let entry = rep.entry(peer.clone()).or_default();
        entry.score += delta;
    }

    async fn record_invalid_proof(&self, peer: &PeerId) {
        let mut rep = self.reputation.write().await;
        let entry = rep.entry(peer.clone()).or_default();
        entry.score += INVALID_PROOF_PENALTY;
        entry.invalid_proofs += 1;
    }

    async fn record_duplicate(&self, peer: &PeerId) {
        let mut rep = self.reputation.write().await;
        let entry = rep.entry(peer.clone()).or_default();
        entry.score += DUPLICATE_PENALTY;
        entry.duplicates += 1;
    }

    async fn record_dropped(&self, peer: &PeerId) {
        let mut rep = self.reputation.write().await;
        let entry = rep.entry(peer.clone()).or_default();
        entry.dropped_messages += 1;
    }

    async fn maybe_disconnect(&self, peer: &PeerId) {
        let should = {
            let rep = self.reputation.read().await;
            rep.get(peer)
                .map(|s| s.score < self.config.peer_score_threshold)
                .unwrap_or(false)
        };
        if should {
            self.disconnect(peer).await;
        }
    }

    /// remove a peer from the gossip-layer peer list and purge its stats;
    /// does not touch the underlying transport connection
    async fn disconnect(&self, peer: &PeerId) {
        self.known_peers.write().await.remove(peer);
        self.buckets.write().await.remove(peer);
        self.reputation.write().await.remove(peer);
        info!(peer = %peer.0, "peer disconnected: reputation below threshold");
    }

    pub async fn reputation_of(&self, peer: &PeerId) -> i32 {
        self.reputation.read().await.get(peer).map(|r| r.score).unwrap_or(0)
    }

    pub async fn known_peer_count(&self) -> usize {
        self.known_peers.read().await.len()
    }

    pub fn peer_count(&self) -> usize {
        self.transport.peer_count()
    }
}

fn evict_oldest_if_over_capacity(seen: &mut HashMap<[u8; 32], NullifierRecord>, max: usize) -> usize {
    if seen.len() <= max {
        return 0;
    }
    let mut entries: Vec<([u8; 32], i64)> = seen.iter().map(|(k, v)| (*k, v.first_seen_ms)).collect();
    entries.sort_by_key(|(_, ts)| *ts);
    let excess = seen.len() - max;
    for (k, _) in entries.into_iter().take(excess) {
        seen.remove(&k);
    }
    excess
}

fn encode_gossip_frame(nullifier: &[u8; 32], timestamp_ms: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(40);
    buf.extend_from_slice(nullifier);
    buf.extend_from_slice(&timestamp_ms.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::witness::WitnessClient;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl PeerTransport for NullTransport {
        async fn send(&self, _to: &PeerId, _payload: Vec<u8>) -> Result<()> {
            Ok(())
        }
        async fn broadcast(&self, _payload: Vec<u8>) -> Result<()> {
            Ok(())
        }
        fn peer_count(&self) -> usize {
            1
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

    fn core() -> GossipCore<NullTransport> {
        GossipCore::new(
            GossipConfig::default(),
            Arc::new(NullTransport),
            Arc::new(WitnessClient::new(vec![], 0)),
            vec![],
        )
    }

    #[tokio::test]
    async fn first_receive_is_new_and_rebroadcasts() {
        let gossip = core();
        let peer = PeerId("p1".into());
        let nullifier = [7u8; 32];
        let outcome = gossip
            .receive(&peer, nullifier, sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        assert_eq!(outcome, ReceiveOutcome::NewAndRebroadcast);
        assert_eq!(gossip.peer_tally(&nullifier).await, Some(1));
    }

    #[tokio::test]
    async fn duplicate_from_new_peer_is_tallied_not_rebroadcast() {
        let gossip = core();
        let nullifier = [8u8; 32];
        gossip
            .receive(&PeerId("p1".into()), nullifier, sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        let outcome = gossip
            .receive(&PeerId("p2".into()), nullifier, sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        assert_eq!(outcome, ReceiveOutcome::DuplicateTallied);
        assert_eq!(gossip.peer_tally(&nullifier).await, Some(2));
    }

    #[tokio::test]
    async fn too_old_nullifier_is_rejected() {
        let gossip = core();
        let peer = PeerId("p1".into());
        let nullifier = [9u8; 32];
        let now = DEFAULT_MAX_NULLIFIER_AGE_MS + 10_000;
        let outcome = gossip
            .receive(&peer, nullifier, sample_proof(0), None, now)
            .await
            .unwrap();
        assert_eq!(outcome, ReceiveOutcome::TooOld);
        assert_eq!(gossip.peer_tally(&nullifier).await, None);
    }

    #[tokio::test]
    async fn future_timestamp_is_rejected() {
        let gossip = core();
        let peer = PeerId("p1".into());
        let outcome = gossip
            .receive(&peer, [1u8; 32], sample_proof(100_000), None, 0)
            .await
            .unwrap();
        assert_eq!(outcome, ReceiveOutcome::FutureTimestamp);
    }

    #[tokio::test]
    async fn missing_ownership_proof_is_rejected_when_required() {
        let mut config = GossipConfig::default();
        config.require_ownership_proof = true;
        let gossip = GossipCore::new(
            config,
            Arc::new(NullTransport),
            Arc::new(WitnessClient::new(vec![], 0)),
            vec![],
        );
        let peer = PeerId("p1".into());
        let outcome = gossip
            .receive(&peer, [2u8; 32], sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        assert_eq!(outcome, ReceiveOutcome::MissingOwnershipProof);
    }

    #[tokio::test]
    async fn unverifiable_proof_is_rejected_and_not_stored() {
        let gossip = core();
        let peer = PeerId("p1".into());
        let nullifier = [3u8; 32];
        // a single-signer attestation fails the structural fallback check
        let weak_proof = Attestation::Aggregated {
            package_hash: [0u8; 32],
            timestamp_ms: 1_000,
            signature: [0u8; 96],
            signer_pubkeys: vec![[0u8; 48]],
            raw: None,
        };
        let outcome = gossip.receive(&peer, nullifier, weak_proof, None, 1_000).await.unwrap();
        assert_eq!(outcome, ReceiveOutcome::InvalidProof);
        assert_eq!(gossip.peer_tally(&nullifier).await, None);
    }

    #[tokio::test]
    async fn rate_limit_kicks_in_after_capacity_exhausted() {
        let mut config = GossipConfig::default();
        config.rate_limit_burst = 2.0;
        let gossip = GossipCore::new(
            config,
            Arc::new(NullTransport),
            Arc::new(WitnessClient::new(vec![], 0)),
            vec![],
        );
        let peer = PeerId("spammer".into());

        for i in 0..2u8 {
            let outcome = gossip
                .receive(&peer, [i; 32], sample_proof(1_000), None, 1_000)
                .await
                .unwrap();
            assert_eq!(outcome, ReceiveOutcome::NewAndRebroadcast);
        }
        let outcome = gossip
            .receive(&peer, [99u8; 32], sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        assert_eq!(outcome, ReceiveOutcome::RateLimited);
    }

    #[tokio::test]
    async fn prune_evicts_stale_entries() {
        let gossip = core();
        let peer = PeerId("p1".into());
        gossip.receive(&peer, [1u8; 32], sample_proof(0), None, 0).await.unwrap();
        let removed = gossip.prune(DEFAULT_MAX_NULLIFIER_AGE_MS + 1).await;
        assert_eq!(removed, 1);
        assert_eq!(gossip.peer_tally(&[1u8; 32]).await, None);
    }

    #[tokio::test]
    async fn prune_enforces_max_nullifiers_cap() {
        let mut config = GossipConfig::default();
        config.max_nullifiers = 2;
        let gossip = GossipCore::new(
            config,
            Arc::new(NullTransport),
            Arc::new(WitnessClient::new(vec![], 0)),
            vec![],
        );
        let peer = PeerId("p1".into());
        gossip.receive(&peer, [1u8; 32], sample_proof(0), None, 0).await.unwrap();
        gossip.receive(&peer, [2u8; 32], sample_proof(100), None, 100).await.unwrap();
        gossip.receive(&peer, [3u8; 32], sample_proof(200), None, 200).await.unwrap();
        // the oldest (nullifier 1) should have been evicted on insert
        assert_eq!(gossip.peer_tally(&[1u8; 32]).await, None);
        assert_eq!(gossip.peer_tally(&[3u8; 32]).await, Some(1));
    }

    #[tokio::test]
    async fn publish_rejects_already_seen_nullifier_as_double_spend() {
        let gossip = core();
        let nullifier = [4u8; 32];
        gossip.publish(nullifier, sample_proof(0), 0).await.unwrap();
        let result = gossip.publish(nullifier, sample_proof(0), 0).await;
        assert!(matches!(result, Err(Error::DoubleSpend(_))));
    }

    #[tokio::test]
    async fn check_nullifier_returns_confidence_ratio() {
        let gossip = core(); // NullTransport.peer_count() == 1
        let nullifier = [5u8; 32];
        gossip
            .receive(&PeerId("p1".into()), nullifier, sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        assert_eq!(gossip.check_nullifier(&nullifier).await, 1.0);
        assert_eq!(gossip.check_nullifier(&[99u8; 32]).await, 0.0);
    }

    #[tokio::test]
    async fn reputation_rewards_useful_gossip_and_penalizes_spam() {
        let mut config = GossipConfig::default();
        config.rate_limit_burst = 1.0;
        let gossip = GossipCore::new(
            config,
            Arc::new(NullTransport),
            Arc::new(WitnessClient::new(vec![], 0)),
            vec![],
        );
        let peer = PeerId("p1".into());

        gossip
            .receive(&peer, [1u8; 32], sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        let after_reward = gossip.reputation_of(&peer).await;
        assert!(after_reward > 0);

        // second message exhausts the 1-token bucket and is rate limited:
        // no further reward, no penalty either
        gossip
            .receive(&peer, [2u8; 32], sample_proof(1_000), None, 1_000)
            .await
            .unwrap();
        let after_drop = gossip.reputation_of(&peer).await;
        assert_eq!(after_drop, after_reward);
    }

    #[tokio::test]
    async fn peer_is_disconnected_once_score_crosses_threshold() {
        let mut config = GossipConfig::default();
        config.peer_score_threshold = -20;
        let gossip = GossipCore::new(
            config,
            Arc::new(NullTransport),
            Arc::new(WitnessClient::new(vec![], 0)),
            vec![],
        );
        let peer = PeerId("bad-peer".into());
        let weak_proof = Attestation::Aggregated {
            package_hash: [0u8; 32],
            timestamp_ms: 1_000,
            signature: [0u8; 96],
            signer_pubkeys: vec![[0u8; 48]],
            raw: None,
        };

        for i in 0..3u8 {
            gossip
                .receive(&peer, [i; 32], weak_proof.clone(), None, 1_000)
                .await
                .unwrap();
        }
        // three invalid-proof penalties at -10 each cross the -20 threshold
        assert_eq!(gossip.known_peer_count().await, 0);
    }
}
