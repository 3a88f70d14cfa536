//! Freebird adapter: blinded anonymous token issuance
//!
//! Wraps the `voprf` module's blind/finalize in an HTTP client that talks to
//! one or more issuer endpoints, with sequential failover across issuers
//! (the federation's issuer set is not an MPC quorum; any single honest
//! issuer's token is independently valid, so the client tries them in order
//! and stops at the first success — unlike Witness's parallel quorum query).
//!
//! Every entry point degrades deterministically rather than erroring when no
//! issuer is reachable: `blind` falls back to a plain hash commitment,
//! `issue_token` falls back to a hash-derived placeholder token, and
//! `verify_token` falls back to a length check. None of these fallbacks are
//! cryptographically sound; they exist so a fully offline node still
//! produces a well-formed token lifecycle, with the validator's confidence
//! score reflecting the degraded trust rather than the adapter refusing to
//! run at all.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::sha256;
use crate::error::{Error, Result};
use crate::voprf::{self, BlindState};

pub const VOPRF_CONTEXT: &[u8] = b"freebird:v1";

#[derive(Debug, Clone, Deserialize)]
pub struct IssuerMetadata {
    pub issuer_id: String,
    pub voprf: VoprfMetadata,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VoprfMetadata {
    pub suite: String,
    pub kid: String,
    /// base64url SEC1-compressed public key (33 bytes)
    pub pubkey: String,
    pub exp_sec: u64,
}

#[derive(Debug, Serialize)]
struct IssueRequest {
    blinded_element_b64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ctx_b64: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IssueResponse {
    token: String,
    exp: u64,
    epoch: u64,
}

/// a finalized anonymous token, ready to spend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreebirdToken {
    pub token_b64: String,
    pub issuer_id: String,
    pub exp: u64,
    pub epoch: u32,
}

/// one issuer in the failover list
#[derive(Debug, Clone)]
pub struct IssuerEndpoint {
    pub url: String,
}

impl IssuerEndpoint {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// client for acquiring and verifying Freebird tokens across a federation
/// of issuers, tried in order until one succeeds
pub struct FreebirdClient {
    #[cfg(feature = "network")]
    http: reqwest::Client,
    issuers: Vec<IssuerEndpoint>,
    metadata: std::collections::HashMap<String, IssuerMetadata>,
}

impl FreebirdClient {
    pub fn new(issuers: Vec<IssuerEndpoint>) -> Self {
        Self {
            #[cfg(feature = "network")]
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("reqwest client"),
            issuers,
            metadata: std::collections::HashMap::new(),
        }
    }

    /// fetch and cache `.well-known/issuer` metadata for every configured
    /// issuer that is currently reachable; unreachable ones are skipped, not
    /// fatal, since failover handles them at issue time
    #[cfg(feature = "network")]
    pub async fn init(&mut self) -> Result<()> {
        for issuer in self.issuers.clone() {
            if self.metadata.contains_key(&issuer.url) {
                continue;
            }
            match self.fetch_metadata(&issuer).await {
                Ok(meta) => {
                    debug!(issuer = %issuer.url, issuer_id = %meta.issuer_id, "freebird issuer ready");
                    self.metadata.insert(issuer.url.clone(), meta);
                }
                Err(e) => warn!(issuer = %issuer.url, error = %e, "freebird issuer unreachable at init"),
            }
        }
        if self.metadata.is_empty() {
            return Err(Error::NetworkUnavailable(
                "no freebird issuer reachable".into(),
            ));
        }
        Ok(())
    }

    #[cfg(feature = "network")]
    async fn fetch_metadata(&self, issuer: &IssuerEndpoint) -> Result<IssuerMetadata> {
        let url = format!("{}/.well-known/issuer", issuer.url);
        let response = self.http.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(Error::NetworkUnavailable(format!(
                "issuer metadata fetch failed: {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    /// blind `input` for VOPRF issuance. If at least one issuer's metadata
    /// has been cached (meaning some issuer was reachable at `init` time),
    /// performs a real VOPRF blind and returns the 33-byte compressed point
    /// plus the state needed to finalize. Otherwise degrades to
    /// `hash(input || random_nonce)` with no state — the result is usable as
    /// an opaque commitment but can never be finalized into a verifiable
    /// token.
    pub fn blind(&self, input: &[u8]) -> (Vec<u8>, Option<BlindState>) {
        if self.metadata.is_empty() {
            let nonce = crate::crypto::random_bytes::<32>();
            return (sha256(&[input, &nonce]).to_vec(), None);
        }
        match voprf::blind(input, VOPRF_CONTEXT) {
            Ok((point, state)) => (point.to_vec(), Some(state)),
            Err(e) => {
                warn!(error = %e, "voprf blind failed, degrading to hash commitment");
                let nonce = crate::crypto::random_bytes::<32>();
                (sha256(&[input, &nonce]).to_vec(), None)
            }
        }
    }

    /// wrap `blind` down to the fixed 32-byte commitment a transfer package
    /// carries, discarding any finalize state — this call site never
    /// finalizes, it only needs an opaque binding to `to`.
    pub fn blind_commitment(&self, to: &[u8]) -> [u8; 32] {
        let (blinded, _state) = self.blind(to);
        sha256(&[&blinded])
    }

    /// acquire a token, trying each configured issuer in order and
    /// returning the first success. If no issuer has ever been reachable,
    /// degrades to the documented placeholder: `SHA-256(blinded || "ISSUED")`.
    #[cfg(feature = "network")]
    pub async fn issue_token(&mut self) -> Result<FreebirdToken> {
        if self.init().await.is_err() {
            return Ok(self.fallback_token());
        }
        let issuers = self.issuers.clone();
        let mut last_err = None;

        for issuer in issuers {
            let meta = match self.metadata.get(&issuer.url) {
                Some(m) => m.clone(),
                None => continue,
            };
            match self.issue_from(&issuer, &meta).await {
                Ok(token) => return Ok(token),
                Err(e) => {
                    warn!(issuer = %issuer.url, error = %e, "issuer failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or(Error::NetworkUnavailable("no freebird issuers configured".into())))
    }

    fn fallback_token(&self) -> FreebirdToken {
        let input = crate::crypto::random_bytes::<32>();
        let (blinded, _state) = self.blind(&input);
        FreebirdToken {
            token_b64: URL_SAFE_NO_PAD.encode(sha256(&[&blinded, b"ISSUED"])),
            issuer_id: "fallback".into(),
            exp: 0,
            epoch: 0,
        }
    }

    #[cfg(feature = "network")]
    async fn issue_from(
        &self,
        issuer: &IssuerEndpoint,
        meta: &IssuerMetadata,
    ) -> Result<FreebirdToken> {
        let input = crate::crypto::random_bytes::<32>();
        let (blinded, state) = self.blind(&input);
        let Some(state) = state else {
            return Ok(self.fallback_token());
        };
        let request = IssueRequest {
            blinded_element_b64: URL_SAFE_NO_PAD.encode(&blinded),
            ctx_b64: None,
        };

        let url = format!("{}/v1/oprf/issue", issuer.url);
        let response = self.http.post(&url).json(&request).send().await?;
        if !response.status().is_success() {
            return Err(Error::NetworkUnavailable(format!(
                "issue failed: {}",
                response.status()
            )));
        }
        let issue_resp: IssueResponse = response.json().await?;

        let token_bytes = URL_SAFE_NO_PAD
            .decode(&issue_resp.token)
            .map_err(|_| Error::Malformed("bad token base64".into()))?;
        let pubkey_bytes = URL_SAFE_NO_PAD
            .decode(&meta.voprf.pubkey)
            .map_err(|_| Error::Malformed("bad issuer pubkey base64".into()))?;

        let output =
            voprf::finalize(&state, &token_bytes[..130], &pubkey_bytes, VOPRF_CONTEXT)?;

        Ok(FreebirdToken {
            token_b64: URL_SAFE_NO_PAD.encode(output),
            issuer_id: meta.issuer_id.clone(),
            exp: issue_resp.exp,
            epoch: issue_resp.epoch as u32,
        })
    }

    /// verify a token (or, per the documented contract, an ownership proof
    /// passed through this same check): POST it to a verifier with the
    /// issuer id and cached epoch, trusting `ok: true`. If every verifier is
    /// unreachable (or none are configured), fall back to the documented
    /// structural check: accept a blob of length 32 or 130.
    pub async fn verify_token(
        &self,
        token_bytes: &[u8],
        issuer_id: &str,
        epoch: u64,
        now_ms: i64,
    ) -> Result<bool> {
        #[cfg(feature = "network")]
        {
            for issuer in &self.issuers {
                match self.verify_one(issuer, token_bytes, issuer_id, epoch, now_ms).await {
                    Ok(ok) => return Ok(ok),
                    Err(e) => {
                        warn!(issuer = %issuer.url, error = %e, "verifier unreachable, trying next");
                        continue;
                    }
                }
            }
        }
        Ok(token_bytes.len() == 32 || token_bytes.len() == 130)
    }

    #[cfg(feature = "network")]
    async fn verify_one(
        &self,
        issuer: &IssuerEndpoint,
        token_bytes: &[u8],
        issuer_id: &str,
        epoch: u64,
        now_ms: i64,
    ) -> Result<bool> {
        #[derive(Serialize)]
        struct VerifyRequest<'a> {
            token_b64: String,
            issuer_id: &'a str,
            exp: u64,
            epoch: u64,
        }
        #[derive(Deserialize)]
        struct VerifyResponse {
            ok: bool,
        }
        let req = VerifyRequest {
            token_b64: URL_SAFE_NO_PAD.encode(token_bytes),
            issuer_id,
            exp: (now_ms / 1000) as u64 + 3600,
            epoch,
        };
        let url = format!("{}/v1/verify", issuer.url);
        let resp = self.http.post(&url).json(&req).send().await?;
        if !resp.status().is_success() {
            return Err(Error::NetworkUnavailable(format!(
                "verify failed: {}",
                resp.status()
            )));
        }
        let body: VerifyResponse = resp.json().await?;
        Ok(body.ok)
    }

    pub fn issuer_count(&self) -> usize {
        self.issuers.len()
    }
}

/// placeholder ownership proof, per the documented construction:
/// SHA-256(secret || "OWNERSHIP_PROOF")
///
/// not a real zero-knowledge proof of spend authorization; retained as the
/// literal construction this adapter is specified against.
pub fn create_ownership_proof(secret: &[u8]) -> [u8; 32] {
    sha256(&[secret, b"OWNERSHIP_PROOF"])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_proof_is_deterministic() {
        let secret = crate::crypto::random_bytes::<32>();
        assert_eq!(
            create_ownership_proof(&secret),
            create_ownership_proof(&secret)
        );
    }

    #[test]
    fn issuer_endpoint_trims_trailing_slash() {
        let e = IssuerEndpoint::new("https://issuer.example/");
        assert_eq!(e.url, "https://issuer.example");
    }

    #[test]
    fn client_reports_configured_issuer_count() {
        let client = FreebirdClient::new(vec![
            IssuerEndpoint::new("https://a.example"),
            IssuerEndpoint::new("https://b.example"),
        ]);
        assert_eq!(client.issuer_count(), 2);
    }

    #[test]
    fn blind_degrades_to_hash_commitment_without_reachable_issuer() {
        let client = FreebirdClient::new(vec![IssuerEndpoint::new("https://unreachable.example")]);
        let (blinded, state) = client.blind(b"recipient-pubkey");
        assert!(state.is_none());
        assert_eq!(blinded.len(), 32);
    }

    #[test]
    fn blind_commitment_is_fixed_size_regardless_of_mode() {
        let client = FreebirdClient::new(vec![]);
        let commitment = client.blind_commitment(b"recipient-pubkey");
        assert_eq!(commitment.len(), 32);
    }

    #[test]
    fn verify_token_falls_back_to_length_check_offline() {
        let client = FreebirdClient::new(vec![]);
        let ok32 = futures::executor::block_on(client.verify_token(&[0u8; 32], "issuer", 0, 0));
        let ok130 = futures::executor::block_on(client.verify_token(&[0u8; 130], "issuer", 0, 0));
        let bad = futures::executor::block_on(client.verify_token(&[0u8; 10], "issuer", 0, 0));
        assert_eq!(ok32.unwrap(), true);
        assert_eq!(ok130.unwrap(), true);
        assert_eq!(bad.unwrap(), false);
    }
}
