//! configuration: four serde-deserializable sections plus environment
//! variable overrides, styled on `chain_client::config`'s plain-struct
//! config types and `Default` impls per named deployment.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WitnessConfig {
    pub gateway_urls: Vec<String>,
    pub quorum: usize,
    pub federation_pubkeys_hex: Vec<String>,
}

impl Default for WitnessConfig {
    fn default() -> Self {
        Self {
            gateway_urls: vec!["https://witness1.example".into(), "https://witness2.example".into()],
            quorum: 2,
            federation_pubkeys_hex: vec![],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FreebirdConfig {
    pub issuer_urls: Vec<String>,
}

impl Default for FreebirdConfig {
    fn default() -> Self {
        Self {
            issuer_urls: vec!["https://freebird1.example".into()],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HypertokenConfig {
    pub relay_url: String,
    pub rebroadcast_fanout: usize,
}

impl Default for HypertokenConfig {
    fn default() -> Self {
        Self {
            relay_url: "wss://relay.example".into(),
            rebroadcast_fanout: 6,
        }
    }
}

/// Tor hook: not a real SOCKS5 implementation, just the proxy address
/// adapters should route through when `enabled` is set, and a plain
/// passthrough otherwise.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TorConfig {
    pub enabled: bool,
    pub socks5_proxy: Option<String>,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socks5_proxy: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    pub witness: WitnessConfig,
    pub freebird: FreebirdConfig,
    pub hypertoken: HypertokenConfig,
    pub tor: TorConfig,
}

impl Config {
    /// load from a JSON file, then apply environment variable overrides.
    /// the file is optional; a missing one just means defaults-plus-env.
    pub fn from_env_and_file(path: Option<&std::path::Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => match std::fs::read_to_string(p) {
                Ok(contents) => serde_json::from_str(&contents)?,
                Err(_) => Config::default(),
            },
            None => Config::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("FREEBIRD_ISSUER_URL") {
            self.freebird.issuer_urls = vec![url];
        }
        if let Ok(url) = std::env::var("FREEBIRD_VERIFIER_URL") {
            // verifier endpoint sits alongside the issuer list; kept as a
            // synthetic extra entry rather than a new field, since the
            // adapter treats every configured URL uniformly in failover.
            self.freebird.issuer_urls.push(url);
        }
        if let Ok(url) = std::env::var("WITNESS_GATEWAY_URL") {
            self.witness.gateway_urls = vec![url];
        }
        if let Ok(url) = std::env::var("HYPERTOKEN_RELAY_URL") {
            self.hypertoken.relay_url = url;
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

pub fn parse_hex_pubkey48(hex_str: &str) -> Result<[u8; 48]> {
    let bytes = crate::crypto::hex_decode(hex_str)?;
    bytes
        .try_into()
        .map_err(|_| Error::Malformed("federation pubkey must be 48 bytes".into()))
}
