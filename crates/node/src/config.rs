//! Node configuration.

use istria_types::{Address, AddressParseError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid secret key hex")]
    BadSecretKey,

    #[error("invalid validator address: {0}")]
    BadValidator(#[from] AddressParseError),

    #[error("genesis validator set is empty")]
    NoValidators,
}

/// Node configuration, loaded from TOML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Data directory for the block store.
    pub data_dir: PathBuf,

    /// Hex-encoded secp256k1 secret key for the validator identity.
    pub secret_key: String,

    /// libp2p listen multiaddresses.
    #[serde(default = "default_listen")]
    pub listen_addresses: Vec<String>,

    /// Bootstrap peer multiaddresses dialed at startup.
    #[serde(default)]
    pub bootstrap_peers: Vec<String>,

    /// Status RPC listen address.
    #[serde(default = "default_rpc")]
    pub rpc_listen: String,

    /// Genesis validator set (hex addresses, rotation order).
    pub validators: Vec<String>,

    /// Genesis block gas limit.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Base round timeout in milliseconds.
    #[serde(default = "default_round_timeout_ms")]
    pub round_timeout_ms: u64,
}

fn default_listen() -> Vec<String> {
    vec!["/ip4/0.0.0.0/udp/30303/quic-v1".to_string()]
}

fn default_rpc() -> String {
    "127.0.0.1:8545".to_string()
}

fn default_gas_limit() -> u64 {
    8_000_000
}

fn default_round_timeout_ms() -> u64 {
    10_000
}

impl NodeConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: NodeConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.secret_key_bytes()?;
        if self.validators.is_empty() {
            return Err(ConfigError::NoValidators);
        }
        self.genesis_validators()?;
        Ok(())
    }

    /// Decode the secret key hex into scalar bytes.
    pub fn secret_key_bytes(&self) -> Result<[u8; 32], ConfigError> {
        let raw = self.secret_key.strip_prefix("0x").unwrap_or(&self.secret_key);
        let bytes = hex::decode(raw).map_err(|_| ConfigError::BadSecretKey)?;
        bytes.try_into().map_err(|_| ConfigError::BadSecretKey)
    }

    /// Parse the genesis validator addresses, preserving order.
    pub fn genesis_validators(&self) -> Result<Vec<Address>, ConfigError> {
        self.validators
            .iter()
            .map(|s| Address::from_hex(s).map_err(ConfigError::from))
            .collect()
    }
}
