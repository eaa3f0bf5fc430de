use crate::decoder::Felt;
use crate::domain::{Address, BlockNumber};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub rpc_url: String,
    /// Vaults tracked from the first indexed block.
    pub vault_addresses: Vec<Address>,
    /// Class hash that identifies vault deployments through the UDC.
    pub vault_class_hash: Option<Felt>,
    pub udc_address: Option<Address>,
    pub start_block: BlockNumber,
    pub poll_interval: Duration,
    pub max_reorg_depth: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_number::<u16>(&env_map, "PORT", "8080")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let rpc_url = env_map
            .get("RPC_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("RPC_URL".to_string()))?;

        let vault_addresses = match env_map.get("VAULT_ADDRESSES") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_address("VAULT_ADDRESSES", s))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        let vault_class_hash = env_map
            .get("VAULT_CLASS_HASH")
            .map(|raw| {
                Felt::from_hex(raw).map_err(|e| {
                    ConfigError::InvalidValue("VAULT_CLASS_HASH".to_string(), e.to_string())
                })
            })
            .transpose()?;

        let udc_address = env_map
            .get("UDC_ADDRESS")
            .map(|raw| parse_address("UDC_ADDRESS", raw))
            .transpose()?;

        let start_block = BlockNumber::new(parse_number::<u64>(&env_map, "START_BLOCK", "0")?);
        let poll_interval =
            Duration::from_millis(parse_number::<u64>(&env_map, "POLL_INTERVAL_MS", "2000")?);
        let max_reorg_depth = parse_number::<u64>(&env_map, "MAX_REORG_DEPTH", "64")?;

        Ok(Config {
            port,
            database_path,
            rpc_url,
            vault_addresses,
            vault_class_hash,
            udc_address,
            start_block,
            poll_interval,
            max_reorg_depth,
        })
    }
}

fn parse_number<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: &str,
) -> Result<T, ConfigError> {
    env_map
        .get(key)
        .map(|s| s.as_str())
        .unwrap_or(default)
        .trim()
        .parse::<T>()
        .map_err(|_| {
            ConfigError::InvalidValue(
                key.to_string(),
                format!("must be a non-negative integer, got {:?}", env_map.get(key)),
            )
        })
}

fn parse_address(key: &str, raw: &str) -> Result<Address, ConfigError> {
    Address::parse(raw).map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string()))
}
