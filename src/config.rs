//! Relayer configuration
//!
//! Everything comes from environment variables, with an optional `.env` file
//! loaded first.

use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use eyre::{eyre, Result, WrapErr};

use crate::chains::{load_domains_from_env, ChainIdTable, DomainTable, Network};
use crate::completion::CompletionSettings;
use crate::contracts::DEFAULT_MESSAGE_TRANSMITTER;
use crate::engine::EngineSettings;

/// Main configuration
#[derive(Clone)]
pub struct Config {
    pub network: Network,
    /// Signing key for completion transactions (0x + 64 hex)
    pub private_key: String,
    pub attestation: AttestationConfig,
    pub message_transmitter: String,
    pub domains: DomainTable,
    pub chain_ids: ChainIdTable,
    pub relayer: RelayerConfig,
    pub api: ApiConfig,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("network", &self.network)
            .field("private_key", &"<redacted>")
            .field("attestation", &self.attestation)
            .field("message_transmitter", &self.message_transmitter)
            .field("domains", &self.domains)
            .field("chain_ids", &self.chain_ids)
            .field("relayer", &self.relayer)
            .field("api", &self.api)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AttestationConfig {
    pub api_url: String,
    pub timeout_secs: u64,
}

/// Loop cadence and completion tuning
#[derive(Debug, Clone)]
pub struct RelayerConfig {
    pub monitor_interval_ms: u64,
    pub monitor_error_backoff_ms: u64,
    pub completion_interval_ms: u64,
    pub completion_error_backoff_ms: u64,
    pub receipt_timeout_secs: u64,
    pub default_gas_limit: u64,
    pub gas_buffer_percent: u64,
    pub token_decimals: u32,
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub bind_address: String,
    pub port: u16,
}

fn default_attestation_timeout() -> u64 {
    30
}

fn default_monitor_interval() -> u64 {
    5000
}

fn default_monitor_error_backoff() -> u64 {
    10000
}

fn default_completion_interval() -> u64 {
    2000
}

fn default_completion_error_backoff() -> u64 {
    5000
}

fn default_receipt_timeout() -> u64 {
    120
}

fn default_gas_limit() -> u64 {
    300_000
}

fn default_gas_buffer_percent() -> u64 {
    20
}

fn default_token_decimals() -> u32 {
    6
}

fn default_api_port() -> u16 {
    8000
}

/// Parse an optional variable, keeping `default` when it is unset
///
/// A value that is set but unparsable is an error rather than a silent default.
fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| eyre!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        let network: Network = env::var("CCTP_NETWORK")
            .unwrap_or_else(|_| "mainnet".to_string())
            .parse()?;

        let attestation = AttestationConfig {
            api_url: env::var("ATTESTATION_API_URL")
                .unwrap_or_else(|_| network.default_attestation_url().to_string()),
            timeout_secs: env_or("ATTESTATION_TIMEOUT_SECS", default_attestation_timeout())?,
        };

        let relayer = RelayerConfig {
            monitor_interval_ms: env_or("MONITOR_INTERVAL_MS", default_monitor_interval())?,
            monitor_error_backoff_ms: env_or(
                "MONITOR_ERROR_BACKOFF_MS",
                default_monitor_error_backoff(),
            )?,
            completion_interval_ms: env_or(
                "COMPLETION_INTERVAL_MS",
                default_completion_interval(),
            )?,
            completion_error_backoff_ms: env_or(
                "COMPLETION_ERROR_BACKOFF_MS",
                default_completion_error_backoff(),
            )?,
            receipt_timeout_secs: env_or("RECEIPT_TIMEOUT_SECS", default_receipt_timeout())?,
            default_gas_limit: env_or("DEFAULT_GAS_LIMIT", default_gas_limit())?,
            gas_buffer_percent: env_or("GAS_BUFFER_PERCENT", default_gas_buffer_percent())?,
            token_decimals: env_or("TOKEN_DECIMALS", default_token_decimals())?,
        };

        let api = ApiConfig {
            bind_address: env::var("API_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_or("API_PORT", default_api_port())?,
        };

        let config = Config {
            network,
            private_key: env::var("RELAYER_PRIVATE_KEY")
                .map_err(|_| eyre!("RELAYER_PRIVATE_KEY environment variable is required"))?,
            attestation,
            message_transmitter: env::var("MESSAGE_TRANSMITTER_ADDRESS")
                .unwrap_or_else(|_| DEFAULT_MESSAGE_TRANSMITTER.to_string()),
            domains: load_domains_from_env(network)?,
            chain_ids: ChainIdTable::load_from_env(network)?,
            relayer,
            api,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.private_key.len() != 66 || !self.private_key.starts_with("0x") {
            return Err(eyre!("private_key must be 66 chars (0x + 64 hex chars)"));
        }
        if hex::decode(&self.private_key[2..]).is_err() {
            return Err(eyre!("private_key must be hex"));
        }

        if self.message_transmitter.len() != 42 || !self.message_transmitter.starts_with("0x") {
            return Err(eyre!(
                "message_transmitter must be a valid hex address (42 chars with 0x prefix)"
            ));
        }

        if !self.attestation.api_url.starts_with("http://")
            && !self.attestation.api_url.starts_with("https://")
        {
            return Err(eyre!("attestation.api_url must be an http(s) URL"));
        }
        if self.attestation.timeout_secs == 0 {
            return Err(eyre!("attestation.timeout_secs must be greater than 0"));
        }

        if self.relayer.monitor_interval_ms == 0 || self.relayer.completion_interval_ms == 0 {
            return Err(eyre!("loop intervals must be greater than 0"));
        }
        if self.relayer.receipt_timeout_secs == 0 {
            return Err(eyre!("relayer.receipt_timeout_secs must be greater than 0"));
        }
        if self.relayer.default_gas_limit == 0 {
            return Err(eyre!("relayer.default_gas_limit must be greater than 0"));
        }
        if self.relayer.gas_buffer_percent > 100 {
            return Err(eyre!("relayer.gas_buffer_percent cannot exceed 100"));
        }
        if self.relayer.token_decimals > 36 {
            return Err(eyre!("relayer.token_decimals cannot exceed 36"));
        }

        for entry in self.domains.entries() {
            if entry.rpc_url.is_empty() {
                return Err(eyre!("rpc_url for {} cannot be empty", entry.name));
            }
        }

        Ok(())
    }

    pub fn signer(&self) -> Result<PrivateKeySigner> {
        self.private_key
            .parse()
            .map_err(|e| eyre!("Invalid private key: {}", e))
    }

    pub fn transmitter_address(&self) -> Result<Address> {
        Address::from_str(&self.message_transmitter)
            .wrap_err("Invalid MESSAGE_TRANSMITTER_ADDRESS")
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api.bind_address, self.api.port)
            .parse()
            .map_err(|e| {
                eyre!(
                    "Invalid bind address {}:{}: {}",
                    self.api.bind_address,
                    self.api.port,
                    e
                )
            })
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            monitor_interval: Duration::from_millis(self.relayer.monitor_interval_ms),
            monitor_error_backoff: Duration::from_millis(self.relayer.monitor_error_backoff_ms),
            completion: CompletionSettings {
                interval: Duration::from_millis(self.relayer.completion_interval_ms),
                error_backoff: Duration::from_millis(self.relayer.completion_error_backoff_ms),
                receipt_timeout: Duration::from_secs(self.relayer.receipt_timeout_secs),
                default_gas_limit: self.relayer.default_gas_limit,
                gas_buffer_percent: self.relayer.gas_buffer_percent,
                ..CompletionSettings::default()
            },
            token_decimals: self.relayer.token_decimals,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const TEST_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    const VARS: [&str; 9] = [
        "RELAYER_PRIVATE_KEY",
        "CCTP_NETWORK",
        "ATTESTATION_API_URL",
        "MONITOR_INTERVAL_MS",
        "GAS_BUFFER_PERCENT",
        "RECEIPT_TIMEOUT_SECS",
        "API_PORT",
        "CCTP_DOMAINS",
        "CHAIN_IDS",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_defaults() {
        clear_env();
        env::set_var("RELAYER_PRIVATE_KEY", TEST_KEY);

        let config = Config::load_from_env().unwrap();
        assert_eq!(config.network, Network::Mainnet);
        assert_eq!(config.attestation.api_url, "https://iris-api.circle.com");
        assert_eq!(config.message_transmitter, DEFAULT_MESSAGE_TRANSMITTER);
        assert_eq!(config.domains.len(), 6);
        assert_eq!(config.relayer.monitor_interval_ms, 5000);
        assert_eq!(config.relayer.completion_interval_ms, 2000);
        assert_eq!(config.relayer.receipt_timeout_secs, 120);
        assert_eq!(config.relayer.default_gas_limit, 300_000);
        assert_eq!(config.api.port, 8000);

        let settings = config.engine_settings();
        assert_eq!(settings.monitor_error_backoff, Duration::from_secs(10));
        assert_eq!(settings.completion.error_backoff, Duration::from_secs(5));
        assert_eq!(settings.token_decimals, 6);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_testnet_uses_sandbox() {
        clear_env();
        env::set_var("RELAYER_PRIVATE_KEY", TEST_KEY);
        env::set_var("CCTP_NETWORK", "testnet");

        let config = Config::load_from_env().unwrap();
        assert_eq!(config.network, Network::Testnet);
        assert_eq!(
            config.attestation.api_url,
            "https://iris-api-sandbox.circle.com"
        );
        assert_eq!(config.chain_ids.name_of(84532), Some("base"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_missing_private_key() {
        clear_env();
        let err = Config::load_from_env().unwrap_err();
        assert!(err.to_string().contains("RELAYER_PRIVATE_KEY"));
    }

    #[test]
    #[serial]
    fn test_invalid_values_rejected() {
        clear_env();
        env::set_var("RELAYER_PRIVATE_KEY", "0x1234");
        assert!(Config::load_from_env().is_err());

        env::set_var("RELAYER_PRIVATE_KEY", TEST_KEY);
        env::set_var("MONITOR_INTERVAL_MS", "soon");
        assert!(Config::load_from_env().is_err());

        env::remove_var("MONITOR_INTERVAL_MS");
        env::set_var("GAS_BUFFER_PERCENT", "250");
        assert!(Config::load_from_env().is_err());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_debug_redacts_private_key() {
        clear_env();
        env::set_var("RELAYER_PRIVATE_KEY", TEST_KEY);

        let config = Config::load_from_env().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains(&TEST_KEY[2..]));

        let signer = config.signer().unwrap();
        assert_eq!(
            format!("{:#x}", signer.address()),
            "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266"
        );
        assert!(config.transmitter_address().is_ok());
        assert_eq!(config.api_addr().unwrap().port(), 8000);

        clear_env();
    }
}
