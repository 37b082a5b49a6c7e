//! Obscura Configuration
//!
//! Shared configuration crate for the Obscura client and CLI.
//!
//! Handles loading configuration from:
//! 1. OBSCURA_CONFIG env var (explicit path)
//! 2. ./config.toml (current directory)
//! 3. ~/.obscura/config.toml (user home)
//!
//! Environment variables take precedence over TOML config.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use std::{env, fs};

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_NAME: &str = ".obscura";

// ============================================================================
// Default Constants
// ============================================================================

const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
const DEFAULT_CONTRACT: &str = "0x0000000000000000000000000000000000000000";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_RECEIPT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RECEIPT_POLL_MS: u64 = 1000;

const DEFAULT_REVEAL_DELAY_BLOCKS: u64 = 2;
const DEFAULT_ORDER_TTL_SECS: u64 = 3600;
const DEFAULT_BLOCK_POLL_MS: u64 = 2000;

const DEFAULT_KEEPER_SAMPLE: usize = 10;
const DEFAULT_KEEPER_PAGE: usize = 10;

const DEFAULT_DATA_DIR: &str = "./obscura-data";
const DEFAULT_KDF_ITERATIONS: u32 = 100_000;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_BASE_MS: u64 = 500;
const DEFAULT_RETRY_MAX_MS: u64 = 30_000;

// ============================================================================
// Config Structs
// ============================================================================

/// Root configuration structure (matches TOML layout)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObscuraConfig {
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub keepers: KeeperConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub features: FeatureFlags,
}

/// Ledger connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_contract")]
    pub contract_address: String,
    /// Chain id for transaction signing; asked from the node when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// How long a sent transaction may go without a receipt.
    #[serde(default = "default_receipt_timeout")]
    pub receipt_timeout_secs: u64,
    #[serde(default = "default_receipt_poll")]
    pub receipt_poll_interval_ms: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.into(),
            contract_address: DEFAULT_CONTRACT.into(),
            chain_id: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            receipt_timeout_secs: DEFAULT_RECEIPT_TIMEOUT_SECS,
            receipt_poll_interval_ms: DEFAULT_RECEIPT_POLL_MS,
        }
    }
}

impl LedgerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn receipt_timeout(&self) -> Duration {
        Duration::from_secs(self.receipt_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

fn default_rpc_url() -> String {
    DEFAULT_RPC_URL.into()
}
fn default_contract() -> String {
    DEFAULT_CONTRACT.into()
}
fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}
fn default_receipt_timeout() -> u64 {
    DEFAULT_RECEIPT_TIMEOUT_SECS
}
fn default_receipt_poll() -> u64 {
    DEFAULT_RECEIPT_POLL_MS
}

/// Protocol timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_reveal_delay")]
    pub commit_reveal_delay_blocks: u64,
    #[serde(default = "default_order_ttl")]
    pub order_ttl_secs: u64,
    #[serde(default = "default_block_poll")]
    pub block_poll_interval_ms: u64,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            commit_reveal_delay_blocks: DEFAULT_REVEAL_DELAY_BLOCKS,
            order_ttl_secs: DEFAULT_ORDER_TTL_SECS,
            block_poll_interval_ms: DEFAULT_BLOCK_POLL_MS,
        }
    }
}

impl ProtocolConfig {
    pub fn order_ttl(&self) -> Duration {
        Duration::from_secs(self.order_ttl_secs)
    }

    pub fn block_poll_interval(&self) -> Duration {
        Duration::from_millis(self.block_poll_interval_ms)
    }
}

fn default_reveal_delay() -> u64 {
    DEFAULT_REVEAL_DELAY_BLOCKS
}
fn default_order_ttl() -> u64 {
    DEFAULT_ORDER_TTL_SECS
}
fn default_block_poll() -> u64 {
    DEFAULT_BLOCK_POLL_MS
}

/// Keeper discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Upper bound on candidates fetched per selection.
    #[serde(default = "default_keeper_sample")]
    pub sample_size: usize,
    #[serde(default = "default_keeper_page")]
    pub page_size: usize,
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_KEEPER_SAMPLE,
            page_size: DEFAULT_KEEPER_PAGE,
        }
    }
}

fn default_keeper_sample() -> usize {
    DEFAULT_KEEPER_SAMPLE
}
fn default_keeper_page() -> usize {
    DEFAULT_KEEPER_PAGE
}

/// Encrypted local storage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub path: String,
    #[serde(default = "default_kdf_iterations")]
    pub kdf_iterations: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_DATA_DIR.into(),
            kdf_iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

fn default_data_dir() -> String {
    DEFAULT_DATA_DIR.into()
}
fn default_kdf_iterations() -> u32 {
    DEFAULT_KDF_ITERATIONS
}

/// Backoff for network calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_RETRY_BASE_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_MS,
        }
    }
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}
fn default_retry_base_ms() -> u64 {
    DEFAULT_RETRY_BASE_MS
}
fn default_retry_max_ms() -> u64 {
    DEFAULT_RETRY_MAX_MS
}

/// Hash behind commitments and nullifiers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentSchemeToml {
    #[default]
    Poseidon,
    Keccak,
}

impl FromStr for CommitmentSchemeToml {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "poseidon" => Ok(Self::Poseidon),
            "keccak" | "keccak256" => Ok(Self::Keccak),
            other => bail!("unknown commitment scheme {other:?} (expected poseidon or keccak)"),
        }
    }
}

/// Feature flags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Run against the in-memory ledger instead of RPC.
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default)]
    pub commitment_scheme: CommitmentSchemeToml,
}

// ============================================================================
// Override Helpers
// ============================================================================

/// Set field from the variable if present
fn set_string(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut String) {
    if let Some(v) = lookup(key) {
        *field = v;
    }
}

/// Set field from the variable if present; a value that does not parse is
/// an error rather than a silent fallback.
fn set_parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, field: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(v) = lookup(key) {
        *field = v
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, v, e))?;
    }
    Ok(())
}

/// "1" or "true" (any case)
fn parse_bool(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

// ============================================================================
// Implementation
// ============================================================================

impl ObscuraConfig {
    /// Load configuration from config file with env var overrides
    pub fn load() -> Result<Self> {
        let mut config = match Self::find_config_file() {
            Some(path) => {
                log::info!("Loading config from: {}", path.display());
                Self::parse_file(&path)?
            }
            None => {
                log::info!("No config file found, using defaults and environment variables");
                Self::default()
            }
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load configuration from a specific file path
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::parse_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Find the config file path
    fn find_config_file() -> Option<PathBuf> {
        // 1. Check OBSCURA_CONFIG env var
        if let Ok(path) = env::var("OBSCURA_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
            log::warn!("OBSCURA_CONFIG points at {} which does not exist", path.display());
        }

        // 2. Check ./config.toml (current directory)
        let local_path = PathBuf::from(CONFIG_FILE_NAME);
        if local_path.exists() {
            return Some(local_path);
        }

        // 3. Check ~/.obscura/config.toml
        Self::default_config_path().filter(|p| p.exists())
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Apply overrides from any key lookup (the process environment in practice).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        // Ledger
        set_string(&lookup, "OBSCURA_RPC_URL", &mut self.ledger.rpc_url);
        set_string(&lookup, "OBSCURA_CONTRACT", &mut self.ledger.contract_address);
        if let Some(v) = lookup("OBSCURA_CHAIN_ID") {
            let id = v
                .parse()
                .with_context(|| format!("invalid OBSCURA_CHAIN_ID={v:?}"))?;
            self.ledger.chain_id = Some(id);
        }

        // Storage
        set_string(&lookup, "OBSCURA_DATA_DIR", &mut self.storage.path);
        set_parse(
            &lookup,
            "OBSCURA_KDF_ITERATIONS",
            &mut self.storage.kdf_iterations,
        )?;

        // Protocol
        set_parse(
            &lookup,
            "OBSCURA_REVEAL_DELAY",
            &mut self.protocol.commit_reveal_delay_blocks,
        )?;

        // Retry
        set_parse(&lookup, "OBSCURA_MAX_RETRIES", &mut self.retry.max_retries)?;

        // Features
        if let Some(v) = lookup("OBSCURA_DEV_MODE") {
            self.features.dev_mode = parse_bool(&v);
        }
        set_parse(
            &lookup,
            "OBSCURA_SCHEME",
            &mut self.features.commitment_scheme,
        )?;
        Ok(())
    }

    /// Get the default config file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Generate a sample config file
    pub fn generate_sample() -> String {
        let mut sample = Self::default();
        sample.features.dev_mode = true;
        toml::to_string_pretty(&sample).unwrap_or_default()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = ObscuraConfig::default();
        assert_eq!(config.ledger.rpc_url, DEFAULT_RPC_URL);
        assert_eq!(config.protocol.commit_reveal_delay_blocks, 2);
        assert_eq!(config.storage.kdf_iterations, 100_000);
        assert_eq!(
            config.features.commitment_scheme,
            CommitmentSchemeToml::Poseidon
        );
        assert!(!config.features.dev_mode);
    }

    #[test]
    fn test_generate_sample() {
        let sample = ObscuraConfig::generate_sample();
        for section in [
            "[ledger]",
            "[protocol]",
            "[keepers]",
            "[storage]",
            "[retry]",
            "[features]",
        ] {
            assert!(sample.contains(section), "missing {section}");
        }
    }

    #[test]
    fn test_parse_sample() {
        let sample = ObscuraConfig::generate_sample();
        let parsed: ObscuraConfig = toml::from_str(&sample).unwrap();
        assert_eq!(parsed.ledger.rpc_url, DEFAULT_RPC_URL);
        assert!(parsed.features.dev_mode);
        // the sample must not pin a chain or carry an account
        assert_eq!(parsed.ledger.chain_id, None);
        assert!(!sample.contains("sender"));
        assert_eq!(parsed.ledger, LedgerConfig::default());
    }

    #[test]
    fn test_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[protocol]\ncommit_reveal_delay_blocks = 5\n\n[features]\ncommitment_scheme = \"keccak\""
        )
        .unwrap();
        let config = ObscuraConfig::parse_file(file.path()).unwrap();
        assert_eq!(config.protocol.commit_reveal_delay_blocks, 5);
        assert_eq!(config.protocol.order_ttl_secs, DEFAULT_ORDER_TTL_SECS);
        assert_eq!(config.features.commitment_scheme, CommitmentSchemeToml::Keccak);
        assert_eq!(config.keepers, KeeperConfig::default());
    }

    #[test]
    fn test_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[protocol\n").unwrap();
        let err = ObscuraConfig::parse_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse"));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OBSCURA_RPC_URL", "http://node:8545"),
            ("OBSCURA_CHAIN_ID", "31337"),
            ("OBSCURA_REVEAL_DELAY", "7"),
            ("OBSCURA_MAX_RETRIES", "9"),
            ("OBSCURA_DEV_MODE", "TRUE"),
            ("OBSCURA_SCHEME", "keccak"),
            ("OBSCURA_KDF_ITERATIONS", "5000"),
        ]
        .into_iter()
        .collect();

        let mut config = ObscuraConfig::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.ledger.rpc_url, "http://node:8545");
        assert_eq!(config.ledger.chain_id, Some(31337));
        assert_eq!(config.protocol.commit_reveal_delay_blocks, 7);
        assert_eq!(config.retry.max_retries, 9);
        assert!(config.features.dev_mode);
        assert_eq!(config.features.commitment_scheme, CommitmentSchemeToml::Keccak);
        assert_eq!(config.storage.kdf_iterations, 5000);
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        let mut config = ObscuraConfig::default();
        config.features.commitment_scheme = CommitmentSchemeToml::Keccak;
        let err = config
            .apply_overrides(|k| (k == "OBSCURA_SCHEME").then(|| "kecak".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("OBSCURA_SCHEME"), "{err}");
        // the previous choice is left alone
        assert_eq!(config.features.commitment_scheme, CommitmentSchemeToml::Keccak);

        config
            .apply_overrides(|k| (k == "OBSCURA_SCHEME").then(|| "Poseidon".to_string()))
            .unwrap();
        assert_eq!(config.features.commitment_scheme, CommitmentSchemeToml::Poseidon);
    }

    #[test]
    fn test_unparseable_number_rejected() {
        let mut config = ObscuraConfig::default();
        let err = config
            .apply_overrides(|k| (k == "OBSCURA_MAX_RETRIES").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("OBSCURA_MAX_RETRIES"), "{err}");
        assert_eq!(config.retry.max_retries, DEFAULT_MAX_RETRIES);
    }
}
