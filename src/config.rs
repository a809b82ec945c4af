use crate::domain::{Address, Lovelace};
use crate::toolchain::Network;
use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,

    pub ledger_api_url: String,
    pub ledger_project_id: String,
    pub payment_address: Address,
    pub image_builder_url: String,
    pub storage_url: String,
    pub storage_api_key: String,
    pub announce: Option<AnnounceConfig>,

    pub fight_policy_id: String,
    pub reward_policy_id: String,
    pub royalty_address: Address,
    pub partner_address: Address,
    /// Whole units charged per fight, before dust.
    pub base_cost: u64,
    pub partner_split: Lovelace,
    pub min_asset_output: Lovelace,

    pub cli_path: String,
    pub keys_dir: PathBuf,
    pub work_dir: PathBuf,
    pub roster_dir: PathBuf,
    pub image_archive_dir: Option<PathBuf>,
    pub testnet: bool,
    pub testnet_magic: u32,
    pub cli_timeout: Duration,

    pub process_refunds: bool,
    pub refund_every_n_passes: u64,
    pub refund_batch_limit: usize,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub tier_batch_limit: i64,
    pub http_timeout: Duration,
    pub strength_jitter: u32,
    pub mint_ttl_slots: u64,
    pub refund_ttl_slots: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnounceConfig {
    pub url: String,
    pub token: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

fn required(env_map: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    env_map
        .get(key)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnv(key.to_string()))
}

fn optional(env_map: &HashMap<String, String>, key: &str) -> Option<String> {
    env_map.get(key).filter(|v| !v.trim().is_empty()).cloned()
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expected: &str,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(key.to_string(), format!("must be {}, got {}", expected, raw))
        }),
    }
}

fn parse_bool(env_map: &HashMap<String, String>, key: &str) -> Result<bool, ConfigError> {
    match env_map.get(key).map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        None | Some("") | Some("false") | Some("0") | Some("no") => Ok(false),
        Some("true") | Some("1") | Some("yes") => Ok(true),
        Some(other) => Err(ConfigError::InvalidValue(
            key.to_string(),
            format!("must be true or false, got {}", other),
        )),
    }
}

fn positive<T: PartialOrd + Default>(key: &str, value: T) -> Result<T, ConfigError> {
    if value <= T::default() {
        return Err(ConfigError::InvalidValue(
            key.to_string(),
            "must be greater than zero".to_string(),
        ));
    }
    Ok(value)
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "a valid u16")?;
        let database_path = required(&env_map, "DATABASE_PATH")?;

        let ledger_api_url = required(&env_map, "LEDGER_API_URL")?;
        let ledger_project_id = required(&env_map, "LEDGER_PROJECT_ID")?;
        let payment_address = Address::new(required(&env_map, "PAYMENT_ADDRESS")?);
        let image_builder_url = required(&env_map, "IMAGE_BUILDER_URL")?;
        let storage_url = required(&env_map, "STORAGE_URL")?;
        let storage_api_key = required(&env_map, "STORAGE_API_KEY")?;

        let announce = match (
            optional(&env_map, "ANNOUNCE_URL"),
            optional(&env_map, "ANNOUNCE_TOKEN"),
        ) {
            (Some(url), Some(token)) => Some(AnnounceConfig { url, token }),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingEnv("ANNOUNCE_TOKEN".to_string())),
            (None, Some(_)) => return Err(ConfigError::MissingEnv("ANNOUNCE_URL".to_string())),
        };

        let fight_policy_id = required(&env_map, "FIGHT_POLICY_ID")?;
        let reward_policy_id = required(&env_map, "REWARD_POLICY_ID")?;
        let royalty_address = Address::new(required(&env_map, "ROYALTY_ADDRESS")?);
        let partner_address = Address::new(required(&env_map, "PARTNER_ADDRESS")?);

        let base_cost = required(&env_map, "BASE_COST")?
            .trim()
            .parse::<u64>()
            .map_err(|_| {
                ConfigError::InvalidValue(
                    "BASE_COST".to_string(),
                    "must be a whole number of units".to_string(),
                )
            })?;
        let base_cost = positive("BASE_COST", base_cost)?;

        let partner_split = Lovelace::new(parse_or(&env_map, "PARTNER_SPLIT", 5_000_000u64, "a u64")?);
        let min_asset_output = Lovelace::new(parse_or(
            &env_map,
            "MIN_ASSET_OUTPUT",
            1_250_000u64,
            "a u64",
        )?);

        let cli_path = optional(&env_map, "CLI_PATH").unwrap_or_else(|| "cardano-cli".to_string());
        let keys_dir = PathBuf::from(optional(&env_map, "KEYS_DIR").unwrap_or_else(|| "keys".to_string()));
        let work_dir = PathBuf::from(optional(&env_map, "WORK_DIR").unwrap_or_else(|| "work".to_string()));
        let roster_dir =
            PathBuf::from(optional(&env_map, "ROSTER_DIR").unwrap_or_else(|| "metadata".to_string()));
        let image_archive_dir = optional(&env_map, "IMAGE_ARCHIVE_DIR").map(PathBuf::from);
        let testnet = parse_bool(&env_map, "TESTNET")?;
        let testnet_magic = parse_or(&env_map, "TESTNET_MAGIC", 1_097_911_063u32, "a u32")?;
        let cli_timeout = Duration::from_secs(positive(
            "CLI_TIMEOUT_SECS",
            parse_or(&env_map, "CLI_TIMEOUT_SECS", 300u64, "a u64")?,
        )?);

        let process_refunds = parse_bool(&env_map, "PROCESS_REFUNDS")?;
        let refund_every_n_passes = positive(
            "REFUND_EVERY_N_PASSES",
            parse_or(&env_map, "REFUND_EVERY_N_PASSES", 10u64, "a u64")?,
        )?;
        let refund_batch_limit = parse_or(&env_map, "REFUND_BATCH_LIMIT", 10usize, "a usize")?;
        let poll_interval = Duration::from_secs(parse_or(&env_map, "POLL_INTERVAL_SECS", 30u64, "a u64")?);
        let error_backoff = Duration::from_secs(parse_or(&env_map, "ERROR_BACKOFF_SECS", 30u64, "a u64")?);
        let tier_batch_limit = positive(
            "TIER_BATCH_LIMIT",
            parse_or(&env_map, "TIER_BATCH_LIMIT", 10i64, "an i64")?,
        )?;
        let http_timeout = Duration::from_secs(positive(
            "HTTP_TIMEOUT_SECS",
            parse_or(&env_map, "HTTP_TIMEOUT_SECS", 300u64, "a u64")?,
        )?);
        let strength_jitter = parse_or(&env_map, "STRENGTH_JITTER", 120u32, "a u32")?;
        let mint_ttl_slots = parse_or(&env_map, "MINT_TTL_SLOTS", 1000u64, "a u64")?;
        let refund_ttl_slots = parse_or(&env_map, "REFUND_TTL_SLOTS", 10_800u64, "a u64")?;

        Ok(Config {
            port,
            database_path,
            ledger_api_url,
            ledger_project_id,
            payment_address,
            image_builder_url,
            storage_url,
            storage_api_key,
            announce,
            fight_policy_id,
            reward_policy_id,
            royalty_address,
            partner_address,
            base_cost,
            partner_split,
            min_asset_output,
            cli_path,
            keys_dir,
            work_dir,
            roster_dir,
            image_archive_dir,
            testnet,
            testnet_magic,
            cli_timeout,
            process_refunds,
            refund_every_n_passes,
            refund_batch_limit,
            poll_interval,
            error_backoff,
            tier_batch_limit,
            http_timeout,
            strength_jitter,
            mint_ttl_slots,
            refund_ttl_slots,
        })
    }

    pub fn network(&self) -> Network {
        if self.testnet {
            Network::Testnet {
                magic: self.testnet_magic,
            }
        } else {
            Network::Mainnet
        }
    }
}
