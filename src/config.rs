//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (backend anon key, chat API key, login password) are referenced
//! by env-var name in the config and resolved at runtime.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

use crate::odds::{OddsConfig, OddsFormat};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub client: ClientConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub odds: OddsConfig,
    #[serde(default)]
    pub betting: BettingConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    pub support: SupportConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub name: String,
    /// Poll interval feeding the change stream.
    pub poll_interval_secs: u64,
    /// Where user preferences are persisted.
    #[serde(default)]
    pub preferences_path: Option<String>,
    /// Env var holding the login identity (username, phone or email).
    pub identity_env: String,
    pub password_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    /// Base project URL, e.g. `https://xyz.supabase.co`.
    pub url: String,
    pub anon_key_env: String,
    #[serde(default = "default_proof_bucket")]
    pub proof_bucket: String,
}

fn default_proof_bucket() -> String {
    "payment_proofs".to_string()
}

/// Client-side bet gates. The backend remains the authority.
#[derive(Debug, Deserialize, Clone)]
pub struct BettingConfig {
    pub min_bet: Decimal,
    pub draw_max_bet: Decimal,
    /// Bets at or above this amount ask for confirmation when enabled.
    pub confirm_threshold: Decimal,
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            min_bet: dec!(20),
            draw_max_bet: dec!(1000),
            confirm_threshold: dec!(1000),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WalletConfig {
    /// PHP per USDT for crypto cash-outs.
    pub usdt_rate: Decimal,
    pub min_wallet_address_len: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            usdt_rate: dec!(58.50),
            min_wallet_address_len: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupportConfig {
    pub enabled: bool,
    pub model: String,
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Operator notes appended to the assistant's prompt.
    #[serde(default)]
    pub knowledge: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
    #[serde(default)]
    pub odds_format: OddsFormat,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Resolve an environment variable into a secret.
    pub fn resolve_secret(env_name: &str) -> Result<SecretString> {
        Self::resolve_env(env_name).map(SecretString::new)
    }
}
