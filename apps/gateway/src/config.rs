// [apps/gateway/src/config.rs]
//! Startup configuration: environment variables (§6) read via `std::env`
//! plus `dotenvy`, and a TOML file supplying the registry's aliases,
//! agent bindings, and pricing table. `GatewayConfig` is assembled once
//! at boot and passed by reference — never a module-level singleton.

use hounfour_gateway_models::{PricingEntry, ProviderModel};
use hounfour_gateway_registry::RegistryConfig;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable '{0}'")]
    MissingEnv(String),
    #[error("HS256 is not permitted in production (NODE_ENV=production)")]
    Hs256InProduction,
    #[error("registry file '{path}' could not be read: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("registry file '{path}' is not valid TOML: {source}")]
    TomlParse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("ambiguous key material: {0}")]
    AmbiguousKeyMaterial(String),
}

/// Raw shape of the registry TOML file: `[[alias]]`, `[[agent]]`, `[[pricing]]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryFile {
    #[serde(default)]
    pub alias: Vec<AliasRow>,
    #[serde(default)]
    pub agent: Vec<AgentRow>,
    #[serde(default)]
    pub pricing: Vec<PricingEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AliasRow {
    pub name: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentRow {
    pub agent: String,
    pub alias: String,
}

pub fn load_registry_file(path: &Path) -> Result<RegistryConfig, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
        path: path.display().to_string(),
        source,
    })?;
    let file: RegistryFile = toml::from_str(&raw).map_err(|source| ConfigError::TomlParse {
        path: path.display().to_string(),
        source,
    })?;

    Ok(RegistryConfig {
        aliases: file
            .alias
            .into_iter()
            .map(|row| (row.name, ProviderModel::new(row.provider, row.model)))
            .collect(),
        agent_aliases: file.agent.into_iter().map(|row| (row.agent, row.alias)).collect(),
        pricing: file.pricing,
    })
}

/// §6's JWT algorithm selection. `HS256` is rejected outright whenever
/// `NODE_ENV=production`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwtAlgorithm {
    Es256,
    Hs256,
}

/// Startup configuration assembled once in `main.rs`. Every field here
/// traces back to an environment variable or the registry TOML file —
/// nothing is read from the environment again once this struct exists.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub node_env: String,
    pub jwt_algorithm: JwtAlgorithm,
    pub s2s_private_key: Option<Vec<u8>>,
    pub s2s_jwt_secret: Option<Vec<u8>>,
    pub s2s_kid: Option<String>,
    pub cheval_hmac_secret: Vec<u8>,
    pub cheval_hmac_secret_prev: Option<Vec<u8>>,
    pub redis_url: Option<String>,
    pub otlp_endpoint: Option<String>,
    pub arrakis_billing_url: Option<String>,
    pub usd_usdc_exchange_rate: f64,
    pub beta_bypass_addresses: Vec<String>,
    pub budgets: HashMap<String, u64>,
    pub ledger_base_dir: std::path::PathBuf,
    pub checkpoint_path: std::path::PathBuf,
}

impl GatewayConfig {
    /// Reads `§6`'s recognized environment variables. Callers are
    /// expected to have run `dotenvy::dotenv().ok()` first.
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_env = std::env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string());
        let is_production = node_env == "production";

        let alg_env = std::env::var("FINN_S2S_JWT_ALG").ok();
        if is_production && alg_env.is_none() {
            return Err(ConfigError::AmbiguousKeyMaterial(
                "FINN_S2S_JWT_ALG must be set explicitly in production; no algorithm may be inferred".to_string(),
            ));
        }
        let alg_raw = alg_env.unwrap_or_else(|| "ES256".to_string());
        let jwt_algorithm = match alg_raw.as_str() {
            "ES256" => JwtAlgorithm::Es256,
            "HS256" => {
                if is_production {
                    return Err(ConfigError::Hs256InProduction);
                }
                JwtAlgorithm::Hs256
            }
            other => {
                tracing::warn!(alg = other, "unrecognized FINN_S2S_JWT_ALG, defaulting to ES256");
                JwtAlgorithm::Es256
            }
        };

        let s2s_private_key = std::env::var("FINN_S2S_PRIVATE_KEY").ok().map(String::into_bytes);
        let s2s_jwt_secret = std::env::var("FINN_S2S_JWT_SECRET").ok().map(String::into_bytes);
        let s2s_kid = std::env::var("FINN_S2S_KID").ok();

        let cheval_hmac_secret = std::env::var("CHEVAL_HMAC_SECRET")
            .map_err(|_| ConfigError::MissingEnv("CHEVAL_HMAC_SECRET".to_string()))?
            .into_bytes();
        let cheval_hmac_secret_prev = std::env::var("CHEVAL_HMAC_SECRET_PREV").ok().map(String::into_bytes);

        let usd_usdc_exchange_rate = std::env::var("USD_USDC_EXCHANGE_RATE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(1.0);

        let beta_bypass_addresses = std::env::var("BETA_BYPASS_ADDRESSES")
            .map(|v| v.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect())
            .unwrap_or_default();

        Ok(Self {
            node_env,
            jwt_algorithm,
            s2s_private_key,
            s2s_jwt_secret,
            s2s_kid,
            cheval_hmac_secret,
            cheval_hmac_secret_prev,
            redis_url: std::env::var("REDIS_URL").ok(),
            otlp_endpoint: std::env::var("OTLP_ENDPOINT").ok(),
            arrakis_billing_url: std::env::var("ARRAKIS_BILLING_URL").ok(),
            usd_usdc_exchange_rate,
            beta_bypass_addresses,
            budgets: HashMap::new(),
            ledger_base_dir: std::env::var("LEDGER_BASE_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| std::path::PathBuf::from("./ledger-data")),
            checkpoint_path: std::env::var("BUDGET_CHECKPOINT_PATH")
                .map(std::path::PathBuf::from)
                .unwrap_or_else(|_| std::path::PathBuf::from("./ledger-data/checkpoint.json")),
        })
    }

    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }

    /// §9 "BETA_BYPASS_ADDRESSES": wallets in this list skip payment
    /// verification entirely, for controlled beta rollouts.
    pub fn bypasses_payment(&self, wallet_address: &str) -> bool {
        self.beta_bypass_addresses.iter().any(|a| a == &wallet_address.to_lowercase())
    }

    /// Builds the §6 identity-verification key material from whichever
    /// of `FINN_S2S_PRIVATE_KEY` / `FINN_S2S_JWT_SECRET` matches
    /// `jwt_algorithm`.
    pub fn identity_verifying_key(&self) -> Result<hounfour_gateway_identity::VerifyingKey, ConfigError> {
        match self.jwt_algorithm {
            JwtAlgorithm::Es256 => {
                let key = self
                    .s2s_private_key
                    .clone()
                    .ok_or_else(|| ConfigError::MissingEnv("FINN_S2S_PRIVATE_KEY".to_string()))?;
                Ok(hounfour_gateway_identity::VerifyingKey::Es256 { public_key_pem: key })
            }
            JwtAlgorithm::Hs256 => {
                let secret = self
                    .s2s_jwt_secret
                    .clone()
                    .ok_or_else(|| ConfigError::MissingEnv("FINN_S2S_JWT_SECRET".to_string()))?;
                Ok(hounfour_gateway_identity::VerifyingKey::Hs256 { secret })
            }
        }
    }
}
