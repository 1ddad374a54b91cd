//! Layered configuration: a TOML file overridden by `STAGEHAND_` environment variables.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_core::primitives::Address;
use anyhow::Context;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    artifact::DEFAULT_ARTIFACTS_DIR,
    error::DeployError,
    gas::{DEFAULT_BUMP_PERCENT, GasPriceStrategy},
    plan::{ParamValue, ResolveContext},
    registry::REGISTRY_FILENAME,
    rpc::DEFAULT_CONFIRMATION_TIMEOUT,
    verify::DEFAULT_BACKOFF,
};

/// The default name of the configuration file.
pub const CONFIG_FILENAME: &str = "Stagehand.toml";

/// Prefix of environment variables overriding the file. Nested keys are separated
/// by `__`, e.g. `STAGEHAND_NETWORKS__AMOY__VERIFICATION__API_KEY`.
pub const ENV_PREFIX: &str = "STAGEHAND_";

/// Default wall-clock budget for verifying one contract.
const DEFAULT_VERIFICATION_BUDGET: Duration = Duration::from_secs(600);

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagehandConfig {
    /// Path of the address registry shared by all networks.
    #[serde(default = "default_registry_path")]
    pub registry_path: PathBuf,
    /// Directory holding compiled artifacts.
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// Everything that differs between target networks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: Url,
    /// Account sending every transaction and receiving operator roles.
    pub operator: Address,
    #[serde(default = "default_bump_percent")]
    pub gas_bump_percent: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    /// Externally owned dependencies, by component name.
    #[serde(default)]
    pub external: BTreeMap<String, Address>,
    /// Static initialization values.
    #[serde(default)]
    pub params: BTreeMap<String, ParamValue>,
    #[serde(default)]
    pub verification: VerificationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Etherscan-compatible API endpoint.
    #[serde(default)]
    pub api_url: Option<Url>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u64,
    #[serde(default = "default_budget_secs")]
    pub budget_secs: u64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_url: None,
            api_key: None,
            backoff_secs: default_backoff_secs(),
            budget_secs: default_budget_secs(),
        }
    }
}

fn default_registry_path() -> PathBuf {
    PathBuf::from(REGISTRY_FILENAME)
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from(DEFAULT_ARTIFACTS_DIR)
}

fn default_bump_percent() -> u64 {
    DEFAULT_BUMP_PERCENT
}

fn default_confirmation_timeout_secs() -> u64 {
    DEFAULT_CONFIRMATION_TIMEOUT.as_secs()
}

fn default_backoff_secs() -> u64 {
    DEFAULT_BACKOFF.as_secs()
}

fn default_budget_secs() -> u64 {
    DEFAULT_VERIFICATION_BUDGET.as_secs()
}

impl StagehandConfig {
    /// Load the configuration from `path` merged with the environment.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let config = Self::from_figment(figment)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

        tracing::debug!(
            path = %path.display(),
            networks = config.networks.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Extract a configuration from an already assembled figment.
    pub fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        figment
            .extract()
            .context("Failed to parse configuration")
    }

    /// Settings of a named network.
    pub fn network(&self, name: &str) -> Result<&NetworkConfig, DeployError> {
        self.networks.get(name).ok_or_else(|| {
            let known: Vec<&str> = self.networks.keys().map(String::as_str).collect();
            DeployError::config(format!(
                "unknown network `{name}` (configured: {})",
                if known.is_empty() {
                    "none".to_string()
                } else {
                    known.join(", ")
                }
            ))
        })
    }
}

impl NetworkConfig {
    pub fn gas_strategy(&self) -> Result<GasPriceStrategy, DeployError> {
        GasPriceStrategy::new(self.gas_bump_percent)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn resolve_context(&self) -> ResolveContext<'_> {
        ResolveContext {
            operator: self.operator,
            external: &self.external,
            params: &self.params,
        }
    }
}

impl VerificationConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }

    /// Endpoint and key, required once verification is enabled.
    pub fn credentials(&self) -> Result<(&Url, &str), DeployError> {
        match (&self.api_url, &self.api_key) {
            (Some(url), Some(key)) if !key.is_empty() => Ok((url, key.as_str())),
            _ => Err(DeployError::config(
                "verification requires both `api_url` and `api_key`",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ParamType;
    use alloy_core::{dyn_abi::DynSolValue, primitives::U256};

    const SAMPLE: &str = r#"
registry_path = "data/addresses.json"

[networks.amoy]
chain_id = 80002
rpc_url = "https://rpc-amoy.polygon.technology"
operator = "0x07B584f6a7125491C991ca2a45ab9e641B1CeE1b"
gas_bump_percent = 30

[networks.amoy.external]
Receiver = "0x2332A085461391595C3127472046EDC39996e141"

[networks.amoy.params]
license_cost_usd = "1000000000000000000"
metadata_description = "Developer license"

[networks.amoy.verification]
enabled = true
api_url = "https://api.etherscan.io/v2/api"
api_key = "secret"
backoff_secs = 2
"#;

    fn sample() -> StagehandConfig {
        StagehandConfig::from_figment(Figment::new().merge(Toml::string(SAMPLE))).unwrap()
    }

    #[test]
    fn test_parse_network() {
        let config = sample();
        assert_eq!(config.registry_path, PathBuf::from("data/addresses.json"));
        assert_eq!(config.artifacts_dir, PathBuf::from(DEFAULT_ARTIFACTS_DIR));

        let amoy = config.network("amoy").unwrap();
        assert_eq!(amoy.chain_id, 80002);
        assert_eq!(amoy.gas_strategy().unwrap().bump_percent(), 30);
        assert_eq!(amoy.confirmation_timeout(), DEFAULT_CONFIRMATION_TIMEOUT);
        assert_eq!(amoy.verification.backoff(), Duration::from_secs(2));
        assert_eq!(amoy.verification.budget(), DEFAULT_VERIFICATION_BUDGET);
        assert_eq!(amoy.verification.credentials().unwrap().1, "secret");
    }

    #[test]
    fn test_params_resolve() {
        let config = sample();
        let ctx = config.network("amoy").unwrap().resolve_context();
        assert_eq!(
            ctx.param("license_cost_usd", ParamType::Uint).unwrap(),
            DynSolValue::Uint(U256::from(10u64).pow(U256::from(18u64)), 256)
        );
    }

    #[test]
    fn test_unknown_network_is_configuration_error() {
        let err = sample().network("polygon").unwrap_err();
        assert!(matches!(err, DeployError::Configuration(ref m) if m.contains("amoy")));
    }

    #[test]
    fn test_defaults() {
        let config = StagehandConfig::from_figment(Figment::new().merge(Toml::string(
            r#"
[networks.local]
chain_id = 31337
rpc_url = "http://localhost:8545"
operator = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
"#,
        )))
        .unwrap();

        assert_eq!(config.registry_path, PathBuf::from(REGISTRY_FILENAME));
        let local = config.network("local").unwrap();
        assert_eq!(local.gas_bump_percent, DEFAULT_BUMP_PERCENT);
        assert!(!local.verification.enabled);
        assert!(local.verification.credentials().is_err());
    }
}
