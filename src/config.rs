use crate::forecast::DEFAULT_COST_PER_REQUEST;
use crate::manager::{OverageRates, DEFAULT_ALERT_THRESHOLD_PERCENT};
use crate::models::ProviderIdentifier;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// GitHub bills premium requests beyond the plan at this rate.
const COPILOT_OVERAGE_RATE: f64 = 0.04;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub providers: HashMap<ProviderIdentifier, ProviderConfig>,
    #[serde(default)]
    pub forecast: ForecastConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Price per request beyond the entitlement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overage_rate: Option<f64>,
}

fn default_true() -> bool {
    true
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            overage_rate: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastConfig {
    #[serde(default = "default_cost_per_request")]
    pub cost_per_request: f64,
}

fn default_cost_per_request() -> f64 {
    DEFAULT_COST_PER_REQUEST
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            cost_per_request: default_cost_per_request(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    #[serde(default = "default_threshold")]
    pub quota_threshold_percent: f64,
}

fn default_threshold() -> f64 {
    DEFAULT_ALERT_THRESHOLD_PERCENT
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            quota_threshold_percent: default_threshold(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let providers = ProviderIdentifier::all()
            .into_iter()
            .map(|id| {
                let config = ProviderConfig {
                    overage_rate: Self::default_overage_rate(id),
                    ..Default::default()
                };
                (id, config)
            })
            .collect();

        Self {
            providers,
            forecast: ForecastConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl Config {
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("usagebar")
            .join("config.toml")
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("parsing {}", path.display()))?;
            Ok(config)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn is_provider_enabled(&self, provider: ProviderIdentifier) -> bool {
        self.providers
            .get(&provider)
            .map(|c| c.enabled)
            .unwrap_or(true)
    }

    pub fn disabled_providers(&self) -> Vec<ProviderIdentifier> {
        ProviderIdentifier::all()
            .into_iter()
            .filter(|id| !self.is_provider_enabled(*id))
            .collect()
    }

    /// Configured rates, falling back to the built-in ones for providers
    /// without an entry.
    pub fn overage_rates(&self) -> OverageRates {
        ProviderIdentifier::all()
            .into_iter()
            .filter_map(|id| {
                let rate = match self.providers.get(&id) {
                    Some(config) => config.overage_rate,
                    None => Self::default_overage_rate(id),
                };
                rate.map(|r| (id, r))
            })
            .fold(OverageRates::new(), |rates, (id, rate)| rates.with(id, rate))
    }

    fn default_overage_rate(provider: ProviderIdentifier) -> Option<f64> {
        match provider {
            ProviderIdentifier::Copilot => Some(COPILOT_OVERAGE_RATE),
            _ => None,
        }
    }
}
