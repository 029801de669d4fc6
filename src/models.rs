use crate::error::ProviderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderIdentifier {
    Copilot,
    Claude,
    Codex,
    #[serde(rename = "openrouter")]
    OpenRouter,
    #[serde(rename = "nanogpt")]
    NanoGpt,
    #[serde(rename = "zai-coding-plan")]
    ZaiCodingPlan,
}

impl ProviderIdentifier {
    pub fn all() -> [ProviderIdentifier; 6] {
        [
            ProviderIdentifier::Copilot,
            ProviderIdentifier::Claude,
            ProviderIdentifier::Codex,
            ProviderIdentifier::OpenRouter,
            ProviderIdentifier::NanoGpt,
            ProviderIdentifier::ZaiCodingPlan,
        ]
    }

    /// Stable lowercase token used in config keys, file names and JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderIdentifier::Copilot => "copilot",
            ProviderIdentifier::Claude => "claude",
            ProviderIdentifier::Codex => "codex",
            ProviderIdentifier::OpenRouter => "openrouter",
            ProviderIdentifier::NanoGpt => "nanogpt",
            ProviderIdentifier::ZaiCodingPlan => "zai-coding-plan",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderIdentifier::Copilot => "GitHub Copilot",
            ProviderIdentifier::Claude => "Claude",
            ProviderIdentifier::Codex => "Codex",
            ProviderIdentifier::OpenRouter => "OpenRouter",
            ProviderIdentifier::NanoGpt => "Nano-GPT",
            ProviderIdentifier::ZaiCodingPlan => "Z.ai Coding Plan",
        }
    }
}

impl fmt::Display for ProviderIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderIdentifier {
    type Err = String;

    /// Accepts the raw token, the display name, or a substring of exactly one
    /// display name (case-insensitive).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        if needle.is_empty() {
            return Err("empty provider name".to_string());
        }

        let all = ProviderIdentifier::all();
        if let Some(id) = all
            .iter()
            .find(|id| id.as_str() == needle || id.display_name().to_lowercase() == needle)
        {
            return Ok(*id);
        }

        let partial: Vec<_> = all
            .iter()
            .filter(|id| id.display_name().to_lowercase().contains(&needle))
            .collect();
        match partial.as_slice() {
            [only] => Ok(**only),
            [] => Err(format!("provider '{}' not found", s)),
            _ => Err(format!("provider '{}' is ambiguous", s)),
        }
    }
}

/// Billing model of a provider, fixed per variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    PayAsYouGo,
    QuotaBased,
}

/// Primary usage figure for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ProviderUsage {
    PayAsYouGo {
        /// Already normalized to 0-100 at decode time
        utilization_percent: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost_spent: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resets_at: Option<DateTime<Utc>>,
    },
    QuotaBased {
        /// Negative once the entitlement is exceeded
        remaining: i64,
        entitlement: u64,
        overage_permitted: bool,
    },
}

impl ProviderUsage {
    pub fn kind(&self) -> ProviderKind {
        match self {
            ProviderUsage::PayAsYouGo { .. } => ProviderKind::PayAsYouGo,
            ProviderUsage::QuotaBased { .. } => ProviderKind::QuotaBased,
        }
    }

    /// Percent consumed. Quota-based usage may exceed 100 once in overage.
    pub fn usage_percentage(&self) -> f64 {
        match *self {
            ProviderUsage::PayAsYouGo {
                utilization_percent,
                ..
            } => utilization_percent,
            ProviderUsage::QuotaBased {
                remaining,
                entitlement,
                ..
            } => {
                if entitlement > 0 {
                    let entitlement = entitlement as f64;
                    100.0 * (entitlement - remaining as f64) / entitlement
                } else {
                    0.0
                }
            }
        }
    }

    /// Percent of the entitlement still available; negative in overage.
    /// `None` for pay-as-you-go and for a zero entitlement.
    pub fn remaining_percentage(&self) -> Option<f64> {
        match *self {
            ProviderUsage::QuotaBased {
                remaining,
                entitlement,
                ..
            } if entitlement > 0 => Some(100.0 * remaining as f64 / entitlement as f64),
            ProviderUsage::QuotaBased { .. } | ProviderUsage::PayAsYouGo { .. } => None,
        }
    }

    pub fn overage_amount(&self) -> u64 {
        match *self {
            ProviderUsage::QuotaBased { remaining, .. } if remaining < 0 => remaining.unsigned_abs(),
            _ => 0,
        }
    }

    pub fn is_within_limit(&self) -> bool {
        match *self {
            ProviderUsage::PayAsYouGo {
                utilization_percent,
                ..
            } => utilization_percent < 100.0,
            ProviderUsage::QuotaBased { remaining, .. } => remaining >= 0,
        }
    }

    pub fn remaining_quota(&self) -> Option<i64> {
        match *self {
            ProviderUsage::QuotaBased { remaining, .. } => Some(remaining),
            ProviderUsage::PayAsYouGo { .. } => None,
        }
    }

    pub fn total_entitlement(&self) -> Option<u64> {
        match *self {
            ProviderUsage::QuotaBased { entitlement, .. } => Some(entitlement),
            ProviderUsage::PayAsYouGo { .. } => None,
        }
    }
}

/// A secondary rate window reported alongside the primary figure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateWindow {
    /// Usage percentage (0-100)
    pub used_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    /// Window length in minutes (if known)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_minutes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,
    /// Human-readable reset description (e.g., "in 2h")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_description: Option<String>,
}

impl RateWindow {
    pub fn remaining_percent(&self) -> f64 {
        100.0 - self.used_percent
    }
}

/// Optional breakdown attached to a fetch result. Every field is best-effort.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetailedUsage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub daily_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekly_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_usage: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_credits: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_credits: Option<f64>,
    /// Account balance in USD
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_remaining: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_window: Option<RateWindow>,
}

impl DetailedUsage {
    pub fn has_any_value(&self) -> bool {
        self.daily_usage.is_some()
            || self.weekly_usage.is_some()
            || self.monthly_usage.is_some()
            || self.total_credits.is_some()
            || self.remaining_credits.is_some()
            || self.balance.is_some()
            || self.limit.is_some()
            || self.limit_remaining.is_some()
            || self.reset_period.is_some()
            || self.plan.is_some()
            || self.secondary_window.is_some()
    }

    /// `None` when nothing was populated, so callers never carry an empty shell.
    pub fn into_option(self) -> Option<Self> {
        self.has_any_value().then_some(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResult {
    pub usage: ProviderUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<DetailedUsage>,
}

impl ProviderResult {
    pub fn new(usage: ProviderUsage, details: Option<DetailedUsage>) -> Self {
        Self { usage, details }
    }
}

/// Outcome of one refresh cycle. A provider lands in exactly one of the maps.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub results: HashMap<ProviderIdentifier, ProviderResult>,
    pub errors: HashMap<ProviderIdentifier, ProviderError>,
}

impl FetchOutcome {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty() && self.errors.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.results.len() + self.errors.len()
    }
}

/// Maps a reported "percent used" onto 0-100. Values at or below 1.0 are fractions.
pub fn normalize_percent(raw: f64) -> f64 {
    let percent = if raw <= 1.0 { raw * 100.0 } else { raw };
    clamp_percent(percent)
}

pub fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}
