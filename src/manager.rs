use crate::credentials::CredentialStore;
use crate::models::{FetchOutcome, ProviderIdentifier, ProviderResult, ProviderUsage};
use crate::providers::ProviderFetcher;
use futures::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub const DEFAULT_ALERT_THRESHOLD_PERCENT: f64 = 20.0;

/// Per-provider price of one request beyond the entitlement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverageRates {
    rates: HashMap<ProviderIdentifier, f64>,
}

impl OverageRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: ProviderIdentifier, rate: f64) -> Self {
        self.rates.insert(provider, rate);
        self
    }

    /// Unknown providers have no billable overage.
    pub fn rate(&self, provider: ProviderIdentifier) -> f64 {
        self.rates.get(&provider).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaAlert {
    pub provider: ProviderIdentifier,
    /// Negative once in overage
    pub remaining_percentage: f64,
}

pub struct ProviderManager {
    providers: Vec<Arc<dyn ProviderFetcher>>,
    credentials: Arc<dyn CredentialStore>,
    disabled: HashSet<ProviderIdentifier>,
    overage_rates: OverageRates,
    alert_threshold: f64,
}

impl ProviderManager {
    pub fn new(
        providers: Vec<Arc<dyn ProviderFetcher>>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        let mut seen = HashSet::new();
        let providers = providers
            .into_iter()
            .filter(|p| {
                let fresh = seen.insert(p.identifier());
                if !fresh {
                    tracing::warn!(provider = %p.identifier(), "duplicate provider ignored");
                }
                fresh
            })
            .collect();

        Self {
            providers,
            credentials,
            disabled: HashSet::new(),
            overage_rates: OverageRates::default(),
            alert_threshold: DEFAULT_ALERT_THRESHOLD_PERCENT,
        }
    }

    pub fn with_overage_rates(mut self, rates: OverageRates) -> Self {
        self.overage_rates = rates;
        self
    }

    pub fn with_alert_threshold(mut self, percent: f64) -> Self {
        self.alert_threshold = percent;
        self
    }

    /// Providers switched off by configuration, regardless of credentials.
    pub fn with_disabled(mut self, disabled: impl IntoIterator<Item = ProviderIdentifier>) -> Self {
        self.disabled = disabled.into_iter().collect();
        self
    }

    pub fn provider(&self, id: ProviderIdentifier) -> Option<&Arc<dyn ProviderFetcher>> {
        self.providers.iter().find(|p| p.identifier() == id)
    }

    pub fn enabled_providers(&self) -> Vec<Arc<dyn ProviderFetcher>> {
        self.providers
            .iter()
            .filter(|p| {
                let id = p.identifier();
                !self.disabled.contains(&id) && self.credentials.is_available(id)
            })
            .cloned()
            .collect()
    }

    /// Fetches every enabled provider concurrently and waits for all of them.
    ///
    /// Each provider settles on its own: a failure is recorded under its
    /// identifier in `errors` and never affects any other provider.
    pub async fn fetch_all(&self) -> FetchOutcome {
        let enabled = self.enabled_providers();
        tracing::debug!(count = enabled.len(), "fetching providers");

        let settled = join_all(enabled.iter().map(|provider| async move {
            (provider.identifier(), provider.fetch().await)
        }))
        .await;

        let mut outcome = FetchOutcome::default();
        for (id, result) in settled {
            match result {
                Ok(result) => {
                    outcome.results.insert(id, result);
                }
                Err(e) => {
                    tracing::warn!(provider = %id, error = %e, "provider fetch failed");
                    outcome.errors.insert(id, e);
                }
            }
        }

        tracing::info!(
            succeeded = outcome.results.len(),
            failed = outcome.errors.len(),
            "fetch cycle complete"
        );
        outcome
    }

    pub fn calculate_total_overage_cost(
        &self,
        results: &HashMap<ProviderIdentifier, ProviderResult>,
    ) -> f64 {
        calculate_total_overage_cost(results, &self.overage_rates)
    }

    pub fn quota_alerts(
        &self,
        results: &HashMap<ProviderIdentifier, ProviderResult>,
    ) -> Vec<QuotaAlert> {
        quota_alerts(results, self.alert_threshold)
    }
}

/// Pay-as-you-go spend plus billable quota overage across all results.
pub fn calculate_total_overage_cost(
    results: &HashMap<ProviderIdentifier, ProviderResult>,
    rates: &OverageRates,
) -> f64 {
    results
        .iter()
        .map(|(id, result)| match result.usage {
            ProviderUsage::PayAsYouGo { cost_spent, .. } => cost_spent.unwrap_or(0.0),
            ProviderUsage::QuotaBased {
                remaining,
                overage_permitted: true,
                ..
            } if remaining < 0 => remaining.unsigned_abs() as f64 * rates.rate(*id),
            ProviderUsage::QuotaBased { .. } => 0.0,
        })
        .sum()
}

/// Quota-based results whose remaining share is below `threshold_percent`.
pub fn quota_alerts(
    results: &HashMap<ProviderIdentifier, ProviderResult>,
    threshold_percent: f64,
) -> Vec<QuotaAlert> {
    results
        .iter()
        .filter_map(|(id, result)| {
            let remaining_percentage = result.usage.remaining_percentage()?;
            (remaining_percentage < threshold_percent).then_some(QuotaAlert {
                provider: *id,
                remaining_percentage,
            })
        })
        .collect()
}
