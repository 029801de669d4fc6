use crate::credentials::CredentialStore;
use crate::decode::{self, require};
use crate::error::ProviderError;
use crate::http::{fetch_json, HttpRequest, HttpTransport};
use crate::models::{
    clamp_percent, DetailedUsage, ProviderIdentifier, ProviderKind, ProviderResult,
    ProviderUsage,
};
use crate::providers::{require_credential, ProviderFetcher};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const CREDITS_URL: &str = "https://openrouter.ai/api/v1/credits";
const KEY_URL: &str = "https://openrouter.ai/api/v1/key";
const LABEL: &str = "OpenRouter";

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CreditsData {
    #[serde(default, deserialize_with = "decode::opt_f64")]
    total_credits: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_f64")]
    total_usage: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct KeyData {
    #[serde(default, deserialize_with = "decode::opt_f64")]
    limit: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_f64")]
    limit_remaining: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_f64")]
    usage_daily: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_f64")]
    usage_weekly: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_f64")]
    usage_monthly: Option<f64>,
}

pub struct OpenRouterProvider {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl OpenRouterProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    fn to_result(credits: CreditsData, key: Option<KeyData>) -> Result<ProviderResult, ProviderError> {
        let total_credits = require(credits.total_credits, LABEL, "total_credits")?;
        let total_usage = require(credits.total_usage, LABEL, "total_usage")?;

        let utilization = if total_credits > 0.0 {
            clamp_percent(total_usage / total_credits * 100.0)
        } else {
            0.0
        };

        let key = key.unwrap_or_default();
        let details = DetailedUsage {
            daily_usage: key.usage_daily,
            weekly_usage: key.usage_weekly,
            monthly_usage: key.usage_monthly,
            total_credits: Some(total_credits),
            remaining_credits: Some(total_credits - total_usage),
            limit: key.limit,
            limit_remaining: key.limit_remaining,
            ..Default::default()
        };

        Ok(ProviderResult::new(
            ProviderUsage::PayAsYouGo {
                utilization_percent: utilization,
                cost_spent: key.usage_monthly,
                resets_at: None,
            },
            details.into_option(),
        ))
    }
}

#[async_trait]
impl ProviderFetcher for OpenRouterProvider {
    fn identifier(&self) -> ProviderIdentifier {
        ProviderIdentifier::OpenRouter
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::PayAsYouGo
    }

    async fn fetch(&self) -> Result<ProviderResult, ProviderError> {
        tracing::info!("OpenRouter fetch started");
        let creds = require_credential(self.credentials.as_ref(), self.identifier())?;

        let credits_request = HttpRequest::get(CREDITS_URL)
            .bearer(&creds.secret)
            .header("Accept", "application/json");
        let key_request = HttpRequest::get(KEY_URL)
            .bearer(&creds.secret)
            .header("Accept", "application/json");

        let (credits, key) = tokio::join!(
            fetch_json::<Envelope<CreditsData>>(self.transport.as_ref(), credits_request, LABEL),
            fetch_json::<Envelope<KeyData>>(self.transport.as_ref(), key_request, LABEL),
        );

        let credits = require(credits?.data, LABEL, "credits data")?;
        let key = match key {
            Ok(envelope) => envelope.data,
            Err(e) => {
                tracing::warn!(error = %e, "OpenRouter key details unavailable");
                None
            }
        };

        let result = Self::to_result(credits, key)?;
        tracing::info!(
            usage_percent = result.usage.usage_percentage(),
            "OpenRouter usage fetched"
        );
        Ok(result)
    }
}
