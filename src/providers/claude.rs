use crate::credentials::CredentialStore;
use crate::decode::{self, require};
use crate::error::ProviderError;
use crate::http::{fetch_json, HttpRequest, HttpTransport};
use crate::models::{
    clamp_percent, DetailedUsage, ProviderIdentifier, ProviderKind, ProviderResult,
    ProviderUsage, RateWindow,
};
use crate::providers::{format_reset_time, parse_iso8601, require_credential, ProviderFetcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

const API_URL: &str = "https://api.anthropic.com/api/oauth/usage";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";
const LABEL: &str = "Claude";

/// API response from /api/oauth/usage
#[derive(Debug, Deserialize)]
struct UsageResponse {
    five_hour: Option<RateWindowResponse>,
    seven_day: Option<RateWindowResponse>,
    seven_day_opus: Option<RateWindowResponse>,
    seven_day_sonnet: Option<RateWindowResponse>,
    extra_usage: Option<ExtraUsageResponse>,
}

#[derive(Debug, Deserialize)]
struct RateWindowResponse {
    #[serde(default, deserialize_with = "decode::opt_f64")]
    utilization: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_string")]
    resets_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExtraUsageResponse {
    #[serde(default, deserialize_with = "decode::opt_bool")]
    is_enabled: Option<bool>,
    /// Cents
    #[serde(default, deserialize_with = "decode::opt_f64")]
    monthly_limit: Option<f64>,
    /// Cents
    #[serde(default, deserialize_with = "decode::opt_f64")]
    used_credits: Option<f64>,
}

pub struct ClaudeProvider {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl ClaudeProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    fn make_window(
        window: &RateWindowResponse,
        minutes: i64,
        now: DateTime<Utc>,
    ) -> Option<RateWindow> {
        let utilization = window.utilization?;
        let resets_at = window.resets_at.as_deref().and_then(parse_iso8601);
        Some(RateWindow {
            used_percent: clamp_percent(utilization),
            used: None,
            limit: None,
            window_minutes: Some(minutes),
            resets_at,
            reset_description: resets_at.map(|dt| format_reset_time(dt, now)),
        })
    }

    fn to_result(
        usage: UsageResponse,
        now: DateTime<Utc>,
    ) -> Result<ProviderResult, ProviderError> {
        let session = usage
            .five_hour
            .as_ref()
            .and_then(|w| Self::make_window(w, 300, now));
        let weekly = usage
            .seven_day
            .as_ref()
            .and_then(|w| Self::make_window(w, 10080, now));

        // Primary figure is the 5-hour session window, falling back to weekly
        let (primary, secondary) = match (session, weekly) {
            (Some(session), weekly) => (Some(session), weekly),
            (None, weekly) => (weekly, None),
        };
        let primary = require(primary, LABEL, "utilization")?;

        // Model-specific weekly window when there is no general one
        let secondary = secondary.or_else(|| {
            usage
                .seven_day_sonnet
                .as_ref()
                .or(usage.seven_day_opus.as_ref())
                .and_then(|w| Self::make_window(w, 10080, now))
        });

        let extra = usage
            .extra_usage
            .filter(|e| e.is_enabled.unwrap_or(false));
        let cost_spent = extra
            .as_ref()
            .map(|e| e.used_credits.unwrap_or(0.0) / 100.0);
        let limit = extra
            .as_ref()
            .and_then(|e| e.monthly_limit)
            .map(|cents| cents / 100.0);

        let details = DetailedUsage {
            limit,
            limit_remaining: limit.zip(cost_spent).map(|(l, c)| (l - c).max(0.0)),
            reset_period: primary.reset_description.clone(),
            secondary_window: secondary,
            ..Default::default()
        };

        Ok(ProviderResult::new(
            ProviderUsage::PayAsYouGo {
                utilization_percent: primary.used_percent,
                cost_spent,
                resets_at: primary.resets_at,
            },
            details.into_option(),
        ))
    }
}

#[async_trait]
impl ProviderFetcher for ClaudeProvider {
    fn identifier(&self) -> ProviderIdentifier {
        ProviderIdentifier::Claude
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::PayAsYouGo
    }

    async fn fetch(&self) -> Result<ProviderResult, ProviderError> {
        tracing::info!("Claude fetch started");
        let creds = require_credential(self.credentials.as_ref(), self.identifier())?;

        let request = HttpRequest::get(API_URL)
            .bearer(&creds.secret)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("anthropic-beta", OAUTH_BETA_HEADER);
        let usage: UsageResponse = fetch_json(self.transport.as_ref(), request, LABEL).await?;

        let result = Self::to_result(usage, Utc::now())?;
        tracing::info!(
            usage_percent = result.usage.usage_percentage(),
            "Claude usage fetched"
        );
        Ok(result)
    }
}
