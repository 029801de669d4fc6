use crate::credentials::CredentialStore;
use crate::decode::{self, require};
use crate::error::ProviderError;
use crate::http::{fetch_json, HttpRequest, HttpTransport};
use crate::models::{
    clamp_percent, normalize_percent, DetailedUsage, ProviderIdentifier, ProviderKind,
    ProviderResult, ProviderUsage, RateWindow,
};
use crate::providers::{format_reset_time, from_epoch, parse_iso8601, require_credential, ProviderFetcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

const USAGE_URL: &str = "https://nano-gpt.com/api/subscription/v1/usage";
const BALANCE_URL: &str = "https://nano-gpt.com/api/check-balance";
const LABEL: &str = "Nano-GPT";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubscriptionUsageResponse {
    limits: Option<Limits>,
    daily: Option<WindowUsage>,
    monthly: Option<WindowUsage>,
    period: Option<Period>,
}

#[derive(Debug, Deserialize)]
struct Limits {
    #[serde(default, deserialize_with = "decode::opt_i64")]
    daily: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    monthly: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowUsage {
    #[serde(default, deserialize_with = "decode::opt_i64")]
    used: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    remaining: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_f64")]
    percent_used: Option<f64>,
    /// Epoch milliseconds
    #[serde(default, deserialize_with = "decode::opt_i64")]
    reset_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Period {
    #[serde(default, deserialize_with = "decode::opt_string")]
    current_period_end: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(default, deserialize_with = "decode::opt_f64")]
    usd_balance: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_f64")]
    nano_balance: Option<f64>,
}

pub struct NanoGptProvider {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl NanoGptProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    fn to_result(
        usage: SubscriptionUsageResponse,
        balance: Option<BalanceResponse>,
        now: DateTime<Utc>,
    ) -> Result<ProviderResult, ProviderError> {
        let monthly_limit = require(
            usage
                .limits
                .as_ref()
                .and_then(|l| l.monthly)
                .filter(|limit| *limit > 0),
            LABEL,
            "monthly limit",
        )?;

        let monthly_used = usage.monthly.as_ref().and_then(|m| m.used).unwrap_or(0);
        let monthly_remaining = usage
            .monthly
            .as_ref()
            .and_then(|m| m.remaining)
            .unwrap_or(monthly_limit - monthly_used);

        let daily_window = usage.daily.as_ref().and_then(|daily| {
            let limit = usage.limits.as_ref().and_then(|l| l.daily);
            let used_percent = window_percent(daily.percent_used, daily.used, limit)?;
            let resets_at = daily.reset_at.and_then(from_epoch);
            Some(RateWindow {
                used_percent,
                used: daily.used.map(|u| u as f64),
                limit: limit.map(|l| l as f64),
                window_minutes: Some(24 * 60),
                resets_at,
                reset_description: resets_at.map(|dt| format_reset_time(dt, now)),
            })
        });

        let period_end = usage
            .period
            .and_then(|p| p.current_period_end)
            .and_then(|s| parse_iso8601(&s))
            .or_else(|| usage.monthly.as_ref().and_then(|m| m.reset_at).and_then(from_epoch));

        let details = DetailedUsage {
            daily_usage: usage.daily.as_ref().and_then(|d| d.used).map(|u| u as f64),
            monthly_usage: Some(monthly_used as f64),
            total_credits: balance.as_ref().and_then(|b| b.nano_balance),
            balance: balance.as_ref().and_then(|b| b.usd_balance),
            reset_period: period_end.map(|dt| dt.format("%Y-%m-%d %H:%M UTC").to_string()),
            secondary_window: daily_window,
            ..Default::default()
        };

        Ok(ProviderResult::new(
            ProviderUsage::QuotaBased {
                remaining: monthly_remaining.max(0),
                entitlement: monthly_limit as u64,
                overage_permitted: false,
            },
            details.into_option(),
        ))
    }
}

/// Reported percent when present, otherwise derived from used/limit.
fn window_percent(percent_used: Option<f64>, used: Option<i64>, limit: Option<i64>) -> Option<f64> {
    if let Some(percent) = percent_used {
        return Some(normalize_percent(percent));
    }
    match (used, limit) {
        (Some(used), Some(limit)) if limit > 0 => {
            Some(clamp_percent(used as f64 / limit as f64 * 100.0))
        }
        _ => None,
    }
}

#[async_trait]
impl ProviderFetcher for NanoGptProvider {
    fn identifier(&self) -> ProviderIdentifier {
        ProviderIdentifier::NanoGpt
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::QuotaBased
    }

    async fn fetch(&self) -> Result<ProviderResult, ProviderError> {
        tracing::info!("Nano-GPT fetch started");
        let creds = require_credential(self.credentials.as_ref(), self.identifier())?;

        let usage_request = HttpRequest::get(USAGE_URL)
            .bearer(&creds.secret)
            .header("x-api-key", creds.secret.as_str())
            .header("Accept", "application/json");
        let balance_request = HttpRequest::post(BALANCE_URL)
            .header("x-api-key", creds.secret.as_str())
            .header("Accept", "application/json");

        let (usage, balance) = tokio::join!(
            fetch_json::<SubscriptionUsageResponse>(self.transport.as_ref(), usage_request, LABEL),
            fetch_json::<BalanceResponse>(self.transport.as_ref(), balance_request, LABEL),
        );

        let usage = usage?;
        let balance = balance
            .map_err(|e| tracing::warn!(error = %e, "Nano-GPT balance unavailable"))
            .ok();

        let result = Self::to_result(usage, balance, Utc::now())?;
        tracing::info!(
            usage_percent = result.usage.usage_percentage(),
            "Nano-GPT usage fetched"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{Credential, StaticCredentials};
    use crate::http::Method;
    use crate::test_support::StubTransport;
    use std::time::{Duration, Instant};

    const USAGE: &str = r#"{
        "active": true,
        "limits": {"daily": "100", "monthly": 2000},
        "daily": {"used": 42, "remaining": 58, "percentUsed": 0.42, "resetAt": 1769040000000},
        "monthly": {"used": 500, "remaining": 1500, "percentUsed": 25.0},
        "period": {"currentPeriodEnd": "2026-02-01T00:00:00.000Z"},
        "state": "active"
    }"#;
    const BALANCE: &str = r#"{"usd_balance": "4.20", "nano_balance": "1234.5"}"#;

    fn provider(transport: StubTransport) -> (NanoGptProvider, Arc<StubTransport>) {
        let transport = Arc::new(transport);
        let creds =
            StaticCredentials::new().with(ProviderIdentifier::NanoGpt, Credential::new("ng-key"));
        (NanoGptProvider::new(transport.clone(), Arc::new(creds)), transport)
    }

    #[tokio::test]
    async fn test_fetch_usage_and_balance() {
        let (provider, transport) = provider(
            StubTransport::new()
                .respond(USAGE_URL, 200, USAGE)
                .respond(BALANCE_URL, 200, BALANCE),
        );
        let result = provider.fetch().await.unwrap();

        assert_eq!(
            result.usage,
            ProviderUsage::QuotaBased {
                remaining: 1500,
                entitlement: 2000,
                overage_permitted: false,
            }
        );
        let details = result.details.unwrap();
        assert_eq!(details.balance, Some(4.2));
        assert_eq!(details.total_credits, Some(1234.5));
        assert_eq!(details.reset_period.as_deref(), Some("2026-02-01 00:00 UTC"));

        let daily = details.secondary_window.unwrap();
        assert_eq!(daily.used_percent, 42.0);
        assert_eq!(daily.limit, Some(100.0));

        let balance_call = transport
            .requests()
            .into_iter()
            .find(|r| r.url == BALANCE_URL)
            .unwrap();
        assert_eq!(balance_call.method, Method::Post);
        assert_eq!(
            transport.header_sent(USAGE_URL, "x-api-key").as_deref(),
            Some("ng-key")
        );
    }

    #[tokio::test]
    async fn test_balance_failure_keeps_usage() {
        let (provider, _) = provider(
            StubTransport::new()
                .respond(USAGE_URL, 200, USAGE)
                .fail(BALANCE_URL, ProviderError::network("connection reset")),
        );
        let result = provider.fetch().await.unwrap();

        assert_eq!(result.usage.remaining_quota(), Some(1500));
        let details = result.details.unwrap();
        assert_eq!(details.balance, None);
        assert_eq!(details.total_credits, None);
    }

    #[tokio::test]
    async fn test_usage_failure_is_fatal() {
        let (provider, _) = provider(
            StubTransport::new()
                .respond(USAGE_URL, 401, "{}")
                .respond(BALANCE_URL, 200, BALANCE),
        );
        let err = provider.fetch().await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_calls_run_concurrently() {
        let delay = Duration::from_millis(200);
        let (provider, _) = provider(
            StubTransport::new()
                .respond(USAGE_URL, 200, USAGE)
                .respond(BALANCE_URL, 200, BALANCE)
                .delay(USAGE_URL, delay)
                .delay(BALANCE_URL, delay),
        );

        let started = Instant::now();
        provider.fetch().await.unwrap();
        assert!(started.elapsed() < delay * 2);
    }

    #[tokio::test]
    async fn test_missing_monthly_limit() {
        let (provider, _) = provider(
            StubTransport::new()
                .respond(USAGE_URL, 200, r#"{"limits": {"daily": 100, "monthly": "unlimited"}}"#)
                .respond(BALANCE_URL, 200, BALANCE),
        );
        let err = provider.fetch().await.unwrap_err();
        assert!(matches!(err, ProviderError::DecodingError(_)));
    }

    #[test]
    fn test_remaining_derived_when_absent() {
        let usage: SubscriptionUsageResponse = serde_json::from_str(
            r#"{"limits": {"monthly": 1000}, "monthly": {"used": "250"}}"#,
        )
        .unwrap();
        let result = NanoGptProvider::to_result(usage, None, Utc::now()).unwrap();
        assert_eq!(result.usage.remaining_quota(), Some(750));
        assert_eq!(result.usage.usage_percentage(), 25.0);
    }

    #[test]
    fn test_window_percent() {
        assert_eq!(window_percent(Some(0.42), None, None), Some(42.0));
        assert_eq!(window_percent(Some(42.0), None, None), Some(42.0));
        assert_eq!(window_percent(None, Some(30), Some(60)), Some(50.0));
        assert_eq!(window_percent(None, Some(30), Some(0)), None);
    }
}
