use crate::credentials::{Credential, CredentialStore};
use crate::decode::{self, require};
use crate::error::ProviderError;
use crate::http::{fetch_json, HttpRequest, HttpTransport};
use crate::models::{
    clamp_percent, DetailedUsage, ProviderIdentifier, ProviderKind, ProviderResult,
    ProviderUsage, RateWindow,
};
use crate::providers::{format_reset_time, from_epoch, require_credential, ProviderFetcher};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

const API_URL: &str = "https://chatgpt.com/backend-api/wham/usage";
const LABEL: &str = "Codex";

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default, deserialize_with = "decode::opt_string")]
    plan_type: Option<String>,
    rate_limit: Option<RateLimitDetails>,
    credits: Option<CreditDetails>,
}

#[derive(Debug, Deserialize)]
struct RateLimitDetails {
    primary_window: Option<WindowSnapshot>,
    secondary_window: Option<WindowSnapshot>,
}

#[derive(Debug, Deserialize)]
struct WindowSnapshot {
    #[serde(default, deserialize_with = "decode::opt_f64")]
    used_percent: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    reset_at: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    reset_after_seconds: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    limit_window_seconds: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CreditDetails {
    #[serde(default, deserialize_with = "decode::opt_f64")]
    balance: Option<f64>,
}

pub struct CodexProvider {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl CodexProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    fn make_window(window: Option<&WindowSnapshot>, now: DateTime<Utc>) -> Option<RateWindow> {
        let window = window?;
        let used_percent = window.used_percent?;
        let resets_at = window
            .reset_at
            .and_then(from_epoch)
            .or_else(|| window.reset_after_seconds.map(|s| now + Duration::seconds(s)));
        Some(RateWindow {
            used_percent: clamp_percent(used_percent),
            used: None,
            limit: None,
            window_minutes: window.limit_window_seconds.map(|s| s / 60),
            resets_at,
            reset_description: resets_at.map(|dt| format_reset_time(dt, now)),
        })
    }

    fn to_result(
        creds: &Credential,
        usage: UsageResponse,
        now: DateTime<Utc>,
    ) -> Result<ProviderResult, ProviderError> {
        let primary = require(
            usage
                .rate_limit
                .as_ref()
                .and_then(|r| Self::make_window(r.primary_window.as_ref(), now)),
            LABEL,
            "primary_window.used_percent",
        )?;
        let secondary = usage
            .rate_limit
            .as_ref()
            .and_then(|r| Self::make_window(r.secondary_window.as_ref(), now));

        let details = DetailedUsage {
            balance: usage.credits.as_ref().and_then(|c| c.balance),
            plan: resolve_plan(creds, &usage),
            reset_period: primary.reset_description.clone(),
            secondary_window: secondary,
            ..Default::default()
        };

        Ok(ProviderResult::new(
            ProviderUsage::PayAsYouGo {
                utilization_percent: primary.used_percent,
                cost_spent: None,
                resets_at: primary.resets_at,
            },
            details.into_option(),
        ))
    }
}

#[async_trait]
impl ProviderFetcher for CodexProvider {
    fn identifier(&self) -> ProviderIdentifier {
        ProviderIdentifier::Codex
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::PayAsYouGo
    }

    async fn fetch(&self) -> Result<ProviderResult, ProviderError> {
        tracing::info!("Codex fetch started");
        let creds = require_credential(self.credentials.as_ref(), self.identifier())?;

        let mut request = HttpRequest::get(API_URL)
            .bearer(&creds.secret)
            .header("Accept", "application/json");
        if let Some(account_id) = creds
            .account_id
            .as_ref()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            request = request.header("ChatGPT-Account-Id", account_id);
        }

        let usage: UsageResponse = fetch_json(self.transport.as_ref(), request, LABEL).await?;
        let result = Self::to_result(&creds, usage, Utc::now())?;
        tracing::info!(
            usage_percent = result.usage.usage_percentage(),
            "Codex usage fetched"
        );
        Ok(result)
    }
}

fn resolve_plan(creds: &Credential, response: &UsageResponse) -> Option<String> {
    if let Some(plan) = response.plan_type.as_deref().and_then(normalize_plan_name) {
        return Some(plan);
    }

    let payload = creds.id_token.as_deref().and_then(parse_jwt_payload)?;
    payload
        .get("https://api.openai.com/auth")
        .and_then(Value::as_object)
        .and_then(|obj| obj.get("chatgpt_plan_type"))
        .or_else(|| payload.get("chatgpt_plan_type"))
        .and_then(Value::as_str)
        .and_then(normalize_plan_name)
}

fn parse_jwt_payload(token: &str) -> Option<Value> {
    let mut parts = token.split('.');
    let _header = parts.next()?;
    let payload = parts.next()?;
    let decoded = URL_SAFE_NO_PAD.decode(payload.as_bytes()).ok()?;
    serde_json::from_slice(&decoded).ok()
}

fn normalize_plan_name(plan: &str) -> Option<String> {
    let trimmed = plan.trim();
    if trimmed.is_empty() {
        return None;
    }
    let label = match trimmed.to_lowercase().as_str() {
        "free" => "Free",
        "plus" => "Plus",
        "pro" => "Pro",
        "team" => "Team",
        "enterprise" => "Enterprise",
        "business" => "Business",
        "education" | "edu" => "Edu",
        "go" => "Go",
        _ => trimmed,
    };
    Some(label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::test_support::StubTransport;
    use chrono::TimeZone;

    fn jwt(payload: &str) -> String {
        format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(payload))
    }

    #[test]
    fn test_windows_and_plan() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let usage: UsageResponse = serde_json::from_str(
            r#"{
                "plan_type": "plus",
                "rate_limit": {
                    "primary_window": {"used_percent": 37, "reset_after_seconds": 7200, "limit_window_seconds": 18000},
                    "secondary_window": {"used_percent": "64.5", "reset_at": 1769040000}
                },
                "credits": {"has_credits": false, "balance": "12.40"}
            }"#,
        )
        .unwrap();

        let result = CodexProvider::to_result(&Credential::new("t"), usage, now).unwrap();
        assert_eq!(
            result.usage,
            ProviderUsage::PayAsYouGo {
                utilization_percent: 37.0,
                cost_spent: None,
                resets_at: Some(now + Duration::hours(2)),
            }
        );

        let details = result.details.unwrap();
        assert_eq!(details.plan.as_deref(), Some("Plus"));
        assert_eq!(details.balance, Some(12.4));
        let secondary = details.secondary_window.unwrap();
        assert_eq!(secondary.used_percent, 64.5);
        assert_eq!(secondary.resets_at, from_epoch(1769040000));
    }

    #[test]
    fn test_low_percent_is_not_treated_as_fraction() {
        let usage: UsageResponse = serde_json::from_str(
            r#"{"rate_limit": {"primary_window": {"used_percent": 1}}}"#,
        )
        .unwrap();
        let result = CodexProvider::to_result(&Credential::new("t"), usage, Utc::now()).unwrap();
        assert_eq!(result.usage.usage_percentage(), 1.0);
    }

    #[test]
    fn test_plan_from_id_token() {
        let creds = Credential::new("t").with_id_token(jwt(
            r#"{"https://api.openai.com/auth": {"chatgpt_plan_type": "pro"}}"#,
        ));
        let usage: UsageResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(resolve_plan(&creds, &usage).as_deref(), Some("Pro"));
        assert_eq!(resolve_plan(&Credential::new("t"), &usage), None);
    }

    #[test]
    fn test_missing_primary_window_is_decoding_error() {
        let usage: UsageResponse =
            serde_json::from_str(r#"{"rate_limit": {"secondary_window": {"used_percent": 3}}}"#)
                .unwrap();
        let err = CodexProvider::to_result(&Credential::new("t"), usage, Utc::now()).unwrap_err();
        assert!(matches!(err, ProviderError::DecodingError(_)));
    }

    #[tokio::test]
    async fn test_fetch_sends_account_header() {
        let transport = Arc::new(StubTransport::new().respond(
            API_URL,
            200,
            r#"{"rate_limit": {"primary_window": {"used_percent": 12}}}"#,
        ));
        let creds = StaticCredentials::new().with(
            ProviderIdentifier::Codex,
            Credential::new("at").with_account_id("acct-1"),
        );
        let provider = CodexProvider::new(transport.clone(), Arc::new(creds));

        provider.fetch().await.unwrap();
        assert_eq!(
            transport.header_sent(API_URL, "ChatGPT-Account-Id").as_deref(),
            Some("acct-1")
        );
    }

    #[tokio::test]
    async fn test_server_error_is_network_error() {
        let transport = Arc::new(StubTransport::new().respond(API_URL, 502, "bad gateway"));
        let creds = StaticCredentials::new().with(ProviderIdentifier::Codex, Credential::new("at"));
        let provider = CodexProvider::new(transport, Arc::new(creds));

        let err = provider.fetch().await.unwrap_err();
        assert_eq!(err.status(), Some(502));
    }
}
