use crate::credentials::CredentialStore;
use crate::decode::{self, require};
use crate::error::ProviderError;
use crate::http::{fetch_json, HttpRequest, HttpTransport};
use crate::models::{
    clamp_percent, normalize_percent, DetailedUsage, ProviderIdentifier, ProviderKind, ProviderResult,
    ProviderUsage, RateWindow,
};
use crate::providers::{format_reset_time, from_epoch, require_credential, ProviderFetcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

const API_URL: &str = "https://api.z.ai/api/monitor/usage/quota/limit";
const LABEL: &str = "Z.ai";

#[derive(Debug, Deserialize)]
struct QuotaResponse {
    #[serde(default, deserialize_with = "decode::opt_i64")]
    code: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_string")]
    msg: Option<String>,
    #[serde(default, deserialize_with = "decode::opt_bool")]
    success: Option<bool>,
    data: Option<QuotaData>,
}

#[derive(Debug, Deserialize)]
struct QuotaData {
    #[serde(default)]
    limits: Vec<LimitEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LimitEntry {
    #[serde(rename = "type", default, deserialize_with = "decode::opt_string")]
    kind: Option<String>,
    /// Total allowance for the window
    #[serde(default, deserialize_with = "decode::opt_i64")]
    usage: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    current_value: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    remaining: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_f64")]
    percentage: Option<f64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    next_reset_time: Option<i64>,
}

impl LimitEntry {
    fn is(&self, kind: &str) -> bool {
        self.kind
            .as_deref()
            .is_some_and(|k| k.eq_ignore_ascii_case(kind))
    }

    fn used(&self) -> Option<i64> {
        self.current_value
            .or_else(|| self.usage.zip(self.remaining).map(|(total, left)| total - left))
    }

    fn used_percent(&self) -> Option<f64> {
        if let Some(percent) = self.percentage {
            return Some(normalize_percent(percent));
        }
        let total = self.usage.filter(|t| *t > 0)?;
        Some(clamp_percent(self.used()? as f64 / total as f64 * 100.0))
    }

    fn to_window(&self, now: DateTime<Utc>) -> Option<RateWindow> {
        let resets_at = self.next_reset_time.and_then(from_epoch);
        Some(RateWindow {
            used_percent: self.used_percent()?,
            used: self.used().map(|u| u as f64),
            limit: self.usage.map(|t| t as f64),
            window_minutes: None,
            resets_at,
            reset_description: resets_at.map(|dt| format_reset_time(dt, now)),
        })
    }
}

pub struct ZaiCodingPlanProvider {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl ZaiCodingPlanProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    fn to_result(response: QuotaResponse, now: DateTime<Utc>) -> Result<ProviderResult, ProviderError> {
        if response.success == Some(false) {
            let message = response.msg.unwrap_or_else(|| "request rejected".to_string());
            return Err(match response.code {
                Some(401) => ProviderError::AuthenticationFailed(message),
                code => ProviderError::NetworkError {
                    status: code.and_then(|c| u16::try_from(c).ok()),
                    message,
                },
            });
        }

        let limits = require(response.data, LABEL, "data")?.limits;
        let tokens = require(
            limits.iter().find(|l| l.is("TOKENS_LIMIT")),
            LABEL,
            "TOKENS_LIMIT entry",
        )?;

        // Without an absolute allowance, express the quota in percent points
        let (remaining, entitlement) = match tokens.usage.filter(|t| *t > 0) {
            Some(total) => {
                let remaining = tokens
                    .remaining
                    .or_else(|| tokens.current_value.map(|used| total - used))
                    .or_else(|| {
                        tokens
                            .used_percent()
                            .map(|p| total - (total as f64 * p / 100.0).round() as i64)
                    });
                (require(remaining, LABEL, "remaining")?, total as u64)
            }
            None => {
                let percent = require(tokens.used_percent(), LABEL, "percentage")?;
                ((100.0 - percent).round() as i64, 100)
            }
        };

        let primary = tokens.to_window(now);
        let details = DetailedUsage {
            reset_period: primary.as_ref().and_then(|w| w.reset_description.clone()),
            secondary_window: limits
                .iter()
                .find(|l| l.is("TIME_LIMIT"))
                .and_then(|l| l.to_window(now)),
            ..Default::default()
        };

        Ok(ProviderResult::new(
            ProviderUsage::QuotaBased {
                remaining,
                entitlement,
                overage_permitted: false,
            },
            details.into_option(),
        ))
    }
}

#[async_trait]
impl ProviderFetcher for ZaiCodingPlanProvider {
    fn identifier(&self) -> ProviderIdentifier {
        ProviderIdentifier::ZaiCodingPlan
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::QuotaBased
    }

    async fn fetch(&self) -> Result<ProviderResult, ProviderError> {
        tracing::info!("Z.ai fetch started");
        let creds = require_credential(self.credentials.as_ref(), self.identifier())?;

        let request = HttpRequest::get(API_URL)
            .bearer(&creds.secret)
            .header("Accept", "application/json");
        let response: QuotaResponse = fetch_json(self.transport.as_ref(), request, LABEL).await?;

        let result = Self::to_result(response, Utc::now())?;
        tracing::info!(
            usage_percent = result.usage.usage_percentage(),
            "Z.ai usage fetched"
        );
        Ok(result)
    }
}
