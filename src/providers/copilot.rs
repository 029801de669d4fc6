use crate::credentials::CredentialStore;
use crate::decode::{self, require};
use crate::error::ProviderError;
use crate::http::{fetch_json, HttpRequest, HttpTransport};
use crate::models::{
    DetailedUsage, ProviderIdentifier, ProviderKind, ProviderResult, ProviderUsage,
};
use crate::providers::{parse_iso8601, require_credential, ProviderFetcher};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const API_URL: &str = "https://api.github.com/copilot_internal/user";
const EDITOR_VERSION: &str = "vscode/1.96.2";
const LABEL: &str = "Copilot";

/// Response from /copilot_internal/user
#[derive(Debug, Deserialize)]
struct UserResponse {
    #[serde(default, deserialize_with = "decode::opt_string")]
    copilot_plan: Option<String>,
    #[serde(default, deserialize_with = "decode::opt_string")]
    quota_reset_date_utc: Option<String>,
    #[serde(default, deserialize_with = "decode::opt_string")]
    quota_reset_date: Option<String>,
    quota_snapshots: Option<QuotaSnapshots>,
}

#[derive(Debug, Deserialize)]
struct QuotaSnapshots {
    premium_interactions: Option<QuotaSnapshot>,
}

#[derive(Debug, Deserialize)]
struct QuotaSnapshot {
    #[serde(default, deserialize_with = "decode::opt_i64")]
    entitlement: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_i64")]
    remaining: Option<i64>,
    #[serde(default, deserialize_with = "decode::opt_bool")]
    overage_permitted: Option<bool>,
}

pub struct CopilotProvider {
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
}

impl CopilotProvider {
    pub fn new(transport: Arc<dyn HttpTransport>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            transport,
            credentials,
        }
    }

    fn to_result(response: UserResponse) -> Result<ProviderResult, ProviderError> {
        let premium = require(
            response
                .quota_snapshots
                .and_then(|s| s.premium_interactions),
            LABEL,
            "premium_interactions quota",
        )?;
        let entitlement = require(premium.entitlement, LABEL, "entitlement")?;
        let remaining = require(premium.remaining, LABEL, "remaining")?;

        let usage = ProviderUsage::QuotaBased {
            remaining,
            entitlement: entitlement.max(0) as u64,
            overage_permitted: premium.overage_permitted.unwrap_or(false),
        };

        let reset_period = response
            .quota_reset_date_utc
            .or(response.quota_reset_date)
            .and_then(|s| parse_iso8601(&s))
            .map(|dt| dt.format("%Y-%m-%d UTC").to_string());

        let details = DetailedUsage {
            plan: response.copilot_plan.as_deref().map(plan_display_name),
            reset_period,
            ..Default::default()
        };

        Ok(ProviderResult::new(usage, details.into_option()))
    }
}

#[async_trait]
impl ProviderFetcher for CopilotProvider {
    fn identifier(&self) -> ProviderIdentifier {
        ProviderIdentifier::Copilot
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::QuotaBased
    }

    async fn fetch(&self) -> Result<ProviderResult, ProviderError> {
        tracing::info!("Copilot fetch started");
        let creds = require_credential(self.credentials.as_ref(), self.identifier())?;

        let request = HttpRequest::get(API_URL)
            .header("Authorization", format!("token {}", creds.secret))
            .header("Accept", "application/json")
            .header("Editor-Version", EDITOR_VERSION);
        let response: UserResponse = fetch_json(self.transport.as_ref(), request, LABEL).await?;

        let result = Self::to_result(response)?;
        tracing::info!(
            usage_percent = result.usage.usage_percentage(),
            "Copilot usage fetched"
        );
        Ok(result)
    }
}

/// "individual_pro" -> "Pro"
fn plan_display_name(plan: &str) -> String {
    match plan.to_lowercase().as_str() {
        "individual_pro" => "Pro".to_string(),
        "individual_pro_plus" => "Pro+".to_string(),
        "individual_free" | "free" => "Free".to_string(),
        "business" => "Business".to_string(),
        "enterprise" => "Enterprise".to_string(),
        _ => plan
            .split('_')
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
    }
}
