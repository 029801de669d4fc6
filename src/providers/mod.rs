pub mod claude;
pub mod codex;
pub mod copilot;
pub mod nanogpt;
pub mod openrouter;
pub mod zai;

use crate::credentials::{Credential, CredentialStore};
use crate::error::ProviderError;
use crate::http::HttpTransport;
use crate::models::{ProviderIdentifier, ProviderKind, ProviderResult};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;

pub use claude::ClaudeProvider;
pub use codex::CodexProvider;
pub use copilot::CopilotProvider;
pub use nanogpt::NanoGptProvider;
pub use openrouter::OpenRouterProvider;
pub use zai::ZaiCodingPlanProvider;

/// One external usage service.
///
/// `kind` is fixed per implementation so callers can choose a rendering
/// strategy before any result exists.
#[async_trait]
pub trait ProviderFetcher: Send + Sync {
    fn identifier(&self) -> ProviderIdentifier;
    fn kind(&self) -> ProviderKind;
    async fn fetch(&self) -> Result<ProviderResult, ProviderError>;
}

/// Every known provider, sharing one transport and one credential store.
pub fn default_providers(
    transport: Arc<dyn HttpTransport>,
    credentials: Arc<dyn CredentialStore>,
) -> Vec<Arc<dyn ProviderFetcher>> {
    vec![
        Arc::new(CopilotProvider::new(transport.clone(), credentials.clone())),
        Arc::new(ClaudeProvider::new(transport.clone(), credentials.clone())),
        Arc::new(CodexProvider::new(transport.clone(), credentials.clone())),
        Arc::new(OpenRouterProvider::new(transport.clone(), credentials.clone())),
        Arc::new(NanoGptProvider::new(transport.clone(), credentials.clone())),
        Arc::new(ZaiCodingPlanProvider::new(transport, credentials)),
    ]
}

/// Resolves the credential before any network call is made.
pub(crate) fn require_credential(
    store: &dyn CredentialStore,
    provider: ProviderIdentifier,
) -> Result<Credential, ProviderError> {
    store
        .credential(provider)
        .filter(|c| !c.secret.trim().is_empty())
        .ok_or_else(|| {
            tracing::debug!(provider = %provider, "no credential");
            ProviderError::AuthenticationFailed(format!(
                "{} credential not available",
                provider.display_name()
            ))
        })
}

pub(crate) fn parse_iso8601(s: &str) -> Option<DateTime<Utc>> {
    // Try with fractional seconds first, then without
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        })
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| Utc.from_utc_datetime(&dt))
        })
}

/// Epoch timestamps arrive in either seconds or milliseconds.
pub(crate) fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value <= 0 {
        return None;
    }
    if value >= 100_000_000_000 {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

pub(crate) fn format_reset_time(reset: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let duration = reset.signed_duration_since(now);
    let hours = duration.num_hours();
    let minutes = duration.num_minutes() % 60;

    if hours <= 0 && minutes <= 0 {
        "now".to_string()
    } else if hours < 1 {
        format!("in {} min", minutes.max(1))
    } else if hours < 24 {
        format!("in {}h", hours)
    } else {
        let days = hours / 24;
        if days == 1 {
            "in 1 day".to_string()
        } else {
            format!("in {} days", days)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::test_support::StubTransport;

    #[test]
    fn test_parse_iso8601() {
        assert!(parse_iso8601("2024-01-15T10:30:00.000Z").is_some());
        assert!(parse_iso8601("2024-01-15T10:30:00Z").is_some());
        assert!(parse_iso8601("2024-01-15T10:30:00+09:00").is_some());
        assert_eq!(
            parse_iso8601("2024-02-01"),
            Some(Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap())
        );
        assert!(parse_iso8601("soon").is_none());
    }

    #[test]
    fn test_from_epoch_seconds_and_millis() {
        let expected = Utc.with_ymd_and_hms(2026, 2, 8, 15, 12, 37).unwrap();
        assert_eq!(from_epoch(expected.timestamp()), Some(expected));
        assert_eq!(from_epoch(expected.timestamp_millis()), Some(expected));
        assert_eq!(from_epoch(0), None);
    }

    #[test]
    fn test_format_reset_time() {
        let now = Utc::now();
        let reset = now + chrono::Duration::hours(5);
        assert_eq!(format_reset_time(reset, now), "in 5h");

        let reset = now + chrono::Duration::minutes(30);
        assert_eq!(format_reset_time(reset, now), "in 30 min");

        let reset = now + chrono::Duration::days(3);
        assert_eq!(format_reset_time(reset, now), "in 3 days");

        assert_eq!(format_reset_time(now - chrono::Duration::hours(1), now), "now");
    }

    #[test]
    fn test_require_credential_rejects_blank_secret() {
        let store = StaticCredentials::new()
            .with(ProviderIdentifier::OpenRouter, Credential::new("  "));
        let err = require_credential(&store, ProviderIdentifier::OpenRouter).unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[test]
    fn test_default_providers_cover_every_identifier() {
        let providers = default_providers(
            Arc::new(StubTransport::new()),
            Arc::new(StaticCredentials::new()),
        );
        let mut ids: Vec<_> = providers.iter().map(|p| p.identifier()).collect();
        ids.sort();
        let mut all = ProviderIdentifier::all().to_vec();
        all.sort();
        assert_eq!(ids, all);
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_network() {
        let transport = Arc::new(StubTransport::new());
        let providers = default_providers(transport.clone(), Arc::new(StaticCredentials::new()));
        for provider in providers {
            let err = provider.fetch().await.unwrap_err();
            assert!(
                matches!(err, ProviderError::AuthenticationFailed(_)),
                "{}: {err}",
                provider.identifier()
            );
        }
        assert!(transport.requests().is_empty());
    }
}
