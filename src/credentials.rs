use crate::decode::{flexible_i64, flexible_string};
use crate::models::ProviderIdentifier;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Clone, PartialEq)]
pub struct Credential {
    pub secret: String,
    pub account_id: Option<String>,
    pub id_token: Option<String>,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            account_id: None,
            id_token: None,
        }
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    pub fn with_id_token(mut self, id_token: impl Into<String>) -> Self {
        self.id_token = Some(id_token.into());
        self
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("secret", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

pub trait CredentialStore: Send + Sync {
    fn credential(&self, provider: ProviderIdentifier) -> Option<Credential>;

    fn is_available(&self, provider: ProviderIdentifier) -> bool {
        self.credential(provider).is_some()
    }
}

/// Fixed in-memory credentials.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    entries: HashMap<ProviderIdentifier, Credential>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: ProviderIdentifier, credential: Credential) -> Self {
        self.entries.insert(provider, credential);
        self
    }
}

impl CredentialStore for StaticCredentials {
    fn credential(&self, provider: ProviderIdentifier) -> Option<Credential> {
        self.entries.get(&provider).cloned()
    }
}

/// OpenCode `auth.json` entry. Unknown shapes decode to `Unsupported`
/// instead of failing the whole file.
#[derive(Debug, Clone, PartialEq)]
enum AuthEntry {
    ApiKey(String),
    OAuth {
        access: String,
        account_id: Option<String>,
        expires: Option<i64>,
    },
    Unsupported,
}

impl AuthEntry {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(key) if !key.trim().is_empty() => AuthEntry::ApiKey(key.trim().to_string()),
            Value::Object(obj) => {
                let kind = obj.get("type").and_then(Value::as_str);
                match kind {
                    Some("oauth") => {
                        let Some(access) = obj.get("access").and_then(flexible_string) else {
                            return AuthEntry::Unsupported;
                        };
                        AuthEntry::OAuth {
                            access,
                            account_id: obj.get("accountId").and_then(flexible_string),
                            expires: obj.get("expires").and_then(flexible_i64),
                        }
                    }
                    Some("api") | Some("apiKey") | Some("api_key") | None => obj
                        .get("key")
                        .and_then(flexible_string)
                        .map(AuthEntry::ApiKey)
                        .unwrap_or(AuthEntry::Unsupported),
                    Some(_) => AuthEntry::Unsupported,
                }
            }
            _ => AuthEntry::Unsupported,
        }
    }

    fn into_credential(self) -> Option<Credential> {
        match self {
            AuthEntry::ApiKey(key) => Some(Credential::new(key)),
            AuthEntry::OAuth {
                access,
                account_id,
                expires,
            } => {
                if expires.is_some_and(|ms| ms > 0 && ms < chrono::Utc::now().timestamp_millis()) {
                    tracing::debug!("stored OAuth token looks expired");
                }
                Some(Credential {
                    secret: access,
                    account_id,
                    id_token: None,
                })
            }
            AuthEntry::Unsupported => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CodexAuthFile {
    #[serde(rename = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,
    tokens: Option<CodexTokens>,
}

#[derive(Debug, Deserialize)]
struct CodexTokens {
    access_token: String,
    id_token: Option<String>,
    account_id: Option<String>,
}

/// Credentials from the OpenCode `auth.json`, with `USAGEBAR_<ID>_TOKEN`
/// environment overrides and the Codex CLI's own `auth.json` as a fallback.
#[derive(Debug, Default)]
pub struct AuthFileStore {
    entries: HashMap<String, AuthEntry>,
    codex: Option<Credential>,
}

impl AuthFileStore {
    pub fn auth_path() -> PathBuf {
        let data_dir = env::var("XDG_DATA_HOME")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
            .unwrap_or_else(|| PathBuf::from("."));
        data_dir.join("opencode").join("auth.json")
    }

    fn codex_auth_path() -> PathBuf {
        if let Ok(codex_home) = env::var("CODEX_HOME") {
            let trimmed = codex_home.trim();
            if !trimmed.is_empty() {
                return PathBuf::from(trimmed).join("auth.json");
            }
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".codex")
            .join("auth.json")
    }

    pub fn load() -> Result<Self> {
        let mut store = Self::from_path(&Self::auth_path())?;
        store.codex = Self::load_codex(&Self::codex_auth_path());
        Ok(store)
    }

    /// Missing files are an empty store, not an error.
    pub fn from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no auth file");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let root: HashMap<String, Value> = serde_json::from_str(content)?;
        let entries = root
            .iter()
            .map(|(key, value)| (key.clone(), AuthEntry::from_value(value)))
            .collect();
        Ok(Self {
            entries,
            codex: None,
        })
    }

    fn load_codex(path: &Path) -> Option<Credential> {
        let content = std::fs::read_to_string(path).ok()?;
        let auth: CodexAuthFile = match serde_json::from_str(&content) {
            Ok(auth) => auth,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable Codex auth file");
                return None;
            }
        };

        if let Some(key) = auth
            .openai_api_key
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            return Some(Credential::new(key));
        }

        let tokens = auth.tokens?;
        if tokens.access_token.trim().is_empty() {
            return None;
        }
        Some(Credential {
            secret: tokens.access_token,
            account_id: tokens.account_id,
            id_token: tokens.id_token,
        })
    }

    /// Keys under which OpenCode stores each provider.
    fn auth_keys(provider: ProviderIdentifier) -> &'static [&'static str] {
        match provider {
            ProviderIdentifier::Copilot => &["github-copilot", "copilot"],
            ProviderIdentifier::Claude => &["anthropic", "claude"],
            ProviderIdentifier::Codex => &["openai", "codex"],
            ProviderIdentifier::OpenRouter => &["openrouter"],
            ProviderIdentifier::NanoGpt => &["nano-gpt", "nanogpt"],
            ProviderIdentifier::ZaiCodingPlan => &["zai-coding-plan", "zai", "zhipuai-coding-plan"],
        }
    }

    fn env_var(provider: ProviderIdentifier) -> String {
        format!(
            "USAGEBAR_{}_TOKEN",
            provider.as_str().replace('-', "_").to_uppercase()
        )
    }
}

impl CredentialStore for AuthFileStore {
    fn credential(&self, provider: ProviderIdentifier) -> Option<Credential> {
        if let Some(token) = env::var(Self::env_var(provider))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
        {
            return Some(Credential::new(token));
        }

        let from_file = Self::auth_keys(provider)
            .iter()
            .filter_map(|key| self.entries.get(*key))
            .find_map(|entry| entry.clone().into_credential());

        match provider {
            // Codex needs the account id header; the Codex CLI file carries it
            ProviderIdentifier::Codex => match from_file {
                Some(cred) if cred.account_id.is_some() => Some(cred),
                other => self.codex.clone().or(other),
            },
            _ => from_file,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_unexpected_entries_are_skipped() {
        let store = AuthFileStore::from_json(
            r#"{
                "openai": { "type": "apiKey", "key": "sk-test-openai" },
                "openrouter": { "key": "or-test-key" },
                "anthropic": { "type": "wellknown", "token": "x" },
                "github-copilot": {
                    "type": "oauth",
                    "access": "gho_test",
                    "refresh": "gho_refresh",
                    "expires": 0
                }
            }"#,
        )
        .unwrap();

        assert_eq!(
            store.credential(ProviderIdentifier::OpenRouter),
            Some(Credential::new("or-test-key"))
        );
        assert_eq!(
            store
                .credential(ProviderIdentifier::Copilot)
                .map(|c| c.secret),
            Some("gho_test".to_string())
        );
        assert_eq!(store.credential(ProviderIdentifier::Claude), None);
    }

    #[test]
    fn test_raw_string_key() {
        let store = AuthFileStore::from_json(r#"{ "nano-gpt": "ng-raw-key" }"#).unwrap();
        assert_eq!(
            store.credential(ProviderIdentifier::NanoGpt),
            Some(Credential::new("ng-raw-key"))
        );
        assert!(store.is_available(ProviderIdentifier::NanoGpt));
        assert!(!store.is_available(ProviderIdentifier::ZaiCodingPlan));
    }

    #[test]
    fn test_oauth_with_flexible_types() {
        let entry = AuthEntry::from_value(&serde_json::json!({
            "type": "oauth",
            "access": "eyJ.test",
            "refresh": "rt_test",
            "expires": "1770563557150",
            "accountId": 123
        }));
        assert_eq!(
            entry,
            AuthEntry::OAuth {
                access: "eyJ.test".to_string(),
                account_id: Some("123".to_string()),
                expires: Some(1_770_563_557_150),
            }
        );
    }

    #[test]
    fn test_codex_auth_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"tokens": {{"access_token": "at", "id_token": "a.b.c", "account_id": "acct"}}}}"#
        )
        .unwrap();

        let cred = AuthFileStore::load_codex(file.path()).unwrap();
        assert_eq!(cred.secret, "at");
        assert_eq!(cred.account_id.as_deref(), Some("acct"));
        assert_eq!(cred.id_token.as_deref(), Some("a.b.c"));
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = AuthFileStore::from_path(&dir.path().join("auth.json")).unwrap();
        assert_eq!(store.credential(ProviderIdentifier::OpenRouter), None);
    }

    #[test]
    fn test_debug_redacts_secret() {
        let cred = Credential::new("sk-very-secret").with_account_id("acct");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("acct"));
    }

    #[test]
    fn test_env_var_name() {
        assert_eq!(
            AuthFileStore::env_var(ProviderIdentifier::ZaiCodingPlan),
            "USAGEBAR_ZAI_CODING_PLAN_TOKEN"
        );
    }
}
