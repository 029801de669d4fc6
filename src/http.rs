use crate::error::ProviderError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

const USER_AGENT: &str = "usagebar";
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Request/response exchange. Non-2xx statuses are data, not errors;
/// only transport failures return `Err`.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(HttpResponse { status, body })
    }
}

/// Executes `request` and decodes a 2xx JSON body.
///
/// 401 maps to `AuthenticationFailed`; any other status outside 200-299 maps
/// to `NetworkError` carrying the status code.
pub async fn fetch_json<T: DeserializeOwned>(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    label: &str,
) -> Result<T, ProviderError> {
    let response = transport.execute(request).await?;

    if response.status == 401 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{} rejected the credential",
            label
        )));
    }
    if !response.is_success() {
        tracing::debug!(status = response.status, body = %response.text(), "{} request failed", label);
        return Err(ProviderError::http_status(
            response.status,
            format!("{} API returned HTTP {}", label, response.status),
        ));
    }

    serde_json::from_slice(&response.body).map_err(|e| {
        tracing::warn!(error = %e, "failed to decode {} response", label);
        ProviderError::DecodingError(format!("invalid {} response: {}", label, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::StubTransport;
    use serde_json::Value;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_reqwest_transport_returns_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/usage"))
            .and(header("Authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let response = transport
            .execute(HttpRequest::get(format!("{}/usage", server.uri())).bearer("secret"))
            .await
            .unwrap();

        assert_eq!(response.status, 503);
        assert_eq!(response.text(), "busy");
        assert!(!response.is_success());
    }

    #[tokio::test]
    async fn test_reqwest_transport_sends_post_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/balance"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"ok":true}"#))
            .mount(&server)
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let value: Value = fetch_json(
            &transport,
            HttpRequest::post(format!("{}/balance", server.uri())).body("{}"),
            "Test",
        )
        .await
        .unwrap();
        assert_eq!(value["ok"], true);
    }

    #[tokio::test]
    async fn test_fetch_json_maps_401_to_authentication() {
        let transport = StubTransport::new().respond("https://x.test/u", 401, "{}");
        let err = fetch_json::<Value>(&transport, HttpRequest::get("https://x.test/u"), "Test")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_fetch_json_maps_other_statuses_to_network() {
        let transport = StubTransport::new().respond("https://x.test/u", 429, "slow down");
        let err = fetch_json::<Value>(&transport, HttpRequest::get("https://x.test/u"), "Test")
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(429));
    }

    #[tokio::test]
    async fn test_fetch_json_maps_bad_body_to_decoding() {
        let transport = StubTransport::new().respond("https://x.test/u", 200, "<html>");
        let err = fetch_json::<Value>(&transport, HttpRequest::get("https://x.test/u"), "Test")
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::DecodingError(_)));
    }
}
