use crate::error::ProviderError;
use crate::http::{HttpRequest, HttpResponse, HttpTransport};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

enum Canned {
    Response(u16, String),
    Failure(ProviderError),
}

/// Transport answering from a URL-keyed table; unknown URLs fail as network errors.
#[derive(Default)]
pub struct StubTransport {
    routes: HashMap<String, Canned>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, url: &str, status: u16, body: &str) -> Self {
        self.routes
            .insert(url.to_string(), Canned::Response(status, body.to_string()));
        self
    }

    pub fn fail(mut self, url: &str, error: ProviderError) -> Self {
        self.routes.insert(url.to_string(), Canned::Failure(error));
        self
    }

    pub fn delay(mut self, url: &str, delay: Duration) -> Self {
        self.delays.insert(url.to_string(), delay);
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn header_sent(&self, url: &str, name: &str) -> Option<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .flat_map(|r| r.headers)
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }
}

#[async_trait]
impl HttpTransport for StubTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, ProviderError> {
        let url = request.url.clone();
        self.requests.lock().unwrap().push(request);

        if let Some(delay) = self.delays.get(&url) {
            tokio::time::sleep(*delay).await;
        }

        match self.routes.get(&url) {
            Some(Canned::Response(status, body)) => Ok(HttpResponse {
                status: *status,
                body: body.clone().into_bytes(),
            }),
            Some(Canned::Failure(error)) => Err(error.clone()),
            None => Err(ProviderError::network(format!("no stub for {}", url))),
        }
    }
}
