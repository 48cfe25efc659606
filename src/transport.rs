use reqwest::blocking::Client;

use crate::error::{AgiNluError, Result};
use crate::models::{ChatRequest, ChatResponse};

/// One chat-completion round trip. Behind a trait so the pipeline can be
/// exercised without a network.
pub trait Transport: Send {
    fn chat(&self, req: &ChatRequest) -> Result<ChatResponse>;
}

/// Blocking HTTP transport for OpenAI-compatible endpoints. One POST per
/// call, bearer-token auth, no retries - a failed call degrades at the
/// pipeline boundary instead.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(endpoint: String, api_key: String) -> Result<Self> {
        if endpoint.is_empty() {
            return Err(AgiNluError::Config("cloud endpoint URL is empty".to_string()));
        }
        Ok(Self {
            client: Client::new(),
            endpoint,
            api_key,
        })
    }
}

impl Transport for HttpTransport {
    fn chat(&self, req: &ChatRequest) -> Result<ChatResponse> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(req)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(AgiNluError::Protocol(format!(
                "chat endpoint returned {status}: {body}"
            )));
        }

        response.json().map_err(AgiNluError::from)
    }
}
