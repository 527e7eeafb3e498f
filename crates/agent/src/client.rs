use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use buybuddy_core::config::{SpecialistEndpointConfig, SpecialistsConfig};
use buybuddy_core::domain::specialist::SpecialistKind;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("no endpoint configured for the {0} specialist")]
    NotConfigured(SpecialistKind),
    #[error("request failed: {0}")]
    Request(String),
    #[error("specialist returned HTTP {status}")]
    Status { status: u16 },
    #[error("specialist reply did not contain output text")]
    MissingOutput,
    #[error("specialist did not answer within {0:?}")]
    Timeout(Duration),
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Request(_) | Self::Timeout(_) => true,
            Self::Status { status } => *status == 429 || *status >= 500,
            Self::NotConfigured(_) | Self::MissingOutput => false,
        }
    }
}

/// Sends a JSON payload to a specialist and returns its raw text reply.
#[async_trait]
pub trait SpecialistClient: Send + Sync {
    async fn send(&self, kind: SpecialistKind, payload: &Value) -> Result<String, TransportError>;
}

/// Hosted-agent client: one POST per call, reply taken from `output_text`.
pub struct HttpSpecialistClient {
    client: Client,
    product: SpecialistEndpointConfig,
    insurance: SpecialistEndpointConfig,
    api_key: Option<SecretString>,
}

impl HttpSpecialistClient {
    pub fn from_config(config: &SpecialistsConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| TransportError::Request(error.to_string()))?;

        Ok(Self {
            client,
            product: config.product.clone(),
            insurance: config.insurance.clone(),
            api_key: config.api_key.clone(),
        })
    }

    fn endpoint(&self, kind: SpecialistKind) -> &SpecialistEndpointConfig {
        match kind {
            SpecialistKind::Product => &self.product,
            SpecialistKind::Insurance => &self.insurance,
        }
    }

    pub fn is_configured(&self, kind: SpecialistKind) -> bool {
        self.endpoint(kind).endpoint.is_some()
    }
}

pub fn request_body(agent_name: &str, payload: &Value) -> Value {
    json!({
        "input": [{ "role": "user", "content": payload.to_string() }],
        "agent": { "name": agent_name, "type": "agent_reference" },
    })
}

pub fn output_text(reply: &Value) -> Option<String> {
    reply
        .get("output_text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_owned)
}

#[async_trait]
impl SpecialistClient for HttpSpecialistClient {
    async fn send(&self, kind: SpecialistKind, payload: &Value) -> Result<String, TransportError> {
        let endpoint = self.endpoint(kind);
        let Some(url) = endpoint.endpoint.as_deref() else {
            return Err(TransportError::NotConfigured(kind));
        };

        let mut request = self.client.post(url).json(&request_body(&endpoint.agent_name, payload));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| TransportError::Request(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status { status: status.as_u16() });
        }

        let reply = response
            .json::<Value>()
            .await
            .map_err(|error| TransportError::Request(error.to_string()))?;
        output_text(&reply).ok_or(TransportError::MissingOutput)
    }
}

#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Text(String),
    Fail(TransportError),
    Hang,
}

/// In-memory client that plays back queued replies per specialist and
/// records every payload it receives. An exhausted queue answers
/// `NotConfigured`.
#[derive(Default)]
pub struct ScriptedSpecialistClient {
    replies: Mutex<HashMap<SpecialistKind, VecDeque<ScriptedReply>>>,
    calls: Mutex<Vec<(SpecialistKind, Value)>>,
}

impl ScriptedSpecialistClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(self, kind: SpecialistKind, text: impl Into<String>) -> Self {
        self.push(kind, ScriptedReply::Text(text.into()))
    }

    pub fn with_failure(self, kind: SpecialistKind, error: TransportError) -> Self {
        self.push(kind, ScriptedReply::Fail(error))
    }

    pub fn with_hang(self, kind: SpecialistKind) -> Self {
        self.push(kind, ScriptedReply::Hang)
    }

    fn push(self, kind: SpecialistKind, reply: ScriptedReply) -> Self {
        lock(&self.replies).entry(kind).or_default().push_back(reply);
        self
    }

    pub fn calls(&self) -> Vec<(SpecialistKind, Value)> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self, kind: SpecialistKind) -> usize {
        lock(&self.calls).iter().filter(|(called, _)| *called == kind).count()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl SpecialistClient for ScriptedSpecialistClient {
    async fn send(&self, kind: SpecialistKind, payload: &Value) -> Result<String, TransportError> {
        lock(&self.calls).push((kind, payload.clone()));
        let next = lock(&self.replies).get_mut(&kind).and_then(VecDeque::pop_front);

        match next {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(error)) => Err(error),
            Some(ScriptedReply::Hang) => std::future::pending().await,
            None => Err(TransportError::NotConfigured(kind)),
        }
    }
}

#[cfg(test)]
mod tests {
    use buybuddy_core::config::AppConfig;
    use buybuddy_core::domain::specialist::SpecialistKind;
    use serde_json::json;

    use super::{
        output_text, request_body, HttpSpecialistClient, ScriptedSpecialistClient,
        SpecialistClient, TransportError,
    };

    #[tokio::test]
    async fn scripted_client_plays_back_in_order() {
        let client = ScriptedSpecialistClient::new()
            .with_reply(SpecialistKind::Product, "first")
            .with_failure(SpecialistKind::Product, TransportError::Status { status: 502 });

        let payload = json!({"requested_action": "provide_liebherr_recommendations"});
        assert_eq!(client.send(SpecialistKind::Product, &payload).await, Ok("first".to_string()));
        assert_eq!(
            client.send(SpecialistKind::Product, &payload).await,
            Err(TransportError::Status { status: 502 })
        );
        assert_eq!(
            client.send(SpecialistKind::Product, &payload).await,
            Err(TransportError::NotConfigured(SpecialistKind::Product))
        );
        assert_eq!(client.call_count(SpecialistKind::Product), 3);
        assert_eq!(client.call_count(SpecialistKind::Insurance), 0);
        assert_eq!(client.calls()[0].1, payload);
    }

    #[test]
    fn request_body_wraps_payload_as_agent_reference() {
        let body = request_body("product-agent", &json!({"requested_action": "x"}));

        assert_eq!(body["agent"]["name"], "product-agent");
        assert_eq!(body["agent"]["type"], "agent_reference");
        assert_eq!(body["input"][0]["role"], "user");
        assert_eq!(body["input"][0]["content"], "{\"requested_action\":\"x\"}");
    }

    #[test]
    fn output_text_requires_non_empty_string() {
        assert_eq!(output_text(&json!({"output_text": " hi "})), Some("hi".to_string()));
        assert_eq!(output_text(&json!({"output_text": ""})), None);
        assert_eq!(output_text(&json!({"output": []})), None);
    }

    #[test]
    fn retryability_follows_error_kind() {
        assert!(TransportError::Request("reset".into()).is_retryable());
        assert!(TransportError::Status { status: 503 }.is_retryable());
        assert!(TransportError::Status { status: 429 }.is_retryable());
        assert!(!TransportError::Status { status: 400 }.is_retryable());
        assert!(!TransportError::MissingOutput.is_retryable());
        assert!(!TransportError::NotConfigured(SpecialistKind::Product).is_retryable());
    }

    #[tokio::test]
    async fn unconfigured_endpoint_is_reported_without_network() {
        let config = AppConfig::default();
        let client = HttpSpecialistClient::from_config(&config.specialists).expect("client");

        assert!(!client.is_configured(SpecialistKind::Insurance));
        let error = client
            .send(SpecialistKind::Insurance, &json!({}))
            .await
            .expect_err("no endpoint");
        assert_eq!(error, TransportError::NotConfigured(SpecialistKind::Insurance));
    }
}
