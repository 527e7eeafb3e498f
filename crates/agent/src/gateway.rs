use std::sync::Arc;
use std::time::Duration;

use buybuddy_core::audit::AuditContext;
use buybuddy_core::config::SpecialistsConfig;
use buybuddy_core::domain::result::SpecialistResult;
use buybuddy_core::domain::specialist::{SpecialistKind, SpecialistRequest};
use buybuddy_core::errors::ProtocolError;
use tracing::{info, warn};

use crate::client::{SpecialistClient, TransportError};
use crate::normalize::{normalize_reply, ReplyOutcome};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 1, base_delay_ms: 200, max_delay_ms: 2_000 }
    }
}

impl RetryPolicy {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries, ..Self::default() }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Result of one specialist call. Both arms carry an entry for
/// `specialist_responses`; a failure entry is a `System` message.
#[derive(Clone, Debug, PartialEq)]
pub enum SpecialistCall {
    Completed { result: SpecialistResult, outcome: ReplyOutcome },
    Failed { result: SpecialistResult, error: ProtocolError },
}

impl SpecialistCall {
    pub fn result(&self) -> &SpecialistResult {
        match self {
            Self::Completed { result, .. } | Self::Failed { result, .. } => result,
        }
    }

    pub fn into_result(self) -> SpecialistResult {
        match self {
            Self::Completed { result, .. } | Self::Failed { result, .. } => result,
        }
    }

    pub fn outcome(&self) -> Option<ReplyOutcome> {
        match self {
            Self::Completed { outcome, .. } => Some(*outcome),
            Self::Failed { .. } => None,
        }
    }
}

/// Uniform call path to both specialists: bounded by a per-attempt timeout,
/// retried on transport failures, normalized on success. Never returns an
/// error to the caller.
#[derive(Clone)]
pub struct SpecialistGateway {
    client: Arc<dyn SpecialistClient>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl SpecialistGateway {
    pub fn new(client: Arc<dyn SpecialistClient>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self { client, timeout, retry }
    }

    pub fn from_config(client: Arc<dyn SpecialistClient>, config: &SpecialistsConfig) -> Self {
        Self::new(
            client,
            Duration::from_secs(config.timeout_secs),
            RetryPolicy::with_max_retries(config.max_retries),
        )
    }

    pub async fn call_specialist(
        &self,
        request: &SpecialistRequest,
        audit: &AuditContext,
    ) -> SpecialistCall {
        let kind = request.kind();
        let session_id = audit.session_id.as_deref().unwrap_or("unknown");

        let payload = match request.to_value() {
            Ok(payload) => payload,
            Err(error) => return failed(kind, format!("request could not be encoded: {error}")),
        };

        let mut last_error = None;
        for attempt in 0..=self.retry.max_retries {
            info!(
                event_name = "specialist.call.started",
                session_id,
                correlation_id = %audit.correlation_id,
                specialist = %kind,
                attempt,
                "calling specialist"
            );

            let sent = match tokio::time::timeout(self.timeout, self.client.send(kind, &payload)).await {
                Ok(sent) => sent,
                Err(_) => Err(TransportError::Timeout(self.timeout)),
            };

            match sent {
                Ok(raw) => {
                    return match normalize_reply(kind, &raw) {
                        Ok(normalized) => {
                            info!(
                                event_name = "specialist.call.completed",
                                session_id,
                                correlation_id = %audit.correlation_id,
                                specialist = %kind,
                                attempt,
                                status = ?normalized.status,
                                "specialist replied"
                            );
                            let outcome = normalized.outcome;
                            SpecialistCall::Completed { result: normalized.into_result(kind), outcome }
                        }
                        Err(error) => {
                            warn!(
                                event_name = "specialist.call.malformed",
                                session_id,
                                correlation_id = %audit.correlation_id,
                                specialist = %kind,
                                error = %error,
                                "specialist reply rejected"
                            );
                            failed(kind, error.to_string())
                        }
                    };
                }
                Err(error) => {
                    warn!(
                        event_name = "specialist.call.failed",
                        session_id,
                        correlation_id = %audit.correlation_id,
                        specialist = %kind,
                        attempt,
                        max_retries = self.retry.max_retries,
                        error = %error,
                        "specialist call failed"
                    );

                    let retryable = error.is_retryable();
                    last_error = Some(error);
                    if !retryable || attempt >= self.retry.max_retries {
                        break;
                    }

                    let delay = self.retry.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let detail = last_error.map(|error| error.to_string()).unwrap_or_default();
        failed(kind, detail)
    }
}

fn failed(specialist: SpecialistKind, detail: String) -> SpecialistCall {
    let error = ProtocolError::SpecialistUnavailable { specialist, detail };
    SpecialistCall::Failed { result: SpecialistResult::system(error.user_message()), error }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use buybuddy_core::audit::AuditContext;
    use buybuddy_core::domain::packet::ExtractedRequirements;
    use buybuddy_core::domain::result::{AgentLabel, CssClass, ResultStatus};
    use buybuddy_core::domain::specialist::{
        CustomerContext, InsuranceRequest, ProductContext, ProductRequest, SpecialistKind,
        SpecialistRequest,
    };
    use buybuddy_core::errors::ProtocolError;
    use buybuddy_core::{ConversationState, ProductStatus};

    use super::{RetryPolicy, SpecialistCall, SpecialistGateway};
    use crate::client::{ScriptedSpecialistClient, TransportError};
    use crate::normalize::ReplyOutcome;

    fn audit() -> AuditContext {
        AuditContext::new(Some("session-1".to_string()), "corr-1", "test")
    }

    fn product_request() -> SpecialistRequest {
        SpecialistRequest::ProductRecommendations(ProductRequest {
            customer_context: CustomerContext {
                latest_user_input: "show me liebherr options".to_string(),
                requirements: ExtractedRequirements::default(),
            },
            product_context: ProductContext {
                product_status: ProductStatus::Searching,
                inventory_checked: true,
                internal_match_found: false,
                internal_options_rejected: true,
                no_match_reason: None,
            },
            current_state: ConversationState::default(),
            max_recommendations: 3,
            iteration_limit: 3,
        })
    }

    fn insurance_request() -> SpecialistRequest {
        SpecialistRequest::InsuranceQuote(InsuranceRequest {
            manufacturer: "Liebherr".to_string(),
            product_type: "Refrigerator".to_string(),
            product_model: "CNsfd 5704".to_string(),
            key_features: Vec::new(),
            configuration_class: "Standard".to_string(),
            purchase_price: "1299 EUR".to_string(),
            iteration_limit: 3,
        })
    }

    fn no_delay(max_retries: u32) -> RetryPolicy {
        RetryPolicy { max_retries, base_delay_ms: 0, max_delay_ms: 0 }
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy { max_retries: 5, base_delay_ms: 100, max_delay_ms: 500 };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn normalized_reply_is_returned_with_outcome() {
        let client = Arc::new(ScriptedSpecialistClient::new().with_reply(
            SpecialistKind::Product,
            r#"{"recommended_models": [{"model_name": "CNsfd 5704", "base_price": 1299}]}"#,
        ));
        let gateway = SpecialistGateway::new(client.clone(), Duration::from_secs(1), no_delay(1));

        let call = gateway.call_specialist(&product_request(), &audit()).await;

        assert_eq!(call.outcome(), Some(ReplyOutcome::Recommendations { count: 1 }));
        assert_eq!(call.result().agent, AgentLabel::Product);
        assert_eq!(call.result().display_text, "Top options: CNsfd 5704 (1299).");
        assert_eq!(
            client.calls()[0].1["requested_action"],
            "provide_liebherr_recommendations"
        );
        assert_eq!(
            client.calls()[0].1["customer_context"]["latest_user_input"],
            "show me liebherr options"
        );
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let client = Arc::new(
            ScriptedSpecialistClient::new()
                .with_failure(SpecialistKind::Insurance, TransportError::Status { status: 503 })
                .with_reply(SpecialistKind::Insurance, r#"{"status": "approved", "coverage_options": []}"#),
        );
        let gateway = SpecialistGateway::new(client.clone(), Duration::from_secs(1), no_delay(1));

        let call = gateway.call_specialist(&insurance_request(), &audit()).await;

        assert_eq!(call.outcome(), Some(ReplyOutcome::InsuranceApproved));
        assert_eq!(call.result().display_text, "Insurance is available.");
        assert_eq!(client.call_count(SpecialistKind::Insurance), 2);
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let client = Arc::new(
            ScriptedSpecialistClient::new()
                .with_failure(SpecialistKind::Product, TransportError::Status { status: 401 }),
        );
        let gateway = SpecialistGateway::new(client.clone(), Duration::from_secs(1), no_delay(3));

        let call = gateway.call_specialist(&product_request(), &audit()).await;

        assert!(matches!(call, SpecialistCall::Failed { .. }));
        assert_eq!(client.call_count(SpecialistKind::Product), 1);
    }

    #[tokio::test]
    async fn timeout_becomes_system_entry_without_detail() {
        let client = Arc::new(ScriptedSpecialistClient::new().with_hang(SpecialistKind::Product));
        let gateway = SpecialistGateway::new(client, Duration::from_millis(20), no_delay(0));

        let call = gateway.call_specialist(&product_request(), &audit()).await;

        let SpecialistCall::Failed { result, error } = call else {
            panic!("timeout must fail the call");
        };
        assert_eq!(result.agent, AgentLabel::System);
        assert_eq!(result.css_class, CssClass::SystemMessage);
        assert_eq!(result.status, ResultStatus::Error);
        assert!(!result.display_text.contains("Timeout"));
        assert!(!result.display_text.contains("ms"));
        assert!(matches!(
            error,
            ProtocolError::SpecialistUnavailable { specialist: SpecialistKind::Product, ref detail }
                if detail.contains("did not answer")
        ));
    }

    #[tokio::test]
    async fn malformed_reply_is_not_retried_or_fabricated() {
        let client = Arc::new(
            ScriptedSpecialistClient::new()
                .with_reply(SpecialistKind::Insurance, r#"{"status": "maybe"}"#)
                .with_reply(SpecialistKind::Insurance, r#"{"status": "approved"}"#),
        );
        let gateway = SpecialistGateway::new(client.clone(), Duration::from_secs(1), no_delay(2));

        let call = gateway.call_specialist(&insurance_request(), &audit()).await;

        assert_eq!(call.result().agent, AgentLabel::System);
        assert!(!call.result().display_text.contains("maybe"));
        assert_eq!(client.call_count(SpecialistKind::Insurance), 1);
    }
}
