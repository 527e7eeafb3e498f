use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use buybuddy_agent::AgentRuntime;
use buybuddy_core::config::SpecialistsConfig;
use buybuddy_core::domain::specialist::SpecialistKind;
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    runtime: Arc<AgentRuntime>,
    product_configured: bool,
    insurance_configured: bool,
}

impl HealthState {
    pub fn new(runtime: Arc<AgentRuntime>, specialists: &SpecialistsConfig) -> Self {
        Self {
            runtime,
            product_configured: specialists.endpoint(SpecialistKind::Product).endpoint.is_some(),
            insurance_configured: specialists.endpoint(SpecialistKind::Insurance).endpoint.is_some(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub product_specialist: HealthCheck,
    pub insurance_specialist: HealthCheck,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

/// Unconfigured specialists degrade the report but not the status code: the
/// conversation still works and reports the specialist as unavailable.
pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let sessions = state.runtime.session_count().await;
    let product_specialist = specialist_check(SpecialistKind::Product, state.product_configured);
    let insurance_specialist =
        specialist_check(SpecialistKind::Insurance, state.insurance_configured);
    let ready = state.product_configured && state.insurance_configured;

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!("buybuddy-server runtime initialized ({sessions} active sessions)"),
        },
        product_specialist,
        insurance_specialist,
        checked_at: Utc::now().to_rfc3339(),
    };

    (StatusCode::OK, Json(payload))
}

fn specialist_check(kind: SpecialistKind, configured: bool) -> HealthCheck {
    if configured {
        HealthCheck { status: "ready", detail: format!("{kind} specialist endpoint configured") }
    } else {
        HealthCheck {
            status: "unconfigured",
            detail: format!("no {kind} specialist endpoint configured"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{extract::State, http::StatusCode, Json};
    use buybuddy_core::config::AppConfig;

    use crate::bootstrap::bootstrap_with_config;
    use crate::health::{health, HealthState};

    #[tokio::test]
    async fn health_is_ready_when_both_specialists_are_configured() {
        let mut config = AppConfig::default();
        config.specialists.product.endpoint = Some("https://agents.example/product".to_string());
        config.specialists.insurance.endpoint = Some("https://agents.example/insurance".to_string());
        let app = bootstrap_with_config(config.clone()).await.expect("bootstrap");

        let (status, Json(payload)) =
            health(State(HealthState::new(Arc::clone(&app.runtime), &config.specialists))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.product_specialist.status, "ready");
        assert_eq!(payload.insurance_specialist.status, "ready");
    }

    #[tokio::test]
    async fn health_is_degraded_without_specialist_endpoints() {
        let config = AppConfig::default();
        let app = bootstrap_with_config(config.clone()).await.expect("bootstrap");

        let (status, Json(payload)) =
            health(State(HealthState::new(Arc::clone(&app.runtime), &config.specialists))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.service.status, "ready");
        assert_eq!(payload.product_specialist.status, "unconfigured");
        assert_eq!(payload.insurance_specialist.status, "unconfigured");
    }
}
