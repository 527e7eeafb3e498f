use std::sync::Arc;

use buybuddy_agent::{AgentRuntime, TransportError};
use buybuddy_core::audit::{AuditSink, NoopAuditSink};
use buybuddy_core::config::{AppConfig, ConfigError, LoadOptions};
use buybuddy_core::domain::specialist::SpecialistKind;
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("specialist client setup failed: {0}")]
    SpecialistClient(#[source] TransportError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "starting application bootstrap"
    );

    for kind in [SpecialistKind::Product, SpecialistKind::Insurance] {
        if config.specialists.endpoint(kind).endpoint.is_none() {
            warn!(
                event_name = "system.bootstrap.specialist_unconfigured",
                correlation_id = "bootstrap",
                session_id = "unknown",
                specialist = %kind,
                "no endpoint configured; calls to this specialist will report it unavailable"
            );
        }
    }

    let audit_sink: Arc<dyn AuditSink> = Arc::new(NoopAuditSink);
    let runtime =
        AgentRuntime::from_config(&config, audit_sink).map_err(BootstrapError::SpecialistClient)?;

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        session_id = "unknown",
        "agent runtime initialized"
    );

    Ok(Application { config, runtime: Arc::new(runtime) })
}
