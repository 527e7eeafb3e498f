use std::sync::Arc;
use std::time::Duration;

use buybuddy_core::audit::{AuditContext, AuditSink};
use buybuddy_core::config::AppConfig;
use buybuddy_core::domain::packet::IntakePacket;
use buybuddy_core::domain::result::OrchestratorResult;
use buybuddy_core::errors::{ApplicationError, ProtocolError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{HttpSpecialistClient, TransportError};
use crate::gateway::SpecialistGateway;
use crate::orchestrator::Orchestrator;
use crate::session::{Session, SessionId, SessionStore};

const ACTOR: &str = "retail_agent";

/// Session-aware entry point for the UI layer. One turn per session at a
/// time; committed values change only when a turn runs to completion.
pub struct AgentRuntime {
    orchestrator: Orchestrator,
    sessions: SessionStore,
}

impl AgentRuntime {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self::with_sessions(orchestrator, SessionStore::new())
    }

    pub fn with_sessions(orchestrator: Orchestrator, sessions: SessionStore) -> Self {
        Self { orchestrator, sessions }
    }

    pub fn from_config(
        config: &AppConfig,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Result<Self, TransportError> {
        let client = Arc::new(HttpSpecialistClient::from_config(&config.specialists)?);
        let gateway = SpecialistGateway::from_config(client, &config.specialists);
        let orchestrator = Orchestrator::new(gateway, config.limits.iteration_limits())
            .with_audit_sink(audit_sink);
        let sessions = SessionStore::with_capacity(config.sessions.max_sessions);
        Ok(Self::with_sessions(orchestrator, sessions))
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn handle_turn(&self, session_id: &SessionId, packet: &IntakePacket) -> OrchestratorResult {
        self.handle_turn_correlated(session_id, packet, &Uuid::new_v4().to_string()).await
    }

    pub async fn handle_turn_correlated(
        &self,
        session_id: &SessionId,
        packet: &IntakePacket,
        correlation_id: &str,
    ) -> OrchestratorResult {
        let audit = AuditContext::new(Some(session_id.to_string()), correlation_id, ACTOR);
        let handle = self.sessions.session(session_id).await;
        let mut session = handle.lock().await;

        if packet.state() != &session.state || packet.counters() != &session.counters {
            warn!(
                event_name = "runtime.turn.stale",
                session_id = %session_id,
                correlation_id,
                "packet snapshot does not match the committed session"
            );
            let error = ProtocolError::StaleSnapshot { session_id: session_id.to_string() };
            return self
                .orchestrator
                .reject_packet(error, &session.state, &session.counters, &audit)
                .result;
        }

        let outcome =
            self.orchestrator.handle_turn_carrying(packet, &session.inventory, &audit).await;
        session.state = outcome.state;
        session.counters = outcome.counters;
        session.inventory = outcome.inventory;

        info!(
            event_name = "runtime.turn.committed",
            session_id = %session_id,
            correlation_id,
            overall_status = %session.state.overall_status,
            "session updated"
        );
        outcome.result
    }

    /// Parses and runs a raw packet. Undecodable input yields an error result
    /// against the session's committed values.
    pub async fn handle_raw_turn(
        &self,
        session_id: &SessionId,
        raw: &str,
        correlation_id: &str,
    ) -> OrchestratorResult {
        match IntakePacket::from_json(raw) {
            Ok(packet) => self.handle_turn_correlated(session_id, &packet, correlation_id).await,
            Err(error) => {
                let audit = AuditContext::new(Some(session_id.to_string()), correlation_id, ACTOR);
                let current = match self.sessions.get(session_id).await {
                    Some(handle) => handle.lock().await.clone(),
                    None => Session::default(),
                };
                self.orchestrator
                    .reject_packet(error.into(), &current.state, &current.counters, &audit)
                    .result
            }
        }
    }

    pub async fn snapshot(&self, session_id: &SessionId) -> Result<Session, ApplicationError> {
        self.sessions
            .snapshot(session_id)
            .await
            .ok_or_else(|| ApplicationError::SessionNotFound(session_id.to_string()))
    }

    pub async fn reset(&self, session_id: &SessionId) -> Session {
        info!(event_name = "runtime.session.reset", session_id = %session_id, "session reset");
        self.sessions.reset(session_id).await
    }

    pub async fn remove(&self, session_id: &SessionId) -> Result<(), ApplicationError> {
        if !self.sessions.remove(session_id).await {
            return Err(ApplicationError::SessionNotFound(session_id.to_string()));
        }
        info!(event_name = "runtime.session.removed", session_id = %session_id, "session removed");
        Ok(())
    }

    /// Drops sessions idle for at least `idle_ttl`.
    pub async fn evict_idle(&self, idle_ttl: Duration) -> usize {
        let evicted = self.sessions.evict_idle(idle_ttl).await;
        if evicted > 0 {
            info!(
                event_name = "runtime.session.evicted",
                evicted,
                idle_ttl_secs = idle_ttl.as_secs(),
                "idle sessions evicted"
            );
        }
        evicted
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.len().await
    }
}
