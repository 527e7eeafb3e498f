//! One request/response cycle: validate the packet, apply the proposed
//! state, route, call at most one specialist, and emit a result the UI layer
//! can render as-is.
//!
//! Every failure inside a turn is recovered here. Callers always get a
//! well-formed [`OrchestratorResult`] together with the state and counters to
//! commit.

use std::sync::Arc;

use buybuddy_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink};
use buybuddy_core::domain::packet::{IntakePacket, InventorySnapshot};
use buybuddy_core::domain::result::{InventoryCheck, OrchestratorResult, SpecialistResult};
use buybuddy_core::domain::specialist::{
    CustomerContext, InsuranceRequest, ProductContext, ProductRequest, SpecialistKind,
    SpecialistRequest, CONFIGURATION_CLASS, MANUFACTURER, MAX_RECOMMENDATIONS, PRODUCT_TYPE,
};
use buybuddy_core::errors::ProtocolError;
use buybuddy_core::flows::{validate_state, StateEngine};
use buybuddy_core::{
    ConversationState, InsuranceStatus, IterationCategory, IterationCounters, IterationGuard,
    IterationLimits, OverallStatus, ProductStatus, Routing,
};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::gateway::{SpecialistCall, SpecialistGateway};
use crate::intake::infer_routing_hint;
use crate::normalize::{compose_customer_response, ReplyOutcome};
use crate::router::{internal_options_exhausted, DowngradeReason, Router, RoutingDecision};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("routing `{routing}` emitted without a completed inventory check")]
pub struct GateViolation {
    pub routing: Routing,
}

impl From<GateViolation> for ProtocolError {
    fn from(value: GateViolation) -> Self {
        Self::ValidationGateViolation { rule: "inventory_gate", detail: value.to_string() }
    }
}

/// Any result routed to the product specialist must report a completed
/// inventory check in the same result.
pub fn check_inventory_gate(
    state: &ConversationState,
    inventory_check: &InventoryCheck,
) -> Result<(), GateViolation> {
    if state.routing == Routing::ProductAgent && !inventory_check.checked {
        return Err(GateViolation { routing: state.routing });
    }
    Ok(())
}

/// What a turn produced: the result for the UI and the values to commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnOutcome {
    pub result: OrchestratorResult,
    pub state: ConversationState,
    pub counters: IterationCounters,
    /// Inventory facts in effect after the turn, carried into later turns
    /// whose packets report no fresh check.
    pub inventory: InventorySnapshot,
}

pub struct Orchestrator {
    engine: StateEngine,
    router: Router,
    gateway: SpecialistGateway,
    audit_sink: Arc<dyn AuditSink>,
}

impl Orchestrator {
    pub fn new(gateway: SpecialistGateway, limits: IterationLimits) -> Self {
        Self {
            engine: StateEngine::default(),
            router: Router::new(IterationGuard::new(limits)),
            gateway,
            audit_sink: Arc::new(NoopAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit_sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = audit_sink;
        self
    }

    pub fn guard(&self) -> &IterationGuard {
        self.router.guard()
    }

    pub fn initial_state(&self) -> ConversationState {
        self.engine.initial_state()
    }

    /// Runs one turn against the snapshot carried in the packet's
    /// `routing_context`, with no earlier inventory facts.
    pub async fn handle_turn(&self, packet: &IntakePacket, audit: &AuditContext) -> TurnOutcome {
        self.handle_turn_carrying(packet, &InventorySnapshot::default(), audit).await
    }

    /// Runs one turn. `carried` is the inventory committed by an earlier
    /// turn; it applies while the state still reports a completed check and
    /// the packet brings no fresh one.
    pub async fn handle_turn_carrying(
        &self,
        packet: &IntakePacket,
        carried: &InventorySnapshot,
        audit: &AuditContext,
    ) -> TurnOutcome {
        let prior_state = packet.state().clone();
        let prior_counters = *packet.counters();
        let reject = |error: ProtocolError| {
            let mut outcome = self.reject_packet(error, &prior_state, &prior_counters, audit);
            outcome.inventory = carried.clone();
            outcome
        };

        if let Err(error) = packet.validate() {
            return reject(error.into());
        }
        if let Err(error) = validate_state(&prior_state) {
            return reject(error.into());
        }
        if let Err(exceeded) = self.guard().check(&prior_counters) {
            return reject(exceeded.into());
        }

        let mut turn = Turn::new(prior_state, prior_counters);
        self.apply_proposal(packet, &mut turn, audit);
        self.count_clarification(&mut turn, audit);
        turn.inventory = effective_inventory(packet, carried, &turn.state);

        if !turn.stopped_this_turn {
            let decision = self.decide(packet, &turn, audit);
            match decision {
                RoutingDecision::Route(kind) => self.consult(kind, packet, &mut turn, audit).await,
                RoutingDecision::Downgrade { reason, .. } => turn.notices.push(reason.user_message()),
                RoutingDecision::NoRoute => {}
            }
        }

        let inventory_check =
            InventoryCheck::from_snapshot(&turn.inventory, turn.state.inventory_checked);
        if let Err(violation) = check_inventory_gate(&turn.state, &inventory_check) {
            error!(
                event_name = "orchestrator.gate_violation",
                session_id = audit.session_id.as_deref().unwrap_or("unknown"),
                correlation_id = %audit.correlation_id,
                error = %violation,
                "result failed the inventory gate; routing withdrawn"
            );
            self.audit_sink.emit(
                audit
                    .event("orchestrator.gate_violation", AuditCategory::Routing, AuditOutcome::Failed)
                    .with_metadata("routing", violation.routing.as_str()),
            );
            turn.state.routing = Routing::None;
            turn.entries.push(SpecialistResult::system(ProtocolError::from(violation).user_message()));
        }

        let customer_response = customer_response(
            packet.intake.customer_visible_draft.as_deref(),
            &turn.entries,
            &turn.notices,
        );

        info!(
            event_name = "orchestrator.turn.completed",
            session_id = audit.session_id.as_deref().unwrap_or("unknown"),
            correlation_id = %audit.correlation_id,
            overall_status = %turn.state.overall_status,
            routing = %turn.state.routing,
            responses = turn.entries.len(),
            "turn completed"
        );

        TurnOutcome {
            result: OrchestratorResult::new(
                turn.state.clone(),
                inventory_check,
                turn.entries,
                customer_response,
            ),
            state: turn.state,
            counters: turn.counters,
            inventory: turn.inventory,
        }
    }

    /// Error result for a packet that could not be accepted: prior state,
    /// routing `none`, and a `System` entry explaining what is missing.
    pub fn reject_packet(
        &self,
        error: ProtocolError,
        prior_state: &ConversationState,
        prior_counters: &IterationCounters,
        audit: &AuditContext,
    ) -> TurnOutcome {
        warn!(
            event_name = "ingress.packet_rejected",
            session_id = audit.session_id.as_deref().unwrap_or("unknown"),
            correlation_id = %audit.correlation_id,
            reason_code = error.reason_code(),
            error = %error,
            "intake packet rejected"
        );
        self.audit_sink.emit(
            audit
                .event("ingress.packet_rejected", AuditCategory::Ingress, AuditOutcome::Rejected)
                .with_metadata("reason_code", error.reason_code())
                .with_metadata("error", error.to_string()),
        );

        let mut state = prior_state.clone();
        state.routing = Routing::None;
        let message = error.user_message();

        TurnOutcome {
            result: OrchestratorResult::new(
                state.clone(),
                InventoryCheck::default(),
                vec![SpecialistResult::system(message.clone())],
                message,
            ),
            state,
            counters: *prior_counters,
            inventory: InventorySnapshot::default(),
        }
    }

    fn apply_proposal(&self, packet: &IntakePacket, turn: &mut Turn, audit: &AuditContext) {
        let proposed = intake_proposal(packet, &turn.state);
        self.transition(turn, proposed, audit);
    }

    fn count_clarification(&self, turn: &mut Turn, audit: &AuditContext) {
        if turn.state.product_status != ProductStatus::Collecting || turn.state.is_stopped() {
            return;
        }

        let category = IterationCategory::CustomerClarifications;
        match self.guard().try_increment(&turn.counters, category) {
            Ok(counters) => turn.counters = counters,
            Err(exceeded) => {
                self.limit_exceeded(&ProtocolError::LimitExceeded(exceeded.clone()), audit);
                turn.notices.push(ProtocolError::LimitExceeded(exceeded).user_message());

                let mut stopped = turn.state.clone();
                stopped.overall_status = OverallStatus::Stopped;
                stopped.routing = Routing::None;
                if self.transition(turn, stopped, audit) {
                    turn.stopped_this_turn = true;
                }
            }
        }
    }

    fn decide(&self, packet: &IntakePacket, turn: &Turn, audit: &AuditContext) -> RoutingDecision {
        let hint = match packet.routing_hint() {
            Routing::None => infer_routing_hint(
                &packet.conversation.latest_user_input,
                packet.intake.customer_visible_draft.as_deref(),
                &turn.state,
                &packet.intake.extracted_requirements,
            ),
            hint => hint,
        };
        let exhausted =
            internal_options_exhausted(&turn.inventory, packet.intake.internal_options_rejected);
        let decision = self.router.decide_routing(&turn.state, &turn.counters, hint, exhausted);

        let (outcome, reason_code) = match &decision {
            RoutingDecision::Route(_) | RoutingDecision::NoRoute => (AuditOutcome::Success, "none"),
            RoutingDecision::Downgrade { reason, .. } => (AuditOutcome::Rejected, reason.reason_code()),
        };
        info!(
            event_name = "routing.decided",
            session_id = audit.session_id.as_deref().unwrap_or("unknown"),
            correlation_id = %audit.correlation_id,
            hint = %hint,
            routing = %decision.routing(),
            reason_code,
            "routing decided"
        );
        self.audit_sink.emit(
            audit
                .event("routing.decided", AuditCategory::Routing, outcome)
                .with_metadata("hint", hint.as_str())
                .with_metadata("routing", decision.routing().as_str())
                .with_metadata("reason_code", reason_code),
        );
        if let RoutingDecision::Downgrade { reason: DowngradeReason::LimitExceeded(exceeded), .. } =
            &decision
        {
            self.limit_exceeded(&ProtocolError::LimitExceeded(exceeded.clone()), audit);
        }

        decision
    }

    async fn consult(
        &self,
        kind: SpecialistKind,
        packet: &IntakePacket,
        turn: &mut Turn,
        audit: &AuditContext,
    ) {
        let request = match self.build_request(kind, packet, turn) {
            Ok(request) => request,
            Err(error) => {
                warn!(
                    event_name = "specialist.request_incomplete",
                    session_id = audit.session_id.as_deref().unwrap_or("unknown"),
                    correlation_id = %audit.correlation_id,
                    specialist = %kind,
                    error = %error,
                    "specialist request is missing required fields; not calling"
                );
                turn.entries.push(SpecialistResult::system(error.user_message()));
                return;
            }
        };

        let counters = match self.guard().try_increment(&turn.counters, kind.category()) {
            Ok(counters) => counters,
            Err(exceeded) => {
                let error = ProtocolError::LimitExceeded(exceeded);
                self.limit_exceeded(&error, audit);
                turn.notices.push(error.user_message());
                return;
            }
        };

        let call = self.gateway.call_specialist(&request, audit).await;
        turn.counters = counters;

        match &call {
            SpecialistCall::Completed { outcome, .. } => self.audit_sink.emit(
                audit
                    .event("specialist.completed", AuditCategory::Specialist, AuditOutcome::Success)
                    .with_metadata("specialist", kind.as_str())
                    .with_metadata("outcome", format!("{outcome:?}")),
            ),
            SpecialistCall::Failed { error, .. } => self.audit_sink.emit(
                audit
                    .event("specialist.failed", AuditCategory::Specialist, AuditOutcome::Failed)
                    .with_metadata("specialist", kind.as_str())
                    .with_metadata("error", error.to_string()),
            ),
        }

        let proposed = specialist_transition(&turn.state, kind, call.outcome());
        self.transition(turn, proposed, audit);
        turn.entries.push(call.into_result());
    }

    fn build_request(
        &self,
        kind: SpecialistKind,
        packet: &IntakePacket,
        turn: &Turn,
    ) -> Result<SpecialistRequest, ProtocolError> {
        let limits = self.guard().limits();
        let requirements = &packet.intake.extracted_requirements;

        match kind {
            SpecialistKind::Product => {
                let inventory = &turn.inventory;
                Ok(SpecialistRequest::ProductRecommendations(ProductRequest {
                    customer_context: CustomerContext {
                        latest_user_input: packet.conversation.latest_user_input.clone(),
                        requirements: requirements.clone(),
                    },
                    product_context: ProductContext {
                        product_status: turn.state.product_status,
                        inventory_checked: turn.state.inventory_checked,
                        internal_match_found: inventory.has_match(),
                        internal_options_rejected: packet.intake.internal_options_rejected,
                        no_match_reason: inventory.no_match_reason.clone(),
                    },
                    current_state: turn.state.clone(),
                    max_recommendations: MAX_RECOMMENDATIONS,
                    iteration_limit: limits.cap(kind.category()),
                }))
            }
            SpecialistKind::Insurance => {
                let details = &packet.intake.product_details;
                let product_model = present(details.product_model.as_deref())
                    .ok_or_else(|| missing("intake.product_details.product_model"))?;
                let purchase_price = present(requirements.budget.as_deref())
                    .ok_or_else(|| missing("intake.extracted_requirements.budget"))?;

                Ok(SpecialistRequest::InsuranceQuote(InsuranceRequest {
                    manufacturer: MANUFACTURER.to_string(),
                    product_type: PRODUCT_TYPE.to_string(),
                    product_model,
                    key_features: details.key_features.clone(),
                    configuration_class: CONFIGURATION_CLASS.to_string(),
                    purchase_price,
                    iteration_limit: limits.cap(kind.category()),
                }))
            }
        }
    }

    /// Applies `proposed` atomically. On rejection the state stays as it
    /// was and a diagnostic entry is added.
    fn transition(&self, turn: &mut Turn, proposed: ConversationState, audit: &AuditContext) -> bool {
        match self.engine.apply_with_audit(&turn.state, &proposed, self.audit_sink.as_ref(), audit) {
            Ok(outcome) => {
                turn.state = outcome.to;
                true
            }
            Err(error) => {
                warn!(
                    event_name = "state.transition_rejected",
                    session_id = audit.session_id.as_deref().unwrap_or("unknown"),
                    correlation_id = %audit.correlation_id,
                    field = error.field(),
                    error = %error,
                    "proposed state rejected; keeping previous state"
                );
                turn.entries.push(SpecialistResult::system(
                    ProtocolError::from(error).user_message(),
                ));
                false
            }
        }
    }

    fn limit_exceeded(&self, error: &ProtocolError, audit: &AuditContext) {
        warn!(
            event_name = "guard.limit_exceeded",
            session_id = audit.session_id.as_deref().unwrap_or("unknown"),
            correlation_id = %audit.correlation_id,
            error = %error,
            "iteration limit reached"
        );
        self.audit_sink.emit(
            audit
                .event("guard.limit_exceeded", AuditCategory::Guard, AuditOutcome::Rejected)
                .with_metadata("error", error.to_string()),
        );
    }
}

struct Turn {
    state: ConversationState,
    counters: IterationCounters,
    inventory: InventorySnapshot,
    entries: Vec<SpecialistResult>,
    notices: Vec<String>,
    stopped_this_turn: bool,
}

impl Turn {
    fn new(state: ConversationState, counters: IterationCounters) -> Self {
        Self {
            state,
            counters,
            inventory: InventorySnapshot::default(),
            entries: Vec::new(),
            notices: Vec::new(),
            stopped_this_turn: false,
        }
    }
}

/// A fresh check in the packet wins; otherwise the carried facts hold for as
/// long as the state keeps `inventory_checked`.
fn effective_inventory(
    packet: &IntakePacket,
    carried: &InventorySnapshot,
    state: &ConversationState,
) -> InventorySnapshot {
    if packet.intake.inventory.checked {
        packet.intake.inventory.clone()
    } else if state.inventory_checked && carried.checked {
        carried.clone()
    } else {
        InventorySnapshot::default()
    }
}

/// State proposed by the intake side of a turn: the customer-facing agent's
/// reported state (or the current one), advanced by completed inventory
/// facts. Routing is always reset; only the router sets it.
pub fn intake_proposal(packet: &IntakePacket, current: &ConversationState) -> ConversationState {
    let mut proposed = packet.intake.proposed_state.clone().unwrap_or_else(|| current.clone());
    let inventory = &packet.intake.inventory;
    if inventory.checked && !proposed.overall_status.is_terminal() {
        proposed.inventory_checked = true;
        if proposed.overall_status == OverallStatus::Intake {
            proposed.overall_status = OverallStatus::InventoryCheck;
        }
        if proposed.product_status == ProductStatus::Collecting {
            proposed.product_status = ProductStatus::Searching;
        }
    }
    proposed.routing = Routing::None;
    proposed
}

/// State proposed after a specialist call. Routing records the attempted
/// specialist even when the call failed.
fn specialist_transition(
    state: &ConversationState,
    kind: SpecialistKind,
    outcome: Option<ReplyOutcome>,
) -> ConversationState {
    let mut next = state.clone();
    next.routing = kind.routing();
    next.iteration_count = state.iteration_count.saturating_add(1);

    let product_agreed = state.product_status == ProductStatus::Agreed;
    match outcome {
        Some(ReplyOutcome::Recommendations { count }) if count > 0 => {
            next.product_status = next.product_status.max(ProductStatus::Proposed);
            next.overall_status = next.overall_status.max(OverallStatus::ProductNegotiation);
        }
        Some(ReplyOutcome::InsuranceApproved) if product_agreed => {
            if next.insurance_status == InsuranceStatus::NotOffered {
                next.insurance_status = InsuranceStatus::Offered;
            }
            next.overall_status = next.overall_status.max(OverallStatus::InsurancePhase);
        }
        Some(ReplyOutcome::InsuranceDeclined) if product_agreed => {
            next.insurance_status = InsuranceStatus::Declined;
            next.overall_status = next.overall_status.max(OverallStatus::InsurancePhase);
        }
        Some(ReplyOutcome::InsuranceIncomplete) if product_agreed => {
            next.overall_status = next.overall_status.max(OverallStatus::InsurancePhase);
        }
        _ => {}
    }
    next
}

fn present(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

fn missing(field: &str) -> ProtocolError {
    ProtocolError::MissingRequiredField { field: field.to_string() }
}

fn customer_response(draft: Option<&str>, entries: &[SpecialistResult], notices: &[String]) -> String {
    let notice = notices.join(" ");
    if entries.is_empty() && !notice.is_empty() {
        let base = draft.map(crate::normalize::sanitize_customer_text).unwrap_or_default();
        return if base.is_empty() { notice } else { format!("{base} {notice}") };
    }

    let composed = compose_customer_response(draft, entries);
    if notice.is_empty() {
        composed
    } else {
        format!("{composed} {notice}")
    }
}
