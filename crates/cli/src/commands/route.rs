use std::fs;
use std::path::Path;

use buybuddy_agent::{
    infer_routing_hint, intake_proposal, internal_options_exhausted, Router, RoutingDecision,
};
use buybuddy_core::config::{AppConfig, LoadOptions};
use buybuddy_core::flows::validate_state;
use buybuddy_core::{
    ConversationState, IntakePacket, IterationCategory, IterationGuard, IterationLimits,
    ProtocolError, Routing, StateEngine,
};
use serde::Serialize;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
pub struct RouteReport {
    pub command: &'static str,
    pub status: &'static str,
    pub transition: TransitionReport,
    pub state: ConversationState,
    pub decision: DecisionReport,
    pub clarifications_remaining: u32,
}

#[derive(Debug, Serialize)]
pub struct TransitionReport {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DecisionReport {
    pub routing: Routing,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub specialist: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub fn run(packet_path: &Path) -> CommandResult {
    run_with(packet_path, LoadOptions::default())
}

/// Offline dry run of one packet: parse, apply the intake proposal and decide
/// routing. Never contacts a specialist and never changes any counter.
pub fn run_with(packet_path: &Path, options: LoadOptions) -> CommandResult {
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "route",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let raw = match fs::read_to_string(packet_path) {
        Ok(raw) => raw,
        Err(error) => {
            return CommandResult::failure(
                "route",
                "input_read",
                format!("could not read `{}`: {error}", packet_path.display()),
                3,
            );
        }
    };

    let packet = match IntakePacket::from_json(&raw) {
        Ok(packet) => packet,
        Err(error) => {
            let error = ProtocolError::from(error);
            return CommandResult::failure("route", error.reason_code(), error.to_string(), 3);
        }
    };

    let report = match dry_run(&packet, config.limits.iteration_limits()) {
        Ok(report) => report,
        Err(error) => {
            return CommandResult::failure("route", error.reason_code(), error.to_string(), 3);
        }
    };

    match serde_json::to_string_pretty(&report) {
        Ok(output) => CommandResult::output(output),
        Err(error) => CommandResult::failure("route", "serialization", error.to_string(), 3),
    }
}

pub fn dry_run(packet: &IntakePacket, limits: IterationLimits) -> Result<RouteReport, ProtocolError> {
    let guard = IterationGuard::new(limits);
    let prior = packet.state();
    let counters = packet.counters();
    validate_state(prior)?;
    guard.check(counters)?;

    let engine: StateEngine = StateEngine::default();
    let (state, transition) = match engine.apply_transition(prior, &intake_proposal(packet, prior)) {
        Ok(next) => (next, TransitionReport { accepted: true, error: None }),
        Err(error) => {
            (prior.clone(), TransitionReport { accepted: false, error: Some(error.to_string()) })
        }
    };

    let exhausted = internal_options_exhausted(
        &packet.intake.inventory,
        packet.intake.internal_options_rejected,
    );
    let hint = match packet.routing_hint() {
        Routing::None => infer_routing_hint(
            &packet.conversation.latest_user_input,
            packet.intake.customer_visible_draft.as_deref(),
            &state,
            &packet.intake.extracted_requirements,
        ),
        hint => hint,
    };
    let decision = Router::new(guard).decide_routing(&state, counters, hint, exhausted);
    let decision = match decision {
        RoutingDecision::Route(kind) => DecisionReport {
            routing: kind.routing(),
            specialist: Some(kind.to_string()),
            reason_code: None,
            message: None,
        },
        RoutingDecision::NoRoute => {
            DecisionReport { routing: Routing::None, specialist: None, reason_code: None, message: None }
        }
        RoutingDecision::Downgrade { requested, reason } => DecisionReport {
            routing: Routing::None,
            specialist: Some(requested.to_string()),
            reason_code: Some(reason.reason_code()),
            message: Some(reason.user_message()),
        },
    };

    Ok(RouteReport {
        command: "route",
        status: "ok",
        transition,
        state,
        decision,
        clarifications_remaining: guard
            .remaining(counters, IterationCategory::CustomerClarifications),
    })
}
