//! Orchestration runtime for the retail assistant.
//!
//! A turn flows through the crate in one direction:
//! 1. **Intake** (`intake`) - conversation history and the customer-facing
//!    reply become a structured `IntakePacket`.
//! 2. **Routing** (`router`) - the routing hint is checked against the
//!    inventory gate, the insurance gate and the iteration caps.
//! 3. **Specialist call** (`gateway`, `client`) - at most one specialist is
//!    consulted, bounded by a timeout and a retry budget.
//! 4. **Normalization** (`normalize`) - raw specialist text becomes a
//!    labelled entry and a customer-safe response.
//!
//! `orchestrator` ties these together for one packet; `runtime` adds the
//! per-session store and the stale-snapshot check.
//!
//! Specialists never decide state on their own. Every state change goes
//! through the transition engine in `buybuddy-core`.

pub mod client;
pub mod gateway;
pub mod intake;
pub mod normalize;
pub mod orchestrator;
pub mod router;
pub mod runtime;
pub mod session;

pub use client::{HttpSpecialistClient, ScriptedSpecialistClient, SpecialistClient, TransportError};
pub use gateway::{RetryPolicy, SpecialistCall, SpecialistGateway};
pub use intake::{infer_routing_hint, IntakeBuilder, RequirementExtractor};
pub use normalize::{compose_customer_response, normalize_reply, ReplyOutcome, SpecialistError};
pub use orchestrator::{
    check_inventory_gate, intake_proposal, GateViolation, Orchestrator, TurnOutcome,
};
pub use router::{internal_options_exhausted, DowngradeReason, Router, RoutingDecision};
pub use runtime::AgentRuntime;
pub use session::{Session, SessionId, SessionStore};
