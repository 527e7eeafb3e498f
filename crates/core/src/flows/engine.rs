use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::domain::state::{ConversationState, InsuranceStatus, OverallStatus, ProductStatus, Routing};
use crate::flows::states::TransitionOutcome;

pub trait LifecycleDefinition {
    fn initial_state(&self) -> ConversationState;
    fn transition(
        &self,
        current: &ConversationState,
        proposed: &ConversationState,
    ) -> Result<TransitionOutcome, TransitionError>;
}

/// Retail purchase lifecycle: product selection first, then the insurance
/// add-on, then checkout.
#[derive(Clone, Debug, Default)]
pub struct RetailLifecycle;

impl LifecycleDefinition for RetailLifecycle {
    fn initial_state(&self) -> ConversationState {
        ConversationState::default()
    }

    fn transition(
        &self,
        current: &ConversationState,
        proposed: &ConversationState,
    ) -> Result<TransitionOutcome, TransitionError> {
        check_iteration_count(current, proposed)?;
        check_overall_status(current.overall_status, proposed.overall_status)?;
        check_product_status(current.product_status, proposed.product_status)?;
        check_insurance_status(current.insurance_status, proposed.insurance_status)?;
        if current.inventory_checked && !proposed.inventory_checked {
            return Err(TransitionError::InvalidTransition {
                field: "inventory_checked",
                from: "true".to_string(),
                to: "false".to_string(),
                reason: "inventory check cannot be undone",
            });
        }
        validate_state(proposed)?;

        Ok(TransitionOutcome { from: current.clone(), to: proposed.clone() })
    }
}

pub struct StateEngine<L = RetailLifecycle> {
    lifecycle: L,
}

impl<L> StateEngine<L>
where
    L: LifecycleDefinition,
{
    pub fn new(lifecycle: L) -> Self {
        Self { lifecycle }
    }

    pub fn initial_state(&self) -> ConversationState {
        self.lifecycle.initial_state()
    }

    /// Validates `proposed` against `current` as one unit. Either the whole
    /// proposal is accepted or nothing changes.
    pub fn apply_transition(
        &self,
        current: &ConversationState,
        proposed: &ConversationState,
    ) -> Result<ConversationState, TransitionError> {
        self.lifecycle.transition(current, proposed).map(|outcome| outcome.to)
    }

    pub fn apply(
        &self,
        current: &ConversationState,
        proposed: &ConversationState,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.lifecycle.transition(current, proposed)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &ConversationState,
        proposed: &ConversationState,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, TransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, proposed);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .event(
                            "state.transition_applied",
                            AuditCategory::State,
                            AuditOutcome::Success,
                        )
                        .with_metadata("from", outcome.from.overall_status.as_str())
                        .with_metadata("to", outcome.to.overall_status.as_str())
                        .with_metadata("changed", outcome.changed_fields().join(",")),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .event(
                            "state.transition_rejected",
                            AuditCategory::State,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for StateEngine<RetailLifecycle> {
    fn default() -> Self {
        Self::new(RetailLifecycle)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid transition of `{field}` from `{from}` to `{to}`: {reason}")]
    InvalidTransition { field: &'static str, from: String, to: String, reason: &'static str },
    #[error("state invariant violated on `{field}`: {reason}")]
    InvariantViolated { field: &'static str, reason: &'static str },
    #[error("unknown value `{value}` for `{field}`")]
    UnknownStateValue { field: &'static str, value: String },
}

impl TransitionError {
    pub fn field(&self) -> &'static str {
        match self {
            Self::InvalidTransition { field, .. }
            | Self::InvariantViolated { field, .. }
            | Self::UnknownStateValue { field, .. } => field,
        }
    }
}

/// Cross-field invariants every persisted state must satisfy.
pub fn validate_state(state: &ConversationState) -> Result<(), TransitionError> {
    if state.insurance_status != InsuranceStatus::NotOffered
        && state.product_status != ProductStatus::Agreed
    {
        return Err(TransitionError::InvariantViolated {
            field: "insurance_status",
            reason: "insurance requires an agreed product",
        });
    }
    if state.overall_status == OverallStatus::ReadyToCheckout
        && state.product_status != ProductStatus::Agreed
    {
        return Err(TransitionError::InvariantViolated {
            field: "overall_status",
            reason: "checkout requires an agreed product",
        });
    }
    if state.routing == Routing::ProductAgent && !state.inventory_checked {
        return Err(TransitionError::InvariantViolated {
            field: "routing",
            reason: "product specialist requires a completed inventory check",
        });
    }
    Ok(())
}

fn check_iteration_count(
    current: &ConversationState,
    proposed: &ConversationState,
) -> Result<(), TransitionError> {
    if proposed.iteration_count < current.iteration_count {
        return Err(TransitionError::InvalidTransition {
            field: "iteration_count",
            from: current.iteration_count.to_string(),
            to: proposed.iteration_count.to_string(),
            reason: "iteration count cannot decrease",
        });
    }
    Ok(())
}

fn check_overall_status(from: OverallStatus, to: OverallStatus) -> Result<(), TransitionError> {
    if from == to {
        return Ok(());
    }
    let reason = if from.is_terminal() {
        "terminal status cannot change"
    } else if to == OverallStatus::Stopped || to > from {
        return Ok(());
    } else {
        "overall status only moves forward"
    };
    Err(TransitionError::InvalidTransition {
        field: OverallStatus::FIELD,
        from: from.to_string(),
        to: to.to_string(),
        reason,
    })
}

fn check_product_status(from: ProductStatus, to: ProductStatus) -> Result<(), TransitionError> {
    // A rejected proposal sends the search back out; nothing else regresses.
    if to >= from || (from == ProductStatus::Proposed && to == ProductStatus::Searching) {
        return Ok(());
    }
    Err(TransitionError::InvalidTransition {
        field: ProductStatus::FIELD,
        from: from.to_string(),
        to: to.to_string(),
        reason: "product status cannot regress",
    })
}

fn check_insurance_status(from: InsuranceStatus, to: InsuranceStatus) -> Result<(), TransitionError> {
    use InsuranceStatus::{Agreed, Declined, NotOffered, Offered};

    let allowed = from == to
        || matches!(
            (from, to),
            (NotOffered, Offered) | (NotOffered, Declined) | (Offered, Agreed) | (Offered, Declined)
        );
    if allowed {
        return Ok(());
    }
    Err(TransitionError::InvalidTransition {
        field: InsuranceStatus::FIELD,
        from: from.to_string(),
        to: to.to_string(),
        reason: if from.is_terminal() {
            "insurance decision is final"
        } else {
            "insurance status transition not allowed"
        },
    })
}
