use serde::{Deserialize, Serialize};

use crate::domain::state::ConversationState;

/// An accepted transition. `from == to` is a valid no-op transition.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
}

impl TransitionOutcome {
    pub fn changed_fields(&self) -> Vec<&'static str> {
        let (from, to) = (&self.from, &self.to);
        let mut fields = Vec::new();
        if from.product_status != to.product_status {
            fields.push("product_status");
        }
        if from.insurance_status != to.insurance_status {
            fields.push("insurance_status");
        }
        if from.overall_status != to.overall_status {
            fields.push("overall_status");
        }
        if from.routing != to.routing {
            fields.push("routing");
        }
        if from.inventory_checked != to.inventory_checked {
            fields.push("inventory_checked");
        }
        if from.iteration_count != to.iteration_count {
            fields.push("iteration_count");
        }
        fields
    }

    pub fn is_noop(&self) -> bool {
        self.from == self.to
    }
}

#[cfg(test)]
mod tests {
    use super::TransitionOutcome;
    use crate::domain::state::{ConversationState, OverallStatus};

    #[test]
    fn changed_fields_lists_only_differences() {
        let from = ConversationState::default();
        let to = ConversationState {
            overall_status: OverallStatus::InventoryCheck,
            inventory_checked: true,
            ..from.clone()
        };

        let outcome = TransitionOutcome { from, to };
        assert_eq!(outcome.changed_fields(), vec!["overall_status", "inventory_checked"]);
        assert!(!outcome.is_noop());
    }
}
