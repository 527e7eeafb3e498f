use buybuddy_core::domain::packet::InventorySnapshot;
use buybuddy_core::domain::specialist::SpecialistKind;
use buybuddy_core::errors::ProtocolError;
use buybuddy_core::{
    ConversationState, IterationCounters, IterationGuard, LimitExceeded, OverallStatus,
    ProductStatus, Routing,
};

/// Why a requested specialist route was turned into `none`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DowngradeReason {
    ConversationStopped,
    InventoryNotChecked,
    InternalOptionsAvailable,
    ProductNotAgreed,
    InsuranceSettled,
    LimitExceeded(LimitExceeded),
}

impl DowngradeReason {
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::ConversationStopped => "conversation_stopped",
            Self::InventoryNotChecked => "inventory_not_checked",
            Self::InternalOptionsAvailable => "internal_options_pending",
            Self::ProductNotAgreed => "product_not_agreed",
            Self::InsuranceSettled => "insurance_settled",
            Self::LimitExceeded(_) => "limit_exceeded",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::ConversationStopped => {
                "This conversation has ended. Please start a new one to continue.".to_string()
            }
            Self::InventoryNotChecked => {
                "I need to check our own inventory before involving the Liebherr specialist."
                    .to_string()
            }
            Self::InternalOptionsAvailable => {
                "Let us first go through the options we have in stock.".to_string()
            }
            Self::ProductNotAgreed => {
                "Insurance can be arranged once you have chosen a product.".to_string()
            }
            Self::InsuranceSettled => {
                "The insurance decision for this purchase has already been made.".to_string()
            }
            Self::LimitExceeded(exceeded) => {
                ProtocolError::LimitExceeded(exceeded.clone()).user_message()
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RoutingDecision {
    Route(SpecialistKind),
    NoRoute,
    Downgrade { requested: SpecialistKind, reason: DowngradeReason },
}

impl RoutingDecision {
    pub fn routing(&self) -> Routing {
        match self {
            Self::Route(kind) => kind.routing(),
            Self::NoRoute | Self::Downgrade { .. } => Routing::None,
        }
    }

    pub fn specialist(&self) -> Option<SpecialistKind> {
        match self {
            Self::Route(kind) => Some(*kind),
            Self::NoRoute | Self::Downgrade { .. } => None,
        }
    }
}

/// Internal options count as exhausted once the customer rejected them, or
/// once a completed inventory check found none. The options list decides;
/// `no_match_reason` only explains an empty one.
pub fn internal_options_exhausted(inventory: &InventorySnapshot, rejected: bool) -> bool {
    rejected || (inventory.checked && inventory.internal_options.is_empty())
}

/// Treats the routing hint as advisory and applies every gate before a
/// specialist may be called. Pure: the same inputs always give the same
/// decision.
#[derive(Clone, Copy, Debug, Default)]
pub struct Router {
    guard: IterationGuard,
}

impl Router {
    pub fn new(guard: IterationGuard) -> Self {
        Self { guard }
    }

    pub fn guard(&self) -> &IterationGuard {
        &self.guard
    }

    pub fn decide_routing(
        &self,
        state: &ConversationState,
        counters: &IterationCounters,
        hint: Routing,
        internal_options_exhausted: bool,
    ) -> RoutingDecision {
        let Some(requested) = SpecialistKind::from_routing(hint) else {
            return RoutingDecision::NoRoute;
        };

        let downgrade = |reason| RoutingDecision::Downgrade { requested, reason };

        if state.is_stopped() {
            return downgrade(DowngradeReason::ConversationStopped);
        }

        let category = requested.category();
        if self.guard.is_exhausted(counters, category) {
            return downgrade(DowngradeReason::LimitExceeded(LimitExceeded {
                category,
                limit: self.guard.limits().cap(category),
            }));
        }

        match requested {
            SpecialistKind::Product => {
                if !state.inventory_checked {
                    return downgrade(DowngradeReason::InventoryNotChecked);
                }
                if !internal_options_exhausted {
                    return downgrade(DowngradeReason::InternalOptionsAvailable);
                }
            }
            SpecialistKind::Insurance => {
                let entering_insurance = state.product_status == ProductStatus::Agreed
                    || state.overall_status == OverallStatus::InsurancePhase;
                if !entering_insurance {
                    return downgrade(DowngradeReason::ProductNotAgreed);
                }
                if state.insurance_status.is_terminal() {
                    return downgrade(DowngradeReason::InsuranceSettled);
                }
            }
        }

        RoutingDecision::Route(requested)
    }
}

#[cfg(test)]
mod tests {
    use buybuddy_core::domain::packet::{InternalOption, InventorySnapshot};
    use buybuddy_core::domain::specialist::SpecialistKind;
    use buybuddy_core::{
        ConversationState, InsuranceStatus, IterationCategory, IterationCounters, OverallStatus,
        ProductStatus, Routing,
    };
    use proptest::prelude::*;

    use super::{internal_options_exhausted, DowngradeReason, Router, RoutingDecision};

    fn searching_with_inventory() -> ConversationState {
        ConversationState {
            product_status: ProductStatus::Searching,
            overall_status: OverallStatus::InventoryCheck,
            inventory_checked: true,
            ..ConversationState::default()
        }
    }

    fn agreed_product() -> ConversationState {
        ConversationState {
            product_status: ProductStatus::Agreed,
            overall_status: OverallStatus::ProductNegotiation,
            inventory_checked: true,
            ..ConversationState::default()
        }
    }

    #[test]
    fn no_hint_means_no_route() {
        let decision = Router::default().decide_routing(
            &ConversationState::default(),
            &IterationCounters::default(),
            Routing::None,
            false,
        );
        assert_eq!(decision, RoutingDecision::NoRoute);
        assert_eq!(decision.routing(), Routing::None);
    }

    #[test]
    fn product_route_requires_inventory_check() {
        let decision = Router::default().decide_routing(
            &ConversationState::default(),
            &IterationCounters::default(),
            Routing::ProductAgent,
            true,
        );
        assert_eq!(
            decision,
            RoutingDecision::Downgrade {
                requested: SpecialistKind::Product,
                reason: DowngradeReason::InventoryNotChecked,
            }
        );
        assert_eq!(decision.routing(), Routing::None);
    }

    #[test]
    fn product_route_waits_for_internal_options() {
        let decision = Router::default().decide_routing(
            &searching_with_inventory(),
            &IterationCounters::default(),
            Routing::ProductAgent,
            false,
        );
        assert!(matches!(
            decision,
            RoutingDecision::Downgrade { reason: DowngradeReason::InternalOptionsAvailable, .. }
        ));
    }

    #[test]
    fn product_route_allowed_after_gates() {
        let decision = Router::default().decide_routing(
            &searching_with_inventory(),
            &IterationCounters::default(),
            Routing::ProductAgent,
            true,
        );
        assert_eq!(decision, RoutingDecision::Route(SpecialistKind::Product));
        assert_eq!(decision.routing(), Routing::ProductAgent);
    }

    #[test]
    fn insurance_before_agreement_is_blocked() {
        let decision = Router::default().decide_routing(
            &searching_with_inventory(),
            &IterationCounters::default(),
            Routing::ErgoAgent,
            true,
        );
        assert_eq!(
            decision,
            RoutingDecision::Downgrade {
                requested: SpecialistKind::Insurance,
                reason: DowngradeReason::ProductNotAgreed,
            }
        );
    }

    #[test]
    fn insurance_allowed_after_agreement() {
        let decision = Router::default().decide_routing(
            &agreed_product(),
            &IterationCounters::default(),
            Routing::ErgoAgent,
            false,
        );
        assert_eq!(decision, RoutingDecision::Route(SpecialistKind::Insurance));
    }

    #[test]
    fn settled_insurance_is_not_requested_again() {
        let state = ConversationState {
            insurance_status: InsuranceStatus::Declined,
            ..agreed_product()
        };
        let decision = Router::default().decide_routing(
            &state,
            &IterationCounters::default(),
            Routing::ErgoAgent,
            false,
        );
        assert!(matches!(
            decision,
            RoutingDecision::Downgrade { reason: DowngradeReason::InsuranceSettled, .. }
        ));
    }

    #[test]
    fn product_calls_at_cap_report_limit() {
        let counters = IterationCounters { product_agent_calls: 3, ..IterationCounters::default() };
        let decision = Router::default().decide_routing(
            &searching_with_inventory(),
            &counters,
            Routing::ProductAgent,
            true,
        );

        let RoutingDecision::Downgrade { reason: DowngradeReason::LimitExceeded(exceeded), .. } =
            &decision
        else {
            panic!("expected limit downgrade, got {decision:?}");
        };
        assert_eq!(exceeded.category, IterationCategory::ProductAgentCalls);
        assert_eq!(exceeded.limit, 3);
        assert_eq!(decision.routing(), Routing::None);
        assert_eq!(
            DowngradeReason::LimitExceeded(exceeded.clone()).reason_code(),
            "limit_exceeded"
        );
    }

    #[test]
    fn stopped_conversation_never_routes() {
        let state = ConversationState {
            overall_status: OverallStatus::Stopped,
            ..searching_with_inventory()
        };
        let decision = Router::default().decide_routing(
            &state,
            &IterationCounters::default(),
            Routing::ProductAgent,
            true,
        );
        assert!(matches!(
            decision,
            RoutingDecision::Downgrade { reason: DowngradeReason::ConversationStopped, .. }
        ));
    }

    #[test]
    fn exhausted_options_follow_inventory_outcome() {
        let unchecked = InventorySnapshot::default();
        assert!(!internal_options_exhausted(&unchecked, false));
        assert!(internal_options_exhausted(&unchecked, true));

        let empty = InventorySnapshot {
            checked: true,
            internal_options: Vec::new(),
            no_match_reason: Some("nothing in stock".to_string()),
        };
        assert!(internal_options_exhausted(&empty, false));

        let mut with_options = InventorySnapshot {
            checked: true,
            internal_options: vec![InternalOption {
                name: "KGN 39".to_string(),
                ..InternalOption::default()
            }],
            no_match_reason: None,
        };
        assert!(!internal_options_exhausted(&with_options, false));
        assert!(internal_options_exhausted(&with_options, true));

        with_options.no_match_reason = Some("stale reason".to_string());
        assert!(!internal_options_exhausted(&with_options, false));
    }

    fn any_state() -> impl Strategy<Value = ConversationState> {
        (
            prop::sample::select(ProductStatus::ALL.to_vec()),
            prop::sample::select(InsuranceStatus::ALL.to_vec()),
            prop::sample::select(OverallStatus::ALL.to_vec()),
            any::<bool>(),
        )
            .prop_map(|(product_status, insurance_status, overall_status, inventory_checked)| {
                ConversationState {
                    product_status,
                    insurance_status,
                    overall_status,
                    inventory_checked,
                    ..ConversationState::default()
                }
            })
    }

    proptest! {
        #[test]
        fn routed_product_calls_always_pass_the_gates(
            state in any_state(),
            calls in 0u32..6,
            exhausted in any::<bool>(),
            hint in prop::sample::select(Routing::ALL.to_vec()),
        ) {
            let counters = IterationCounters { product_agent_calls: calls, insurance_agent_calls: calls, ..IterationCounters::default() };
            let router = Router::default();
            let first = router.decide_routing(&state, &counters, hint, exhausted);
            let second = router.decide_routing(&state, &counters, hint, exhausted);
            prop_assert_eq!(&first, &second);

            match first {
                RoutingDecision::Route(SpecialistKind::Product) => {
                    prop_assert!(state.inventory_checked);
                    prop_assert!(exhausted);
                    prop_assert!(calls < 3);
                }
                RoutingDecision::Route(SpecialistKind::Insurance) => {
                    prop_assert!(calls < 3);
                    prop_assert!(!state.insurance_status.is_terminal());
                }
                _ => {}
            }
        }
    }
}
