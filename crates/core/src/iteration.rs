use thiserror::Error;

use crate::domain::counters::{IterationCategory, IterationCounters, IterationLimits};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("iteration limit reached for {category}: {limit}")]
pub struct LimitExceeded {
    pub category: IterationCategory,
    pub limit: u32,
}

/// Enforces the per-session caps. Counters are never mutated in place; an
/// increment yields a new value for the caller to commit.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct IterationGuard {
    limits: IterationLimits,
}

impl IterationGuard {
    pub fn new(limits: IterationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &IterationLimits {
        &self.limits
    }

    pub fn try_increment(
        &self,
        counters: &IterationCounters,
        category: IterationCategory,
    ) -> Result<IterationCounters, LimitExceeded> {
        let limit = self.limits.cap(category);
        if counters.get(category) >= limit {
            return Err(LimitExceeded { category, limit });
        }

        let mut next = *counters;
        *next.slot_mut(category) += 1;
        Ok(next)
    }

    pub fn remaining(&self, counters: &IterationCounters, category: IterationCategory) -> u32 {
        self.limits.cap(category).saturating_sub(counters.get(category))
    }

    pub fn is_exhausted(&self, counters: &IterationCounters, category: IterationCategory) -> bool {
        self.remaining(counters, category) == 0
    }

    /// Rejects a snapshot that already sits past a cap.
    pub fn check(&self, counters: &IterationCounters) -> Result<(), LimitExceeded> {
        for category in IterationCategory::ALL {
            let limit = self.limits.cap(category);
            if counters.get(category) > limit {
                return Err(LimitExceeded { category, limit });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{IterationGuard, LimitExceeded};
    use crate::domain::counters::{IterationCategory, IterationCounters, IterationLimits};

    #[test]
    fn increments_until_cap_then_refuses() {
        let guard = IterationGuard::default();
        let mut counters = IterationCounters::default();

        for _ in 0..3 {
            counters = guard
                .try_increment(&counters, IterationCategory::ProductAgentCalls)
                .expect("under cap");
        }
        assert_eq!(counters.product_agent_calls, 3);

        let error = guard
            .try_increment(&counters, IterationCategory::ProductAgentCalls)
            .expect_err("cap reached");
        assert_eq!(
            error,
            LimitExceeded { category: IterationCategory::ProductAgentCalls, limit: 3 }
        );
        assert_eq!(counters.product_agent_calls, 3);
    }

    #[test]
    fn categories_are_independent() {
        let guard = IterationGuard::default();
        let counters = IterationCounters { insurance_agent_calls: 3, ..Default::default() };

        assert!(guard.is_exhausted(&counters, IterationCategory::InsuranceAgentCalls));
        let next = guard
            .try_increment(&counters, IterationCategory::CustomerClarifications)
            .expect("clarifications still available");
        assert_eq!(next.customer_clarifications, 1);
        assert_eq!(next.insurance_agent_calls, 3);
        assert_eq!(guard.remaining(&next, IterationCategory::CustomerClarifications), 4);
    }

    #[test]
    fn check_flags_snapshots_past_a_cap() {
        let guard = IterationGuard::new(IterationLimits {
            customer_clarifications: 2,
            ..Default::default()
        });
        let counters = IterationCounters { customer_clarifications: 3, ..Default::default() };

        assert!(guard.check(&counters).is_err());
        assert!(guard.check(&IterationCounters::default()).is_ok());
    }

    fn category() -> impl Strategy<Value = IterationCategory> {
        proptest::sample::select(IterationCategory::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn counters_never_exceed_limits(
            caps in (1u32..6, 1u32..6, 1u32..6),
            sequence in proptest::collection::vec(category(), 0..40),
        ) {
            let guard = IterationGuard::new(IterationLimits {
                customer_clarifications: caps.0,
                product_agent_calls: caps.1,
                insurance_agent_calls: caps.2,
            });
            let mut counters = IterationCounters::default();

            for category in sequence {
                let before = counters;
                match guard.try_increment(&counters, category) {
                    Ok(next) => {
                        prop_assert_eq!(next.get(category), before.get(category) + 1);
                        counters = next;
                    }
                    Err(error) => {
                        prop_assert_eq!(error.category, category);
                        prop_assert_eq!(before.get(category), guard.limits().cap(category));
                    }
                }
                for category in IterationCategory::ALL {
                    prop_assert!(counters.get(category) <= guard.limits().cap(category));
                }
            }
        }
    }
}
