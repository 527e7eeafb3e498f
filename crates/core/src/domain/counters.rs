use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationCategory {
    CustomerClarifications,
    ProductAgentCalls,
    InsuranceAgentCalls,
}

impl IterationCategory {
    pub const ALL: [Self; 3] =
        [Self::CustomerClarifications, Self::ProductAgentCalls, Self::InsuranceAgentCalls];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CustomerClarifications => "customer_clarifications",
            Self::ProductAgentCalls => "product_agent_calls",
            Self::InsuranceAgentCalls => "insurance_agent_calls",
        }
    }
}

impl fmt::Display for IterationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session usage counts. Values only grow, and never past the configured
/// [`IterationLimits`]; see [`crate::iteration::IterationGuard`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IterationCounters {
    #[serde(default)]
    pub customer_clarifications: u32,
    #[serde(default)]
    pub product_agent_calls: u32,
    #[serde(default)]
    pub insurance_agent_calls: u32,
}

impl IterationCounters {
    pub fn get(&self, category: IterationCategory) -> u32 {
        match category {
            IterationCategory::CustomerClarifications => self.customer_clarifications,
            IterationCategory::ProductAgentCalls => self.product_agent_calls,
            IterationCategory::InsuranceAgentCalls => self.insurance_agent_calls,
        }
    }

    pub(crate) fn slot_mut(&mut self, category: IterationCategory) -> &mut u32 {
        match category {
            IterationCategory::CustomerClarifications => &mut self.customer_clarifications,
            IterationCategory::ProductAgentCalls => &mut self.product_agent_calls,
            IterationCategory::InsuranceAgentCalls => &mut self.insurance_agent_calls,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationLimits {
    pub customer_clarifications: u32,
    pub product_agent_calls: u32,
    pub insurance_agent_calls: u32,
}

impl Default for IterationLimits {
    fn default() -> Self {
        Self { customer_clarifications: 5, product_agent_calls: 3, insurance_agent_calls: 3 }
    }
}

impl IterationLimits {
    pub fn cap(&self, category: IterationCategory) -> u32 {
        match category {
            IterationCategory::CustomerClarifications => self.customer_clarifications,
            IterationCategory::ProductAgentCalls => self.product_agent_calls,
            IterationCategory::InsuranceAgentCalls => self.insurance_agent_calls,
        }
    }
}
