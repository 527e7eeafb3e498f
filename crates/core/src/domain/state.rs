use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::flows::TransitionError;

/// Declares a closed, snake_case wire enum with `as_str`, `FromStr` and a
/// serde representation that rejects values outside the declared set.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];
            pub const FIELD: &'static str = $field;

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire),+
                }
            }
        }

        impl FromStr for $name {
            type Err = TransitionError;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(TransitionError::UnknownStateValue {
                        field: $field,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = TransitionError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Progress of the product selection, in lifecycle order.
    ProductStatus, "product_status" {
        Collecting => "collecting",
        Searching => "searching",
        Proposed => "proposed",
        Agreed => "agreed",
    }
}

wire_enum! {
    InsuranceStatus, "insurance_status" {
        NotOffered => "not_offered",
        Offered => "offered",
        Agreed => "agreed",
        Declined => "declined",
    }
}

wire_enum! {
    /// Session-level phase. `Stopped` is a side terminal reachable from any
    /// non-terminal phase.
    OverallStatus, "overall_status" {
        Intake => "intake",
        InventoryCheck => "inventory_check",
        ProductNegotiation => "product_negotiation",
        InsurancePhase => "insurance_phase",
        ReadyToCheckout => "ready_to_checkout",
        Stopped => "stopped",
    }
}

wire_enum! {
    Routing, "routing" {
        None => "none",
        ProductAgent => "product_agent",
        ErgoAgent => "ergo_agent",
    }
}

impl OverallStatus {
    /// UI progress phase (1..=5).
    pub fn phase(&self) -> u8 {
        match self {
            Self::Intake => 1,
            Self::InventoryCheck => 2,
            Self::ProductNegotiation => 3,
            Self::InsurancePhase => 4,
            Self::ReadyToCheckout | Self::Stopped => 5,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ReadyToCheckout | Self::Stopped)
    }
}

impl InsuranceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Agreed | Self::Declined)
    }
}

impl Routing {
    pub fn is_specialist(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl Default for Routing {
    fn default() -> Self {
        Self::None
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationState {
    pub product_status: ProductStatus,
    pub insurance_status: InsuranceStatus,
    pub overall_status: OverallStatus,
    pub routing: Routing,
    pub inventory_checked: bool,
    pub iteration_count: u32,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            product_status: ProductStatus::Collecting,
            insurance_status: InsuranceStatus::NotOffered,
            overall_status: OverallStatus::Intake,
            routing: Routing::None,
            inventory_checked: false,
            iteration_count: 0,
        }
    }
}

impl ConversationState {
    pub fn phase(&self) -> u8 {
        self.overall_status.phase()
    }

    pub fn is_stopped(&self) -> bool {
        self.overall_status == OverallStatus::Stopped
    }
}
