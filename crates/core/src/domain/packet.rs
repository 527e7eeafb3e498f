use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::domain::counters::IterationCounters;
use crate::domain::state::{ConversationState, InsuranceStatus, OverallStatus, ProductStatus, Routing};

pub const SCHEMA_VERSION: &str = "1.0";

/// Discriminator for the inbound packet; any other `message_type` is rejected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntakeMessageType {
    #[default]
    #[serde(rename = "customer_intake_packet")]
    CustomerIntakePacket,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    User,
    Assistant,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: HistoryRole,
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: HistoryRole::User, sender: "Customer".to_string(), content: content.into() }
    }

    pub fn assistant(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self { role: HistoryRole::Assistant, sender: sender.into(), content: content.into() }
    }
}

/// Requirements found in the conversation. Fields stay `None` (or empty)
/// unless the text states them unambiguously.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedRequirements {
    #[serde(default)]
    pub budget: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub usage: Option<String>,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(default)]
    pub constraints: BTreeSet<String>,
}

impl ExtractedRequirements {
    /// Enough context to brief the product specialist: a budget, a region or
    /// at least one feature. Usage alone does not count.
    pub fn has_product_context(&self) -> bool {
        self.budget.is_some() || self.region.is_some() || !self.features.is_empty()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalOption {
    pub name: String,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub availability: Option<String>,
}

/// Outcome of the internal catalog lookup done by the customer-facing layer.
/// A checked snapshot carries either options or a `no_match_reason`, never
/// both and never neither.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySnapshot {
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub internal_options: Vec<InternalOption>,
    #[serde(default)]
    pub no_match_reason: Option<String>,
}

impl InventorySnapshot {
    pub fn has_match(&self) -> bool {
        self.checked && !self.internal_options.is_empty()
    }

    fn check_consistency(&self) -> Result<(), PacketError> {
        let has_options = !self.internal_options.is_empty();
        let has_reason =
            self.no_match_reason.as_deref().is_some_and(|reason| !reason.trim().is_empty());

        if !self.checked {
            if has_options || self.no_match_reason.is_some() {
                return Err(PacketError::Malformed(
                    "intake.inventory reports results without `checked`".to_string(),
                ));
            }
            return Ok(());
        }
        if has_options && self.no_match_reason.is_some() {
            return Err(PacketError::Malformed(
                "intake.inventory has both internal_options and no_match_reason".to_string(),
            ));
        }
        if !has_options && !has_reason {
            return Err(PacketError::MissingRequiredField {
                field: "intake.inventory.no_match_reason".to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetails {
    #[serde(default)]
    pub product_model: Option<String>,
    #[serde(default)]
    pub key_features: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub latest_user_input: String,
    #[serde(default)]
    pub recent_history: Vec<HistoryEntry>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intake {
    #[serde(default)]
    pub extracted_requirements: ExtractedRequirements,
    #[serde(default)]
    pub customer_visible_draft: Option<String>,
    #[serde(default)]
    pub proposed_state: Option<ConversationState>,
    #[serde(default)]
    pub inventory: InventorySnapshot,
    #[serde(default)]
    pub internal_options_rejected: bool,
    #[serde(default)]
    pub product_details: ProductDetails,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingContext {
    pub state: ConversationState,
    pub routing_hint: Routing,
    #[serde(default)]
    pub iteration_counts: IterationCounters,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakePacket {
    pub schema_version: String,
    pub message_type: IntakeMessageType,
    pub conversation: Conversation,
    #[serde(default)]
    pub intake: Intake,
    pub routing_context: RoutingContext,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PacketError {
    #[error("missing required field `{field}`")]
    MissingRequiredField { field: String },
    #[error("unknown value `{value}` for `{field}`")]
    UnknownStateValue { field: String, value: String },
    #[error("malformed packet: {0}")]
    Malformed(String),
}

const REQUIRED_FIELDS: &[&str] = &[
    "schema_version",
    "message_type",
    "conversation",
    "conversation.latest_user_input",
    "routing_context",
    "routing_context.state",
    "routing_context.routing_hint",
];

impl IntakePacket {
    pub fn from_json(raw: &str) -> Result<Self, PacketError> {
        let value = serde_json::from_str::<Value>(raw)
            .map_err(|error| PacketError::Malformed(error.to_string()))?;
        Self::from_value(value)
    }

    /// Decodes a packet after checking mandatory fields and enum values, so
    /// failures carry the offending field instead of a generic decode error.
    pub fn from_value(value: Value) -> Result<Self, PacketError> {
        if !value.is_object() {
            return Err(PacketError::Malformed("packet must be a JSON object".to_string()));
        }

        for field in REQUIRED_FIELDS {
            match lookup(&value, field) {
                None | Some(Value::Null) => {
                    return Err(PacketError::MissingRequiredField { field: (*field).to_string() })
                }
                Some(_) => {}
            }
        }

        check_state_object(lookup(&value, "routing_context.state"), "routing_context.state")?;
        check_state_object(lookup(&value, "intake.proposed_state"), "intake.proposed_state")?;
        check_enum_field::<Routing>(&value, "routing_context.routing_hint")?;

        let packet = serde_json::from_value::<Self>(value)
            .map_err(|error| PacketError::Malformed(error.to_string()))?;
        packet.validate()?;
        Ok(packet)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn validate(&self) -> Result<(), PacketError> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(PacketError::Malformed(format!(
                "unsupported schema_version `{}` (expected {SCHEMA_VERSION})",
                self.schema_version
            )));
        }
        if self.conversation.latest_user_input.trim().is_empty() {
            return Err(PacketError::MissingRequiredField {
                field: "conversation.latest_user_input".to_string(),
            });
        }
        self.intake.inventory.check_consistency()
    }

    pub fn state(&self) -> &ConversationState {
        &self.routing_context.state
    }

    pub fn counters(&self) -> &IterationCounters {
        &self.routing_context.iteration_counts
    }

    pub fn routing_hint(&self) -> Routing {
        self.routing_context.routing_hint
    }
}

fn lookup<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |current, key| current.get(key))
}

fn check_state_object(state: Option<&Value>, prefix: &str) -> Result<(), PacketError> {
    let Some(state) = state.filter(|state| !state.is_null()) else {
        return Ok(());
    };

    check_enum_field::<ProductStatus>(state, "product_status").map_err(|e| prefixed(e, prefix))?;
    check_enum_field::<InsuranceStatus>(state, "insurance_status")
        .map_err(|e| prefixed(e, prefix))?;
    check_enum_field::<OverallStatus>(state, "overall_status").map_err(|e| prefixed(e, prefix))?;
    check_enum_field::<Routing>(state, "routing").map_err(|e| prefixed(e, prefix))?;
    Ok(())
}

fn check_enum_field<T>(value: &Value, path: &str) -> Result<(), PacketError>
where
    T: std::str::FromStr,
{
    match lookup(value, path) {
        Some(Value::String(raw)) if raw.parse::<T>().is_err() => {
            Err(PacketError::UnknownStateValue { field: path.to_string(), value: raw.clone() })
        }
        None | Some(Value::Null) => {
            Err(PacketError::MissingRequiredField { field: path.to_string() })
        }
        _ => Ok(()),
    }
}

fn prefixed(error: PacketError, prefix: &str) -> PacketError {
    match error {
        PacketError::MissingRequiredField { field } => {
            PacketError::MissingRequiredField { field: format!("{prefix}.{field}") }
        }
        PacketError::UnknownStateValue { field, value } => {
            PacketError::UnknownStateValue { field: format!("{prefix}.{field}"), value }
        }
        other => other,
    }
}
