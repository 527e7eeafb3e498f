use serde::{Deserialize, Serialize};

use crate::domain::packet::{InternalOption, InventorySnapshot, SCHEMA_VERSION};
use crate::domain::state::{ConversationState, Routing};

pub const SOURCE_AGENT: &str = "retail_orchestrator_agent";
pub const TARGET_AGENT: &str = "retail_agent";
pub const EXCHANGE_FORMAT: &str = "json";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultMessageType {
    #[default]
    #[serde(rename = "orchestrator_result")]
    OrchestratorResult,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentLabel {
    #[serde(rename = "FridgeBuddy (Liebherr Specialist)")]
    Product,
    #[serde(rename = "InsuranceBuddy (ERGO Specialist)")]
    Insurance,
    #[serde(rename = "System")]
    System,
}

impl AgentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "FridgeBuddy (Liebherr Specialist)",
            Self::Insurance => "InsuranceBuddy (ERGO Specialist)",
            Self::System => "System",
        }
    }

    pub fn css_class(&self) -> CssClass {
        match self {
            Self::Product => CssClass::ProductMessage,
            Self::Insurance => CssClass::InsuranceMessage,
            Self::System => CssClass::SystemMessage,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CssClass {
    ProductMessage,
    InsuranceMessage,
    SystemMessage,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Incomplete,
    Declined,
    Error,
}

/// One entry in `specialist_responses`. Build through the constructors so the
/// CSS class always matches the label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialistResult {
    pub agent: AgentLabel,
    #[serde(rename = "response")]
    pub display_text: String,
    pub css_class: CssClass,
    pub status: ResultStatus,
}

impl SpecialistResult {
    pub fn new(agent: AgentLabel, display_text: impl Into<String>, status: ResultStatus) -> Self {
        Self { agent, display_text: display_text.into(), css_class: agent.css_class(), status }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self::new(AgentLabel::System, message, ResultStatus::Error)
    }

    pub fn is_system(&self) -> bool {
        self.agent == AgentLabel::System
    }
}

/// Fallback for a completed check that found nothing and gave no reason.
pub const NO_MATCH_REASON: &str = "No matching model in our own inventory.";

/// Inventory facts echoed back to the UI. `internal_options` is empty unless
/// `checked` is set; `no_match_reason` is present exactly when a completed
/// check has no options.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryCheck {
    pub checked: bool,
    #[serde(default)]
    pub internal_options: Vec<InternalOption>,
    #[serde(default)]
    pub no_match_reason: Option<String>,
}

impl InventoryCheck {
    pub fn from_snapshot(snapshot: &InventorySnapshot, checked: bool) -> Self {
        if !checked {
            return Self::default();
        }
        if !snapshot.internal_options.is_empty() {
            return Self {
                checked: true,
                internal_options: snapshot.internal_options.clone(),
                no_match_reason: None,
            };
        }

        let reason = snapshot
            .no_match_reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or(NO_MATCH_REASON);
        Self { checked: true, internal_options: Vec::new(), no_match_reason: Some(reason.to_string()) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestratorResult {
    pub schema_version: String,
    pub message_type: ResultMessageType,
    pub source_agent: String,
    pub target_agent: String,
    pub exchange_format: String,
    pub state: ConversationState,
    pub routing: Routing,
    pub phase: u8,
    pub inventory_check: InventoryCheck,
    pub specialist_responses: Vec<SpecialistResult>,
    pub customer_response: String,
}

impl OrchestratorResult {
    pub fn new(
        state: ConversationState,
        inventory_check: InventoryCheck,
        specialist_responses: Vec<SpecialistResult>,
        customer_response: String,
    ) -> Self {
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            message_type: ResultMessageType::OrchestratorResult,
            source_agent: SOURCE_AGENT.to_string(),
            target_agent: TARGET_AGENT.to_string(),
            exchange_format: EXCHANGE_FORMAT.to_string(),
            routing: state.routing,
            phase: state.phase(),
            state,
            inventory_check,
            specialist_responses,
            customer_response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        AgentLabel, InventoryCheck, OrchestratorResult, ResultStatus, SpecialistResult,
        NO_MATCH_REASON,
    };
    use crate::domain::packet::{InternalOption, InventorySnapshot};
    use crate::domain::state::{
        ConversationState, InsuranceStatus, OverallStatus, ProductStatus, Routing,
    };

    #[test]
    fn entries_serialize_with_label_and_css_class() {
        let entry = SpecialistResult::new(AgentLabel::Product, "Top options: ...", ResultStatus::Ok);
        let value = serde_json::to_value(&entry).expect("serialize");

        assert_eq!(value["agent"], "FridgeBuddy (Liebherr Specialist)");
        assert_eq!(value["css_class"], "product-message");
        assert_eq!(value["response"], "Top options: ...");
        assert_eq!(value["status"], "ok");

        let system = serde_json::to_value(SpecialistResult::system("timed out")).expect("serialize");
        assert_eq!(system["agent"], "System");
        assert_eq!(system["css_class"], "system-message");
        assert_eq!(system["status"], "error");
    }

    #[test]
    fn unchecked_inventory_has_no_options() {
        let snapshot = InventorySnapshot {
            checked: true,
            internal_options: vec![InternalOption { name: "KB 4260".to_string(), ..Default::default() }],
            no_match_reason: None,
        };

        assert!(InventoryCheck::from_snapshot(&snapshot, false).internal_options.is_empty());
        assert_eq!(InventoryCheck::from_snapshot(&snapshot, true).internal_options.len(), 1);
    }

    #[test]
    fn reason_is_present_exactly_when_options_are_empty() {
        let sticky_flag_only = InventoryCheck::from_snapshot(&InventorySnapshot::default(), true);
        assert!(sticky_flag_only.internal_options.is_empty());
        assert_eq!(sticky_flag_only.no_match_reason.as_deref(), Some(NO_MATCH_REASON));

        let contradictory = InventorySnapshot {
            checked: true,
            internal_options: vec![InternalOption { name: "KB 4260".to_string(), ..Default::default() }],
            no_match_reason: Some("nothing in stock".to_string()),
        };
        let check = InventoryCheck::from_snapshot(&contradictory, true);
        assert_eq!(check.internal_options.len(), 1);
        assert!(check.no_match_reason.is_none());

        let explained = InventorySnapshot {
            checked: true,
            internal_options: Vec::new(),
            no_match_reason: Some("no built-in model under budget".to_string()),
        };
        assert_eq!(
            InventoryCheck::from_snapshot(&explained, true).no_match_reason.as_deref(),
            Some("no built-in model under budget")
        );
    }

    #[test]
    fn full_result_survives_a_json_round_trip() {
        let state = ConversationState {
            product_status: ProductStatus::Agreed,
            insurance_status: InsuranceStatus::Offered,
            overall_status: OverallStatus::InsurancePhase,
            routing: Routing::ErgoAgent,
            inventory_checked: true,
            ..ConversationState::default()
        };
        let inventory = InventorySnapshot {
            checked: true,
            internal_options: vec![
                InternalOption {
                    name: "KB 4260".to_string(),
                    model_number: Some("KB 4260-22".to_string()),
                    price: Some("1149 EUR".to_string()),
                    availability: Some("in stock".to_string()),
                },
                InternalOption { name: "CNsfd 5704".to_string(), ..Default::default() },
            ],
            no_match_reason: None,
        };
        let result = OrchestratorResult::new(
            state,
            InventoryCheck::from_snapshot(&inventory, true),
            vec![
                SpecialistResult::new(AgentLabel::Product, "Top options: KB 4260.", ResultStatus::Ok),
                SpecialistResult::new(AgentLabel::Insurance, "Insurance is available.", ResultStatus::Incomplete),
                SpecialistResult::system("The insurance specialist did not answer."),
            ],
            "Here is what our specialists found.".to_string(),
        );

        let raw = serde_json::to_string(&result).expect("serialize");
        let decoded: OrchestratorResult = serde_json::from_str(&raw).expect("deserialize");

        assert_eq!(decoded, result);
        assert_eq!(decoded.routing, Routing::ErgoAgent);
        assert_eq!(decoded.inventory_check.internal_options.len(), 2);
        let labels: Vec<AgentLabel> =
            decoded.specialist_responses.iter().map(|entry| entry.agent).collect();
        assert_eq!(labels, vec![AgentLabel::Product, AgentLabel::Insurance, AgentLabel::System]);
    }

    #[test]
    fn result_carries_envelope_fields() {
        let result = OrchestratorResult::new(
            ConversationState::default(),
            InventoryCheck::default(),
            Vec::new(),
            "Hello".to_string(),
        );
        let value = serde_json::to_value(&result).expect("serialize");

        assert_eq!(value["message_type"], "orchestrator_result");
        assert_eq!(value["source_agent"], "retail_orchestrator_agent");
        assert_eq!(value["target_agent"], "retail_agent");
        assert_eq!(value["exchange_format"], "json");
        assert_eq!(value["schema_version"], "1.0");
        assert_eq!(value["routing"], "none");
        assert_eq!(value["phase"], 1);
    }
}
