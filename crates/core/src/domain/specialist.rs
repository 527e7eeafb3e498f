use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::counters::IterationCategory;
use crate::domain::packet::ExtractedRequirements;
use crate::domain::result::AgentLabel;
use crate::domain::state::{ConversationState, ProductStatus, Routing};

pub const MANUFACTURER: &str = "Liebherr";
pub const PRODUCT_TYPE: &str = "Refrigerator";
pub const CONFIGURATION_CLASS: &str = "Standard";
pub const MAX_RECOMMENDATIONS: u32 = 3;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialistKind {
    Product,
    Insurance,
}

impl SpecialistKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Product => "product",
            Self::Insurance => "insurance",
        }
    }

    pub fn category(&self) -> IterationCategory {
        match self {
            Self::Product => IterationCategory::ProductAgentCalls,
            Self::Insurance => IterationCategory::InsuranceAgentCalls,
        }
    }

    pub fn routing(&self) -> Routing {
        match self {
            Self::Product => Routing::ProductAgent,
            Self::Insurance => Routing::ErgoAgent,
        }
    }

    pub fn label(&self) -> AgentLabel {
        match self {
            Self::Product => AgentLabel::Product,
            Self::Insurance => AgentLabel::Insurance,
        }
    }

    pub fn from_routing(routing: Routing) -> Option<Self> {
        match routing {
            Routing::ProductAgent => Some(Self::Product),
            Routing::ErgoAgent => Some(Self::Insurance),
            Routing::None => None,
        }
    }
}

impl fmt::Display for SpecialistKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound specialist request, tagged by `requested_action`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "requested_action")]
pub enum SpecialistRequest {
    #[serde(rename = "provide_liebherr_recommendations")]
    ProductRecommendations(ProductRequest),
    #[serde(rename = "provide_insurance_quote")]
    InsuranceQuote(InsuranceRequest),
}

impl SpecialistRequest {
    pub fn kind(&self) -> SpecialistKind {
        match self {
            Self::ProductRecommendations(_) => SpecialistKind::Product,
            Self::InsuranceQuote(_) => SpecialistKind::Insurance,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRequest {
    pub customer_context: CustomerContext,
    pub product_context: ProductContext,
    pub current_state: ConversationState,
    pub max_recommendations: u32,
    pub iteration_limit: u32,
}

/// What the customer asked for, as far as it is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerContext {
    pub latest_user_input: String,
    pub requirements: ExtractedRequirements,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductContext {
    pub product_status: ProductStatus,
    pub inventory_checked: bool,
    pub internal_match_found: bool,
    pub internal_options_rejected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub no_match_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceRequest {
    pub manufacturer: String,
    pub product_type: String,
    pub product_model: String,
    pub key_features: Vec<String>,
    pub configuration_class: String,
    pub purchase_price: String,
    pub iteration_limit: u32,
}

/// A number or free-text amount as specialists report prices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Amount {
    Number(f64),
    Text(String),
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) if value.fract() == 0.0 => write!(f, "{value:.0}"),
            Self::Number(value) => write!(f, "{value:.2}"),
            Self::Text(value) => f.write_str(value.trim()),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendedModel {
    #[serde(default)]
    pub model_name: Option<String>,
    #[serde(default)]
    pub model_number: Option<String>,
    #[serde(default)]
    pub key_specs: Option<Value>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub base_price: Option<Amount>,
    #[serde(default)]
    pub price_range: Option<Amount>,
    #[serde(default)]
    pub availability: Option<String>,
}

impl RecommendedModel {
    pub fn display_name(&self) -> Option<&str> {
        self.model_name
            .as_deref()
            .or(self.model_number.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    pub fn price(&self) -> Option<&Amount> {
        self.base_price.as_ref().or(self.price_range.as_ref())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductResponse {
    #[serde(default)]
    pub recommended_models: Vec<RecommendedModel>,
    #[serde(default)]
    pub pricing: Option<Value>,
    #[serde(default)]
    pub lead_times: Option<Value>,
    #[serde(default)]
    pub narrative_summary: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl ProductResponse {
    /// First non-empty explanation the specialist gave.
    pub fn narrative(&self) -> Option<&str> {
        [&self.narrative_summary, &self.reasoning, &self.summary, &self.notes]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .map(str::trim)
            .find(|text| !text.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub justification: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageOption {
    #[serde(default)]
    pub bundle_name: Option<String>,
    #[serde(default)]
    pub monthly_premium: Option<Amount>,
    #[serde(default)]
    pub duration: Option<String>,
}

/// Insurance specialist reply, tagged by lowercase `status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InsuranceResponse {
    Approved {
        #[serde(default)]
        risk_assessment: Option<RiskAssessment>,
        #[serde(default)]
        coverage_options: Vec<CoverageOption>,
        #[serde(default)]
        calculation_breakdown: Option<Value>,
        #[serde(default)]
        recommendations: Option<String>,
        #[serde(default)]
        next_steps: Option<String>,
    },
    Incomplete {
        #[serde(default)]
        missing_fields: Vec<String>,
    },
    Declined {
        #[serde(default)]
        risk_assessment: Option<RiskAssessment>,
        #[serde(default)]
        justification: Option<String>,
    },
}

impl InsuranceResponse {
    pub fn decline_reason(&self) -> Option<&str> {
        let Self::Declined { risk_assessment, justification } = self else {
            return None;
        };
        justification
            .as_deref()
            .or_else(|| risk_assessment.as_ref().and_then(|risk| risk.justification.as_deref()))
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{
        Amount, InsuranceRequest, InsuranceResponse, ProductResponse, SpecialistKind,
        SpecialistRequest,
    };
    use crate::domain::state::Routing;

    #[test]
    fn request_is_tagged_by_requested_action() {
        let request = SpecialistRequest::InsuranceQuote(InsuranceRequest {
            manufacturer: "Liebherr".to_string(),
            product_type: "Refrigerator".to_string(),
            product_model: "CNsfd 5704".to_string(),
            key_features: vec!["nofrost".to_string()],
            configuration_class: "Standard".to_string(),
            purchase_price: "1299 EUR".to_string(),
            iteration_limit: 3,
        });

        let value = request.to_value().expect("serialize");
        assert_eq!(value["requested_action"], "provide_insurance_quote");
        assert_eq!(value["product_model"], "CNsfd 5704");
        assert_eq!(request.kind(), SpecialistKind::Insurance);
    }

    #[test]
    fn product_response_tolerates_numeric_and_text_prices() {
        let response: ProductResponse = serde_json::from_value(json!({
            "recommended_models": [
                {"model_name": "CNsfd 5704", "base_price": 1299, "features": ["NoFrost"]},
                {"model_number": "ICBNd 5163", "price_range": "1400-1500 EUR"}
            ],
            "reasoning": "Both fit a 60cm niche."
        }))
        .expect("decode");

        assert_eq!(response.recommended_models[0].price().map(ToString::to_string).as_deref(), Some("1299"));
        assert_eq!(response.recommended_models[1].display_name(), Some("ICBNd 5163"));
        assert_eq!(
            response.recommended_models[1].price(),
            Some(&Amount::Text("1400-1500 EUR".to_string()))
        );
        assert_eq!(response.narrative(), Some("Both fit a 60cm niche."));
    }

    #[test]
    fn insurance_response_is_tagged_by_status() {
        let declined: InsuranceResponse = serde_json::from_value(json!({
            "status": "declined",
            "risk_assessment": {"risk_level": "high", "justification": "Commercial use"}
        }))
        .expect("decode");
        assert_eq!(declined.decline_reason(), Some("Commercial use"));

        let incomplete: InsuranceResponse =
            serde_json::from_value(json!({"status": "incomplete", "missing_fields": ["purchase_price"]}))
                .expect("decode");
        assert!(matches!(incomplete, InsuranceResponse::Incomplete { ref missing_fields } if missing_fields.len() == 1));

        assert!(serde_json::from_value::<InsuranceResponse>(json!({"status": "pending"})).is_err());
    }

    #[test]
    fn kinds_map_to_routing_and_back() {
        for kind in [SpecialistKind::Product, SpecialistKind::Insurance] {
            assert_eq!(SpecialistKind::from_routing(kind.routing()), Some(kind));
        }
        assert_eq!(SpecialistKind::from_routing(Routing::None), None);
    }
}
