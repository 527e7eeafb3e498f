//! Turns raw specialist replies into short customer-safe text.
//!
//! Replies arrive as fenced JSON, bare JSON, or prose. Structured replies are
//! decoded into the typed specialist responses and summarized; prose is passed
//! through with any state block removed. Nothing here ever copies a raw JSON
//! payload into customer-visible text.

use buybuddy_core::domain::result::{AgentLabel, ResultStatus, SpecialistResult};
use buybuddy_core::domain::specialist::{InsuranceResponse, ProductResponse, SpecialistKind};
use buybuddy_core::metadata::strip_state_block;
use serde_json::Value;
use thiserror::Error;

const MAX_SUMMARIZED_MODELS: usize = 2;
const MAX_SUMMARIZED_FEATURES: usize = 3;
const MAX_SUMMARIZED_COVERAGE: usize = 2;
const JSON_BLOB_MIN_LEN: usize = 250;
const NEUTRAL_CUSTOMER_RESPONSE: &str =
    "I reviewed your request and coordinated with our specialists.";
const CONSULTED_FALLBACK: &str =
    "I consulted our specialists and prepared an updated recommendation.";
const NO_DRAFT_RESPONSE: &str = "I have noted your request and will continue from here.";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SpecialistError {
    #[error("specialist returned an empty reply")]
    EmptyReply,
    #[error("specialist reply could not be decoded: {0}")]
    Malformed(String),
}

/// What a specialist reply means for the conversation state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyOutcome {
    Recommendations { count: usize },
    NoRecommendation,
    InsuranceApproved,
    InsuranceIncomplete,
    InsuranceDeclined,
    Prose,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NormalizedReply {
    pub display_text: String,
    pub status: ResultStatus,
    pub outcome: ReplyOutcome,
}

impl NormalizedReply {
    pub fn into_result(self, kind: SpecialistKind) -> SpecialistResult {
        SpecialistResult::new(kind.label(), self.display_text, self.status)
    }
}

pub fn normalize_reply(kind: SpecialistKind, raw: &str) -> Result<NormalizedReply, SpecialistError> {
    match kind {
        SpecialistKind::Product => normalize_product_reply(raw),
        SpecialistKind::Insurance => normalize_insurance_reply(raw),
    }
}

pub fn normalize_product_reply(raw: &str) -> Result<NormalizedReply, SpecialistError> {
    let Some(value) = structured_or_prose(raw)? else {
        return prose(raw);
    };

    let response = serde_json::from_value::<ProductResponse>(value)
        .map_err(|error| SpecialistError::Malformed(error.to_string()))?;
    let reason = response.narrative();

    let top_models = response
        .recommended_models
        .iter()
        .take(MAX_SUMMARIZED_MODELS)
        .map(|model| {
            let mut line = model.display_name().unwrap_or("Liebherr model").to_string();
            if let Some(price) = model.price() {
                line.push_str(&format!(" ({price})"));
            }
            let features = model
                .features
                .iter()
                .map(|feature| feature.trim())
                .filter(|feature| !feature.is_empty())
                .take(MAX_SUMMARIZED_FEATURES)
                .collect::<Vec<_>>();
            if !features.is_empty() {
                line.push_str(&format!(" - {}", features.join(", ")));
            }
            line
        })
        .collect::<Vec<_>>();

    if top_models.is_empty() {
        let display_text = match reason {
            Some(reason) => format!("I reviewed FridgeBuddy recommendations. {reason}"),
            None => "FridgeBuddy completed analysis, but no clear recommendation was returned."
                .to_string(),
        };
        return Ok(NormalizedReply {
            display_text,
            status: ResultStatus::Ok,
            outcome: ReplyOutcome::NoRecommendation,
        });
    }

    let mut display_text = format!("Top options: {}.", top_models.join("; "));
    if let Some(reason) = reason {
        display_text.push_str(&format!(" Why these: {reason}"));
    }

    Ok(NormalizedReply {
        display_text,
        status: ResultStatus::Ok,
        outcome: ReplyOutcome::Recommendations { count: response.recommended_models.len() },
    })
}

pub fn normalize_insurance_reply(raw: &str) -> Result<NormalizedReply, SpecialistError> {
    let Some(mut value) = structured_or_prose(raw)? else {
        return prose(raw);
    };

    if let Some(status) = value.get_mut("status") {
        if let Some(text) = status.as_str() {
            *status = Value::String(text.trim().to_ascii_lowercase());
        }
    }

    let response = serde_json::from_value::<InsuranceResponse>(value)
        .map_err(|error| SpecialistError::Malformed(error.to_string()))?;

    let normalized = match &response {
        InsuranceResponse::Incomplete { missing_fields } => {
            let missing = missing_fields
                .iter()
                .map(|field| field.trim())
                .filter(|field| !field.is_empty())
                .collect::<Vec<_>>();
            let missing_text =
                if missing.is_empty() { "some details".to_string() } else { missing.join(", ") };
            NormalizedReply {
                display_text: format!("InsuranceBuddy needs a few more details: {missing_text}."),
                status: ResultStatus::Incomplete,
                outcome: ReplyOutcome::InsuranceIncomplete,
            }
        }
        InsuranceResponse::Declined { .. } => {
            let display_text = match response.decline_reason() {
                Some(reason) => {
                    format!("Insurance is not available for this configuration. Reason: {reason}")
                }
                None => "Insurance is not available for this configuration.".to_string(),
            };
            NormalizedReply {
                display_text,
                status: ResultStatus::Declined,
                outcome: ReplyOutcome::InsuranceDeclined,
            }
        }
        InsuranceResponse::Approved { coverage_options, .. } => {
            let options = coverage_options
                .iter()
                .take(MAX_SUMMARIZED_COVERAGE)
                .map(|option| {
                    let mut text = option
                        .bundle_name
                        .as_deref()
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .unwrap_or("Coverage")
                        .to_string();
                    if let Some(monthly) = &option.monthly_premium {
                        text.push_str(&format!(" ({monthly}/month)"));
                    }
                    if let Some(duration) = option.duration.as_deref().map(str::trim) {
                        if !duration.is_empty() {
                            text.push_str(&format!(" for {duration}"));
                        }
                    }
                    text
                })
                .collect::<Vec<_>>();
            let display_text = if options.is_empty() {
                "Insurance is available.".to_string()
            } else {
                format!("Insurance is available: {}.", options.join("; "))
            };
            NormalizedReply {
                display_text,
                status: ResultStatus::Ok,
                outcome: ReplyOutcome::InsuranceApproved,
            }
        }
    };

    Ok(normalized)
}

/// `Ok(Some(..))` for a decodable JSON object, `Ok(None)` for prose, and an
/// error for empty replies or JSON-looking text that does not parse.
fn structured_or_prose(raw: &str) -> Result<Option<Value>, SpecialistError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SpecialistError::EmptyReply);
    }

    if let Some(value) = extract_json_object(trimmed) {
        return Ok(Some(value));
    }

    if looks_like_json_blob(trimmed, 180) {
        return Err(SpecialistError::Malformed("unparseable JSON payload".to_string()));
    }
    Ok(None)
}

fn prose(raw: &str) -> Result<NormalizedReply, SpecialistError> {
    let display_text = strip_state_block(raw);
    if display_text.is_empty() {
        return Err(SpecialistError::EmptyReply);
    }
    Ok(NormalizedReply { display_text, status: ResultStatus::Ok, outcome: ReplyOutcome::Prose })
}

/// Finds a JSON object in `text`: a fenced ```json block, the whole text, or
/// the span from the first `{` to the last `}`.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let mut candidate = text.trim();

    let lower = candidate.to_ascii_lowercase();
    if let Some(start) = lower.find("```json") {
        let body_start = start + "```json".len();
        if let Some(end) = candidate[body_start..].find("```") {
            candidate = candidate[body_start..body_start + end].trim();
        }
    }

    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(candidate) {
        return Some(value);
    }

    let first = candidate.find('{')?;
    let last = candidate.rfind('}')?;
    if last <= first {
        return None;
    }
    match serde_json::from_str::<Value>(&candidate[first..=last]) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn looks_like_json_blob(text: &str, min_len: usize) -> bool {
    text.contains("recommended_models")
        || text.contains("coverage_options")
        || (text.contains('{') && text.contains('}') && text.len() > min_len)
}

/// Cleans a customer-visible draft: drops the state block and a trailing
/// counter, and replaces any embedded payload dump.
pub fn sanitize_customer_text(text: &str) -> String {
    let message = strip_state_block(text);
    let message = strip_trailing_number(&message);
    if message.is_empty() {
        return String::new();
    }

    if looks_like_json_blob(message, JSON_BLOB_MIN_LEN) {
        let prefix = message.split("Product update:").next().unwrap_or_default().trim();
        if !prefix.is_empty() && !looks_like_json_blob(prefix, JSON_BLOB_MIN_LEN) {
            return prefix.to_string();
        }
        return NEUTRAL_CUSTOMER_RESPONSE.to_string();
    }

    message.to_string()
}

fn strip_trailing_number(text: &str) -> &str {
    let trimmed = text.trim_end();
    let without_digits = trimmed.trim_end_matches(|c: char| c.is_ascii_digit());
    if without_digits.len() == trimmed.len() {
        return trimmed.trim();
    }
    if without_digits.ends_with(char::is_whitespace) {
        without_digits.trim()
    } else {
        trimmed.trim()
    }
}

/// Builds the final customer text. Specialist entries are summarized with a
/// prefix naming the specialist; System entries are already customer-safe and
/// are used verbatim.
pub fn compose_customer_response(draft: Option<&str>, entries: &[SpecialistResult]) -> String {
    if entries.is_empty() {
        let base = draft.map(sanitize_customer_text).unwrap_or_default();
        return if base.is_empty() { NO_DRAFT_RESPONSE.to_string() } else { base };
    }

    let parts = entries
        .iter()
        .filter(|entry| !entry.display_text.trim().is_empty())
        .map(|entry| {
            let text = entry.display_text.trim();
            match entry.agent {
                AgentLabel::Product => format!("Product update: {text}"),
                AgentLabel::Insurance => format!("Insurance update: {text}"),
                AgentLabel::System => text.to_string(),
            }
        })
        .collect::<Vec<_>>();

    if parts.is_empty() {
        CONSULTED_FALLBACK.to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use buybuddy_core::domain::result::{AgentLabel, ResultStatus, SpecialistResult};
    use buybuddy_core::domain::specialist::SpecialistKind;

    use super::{
        compose_customer_response, extract_json_object, normalize_insurance_reply,
        normalize_product_reply, normalize_reply, sanitize_customer_text, ReplyOutcome,
        SpecialistError,
    };

    const PRODUCT_REPLY: &str = r#"Here you go:
```json
{"recommended_models": [
  {"model_name": "CNsfd 5704", "base_price": 1299, "features": ["NoFrost", "BioFresh", "SmartDevice", "IceMaker"]},
  {"model_name": "CBNd 5723", "base_price": "1499 EUR", "features": []},
  {"model_name": "KGN 39", "base_price": 999}
 ],
 "narrative_summary": "Both fit a 60cm niche."}
```"#;

    #[test]
    fn product_summary_lists_top_two_models() {
        let reply = normalize_product_reply(PRODUCT_REPLY).expect("decodes");

        assert_eq!(
            reply.display_text,
            "Top options: CNsfd 5704 (1299) - NoFrost, BioFresh, SmartDevice; CBNd 5723 (1499 EUR). Why these: Both fit a 60cm niche."
        );
        assert_eq!(reply.outcome, ReplyOutcome::Recommendations { count: 3 });
        assert!(!reply.display_text.contains("recommended_models"));
    }

    #[test]
    fn product_without_models_uses_reason() {
        let reply =
            normalize_product_reply(r#"{"recommended_models": [], "reasoning": "Nothing fits 400 EUR."}"#)
                .expect("decodes");
        assert_eq!(reply.display_text, "I reviewed FridgeBuddy recommendations. Nothing fits 400 EUR.");
        assert_eq!(reply.outcome, ReplyOutcome::NoRecommendation);
    }

    #[test]
    fn prose_passes_through_without_state_block() {
        let reply = normalize_product_reply("The CNsfd 5704 is a strong choice.\n---\nROUTING: none\n---")
            .expect("prose");
        assert_eq!(reply.display_text, "The CNsfd 5704 is a strong choice.");
        assert_eq!(reply.outcome, ReplyOutcome::Prose);
    }

    #[test]
    fn empty_and_broken_payloads_are_errors() {
        assert_eq!(normalize_product_reply("   "), Err(SpecialistError::EmptyReply));

        let broken = format!("{{\"recommended_models\": [{{\"model_name\": \"X\"{}", " ".repeat(200));
        assert!(matches!(normalize_product_reply(&broken), Err(SpecialistError::Malformed(_))));
    }

    #[test]
    fn insurance_statuses_are_summarized() {
        let approved = normalize_insurance_reply(
            r#"{"status": "APPROVED", "coverage_options": [
                {"bundle_name": "Protect Plus", "monthly_premium": 4.99, "duration": "24 months"},
                {"bundle_name": "Basic", "monthly_premium": "2.50 EUR"},
                {"bundle_name": "Ignored"}
            ]}"#,
        )
        .expect("approved");
        assert_eq!(
            approved.display_text,
            "Insurance is available: Protect Plus (4.99/month) for 24 months; Basic (2.50 EUR/month)."
        );
        assert_eq!(approved.outcome, ReplyOutcome::InsuranceApproved);

        let incomplete = normalize_insurance_reply(
            r#"{"status": "incomplete", "missing_fields": ["purchase_price", "product_model"]}"#,
        )
        .expect("incomplete");
        assert_eq!(
            incomplete.display_text,
            "InsuranceBuddy needs a few more details: purchase_price, product_model."
        );
        assert_eq!(incomplete.status, ResultStatus::Incomplete);

        let declined = normalize_insurance_reply(
            r#"{"status": "declined", "risk_assessment": {"justification": "Commercial kitchen use"}}"#,
        )
        .expect("declined");
        assert_eq!(
            declined.display_text,
            "Insurance is not available for this configuration. Reason: Commercial kitchen use"
        );
        assert_eq!(declined.status, ResultStatus::Declined);
    }

    #[test]
    fn unknown_insurance_status_is_malformed() {
        let error = normalize_reply(SpecialistKind::Insurance, r#"{"status": "pending"}"#)
            .expect_err("unknown status");
        assert!(matches!(error, SpecialistError::Malformed(_)));
    }

    #[test]
    fn json_extraction_handles_fences_and_surrounding_text() {
        assert!(extract_json_object("```JSON\n{\"a\": 1}\n```").is_some());
        assert!(extract_json_object("Result: {\"a\": {\"b\": 2}} done").is_some());
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("no braces here").is_none());
    }

    #[test]
    fn sanitize_strips_trailing_counter_and_payloads() {
        assert_eq!(sanitize_customer_text("Here are your options 2"), "Here are your options");
        assert_eq!(sanitize_customer_text("Model KGN39"), "Model KGN39");

        let dump = "Let me check. Product update: {\"recommended_models\": []}";
        assert_eq!(sanitize_customer_text(dump), "Let me check.");

        let only_dump = format!("{{\"coverage_options\": [{}]}}", "1,".repeat(10));
        assert_eq!(
            sanitize_customer_text(&only_dump),
            "I reviewed your request and coordinated with our specialists."
        );
    }

    #[test]
    fn composed_response_names_each_specialist() {
        let entries = vec![
            SpecialistResult::new(AgentLabel::Product, "Top options: A.", ResultStatus::Ok),
            SpecialistResult::system("The insurance specialist is currently unavailable."),
        ];

        assert_eq!(
            compose_customer_response(Some("draft"), &entries),
            "Product update: Top options: A. The insurance specialist is currently unavailable."
        );
        assert_eq!(compose_customer_response(Some("Hello 3"), &[]), "Hello");
        assert_eq!(
            compose_customer_response(None, &[]),
            "I have noted your request and will continue from here."
        );
    }
}
