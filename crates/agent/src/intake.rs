use std::collections::BTreeSet;

use buybuddy_core::domain::packet::{
    Conversation, ExtractedRequirements, HistoryEntry, HistoryRole, Intake, IntakeMessageType,
    IntakePacket, InventorySnapshot, PacketError, ProductDetails, RoutingContext, SCHEMA_VERSION,
};
use buybuddy_core::flows::TransitionError;
use buybuddy_core::metadata::{parse_state_block_over, strip_state_block};
use buybuddy_core::{ConversationState, IterationCounters, OverallStatus, ProductStatus, Routing};
use serde_json::Value;

use crate::normalize::extract_json_object;

const REQUIREMENT_WINDOW: usize = 5;
const PRODUCT_WINDOW: usize = 12;
const HISTORY_WINDOW: usize = 10;

const REGIONS: [&str; 5] = ["germany", "france", "austria", "switzerland", "europe"];

/// Canonical feature name and the phrases that mention it, matched against
/// text where hyphens read as spaces.
const REQUIREMENT_FEATURES: [(&str, &[&str]); 6] = [
    ("ice maker", &["ice maker", "icemaker"]),
    ("water dispenser", &["water dispenser"]),
    ("french door", &["french door"]),
    ("energy efficient", &["energy efficient"]),
    ("smart", &[" smart "]),
    ("built-in", &["built in", "integrated"]),
];

const PRODUCT_FEATURES: [(&str, &[&str]); 9] = [
    ("ice maker", &["ice maker", "icemaker"]),
    ("water dispenser", &["water dispenser"]),
    ("french door", &["french door"]),
    ("energy efficient", &["energy efficient", " a+++ "]),
    ("no frost", &["no frost", "nofrost"]),
    ("biofresh", &["biofresh"]),
    ("smart", &[" smart ", "smartdevice"]),
    ("built-in", &["built in"]),
    ("freezer", &["freezer"]),
];

const USAGES: [(&str, &[&str]); 4] = [
    ("family", &["family", "kids", "household of"]),
    ("apartment", &["apartment", "small kitchen", " flat "]),
    ("secondary", &["garage", "basement", "second fridge"]),
    ("commercial", &["restaurant", "commercial", "office kitchen"]),
];

const BUDGET_CAP_WORDS: [&str; 6] = ["under", "below", "max", "maximum", "up to", "at most"];

const PRODUCT_REQUEST_TERMS: [&str; 6] = [
    "fridgebuddy",
    "product_agent",
    "product agent",
    "liebherr specialist",
    "refer to product",
    "refer to fridgebuddy",
];
const INSURANCE_REQUEST_TERMS: [&str; 4] =
    ["insurancebuddy", "ergo", "insurance offer", "insurance quote"];

/// Mentions in the customer-facing draft that announce a specialist hand-off.
const DRAFT_PRODUCT_TERMS: [&str; 4] =
    ["liebherr", "fridgebuddy", "product specialist", "external catalog"];
const DRAFT_INSURANCE_TERMS: [&str; 3] = ["ergo", "insurancebuddy", "insurance offer"];

const REJECTION_PHRASES: [&str; 8] = [
    "none of these",
    "none of them",
    "more options",
    "other options",
    "something else",
    "not interested in these",
    "don't like these",
    "dont like these",
];

const MODEL_STOPWORDS: [&str; 5] = ["from", "with", "this", "that", "model"];

/// Best-effort requirement extraction over the customer's own recent turns.
/// A value that cannot be read unambiguously stays `None`.
#[derive(Clone, Debug, Default)]
pub struct RequirementExtractor;

impl RequirementExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn extract(&self, history: &[HistoryEntry]) -> ExtractedRequirements {
        let user_texts = recent_user_texts(history, REQUIREMENT_WINDOW);
        if user_texts.is_empty() {
            return ExtractedRequirements::default();
        }

        let budget = latest_unambiguous(&user_texts, |text| budgets_in(&tokenize(text)));
        let region = latest_unambiguous(&user_texts, |text| {
            let tokens = tokenize(text);
            REGIONS
                .iter()
                .filter(|region| tokens.iter().any(|token| token == *region))
                .map(|region| title_case(region))
                .collect()
        });
        let usage = latest_unambiguous(&user_texts, |text| {
            let padded = phrase_text(text);
            matching_names(&padded, &USAGES)
        });

        let combined = user_texts.iter().map(|text| phrase_text(text)).collect::<Vec<_>>().join(" ");
        let features = matching_names(&combined, &REQUIREMENT_FEATURES).into_iter().collect();

        let mut constraints = BTreeSet::new();
        if budget.is_some() && BUDGET_CAP_WORDS.iter().any(|word| combined.contains(&format!(" {word} "))) {
            constraints.insert("budget_cap".to_string());
        }
        let tokens = tokenize(&combined);
        for window in tokens.windows(2) {
            if let [marker, excluded] = window {
                if marker == "without" && excluded.chars().all(|c| c.is_ascii_alphabetic()) {
                    constraints.insert(format!("without:{excluded}"));
                }
            }
        }

        ExtractedRequirements { budget, region, usage, features, constraints }
    }
}

/// Finds the product under discussion and its features in recent turns of
/// any role, including earlier specialist recommendations.
pub fn extract_product_details(
    history: &[HistoryEntry],
    requirements: &ExtractedRequirements,
) -> ProductDetails {
    let start = history.len().saturating_sub(PRODUCT_WINDOW);
    let recent = &history[start..];

    let mut product_model = None;
    let mut key_features = Vec::new();

    for entry in recent.iter().rev() {
        if let Some(json) = extract_json_object(&entry.content) {
            let (model, features) = recommendation_from_json(&json);
            if product_model.is_none() {
                product_model = model;
            }
            key_features.extend(features);
        }
        if product_model.is_none() {
            product_model = model_in_text(&entry.content);
        }
    }

    let combined = recent.iter().map(|entry| phrase_text(&entry.content)).collect::<Vec<_>>().join(" ");
    key_features.extend(matching_names(&combined, &PRODUCT_FEATURES));

    if key_features.is_empty() {
        key_features.extend(requirements.features.iter().cloned());
    }

    let mut seen = BTreeSet::new();
    let key_features = key_features
        .into_iter()
        .map(|feature| feature.trim().to_lowercase())
        .filter(|feature| !feature.is_empty() && seen.insert(feature.clone()))
        .collect();

    ProductDetails { product_model, key_features }
}

/// Routing hint for a turn whose customer-facing agent named no specialist.
///
/// An explicit product request from the customer always counts. Otherwise a
/// draft announcing the product specialist counts once the search is under
/// way and there is enough context to brief it. Insurance is only inferred
/// for an agreed product, from either the customer's words or the draft.
pub fn infer_routing_hint(
    latest_user_input: &str,
    draft: Option<&str>,
    state: &ConversationState,
    requirements: &ExtractedRequirements,
) -> Routing {
    let user_text = latest_user_input.to_lowercase();
    if PRODUCT_REQUEST_TERMS.iter().any(|term| user_text.contains(term)) {
        return Routing::ProductAgent;
    }

    let draft_text = draft.unwrap_or_default().to_lowercase();
    let search_under_way = state.overall_status != OverallStatus::Intake
        && matches!(state.product_status, ProductStatus::Searching | ProductStatus::Proposed);
    if search_under_way
        && requirements.has_product_context()
        && DRAFT_PRODUCT_TERMS.iter().any(|term| mentions(&draft_text, term))
    {
        return Routing::ProductAgent;
    }

    if state.product_status == ProductStatus::Agreed
        && (INSURANCE_REQUEST_TERMS.iter().any(|term| mentions(&user_text, term))
            || DRAFT_INSURANCE_TERMS.iter().any(|term| mentions(&draft_text, term)))
    {
        return Routing::ErgoAgent;
    }

    Routing::None
}

/// Phrases match as substrings, single words as whole tokens, so `ergo`
/// does not fire on `ergonomic`.
fn mentions(lowercase_text: &str, term: &str) -> bool {
    if term.contains(' ') {
        lowercase_text.contains(term)
    } else {
        tokenize(lowercase_text).iter().any(|token| token == term)
    }
}

pub fn rejects_internal_options(history: &[HistoryEntry]) -> bool {
    recent_user_texts(history, REQUIREMENT_WINDOW).iter().any(|text| {
        let lower = text.to_lowercase();
        REJECTION_PHRASES.iter().any(|phrase| lower.contains(phrase))
    })
}

/// Assembles the per-turn intake packet from the conversation and the
/// customer-facing agent's latest reply.
#[derive(Clone, Debug, Default)]
pub struct IntakeBuilder {
    extractor: RequirementExtractor,
    agent_reply: Option<String>,
    inventory: InventorySnapshot,
}

impl IntakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent_reply(mut self, reply: impl Into<String>) -> Self {
        self.agent_reply = Some(reply.into());
        self
    }

    pub fn with_inventory(mut self, inventory: InventorySnapshot) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn build_packet(
        &self,
        history: &[HistoryEntry],
        current_state: &ConversationState,
        counters: &IterationCounters,
        routing_hint: Routing,
    ) -> Result<IntakePacket, PacketError> {
        let latest_user_input = history
            .iter()
            .rev()
            .find(|entry| entry.role == HistoryRole::User)
            .map(|entry| entry.content.trim())
            .filter(|content| !content.is_empty())
            .ok_or_else(|| PacketError::MissingRequiredField {
                field: "conversation.latest_user_input".to_string(),
            })?
            .to_string();

        let (proposed_state, customer_visible_draft) = match self.agent_reply.as_deref() {
            Some(reply) => {
                let proposed =
                    parse_state_block_over(reply, current_state).map_err(proposed_state_error)?;
                let draft = strip_state_block(reply);
                (proposed, Some(draft).filter(|draft| !draft.is_empty()))
            }
            None => (None, None),
        };

        let extracted_requirements = self.extractor.extract(history);
        let routing_hint = match routing_hint {
            Routing::None => infer_routing_hint(
                &latest_user_input,
                customer_visible_draft.as_deref(),
                proposed_state.as_ref().unwrap_or(current_state),
                &extracted_requirements,
            ),
            hint => hint,
        };
        let product_details = extract_product_details(history, &extracted_requirements);
        let start = history.len().saturating_sub(HISTORY_WINDOW);

        let packet = IntakePacket {
            schema_version: SCHEMA_VERSION.to_string(),
            message_type: IntakeMessageType::CustomerIntakePacket,
            conversation: Conversation {
                latest_user_input,
                recent_history: history[start..].to_vec(),
            },
            intake: Intake {
                extracted_requirements,
                customer_visible_draft,
                proposed_state,
                inventory: self.inventory.clone(),
                internal_options_rejected: rejects_internal_options(history),
                product_details,
            },
            routing_context: RoutingContext {
                state: current_state.clone(),
                routing_hint,
                iteration_counts: *counters,
            },
        };
        packet.validate()?;
        Ok(packet)
    }
}

fn proposed_state_error(error: TransitionError) -> PacketError {
    match error {
        TransitionError::UnknownStateValue { field, value } => PacketError::UnknownStateValue {
            field: format!("intake.proposed_state.{field}"),
            value,
        },
        other => PacketError::Malformed(other.to_string()),
    }
}

fn recent_user_texts(history: &[HistoryEntry], window: usize) -> Vec<&str> {
    let start = history.len().saturating_sub(window);
    history[start..]
        .iter()
        .filter(|entry| entry.role == HistoryRole::User)
        .map(|entry| entry.content.as_str())
        .collect()
}

/// Walks texts newest first and returns the value from the first text that
/// mentions exactly one; a text naming several distinct values is ambiguous.
fn latest_unambiguous<F>(texts: &[&str], find: F) -> Option<String>
where
    F: Fn(&str) -> Vec<String>,
{
    for text in texts.iter().rev() {
        let found = find(text).into_iter().collect::<BTreeSet<_>>();
        match found.len() {
            0 => continue,
            1 => return found.into_iter().next(),
            _ => return None,
        }
    }
    None
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(|token| {
            token
                .trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | ';' | ':' | '(' | ')' | '"' | '\''))
                .to_string()
        })
        .filter(|token| !token.is_empty())
        .collect()
}

/// Lowercased, hyphens as spaces, padded so single words can be matched
/// with surrounding spaces.
fn phrase_text(text: &str) -> String {
    let cleaned = text
        .to_lowercase()
        .chars()
        .map(|c| match c {
            '-' | ',' | '.' | '!' | '?' | ';' | ':' | '(' | ')' => ' ',
            c if c.is_whitespace() => ' ',
            c => c,
        })
        .collect::<String>();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn matching_names(text: &str, table: &[(&str, &[&str])]) -> Vec<String> {
    table
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|phrase| text.contains(phrase)))
        .map(|(name, _)| (*name).to_string())
        .collect()
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn currency_code(token: &str) -> Option<&'static str> {
    match token {
        "eur" | "euro" | "euros" | "€" => Some("EUR"),
        "usd" | "dollar" | "dollars" | "$" => Some("USD"),
        _ => None,
    }
}

/// Plain digits, comma thousands groups (`1,200`) or a decimal point
/// (`999.99`). Mixed separators (`1.299,00`) and commas that do not split
/// off groups of three (`1,5`) are ambiguous and yield nothing.
fn parse_amount(token: &str) -> Option<String> {
    if !token.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    if !token.chars().all(|c| c.is_ascii_digit() || c == ',' || c == '.') {
        return None;
    }
    if token.contains(',') && token.contains('.') {
        return None;
    }

    let amount = if token.contains(',') {
        let mut groups = token.split(',');
        let leading = groups.next()?;
        if leading.len() > 3 || !groups.all(|group| group.len() == 3) {
            return None;
        }
        token.replace(',', "")
    } else {
        token.to_string()
    };
    amount.parse::<f64>().ok().map(|_| amount)
}

/// Amounts with an attached or adjacent currency: `1200 eur`, `€ 1200`,
/// `1,200€`, `$999`.
fn budgets_in(tokens: &[String]) -> Vec<String> {
    let mut budgets = Vec::new();

    for (index, token) in tokens.iter().enumerate() {
        if let Some(amount) = parse_amount(token) {
            let next = tokens.get(index + 1).and_then(|next| currency_code(next));
            let previous = index
                .checked_sub(1)
                .and_then(|previous| tokens.get(previous))
                .and_then(|previous| currency_code(previous));
            if let Some(code) = next.or(previous) {
                budgets.push(format!("{amount} {code}"));
            }
            continue;
        }

        let attached = if let Some(rest) = token.strip_prefix('€').or_else(|| token.strip_prefix('$')) {
            let symbol = &token[..token.len() - rest.len()];
            parse_amount(rest).zip(currency_code(symbol))
        } else {
            let split = token
                .char_indices()
                .find(|(_, c)| !(c.is_ascii_digit() || *c == ',' || *c == '.'))
                .map(|(index, _)| index)
                .unwrap_or(token.len());
            let (number, suffix) = token.split_at(split);
            parse_amount(number).zip(currency_code(suffix))
        };
        if let Some((amount, code)) = attached {
            budgets.push(format!("{amount} {code}"));
        }
    }

    budgets
}

fn recommendation_from_json(json: &Value) -> (Option<String>, Vec<String>) {
    let text_field = |value: &Value, key: &str| {
        value
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .map(str::to_string)
    };
    let string_list = |value: Option<&Value>| {
        value
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>())
            .unwrap_or_default()
    };

    let mut model = text_field(json, "product_model");
    let mut features = string_list(json.get("key_features"));

    if let Some(first) = json.get("recommended_models").and_then(Value::as_array).and_then(|models| models.first()) {
        if model.is_none() {
            model = text_field(first, "model_number").or_else(|| text_field(first, "model_name"));
        }
        features.extend(string_list(first.get("features")));
    }

    (model, features)
}

fn model_in_text(text: &str) -> Option<String> {
    let words = text
        .split_whitespace()
        .map(|word| word.trim_matches(|c: char| !(c.is_ascii_alphanumeric() || c == '-')))
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>();

    for pair in words.windows(2) {
        if let [marker, candidate] = pair {
            let marker = marker.to_ascii_lowercase();
            let is_marker = marker == "model" || marker == "model-nr" || marker == "model-no";
            let candidate_lower = candidate.to_ascii_lowercase();
            if is_marker
                && !MODEL_STOPWORDS.contains(&candidate_lower.as_str())
                && candidate.chars().any(|c| c.is_ascii_digit())
            {
                return Some((*candidate).to_string());
            }
        }
    }

    words
        .iter()
        .find(|word| is_dashed_model(word))
        .or_else(|| words.iter().find(|word| is_compact_model(word)))
        .map(|word| (*word).to_string())
}

/// `[A-Z]{1,5}-[0-9]{2,6}` followed by optional alphanumerics.
fn is_dashed_model(word: &str) -> bool {
    let Some((letters, rest)) = word.split_once('-') else {
        return false;
    };
    (1..=5).contains(&letters.len())
        && letters.chars().all(|c| c.is_ascii_uppercase())
        && leading_digits(rest) >= 2
        && leading_digits(rest) <= 6
}

/// `[A-Z]{2,5}[0-9]{2,6}` followed by optional alphanumerics.
fn is_compact_model(word: &str) -> bool {
    let letters = word.chars().take_while(char::is_ascii_uppercase).count();
    if !(2..=5).contains(&letters) {
        return false;
    }
    let digits = leading_digits(&word[letters..]);
    (2..=6).contains(&digits) && word.chars().all(|c| c.is_ascii_alphanumeric())
}

fn leading_digits(text: &str) -> usize {
    text.chars().take_while(char::is_ascii_digit).count()
}
