//! Reading and removing the trailing state block a customer-facing agent
//! appends to its reply:
//!
//! ```text
//! ---
//! STATE: product_status=searching | insurance_status=not_offered | overall_status=inventory_check
//! ROUTING: product_agent
//! INVENTORY_CHECKED: true
//! ITERATION_COUNT: 2
//! ---
//! ```

use crate::domain::state::ConversationState;
use crate::flows::TransitionError;

const BLOCK_KEYS: [&str; 4] = ["STATE", "ROUTING", "INVENTORY_CHECKED", "ITERATION_COUNT"];

/// Parses the last state block in `text`. Returns `Ok(None)` when there is no
/// block; declared fields with undeclared values are errors, not guesses.
/// Fields the block omits keep their initial values.
pub fn parse_state_block(text: &str) -> Result<Option<ConversationState>, TransitionError> {
    parse_state_block_over(text, &ConversationState::default())
}

/// Same as [`parse_state_block`], but fields the block omits keep the values
/// of `base`.
pub fn parse_state_block_over(
    text: &str,
    base: &ConversationState,
) -> Result<Option<ConversationState>, TransitionError> {
    if !text.contains("---") {
        return Ok(None);
    }

    let Some(block) = text
        .split("---")
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter(|segment| {
            let lower = segment.to_ascii_lowercase();
            lower.contains("state:") || lower.contains("routing:")
        })
        .last()
    else {
        return Ok(None);
    };

    let mut state = base.clone();
    for line in block.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim().to_ascii_uppercase().as_str() {
            "STATE" => apply_state_pairs(&mut state, value)?,
            "ROUTING" => state.routing = first_token(value).parse()?,
            "INVENTORY_CHECKED" => {
                state.inventory_checked = match first_token(value).to_ascii_lowercase().as_str() {
                    "true" => true,
                    "false" => false,
                    other => {
                        return Err(TransitionError::UnknownStateValue {
                            field: "inventory_checked",
                            value: other.to_string(),
                        })
                    }
                };
            }
            "ITERATION_COUNT" => {
                let raw = first_token(value);
                state.iteration_count =
                    raw.parse().map_err(|_| TransitionError::UnknownStateValue {
                        field: "iteration_count",
                        value: raw.to_string(),
                    })?;
            }
            _ => {}
        }
    }

    Ok(Some(state))
}

/// Removes state block lines and separators, leaving the customer-visible
/// text. Text without a block comes back trimmed; a reply that is only a
/// block comes back empty.
pub fn strip_state_block(text: &str) -> String {
    let kept = text
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed == "---" {
                return false;
            }
            let Some((key, _)) = trimmed.split_once(':') else {
                return true;
            };
            let key = key.trim().to_ascii_uppercase();
            !BLOCK_KEYS.contains(&key.as_str())
        })
        .collect::<Vec<_>>();

    let mut cleaned = String::new();
    let mut blank_run = 0;
    for line in kept {
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        cleaned.push_str(line);
        cleaned.push('\n');
    }

    cleaned.trim().to_string()
}

fn apply_state_pairs(state: &mut ConversationState, value: &str) -> Result<(), TransitionError> {
    for pair in value.split('|') {
        let Some((key, raw)) = pair.split_once('=') else {
            continue;
        };
        let raw = first_token(raw);
        match key.trim().to_ascii_lowercase().as_str() {
            "product_status" => state.product_status = raw.parse()?,
            "insurance_status" => state.insurance_status = raw.parse()?,
            "overall_status" => state.overall_status = raw.parse()?,
            _ => {}
        }
    }
    Ok(())
}

fn first_token(value: &str) -> &str {
    let value = value.trim();
    let end = value
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(value.len());
    &value[..end]
}

#[cfg(test)]
mod tests {
    use super::{parse_state_block, parse_state_block_over, strip_state_block};
    use crate::domain::state::{ConversationState, InsuranceStatus, OverallStatus, ProductStatus, Routing};
    use crate::flows::TransitionError;

    const REPLY: &str = "We found two built-in models in stock.\n\n---\nSTATE: product_status=searching | insurance_status=not_offered | overall_status=inventory_check\nROUTING: product_agent\nINVENTORY_CHECKED: true\nITERATION_COUNT: 2\n---";

    #[test]
    fn parses_trailing_block() {
        let state = parse_state_block(REPLY).expect("valid block").expect("block present");

        assert_eq!(state.product_status, ProductStatus::Searching);
        assert_eq!(state.insurance_status, InsuranceStatus::NotOffered);
        assert_eq!(state.overall_status, OverallStatus::InventoryCheck);
        assert_eq!(state.routing, Routing::ProductAgent);
        assert!(state.inventory_checked);
        assert_eq!(state.iteration_count, 2);
    }

    #[test]
    fn text_without_block_has_no_state() {
        assert_eq!(parse_state_block("Which region are you in?"), Ok(None));
        assert_eq!(parse_state_block("price --- negotiable"), Ok(None));
    }

    #[test]
    fn template_style_routing_takes_first_token() {
        let text = "---\nROUTING: ergo_agent|product_agent|none\n---";
        let state = parse_state_block(text).expect("valid").expect("present");
        assert_eq!(state.routing, Routing::ErgoAgent);
    }

    #[test]
    fn undeclared_value_is_an_error() {
        let text = "---\nSTATE: product_status=shipping | insurance_status=not_offered | overall_status=intake\n---";
        let error = parse_state_block(text).expect_err("unknown status");
        assert_eq!(
            error,
            TransitionError::UnknownStateValue {
                field: "product_status",
                value: "shipping".to_string()
            }
        );
    }

    #[test]
    fn bad_iteration_count_is_an_error() {
        let text = "---\nSTATE: product_status=collecting\nITERATION_COUNT: many\n---";
        assert!(parse_state_block(text).is_err());
    }

    #[test]
    fn strip_leaves_customer_text() {
        assert_eq!(strip_state_block(REPLY), "We found two built-in models in stock.");
    }

    #[test]
    fn strip_keeps_plain_text() {
        assert_eq!(strip_state_block("  Hello there.  "), "Hello there.");
    }

    #[test]
    fn strip_of_block_only_text_is_empty() {
        assert_eq!(strip_state_block("---\nROUTING: none\n---"), "");
    }

    #[test]
    fn omitted_fields_keep_base_values() {
        let base = ConversationState {
            product_status: ProductStatus::Agreed,
            inventory_checked: true,
            iteration_count: 4,
            ..ConversationState::default()
        };
        let state = parse_state_block_over("---\nROUTING: ergo_agent\n---", &base)
            .expect("valid")
            .expect("present");

        assert_eq!(state.routing, Routing::ErgoAgent);
        assert_eq!(state.product_status, ProductStatus::Agreed);
        assert!(state.inventory_checked);
        assert_eq!(state.iteration_count, 4);
    }
}
