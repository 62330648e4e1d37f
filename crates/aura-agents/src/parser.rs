use std::str::FromStr;

use aura_models::{Opinion, OpinionDirection, ProducerId};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::AgentError;

/// Keys a producer may use for its directional call, most specific first.
const DIRECTION_KEYS: [&str; 5] = [
    "direction",
    "signal",
    "sentiment_direction",
    "economic_outlook",
    "forecast_impact",
];

const SUPPORTING_KEYS: [&str; 4] = [
    "supporting_factors",
    "key_factors",
    "key_drivers",
    "opportunities",
];

const CONFLICTING_KEYS: [&str; 3] = ["conflicting_factors", "risk_factors", "anomalies_detected"];

/// Extract the first JSON object from model output that may wrap it in prose.
///
/// Tried in order: the whole text, a fenced markdown block, then each
/// balanced `{ ... }` outside string literals.
pub fn extract_json(text: &str) -> Result<String, AgentError> {
    let trimmed = text.trim();

    let whole = trimmed.starts_with('{').then(|| trimmed.to_string());

    whole
        .into_iter()
        .chain(fenced_block(trimmed))
        .chain(balanced_objects(trimmed))
        .find(|candidate| serde_json::from_str::<Value>(candidate).is_ok_and(|v| v.is_object()))
        .ok_or_else(|| {
            AgentError::Parse(format!(
                "No valid JSON object found in response (length={})",
                text.len()
            ))
        })
}

fn fenced_block(text: &str) -> Option<String> {
    let open = text.find("```")?;
    let after_fence = &text[open + 3..];
    // Skip an optional language tag on the fence line.
    let body_start = after_fence.find('\n')? + 1;
    let body = &after_fence[body_start..];
    let close = body.find("```")?;
    Some(body[..close].trim().to_string())
}

/// Every top-level balanced `{ ... }` span, in order of appearance.
fn balanced_objects(text: &str) -> Vec<String> {
    let mut objects = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' if !in_string => {
                if depth == 0 {
                    start = i;
                }
                depth += 1;
            }
            '}' if !in_string && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    objects.push(text[start..=i].to_string());
                }
            }
            _ => {}
        }
    }
    objects
}

/// Parse an Opinion from raw model output.
///
/// Accepts direction synonyms (BULLISH, LONG, ...), confidence as a number
/// or string, and percentages (values above 1 are divided by 100).
pub fn parse_opinion(producer_id: ProducerId, raw: &str) -> Result<Opinion, AgentError> {
    let json = extract_json(raw)?;
    let value: Value = serde_json::from_str(&json)?;

    let confidence = value
        .get("confidence")
        .and_then(decimal_from_value)
        .ok_or_else(|| AgentError::Parse(format!("Missing or invalid confidence in: {json}")))?;
    let confidence = if confidence > Decimal::ONE {
        confidence / Decimal::ONE_HUNDRED
    } else {
        confidence
    };

    let direction = DIRECTION_KEYS
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(direction_from_label)
        .unwrap_or(OpinionDirection::Hold);

    let reasoning = value
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or_default();

    Ok(Opinion::new(producer_id, direction, confidence)
        .with_supporting(collect_strings(&value, &SUPPORTING_KEYS))
        .with_conflicting(collect_strings(&value, &CONFLICTING_KEYS))
        .with_reasoning(reasoning))
}

/// Direction labels plus the outlook words producers tend to use.
fn direction_from_label(label: &str) -> OpinionDirection {
    match label.trim().to_ascii_lowercase().as_str() {
        "positive" => OpinionDirection::Buy,
        "negative" => OpinionDirection::Sell,
        other => OpinionDirection::from_label(other),
    }
}

fn decimal_from_value(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .or_else(|_| Decimal::from_scientific(&n.to_string()))
            .ok(),
        Value::String(s) => Decimal::from_str(s.trim().trim_end_matches('%')).ok(),
        _ => None,
    }
}

fn collect_strings(value: &Value, keys: &[&str]) -> Vec<String> {
    keys.iter()
        .filter_map(|key| value.get(*key).and_then(Value::as_array))
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
