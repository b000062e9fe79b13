//! Sanitizing loosely structured plan items
//!
//! Remote planners return items in several shapes (`operands: [a, b]`,
//! `a`/`b`, `left`/`right`, nested under `problem`, numbers as strings).
//! Everything here is total: bad input yields `None`, never a panic.

use serde_json::Value;

use crate::types::{AdditionFact, PlanItem, PlanRole, MAX_ADDEND};

const A_KEYS: [&str; 5] = ["a", "left", "lhs", "first", "x"];
const B_KEYS: [&str; 5] = ["b", "right", "rhs", "second", "y"];
const PREDICTED_KEYS: [&str; 3] = ["predictedSuccess", "successRate", "difficulty"];
const DISPLAY_KEYS: [&str; 3] = ["display", "prompt", "expression"];

/// Finite number from a JSON number or numeric string
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Whole number in the single-digit addend range
pub fn to_addend(value: &Value) -> Option<u8> {
    addend_from_f64(to_number(value)?)
}

fn addend_from_f64(n: f64) -> Option<u8> {
    if n.fract() != 0.0 || n < 0.0 || n > MAX_ADDEND as f64 {
        return None;
    }
    Some(n as u8)
}

/// Raw operand values of a plan item, in lookup order
pub fn extract_operands(item: &Value) -> (Option<f64>, Option<f64>) {
    if !item.is_object() {
        return (None, None);
    }

    let direct = item
        .get("operands")
        .and_then(Value::as_array)
        .filter(|ops| ops.len() >= 2)
        .or_else(|| {
            item.pointer("/problem/operands")
                .and_then(Value::as_array)
                .filter(|ops| ops.len() >= 2)
        });
    if let Some(ops) = direct {
        return (to_number(&ops[0]), to_number(&ops[1]));
    }

    (
        lookup_operand(item, &A_KEYS, &["a", "left"]),
        lookup_operand(item, &B_KEYS, &["b", "right"]),
    )
}

fn lookup_operand(item: &Value, keys: &[&str], nested: &[&str]) -> Option<f64> {
    let problem = item.get("problem");
    keys.iter()
        .filter_map(|key| item.get(*key))
        .chain(nested.iter().filter_map(|key| problem.and_then(|p| p.get(*key))))
        .find_map(to_number)
}

/// Addition fact of a plan item when both operands are valid addends
pub fn extract_fact(item: &Value) -> Option<AdditionFact> {
    let (a, b) = extract_operands(item);
    let a = addend_from_f64(a?)?;
    let b = addend_from_f64(b?)?;
    Some(AdditionFact::new(a, b))
}

fn first_string<'a>(item: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| item.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
}

fn parse_role(item: &Value) -> PlanRole {
    match item.get("role").and_then(Value::as_str) {
        Some("weak") => PlanRole::Weak,
        Some("review") => PlanRole::Review,
        Some("challenge") => PlanRole::Challenge,
        _ => PlanRole::Balanced,
    }
}

/// Normalize one remote plan item
///
/// Items without two valid addends are dropped. The answer is always
/// recomputed from the operands; predicted success falls back to
/// `fallback_target`.
pub fn normalize_remote_item(
    item: &Value,
    index: usize,
    plan_id: &str,
    fallback_target: f64,
    source: &str,
) -> Option<PlanItem> {
    let fact = extract_fact(item)?;

    let predicted = PREDICTED_KEYS
        .iter()
        .filter_map(|key| item.get(*key))
        .find_map(to_number)
        .map(|p| p.clamp(0.0, 1.0))
        .unwrap_or(fallback_target);

    let plan_id = first_string(item, &["planId", "plan_id"]).unwrap_or(plan_id).to_string();
    let id = first_string(item, &["itemId", "id"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("{plan_id}-{index}"));
    let display = first_string(item, &DISPLAY_KEYS)
        .map(str::to_string)
        .unwrap_or_else(|| fact.to_string());

    Some(PlanItem {
        id,
        a: fact.a,
        b: fact.b,
        answer: fact.answer(),
        role: parse_role(item),
        predicted_success: predicted,
        display,
        source: source.to_string(),
        plan_id,
    })
}
