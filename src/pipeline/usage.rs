//! Token-usage accounting from the service response.
//!
//! Usage is advisory: it feeds cost reporting, not correctness. A response
//! without a `usage` block, or with partial fields, yields zeros for the
//! missing counts instead of an error.

use crate::output::TokenUsage;
use serde_json::Value;

/// Extract token counts from a decoded response body.
///
/// When the service omits `total_tokens` but reports the other two, the
/// total is derived as their sum; a reported total is passed through as-is.
pub(crate) fn extract_usage(body: &Value) -> TokenUsage {
    let usage = body.get("usage").unwrap_or(&Value::Null);

    let prompt_tokens = count(usage, "prompt_tokens");
    let completion_tokens = count(usage, "completion_tokens");
    let total_tokens = match usage.get("total_tokens").and_then(Value::as_u64) {
        Some(n) => clamp(n),
        None => prompt_tokens.saturating_add(completion_tokens),
    };

    TokenUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

fn count(usage: &Value, key: &str) -> u32 {
    usage.get(key).and_then(Value::as_u64).map(clamp).unwrap_or(0)
}

fn clamp(n: u64) -> u32 {
    n.min(u32::MAX as u64) as u32
}
