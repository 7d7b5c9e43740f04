//! Source-branch extraction from hosting-service pull-request data.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::workspace::validate_branch_name;

/// `headRefName: x`, `"head_branch": "x"`, `branch = x` and similar lines.
static BRANCH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?mi)^\s*"?(?:headRefName|head_ref_name|head_branch|head[ _]?ref|branch)"?\s*[:=]\s*"?([^\s",]+)"?"#)
        .expect("branch line pattern compiles")
});

/// Resolve the source branch named in `info`.
///
/// A JSON object is read through its structured fields only (`headRefName`,
/// then `head_branch`, then `head.ref`); anything else falls back to a
/// best-effort line match.
pub fn resolve_branch(info: &str) -> Result<String> {
    let candidate = match serde_json::from_str::<Value>(info) {
        Ok(value) if value.is_object() => from_json(&value),
        _ => from_text(info),
    };

    let branch = candidate.ok_or_else(|| {
        AppError::BranchResolution("pull request data does not name a source branch".to_string())
    })?;
    validate_branch_name(&branch)
        .map_err(|e| AppError::BranchResolution(format!("unusable source branch: {e}")))?;
    Ok(branch)
}

fn from_json(value: &Value) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    non_empty(value.get("headRefName"))
        .or_else(|| non_empty(value.get("head_branch")))
        .or_else(|| non_empty(value.pointer("/head/ref")))
}

fn from_text(info: &str) -> Option<String> {
    BRANCH_LINE
        .captures(info)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
