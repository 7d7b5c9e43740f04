//! Markdown comment summarizing the lint and test checks.

use chrono::{DateTime, Utc};

use crate::exec::ExecutionResult;

pub const PASSED_MARKER: &str = "✅ Passed";
pub const FAILED_MARKER: &str = "❌ Failed";

/// Largest slice of one check's output embedded in the comment. GitHub
/// rejects comment bodies over 65536 characters; two checks at this size
/// leave room for the rest of the report.
pub const MAX_EMBEDDED_OUTPUT_BYTES: usize = 30_000;

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub command: String,
    pub passed: bool,
    pub failure: Option<String>,
    pub output: String,
}

impl CheckResult {
    pub fn from_execution(name: &str, command: String, result: &ExecutionResult) -> Self {
        Self {
            name: name.to_string(),
            command,
            passed: result.passed(),
            failure: result.failure.as_ref().map(|e| e.to_string()),
            output: result.output_text(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResultReport {
    pub branch: String,
    pub checks: Vec<CheckResult>,
    pub generated_at: DateTime<Utc>,
}

impl ResultReport {
    pub fn new(branch: impl Into<String>, checks: Vec<CheckResult>) -> Self {
        Self {
            branch: branch.into(),
            checks,
            generated_at: Utc::now(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn render(&self) -> String {
        let mut out = format!("## kratt worker results for `{}`\n", self.branch);

        for check in &self.checks {
            out.push_str(&format!("\n### {}\n\n", check.name));
            if check.passed {
                out.push_str(PASSED_MARKER);
            } else {
                out.push_str(FAILED_MARKER);
            }
            out.push_str(&format!(" (`{}`)\n", check.command));
            if let Some(reason) = &check.failure {
                out.push_str(&format!("\n{reason}\n"));
            }

            let output = check.output.trim_end_matches(['\n', '\r']);
            if !output.trim().is_empty() {
                let (shown, dropped) = output_tail(output, MAX_EMBEDDED_OUTPUT_BYTES);
                let fence = fence_for(shown);
                out.push('\n');
                if dropped > 0 {
                    out.push_str(&format!("[truncated {dropped} bytes]\n"));
                }
                out.push_str(&format!("{fence}\n{shown}\n{fence}\n"));
            }
        }

        out.push_str(&format!(
            "\n---\n*Generated by kratt at {}*\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        out
    }
}

/// Last `limit` bytes of `text` (moved forward to a char boundary) and the
/// number of bytes left out. Failures usually show up at the end.
fn output_tail(text: &str, limit: usize) -> (&str, usize) {
    if text.len() <= limit {
        return (text, 0);
    }
    let mut start = text.len() - limit;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    (&text[start..], start)
}

/// Backtick fence longer than any backtick run inside `text`.
fn fence_for(text: &str) -> String {
    let longest = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    "`".repeat(longest.max(2) + 1)
}
