const OPEN_TAG: &str = "<pull-request>";
const CLOSE_TAG: &str = "</pull-request>";

/// Agent prompt: the instruction preamble, a blank line, then the raw
/// pull-request payload inside a `<pull-request>` envelope.
pub fn build_prompt(instructions: &str, pr_info: &str) -> String {
    // A closing tag inside the payload would end the envelope early.
    let payload = pr_info.trim_end().replace(CLOSE_TAG, "<\\/pull-request>");
    format!(
        "{instructions}\n\n{OPEN_TAG}\n{payload}\n{CLOSE_TAG}\n",
        instructions = instructions.trim_end()
    )
}
