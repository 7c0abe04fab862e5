use serde::Serialize;

use crate::invoker::InvocationResult;

/// Run metadata shown in the comment trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentMeta {
    pub workflow: String,
    pub action: String,
    pub target: String,
}

/// JSON body accepted by the comment endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentPayload {
    pub body: String,
}

/// Renders the status comment for one tool result. Pure; the captured output
/// is embedded verbatim inside a fence it cannot close.
pub fn format_comment(result: &InvocationResult, meta: &CommentMeta) -> CommentPayload {
    let status = if result.succeeded() {
        "Success"
    } else {
        "Failed"
    };
    let fence = fence_for(&result.output);

    let mut body = String::new();
    body.push_str(&format!("#### `{}` {status}\n\n", result.tool));
    body.push_str("<details><summary>Show Output</summary>\n\n");
    body.push_str(&fence);
    body.push('\n');
    body.push_str(&result.output);
    if !result.output.is_empty() && !result.output.ends_with('\n') {
        body.push('\n');
    }
    body.push_str(&fence);
    body.push_str("\n\n</details>\n\n");
    body.push_str(&format!(
        "*Workflow: {}, Action: {}, Target: {}*\n",
        code_span(&meta.workflow),
        code_span(&meta.action),
        code_span(&meta.target)
    ));

    CommentPayload { body }
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for ch in text.chars() {
        if ch == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn fence_for(text: &str) -> String {
    "`".repeat((longest_backtick_run(text) + 1).max(3))
}

fn code_span(text: &str) -> String {
    let ticks = "`".repeat(longest_backtick_run(text) + 1);
    if text.starts_with('`') || text.ends_with('`') {
        format!("{ticks} {text} {ticks}")
    } else {
        format!("{ticks}{text}{ticks}")
    }
}
