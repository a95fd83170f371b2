//! Structural validation pass for the issue detector
//!
//! Checks that structured fragments embedded in log content are well formed:
//! JSON-looking blocks must parse, markup tags must balance, and code fences
//! must come in pairs.

use crate::events::{DetectedIssue, IssueSeverity, IssueType};
use serde_json::json;

/// Run all structural checks over the content
pub fn structural_issues(content: &str) -> Vec<DetectedIssue> {
    let mut issues = Vec::new();
    issues.extend(check_json_blocks(content));
    issues.extend(check_markup_balance(content));
    issues.extend(check_code_fences(content));
    issues
}

/// Extract balanced `{...}`/`[...]` spans and try to parse them as JSON
///
/// Only spans that look like data (a quote or key separator inside) are
/// checked, so prose braces don't trip the validator. A span whose brackets
/// never close is flagged too.
fn check_json_blocks(content: &str) -> Vec<DetectedIssue> {
    let mut issues = Vec::new();
    let bytes = content.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let open = bytes[i];
        if open != b'{' && open != b'[' {
            i += 1;
            continue;
        }

        match find_balanced_end(bytes, i) {
            Some(end) => {
                let span = &content[i..=end];
                if looks_like_json(span) && serde_json::from_str::<serde_json::Value>(span).is_err()
                {
                    issues.push(
                        DetectedIssue::new(
                            IssueType::StructureError,
                            IssueSeverity::High,
                            "Structured block does not parse as valid JSON",
                            0.8,
                        )
                        .with_metadata(json!({ "block": truncate(span, 120) })),
                    );
                }
                i = end + 1;
            }
            None => {
                // Opening bracket with no closing partner before end of content
                if looks_like_json(&content[i..]) {
                    issues.push(
                        DetectedIssue::new(
                            IssueType::StructureError,
                            IssueSeverity::High,
                            "Structured block is never closed",
                            0.8,
                        )
                        .with_metadata(json!({ "block": truncate(&content[i..], 120) })),
                    );
                }
                break;
            }
        }
    }

    issues
}

/// Find the index of the bracket closing the one at `start`, if any
fn find_balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Spans with a quote or key separator are treated as intended data
fn looks_like_json(span: &str) -> bool {
    span.len() >= 4 && (span.contains('"') || span.contains(':'))
}

/// Detect unbalanced markup tags via a stack scan
///
/// Void elements and self-closing tags are skipped; a close tag that does not
/// match the top of the stack, or tags left open at the end, are flagged.
fn check_markup_balance(content: &str) -> Vec<DetectedIssue> {
    const VOID_TAGS: &[&str] = &["br", "hr", "img", "input", "meta", "link"];

    let mut stack: Vec<String> = Vec::new();
    let mut rest = content;

    while let Some(open_idx) = rest.find('<') {
        rest = &rest[open_idx + 1..];
        let Some(close_idx) = rest.find('>') else {
            break;
        };
        let raw = &rest[..close_idx];
        rest = &rest[close_idx + 1..];

        let is_closing = raw.starts_with('/');
        let body = raw.trim_start_matches('/');
        let name: String = body
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase();

        // Not a tag: comparison operator, emoticon, etc.
        if name.is_empty() || !body.starts_with(|c: char| c.is_ascii_alphabetic()) {
            continue;
        }
        if raw.ends_with('/') || VOID_TAGS.contains(&name.as_str()) {
            continue;
        }

        if is_closing {
            match stack.last() {
                Some(open) if *open == name => {
                    stack.pop();
                }
                _ => {
                    return vec![DetectedIssue::new(
                        IssueType::StructureError,
                        IssueSeverity::Medium,
                        format!("Closing tag </{}> has no matching open tag", name),
                        0.6,
                    )];
                }
            }
        } else {
            stack.push(name);
        }
    }

    if stack.is_empty() {
        Vec::new()
    } else {
        vec![DetectedIssue::new(
            IssueType::StructureError,
            IssueSeverity::Medium,
            format!("Markup tag <{}> is never closed", stack[stack.len() - 1]),
            0.6,
        )]
    }
}

/// An odd number of fence delimiters means an unterminated code block
fn check_code_fences(content: &str) -> Vec<DetectedIssue> {
    let fence_count = content.matches("```").count();
    if fence_count % 2 == 1 {
        vec![DetectedIssue::new(
            IssueType::StructureError,
            IssueSeverity::Medium,
            "Unterminated code fence",
            0.7,
        )]
    } else {
        Vec::new()
    }
}

fn truncate(text: &str, max_len: usize) -> &str {
    if text.len() <= max_len {
        return text;
    }
    let mut end = max_len;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
