//! Splits raw assistant text into narrative and code.

use super::AssistantReply;

const PYTHON_FENCE: &str = "```python";
const FENCE: &str = "```";

/// Markers that make an unstructured reply look like bare code.
const CODE_MARKERS: [&str; 5] = ["import ", "df.", "plt.", "print(", "pandas"];

/// Parse a reply, trying in order:
/// 1. `EXPLANATION:` section plus a fenced python block
/// 2. prose before the first python fence, code inside it
/// 3. bare code
/// 4. plain narrative
pub fn parse_reply(text: &str) -> AssistantReply {
    if text.contains("EXPLANATION:") {
        return parse_structured(text);
    }

    if let Some(start) = text.find(PYTHON_FENCE) {
        let narrative = text[..start].trim().to_string();
        let body = &text[start + PYTHON_FENCE.len()..];
        let code = match body.find(FENCE) {
            Some(end) => body[..end].trim().to_string(),
            None => body.trim().to_string(),
        };
        return AssistantReply::new(narrative, Some(code));
    }

    if CODE_MARKERS.iter().any(|m| text.contains(m)) {
        return AssistantReply::new("", Some(text.trim().to_string()));
    }

    AssistantReply::new(text.trim(), None)
}

fn parse_structured(text: &str) -> AssistantReply {
    let mut narrative: Vec<&str> = Vec::new();
    let mut code = String::new();
    let mut in_explanation = false;
    let mut seen_code_header = false;
    let mut in_code_block = false;

    for line in text.lines() {
        let trimmed = line.trim();

        if in_code_block {
            if trimmed == FENCE {
                in_code_block = false;
            } else {
                code.push_str(line);
                code.push('\n');
            }
            continue;
        }

        if let Some(rest) = trimmed.strip_prefix("EXPLANATION:") {
            in_explanation = true;
            narrative.push(rest.trim());
        } else if trimmed.starts_with("CODE:") {
            in_explanation = false;
            seen_code_header = true;
        } else if trimmed.starts_with(PYTHON_FENCE) || (seen_code_header && trimmed == FENCE) {
            in_explanation = false;
            in_code_block = true;
        } else if in_explanation && !trimmed.is_empty() {
            narrative.push(trimmed);
        }
    }

    let narrative = narrative
        .into_iter()
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    AssistantReply::new(narrative, Some(code.trim().to_string()))
}
