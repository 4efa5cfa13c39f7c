use serde_json::{json, Value};

const BLOCK_NODES: &[&str] = &[
    "paragraph",
    "heading",
    "listItem",
    "codeBlock",
    "blockquote",
    "rule",
    "panel",
];

/// Extract plain text from Jira's Atlassian Document Format (ADF).
///
/// Block nodes end with a newline; surrounding whitespace is trimmed.
pub fn extract_text_from_adf(value: &Value) -> Option<String> {
    let text = render(value);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(arr) => arr.iter().map(render).collect(),
        Value::Object(obj) => {
            let node_type = obj.get("type").and_then(|v| v.as_str()).unwrap_or_default();
            match node_type {
                "text" => obj
                    .get("text")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                "hardBreak" => "\n".to_string(),
                _ => {
                    let mut inner = obj.get("content").map(render).unwrap_or_default();
                    if BLOCK_NODES.contains(&node_type) {
                        inner.push('\n');
                    }
                    inner
                }
            }
        }
        _ => String::new(),
    }
}

/// Build a minimal ADF document, one paragraph per line.
pub fn text_to_adf(text: &str) -> Value {
    let paragraphs: Vec<Value> = text
        .lines()
        .map(|line| {
            if line.is_empty() {
                json!({ "type": "paragraph", "content": [] })
            } else {
                json!({ "type": "paragraph", "content": [{ "type": "text", "text": line }] })
            }
        })
        .collect();
    json!({ "type": "doc", "version": 1, "content": paragraphs })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_paragraphs_on_separate_lines() {
        let doc = json!({
            "type": "doc",
            "content": [
                { "type": "paragraph", "content": [
                    { "type": "text", "text": "Hello " },
                    { "type": "text", "text": "world" }
                ]},
                { "type": "paragraph", "content": [{ "type": "text", "text": "Second" }] }
            ]
        });
        assert_eq!(extract_text_from_adf(&doc).as_deref(), Some("Hello world\nSecond"));
    }

    #[test]
    fn empty_documents_yield_none() {
        assert_eq!(extract_text_from_adf(&Value::Null), None);
        assert_eq!(extract_text_from_adf(&json!({ "type": "doc", "content": [] })), None);
    }

    #[test]
    fn plain_strings_pass_through() {
        assert_eq!(extract_text_from_adf(&json!("legacy text")).as_deref(), Some("legacy text"));
    }

    #[test]
    fn generated_documents_extract_to_the_same_text() {
        let text = "First line\n\nThird line";
        assert_eq!(extract_text_from_adf(&text_to_adf(text)).as_deref(), Some(text));
    }
}
