use serde_json::{Value, json};

/// Plain text to the platform's rich-text document JSON.
///
/// Lines starting with `-` or `*` accumulate into a single bulletList
/// block; any other line — blank lines included — flushes the pending
/// bullet run and becomes a paragraph. Only paragraphs and single-level
/// bullet lists are modeled; nested or mixed formatting is out of scope.
pub fn encode(plain: &str) -> String {
    let mut blocks: Vec<Value> = Vec::new();
    let mut bullets: Vec<Value> = Vec::new();

    for line in plain.split('\n') {
        if let Some(item) = bullet_text(line) {
            bullets.push(list_item(item));
            continue;
        }
        flush_bullets(&mut blocks, &mut bullets);
        blocks.push(paragraph(line.trim()));
    }
    flush_bullets(&mut blocks, &mut bullets);

    json!({"type": "doc", "content": blocks}).to_string()
}

/// Rich-text document JSON back to plain text. Never fails: anything that
/// is not a recognizable document comes back unchanged.
pub fn decode(markup: &str) -> String {
    let Ok(doc) = serde_json::from_str::<Value>(markup) else {
        return markup.to_string();
    };
    if doc.get("type").and_then(Value::as_str) != Some("doc") {
        return markup.to_string();
    }
    let Some(blocks) = doc.get("content").and_then(Value::as_array) else {
        return markup.to_string();
    };

    let mut lines: Vec<String> = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("bulletList") => {
                let items = block.get("content").and_then(Value::as_array);
                for item in items.into_iter().flatten() {
                    lines.push(format!("- {}", gather_text(item)));
                }
            }
            // Paragraphs and anything unmodeled degrade to their text.
            _ => lines.push(gather_text(block)),
        }
    }
    lines.join("\n")
}

/// Bullet-line marker: `-` or `*` followed by optional whitespace.
fn bullet_text(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('-').or_else(|| line.strip_prefix('*'))?;
    Some(rest.trim_start())
}

fn flush_bullets(blocks: &mut Vec<Value>, bullets: &mut Vec<Value>) {
    if !bullets.is_empty() {
        blocks.push(json!({"type": "bulletList", "content": std::mem::take(bullets)}));
    }
}

fn paragraph(text: &str) -> Value {
    if text.is_empty() {
        // Blank line: empty paragraph node, no text child.
        json!({"type": "paragraph"})
    } else {
        json!({"type": "paragraph", "content": [{"type": "text", "text": text}]})
    }
}

fn list_item(text: &str) -> Value {
    json!({
        "type": "listItem",
        "content": [paragraph(text)]
    })
}

/// Concatenated text of every text node under a block, in order.
fn gather_text(node: &Value) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Value, out: &mut String) {
    if node.get("type").and_then(Value::as_str) == Some("text") {
        if let Some(text) = node.get("text").and_then(Value::as_str) {
            out.push_str(text);
        }
        return;
    }
    for child in node.get("content").and_then(Value::as_array).into_iter().flatten() {
        collect_text(child, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn blocks(encoded: &str) -> Vec<Value> {
        let doc: Value = serde_json::from_str(encoded).expect("encode must emit valid JSON");
        doc["content"].as_array().expect("doc content").clone()
    }

    #[test]
    fn mixed_text_encodes_paragraphs_around_one_bullet_run() {
        let encoded = encode("a\n- b\n- c\nd");
        let blocks = blocks(&encoded);
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0]["type"], "paragraph");
        assert_eq!(blocks[0]["content"][0]["text"], "a");
        assert_eq!(blocks[1]["type"], "bulletList");
        let items = blocks[1]["content"].as_array().expect("list items");
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["content"][0]["content"][0]["text"], "b");
        assert_eq!(items[1]["content"][0]["content"][0]["text"], "c");
        assert_eq!(blocks[2]["type"], "paragraph");
        assert_eq!(blocks[2]["content"][0]["text"], "d");
    }

    #[test]
    fn asterisk_bullets_and_tight_markers_are_list_items() {
        let encoded = encode("* one\n-two");
        let blocks = blocks(&encoded);
        assert_eq!(blocks.len(), 1);
        let items = blocks[0]["content"].as_array().expect("list items");
        assert_eq!(items[0]["content"][0]["content"][0]["text"], "one");
        assert_eq!(items[1]["content"][0]["content"][0]["text"], "two");
    }

    #[test]
    fn round_trip_preserves_paragraphs_bullets_and_blank_lines() {
        for text in [
            "hello",
            "a\n- b\n- c\nd",
            "first\n\nsecond",
            "- only\n- bullets",
            "",
        ] {
            assert_eq!(decode(&encode(text)), text, "round trip of {text:?}");
        }
    }

    #[test]
    fn decode_of_malformed_input_is_the_identity() {
        assert_eq!(decode("not json at all"), "not json at all");
        assert_eq!(decode(r#"{"type": "other"}"#), r#"{"type": "other"}"#);
        assert_eq!(decode(r#"{"type": "doc"}"#), r#"{"type": "doc"}"#);
    }

    #[test]
    fn decode_flattens_unmodeled_blocks_to_their_text() {
        let markup = r#"{"type":"doc","content":[
            {"type":"heading","content":[{"type":"text","text":"Title"}]},
            {"type":"paragraph","content":[{"type":"text","text":"body"}]}
        ]}"#;
        assert_eq!(decode(markup), "Title\nbody");
    }
}
