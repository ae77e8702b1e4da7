//! Legacy JSON framing.
//!
//! The Unity-era channel speaks one JSON object per message instead of binary
//! frames: requests are `{"type":"translate","text":"..."}` and responses
//! carry a `"translated"` field. The client side parses responses by locating
//! that field and unescaping the five conventional escapes; this is the
//! compatibility contract, not a general JSON parser. New deployments use the
//! binary framing.

use serde_json::{json, Value};

/// Encode a translate request for the legacy channel.
pub fn encode_request(text: &str) -> String {
    json!({ "type": "translate", "text": text }).to_string()
}

/// Encode a translate response for the legacy channel.
pub fn encode_response(translated: &str) -> String {
    json!({ "type": "translate_response", "translated": translated }).to_string()
}

/// Server-side parse of a legacy request; returns the text to translate.
pub fn extract_text(message: &str) -> Option<String> {
    let value: Value = serde_json::from_str(message).ok()?;
    if value.get("type")?.as_str()? != "translate" {
        return None;
    }
    Some(value.get("text")?.as_str()?.to_string())
}

/// Client-side parse of a legacy response: locate `"translated":"..."` and
/// unescape `\n \r \t \" \\`.
pub fn extract_translated(message: &str) -> Option<String> {
    const FIELD: &str = "\"translated\":\"";
    let start = message.find(FIELD)? + FIELD.len();
    let rest = &message[start..];

    let mut raw = String::new();
    let mut chars = rest.chars();
    loop {
        match chars.next()? {
            '\\' => {
                raw.push('\\');
                raw.push(chars.next()?);
            }
            '"' => break,
            c => raw.push(c),
        }
    }

    Some(unescape(&raw))
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let encoded = encode_request("Start \"Game\"\n");
        assert_eq!(extract_text(&encoded).as_deref(), Some("Start \"Game\"\n"));
    }

    #[test]
    fn test_response_roundtrip() {
        let encoded = encode_response("Inizia\t\"ora\"\\fine");
        assert_eq!(
            extract_translated(&encoded).as_deref(),
            Some("Inizia\t\"ora\"\\fine")
        );
    }

    #[test]
    fn test_extract_translated_from_wire_form() {
        let message = r#"{"type":"translate_response","translated":"Riga 1\nRiga 2"}"#;
        assert_eq!(
            extract_translated(message).as_deref(),
            Some("Riga 1\nRiga 2")
        );
    }

    #[test]
    fn test_missing_field_returns_none() {
        assert_eq!(extract_translated(r#"{"type":"pong"}"#), None);
        assert_eq!(extract_text(r#"{"type":"pong"}"#), None);
        assert_eq!(extract_text("not json"), None);
    }

    #[test]
    fn test_escaped_quote_does_not_end_field() {
        let message = r#"{"translated":"a\"b"}"#;
        assert_eq!(extract_translated(message).as_deref(), Some("a\"b"));
    }
}
