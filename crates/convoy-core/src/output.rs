use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A request, emitted by a capability, to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Tool name.
    #[serde(alias = "tool")]
    pub name: String,
    /// Tool parameters, usually a JSON object.
    #[serde(default, alias = "parameters", alias = "args")]
    pub params: Value,
}

impl ToolRequest {
    /// Create a tool request.
    pub fn new(name: impl Into<String>, params: Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }
}

/// A JSON-object answer with the fields the pipeline understands pulled out.
///
/// Unknown keys are preserved in `extra` and written back unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    /// Answer text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Tool the capability wants invoked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_request: Option<ToolRequest>,
    /// Retrieval context attached by the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retrieval_context: Option<Value>,
    /// Every other key of the answer object.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What a capability produced for a task.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentOutput {
    /// Plain text that did not parse as a JSON object.
    RawText(String),
    /// A JSON object answer.
    Structured(StructuredAnswer),
}

impl AgentOutput {
    /// Interpret raw capability text: JSON objects become structured answers,
    /// anything else is kept as text.
    pub fn from_text(text: &str) -> Self {
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value @ Value::Object(_)) => Self::from_value(value),
            _ => AgentOutput::RawText(text.to_string()),
        }
    }

    /// Interpret an already-parsed JSON value.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => {
                match serde_json::from_value::<StructuredAnswer>(Value::Object(map.clone())) {
                    Ok(answer) => AgentOutput::Structured(answer),
                    // Malformed well-known fields: keep everything verbatim.
                    Err(_) => AgentOutput::Structured(StructuredAnswer {
                        content: map.get("content").and_then(Value::as_str).map(str::to_string),
                        extra: map
                            .into_iter()
                            .filter(|(k, _)| k != "content")
                            .collect(),
                        ..Default::default()
                    }),
                }
            }
            Value::String(text) => Self::from_text(&text),
            other => AgentOutput::RawText(other.to_string()),
        }
    }

    /// Textual content of the answer, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            AgentOutput::RawText(text) => Some(text),
            AgentOutput::Structured(answer) => answer.content.as_deref(),
        }
    }

    /// Tool request carried by the answer, if any.
    pub fn tool_request(&self) -> Option<&ToolRequest> {
        match self {
            AgentOutput::RawText(_) => None,
            AgentOutput::Structured(answer) => answer.tool_request.as_ref(),
        }
    }

    /// JSON payload form. Raw text is wrapped as `{ "content": <text> }`.
    pub fn to_payload(&self) -> Value {
        match self {
            AgentOutput::RawText(text) => serde_json::json!({ "content": text }),
            AgentOutput::Structured(answer) => {
                serde_json::to_value(answer).unwrap_or_else(|_| Value::Object(Map::new()))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_text_wraps_as_content() {
        let out = AgentOutput::from_text("just some prose");
        assert_eq!(out, AgentOutput::RawText("just some prose".into()));
        assert_eq!(out.to_payload(), json!({"content": "just some prose"}));
    }

    #[test]
    fn test_json_array_is_not_structured() {
        let out = AgentOutput::from_text("[1, 2, 3]");
        assert!(matches!(out, AgentOutput::RawText(_)));
    }

    #[test]
    fn test_structured_with_tool_request() {
        let out = AgentOutput::from_text(
            r#"{"content": "x", "tool_request": {"tool": "search", "args": {"q": "rust"}}, "confidence": 0.4}"#,
        );
        let req = out.tool_request().unwrap();
        assert_eq!(req.name, "search");
        assert_eq!(req.params, json!({"q": "rust"}));
        assert_eq!(out.content(), Some("x"));

        let payload = out.to_payload();
        assert_eq!(payload["confidence"], json!(0.4));
        assert_eq!(payload["tool_request"]["name"], json!("search"));
    }

    #[test]
    fn test_malformed_tool_request_is_preserved() {
        let out = AgentOutput::from_value(json!({"content": "c", "tool_request": "oops"}));
        assert!(out.tool_request().is_none());
        assert_eq!(out.content(), Some("c"));
        assert_eq!(out.to_payload()["tool_request"], json!("oops"));
    }
}
