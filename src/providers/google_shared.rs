//! Shared Google adapter base (spec §4.8): the Forced Function Calling
//! (FFC) construction used by both [`super::gemini_direct`] and
//! [`super::vertex`] to get grounded search results back alongside a JSON
//! structured output in a single call, instead of Vertex's older two-step
//! grounded-then-reformat pattern (spec §9 open question, resolved in
//! `DESIGN.md`).
//!
//! `tool_config.mode` is always `AUTO` or `ANY`, never the bare literal
//! `"REQUIRED"` some Google docs show for older SDKs — that value isn't
//! accepted by the Gemini/Vertex FFC surface this crate targets.

use serde_json::{json, Value};

/// Name of the synthetic function declaration the model is steered toward
/// when the caller wants grounded search results returned as JSON.
pub const SCHEMA_FUNCTION_NAME: &str = "emit_structured_response";

/// Build the `tools` array: a `google_search` retrieval tool plus (when a
/// JSON schema is requested) a single `SchemaFunction` declaration.
pub fn build_tools(json_schema: Option<&Value>) -> Vec<Value> {
    let mut tools = vec![json!({ "google_search": {} })];

    if let Some(schema) = json_schema {
        tools.push(json!({
            "function_declarations": [{
                "name": SCHEMA_FUNCTION_NAME,
                "description": "Emit the final answer in the required structured shape.",
                "parameters": schema,
            }]
        }));
    }

    tools
}

/// Build `tool_config`: `mode: "ANY"` pins the model to call the schema
/// function when JSON output is required; `mode: "AUTO"` otherwise lets the
/// model choose whether to call `google_search` at all.
pub fn build_tool_config(require_schema_function: bool) -> Value {
    if require_schema_function {
        json!({
            "function_calling_config": {
                "mode": "ANY",
                "allowed_function_names": [SCHEMA_FUNCTION_NAME],
            }
        })
    } else {
        json!({
            "function_calling_config": {
                "mode": "AUTO",
            }
        })
    }
}

/// Extract the structured JSON args from a `SchemaFunction` function call in
/// a `candidates[0].content.parts[]` array, if FFC was used.
pub fn extract_schema_function_args(response_body: &Value) -> Option<Value> {
    let parts = response_body
        .get("candidates")?
        .as_array()?
        .first()?
        .get("content")?
        .get("parts")?
        .as_array()?;

    for part in parts {
        if let Some(call) = part.get("functionCall") {
            if call.get("name").and_then(|v| v.as_str()) == Some(SCHEMA_FUNCTION_NAME) {
                return call.get("args").cloned();
            }
        }
    }
    None
}

/// Extract the plain-text parts, concatenated, for non-JSON responses.
pub fn extract_text(response_body: &Value) -> String {
    let Some(parts) = response_body
        .get("candidates")
        .and_then(|v| v.as_array())
        .and_then(|arr| arr.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    else {
        return String::new();
    };

    parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect::<Vec<_>>()
        .join("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_config_never_emits_literal_required() {
        let config = build_tool_config(true);
        let mode = config["function_calling_config"]["mode"].as_str().unwrap();
        assert_ne!(mode, "REQUIRED");
        assert_eq!(mode, "ANY");
    }

    #[test]
    fn build_tools_always_includes_google_search() {
        let tools = build_tools(None);
        assert_eq!(tools.len(), 1);
        assert!(tools[0].get("google_search").is_some());
    }

    #[test]
    fn build_tools_adds_schema_function_when_requested() {
        let schema = json!({"type": "object"});
        let tools = build_tools(Some(&schema));
        assert_eq!(tools.len(), 2);
        assert_eq!(
            tools[1]["function_declarations"][0]["name"].as_str(),
            Some(SCHEMA_FUNCTION_NAME)
        );
    }
}
