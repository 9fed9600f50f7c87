//! OpenAI Responses API adapter (spec §4.6).
//!
//! `instructions` carries the concatenated system message(s) verbatim —
//! never a grounding nudge or "you must search" line (spec §4.7 step 5).
//! `tool_choice: "required"` is never set for web search; OpenAI doesn't
//! support it there, so REQUIRED enforcement is entirely post-hoc (spec
//! §4.6).

use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::{json, Value};

use crate::error::AdapterError;
use crate::providers::{AdapterResponse, ProviderAdapter};
use crate::request::{Request, Role};

const BASE_URL: &str = "https://api.openai.com/v1/responses";

pub struct OpenAiAdapter {
    http_client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
}

impl OpenAiAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let http_client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            http_client,
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Override the endpoint, for pointing at a mock server in tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_body(&self, request: &Request) -> Value {
        // The ALS block is spliced into `messages` as `Role::System` (spec
        // §4.2), which is right for Gemini/Vertex's `system_instruction`
        // but not for OpenAI: §4.6.1 requires it as its own user-role block
        // ahead of the user content (system → ALS → user), not folded into
        // `instructions`. Pull it out by content so it's never double-sent.
        let als_text = request.meta.als_provenance.as_ref().map(|p| p.als_block_text.as_str());

        let mut input: Vec<Value> = Vec::with_capacity(request.messages.len());
        for m in &request.messages {
            match m.role {
                Role::System => {
                    if Some(m.content.as_str()) == als_text {
                        input.push(json!({ "role": "user", "content": m.content }));
                    }
                }
                Role::User => input.push(json!({ "role": "user", "content": m.content })),
                Role::Assistant => input.push(json!({ "role": "assistant", "content": m.content })),
            }
        }

        let instructions: String = request
            .system_messages()
            .filter(|m| Some(m.content.as_str()) != als_text)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut body = json!({
            "model": request.model,
            "input": input,
        });

        if !instructions.is_empty() {
            body["instructions"] = json!(instructions);
        }

        if request.grounded {
            body["tools"] = json!([{ "type": "web_search" }]);
            body["tool_choice"] = json!("auto");
        }

        if let Some(temperature) = request.meta.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.meta.max_output_tokens {
            body["max_output_tokens"] = json!(max_tokens);
        }

        if let Some(effort) = &request.meta.reasoning_effort {
            body["reasoning"] = json!({ "effort": effort });
        }

        if request.json_mode {
            body["text"] = json!({
                "format": {
                    "type": "json_schema",
                    "name": "structured_response",
                    "schema": { "type": "object" },
                    "strict": true,
                }
            });

            // For grounded+JSON, the instruction to emit a single valid JSON
            // object is canonical, not a grounding nudge — it governs output
            // shape, not whether the tool fires (spec §4.6.1).
            if request.grounded {
                let existing = body["instructions"].as_str().unwrap_or("").to_string();
                let json_instruction = "Respond with a single valid JSON object in the final message.";
                body["instructions"] = json!(if existing.is_empty() {
                    json_instruction.to_string()
                } else {
                    format!("{existing}\n\n{json_instruction}")
                });
            }
        }

        body
    }

    /// One-shot plain-text retry body for when tools were invoked but the
    /// model produced no text (spec §4.6.1): the original body, minus
    /// tools, plus an instruction to answer directly.
    fn build_retry_body(&self, request: &Request) -> Value {
        let mut body = self.build_body(request);
        body.as_object_mut().map(|o| o.remove("tools"));
        body.as_object_mut().map(|o| o.remove("tool_choice"));

        let hint = "Please respond directly in plain text without using tools.";
        let existing = body["instructions"].as_str().unwrap_or("").to_string();
        body["instructions"] = json!(if existing.is_empty() {
            hint.to_string()
        } else {
            format!("{existing}\n\n{hint}")
        });

        body
    }
}

impl OpenAiAdapter {
    async fn send(&self, body: &Value) -> Result<Value, AdapterError> {
        let response = self
            .http_client
            .post(&self.base_url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_response(status.as_u16(), &headers, text));
        }

        Ok(response.json().await?)
    }

    fn usage(raw_body: &Value) -> (u32, u32) {
        let usage = raw_body.get("usage");
        let prompt_tokens = usage
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion_tokens = usage
            .and_then(|u| u.get("output_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        (prompt_tokens, completion_tokens)
    }

    fn tools_were_invoked(raw_body: &Value) -> bool {
        raw_body
            .get("output")
            .and_then(|v| v.as_array())
            .map(|items| items.iter().any(|item| item.get("type").and_then(|t| t.as_str()) != Some("message")))
            .unwrap_or(false)
    }
}

impl ProviderAdapter for OpenAiAdapter {
    async fn complete(&self, request: &Request) -> Result<AdapterResponse, AdapterError> {
        let body = self.build_body(request);
        let raw_body = self.send(&body).await?;
        let content = Self::extract_text(&raw_body);

        // If a tool ran but the model produced no text, fall back to one
        // plain-text retry (spec §4.6.1) rather than returning an empty
        // completion.
        let (raw_body, content, text_source) = if content.is_empty() && Self::tools_were_invoked(&raw_body) {
            let retry_body = self.build_retry_body(request);
            let retry_raw = self.send(&retry_body).await?;
            let retry_content = Self::extract_text(&retry_raw);
            (retry_raw, retry_content, "retry")
        } else {
            (raw_body, content, "initial")
        };

        let (prompt_tokens, completion_tokens) = Self::usage(&raw_body);

        Ok(AdapterResponse {
            content,
            prompt_tokens,
            completion_tokens,
            raw_body,
            text_source,
        })
    }
}

impl OpenAiAdapter {
    fn extract_text(raw_body: &Value) -> String {
        let Some(output) = raw_body.get("output").and_then(|v| v.as_array()) else {
            return String::new();
        };

        output
            .iter()
            .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("message"))
            .filter_map(|item| item.get("content").and_then(|v| v.as_array()))
            .flatten()
            .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ChatMessage;

    #[test]
    fn build_body_never_sets_tool_choice_required_for_web_search() {
        let adapter = OpenAiAdapter::new("test-key");
        let mut request = Request::new("gpt-5", vec![ChatMessage::user("hi")]);
        request.grounded = true;

        let body = adapter.build_body(&request);
        assert_eq!(body["tool_choice"].as_str(), Some("auto"));
        assert_ne!(body["tool_choice"].as_str(), Some("required"));
    }

    #[test]
    fn instructions_carry_system_messages_verbatim_without_grounding_nudges() {
        let adapter = OpenAiAdapter::new("test-key");
        let mut request = Request::new("gpt-5", vec![ChatMessage::system("be terse"), ChatMessage::user("hi")]);
        request.grounded = true;

        let body = adapter.build_body(&request);
        assert_eq!(body["instructions"].as_str(), Some("be terse"));
    }

    #[test]
    fn als_block_is_sent_as_its_own_user_role_entry_before_the_user_message() {
        let adapter = OpenAiAdapter::new("test-key");
        let mut request = Request::new(
            "gpt-5",
            vec![
                ChatMessage::system("be terse"),
                ChatMessage {
                    role: Role::System,
                    content: "Ambient context: the user is likely in Germany.".to_string(),
                },
                ChatMessage::user("hi"),
            ],
        );
        request.meta.als_provenance = Some(crate::request::AlsProvenance {
            als_block_text: "Ambient context: the user is likely in Germany.".to_string(),
            als_block_sha256: "deadbeef".to_string(),
            als_variant_id: 0,
            seed_key_id: "seed-1".to_string(),
            als_country: "DE".to_string(),
            als_nfc_length: 48,
        });

        let body = adapter.build_body(&request);

        // Caller-authored system text stays in `instructions`; the ALS
        // block is never folded in there, and never duplicated.
        assert_eq!(body["instructions"].as_str(), Some("be terse"));

        let input = body["input"].as_array().unwrap();
        assert_eq!(input.len(), 2, "ALS block and user message, system → ALS → user");
        assert_eq!(input[0]["role"].as_str(), Some("user"));
        assert_eq!(input[0]["content"].as_str(), Some("Ambient context: the user is likely in Germany."));
        assert_eq!(input[1]["role"].as_str(), Some("user"));
        assert_eq!(input[1]["content"].as_str(), Some("hi"));
    }

    #[test]
    fn extract_text_joins_message_content_parts() {
        let body = json!({
            "output": [
                { "type": "reasoning" },
                { "type": "message", "content": [{ "text": "hello" }, { "text": "world" }] }
            ]
        });
        assert_eq!(OpenAiAdapter::extract_text(&body), "hello\nworld");
    }

    #[test]
    fn grounded_json_mode_appends_single_json_object_instruction() {
        let adapter = OpenAiAdapter::new("test-key");
        let mut request = Request::new("gpt-5", vec![ChatMessage::user("hi")]);
        request.grounded = true;
        request.json_mode = true;

        let body = adapter.build_body(&request);
        let instructions = body["instructions"].as_str().unwrap();
        assert!(instructions.contains("single valid JSON object"));
    }

    #[test]
    fn retry_body_drops_tools_and_adds_plain_text_hint() {
        let adapter = OpenAiAdapter::new("test-key");
        let mut request = Request::new("gpt-5", vec![ChatMessage::user("hi")]);
        request.grounded = true;

        let retry_body = adapter.build_retry_body(&request);
        assert!(retry_body.get("tools").is_none());
        assert!(retry_body["instructions"]
            .as_str()
            .unwrap()
            .contains("plain text without using tools"));
    }
}
