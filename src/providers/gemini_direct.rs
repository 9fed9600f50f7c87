//! Direct Gemini API adapter (spec §4.6): HTTP against
//! `generativelanguage.googleapis.com`, retried at the transport layer by
//! `reqwest-middleware`/`reqwest-retry` rather than anything bespoke.

use reqwest_middleware::ClientWithMiddleware;
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde_json::{json, Value};

use crate::error::AdapterError;
use crate::providers::google_shared;
use crate::providers::{AdapterResponse, ProviderAdapter};
use crate::request::{Request, Role};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub struct GeminiDirectAdapter {
    http_client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
}

impl GeminiDirectAdapter {
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
        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                    Role::System => unreachable!("system messages filtered above"),
                };
                json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let system_instruction: Vec<&str> = request.system_messages().map(|m| m.content.as_str()).collect();

        let mut body = json!({
            "contents": contents,
        });

        if !system_instruction.is_empty() {
            body["system_instruction"] = json!({ "parts": [{ "text": system_instruction.join("\n\n") }] });
        }

        if request.grounded {
            let schema = if request.json_mode {
                Some(json!({ "type": "object" }))
            } else {
                None
            };
            body["tools"] = json!(google_shared::build_tools(schema.as_ref()));
            body["tool_config"] = google_shared::build_tool_config(request.json_mode);
        }

        let mut generation_config = json!({});
        if let Some(temperature) = request.meta.temperature {
            generation_config["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = request.meta.max_output_tokens {
            generation_config["maxOutputTokens"] = json!(max_tokens);
        }
        if generation_config.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
            body["generationConfig"] = generation_config;
        }

        body
    }
}

impl ProviderAdapter for GeminiDirectAdapter {
    async fn complete(&self, request: &Request) -> Result<AdapterResponse, AdapterError> {
        if request.model.to_ascii_lowercase().contains("flash") {
            return Err(AdapterError::permanent(format!(
                "model '{}' rejected: only gemini-2.5-pro is permitted on the direct Gemini adapter; \
                 route flash models through a different vendor/model combination",
                request.model
            )));
        }

        // Any number of leading System messages collapse into one
        // `system_instruction` string; what must never happen is more than
        // a single non-system (user) message reaching the wire (spec
        // §4.6.2: "exactly two messages are sent").
        let non_system_count = request.messages.iter().filter(|m| m.role != Role::System).count();
        assert_eq!(
            non_system_count, 1,
            "gemini direct adapter expects exactly one user message on the wire, got {non_system_count}"
        );

        let body = self.build_body(request);
        let url = format!("{}/models/{}:generateContent", self.base_url, request.model);

        let response = self
            .http_client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            return Err(AdapterError::from_response(status.as_u16(), &headers, text));
        }

        let raw_body: Value = response.json().await?;
        let content = if request.json_mode {
            google_shared::extract_schema_function_args(&raw_body)
                .map(|v| v.to_string())
                .unwrap_or_else(|| google_shared::extract_text(&raw_body))
        } else {
            google_shared::extract_text(&raw_body)
        };

        let usage = raw_body.get("usageMetadata");
        let prompt_tokens = usage
            .and_then(|u| u.get("promptTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let completion_tokens = usage
            .and_then(|u| u.get("candidatesTokenCount"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        Ok(AdapterResponse {
            content,
            prompt_tokens,
            completion_tokens,
            raw_body,
            text_source: "initial",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ChatMessage;

    #[test]
    fn build_body_splits_system_messages_into_system_instruction() {
        let adapter = GeminiDirectAdapter::new("test-key");
        let request = Request::new(
            "gemini-2.5-pro",
            vec![ChatMessage::system("be terse"), ChatMessage::user("hi")],
        );

        let body = adapter.build_body(&request);
        assert_eq!(body["contents"].as_array().unwrap().len(), 1);
        assert!(body["system_instruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("be terse"));
    }

    #[test]
    fn grounded_request_attaches_google_search_tool() {
        let adapter = GeminiDirectAdapter::new("test-key");
        let mut request = Request::new("gemini-2.5-pro", vec![ChatMessage::user("hi")]);
        request.grounded = true;

        let body = adapter.build_body(&request);
        assert!(body["tools"][0]["google_search"].is_object());
    }

    #[tokio::test]
    async fn flash_models_are_rejected_at_the_adapter_boundary() {
        let adapter = GeminiDirectAdapter::new("test-key");
        let request = Request::new("gemini-2.5-flash", vec![ChatMessage::user("hi")]);

        let err = adapter.complete(&request).await.expect_err("flash must be rejected");
        assert!(!err.transient);
        assert!(err.message.contains("flash"));
    }
}
