//! Vertex AI adapter (spec §4.6): the real `google-cloud-aiplatform-v1` SDK
//! with Workload Identity Federation / Application Default Credentials via
//! `google-cloud-auth`, mirroring the client construction and builder-style
//! request assembly the teacher's `rig-vertexai` crate uses.
//!
//! Grounded + JSON output is a single Forced Function Calling call (spec §9
//! open question, resolved against Vertex's older two-step grounded-then-
//! reformat pattern — see `DESIGN.md`).

use std::sync::Arc;

use google_cloud_aiplatform_v1 as vertexai;
use google_cloud_auth::credentials::Credentials;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::error::AdapterError;
use crate::providers::google_shared;
use crate::providers::{AdapterResponse, ProviderAdapter};
use crate::request::{Request, Role};

pub struct VertexAdapter {
    project: String,
    location: String,
    credentials: Option<Credentials>,
    enforce_wif: bool,
    client: Arc<OnceCell<vertexai::client::PredictionService>>,
}

impl VertexAdapter {
    pub fn new(project: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            location: location.into(),
            credentials: None,
            enforce_wif: false,
            client: Arc::new(OnceCell::new()),
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Require Workload Identity Federation credentials (spec §4.6.3): when
    /// set, ADC-style service-account-key or user-credential files are
    /// rejected fail-fast rather than silently used in production.
    pub fn enforce_wif(mut self, enforce: bool) -> Self {
        self.enforce_wif = enforce;
        self
    }

    /// Fail fast when WIF is required but the credentials resolved by ADC
    /// aren't of type `external_account` (spec §4.6.3). The googleapis
    /// credential JSON exposes its kind via a top-level `"type"` field;
    /// this crate doesn't introspect the live `Credentials` handle itself,
    /// it checks the file ADC would load, the same thing `gcloud auth
    /// application-default login` and WIF config produce.
    fn check_wif_enforcement(&self) -> Result<(), AdapterError> {
        if !self.enforce_wif {
            return Ok(());
        }

        let Ok(path) = std::env::var("GOOGLE_APPLICATION_CREDENTIALS") else {
            return Err(AdapterError::permanent(
                "WIF is required (VERTEX_ENFORCE_WIF=true) but GOOGLE_APPLICATION_CREDENTIALS is unset. \
                 Set WIF_CREDENTIALS_JSON secret and point GOOGLE_APPLICATION_CREDENTIALS at it."
                    .to_string(),
            ));
        };

        let raw = std::fs::read_to_string(&path).map_err(|e| {
            AdapterError::permanent(format!("failed to read credentials file at {path}: {e}"))
        })?;
        let parsed: Value = serde_json::from_str(&raw)
            .map_err(|e| AdapterError::permanent(format!("credentials file at {path} is not valid JSON: {e}")))?;
        let credential_type = parsed.get("type").and_then(|v| v.as_str()).unwrap_or("");

        if credential_type != "external_account" {
            return Err(AdapterError::permanent(format!(
                "WIF is required (VERTEX_ENFORCE_WIF=true) but credentials at {path} are of type \
                 '{credential_type}', not 'external_account'. Set WIF_CREDENTIALS_JSON secret."
            )));
        }

        Ok(())
    }

    async fn get_client(&self) -> Result<&vertexai::client::PredictionService, AdapterError> {
        self.check_wif_enforcement()?;
        self.client
            .get_or_try_init(|| async {
                let mut builder = vertexai::client::PredictionService::builder();
                if let Some(creds) = self.credentials.clone() {
                    builder = builder.with_credentials(creds);
                }
                builder
                    .build()
                    .await
                    .map_err(|e| AdapterError::permanent(format!("failed to build Vertex AI client: {e}")))
            })
            .await
    }

    fn model_path(&self, model: &str) -> String {
        if model.contains('/') {
            model.to_string()
        } else {
            format!(
                "projects/{}/locations/{}/publishers/google/models/{}",
                self.project, self.location, model
            )
        }
    }

    fn build_contents(&self, request: &Request) -> Vec<vertexai::model::Content> {
        request
            .messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "model",
                    Role::System => unreachable!("system messages filtered above"),
                };
                vertexai::model::Content::new()
                    .set_role(role)
                    .set_parts([vertexai::model::Part::new().set_text(m.content.clone())])
            })
            .collect()
    }

    fn build_system_instruction(&self, request: &Request) -> Option<vertexai::model::Content> {
        let text: String = request
            .system_messages()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        if text.is_empty() {
            return None;
        }
        Some(
            vertexai::model::Content::new()
                .set_role("user")
                .set_parts([vertexai::model::Part::new().set_text(text)]),
        )
    }

    /// Forced Function Calling tools for a grounded request: always a
    /// `google_search` retrieval tool, plus a `SchemaFunction` declaration
    /// when JSON output is also required.
    fn build_tools(&self, request: &Request) -> Vec<vertexai::model::Tool> {
        let mut tools = vec![vertexai::model::Tool::new().set_google_search(vertexai::model::GoogleSearch::new())];

        if request.json_mode {
            let declaration = vertexai::model::FunctionDeclaration::new()
                .set_name(google_shared::SCHEMA_FUNCTION_NAME)
                .set_description("Emit the final answer in the required structured shape.")
                .set_parameters_json_schema(serde_json::json!({ "type": "object" }));
            tools.push(vertexai::model::Tool::new().set_function_declarations([declaration]));
        }

        tools
    }

    /// `mode` is `Any` pinned to the schema function when JSON output is
    /// required, `Auto` otherwise — never a bare `"REQUIRED"` literal.
    fn build_tool_config(&self, request: &Request) -> vertexai::model::ToolConfig {
        let function_calling_config = if request.json_mode {
            vertexai::model::FunctionCallingConfig::new()
                .set_mode(vertexai::model::function_calling_config::Mode::Any)
                .set_allowed_function_names([google_shared::SCHEMA_FUNCTION_NAME.to_string()])
        } else {
            vertexai::model::FunctionCallingConfig::new()
                .set_mode(vertexai::model::function_calling_config::Mode::Auto)
        };

        vertexai::model::ToolConfig::new().set_function_calling_config(function_calling_config)
    }
}

impl ProviderAdapter for VertexAdapter {
    async fn complete(&self, request: &Request) -> Result<AdapterResponse, AdapterError> {
        let client = self.get_client().await?;
        let model_path = self.model_path(&request.model);
        let contents = self.build_contents(request);
        let system_instruction = self.build_system_instruction(request);

        let mut builder = client.generate_content().set_model(&model_path).set_contents(contents);

        if let Some(instruction) = system_instruction {
            builder = builder.set_system_instruction(instruction);
        }

        if let Some(temperature) = request.meta.temperature {
            let mut config = vertexai::model::GenerationConfig::new().set_temperature(temperature as f32);
            if let Some(max_tokens) = request.meta.max_output_tokens {
                config = config.set_max_output_tokens(max_tokens as i32);
            }
            builder = builder.set_generation_config(config);
        }

        if request.grounded {
            builder = builder
                .set_tools(self.build_tools(request))
                .set_tool_config(self.build_tool_config(request));
        }

        let response = builder
            .send()
            .await
            .map_err(|e| AdapterError::from_sdk_error(&e))?;

        let mut raw_body = serde_json::to_value(&response)
            .map_err(|e| AdapterError::permanent(format!("failed to serialize Vertex response: {e}")))?;
        if let Some(obj) = raw_body.as_object_mut() {
            obj.insert("_router_region".to_string(), serde_json::json!(self.location));
        }

        let content = Self::extract_content(&raw_body, request.json_mode);

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

impl VertexAdapter {
    fn extract_content(raw_body: &Value, json_mode: bool) -> String {
        if json_mode {
            google_shared::extract_schema_function_args(raw_body)
                .map(|v| v.to_string())
                .unwrap_or_else(|| google_shared::extract_text(raw_body))
        } else {
            google_shared::extract_text(raw_body)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_path_defaults_to_the_publisher_resource_path() {
        let adapter = VertexAdapter::new("my-project", "us-central1");
        assert_eq!(
            adapter.model_path("gemini-2.5-pro"),
            "projects/my-project/locations/us-central1/publishers/google/models/gemini-2.5-pro"
        );
    }

    #[test]
    fn model_path_passes_through_an_already_qualified_path() {
        let adapter = VertexAdapter::new("my-project", "us-central1");
        let full = "projects/other/locations/global/publishers/google/models/gemini-2.5-pro";
        assert_eq!(adapter.model_path(full), full);
    }

    #[test]
    fn wif_enforcement_is_a_no_op_when_disabled() {
        let adapter = VertexAdapter::new("my-project", "us-central1");
        assert!(adapter.check_wif_enforcement().is_ok());
    }

    #[test]
    fn wif_enforcement_fails_fast_without_credentials_file_env_var() {
        // SAFETY: test-local env mutation, no other test in this process
        // depends on GOOGLE_APPLICATION_CREDENTIALS being set.
        unsafe {
            std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");
        }
        let adapter = VertexAdapter::new("my-project", "us-central1").enforce_wif(true);
        let err = adapter.check_wif_enforcement().expect_err("must fail fast without ADC file");
        assert!(!err.transient);
        assert!(err.message.contains("WIF"));
    }

    #[test]
    fn wif_enforcement_rejects_non_external_account_credential_type() {
        let dir = std::env::temp_dir().join(format!("vertex-wif-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("adc.json");
        std::fs::write(&path, r#"{"type": "service_account"}"#).unwrap();

        // SAFETY: test-local env mutation scoped to this test's temp file.
        unsafe {
            std::env::set_var("GOOGLE_APPLICATION_CREDENTIALS", &path);
        }
        let adapter = VertexAdapter::new("my-project", "us-central1").enforce_wif(true);
        let err = adapter.check_wif_enforcement().expect_err("service_account must be rejected under WIF enforcement");
        assert!(err.message.contains("service_account"));

        unsafe {
            std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
