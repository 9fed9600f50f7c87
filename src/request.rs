//! Caller-facing request shape (spec §3).
//!
//! `messages[*].content`, `model`, and `vendor` are immutable from the
//! caller's perspective: the router and adapters read them but never
//! rewrite them. ALS enrichment appends a new message; it never edits one.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Which hosted provider a request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    Openai,
    GeminiDirect,
    Vertex,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::Openai => "openai",
            Vendor::GeminiDirect => "gemini_direct",
            Vendor::Vertex => "vertex",
        }
    }

    /// Infer the vendor from a bare model string (spec §4.7 step 1).
    ///
    /// `gpt-`/`o`-series prefixes map to OpenAI; anything mentioning
    /// `gemini` (bare name or the `publishers/google/models/gemini-...`
    /// Vertex resource path) defaults to Vertex, since that is the
    /// production routing target — callers who want the direct Gemini API
    /// must say so explicitly via `Request::vendor`.
    pub fn infer_from_model(model: &str) -> Option<Vendor> {
        let lower = model.to_ascii_lowercase();
        if lower.starts_with("gpt-") || lower.starts_with("o1") || lower.starts_with("o3") || lower.starts_with("o4")
        {
            Some(Vendor::Openai)
        } else if lower.contains("gemini") {
            Some(Vendor::Vertex)
        } else {
            None
        }
    }
}

/// A single chat message. Role and content are opaque to the router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Whether evidence is mandatory for a grounded run (spec §3, §4.7 step 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GroundingMode {
    Auto,
    Required,
}

impl Default for GroundingMode {
    fn default() -> Self {
        GroundingMode::Auto
    }
}

/// Locale signals that trigger ALS enrichment (spec §3, §4.2).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlsContext {
    pub country_code: String,
    pub locale: Option<String>,
    pub timezone: Option<String>,
}

/// Free-form per-request hints. Capability-gated by the registry (spec §4.1);
/// anything the target model doesn't support is dropped, never translated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMeta {
    pub reasoning_effort: Option<String>,
    pub thinking_budget: Option<u32>,
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,

    /// ALS provenance, populated by the router after enrichment (spec §4.2
    /// step 7). Not set by the caller.
    #[serde(default)]
    pub als_provenance: Option<AlsProvenance>,
}

/// Persistent ALS provenance fields captured per run (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlsProvenance {
    pub als_block_text: String,
    pub als_block_sha256: String,
    pub als_variant_id: u32,
    pub seed_key_id: String,
    pub als_country: String,
    pub als_nfc_length: usize,
}

/// A vendor-neutral completion request.
#[derive(Debug, Clone)]
pub struct Request {
    pub vendor: Option<Vendor>,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub grounded: bool,
    pub grounding_mode: GroundingMode,
    pub json_mode: bool,
    pub als_context: Option<AlsContext>,
    pub meta: RequestMeta,
    pub template_id: Option<String>,
    pub run_id: Option<String>,
    pub tenant_id: Option<String>,

    /// Set to `true` exactly once ALS enrichment has run (spec §3:
    /// "applied exactly once per request lifetime"). Double application
    /// is a bug, not a retry-safe no-op in the caller's favor.
    pub(crate) als_applied: bool,

    /// Caller-owned cancellation signal (spec §5): when cancelled, the
    /// router races it against both the in-flight adapter SDK call and the
    /// citation resolver's HTTP fetches and fails the request with
    /// `RouterError::Cancelled` rather than waiting either out.
    pub cancellation_token: Option<CancellationToken>,
}

impl Request {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            vendor: None,
            model: model.into(),
            messages,
            grounded: false,
            grounding_mode: GroundingMode::Auto,
            json_mode: false,
            als_context: None,
            meta: RequestMeta::default(),
            template_id: None,
            run_id: None,
            tenant_id: None,
            als_applied: false,
            cancellation_token: None,
        }
    }

    /// Index of the first user message, used to splice the ALS block
    /// between the trailing system block(s) and the first user message
    /// (spec §3: `system -> ALS -> user`).
    pub(crate) fn first_user_index(&self) -> Option<usize> {
        self.messages.iter().position(|m| m.role == Role::User)
    }

    pub(crate) fn system_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().take_while(|m| m.role == Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_openai_from_prefix() {
        assert_eq!(Vendor::infer_from_model("gpt-5"), Some(Vendor::Openai));
        assert_eq!(Vendor::infer_from_model("o3-mini"), Some(Vendor::Openai));
    }

    #[test]
    fn infers_vertex_by_default_for_gemini() {
        assert_eq!(Vendor::infer_from_model("gemini-2.5-pro"), Some(Vendor::Vertex));
        assert_eq!(
            Vendor::infer_from_model("publishers/google/models/gemini-2.5-pro"),
            Some(Vendor::Vertex)
        );
    }

    #[test]
    fn unrecognized_model_has_no_inferred_vendor() {
        assert_eq!(Vendor::infer_from_model("llama-3"), None);
    }
}
