//! Static `(vendor, model) -> Capabilities` lookup (spec §4.1).
//!
//! Hard-coded, not runtime-loaded: the whole point is that an unsupported
//! parameter combination can never reach a provider. Model name constants
//! follow the naming convention the teacher uses for its own provider
//! constants (e.g. `providers::openai::completion::GPT_4O`).

use std::collections::HashSet;

use crate::request::Vendor;
use crate::response::SourceType;

pub const GPT_5: &str = "gpt-5";
pub const GPT_5_CHAT_LATEST: &str = "gpt-5-chat-latest";
pub const GPT_4O: &str = "gpt-4o";
pub const GPT_4O_MINI: &str = "gpt-4o-mini";
pub const O3: &str = "o3";
pub const O3_MINI: &str = "o3-mini";

pub const GEMINI_2_5_PRO: &str = "gemini-2.5-pro";
pub const GEMINI_2_5_FLASH: &str = "gemini-2.5-flash";

/// A model's dropped/accepted parameter surface, resolved once per request
/// by [`crate::router::Router`] and never re-translated (spec §4.1).
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub allowed: bool,
    pub supports_reasoning_effort: bool,
    pub supports_reasoning_summary: bool,
    pub supports_thinking_budget: bool,
    pub include_thoughts_allowed: bool,
    pub supports_grounding: bool,
    /// Which [`SourceType`] values count as anchored for REQUIRED
    /// enforcement on this vendor (spec §4.1 — explicitly excludes
    /// `GroundingChunks` for Google vendors).
    pub anchored_citation_types: HashSet<SourceType>,
    /// Comma-joined allowlist for this vendor, for `MODEL_NOT_ALLOWED`
    /// remediation text (spec §8 scenario 3: "remediation string contains
    /// both allowed models").
    pub allowed_models_csv: String,
}

impl Capabilities {
    fn disallowed(allowed_models_csv: String) -> Self {
        Self {
            allowed: false,
            supports_reasoning_effort: false,
            supports_reasoning_summary: false,
            supports_thinking_budget: false,
            include_thoughts_allowed: false,
            supports_grounding: false,
            anchored_citation_types: HashSet::new(),
            allowed_models_csv,
        }
    }

    fn openai_anchored_set() -> HashSet<SourceType> {
        [SourceType::Annotation, SourceType::UrlCitation].into_iter().collect()
    }

    fn google_anchored_set() -> HashSet<SourceType> {
        [SourceType::DirectUri, SourceType::V1Join].into_iter().collect()
    }
}

/// A capability registry backed by an explicit allowlist per vendor (the
/// caller supplies these from `ALLOWED_OPENAI_MODELS` / `ALLOWED_VERTEX_MODELS`
/// / `ALLOWED_GEMINI_MODELS`, spec §6) plus the hard-coded capability facts
/// below.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    allowed_openai: HashSet<String>,
    allowed_vertex: HashSet<String>,
    allowed_gemini_direct: HashSet<String>,
}

impl CapabilityRegistry {
    pub fn new(
        allowed_openai: HashSet<String>,
        allowed_vertex: HashSet<String>,
        allowed_gemini_direct: HashSet<String>,
    ) -> Self {
        Self {
            allowed_openai,
            allowed_vertex,
            allowed_gemini_direct,
        }
    }

    /// Default registry for tests/examples: the allowlists named in spec §8
    /// scenario 3 and the teacher's own model constants for reasoning/
    /// thinking support facts.
    pub fn with_default_allowlists() -> Self {
        Self::new(
            [GPT_5.to_string(), GPT_5_CHAT_LATEST.to_string()].into_iter().collect(),
            [GEMINI_2_5_PRO.to_string()].into_iter().collect(),
            [GEMINI_2_5_PRO.to_string()].into_iter().collect(),
        )
    }

    pub fn capabilities(&self, vendor: Vendor, model: &str) -> Capabilities {
        match vendor {
            Vendor::Openai => self.openai_capabilities(model),
            Vendor::Vertex => self.google_capabilities(model, &self.allowed_vertex),
            Vendor::GeminiDirect => self.google_capabilities(model, &self.allowed_gemini_direct),
        }
    }

    fn openai_capabilities(&self, model: &str) -> Capabilities {
        if !self.allowed_openai.contains(model) {
            return Capabilities::disallowed(sorted_csv(&self.allowed_openai));
        }

        // Only the `o`-series reasoning models expose `reasoning.effort`/
        // `reasoning.summary`; chat-flavored gpt-4o/gpt-5-chat models do not.
        let is_reasoning_model = model == O3 || model == O3_MINI || model.starts_with("o1");
        let supports_reasoning_effort = is_reasoning_model;
        let supports_reasoning_summary = is_reasoning_model;

        Capabilities {
            allowed: true,
            supports_reasoning_effort,
            supports_reasoning_summary,
            supports_thinking_budget: false,
            include_thoughts_allowed: false,
            supports_grounding: true,
            anchored_citation_types: Capabilities::openai_anchored_set(),
            allowed_models_csv: sorted_csv(&self.allowed_openai),
        }
    }

    fn google_capabilities(&self, model: &str, allowlist: &HashSet<String>) -> Capabilities {
        if !allowlist.contains(model) {
            return Capabilities::disallowed(sorted_csv(allowlist));
        }

        // Only the 2.5 "thinking" generation exposes a thinking budget /
        // include_thoughts toggle; flash/pro share the same FFC + grounding
        // surface otherwise.
        let is_2_5 = model.contains("2.5");

        Capabilities {
            allowed: true,
            supports_reasoning_effort: false,
            supports_reasoning_summary: false,
            supports_thinking_budget: is_2_5,
            include_thoughts_allowed: is_2_5,
            supports_grounding: true,
            anchored_citation_types: Capabilities::google_anchored_set(),
            allowed_models_csv: sorted_csv(allowlist),
        }
    }
}

fn sorted_csv(models: &HashSet<String>) -> String {
    let mut sorted: Vec<&str> = models.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    sorted.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpt_4o_does_not_support_reasoning_effort() {
        let registry = CapabilityRegistry::new(
            [GPT_4O.to_string(), GPT_4O_MINI.to_string()].into_iter().collect(),
            HashSet::new(),
            HashSet::new(),
        );
        let caps = registry.capabilities(Vendor::Openai, GPT_4O);
        assert!(caps.allowed);
        assert!(!caps.supports_reasoning_effort);
    }

    #[test]
    fn unlisted_model_is_disallowed() {
        let registry = CapabilityRegistry::with_default_allowlists();
        let caps = registry.capabilities(Vendor::Openai, "gpt-3");
        assert!(!caps.allowed);
    }

    #[test]
    fn google_anchored_set_excludes_grounding_chunks() {
        let registry = CapabilityRegistry::with_default_allowlists();
        let caps = registry.capabilities(Vendor::Vertex, GEMINI_2_5_PRO);
        assert!(!caps.anchored_citation_types.contains(&SourceType::GroundingChunks));
        assert!(caps.anchored_citation_types.contains(&SourceType::DirectUri));
        assert!(caps.anchored_citation_types.contains(&SourceType::V1Join));
    }
}
