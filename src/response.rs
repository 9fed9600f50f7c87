//! Vendor-neutral response shape and the closed citation-source taxonomy
//! (spec §3).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Normalized token usage, regardless of the provider's own field names
/// (`usage_metadata`, `usage`, etc).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Closed set of citation shapes the extractor can produce (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// OpenAI inline annotation, generic `type` tag.
    Annotation,
    /// OpenAI inline annotation, `type: "url_citation"` tag.
    UrlCitation,
    /// Google citation carrying a direct URL.
    DirectUri,
    /// Google v1 `citations[].sourceId` joined to `citedSources[]`.
    V1Join,
    /// Google grounding chunk with a URI but no text span.
    GroundingChunks,
    /// Evidence without a text anchor, of unspecified origin.
    Unlinked,
    /// URL elided because the resolver budget (8 citations / 3s) was hit.
    RedirectOnly,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Annotation => "annotation",
            SourceType::UrlCitation => "url_citation",
            SourceType::DirectUri => "direct_uri",
            SourceType::V1Join => "v1_join",
            SourceType::GroundingChunks => "groundingChunks",
            SourceType::Unlinked => "unlinked",
            SourceType::RedirectOnly => "redirect_only",
        }
    }
}

/// One normalized citation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: Option<String>,
    pub snippet: Option<String>,
    pub source_type: SourceType,
    /// `true` only when a text span was present AND the URL resolved
    /// (spec §4.3 normalization rules).
    pub anchored: bool,
    pub text_offsets: Option<(u32, u32)>,
}

/// The final, vendor-neutral response returned by [`crate::router::Router::complete`].
#[derive(Debug, Clone)]
pub struct Response {
    pub content: String,
    pub success: bool,
    pub usage: Usage,
    pub citations: Vec<Citation>,
    pub metadata: HashMap<String, Value>,
    /// Monotonic-clock elapsed time; always set, even on error (spec §3).
    pub latency_ms: u64,
}

impl Response {
    pub fn empty_failure(latency_ms: u64) -> Self {
        Self {
            content: String::new(),
            success: false,
            usage: Usage::default(),
            citations: Vec::new(),
            metadata: HashMap::new(),
            latency_ms,
        }
    }
}
