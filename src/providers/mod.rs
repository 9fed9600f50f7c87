//! Provider adapters (spec §4.6, §4.8).
//!
//! Each adapter turns a capability-gated [`crate::request::Request`] into a
//! vendor-specific wire payload, issues the call, and turns the raw
//! response back into the vendor-neutral pieces the router assembles into
//! a [`crate::response::Response`]. Adapters never retry across vendors;
//! within a vendor, HTTP-level retry is delegated to `reqwest-middleware`
//! (spec §4.9).

pub mod gemini_direct;
pub mod google_shared;
pub mod openai;
pub mod vertex;

use serde_json::Value;

use crate::error::AdapterError;
use crate::request::Request;

/// Outcome of a single adapter call: the raw provider JSON body plus enough
/// bookkeeping for the router to run citation extraction, grounding
/// detection, and telemetry without re-parsing vendor-specific shapes
/// itself.
pub struct AdapterResponse {
    pub content: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub raw_body: Value,
    /// `"initial"` unless the adapter had to fall back to a plain-text
    /// retry after tools were invoked but produced no text (spec §4.6.1,
    /// OpenAI only at present).
    pub text_source: &'static str,
}

/// The seam every concrete provider adapter implements (spec §4.6). Mirrors
/// the teacher's `CompletionModel::completion`, returning a native future
/// rather than boxing, since every adapter here is internal to this crate.
pub trait ProviderAdapter: Send + Sync {
    fn complete(
        &self,
        request: &Request,
    ) -> impl std::future::Future<Output = Result<AdapterResponse, AdapterError>> + Send;
}
