//! Vendor-neutral routing and orchestration for OpenAI, Gemini Direct, and
//! Vertex AI completions: Ambient Location Signal enrichment, capability
//! gating, vendor-aware grounding enforcement, citation extraction, and
//! per-`vendor:model` circuit breaking / pacing.
//!
//! The single entry point is [`router::Router::complete`]; everything else
//! in this crate exists to support that one call.

pub mod als;
pub mod capability;
pub mod citations;
pub mod config;
pub mod error;
pub mod grounding;
pub mod providers;
pub mod request;
pub mod resilience;
pub mod response;
pub mod router;
pub mod telemetry;

pub use error::{AdapterError, RouterError};
pub use request::{AlsContext, ChatMessage, GroundingMode, Request, Role, Vendor};
pub use response::{Citation, Response, SourceType};
pub use router::{Router, RouterBuilder};
