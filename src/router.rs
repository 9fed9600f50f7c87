//! The Unified Router (spec §4.7): the ten-step orchestration loop tying
//! every other module together. `complete()` is the crate's single public
//! entry point.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info_span, Instrument};

use crate::als::AlsBuilder;
use crate::capability::CapabilityRegistry;
use crate::citations::{CitationExtractor, CitationsAudit};
use crate::error::RouterError;
use crate::grounding::{GroundingDetector, GroundingOutcome};
use crate::providers::gemini_direct::GeminiDirectAdapter;
use crate::providers::openai::OpenAiAdapter;
use crate::providers::vertex::VertexAdapter;
use crate::providers::{AdapterResponse, ProviderAdapter};
use crate::request::{GroundingMode, Request, Vendor};
use crate::resilience::{vendor_model_key, CircuitBreaker, Pacer};
use crate::response::{Citation, Response, SourceType, Usage};
use crate::telemetry::{build_citations_audit_sample, SpanCombinator, TelemetryEmitter, TelemetryRecord};

/// The three concrete provider adapters the router can dispatch to. An enum
/// rather than `Box<dyn ProviderAdapter>`: [`ProviderAdapter::complete`]
/// returns a native `impl Future`, which isn't object-safe without boxing
/// every call, and the adapter set here is closed.
enum AdapterHandle {
    Openai(OpenAiAdapter),
    GeminiDirect(GeminiDirectAdapter),
    Vertex(VertexAdapter),
}

impl AdapterHandle {
    async fn complete(&self, request: &Request) -> Result<AdapterResponse, crate::error::AdapterError> {
        match self {
            AdapterHandle::Openai(adapter) => adapter.complete(request).await,
            AdapterHandle::GeminiDirect(adapter) => adapter.complete(request).await,
            AdapterHandle::Vertex(adapter) => adapter.complete(request).await,
        }
    }
}

/// Race `fut` against the caller's cancellation signal, if one was supplied
/// (spec §5). Dropping the losing branch is what actually stops the
/// in-flight work — the adapter's underlying HTTP future and the citation
/// resolver's `JoinSet` both abort their outstanding requests on drop.
async fn race_cancellation<F: std::future::Future>(
    token: Option<&tokio_util::sync::CancellationToken>,
    fut: F,
) -> Result<F::Output, RouterError> {
    match token {
        Some(token) => {
            tokio::select! {
                output = fut => Ok(output),
                _ = token.cancelled() => Err(RouterError::Cancelled),
            }
        }
        None => Ok(fut.await),
    }
}

/// `response_api` tag per spec §6 (one of the three enumerated values).
fn response_api_for(vendor: Vendor) -> &'static str {
    match vendor {
        Vendor::Openai => "responses_sdk",
        Vendor::GeminiDirect => "gemini_genai",
        Vendor::Vertex => "vertex_genai",
    }
}

/// Accumulates everything the router learns over the course of one
/// `complete()` call that telemetry (§6) and `Response.metadata` (§3) both
/// need, so the two don't drift out of sync. Built incrementally as
/// `complete_inner` progresses; still useful (partially populated) if the
/// call fails partway through.
#[derive(Default)]
struct RunAudit {
    response_api: Option<&'static str>,
    region: Option<String>,
    reasoning_hint_dropped: bool,
    thinking_hint_dropped: bool,
    circuit_breaker_status: &'static str,
    router_pacing_delay_ms: Option<u64>,
    grounding: Option<GroundingOutcome>,
    citations_audit: Option<CitationsAudit>,
    citations_audit_raw_excerpt: Option<serde_json::Value>,
    required_pass_reason: Option<&'static str>,
    grounded_evidence_unavailable: bool,
    text_source: &'static str,
    citations_count: usize,
    anchored_citations_count: usize,
    unlinked_sources_count: usize,
}

pub struct Router {
    capability_registry: CapabilityRegistry,
    als_builder: AlsBuilder,
    circuit_breaker: CircuitBreaker,
    pacer: Pacer,
    telemetry: Arc<dyn TelemetryEmitter>,
    timeout_ungrounded: std::time::Duration,
    timeout_grounded: std::time::Duration,
    required_relax_for_google: bool,
    emit_unlinked: bool,
    resolver_client: reqwest::Client,

    openai: Option<AdapterHandle>,
    gemini_direct: Option<AdapterHandle>,
    vertex: Option<AdapterHandle>,
}

pub struct RouterBuilder {
    capability_registry: CapabilityRegistry,
    als_builder: AlsBuilder,
    circuit_breaker_failure_threshold: u32,
    telemetry: Arc<dyn TelemetryEmitter>,
    timeout_ungrounded: std::time::Duration,
    timeout_grounded: std::time::Duration,
    required_relax_for_google: bool,
    emit_unlinked: bool,
    resolver_client: reqwest::Client,
    openai: Option<OpenAiAdapter>,
    gemini_direct: Option<GeminiDirectAdapter>,
    vertex: Option<VertexAdapter>,
}

impl RouterBuilder {
    pub fn new(capability_registry: CapabilityRegistry, als_builder: AlsBuilder) -> Self {
        Self {
            capability_registry,
            als_builder,
            circuit_breaker_failure_threshold: 5,
            telemetry: Arc::new(crate::telemetry::NoopTelemetryEmitter),
            timeout_ungrounded: std::time::Duration::from_secs(60),
            timeout_grounded: std::time::Duration::from_secs(120),
            required_relax_for_google: false,
            emit_unlinked: false,
            resolver_client: reqwest::Client::new(),
            openai: None,
            gemini_direct: None,
            vertex: None,
        }
    }

    pub fn circuit_breaker_failure_threshold(mut self, threshold: u32) -> Self {
        self.circuit_breaker_failure_threshold = threshold;
        self
    }

    pub fn telemetry(mut self, telemetry: Arc<dyn TelemetryEmitter>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub fn timeouts(mut self, ungrounded: std::time::Duration, grounded: std::time::Duration) -> Self {
        self.timeout_ungrounded = ungrounded;
        self.timeout_grounded = grounded;
        self
    }

    /// Whether Google vendors may satisfy `GroundingMode::Required` with
    /// unlinked (rather than strictly anchored) evidence (spec §6
    /// `REQUIRED_RELAX_FOR_GOOGLE`).
    pub fn required_relax_for_google(mut self, relax: bool) -> Self {
        self.required_relax_for_google = relax;
        self
    }

    /// Whether `unlinked`/`redirect_only`/`groundingChunks` citations are
    /// included in [`crate::response::Response::citations`] (spec §9:
    /// default `false`; never affects REQUIRED enforcement).
    pub fn emit_unlinked(mut self, emit: bool) -> Self {
        self.emit_unlinked = emit;
        self
    }

    /// Override the HTTP client used for citation-URL resolution (spec
    /// §4.3, §5). Mainly for tests that need to point it at a mock server's
    /// connector or install a shorter per-request timeout.
    pub fn resolver_client(mut self, client: reqwest::Client) -> Self {
        self.resolver_client = client;
        self
    }

    pub fn openai_adapter(mut self, adapter: OpenAiAdapter) -> Self {
        self.openai = Some(adapter);
        self
    }

    pub fn gemini_direct_adapter(mut self, adapter: GeminiDirectAdapter) -> Self {
        self.gemini_direct = Some(adapter);
        self
    }

    pub fn vertex_adapter(mut self, adapter: VertexAdapter) -> Self {
        self.vertex = Some(adapter);
        self
    }

    pub fn build(self) -> Router {
        Router {
            circuit_breaker: CircuitBreaker::new(self.circuit_breaker_failure_threshold),
            pacer: Pacer::new(),
            capability_registry: self.capability_registry,
            als_builder: self.als_builder,
            telemetry: self.telemetry,
            timeout_ungrounded: self.timeout_ungrounded,
            timeout_grounded: self.timeout_grounded,
            required_relax_for_google: self.required_relax_for_google,
            emit_unlinked: self.emit_unlinked,
            resolver_client: self.resolver_client,
            openai: self.openai.map(AdapterHandle::Openai),
            gemini_direct: self.gemini_direct.map(AdapterHandle::GeminiDirect),
            vertex: self.vertex.map(AdapterHandle::Vertex),
        }
    }
}

impl Router {
    /// Run the full ten-step pipeline (spec §4.7) for a single request.
    pub async fn complete(&self, mut request: Request) -> Result<Response, RouterError> {
        let start = Instant::now();
        let span = info_span!("router.complete");
        let mut audit = RunAudit {
            circuit_breaker_status: "closed",
            text_source: "initial",
            ..Default::default()
        };

        let result = self.complete_inner(&mut request, &span, &mut audit).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        self.emit_telemetry(&request, &result, &audit, elapsed_ms);

        result.map(|mut response| {
            response.latency_ms = elapsed_ms;
            response
        })
    }

    async fn complete_inner(
        &self,
        request: &mut Request,
        span: &tracing::Span,
        audit: &mut RunAudit,
    ) -> Result<Response, RouterError> {
        // Step 1: normalize & validate.
        let vendor = request
            .vendor
            .or_else(|| Vendor::infer_from_model(&request.model))
            .ok_or_else(|| RouterError::ModelNotAllowed {
                model: request.model.clone(),
                allowed: String::new(),
                remediation: "no vendor supplied and none could be inferred from the model name".to_string(),
            })?;
        request.vendor = Some(vendor);
        audit.response_api = Some(response_api_for(vendor));

        let capabilities = self.capability_registry.capabilities(vendor, &request.model);
        if !capabilities.allowed {
            return Err(RouterError::ModelNotAllowed {
                model: request.model.clone(),
                allowed: capabilities.allowed_models_csv.clone(),
                remediation: "add the model to the vendor's allowlist, or route to a model that is already allowed"
                    .to_string(),
            });
        }

        span.record_gen_ai_request(vendor.as_str(), &request.model);

        // Step 2: ALS enrichment.
        if !request.als_applied {
            self.als_builder.apply(request)?;
        }

        // Step 3: capability gate — drop unsupported hints rather than
        // translating them.
        if request.meta.reasoning_effort.is_some() && !capabilities.supports_reasoning_effort {
            request.meta.reasoning_effort = None;
            audit.reasoning_hint_dropped = true;
        }
        if request.meta.thinking_budget.is_some() && !capabilities.supports_thinking_budget {
            request.meta.thinking_budget = None;
            audit.thinking_hint_dropped = true;
        }

        // Step 4: circuit / pacing check.
        let key = vendor_model_key(vendor.as_str(), &request.model);
        if !self.circuit_breaker.allow(&key) {
            audit.circuit_breaker_status = self.circuit_breaker.state(&key).as_str();
            let reopen_at_epoch_ms = self.circuit_breaker.reopen_at_epoch_ms(&key).unwrap_or(0);
            return Err(RouterError::CircuitOpen {
                vendor_model: key,
                reopen_at_epoch_ms,
            });
        }
        audit.circuit_breaker_status = self.circuit_breaker.state(&key).as_str();
        if let Some(wait) = self.pacer.wait_remaining(&key) {
            audit.router_pacing_delay_ms = Some(wait.as_millis() as u64);
            return Err(RouterError::RateLimitedWait {
                wait_ms: wait.as_millis() as u64,
            });
        }

        // Step 5: adapter dispatch, under an outer deadline.
        let adapter = self.adapter_for(vendor)?;
        let deadline = if request.grounded {
            self.timeout_grounded
        } else {
            self.timeout_ungrounded
        };

        let call = adapter.complete(request).instrument(span.clone());
        let timed_call = tokio::time::timeout(deadline, call);
        let adapter_result = match race_cancellation(request.cancellation_token.as_ref(), timed_call).await? {
            Ok(result) => result,
            Err(_) => {
                return Err(RouterError::Timeout {
                    elapsed_ms: deadline.as_millis() as u64,
                })
            }
        };

        let adapter_response = match adapter_result {
            Ok(response) => {
                self.circuit_breaker.record_success(&key);
                audit.circuit_breaker_status = self.circuit_breaker.state(&key).as_str();
                response
            }
            Err(err) => {
                if err.transient {
                    self.circuit_breaker.record_failure(&key);
                    audit.circuit_breaker_status = self.circuit_breaker.state(&key).as_str();
                    if let Some(retry_after) = err.retry_after_secs {
                        self.pacer.record_wait(&key, std::time::Duration::from_secs(retry_after));
                    }
                }
                return Err(RouterError::Upstream(err));
            }
        };

        audit.text_source = adapter_response.text_source;
        audit.region = adapter_response
            .raw_body
            .get("_router_region")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        span.record_gen_ai_usage(adapter_response.prompt_tokens, adapter_response.completion_tokens);

        // Step 6 + 7: grounding detection, citation extraction, and
        // resolution. Extraction marks `anchored` from text-span presence
        // alone; `resolve` then confirms the target URL itself answers
        // before a citation is allowed to stay anchored (spec §4.3, §5).
        let (mut citations, mut citations_audit) = match vendor {
            Vendor::Openai => CitationExtractor::extract_openai(&adapter_response.raw_body),
            Vendor::GeminiDirect | Vendor::Vertex => CitationExtractor::extract_google(&adapter_response.raw_body),
        };
        let grounding_outcome = GroundingDetector::detect(vendor, &adapter_response.raw_body, citations.len());

        citations = race_cancellation(
            request.cancellation_token.as_ref(),
            CitationExtractor::resolve(&self.resolver_client, citations, &mut citations_audit),
        )
        .await?;

        if grounding_outcome.tool_call_count > 0 && citations.is_empty() {
            audit.citations_audit = Some(citations_audit.clone());
            audit.citations_audit_raw_excerpt = Some(adapter_response.raw_body.clone());
        }

        let anchored_count = citations
            .iter()
            .filter(|c| c.anchored && capabilities.anchored_citation_types.contains(&c.source_type))
            .count();
        let unlinked_count = citations.len() - anchored_count;

        // Recorded before REQUIRED enforcement so a rejected request still
        // carries the evidence counts that explain the rejection (spec §8
        // scenario 4: `unlinked_sources_count > 0` must be observable even
        // when the call ultimately fails).
        audit.citations_count = citations.len();
        audit.anchored_citations_count = anchored_count;
        audit.unlinked_sources_count = unlinked_count;

        // Step 8: REQUIRED enforcement, vendor-aware.
        if request.grounding_mode == GroundingMode::Required {
            if !grounding_outcome.grounded_attempted || grounding_outcome.tool_call_count == 0 {
                audit.required_pass_reason = Some("none");
                audit.grounding = Some(grounding_outcome);
                audit.citations_audit.get_or_insert(citations_audit);
                return Err(RouterError::GroundingRequiredError {
                    remediation: "set grounding_mode=AUTO, or use a model/vendor combination that supports grounding"
                        .to_string(),
                });
            }

            if grounding_outcome.tool_result_count == 0 {
                audit.required_pass_reason = Some("none");
                audit.grounding = Some(grounding_outcome);
                audit.citations_audit.get_or_insert(citations_audit);
                return Err(RouterError::GroundingEmptyResults {
                    remediation: "the provider invoked its search tool but returned no results; retry, or relax to AUTO"
                        .to_string(),
                });
            }

            if anchored_count == 0 {
                let relax_applies =
                    self.required_relax_for_google && matches!(vendor, Vendor::GeminiDirect | Vendor::Vertex) && unlinked_count > 0;
                if relax_applies {
                    audit.required_pass_reason = Some("unlinked_google");
                } else {
                    audit.required_pass_reason = Some("none");
                    audit.grounding = Some(grounding_outcome);
                    audit.citations_audit.get_or_insert(citations_audit);
                    return Err(RouterError::GroundingRequiredFailed {
                        remediation: "the provider returned evidence but none of it was anchored; retry, or relax to AUTO"
                            .to_string(),
                    });
                }
            } else {
                audit.required_pass_reason = Some("anchored");
            }
        } else if grounding_outcome.grounded_attempted && anchored_count == 0 {
            audit.grounded_evidence_unavailable = true;
        }

        span.record_gen_ai_response(grounding_outcome.grounded_effective, citations.len());

        // `emit_unlinked` gates what the caller sees, never REQUIRED
        // enforcement (spec §9): filter purely presentational citations
        // out of the response after enforcement has already run above.
        if !self.emit_unlinked {
            citations.retain(|c| {
                !matches!(c.source_type, SourceType::Unlinked | SourceType::RedirectOnly | SourceType::GroundingChunks)
            });
        }

        audit.citations_audit.get_or_insert(citations_audit);
        audit.grounding = Some(grounding_outcome);

        let metadata = self.build_response_metadata(request, audit, &citations, anchored_count, unlinked_count);

        Ok(Response {
            content: adapter_response.content,
            success: true,
            usage: Usage {
                prompt_tokens: adapter_response.prompt_tokens,
                completion_tokens: adapter_response.completion_tokens,
                total_tokens: adapter_response.prompt_tokens + adapter_response.completion_tokens,
            },
            citations,
            metadata,
            latency_ms: 0,
        })
    }

    fn build_response_metadata(
        &self,
        request: &Request,
        audit: &RunAudit,
        citations: &[Citation],
        anchored_count: usize,
        unlinked_count: usize,
    ) -> HashMap<String, serde_json::Value> {
        let mut metadata = HashMap::new();
        let grounding = audit.grounding.as_ref();

        metadata.insert("response_api".to_string(), serde_json::json!(audit.response_api));
        metadata.insert("region".to_string(), serde_json::json!(audit.region));
        metadata.insert("text_source".to_string(), serde_json::json!(audit.text_source));
        metadata.insert(
            "reasoning_hint_dropped".to_string(),
            serde_json::json!(audit.reasoning_hint_dropped),
        );
        metadata.insert(
            "thinking_hint_dropped".to_string(),
            serde_json::json!(audit.thinking_hint_dropped),
        );
        metadata.insert(
            "circuit_breaker_status".to_string(),
            serde_json::json!(audit.circuit_breaker_status),
        );
        metadata.insert(
            "grounding_mode_requested".to_string(),
            serde_json::json!(match request.grounding_mode {
                GroundingMode::Auto => "AUTO",
                GroundingMode::Required => "REQUIRED",
            }),
        );
        metadata.insert("grounded".to_string(), serde_json::json!(request.grounded));
        metadata.insert(
            "grounded_attempted".to_string(),
            serde_json::json!(grounding.map(|g| g.grounded_attempted).unwrap_or(false)),
        );
        metadata.insert(
            "grounded_effective".to_string(),
            serde_json::json!(grounding.map(|g| g.grounded_effective).unwrap_or(false)),
        );
        metadata.insert(
            "tool_call_count".to_string(),
            serde_json::json!(grounding.map(|g| g.tool_call_count).unwrap_or(0)),
        );
        metadata.insert(
            "tool_result_count".to_string(),
            serde_json::json!(grounding.map(|g| g.tool_result_count).unwrap_or(0)),
        );
        metadata.insert(
            "why_not_grounded".to_string(),
            serde_json::json!(grounding.and_then(|g| g.why_not_grounded)),
        );
        metadata.insert(
            "required_pass_reason".to_string(),
            serde_json::json!(audit.required_pass_reason),
        );
        metadata.insert(
            "grounded_evidence_unavailable".to_string(),
            serde_json::json!(audit.grounded_evidence_unavailable),
        );
        metadata.insert("citations_count".to_string(), serde_json::json!(citations.len()));
        metadata.insert("anchored_citations_count".to_string(), serde_json::json!(anchored_count));
        metadata.insert("unlinked_sources_count".to_string(), serde_json::json!(unlinked_count));
        let coverage = if citations.is_empty() {
            0.0
        } else {
            (anchored_count as f64 / citations.len() as f64) * 100.0
        };
        metadata.insert("anchored_coverage_pct".to_string(), serde_json::json!(coverage));

        if let Some(provenance) = &request.meta.als_provenance {
            metadata.insert("als_block_sha256".to_string(), serde_json::json!(provenance.als_block_sha256));
            metadata.insert("als_variant_id".to_string(), serde_json::json!(provenance.als_variant_id));
            metadata.insert("seed_key_id".to_string(), serde_json::json!(provenance.seed_key_id));
            metadata.insert("als_country".to_string(), serde_json::json!(provenance.als_country));
            metadata.insert("als_nfc_length".to_string(), serde_json::json!(provenance.als_nfc_length));
        }
        metadata.insert("als_present".to_string(), serde_json::json!(request.als_applied));

        metadata
    }

    fn adapter_for(&self, vendor: Vendor) -> Result<&AdapterHandle, RouterError> {
        let adapter = match vendor {
            Vendor::Openai => self.openai.as_ref(),
            Vendor::GeminiDirect => self.gemini_direct.as_ref(),
            Vendor::Vertex => self.vertex.as_ref(),
        };
        adapter.ok_or_else(|| RouterError::AuthMissing {
            remediation: format!("no adapter configured for vendor {}", vendor.as_str()),
        })
    }

    fn emit_telemetry(
        &self,
        request: &Request,
        result: &Result<Response, RouterError>,
        audit: &RunAudit,
        elapsed_ms: u64,
    ) {
        let vendor = request.vendor.map(|v| v.as_str().to_string()).unwrap_or_default();
        let provenance = request.meta.als_provenance.as_ref();
        let grounding = audit.grounding.as_ref();

        let grounding_mode_requested = match request.grounding_mode {
            GroundingMode::Auto => "AUTO",
            GroundingMode::Required => "REQUIRED",
        };

        // Only populated when a tool fired but extraction came back empty
        // (spec §6) — `citations_audit_raw_excerpt` is the marker for
        // exactly that condition (set once, at the point of extraction).
        let citations_audit_sample = audit
            .citations_audit_raw_excerpt
            .as_ref()
            .zip(audit.citations_audit.as_ref())
            .map(|(excerpt, a)| build_citations_audit_sample(a, excerpt));

        let mut record = TelemetryRecord {
            run_id: request.run_id.clone(),
            template_id: request.template_id.clone(),
            tenant_id: request.tenant_id.clone(),
            vendor,
            model: request.model.clone(),
            latency_ms: elapsed_ms,
            als_present: request.als_applied,
            als_block_sha256: provenance.map(|p| p.als_block_sha256.clone()),
            als_variant_id: provenance.map(|p| p.als_variant_id),
            seed_key_id: provenance.map(|p| p.seed_key_id.clone()),
            als_country: provenance.map(|p| p.als_country.clone()),
            als_nfc_length: provenance.map(|p| p.als_nfc_length),
            grounding_mode_requested,
            grounded: request.grounded,
            grounded_attempted: grounding.map(|g| g.grounded_attempted).unwrap_or(false),
            grounded_effective: grounding.map(|g| g.grounded_effective).unwrap_or(false),
            tool_call_count: grounding.map(|g| g.tool_call_count).unwrap_or(0),
            tool_result_count: grounding.map(|g| g.tool_result_count).unwrap_or(0),
            why_not_grounded: grounding.and_then(|g| g.why_not_grounded),
            required_pass_reason: audit.required_pass_reason,
            citations_shape_set: audit.citations_audit.as_ref().map(|a| a.shapes.clone()).unwrap_or_default(),
            citations_audit: citations_audit_sample,
            response_api: audit.response_api,
            provider_api_version: None,
            region: audit.region.clone(),
            reasoning_hint_dropped: audit.reasoning_hint_dropped,
            reasoning_hint_dropped_reason: audit.reasoning_hint_dropped.then_some("router_capability_gate"),
            thinking_hint_dropped: audit.thinking_hint_dropped,
            thinking_hint_dropped_reason: audit.thinking_hint_dropped.then_some("router_capability_gate"),
            circuit_breaker_status: audit.circuit_breaker_status,
            router_pacing_delay_ms: audit.router_pacing_delay_ms,
            meta: HashMap::new(),
            ..Default::default()
        };

        record.meta.insert(
            "grounded_evidence_unavailable".to_string(),
            serde_json::json!(audit.grounded_evidence_unavailable),
        );

        match result {
            Ok(response) => {
                record.success = true;
                record.error_type = None;
                record.prompt_tokens = response.usage.prompt_tokens;
                record.completion_tokens = response.usage.completion_tokens;
                record.total_tokens = response.usage.total_tokens;
                record.citations_count = response.citations.len();
                record.anchored_citations_count = response.citations.iter().filter(|c| c.anchored).count();
                record.unlinked_sources_count = record.citations_count - record.anchored_citations_count;
                record.anchored_coverage_pct = if record.citations_count == 0 {
                    0.0
                } else {
                    (record.anchored_citations_count as f64 / record.citations_count as f64) * 100.0
                };
            }
            Err(err) => {
                record.success = false;
                record.error_type = Some(err.error_type());
                record.citations_count = audit.citations_count;
                record.anchored_citations_count = audit.anchored_citations_count;
                record.unlinked_sources_count = audit.unlinked_sources_count;
                record.anchored_coverage_pct = if record.citations_count == 0 {
                    0.0
                } else {
                    (record.anchored_citations_count as f64 / record.citations_count as f64) * 100.0
                };
            }
        }

        self.telemetry.emit(record);
    }
}
