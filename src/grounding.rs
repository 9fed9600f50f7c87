//! Grounding Detector (spec §4.4).
//!
//! Computes `grounded_attempted`, `tool_call_count`, `tool_result_count` and
//! `grounded_effective` from a raw provider payload, plus a per-vendor
//! `why_not_grounded` reason code when effective grounding didn't happen —
//! asymmetric because OpenAI and Google expose tool invocation differently
//! in their response shapes.

use serde_json::Value;

use crate::request::Vendor;

/// Outcome of inspecting a provider response for tool/search activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroundingOutcome {
    pub grounded_attempted: bool,
    pub tool_call_count: u32,
    pub tool_result_count: u32,
    pub grounded_effective: bool,
    /// Set only when `grounded_effective` is `false` for a request where
    /// grounding was requested.
    pub why_not_grounded: Option<&'static str>,
}

pub struct GroundingDetector;

impl GroundingDetector {
    pub fn detect(vendor: Vendor, response_body: &Value, citations_found: usize) -> GroundingOutcome {
        match vendor {
            Vendor::Openai => Self::detect_openai(response_body, citations_found),
            Vendor::GeminiDirect | Vendor::Vertex => Self::detect_google(response_body, citations_found),
        }
    }

    /// OpenAI Responses API: a `web_search_call` output item means the tool
    /// was invoked. When the call itself carries a `results[]` array (some
    /// API versions embed it there), its length is the authoritative
    /// result count; otherwise `tool_result_count` falls back to whatever
    /// the citation extractor found in the accompanying message.
    fn detect_openai(response_body: &Value, citations_found: usize) -> GroundingOutcome {
        let output = response_body.get("output").and_then(|v| v.as_array());

        let web_search_calls: Vec<&Value> = output
            .map(|items| {
                items
                    .iter()
                    .filter(|item| item.get("type").and_then(|t| t.as_str()) == Some("web_search_call"))
                    .collect()
            })
            .unwrap_or_default();

        let tool_call_count = web_search_calls.len() as u32;
        let grounded_attempted = tool_call_count > 0;

        // Some response shapes embed a `results[]` array directly on the
        // `web_search_call` item; when present, sum its length instead of
        // trusting only the citations the extractor managed to anchor.
        let embedded_results: Option<usize> = if web_search_calls.is_empty() {
            None
        } else {
            Some(
                web_search_calls
                    .iter()
                    .filter_map(|call| call.get("results").and_then(|v| v.as_array()).map(|a| a.len()))
                    .sum(),
            )
        };

        let tool_result_count = embedded_results.unwrap_or(citations_found) as u32;
        let grounded_effective = grounded_attempted && citations_found > 0;

        let why_not_grounded = if grounded_effective {
            None
        } else if !grounded_attempted {
            Some("no_tool_call")
        } else if tool_result_count == 0 {
            // spec §4.4: "a completed web_search_call with empty results
            // yields ... why_not_grounded=\"web_search_empty_results\"".
            Some("web_search_empty_results")
        } else {
            Some("web_search_no_anchored_citations")
        };

        GroundingOutcome {
            grounded_attempted,
            tool_call_count,
            tool_result_count,
            grounded_effective,
            why_not_grounded,
        }
    }

    /// Gemini/Vertex: `groundingMetadata.webSearchQueries` (or the v1
    /// `searchEntryPoint`) signals the search tool ran; `groundingChunks`
    /// length is the result count. A populated `groundingMetadata` with zero
    /// chunks means the search ran but returned nothing.
    fn detect_google(response_body: &Value, citations_found: usize) -> GroundingOutcome {
        let metadata = response_body
            .get("candidates")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("groundingMetadata"));

        // `function_call` parts inside the candidate's content also count
        // as tool invocations (spec §4.4), independent of groundingMetadata.
        let function_call_count = response_body
            .get("candidates")
            .and_then(|v| v.as_array())
            .and_then(|arr| arr.first())
            .and_then(|c| c.get("content"))
            .and_then(|c| c.get("parts"))
            .and_then(|v| v.as_array())
            .map(|parts| parts.iter().filter(|p| p.get("functionCall").is_some()).count())
            .unwrap_or(0);

        let Some(metadata) = metadata else {
            let grounded_attempted = function_call_count > 0;
            return GroundingOutcome {
                grounded_attempted,
                tool_call_count: function_call_count as u32,
                tool_result_count: 0,
                grounded_effective: false,
                why_not_grounded: Some(if grounded_attempted {
                    "provider_returned_empty_evidence"
                } else {
                    "no_tool_call"
                }),
            };
        };

        let search_queries = metadata
            .get("webSearchQueries")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let has_join_citations = metadata
            .get("citations")
            .and_then(|v| v.as_array())
            .map(|a| !a.is_empty())
            .unwrap_or(false);

        let grounded_attempted = search_queries > 0 || has_join_citations || function_call_count > 0;
        let tool_call_count = (search_queries.max(function_call_count).max(usize::from(has_join_citations))) as u32;

        let chunk_count = metadata
            .get("groundingChunks")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let tool_result_count = chunk_count.max(citations_found) as u32;

        let grounded_effective = grounded_attempted && citations_found > 0;

        let why_not_grounded = if grounded_effective {
            None
        } else if !grounded_attempted {
            Some("no_tool_call")
        } else if chunk_count == 0 {
            // spec §4.4: "empty grounding_chunks[] with tool calls present
            // yields why_not_grounded=\"provider_returned_empty_evidence\"".
            Some("provider_returned_empty_evidence")
        } else {
            Some("chunks_present_but_none_anchored")
        };

        GroundingOutcome {
            grounded_attempted,
            tool_call_count,
            tool_result_count,
            grounded_effective,
            why_not_grounded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn openai_no_tool_call_is_not_attempted() {
        let body = json!({ "output": [{ "type": "message" }] });
        let outcome = GroundingDetector::detect(Vendor::Openai, &body, 0);
        assert!(!outcome.grounded_attempted);
        assert_eq!(outcome.why_not_grounded, Some("no_tool_call"));
    }

    #[test]
    fn openai_tool_call_without_citations_is_attempted_but_not_effective() {
        let body = json!({ "output": [{ "type": "web_search_call" }, { "type": "message" }] });
        let outcome = GroundingDetector::detect(Vendor::Openai, &body, 0);
        assert!(outcome.grounded_attempted);
        assert!(!outcome.grounded_effective);
        assert_eq!(outcome.why_not_grounded, Some("web_search_empty_results"));
    }

    #[test]
    fn google_search_queries_with_citations_is_effective() {
        let body = json!({
            "candidates": [{
                "groundingMetadata": {
                    "webSearchQueries": ["weather today"],
                    "groundingChunks": [{ "web": { "uri": "https://example.com" } }]
                }
            }]
        });
        let outcome = GroundingDetector::detect(Vendor::Vertex, &body, 1);
        assert!(outcome.grounded_attempted);
        assert!(outcome.grounded_effective);
        assert_eq!(outcome.why_not_grounded, None);
    }

    #[test]
    fn google_empty_search_results_has_specific_reason() {
        let body = json!({
            "candidates": [{
                "groundingMetadata": {
                    "webSearchQueries": ["weather today"],
                    "groundingChunks": []
                }
            }]
        });
        let outcome = GroundingDetector::detect(Vendor::Vertex, &body, 0);
        assert!(outcome.grounded_attempted);
        assert!(!outcome.grounded_effective);
        assert_eq!(outcome.why_not_grounded, Some("provider_returned_empty_evidence"));
    }
}
