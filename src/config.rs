//! Environment-driven configuration (spec §6).
//!
//! Mirrors the teacher's `from_env()` convention (`client::ProviderClient`)
//! but returns a `Result` rather than panicking: a router is a long-lived
//! service, and a missing knob should fail a health check, not a random
//! in-flight request.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::RouterError;

fn config_error(var: &str, detail: impl std::fmt::Display) -> RouterError {
    RouterError::AuthMissing {
        remediation: format!("environment variable {var}: {detail}"),
    }
}

fn parse_csv_set(value: &str) -> HashSet<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_var(name: &str) -> Result<String, RouterError> {
    std::env::var(name).map_err(|e| config_error(name, e))
}

fn env_var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, RouterError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| config_error(name, "failed to parse")),
        Err(_) => Ok(default),
    }
}

/// Router-wide configuration, read once at startup (spec §6).
#[derive(Debug, Clone)]
pub struct Config {
    pub allowed_openai_models: HashSet<String>,
    pub allowed_vertex_models: HashSet<String>,
    pub allowed_gemini_models: HashSet<String>,

    pub als_max_chars: usize,
    pub als_seed_key_id: String,
    pub als_hmac_key: Vec<u8>,

    pub circuit_breaker_failure_threshold: u32,
    pub circuit_breaker_cooldown: Duration,

    pub timeout_ungrounded: Duration,
    pub timeout_grounded: Duration,

    pub vertex_location: String,
    pub vertex_enforce_wif: bool,

    /// Whether Google vendors may satisfy `GroundingMode::Required` with
    /// unlinked evidence rather than strictly anchored citations (spec §9
    /// open question: kept strict by default; see `DESIGN.md`).
    pub required_relax_for_google: bool,

    /// Whether `unlinked`/`redirect_only` citations are included in
    /// [`crate::response::Response::citations`] at all, or filtered out
    /// before the response leaves the router (spec §9: kept strict —
    /// unlinked evidence is diagnostic, not user-facing, by default).
    pub emit_unlinked: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, RouterError> {
        let allowed_openai_models = parse_csv_set(&env_var("ALLOWED_OPENAI_MODELS")?);
        let allowed_vertex_models = parse_csv_set(&env_var("ALLOWED_VERTEX_MODELS")?);
        let allowed_gemini_models = parse_csv_set(&env_var("ALLOWED_GEMINI_MODELS")?);

        let als_max_chars = env_parse_or("ALS_MAX_CHARS", 350usize)?;
        let als_seed_key_id = env_var_or("ALS_SEED_KEY_ID", "default");
        let als_hmac_key_hex = env_var("ALS_HMAC_KEY_HEX")?;
        let als_hmac_key = hex::decode(&als_hmac_key_hex).map_err(|e| config_error("ALS_HMAC_KEY_HEX", e))?;

        let circuit_breaker_failure_threshold = env_parse_or("CB_FAILURE_THRESHOLD", 5u32)?;
        let circuit_breaker_cooldown_secs = env_parse_or("CB_COOLDOWN_SECONDS", 60u64)?;

        let timeout_ungrounded_secs = env_parse_or("LLM_TIMEOUT_UNGROUNDED", 60u64)?;
        let timeout_grounded_secs = env_parse_or("LLM_TIMEOUT_GROUNDED", 120u64)?;

        let vertex_location = env_var_or("VERTEX_LOCATION", "us-central1");
        let vertex_enforce_wif = env_parse_or("VERTEX_ENFORCE_WIF", true)?;
        let required_relax_for_google = env_parse_or("REQUIRED_RELAX_FOR_GOOGLE", false)?;
        let emit_unlinked = env_parse_or("EMIT_UNLINKED_CITATIONS", false)?;

        Ok(Self {
            allowed_openai_models,
            allowed_vertex_models,
            allowed_gemini_models,
            als_max_chars,
            als_seed_key_id,
            als_hmac_key,
            circuit_breaker_failure_threshold,
            circuit_breaker_cooldown: Duration::from_secs(circuit_breaker_cooldown_secs),
            timeout_ungrounded: Duration::from_secs(timeout_ungrounded_secs),
            timeout_grounded: Duration::from_secs(timeout_grounded_secs),
            vertex_location,
            vertex_enforce_wif,
            required_relax_for_google,
            emit_unlinked,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_csv_set_trims_and_drops_empty() {
        let set = parse_csv_set(" gpt-5, gpt-5-chat-latest ,,");
        assert_eq!(set.len(), 2);
        assert!(set.contains("gpt-5"));
        assert!(set.contains("gpt-5-chat-latest"));
    }
}
