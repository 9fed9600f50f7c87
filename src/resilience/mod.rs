//! Fleet-level resilience (spec §4.5): a per-`vendor:model` circuit breaker
//! and a lighter-weight pacer, both keyed identically so failures and
//! `Retry-After` hints for one model never throttle another. Strict
//! provider isolation holds at every layer here too — there is no
//! cross-vendor state of any kind.

mod circuit;
mod pacer;

pub use circuit::{CircuitBreaker, CircuitState};
pub use pacer::Pacer;

/// The key both [`CircuitBreaker`] and [`Pacer`] shard their state by.
pub fn vendor_model_key(vendor: &str, model: &str) -> String {
    format!("{vendor}:{model}")
}
