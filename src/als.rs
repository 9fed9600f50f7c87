//! Ambient Location Signal builder (spec §4.2).
//!
//! Deterministic per `(country_code, seed_key_id)` pair via an
//! HMAC-SHA256-keyed variant selection over a *fixed* date placeholder
//! (never wall-clock time), so the same run always reproduces the same
//! ALS block on every process, machine, and day. Cryptographic provenance
//! (SHA-256 of the rendered NFC block) lets a caller verify after the fact
//! that enrichment ran unmodified.

use std::collections::HashMap;
use std::sync::OnceLock;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

use crate::error::RouterError;
use crate::request::{AlsContext, AlsProvenance, ChatMessage, Request, Role};

type HmacSha256 = Hmac<Sha256>;

/// Fixed date placeholder used both as the HMAC message suffix and as the
/// rendered sample date (spec §4.2 step 4: "a constant, not wall-clock
/// time — critical for determinism of the SHA-256"). Any real date would
/// do; this one is simply never changed.
const FIXED_DATE_YYYYMMDD: &str = "20240115";

/// A country's ordered list of pre-authored ambient-context variants. Each
/// `{date}` placeholder is filled with the country's local date-format
/// rendering of [`FIXED_DATE_YYYYMMDD`]; `{emergency}` and `{currency}` are
/// per-country constants. Every rendered variant here fits well under the
/// 350 NFC-char limit.
struct CountryProfile {
    variants: &'static [&'static str],
    date_sample: &'static str,
    emergency_number: &'static str,
    currency: &'static str,
    admin_cue: &'static str,
}

fn country_profiles() -> &'static HashMap<&'static str, CountryProfile> {
    static PROFILES: OnceLock<HashMap<&'static str, CountryProfile>> = OnceLock::new();
    PROFILES.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "US",
            CountryProfile {
                variants: &[
                    "Ambient context: the user is likely in the United States. Dates read as {date}, currency is {currency}, and the emergency number is {emergency}. Treat this as a soft locale signal, not a stated fact.",
                    "Local signal: United States. Sample date format {date}; currency {currency}; emergency services at {emergency}. Use only to prefer regionally appropriate defaults.",
                    "Administrative cue: {admin}. Sample date {date}; currency {currency}; emergency number {emergency}. Informational only.",
                ],
                date_sample: "01/15/2024",
                emergency_number: "911",
                currency: "USD",
                admin_cue: "federal/state administrative structure",
            },
        );
        m.insert(
            "DE",
            CountryProfile {
                variants: &[
                    "Ambient context: the user is likely in Germany. Dates read as {date}, currency is {currency}, and the emergency number is {emergency}. Treat this as a soft locale signal, not a stated fact.",
                    "Local signal: Germany. Sample date format {date}; currency {currency}; emergency services at {emergency}. Use only to prefer regionally appropriate defaults.",
                    "Administrative cue: {admin}. Sample date {date}; currency {currency}; emergency number {emergency}. Informational only.",
                ],
                date_sample: "15.01.2024",
                emergency_number: "112",
                currency: "EUR",
                admin_cue: "federal/Land administrative structure",
            },
        );
        m.insert(
            "GB",
            CountryProfile {
                variants: &[
                    "Ambient context: the user is likely in the United Kingdom. Dates read as {date}, currency is {currency}, and the emergency number is {emergency}. Treat this as a soft locale signal, not a stated fact.",
                    "Local signal: United Kingdom. Sample date format {date}; currency {currency}; emergency services at {emergency}. Use only to prefer regionally appropriate defaults.",
                    "Administrative cue: {admin}. Sample date {date}; currency {currency}; emergency number {emergency}. Informational only.",
                ],
                date_sample: "15/01/2024",
                emergency_number: "999",
                currency: "GBP",
                admin_cue: "devolved administrative structure",
            },
        );
        m.insert(
            "FR",
            CountryProfile {
                variants: &[
                    "Ambient context: the user is likely in France. Dates read as {date}, currency is {currency}, and the emergency number is {emergency}. Treat this as a soft locale signal, not a stated fact.",
                    "Local signal: France. Sample date format {date}; currency {currency}; emergency services at {emergency}. Use only to prefer regionally appropriate defaults.",
                    "Administrative cue: {admin}. Sample date {date}; currency {currency}; emergency number {emergency}. Informational only.",
                ],
                date_sample: "15/01/2024",
                emergency_number: "112",
                currency: "EUR",
                admin_cue: "departmental administrative structure",
            },
        );
        m.insert(
            "JP",
            CountryProfile {
                variants: &[
                    "Ambient context: the user is likely in Japan. Dates read as {date}, currency is {currency}, and the emergency number is {emergency}. Treat this as a soft locale signal, not a stated fact.",
                    "Local signal: Japan. Sample date format {date}; currency {currency}; emergency services at {emergency}. Use only to prefer regionally appropriate defaults.",
                    "Administrative cue: {admin}. Sample date {date}; currency {currency}; emergency number {emergency}. Informational only.",
                ],
                date_sample: "2024/01/15",
                emergency_number: "110",
                currency: "JPY",
                admin_cue: "prefectural administrative structure",
            },
        );
        m
    })
}

pub struct AlsBuilder {
    seed_key_id: String,
    hmac_key: Vec<u8>,
    max_chars: usize,
}

impl AlsBuilder {
    pub fn new(seed_key_id: impl Into<String>, hmac_key: Vec<u8>, max_chars: usize) -> Self {
        Self {
            seed_key_id: seed_key_id.into(),
            hmac_key,
            max_chars,
        }
    }

    /// Apply ALS enrichment in place (spec §4.2 steps 1-7). No-op if the
    /// request carries no [`AlsContext`], and no-op if the country code is
    /// not present in the template catalog (spec step 2: "if absent,
    /// return no ALS"). Splices a system message between the caller's own
    /// system block(s) and the first user message.
    ///
    /// # Invariants
    /// Must only be called once per request (`Request::als_applied`); the
    /// router enforces this, not this function.
    pub fn apply(&self, request: &mut Request) -> Result<(), RouterError> {
        let Some(ctx) = request.als_context.clone() else {
            return Ok(());
        };

        let country_code = ctx.country_code.to_ascii_uppercase();
        let Some(profile) = country_profiles().get(country_code.as_str()) else {
            return Ok(());
        };

        let variant_id = self.select_variant(&country_code, profile.variants.len());
        let rendered = self.render(profile, variant_id);
        let normalized: String = rendered.nfc().collect();
        let nfc_length = normalized.chars().count();

        if nfc_length > self.max_chars {
            return Err(RouterError::AlsBlockTooLong {
                limit: self.max_chars,
                actual: nfc_length,
                remediation: "shorten the ALS context or raise ALS_MAX_CHARS; the block is never truncated".to_string(),
            });
        }

        let sha256_hex = hex::encode(Sha256::digest(normalized.as_bytes()));

        let als_message = ChatMessage {
            role: Role::System,
            content: normalized.clone(),
        };

        let insert_at = request.first_user_index().unwrap_or(request.messages.len());
        request.messages.insert(insert_at, als_message);

        request.meta.als_provenance = Some(AlsProvenance {
            als_block_text: normalized,
            als_block_sha256: sha256_hex,
            als_variant_id: variant_id,
            seed_key_id: self.seed_key_id.clone(),
            als_country: country_code,
            als_nfc_length: nfc_length,
        });
        request.als_applied = true;

        Ok(())
    }

    /// Deterministic variant index: `HMAC-SHA256(seed_key, country_code ||
    /// date_yyyymmdd) mod N` (spec §4.2 step 3). `date_yyyymmdd` is the
    /// fixed placeholder, never wall-clock time, so this is stable across
    /// processes, machines, and real-world time — the universal invariant
    /// in spec §8 depends on `(country, seed_key_id)` alone.
    fn select_variant(&self, country_code: &str, variant_count: usize) -> u32 {
        let mut message = String::with_capacity(country_code.len() + FIXED_DATE_YYYYMMDD.len());
        message.push_str(country_code);
        message.push_str(FIXED_DATE_YYYYMMDD);

        let mut mac = HmacSha256::new_from_slice(&self.hmac_key).expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        let digest = mac.finalize().into_bytes();

        let first_eight: [u8; 8] = digest[0..8].try_into().expect("digest is 32 bytes");
        let value = u64::from_be_bytes(first_eight);
        (value % variant_count as u64) as u32
    }

    fn render(&self, profile: &CountryProfile, variant_id: u32) -> String {
        profile.variants[variant_id as usize]
            .replace("{date}", profile.date_sample)
            .replace("{emergency}", profile.emergency_number)
            .replace("{currency}", profile.currency)
            .replace("{admin}", profile.admin_cue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(country: &str) -> AlsContext {
        AlsContext {
            country_code: country.to_string(),
            locale: None,
            timezone: None,
        }
    }

    #[test]
    fn same_country_and_seed_key_selects_same_variant_across_processes() {
        let builder_a = AlsBuilder::new("seed-1", b"test-key".to_vec(), 350);
        let builder_b = AlsBuilder::new("seed-1", b"test-key".to_vec(), 350);

        // Different tenant/template/run identifiers must not perturb the
        // selection: the universal invariant is keyed on (country, seed_key_id)
        // alone (spec §8).
        let mut a = Request::new("gpt-5", vec![ChatMessage::user("hi")]);
        a.tenant_id = Some("tenant-a".to_string());
        a.template_id = Some("tmpl-1".to_string());
        a.run_id = Some("run-1".to_string());
        a.als_context = Some(ctx("US"));

        let mut b = Request::new("gpt-5", vec![ChatMessage::user("hi")]);
        b.tenant_id = Some("tenant-zzz-different".to_string());
        b.template_id = Some("other-template".to_string());
        b.run_id = Some("other-run".to_string());
        b.als_context = Some(ctx("US"));

        builder_a.apply(&mut a).unwrap();
        builder_b.apply(&mut b).unwrap();

        assert_eq!(
            a.meta.als_provenance.as_ref().unwrap().als_variant_id,
            b.meta.als_provenance.as_ref().unwrap().als_variant_id
        );
        assert_eq!(
            a.meta.als_provenance.as_ref().unwrap().als_block_sha256,
            b.meta.als_provenance.as_ref().unwrap().als_block_sha256
        );
    }

    #[test]
    fn different_seed_key_can_select_a_different_variant() {
        // Not a strict invariant (a collision is possible with only 2
        // variants) but documents that the seed key participates in the
        // HMAC, unlike the old tenant-keyed scheme.
        let builder_a = AlsBuilder::new("seed-1", b"key-one".to_vec(), 350);
        let builder_b = AlsBuilder::new("seed-1", b"key-two".to_vec(), 350);

        let mut a = Request::new("gpt-5", vec![ChatMessage::user("hi")]);
        a.als_context = Some(ctx("US"));
        let mut b = a.clone();

        builder_a.apply(&mut a).unwrap();
        builder_b.apply(&mut b).unwrap();

        // Both are deterministic; the HMAC key differs, so the hash does.
        assert_ne!(
            a.meta.als_provenance.as_ref().unwrap().als_block_sha256,
            b.meta.als_provenance.as_ref().unwrap().als_block_sha256
        );
    }

    #[test]
    fn als_message_is_spliced_before_first_user_message() {
        let builder = AlsBuilder::new("seed-1", b"test-key".to_vec(), 350);
        let mut request = Request::new(
            "gpt-5",
            vec![ChatMessage::system("be terse"), ChatMessage::user("hi")],
        );
        request.als_context = Some(ctx("DE"));

        builder.apply(&mut request).unwrap();

        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[0].role, Role::System);
        assert_eq!(request.messages[1].role, Role::System);
        assert_eq!(request.messages[2].role, Role::User);
        assert!(request.als_applied);
    }

    #[test]
    fn user_message_content_is_untouched_by_enrichment() {
        let builder = AlsBuilder::new("seed-1", b"test-key".to_vec(), 350);
        let mut request = Request::new("gpt-5", vec![ChatMessage::user("byte-identical please")]);
        request.als_context = Some(ctx("FR"));

        builder.apply(&mut request).unwrap();

        let user_message = request.messages.iter().find(|m| m.role == Role::User).unwrap();
        assert_eq!(user_message.content, "byte-identical please");
    }

    #[test]
    fn oversized_block_fails_closed_without_truncation() {
        let builder = AlsBuilder::new("seed-1", b"test-key".to_vec(), 10);
        let mut request = Request::new("gpt-5", vec![ChatMessage::user("hi")]);
        request.als_context = Some(ctx("US"));

        let err = builder.apply(&mut request).unwrap_err();
        assert!(matches!(err, RouterError::AlsBlockTooLong { .. }));
        assert_eq!(request.messages.len(), 1, "message list must be untouched on failure");
        assert!(!request.als_applied);
    }

    #[test]
    fn no_als_context_is_a_no_op() {
        let builder = AlsBuilder::new("seed-1", b"test-key".to_vec(), 350);
        let mut request = Request::new("gpt-5", vec![ChatMessage::user("hi")]);

        builder.apply(&mut request).unwrap();

        assert_eq!(request.messages.len(), 1);
        assert!(!request.als_applied);
    }

    #[test]
    fn unknown_country_is_a_no_op_not_an_error() {
        let builder = AlsBuilder::new("seed-1", b"test-key".to_vec(), 350);
        let mut request = Request::new("gpt-5", vec![ChatMessage::user("hi")]);
        request.als_context = Some(ctx("ZZ"));

        builder.apply(&mut request).unwrap();

        assert_eq!(request.messages.len(), 1);
        assert!(!request.als_applied);
    }
}
