//! Input sanitization and anti-abuse heuristics.
//!
//! Sanitizers are pure and total: they never fail, and degenerate input
//! yields an empty string or a safe default tag. Format checks belong to
//! [`crate::validation`], which runs after sanitization.

use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::LazyLock;

pub const MAX_STRING_LEN: usize = 1000;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_PHONE_DIGITS: usize = 15;
pub const MAX_REF_CODE_LEN: usize = 30;

/// Fallback tag for referral codes that cannot be salvaged.
pub const REFERRAL_FALLBACK: &str = "referral";

/// Fixed marketing-channel tags accepted as a lead origin.
pub const MARKETING_CHANNELS: [&str; 11] = [
    "google_ads",
    "facebook_ads",
    "instagram_ads",
    "linkedin_ads",
    "youtube_ads",
    "instagram_link_bio",
    "referral",
    "organic_search",
    "social_media",
    "email_marketing",
    "other",
];

static REF_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(REF_|VENDEDOR_)[A-Z0-9_]{3,20}$").expect("ref code regex is valid")
});

static INVALID_REF_CHARS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Z0-9_]").expect("ref char regex is valid"));

static REPEATED_UNDERSCORE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_{2,}").expect("underscore regex is valid"));

static DIGIT_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]{3,}").expect("digit run regex is valid"));

fn truncate_chars(input: &str, max: usize) -> &str {
    match input.char_indices().nth(max) {
        Some((idx, _)) => &input[..idx],
        None => input,
    }
}

/// Trims, strips `<`/`>` and caps the length at 1000 chars.
///
/// The output is a fixed point: sanitizing it again returns the same string.
pub fn sanitize_string(input: &str) -> String {
    let stripped: String = input
        .trim()
        .chars()
        .filter(|c| *c != '<' && *c != '>')
        .collect();
    truncate_chars(stripped.trim(), MAX_STRING_LEN)
        .trim_end()
        .to_string()
}

/// Lower-cases, trims and caps an email at 255 chars. Does not check the format.
pub fn sanitize_email(input: &str) -> String {
    let lowered = input.to_lowercase();
    truncate_chars(lowered.trim(), MAX_EMAIL_LEN)
        .trim_end()
        .to_string()
}

/// Keeps ASCII digits only, capped at 15 digits.
pub fn sanitize_phone(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_digit())
        .take(MAX_PHONE_DIGITS)
        .collect()
}

/// Whether `origin` is one of the fixed marketing-channel tags.
pub fn validate_origin(origin: &str) -> bool {
    MARKETING_CHANNELS.contains(&origin)
}

/// Exact (case-sensitive) match against the dynamic referral-code grammar.
pub fn is_dynamic_ref_code(code: &str) -> bool {
    REF_CODE_RE.is_match(code)
}

/// Accepts any marketing-channel tag (case-insensitive) or a `REF_`/`VENDEDOR_` code.
pub fn validate_ref_code(code: &str) -> bool {
    let clean = code.trim().to_uppercase();
    if clean.is_empty() {
        return false;
    }
    if validate_origin(&clean.to_lowercase()) {
        return true;
    }
    REF_CODE_RE.is_match(&clean)
}

/// Normalizes a free-form referral code.
///
/// The output is always a dynamic code matching `^(REF_|VENDEDOR_)[A-Z0-9_]{3,20}$`,
/// a lower-case marketing-channel tag, or [`REFERRAL_FALLBACK`].
pub fn sanitize_ref_code(input: &str) -> String {
    let upper = input.trim().to_uppercase();
    if upper.is_empty() {
        return "organic_search".to_string();
    }

    let replaced = INVALID_REF_CHARS_RE.replace_all(&upper, "_");
    let collapsed = REPEATED_UNDERSCORE_RE.replace_all(&replaced, "_");
    let clean = truncate_chars(&collapsed, MAX_REF_CODE_LEN);

    let as_tag = clean.to_lowercase();
    if validate_origin(&as_tag) {
        return as_tag;
    }
    if REF_CODE_RE.is_match(clean) {
        return clean.to_string();
    }

    tracing::warn!("Ref code sanitized to fallback: {} -> {}", clean, REFERRAL_FALLBACK);
    REFERRAL_FALLBACK.to_string()
}

/// Validate and normalize Brazilian phone number
///
/// Uses phonenumber library (port of Google's libphonenumber) to parse the
/// number with the BR region and return it in E.164 format (+5511987654321).
///
/// Returns: (is_valid, normalized_phone_or_error_msg)
pub fn validate_br_phone(raw: &str) -> (bool, String) {
    if raw.trim().is_empty() || raw.len() < 8 {
        return (false, "Phone too short".to_string());
    }

    match phonenumber::parse(Some(CountryId::BR), raw) {
        Ok(number) => {
            if phonenumber::is_valid(&number) {
                let formatted = number.format().mode(Mode::E164).to_string();
                tracing::debug!("Valid BR phone: {} -> {}", raw, formatted);
                (true, formatted)
            } else {
                (false, "Invalid Brazilian phone number".to_string())
            }
        }
        Err(e) => (false, format!("Parse error: {:?}", e)),
    }
}

/// Input to [`detect_suspicious_activity`].
#[derive(Debug, Clone, Copy)]
pub struct ActivitySample<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub whatsapp: Option<&'a str>,
    pub user_agent: Option<&'a str>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SuspicionReport {
    pub suspicious: bool,
    pub reasons: Vec<String>,
}

const PLACEHOLDER_DIGIT_RUNS: [&str; 4] = ["999999", "111111", "000000", "123456789"];

const BOT_USER_AGENT_MARKERS: [&str; 7] = [
    "bot",
    "crawler",
    "spider",
    "scraper",
    "curl",
    "wget",
    "python-requests",
];

/// Flags submissions that look automated or fake.
///
/// This is advisory: the caller decides whether to log or reject.
pub fn detect_suspicious_activity(sample: ActivitySample<'_>) -> SuspicionReport {
    let mut reasons = Vec::new();

    if sample.name.chars().count() < 2 {
        reasons.push("Nome muito curto".to_string());
    }
    if DIGIT_RUN_RE.is_match(sample.name) {
        reasons.push("Nome contém muitos números".to_string());
    }

    if sample.email.split('+').count() > 2 {
        reasons.push("Email com múltiplos sinais de mais".to_string());
    }
    let local_part = sample.email.split('@').next().unwrap_or_default();
    if local_part.chars().count() < 2 {
        reasons.push("Email com prefixo muito curto".to_string());
    }
    if let Some(pattern) = PLACEHOLDER_DIGIT_RUNS
        .iter()
        .find(|pattern| sample.email.contains(*pattern))
    {
        reasons.push(format!("Email com padrão falso ({})", pattern));
    }

    if let Some(whatsapp) = sample.whatsapp.filter(|w| !w.is_empty()) {
        let (valid, _) = validate_br_phone(&sanitize_phone(whatsapp));
        if !valid {
            reasons.push("WhatsApp não é um número brasileiro válido".to_string());
        }
    }

    if let Some(user_agent) = sample.user_agent {
        let lower = user_agent.to_lowercase();
        if BOT_USER_AGENT_MARKERS
            .iter()
            .any(|marker| lower.contains(marker))
        {
            reasons.push("User Agent suspeito".to_string());
        }
    }

    SuspicionReport {
        suspicious: !reasons.is_empty(),
        reasons,
    }
}

/// Stable 16-hex-char fingerprint of a browser profile.
pub fn generate_fingerprint(
    user_agent: &str,
    accept_language: &str,
    screen_resolution: Option<&str>,
) -> String {
    let combined = format!(
        "{}-{}-{}",
        user_agent,
        accept_language,
        screen_resolution.unwrap_or("unknown")
    );
    let digest = hex::encode(Sha256::digest(combined.as_bytes()));
    digest[..16].to_string()
}

/// Short digest of a client identifier, safe to put in audit logs.
pub fn redact_identifier(identifier: &str) -> String {
    let digest = hex::encode(Sha256::digest(identifier.as_bytes()));
    digest[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_string_strips_angle_brackets() {
        assert_eq!(sanitize_string("  <b>Ana</b>  "), "bAna/b");
        assert_eq!(sanitize_string("< a"), "a");
        assert_eq!(sanitize_string(""), "");
    }

    #[test]
    fn test_sanitize_string_trims_before_truncating() {
        let padded = format!("{}{}", " ".repeat(500), "a".repeat(1000));
        let clean = sanitize_string(&padded);
        assert_eq!(clean.chars().count(), MAX_STRING_LEN);
        assert!(clean.chars().all(|c| c == 'a'));
    }

    #[test]
    fn test_sanitize_string_truncates() {
        let long = "a".repeat(1500);
        assert_eq!(sanitize_string(&long).len(), MAX_STRING_LEN);
    }

    #[test]
    fn test_sanitize_email() {
        assert_eq!(sanitize_email("  Ana@Example.COM "), "ana@example.com");
        let long = format!("{}@x.com", "a".repeat(300));
        assert_eq!(sanitize_email(&long).chars().count(), MAX_EMAIL_LEN);
    }

    #[test]
    fn test_sanitize_phone() {
        assert_eq!(sanitize_phone("(11) 91234-5678"), "11912345678");
        assert_eq!(sanitize_phone("+55 (11) 91234-5678 ramal 1234"), "551191234567812");
        assert_eq!(sanitize_phone("abc"), "");
    }

    #[test]
    fn test_ref_code_examples() {
        assert!(validate_ref_code("REF_AB12"));
        assert_eq!(sanitize_ref_code("ref_ab12"), "REF_AB12");
        assert_eq!(sanitize_ref_code("!!!"), REFERRAL_FALLBACK);
        assert_eq!(sanitize_ref_code("vendedor-joao silva"), "VENDEDOR_JOAO_SILVA");
        assert_eq!(sanitize_ref_code("REF__X__Y__Z"), "REF_X_Y_Z");
    }

    #[test]
    fn test_ref_code_channel_tags_are_lower_case() {
        assert_eq!(sanitize_ref_code("Google_Ads"), "google_ads");
        assert_eq!(sanitize_ref_code(""), "organic_search");
    }

    #[test]
    fn test_ref_code_too_long_falls_back() {
        assert_eq!(
            sanitize_ref_code("REF_ABCDEFGHIJKLMNOPQRSTUVWXYZ"),
            REFERRAL_FALLBACK
        );
    }

    #[test]
    fn test_validate_origin() {
        assert!(validate_origin("google_ads"));
        assert!(validate_origin("instagram_link_bio"));
        assert!(!validate_origin("GOOGLE_ADS"));
        assert!(!validate_origin("tiktok"));
    }

    #[test]
    fn test_detects_bot_user_agent() {
        let report = detect_suspicious_activity(ActivitySample {
            name: "Ana Silva",
            email: "ana@example.com",
            whatsapp: None,
            user_agent: Some("python-requests/2.31"),
        });
        assert!(report.suspicious);
        assert_eq!(report.reasons, vec!["User Agent suspeito".to_string()]);
    }

    #[test]
    fn test_clean_submission_is_not_suspicious() {
        let report = detect_suspicious_activity(ActivitySample {
            name: "Ana Silva",
            email: "ana@example.com",
            whatsapp: Some("(11) 98765-4321"),
            user_agent: Some("Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0)"),
        });
        assert!(!report.suspicious, "unexpected reasons: {:?}", report.reasons);
    }

    #[test]
    fn test_detects_fake_email_and_digit_names() {
        let report = detect_suspicious_activity(ActivitySample {
            name: "User 12345",
            email: "a+b+c999999@example.com",
            whatsapp: None,
            user_agent: None,
        });
        assert!(report.suspicious);
        assert_eq!(report.reasons.len(), 3);
    }

    #[test]
    fn test_validate_br_phone() {
        assert_eq!(
            validate_br_phone("(21) 98765-4321"),
            (true, "+5521987654321".to_string())
        );
        assert!(!validate_br_phone("123").0);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let a = generate_fingerprint("Mozilla/5.0", "pt-BR", None);
        let b = generate_fingerprint("Mozilla/5.0", "pt-BR", None);
        let c = generate_fingerprint("Mozilla/5.0", "pt-BR", Some("1920x1080"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }
}
