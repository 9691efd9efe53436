use thiserror::Error;

/// Highest registration price (USD) a domain may cost to be offered.
pub const PRICE_CAP: f64 = 20.0;

/// TLDs checked for every search, in display order.
pub const PRIMARY_TLDS: [&str; 6] = ["com", "family", "baby", "love", "life", "me"];

/// Upper bound on alternative candidates checked per search.
pub const MAX_ALTERNATIVE_CHECKS: usize = 10;

/// DNS label length limit.
pub const MAX_LABEL_LEN: usize = 63;

/// Shortest base name accepted by the search endpoint.
pub const MIN_BASE_NAME_LEN: usize = 2;

const PREFIXES: [&str; 4] = ["the", "little", "baby", "our"];
const SUFFIXES: [&str; 3] = ["family", "book", "story"];
const ALTERNATIVE_TLDS: [&str; 3] = ["me", "name", "us"];
const GIVEN_NAMES: [&str; 5] = ["rose", "marie", "grace", "james", "lee"];

/// Normalises free-form input into a registrar-agnostic base name.
///
/// The result is lowercase, contains only `[a-z0-9-]`, never starts or ends
/// with a hyphen and fits in a single DNS label. Unusable input yields an
/// empty string. Applying the function twice is the same as applying it once.
pub fn sanitize_base_name(raw: &str) -> String {
    let filtered: String = raw
        .to_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || *ch == '-')
        .collect();

    let mut trimmed = filtered.trim_matches('-').to_string();
    if trimmed.len() > MAX_LABEL_LEN {
        trimmed.truncate(MAX_LABEL_LEN);
        // truncation can expose a hyphen at the new end
        let end = trimmed.trim_end_matches('-').len();
        trimmed.truncate(end);
    }
    trimmed
}

/// Sanitises `raw` and rejects names shorter than [`MIN_BASE_NAME_LEN`].
pub fn validate_base_name(raw: &str) -> Result<String, NameError> {
    let clean = sanitize_base_name(raw);
    if clean.len() < MIN_BASE_NAME_LEN {
        return Err(NameError::TooShort { sanitized: clean });
    }
    Ok(clean)
}

/// Errors produced while validating a base name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("name must be at least 2 characters (letters, numbers, hyphens)")]
    TooShort { sanitized: String },
}

/// Returns `true` when the price is unknown or does not exceed [`PRICE_CAP`].
pub fn is_under_budget(price: Option<f64>) -> bool {
    price.map_or(true, |value| value <= PRICE_CAP)
}

/// Returns everything after the first dot of `domain` (`"a.co.uk"` -> `"co.uk"`).
pub fn tld_of(domain: &str) -> &str {
    domain.split_once('.').map_or("", |(_, tld)| tld)
}

/// Builds the deterministic list of alternative domains for `base_name`.
///
/// Families are emitted in a fixed order: prefixes, suffixes, extra TLDs and
/// appended given names. Callers check at most [`MAX_ALTERNATIVE_CHECKS`] of them.
pub fn generate_variations(base_name: &str) -> Vec<String> {
    let prefixed = PREFIXES
        .iter()
        .map(|prefix| format!("{prefix}{base_name}.com"));
    let suffixed = SUFFIXES
        .iter()
        .map(|suffix| format!("{base_name}{suffix}.com"));
    let other_tlds = ALTERNATIVE_TLDS
        .iter()
        .map(|tld| format!("{base_name}.{tld}"));
    let named = GIVEN_NAMES
        .iter()
        .map(|name| format!("{base_name}{name}.com"));

    prefixed
        .chain(suffixed)
        .chain(other_tlds)
        .chain(named)
        .collect()
}
