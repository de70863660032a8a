//! Input validation utilities

use once_cell::sync::Lazy;
use regex::Regex;

/// Regex for a single DNS label
static DNS_LABEL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9]([a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?$").unwrap()
});

/// Validate a DNS host name as used in an ingress TLS section.
///
/// A leading `*.` wildcard label is accepted.
pub fn validate_host(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }

    let name = host.strip_prefix("*.").unwrap_or(host);
    let name = name.strip_suffix('.').unwrap_or(name);
    !name.is_empty() && name.split('.').all(|label| DNS_LABEL_REGEX.is_match(label))
}

/// Normalize a host name for comparisons
pub fn normalize_host(host: &str) -> String {
    host.trim().trim_end_matches('.').to_ascii_lowercase()
}
