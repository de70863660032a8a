//! Pure checks over certificate and key material

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;

use crate::models::{Certificate, CertificatePublicKey};
use crate::utils::validation::normalize_host;

/// Whether the certificate is valid for `host`.
///
/// Only subject alternative names are considered. A wildcard matches
/// exactly one leftmost label: `*.a.com` matches `x.a.com` but neither
/// `a.com` nor `y.x.a.com`.
pub fn host_matches(cert: &Certificate, host: &str) -> bool {
    let host = normalize_host(host);
    if host.is_empty() {
        return false;
    }
    cert.dns_names()
        .iter()
        .any(|name| name_matches(&normalize_host(name), &host))
}

fn name_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && label != "*" && rest == base,
            None => false,
        },
        None => pattern == host,
    }
}

/// Whether the certificate expires within `min_validity_days` from now
pub fn expires_soon(cert: &Certificate, min_validity_days: u32) -> bool {
    expires_soon_at(cert, min_validity_days, Utc::now())
}

/// [`expires_soon`] evaluated at `now`. Expiring exactly on the horizon counts.
pub fn expires_soon_at(cert: &Certificate, min_validity_days: u32, now: DateTime<Utc>) -> bool {
    cert.not_after() <= now + Duration::days(i64::from(min_validity_days))
}

/// Whether the private key is the counterpart of the certificate's public key
pub fn key_and_cert_tally(key: &RsaPrivateKey, cert: &Certificate) -> bool {
    let expected = CertificatePublicKey::rsa(&key.n().to_bytes_be(), &key.e().to_bytes_be());
    *cert.public_key() == expected
}

/// Whether every wanted SAN is covered by the certificate
pub fn sans_covered(cert: &Certificate, sans: &BTreeSet<String>) -> bool {
    sans.iter().all(|san| host_matches(cert, san))
}
