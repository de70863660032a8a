//! Certificate and key fixtures shared by unit tests

use once_cell::sync::Lazy;
use rcgen::{CertificateParams, DnType, KeyPair};
use rsa::RsaPrivateKey;
use time::{Duration, OffsetDateTime};

use crate::models::Certificate;
use crate::services::csr::signing_key_pair;

static RSA_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap());

static OTHER_RSA_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap());

/// Key used for most test certificates
pub fn rsa_key() -> &'static RsaPrivateKey {
    &RSA_KEY
}

/// A second key unrelated to [`rsa_key`]
pub fn other_rsa_key() -> &'static RsaPrivateKey {
    &OTHER_RSA_KEY
}

/// Self-signed certificate for `cn` valid from yesterday for `days` days
pub fn self_signed(cn: &str, sans: &[&str], days: i64) -> Certificate {
    let now = OffsetDateTime::now_utc();
    signed_with(rsa_key(), cn, sans, now - Duration::days(1), now + Duration::days(days))
}

/// Self-signed certificate with an explicit key and validity window
pub fn signed_with(
    key: &RsaPrivateKey,
    cn: &str,
    sans: &[&str],
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
) -> Certificate {
    let mut params =
        CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    params.not_before = not_before;
    params.not_after = not_after;

    let key_pair = signing_key_pair(key).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    Certificate::from_der(cert.der()).unwrap()
}

/// Self-signed certificate on a throwaway ECDSA key
pub fn ecdsa_self_signed(cn: &str, sans: &[&str]) -> Certificate {
    let mut params =
        CertificateParams::new(sans.iter().map(|s| s.to_string()).collect::<Vec<_>>()).unwrap();
    params.distinguished_name.push(DnType::CommonName, cn);
    let key_pair = KeyPair::generate().unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    Certificate::from_der(cert.der()).unwrap()
}
