//! RSA key generation and certificate signing requests

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;

use crate::config::SubjectConfig;
use crate::models::CertificateMaterial;
use crate::utils::{ViceError, ViceResult};

/// Modulus size of every generated key
pub const RSA_KEY_BITS: usize = 2048;

/// Generate a fresh RSA key on the blocking pool
pub async fn generate_private_key() -> ViceResult<RsaPrivateKey> {
    let key = tokio::task::spawn_blocking(|| {
        RsaPrivateKey::new(&mut rand::thread_rng(), RSA_KEY_BITS)
    })
    .await??;
    Ok(key)
}

/// Convert an RSA key into a key pair rcgen can sign with
pub fn signing_key_pair(key: &RsaPrivateKey) -> ViceResult<KeyPair> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| ViceError::Internal(format!("failed to encode private key: {}", e)))?;
    Ok(KeyPair::from_pem_and_sign_algo(&pem, &PKCS_RSA_SHA256)?)
}

/// Build a SHA-256 signed CSR for `host` covering `sans`
pub fn create_csr<'a, I>(
    key: &RsaPrivateKey,
    host: &str,
    sans: I,
    subject: &SubjectConfig,
) -> ViceResult<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut params = CertificateParams::new(sans.into_iter().cloned().collect::<Vec<_>>())?;

    let mut dn = DistinguishedName::new();
    for (ty, value) in [
        (DnType::CountryName, &subject.country),
        (DnType::StateOrProvinceName, &subject.province),
        (DnType::LocalityName, &subject.locality),
        (DnType::OrganizationName, &subject.organization),
        (DnType::OrganizationalUnitName, &subject.organizational_unit),
    ] {
        if !value.is_empty() {
            dn.push(ty, value.as_str());
        }
    }
    dn.push(DnType::CommonName, host);
    params.distinguished_name = dn;

    let key_pair = signing_key_pair(key)?;
    let csr = params.serialize_request(&key_pair)?;
    Ok(csr.pem()?)
}

/// Generate a new key and CSR for the material's host and SANs.
///
/// Every CA request gets a fresh key; the previous one is replaced.
pub async fn prepare_request(
    material: &mut CertificateMaterial,
    subject: &SubjectConfig,
) -> ViceResult<()> {
    material.ensure_host_in_sans();

    let key = generate_private_key().await?;
    let csr = create_csr(&key, material.host(), material.sans(), subject)?;

    tracing::debug!(host = %material.host(), sans = ?material.sans(), "Generated key and CSR");

    material.private_key = Some(key);
    material.csr = Some(csr);
    Ok(())
}
