//! Mapping between certificate material and Secret data fields

use std::collections::BTreeMap;

use rsa::RsaPrivateKey;

use crate::models::{
    Certificate, CertificateMaterial, Secret, ANNOTATION_CERT_FIELD, ANNOTATION_KEY_FIELD,
};
use crate::utils::pem;
use crate::utils::{ViceError, ViceResult};

pub const DEFAULT_CERT_FIELD: &str = "tls.crt";
pub const DEFAULT_KEY_FIELD: &str = "tls.key";

/// Field receiving the configured root certificates
pub const CA_FIELD: &str = "ca.crt";

/// Suffix of the field staging the key of a pending request
pub const PENDING_KEY_SUFFIX: &str = ".pending";

/// Names of the Secret fields holding certificate chain and key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeys {
    pub cert: String,
    pub key: String,
}

impl Default for SecretKeys {
    fn default() -> Self {
        Self {
            cert: DEFAULT_CERT_FIELD.to_string(),
            key: DEFAULT_KEY_FIELD.to_string(),
        }
    }
}

impl SecretKeys {
    /// Field names honoring the per-ingress override annotations
    pub fn from_annotations(annotations: &BTreeMap<String, String>) -> Self {
        let field = |name: &str, default: &str| {
            annotations
                .get(name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .unwrap_or(default)
                .to_string()
        };
        Self {
            cert: field(ANNOTATION_CERT_FIELD, DEFAULT_CERT_FIELD),
            key: field(ANNOTATION_KEY_FIELD, DEFAULT_KEY_FIELD),
        }
    }

    /// Field staging the private key while a CA transaction is pending
    pub fn pending_key(&self) -> String {
        format!("{}{}", self.key, PENDING_KEY_SUFFIX)
    }
}

/// Certificate and key as found in a Secret
#[derive(Debug, Clone)]
pub struct SecretMaterial {
    pub certificate: Option<Certificate>,
    pub private_key: Option<RsaPrivateKey>,
}

/// Read certificate and key from the Secret.
///
/// Missing fields decode to `None`; both missing is [`ViceError::MissingKeyMaterial`].
/// Present but invalid fields are reported, the certificate first.
pub fn decode(secret: &Secret, keys: &SecretKeys) -> ViceResult<SecretMaterial> {
    let cert_bytes = secret.field(&keys.cert);
    let key_bytes = secret.field(&keys.key);

    if cert_bytes.is_none() && key_bytes.is_none() {
        return Err(ViceError::MissingKeyMaterial);
    }

    let certificate = cert_bytes.map(Certificate::from_pem).transpose()?;
    let private_key = key_bytes.map(pem::private_key_from_pem).transpose()?;

    Ok(SecretMaterial {
        certificate,
        private_key,
    })
}

/// Write the material's certificate chain and key into the Secret.
///
/// The leaf is followed by the intermediate certificate when one is set.
/// Root certificates, when configured, go to the `ca.crt` field.
/// A staged pending key is removed.
pub fn encode(secret: &mut Secret, keys: &SecretKeys, material: &CertificateMaterial) -> ViceResult<()> {
    let (certificate, private_key) = match (&material.certificate, &material.private_key) {
        (Some(certificate), Some(private_key)) => (certificate, private_key),
        _ => return Err(ViceError::MissingKeyMaterial),
    };

    let mut blocks = vec![certificate.to_pem()];
    if let Some(ref intermediate) = material.intermediate_certificate {
        blocks.push(intermediate.to_pem());
    }
    let chain = pem::concat_blocks(&blocks);
    let key = pem::private_key_to_pem(private_key)?;

    secret.data.insert(
        keys.cert.clone(),
        pem::strip_special_characters(chain.as_bytes()),
    );
    secret
        .data
        .insert(keys.key.clone(), pem::strip_special_characters(key.as_bytes()));
    if !material.root_certificates.is_empty() {
        let roots: Vec<String> = material
            .root_certificates
            .iter()
            .map(Certificate::to_pem)
            .collect();
        secret.data.insert(
            CA_FIELD.to_string(),
            pem::strip_special_characters(pem::concat_blocks(&roots).as_bytes()),
        );
    }
    secret.data.remove(&keys.pending_key());
    Ok(())
}

/// Stage the key of a pending request without touching the served fields
pub fn stage_pending_key(secret: &mut Secret, keys: &SecretKeys, key: &RsaPrivateKey) -> ViceResult<()> {
    let pem = pem::private_key_to_pem(key)?;
    secret
        .data
        .insert(keys.pending_key(), pem::strip_special_characters(pem.as_bytes()));
    Ok(())
}

/// The staged key of a pending request, if any
pub fn pending_key(secret: &Secret, keys: &SecretKeys) -> ViceResult<Option<RsaPrivateKey>> {
    secret
        .field(&keys.pending_key())
        .map(pem::private_key_from_pem)
        .transpose()
}
