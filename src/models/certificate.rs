//! Certificate and working material models

use std::collections::BTreeSet;

use chrono::{DateTime, TimeZone, Utc};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::oid_registry::asn1_rs::oid;
use x509_parser::prelude::{FromDer, X509Certificate};
use x509_parser::public_key::PublicKey;

use crate::utils::pem;
use crate::utils::validation::{normalize_host, validate_host};
use crate::utils::{ViceError, ViceResult};

/// Public key carried by a certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificatePublicKey {
    /// RSA key, big-endian modulus and exponent without leading zeros
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    /// Any other algorithm, kept as the raw SubjectPublicKeyInfo
    Other(Vec<u8>),
}

impl CertificatePublicKey {
    /// RSA key from big-endian components, leading zero bytes ignored
    pub fn rsa(modulus: &[u8], exponent: &[u8]) -> Self {
        CertificatePublicKey::Rsa {
            modulus: trim_leading_zeros(modulus),
            exponent: trim_leading_zeros(exponent),
        }
    }
}

/// A parsed X.509 certificate.
///
/// Owns its DER encoding together with the fields the lifecycle engine looks
/// at, so it can be moved between tasks without borrowing the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    common_name: Option<String>,
    dns_names: Vec<String>,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    serial: Vec<u8>,
    issuing_certificate_urls: Vec<String>,
    ocsp_servers: Vec<String>,
    public_key: CertificatePublicKey,
    spki_der: Vec<u8>,
    subject_der: Vec<u8>,
    issuer_der: Vec<u8>,
}

impl Certificate {
    /// Parse a DER encoded certificate
    pub fn from_der(der: &[u8]) -> ViceResult<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| ViceError::UnparsableCertificate(e.to_string()))?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(|cn| cn.to_string());

        let mut dns_names = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in san.value.general_names.iter() {
                if let GeneralName::DNSName(dns_name) = name {
                    dns_names.push(dns_name.to_string());
                }
            }
        }

        let ca_issuers = oid!(1.3.6 .1 .5 .5 .7 .48 .2);
        let ocsp = oid!(1.3.6 .1 .5 .5 .7 .48 .1);
        let mut issuing_certificate_urls = Vec::new();
        let mut ocsp_servers = Vec::new();
        for ext in cert.extensions() {
            if let ParsedExtension::AuthorityInfoAccess(aia) = ext.parsed_extension() {
                for desc in &aia.accessdescs {
                    let GeneralName::URI(uri) = &desc.access_location else {
                        continue;
                    };
                    if desc.access_method == ca_issuers {
                        issuing_certificate_urls.push(uri.to_string());
                    } else if desc.access_method == ocsp {
                        ocsp_servers.push(uri.to_string());
                    }
                }
            }
        }

        let public_key = match cert.public_key().parsed() {
            Ok(PublicKey::RSA(rsa)) => CertificatePublicKey::rsa(rsa.modulus, rsa.exponent),
            _ => CertificatePublicKey::Other(cert.public_key().raw.to_vec()),
        };

        Ok(Self {
            der: der.to_vec(),
            common_name,
            dns_names,
            not_before: timestamp(cert.validity().not_before.timestamp())?,
            not_after: timestamp(cert.validity().not_after.timestamp())?,
            serial: cert.raw_serial().to_vec(),
            issuing_certificate_urls,
            ocsp_servers,
            public_key,
            spki_der: cert.public_key().raw.to_vec(),
            subject_der: cert.subject().as_raw().to_vec(),
            issuer_der: cert.issuer().as_raw().to_vec(),
        })
    }

    /// Parse the first certificate of a PEM bundle
    pub fn from_pem(bytes: &[u8]) -> ViceResult<Self> {
        let certs = pem::certificates_from_pem(bytes)?;
        Self::from_der(&certs[0])
    }

    /// DER encoding
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// PEM encoding
    pub fn to_pem(&self) -> String {
        pem::encode(pem::CERTIFICATE_LABEL, &self.der)
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    /// DNS names of the subject alternative name extension
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    /// Normalized, sorted and deduplicated DNS names
    pub fn sorted_dns_names(&self) -> Vec<String> {
        self.dns_names
            .iter()
            .map(|name| normalize_host(name))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Raw serial number bytes as encoded in the certificate
    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    /// Serial number as lowercase hex
    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }

    /// SHA-256 fingerprint of the DER encoding, lowercase hex
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.der))
    }

    /// Issuing certificate URLs from the authority information access extension
    pub fn issuing_certificate_urls(&self) -> &[String] {
        &self.issuing_certificate_urls
    }

    /// OCSP responder URLs from the authority information access extension
    pub fn ocsp_servers(&self) -> &[String] {
        &self.ocsp_servers
    }

    pub fn public_key(&self) -> &CertificatePublicKey {
        &self.public_key
    }

    /// DER encoded SubjectPublicKeyInfo
    pub fn spki_der(&self) -> &[u8] {
        &self.spki_der
    }

    /// DER encoded subject distinguished name
    pub fn subject_der(&self) -> &[u8] {
        &self.subject_der
    }

    /// DER encoded issuer distinguished name
    pub fn issuer_der(&self) -> &[u8] {
        &self.issuer_der
    }
}

/// Working unit for one (ingress, host) reconciliation
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    host: String,
    sans: BTreeSet<String>,
    /// Current leaf certificate
    pub certificate: Option<Certificate>,
    /// Private key matching `certificate`, or the key of the request in flight
    pub private_key: Option<RsaPrivateKey>,
    /// PEM encoded CSR of the request in flight
    pub csr: Option<String>,
    /// Pending CA transaction id
    pub transaction_id: Option<String>,
    pub intermediate_certificate: Option<Certificate>,
    pub root_certificates: Vec<Certificate>,
}

impl CertificateMaterial {
    /// Create material for `host` with the given subject alternative names.
    ///
    /// The host is always part of the SAN set.
    pub fn new<I, S>(host: &str, sans: I) -> ViceResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let host = normalize_host(host);
        if !validate_host(&host) {
            return Err(ViceError::InvalidHost(host));
        }

        let mut material = Self {
            host,
            sans: BTreeSet::new(),
            certificate: None,
            private_key: None,
            csr: None,
            transaction_id: None,
            intermediate_certificate: None,
            root_certificates: Vec::new(),
        };
        for san in sans {
            material.add_san(san.as_ref());
        }
        material.ensure_host_in_sans();
        Ok(material)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Subject alternative names, always including the host
    pub fn sans(&self) -> &BTreeSet<String> {
        &self.sans
    }

    /// Add a SAN. Empty and invalid names are ignored.
    pub fn add_san(&mut self, san: &str) {
        let san = normalize_host(san);
        if validate_host(&san) {
            self.sans.insert(san);
        }
    }

    /// Re-add the host to the SAN set if it went missing
    pub fn ensure_host_in_sans(&mut self) {
        if !self.sans.contains(&self.host) {
            self.sans.insert(self.host.clone());
        }
    }

    /// Pending transaction id, if non-empty
    pub fn pending_transaction(&self) -> Option<&str> {
        self.transaction_id
            .as_deref()
            .map(str::trim)
            .filter(|tid| !tid.is_empty())
    }
}

fn timestamp(secs: i64) -> ViceResult<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or_else(|| ViceError::UnparsableCertificate(format!("invalid timestamp {}", secs)))
}

fn trim_leading_zeros(bytes: &[u8]) -> Vec<u8> {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[start..].to_vec()
}
