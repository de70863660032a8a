//! Test fixtures
//!
//! Certificates minted with rcgen on shared RSA keys, ingress and secret
//! builders, and DER encoded OCSP responses.

use once_cell::sync::Lazy;
use rcgen::{CertificateParams, CustomExtension, DnType};
use rsa::RsaPrivateKey;
use time::{Duration, OffsetDateTime};

use vice_president::models::{
    tid_annotation_key, state_annotation_key, Certificate, Ingress, IngressTls, Secret,
    ANNOTATION_MANAGED,
};
use vice_president::services::csr::signing_key_pair;
use vice_president::services::ocsp::der;
use vice_president::utils::pem;

static LEAF_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap());

static ISSUER_KEY: Lazy<RsaPrivateKey> =
    Lazy::new(|| RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap());

/// AuthorityInfoAccess extension OID
const OID_AUTHORITY_INFO_ACCESS: &[u64] = &[1, 3, 6, 1, 5, 5, 7, 1, 1];

/// id-ad-ocsp
const OID_AD_OCSP: &[u8] = &[0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01];

/// id-ad-caIssuers
const OID_AD_CA_ISSUERS: &[u8] = &[0x06, 0x08, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x02];

/// id-pkix-ocsp-basic
const OID_OCSP_BASIC: &[u8] = &[
    0x06, 0x09, 0x2b, 0x06, 0x01, 0x05, 0x05, 0x07, 0x30, 0x01, 0x01,
];

/// id-sha1 with NULL parameters
const SHA1_ALGORITHM: &[u8] = &[0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00];

pub const TEST_HOST: &str = "www.example.com";
pub const TEST_NAMESPACE: &str = "default";
pub const TEST_INGRESS: &str = "web";
pub const TEST_SECRET: &str = "web-tls";

/// Key of every leaf certificate built here
pub fn leaf_key() -> &'static RsaPrivateKey {
    &LEAF_KEY
}

/// Builder for test certificates
#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    common_name: String,
    sans: Vec<String>,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    serial: Option<u64>,
    issuer_url: Option<String>,
    ocsp_url: Option<String>,
}

impl CertificateBuilder {
    /// Certificate for `host` valid from yesterday for 90 days
    pub fn new(host: &str) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            common_name: host.to_string(),
            sans: vec![host.to_string()],
            not_before: now - Duration::days(1),
            not_after: now + Duration::days(90),
            serial: None,
            issuer_url: None,
            ocsp_url: None,
        }
    }

    pub fn common_name(mut self, common_name: &str) -> Self {
        self.common_name = common_name.to_string();
        self
    }

    pub fn sans(mut self, sans: &[&str]) -> Self {
        self.sans = sans.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn valid_for_days(mut self, days: i64) -> Self {
        self.not_after = OffsetDateTime::now_utc() + Duration::days(days);
        self
    }

    pub fn serial(mut self, serial: u64) -> Self {
        self.serial = Some(serial);
        self
    }

    /// Point the AuthorityInfoAccess extension at an issuer and a responder
    pub fn authority_info(mut self, issuer_url: &str, ocsp_url: &str) -> Self {
        self.issuer_url = Some(issuer_url.to_string());
        self.ocsp_url = Some(ocsp_url.to_string());
        self
    }

    pub fn build(self) -> Certificate {
        self.build_with(leaf_key())
    }

    pub fn build_with(self, key: &RsaPrivateKey) -> Certificate {
        let mut params = CertificateParams::new(self.sans.clone()).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, self.common_name.as_str());
        params.not_before = self.not_before;
        params.not_after = self.not_after;
        if let Some(serial) = self.serial {
            params.serial_number = Some(serial.into());
        }

        let mut descriptions = Vec::new();
        if let Some(ref url) = self.ocsp_url {
            descriptions.push(access_description(OID_AD_OCSP, url));
        }
        if let Some(ref url) = self.issuer_url {
            descriptions.push(access_description(OID_AD_CA_ISSUERS, url));
        }
        if !descriptions.is_empty() {
            let refs: Vec<&[u8]> = descriptions.iter().map(Vec::as_slice).collect();
            params.custom_extensions.push(CustomExtension::from_oid_content(
                OID_AUTHORITY_INFO_ACCESS,
                der::sequence(&refs),
            ));
        }

        let key_pair = signing_key_pair(key).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        Certificate::from_der(cert.der()).unwrap()
    }
}

fn access_description(method: &[u8], url: &str) -> Vec<u8> {
    // uniformResourceIdentifier [6] IA5String
    der::sequence(&[method, &der::tlv(der::context_primitive(6), url.as_bytes())])
}

/// Self-signed stand-in for the issuing CA
pub fn issuer_certificate() -> Certificate {
    let mut params = CertificateParams::new(Vec::<String>::new()).unwrap();
    params
        .distinguished_name
        .push(DnType::CommonName, "Example Issuing CA G3");
    let key_pair = signing_key_pair(&ISSUER_KEY).unwrap();
    let cert = params.self_signed(&key_pair).unwrap();
    Certificate::from_der(cert.der()).unwrap()
}

/// PEM of the leaf key
pub fn leaf_key_pem() -> String {
    pem::private_key_to_pem(leaf_key()).unwrap()
}

/// Secret holding `certificate` and the leaf key under the default fields
pub fn secret_with(certificate: &Certificate) -> Secret {
    let mut secret = Secret::new(TEST_NAMESPACE, TEST_SECRET);
    secret
        .data
        .insert("tls.crt".to_string(), certificate.to_pem().into_bytes());
    secret
        .data
        .insert("tls.key".to_string(), leaf_key_pem().into_bytes());
    secret
}

/// Managed ingress with one TLS entry for `hosts`
pub fn managed_ingress(hosts: &[&str]) -> Ingress {
    let mut ingress = Ingress {
        namespace: TEST_NAMESPACE.to_string(),
        name: TEST_INGRESS.to_string(),
        ..Default::default()
    };
    ingress
        .annotations
        .insert(ANNOTATION_MANAGED.to_string(), "true".to_string());
    ingress.tls.push(IngressTls {
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        secret_name: Some(TEST_SECRET.to_string()),
    });
    ingress
}

/// Annotate a pending transaction on `host`
pub fn with_pending_state(mut ingress: Ingress, host: &str, state: &str, tid: &str) -> Ingress {
    ingress
        .annotations
        .insert(state_annotation_key(host), state.to_string());
    ingress
        .annotations
        .insert(tid_annotation_key(host), tid.to_string());
    ingress
}

/// Certificate status inside an OCSP single response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspFixtureStatus {
    Good,
    Revoked,
}

/// Successful OCSP response reporting `status` for `serial`
pub fn ocsp_response(serial: &[u8], status: OcspFixtureStatus) -> Vec<u8> {
    let mut serial_content = serial.to_vec();
    if serial_content.first().map_or(true, |b| b & 0x80 != 0) {
        serial_content.insert(0, 0);
    }
    let cert_id = der::sequence(&[
        SHA1_ALGORITHM,
        &der::tlv(der::OCTET_STRING, &[1; 20]),
        &der::tlv(der::OCTET_STRING, &[2; 20]),
        &der::tlv(der::INTEGER, &serial_content),
    ]);
    let cert_status = match status {
        OcspFixtureStatus::Good => der::tlv(der::context_primitive(0), &[]),
        OcspFixtureStatus::Revoked => der::tlv(
            der::context(1),
            &der::tlv(der::GENERALIZED_TIME, b"20260101000000Z"),
        ),
    };
    let this_update = der::tlv(der::GENERALIZED_TIME, b"20260101000000Z");
    let single = der::sequence(&[&cert_id, &cert_status, &this_update]);

    let responder = der::tlv(der::context(2), &der::tlv(der::OCTET_STRING, &[3; 20]));
    let produced_at = der::tlv(der::GENERALIZED_TIME, b"20260101000000Z");
    let data = der::sequence(&[&responder, &produced_at, &der::sequence(&[&single])]);
    let basic = der::sequence(&[
        &data,
        &der::sequence(&[&[0x06, 0x01, 0x00]]),
        &der::tlv(der::BIT_STRING, &[0]),
    ]);
    let bytes = der::sequence(&[OID_OCSP_BASIC, &der::tlv(der::OCTET_STRING, &basic)]);
    der::sequence(&[
        &der::tlv(der::ENUMERATED, &[0]),
        &der::tlv(der::context(0), &bytes),
    ])
}

/// VICE XML response carrying a certificate
pub fn vice_certificate_response(certificate: &Certificate) -> String {
    format!(
        "<ViceResponse><StatusCode>0x00</StatusCode><Message>Success</Message><Certificate>{}</Certificate></ViceResponse>",
        certificate.to_pem()
    )
}

/// VICE XML response carrying only a transaction id
pub fn vice_pending_response(tid: &str) -> String {
    format!(
        "<ViceResponse><StatusCode>0x00</StatusCode><Message>Pending approval</Message><TransactionID>{}</TransactionID></ViceResponse>",
        tid
    )
}

/// VICE XML error response
pub fn vice_error_response(code: &str, message: &str) -> String {
    format!(
        "<ViceResponse><StatusCode>{}</StatusCode><Message>{}</Message></ViceResponse>",
        code, message
    )
}
