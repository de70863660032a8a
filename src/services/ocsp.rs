//! OCSP request encoding and response decoding (RFC 6960)
//!
//! Requests are unsigned and carry a single SHA-1 CertID. Responses are
//! walked just far enough to find the single response for our serial.
//! Responder signatures are not verified.

use sha1::{Digest, Sha1};

use crate::models::Certificate;
use crate::utils::{ViceError, ViceResult};

/// Content type of an OCSP request body
pub const OCSP_REQUEST_CONTENT_TYPE: &str = "application/ocsp-request";

/// Content type of an OCSP response body
pub const OCSP_RESPONSE_CONTENT_TYPE: &str = "application/ocsp-response";

/// AlgorithmIdentifier { id-sha1, NULL }
const SHA1_ALGORITHM: &[u8] = &[
    0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00,
];

/// Status of one certificate as reported by the responder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcspCertStatus {
    Good,
    Revoked,
    Unknown,
}

/// Minimal DER reader and writer
pub mod der {
    use crate::utils::{ViceError, ViceResult};

    pub const INTEGER: u8 = 0x02;
    pub const BIT_STRING: u8 = 0x03;
    pub const OCTET_STRING: u8 = 0x04;
    pub const NULL: u8 = 0x05;
    pub const OID: u8 = 0x06;
    pub const ENUMERATED: u8 = 0x0a;
    pub const GENERALIZED_TIME: u8 = 0x18;
    pub const SEQUENCE: u8 = 0x30;

    /// Context specific constructed tag `[n]`
    pub const fn context(n: u8) -> u8 {
        0xa0 | n
    }

    /// Context specific primitive tag `[n] IMPLICIT`
    pub const fn context_primitive(n: u8) -> u8 {
        0x80 | n
    }

    pub fn encode_length(out: &mut Vec<u8>, len: usize) {
        if len < 0x80 {
            out.push(len as u8);
            return;
        }
        let bytes = len.to_be_bytes();
        let skip = bytes.iter().take_while(|b| **b == 0).count();
        out.push(0x80 | (bytes.len() - skip) as u8);
        out.extend_from_slice(&bytes[skip..]);
    }

    /// Encode one tag-length-value element
    pub fn tlv(tag: u8, content: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(content.len() + 6);
        out.push(tag);
        encode_length(&mut out, content.len());
        out.extend_from_slice(content);
        out
    }

    /// Encode a SEQUENCE of already encoded elements
    pub fn sequence(elements: &[&[u8]]) -> Vec<u8> {
        tlv(SEQUENCE, &elements.concat())
    }

    /// Read one element, returning its tag, content and the remaining input
    pub fn read_tlv(input: &[u8]) -> ViceResult<(u8, &[u8], &[u8])> {
        let malformed = || ViceError::Ocsp("malformed DER".to_string());

        let (&tag, rest) = input.split_first().ok_or_else(malformed)?;
        let (&first, rest) = rest.split_first().ok_or_else(malformed)?;

        let (len, rest) = if first < 0x80 {
            (first as usize, rest)
        } else {
            let count = (first & 0x7f) as usize;
            if count == 0 || count > 4 || rest.len() < count {
                return Err(malformed());
            }
            let len = rest[..count]
                .iter()
                .fold(0usize, |acc, b| (acc << 8) | *b as usize);
            (len, &rest[count..])
        };

        if rest.len() < len {
            return Err(malformed());
        }
        Ok((tag, &rest[..len], &rest[len..]))
    }

    /// Read one element that must carry `tag`
    pub fn expect(input: &[u8], tag: u8) -> ViceResult<(&[u8], &[u8])> {
        let (found, content, rest) = read_tlv(input)?;
        if found != tag {
            return Err(ViceError::Ocsp(format!(
                "expected tag {:#04x}, found {:#04x}",
                tag, found
            )));
        }
        Ok((content, rest))
    }
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}

/// Encode an INTEGER from raw big-endian serial bytes
fn encode_serial(serial: &[u8]) -> Vec<u8> {
    let trimmed = strip_leading_zeros(serial);
    let mut content = Vec::with_capacity(trimmed.len() + 1);
    if trimmed.first().map_or(true, |b| b & 0x80 != 0) {
        content.push(0);
    }
    content.extend_from_slice(trimmed);
    der::tlv(der::INTEGER, &content)
}

/// The subjectPublicKey bits of a SubjectPublicKeyInfo, without the unused-bits octet
fn public_key_bits(spki: &[u8]) -> ViceResult<&[u8]> {
    let (spki, _) = der::expect(spki, der::SEQUENCE)?;
    let (_, rest) = der::expect(spki, der::SEQUENCE)?;
    let (bits, _) = der::expect(rest, der::BIT_STRING)?;
    bits.get(1..)
        .ok_or_else(|| ViceError::Ocsp("empty subject public key".to_string()))
}

/// Build an unsigned OCSP request for `cert` issued by `issuer`
pub fn build_request(cert: &Certificate, issuer: &Certificate) -> ViceResult<Vec<u8>> {
    let name_hash = Sha1::digest(issuer.subject_der());
    let key_hash = Sha1::digest(public_key_bits(issuer.spki_der())?);

    let cert_id = der::sequence(&[
        SHA1_ALGORITHM,
        &der::tlv(der::OCTET_STRING, &name_hash),
        &der::tlv(der::OCTET_STRING, &key_hash),
        &encode_serial(cert.serial()),
    ]);
    let request = der::sequence(&[&cert_id]);
    let request_list = der::sequence(&[&request]);
    let tbs_request = der::sequence(&[&request_list]);
    Ok(der::sequence(&[&tbs_request]))
}

/// Find the status of the certificate with `serial` in an OCSP response
pub fn parse_response(response: &[u8], serial: &[u8]) -> ViceResult<OcspCertStatus> {
    let (ocsp_response, _) = der::expect(response, der::SEQUENCE)?;
    let (status, rest) = der::expect(ocsp_response, der::ENUMERATED)?;
    match status {
        [0] => {}
        [code] => {
            return Err(ViceError::Ocsp(format!("responder returned status {}", code)));
        }
        _ => return Err(ViceError::Ocsp("invalid response status".to_string())),
    }

    let (response_bytes, _) = der::expect(rest, der::context(0))?;
    let (response_bytes, _) = der::expect(response_bytes, der::SEQUENCE)?;
    let (_, rest) = der::expect(response_bytes, der::OID)?;
    let (basic, _) = der::expect(rest, der::OCTET_STRING)?;

    let (basic, _) = der::expect(basic, der::SEQUENCE)?;
    let (mut data, _) = der::expect(basic, der::SEQUENCE)?;

    // Optional version, then the responder id by name or by key hash
    let (tag, _, after) = der::read_tlv(data)?;
    if tag == der::context(0) {
        data = after;
    }
    let (tag, _, after) = der::read_tlv(data)?;
    if tag != der::context(1) && tag != der::context(2) {
        return Err(ViceError::Ocsp("missing responder id".to_string()));
    }
    let (_, after) = der::expect(after, der::GENERALIZED_TIME)?;
    let (mut responses, _) = der::expect(after, der::SEQUENCE)?;

    let wanted = strip_leading_zeros(serial);
    while !responses.is_empty() {
        let (single, rest) = der::expect(responses, der::SEQUENCE)?;
        responses = rest;

        let (cert_id, after) = der::expect(single, der::SEQUENCE)?;
        let (_, id_rest) = der::expect(cert_id, der::SEQUENCE)?;
        let (_, id_rest) = der::expect(id_rest, der::OCTET_STRING)?;
        let (_, id_rest) = der::expect(id_rest, der::OCTET_STRING)?;
        let (found_serial, _) = der::expect(id_rest, der::INTEGER)?;
        if strip_leading_zeros(found_serial) != wanted {
            continue;
        }

        let (tag, _, _) = der::read_tlv(after)?;
        return match tag {
            t if t == der::context_primitive(0) => Ok(OcspCertStatus::Good),
            t if t == der::context(1) => Ok(OcspCertStatus::Revoked),
            t if t == der::context_primitive(2) => Ok(OcspCertStatus::Unknown),
            other => Err(ViceError::Ocsp(format!("unknown certificate status tag {:#04x}", other))),
        };
    }

    Err(ViceError::Ocsp(format!(
        "no response for serial {}",
        hex::encode(serial)
    )))
}
