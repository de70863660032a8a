//! PEM codec for certificates and RSA private keys

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey, LineEnding};
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;

use super::error::{ViceError, ViceResult};

/// PEM label of an X.509 certificate block
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// PEM label of a PKCS#1 RSA private key block
pub const RSA_PRIVATE_KEY_LABEL: &str = "RSA PRIVATE KEY";

const PEM_LINE_WIDTH: usize = 64;

/// Encode DER bytes as a single PEM block
pub fn encode(label: &str, der: &[u8]) -> String {
    let body = STANDARD.encode(der);
    let mut pem = String::with_capacity(body.len() + body.len() / PEM_LINE_WIDTH + 64);
    pem.push_str(&format!("-----BEGIN {}-----\n", label));
    for chunk in body.as_bytes().chunks(PEM_LINE_WIDTH) {
        // base64 output is ASCII, chunks stay valid UTF-8
        pem.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        pem.push('\n');
    }
    pem.push_str(&format!("-----END {}-----\n", label));
    pem
}

/// Decode every certificate block of a PEM bundle into DER, in order
pub fn certificates_from_pem(bytes: &[u8]) -> ViceResult<Vec<Vec<u8>>> {
    let cleaned = strip_special_characters(bytes);
    let mut reader = cleaned.as_slice();
    let certs = rustls_pemfile::certs(&mut reader)
        .map(|cert| cert.map(|der| der.as_ref().to_vec()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ViceError::UnparsableCertificate(format!("invalid PEM: {}", e)))?;

    if certs.is_empty() {
        return Err(ViceError::UnparsableCertificate(
            "no CERTIFICATE block found".to_string(),
        ));
    }

    Ok(certs)
}

/// Decode an RSA private key. PKCS#1 and PKCS#8 encodings are accepted.
pub fn private_key_from_pem(bytes: &[u8]) -> ViceResult<RsaPrivateKey> {
    let cleaned = strip_special_characters(bytes);
    let pem = std::str::from_utf8(&cleaned)
        .map_err(|_| ViceError::UnparsablePrivateKey("key is not valid UTF-8".to_string()))?
        .trim();

    if pem.is_empty() {
        return Err(ViceError::UnparsablePrivateKey("key is empty".to_string()));
    }

    RsaPrivateKey::from_pkcs1_pem(pem)
        .or_else(|pkcs1_err| {
            RsaPrivateKey::from_pkcs8_pem(pem).map_err(|pkcs8_err| {
                ViceError::UnparsablePrivateKey(format!(
                    "neither PKCS#1 ({}) nor PKCS#8 ({})",
                    pkcs1_err, pkcs8_err
                ))
            })
        })
}

/// Encode an RSA private key as a PKCS#1 PEM block
pub fn private_key_to_pem(key: &RsaPrivateKey) -> ViceResult<String> {
    let pem = key
        .to_pkcs1_pem(LineEnding::LF)
        .map_err(|e| ViceError::Internal(format!("failed to encode private key: {}", e)))?;
    Ok(pem.to_string())
}

/// Concatenate PEM blocks into one chain, one block per entry
pub fn concat_blocks<S: AsRef<str>>(blocks: &[S]) -> String {
    let mut chain = String::new();
    for block in blocks {
        let block = block.as_ref().trim();
        if block.is_empty() {
            continue;
        }
        chain.push_str(block);
        chain.push('\n');
    }
    chain
}

/// Remove NUL and other control bytes some secret consumers reject.
///
/// Line breaks and tabs survive; every other byte below 0x20 and DEL are
/// dropped wherever they occur.
pub fn strip_special_characters(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|b| matches!(b, b'\n' | b'\r' | b'\t') || (*b >= 0x20 && *b != 0x7f))
        .collect()
}
