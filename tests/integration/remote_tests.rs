//! Comparison with certificates served by a local TLS endpoint

use std::sync::Arc;
use std::time::Duration;

use rsa::pkcs8::EncodePrivateKey;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::common::*;
use vice_president::models::Certificate;
use vice_president::services::remote::certificates_match;
use vice_president::services::RemoteComparer;

const PLACEHOLDER_CN: &str = "Kubernetes Ingress Controller Fake Certificate";

/// Serve `certificate` on an ephemeral port until the test ends
async fn serve(certificate: &Certificate) -> u16 {
    let key = leaf_key().to_pkcs8_der().unwrap();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.as_bytes().to_vec()));
    let chain = vec![CertificateDer::from(certificate.der().to_vec())];

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::aws_lc_rs::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(chain, key)
    .unwrap();
    let acceptor = TlsAcceptor::from(Arc::new(config));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let _ = acceptor.accept(stream).await;
            });
        }
    });

    port
}

fn comparer(port: u16) -> RemoteComparer {
    RemoteComparer::new(port, vec![PLACEHOLDER_CN.to_string()])
        .unwrap()
        .with_timeout(Duration::from_secs(5))
}

#[tokio::test]
async fn test_served_certificate_matches() {
    let local = CertificateBuilder::new("localhost").build();
    let port = serve(&local).await;

    let comparer = comparer(port);
    let served = comparer.fetch_leaf("localhost").await.unwrap();
    assert_eq!(served, local);
    assert!(comparer.remote_matches("localhost", &local).await);
}

#[tokio::test]
async fn test_served_certificate_differs() {
    let served = CertificateBuilder::new("localhost")
        .sans(&["localhost", "old.example.com"])
        .build();
    let port = serve(&served).await;

    let local = CertificateBuilder::new("localhost").build();
    assert!(!comparer(port).remote_matches("localhost", &local).await);
}

#[tokio::test]
async fn test_placeholder_certificate_counts_as_match() {
    let placeholder = CertificateBuilder::new("localhost")
        .common_name(PLACEHOLDER_CN)
        .build();
    let port = serve(&placeholder).await;

    let local = CertificateBuilder::new("localhost").build();
    assert!(comparer(port).remote_matches("localhost", &local).await);
}

#[tokio::test]
async fn test_closed_port_counts_as_match() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let local = CertificateBuilder::new("localhost").build();
    assert!(comparer(port).remote_matches("localhost", &local).await);
}

#[test]
fn test_certificates_match_ignores_san_order() {
    // Same validity window for both
    let builder = CertificateBuilder::new(TEST_HOST);
    let a = builder.clone().sans(&[TEST_HOST, "api.example.com"]).build();
    let b = builder.sans(&["api.example.com", TEST_HOST]).build();
    assert!(certificates_match(&a, &b));
}
