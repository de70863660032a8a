//! Certificate lifecycle step definitions

use cucumber::{given, then, when};

use crate::common::{secret_with, CertificateBuilder, MockCaReply, TEST_NAMESPACE, TEST_SECRET};
use crate::features::support::TestWorld;
use vice_president::models::{state_annotation_key, tid_annotation_key, Certificate};
use vice_president::services::{validator, CertificateEvent};

#[given(expr = "a managed ingress for {string}")]
async fn managed_ingress_for(world: &mut TestWorld, host: String) {
    world.ingress = crate::common::managed_ingress(&[host.as_str()]);
    world.harness.ingresses.insert(&world.ingress);
}

#[given(expr = "the CA queues the next request as {string}")]
async fn ca_queues_request(world: &mut TestWorld, tid: String) {
    world.harness.ca.reply(MockCaReply::Pending(tid));
}

#[given(expr = "the secret holds a certificate for {string} valid for {int} days")]
async fn secret_holds_certificate(world: &mut TestWorld, host: String, days: i64) {
    let certificate = CertificateBuilder::new(&host).valid_for_days(days).build();
    world.harness.secrets.insert(secret_with(&certificate));
}

#[given(expr = "the host state is set to {string} with transaction {string}")]
async fn host_state_is_set(world: &mut TestWorld, state: String, tid: String) {
    let host = world.ingress.tls[0].hosts[0].clone();
    world
        .ingress
        .annotations
        .insert(state_annotation_key(&host), state);
    world
        .ingress
        .annotations
        .insert(tid_annotation_key(&host), tid);
    world.harness.ingresses.insert(&world.ingress);
}

#[given("the certificate is revoked")]
async fn certificate_is_revoked(world: &mut TestWorld) {
    world.harness.revocation.set_revoked(true);
}

#[when("the ingress is reconciled")]
async fn ingress_is_reconciled(world: &mut TestWorld) {
    world.reconcile().await;
}

#[then(expr = "the action is {string}")]
async fn action_is(world: &mut TestWorld, action: String) {
    assert_eq!(world.outcomes.len(), 1);
    assert_eq!(world.outcomes[0].action.to_string(), action);
}

#[then("the secret serves no certificate")]
async fn secret_serves_no_certificate(world: &mut TestWorld) {
    let secret = world
        .harness
        .secrets
        .secret(TEST_NAMESPACE, TEST_SECRET)
        .unwrap_or_else(|| vice_president::models::Secret::new(TEST_NAMESPACE, TEST_SECRET));
    assert!(secret.field("tls.crt").is_none());
    assert!(secret.field("tls.key").is_none());
}

#[then(expr = "the secret serves a certificate for {string}")]
async fn secret_serves_certificate(world: &mut TestWorld, host: String) {
    let secret = world
        .harness
        .secrets
        .secret(TEST_NAMESPACE, TEST_SECRET)
        .expect("secret written");
    let certificate = Certificate::from_pem(secret.field("tls.crt").expect("certificate field"))
        .expect("valid certificate");
    let key = vice_president::utils::pem::private_key_from_pem(
        secret.field("tls.key").expect("key field"),
    )
    .expect("valid key");

    assert!(validator::host_matches(&certificate, &host));
    assert!(validator::key_and_cert_tally(&key, &certificate));
}

#[then(expr = "the host state is {string} with transaction {string}")]
async fn host_state_is(world: &mut TestWorld, state: String, tid: String) {
    let host = world.ingress.tls[0].hosts[0].clone();
    let annotations = world
        .harness
        .ingresses
        .annotations(&world.ingress.namespace, &world.ingress.name);
    assert_eq!(annotations.get(&state_annotation_key(&host)), Some(&state));
    assert_eq!(annotations.get(&tid_annotation_key(&host)), Some(&tid));
}

#[then("the host has no state annotations")]
async fn host_has_no_state(world: &mut TestWorld) {
    let host = world.ingress.tls[0].hosts[0].clone();
    let annotations = world
        .harness
        .ingresses
        .annotations(&world.ingress.namespace, &world.ingress.name);
    assert!(!annotations.contains_key(&state_annotation_key(&host)));
    assert!(!annotations.contains_key(&tid_annotation_key(&host)));
}

#[then("the CA was not called")]
async fn ca_not_called(world: &mut TestWorld) {
    assert!(world.harness.ca.calls().is_empty());
}

#[then("a revocation event was recorded")]
async fn revocation_event_recorded(world: &mut TestWorld) {
    assert!(world
        .harness
        .events
        .events()
        .iter()
        .any(|event| matches!(event, CertificateEvent::Revoked { .. })));
}
