//! Common test utilities and helpers
//!
//! This module provides shared test infrastructure including:
//! - Certificate, secret and ingress fixtures
//! - Mock collaborators
//! - A reconciler wired to the mocks

#![allow(dead_code)]

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;

use std::sync::Arc;
use std::time::Duration;

use vice_president::services::{Reconciler, ReconcilerOptions};

pub const RESYNC_PERIOD: Duration = Duration::from_secs(300);
pub const PENDING_RETRY: Duration = Duration::from_secs(60);

/// Reconciler plus handles on every mock it talks to
pub struct TestHarness {
    pub ca: MockCertificateAuthority,
    pub revocation: StaticRevocation,
    pub secrets: InMemorySecretStore,
    pub ingresses: InMemoryIngressStore,
    pub scheduler: RecordingScheduler,
    pub events: RecordingEventSink,
    pub reconciler: Reconciler,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_options(test_options())
    }

    pub fn with_options(options: ReconcilerOptions) -> Self {
        let ca = MockCertificateAuthority::new();
        let revocation = StaticRevocation::new(false);
        let secrets = InMemorySecretStore::new();
        let ingresses = InMemoryIngressStore::new();
        let scheduler = RecordingScheduler::new();
        let events = RecordingEventSink::new();

        let reconciler = Reconciler::new(
            Arc::new(ca.clone()),
            Arc::new(revocation.clone()),
            Arc::new(secrets.clone()),
            Arc::new(ingresses.clone()),
            Arc::new(scheduler.clone()),
            options,
        )
        .with_events(Arc::new(events.clone()));

        Self {
            ca,
            revocation,
            secrets,
            ingresses,
            scheduler,
            events,
            reconciler,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Options with known requeue intervals and no rate limit
pub fn test_options() -> ReconcilerOptions {
    ReconcilerOptions {
        min_validity_days: 30,
        resync_period: RESYNC_PERIOD,
        pending_retry: PENDING_RETRY,
        ..Default::default()
    }
}
