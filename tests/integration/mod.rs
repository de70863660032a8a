//! Integration tests for vice-president
//!
//! The reconciler runs against in-memory collaborators; the CA client and
//! the revocation checker run against wiremock servers.

mod remote_tests;
