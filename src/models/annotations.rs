//! Ingress annotation vocabulary and the per-host certificate state

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// `"true"` opts an ingress into certificate management
pub const ANNOTATION_MANAGED: &str = "vice-president";

/// `"true"` forces the certificates of an ingress to be replaced
pub const ANNOTATION_REPLACE_CERT: &str = "vice-president/replace-cert";

/// Overrides the secret field holding the private key
pub const ANNOTATION_KEY_FIELD: &str = "vice-president/tls-key-secret-key";

/// Overrides the secret field holding the certificate chain
pub const ANNOTATION_CERT_FIELD: &str = "vice-president/tls-cert-secret-key";

const STATE_SUFFIX: &str = "vice-president-state";
const TID_SUFFIX: &str = "vice-president-tid";

/// Annotation key holding the lifecycle state of `host`
pub fn state_annotation_key(host: &str) -> String {
    format!("{}/{}", host, STATE_SUFFIX)
}

/// Annotation key holding the pending transaction id of `host`
pub fn tid_annotation_key(host: &str) -> String {
    format!("{}/{}", host, TID_SUFFIX)
}

/// Lifecycle state of one host's certificate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertState {
    /// Nothing in the secret yet
    NoCertificate,
    Enroll,
    /// Request submitted, waiting for approval
    Approve,
    /// Approved, waiting for the certificate to be picked up
    Pickup,
    Renew,
    /// Nothing outstanding
    Steady,
}

impl CertState {
    /// Parse the value of a `<host>/vice-president-state` annotation.
    ///
    /// A missing annotation means steady state. `approved` is the state the
    /// CA reports after an approval and is handled as a pickup.
    pub fn from_annotation(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            None | Some("") => CertState::Steady,
            Some("enroll") => CertState::Enroll,
            Some("renew") => CertState::Renew,
            Some("approve") => CertState::Approve,
            Some("approved") | Some("pickup") => CertState::Pickup,
            Some(other) => {
                tracing::warn!(state = other, "Ignoring unknown certificate state annotation");
                CertState::Steady
            }
        }
    }

    /// Annotation value for this state, `None` when the annotation is removed
    pub fn as_annotation(&self) -> Option<&'static str> {
        match self {
            CertState::Enroll => Some("enroll"),
            CertState::Renew => Some("renew"),
            CertState::Approve => Some("approve"),
            CertState::Pickup => Some("pickup"),
            CertState::NoCertificate | CertState::Steady => None,
        }
    }
}

impl fmt::Display for CertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CertState::NoCertificate => "no_certificate",
            CertState::Enroll => "enroll",
            CertState::Approve => "approve",
            CertState::Pickup => "pickup",
            CertState::Renew => "renew",
            CertState::Steady => "steady",
        };
        f.write_str(name)
    }
}

/// Persisted state of one host as read from the ingress annotations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    pub state: CertState,
    pub transaction_id: Option<String>,
    /// Whether any state or transaction annotation is present at all
    pub annotated: bool,
}

impl HostState {
    pub fn from_annotations(annotations: &BTreeMap<String, String>, host: &str) -> Self {
        let state_value = annotations.get(&state_annotation_key(host));
        let tid_value = annotations.get(&tid_annotation_key(host));

        Self {
            state: CertState::from_annotation(state_value.map(String::as_str)),
            transaction_id: tid_value
                .map(|tid| tid.trim().to_string())
                .filter(|tid| !tid.is_empty()),
            annotated: state_value.is_some() || tid_value.is_some(),
        }
    }

    /// The outstanding CA operation, if the state names one and a TID exists.
    ///
    /// A TID without an approve or pickup state is ignored.
    pub fn pending(&self) -> Option<(CertState, &str)> {
        match (self.state, self.transaction_id.as_deref()) {
            (CertState::Approve, Some(tid)) => Some((CertState::Approve, tid)),
            (CertState::Pickup, Some(tid)) => Some((CertState::Pickup, tid)),
            _ => None,
        }
    }
}

/// Annotation changes to apply to an ingress. `None` removes the key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationPatch {
    changes: BTreeMap<String, Option<String>>,
}

impl AnnotationPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.changes.insert(key.into(), Some(value.into()));
        self
    }

    pub fn remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.changes.insert(key.into(), None);
        self
    }

    /// Persist `state` for `host`, with the transaction id when one is pending
    pub fn set_state(&mut self, host: &str, state: CertState, tid: Option<&str>) -> &mut Self {
        match state.as_annotation() {
            Some(value) => self.set(state_annotation_key(host), value),
            None => self.remove(state_annotation_key(host)),
        };
        match tid {
            Some(tid) => self.set(tid_annotation_key(host), tid),
            None => self.remove(tid_annotation_key(host)),
        };
        self
    }

    /// Drop the state and transaction annotations of `host`
    pub fn clear_state(&mut self, host: &str) -> &mut Self {
        self.set_state(host, CertState::Steady, None)
    }

    pub fn clear_replace(&mut self) -> &mut Self {
        self.remove(ANNOTATION_REPLACE_CERT)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> &BTreeMap<String, Option<String>> {
        &self.changes
    }

    /// Apply the patch to an annotation map
    pub fn apply(&self, annotations: &mut BTreeMap<String, String>) {
        for (key, value) in &self.changes {
            match value {
                Some(value) => {
                    annotations.insert(key.clone(), value.clone());
                }
                None => {
                    annotations.remove(key);
                }
            }
        }
    }
}
