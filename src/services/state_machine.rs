//! Per-host decision of the next CA operation
//!
//! The decision is a pure function of an [`Evaluation`]. The evaluation
//! gathers everything the decision needs: the condition of the stored
//! material, revocation and expiry, the replace flag and the persisted host
//! state.
//!
//! Order of precedence:
//! 1. Usable material (present, valid for host and SANs, key matches, not
//!    revoked, not expiring, no replace requested) needs nothing. Leftover
//!    state annotations are cleared.
//! 2. A pending transaction (`approve` or `pickup` with a TID) is resumed.
//! 3. Otherwise the first failing check picks the operation: no material
//!    or an unreadable certificate enrolls, an unusable key or host/SAN
//!    mismatch renews, a replace request replaces, revocation and
//!    expiry renew.

use std::fmt;
use std::sync::Arc;

use super::revocation::RevocationCheck;
use super::secret::SecretMaterial;
use super::validator;
use crate::models::{CertState, CertificateMaterial, HostState};
use crate::utils::{ViceError, ViceResult};

/// Condition of the certificate material stored in the Secret
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterialCondition {
    /// No certificate in the Secret
    Absent,
    /// Certificate bytes present but unreadable
    CorruptCertificate,
    /// Key bytes present but unreadable
    CorruptKey,
    /// Certificate present and parsed
    Present {
        host_matches: bool,
        key_tally: bool,
        sans_covered: bool,
    },
}

/// Everything the decision looks at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub condition: MaterialCondition,
    pub revoked: bool,
    pub expires_soon: bool,
    pub replace_requested: bool,
    pub host_state: HostState,
}

impl Evaluation {
    /// Whether the stored material can keep being served as is
    pub fn is_usable(&self) -> bool {
        matches!(
            self.condition,
            MaterialCondition::Present {
                host_matches: true,
                key_tally: true,
                sans_covered: true,
            }
        ) && !self.revoked
            && !self.expires_soon
            && !self.replace_requested
    }

    /// Lifecycle state derived from the evaluation
    pub fn current_state(&self) -> CertState {
        if let Some((state, _)) = self.host_state.pending() {
            return state;
        }
        match self.condition {
            MaterialCondition::Absent => CertState::NoCertificate,
            _ if self.is_usable() => CertState::Steady,
            _ => self.host_state.state,
        }
    }
}

/// Next step for a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    None,
    Enroll,
    Renew,
    Replace,
    Approve(String),
    Pickup(String),
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::None => f.write_str("none"),
            Action::Enroll => f.write_str("enroll"),
            Action::Renew => f.write_str("renew"),
            Action::Replace => f.write_str("replace"),
            Action::Approve(tid) => write!(f, "approve({})", tid),
            Action::Pickup(tid) => write!(f, "pickup({})", tid),
        }
    }
}

/// Why an action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Valid,
    NoCertificate,
    CorruptCertificate,
    CorruptKey,
    HostMismatch,
    KeyMismatch,
    MissingSans,
    ReplaceRequested,
    Revoked,
    ExpiresSoon,
    PendingApproval,
    PendingPickup,
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reason::Valid => "certificate is valid",
            Reason::NoCertificate => "no certificate",
            Reason::CorruptCertificate => "certificate is unreadable",
            Reason::CorruptKey => "private key is unreadable",
            Reason::HostMismatch => "certificate does not match host",
            Reason::KeyMismatch => "private key does not match certificate",
            Reason::MissingSans => "certificate misses subject alternative names",
            Reason::ReplaceRequested => "replacement requested",
            Reason::Revoked => "certificate is revoked",
            Reason::ExpiresSoon => "certificate expires soon",
            Reason::PendingApproval => "transaction awaits approval",
            Reason::PendingPickup => "transaction awaits pickup",
        };
        f.write_str(name)
    }
}

/// Outcome of the decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub reason: Reason,
    /// Stale state or TID annotations should be removed
    pub clear_state: bool,
}

/// Pick the next action for a host
pub fn decide(evaluation: &Evaluation) -> Decision {
    if evaluation.is_usable() {
        return Decision {
            action: Action::None,
            reason: Reason::Valid,
            clear_state: evaluation.host_state.annotated,
        };
    }

    if let Some((state, tid)) = evaluation.host_state.pending() {
        let (action, reason) = match state {
            CertState::Approve => (Action::Approve(tid.to_string()), Reason::PendingApproval),
            _ => (Action::Pickup(tid.to_string()), Reason::PendingPickup),
        };
        return Decision {
            action,
            reason,
            clear_state: false,
        };
    }

    let (action, reason) = match evaluation.condition {
        MaterialCondition::Absent => (Action::Enroll, Reason::NoCertificate),
        MaterialCondition::CorruptCertificate => (Action::Enroll, Reason::CorruptCertificate),
        MaterialCondition::CorruptKey => (Action::Renew, Reason::CorruptKey),
        MaterialCondition::Present { host_matches: false, .. } => {
            (Action::Renew, Reason::HostMismatch)
        }
        MaterialCondition::Present { key_tally: false, .. } => (Action::Renew, Reason::KeyMismatch),
        MaterialCondition::Present { sans_covered: false, .. } => {
            (Action::Renew, Reason::MissingSans)
        }
        MaterialCondition::Present { .. } if evaluation.replace_requested => {
            (Action::Replace, Reason::ReplaceRequested)
        }
        MaterialCondition::Present { .. } if evaluation.revoked => (Action::Renew, Reason::Revoked),
        MaterialCondition::Present { .. } => (Action::Renew, Reason::ExpiresSoon),
    };

    Decision {
        action,
        reason,
        // A TID without a pending state carries no meaning
        clear_state: evaluation.host_state.transaction_id.is_some(),
    }
}

/// Builds evaluations from decoded Secret material
#[derive(Clone)]
pub struct Evaluator {
    revocation: Arc<dyn RevocationCheck>,
    min_validity_days: u32,
}

impl Evaluator {
    pub fn new(revocation: Arc<dyn RevocationCheck>, min_validity_days: u32) -> Self {
        Self {
            revocation,
            min_validity_days,
        }
    }

    /// Evaluate the decoded Secret against the wanted host and SANs.
    ///
    /// The OCSP round trip is only made when every local check passed.
    pub async fn evaluate(
        &self,
        decoded: &ViceResult<SecretMaterial>,
        material: &CertificateMaterial,
        host_state: HostState,
        replace_requested: bool,
    ) -> Evaluation {
        let mut evaluation = Evaluation {
            condition: condition_of(decoded, material),
            revoked: false,
            expires_soon: false,
            replace_requested,
            host_state,
        };

        if let Ok(SecretMaterial {
            certificate: Some(certificate),
            ..
        }) = decoded
        {
            evaluation.expires_soon = validator::expires_soon(certificate, self.min_validity_days);

            let locally_valid = matches!(
                evaluation.condition,
                MaterialCondition::Present {
                    host_matches: true,
                    key_tally: true,
                    sans_covered: true,
                }
            );
            if locally_valid && !evaluation.expires_soon && !replace_requested {
                evaluation.revoked = self.revocation.is_revoked(certificate).await;
            }
        }

        tracing::debug!(
            host = %material.host(),
            condition = ?evaluation.condition,
            revoked = evaluation.revoked,
            expires_soon = evaluation.expires_soon,
            replace_requested,
            state = %evaluation.current_state(),
            "Evaluated certificate"
        );

        evaluation
    }
}

/// Classify the decoded Secret for `material`'s host and SANs
pub fn condition_of(decoded: &ViceResult<SecretMaterial>, material: &CertificateMaterial) -> MaterialCondition {
    match decoded {
        Err(ViceError::UnparsableCertificate(_)) => MaterialCondition::CorruptCertificate,
        Err(ViceError::UnparsablePrivateKey(_)) => MaterialCondition::CorruptKey,
        Err(_) => MaterialCondition::Absent,
        Ok(SecretMaterial {
            certificate: None, ..
        }) => MaterialCondition::Absent,
        Ok(SecretMaterial {
            certificate: Some(certificate),
            private_key,
        }) => MaterialCondition::Present {
            host_matches: validator::host_matches(certificate, material.host()),
            key_tally: private_key
                .as_ref()
                .map(|key| validator::key_and_cert_tally(key, certificate))
                .unwrap_or(false),
            sans_covered: validator::sans_covered(certificate, material.sans()),
        },
    }
}
