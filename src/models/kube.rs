//! Minimal views of the Kubernetes objects the engine reads and writes

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::annotations::{HostState, ANNOTATION_MANAGED, ANNOTATION_REPLACE_CERT};

/// A Secret as an opaque bag of byte fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            data: BTreeMap::new(),
        }
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Field contents, `None` for missing or empty fields
    pub fn field(&self, name: &str) -> Option<&[u8]> {
        self.data
            .get(name)
            .map(Vec::as_slice)
            .filter(|value| !value.is_empty())
    }
}

/// One entry of an ingress `spec.tls` list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngressTls {
    #[serde(default)]
    pub hosts: Vec<String>,
    pub secret_name: Option<String>,
}

/// An ingress reduced to its annotations and TLS section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub tls: Vec<IngressTls>,
}

impl Ingress {
    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Whether the ingress opted into certificate management
    pub fn is_managed(&self) -> bool {
        self.annotation_is_true(ANNOTATION_MANAGED)
    }

    /// Whether a certificate replacement was requested
    pub fn replace_requested(&self) -> bool {
        self.annotation_is_true(ANNOTATION_REPLACE_CERT)
    }

    pub fn host_state(&self, host: &str) -> HostState {
        HostState::from_annotations(&self.annotations, host)
    }

    fn annotation_is_true(&self, key: &str) -> bool {
        self.annotations
            .get(key)
            .map(|value| value.trim().eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}
