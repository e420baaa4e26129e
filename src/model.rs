use std::collections::BTreeMap;

use crate::crd::{ClusterSecret, DataValue};

/// Observable lifecycle phase of a namespace. A `Terminating` namespace is
/// treated as absent for placement and is never the target of self-healing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamespacePhase {
    Active,
    Terminating,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceInfo {
    pub name: String,
    pub phase: NamespacePhase,
}

/// The in-memory mirror of a ClusterSecret relevant to reconciliation.
/// `synced_namespace` always reflects the last successful status patch,
/// never a computation-in-progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedClusterSecret {
    pub uid: String,
    pub name: String,
    pub data: BTreeMap<String, DataValue>,
    pub metadata: BTreeMap<String, String>,
    pub secret_type: String,
    pub match_namespace: Option<Vec<String>>,
    pub avoid_namespaces: Option<Vec<String>>,
    pub synced_namespace: Vec<String>,
    /// The last successfully resolved payload. Used as a fallback when
    /// `data.valueFrom.secretKeyRef` points at a source secret that has since
    /// gone missing: existing managed copies are kept rather than deleted.
    pub last_resolved_payload: BTreeMap<String, String>,
}

impl CachedClusterSecret {
    /// Builds a cache entry from a freshly observed ClusterSecret object,
    /// preserving the given synced-namespace list (the caller supplies it:
    /// from `status.create_fn.syncedns` at startup, or carried over from the
    /// previous cache entry on an update) and any previously resolved
    /// payload (carried over on update so a transient source-secret outage
    /// does not wipe the fallback).
    pub fn from_resource(
        uid: String,
        secret: &ClusterSecret,
        synced_namespace: Vec<String>,
        last_resolved_payload: BTreeMap<String, String>,
    ) -> Self {
        CachedClusterSecret {
            uid,
            name: secret.metadata.name.clone().unwrap_or_default(),
            data: secret.spec.data.clone(),
            metadata: secret.spec.metadata.clone(),
            secret_type: secret.spec.r#type.clone(),
            match_namespace: secret.spec.match_namespace.clone(),
            avoid_namespaces: secret.spec.avoid_namespaces.clone(),
            synced_namespace,
            last_resolved_payload,
        }
    }

    /// True if a MODIFIED event's new spec differs from this cache entry in a
    /// field the dispatcher cares about. Modifications that only touch status
    /// or uninteresting metadata annotations must not enqueue a reconcile.
    pub fn differs_in_watched_fields(&self, secret: &ClusterSecret) -> bool {
        self.data != secret.spec.data
            || self.match_namespace != secret.spec.match_namespace
            || self.avoid_namespaces != secret.spec.avoid_namespaces
    }
}
