use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::CachedClusterSecret;

/// Process-wide mapping `uid -> CachedClusterSecret`.
///
/// Guarded by a single coarse-grained mutex, the same shape
/// `eosin-platform-eosin/storage-operator`'s `ContextData` uses for its
/// `last_action` map. All operations are logically atomic with respect to
/// each other; `all()` returns a defensive, point-in-time snapshot that later
/// mutations do not affect.
#[derive(Default)]
pub struct StateIndex {
    inner: Mutex<HashMap<String, CachedClusterSecret>>,
}

impl StateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, csec: CachedClusterSecret) {
        let mut guard = self.inner.lock().expect("state index mutex poisoned");
        guard.insert(csec.uid.clone(), csec);
    }

    pub fn get(&self, uid: &str) -> Option<CachedClusterSecret> {
        let guard = self.inner.lock().expect("state index mutex poisoned");
        guard.get(uid).cloned()
    }

    pub fn remove(&self, uid: &str) -> Option<CachedClusterSecret> {
        let mut guard = self.inner.lock().expect("state index mutex poisoned");
        guard.remove(uid)
    }

    pub fn all(&self) -> Vec<CachedClusterSecret> {
        let guard = self.inner.lock().expect("state index mutex poisoned");
        guard.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        let guard = self.inner.lock().expect("state index mutex poisoned");
        guard.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn csec(uid: &str) -> CachedClusterSecret {
        CachedClusterSecret {
            uid: uid.to_string(),
            name: "mysecret".to_string(),
            data: BTreeMap::new(),
            metadata: BTreeMap::new(),
            secret_type: "Opaque".to_string(),
            match_namespace: None,
            avoid_namespaces: None,
            synced_namespace: vec![],
            last_resolved_payload: BTreeMap::new(),
        }
    }

    #[test]
    fn set_then_get_roundtrips() {
        let idx = StateIndex::new();
        idx.set(csec("u1"));
        assert_eq!(idx.get("u1").unwrap().name, "mysecret");
        assert!(idx.get("unknown").is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let idx = StateIndex::new();
        idx.set(csec("u1"));
        assert!(idx.remove("u1").is_some());
        assert!(idx.get("u1").is_none());
    }

    #[test]
    fn all_is_a_point_in_time_snapshot() {
        let idx = StateIndex::new();
        idx.set(csec("u1"));
        let snapshot = idx.all();
        idx.set(csec("u2"));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(idx.all().len(), 2);
    }
}
