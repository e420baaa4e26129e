//! In-memory `ClusterApi` fake used by reconciler and dispatcher tests to
//! exercise fan-out, self-healing, and source-secret scenarios without a
//! live cluster.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::api::{ClusterApi, NamespacedSecret};
use crate::crd::ClusterSecret;
use crate::error::ApiError;
use crate::model::{NamespaceInfo, NamespacePhase};

#[derive(Default)]
pub struct FakeClusterApi {
    namespaces: Mutex<HashMap<String, NamespacePhase>>,
    secrets: Mutex<HashMap<(String, String), NamespacedSecret>>,
    status: Mutex<HashMap<String, Vec<String>>>,
    pub create_calls: Mutex<Vec<(String, String)>>,
    pub replace_calls: Mutex<Vec<(String, String)>>,
    pub delete_calls: Mutex<Vec<(String, String)>>,
}

impl FakeClusterApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_namespace(&self, name: &str, phase: NamespacePhase) {
        self.namespaces.lock().unwrap().insert(name.to_string(), phase);
    }

    pub fn set_namespace_phase(&self, name: &str, phase: NamespacePhase) {
        self.namespaces.lock().unwrap().insert(name.to_string(), phase);
    }

    pub fn remove_namespace(&self, name: &str) {
        self.namespaces.lock().unwrap().remove(name);
    }

    pub fn secret(&self, ns: &str, name: &str) -> Option<NamespacedSecret> {
        self.secrets.lock().unwrap().get(&(ns.to_string(), name.to_string())).cloned()
    }

    pub fn put_secret_unmanaged(&self, secret: NamespacedSecret) {
        self.secrets
            .lock()
            .unwrap()
            .insert((secret.namespace.clone(), secret.name.clone()), secret);
    }

    pub fn delete_secret_externally(&self, ns: &str, name: &str) {
        self.secrets.lock().unwrap().remove(&(ns.to_string(), name.to_string()));
    }

    pub fn status_of(&self, name: &str) -> Vec<String> {
        self.status.lock().unwrap().get(name).cloned().unwrap_or_default()
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.lock().unwrap().len()
    }

    pub fn replace_count(&self) -> usize {
        self.replace_calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ClusterApi for FakeClusterApi {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, ApiError> {
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .map(|(name, phase)| NamespaceInfo {
                name: name.clone(),
                phase: *phase,
            })
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, ApiError> {
        self.namespaces
            .lock()
            .unwrap()
            .get(name)
            .map(|phase| NamespaceInfo {
                name: name.to_string(),
                phase: *phase,
            })
            .ok_or(ApiError::NotFound)
    }

    async fn read_secret(&self, ns: &str, name: &str) -> Result<NamespacedSecret, ApiError> {
        self.secrets
            .lock()
            .unwrap()
            .get(&(ns.to_string(), name.to_string()))
            .cloned()
            .ok_or(ApiError::NotFound)
    }

    async fn create_secret(&self, ns: &str, secret: &NamespacedSecret) -> Result<(), ApiError> {
        self.create_calls.lock().unwrap().push((ns.to_string(), secret.name.clone()));
        let mut secrets = self.secrets.lock().unwrap();
        let key = (ns.to_string(), secret.name.clone());
        if secrets.contains_key(&key) {
            return Err(ApiError::AlreadyExists);
        }
        secrets.insert(key, secret.clone());
        Ok(())
    }

    async fn replace_secret(&self, ns: &str, name: &str, secret: &NamespacedSecret) -> Result<(), ApiError> {
        self.replace_calls.lock().unwrap().push((ns.to_string(), name.to_string()));
        let mut secrets = self.secrets.lock().unwrap();
        let key = (ns.to_string(), name.to_string());
        if !secrets.contains_key(&key) {
            return Err(ApiError::NotFound);
        }
        secrets.insert(key, secret.clone());
        Ok(())
    }

    async fn delete_secret(&self, ns: &str, name: &str) -> Result<(), ApiError> {
        self.delete_calls.lock().unwrap().push((ns.to_string(), name.to_string()));
        let mut secrets = self.secrets.lock().unwrap();
        let key = (ns.to_string(), name.to_string());
        if secrets.remove(&key).is_none() {
            return Err(ApiError::NotFound);
        }
        Ok(())
    }

    async fn patch_clustersecret_status(&self, name: &str, syncedns: Vec<String>) -> Result<(), ApiError> {
        self.status.lock().unwrap().insert(name.to_string(), syncedns);
        Ok(())
    }

    async fn list_clustersecrets(&self) -> Result<Vec<ClusterSecret>, ApiError> {
        Ok(vec![])
    }
}
