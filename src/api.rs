use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use serde_json::json;

use crate::consts::MANAGED_BY_ANNOTATION;
use crate::crd::ClusterSecret;
use crate::error::ApiError;
use crate::model::{NamespaceInfo, NamespacePhase};

/// A namespaced secret as the façade and reconciler exchange it: just enough
/// to build or compare a `Secret`, independent of `k8s_openapi` types so the
/// reconciliation core stays testable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespacedSecret {
    pub name: String,
    pub namespace: String,
    pub secret_type: String,
    pub data: BTreeMap<String, String>,
}

impl NamespacedSecret {
    fn to_k8s(&self, managed_by: &str) -> Secret {
        let mut annotations = BTreeMap::new();
        annotations.insert(MANAGED_BY_ANNOTATION.to_string(), managed_by.to_string());

        Secret {
            type_: Some(self.secret_type.clone()),
            string_data: Some(self.data.clone()),
            metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                annotations: Some(annotations),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Thin wrapper exposing typed operations on namespaces, secrets, and the
/// ClusterSecret custom resource. Never panics or throws; every call returns
/// a `Result`.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, ApiError>;
    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, ApiError>;
    async fn read_secret(&self, ns: &str, name: &str) -> Result<NamespacedSecret, ApiError>;
    async fn create_secret(&self, ns: &str, secret: &NamespacedSecret) -> Result<(), ApiError>;
    async fn replace_secret(&self, ns: &str, name: &str, secret: &NamespacedSecret) -> Result<(), ApiError>;
    async fn delete_secret(&self, ns: &str, name: &str) -> Result<(), ApiError>;
    async fn patch_clustersecret_status(&self, name: &str, syncedns: Vec<String>) -> Result<(), ApiError>;
    async fn list_clustersecrets(&self) -> Result<Vec<ClusterSecret>, ApiError>;
}

/// `ClusterApi` implementation backed by a real `kube::Client`.
///
/// Watch streams are intentionally not part of the `ClusterApi` trait object:
/// a `kube::runtime::watcher` stream against a live apiserver has no
/// meaningful in-memory fake, so the dispatcher owns them directly
/// against `KubeClusterApi::client()` while the mutating operations above
/// stay behind the testable trait boundary.
pub struct KubeClusterApi {
    client: Client,
    timeout: std::time::Duration,
    managed_by: String,
}

impl KubeClusterApi {
    pub fn new(client: Client, timeout: std::time::Duration, managed_by: String) -> Self {
        KubeClusterApi {
            client,
            timeout,
            managed_by,
        }
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = kube::Result<T>>) -> Result<T, ApiError> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(ApiError::from),
            Err(_) => Err(ApiError::Transient("API call timed out".to_string())),
        }
    }

    pub fn namespace_watcher(&self) -> BoxStream<'static, Result<Event<Namespace>, watcher::Error>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Box::pin(watcher::watcher(api, watcher::Config::default()))
    }

    pub fn secret_watcher(&self) -> BoxStream<'static, Result<Event<Secret>, watcher::Error>> {
        let api: Api<Secret> = Api::all(self.client.clone());
        Box::pin(watcher::watcher(api, watcher::Config::default()))
    }

    pub fn clustersecret_watcher(&self) -> BoxStream<'static, Result<Event<ClusterSecret>, watcher::Error>> {
        let api: Api<ClusterSecret> = Api::all(self.client.clone());
        Box::pin(watcher::watcher(api, watcher::Config::default()))
    }
}

fn namespace_phase(ns: &Namespace) -> NamespacePhase {
    match ns.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Terminating") => NamespacePhase::Terminating,
        Some("Active") => NamespacePhase::Active,
        _ => NamespacePhase::Other,
    }
}

#[async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_namespaces(&self) -> Result<Vec<NamespaceInfo>, ApiError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let list = self.with_timeout(api.list(&ListParams::default())).await?;
        Ok(list
            .into_iter()
            .map(|ns| NamespaceInfo {
                name: ns.name_any(),
                phase: namespace_phase(&ns),
            })
            .collect())
    }

    async fn get_namespace(&self, name: &str) -> Result<NamespaceInfo, ApiError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let ns = self.with_timeout(api.get(name)).await?;
        Ok(NamespaceInfo {
            name: ns.name_any(),
            phase: namespace_phase(&ns),
        })
    }

    async fn read_secret(&self, ns: &str, name: &str) -> Result<NamespacedSecret, ApiError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), ns);
        let secret = self.with_timeout(api.get(name)).await?;
        let data = secret
            .data
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, String::from_utf8_lossy(&v.0).to_string()))
            .collect();
        Ok(NamespacedSecret {
            name: name.to_string(),
            namespace: ns.to_string(),
            secret_type: secret.type_.unwrap_or_else(|| "Opaque".to_string()),
            data,
        })
    }

    async fn create_secret(&self, ns: &str, secret: &NamespacedSecret) -> Result<(), ApiError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), ns);
        self.with_timeout(api.create(&PostParams::default(), &secret.to_k8s(&self.managed_by)))
            .await?;
        Ok(())
    }

    async fn replace_secret(&self, ns: &str, name: &str, secret: &NamespacedSecret) -> Result<(), ApiError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), ns);
        self.with_timeout(api.replace(name, &PostParams::default(), &secret.to_k8s(&self.managed_by)))
            .await?;
        Ok(())
    }

    async fn delete_secret(&self, ns: &str, name: &str) -> Result<(), ApiError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), ns);
        self.with_timeout(api.delete(name, &DeleteParams::default())).await?;
        Ok(())
    }

    async fn patch_clustersecret_status(&self, name: &str, syncedns: Vec<String>) -> Result<(), ApiError> {
        let api: Api<ClusterSecret> = Api::all(self.client.clone());
        let patch = json!({
            "status": {
                "create_fn": {
                    "syncedns": syncedns,
                }
            }
        });
        self.with_timeout(api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await?;
        Ok(())
    }

    async fn list_clustersecrets(&self) -> Result<Vec<ClusterSecret>, ApiError> {
        let api: Api<ClusterSecret> = Api::all(self.client.clone());
        let list = self.with_timeout(api.list(&ListParams::default())).await?;
        Ok(list.items)
    }
}
