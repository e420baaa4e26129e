use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to a key on a secret in some namespace, used as the indirect
/// form of a `data` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValueFrom {
    #[serde(rename = "secretKeyRef")]
    pub secret_key_ref: SecretKeyRef,
}

/// One entry of `ClusterSecret.data`: either an inline payload fragment or a
/// reference to a source secret. `data` as a whole is either all inline
/// values or (more commonly) a single `valueFrom` entry; both shapes are
/// modeled uniformly as a map so mixed usage does not panic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum DataValue {
    Inline(String),
    Ref(ValueFrom),
}

/// The `ClusterSecret` custom resource.
///
/// External camelCase field names (`matchNamespace`, `avoidNamespaces`) are
/// aliased to snake_case internal field names.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "clustersecret.io",
    version = "v1",
    kind = "ClusterSecret",
    plural = "clustersecrets",
    status = "ClusterSecretStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSecretSpec {
    pub data: BTreeMap<String, DataValue>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default = "default_secret_type")]
    pub r#type: String,

    #[serde(rename = "matchNamespace", default, skip_serializing_if = "Option::is_none")]
    pub match_namespace: Option<Vec<String>>,

    #[serde(rename = "avoidNamespaces", default, skip_serializing_if = "Option::is_none")]
    pub avoid_namespaces: Option<Vec<String>>,
}

fn default_secret_type() -> String {
    "Opaque".to_string()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CreateFnStatus {
    #[serde(default)]
    pub syncedns: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ClusterSecretStatus {
    #[serde(default)]
    pub create_fn: CreateFnStatus,
}
