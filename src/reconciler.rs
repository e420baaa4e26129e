use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::api::{ClusterApi, NamespacedSecret};
use crate::cache::StateIndex;
use crate::crd::DataValue;
use crate::error::{ApiError, Error};
use crate::model::CachedClusterSecret;
use crate::selector::select_namespaces;

/// Shared context a reconciliation needs: the façade, the state index, and
/// the per-uid serialization tokens that keep concurrent events for the
/// same ClusterSecret from racing each other.
pub struct ReconcilerContext {
    pub api: Arc<dyn ClusterApi>,
    pub cache: Arc<StateIndex>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReconcilerContext {
    pub fn new(api: Arc<dyn ClusterApi>, cache: Arc<StateIndex>) -> Self {
        ReconcilerContext {
            api,
            cache,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, uid: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("reconciler lock map poisoned");
        locks.entry(uid.to_string()).or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))).clone()
    }
}

/// Resolves the effective payload for a cached ClusterSecret. If `data` is a
/// single `valueFrom.secretKeyRef` reference, reads
/// the source secret; on a missing source, logs a warning and falls back to
/// the last known resolved payload rather than deleting managed copies.
pub(crate) async fn resolve_payload(
    api: &dyn ClusterApi,
    cached: &CachedClusterSecret,
) -> Result<BTreeMap<String, String>, Error> {
    if let Some(DataValue::Ref(value_from)) = cached.data.get("valueFrom") {
        let ns = &value_from.secret_key_ref.namespace;
        let name = &value_from.secret_key_ref.name;
        match api.read_secret(ns, name).await {
            Ok(source) => Ok(source.data),
            Err(ApiError::NotFound) => {
                warn!(
                    clustersecret = %cached.name,
                    source_namespace = %ns,
                    source_name = %name,
                    "source secret is missing; proceeding with last known payload"
                );
                Ok(cached.last_resolved_payload.clone())
            }
            Err(e) => Err(Error::Api(e)),
        }
    } else {
        Ok(cached
            .data
            .iter()
            .filter_map(|(k, v)| match v {
                DataValue::Inline(s) => Some((k.clone(), s.clone())),
                DataValue::Ref(_) => None,
            })
            .collect())
    }
}

/// Single-ClusterSecret reconciliation. Idempotent; serialized per `uid` via
/// `ctx.lock_for(uid)`.
pub async fn reconcile(uid: &str, ctx: &ReconcilerContext) -> Result<(), Error> {
    let token = ctx.lock_for(uid);
    let _guard = token.lock().await;

    // Step 1: stale event if the cache entry is gone.
    let Some(cached) = ctx.cache.get(uid) else {
        debug!(uid, "reconcile called for unknown uid; stale event, skipping");
        return Ok(());
    };

    // Step 2: resolve the effective payload.
    let payload = resolve_payload(ctx.api.as_ref(), &cached).await?;

    // Step 3: compute the target namespace set from authoritative state.
    let namespaces = ctx.api.list_namespaces().await?;
    let target = select_namespaces(
        &namespaces,
        cached.match_namespace.as_deref(),
        cached.avoid_namespaces.as_deref(),
    );

    // Step 4: diff against the synced set.
    let synced: BTreeSet<String> = cached.synced_namespace.iter().cloned().collect();
    let to_remove: BTreeSet<&String> = synced.difference(&target).collect();
    let to_apply: BTreeSet<&String> = target.iter().collect(); // to_add ∪ to_update, always re-applied

    let mut still_synced: BTreeSet<String> = BTreeSet::new();

    // Step 5: create-or-replace in every target namespace.
    for ns in &to_apply {
        let secret = NamespacedSecret {
            name: cached.name.clone(),
            namespace: (*ns).clone(),
            secret_type: cached.secret_type.clone(),
            data: payload.clone(),
        };

        match ctx.api.create_secret(ns, &secret).await {
            Ok(()) => {
                still_synced.insert((*ns).clone());
            }
            Err(ApiError::AlreadyExists) => match ctx.api.replace_secret(ns, &cached.name, &secret).await {
                Ok(()) => {
                    still_synced.insert((*ns).clone());
                }
                Err(ApiError::NotFound) => {
                    debug!(namespace = %ns, clustersecret = %cached.name, "namespace vanished mid-replace; skipping");
                }
                Err(ApiError::Forbidden) => {
                    warn!(namespace = %ns, clustersecret = %cached.name, "forbidden to replace secret; skipping");
                }
                Err(ApiError::Transient(msg)) => {
                    warn!(namespace = %ns, clustersecret = %cached.name, error = %msg, "transient error replacing secret; will retry on redelivery");
                }
                Err(ApiError::Conflict) => {
                    warn!(namespace = %ns, clustersecret = %cached.name, "conflict replacing secret; will retry on redelivery");
                }
            },
            Err(ApiError::NotFound) => {
                debug!(namespace = %ns, clustersecret = %cached.name, "namespace vanished mid-create; skipping");
            }
            Err(ApiError::Forbidden) => {
                warn!(namespace = %ns, clustersecret = %cached.name, "forbidden to create secret; skipping");
            }
            Err(ApiError::Transient(msg)) => {
                warn!(namespace = %ns, clustersecret = %cached.name, error = %msg, "transient error creating secret; will retry on redelivery");
            }
            Err(ApiError::Conflict) => {
                warn!(namespace = %ns, clustersecret = %cached.name, "conflict creating secret; will retry on redelivery");
            }
        }
    }

    // Step 6: delete from namespaces no longer targeted.
    for ns in &to_remove {
        match ctx.api.delete_secret(ns, &cached.name).await {
            Ok(()) | Err(ApiError::NotFound) => {}
            Err(ApiError::Forbidden) => {
                warn!(namespace = %ns, clustersecret = %cached.name, "forbidden to delete secret; skipping");
                still_synced.insert((*ns).clone());
            }
            Err(ApiError::Transient(msg)) => {
                warn!(namespace = %ns, clustersecret = %cached.name, error = %msg, "transient error deleting secret; will retry on redelivery");
                still_synced.insert((*ns).clone());
            }
            Err(ApiError::Conflict) => {
                still_synced.insert((*ns).clone());
            }
        }
    }

    // Step 7: advance the cache's last known payload on every successful
    // reconcile -- the secrets in `to_apply` were already written with
    // `payload` above, so the missing-source fallback must track it even
    // when the synced set itself did not change. The status patch (and the
    // synced-namespace list it governs) is still gated on the set actually
    // changing.
    let mut updated = cached.clone();
    updated.last_resolved_payload = payload;

    if still_synced != synced {
        let mut new_synced: Vec<String> = still_synced.iter().cloned().collect();
        new_synced.sort();

        match ctx.api.patch_clustersecret_status(&cached.name, new_synced.clone()).await {
            Ok(()) => {
                updated.synced_namespace = new_synced;
                ctx.cache.set(updated);
                info!(clustersecret = %cached.name, "status patched and cache advanced");
            }
            Err(e) => {
                warn!(clustersecret = %cached.name, error = %e, "status patch failed; will retry on next event");
                ctx.cache.set(updated);
            }
        }
    } else {
        ctx.cache.set(updated);
    }

    Ok(())
}
