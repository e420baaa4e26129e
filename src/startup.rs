use std::collections::BTreeMap;

use tracing::info;

use crate::api::ClusterApi;
use crate::cache::StateIndex;
use crate::model::CachedClusterSecret;

/// Lists all existing ClusterSecrets and populates the in-memory cache.
/// Deliberately does not enqueue any reconciliation: convergence is left to
/// the watch stream's resume events, avoiding a thundering reconcile on
/// restart.
pub async fn load_initial_state(api: &dyn ClusterApi, cache: &StateIndex) -> Result<(), crate::error::Error> {
    let existing = api.list_clustersecrets().await?;
    info!(count = existing.len(), "loaded existing ClusterSecrets at startup");

    for item in existing {
        let Some(uid) = item.metadata.uid.clone() else {
            continue;
        };
        let synced = item.status.as_ref().map(|s| s.create_fn.syncedns.clone()).unwrap_or_default();
        cache.set(CachedClusterSecret::from_resource(uid, &item, synced, BTreeMap::new()));
    }

    Ok(())
}
