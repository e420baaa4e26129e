use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Event;
use kube::ResourceExt;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ClusterApi, KubeClusterApi, NamespacedSecret};
use crate::crd::{ClusterSecret, DataValue};
use crate::error::ApiError;
use crate::model::{CachedClusterSecret, NamespaceInfo, NamespacePhase};
use crate::noise::is_noise_secret;
use crate::reconciler::{reconcile, resolve_payload, ReconcilerContext};

/// One of the kinds of normalized namespace events the dispatcher routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NsEventKind {
    Added,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct NamespaceEvent {
    pub kind: NsEventKind,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretEventKind {
    Added,
    Modified,
    Deleted,
}

/// A cluster-wide secret event, normalized away from the k8s wire shape so
/// the classification/noise logic stays testable.
#[derive(Debug, Clone)]
pub struct SecretEvent {
    pub kind: SecretEventKind,
    pub namespace: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// Spawns the three watch-dispatch tasks, a pool of reconcile workers, and
/// the periodic-resync fallback, running until `shutdown` is cancelled.
pub async fn run(
    ctx: Arc<ReconcilerContext>,
    kube: Arc<KubeClusterApi>,
    shutdown: CancellationToken,
    resync_interval: std::time::Duration,
) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();

    let worker_ctx = ctx.clone();
    let worker_shutdown = shutdown.clone();
    let workers = tokio::spawn(run_workers(worker_ctx, rx, worker_shutdown));

    let csec_task = tokio::spawn(run_clustersecret_watch(
        ctx.clone(),
        kube.clone(),
        tx.clone(),
        shutdown.clone(),
    ));
    let ns_task = tokio::spawn(run_namespace_watch(ctx.clone(), kube.clone(), shutdown.clone()));
    let secret_task = tokio::spawn(run_secret_watch(ctx.clone(), kube.clone(), shutdown.clone()));
    let resync_task = tokio::spawn(run_periodic_resync(ctx.clone(), tx, shutdown.clone(), resync_interval));

    let _ = tokio::join!(csec_task, ns_task, secret_task, workers, resync_task);
}

/// Every `interval`, re-enqueues every cached uid for reconciliation, acting
/// as the retry path for transient errors and catching any drift that the
/// watch streams missed.
async fn run_periodic_resync(
    ctx: Arc<ReconcilerContext>,
    tx: UnboundedSender<String>,
    shutdown: CancellationToken,
    interval: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // first tick fires immediately; skip it
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                for cached in ctx.cache.all() {
                    debug!(uid = %cached.uid, "periodic resync");
                    let _ = tx.send(cached.uid);
                }
            }
        }
    }
}

async fn run_workers(ctx: Arc<ReconcilerContext>, mut rx: UnboundedReceiver<String>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                rx.close();
                while let Ok(uid) = rx.try_recv() {
                    if let Err(e) = reconcile(&uid, &ctx).await {
                        warn!(uid, error = %e, "reconcile failed while draining queue");
                    }
                }
                break;
            }
            maybe_uid = rx.recv() => {
                match maybe_uid {
                    Some(uid) => {
                        if let Err(e) = reconcile(&uid, &ctx).await {
                            warn!(uid, error = %e, "reconcile failed");
                        }
                    }
                    None => break,
                }
            }
        }
    }
}

async fn run_clustersecret_watch(
    ctx: Arc<ReconcilerContext>,
    kube: Arc<KubeClusterApi>,
    tx: UnboundedSender<String>,
    shutdown: CancellationToken,
) {
    let mut stream = kube.clustersecret_watcher();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => {
                let Some(event) = next else { break };
                match event {
                    Ok(Event::InitApply(obj)) | Ok(Event::Apply(obj)) => {
                        handle_clustersecret_upsert(&ctx, &tx, obj).await;
                    }
                    Ok(Event::Delete(obj)) => {
                        handle_clustersecret_delete(&ctx, &kube, obj).await;
                    }
                    Ok(Event::Init) | Ok(Event::InitDone) => {}
                    Err(e) => warn!(error = %e, "clustersecret watch error"),
                }
            }
        }
    }
}

async fn run_namespace_watch(ctx: Arc<ReconcilerContext>, kube: Arc<KubeClusterApi>, shutdown: CancellationToken) {
    let mut stream = kube.namespace_watcher();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => {
                let Some(event) = next else { break };
                match event {
                    Ok(Event::InitApply(obj)) | Ok(Event::Apply(obj)) => {
                        handle_namespace_event(
                            &ctx,
                            NamespaceEvent { kind: NsEventKind::Added, name: obj.name_any() },
                        )
                        .await;
                    }
                    Ok(Event::Delete(obj)) => {
                        handle_namespace_event(
                            &ctx,
                            NamespaceEvent { kind: NsEventKind::Deleted, name: obj.name_any() },
                        )
                        .await;
                    }
                    Ok(Event::Init) | Ok(Event::InitDone) => {}
                    Err(e) => warn!(error = %e, "namespace watch error"),
                }
            }
        }
    }
}

async fn run_secret_watch(ctx: Arc<ReconcilerContext>, kube: Arc<KubeClusterApi>, shutdown: CancellationToken) {
    let mut stream = kube.secret_watcher();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => {
                let Some(event) = next else { break };
                let normalized = match event {
                    Ok(Event::InitApply(obj)) => Some(normalize_secret(SecretEventKind::Added, &obj)),
                    Ok(Event::Apply(obj)) => Some(normalize_secret(SecretEventKind::Modified, &obj)),
                    Ok(Event::Delete(obj)) => Some(normalize_secret(SecretEventKind::Deleted, &obj)),
                    Ok(Event::Init) | Ok(Event::InitDone) => None,
                    Err(e) => {
                        warn!(error = %e, "secret watch error");
                        None
                    }
                };
                if let Some(ev) = normalized {
                    handle_secret_event(&ctx, ev).await;
                }
            }
        }
    }
}

fn normalize_secret(kind: SecretEventKind, obj: &k8s_openapi::api::core::v1::Secret) -> SecretEvent {
    SecretEvent {
        kind,
        namespace: obj.namespace().unwrap_or_default(),
        name: obj.name_any(),
        labels: obj.labels().clone(),
        annotations: obj.annotations().clone(),
    }
}

/// ClusterSecret ADDED / resume-at-startup / MODIFIED handling.
///
/// MODIFIED only enqueues a reconcile when `data`, `matchNamespace`, or
/// `avoidNamespaces` actually changed; modifications limited to status or
/// uninteresting annotations are dropped silently.
async fn handle_clustersecret_upsert(ctx: &ReconcilerContext, tx: &UnboundedSender<String>, obj: ClusterSecret) {
    let Some(uid) = obj.metadata.uid.clone() else {
        warn!("received ClusterSecret event without a uid; dropping");
        return;
    };

    match ctx.cache.get(&uid) {
        None => {
            let synced = obj.status.as_ref().map(|s| s.create_fn.syncedns.clone()).unwrap_or_default();
            let cached = CachedClusterSecret::from_resource(uid.clone(), &obj, synced, BTreeMap::new());
            ctx.cache.set(cached);
            info!(uid, "new ClusterSecret observed; enqueueing reconcile");
            let _ = tx.send(uid);
        }
        Some(previous) => {
            if previous.differs_in_watched_fields(&obj) {
                debug!(uid, "ClusterSecret data/selector changed; enqueueing reconcile");
                let cached = CachedClusterSecret::from_resource(
                    uid.clone(),
                    &obj,
                    previous.synced_namespace.clone(),
                    previous.last_resolved_payload.clone(),
                );
                ctx.cache.set(cached);
                let _ = tx.send(uid);
            } else {
                debug!(uid, "ClusterSecret modified in an uninteresting field; not enqueueing");
            }
        }
    }
}

/// ClusterSecret DELETED handling.
///
/// Cache removal happens strictly before the namespaced deletes: a
/// concurrent secret-delete event arriving mid-loop must find no cached
/// ClusterSecret claiming the secret, or it would self-heal a recreate race.
async fn handle_clustersecret_delete(ctx: &ReconcilerContext, kube: &Arc<KubeClusterApi>, obj: ClusterSecret) {
    let Some(uid) = obj.metadata.uid.clone() else {
        return;
    };
    let removed = ctx.cache.remove(&uid);
    let Some(removed) = removed else {
        debug!(uid, "delete event for a ClusterSecret not in cache");
        return;
    };

    for ns in &removed.synced_namespace {
        match kube.delete_secret(ns, &removed.name).await {
            Ok(()) | Err(ApiError::NotFound) => {}
            Err(e) => warn!(namespace = %ns, clustersecret = %removed.name, error = %e, "failed to delete managed secret on ClusterSecret deletion"),
        }
    }
}

/// Namespace ADDED/DELETED handling.
pub async fn handle_namespace_event(ctx: &ReconcilerContext, event: NamespaceEvent) {
    match event.kind {
        NsEventKind::Added => handle_namespace_added(ctx, &event.name).await,
        NsEventKind::Deleted => handle_namespace_deleted(ctx, &event.name).await,
    }
}

async fn handle_namespace_added(ctx: &ReconcilerContext, name: &str) {
    for cached in ctx.cache.all() {
        let candidate = [NamespaceInfo {
            name: name.to_string(),
            phase: NamespacePhase::Active,
        }];
        let target = crate::selector::select_namespaces(
            &candidate,
            cached.match_namespace.as_deref(),
            cached.avoid_namespaces.as_deref(),
        );
        if !target.contains(name) || cached.synced_namespace.iter().any(|n| n == name) {
            continue;
        }

        let payload = match resolve_payload(ctx.api.as_ref(), &cached).await {
            Ok(p) => p,
            Err(e) => {
                warn!(clustersecret = %cached.name, error = %e, "failed to resolve payload for new namespace");
                continue;
            }
        };
        let secret = NamespacedSecret {
            name: cached.name.clone(),
            namespace: name.to_string(),
            secret_type: cached.secret_type.clone(),
            data: payload,
        };
        match ctx.api.create_secret(name, &secret).await {
            Ok(()) => {
                info!(clustersecret = %cached.name, namespace = %name, "cloned secret into newly created namespace");
                let mut updated = cached.clone();
                updated.synced_namespace.push(name.to_string());
                let new_status = updated.synced_namespace.clone();
                if ctx.api.patch_clustersecret_status(&cached.name, new_status).await.is_ok() {
                    ctx.cache.set(updated);
                }
            }
            Err(e) => warn!(clustersecret = %cached.name, namespace = %name, error = %e, "failed to clone secret into new namespace"),
        }
    }
}

async fn handle_namespace_deleted(ctx: &ReconcilerContext, name: &str) {
    for cached in ctx.cache.all() {
        if !cached.synced_namespace.iter().any(|n| n == name) {
            continue;
        }
        let mut updated = cached.clone();
        updated.synced_namespace.retain(|n| n != name);
        let new_status = updated.synced_namespace.clone();
        info!(clustersecret = %cached.name, namespace = %name, "namespace removed from synced set after its deletion");
        if ctx.api.patch_clustersecret_status(&cached.name, new_status).await.is_ok() {
            ctx.cache.set(updated);
        }
    }
}

/// Cluster-wide secret event handling: noise filter first, then
/// classification, then source/managed specific behavior.
pub async fn handle_secret_event(ctx: &ReconcilerContext, event: SecretEvent) {
    if is_noise_secret(&event.name, &event.labels) {
        return;
    }

    let is_managed = event
        .annotations
        .get(crate::consts::MANAGED_BY_ANNOTATION)
        .is_some();

    let source_for: Vec<CachedClusterSecret> = ctx
        .cache
        .all()
        .into_iter()
        .filter(|c| match c.data.get("valueFrom") {
            Some(DataValue::Ref(r)) => r.secret_key_ref.name == event.name && r.secret_key_ref.namespace == event.namespace,
            _ => false,
        })
        .collect();

    let managed_owner: Option<CachedClusterSecret> = if is_managed {
        ctx.cache
            .all()
            .into_iter()
            .find(|c| c.name == event.name && c.synced_namespace.iter().any(|n| n == &event.namespace))
    } else {
        None
    };

    if !is_managed && source_for.is_empty() {
        return;
    }

    match event.kind {
        SecretEventKind::Added | SecretEventKind::Modified => {
            for csec in &source_for {
                info!(clustersecret = %csec.name, source = %event.name, "source secret changed; re-syncing");
                let payload = match resolve_payload(ctx.api.as_ref(), csec).await {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(clustersecret = %csec.name, error = %e, "failed to resolve source secret");
                        continue;
                    }
                };
                for ns in &csec.synced_namespace {
                    let secret = NamespacedSecret {
                        name: csec.name.clone(),
                        namespace: ns.clone(),
                        secret_type: csec.secret_type.clone(),
                        data: payload.clone(),
                    };
                    match ctx.api.replace_secret(ns, &csec.name, &secret).await {
                        Ok(()) | Err(ApiError::NotFound) => {}
                        Err(e) => warn!(namespace = %ns, clustersecret = %csec.name, error = %e, "failed to re-sync from source secret"),
                    }
                }
                let mut updated = csec.clone();
                updated.last_resolved_payload = payload;
                ctx.cache.set(updated);
            }
        }
        SecretEventKind::Deleted => {
            if let Some(owner) = managed_owner {
                handle_managed_secret_deleted(ctx, &owner, &event.namespace).await;
            }
            for csec in &source_for {
                warn!(clustersecret = %csec.name, source = %event.name, namespace = %event.namespace, "source secret was deleted; managed copies are now stale");
            }
        }
    }
}

/// Self-healing: recreate a managed secret an operator or other actor
/// deleted, unless the namespace is `Terminating` or gone. Matches the
/// owning ClusterSecret by name; ClusterSecret names are unique cluster-wide.
async fn handle_managed_secret_deleted(ctx: &ReconcilerContext, owner: &CachedClusterSecret, namespace: &str) {
    match ctx.api.get_namespace(namespace).await {
        Err(ApiError::NotFound) => return,
        Ok(ns) if ns.phase == NamespacePhase::Terminating => {
            info!(clustersecret = %owner.name, namespace = %namespace, "namespace is terminating; skipping self-heal");
            return;
        }
        Err(e) => {
            warn!(clustersecret = %owner.name, namespace = %namespace, error = %e, "failed to check namespace phase before self-heal");
            return;
        }
        Ok(_) => {}
    }

    let payload = match resolve_payload(ctx.api.as_ref(), owner).await {
        Ok(p) => p,
        Err(e) => {
            warn!(clustersecret = %owner.name, error = %e, "failed to resolve payload for self-heal");
            return;
        }
    };
    let secret = NamespacedSecret {
        name: owner.name.clone(),
        namespace: namespace.to_string(),
        secret_type: owner.secret_type.clone(),
        data: payload,
    };
    match ctx.api.create_secret(namespace, &secret).await {
        Ok(()) => info!(clustersecret = %owner.name, namespace = %namespace, "self-healed managed secret"),
        Err(e) => warn!(clustersecret = %owner.name, namespace = %namespace, error = %e, "failed to self-heal managed secret"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::StateIndex;
    use crate::crd::{SecretKeyRef, ValueFrom};
    use crate::testutil::FakeClusterApi;
    use std::collections::BTreeMap;

    fn ctx(api: Arc<FakeClusterApi>) -> ReconcilerContext {
        ReconcilerContext::new(api, Arc::new(StateIndex::new()))
    }

    fn inline(pairs: &[(&str, &str)]) -> BTreeMap<String, DataValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), DataValue::Inline(v.to_string())))
            .collect()
    }

    fn insert_csec(cache: &StateIndex, uid: &str, name: &str, data: BTreeMap<String, DataValue>, synced: Vec<String>) {
        cache.set(CachedClusterSecret {
            uid: uid.to_string(),
            name: name.to_string(),
            data,
            metadata: BTreeMap::new(),
            secret_type: "Opaque".to_string(),
            match_namespace: None,
            avoid_namespaces: None,
            synced_namespace: synced,
            last_resolved_payload: BTreeMap::new(),
        });
    }

    // Namespace create via the lightweight namespace-event path.
    #[tokio::test]
    async fn namespace_added_clones_secret_into_it() {
        let api = Arc::new(FakeClusterApi::new());
        let c = ctx(api.clone());
        insert_csec(
            &c.cache,
            "u1",
            "mysecret",
            inline(&[("key", "value")]),
            vec!["default".to_string()],
        );

        handle_namespace_event(
            &c,
            NamespaceEvent {
                kind: NsEventKind::Added,
                name: "extra".to_string(),
            },
        )
        .await;

        assert_eq!(api.secret("extra", "mysecret").unwrap().data.get("key").unwrap(), "value");
        assert!(api.status_of("mysecret").contains(&"extra".to_string()));
    }

    // Namespace delete: removed from synced set, no delete call issued.
    #[tokio::test]
    async fn namespace_deleted_drops_from_synced_without_a_delete_call() {
        let api = Arc::new(FakeClusterApi::new());
        let c = ctx(api.clone());
        insert_csec(
            &c.cache,
            "u1",
            "mysecret",
            inline(&[("key", "value")]),
            vec!["default".to_string(), "myns".to_string()],
        );

        handle_namespace_event(
            &c,
            NamespaceEvent {
                kind: NsEventKind::Deleted,
                name: "myns".to_string(),
            },
        )
        .await;

        assert_eq!(api.status_of("mysecret"), vec!["default".to_string()]);
        assert!(api.delete_calls.lock().unwrap().is_empty());
        assert_eq!(c.cache.get("u1").unwrap().synced_namespace, vec!["default".to_string()]);
    }

    // Self-heal suppressed when the namespace is terminating.
    #[tokio::test]
    async fn self_heal_suppressed_when_namespace_is_terminating() {
        let api = Arc::new(FakeClusterApi::new());
        api.add_namespace("default", NamespacePhase::Terminating);
        let c = ctx(api.clone());
        insert_csec(&c.cache, "u1", "mysecret", inline(&[("key", "value")]), vec!["default".to_string()]);

        let mut annotations = BTreeMap::new();
        annotations.insert(crate::consts::MANAGED_BY_ANNOTATION.to_string(), "clustersecret-controller".to_string());
        handle_secret_event(
            &c,
            SecretEvent {
                kind: SecretEventKind::Deleted,
                namespace: "default".to_string(),
                name: "mysecret".to_string(),
                labels: BTreeMap::new(),
                annotations,
            },
        )
        .await;

        assert!(api.secret("default", "mysecret").is_none());
        assert!(api.create_calls.lock().unwrap().is_empty());
    }

    // Self-heal recreates when the namespace is active.
    #[tokio::test]
    async fn self_heal_recreates_when_namespace_is_active() {
        let api = Arc::new(FakeClusterApi::new());
        api.add_namespace("default", NamespacePhase::Active);
        let c = ctx(api.clone());
        insert_csec(&c.cache, "u1", "mysecret", inline(&[("key", "value")]), vec!["default".to_string()]);

        let mut annotations = BTreeMap::new();
        annotations.insert(crate::consts::MANAGED_BY_ANNOTATION.to_string(), "clustersecret-controller".to_string());
        handle_secret_event(
            &c,
            SecretEvent {
                kind: SecretEventKind::Deleted,
                namespace: "default".to_string(),
                name: "mysecret".to_string(),
                labels: BTreeMap::new(),
                annotations,
            },
        )
        .await;

        assert_eq!(api.secret("default", "mysecret").unwrap().data.get("key").unwrap(), "value");
        assert_eq!(api.create_calls.lock().unwrap().len(), 1);
    }

    // Noise filter: noise secrets never trigger any handling (property 6).
    #[tokio::test]
    async fn noise_secret_is_dropped_before_any_classification() {
        let api = Arc::new(FakeClusterApi::new());
        api.add_namespace("default", NamespacePhase::Active);
        let c = ctx(api.clone());
        insert_csec(&c.cache, "u1", "mysecret", inline(&[("key", "value")]), vec!["default".to_string()]);

        handle_secret_event(
            &c,
            SecretEvent {
                kind: SecretEventKind::Deleted,
                namespace: "default".to_string(),
                name: "sh.helm.release.v1.mysecret.v3".to_string(),
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            },
        )
        .await;

        assert!(api.create_calls.lock().unwrap().is_empty());
    }

    // Source secret update triggers re-fanout via the secret-event path.
    #[tokio::test]
    async fn source_secret_update_resyncs_all_synced_namespaces() {
        let api = Arc::new(FakeClusterApi::new());
        api.put_secret_unmanaged(NamespacedSecret {
            name: "src".to_string(),
            namespace: "srcns".to_string(),
            secret_type: "Opaque".to_string(),
            data: BTreeMap::from([("k".to_string(), "v2".to_string())]),
        });
        let c = ctx(api.clone());
        let mut data = BTreeMap::new();
        data.insert(
            "valueFrom".to_string(),
            DataValue::Ref(ValueFrom {
                secret_key_ref: SecretKeyRef {
                    name: "src".to_string(),
                    namespace: "srcns".to_string(),
                },
            }),
        );
        insert_csec(&c.cache, "r", "r", data, vec!["a".to_string(), "b".to_string()]);
        api.put_secret_unmanaged(NamespacedSecret {
            name: "r".to_string(),
            namespace: "a".to_string(),
            secret_type: "Opaque".to_string(),
            data: BTreeMap::from([("k".to_string(), "v1".to_string())]),
        });
        api.put_secret_unmanaged(NamespacedSecret {
            name: "r".to_string(),
            namespace: "b".to_string(),
            secret_type: "Opaque".to_string(),
            data: BTreeMap::from([("k".to_string(), "v1".to_string())]),
        });

        handle_secret_event(
            &c,
            SecretEvent {
                kind: SecretEventKind::Modified,
                namespace: "srcns".to_string(),
                name: "src".to_string(),
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            },
        )
        .await;

        assert_eq!(api.secret("a", "r").unwrap().data.get("k").unwrap(), "v2");
        assert_eq!(api.secret("b", "r").unwrap().data.get("k").unwrap(), "v2");
    }
}
