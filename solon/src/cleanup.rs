//! Orphan cleanup: removes the Elasticsearch user, sealed credential
//! record, and one-time-token policy left behind by a deleted pod.
//! Grounded on `original_source/solon/lawgiver/cleanup.go`'s
//! `deleteOrphans`, run both reactively (pod-delete watch events) and on a
//! periodic sweep, per spec's "C10-like" framing of this cleanup.

use std::sync::Arc;
use std::time::Duration;

use futures::{FutureExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::watcher::{self, watcher, Event};
use kube::runtime::WatchStreamExt;
use kube::Api;

use crate::ctx::SolonCtx;

/// Policies that must never be deleted regardless of what username a split
/// of some orphaned pod's name happens to produce.
const PROTECTED_POLICIES: [&str; 3] = ["default", "root", "solon"];

/// Built-in service accounts that share the observability stack; never
/// torn down even if a pod sharing a name-fragment disappears.
const PROTECTED_USERS: [&str; 2] = ["tracing", "metrics"];

/// Derives the Elasticsearch username for a pod the same way the
/// registration side did: for a multi-segment pod name (hyphen-joined,
/// as Kubernetes generates for ReplicaSet/Job pods), concatenate the first
/// and last segments; for a single-segment name, use it verbatim.
pub fn derive_username(pod_name: &str) -> String {
    let segments: Vec<&str> = pod_name.split('-').collect();
    match segments.as_slice() {
        [] => String::new(),
        [only] => only.to_string(),
        [first, .., last] => format!("{first}{last}"),
    }
}

/// Sealed-store path for a pod's credential record, per the persisted
/// layout `configs/<podName>`.
fn secret_path(pod_name: &str) -> String {
    format!("configs/{pod_name}")
}

pub async fn delete_orphan(ctx: &SolonCtx, pod_name: &str) {
    let username = derive_username(pod_name);
    if PROTECTED_USERS.contains(&username.as_str()) {
        tracing::debug!(pod = pod_name, username, "skipping cleanup of a protected user");
        return;
    }

    if let Err(err) = ctx.elastic.delete_user(&username).await {
        tracing::warn!(%err, pod = pod_name, username, "failed to delete orphaned elasticsearch user");
    }

    let path = secret_path(pod_name);
    if let Err(err) = ctx.secrets.delete_secret(&path).await {
        tracing::warn!(%err, pod = pod_name, "failed to soft-delete orphaned credential record");
    }
    if let Err(err) = ctx.secrets.remove_secret(&path).await {
        tracing::warn!(%err, pod = pod_name, "failed to hard-remove orphaned credential record");
    }

    let policy_name = format!("policy-{pod_name}");
    if PROTECTED_POLICIES.contains(&policy_name.as_str()) {
        return;
    }
    if let Err(err) = ctx.secrets.delete_policy(&policy_name).await {
        tracing::warn!(%err, pod = pod_name, "failed to delete orphaned one-time-token policy");
    }
}

/// Reacts to pod-delete events as they happen, rather than waiting for the
/// periodic sweep below. `touched_objects()`/`applied_objects()` both
/// discard the `Event` wrapper and so can't distinguish a delete from a
/// create/update; this stays on the raw `watcher()` stream and matches
/// `Event::Delete` explicitly instead.
pub async fn run_pod_delete_watcher(ctx: Arc<SolonCtx>) {
    let api: Api<Pod> = Api::namespaced(ctx.gateway.client(), &ctx.env.namespace);
    let result = watcher(api, watcher::Config::default())
        .default_backoff()
        .try_for_each(|event| {
            let ctx = ctx.clone();
            async move {
                if let Event::Delete(pod) = event {
                    if let Some(pod_name) = pod.metadata.name {
                        delete_orphan(&ctx, &pod_name).await;
                    }
                }
                Ok(())
            }
        })
        .await;
    if let Err(err) = result {
        tracing::error!(%err, "pod watcher for orphan cleanup terminated");
    }
}

/// Every `cleanup_timer_secs`, lists every sealed credential path and tears
/// down any whose pod no longer exists. Complements the reactive watcher
/// above in case a delete event was ever missed.
pub async fn run_periodic_sweep(ctx: Arc<SolonCtx>, shutdown: tokio_util::sync::CancellationToken) {
    let mut ticker = tokio::time::interval(Duration::from_secs(ctx.env.cleanup_timer_secs));
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let ctx = ctx.clone();
                let outcome = std::panic::AssertUnwindSafe(sweep_once(&ctx))
                    .catch_unwind()
                    .await;
                if let Err(panic) = outcome {
                    tracing::error!(?panic, "periodic orphan sweep panicked; continuing on next tick");
                }
            }
        }
    }
}

async fn sweep_once(ctx: &SolonCtx) {
    let paths = match ctx.secrets.list_secrets().await {
        Ok(paths) => paths,
        Err(err) => {
            tracing::warn!(%err, "failed to list sealed credential paths for orphan sweep");
            return;
        }
    };

    for path in paths {
        let Some(pod_name) = path.strip_prefix("configs/") else {
            continue;
        };
        match ctx.gateway.pods(&ctx.env.namespace).get_opt(pod_name).await {
            Ok(Some(_)) => continue,
            Ok(None) => delete_orphan(ctx, pod_name).await,
            Err(err) => {
                tracing::warn!(%err, pod = %pod_name, "failed to check pod existence during orphan sweep");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_segment_name_is_used_verbatim() {
        assert_eq!(derive_username("solon"), "solon");
    }

    #[test]
    fn multi_segment_name_concatenates_first_and_last() {
        assert_eq!(derive_username("herodotos-5f9c8d-x2k1p"), "herodotosx2k1p");
    }

    #[test]
    fn two_segment_name_concatenates_both() {
        assert_eq!(derive_username("herodotos-abc123"), "herodotosabc123");
    }
}
