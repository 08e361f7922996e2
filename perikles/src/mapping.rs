//! Service-Mapping CRD operations (C4) and the pending-update batcher (C9).
//!
//! A single mutex guards both the in-memory pending-update queue and every
//! read-modify-write cycle against the `ServiceMapping` CRD — holding it
//! across the cluster API call is deliberate (§5), and `add_client_to_mapping`
//! releases it briefly to recurse into `add_host_to_mapping` exactly as
//! specified in §4.5.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::FutureExt;
use kube::api::PostParams;
use perikles_k8s::{MappingClient, MappingService, ServiceMapping};

use crate::ctx::Ctx;

#[derive(Debug, thiserror::Error)]
pub enum MappingError {
    #[error("cluster API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("gave up after {0} attempts")]
    RetriesExhausted(u32),
}

#[derive(Debug, Clone)]
pub struct HostUpdate {
    pub host_name: String,
    pub kube_type: String,
    pub secret_name: String,
    pub validity: i64,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct ClientUpdate {
    pub host_name: String,
    pub client_name: String,
    pub kube_type: String,
}

/// One queued mutation. Spec's data model names this `PendingUpdate` with
/// an `isHostUpdate: bool` discriminant over a flat field set; an enum is
/// the equivalent, more idiomatic shape for the same two variants.
#[derive(Debug, Clone)]
pub enum PendingUpdate {
    Host(HostUpdate),
    Client(ClientUpdate),
}

/// Map from host name to its ordered sequence of queued updates. Never
/// persisted; owned entirely by the batcher.
pub type PendingUpdates = BTreeMap<String, Vec<PendingUpdate>>;

#[derive(Default)]
pub struct MappingState {
    /// Guards both this queue and every CRD read-modify-write cycle.
    guarded: tokio::sync::Mutex<PendingUpdates>,
}

async fn retry_bounded<F, Fut, T>(attempts: u32, delay: Duration, mut op: F) -> Result<T, MappingError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, kube::Error>>,
{
    let mut last_err = None;
    for attempt in 0..attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                tracing::warn!(attempt, %err, "mapping CRD operation failed, retrying");
                last_err = Some(err);
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    let _ = last_err;
    Err(MappingError::RetriesExhausted(attempts))
}

/// Queues a host update under the mapping mutex. Called by the annotation
/// compiler (C6); applied later by the batcher tick, not immediately.
pub async fn queue_host_update(ctx: &Ctx, update: HostUpdate) {
    let mut pending = ctx.mapping.guarded.lock().await;
    pending
        .entry(update.host_name.clone())
        .or_default()
        .push(PendingUpdate::Host(update));
}

/// Queues a client-edge update under the mapping mutex.
pub async fn queue_client_update(ctx: &Ctx, update: ClientUpdate) {
    let mut pending = ctx.mapping.guarded.lock().await;
    pending
        .entry(update.host_name.clone())
        .or_default()
        .push(PendingUpdate::Client(update));
}

/// `addHostToMapping`: fetches the CRD, updates or appends the named
/// service in place, and persists. Retried up to 3 times with a 2 s delay
/// on conflict/transient failure.
pub async fn add_host_to_mapping(ctx: &Ctx, update: &HostUpdate) -> Result<(), MappingError> {
    let _guard = ctx.mapping.guarded.lock().await;
    add_host_to_mapping_locked(ctx, update).await
}

async fn add_host_to_mapping_locked(ctx: &Ctx, update: &HostUpdate) -> Result<(), MappingError> {
    let api = ctx.gateway.service_mappings(&ctx.env.namespace);
    retry_bounded(3, Duration::from_secs(2), || async {
        let mut mapping: ServiceMapping = api.get(&ctx.env.mapping_name).await?;
        match mapping.spec.find_service_mut(&update.host_name) {
            Some(service) => {
                service.active = update.active;
                service.validity = update.validity;
                service.kube_type = update.kube_type.clone();
                service.secret_name = update.secret_name.clone();
            }
            None => {
                let mut service = MappingService {
                    name: update.host_name.clone(),
                    kube_type: update.kube_type.clone(),
                    namespace: ctx.env.namespace.clone(),
                    secret_name: update.secret_name.clone(),
                    active: update.active,
                    validity: update.validity,
                    created: String::new(),
                    clients: Vec::new(),
                };
                service.stamp_created_now();
                mapping.spec.services.push(service);
            }
        }
        api.replace(&ctx.env.mapping_name, &PostParams::default(), &mapping)
            .await
    })
    .await?;
    Ok(())
}

/// `addClientToMapping`: if the host is missing, releases the lock to
/// recurse into `add_host_to_mapping` with an implicit (inactive) host
/// entry, then reacquires the lock and appends the client.
pub async fn add_client_to_mapping(ctx: &Ctx, update: &ClientUpdate) -> Result<(), MappingError> {
    {
        let guard = ctx.mapping.guarded.lock().await;
        let api = ctx.gateway.service_mappings(&ctx.env.namespace);
        let mapping: ServiceMapping = api.get(&ctx.env.mapping_name).await?;
        let host_present = mapping.spec.find_service(&update.host_name).is_some();
        drop(guard);

        if !host_present {
            let implicit = HostUpdate {
                host_name: update.host_name.clone(),
                kube_type: update.kube_type.clone(),
                secret_name: format!("{}-tls-certs", update.host_name),
                validity: 0,
                active: false,
            };
            add_host_to_mapping(ctx, &implicit).await?;
        }
    }

    let _guard = ctx.mapping.guarded.lock().await;
    let api = ctx.gateway.service_mappings(&ctx.env.namespace);
    retry_bounded(3, Duration::from_secs(2), || async {
        let mut mapping: ServiceMapping = api.get(&ctx.env.mapping_name).await?;
        if let Some(service) = mapping.spec.find_service_mut(&update.host_name) {
            if !service.clients.iter().any(|c| c.name == update.client_name) {
                service.clients.push(MappingClient {
                    name: update.client_name.clone(),
                    kube_type: update.kube_type.clone(),
                    namespace: ctx.env.namespace.clone(),
                });
            }
        }
        api.replace(&ctx.env.mapping_name, &PostParams::default(), &mapping)
            .await
    })
    .await?;
    Ok(())
}

/// `processPendingUpdates`: snapshots the queue under lock, clears it,
/// releases, then applies each host's updates in the order queued (host
/// update first, then its clients). Individual failures are logged and do
/// not stop the batch.
pub async fn process_pending_updates(ctx: &Ctx) {
    let snapshot = {
        let mut pending = ctx.mapping.guarded.lock().await;
        std::mem::take(&mut *pending)
    };

    for (host, updates) in snapshot {
        for update in updates {
            let result = match &update {
                PendingUpdate::Host(host_update) => add_host_to_mapping(ctx, host_update).await,
                PendingUpdate::Client(client_update) => add_client_to_mapping(ctx, client_update).await,
            };
            if let Err(err) = result {
                tracing::error!(host, %err, "pending mapping update failed");
            }
        }
    }
}

/// Returns a snapshot of every service currently recorded in the mapping,
/// for the rotation and reconciler ticks to inspect.
pub async fn list_services(ctx: &Ctx) -> Result<Vec<MappingService>, MappingError> {
    let api = ctx.gateway.service_mappings(&ctx.env.namespace);
    let mapping: ServiceMapping = api.get(&ctx.env.mapping_name).await?;
    Ok(mapping.spec.services)
}

/// Stamps a service's `created` timestamp to now, preserving every other
/// field. Called after a certificate renewal resets the rotation clock.
pub async fn mark_host_renewed(ctx: &Ctx, host_name: &str) -> Result<(), MappingError> {
    let _guard = ctx.mapping.guarded.lock().await;
    let api = ctx.gateway.service_mappings(&ctx.env.namespace);
    retry_bounded(3, Duration::from_secs(2), || async {
        let mut mapping: ServiceMapping = api.get(&ctx.env.mapping_name).await?;
        if let Some(service) = mapping.spec.find_service_mut(host_name) {
            service.stamp_created_now();
        }
        api.replace(&ctx.env.mapping_name, &PostParams::default(), &mapping)
            .await
    })
    .await?;
    Ok(())
}

/// Removes services and clients whose backing deployment no longer exists.
/// Returns the names removed, for the caller to log.
pub async fn prune_orphans(ctx: &Ctx) -> Result<Vec<String>, MappingError> {
    let _guard = ctx.mapping.guarded.lock().await;
    let api = ctx.gateway.service_mappings(&ctx.env.namespace);
    let mut mapping: ServiceMapping = api.get(&ctx.env.mapping_name).await?;
    let mut removed = Vec::new();
    let mut kept_services = Vec::with_capacity(mapping.spec.services.len());

    for mut service in mapping.spec.services.drain(..) {
        if !ctx
            .gateway
            .deployment_exists(&service.namespace, &service.name)
            .await
            .unwrap_or(true)
        {
            if let Err(err) = ctx.gateway.delete_secret(&service.namespace, &service.secret_name).await {
                tracing::error!(host = %service.name, %err, "failed to delete secret for orphaned mapping entry");
            }
            removed.push(service.name.clone());
            continue;
        }

        let mut kept_clients = Vec::with_capacity(service.clients.len());
        for client in service.clients.drain(..) {
            if ctx
                .gateway
                .deployment_exists(&client.namespace, &client.name)
                .await
                .unwrap_or(true)
            {
                kept_clients.push(client);
            } else {
                removed.push(format!("{}/{}", service.name, client.name));
            }
        }
        service.clients = kept_clients;
        kept_services.push(service);
    }

    if !removed.is_empty() {
        mapping.spec.services = kept_services;
        api.replace(&ctx.env.mapping_name, &PostParams::default(), &mapping)
            .await?;
    }
    Ok(removed)
}

/// Runs the batcher tick loop until `shutdown` fires. A panic inside a
/// single tick is recovered and logged; the loop continues.
pub async fn run_batcher(ctx: std::sync::Arc<Ctx>, shutdown: tokio_util::sync::CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(ctx.env.pending_update_timer_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let ctx = ctx.clone();
                let result = std::panic::AssertUnwindSafe(process_pending_updates(&ctx))
                    .catch_unwind()
                    .await;
                if let Err(panic) = result {
                    tracing::error!(?panic, "pending-update batcher tick panicked");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("pending-update batcher shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_updates_group_by_host_in_order() {
        let mut pending: PendingUpdates = BTreeMap::new();
        pending.entry("perikles".to_string()).or_default().push(PendingUpdate::Host(HostUpdate {
            host_name: "perikles".into(),
            kube_type: "Deployment".into(),
            secret_name: "perikles-tls-certs".into(),
            validity: 10,
            active: true,
        }));
        pending.entry("perikles".to_string()).or_default().push(PendingUpdate::Client(ClientUpdate {
            host_name: "perikles".into(),
            client_name: "alexandros".into(),
            kube_type: "Deployment".into(),
        }));

        let updates = &pending["perikles"];
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0], PendingUpdate::Host(_)));
        assert!(matches!(updates[1], PendingUpdate::Client(_)));
    }
}
