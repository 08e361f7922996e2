//! Reconciler tick (C10): re-applies drift back to the declared state
//! between admission-triggered compiles — secrets missing required keys,
//! firewall policies that vanished, and firewall policies left behind by
//! workloads that no longer exist.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use perikles_k8s::MappingService;
use tokio_util::sync::CancellationToken;

use crate::compiler::{self, CompileInput, WorkloadKind};
use crate::ctx::Ctx;
use crate::mapping;

const REQUIRED_SECRET_KEYS: &[&str] = &["tls.crt", "tls.key", "tls.pem"];
const ALLOW_ALL_PREFIX: &str = "allow-all-";

fn firewall_gvk(ctx: &Ctx) -> perikles_k8s::FirewallGvk {
    perikles_k8s::FirewallGvk {
        group: ctx.env.firewall_policy_group.clone(),
        version: ctx.env.firewall_policy_version.clone(),
        kind: ctx.env.firewall_policy_kind.clone(),
        plural: ctx.env.firewall_policy_plural.clone(),
    }
}

async fn ensure_secret_present(ctx: &Arc<Ctx>, service: &MappingService) {
    let present = ctx
        .gateway
        .secret_has_keys(&service.namespace, &service.secret_name, REQUIRED_SECRET_KEYS)
        .await
        .unwrap_or(false);
    if present {
        return;
    }

    tracing::warn!(host = %service.name, "certificate secret missing or incomplete, recompiling");
    let input = CompileInput {
        kind: WorkloadKind::Deployment,
        name: service.name.clone(),
        namespace: service.namespace.clone(),
        annotations: crate::annotations::WorkloadAnnotations {
            hostname: Some(service.name.clone()),
            validity_days: Some(service.validity),
            host_secret: Some(service.secret_name.clone()),
            accesses: Vec::new(),
            role: None,
            access: Vec::new(),
        },
        secret_volume_names: Vec::new(),
        container_names: Vec::new(),
    };
    compiler::compile(ctx.clone(), input).await;
}

async fn prune_stale_firewall_policies(ctx: &Arc<Ctx>) {
    let gvk = firewall_gvk(ctx);
    let names = match ctx.gateway.list_firewall_policy_names(&ctx.env.namespace, &gvk).await {
        Ok(names) => names,
        Err(err) => {
            tracing::error!(%err, "failed to list firewall policies for reconciliation");
            return;
        }
    };

    let deployments = match ctx.gateway.list_deployment_names(&ctx.env.namespace).await {
        Ok(names) => names,
        Err(err) => {
            tracing::error!(%err, "failed to list deployments for firewall reconciliation");
            return;
        }
    };

    for name in names {
        if name.starts_with(ALLOW_ALL_PREFIX) {
            continue;
        }
        let workload = name
            .strip_prefix("restrict-elasticsearch-access-")
            .or_else(|| name.strip_prefix("allow-").and_then(|rest| rest.split("-access-").next()));
        let Some(workload) = workload else { continue };
        if !deployments.iter().any(|d| d == workload) {
            tracing::info!(policy = %name, "deleting firewall policy for vanished workload");
            if let Err(err) = ctx.gateway.delete_firewall_policy(&ctx.env.namespace, &gvk, &name).await {
                tracing::error!(policy = %name, %err, "failed to delete stale firewall policy");
            }
        }
    }
}

pub async fn run_reconcile_tick(ctx: &Arc<Ctx>) {
    match mapping::list_services(ctx).await {
        Ok(services) => {
            for service in &services {
                if service.active {
                    ensure_secret_present(ctx, service).await;
                }
            }
        }
        Err(err) => tracing::error!(%err, "failed to list mapping services for reconciliation"),
    }

    prune_stale_firewall_policies(ctx).await;
}

pub async fn run_reconcile_loop(ctx: Arc<Ctx>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(ctx.env.reconcile_timer_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let ctx = ctx.clone();
                let result = std::panic::AssertUnwindSafe(run_reconcile_tick(&ctx)).catch_unwind().await;
                if let Err(panic) = result {
                    tracing::error!(?panic, "reconcile tick panicked");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("reconcile loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn allow_all_prefix_is_recognized() {
        assert!("allow-all-ingress".starts_with(super::ALLOW_ALL_PREFIX));
    }
}
