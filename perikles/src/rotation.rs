//! Certificate rotation tick (C10): reissues and staggers restarts for
//! hosts whose certificate is within 24h of its validity window expiring,
//! and prunes mapping entries whose backing deployment is gone.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use perikles_k8s::MappingService;
use rand::Rng;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

use crate::ctx::Ctx;
use crate::mapping;

const STAGGER_BASE_DELAY: Duration = Duration::from_secs(20 * 60);
const STAGGER_JITTER_SECS: u64 = 120;
const RESTART_RETRY_ATTEMPTS: u32 = 20;
const RESTART_RETRY_DELAY: Duration = Duration::from_secs(1);
const EXPIRY_GRACE: time::Duration = time::Duration::hours(24);

fn needs_redeploy(service: &MappingService) -> bool {
    let Ok(created) =
        OffsetDateTime::parse(&service.created, &time::format_description::well_known::Rfc3339)
    else {
        return true;
    };
    let age = OffsetDateTime::now_utc() - created;
    age > time::Duration::days(service.validity) - EXPIRY_GRACE
}

async fn redeploy_host(ctx: &Arc<Ctx>, service: &MappingService) {
    let sans = vec![
        service.name.clone(),
        format!("{}.{}", service.name, service.namespace),
        format!("{}.{}.svc", service.name, service.namespace),
        format!("{}.{}.svc.cluster.local", service.name, service.namespace),
    ];
    let leaf = match ctx.ca.issue_leaf(&sans, service.validity) {
        Ok(leaf) => leaf,
        Err(err) => {
            tracing::error!(host = %service.name, %err, "certificate renewal failed");
            return;
        }
    };
    let data = std::collections::BTreeMap::from([
        ("tls.crt".to_string(), leaf.cert_pem.into_bytes()),
        ("tls.key".to_string(), leaf.key_pem.into_bytes()),
        ("tls.pem".to_string(), ctx.ca.ca_pem().into_bytes()),
    ]);
    if let Err(err) = ctx
        .gateway
        .upsert_secret(&service.namespace, &service.secret_name, data)
        .await
    {
        tracing::error!(host = %service.name, %err, "failed to write renewed secret");
        return;
    }
    if let Err(err) = mapping::mark_host_renewed(ctx, &service.name).await {
        tracing::error!(host = %service.name, %err, "failed to stamp renewal timestamp");
    }

    tracing::info!(
        host = %service.name,
        clients = service.clients.len(),
        "certificate renewed, staggering client restarts"
    );
    let ctx = ctx.clone();
    let clients = service.clients.clone();
    tokio::spawn(async move {
        tokio::time::sleep(STAGGER_BASE_DELAY).await;
        for client in clients {
            let jitter = Duration::from_secs(rand::thread_rng().gen_range(0..=STAGGER_JITTER_SECS));
            tokio::time::sleep(jitter).await;
            if let Err(err) = restart_client(&ctx, &client.namespace, &client.name).await {
                tracing::error!(client = %client.name, %err, "rolling restart never succeeded after renewal");
            }
        }
    });
}

async fn restart_client(ctx: &Ctx, namespace: &str, name: &str) -> Result<(), perikles_k8s::GatewayError> {
    let mut last_err = None;
    for attempt in 0..RESTART_RETRY_ATTEMPTS {
        match ctx.gateway.touch_rolling_annotation(namespace, name).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                tracing::warn!(attempt, client = name, %err, "rolling restart patch failed, retrying");
                last_err = Some(err);
                tokio::time::sleep(RESTART_RETRY_DELAY).await;
            }
        }
    }
    Err(last_err.expect("loop runs RESTART_RETRY_ATTEMPTS > 0 times"))
}

pub async fn run_rotation_tick(ctx: &Arc<Ctx>) {
    match mapping::prune_orphans(ctx).await {
        Ok(removed) if !removed.is_empty() => tracing::info!(?removed, "pruned orphaned mapping entries"),
        Ok(_) => {}
        Err(err) => tracing::error!(%err, "orphan pruning failed"),
    }

    let services = match mapping::list_services(ctx).await {
        Ok(services) => services,
        Err(err) => {
            tracing::error!(%err, "failed to list mapping services for rotation");
            return;
        }
    };

    for service in &services {
        if service.active && needs_redeploy(service) {
            redeploy_host(ctx, service).await;
        }
    }
}

pub async fn run_rotation_loop(ctx: Arc<Ctx>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(ctx.env.rotation_timer_secs));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let ctx = ctx.clone();
                let result = std::panic::AssertUnwindSafe(run_rotation_tick(&ctx)).catch_unwind().await;
                if let Err(panic) = result {
                    tracing::error!(?panic, "rotation tick panicked");
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!("rotation loop shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(created: &str, validity_days: i64, active: bool) -> MappingService {
        MappingService {
            name: "perikles".to_string(),
            kube_type: "Deployment".to_string(),
            namespace: "odysseia".to_string(),
            secret_name: "perikles-tls-certs".to_string(),
            active,
            validity: validity_days,
            created: created.to_string(),
            clients: Vec::new(),
        }
    }

    #[test]
    fn fresh_certificate_does_not_need_redeploy() {
        let now = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap();
        assert!(!needs_redeploy(&service(&now, 365, true)));
    }

    #[test]
    fn certificate_within_24h_of_expiry_needs_redeploy() {
        let created = (OffsetDateTime::now_utc() - time::Duration::days(9) - time::Duration::hours(1))
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap();
        assert!(needs_redeploy(&service(&created, 10, true)));
    }

    #[test]
    fn unparsable_timestamp_is_treated_as_due() {
        assert!(needs_redeploy(&service("not-a-timestamp", 365, true)));
    }
}
