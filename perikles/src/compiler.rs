//! Annotation Compiler (C6): four independent branches, run concurrently,
//! each under its own retry, reporting failures into a bounded error sink
//! drained after the admission response has already gone out (§4.3).

use std::collections::BTreeMap;
use std::sync::Arc;

use perikles_k8s::{FirewallGvk, FirewallPolicyDocument, IngressRule};
use tokio::sync::mpsc;

use crate::annotations::WorkloadAnnotations;
use crate::ctx::Ctx;
use crate::firewall_rules::tracing_sidecar_rules;
use crate::mapping::{queue_client_update, queue_host_update, ClientUpdate, HostUpdate};

const DEFAULT_VALIDITY_DAYS: i64 = 365;
const TRACING_ALIAS: &str = "tracing";
const VAULT_APP_LABEL: &str = "vault";
const VAULT_PORT: u16 = 8200;
const ELASTICSEARCH_PORT: u16 = 9200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    Job,
}

#[derive(Debug, Clone)]
pub struct CompileInput {
    pub kind: WorkloadKind,
    pub name: String,
    pub namespace: String,
    pub annotations: WorkloadAnnotations,
    /// Names of secret-backed volumes referenced by the pod template, used
    /// to infer `secretName` when `perikles/hostsecret` is absent.
    pub secret_volume_names: Vec<String>,
    pub container_names: Vec<String>,
}

fn firewall_gvk(ctx: &Ctx) -> FirewallGvk {
    FirewallGvk {
        group: ctx.env.firewall_policy_group.clone(),
        version: ctx.env.firewall_policy_version.clone(),
        kind: ctx.env.firewall_policy_kind.clone(),
        plural: ctx.env.firewall_policy_plural.clone(),
    }
}

fn selector(key: &str, value: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value.to_string())])
}

/// Entry point invoked by the webhook as a detached task, and by the
/// informer (C12) on deployment/job create. Runs every applicable branch
/// concurrently; a failure in one branch never blocks the others.
pub async fn compile(ctx: Arc<Ctx>, input: CompileInput) {
    let (tx, mut rx) = mpsc::channel::<(&'static str, anyhow::Error)>(16);

    let logger = tokio::spawn(async move {
        while let Some((branch, err)) = rx.recv().await {
            tracing::error!(branch, %err, "annotation-compiler branch failed");
        }
    });

    tokio::join!(
        branch_certificate(&ctx, &input, tx.clone()),
        branch_client_edges(&ctx, &input, tx.clone()),
        branch_db_firewall(&ctx, &input, tx.clone()),
        branch_service_firewall(&ctx, &input, tx.clone()),
    );

    drop(tx);
    let _ = logger.await;
}

fn infer_secret_name(annotations: &WorkloadAnnotations, volumes: &[String], hostname: &str) -> String {
    if let Some(explicit) = &annotations.host_secret {
        return explicit.clone();
    }
    if let Some(matching) = volumes.iter().find(|v| v.contains(hostname)) {
        return matching.clone();
    }
    format!("{hostname}-tls-certs")
}

/// Certificate branch: deployments only, guarded by `perikles/hostname`.
async fn branch_certificate(ctx: &Ctx, input: &CompileInput, tx: mpsc::Sender<(&'static str, anyhow::Error)>) {
    if input.kind != WorkloadKind::Deployment {
        return;
    }
    let Some(hostname) = input.annotations.hostname.clone() else {
        return;
    };

    let result: anyhow::Result<()> = async {
        let secret_name = infer_secret_name(&input.annotations, &input.secret_volume_names, &hostname);
        let validity = input.annotations.validity_days.unwrap_or(DEFAULT_VALIDITY_DAYS);
        let sans = vec![
            hostname.clone(),
            format!("{hostname}.{}", input.namespace),
            format!("{hostname}.{}.svc", input.namespace),
            format!("{hostname}.{}.svc.cluster.local", input.namespace),
        ];

        let leaf = ctx.ca.issue_leaf(&sans, validity)?;
        let data = BTreeMap::from([
            ("tls.crt".to_string(), leaf.cert_pem.into_bytes()),
            ("tls.key".to_string(), leaf.key_pem.into_bytes()),
            ("tls.pem".to_string(), ctx.ca.ca_pem().into_bytes()),
        ]);
        ctx.gateway
            .upsert_secret(&input.namespace, &secret_name, data)
            .await?;

        queue_host_update(
            ctx,
            HostUpdate {
                host_name: hostname,
                kube_type: "Deployment".to_string(),
                secret_name,
                validity,
                active: true,
            },
        )
        .await;
        Ok(())
    }
    .await;

    if let Err(err) = result {
        let _ = tx.send(("certificate", err)).await;
    }
}

/// Client-edge branch: deployments only, one queued update per access.
async fn branch_client_edges(ctx: &Ctx, input: &CompileInput, _tx: mpsc::Sender<(&'static str, anyhow::Error)>) {
    if input.kind != WorkloadKind::Deployment {
        return;
    }
    for host in &input.annotations.accesses {
        queue_client_update(
            ctx,
            ClientUpdate {
                host_name: host.clone(),
                client_name: input.name.clone(),
                kube_type: "Deployment".to_string(),
            },
        )
        .await;
    }
}

/// DB-access firewall branch: deployments and jobs, guarded by `role`/`access`.
async fn branch_db_firewall(ctx: &Ctx, input: &CompileInput, tx: mpsc::Sender<(&'static str, anyhow::Error)>) {
    if !input.annotations.has_db_access() {
        return;
    }
    let role = input.annotations.role.clone().expect("has_db_access guarantees role");

    let result: anyhow::Result<()> = async {
        let policy_name = format!("restrict-elasticsearch-access-{}", input.name);
        let mut doc = FirewallPolicyDocument::new(
            policy_name,
            selector(
                "elasticsearch.k8s.elastic.co/cluster-name",
                &ctx.env.elasticsearch_cluster_name,
            ),
        );
        let mut ingress = IngressRule {
            from: selector("app", &input.name),
            ports: vec![ELASTICSEARCH_PORT],
            http: Vec::new(),
        };

        if ctx.env.l7_mode_enabled {
            let catalog = ctx.rule_catalog.load();
            if catalog.is_empty() {
                tracing::warn!("L7 mode enabled but rule catalog is empty; degrading to L3/L4");
            } else {
                for access in &input.annotations.access {
                    if let Some(rules) = catalog.rules_for(&role, access) {
                        ingress.http.extend(rules);
                    } else {
                        tracing::warn!(role = %role, "no L7 rules defined for role");
                    }
                }
                if input
                    .container_names
                    .iter()
                    .any(|c| c.contains(crate::firewall_rules::TRACING_SIDECAR_CONTAINER_NAME))
                {
                    ingress.http.extend(tracing_sidecar_rules(TRACING_ALIAS));
                }
            }
        }

        doc = doc.with_ingress(ingress);
        ctx.gateway
            .apply_firewall_policy(&input.namespace, &firewall_gvk(ctx), &doc)
            .await?;
        Ok(())
    }
    .await;

    if let Err(err) = result {
        let _ = tx.send(("db-firewall", err)).await;
    }
}

/// Service-to-service firewall branch: deployments only.
async fn branch_service_firewall(ctx: &Ctx, input: &CompileInput, tx: mpsc::Sender<(&'static str, anyhow::Error)>) {
    if input.kind != WorkloadKind::Deployment {
        return;
    }

    let result: anyhow::Result<()> = async {
        for host in &input.annotations.accesses {
            let ports = ctx.gateway.resolve_service_ports(&input.namespace, host).await?;
            let doc = FirewallPolicyDocument::new(
                format!("allow-{}-access-{host}", input.name),
                selector("app", host),
            )
            .with_ingress(IngressRule {
                from: selector("app", &input.name),
                ports: ports.into_iter().map(|p| p as u16).collect(),
                http: Vec::new(),
            });
            ctx.gateway
                .apply_firewall_policy(&input.namespace, &firewall_gvk(ctx), &doc)
                .await?;
        }

        if input
            .container_names
            .iter()
            .any(|c| c.contains(&ctx.env.credential_broker_container_name))
        {
            let doc = FirewallPolicyDocument::new(
                format!("allow-{}-access-vault", input.name),
                selector("app", VAULT_APP_LABEL),
            )
            .with_ingress(IngressRule {
                from: selector("app", &input.name),
                ports: vec![VAULT_PORT],
                http: Vec::new(),
            });
            ctx.gateway
                .apply_firewall_policy(&input.namespace, &firewall_gvk(ctx), &doc)
                .await?;
        }
        Ok(())
    }
    .await;

    if let Err(err) = result {
        let _ = tx.send(("service-firewall", err)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_secret_name_prefers_explicit_hostsecret() {
        let annotations = WorkloadAnnotations {
            host_secret: Some("custom-secret".to_string()),
            ..Default::default()
        };
        assert_eq!(infer_secret_name(&annotations, &[], "perikles"), "custom-secret");
    }

    #[test]
    fn infer_secret_name_falls_back_to_matching_volume() {
        let annotations = WorkloadAnnotations::default();
        let volumes = vec!["perikles-certs-volume".to_string()];
        assert_eq!(infer_secret_name(&annotations, &volumes, "perikles"), "perikles-certs-volume");
    }

    #[test]
    fn infer_secret_name_defaults_to_convention() {
        let annotations = WorkloadAnnotations::default();
        assert_eq!(infer_secret_name(&annotations, &[], "perikles"), "perikles-tls-certs");
    }
}
