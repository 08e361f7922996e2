//! Informer dispatch (C12): watches Deployments, Jobs, and Job-descended
//! Pods, compiling annotations on every apply. Deletions are not handled
//! here — orphaned mapping entries and firewall policies are swept up by
//! the periodic rotation/reconcile ticks instead, which keeps this module
//! a pure "react to creates/updates" dispatcher.

use std::sync::Arc;

use futures::TryStreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::{watcher, WatchStreamExt};
use kube::Api;

use crate::annotations::WorkloadAnnotations;
use crate::compiler::{self, CompileInput, WorkloadKind};
use crate::ctx::Ctx;

fn deployment_input(deployment: Deployment) -> Option<CompileInput> {
    let name = deployment.metadata.name?;
    let namespace = deployment.metadata.namespace?;
    let template = deployment.spec?.template;
    let annotations = template
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default();
    let pod_spec = template.spec.unwrap_or_default();
    let secret_volume_names = pod_spec
        .volumes
        .unwrap_or_default()
        .into_iter()
        .filter(|v| v.secret.is_some())
        .map(|v| v.name)
        .collect();
    let container_names = pod_spec.containers.into_iter().map(|c| c.name).collect();

    Some(CompileInput {
        kind: WorkloadKind::Deployment,
        name,
        namespace,
        annotations: WorkloadAnnotations::from_map(&annotations.into_iter().collect()),
        secret_volume_names,
        container_names,
    })
}

fn job_input(job: Job) -> Option<CompileInput> {
    let name = job.metadata.name?;
    let namespace = job.metadata.namespace?;
    let template = job.spec?.template;
    let annotations = template
        .metadata
        .as_ref()
        .and_then(|m| m.annotations.clone())
        .unwrap_or_default();
    let container_names = template
        .spec
        .unwrap_or_default()
        .containers
        .into_iter()
        .map(|c| c.name)
        .collect();

    Some(CompileInput {
        kind: WorkloadKind::Job,
        name,
        namespace,
        annotations: WorkloadAnnotations::from_map(&annotations.into_iter().collect()),
        secret_volume_names: Vec::new(),
        container_names,
    })
}

/// A pod owned by a Job carries its own copy of the Job's pod-template
/// annotations; dispatched under the owning Job's name so the DB-access
/// firewall policy is keyed consistently with `job_input`.
fn job_pod_input(pod: Pod) -> Option<CompileInput> {
    let owner_job = pod
        .metadata
        .owner_references
        .as_ref()?
        .iter()
        .find(|o| o.kind == "Job")?;
    let namespace = pod.metadata.namespace?;
    let annotations = pod.metadata.annotations.unwrap_or_default();
    let container_names = pod
        .spec
        .unwrap_or_default()
        .containers
        .into_iter()
        .map(|c| c.name)
        .collect();

    Some(CompileInput {
        kind: WorkloadKind::Job,
        name: owner_job.name.clone(),
        namespace,
        annotations: WorkloadAnnotations::from_map(&annotations.into_iter().collect()),
        secret_volume_names: Vec::new(),
        container_names,
    })
}

pub async fn run_deployment_watcher(ctx: Arc<Ctx>) {
    let api: Api<Deployment> = Api::namespaced(ctx.gateway.client(), &ctx.env.namespace);
    watcher(api, watcher::Config::default())
        .default_backoff()
        .applied_objects()
        .try_for_each(|deployment| {
            let ctx = ctx.clone();
            async move {
                if let Some(input) = deployment_input(deployment) {
                    compiler::compile(ctx, input).await;
                }
                Ok(())
            }
        })
        .await
        .unwrap_or_else(|err| tracing::error!(%err, "deployment watcher stream ended"));
}

pub async fn run_job_watcher(ctx: Arc<Ctx>) {
    let api: Api<Job> = Api::namespaced(ctx.gateway.client(), &ctx.env.namespace);
    watcher(api, watcher::Config::default())
        .default_backoff()
        .applied_objects()
        .try_for_each(|job| {
            let ctx = ctx.clone();
            async move {
                if let Some(input) = job_input(job) {
                    compiler::compile(ctx, input).await;
                }
                Ok(())
            }
        })
        .await
        .unwrap_or_else(|err| tracing::error!(%err, "job watcher stream ended"));
}

pub async fn run_job_pod_watcher(ctx: Arc<Ctx>) {
    let api: Api<Pod> = Api::namespaced(ctx.gateway.client(), &ctx.env.namespace);
    watcher(api, watcher::Config::default())
        .default_backoff()
        .applied_objects()
        .try_for_each(|pod| {
            let ctx = ctx.clone();
            async move {
                if let Some(input) = job_pod_input(pod) {
                    compiler::compile(ctx, input).await;
                }
                Ok(())
            }
        })
        .await
        .unwrap_or_else(|err| tracing::error!(%err, "job pod watcher stream ended"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deployment_without_namespace_is_skipped() {
        let deployment: Deployment = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "perikles" },
            "spec": { "template": {} }
        }))
        .unwrap();
        assert!(deployment_input(deployment).is_none());
    }

    #[test]
    fn job_pod_without_job_owner_is_skipped() {
        let pod: Pod = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "standalone", "namespace": "odysseia" },
            "spec": { "containers": [] }
        }))
        .unwrap();
        assert!(job_pod_input(pod).is_none());
    }
}
