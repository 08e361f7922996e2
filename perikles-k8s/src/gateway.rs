//! Typed view over the container orchestrator, plus the dynamic-resource
//! plumbing the firewall-policy branches need.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret, Service as K8sService};
use kube::api::{
    DynamicObject, GroupVersionKind, ListParams, ObjectMeta, Patch, PatchParams, PostParams,
};
use kube::core::ApiResource;
use kube::{Api, Client};

use crate::crd::ServiceMapping;
use crate::firewall::{FirewallGvk, FirewallPolicyDocument, GITOPS_IGNORE_ANNOTATION, UPDATED_ANNOTATION};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("deployment {0} has no pod template labels")]
    MissingPodTemplateLabels(String),
    #[error("no service selects deployment {0}")]
    NoMatchingService(String),
}

/// Owns the Kubernetes client and hands out typed `Api<T>` accessors plus
/// the dynamic-resource helpers firewall policies need.
#[derive(Clone)]
pub struct ClusterGateway {
    client: Client,
}

impl ClusterGateway {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying cluster client, for callers that need a raw `Api<T>`
    /// this gateway doesn't expose directly (e.g. the informer's watchers).
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn stateful_sets(&self, namespace: &str) -> Api<StatefulSet> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn secrets(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn config_maps(&self, namespace: &str) -> Api<ConfigMap> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn services(&self, namespace: &str) -> Api<K8sService> {
        Api::namespaced(self.client.clone(), namespace)
    }

    pub fn service_mappings(&self, namespace: &str) -> Api<ServiceMapping> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn firewall_resource(&self, gvk: &FirewallGvk) -> ApiResource {
        let gvk_key = GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        ApiResource::from_gvk_with_plural(&gvk_key, &gvk.plural)
    }

    fn firewall_api(&self, namespace: &str, gvk: &FirewallGvk) -> Api<DynamicObject> {
        let ar = self.firewall_resource(gvk);
        Api::namespaced_with(self.client.clone(), namespace, &ar)
    }

    /// Finds the pod whose `status.podIP` equals `ip`, stripped of any port
    /// suffix by the caller beforehand.
    pub async fn find_pod_by_ip(&self, namespace: &str, ip: &str) -> Result<Option<Pod>, GatewayError> {
        let pods = self.pods(namespace).list(&ListParams::default()).await?;
        Ok(pods.into_iter().find(|pod| {
            pod.status
                .as_ref()
                .and_then(|s| s.pod_ip.as_deref())
                .map(|pod_ip| pod_ip == ip)
                .unwrap_or(false)
        }))
    }

    pub async fn deployment_exists(&self, namespace: &str, name: &str) -> Result<bool, GatewayError> {
        match self.deployments(namespace).get_opt(name).await? {
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Resolves a Service's TCP ports by finding the Service in `namespace`
    /// whose selector matches `deployment_name`'s pod-template labels.
    pub async fn resolve_service_ports(
        &self,
        namespace: &str,
        deployment_name: &str,
    ) -> Result<Vec<i32>, GatewayError> {
        let deployment = self.deployments(namespace).get(deployment_name).await?;
        let labels = deployment
            .spec
            .as_ref()
            .and_then(|s| s.template.metadata.as_ref())
            .and_then(|m| m.labels.as_ref())
            .ok_or_else(|| GatewayError::MissingPodTemplateLabels(deployment_name.to_string()))?;

        let services = self.services(namespace).list(&ListParams::default()).await?;
        let matching = services.into_iter().find(|svc| {
            svc.spec
                .as_ref()
                .and_then(|s| s.selector.as_ref())
                .map(|selector| selector.iter().all(|(k, v)| labels.get(k) == Some(v)))
                .unwrap_or(false)
        });

        let service = matching.ok_or_else(|| GatewayError::NoMatchingService(deployment_name.to_string()))?;
        Ok(service
            .spec
            .and_then(|s| s.ports)
            .unwrap_or_default()
            .into_iter()
            .map(|p| p.port)
            .collect())
    }

    /// Applies a firewall policy document as a server-side apply patch,
    /// always stamping `perikles/updated` and `gitops.ignore=true`.
    pub async fn apply_firewall_policy(
        &self,
        namespace: &str,
        gvk: &FirewallGvk,
        doc: &FirewallPolicyDocument,
    ) -> Result<(), GatewayError> {
        let ar = self.firewall_resource(gvk);
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, &ar);
        let now = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();

        let mut annotations = BTreeMap::new();
        annotations.insert(UPDATED_ANNOTATION.to_string(), now);
        annotations.insert(GITOPS_IGNORE_ANNOTATION.to_string(), "true".to_string());

        let mut object = DynamicObject::new(&doc.name, &ar).within(namespace);
        object.metadata = ObjectMeta {
            name: Some(doc.name.clone()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            ..Default::default()
        };
        object.data = doc.to_spec_json();

        api.patch(
            &doc.name,
            &PatchParams::apply("perikles").force(),
            &Patch::Apply(&object),
        )
        .await?;
        Ok(())
    }

    pub async fn delete_firewall_policy(
        &self,
        namespace: &str,
        gvk: &FirewallGvk,
        name: &str,
    ) -> Result<(), GatewayError> {
        let api = self.firewall_api(namespace, gvk);
        match api.delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn list_firewall_policy_names(
        &self,
        namespace: &str,
        gvk: &FirewallGvk,
    ) -> Result<Vec<String>, GatewayError> {
        let api = self.firewall_api(namespace, gvk);
        let objects = api.list(&ListParams::default()).await?;
        Ok(objects
            .into_iter()
            .filter_map(|o| o.metadata.name)
            .collect())
    }

    /// Creates-or-replaces a secret. Prefers update-in-place; on a write
    /// conflict falls back to delete-then-create, per the open question on
    /// secret write strategy.
    pub async fn upsert_secret(
        &self,
        namespace: &str,
        name: &str,
        data: BTreeMap<String, Vec<u8>>,
    ) -> Result<(), GatewayError> {
        use k8s_openapi::ByteString;

        let api = self.secrets(namespace);
        let mut annotations = BTreeMap::new();
        annotations.insert(GITOPS_IGNORE_ANNOTATION.to_string(), "true".to_string());
        annotations.insert(
            UPDATED_ANNOTATION.to_string(),
            time::OffsetDateTime::now_utc()
                .format(&time::format_description::well_known::Rfc3339)
                .unwrap_or_default(),
        );

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                annotations: Some(annotations),
                ..Default::default()
            },
            data: Some(data.into_iter().map(|(k, v)| (k, ByteString(v))).collect()),
            ..Default::default()
        };

        match api.get_opt(name).await? {
            Some(existing) => {
                let mut replacement = secret.clone();
                replacement.metadata.resource_version = existing.metadata.resource_version;
                match api.replace(name, &PostParams::default(), &replacement).await {
                    Ok(_) => Ok(()),
                    Err(kube::Error::Api(e)) if e.code == 409 => {
                        api.delete(name, &Default::default()).await?;
                        api.create(&PostParams::default(), &secret).await?;
                        Ok(())
                    }
                    Err(e) => Err(e.into()),
                }
            }
            None => {
                api.create(&PostParams::default(), &secret).await?;
                Ok(())
            }
        }
    }

    /// Deletes a secret outright. Idempotent: a secret that's already gone
    /// is treated as success, not an error.
    pub async fn delete_secret(&self, namespace: &str, name: &str) -> Result<(), GatewayError> {
        match self.secrets(namespace).delete(name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn secret_has_keys(
        &self,
        namespace: &str,
        name: &str,
        required: &[&str],
    ) -> Result<bool, GatewayError> {
        match self.secrets(namespace).get_opt(name).await? {
            Some(secret) => {
                let data = secret.data.unwrap_or_default();
                Ok(required.iter().all(|key| data.contains_key(*key)))
            }
            None => Ok(false),
        }
    }

    /// Patches a deployment's pod-template `perikles/updated` annotation to
    /// a fresh timestamp, triggering a rolling update.
    pub async fn touch_rolling_annotation(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<(), GatewayError> {
        let now = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        let patch = serde_json::json!({
            "spec": {
                "template": {
                    "metadata": {
                        "annotations": { UPDATED_ANNOTATION: now }
                    }
                }
            }
        });
        self.deployments(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    pub async fn list_deployment_names(&self, namespace: &str) -> Result<Vec<String>, GatewayError> {
        let list = self.deployments(namespace).list(&ListParams::default()).await?;
        Ok(list.into_iter().filter_map(|d| d.metadata.name).collect())
    }
}
