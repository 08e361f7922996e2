//! Typed CRD for the host↔client service mapping graph.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// A peer declared (via `perikles/accesses`) to connect to a [`Service`].
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct Client {
    pub name: String,
    #[serde(rename = "kubeType")]
    pub kube_type: String,
    pub namespace: String,
}

/// A workload that publishes a TLS endpoint under a DNS label.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Service {
    pub name: String,
    #[serde(rename = "kubeType")]
    pub kube_type: String,
    pub namespace: String,
    #[serde(rename = "secretName")]
    pub secret_name: String,
    pub active: bool,
    pub validity: i64,
    /// RFC3339 UTC timestamp; monotonic except when rotation mints a new
    /// certificate, per the mapping's invariant (iii).
    pub created: String,
    #[serde(default)]
    pub clients: Vec<Client>,
}

impl Service {
    pub fn created_at(&self) -> Result<OffsetDateTime, time::error::Parse> {
        OffsetDateTime::parse(&self.created, &time::format_description::well_known::Rfc3339)
    }

    pub fn stamp_created_now(&mut self) {
        self.created = OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .expect("RFC3339 formatting never fails for a valid OffsetDateTime");
    }
}

/// The singleton authoritative host↔client relationship graph.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "perikles.odysseia-greek.com",
    version = "v1",
    kind = "ServiceMapping",
    plural = "servicemappings",
    singular = "servicemapping",
    namespaced,
    derive = "PartialEq"
)]
pub struct ServiceMappingSpec {
    #[serde(default)]
    pub services: Vec<Service>,
}

impl ServiceMappingSpec {
    pub fn find_service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn find_service_mut(&mut self, name: &str) -> Option<&mut Service> {
        self.services.iter_mut().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_at_round_trips_rfc3339() {
        let mut service = Service {
            name: "perikles".into(),
            kube_type: "Deployment".into(),
            namespace: "odysseia".into(),
            secret_name: "perikles-tls-certs".into(),
            active: true,
            validity: 10,
            created: String::new(),
            clients: vec![],
        };
        service.stamp_created_now();
        assert!(service.created_at().is_ok());
    }
}
