//! The generic firewall policy document shape applied via the dynamic client.
//!
//! The concrete CRD kind (Cilium's `CiliumNetworkPolicy`, Calico's
//! `NetworkPolicy`, or a platform-local equivalent) is an environment
//! detail, not something this crate should hardcode — so policies are
//! built as plain documents here and handed to
//! [`crate::gateway::ClusterGateway::apply_firewall_policy`] together with
//! a [`FirewallGvk`] naming the target resource.

use std::collections::BTreeMap;

use serde_json::{json, Value};

pub const UPDATED_ANNOTATION: &str = "perikles/updated";
pub const GITOPS_IGNORE_ANNOTATION: &str = "gitops.ignore";

/// Identifies the concrete custom resource that firewall policy documents
/// get applied as, since the actual network-policy CRD kind is a cluster
/// detail configured at startup, not fixed by this crate.
#[derive(Debug, Clone)]
pub struct FirewallGvk {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRule {
    pub method_regex: String,
    pub path_regex: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressRule {
    /// Pod label selector of the allowed peer.
    pub from: BTreeMap<String, String>,
    pub ports: Vec<u16>,
    pub http: Vec<HttpRule>,
}

/// A named L3/L4 (+ optional L7) ingress rule set selecting pods by label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallPolicyDocument {
    pub name: String,
    pub pod_selector: BTreeMap<String, String>,
    pub ingress: Vec<IngressRule>,
}

impl FirewallPolicyDocument {
    pub fn new(name: impl Into<String>, pod_selector: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            pod_selector,
            ingress: Vec::new(),
        }
    }

    pub fn with_ingress(mut self, rule: IngressRule) -> Self {
        self.ingress.push(rule);
        self
    }

    /// Renders this document as the `spec` body of a dynamic resource,
    /// timestamping `perikles/updated` and stamping `gitops.ignore=true`
    /// as required of every firewall-policy write.
    pub fn to_spec_json(&self) -> Value {
        json!({
            "podSelector": { "matchLabels": self.pod_selector },
            "ingress": self.ingress.iter().map(|rule| {
                let mut entry = json!({
                    "from": [{ "podSelector": { "matchLabels": rule.from } }],
                    "ports": rule.ports,
                });
                if !rule.http.is_empty() {
                    entry["http"] = json!(rule
                        .http
                        .iter()
                        .map(|h| json!({ "method": h.method_regex, "path": h.path_regex }))
                        .collect::<Vec<_>>());
                }
                entry
            }).collect::<Vec<_>>(),
        })
    }
}
