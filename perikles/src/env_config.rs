use std::path::PathBuf;

use figment::{
    providers::{Env, Serialized},
    Figment,
};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnvConfig {
    /// Namespace this control plane operates against.
    pub namespace: String,

    /// Name of the singleton `ServiceMapping` resource.
    pub mapping_name: String,

    /// Organization name the process CA is bootstrapped under.
    pub ca_org: String,

    /// Validity, in days, of the bootstrapped CA itself.
    pub ca_validity_days: i64,

    pub tls_enabled: bool,
    pub tls_cert_path: PathBuf,
    pub tls_key_path: PathBuf,

    /// Listen port for the admission webhook HTTPS server.
    pub webhook_port: u16,

    /// Cadence, in seconds, of the pending-update batcher tick.
    pub pending_update_timer_secs: u64,

    /// Cadence, in seconds, of the rotation tick.
    pub rotation_timer_secs: u64,

    /// Cadence, in seconds, of the reconciler tick.
    pub reconcile_timer_secs: u64,

    /// Cadence, in seconds, of the TLS file-hash watch.
    pub tls_watch_timer_secs: u64,

    /// Grace window, in seconds, the old TLS leaf remains accepted after a
    /// reload.
    pub tls_grace_secs: u64,

    /// Whether the DB-access firewall branch expands to HTTP-level (L7)
    /// rules. Degrades to L3/L4 with a warning if the rule-catalog
    /// config map is absent.
    pub l7_mode_enabled: bool,

    /// Config map holding the L7 rule catalog.
    pub l7_rule_catalog_configmap: String,

    /// Base URL of the sealed secret store.
    pub secret_store_url: String,

    /// Name used to recognize the credential-broker sidecar container
    /// when emitting the `allow-<workload>-access-vault` policy.
    pub credential_broker_container_name: String,

    /// Group/version/kind/plural of the cluster's network-policy CRD that
    /// firewall policy documents are applied as.
    pub firewall_policy_group: String,
    pub firewall_policy_version: String,
    pub firewall_policy_kind: String,
    pub firewall_policy_plural: String,

    /// Elasticsearch cluster label selector value used by the DB-access
    /// firewall branch.
    pub elasticsearch_cluster_name: String,
}

impl EnvConfig {
    pub fn load() -> Self {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("PERIKLES_"))
            .extract()
            .expect("environment overrides must deserialize into EnvConfig")
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            namespace: "odysseia".to_string(),
            mapping_name: "mapping".to_string(),

            ca_org: "odysseia-greek".to_string(),
            ca_validity_days: 3650,

            tls_enabled: true,
            tls_cert_path: PathBuf::from("/etc/perikles/tls/tls.crt"),
            tls_key_path: PathBuf::from("/etc/perikles/tls/tls.key"),

            webhook_port: 8443,

            pending_update_timer_secs: 30,
            rotation_timer_secs: 3600,
            reconcile_timer_secs: 30,
            tls_watch_timer_secs: 300,
            tls_grace_secs: 3600,

            l7_mode_enabled: true,
            l7_rule_catalog_configmap: "perikles-l7-rule-catalog".to_string(),

            secret_store_url: "http://vault.odysseia.svc:8200".to_string(),
            credential_broker_container_name: "ptolemaios".to_string(),

            firewall_policy_group: "cilium.io".to_string(),
            firewall_policy_version: "v2".to_string(),
            firewall_policy_kind: "CiliumNetworkPolicy".to_string(),
            firewall_policy_plural: "ciliumnetworkpolicies".to_string(),

            elasticsearch_cluster_name: "odysseia".to_string(),
        }
    }
}
