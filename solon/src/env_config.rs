use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnvConfig {
    pub namespace: String,
    pub listen_port: u16,

    pub role_annotation: String,
    pub access_annotation: String,

    pub secret_store_url: String,
    pub elastic_url: String,
    pub elastic_admin_username: String,
    pub elastic_admin_password: String,

    /// Path to the cluster CA's certificate PEM, mounted from the secret
    /// `perikles`'s Certificate Authority publishes. Embedded in every
    /// sealed credential record so broker clients can verify Elasticsearch's
    /// leaf certificate.
    pub ca_cert_path: String,

    /// Cadence, in seconds, of the orphan-cleanup sweep (complements the
    /// reactive pod-delete watcher).
    pub cleanup_timer_secs: u64,
}

impl EnvConfig {
    pub fn load() -> Self {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("SOLON_"))
            .extract()
            .expect("environment overrides must deserialize into EnvConfig")
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            namespace: "odysseia".to_string(),
            listen_port: 8080,

            role_annotation: "odysseia-greek/role".to_string(),
            access_annotation: "odysseia-greek/access".to_string(),

            secret_store_url: "http://vault.odysseia.svc:8200".to_string(),
            elastic_url: "https://elasticsearch.odysseia.svc:9200".to_string(),
            elastic_admin_username: "elastic".to_string(),
            elastic_admin_password: String::new(),
            ca_cert_path: "/var/run/secrets/perikles/ca.pem".to_string(),

            cleanup_timer_secs: 300,
        }
    }
}
