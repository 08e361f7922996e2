use figment::providers::{Env, Serialized};
use figment::Figment;
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EnvConfig {
    pub namespace: String,
    pub pod_name: String,
    pub grpc_port: u16,

    /// Port for the plain-HTTP liveness listener. The broker's real health
    /// surface is the gRPC `Health` RPC; this exists only so `GET /healthz`
    /// is uniform across every binary in the platform.
    pub health_port: u16,

    pub identity_registrar_url: String,
    pub secret_store_url: String,
}

impl EnvConfig {
    pub fn load() -> Self {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Env::prefixed("PTOLEMAIOS_"))
            .extract()
            .expect("environment overrides must deserialize into EnvConfig")
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            namespace: "odysseia".to_string(),
            pod_name: String::new(),
            grpc_port: 50051,
            health_port: 8080,

            identity_registrar_url: "http://solon.odysseia.svc:8080".to_string(),
            secret_store_url: "http://vault.odysseia.svc:8200".to_string(),
        }
    }
}
