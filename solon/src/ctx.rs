//! The registrar's context object: cluster client, secret store, and the
//! Elasticsearch admin client. Constructed once in `main`, passed around as
//! an `Arc` — never a process singleton.

use std::sync::Arc;

use perikles_k8s::ClusterGateway;
use perikles_secrets::SecretStore;

use crate::elastic::ElasticClient;
use crate::env_config::EnvConfig;

pub struct SolonCtx {
    pub env: EnvConfig,
    pub gateway: ClusterGateway,
    pub secrets: Arc<dyn SecretStore>,
    pub elastic: ElasticClient,
}

impl SolonCtx {
    pub fn new(
        env: EnvConfig,
        gateway: ClusterGateway,
        secrets: Arc<dyn SecretStore>,
        elastic: ElasticClient,
    ) -> Arc<Self> {
        Arc::new(Self {
            env,
            gateway,
            secrets,
            elastic,
        })
    }
}
