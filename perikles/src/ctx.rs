//! The control-plane context object: cluster clients, the CA, the secret
//! store handle, the mapping mutex, and the L7 rule catalog. Constructed
//! once in `main` and passed by reference/`Arc` everywhere else — never a
//! process singleton, per the platform's own design notes on avoiding
//! global handler state.

use std::sync::Arc;

use arc_swap::ArcSwap;
use perikles_ca::Authority;
use perikles_k8s::ClusterGateway;
use perikles_secrets::SecretStore;

use crate::env_config::EnvConfig;
use crate::firewall_rules::RuleCatalog;
use crate::mapping::MappingState;

pub struct Ctx {
    pub env: EnvConfig,
    pub gateway: ClusterGateway,
    pub ca: Arc<Authority>,
    pub secrets: Arc<dyn SecretStore>,
    pub mapping: Arc<MappingState>,
    pub rule_catalog: Arc<ArcSwap<RuleCatalog>>,
}

impl Ctx {
    pub fn new(
        env: EnvConfig,
        gateway: ClusterGateway,
        ca: Arc<Authority>,
        secrets: Arc<dyn SecretStore>,
    ) -> Arc<Self> {
        let rule_catalog = if env.l7_mode_enabled {
            RuleCatalog::canonical()
        } else {
            RuleCatalog::empty()
        };

        Arc::new(Self {
            env,
            gateway,
            ca,
            secrets,
            mapping: Arc::new(MappingState::default()),
            rule_catalog: Arc::new(ArcSwap::from_pointee(rule_catalog)),
        })
    }
}
