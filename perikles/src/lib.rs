pub mod annotations;
pub mod compiler;
pub mod ctx;
pub mod env_config;
pub mod firewall_rules;
pub mod informer;
pub mod mapping;
pub mod reconcile;
pub mod rotation;
pub mod tls;
pub mod webhook;
