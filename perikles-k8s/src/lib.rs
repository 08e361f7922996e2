//! Typed view over the container orchestrator: the CRD schema for the
//! service mapping graph, and a `ClusterGateway` wrapping `kube::Api`
//! accessors plus the dynamic-resource plumbing firewall policies need.

pub mod crd;
pub mod firewall;
pub mod gateway;

pub use crd::{Client as MappingClient, Service as MappingService, ServiceMapping, ServiceMappingSpec};
pub use firewall::{FirewallGvk, FirewallPolicyDocument, HttpRule, IngressRule};
pub use gateway::{ClusterGateway, GatewayError};
