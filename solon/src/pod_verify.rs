//! Confirms an inbound request actually originates from a pod in this
//! namespace before trusting anything else in the request body. Unlike
//! the string-splitting `RemoteAddr` parsing this is grounded on, this
//! version leans on axum's `ConnectInfo<SocketAddr>` extractor, whose
//! `.ip()` already strips the port cleanly for both IPv4 and IPv6 peers.

use std::net::IpAddr;

use k8s_openapi::api::core::v1::Pod;
use perikles_k8s::ClusterGateway;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("no pod in this namespace has ip {0}")]
    NoMatchingPod(IpAddr),
    #[error("kubernetes API error: {0}")]
    Gateway(#[from] perikles_k8s::GatewayError),
}

/// Returns the pod whose `status.podIP` matches `origin`, or an error if
/// none does. Any handler that trusts a request body's claimed identity
/// must call this first.
pub async fn verify_origin_pod(
    gateway: &ClusterGateway,
    namespace: &str,
    origin: IpAddr,
) -> Result<Pod, VerifyError> {
    gateway
        .find_pod_by_ip(namespace, &origin.to_string())
        .await?
        .ok_or(VerifyError::NoMatchingPod(origin))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_matching_pod_error_reports_the_ip() {
        let err = VerifyError::NoMatchingPod("10.0.0.5".parse().unwrap());
        assert!(err.to_string().contains("10.0.0.5"));
    }
}
