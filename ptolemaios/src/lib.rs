pub mod broker;
pub mod env_config;
pub mod healthz;

use std::time::Duration;

use perikles_proto::ptolemaios_client::PtolemaiosClient;
use perikles_proto::HealthRequest;
use tonic::transport::Channel;

const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);
const HEALTH_POLL_ATTEMPTS: u32 = 30;

/// Polls the broker's own `Health` RPC every second for up to 30 s. Callers
/// (test harnesses, sidecar startup probes) use this to block until the
/// broker is ready to serve rather than racing its first request.
pub async fn wait_for_healthy_state(client: &mut PtolemaiosClient<Channel>) -> Result<(), tonic::Status> {
    let mut last_err = tonic::Status::unavailable("health check not yet attempted");
    for _ in 0..HEALTH_POLL_ATTEMPTS {
        match client.health(HealthRequest {}).await {
            Ok(resp) if resp.get_ref().health => return Ok(()),
            Ok(_) => last_err = tonic::Status::unavailable("broker reports unhealthy"),
            Err(status) => last_err = status,
        }
        tokio::time::sleep(HEALTH_POLL_INTERVAL).await;
    }
    Err(last_err)
}
