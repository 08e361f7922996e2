use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use perikles_proto::ptolemaios_server::PtolemaiosServer;
use perikles_secrets::{insecure_local::InsecureLocalBackend, vault::VaultBackend, SecretStore};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use ptolemaios::broker::CredentialBroker;
use ptolemaios::env_config::EnvConfig;
use ptolemaios::healthz;

#[derive(Parser, Debug)]
#[command(name = "ptolemaios", about = "Credential broker sidecar", version)]
struct Args {
    /// Use the in-memory insecure secret backend instead of Vault/OpenBao.
    #[arg(long, env = "PTOLEMAIOS_INSECURE_SECRETS")]
    insecure_secrets: bool,

    /// `tracing_subscriber::EnvFilter` directive string.
    #[arg(long, default_value = "info", env = "PTOLEMAIOS_LOG_FILTER")]
    log_filter: String,
}

fn build_secrets(args: &Args, env: &EnvConfig) -> Arc<dyn SecretStore> {
    if args.insecure_secrets {
        tracing::warn!("running with the insecure-local secret backend; never use this in production");
        Arc::new(InsecureLocalBackend::default())
    } else {
        Arc::new(VaultBackend::new(env.secret_store_url.clone()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_filter))
        .init();

    let env = EnvConfig::load();
    tracing::info!(pod = %env.pod_name, "starting ptolemaios credential broker");

    let secrets = build_secrets(&args, &env);
    let broker = CredentialBroker::new(env.clone(), secrets);

    let addr: SocketAddr = format!("0.0.0.0:{}", env.grpc_port).parse()?;

    let shutdown = CancellationToken::new();
    let healthz_shutdown = shutdown.clone();
    let health_port = env.health_port;
    let healthz_task = tokio::spawn(async move { healthz::serve(health_port, healthz_shutdown).await });

    let grpc_result = Server::builder()
        .add_service(PtolemaiosServer::new(broker))
        .serve_with_shutdown(addr, async move {
            shutdown_signal().await;
            shutdown.cancel();
        })
        .await;

    healthz_task.await??;
    grpc_result?;
    Ok(())
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
