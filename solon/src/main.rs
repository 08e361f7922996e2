use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use perikles_k8s::ClusterGateway;
use perikles_secrets::{insecure_local::InsecureLocalBackend, vault::VaultBackend, SecretStore};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use solon::ctx::SolonCtx;
use solon::elastic::ElasticClient;
use solon::env_config::EnvConfig;
use solon::{cleanup, handlers};

#[derive(Parser, Debug)]
#[command(name = "solon", about = "Identity registrar for workload credentials", version)]
struct Args {
    /// Use the in-memory insecure secret backend instead of Vault/OpenBao.
    #[arg(long, env = "SOLON_INSECURE_SECRETS")]
    insecure_secrets: bool,

    /// `tracing_subscriber::EnvFilter` directive string.
    #[arg(long, default_value = "info", env = "SOLON_LOG_FILTER")]
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
    tracing::info!(namespace = %env.namespace, "starting solon identity registrar");

    let secrets = build_secrets(&args, &env);
    let elastic = ElasticClient::new(
        env.elastic_url.clone(),
        env.elastic_admin_username.clone(),
        env.elastic_admin_password.clone(),
    );

    let client = kube::Client::try_default().await?;
    let gateway = ClusterGateway::new(client);
    let ctx = SolonCtx::new(env.clone(), gateway, secrets, elastic);

    let shutdown = CancellationToken::new();

    let pod_watcher = {
        let ctx = ctx.clone();
        tokio::spawn(async move { cleanup::run_pod_delete_watcher(ctx).await })
    };
    let sweep_loop = {
        let ctx = ctx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { cleanup::run_periodic_sweep(ctx, shutdown).await })
    };

    let addr: SocketAddr = format!("0.0.0.0:{}", env.listen_port).parse()?;
    let app = handlers::router(ctx.clone());

    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        shutdown_for_signal.cancel();
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned());

    tokio::select! {
        result = server => result.map_err(anyhow::Error::from),
        _ = pod_watcher => Ok(()),
        _ = sweep_loop => Ok(()),
    }
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
