use std::net::SocketAddr;
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use clap::{Parser, ValueEnum};
use perikles_ca::Authority;
use perikles_k8s::ClusterGateway;
use perikles_secrets::{insecure_local::InsecureLocalBackend, vault::VaultBackend, SecretStore};
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use perikles::ctx::Ctx;
use perikles::env_config::EnvConfig;
use perikles::{informer, mapping, reconcile, rotation, tls, webhook};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SecretBackend {
    Vault,
    InsecureLocal,
}

#[derive(Parser, Debug)]
#[command(name = "perikles", about = "Kubernetes-native trust and access-control plane", version)]
struct Args {
    /// Which secret-store backend to speak to.
    #[arg(long, value_enum, default_value_t = SecretBackend::Vault, env = "PERIKLES_SECRET_BACKEND")]
    secret_backend: SecretBackend,

    /// `tracing_subscriber::EnvFilter` directive string.
    #[arg(long, default_value = "info", env = "PERIKLES_LOG_FILTER")]
    log_filter: String,
}

async fn build_secrets(args: &Args, env: &EnvConfig) -> anyhow::Result<Arc<dyn SecretStore>> {
    match args.secret_backend {
        SecretBackend::Vault => Ok(Arc::new(VaultBackend::new(env.secret_store_url.clone()))),
        SecretBackend::InsecureLocal => {
            tracing::warn!("running with the insecure-local secret backend; never use this in production");
            Ok(Arc::new(InsecureLocalBackend::default()))
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&args.log_filter))
        .init();

    let env = EnvConfig::load();
    tracing::info!(namespace = %env.namespace, "starting perikles control plane");

    let ca = Arc::new(Authority::bootstrap(&env.ca_org, env.ca_validity_days)?);
    let secrets = build_secrets(&args, &env).await?;

    let client = kube::Client::try_default().await?;
    let gateway = ClusterGateway::new(client);
    let ctx = Ctx::new(env.clone(), gateway, ca, secrets);

    let shutdown = CancellationToken::new();

    let batcher = tokio::spawn(mapping::run_batcher(ctx.clone(), shutdown.clone()));
    let rotation_loop = tokio::spawn(rotation::run_rotation_loop(ctx.clone(), shutdown.clone()));
    let reconcile_loop = tokio::spawn(reconcile::run_reconcile_loop(ctx.clone(), shutdown.clone()));
    let deployment_watcher = tokio::spawn(informer::run_deployment_watcher(ctx.clone()));
    let job_watcher = tokio::spawn(informer::run_job_watcher(ctx.clone()));
    let job_pod_watcher = tokio::spawn(informer::run_job_pod_watcher(ctx.clone()));

    let addr: SocketAddr = format!("0.0.0.0:{}", env.webhook_port).parse()?;
    let app = webhook::router(ctx.clone());

    let handle: Handle = Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown_for_signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received, draining in-flight admissions");
        shutdown_for_signal.cancel();
        shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(30)));
    });

    let server_result = if env.tls_enabled {
        let (server_config, resolver) = tls::load_server_config(
            &env.tls_cert_path,
            &env.tls_key_path,
            std::time::Duration::from_secs(env.tls_grace_secs),
        )?;
        let rustls_config = RustlsConfig::from_config(Arc::new(server_config));
        let tls_watcher = tls::watch_and_reload(
            env.tls_cert_path.clone(),
            env.tls_key_path.clone(),
            resolver,
            std::time::Duration::from_secs(env.tls_watch_timer_secs),
        );
        let server = axum_server::bind_rustls(addr, rustls_config)
            .handle(handle)
            .serve(app.into_make_service());

        tokio::select! {
            result = server => result.map_err(anyhow::Error::from),
            _ = tls_watcher => Ok(()),
            _ = batcher => Ok(()),
            _ = rotation_loop => Ok(()),
            _ = reconcile_loop => Ok(()),
            _ = deployment_watcher => Ok(()),
            _ = job_watcher => Ok(()),
            _ = job_pod_watcher => Ok(()),
        }
    } else {
        let server = axum_server::bind(addr).handle(handle).serve(app.into_make_service());
        tokio::select! {
            result = server => result.map_err(anyhow::Error::from),
            _ = batcher => Ok(()),
            _ = rotation_loop => Ok(()),
            _ = reconcile_loop => Ok(()),
            _ = deployment_watcher => Ok(()),
            _ = job_watcher => Ok(()),
            _ = job_pod_watcher => Ok(()),
        }
    };

    server_result
}

async fn shutdown_signal() {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
}
