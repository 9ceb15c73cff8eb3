use anyhow::Context as _;
use axum_server::{tls_rustls::RustlsConfig, Handle};
use clap::Parser;
use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use transparency_webhook::{
    locations::StaticLocations,
    policy::ResidencyRule,
    webhook::server::{router, Server},
    Admitter, KubeLocationProvider, LocationProvider, LocationSet, PolicyConfig,
};

#[derive(Parser, Debug)]
#[command(about = "Mutating admission webhook for pod transparency annotations")]
struct Args {
    /// Address to listen on. 8443 does not need extra privileges; the
    /// Service maps it to 443.
    #[arg(long, env = "WEBHOOK_LISTEN", default_value = "0.0.0.0:8443")]
    listen: SocketAddr,
    /// Directory holding `tls.crt` and `tls.key`
    #[arg(long, env = "WEBHOOK_TLS_DIR", default_value = "/run/secrets/tls")]
    tls_dir: PathBuf,
    /// Optional YAML policy file. Without it the built-in policy is used.
    #[arg(long, env = "WEBHOOK_POLICY")]
    policy: Option<PathBuf>,
    /// Overrides the residency rule of the policy file (`all` or `first`)
    #[arg(long, env = "WEBHOOK_RESIDENCY_RULE")]
    residency_rule: Option<ResidencyRule>,
    /// Comma-separated node locations to use instead of querying the
    /// cluster
    #[arg(long, env = "WEBHOOK_LOCATIONS", value_delimiter = ',')]
    locations: Vec<String>,
    /// Upper bound on a single admission decision
    #[arg(long, env = "WEBHOOK_REQUEST_TIMEOUT_SECS", default_value_t = 10)]
    request_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();
    tracing::info!(args = ?args, "parsed command-line arguments");

    let mut config = match &args.policy {
        Some(path) => PolicyConfig::load(path)?,
        None => PolicyConfig::default(),
    };
    if let Some(rule) = args.residency_rule {
        config.residency.rule = rule;
    }
    tracing::info!(policy = ?config, "loaded policy");

    let provider: Box<dyn LocationProvider> = if args.locations.is_empty() {
        let client = kube::Client::try_default()
            .await
            .context("failed to create cluster client")?;
        Box::new(KubeLocationProvider::new(
            client,
            config.location_labels.0.clone(),
        ))
    } else {
        Box::new(StaticLocations(LocationSet::from_iter(&args.locations)))
    };
    let locations = provider
        .node_locations()
        .await
        .context("fetch node locations")?;

    let server = Server::new(Admitter::from_config(&config, locations))
        .with_deadline(Duration::from_secs(args.request_timeout_secs));
    serve(&args, Arc::new(server)).await
}

#[tracing::instrument(skip(args, server), fields(listen = %args.listen))]
async fn serve(args: &Args, server: Arc<Server>) -> anyhow::Result<()> {
    let cert_path = args.tls_dir.join("tls.crt");
    let key_path = args.tls_dir.join("tls.key");
    let tls = RustlsConfig::from_pem_file(&cert_path, &key_path)
        .await
        .with_context(|| {
            format!(
                "failed to load TLS key pair from {} and {}",
                cert_path.display(),
                key_path.display()
            )
        })?;

    let handle = Handle::new();
    tokio::spawn(shutdown_on_signal(handle.clone()));

    tracing::info!("Serving admission webhook");
    axum_server::bind_rustls(args.listen, tls)
        .handle(handle)
        .serve(router(server).into_make_service())
        .await
        .context("webhook server failed")?;
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_on_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {}", err);
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::warn!("failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
