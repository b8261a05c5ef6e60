use async_trait::async_trait;
use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tenantgate::config::Config;
use tenantgate::factory::{AppBody, AppFactory, AppHandle, StartOptions};
use tenantgate::lifecycle::RunningMode;
use tenantgate::manager::TenantManager;
use tenantgate::record::{SqliteRecordStore, TenantRecord};
use tenantgate::server::GatewayServer;
use tenantgate::supervisor::AppSupervisor;
use tokio::sync::watch;
use tracing::{error, info};

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Built-in placeholder application: echoes the tenant name and request
/// path as JSON. Real deployments supply their own [`AppFactory`] wiring
/// the actual application stack.
struct EchoApp {
    tenant: String,
}

#[async_trait]
impl AppHandle for EchoApp {
    async fn start(&self, _opts: StartOptions) -> anyhow::Result<()> {
        Ok(())
    }

    async fn run_upgrade(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn handle_request(&self, req: Request<Incoming>) -> anyhow::Result<Response<AppBody>> {
        let body = serde_json::json!({
            "tenant": self.tenant,
            "path": req.uri().path(),
        })
        .to_string();

        Ok(Response::builder()
            .header("Content-Type", "application/json")
            .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())?)
    }
}

struct EchoAppFactory;

#[async_trait]
impl AppFactory for EchoAppFactory {
    async fn build(
        &self,
        record: &TenantRecord,
        _options: &serde_json::Value,
    ) -> anyhow::Result<Arc<dyn AppHandle>> {
        Ok(Arc::new(EchoApp {
            tenant: record.name.clone(),
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tenantgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let upgrade_only = args.iter().any(|a| a == "--upgrade");
    args.retain(|a| a != "--upgrade");

    let config_path = args.first().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = if config_path.exists() {
        Config::load(&config_path).map_err(|e| {
            error!(path = %config_path.display(), error = %e, "Failed to load configuration");
            e
        })?
    } else {
        info!(path = %config_path.display(), "No configuration file, using defaults");
        Config::default()
    };

    info!(
        name = PKG_NAME,
        version = VERSION,
        bind = %config.server.bind,
        port = config.server.port,
        mode = ?config.supervisor.mode,
        db_path = %config.supervisor.db_path,
        "Starting gateway host"
    );

    // Tenant record store
    let store = Arc::new(SqliteRecordStore::open(&config.supervisor.db_path)?);

    // Supervisor in the configured running mode
    let supervisor = match config.supervisor.mode {
        RunningMode::Single => {
            let name = config
                .supervisor
                .single_app_name
                .clone()
                .expect("validated: single mode carries a pinned name");
            AppSupervisor::single(name)
        }
        RunningMode::Multi => AppSupervisor::multi(),
    };

    let manager = TenantManager::new(Arc::clone(&supervisor), store, Arc::new(EchoAppFactory));
    manager.install();

    if upgrade_only {
        info!("Running upgrade pass");
        let report = manager.run_upgrade().await?;
        info!(
            upgraded = report.upgraded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Upgrade pass finished"
        );
        for (name, message) in &report.failed {
            error!(tenant = %name, error = %message, "Tenant upgrade failed");
        }
        if !report.is_clean() {
            anyhow::bail!("upgrade pass finished with failures");
        }
        return Ok(());
    }

    // Startup sweep: installs the single-mode fixed resolver and boots
    // auto-start tenants before traffic is accepted.
    manager.events().emit_host_started().await;

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let server = GatewayServer::new(
        bind_addr,
        Arc::clone(&supervisor),
        Arc::clone(manager.gateway()),
        config.server.host_header.clone(),
        shutdown_rx.clone(),
    );

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Stop all tenants
    info!("Stopping all tenants...");
    supervisor.stop_all().await;

    // Wait for the server to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}
