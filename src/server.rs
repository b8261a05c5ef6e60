//! Gateway HTTP front end
//!
//! Accepts connections, resolves each request to a tenant through the
//! gateway's resolver chain, materializes the tenant via the supervisor
//! (lazily bootstrapping on first access) and dispatches the request into
//! the tenant application. Resolution and bootstrap failures are rendered
//! as structured JSON errors before any tenant code runs.

use crate::error::{json_error_response, GatewayErrorCode, SupervisorError};
use crate::factory::AppBody;
use crate::gateway::Gateway;
use crate::lifecycle::LifecycleState;
use crate::supervisor::{AppSupervisor, GetAppOptions};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// The gateway server fronting all tenant applications
pub struct GatewayServer {
    bind_addr: SocketAddr,
    supervisor: Arc<AppSupervisor>,
    gateway: Arc<Gateway>,
    /// Request header carrying the tenant hostname; the Host header is the
    /// fallback when a request does not carry it.
    host_header: String,
    shutdown_rx: watch::Receiver<bool>,
}

impl GatewayServer {
    pub fn new(
        bind_addr: SocketAddr,
        supervisor: Arc<AppSupervisor>,
        gateway: Arc<Gateway>,
        host_header: String,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            supervisor,
            gateway,
            host_header,
            shutdown_rx,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(addr = %self.bind_addr, host_header = %self.host_header, "Gateway listening");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let host_header = Arc::new(self.host_header.clone());

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let supervisor = Arc::clone(&self.supervisor);
                            let gateway = Arc::clone(&self.gateway);
                            let host_header = Arc::clone(&host_header);

                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, addr, supervisor, gateway, host_header).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Gateway shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    supervisor: Arc<AppSupervisor>,
    gateway: Arc<Gateway>,
    host_header: Arc<String>,
) -> anyhow::Result<()> {
    let io = TokioIo::new(stream);

    let service = service_fn(move |req: Request<Incoming>| {
        let supervisor = Arc::clone(&supervisor);
        let gateway = Arc::clone(&gateway);
        let host_header = Arc::clone(&host_header);
        async move { handle_request(req, supervisor, gateway, &host_header, addr).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection_with_upgrades(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

/// Pull the tenant hostname off a request: the configured header first,
/// the Host header (port stripped) as a fallback.
fn request_hostname<B>(req: &Request<B>, host_header: &str) -> Option<String> {
    if let Some(value) = req.headers().get(host_header) {
        if let Ok(s) = value.to_str() {
            return Some(s.to_string());
        }
    }

    req.headers()
        .get(hyper::header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| host.split(':').next().unwrap_or(host).to_string())
}

async fn handle_request(
    req: Request<Incoming>,
    supervisor: Arc<AppSupervisor>,
    gateway: Arc<Gateway>,
    host_header: &str,
    client_addr: SocketAddr,
) -> Result<Response<AppBody>, hyper::Error> {
    let hostname = request_hostname(&req, host_header);

    let name = match gateway.resolve(hostname.as_deref()).await {
        Ok(name) => name,
        Err(e) => {
            debug!(hostname = ?hostname, client = %client_addr, error = %e, "Request did not resolve to a tenant");
            return Ok(json_error_response(e.gateway_code(), e.to_string()));
        }
    };

    let inst = match supervisor.get_app(&name, GetAppOptions::default()).await {
        Ok(inst) => inst,
        Err(e) => {
            warn!(tenant = %name, error = %e, "Tenant unavailable");
            return Ok(json_error_response(e.gateway_code(), e.to_string()));
        }
    };

    // Bootstrapped but never started (upgrade-only boots): not dispatchable.
    if inst.state() != LifecycleState::Running {
        return Ok(json_error_response(
            GatewayErrorCode::AppInitializing,
            format!("tenant '{}' is {}", name, inst.state()),
        ));
    }

    let Some(handle) = inst.handle().cloned() else {
        let e = SupervisorError::Bootstrap {
            name: name.clone(),
            message: "tenant has no application handle".to_string(),
        };
        return Ok(json_error_response(e.gateway_code(), e.to_string()));
    };

    match handle.handle_request(req).await {
        Ok(response) => Ok(response),
        Err(e) => {
            error!(tenant = %name, error = %e, "Tenant application request failed");
            Ok(json_error_response(
                GatewayErrorCode::InternalError,
                e.to_string(),
            ))
        }
    }
}
