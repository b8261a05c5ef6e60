//! Supervisor error taxonomy and JSON error responses for the gateway

use crate::lifecycle::RunningMode;
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Errors surfaced by supervisor and gateway operations
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No tenant record exists for the requested name; the bootstrap was a
    /// silent no-op and left the registry unchanged.
    #[error("no tenant record found for '{name}'")]
    RecordNotFound { name: String },

    /// A standalone-flagged tenant was requested under the wrong running mode.
    #[error("tenant '{name}' is flagged standalone and cannot run in {mode:?} mode")]
    IncompatibleDeploymentMode { name: String, mode: RunningMode },

    /// Construction or start failed; the tenant is pinned in the `Error`
    /// state until explicitly removed and recreated.
    #[error("bootstrap failed for tenant '{name}': {message}")]
    Bootstrap { name: String, message: String },

    /// The tenant's upgrade procedure failed; reported in the coordinator's
    /// aggregate result, never aborting the pass for other tenants.
    #[error("upgrade failed for tenant '{name}': {message}")]
    Upgrade { name: String, message: String },

    /// The resolver chain could not determine a tenant for a request.
    #[error("could not resolve a tenant for hostname {hostname:?}")]
    UnresolvedApp { hostname: Option<String> },

    /// `get_app` was called before a bootstrapper was installed.
    #[error("no bootstrapper installed")]
    BootstrapperMissing,

    /// A second instance was registered for a name that already has one.
    #[error("tenant '{name}' is already registered")]
    AlreadyRegistered { name: String },

    /// Record store failure, propagated from the collaborator.
    #[error("record store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl SupervisorError {
    /// The gateway error code this error maps to in HTTP responses
    pub fn gateway_code(&self) -> GatewayErrorCode {
        match self {
            SupervisorError::RecordNotFound { .. } => GatewayErrorCode::AppNotFound,
            SupervisorError::UnresolvedApp { .. } => GatewayErrorCode::AppUnresolved,
            SupervisorError::IncompatibleDeploymentMode { .. } => GatewayErrorCode::AppIncompatibleMode,
            SupervisorError::Bootstrap { .. } => GatewayErrorCode::AppBootstrapFailed,
            SupervisorError::Upgrade { .. }
            | SupervisorError::BootstrapperMissing
            | SupervisorError::AlreadyRegistered { .. }
            | SupervisorError::Store(_) => GatewayErrorCode::InternalError,
        }
    }
}

/// Error codes carried in gateway error responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GatewayErrorCode {
    /// No tenant record for the resolved name
    AppNotFound,
    /// Resolver chain produced no tenant name
    AppUnresolved,
    /// Tenant cannot run under the current running mode
    AppIncompatibleMode,
    /// Tenant bootstrap failed and is pinned in error state
    AppBootstrapFailed,
    /// Tenant exists but is not in a dispatchable state yet
    AppInitializing,
    /// Internal gateway error
    InternalError,
}

impl GatewayErrorCode {
    /// Default HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::AppNotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::AppUnresolved => StatusCode::NOT_FOUND,
            GatewayErrorCode::AppIncompatibleMode => StatusCode::SERVICE_UNAVAILABLE,
            GatewayErrorCode::AppBootstrapFailed => StatusCode::SERVICE_UNAVAILABLE,
            GatewayErrorCode::AppInitializing => StatusCode::SERVICE_UNAVAILABLE,
            GatewayErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::AppNotFound => "APP_NOT_FOUND",
            GatewayErrorCode::AppUnresolved => "APP_UNRESOLVED",
            GatewayErrorCode::AppIncompatibleMode => "APP_INCOMPATIBLE_MODE",
            GatewayErrorCode::AppBootstrapFailed => "APP_BOOTSTRAP_FAILED",
            GatewayErrorCode::AppInitializing => "APP_INITIALIZING",
            GatewayErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: GatewayErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(code: GatewayErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with the X-Gateway-Error header set
pub fn json_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Gateway-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}
