//! Application factory and handle contracts
//!
//! The supervisor never constructs tenant applications itself; an external
//! collaborator implements [`AppFactory`] to wire the database, plugins and
//! HTTP layer, and returns an opaque [`AppHandle`] the supervisor drives
//! through its lifecycle.

use crate::record::TenantRecord;
use async_trait::async_trait;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::{Request, Response};
use std::sync::Arc;

/// Response body type tenant applications produce
pub type AppBody = BoxBody<Bytes, hyper::Error>;

/// Arguments for starting a tenant application
#[derive(Debug, Clone, Copy, Default)]
pub struct StartOptions {
    /// Skip interactive install steps and bring the app up directly
    pub quickstart: bool,
}

impl StartOptions {
    pub fn quickstart() -> Self {
        Self { quickstart: true }
    }
}

/// A running (or startable) tenant application, opaque to the supervisor
#[async_trait]
pub trait AppHandle: Send + Sync {
    /// Bring the application up and begin accepting work
    async fn start(&self, opts: StartOptions) -> anyhow::Result<()>;

    /// Run the application's upgrade procedure (migrations etc.)
    async fn run_upgrade(&self) -> anyhow::Result<()>;

    /// Tear the application down, closing database handles and resources
    async fn stop(&self) -> anyhow::Result<()>;

    /// Dispatch one HTTP request into the application
    async fn handle_request(&self, req: Request<Incoming>) -> anyhow::Result<Response<AppBody>>;
}

/// Builds runnable applications from tenant records
#[async_trait]
pub trait AppFactory: Send + Sync {
    /// Construct an application for `record`, configured with `options`
    /// (produced by the installed app-options factory).
    async fn build(
        &self,
        record: &TenantRecord,
        options: &serde_json::Value,
    ) -> anyhow::Result<Arc<dyn AppHandle>>;
}

/// Derives the per-tenant options blob handed to [`AppFactory::build`].
///
/// The default implementation names the tenant database after the tenant
/// and carries the record's own options through under `"app"`.
pub type AppOptionsFactory = Arc<dyn Fn(&TenantRecord) -> serde_json::Value + Send + Sync>;

pub fn default_app_options_factory() -> AppOptionsFactory {
    Arc::new(|record: &TenantRecord| {
        serde_json::json!({
            "database": { "name": record.name },
            "app": record.options,
        })
    })
}
