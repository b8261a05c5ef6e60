//! Gateway request-to-tenant resolution
//!
//! An ordered chain of resolver middlewares assigns an incoming request to
//! a tenant name before any per-tenant work happens. Middlewares are
//! appended, never reordered, and run in registration order; a middleware
//! that does not call `next` terminates the chain. Well-behaved resolvers
//! leave an already-resolved name alone (first match wins); the single-mode
//! fixed resolver deliberately overwrites whatever came before it.

use crate::error::SupervisorError;
use crate::lifecycle::RunningMode;
use crate::record::{RecordFilter, RecordStore};
use crate::supervisor::AppSupervisor;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Per-request resolution state threaded through the chain
#[derive(Debug, Clone)]
pub struct ResolveContext {
    /// Hostname-style identifier carried by the request, if any
    pub hostname: Option<String>,
    /// The tenant the request is assigned to, once some resolver decides
    pub resolved_app_name: Option<String>,
}

impl ResolveContext {
    pub fn new(hostname: Option<impl Into<String>>) -> Self {
        Self {
            hostname: hostname.map(Into::into),
            resolved_app_name: None,
        }
    }
}

/// One step in the resolver chain. Receives the context and the rest of the
/// chain; returning without calling [`Next::run`] terminates resolution.
pub type AppResolver = Arc<
    dyn Fn(ResolveContext, Next) -> BoxFuture<'static, Result<ResolveContext, SupervisorError>>
        + Send
        + Sync,
>;

/// The remaining resolvers after the current one
pub struct Next {
    rest: Vec<AppResolver>,
}

impl Next {
    /// Run the rest of the chain
    pub fn run(mut self, ctx: ResolveContext) -> BoxFuture<'static, Result<ResolveContext, SupervisorError>> {
        if self.rest.is_empty() {
            return async move { Ok(ctx) }.boxed();
        }
        let head = self.rest.remove(0);
        head(ctx, self)
    }
}

/// Routes incoming requests to tenant names via the resolver chain
pub struct Gateway {
    supervisor: Arc<AppSupervisor>,
    resolvers: RwLock<Vec<AppResolver>>,
}

impl Gateway {
    pub fn new(supervisor: Arc<AppSupervisor>) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            resolvers: RwLock::new(Vec::new()),
        })
    }

    /// Append a resolver; registration order is execution order.
    pub fn add_app_selector_middleware(&self, resolver: AppResolver) {
        self.resolvers.write().push(resolver);
    }

    /// Resolve the tenant name for a request carrying `hostname`.
    ///
    /// Fails with `UnresolvedApp` when no resolver assigned a name and the
    /// deployment is not running in single mode; single mode falls back to
    /// the pinned tenant even before the fixed resolver is installed.
    pub async fn resolve(&self, hostname: Option<&str>) -> Result<String, SupervisorError> {
        let chain = self.resolvers.read().clone();
        let ctx = ResolveContext::new(hostname);
        let ctx = Next { rest: chain }.run(ctx).await?;

        if let Some(name) = ctx.resolved_app_name {
            debug!(tenant = %name, hostname = ?ctx.hostname, "Request resolved");
            return Ok(name);
        }

        if self.supervisor.running_mode() == RunningMode::Single {
            if let Some(name) = self.supervisor.single_app_name() {
                return Ok(name.to_string());
            }
        }

        Err(SupervisorError::UnresolvedApp {
            hostname: ctx.hostname,
        })
    }
}

/// Resolver mapping the request hostname to a tenant via its `cname`
/// record field. Leaves an already-resolved name untouched.
pub fn cname_resolver(store: Arc<dyn RecordStore>) -> AppResolver {
    Arc::new(move |mut ctx: ResolveContext, next: Next| {
        let store = Arc::clone(&store);
        async move {
            if ctx.resolved_app_name.is_none() {
                if let Some(hostname) = ctx.hostname.clone() {
                    if let Some(record) = store.find_one(RecordFilter::by_cname(hostname)).await? {
                        debug!(tenant = %record.name, cname = ?record.cname, "Resolved tenant by cname");
                        ctx.resolved_app_name = Some(record.name);
                    }
                }
            }
            next.run(ctx).await
        }
        .boxed()
    })
}

/// Single-mode resolver that unconditionally assigns the pinned tenant.
///
/// This overwrites any prior assignment regardless of first-match policy;
/// in single mode every request routes to the one tenant, headers included.
pub fn fixed_app_resolver(app_name: impl Into<String>) -> AppResolver {
    let app_name = app_name.into();
    Arc::new(move |mut ctx: ResolveContext, next: Next| {
        let app_name = app_name.clone();
        async move {
            ctx.resolved_app_name = Some(app_name);
            next.run(ctx).await
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{MemoryRecordStore, TenantRecord};

    fn store_with_cname() -> Arc<MemoryRecordStore> {
        let store = Arc::new(MemoryRecordStore::new());
        let mut record = TenantRecord::new("acme");
        record.cname = Some("acme.example.com".to_string());
        store.insert(record);
        store
    }

    /// Resolver that assigns a constant name only when nothing is set yet
    fn polite_resolver(name: &str) -> AppResolver {
        let name = name.to_string();
        Arc::new(move |mut ctx: ResolveContext, next: Next| {
            let name = name.clone();
            async move {
                if ctx.resolved_app_name.is_none() {
                    ctx.resolved_app_name = Some(name);
                }
                next.run(ctx).await
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_cname_resolution() {
        let supervisor = AppSupervisor::multi();
        let gateway = Gateway::new(supervisor);
        gateway.add_app_selector_middleware(cname_resolver(store_with_cname()));

        let name = gateway.resolve(Some("acme.example.com")).await.unwrap();
        assert_eq!(name, "acme");
    }

    #[tokio::test]
    async fn test_unresolved_in_multi_mode() {
        let supervisor = AppSupervisor::multi();
        let gateway = Gateway::new(supervisor);
        gateway.add_app_selector_middleware(cname_resolver(store_with_cname()));

        let err = gateway.resolve(Some("unknown.example.com")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnresolvedApp { .. }));

        let err = gateway.resolve(None).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnresolvedApp { .. }));
    }

    #[tokio::test]
    async fn test_first_match_wins_across_registration_order() {
        let supervisor = AppSupervisor::multi();
        let gateway = Gateway::new(supervisor);
        gateway.add_app_selector_middleware(polite_resolver("first"));
        gateway.add_app_selector_middleware(polite_resolver("second"));

        let name = gateway.resolve(None).await.unwrap();
        assert_eq!(name, "first");
    }

    #[tokio::test]
    async fn test_fixed_resolver_overrides_prior_match() {
        // Single mode: the fixed resolver is appended after the cname
        // resolver and still wins, because it overwrites unconditionally.
        let supervisor = AppSupervisor::single("main");
        let gateway = Gateway::new(supervisor);
        gateway.add_app_selector_middleware(cname_resolver(store_with_cname()));
        gateway.add_app_selector_middleware(fixed_app_resolver("main"));

        let name = gateway.resolve(Some("acme.example.com")).await.unwrap();
        assert_eq!(name, "main");
    }

    #[tokio::test]
    async fn test_single_mode_fallback_without_fixed_resolver() {
        let supervisor = AppSupervisor::single("main");
        let gateway = Gateway::new(supervisor);

        let name = gateway.resolve(Some("whatever.example.com")).await.unwrap();
        assert_eq!(name, "main");
    }

    #[tokio::test]
    async fn test_resolver_can_terminate_chain() {
        let supervisor = AppSupervisor::multi();
        let gateway = Gateway::new(supervisor);

        // Rejects everything without calling next.
        gateway.add_app_selector_middleware(Arc::new(|ctx: ResolveContext, _next: Next| {
            async move {
                Err(SupervisorError::UnresolvedApp {
                    hostname: ctx.hostname,
                })
            }
            .boxed()
        }));
        gateway.add_app_selector_middleware(polite_resolver("unreachable"));

        let err = gateway.resolve(Some("x")).await.unwrap_err();
        assert!(matches!(err, SupervisorError::UnresolvedApp { .. }));
    }

    #[tokio::test]
    async fn test_resolver_skipping_next_keeps_resolution() {
        let supervisor = AppSupervisor::multi();
        let gateway = Gateway::new(supervisor);

        // Assigns and stops the chain without error.
        gateway.add_app_selector_middleware(Arc::new(|mut ctx: ResolveContext, _next: Next| {
            async move {
                ctx.resolved_app_name = Some("short-circuit".to_string());
                Ok(ctx)
            }
            .boxed()
        }));
        gateway.add_app_selector_middleware(polite_resolver("unreachable"));

        let name = gateway.resolve(None).await.unwrap();
        assert_eq!(name, "short-circuit");
    }
}
