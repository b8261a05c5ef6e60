//! Supervisor registry
//!
//! Process-wide mapping of tenant name to running instance. All lifecycle
//! mutation goes through this type. Lazy bootstrap is deduplicated with a
//! shared future per name behind one coarse lock guarding the
//! check-then-insert step, so concurrent callers for the same unregistered
//! tenant collapse onto a single in-flight bootstrap and all observe its
//! result.
//!
//! # Usage
//!
//! `AppSupervisor` is designed to be used behind an `Arc` for shared
//! ownership across async tasks; the constructors return `Arc<Self>`
//! directly to enforce this pattern. There is no global singleton: the host
//! constructs one supervisor and injects it where needed, which also lets
//! tests run against a fresh registry each.

use crate::error::SupervisorError;
use crate::factory::{AppHandle, StartOptions};
use crate::lifecycle::{LifecycleState, RunningMode, TenantInstance};
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Options for [`AppSupervisor::get_app`]
#[derive(Debug, Clone, Copy, Default)]
pub struct GetAppOptions {
    /// Construct without starting, for the upgrade pass
    pub upgrading: bool,
}

impl GetAppOptions {
    pub fn upgrading() -> Self {
        Self { upgrading: true }
    }
}

/// Arguments handed to an installed bootstrapper
pub struct BootstrapContext {
    /// The registry invoking the bootstrap; used to register and start
    pub supervisor: Arc<AppSupervisor>,
    /// Tenant being bootstrapped
    pub name: String,
    /// Options from the triggering `get_app` call
    pub options: GetAppOptions,
}

/// Pluggable lazy-load strategy invoked on first access to an unregistered
/// tenant. A missing record or mode mismatch must be a silent no-op; build
/// or start failures are returned and pin the instance in `Error`.
pub type Bootstrapper =
    Arc<dyn Fn(BootstrapContext) -> BoxFuture<'static, Result<(), SupervisorError>> + Send + Sync>;

/// Bootstrap results are shared between concurrent waiters, so the error
/// side carries the rendered message rather than the (non-Clone) error.
type SharedBoot = Shared<BoxFuture<'static, Result<(), String>>>;

enum GetAction {
    Ready(Arc<TenantInstance>),
    Join(SharedBoot),
}

/// Registry of live tenant instances with deduplicated lazy bootstrap
pub struct AppSupervisor {
    running_mode: RunningMode,
    single_app_name: Option<String>,
    instances: DashMap<String, Arc<TenantInstance>>,
    bootstrapper: RwLock<Option<Bootstrapper>>,
    /// In-flight bootstraps by name. The lock also serializes the
    /// check-then-insert against the instance map.
    pending: Mutex<HashMap<String, SharedBoot>>,
}

impl AppSupervisor {
    /// Create a supervisor in single mode with one pinned tenant
    pub fn single(app_name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            running_mode: RunningMode::Single,
            single_app_name: Some(app_name.into()),
            instances: DashMap::new(),
            bootstrapper: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Create a supervisor in multi mode
    pub fn multi() -> Arc<Self> {
        Arc::new(Self {
            running_mode: RunningMode::Multi,
            single_app_name: None,
            instances: DashMap::new(),
            bootstrapper: RwLock::new(None),
            pending: Mutex::new(HashMap::new()),
        })
    }

    pub fn running_mode(&self) -> RunningMode {
        self.running_mode
    }

    /// The pinned tenant name; set iff running in single mode
    pub fn single_app_name(&self) -> Option<&str> {
        self.single_app_name.as_deref()
    }

    /// Install the lazy-load strategy. Must be set before the first
    /// `get_app` call; replacing it later does not affect tenants that are
    /// already registered.
    pub fn set_app_bootstrapper(&self, bootstrapper: Bootstrapper) {
        *self.bootstrapper.write() = Some(bootstrapper);
    }

    /// Whether an instance exists for `name` in any registered state
    pub fn has_app(&self, name: &str) -> bool {
        self.instances.contains_key(name)
    }

    /// Non-blocking state read; never triggers a bootstrap. `None` means
    /// the name is not registered.
    pub fn app_status(&self, name: &str) -> Option<LifecycleState> {
        self.instances.get(name).map(|entry| entry.state())
    }

    /// Like [`app_status`](Self::app_status) with a fallback for
    /// unregistered names.
    pub fn app_status_or(&self, name: &str, default: LifecycleState) -> LifecycleState {
        self.app_status(name).unwrap_or(default)
    }

    /// Names of all registered tenants
    pub fn app_names(&self) -> Vec<String> {
        self.instances.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Fetch the instance for `name`, lazily bootstrapping it if absent.
    ///
    /// Concurrent calls for the same unregistered name run exactly one
    /// bootstrap; later callers await the first caller's shared result and
    /// never observe a half-initialized instance. An instance pinned in
    /// `Error` fails every call until it is removed and recreated.
    pub async fn get_app(
        self: &Arc<Self>,
        name: &str,
        options: GetAppOptions,
    ) -> Result<Arc<TenantInstance>, SupervisorError> {
        let action = {
            let mut pending = self.pending.lock();

            if let Some(fut) = pending.get(name) {
                GetAction::Join(fut.clone())
            } else if let Some(entry) = self.instances.get(name) {
                let inst = Arc::clone(entry.value());
                drop(entry);
                if inst.state() == LifecycleState::Error {
                    return Err(Self::pinned_error(&inst));
                }
                GetAction::Ready(inst)
            } else {
                let bootstrapper = self
                    .bootstrapper
                    .read()
                    .clone()
                    .ok_or(SupervisorError::BootstrapperMissing)?;

                let ctx = BootstrapContext {
                    supervisor: Arc::clone(self),
                    name: name.to_string(),
                    options,
                };
                let supervisor = Arc::clone(self);
                let key = name.to_string();

                let fut: SharedBoot = async move {
                    debug!(tenant = %key, "Bootstrapping tenant");
                    let result = bootstrapper(ctx).await;
                    supervisor.pending.lock().remove(&key);
                    result.map_err(|e| {
                        error!(tenant = %key, error = %e, "Tenant bootstrap failed");
                        e.to_string()
                    })
                }
                .boxed()
                .shared();

                pending.insert(name.to_string(), fut.clone());
                GetAction::Join(fut)
            }
        };

        let fut = match action {
            GetAction::Ready(inst) => return Ok(inst),
            GetAction::Join(fut) => fut,
        };

        if let Err(message) = fut.await {
            return Err(SupervisorError::Bootstrap {
                name: name.to_string(),
                message,
            });
        }

        // Bootstrap settled; report its outcome. A silent no-op (missing
        // record, mode mismatch) leaves the registry unchanged.
        match self.instances.get(name) {
            Some(entry) => {
                let inst = Arc::clone(entry.value());
                drop(entry);
                if inst.state() == LifecycleState::Error {
                    Err(Self::pinned_error(&inst))
                } else {
                    Ok(inst)
                }
            }
            None => Err(SupervisorError::RecordNotFound {
                name: name.to_string(),
            }),
        }
    }

    fn pinned_error(inst: &TenantInstance) -> SupervisorError {
        SupervisorError::Bootstrap {
            name: inst.name().to_string(),
            message: inst
                .last_error()
                .unwrap_or_else(|| "previous bootstrap failed".to_string()),
        }
    }

    /// Register a freshly built application under `name`.
    ///
    /// Called by bootstrappers (and the tenant-created hook) while a
    /// bootstrap holds the dedup slot. The instance starts in
    /// `Initializing`; the caller advances it from there.
    pub fn register_app(
        &self,
        name: &str,
        handle: Arc<dyn AppHandle>,
        options: serde_json::Value,
    ) -> Result<Arc<TenantInstance>, SupervisorError> {
        if self.instances.contains_key(name) {
            return Err(SupervisorError::AlreadyRegistered {
                name: name.to_string(),
            });
        }

        let inst = Arc::new(TenantInstance::new(name, handle, options));
        self.instances.insert(name.to_string(), Arc::clone(&inst));
        info!(tenant = name, "Tenant registered");
        Ok(inst)
    }

    /// Register a placeholder for a tenant whose construction failed, pinned
    /// in `Error` so later `get_app` calls observe the failure instead of
    /// silently re-bootstrapping.
    pub fn register_failed(
        &self,
        name: &str,
        options: serde_json::Value,
        message: impl Into<String>,
    ) -> Arc<TenantInstance> {
        let inst = Arc::new(TenantInstance::failed(name, options, message));
        self.instances.insert(name.to_string(), Arc::clone(&inst));
        inst
    }

    /// Run the start procedure for a registered instance.
    ///
    /// On failure the instance is pinned in `Error` with the failure detail
    /// and stays registered, so retried `get_app` calls observe the prior
    /// failure instead of silently re-bootstrapping.
    pub async fn start_app(
        &self,
        inst: &Arc<TenantInstance>,
        opts: StartOptions,
    ) -> Result<(), SupervisorError> {
        let Some(handle) = inst.handle().cloned() else {
            return Err(Self::pinned_error(inst));
        };

        inst.set_state(LifecycleState::Starting);
        info!(tenant = inst.name(), quickstart = opts.quickstart, "Starting tenant application");

        match handle.start(opts).await {
            Ok(()) => {
                inst.set_state(LifecycleState::Running);
                info!(tenant = inst.name(), "Tenant application running");
                Ok(())
            }
            Err(e) => {
                error!(tenant = inst.name(), error = %e, "Tenant application failed to start");
                inst.record_error(e.to_string());
                Err(SupervisorError::Bootstrap {
                    name: inst.name().to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    /// Stop and evict the instance for `name`. Removing an absent name is a
    /// no-op. Waits for any in-flight bootstrap of the same name to settle
    /// before evicting, so removal never races a bootstrap.
    pub async fn remove_app(&self, name: &str) {
        let pending = self.pending.lock().get(name).cloned();
        if let Some(fut) = pending {
            let _ = fut.await;
        }

        let Some((_, inst)) = self.instances.remove(name) else {
            debug!(tenant = name, "Remove requested for unregistered tenant");
            return;
        };

        inst.set_state(LifecycleState::Stopping);
        if let Some(handle) = inst.handle() {
            if let Err(e) = handle.stop().await {
                warn!(tenant = name, error = %e, "Error stopping tenant application");
            }
        }
        inst.set_state(LifecycleState::Stopped);
        info!(tenant = name, "Tenant removed");
    }

    /// Stop and evict every registered tenant (host shutdown)
    pub async fn stop_all(&self) {
        for name in self.app_names() {
            self.remove_app(&name).await;
        }
    }
}

impl std::fmt::Debug for AppSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppSupervisor")
            .field("running_mode", &self.running_mode)
            .field("single_app_name", &self.single_app_name)
            .field("registered", &self.instances.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::AppBody;
    use hyper::body::Incoming;
    use hyper::{Request, Response};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandle {
        starts: AtomicUsize,
        stops: AtomicUsize,
        fail_start: bool,
    }

    impl CountingHandle {
        fn new(fail_start: bool) -> Arc<Self> {
            Arc::new(Self {
                starts: AtomicUsize::new(0),
                stops: AtomicUsize::new(0),
                fail_start,
            })
        }
    }

    #[async_trait::async_trait]
    impl AppHandle for CountingHandle {
        async fn start(&self, _opts: StartOptions) -> anyhow::Result<()> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.fail_start {
                anyhow::bail!("simulated start failure");
            }
            Ok(())
        }
        async fn run_upgrade(&self) -> anyhow::Result<()> {
            Ok(())
        }
        async fn stop(&self) -> anyhow::Result<()> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn handle_request(&self, _req: Request<Incoming>) -> anyhow::Result<Response<AppBody>> {
            anyhow::bail!("not dispatchable in tests")
        }
    }

    #[test]
    fn test_mode_accessors() {
        let single = AppSupervisor::single("main");
        assert_eq!(single.running_mode(), RunningMode::Single);
        assert_eq!(single.single_app_name(), Some("main"));

        let multi = AppSupervisor::multi();
        assert_eq!(multi.running_mode(), RunningMode::Multi);
        assert_eq!(multi.single_app_name(), None);
    }

    #[tokio::test]
    async fn test_get_app_without_bootstrapper() {
        let supervisor = AppSupervisor::multi();
        let err = supervisor
            .get_app("acme", GetAppOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::BootstrapperMissing));
    }

    #[tokio::test]
    async fn test_bootstrap_no_op_yields_record_not_found() {
        let supervisor = AppSupervisor::multi();
        supervisor
            .set_app_bootstrapper(Arc::new(|_ctx| async { Ok::<(), SupervisorError>(()) }.boxed()));

        let err = supervisor
            .get_app("ghost", GetAppOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::RecordNotFound { .. }));
        assert!(!supervisor.has_app("ghost"));
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let supervisor = AppSupervisor::multi();
        let handle = CountingHandle::new(false);

        supervisor
            .register_app("acme", handle.clone(), serde_json::json!({}))
            .unwrap();
        let err = supervisor
            .register_app("acme", handle, serde_json::json!({}))
            .unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRegistered { .. }));
    }

    #[tokio::test]
    async fn test_status_reads_do_not_bootstrap() {
        let supervisor = AppSupervisor::multi();
        // No bootstrapper installed: a status read must still succeed.
        assert_eq!(supervisor.app_status("acme"), None);
        assert_eq!(
            supervisor.app_status_or("acme", LifecycleState::Stopped),
            LifecycleState::Stopped
        );
        assert!(!supervisor.has_app("acme"));
    }

    #[tokio::test]
    async fn test_start_failure_pins_error_state() {
        let supervisor = AppSupervisor::multi();
        let handle = CountingHandle::new(true);
        let inst = supervisor
            .register_app("acme", handle.clone(), serde_json::json!({}))
            .unwrap();
        inst.set_state(LifecycleState::Initialized);

        let err = supervisor.start_app(&inst, StartOptions::quickstart()).await;
        assert!(err.is_err());
        assert_eq!(supervisor.app_status("acme"), Some(LifecycleState::Error));

        // Instance stays registered so callers observe the prior failure.
        let err = supervisor
            .get_app("acme", GetAppOptions::default())
            .await
            .unwrap_err();
        match err {
            SupervisorError::Bootstrap { message, .. } => {
                assert!(message.contains("simulated start failure"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(handle.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_app_is_idempotent() {
        let supervisor = AppSupervisor::multi();
        supervisor.remove_app("ghost").await;
        assert!(!supervisor.has_app("ghost"));

        let handle = CountingHandle::new(false);
        supervisor
            .register_app("acme", handle.clone(), serde_json::json!({}))
            .unwrap();

        supervisor.remove_app("acme").await;
        assert!(!supervisor.has_app("acme"));
        assert_eq!(handle.stops.load(Ordering::SeqCst), 1);

        supervisor.remove_app("acme").await;
        assert_eq!(handle.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stop_all() {
        let supervisor = AppSupervisor::multi();
        let a = CountingHandle::new(false);
        let b = CountingHandle::new(false);
        supervisor.register_app("a", a.clone(), serde_json::json!({})).unwrap();
        supervisor.register_app("b", b.clone(), serde_json::json!({})).unwrap();

        supervisor.stop_all().await;
        assert!(!supervisor.has_app("a"));
        assert!(!supervisor.has_app("b"));
        assert_eq!(a.stops.load(Ordering::SeqCst), 1);
        assert_eq!(b.stops.load(Ordering::SeqCst), 1);
    }
}
