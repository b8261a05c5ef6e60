//! Multi-tenant manager
//!
//! Wires the supervisor, record store, factory, gateway and host hooks
//! together: installs the lazy-load bootstrapper and the cname resolver,
//! subscribes to host lifecycle events, runs the startup auto-start sweep
//! and exposes the small administrative surface (pinned listing, statuses).

use crate::bootstrap::lazy_load_bootstrapper;
use crate::error::SupervisorError;
use crate::events::HostEvents;
use crate::factory::{default_app_options_factory, AppFactory, AppOptionsFactory, StartOptions};
use crate::gateway::{cname_resolver, fixed_app_resolver, Gateway};
use crate::lifecycle::{LifecycleState, RunningMode};
use crate::record::{RecordFilter, RecordStore, TenantRecord};
use crate::supervisor::{AppSupervisor, GetAppOptions};
use crate::upgrade::{default_upgrade_handler, UpgradeHandler, UpgradeReport};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Hook invoked when a tenant is created, before its first start.
///
/// The default is a no-op: dialect-specific database provisioning belongs
/// to an external collaborator, which installs its own creator here.
pub type AppDbCreator = Arc<dyn Fn(TenantRecord) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

fn default_app_db_creator() -> AppDbCreator {
    Arc::new(|_record: TenantRecord| async { anyhow::Ok(()) }.boxed())
}

/// A tenant record annotated with its live supervisor status
#[derive(Debug, Serialize)]
pub struct TenantListing {
    #[serde(flatten)]
    pub record: TenantRecord,
    pub status: LifecycleState,
}

/// Owns the collaborators and keeps them wired together
pub struct TenantManager {
    supervisor: Arc<AppSupervisor>,
    store: Arc<dyn RecordStore>,
    factory: Arc<dyn AppFactory>,
    gateway: Arc<Gateway>,
    events: Arc<HostEvents>,
    options_factory: RwLock<AppOptionsFactory>,
    db_creator: RwLock<AppDbCreator>,
    upgrade_handler: RwLock<UpgradeHandler>,
}

impl TenantManager {
    pub fn new(
        supervisor: Arc<AppSupervisor>,
        store: Arc<dyn RecordStore>,
        factory: Arc<dyn AppFactory>,
    ) -> Arc<Self> {
        let gateway = Gateway::new(Arc::clone(&supervisor));
        Arc::new(Self {
            supervisor,
            store,
            factory,
            gateway,
            events: HostEvents::new(),
            options_factory: RwLock::new(default_app_options_factory()),
            db_creator: RwLock::new(default_app_db_creator()),
            upgrade_handler: RwLock::new(default_upgrade_handler()),
        })
    }

    pub fn supervisor(&self) -> &Arc<AppSupervisor> {
        &self.supervisor
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.gateway
    }

    pub fn events(&self) -> &Arc<HostEvents> {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Replace how per-tenant build options are derived. Takes effect for
    /// tenants bootstrapped after the next [`install`](Self::install).
    pub fn set_app_options_factory(&self, factory: AppOptionsFactory) {
        *self.options_factory.write() = factory;
    }

    pub fn set_app_db_creator(&self, creator: AppDbCreator) {
        *self.db_creator.write() = creator;
    }

    pub fn set_upgrade_handler(&self, handler: UpgradeHandler) {
        *self.upgrade_handler.write() = handler;
    }

    /// Install the bootstrapper, the default resolver and the host event
    /// subscriptions. Call once before traffic or events arrive.
    pub fn install(self: &Arc<Self>) {
        self.supervisor.set_app_bootstrapper(lazy_load_bootstrapper(
            Arc::clone(&self.store),
            Arc::clone(&self.factory),
            self.options_factory.read().clone(),
        ));

        self.gateway
            .add_app_selector_middleware(cname_resolver(Arc::clone(&self.store)));

        let weak = Arc::downgrade(self);
        self.events.on_tenant_created(Arc::new(move |record: TenantRecord| {
            let weak = weak.clone();
            async move {
                if let Some(manager) = weak.upgrade() {
                    manager.handle_tenant_created(record).await;
                }
            }
            .boxed()
        }));

        let supervisor = Arc::clone(&self.supervisor);
        self.events.on_tenant_destroyed(Arc::new(move |name: String| {
            let supervisor = Arc::clone(&supervisor);
            async move { supervisor.remove_app(&name).await }.boxed()
        }));

        let weak = Arc::downgrade(self);
        self.events.on_upgrade_requested(Arc::new(move |_: ()| {
            let weak = weak.clone();
            async move {
                let Some(manager) = weak.upgrade() else { return };
                match manager.run_upgrade().await {
                    Ok(report) => {
                        if !report.is_clean() {
                            warn!(
                                upgraded = report.upgraded.len(),
                                failed = report.failed.len(),
                                "Upgrade pass finished with failures"
                            );
                        } else {
                            info!(upgraded = report.upgraded.len(), "Upgrade pass finished");
                        }
                    }
                    Err(e) => error!(error = %e, "Upgrade pass failed"),
                }
            }
            .boxed()
        }));

        let weak = Arc::downgrade(self);
        self.events.on_host_started(Arc::new(move |_: ()| {
            let weak = weak.clone();
            async move {
                if let Some(manager) = weak.upgrade() {
                    manager.autostart_sweep().await;
                }
            }
            .boxed()
        }));
    }

    async fn handle_tenant_created(&self, record: TenantRecord) {
        info!(tenant = %record.name, "Tenant created");

        let db_creator = self.db_creator.read().clone();
        if let Err(e) = db_creator(record.clone()).await {
            error!(tenant = %record.name, error = %e, "Tenant database creation failed");
            return;
        }

        if let Err(e) = self
            .supervisor
            .get_app(&record.name, GetAppOptions::default())
            .await
        {
            error!(tenant = %record.name, error = %e, "Starting created tenant failed");
        }
    }

    /// Run the installed upgrade handler over all eligible tenants.
    pub async fn run_upgrade(&self) -> Result<UpgradeReport, SupervisorError> {
        let handler = self.upgrade_handler.read().clone();
        handler(Arc::clone(&self.supervisor), Arc::clone(&self.store)).await
    }

    /// Startup sweep, run after the upgrade pass and before traffic.
    ///
    /// Single mode installs the fixed resolver and eagerly registers the
    /// pinned tenant; a failure there is logged, never fatal. Multi mode
    /// boots all auto-start tenants in parallel, resume-starting any left
    /// in `Initialized`, and waits for every boot before returning.
    pub async fn autostart_sweep(&self) {
        match self.supervisor.running_mode() {
            RunningMode::Single => {
                let Some(name) = self.supervisor.single_app_name().map(str::to_owned) else {
                    return;
                };

                self.gateway
                    .add_app_selector_middleware(fixed_app_resolver(name.clone()));

                if let Err(e) = self.supervisor.get_app(&name, GetAppOptions::default()).await {
                    error!(tenant = %name, error = %e, "Auto-registering pinned tenant failed");
                }
            }
            RunningMode::Multi => {
                let records = match self.store.find(RecordFilter::auto_start()).await {
                    Ok(records) => records,
                    Err(e) => {
                        error!(error = %e, "Auto-start query failed");
                        return;
                    }
                };

                info!(count = records.len(), "Auto-starting tenants");

                let mut tasks = Vec::with_capacity(records.len());
                for record in records {
                    let supervisor = Arc::clone(&self.supervisor);
                    tasks.push(tokio::spawn(async move {
                        let name = record.name;
                        if !supervisor.has_app(&name) {
                            if let Err(e) = supervisor.get_app(&name, GetAppOptions::default()).await {
                                error!(tenant = %name, error = %e, "Auto-start boot failed");
                            }
                        } else if supervisor.app_status(&name) == Some(LifecycleState::Initialized) {
                            // Registered by an earlier pass but never
                            // started: resume the start procedure.
                            match supervisor.get_app(&name, GetAppOptions::default()).await {
                                Ok(inst) => {
                                    if let Err(e) =
                                        supervisor.start_app(&inst, StartOptions::quickstart()).await
                                    {
                                        error!(tenant = %name, error = %e, "Auto-start resume failed");
                                    }
                                }
                                Err(e) => {
                                    error!(tenant = %name, error = %e, "Auto-start resume failed");
                                }
                            }
                        }
                    }));
                }

                for task in tasks {
                    let _ = task.await;
                }
            }
        }
    }

    /// Records flagged for pinned tenant listings
    pub async fn list_pinned(&self) -> anyhow::Result<Vec<TenantRecord>> {
        self.store.find(RecordFilter::pinned()).await
    }

    /// All tenant records annotated with their live status; unregistered
    /// tenants report `stopped`.
    pub async fn list_with_status(&self) -> anyhow::Result<Vec<TenantListing>> {
        let records = self.store.find(RecordFilter::all()).await?;
        Ok(records
            .into_iter()
            .map(|record| {
                let status = self
                    .supervisor
                    .app_status_or(&record.name, LifecycleState::Stopped);
                TenantListing { record, status }
            })
            .collect())
    }
}
