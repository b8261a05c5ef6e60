//! Host-wide tenant upgrade pass
//!
//! Runs every eligible tenant's upgrade procedure sequentially to bound
//! database-connection pressure, isolating per-tenant failures and
//! reporting them in aggregate. Tenants materialized only for the pass
//! (no prior observable state, still `Initialized` afterwards) are
//! deregistered again so a later access re-bootstraps them cleanly.

use crate::error::SupervisorError;
use crate::lifecycle::{LifecycleState, RunningMode};
use crate::record::{RecordFilter, RecordStore};
use crate::supervisor::{AppSupervisor, GetAppOptions};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use tracing::{error, info};

/// Aggregate outcome of one upgrade pass
#[derive(Debug, Default)]
pub struct UpgradeReport {
    /// Tenants whose upgrade procedure completed
    pub upgraded: Vec<String>,
    /// Tenants excluded from the pass (standalone under multi mode)
    pub skipped: Vec<String>,
    /// Tenant name and failure detail for each failed upgrade
    pub failed: Vec<(String, String)>,
}

impl UpgradeReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Pluggable upgrade strategy invoked on the host upgrade event
pub type UpgradeHandler = Arc<
    dyn Fn(Arc<AppSupervisor>, Arc<dyn RecordStore>) -> BoxFuture<'static, Result<UpgradeReport, SupervisorError>>
        + Send
        + Sync,
>;

pub fn default_upgrade_handler() -> UpgradeHandler {
    Arc::new(|supervisor, store| run_upgrade_pass(supervisor, store).boxed())
}

/// Enumerate tenant records and upgrade each in turn.
///
/// In single mode only the pinned tenant is considered. One tenant's
/// failure never aborts the pass; the error lands in the report.
pub async fn run_upgrade_pass(
    supervisor: Arc<AppSupervisor>,
    store: Arc<dyn RecordStore>,
) -> Result<UpgradeReport, SupervisorError> {
    let filter = match supervisor.single_app_name() {
        Some(name) => RecordFilter::by_name(name),
        None => RecordFilter::all(),
    };
    let records = store.find(filter).await?;

    let mut report = UpgradeReport::default();

    for record in records {
        if record.standalone_deployment && supervisor.running_mode() != RunningMode::Single {
            report.skipped.push(record.name);
            continue;
        }

        let name = record.name;
        let before = supervisor.app_status(&name);
        info!(tenant = %name, prior_state = ?before, "Upgrading tenant");

        match upgrade_one(&supervisor, &name).await {
            Ok(()) => {
                info!(tenant = %name, "Tenant upgraded");

                // Materialized only for this pass: put it back so a normal
                // access re-bootstraps it cleanly.
                if before.is_none() && supervisor.app_status(&name) == Some(LifecycleState::Initialized) {
                    supervisor.remove_app(&name).await;
                }

                report.upgraded.push(name);
            }
            Err(e) => {
                error!(tenant = %name, error = %e, "Tenant upgrade failed");
                report.failed.push((name, e.to_string()));
            }
        }
    }

    Ok(report)
}

async fn upgrade_one(supervisor: &Arc<AppSupervisor>, name: &str) -> Result<(), SupervisorError> {
    let inst = supervisor.get_app(name, GetAppOptions::upgrading()).await?;
    let Some(handle) = inst.handle().cloned() else {
        return Err(SupervisorError::Upgrade {
            name: name.to_string(),
            message: "tenant has no application handle".to_string(),
        });
    };

    handle.run_upgrade().await.map_err(|e| SupervisorError::Upgrade {
        name: name.to_string(),
        message: e.to_string(),
    })
}
