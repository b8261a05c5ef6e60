//! Default lazy-load bootstrapper
//!
//! Installed by the manager; invoked by the registry exactly once per
//! distinct name while the dedup slot is held. A missing record or a
//! standalone tenant requested outside single mode is a silent no-op;
//! the caller's `get_app` then reports the absence.

use crate::error::SupervisorError;
use crate::factory::{AppFactory, AppOptionsFactory, StartOptions};
use crate::lifecycle::{LifecycleState, RunningMode};
use crate::record::{RecordFilter, RecordStore};
use crate::supervisor::{BootstrapContext, Bootstrapper};
use futures::FutureExt;
use std::sync::Arc;
use tracing::debug;

/// Build the lazy-load bootstrapper over the given collaborators.
pub fn lazy_load_bootstrapper(
    store: Arc<dyn RecordStore>,
    factory: Arc<dyn AppFactory>,
    options_factory: AppOptionsFactory,
) -> Bootstrapper {
    Arc::new(move |ctx: BootstrapContext| {
        let store = Arc::clone(&store);
        let factory = Arc::clone(&factory);
        let options_factory = Arc::clone(&options_factory);

        async move {
            let BootstrapContext {
                supervisor,
                name,
                options,
            } = ctx;

            if supervisor.has_app(&name) {
                return Ok(());
            }

            let Some(record) = store.find_one(RecordFilter::by_name(&name)).await? else {
                debug!(tenant = %name, "No tenant record, skipping bootstrap");
                return Ok(());
            };

            if record.standalone_deployment && supervisor.running_mode() != RunningMode::Single {
                debug!(
                    tenant = %name,
                    mode = ?supervisor.running_mode(),
                    "Standalone tenant skipped outside single mode"
                );
                return Ok(());
            }

            let app_options = options_factory(&record);
            let handle = match factory.build(&record, &app_options).await {
                Ok(handle) => handle,
                Err(e) => {
                    supervisor.register_failed(&name, app_options, e.to_string());
                    return Err(SupervisorError::Bootstrap {
                        name,
                        message: e.to_string(),
                    });
                }
            };

            let inst = supervisor.register_app(&name, handle, app_options)?;
            inst.set_state(LifecycleState::Initialized);

            // The upgrade pass needs a constructed but unstarted instance.
            if !options.upgrading {
                supervisor.start_app(&inst, StartOptions::quickstart()).await?;
            }

            Ok(())
        }
        .boxed()
    })
}
