//! Tenant lifecycle states and the live instance record
//!
//! A tenant that is absent from the registry has no state at all
//! ("not registered"); everything else is tracked per instance here.

use crate::factory::AppHandle;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// State of a registered tenant instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Instance object created, application not yet constructed
    Initializing,
    /// Application constructed but never started (upgrade-only boots stay here)
    Initialized,
    /// Start procedure in progress
    Starting,
    /// Serving traffic
    Running,
    /// Shutdown in progress
    Stopping,
    /// Shut down, about to be evicted from the registry
    Stopped,
    /// Construction or start failed; pinned until removed and recreated
    Error,
}

impl LifecycleState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `Error` is reachable from `Initializing`, `Starting` and `Running`
    /// only; `Stopping` may begin from any live state.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Initializing, Initialized)
                | (Initialized, Starting)
                | (Starting, Running)
                | (Initializing, Error)
                | (Starting, Error)
                | (Running, Error)
                | (Initializing, Stopping)
                | (Initialized, Stopping)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Error, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Whether a `get_app` caller may use the instance as-is.
    pub fn is_usable(self) -> bool {
        matches!(self, LifecycleState::Initialized | LifecycleState::Running)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Initializing => "initializing",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Process-wide running mode, fixed at supervisor construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningMode {
    /// Exactly one pinned tenant; every request routes to it
    Single,
    /// Tenants created and removed dynamically, routed by hostname
    #[default]
    Multi,
}

/// A live tenant application registered with the supervisor.
///
/// Exclusively owned by the registry; at most one instance per name exists
/// at any time. The application object behind [`AppHandle`] is opaque here.
pub struct TenantInstance {
    name: String,
    state: RwLock<LifecycleState>,
    /// `None` only for instances whose construction failed; such instances
    /// exist purely to pin the `Error` state until removal.
    handle: Option<Arc<dyn AppHandle>>,
    options: serde_json::Value,
    last_error: RwLock<Option<String>>,
}

impl TenantInstance {
    pub fn new(name: impl Into<String>, handle: Arc<dyn AppHandle>, options: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(LifecycleState::Initializing),
            handle: Some(handle),
            options,
            last_error: RwLock::new(None),
        }
    }

    /// An instance whose construction failed, pinned in `Error`.
    pub fn failed(name: impl Into<String>, options: serde_json::Value, message: impl Into<String>) -> Self {
        let inst = Self {
            name: name.into(),
            state: RwLock::new(LifecycleState::Initializing),
            handle: None,
            options,
            last_error: RwLock::new(None),
        };
        inst.record_error(message);
        inst
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.read()
    }

    pub fn handle(&self) -> Option<&Arc<dyn AppHandle>> {
        self.handle.as_ref()
    }

    /// The options blob the instance was built with
    pub fn options(&self) -> &serde_json::Value {
        &self.options
    }

    /// Transition to `next`, logging illegal transitions but honoring them.
    ///
    /// The registry is the only writer, so an illegal transition indicates a
    /// supervisor bug rather than a race; we log loudly and proceed.
    pub fn set_state(&self, next: LifecycleState) {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            warn!(tenant = %self.name, from = %*state, to = %next, "Unexpected lifecycle transition");
        } else {
            debug!(tenant = %self.name, from = %*state, to = %next, "Lifecycle transition");
        }
        *state = next;
    }

    /// Pin the instance in `Error` with the failure detail.
    pub fn record_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
        self.set_state(LifecycleState::Error);
    }

    /// The failure that pinned this instance in `Error`, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }
}

impl std::fmt::Debug for TenantInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantInstance")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
