//! Host lifecycle hooks
//!
//! Explicit subscription lists the host invokes at defined lifecycle
//! points: tenant created, tenant destroyed, host upgrade requested, host
//! started. Subscribers run sequentially in registration order; no other
//! ordering is implied. The manager subscribes the supervisor's handlers
//! here; the transport that produces the events is the host's concern.

use crate::record::TenantRecord;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::sync::Arc;

type Callback<T> = Arc<dyn Fn(T) -> BoxFuture<'static, ()> + Send + Sync>;

/// Subscription registry for host lifecycle events
#[derive(Default)]
pub struct HostEvents {
    tenant_created: RwLock<Vec<Callback<TenantRecord>>>,
    tenant_destroyed: RwLock<Vec<Callback<String>>>,
    upgrade_requested: RwLock<Vec<Callback<()>>>,
    host_started: RwLock<Vec<Callback<()>>>,
}

impl HostEvents {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_tenant_created(&self, cb: Callback<TenantRecord>) {
        self.tenant_created.write().push(cb);
    }

    pub fn on_tenant_destroyed(&self, cb: Callback<String>) {
        self.tenant_destroyed.write().push(cb);
    }

    pub fn on_upgrade_requested(&self, cb: Callback<()>) {
        self.upgrade_requested.write().push(cb);
    }

    pub fn on_host_started(&self, cb: Callback<()>) {
        self.host_started.write().push(cb);
    }

    pub async fn emit_tenant_created(&self, record: &TenantRecord) {
        let subscribers = self.tenant_created.read().clone();
        for cb in subscribers {
            cb(record.clone()).await;
        }
    }

    pub async fn emit_tenant_destroyed(&self, name: &str) {
        let subscribers = self.tenant_destroyed.read().clone();
        for cb in subscribers {
            cb(name.to_string()).await;
        }
    }

    pub async fn emit_upgrade_requested(&self) {
        let subscribers = self.upgrade_requested.read().clone();
        for cb in subscribers {
            cb(()).await;
        }
    }

    pub async fn emit_host_started(&self) {
        let subscribers = self.host_started.read().clone();
        for cb in subscribers {
            cb(()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;

    #[tokio::test]
    async fn test_subscribers_run_in_registration_order() {
        let events = HostEvents::new();
        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        events.on_host_started(Arc::new(move |_| {
            let order = Arc::clone(&first);
            async move { order.lock().push("first") }.boxed()
        }));

        let second = Arc::clone(&order);
        events.on_host_started(Arc::new(move |_| {
            let order = Arc::clone(&second);
            async move { order.lock().push("second") }.boxed()
        }));

        events.emit_host_started().await;
        assert_eq!(*order.lock(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_tenant_created_carries_record() {
        let events = HostEvents::new();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        events.on_tenant_created(Arc::new(move |record: TenantRecord| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().push(record.name) }.boxed()
        }));

        events.emit_tenant_created(&TenantRecord::new("acme")).await;
        assert_eq!(*seen.lock(), vec!["acme"]);
    }

    #[tokio::test]
    async fn test_emit_with_no_subscribers_is_a_no_op() {
        let events = HostEvents::new();
        events.emit_tenant_destroyed("ghost").await;
        events.emit_upgrade_requested().await;
    }
}
