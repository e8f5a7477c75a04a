use std::{collections::HashMap, sync::Arc, time::Duration};

use consumption_client::{
    reset::{ResetExecutor, ResetReport},
    Clock, Error, TenantId, TenantResolver,
};
use tokio::{sync::Mutex, task::JoinHandle};

/// Runs reset check cycles, at most one at a time per tenant in this process.
///
/// Each period reset is also claimed atomically in storage, so cycles from
/// other processes (replicas, `reset_check`) cannot reset a boundary twice.
pub struct ResetSweeper {
    resolver: Arc<dyn TenantResolver>,
    clock: Arc<dyn Clock>,
    locks: Mutex<HashMap<TenantId, Arc<Mutex<()>>>>,
}

impl ResetSweeper {
    pub fn new(resolver: Arc<dyn TenantResolver>, clock: Arc<dyn Clock>) -> Self {
        Self {
            resolver,
            clock,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn tenant_lock(&self, tenant: &TenantId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(tenant.clone()).or_default().clone()
    }

    /// One check cycle for `tenant`.
    ///
    /// Only tenants that resolve get a lock entry. The clock is read after the
    /// tenant lock is held, so queued cycles see the ledger their predecessor
    /// wrote.
    pub async fn run_tenant(&self, tenant: &TenantId) -> Result<ResetReport, Error> {
        let store = self.resolver.resolve(tenant).await?;

        let lock = self.tenant_lock(tenant).await;
        let _guard = lock.lock().await;
        let now = self.clock.now();
        let report = ResetExecutor::new(store.as_ref()).run_check_cycle(now).await;

        for period in &report.performed {
            metrics::counter!("reset_performed_total", "period" => period.as_str()).increment(1);
        }
        for (period, e) in &report.failures {
            metrics::counter!("reset_failed_total", "period" => period.as_str()).increment(1);
            tracing::warn!(tenant = %tenant, period = %period, error = %e, "reset failed");
        }
        if !report.performed.is_empty() {
            tracing::info!(tenant = %tenant, performed = ?report.performed, "resets performed");
        }

        Ok(report)
    }

    /// Run a check cycle for each tenant in turn; one tenant's failure does
    /// not stop the others.
    pub async fn sweep(&self, tenants: &[TenantId]) {
        for tenant in tenants {
            if let Err(e) = self.run_tenant(tenant).await {
                tracing::error!(tenant = %tenant, error = %e, "reset check cycle could not start");
            }
        }
    }

    pub fn spawn(self: Arc<Self>, tenants: Vec<TenantId>, every: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                tracing::debug!(tenants = tenants.len(), "reset sweep");
                self.sweep(&tenants).await;
            }
        })
    }
}
