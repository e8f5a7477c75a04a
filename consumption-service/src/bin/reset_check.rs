//! One-shot reset check cycle, for running from cron instead of the
//! in-process sweep.
//!
//! Tenants come from the command line, or from `[reset].tenants` when none
//! are given. Exits non-zero if any tenant had a failed period.

use std::sync::Arc;

use anyhow::{Context, Result};
use consumption_client::{db::PgTenantResolver, SystemClock, TenantId};
use consumption_service::{config::AppConfig, observability, reset_sweep::ResetSweeper};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;
    let tenants: Vec<TenantId> = {
        let from_args = std::env::args()
            .skip(1)
            .map(|t| TenantId::parse(&t))
            .collect::<Result<Vec<_>, _>>()?;
        if from_args.is_empty() {
            cfg.reset.tenants.clone()
        } else {
            from_args
        }
    };

    let resolver = Arc::new(PgTenantResolver::new(
        &cfg.database.base_uri,
        cfg.database.max_connections_per_tenant,
    )?);
    let clock = Arc::new(
        SystemClock::from_offset_minutes(cfg.clock.utc_offset_minutes)
            .context("invalid clock.utc_offset_minutes")?,
    );
    let sweeper = ResetSweeper::new(resolver, clock);

    let mut failed = 0usize;
    for tenant in &tenants {
        match sweeper.run_tenant(tenant).await {
            Ok(report) => {
                println!(
                    "{tenant}: performed={:?} failed={}",
                    report.performed,
                    report.failures.len()
                );
                if !report.is_clean() {
                    failed += 1;
                }
            }
            Err(e) => {
                eprintln!("{tenant}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} tenants had reset failures", tenants.len());
    }
    Ok(())
}
