use std::sync::Arc;

use consumption_client::{Clock, TenantResolver};

use crate::{config::ValidationConfig, reset_sweep::ResetSweeper, sources::ReadingSender};

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<dyn TenantResolver>,
    pub clock: Arc<dyn Clock>,
    pub ingest_tx: ReadingSender,
    pub validation: ValidationConfig,
    pub sweeper: Arc<ResetSweeper>,
}

impl AppState {
    pub fn new(
        resolver: Arc<dyn TenantResolver>,
        clock: Arc<dyn Clock>,
        ingest_tx: ReadingSender,
        validation: ValidationConfig,
    ) -> Self {
        let sweeper = Arc::new(ResetSweeper::new(resolver.clone(), clock.clone()));
        Self {
            resolver,
            clock,
            ingest_tx,
            validation,
            sweeper,
        }
    }
}
