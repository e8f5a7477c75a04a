use super::load_class::LoadClass;
use crate::tenant::TenantId;

/// One power sample as delivered by the telemetry transport.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerReading {
    pub tenant: TenantId,
    pub load_class: LoadClass,
    pub socket_id: String,
    pub power_watts: f64,
    pub duration_seconds: f64,
}
