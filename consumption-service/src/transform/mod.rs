use consumption_client::domain::PowerReading;

use crate::{
    config::ValidationConfig,
    pipeline::{Envelope, PipelineError, Transform},
};

const MAX_SOCKET_ID_LEN: usize = 64;

/// Pure validation of a `PowerReading`.
///
/// Rules:
/// - power must be finite, non-negative and at most `max_power_watts`.
/// - duration must be finite, positive and at most `max_duration_seconds`.
/// - socket id must be non-empty and at most 64 characters.
pub fn validate_reading(
    env: Envelope<PowerReading>,
    limits: &ValidationConfig,
) -> Result<Envelope<PowerReading>, PipelineError> {
    let r = &env.payload;

    if !r.power_watts.is_finite() || r.power_watts < 0.0 {
        return Err(PipelineError::Transform("power_watts must be a non-negative number".to_string()));
    }
    if r.power_watts > limits.max_power_watts {
        return Err(PipelineError::Transform(format!(
            "power_watts exceeds {} W",
            limits.max_power_watts
        )));
    }

    if !r.duration_seconds.is_finite() || r.duration_seconds <= 0.0 {
        return Err(PipelineError::Transform("duration_seconds must be positive".to_string()));
    }
    if r.duration_seconds > limits.max_duration_seconds {
        return Err(PipelineError::Transform(format!(
            "duration_seconds exceeds {} s",
            limits.max_duration_seconds
        )));
    }

    let socket_len = r.socket_id.chars().count();
    if socket_len == 0 || socket_len > MAX_SOCKET_ID_LEN {
        return Err(PipelineError::Transform(format!(
            "socket_id must be 1-{MAX_SOCKET_ID_LEN} characters"
        )));
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct ReadingValidation {
    limits: ValidationConfig,
}

impl ReadingValidation {
    pub fn new(limits: ValidationConfig) -> Self {
        Self { limits }
    }
}

#[async_trait::async_trait]
impl Transform<PowerReading, PowerReading> for ReadingValidation {
    async fn apply(&self, input: Envelope<PowerReading>) -> Result<Envelope<PowerReading>, PipelineError> {
        match validate_reading(input, &self.limits) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_reading_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
