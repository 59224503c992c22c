use serde_derive::Serialize;

use crate::error::SourceError;

/// Canonical electrical snapshot every source is normalised into.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize)]
pub struct MeterReading {
    pub power_w: f32,
    pub energy_kwh: f32,
    pub voltage_v: f32,
    pub current_a: f32,
    pub frequency_hz: f32,
    pub power_factor: f32,
}

/// Outcome of the most recent poll attempt.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct SourceStatus {
    pub online: bool,
    pub last_http_code: Option<u16>,
    pub last_error: Option<String>,
    /// Monotonic milliseconds of the last accepted reading.
    pub last_success_at: Option<u64>,
}

impl SourceStatus {
    pub fn succeeded(last_http_code: Option<u16>, now_ms: u64) -> Self {
        Self {
            online: true,
            last_http_code,
            last_error: None,
            last_success_at: Some(now_ms),
        }
    }

    /// A failed poll keeps the timestamp of the previous success.
    pub fn failed(&self, error: &SourceError, last_http_code: Option<u16>) -> Self {
        Self {
            online: false,
            last_http_code,
            last_error: Some(error.to_string()),
            last_success_at: self.last_success_at,
        }
    }
}

/// Checks a field against its acceptance rule, producing the validation error
/// that aborts the whole reading.
pub(crate) fn require(
    field: &'static str,
    value: f32,
    accept: impl Fn(f32) -> bool,
    reason: &str,
) -> Result<(), SourceError> {
    if accept(value) {
        Ok(())
    } else {
        Err(SourceError::invalid(field, format!("{reason} ({value})")))
    }
}
