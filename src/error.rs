use thiserror::Error;
use tokio_modbus::prelude::ExceptionCode;

/// Failure of a single poll of an upstream meter.
///
/// None of these are fatal: the acquisition cycle stores the message in
/// [`crate::meter_reading::SourceStatus`] and keeps serving the last good reading.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("{0} not configured")]
    NotConfigured(&'static str),
    #[error("connection failed: {0}")]
    Connectivity(String),
    #[error("HTTP error {0}")]
    Http(u16),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },
}

impl SourceError {
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Connectivity(err.to_string())
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

/// Reason the Modbus service refused a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RequestRejection {
    #[error("unsupported function code {0:#04x}")]
    UnsupportedFunction(u8),
    #[error("no successful acquisition within the offline timeout")]
    StaleData,
    #[error("register {0:#06x} is not mapped")]
    IllegalAddress(u16),
    #[error("register count {0} outside 1..=125")]
    IllegalQuantity(u16),
}

impl RequestRejection {
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            Self::UnsupportedFunction(_) => ExceptionCode::IllegalFunction,
            Self::StaleData => ExceptionCode::ServerDeviceFailure,
            Self::IllegalAddress(_) => ExceptionCode::IllegalDataAddress,
            Self::IllegalQuantity(_) => ExceptionCode::IllegalDataValue,
        }
    }
}
