//! SDM120 Meter Bridge Library
//!
//! Polls an upstream energy meter (Home Assistant sensors, or a Shelly Gen1 or
//! Gen2 device) over HTTP and exposes the latest accepted reading as the input
//! register map of an Eastron SDM120 single-phase meter on a Modbus RTU bus.

pub mod acquisition;
pub mod bridge_state;
pub mod clock;
pub mod config;
pub mod error;
pub mod event_log;
pub mod freshness;
pub mod home_assistant;
pub mod home_assistant_source;
pub mod measurement_source;
pub mod meter_reading;
pub mod register_encoder;
pub mod sdm120_emulator;
pub mod shelly_gen1;
pub mod shelly_gen2;

// Re-export commonly used types for easier access
pub use acquisition::AcquisitionCycle;
pub use bridge_state::{BridgeState, Snapshot};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{BridgeConfig, ModbusConfig, SourceConfig};
pub use error::{RequestRejection, SourceError};
pub use event_log::{EventLog, LogTag, RecordingLog, TracingLog};
pub use freshness::{FreshnessTracker, OFFLINE_TIMEOUT};
pub use measurement_source::{MeasurementSource, SourceKind};
pub use meter_reading::{MeterReading, SourceStatus};
pub use register_encoder::{from_be_words, to_be_words, Quantity, RegisterTable};
pub use sdm120_emulator::Sdm120Emulator;
