use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::bridge_state::BridgeState;
use crate::clock::Clock;
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::event_log::EventLog;
use crate::measurement_source::MeasurementSource;
use crate::meter_reading::MeterReading;

/// Polls the configured source and publishes the result into the shared
/// bridge state. This is the only writer of that state.
pub struct AcquisitionCycle {
    source: MeasurementSource,
    config: SourceConfig,
    state: Arc<BridgeState>,
    clock: Arc<dyn Clock>,
    log: Arc<dyn EventLog>,
}

impl AcquisitionCycle {
    pub fn new(
        source: MeasurementSource,
        config: SourceConfig,
        state: Arc<BridgeState>,
        clock: Arc<dyn Clock>,
        log: Arc<dyn EventLog>,
    ) -> Self {
        Self {
            source,
            config,
            state,
            clock,
            log,
        }
    }

    /// One poll. On success the reading replaces the stored one; on failure
    /// only the status changes and the last good reading stays in place.
    pub async fn tick(&mut self) -> Result<MeterReading, SourceError> {
        let result = self.source.fetch(&self.config).await;
        let http_code = self.source.last_http_code();
        let tag = self.source.kind().log_tag();

        match &result {
            Ok(reading) => {
                self.state
                    .publish_reading(*reading, http_code, self.clock.now_millis());
                self.log.info(
                    tag,
                    &format!(
                        "{} fetch OK: V={:.1} I={:.2} P={:.1} E={:.3} f={:.2} PF={:.2}",
                        self.source.kind(),
                        reading.voltage_v,
                        reading.current_a,
                        reading.power_w,
                        reading.energy_kwh,
                        reading.frequency_hz,
                        reading.power_factor
                    ),
                );
            }
            Err(e) => {
                self.state.record_failure(e, http_code);
                self.log.warn(
                    tag,
                    &format!(
                        "{} fetch failed (HTTP {}): {e}",
                        self.source.kind(),
                        http_code.map_or_else(|| "-".to_string(), |c| c.to_string())
                    ),
                );
            }
        }
        result
    }

    /// Spawns the polling loop. A slow fetch pushes the next tick back rather
    /// than queueing a burst; failures wait for the next period.
    pub fn spawn(mut self, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.log.info(
                self.source.kind().log_tag(),
                &format!(
                    "Starting {} acquisition every {}ms",
                    self.source.kind(),
                    period.as_millis()
                ),
            );
            let mut read_interval = interval(period);
            read_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                read_interval.tick().await;
                let _ = self.tick().await;
            }
        })
    }
}
