use serde_derive::Deserialize;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::measurement_source::get_json;
use crate::meter_reading::{require, MeterReading};

const STATUS_TIMEOUT: Duration = Duration::from_secs(2);
/// Gen1 firmwares don't report line frequency.
const DEFAULT_FREQUENCY_HZ: f32 = 50.0;

/// Reads a Shelly Gen1 energy meter (3EM, EM) through its `/status` endpoint.
#[derive(Debug, Clone)]
pub struct ShellyGen1Source {
    client: reqwest::Client,
    last_http_code: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct Gen1Status {
    emeters: Vec<Gen1EMeter>,
}

/// One `emeters[]` entry. Fields vary between firmwares, hence all optional.
#[derive(Debug, Default, Deserialize)]
struct Gen1EMeter {
    power: Option<f32>,
    voltage: Option<f32>,
    current: Option<f32>,
    /// Wh
    total: Option<f32>,
    /// kWh
    energy: Option<f32>,
    frequency: Option<f32>,
    pf: Option<f32>,
}

impl ShellyGen1Source {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            last_http_code: None,
        }
    }

    pub fn last_http_code(&self) -> Option<u16> {
        self.last_http_code
    }

    pub async fn fetch(&mut self, config: &SourceConfig) -> Result<MeterReading, SourceError> {
        self.last_http_code = None;
        let url = config.shelly_gen1_base();
        if url.is_empty() {
            return Err(SourceError::NotConfigured("Shelly URL"));
        }

        let request = self.client.get(format!("{url}/status"));
        let status: Gen1Status = get_json(request, STATUS_TIMEOUT, &mut self.last_http_code).await?;
        let reading = parse_status(status, config.shelly_channel)?;
        validate(&reading)?;
        Ok(reading)
    }
}

fn parse_status(status: Gen1Status, channel: usize) -> Result<MeterReading, SourceError> {
    if status.emeters.is_empty() {
        return Err(SourceError::Parse("emeters array is empty".to_string()));
    }
    let index = channel.min(status.emeters.len() - 1);
    let Some(meter) = status.emeters.into_iter().nth(index) else {
        return Err(SourceError::Parse(format!("emeters[{index}] missing")));
    };

    let energy_kwh = match (meter.total, meter.energy) {
        (Some(total_wh), _) => total_wh / 1000.0,
        (None, Some(energy_kwh)) => energy_kwh,
        (None, None) => 0.0,
    };

    Ok(MeterReading {
        power_w: meter.power.unwrap_or_default(),
        energy_kwh,
        voltage_v: meter.voltage.unwrap_or_default(),
        current_a: meter.current.unwrap_or_default(),
        frequency_hz: meter.frequency.unwrap_or(DEFAULT_FREQUENCY_HZ),
        power_factor: meter.pf.unwrap_or_default(),
    })
}

fn validate(reading: &MeterReading) -> Result<(), SourceError> {
    require("voltage", reading.voltage_v, |v| v > 0.0, "zero or negative")?;
    require("current", reading.current_a, |v| v >= 0.0, "negative")?;
    require("power", reading.power_w, |v| v >= 0.0, "negative")
}
