use serde_json::{Map, Value};
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::measurement_source::get_json;
use crate::meter_reading::{require, MeterReading};

const STATUS_TIMEOUT: Duration = Duration::from_secs(3);
const ENERGY_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_FREQUENCY_HZ: f32 = 50.0;
const MAX_CHANNEL: usize = 2;

// RPC API documented at
// https://shelly-api-docs.shelly.cloud/gen2/ComponentsAndServices/EM
// https://shelly-api-docs.shelly.cloud/gen2/ComponentsAndServices/EM1

/// Response shape of the status call, told apart by field names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// `EM.GetStatus`: `a_voltage`, `b_voltage`, ...
    ThreePhase,
    /// `EM1.GetStatus`: `voltage`, `current`, ...
    SinglePhase,
}

/// Reads a Shelly Gen2/Gen3 energy meter (Pro 3EM, Pro EM) over RPC.
#[derive(Debug, Clone)]
pub struct ShellyGen2Source {
    client: reqwest::Client,
    last_http_code: Option<u16>,
}

impl ShellyGen2Source {
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
        let url = config.shelly_gen2_base();
        if url.is_empty() {
            return Err(SourceError::NotConfigured("Shelly URL"));
        }
        let channel = config.shelly_channel.min(MAX_CHANNEL);

        let (body, endpoint_profile) = self.fetch_status(url, channel).await?;
        let profile = detect_profile(&body).unwrap_or(endpoint_profile);
        let mut reading = parse_status(&body, profile, channel);

        // Energy lives behind a second call; without it the reading is still
        // usable, just with zero energy.
        let energy_url = match profile {
            Profile::ThreePhase => format!("{url}/rpc/EMData.GetStatus?id=0"),
            Profile::SinglePhase => format!("{url}/rpc/EM1Data.GetStatus?id={channel}"),
        };
        let mut energy_http_code = None;
        if let Ok(energy) = get_json::<Map<String, Value>>(
            self.client.get(energy_url),
            ENERGY_TIMEOUT,
            &mut energy_http_code,
        )
        .await
        {
            if let Some(energy_kwh) = parse_energy(&energy) {
                reading.energy_kwh = energy_kwh;
            }
        }

        validate(&reading)?;
        Ok(reading)
    }

    /// Tries the three-phase endpoint first and falls back to the
    /// single-phase one on any failure to get a `200 OK`.
    async fn fetch_status(
        &mut self,
        url: &str,
        channel: usize,
    ) -> Result<(Map<String, Value>, Profile), SourceError> {
        let three_phase = get_json::<Map<String, Value>>(
            self.client.get(format!("{url}/rpc/EM.GetStatus?id=0")),
            STATUS_TIMEOUT,
            &mut self.last_http_code,
        )
        .await;
        match three_phase {
            Ok(body) => Ok((body, Profile::ThreePhase)),
            Err(err) if !falls_back_on(&err) => Err(err),
            Err(_) => {
                let body = get_json::<Map<String, Value>>(
                    self.client
                        .get(format!("{url}/rpc/EM1.GetStatus?id={channel}")),
                    STATUS_TIMEOUT,
                    &mut self.last_http_code,
                )
                .await?;
                Ok((body, Profile::SinglePhase))
            }
        }
    }
}

/// A device that answered `EM.GetStatus` with a garbled body is a
/// three-phase meter with a problem, not a single-phase one.
fn falls_back_on(err: &SourceError) -> bool {
    !matches!(err, SourceError::Parse(_))
}

/// Field presence overrides whichever endpoint answered.
pub fn detect_profile(body: &Map<String, Value>) -> Option<Profile> {
    if body.contains_key("a_voltage") {
        Some(Profile::ThreePhase)
    } else if body.contains_key("voltage") {
        Some(Profile::SinglePhase)
    } else {
        None
    }
}

fn phase_prefix(channel: usize) -> &'static str {
    match channel {
        1 => "b_",
        2 => "c_",
        _ => "a_",
    }
}

fn field(body: &Map<String, Value>, key: &str) -> Option<f32> {
    body.get(key).and_then(Value::as_f64).map(|v| v as f32)
}

fn parse_status(body: &Map<String, Value>, profile: Profile, channel: usize) -> MeterReading {
    let prefix = match profile {
        Profile::ThreePhase => phase_prefix(channel),
        Profile::SinglePhase => "",
    };
    let get = |name: &str| field(body, &format!("{prefix}{name}"));

    MeterReading {
        power_w: get("act_power").unwrap_or_default(),
        energy_kwh: 0.0,
        voltage_v: get("voltage").unwrap_or_default(),
        current_a: get("current").unwrap_or_default(),
        frequency_hz: get("freq").unwrap_or(DEFAULT_FREQUENCY_HZ),
        power_factor: get("pf").unwrap_or_default(),
    }
}

/// `total_act_energy` (EMData) or `total_act` (EM1Data), both in Wh.
fn parse_energy(body: &Map<String, Value>) -> Option<f32> {
    field(body, "total_act_energy")
        .or_else(|| field(body, "total_act"))
        .map(|wh| wh / 1000.0)
}

fn validate(reading: &MeterReading) -> Result<(), SourceError> {
    require("voltage", reading.voltage_v, |v| v > 0.0, "zero or negative")
}
