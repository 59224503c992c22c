use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::event_log::{EventLog, LogTag, TracingLog};
use crate::home_assistant::HomeAssistantAPI;
use crate::meter_reading::{require, MeterReading};
use std::sync::Arc;

/// Builds a reading out of six Home Assistant sensor entities.
#[derive(Clone)]
pub struct HomeAssistantSource {
    ha_client: HomeAssistantAPI,
    log: Arc<dyn EventLog>,
}

impl std::fmt::Debug for HomeAssistantSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HomeAssistantSource")
            .field("ha_client", &self.ha_client)
            .finish_non_exhaustive()
    }
}

impl HomeAssistantSource {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_log(client, Arc::new(TracingLog))
    }

    pub fn with_log(client: reqwest::Client, log: Arc<dyn EventLog>) -> Self {
        Self {
            ha_client: HomeAssistantAPI::new(client),
            log,
        }
    }

    pub fn last_http_code(&self) -> Option<u16> {
        self.ha_client.last_http_code()
    }

    pub async fn fetch(&mut self, config: &SourceConfig) -> Result<MeterReading, SourceError> {
        self.ha_client.clear_last_http_code();
        let url = config.home_assistant_base();
        let token = config.home_assistant_token.as_str();
        if url.is_empty() {
            return Err(SourceError::NotConfigured("Home Assistant URL"));
        }
        if token.is_empty() {
            return Err(SourceError::NotConfigured("Home Assistant token"));
        }

        let entities = &config.entities;
        let mut reading = MeterReading {
            power_w: self.read_quantity(url, token, &entities.power).await,
            energy_kwh: self.read_quantity(url, token, &entities.energy).await,
            voltage_v: self.read_quantity(url, token, &entities.voltage).await,
            current_a: self.read_quantity(url, token, &entities.current).await,
            frequency_hz: self.read_quantity(url, token, &entities.frequency).await,
            power_factor: self.read_quantity(url, token, &entities.power_factor).await,
        };

        // Some integrations publish the power factor as a percentage.
        if reading.power_factor > 1.0 {
            reading.power_factor /= 100.0;
        }

        validate(&reading)?;
        Ok(reading)
    }

    /// A failed or unparsable entity degrades to `0.0` instead of failing the
    /// whole poll; validation decides afterwards whether that is acceptable.
    async fn read_quantity(&mut self, url: &str, token: &str, entity_id: &str) -> f32 {
        if entity_id.is_empty() {
            return 0.0;
        }
        match self.ha_client.read_sensor_value(url, token, entity_id).await {
            Ok(sensor) => match sensor.numeric_state() {
                Some(value) => value,
                None => {
                    self.log.warn(
                        LogTag::HomeAssistant,
                        &format!(
                            "State of {entity_id} is not numeric: {:?}",
                            sensor.state.unwrap_or_default()
                        ),
                    );
                    0.0
                }
            },
            Err(e) => {
                self.log
                    .warn(LogTag::HomeAssistant, &format!("Failed to read {entity_id}: {e}"));
                0.0
            }
        }
    }
}

fn validate(reading: &MeterReading) -> Result<(), SourceError> {
    require("power", reading.power_w, |v| v > 0.0, "zero or negative")?;
    require("energy", reading.energy_kwh, |v| v >= 0.0, "negative")?;
    require("voltage", reading.voltage_v, |v| v > 0.0, "zero or negative")?;
    require("current", reading.current_a, |v| v > 0.0, "zero or negative")?;
    require("frequency", reading.frequency_hz, |v| v > 0.0, "zero or negative")?;
    require(
        "power factor",
        reading.power_factor,
        |v| (0.0..=1.0).contains(&v),
        "out of range",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HomeAssistantEntities;
    use crate::event_log::RecordingLog;
    use crate::measurement_source::SourceKind;

    fn config(url: &str) -> SourceConfig {
        SourceConfig {
            kind: SourceKind::HomeAssistant,
            home_assistant_url: url.to_string(),
            home_assistant_token: "test_token".to_string(),
            entities: HomeAssistantEntities {
                power: "sensor.power".to_string(),
                energy: "sensor.energy".to_string(),
                voltage: "sensor.voltage".to_string(),
                current: "sensor.current".to_string(),
                frequency: "sensor.frequency".to_string(),
                power_factor: "sensor.power_factor".to_string(),
            },
            shelly_url: String::new(),
            shelly_channel: 0,
        }
    }

    async fn mock_state(server: &mut mockito::Server, entity: &str, state: &str) -> mockito::Mock {
        server
            .mock("GET", format!("/api/states/{entity}").as_str())
            .match_header("Authorization", "Bearer test_token")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(r#"{{"entity_id":"{entity}","state":"{state}"}}"#))
            .create_async()
            .await
    }

    async fn mock_all(server: &mut mockito::Server, power_factor: &str) -> Vec<mockito::Mock> {
        vec![
            mock_state(server, "sensor.power", "460.5").await,
            mock_state(server, "sensor.energy", "1234.5").await,
            mock_state(server, "sensor.voltage", "230.2").await,
            mock_state(server, "sensor.current", "2.1").await,
            mock_state(server, "sensor.frequency", "50.01").await,
            mock_state(server, "sensor.power_factor", power_factor).await,
        ]
    }

    #[tokio::test]
    async fn test_fetch_all_quantities() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_all(&mut server, "0.95").await;

        let mut source = HomeAssistantSource::new(reqwest::Client::new());
        let reading = source.fetch(&config(&server.url())).await.unwrap();

        assert_eq!(reading.power_w, 460.5);
        assert_eq!(reading.energy_kwh, 1234.5);
        assert_eq!(reading.voltage_v, 230.2);
        assert_eq!(reading.current_a, 2.1);
        assert_eq!(reading.frequency_hz, 50.01);
        assert_eq!(reading.power_factor, 0.95);
        assert_eq!(source.last_http_code(), Some(200));
    }

    #[tokio::test]
    async fn test_percentage_power_factor_is_scaled() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_all(&mut server, "95").await;

        let mut source = HomeAssistantSource::new(reqwest::Client::new());
        let reading = source.fetch(&config(&server.url())).await.unwrap();
        assert!((reading.power_factor - 0.95).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_power_factor_above_percentage_range_is_rejected() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = mock_all(&mut server, "150").await;

        let mut source = HomeAssistantSource::new(reqwest::Client::new());
        let err = source.fetch(&config(&server.url())).await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::Validation {
                field: "power factor",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unavailable_state_defaults_to_zero_and_fails_validation() {
        let mut server = mockito::Server::new_async().await;
        let _mocks = vec![
            mock_state(&mut server, "sensor.power", "unavailable").await,
            mock_state(&mut server, "sensor.energy", "1234.5").await,
            mock_state(&mut server, "sensor.voltage", "230.2").await,
            mock_state(&mut server, "sensor.current", "2.1").await,
            mock_state(&mut server, "sensor.frequency", "50").await,
            mock_state(&mut server, "sensor.power_factor", "0.9").await,
        ];

        let log = Arc::new(RecordingLog::new());
        let mut source = HomeAssistantSource::with_log(reqwest::Client::new(), log.clone());
        let err = source.fetch(&config(&server.url())).await.unwrap_err();

        assert!(matches!(err, SourceError::Validation { field: "power", .. }));
        assert!(log.contains(LogTag::HomeAssistant, "sensor.power is not numeric"));
    }

    #[tokio::test]
    async fn test_http_errors_are_logged_per_entity() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(500)
            .create_async()
            .await;

        let log = Arc::new(RecordingLog::new());
        let mut source = HomeAssistantSource::with_log(reqwest::Client::new(), log.clone());
        let err = source.fetch(&config(&server.url())).await.unwrap_err();

        assert!(matches!(err, SourceError::Validation { field: "power", .. }));
        assert_eq!(source.last_http_code(), Some(500));
        assert_eq!(
            log.records()
                .iter()
                .filter(|r| r.message.contains("HTTP error 500"))
                .count(),
            6
        );
    }

    #[tokio::test]
    async fn test_missing_url_or_token() {
        let mut source = HomeAssistantSource::new(reqwest::Client::new());
        let err = source.fetch(&config("")).await.unwrap_err();
        assert_eq!(err, SourceError::NotConfigured("Home Assistant URL"));

        let mut no_token = config("http://127.0.0.1:8123");
        no_token.home_assistant_token.clear();
        let err = source.fetch(&no_token).await.unwrap_err();
        assert_eq!(err, SourceError::NotConfigured("Home Assistant token"));
    }

    #[test]
    fn test_validation_order() {
        let zero = MeterReading::default();
        let err = validate(&zero).unwrap_err();
        assert!(matches!(err, SourceError::Validation { field: "power", .. }));

        let valid = MeterReading {
            power_w: 1.0,
            energy_kwh: 0.0,
            voltage_v: 230.0,
            current_a: 0.1,
            frequency_hz: 50.0,
            power_factor: 1.0,
        };
        assert!(validate(&valid).is_ok());
        let negative_pf = MeterReading {
            power_factor: -0.1,
            ..valid
        };
        assert!(validate(&negative_pf).is_err());
    }
}
