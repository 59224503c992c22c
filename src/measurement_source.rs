use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::event_log::{EventLog, LogTag};
use crate::home_assistant_source::HomeAssistantSource;
use crate::meter_reading::MeterReading;
use crate::shelly_gen1::ShellyGen1Source;
use crate::shelly_gen2::ShellyGen2Source;

/// Upstream device families the bridge can poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    HomeAssistant,
    ShellyGen1,
    ShellyGen2,
}

impl SourceKind {
    pub fn log_tag(self) -> LogTag {
        match self {
            SourceKind::HomeAssistant => LogTag::HomeAssistant,
            SourceKind::ShellyGen1 | SourceKind::ShellyGen2 => LogTag::Shelly,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::HomeAssistant => "home_assistant",
            SourceKind::ShellyGen1 => "shelly_gen1",
            SourceKind::ShellyGen2 => "shelly_gen2",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown meter source `{0}` (expected home_assistant, shelly_gen1 or shelly_gen2)")]
pub struct UnknownSourceKind(String);

impl FromStr for SourceKind {
    type Err = UnknownSourceKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "home_assistant" | "homeassistant" | "ha" => Ok(SourceKind::HomeAssistant),
            "shelly_gen1" | "shelly" | "gen1" => Ok(SourceKind::ShellyGen1),
            "shelly_gen2" | "shelly_gen3" | "gen2" => Ok(SourceKind::ShellyGen2),
            _ => Err(UnknownSourceKind(s.to_string())),
        }
    }
}

/// The configured adapter. Each variant owns its HTTP client and the status
/// code of its most recent request.
#[derive(Debug)]
pub enum MeasurementSource {
    HomeAssistant(HomeAssistantSource),
    ShellyGen1(ShellyGen1Source),
    ShellyGen2(ShellyGen2Source),
}

impl MeasurementSource {
    pub fn new(kind: SourceKind, log: Arc<dyn EventLog>) -> Self {
        Self::with_client(kind, reqwest::Client::new(), log)
    }

    pub fn with_client(kind: SourceKind, client: reqwest::Client, log: Arc<dyn EventLog>) -> Self {
        match kind {
            SourceKind::HomeAssistant => {
                Self::HomeAssistant(HomeAssistantSource::with_log(client, log))
            }
            SourceKind::ShellyGen1 => Self::ShellyGen1(ShellyGen1Source::new(client)),
            SourceKind::ShellyGen2 => Self::ShellyGen2(ShellyGen2Source::new(client)),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            Self::HomeAssistant(_) => SourceKind::HomeAssistant,
            Self::ShellyGen1(_) => SourceKind::ShellyGen1,
            Self::ShellyGen2(_) => SourceKind::ShellyGen2,
        }
    }

    /// Polls the upstream once. Failures come back as values; nothing here
    /// panics or retries.
    pub async fn fetch(&mut self, config: &SourceConfig) -> Result<MeterReading, SourceError> {
        match self {
            Self::HomeAssistant(source) => source.fetch(config).await,
            Self::ShellyGen1(source) => source.fetch(config).await,
            Self::ShellyGen2(source) => source.fetch(config).await,
        }
    }

    pub fn last_http_code(&self) -> Option<u16> {
        match self {
            Self::HomeAssistant(source) => source.last_http_code(),
            Self::ShellyGen1(source) => source.last_http_code(),
            Self::ShellyGen2(source) => source.last_http_code(),
        }
    }
}

/// Sends `request` with `timeout`, records the status code (cleared when no
/// response arrived) and decodes a `200 OK` body as JSON.
pub(crate) async fn get_json<T: DeserializeOwned>(
    request: RequestBuilder,
    timeout: Duration,
    last_http_code: &mut Option<u16>,
) -> Result<T, SourceError> {
    let response = match request.timeout(timeout).send().await {
        Ok(response) => response,
        Err(err) => {
            *last_http_code = None;
            return Err(SourceError::from_transport(err));
        }
    };
    let status = response.status();
    *last_http_code = Some(status.as_u16());
    if status != StatusCode::OK {
        return Err(SourceError::Http(status.as_u16()));
    }
    let body = response
        .bytes()
        .await
        .map_err(SourceError::from_transport)?;
    serde_json::from_slice(&body).map_err(|e| SourceError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::TracingLog;

    #[test]
    fn test_parse_source_kind() {
        assert_eq!("home_assistant".parse::<SourceKind>(), Ok(SourceKind::HomeAssistant));
        assert_eq!("Shelly-Gen1".parse::<SourceKind>(), Ok(SourceKind::ShellyGen1));
        assert_eq!(" shelly_gen2 ".parse::<SourceKind>(), Ok(SourceKind::ShellyGen2));
        assert_eq!("shelly_gen3".parse::<SourceKind>(), Ok(SourceKind::ShellyGen2));
        assert!("sunspec".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_display_round_trips_through_from_str() {
        for kind in [
            SourceKind::HomeAssistant,
            SourceKind::ShellyGen1,
            SourceKind::ShellyGen2,
        ] {
            assert_eq!(kind.to_string().parse::<SourceKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_source_variant_matches_kind() {
        assert_eq!(
            MeasurementSource::new(SourceKind::ShellyGen2, Arc::new(TracingLog)).kind(),
            SourceKind::ShellyGen2
        );
        assert_eq!(
            MeasurementSource::new(SourceKind::HomeAssistant, Arc::new(TracingLog))
                .last_http_code(),
            None
        );
        assert_eq!(SourceKind::ShellyGen1.log_tag(), LogTag::Shelly);
    }

    #[tokio::test]
    async fn test_get_json_records_status_code() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock("GET", "/ok")
            .with_status(200)
            .with_body(r#"{"value": 1}"#)
            .create_async()
            .await;
        let failing = server
            .mock("GET", "/fail")
            .with_status(500)
            .create_async()
            .await;
        let garbage = server
            .mock("GET", "/garbage")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = reqwest::Client::new();
        let timeout = Duration::from_secs(2);
        let mut code = None;

        let value: serde_json::Value =
            get_json(client.get(format!("{}/ok", server.url())), timeout, &mut code)
                .await
                .unwrap();
        assert_eq!(value["value"], 1);
        assert_eq!(code, Some(200));

        let err = get_json::<serde_json::Value>(
            client.get(format!("{}/fail", server.url())),
            timeout,
            &mut code,
        )
        .await
        .unwrap_err();
        assert_eq!(err, SourceError::Http(500));
        assert_eq!(code, Some(500));

        let err = get_json::<serde_json::Value>(
            client.get(format!("{}/garbage", server.url())),
            timeout,
            &mut code,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::Parse(_)));
        assert_eq!(code, Some(200));

        ok.assert_async().await;
        failing.assert_async().await;
        garbage.assert_async().await;
    }

    #[tokio::test]
    async fn test_get_json_connection_refused() {
        let mut code = Some(200);
        let err = get_json::<serde_json::Value>(
            reqwest::Client::new().get("http://127.0.0.1:1/status"),
            Duration::from_millis(500),
            &mut code,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SourceError::Connectivity(_)));
        assert_eq!(code, None);
    }
}
