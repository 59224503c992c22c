use serde_derive::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::SourceError;
use crate::measurement_source::get_json;

/// Per-request timeout for `/api/states` calls.
pub const STATE_TIMEOUT: Duration = Duration::from_millis(1500);

/// Thin client for the Home Assistant REST state endpoint.
#[derive(Debug, Clone)]
pub struct HomeAssistantAPI {
    client: reqwest::Client,
    last_http_code: Option<u16>,
}

impl Default for HomeAssistantAPI {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

impl HomeAssistantAPI {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            last_http_code: None,
        }
    }

    pub fn last_http_code(&self) -> Option<u16> {
        self.last_http_code
    }

    pub fn clear_last_http_code(&mut self) {
        self.last_http_code = None;
    }

    pub async fn read_sensor_value(
        &mut self,
        endpoint_url: &str,
        auth_token: &str,
        sensor_path: &str,
    ) -> Result<HASensor, SourceError> {
        if endpoint_url.is_empty() {
            return Err(SourceError::NotConfigured("Home Assistant URL"));
        }
        let request = self
            .client
            .get(format!("{}/api/states/{}", endpoint_url, sensor_path))
            .bearer_auth(auth_token)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        get_json(request, STATE_TIMEOUT, &mut self.last_http_code).await
    }
}

#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HASensor {
    #[serde(rename = "entity_id", default)]
    pub entity_id: String,
    /// Missing or `null` states come through as `None`.
    #[serde(default)]
    pub state: Option<String>,
    #[serde(rename = "last_changed", default)]
    pub last_changed: String,
    #[serde(rename = "last_updated", default)]
    pub last_updated: String,
}

impl HASensor {
    pub fn numeric_state(&self) -> Option<f32> {
        self.state.as_deref()?.trim().parse().ok()
    }
}
