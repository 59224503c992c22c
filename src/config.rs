use anyhow::{anyhow, Context};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::measurement_source::SourceKind;

/// Home Assistant entity ids, one per canonical quantity.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HomeAssistantEntities {
    pub power: String,
    pub energy: String,
    pub voltage: String,
    pub current: String,
    pub frequency: String,
    pub power_factor: String,
}

/// Read-only bundle handed to every `fetch`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub kind: SourceKind,
    pub home_assistant_url: String,
    pub home_assistant_token: String,
    pub entities: HomeAssistantEntities,
    pub shelly_url: String,
    pub shelly_channel: usize,
}

impl SourceConfig {
    /// Base URL for Home Assistant, without a trailing slash.
    pub fn home_assistant_base(&self) -> &str {
        trim_base_url(&self.home_assistant_url)
    }

    /// Base URL for a Shelly Gen1 device. Older setups only filled in the
    /// Home Assistant URL field, so it stands in when no Shelly URL is set.
    pub fn shelly_gen1_base(&self) -> &str {
        if self.shelly_url.trim().is_empty() {
            trim_base_url(&self.home_assistant_url)
        } else {
            trim_base_url(&self.shelly_url)
        }
    }

    /// Base URL for a Shelly Gen2/Gen3 device. Empty unless `SHELLY_URL` is set.
    pub fn shelly_gen2_base(&self) -> &str {
        trim_base_url(&self.shelly_url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusConfig {
    pub serial_port: String,
    pub baud_rate: u32,
    pub slave_id: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    pub source: SourceConfig,
    pub modbus: ModbusConfig,
    pub poll_interval: Duration,
}

impl BridgeConfig {
    pub const DEFAULT_SERIAL_PORT: &'static str = "/dev/ttyUSB0";
    pub const DEFAULT_BAUD_RATE: u32 = 2400;
    pub const DEFAULT_SLAVE_ID: u8 = 1;
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let text = |key: &str| lookup(key).unwrap_or_default().trim().to_string();

        let kind = match lookup("METER_SOURCE") {
            Some(raw) if !raw.trim().is_empty() => raw
                .parse::<SourceKind>()
                .context("Invalid METER_SOURCE")?,
            _ => SourceKind::HomeAssistant,
        };

        let source = SourceConfig {
            kind,
            home_assistant_url: text("HA_URL"),
            home_assistant_token: text("HA_TOKEN"),
            entities: HomeAssistantEntities {
                power: text("HA_ENTITY_POWER"),
                energy: text("HA_ENTITY_ENERGY"),
                voltage: text("HA_ENTITY_VOLTAGE"),
                current: text("HA_ENTITY_CURRENT"),
                frequency: text("HA_ENTITY_FREQUENCY"),
                power_factor: text("HA_ENTITY_POWER_FACTOR"),
            },
            shelly_url: text("SHELLY_URL"),
            shelly_channel: parse_or(&lookup, "SHELLY_CHANNEL", 0)?,
        };

        let serial_port = match text("MODBUS_SERIAL_PORT") {
            port if port.is_empty() => Self::DEFAULT_SERIAL_PORT.to_string(),
            port => port,
        };
        let modbus = ModbusConfig {
            serial_port,
            baud_rate: parse_or(&lookup, "MODBUS_BAUD_RATE", Self::DEFAULT_BAUD_RATE)?,
            slave_id: parse_or(&lookup, "MODBUS_SLAVE_ID", Self::DEFAULT_SLAVE_ID)?,
        };
        if modbus.slave_id == 0 || modbus.slave_id > 247 {
            return Err(anyhow!(
                "MODBUS_SLAVE_ID must be between 1 and 247, got {}",
                modbus.slave_id
            ));
        }

        let poll_ms: u64 = parse_or(&lookup, "POLL_INTERVAL_MS", Self::DEFAULT_POLL_INTERVAL_MS)?;
        if poll_ms == 0 {
            return Err(anyhow!("POLL_INTERVAL_MS must be greater than zero"));
        }

        Ok(Self {
            source,
            modbus,
            poll_interval: Duration::from_millis(poll_ms),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value `{raw}`")),
        _ => Ok(default),
    }
}

fn trim_base_url(url: &str) -> &str {
    url.trim().trim_end_matches('/')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.source.kind, SourceKind::HomeAssistant);
        assert_eq!(config.source.shelly_channel, 0);
        assert_eq!(config.modbus.serial_port, "/dev/ttyUSB0");
        assert_eq!(config.modbus.baud_rate, 2400);
        assert_eq!(config.modbus.slave_id, 1);
        assert_eq!(config.poll_interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_full_config() {
        let config = BridgeConfig::from_lookup(lookup_from(&[
            ("METER_SOURCE", "shelly_gen2"),
            ("SHELLY_URL", "http://192.168.1.50/"),
            ("SHELLY_CHANNEL", "2"),
            ("MODBUS_SERIAL_PORT", "/dev/ttyAMA0"),
            ("MODBUS_BAUD_RATE", "9600"),
            ("MODBUS_SLAVE_ID", "7"),
            ("POLL_INTERVAL_MS", "500"),
            ("HA_ENTITY_POWER", " sensor.grid_power "),
        ]))
        .unwrap();

        assert_eq!(config.source.kind, SourceKind::ShellyGen2);
        assert_eq!(config.source.shelly_gen2_base(), "http://192.168.1.50");
        assert_eq!(config.source.shelly_channel, 2);
        assert_eq!(config.source.entities.power, "sensor.grid_power");
        assert_eq!(config.modbus.serial_port, "/dev/ttyAMA0");
        assert_eq!(config.modbus.baud_rate, 9600);
        assert_eq!(config.modbus.slave_id, 7);
        assert_eq!(config.poll_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_shelly_gen1_url_falls_back_to_home_assistant_url() {
        let config =
            BridgeConfig::from_lookup(lookup_from(&[("HA_URL", "http://10.0.0.2//")])).unwrap();
        assert_eq!(config.source.shelly_gen1_base(), "http://10.0.0.2");
        assert_eq!(config.source.shelly_gen2_base(), "");
        assert_eq!(config.source.home_assistant_base(), "http://10.0.0.2");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = BridgeConfig::from_lookup(lookup_from(&[("MODBUS_BAUD_RATE", "fast")]))
            .unwrap_err();
        assert!(err.to_string().contains("MODBUS_BAUD_RATE"));

        assert!(BridgeConfig::from_lookup(lookup_from(&[("METER_SOURCE", "sma")])).is_err());
        assert!(BridgeConfig::from_lookup(lookup_from(&[("MODBUS_SLAVE_ID", "0")])).is_err());
        assert!(BridgeConfig::from_lookup(lookup_from(&[("POLL_INTERVAL_MS", "0")])).is_err());
    }
}
