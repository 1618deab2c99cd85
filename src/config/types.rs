use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use uuid::Uuid;

use crate::device::connection::ConnectionSettings;
use crate::device::constants::{accessory_service_uuids, ACCESSORY_NAME, CONNECT_TIMEOUT, DEFAULT_MATRIX_DISPLAY_INTERVAL, MAX_ADVERTISING_INTERVAL};

fn default_connection_timeout_ms() -> u64 {
    CONNECT_TIMEOUT
}

fn default_max_advertising_interval_ms() -> Option<u64> {
    Some(MAX_ADVERTISING_INTERVAL)
}

fn default_true() -> bool {
    true
}

fn default_matrix_display_interval() -> f64 {
    DEFAULT_MATRIX_DISPLAY_INTERVAL
}

fn default_matrix_brightness() -> f32 {
    1.0
}

fn default_device_name() -> String {
    ACCESSORY_NAME.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Invalidate devices that stop advertising
    #[serde(default)]
    pub detect_unreachable: bool,
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// `null` disables the advertisement liveness check
    #[serde(default = "default_max_advertising_interval_ms")]
    pub max_advertising_interval_ms: Option<u64>,
    #[serde(default = "default_true")]
    pub reconnect_on_first_failure: bool,
    /// Seconds; 0 displays a matrix until the next one is written
    #[serde(default = "default_matrix_display_interval")]
    pub default_matrix_display_interval: f64,
    #[serde(default = "default_matrix_brightness")]
    pub matrix_brightness: f32,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    /// Scanned for in addition to the accessory's own services
    #[serde(default)]
    pub additional_service_uuids: Vec<Uuid>,
}

impl Config {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            max_advertising_interval: self.max_advertising_interval_ms.map(Duration::from_millis),
            reconnect_on_first_failure: self.reconnect_on_first_failure,
            matrix_brightness: self.matrix_brightness.clamp(0.0, 1.0),
            default_matrix_display_interval: self.default_matrix_display_interval,
        }
    }

    /// The services to scan for.
    pub fn service_uuids(&self) -> Vec<Uuid> {
        let mut services = accessory_service_uuids();
        for uuid in &self.additional_service_uuids {
            if !services.contains(uuid) {
                services.push(*uuid);
            }
        }
        services
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            detect_unreachable: false,
            connection_timeout_ms: default_connection_timeout_ms(),
            max_advertising_interval_ms: default_max_advertising_interval_ms(),
            reconnect_on_first_failure: true,
            default_matrix_display_interval: default_matrix_display_interval(),
            matrix_brightness: default_matrix_brightness(),
            device_name: default_device_name(),
            additional_service_uuids: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.connection_settings(), ConnectionSettings::default());
    }

    #[test]
    fn test_camel_case_fields() {
        let config: Config = serde_json::from_str(r#"{
            "detectUnreachable": true,
            "maxAdvertisingIntervalMs": null,
            "matrixBrightness": 3.0,
            "deviceName": "Nuimo Control",
            "additionalServiceUuids": ["0000180f-0000-1000-8000-00805f9b34fb", "f29b1530-cb19-40f3-be5c-7241ecb82fd2"]
        }"#).unwrap();

        assert!(config.detect_unreachable);
        assert_eq!(config.device_name, "Nuimo Control");

        let settings = config.connection_settings();
        assert_eq!(settings.max_advertising_interval, None);
        assert_eq!(settings.matrix_brightness, 1.0);

        // the battery service is already scanned for
        assert_eq!(config.service_uuids().len(), accessory_service_uuids().len() + 1);
    }
}
