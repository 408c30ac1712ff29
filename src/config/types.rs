use serde::{Deserialize, Serialize};

use crate::device::constants::DEFAULT_POLL_INTERVAL;
use crate::device::types::DeviceHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub poll_interval_seconds: f64,
    pub scan_seconds: u64,
    /// Only connect to a device whose id or display name equals this.
    pub device_name: Option<String>,
    /// Stop monitoring after this many seconds; run until Ctrl-C when absent.
    pub duration_seconds: Option<u64>,
}

impl Config {
    pub fn matches_device(&self, device: &DeviceHandle) -> bool {
        match &self.device_name {
            None => true,
            Some(wanted) => device.id.0 == *wanted || device.name.as_deref() == Some(wanted.as_str()),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval_seconds: DEFAULT_POLL_INTERVAL,
            scan_seconds: 5,
            device_name: None,
            duration_seconds: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"pollIntervalSeconds": 0.5}"#).unwrap();
        assert_eq!(config.poll_interval_seconds, 0.5);
        assert_eq!(config.scan_seconds, 5);
        assert_eq!(config.device_name, None);
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"pollIntervalSeconds\":0.2"));
        assert!(json.contains("\"scanSeconds\":5"));
    }

    #[test]
    fn device_filter() {
        let sensor = DeviceHandle::new("AA:BB", Some("DeepBreath".to_string()));
        let anonymous = DeviceHandle::new("CC:DD", None);

        assert!(Config::default().matches_device(&anonymous));

        let by_name = Config { device_name: Some("DeepBreath".to_string()), ..Config::default() };
        assert!(by_name.matches_device(&sensor));
        assert!(!by_name.matches_device(&anonymous));

        let by_id = Config { device_name: Some("CC:DD".to_string()), ..Config::default() };
        assert!(by_id.matches_device(&anonymous));
    }
}
