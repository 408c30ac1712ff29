use crate::device::constants::{BATTERY_MAX_VOLTS, BATTERY_MIN_VOLTS};
use crate::device::payload::decode_battery_millivolts;
use crate::error::DecodeError;

/// Maps a battery reading onto [0, 100] linearly between 3.3V and 4.05V.
pub fn millivolts_to_percent(millivolts: i16) -> f64 {
    let volts = f64::from(millivolts) / 1000.0;
    let percent = (volts - BATTERY_MIN_VOLTS) / (BATTERY_MAX_VOLTS - BATTERY_MIN_VOLTS) * 100.0;
    percent.clamp(0.0, 100.0)
}

/// Last known battery level of the connected device. No smoothing, the latest read wins.
#[derive(Debug, Default)]
pub struct BatteryMonitor {
    percent: Option<f64>,
}

impl BatteryMonitor {
    pub fn new() -> Self {
        BatteryMonitor { percent: None }
    }

    pub fn update(&mut self, data: &[u8]) -> Result<f64, DecodeError> {
        let millivolts = decode_battery_millivolts(data)?;
        let percent = millivolts_to_percent(millivolts);
        self.percent = Some(percent);
        Ok(percent)
    }

    pub fn percent(&self) -> Option<f64> {
        self.percent
    }

    pub fn reset(&mut self) {
        self.percent = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{} != {}", actual, expected);
    }

    #[test]
    fn clamps_below_empty() {
        assert_eq!(millivolts_to_percent(3300), 0.0);
        assert_eq!(millivolts_to_percent(3000), 0.0);
        assert_eq!(millivolts_to_percent(0), 0.0);
        assert_eq!(millivolts_to_percent(i16::MIN), 0.0);
    }

    #[test]
    fn clamps_above_full() {
        assert_close(millivolts_to_percent(4050), 100.0);
        assert_eq!(millivolts_to_percent(4200), 100.0);
        assert_eq!(millivolts_to_percent(i16::MAX), 100.0);
    }

    #[test]
    fn linear_in_between() {
        assert_close(millivolts_to_percent(3675), 50.0);
        assert_close(millivolts_to_percent(3700), 53.333_333_333_333);
        assert_close(millivolts_to_percent(3450), 20.0);
    }

    #[test]
    fn non_decreasing() {
        let mut previous = millivolts_to_percent(3000);
        for millivolts in 3001..=4300 {
            let percent = millivolts_to_percent(millivolts);
            assert!(percent >= previous, "{} mV: {} < {}", millivolts, percent, previous);
            previous = percent;
        }
    }

    #[test]
    fn monitor_keeps_last_reading() {
        let mut monitor = BatteryMonitor::new();
        assert_eq!(monitor.percent(), None);

        assert_eq!(monitor.update(&4200i16.to_le_bytes()), Ok(100.0));
        assert_eq!(monitor.update(&3000i16.to_le_bytes()), Ok(0.0));
        assert_eq!(monitor.percent(), Some(0.0));

        assert!(monitor.update(&[1]).is_err());
        assert_eq!(monitor.percent(), Some(0.0));

        monitor.reset();
        assert_eq!(monitor.percent(), None);
    }
}
