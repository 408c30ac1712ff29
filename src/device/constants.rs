use uuid::Uuid;

/**
 * The UUID of the Bluetooth BLE service carrying pressure and gyroscope frames.
 */
pub const TELEMETRY_SERVICE: &str = "9fdd0001-fec8-42a6-b569-ec3ec15505f4";

/**
 * The UUID of the Bluetooth BLE service carrying the battery voltage.
 */
pub const BATTERY_SERVICE: &str = "d6240001-e814-4993-a135-7845bc91d225";

/**
 * Recommended telemetry poll interval (seconds).
 */
pub const DEFAULT_POLL_INTERVAL: f64 = 0.2;

/**
 * The device can not keep up with reads faster than this (seconds).
 */
pub const MIN_POLL_INTERVAL: f64 = 0.06;

/**
 * How often (milliseconds) the btleplug backend checks the adapter power state.
 */
pub const ADAPTER_STATE_POLL_DELAY: u64 = 1000;

/**
 * Telemetry frame: pressure, gyro x, gyro y, gyro z; each a little endian i16.
 */
pub const TELEMETRY_FRAME_LEN: usize = 8;

/**
 * Battery frame: millivolts as a little endian i16.
 */
pub const BATTERY_FRAME_LEN: usize = 2;

// 3.3V = 0%, 4.05V = 100%
pub const BATTERY_MIN_VOLTS: f64 = 3.3;
pub const BATTERY_MAX_VOLTS: f64 = 4.05;

pub fn make_telemetry_service_uuid() -> Uuid {
    Uuid::from_u128(0x9fdd0001_fec8_42a6_b569_ec3ec15505f4)
}

pub fn make_battery_service_uuid() -> Uuid {
    Uuid::from_u128(0xd6240001_e814_4993_a135_7845bc91d225)
}
