use std::fmt;
use serde::Serialize;
use uuid::Uuid;

/// Opaque, transport assigned identifier of a peripheral.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A peripheral as observed during one scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHandle {
    pub id: DeviceId,
    pub name: Option<String>,
}

impl DeviceHandle {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        DeviceHandle { id: DeviceId(id.into()), name }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("NONE")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    DiscoveringServices,
    DiscoveringCharacteristics,
    Ready,
    Disconnecting,
}

impl ConnectionState {
    /// True while a peripheral is owned by the session, from `connect` until teardown.
    pub fn has_device(&self) -> bool {
        !matches!(self, ConnectionState::Idle | ConnectionState::Scanning)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl AdapterState {
    pub fn is_ready(&self) -> bool {
        *self == AdapterState::PoweredOn
    }
}

/// Identifies one characteristic of the connected peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicInfo {
    pub characteristic: CharacteristicRef,
    pub readable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingDataItem {
    pub pressure: i16,
    pub gyro_x: i16,
    pub gyro_y: i16,
    pub gyro_z: i16,
    pub elapsed_seconds: f64,
}

#[derive(Debug, Clone)]
pub enum DeviceEvent {
    DevicesUpdated(Vec<DeviceHandle>),
    ConnectionChanged(Option<DeviceHandle>),
    BatteryUpdated(Option<f64>), // [0, 100]
    DataItem(TrainingDataItem),
    StateChange(ConnectionState),
}
