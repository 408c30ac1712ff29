use std::time::Duration;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::battery::BatteryMonitor;
use crate::device::constants::{make_battery_service_uuid, make_telemetry_service_uuid};
use crate::device::payload::decode_training_data;
use crate::device::poll::PollingTimer;
use crate::device::transport::{EventSink, Transport};
use crate::device::types::{CharacteristicInfo, CharacteristicRef, ConnectionState, DeviceHandle, DeviceId};
use crate::error::DeviceError;

/// Owns the one active connection and everything that only lives as long as it does: the
/// selected characteristics, the battery level and the poll timer.
///
/// Characteristic handles only exist in `DiscoveringCharacteristics` and `Ready`. Operations
/// that need a handle which is not there are no-ops.
#[derive(Debug)]
pub struct SessionManager {
    state: ConnectionState,
    device: Option<DeviceHandle>,
    data_char: Option<CharacteristicRef>,
    battery_char: Option<CharacteristicRef>,
    pending_services: Vec<Uuid>,
    battery: BatteryMonitor,
    timer: PollingTimer,
}

impl Default for SessionManager {
    fn default() -> Self {
        SessionManager::new()
    }
}

impl SessionManager {
    pub fn new() -> Self {
        SessionManager {
            state: ConnectionState::Idle,
            device: None,
            data_char: None,
            battery_char: None,
            pending_services: Vec::new(),
            battery: BatteryMonitor::new(),
            timer: PollingTimer::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn device(&self) -> Option<&DeviceHandle> {
        self.device.as_ref()
    }

    pub fn data_characteristic(&self) -> Option<CharacteristicRef> {
        self.data_char
    }

    pub fn battery_characteristic(&self) -> Option<CharacteristicRef> {
        self.battery_char
    }

    pub fn battery_percent(&self) -> Option<f64> {
        self.battery.percent()
    }

    pub fn is_polling(&self) -> bool {
        self.timer.is_running()
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.timer.interval()
    }

    fn set_state<S: EventSink>(&mut self, state: ConnectionState, sink: &S) {
        if self.state == state {
            return;
        }
        debug!("Session state {:?} -> {:?}", self.state, state);
        self.state = state;
        sink.state_changed(state);
    }

    fn owns(&self, device: &DeviceId) -> bool {
        self.device.as_ref().map_or(false, |owned| &owned.id == device)
    }

    /// Mirrors the scanner into the state while no device is owned.
    pub fn scanning_changed<S: EventSink>(&mut self, scanning: bool, sink: &S) {
        if self.state.has_device() {
            return;
        }
        let state = if scanning { ConnectionState::Scanning } else { ConnectionState::Idle };
        self.set_state(state, sink);
    }

    /// Returns false, without doing anything, when a device is already owned.
    pub fn connect<T: Transport, S: EventSink>(&mut self, device: DeviceHandle, transport: &T, sink: &S) -> bool {
        if let Some(owned) = &self.device {
            warn!("Not connecting to {}: already connected to {}", device.id, owned.id);
            return false;
        }

        info!("Connecting to peripheral {} {}...", device.id, device.display_name());
        transport.connect(&device.id);
        self.device = Some(device);
        self.set_state(ConnectionState::Connecting, sink);
        true
    }

    pub fn on_connected<T: Transport, S: EventSink>(&mut self, device: &DeviceId, transport: &T, sink: &S) {
        if !self.owns(device) || self.state != ConnectionState::Connecting {
            debug!("Ignoring connection of {} in state {:?}", device, self.state);
            return;
        }

        info!("Connected; Discovering services...");
        self.set_state(ConnectionState::Connected, sink);
        sink.connection_changed(self.device.as_ref());
        self.set_state(ConnectionState::DiscoveringServices, sink);
        transport.discover_services(device);
    }

    pub fn on_services_discovered<T: Transport, S: EventSink>(
        &mut self,
        device: &DeviceId,
        services: &[Uuid],
        transport: &T,
        sink: &S,
    ) {
        if !self.owns(device) || self.state != ConnectionState::DiscoveringServices {
            debug!("Ignoring services of {} in state {:?}", device, self.state);
            return;
        }

        for known in [make_telemetry_service_uuid(), make_battery_service_uuid()] {
            if services.contains(&known) {
                debug!("Discovering characteristics of service {}", known);
                self.pending_services.push(known);
                transport.discover_characteristics(device, known);
            }
        }

        if self.pending_services.is_empty() {
            warn!("Peripheral {} has neither the telemetry nor the battery service", device);
            self.set_state(ConnectionState::Ready, sink);
            return;
        }

        self.set_state(ConnectionState::DiscoveringCharacteristics, sink);
    }

    /// Telemetry and battery discovery may complete in either order.
    pub fn on_characteristics_discovered<T: Transport, S: EventSink>(
        &mut self,
        device: &DeviceId,
        service: Uuid,
        characteristics: &[CharacteristicInfo],
        transport: &T,
        sink: &S,
    ) {
        let Some(index) = self.pending_services.iter().position(|pending| *pending == service) else {
            debug!("Ignoring characteristics of service {} in state {:?}", service, self.state);
            return;
        };
        if !self.owns(device) || self.state != ConnectionState::DiscoveringCharacteristics {
            debug!("Ignoring characteristics of {} in state {:?}", device, self.state);
            return;
        }
        self.pending_services.swap_remove(index);

        let selected = characteristics.iter()
            .find(|info| info.readable)
            .map(|info| info.characteristic);

        match selected {
            None => warn!("Service {} has no readable characteristic", service),
            Some(characteristic) if service == make_telemetry_service_uuid() => {
                info!("Using telemetry characteristic {}", characteristic.uuid);
                self.data_char = Some(characteristic);
            },
            Some(characteristic) => {
                info!("Using battery characteristic {}", characteristic.uuid);
                self.battery_char = Some(characteristic);
                self.read_battery(transport);
            },
        }

        if self.pending_services.is_empty() {
            info!("Peripheral ready");
            self.set_state(ConnectionState::Ready, sink);
        }
    }

    pub fn read_battery<T: Transport>(&self, transport: &T) {
        match (&self.device, &self.battery_char) {
            (Some(device), Some(characteristic)) => transport.read_characteristic(&device.id, characteristic),
            _ => debug!("No battery characteristic, not reading battery"),
        }
    }

    /// Replaces any running poll session. Returns the effective interval, or `None` when there is
    /// no telemetry characteristic to poll.
    pub fn start_polling<F>(&mut self, interval_seconds: f64, on_fire: F) -> Option<Duration>
    where
        F: FnMut(&CancellationToken) + Send + 'static,
    {
        self.timer.stop();

        if self.data_char.is_none() {
            debug!("No telemetry characteristic, not polling");
            return None;
        }

        let interval = self.timer.start(interval_seconds, on_fire);
        info!("Polling telemetry every {:?}", interval);
        Some(interval)
    }

    pub fn stop_polling(&mut self) {
        if self.timer.is_running() {
            info!("Stopped polling telemetry");
        }
        self.timer.stop();
    }

    /// One timer firing. The caller holds the session lock, so a cancelled token here means
    /// `stop_polling` or a teardown already ran.
    pub fn poll_fire<T: Transport>(&self, cancel: &CancellationToken, transport: &T) {
        if cancel.is_cancelled() {
            return;
        }

        match (&self.device, &self.data_char) {
            (Some(device), Some(characteristic)) => transport.read_characteristic(&device.id, characteristic),
            _ => debug!("Poll fired without a telemetry characteristic"),
        }
    }

    pub fn on_value_read<S: EventSink>(
        &mut self,
        device: &DeviceId,
        characteristic: &CharacteristicRef,
        result: Result<Option<Vec<u8>>, DeviceError>,
        sink: &S,
    ) {
        if !self.owns(device) {
            debug!("Ignoring read completion from {}", device);
            return;
        }

        let data = match result {
            Err(err) => {
                warn!("Error reading value: {}", err);
                return;
            },
            Ok(None) => {
                warn!("Error reading value: no value");
                return;
            },
            Ok(Some(data)) => data,
        };

        if self.battery_char.as_ref() == Some(characteristic) {
            match self.battery.update(&data) {
                Ok(percent) => {
                    info!("Battery at {:.1}%", percent);
                    sink.battery_updated(Some(percent));
                },
                Err(err) => warn!("Unable to parse battery value: {}", err),
            }
        } else if self.data_char.as_ref() == Some(characteristic) {
            let Some(elapsed_seconds) = self.timer.elapsed_seconds() else {
                debug!("Dropping telemetry read, not polling");
                return;
            };

            match decode_training_data(&data, elapsed_seconds) {
                Ok(item) => sink.data_item(item),
                Err(err) => warn!("Unable to parse data: {}", err),
            }
        } else {
            debug!("Ignoring read of unselected characteristic {}", characteristic.uuid);
        }
    }

    /// The link went down without `disconnect` being called. No reconnection is attempted.
    pub fn on_disconnected<T: Transport, S: EventSink>(&mut self, device: &DeviceId, transport: &T, sink: &S) {
        if !self.owns(device) {
            debug!("Ignoring disconnection of {}", device);
            return;
        }

        warn!("Connection lost");
        self.teardown(false, transport, sink);
    }

    /// Safe in any state; always ends in `Idle`.
    pub fn disconnect<T: Transport, S: EventSink>(&mut self, transport: &T, sink: &S) {
        info!("Disconnecting");
        self.teardown(true, transport, sink);
    }

    fn teardown<T: Transport, S: EventSink>(&mut self, release: bool, transport: &T, sink: &S) {
        if self.device.is_some() {
            self.set_state(ConnectionState::Disconnecting, sink);
        }

        // the timer goes first, a firing must never see the handles cleared under it
        self.timer.stop();
        self.data_char = None;
        self.battery_char = None;
        self.pending_services.clear();
        self.battery.reset();

        if let Some(device) = self.device.take() {
            if release {
                transport.cancel_connection(&device.id);
            }
        }

        self.set_state(ConnectionState::Idle, sink);
        sink.connection_changed(None);
    }
}
