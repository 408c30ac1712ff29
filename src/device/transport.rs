use futures::channel::mpsc::UnboundedSender;
use log::debug;
use uuid::Uuid;

use crate::device::types::{
    AdapterState, CharacteristicInfo, CharacteristicRef, ConnectionState, DeviceEvent, DeviceHandle, DeviceId,
    TrainingDataItem,
};
use crate::error::DeviceError;

/// The wireless stack, as seen by the session state machine.
///
/// Requests return immediately; their outcome is reported later as a [`TransportEvent`] on
/// whatever channel the implementation hands out. Failed requests may simply never produce an
/// event.
pub trait Transport: Send + Sync + 'static {
    /// Whether the application is allowed to use Bluetooth at all.
    fn is_available(&self) -> bool;

    fn start_scan(&self);

    fn stop_scan(&self);

    fn connect(&self, device: &DeviceId);

    fn cancel_connection(&self, device: &DeviceId);

    fn discover_services(&self, device: &DeviceId);

    fn discover_characteristics(&self, device: &DeviceId, service: Uuid);

    fn read_characteristic(&self, device: &DeviceId, characteristic: &CharacteristicRef);
}

#[derive(Debug)]
pub enum TransportEvent {
    AdapterStateChanged(AdapterState),
    DeviceDiscovered(DeviceHandle),
    Connected(DeviceId),
    Disconnected(DeviceId),
    ServicesDiscovered {
        device: DeviceId,
        services: Vec<Uuid>,
    },
    CharacteristicsDiscovered {
        device: DeviceId,
        service: Uuid,
        characteristics: Vec<CharacteristicInfo>,
    },
    ValueRead {
        device: DeviceId,
        characteristic: CharacteristicRef,
        result: Result<Option<Vec<u8>>, DeviceError>,
    },
}

/// Receives the notifications of a session.
///
/// Methods are invoked while the session's internal lock is held; an implementation must not
/// call back into the session synchronously.
pub trait EventSink: Send + Sync + 'static {
    fn devices_updated(&self, devices: &[DeviceHandle]);

    fn connection_changed(&self, device: Option<&DeviceHandle>);

    fn battery_updated(&self, percent: Option<f64>);

    fn data_item(&self, item: TrainingDataItem);

    fn state_changed(&self, _state: ConnectionState) {}
}

impl EventSink for UnboundedSender<DeviceEvent> {
    fn devices_updated(&self, devices: &[DeviceHandle]) {
        send_event(self, DeviceEvent::DevicesUpdated(devices.to_vec()));
    }

    fn connection_changed(&self, device: Option<&DeviceHandle>) {
        send_event(self, DeviceEvent::ConnectionChanged(device.cloned()));
    }

    fn battery_updated(&self, percent: Option<f64>) {
        send_event(self, DeviceEvent::BatteryUpdated(percent));
    }

    fn data_item(&self, item: TrainingDataItem) {
        send_event(self, DeviceEvent::DataItem(item));
    }

    fn state_changed(&self, state: ConnectionState) {
        send_event(self, DeviceEvent::StateChange(state));
    }
}

fn send_event(sender: &UnboundedSender<DeviceEvent>, event: DeviceEvent) {
    if let Err(err) = sender.unbounded_send(event) {
        debug!("Dropping DeviceEvent, receiver is gone: {:?}", err.into_inner());
    }
}
