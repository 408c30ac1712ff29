use log::{debug, info};

use crate::device::transport::{EventSink, Transport};
use crate::device::types::{AdapterState, DeviceHandle};

/// Tracks the adapter and accumulates scan results.
///
/// Results are not deduplicated: a peripheral that is reported twice during one scan is listed
/// twice. Callers that need unique entries should deduplicate on `DeviceHandle::id`.
#[derive(Debug)]
pub struct CentralController {
    adapter_state: AdapterState,
    devices: Vec<DeviceHandle>,
    scanning: bool,
}

impl Default for CentralController {
    fn default() -> Self {
        CentralController::new()
    }
}

impl CentralController {
    pub fn new() -> Self {
        CentralController {
            adapter_state: AdapterState::Unknown,
            devices: Vec::new(),
            scanning: false,
        }
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.adapter_state
    }

    pub fn devices(&self) -> &[DeviceHandle] {
        &self.devices
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// Returns whether discovery was requested.
    pub fn scan<T: Transport, S: EventSink>(&mut self, transport: &T, sink: &S) -> bool {
        self.devices.clear();

        if !transport.is_available() {
            info!("Bluetooth is not available, not scanning");
            self.scanning = false;
            sink.devices_updated(&self.devices);
            return false;
        }

        info!("Scanning for devices...");
        transport.start_scan();
        self.scanning = true;
        true
    }

    pub fn stop_scan<T: Transport>(&mut self, transport: &T) {
        if self.scanning {
            info!("Stopping scan");
        }
        self.scanning = false;
        transport.stop_scan();
    }

    /// Returns whether discovery was (re)started.
    pub fn adapter_state_changed<T: Transport, S: EventSink>(&mut self, state: AdapterState, transport: &T, sink: &S) -> bool {
        info!("Adapter state changed to {:?}", state);
        self.adapter_state = state;

        if state.is_ready() {
            transport.start_scan();
            self.scanning = true;
            return true;
        }

        self.scanning = false;
        self.devices.clear();
        sink.devices_updated(&self.devices);
        false
    }

    pub fn device_discovered<S: EventSink>(&mut self, device: DeviceHandle, sink: &S) {
        if !self.scanning {
            debug!("Ignoring discovery of {} after scan stopped", device.id);
            return;
        }

        debug!("Discovered {} {}", device.id, device.display_name());
        self.devices.push(device);
        sink.devices_updated(&self.devices);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::{FakeTransport, Request};
    use crate::device::types::DeviceEvent;
    use futures::channel::mpsc::{unbounded, UnboundedReceiver};

    fn drain(receiver: &mut UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = receiver.try_next() {
            events.push(event);
        }
        events
    }

    fn device_lists(events: Vec<DeviceEvent>) -> Vec<Vec<DeviceHandle>> {
        events.into_iter().filter_map(|event| match event {
            DeviceEvent::DevicesUpdated(devices) => Some(devices),
            _ => None,
        }).collect()
    }

    #[test]
    fn scan_without_permission_reports_empty_list() {
        let transport = FakeTransport::new();
        transport.set_available(false);
        let (sink, mut receiver) = unbounded::<DeviceEvent>();
        let mut central = CentralController::new();

        assert!(!central.scan(&transport, &sink));
        assert!(!central.is_scanning());
        assert!(transport.requests().is_empty());
        assert_eq!(device_lists(drain(&mut receiver)), vec![Vec::<DeviceHandle>::new()]);
    }

    #[test]
    fn repeated_advertisements_are_listed_twice() {
        let transport = FakeTransport::new();
        let (sink, mut receiver) = unbounded::<DeviceEvent>();
        let mut central = CentralController::new();

        assert!(central.scan(&transport, &sink));
        assert_eq!(transport.requests(), vec![Request::StartScan]);

        let sensor = DeviceHandle::new("AA:BB", Some("DeepBreath".to_string()));
        central.device_discovered(sensor.clone(), &sink);
        central.device_discovered(sensor.clone(), &sink);

        assert_eq!(central.devices(), &[sensor.clone(), sensor.clone()]);
        assert_eq!(
            device_lists(drain(&mut receiver)),
            vec![vec![sensor.clone()], vec![sensor.clone(), sensor]]
        );
    }

    #[test]
    fn scan_clears_previous_results() {
        let transport = FakeTransport::new();
        let (sink, _receiver) = unbounded::<DeviceEvent>();
        let mut central = CentralController::new();

        central.scan(&transport, &sink);
        central.device_discovered(DeviceHandle::new("1", None), &sink);
        central.scan(&transport, &sink);
        assert!(central.devices().is_empty());
    }

    #[test]
    fn discoveries_after_stop_are_dropped() {
        let transport = FakeTransport::new();
        let (sink, mut receiver) = unbounded::<DeviceEvent>();
        let mut central = CentralController::new();

        central.scan(&transport, &sink);
        central.stop_scan(&transport);
        central.stop_scan(&transport);
        central.device_discovered(DeviceHandle::new("late", None), &sink);

        assert!(central.devices().is_empty());
        assert!(drain(&mut receiver).is_empty());
        assert_eq!(transport.requests(), vec![Request::StartScan, Request::StopScan, Request::StopScan]);
    }

    #[test]
    fn adapter_power_cycle() {
        let transport = FakeTransport::new();
        let (sink, mut receiver) = unbounded::<DeviceEvent>();
        let mut central = CentralController::new();

        assert!(central.adapter_state_changed(AdapterState::PoweredOn, &transport, &sink));
        assert_eq!(transport.requests(), vec![Request::StartScan]);
        central.device_discovered(DeviceHandle::new("1", None), &sink);

        for state in [AdapterState::PoweredOff, AdapterState::Unauthorized, AdapterState::Resetting] {
            assert!(!central.adapter_state_changed(state, &transport, &sink));
            assert!(central.devices().is_empty());
            assert!(!central.is_scanning());
        }

        assert_eq!(
            device_lists(drain(&mut receiver)),
            vec![vec![DeviceHandle::new("1", None)], vec![], vec![], vec![]]
        );
        assert_eq!(central.adapter_state(), AdapterState::Resetting);
    }
}
