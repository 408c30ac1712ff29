use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use futures::channel::mpsc::UnboundedReceiver;
use futures::StreamExt;
use log::{debug, info};
use tokio_util::sync::CancellationToken;

use crate::device::central::CentralController;
use crate::device::session::SessionManager;
use crate::device::transport::{EventSink, Transport, TransportEvent};
use crate::device::types::{AdapterState, ConnectionState, DeviceHandle};

struct ClientState {
    central: CentralController,
    session: SessionManager,
}

struct Shared<T, S> {
    transport: T,
    sink: S,
    state: Mutex<ClientState>,
}

impl<T, S> Shared<T, S> {
    fn lock(&self) -> MutexGuard<'_, ClientState> {
        // every mutation completes before the guard is released, recovering from poison is fine
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A session with a breathing sensor.
///
/// The caller, the transport's event lane (`handle_event` / `run_events`) and the poll timer all
/// go through one lock, so a `disconnect` can never interleave with a read completion or a timer
/// firing. Clones share the same session.
pub struct DeepBreath<T: Transport, S: EventSink> {
    shared: Arc<Shared<T, S>>,
}

impl<T: Transport, S: EventSink> Clone for DeepBreath<T, S> {
    fn clone(&self) -> Self {
        DeepBreath { shared: self.shared.clone() }
    }
}

impl<T: Transport, S: EventSink> DeepBreath<T, S> {
    pub fn new(transport: T, sink: S) -> Self {
        let state = ClientState {
            central: CentralController::new(),
            session: SessionManager::new(),
        };

        DeepBreath {
            shared: Arc::new(Shared { transport, sink, state: Mutex::new(state) }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.shared.transport
    }

    pub fn scan_for_devices(&self) {
        let shared = &self.shared;
        let mut state = shared.lock();
        let scanning = state.central.scan(&shared.transport, &shared.sink);
        state.session.scanning_changed(scanning, &shared.sink);
    }

    pub fn stop_scan(&self) {
        let shared = &self.shared;
        let mut state = shared.lock();
        state.central.stop_scan(&shared.transport);
        state.session.scanning_changed(false, &shared.sink);
    }

    /// Stops scanning and connects. Ignored while another device is owned.
    pub fn connect(&self, device: &DeviceHandle) {
        let shared = &self.shared;
        let mut state = shared.lock();
        state.central.stop_scan(&shared.transport);
        state.session.scanning_changed(false, &shared.sink);
        state.session.connect(device.clone(), &shared.transport, &shared.sink);
    }

    /// Stops polling, forgets the characteristics and battery level, releases the device (and
    /// stops a running scan). Always ends in `Idle` and always notifies "no device".
    pub fn disconnect(&self) {
        let shared = &self.shared;
        let mut state = shared.lock();
        if state.central.is_scanning() {
            state.central.stop_scan(&shared.transport);
        }
        state.session.disconnect(&shared.transport, &shared.sink);
    }

    pub fn read_battery(&self) {
        self.shared.lock().session.read_battery(&self.shared.transport);
    }

    /// Polls the telemetry characteristic every `interval_seconds` (at least 0.06s), starting
    /// right away. Returns the interval used, or `None` when there is nothing to poll.
    ///
    /// Must be called from within a tokio runtime.
    pub fn read_data(&self, interval_seconds: f64) -> Option<Duration> {
        let weak = Arc::downgrade(&self.shared);
        let mut state = self.shared.lock();

        state.session.start_polling(interval_seconds, move |cancel| {
            if let Some(shared) = weak.upgrade() {
                let state = shared.lock();
                state.session.poll_fire(cancel, &shared.transport);
            }
        })
    }

    pub fn stop_read_data(&self) {
        self.shared.lock().session.stop_polling();
    }

    pub fn is_bluetooth_available(&self) -> bool {
        self.shared.transport.is_available()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().session.state()
    }

    pub fn adapter_state(&self) -> AdapterState {
        self.shared.lock().central.adapter_state()
    }

    pub fn devices(&self) -> Vec<DeviceHandle> {
        self.shared.lock().central.devices().to_vec()
    }

    pub fn connected_device(&self) -> Option<DeviceHandle> {
        self.shared.lock().session.device().cloned()
    }

    pub fn battery_percent(&self) -> Option<f64> {
        self.shared.lock().session.battery_percent()
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.shared.lock().session.poll_interval()
    }

    pub fn handle_event(&self, event: TransportEvent) {
        let shared = &self.shared;
        let transport = &shared.transport;
        let sink = &shared.sink;
        let mut state = shared.lock();
        let state = &mut *state;

        match event {
            TransportEvent::AdapterStateChanged(adapter_state) => {
                let scanning = state.central.adapter_state_changed(adapter_state, transport, sink);
                state.session.scanning_changed(scanning, sink);
            },
            TransportEvent::DeviceDiscovered(device) => {
                state.central.device_discovered(device, sink);
            },
            TransportEvent::Connected(device) => {
                state.session.on_connected(&device, transport, sink);
            },
            TransportEvent::Disconnected(device) => {
                state.session.on_disconnected(&device, transport, sink);
            },
            TransportEvent::ServicesDiscovered { device, services } => {
                state.session.on_services_discovered(&device, &services, transport, sink);
            },
            TransportEvent::CharacteristicsDiscovered { device, service, characteristics } => {
                state.session.on_characteristics_discovered(&device, service, &characteristics, transport, sink);
            },
            TransportEvent::ValueRead { device, characteristic, result } => {
                state.session.on_value_read(&device, &characteristic, result, sink);
            },
        }
    }

    /// Delivers transport events until `cancel` fires or the transport goes away.
    pub async fn run_events(&self, mut events: UnboundedReceiver<TransportEvent>, cancel: CancellationToken) {
        'mainloop: loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    break 'mainloop;
                },
                event = events.next() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("Transport event stream ended");
                        break 'mainloop;
                    },
                },
            }
        }

        debug!("Stopped delivering transport events");
    }
}
