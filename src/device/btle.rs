use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use btleplug::api::{Central, CentralEvent, CentralState, CharPropFlags, Manager as _, Peripheral as _, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::StreamExt;
use log::{debug, info, warn};
use tokio::runtime::Handle;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::device::constants::ADAPTER_STATE_POLL_DELAY;
use crate::device::transport::{Transport, TransportEvent};
use crate::device::types::{AdapterState, CharacteristicInfo, CharacteristicRef, DeviceHandle, DeviceId};
use crate::error::DeviceError;

type PeripheralMap = Arc<Mutex<HashMap<DeviceId, Peripheral>>>;

/// [`Transport`] on top of btleplug, using the first adapter of the system.
///
/// Every request is spawned on the runtime that created the transport; results and adapter
/// events are sent to the receiver returned by [`BtleTransport::new`].
pub struct BtleTransport {
    adapter: Adapter,
    runtime: Handle,
    events: UnboundedSender<TransportEvent>,
    peripherals: PeripheralMap,
    no_permission: Arc<AtomicBool>,
    cancel: CancellationToken,
}

fn send_event(events: &UnboundedSender<TransportEvent>, event: TransportEvent) {
    if events.unbounded_send(event).is_err() {
        debug!("Transport event receiver is gone");
    }
}

fn device_id(peripheral: &Peripheral) -> DeviceId {
    DeviceId(peripheral.id().to_string())
}

fn adapter_state_from(state: CentralState) -> AdapterState {
    match state {
        CentralState::PoweredOn => AdapterState::PoweredOn,
        CentralState::PoweredOff => AdapterState::PoweredOff,
        _ => AdapterState::Unknown,
    }
}

impl BtleTransport {
    /// Must be called from within a tokio runtime. The background tasks stop when `cancel` fires
    /// or the transport is dropped.
    pub async fn new(cancel: CancellationToken) -> Result<(Self, UnboundedReceiver<TransportEvent>), DeviceError> {
        let manager = Manager::new().await?;
        let adapter = manager.adapters().await?
            .into_iter()
            .next()
            .ok_or(DeviceError::NoAdapter)?;

        info!("Using adapter {}", adapter.adapter_info().await.unwrap_or("UNKNOWN".to_string()));

        let central_events = adapter.events().await?;
        let (events, receiver) = unbounded();

        let transport = BtleTransport {
            adapter,
            runtime: Handle::current(),
            events,
            peripherals: Arc::new(Mutex::new(HashMap::new())),
            no_permission: Arc::new(AtomicBool::new(false)),
            cancel: cancel.child_token(),
        };

        transport.runtime.spawn(central_events_task(
            transport.cancel.clone(),
            transport.adapter.clone(),
            central_events,
            transport.peripherals.clone(),
            transport.events.clone(),
        ));
        transport.runtime.spawn(adapter_state_task(
            transport.cancel.clone(),
            transport.adapter.clone(),
            transport.no_permission.clone(),
            transport.events.clone(),
        ));

        Ok((transport, receiver))
    }

    fn peripheral(&self, device: &DeviceId) -> Option<Peripheral> {
        let peripherals = self.peripherals.lock().unwrap_or_else(PoisonError::into_inner);
        let peripheral = peripherals.get(device).cloned();
        if peripheral.is_none() {
            warn!("{}", DeviceError::UnknownDevice(device.to_string()));
        }
        peripheral
    }
}

impl Drop for BtleTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn central_events_task(
    cancel: CancellationToken,
    adapter: Adapter,
    mut central_events: std::pin::Pin<Box<dyn futures::Stream<Item = CentralEvent> + Send>>,
    peripherals: PeripheralMap,
    events: UnboundedSender<TransportEvent>,
) {
    'mainloop: loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            event = central_events.next() => match event {
                None => break 'mainloop,
                Some(CentralEvent::DeviceDiscovered(id)) => {
                    let peripheral = match adapter.peripheral(&id).await {
                        Ok(v) => v,
                        Err(err) => {
                            warn!("Failed to look up discovered peripheral {:?}: {}", id, err);
                            continue 'mainloop;
                        },
                    };
                    let name = match peripheral.properties().await {
                        Ok(Some(properties)) => properties.local_name,
                        Ok(None) => None,
                        Err(err) => {
                            warn!("Could not query peripheral for properties: {:?}", err);
                            None
                        },
                    };

                    let handle = DeviceHandle { id: device_id(&peripheral), name };
                    peripherals.lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(handle.id.clone(), peripheral);
                    send_event(&events, TransportEvent::DeviceDiscovered(handle));
                },
                Some(CentralEvent::DeviceDisconnected(id)) => {
                    send_event(&events, TransportEvent::Disconnected(DeviceId(id.to_string())));
                },
                Some(_) => {},
            },
        }
    }

    debug!("Central events task stopped");
}

async fn adapter_state_task(
    cancel: CancellationToken,
    adapter: Adapter,
    no_permission: Arc<AtomicBool>,
    events: UnboundedSender<TransportEvent>,
) {
    let mut previous: Option<AdapterState> = None;

    'mainloop: loop {
        let state = if no_permission.load(Ordering::SeqCst) {
            AdapterState::Unauthorized
        } else {
            match adapter.adapter_state().await {
                Ok(state) => adapter_state_from(state),
                Err(err) => {
                    warn!("Error checking adapter state: {:?}", err);
                    AdapterState::Unknown
                },
            }
        };

        if previous != Some(state) {
            previous = Some(state);
            send_event(&events, TransportEvent::AdapterStateChanged(state));
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                break 'mainloop;
            },
            _ = sleep(Duration::from_millis(ADAPTER_STATE_POLL_DELAY)) => {},
        }
    }
}

impl Transport for BtleTransport {
    fn is_available(&self) -> bool {
        !self.no_permission.load(Ordering::SeqCst)
    }

    fn start_scan(&self) {
        let adapter = self.adapter.clone();
        let no_permission = self.no_permission.clone();

        self.runtime.spawn(async move {
            match adapter.start_scan(ScanFilter::default()).await {
                Ok(()) => debug!("Scan started"),
                Err(btleplug::Error::PermissionDenied) => {
                    warn!("Scanning failed: permission denied");
                    no_permission.store(true, Ordering::SeqCst);
                },
                Err(err) => warn!("Scanning failed {:?}", err),
            }
        });
    }

    fn stop_scan(&self) {
        let adapter = self.adapter.clone();

        self.runtime.spawn(async move {
            if let Err(err) = adapter.stop_scan().await {
                debug!("Failed to stop scan cleanly: {:?}", err);
            }
        });
    }

    fn connect(&self, device: &DeviceId) {
        let Some(peripheral) = self.peripheral(device) else { return };
        let events = self.events.clone();
        let device = device.clone();

        // a failed attempt produces no event; the session stays in Connecting
        self.runtime.spawn(async move {
            match peripheral.connect().await {
                Ok(()) => send_event(&events, TransportEvent::Connected(device)),
                Err(err) => warn!("Connecting to peripheral failed: {:?}", err),
            }
        });
    }

    fn cancel_connection(&self, device: &DeviceId) {
        let Some(peripheral) = self.peripheral(device) else { return };

        self.runtime.spawn(async move {
            if let Err(err) = peripheral.disconnect().await {
                warn!("Disconnecting from peripheral failed: {:?}", err);
            }
        });
    }

    fn discover_services(&self, device: &DeviceId) {
        let Some(peripheral) = self.peripheral(device) else { return };
        let events = self.events.clone();
        let device = device.clone();

        self.runtime.spawn(async move {
            if let Err(err) = peripheral.discover_services().await {
                warn!("Discovering services failed: {:?}", err);
                return;
            }

            let services = peripheral.services().iter().map(|service| service.uuid).collect();
            send_event(&events, TransportEvent::ServicesDiscovered { device, services });
        });
    }

    fn discover_characteristics(&self, device: &DeviceId, service: Uuid) {
        // btleplug resolves characteristics together with the services
        let Some(peripheral) = self.peripheral(device) else { return };
        let events = self.events.clone();
        let device = device.clone();

        self.runtime.spawn(async move {
            let characteristics = peripheral.services()
                .into_iter()
                .filter(|candidate| candidate.uuid == service)
                .flat_map(|candidate| candidate.characteristics)
                .map(|characteristic| CharacteristicInfo {
                    characteristic: CharacteristicRef { service, uuid: characteristic.uuid },
                    readable: characteristic.properties.contains(CharPropFlags::READ),
                })
                .collect();

            send_event(&events, TransportEvent::CharacteristicsDiscovered { device, service, characteristics });
        });
    }

    fn read_characteristic(&self, device: &DeviceId, characteristic: &CharacteristicRef) {
        let Some(peripheral) = self.peripheral(device) else { return };
        let events = self.events.clone();
        let device = device.clone();
        let characteristic = *characteristic;

        self.runtime.spawn(async move {
            let target = peripheral.characteristics()
                .into_iter()
                .find(|candidate| candidate.uuid == characteristic.uuid && candidate.service_uuid == characteristic.service);

            let result = match target {
                None => Err(DeviceError::MissingCharacteristic),
                Some(target) => peripheral.read(&target).await
                    .map(Some)
                    .map_err(DeviceError::from),
            };

            send_event(&events, TransportEvent::ValueRead { device, characteristic, result });
        });
    }
}
