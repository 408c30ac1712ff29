use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::device::transport::Transport;
use crate::device::types::{CharacteristicRef, DeviceId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    StartScan,
    StopScan,
    Connect(DeviceId),
    CancelConnection(DeviceId),
    DiscoverServices(DeviceId),
    DiscoverCharacteristics(DeviceId, Uuid),
    Read(DeviceId, CharacteristicRef),
}

/// Records requests; tests play the radio by feeding `TransportEvent`s back in.
#[derive(Debug)]
pub struct FakeTransport {
    available: AtomicBool,
    requests: Mutex<Vec<Request>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        FakeTransport {
            available: AtomicBool::new(true),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn take_requests(&self) -> Vec<Request> {
        std::mem::take(&mut *self.requests.lock().unwrap())
    }

    pub fn reads(&self) -> Vec<CharacteristicRef> {
        self.requests().into_iter().filter_map(|request| match request {
            Request::Read(_, characteristic) => Some(characteristic),
            _ => None,
        }).collect()
    }

    fn record(&self, request: Request) {
        self.requests.lock().unwrap().push(request);
    }
}

impl Transport for FakeTransport {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn start_scan(&self) {
        self.record(Request::StartScan);
    }

    fn stop_scan(&self) {
        self.record(Request::StopScan);
    }

    fn connect(&self, device: &DeviceId) {
        self.record(Request::Connect(device.clone()));
    }

    fn cancel_connection(&self, device: &DeviceId) {
        self.record(Request::CancelConnection(device.clone()));
    }

    fn discover_services(&self, device: &DeviceId) {
        self.record(Request::DiscoverServices(device.clone()));
    }

    fn discover_characteristics(&self, device: &DeviceId, service: Uuid) {
        self.record(Request::DiscoverCharacteristics(device.clone(), service));
    }

    fn read_characteristic(&self, device: &DeviceId, characteristic: &CharacteristicRef) {
        self.record(Request::Read(device.clone(), *characteristic));
    }
}
