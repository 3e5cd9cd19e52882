use crate::device::{DeviceId, MacAddress};
use crate::profile::airthings::AIRTHINGS_COMPANY_ID;
use crate::profile::mi::MI_SERVICE_UUID;
use crate::radio::{
    AdapterState, Advertisement, Discovery, Peripheral, PeripheralState, Radio, RadioError,
    RadioFuture,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

/// MiBeacon frame with MAC: temperature 22.0 C, humidity 38.2 %.
pub const MI_CLIMATE_FRAME: [u8; 18] = [
    0x50, 0x20, 0x5b, 0x05, 0x42, 0x01, 0x00, 0x00, 0x38, 0xc1, 0xa4, 0x0d, 0x10, 0x04, 0xdc,
    0x00, 0x7e, 0x01,
];

/// MiBeacon frame with MAC: battery 93 %.
pub const MI_BATTERY_FRAME: [u8; 15] = [
    0x50, 0x20, 0x5b, 0x05, 0x43, 0x01, 0x00, 0x00, 0x38, 0xc1, 0xa4, 0x0a, 0x10, 0x01, 0x5d,
];

/// Wave 2 current values: humidity 45.5 %, radon 61/48 Bq/m3, 21.37 C.
pub const WAVE2_CURRENT_VALUES: [u8; 20] = [
    0x01, 0x5b, 0x00, 0x00, 0x3d, 0x00, 0x30, 0x00, 0x59, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Derive a MAC address from a 12-digit hex device id.
pub fn address_of(id: &str) -> MacAddress {
    let mut bytes = [0u8; 6];
    for (i, byte) in bytes.iter_mut().enumerate() {
        *byte = id
            .get(i * 2..i * 2 + 2)
            .and_then(|hex| u8::from_str_radix(hex, 16).ok())
            .unwrap_or_default();
    }
    MacAddress(bytes)
}

pub fn mi_advertisement_with(id: &str, frame: &[u8]) -> Advertisement {
    let mut ad = Advertisement {
        id: DeviceId::from(id),
        address: address_of(id),
        ..Default::default()
    };
    ad.service_data.insert(MI_SERVICE_UUID, frame.to_vec());
    ad
}

pub fn mi_advertisement(id: &str) -> Advertisement {
    mi_advertisement_with(id, &MI_CLIMATE_FRAME)
}

pub fn airthings_advertisement(id: &str, serial: u32) -> Advertisement {
    let mut ad = Advertisement {
        id: DeviceId::from(id),
        address: address_of(id),
        ..Default::default()
    };
    ad.manufacturer_data
        .insert(AIRTHINGS_COMPANY_ID, serial.to_le_bytes().to_vec());
    ad
}

/// What a fake peripheral does when connected to.
#[derive(Debug, Clone)]
pub enum Behavior {
    /// Connect succeeds and the characteristic reads back these bytes
    Respond(Vec<u8>),
    /// Connect fails with a radio error
    FailConnect,
    /// Connect never completes
    Hang,
}

#[derive(Debug)]
struct PeripheralInner {
    id: DeviceId,
    state: Mutex<PeripheralState>,
    behavior: Mutex<Behavior>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    reads: Mutex<Vec<Uuid>>,
}

#[derive(Debug, Clone)]
pub struct FakePeripheral(Arc<PeripheralInner>);

impl FakePeripheral {
    pub fn new(id: &str, behavior: Behavior) -> Self {
        Self(Arc::new(PeripheralInner {
            id: DeviceId::from(id),
            state: Mutex::new(PeripheralState::Disconnected),
            behavior: Mutex::new(behavior),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            reads: Mutex::new(Vec::new()),
        }))
    }

    pub fn silent(id: &str) -> Self {
        Self::new(id, Behavior::Respond(Vec::new()))
    }

    pub fn set_state(&self, state: PeripheralState) {
        *self.0.state.lock().unwrap() = state;
    }

    pub fn set_behavior(&self, behavior: Behavior) {
        *self.0.behavior.lock().unwrap() = behavior;
    }

    pub fn connects(&self) -> usize {
        self.0.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.0.disconnects.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> Vec<Uuid> {
        self.0.reads.lock().unwrap().clone()
    }
}

impl Peripheral for FakePeripheral {
    fn id(&self) -> &DeviceId {
        &self.0.id
    }

    fn state(&self) -> PeripheralState {
        *self.0.state.lock().unwrap()
    }

    fn connect(&self) -> RadioFuture<'_, ()> {
        Box::pin(async move {
            self.0.connects.fetch_add(1, Ordering::SeqCst);
            self.set_state(PeripheralState::Connecting);
            let behavior = self.0.behavior.lock().unwrap().clone();
            match behavior {
                Behavior::Respond(_) => {
                    self.set_state(PeripheralState::Connected);
                    Ok(())
                }
                Behavior::FailConnect => {
                    self.set_state(PeripheralState::Error);
                    Err(RadioError::Bluetooth("connection refused".to_string()))
                }
                Behavior::Hang => std::future::pending().await,
            }
        })
    }

    fn read_characteristic(&self, uuid: Uuid) -> RadioFuture<'_, Vec<u8>> {
        Box::pin(async move {
            self.0.reads.lock().unwrap().push(uuid);
            let behavior = self.0.behavior.lock().unwrap().clone();
            match behavior {
                Behavior::Respond(bytes) => Ok(bytes),
                _ => Err(RadioError::CharacteristicNotFound(uuid)),
            }
        })
    }

    fn disconnect(&self) -> RadioFuture<'_, ()> {
        Box::pin(async move {
            self.0.disconnects.fetch_add(1, Ordering::SeqCst);
            self.set_state(PeripheralState::Disconnected);
            Ok(())
        })
    }
}

/// Radio that replays one scripted batch of discoveries per scan window.
///
/// Windows beyond the script deliver nothing.
#[derive(Debug)]
pub struct FakeRadio {
    state: watch::Sender<AdapterState>,
    windows: Mutex<VecDeque<Vec<Discovery<FakePeripheral>>>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    scanning: AtomicBool,
}

impl FakeRadio {
    pub fn new(state: AdapterState) -> Self {
        Self {
            state: watch::Sender::new(state),
            windows: Mutex::new(VecDeque::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            scanning: AtomicBool::new(false),
        }
    }

    pub fn powered() -> Self {
        Self::new(AdapterState::PoweredOn)
    }

    /// Queue the discoveries delivered by the next unscripted scan window.
    pub fn push_window(&self, window: Vec<(Advertisement, FakePeripheral)>) {
        let window = window
            .into_iter()
            .map(|(advertisement, peripheral)| Discovery {
                advertisement,
                peripheral,
            })
            .collect();
        self.windows.lock().unwrap().push_back(window);
    }

    pub fn set_state(&self, state: AdapterState) {
        self.state.send_replace(state);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }
}

impl Radio for FakeRadio {
    type Peripheral = FakePeripheral;

    fn adapter_state(&self) -> watch::Receiver<AdapterState> {
        self.state.subscribe()
    }

    fn start_discovery(&self) -> RadioFuture<'_, mpsc::Receiver<Discovery<FakePeripheral>>> {
        Box::pin(async move {
            self.starts.fetch_add(1, Ordering::SeqCst);
            self.scanning.store(true, Ordering::SeqCst);
            let window = self.windows.lock().unwrap().pop_front().unwrap_or_default();
            let (tx, rx) = mpsc::channel(window.len().max(1));
            for discovery in window {
                let _ = tx.try_send(discovery);
            }
            Ok(rx)
        })
    }

    fn stop_discovery(&self) -> RadioFuture<'_, ()> {
        Box::pin(async move {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.scanning.store(false, Ordering::SeqCst);
            Ok(())
        })
    }
}
