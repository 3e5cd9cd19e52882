//! BlueZ D-Bus backend.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    AdapterState, Advertisement, DISCOVERY_CHANNEL_BUFFER_SIZE, Discovery, Peripheral,
    PeripheralState, Radio, RadioError, RadioFuture,
};
use crate::device::DeviceId;
use bluer::{Adapter, AdapterEvent, AdapterProperty, Address, Device, Session};
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Interval between checks for GATT service resolution after connecting.
const SERVICES_POLL_INTERVAL: Duration = Duration::from_millis(100);

impl From<bluer::Error> for RadioError {
    fn from(err: bluer::Error) -> Self {
        RadioError::Bluetooth(err.to_string())
    }
}

/// Registry key for a BlueZ address: lowercase hex without separators.
pub fn device_id(address: Address) -> DeviceId {
    DeviceId::new(
        address
            .0
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>(),
    )
}

fn powered_state(powered: bool) -> AdapterState {
    if powered {
        AdapterState::PoweredOn
    } else {
        AdapterState::PoweredOff
    }
}

/// Default BlueZ adapter.
///
/// Power changes are followed by a background task for as long as the radio
/// lives. Discovery runs on its own task between `start_discovery` and
/// `stop_discovery`.
pub struct BluerRadio {
    _session: Session,
    adapter: Adapter,
    state: Arc<watch::Sender<AdapterState>>,
    monitor: JoinHandle<()>,
    discovery: Mutex<Option<JoinHandle<()>>>,
}

impl BluerRadio {
    pub async fn new() -> Result<Self, RadioError> {
        let session = Session::new().await?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|err| RadioError::Unavailable(err.to_string()))?;
        info!(adapter = adapter.name(), "using Bluetooth adapter");

        if let Err(err) = adapter.set_powered(true).await {
            warn!(%err, "failed to power on adapter");
        }
        let state = Arc::new(watch::Sender::new(powered_state(
            adapter.is_powered().await?,
        )));

        let events = adapter.events().await?;
        let tracker = Arc::clone(&state);
        let monitor = tokio::spawn(async move {
            let mut events = Box::pin(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                    let state = powered_state(powered);
                    info!(%state, "adapter state changed");
                    tracker.send_replace(state);
                }
            }
            warn!("adapter event stream ended");
            tracker.send_replace(AdapterState::Unknown);
        });

        Ok(Self {
            _session: session,
            adapter,
            state,
            monitor,
            discovery: Mutex::new(None),
        })
    }

    fn replace_discovery(&self, task: Option<JoinHandle<()>>) {
        let previous = std::mem::replace(
            &mut *self
                .discovery
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
            task,
        );
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl Drop for BluerRadio {
    fn drop(&mut self) {
        self.monitor.abort();
        self.replace_discovery(None);
    }
}

/// Decides which discovery events carry data heard in the current scan.
///
/// On start BlueZ replays every device it already knows with whatever data
/// it cached, in range or not. The first event for each such address is
/// dropped, as is any event for a device without a current RSSI; later
/// property changes of a known device pass.
#[derive(Debug)]
struct ReplayFilter {
    replay: HashSet<Address>,
}

impl ReplayFilter {
    fn new(known: impl IntoIterator<Item = Address>) -> Self {
        Self {
            replay: known.into_iter().collect(),
        }
    }

    fn admit(&mut self, address: Address, rssi: Option<i16>) -> bool {
        if self.replay.remove(&address) {
            return false;
        }
        rssi.is_some()
    }
}

async fn advertisement(device: &Device) -> Result<Advertisement, bluer::Error> {
    let address = device.address();
    Ok(Advertisement {
        id: device_id(address),
        address: address.into(),
        local_name: device.name().await?,
        service_data: device.service_data().await?.unwrap_or_default(),
        manufacturer_data: device.manufacturer_data().await?.unwrap_or_default(),
    })
}

impl Radio for BluerRadio {
    type Peripheral = BluerPeripheral;

    fn adapter_state(&self) -> watch::Receiver<AdapterState> {
        self.state.subscribe()
    }

    fn start_discovery(&self) -> RadioFuture<'_, mpsc::Receiver<Discovery<BluerPeripheral>>> {
        Box::pin(async move {
            let mut filter = ReplayFilter::new(self.adapter.device_addresses().await?);
            // BlueZ re-reports known devices whenever their advertised data changes
            let events = self.adapter.discover_devices_with_changes().await?;
            let adapter = self.adapter.clone();
            let (tx, rx) = mpsc::channel(DISCOVERY_CHANNEL_BUFFER_SIZE);

            // dropping the event stream ends discovery
            let task = tokio::spawn(async move {
                let mut events = Box::pin(events);
                while let Some(event) = events.next().await {
                    let AdapterEvent::DeviceAdded(address) = event else {
                        continue;
                    };
                    let device = match adapter.device(address) {
                        Ok(device) => device,
                        Err(err) => {
                            debug!(%address, %err, "device vanished");
                            continue;
                        }
                    };
                    let rssi = device.rssi().await.unwrap_or_default();
                    if !filter.admit(address, rssi) {
                        debug!(%address, ?rssi, "skipping cached device data");
                        continue;
                    }
                    match advertisement(&device).await {
                        Ok(advertisement) => {
                            let discovery = Discovery {
                                peripheral: BluerPeripheral::new(device, advertisement.id.clone()),
                                advertisement,
                            };
                            if tx.send(discovery).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => debug!(%address, %err, "failed to read advertisement"),
                    }
                }
            });
            self.replace_discovery(Some(task));
            Ok(rx)
        })
    }

    fn stop_discovery(&self) -> RadioFuture<'_, ()> {
        Box::pin(async move {
            self.replace_discovery(None);
            Ok(())
        })
    }
}

/// Connection handle for one BlueZ device.
///
/// BlueZ does not expose a connecting or error state, so the handle tracks
/// its own: a failed connect leaves it in [`PeripheralState::Error`] until
/// the engine replaces it through rediscovery.
#[derive(Clone)]
pub struct BluerPeripheral {
    device: Device,
    id: DeviceId,
    state: Arc<Mutex<PeripheralState>>,
}

impl BluerPeripheral {
    fn new(device: Device, id: DeviceId) -> Self {
        Self {
            device,
            id,
            state: Arc::new(Mutex::new(PeripheralState::Disconnected)),
        }
    }

    fn set_state(&self, state: PeripheralState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    async fn wait_for_services(&self) -> Result<(), bluer::Error> {
        while !self.device.is_services_resolved().await? {
            tokio::time::sleep(SERVICES_POLL_INTERVAL).await;
        }
        Ok(())
    }
}

impl Peripheral for BluerPeripheral {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn state(&self) -> PeripheralState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(&self) -> RadioFuture<'_, ()> {
        Box::pin(async move {
            self.set_state(PeripheralState::Connecting);
            match self.device.connect().await {
                Ok(()) => {
                    self.set_state(PeripheralState::Connected);
                    debug!(device = %self.id, "connected");
                    Ok(())
                }
                Err(err) => {
                    self.set_state(PeripheralState::Error);
                    Err(err.into())
                }
            }
        })
    }

    fn read_characteristic(&self, uuid: Uuid) -> RadioFuture<'_, Vec<u8>> {
        Box::pin(async move {
            self.wait_for_services().await?;
            for service in self.device.services().await? {
                for characteristic in service.characteristics().await? {
                    if characteristic.uuid().await? == uuid {
                        return Ok(characteristic.read().await?);
                    }
                }
            }
            Err(RadioError::CharacteristicNotFound(uuid))
        })
    }

    fn disconnect(&self) -> RadioFuture<'_, ()> {
        Box::pin(async move {
            self.set_state(PeripheralState::Disconnecting);
            let result = self.device.disconnect().await;
            self.set_state(PeripheralState::Disconnected);
            debug!(device = %self.id, "disconnected");
            Ok(result?)
        })
    }
}
