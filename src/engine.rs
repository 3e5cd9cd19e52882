//! Discovery and polling engine.
//!
//! One [`Engine`] owns the registry, the raw peripheral handles and the
//! write side of the [`DataCache`]. All of its work happens on a single
//! task: discovery events arrive over a channel and are handled one at a
//! time, in arrival order, between the engine's own suspension points.
//! Other tasks interact with a running engine only through an
//! [`EngineHandle`] (stop, clear, cache lookups).

use crate::adapter::AdapterStateTracker;
use crate::cache::DataCache;
use crate::config::Config;
use crate::device::{DeviceContext, DeviceId};
use crate::profile::{DecodeError, DeviceProfile, ProfileSet, ReadMode};
use crate::radio::{
    AdapterState, Advertisement, Discovery, Peripheral, PeripheralState, Radio, RadioError,
};
use crate::reading::Reading;
use crate::registry::Registry;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for a disconnect; past it the link is left to the stack.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// What discovery events are used for during a scan window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Register devices accepted by a profile
    Bootstrap,
    /// Refresh advertisement-based readings of registered devices
    Poll,
}

/// How a scan window ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The full duration elapsed
    Completed,
    /// The adapter left the powered-on state; the window was cut short
    AdapterLost(AdapterState),
    /// Stop was requested; the window was cut short
    Stopped,
}

/// Errors from a single device read. None of them is fatal to the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReadError {
    #[error("peripheral not found for device {0}")]
    PeripheralNotFound(DeviceId),
    #[error("device {device} uses unknown profile '{profile}'")]
    UnknownProfile { device: DeviceId, profile: String },
    #[error("device {0} is read from advertisements, not by connecting")]
    NotConnectable(DeviceId),
    #[error("another connection attempt to device {0} is already in progress")]
    Conflict(DeviceId),
    #[error("device {0} is already connected and has no cached reading")]
    NoCachedReading(DeviceId),
    #[error("peripheral {0} was in error state; devices were rediscovered")]
    PeripheralReset(DeviceId),
    #[error("reading device {device} timed out after {after:?}")]
    Timeout { device: DeviceId, after: Duration },
    #[error(transparent)]
    Radio(#[from] RadioError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Running,
    Stopped,
    /// Stopped, and registry and cache are to be dropped
    Cleared,
}

/// Resolves once the engine is asked to stop.
async fn stop_requested(control: &mut watch::Receiver<Control>) {
    let closed = control
        .wait_for(|control| *control != Control::Running)
        .await
        .is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

/// Sleep for `duration`; returns `false` if woken early by a stop request.
async fn sleep_unless_stopped(control: &mut watch::Receiver<Control>, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = stop_requested(control) => false,
    }
}

/// Best-effort disconnect, bounded by [`DISCONNECT_TIMEOUT`].
async fn disconnect<P: Peripheral>(peripheral: &P) {
    match tokio::time::timeout(DISCONNECT_TIMEOUT, peripheral.disconnect()).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(device = %peripheral.id(), %err, "disconnect failed"),
        Err(_) => warn!(
            device = %peripheral.id(),
            timeout = ?DISCONNECT_TIMEOUT,
            "disconnect timed out, continuing"
        ),
    }
}

/// Cloneable control surface of an engine running on another task.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    control: Arc<watch::Sender<Control>>,
    cache: DataCache,
}

impl EngineHandle {
    /// Ask the scheduler not to start another cycle.
    ///
    /// An active scan window ends at once; a read already in flight finishes.
    pub fn stop(&self) {
        self.control.send_if_modified(|control| {
            if *control == Control::Running {
                *control = Control::Stopped;
                true
            } else {
                false
            }
        });
    }

    /// Stop, drop every cached reading, and have the engine forget its devices on exit.
    pub fn clear(&self) {
        self.control.send_replace(Control::Cleared);
        self.cache.clear();
    }

    pub fn is_stopped(&self) -> bool {
        *self.control.borrow() != Control::Running
    }

    /// Latest merged reading for `id`.
    pub fn reading(&self, id: &DeviceId) -> Option<Arc<Reading>> {
        self.cache.get(id)
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }
}

enum Step<P> {
    Event(Option<Discovery<P>>),
    Elapsed,
    AdapterLost(AdapterState),
    Stopped,
}

/// Outcome of checking a device before a connection-based read.
enum Prepared<P> {
    Cached(Arc<Reading>),
    Connect(P, Arc<dyn DeviceProfile>),
    Fault,
}

pub struct Engine<R: Radio> {
    radio: Arc<R>,
    profiles: ProfileSet,
    config: Config,
    adapter: AdapterStateTracker,
    registry: Registry<R::Peripheral>,
    cache: DataCache,
    mode: ScanMode,
    control: Arc<watch::Sender<Control>>,
    control_rx: watch::Receiver<Control>,
}

impl<R: Radio> Engine<R> {
    pub fn new(radio: Arc<R>, profiles: ProfileSet, config: Config) -> Self {
        let adapter = AdapterStateTracker::new(radio.adapter_state());
        let (control, control_rx) = watch::channel(Control::Running);
        Self {
            radio,
            profiles,
            config,
            adapter,
            registry: Registry::default(),
            cache: DataCache::new(),
            mode: ScanMode::Poll,
            control: Arc::new(control),
            control_rx,
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            control: Arc::clone(&self.control),
            cache: self.cache.clone(),
        }
    }

    pub fn scan_mode(&self) -> ScanMode {
        self.mode
    }

    /// Registered devices, in discovery order.
    pub fn devices(&self) -> &[DeviceContext] {
        self.registry.devices()
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn reading(&self, id: &DeviceId) -> Option<Arc<Reading>> {
        self.cache.get(id)
    }

    pub fn is_stopped(&self) -> bool {
        *self.control_rx.borrow() != Control::Running
    }

    pub fn stop(&self) {
        self.handle().stop();
        debug!("stop requested, runner will stop after the current step");
    }

    /// Stop, then forget every device and cached reading.
    pub async fn clear(&mut self) {
        self.control.send_replace(Control::Cleared);
        self.reset().await;
    }

    /// Drop registry, handles and cache without touching the stop flag.
    async fn reset(&mut self) {
        if let Err(err) = self.radio.stop_discovery().await {
            warn!(%err, "failed to stop discovery during reset");
        }
        self.registry.clear();
        self.cache.clear();
        debug!("engine state cleared");
    }

    /// Scan for `duration` (default: the configured scan time) in `mode`.
    ///
    /// Every discovery event received meanwhile is handled according to
    /// `mode`. Discovery is always stopped before returning; only an adapter
    /// state change or a stop request ends the window early.
    pub async fn run_scan_window(
        &mut self,
        mode: ScanMode,
        duration: Option<Duration>,
    ) -> Result<ScanOutcome, RadioError> {
        let duration = duration.unwrap_or(self.config.scan_time());
        let state = self.adapter.current();
        if !state.is_ready() {
            warn!(%state, ?mode, "adapter not powered on, skipping scan");
            return Ok(ScanOutcome::AdapterLost(state));
        }

        self.mode = mode;
        let mut events = self.radio.start_discovery().await?;
        debug!(?mode, ?duration, "scan started");

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        let mut open = true;

        let outcome = loop {
            let step = tokio::select! {
                biased;
                state = self.adapter.lost() => Step::AdapterLost(state),
                _ = stop_requested(&mut self.control_rx) => Step::Stopped,
                _ = &mut deadline => Step::Elapsed,
                event = events.recv(), if open => Step::Event(event),
            };

            match step {
                Step::Event(Some(discovery)) => self.handle_discovery(discovery),
                Step::Event(None) => open = false,
                Step::Elapsed => break ScanOutcome::Completed,
                Step::AdapterLost(state) => {
                    error!(%state, "adapter left powered-on state, aborting scan");
                    break ScanOutcome::AdapterLost(state);
                }
                Step::Stopped => break ScanOutcome::Stopped,
            }
        };

        drop(events);
        if let Err(err) = self.radio.stop_discovery().await {
            warn!(%err, "failed to stop discovery");
        }
        debug!(?mode, ?outcome, "scan complete");
        Ok(outcome)
    }

    fn handle_discovery(&mut self, discovery: Discovery<R::Peripheral>) {
        match self.mode {
            ScanMode::Bootstrap => self.register(discovery),
            ScanMode::Poll => self.update_from_advertisement(&discovery.advertisement),
        }
    }

    fn register(&mut self, discovery: Discovery<R::Peripheral>) {
        let Discovery {
            advertisement,
            peripheral,
        } = discovery;

        if !self.registry.contains(&advertisement.id) {
            let Some(profile) = self.profiles.identify(&advertisement) else {
                return;
            };
            let context = profile.context(&advertisement);
            info!(
                device = %context.id,
                profile = profile.name(),
                name = %context.display_name,
                address = %context.address,
                "discovered device"
            );
            self.registry.register(context, peripheral);
        }

        // the bootstrap advertisement already carries data for advertising devices
        self.update_from_advertisement(&advertisement);
    }

    /// Decode and merge service data for a registered advertisement-based device.
    fn update_from_advertisement(&self, advertisement: &Advertisement) {
        let Some(context) = self.registry.get(&advertisement.id) else {
            return;
        };
        let Some(profile) = self.profiles.get(&context.profile) else {
            return;
        };
        if profile.read_mode() != ReadMode::Advertising {
            return;
        }
        let Some(data) = advertisement.service_data.get(&profile.uuid()) else {
            return;
        };

        match profile.parse(data) {
            Ok(partial) => {
                let reading = self.cache.merge(&context.id, &partial);
                debug!(
                    device = %context.id,
                    profile = profile.name(),
                    ?reading,
                    "advertisement data"
                );
            }
            Err(err) => debug!(device = %context.id, %err, "ignoring advertisement"),
        }
    }

    /// Wait for the adapter, then run bootstrap scans until a device is found.
    ///
    /// Retries after the configured `retry_after` for as long as it takes.
    /// Returns `None` only when a stop is requested first.
    pub async fn discover_devices(&mut self) -> Option<Vec<DeviceContext>> {
        let retry_after = self.config.retry_after();
        loop {
            if self.is_stopped() {
                return None;
            }
            let ready = tokio::select! {
                _ = self.adapter.wait_until_ready(retry_after) => true,
                _ = stop_requested(&mut self.control_rx) => false,
            };
            if !ready {
                return None;
            }

            info!(scan_time = ?self.config.scan_time(), "discovering devices");
            match self.run_scan_window(ScanMode::Bootstrap, None).await {
                Ok(ScanOutcome::Stopped) => return None,
                Ok(_) => {}
                Err(err) => error!(%err, "failed to start bootstrap scan"),
            }

            if !self.registry.is_empty() {
                info!(count = self.registry.len(), "found devices");
                return Some(self.registry.devices().to_vec());
            }

            error!(retry_after = ?retry_after, "no devices found, retrying");
            if !sleep_unless_stopped(&mut self.control_rx, retry_after).await {
                return None;
            }
        }
    }

    /// Connect to a connection-based device, read it, and merge the result.
    ///
    /// - already connecting: fails with [`ReadError::Conflict`]
    /// - already connected: returns the cached reading without connecting
    /// - error state: resets the engine, rediscovers devices, then fails
    ///   with [`ReadError::PeripheralReset`]
    pub async fn read_device(
        &mut self,
        context: &DeviceContext,
    ) -> Result<Arc<Reading>, ReadError> {
        match self.prepare_read(context)? {
            Prepared::Cached(reading) => Ok(reading),
            Prepared::Connect(peripheral, profile) => {
                self.connect_and_read(context, &peripheral, profile.as_ref()).await
            }
            Prepared::Fault => Err(self.recover_from_fault(context).await),
        }
    }

    fn prepare_read(&self, context: &DeviceContext) -> Result<Prepared<R::Peripheral>, ReadError> {
        let id = &context.id;
        let peripheral = self.registry.peripheral(id).ok_or_else(|| {
            error!(device = %id, "peripheral not found");
            ReadError::PeripheralNotFound(id.clone())
        })?;
        let profile = self
            .profiles
            .get(&context.profile)
            .ok_or_else(|| ReadError::UnknownProfile {
                device: id.clone(),
                profile: context.profile.clone(),
            })?;
        if profile.read_mode() != ReadMode::Connecting {
            return Err(ReadError::NotConnectable(id.clone()));
        }

        let state = peripheral.state();
        if state != PeripheralState::Disconnected {
            warn!(device = %id, %state, "peripheral is not disconnected");
        }
        match state {
            PeripheralState::Disconnected | PeripheralState::Disconnecting => {
                Ok(Prepared::Connect(peripheral.clone(), profile))
            }
            PeripheralState::Connecting => Err(ReadError::Conflict(id.clone())),
            PeripheralState::Connected => self
                .cache
                .get(id)
                .map(Prepared::Cached)
                .ok_or_else(|| ReadError::NoCachedReading(id.clone())),
            PeripheralState::Error => Ok(Prepared::Fault),
        }
    }

    async fn connect_and_read(
        &self,
        context: &DeviceContext,
        peripheral: &R::Peripheral,
        profile: &dyn DeviceProfile,
    ) -> Result<Arc<Reading>, ReadError> {
        peripheral.connect().await?;
        let data = peripheral.read_characteristic(profile.uuid()).await;
        disconnect(peripheral).await;

        let partial = profile.parse(&data?)?;
        let reading = self.cache.merge(&context.id, &partial);
        debug!(
            device = %context.id,
            profile = profile.name(),
            ?reading,
            "connected data"
        );
        Ok(reading)
    }

    async fn recover_from_fault(&mut self, context: &DeviceContext) -> ReadError {
        error!(device = %context.id, "peripheral in error state, refreshing devices");
        self.reset().await;
        self.discover_devices().await;
        ReadError::PeripheralReset(context.id.clone())
    }

    /// One connection-based read inside a poll cycle, bounded by the scan time.
    ///
    /// On timeout the pending radio call is dropped and a best-effort
    /// disconnect is issued so the link is not left open.
    async fn poll_device(&mut self, context: &DeviceContext) -> Result<Arc<Reading>, ReadError> {
        let budget = self.config.scan_time();
        match self.prepare_read(context)? {
            Prepared::Cached(reading) => Ok(reading),
            Prepared::Fault => Err(self.recover_from_fault(context).await),
            Prepared::Connect(peripheral, profile) => {
                let read = self.connect_and_read(context, &peripheral, profile.as_ref());
                match tokio::time::timeout(budget, read).await {
                    Ok(result) => result,
                    Err(_) => {
                        disconnect(&peripheral).await;
                        Err(ReadError::Timeout {
                            device: context.id.clone(),
                            after: budget,
                        })
                    }
                }
            }
        }
    }

    /// One poll cycle: a poll scan, then each connection-based device in turn.
    ///
    /// A failing device is logged and skipped; it never ends the cycle.
    pub async fn poll_once(&mut self) {
        match self.run_scan_window(ScanMode::Poll, None).await {
            Ok(ScanOutcome::Stopped) => return,
            Ok(_) => {}
            Err(err) => error!(%err, "failed to start poll scan"),
        }

        let targets: Vec<DeviceContext> = self
            .registry
            .devices()
            .iter()
            .filter(|context| {
                self.profiles
                    .get(&context.profile)
                    .is_some_and(|p| p.read_mode() == ReadMode::Connecting)
            })
            .cloned()
            .collect();

        for context in &targets {
            if self.is_stopped() {
                debug!("stop requested, skipping remaining devices");
                return;
            }
            match self.poll_device(context).await {
                Ok(reading) => debug!(device = %context.id, ?reading, "device polled"),
                Err(err) => error!(
                    device = %context.id,
                    timeout = ?self.config.scan_time(),
                    %err,
                    "error getting data"
                ),
            }
        }
    }

    /// Run poll cycles separated by the refresh time until stopped.
    pub async fn run(&mut self) {
        info!(refresh_time = ?self.config.refresh_time(), "poll scheduler started");
        let refresh_time = self.config.refresh_time();
        while !self.is_stopped() {
            self.poll_once().await;
            debug!(next_cycle_in = ?refresh_time, "sleeping");
            if !sleep_unless_stopped(&mut self.control_rx, refresh_time).await {
                break;
            }
        }

        if *self.control_rx.borrow() == Control::Cleared {
            self.reset().await;
        }
        info!("poll scheduler stopped");
    }
}

impl<R: Radio + 'static> Engine<R> {
    /// Run the scheduler on its own task.
    ///
    /// The task hands the engine back once it has stopped.
    pub fn start(mut self) -> (EngineHandle, JoinHandle<Self>) {
        let handle = self.handle();
        let task = tokio::spawn(async move {
            self.run().await;
            self
        });
        (handle, task)
    }
}
