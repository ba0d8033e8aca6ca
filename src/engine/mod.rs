//! Scan/connect orchestrator.
//!
//! The engine is one spawned task that owns every piece of mutable state:
//! the connection registry, the per-category status/data aggregate, the
//! codec set, and the cached pairing records. Public operations arrive as
//! [`Command`]s over an mpsc channel (see [`HubHandle`]); radio callbacks
//! arrive as [`TransportEvent`]s over a second channel. Because both streams
//! are drained by the same `select!` loop, no state is ever touched from two
//! contexts at once — an advertisement can no longer race a user-initiated
//! disconnect.
//!
//! Delayed work (the jump-rope mode resend, completion-pulse resets, sampler
//! ticks) is scheduled as a task that sends a command back into the same
//! channel, never as an inline sleep.

pub mod recording;
pub mod registry;

mod handle;

pub use handle::HubHandle;
pub use recording::{RecordingError, RopeGoal};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::classify;
use crate::codec::{CodecSet, CommandKind, DecodedEvent};
use crate::events::{ClinicalEvent, ConnectivityEvent, EventBus, FitnessEvent};
use crate::model::{DeviceCategory, DeviceSnapshot, DeviceStatus, Devices, HistorySample, RopeMode};
use crate::store::{PairedRecord, PairedStore};
use crate::transport::{AdvertisementPayload, HandleId, RadioTransport, TransportEvent};

use recording::{validate_goal, COMPLETION_PULSE, ROPE_RESEND_DELAY};
use registry::{ConnectionRegistry, RegistryEntry};

/// Default RSSI gate applied to advertisements during open pairing.
pub const DEFAULT_RSSI_THRESHOLD_DBM: i16 = -60;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub rssi_threshold_dbm: i16,
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rssi_threshold_dbm: DEFAULT_RSSI_THRESHOLD_DBM,
            event_capacity: 64,
        }
    }
}

/// Requests processed on the engine task.
#[derive(Debug)]
pub(crate) enum Command {
    StartPairing(DeviceCategory),
    StopPairing,
    Connect(DeviceCategory),
    Disconnect(DeviceCategory),
    SetRssiThreshold(i16),
    StartRopeRecording {
        goal: RopeGoal,
        done: oneshot::Sender<Result<(), RecordingError>>,
    },
    /// Second phase of the rope mode setting, delivered after the settle
    /// delay.
    RopeModeResend {
        goal: RopeGoal,
        done: oneshot::Sender<Result<(), RecordingError>>,
    },
    StopRopeRecording,
    StartHeartRateRecording,
    StopHeartRateRecording,
    SampleTick(DeviceCategory),
    ClearCompletionPulse(DeviceCategory),
    Snapshot {
        category: DeviceCategory,
        reply: oneshot::Sender<Option<DeviceSnapshot>>,
    },
}

pub struct Engine {
    transport: Arc<dyn RadioTransport>,
    store: Arc<dyn PairedStore>,
    codecs: CodecSet,
    bus: EventBus,
    devices: Devices,
    registry: ConnectionRegistry,
    records: HashMap<DeviceCategory, PairedRecord>,
    /// Category being paired or reconnected; `AllDevices` is the open
    /// wildcard, `None` means no scan intent.
    intent: Option<DeviceCategory>,
    /// Identifier of the paired device a `connect` call is looking for.
    reconnect_target: Option<String>,
    rssi_threshold: i16,
    scanning: bool,
    rope_sampler: Option<JoinHandle<()>>,
    heart_sampler: Option<JoinHandle<()>>,
    commands_tx: mpsc::Sender<Command>,
}

impl Engine {
    /// Spawn the engine task and return the handle used to drive it.
    pub fn spawn(
        transport: Arc<dyn RadioTransport>,
        store: Arc<dyn PairedStore>,
        events: mpsc::Receiver<TransportEvent>,
        config: EngineConfig,
    ) -> HubHandle {
        let (commands_tx, commands_rx) = mpsc::channel(64);
        let bus = EventBus::new(config.event_capacity);

        let engine = Engine {
            transport,
            store,
            codecs: CodecSet::with_defaults(),
            bus: bus.clone(),
            devices: Devices::default(),
            registry: ConnectionRegistry::default(),
            records: HashMap::new(),
            intent: None,
            reconnect_target: None,
            rssi_threshold: config.rssi_threshold_dbm,
            scanning: false,
            rope_sampler: None,
            heart_sampler: None,
            commands_tx: commands_tx.clone(),
        };
        tokio::spawn(engine.run(commands_rx, events));

        HubHandle::new(commands_tx, bus)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<TransportEvent>,
    ) {
        match self.store.load_all().await {
            Ok(records) => {
                debug!("loaded {} pairing record(s)", records.len());
                self.records = records;
            }
            Err(e) => warn!("failed to load pairing records: {}", e),
        }

        loop {
            tokio::select! {
                Some(command) = commands.recv() => self.handle_command(command).await,
                Some(event) = events.recv() => self.handle_transport_event(event).await,
                else => break,
            }
        }
        debug!("engine task finished");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartPairing(category) => self.start_pairing(category).await,
            Command::StopPairing => self.stop_pairing().await,
            Command::Connect(category) => self.connect(category).await,
            Command::Disconnect(category) => self.disconnect(category).await,
            Command::SetRssiThreshold(dbm) => {
                debug!("RSSI threshold set to {} dBm", dbm);
                self.rssi_threshold = dbm;
            }
            Command::StartRopeRecording { goal, done } => {
                self.start_rope_recording(goal, done).await
            }
            Command::RopeModeResend { goal, done } => self.resend_rope_mode(goal, done).await,
            Command::StopRopeRecording => self.stop_rope_recording().await,
            Command::StartHeartRateRecording => self.start_heart_recording(),
            Command::StopHeartRateRecording => self.stop_heart_recording(),
            Command::SampleTick(category) => self.sample_tick(category),
            Command::ClearCompletionPulse(category) => {
                if let Some(status) = self.devices.status_mut(category) {
                    status.is_measurement_completed = false;
                }
            }
            Command::Snapshot { category, reply } => {
                let _ = reply.send(self.devices.snapshot(category));
            }
        }
    }

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PowerStateChanged { powered_on } => {
                if !powered_on {
                    warn!("radio powered off");
                }
            }
            TransportEvent::AdvertisementReceived {
                handle,
                name,
                rssi,
                payload,
            } => self.on_advertisement(handle, name, rssi, payload).await,
            TransportEvent::Connected { handle } => self.on_connected(handle).await,
            TransportEvent::ConnectFailed { handle, reason } => {
                self.on_connect_failed(handle, reason)
            }
            TransportEvent::Disconnected { handle } => self.on_disconnected(handle).await,
            TransportEvent::ServicesDiscovered { handle, services } => {
                self.on_services_discovered(handle, services).await
            }
            TransportEvent::CharacteristicsDiscovered {
                handle,
                characteristics,
                ..
            } => self.on_characteristics_discovered(handle, characteristics).await,
            TransportEvent::CharacteristicValueUpdated {
                handle,
                characteristic,
                value,
            } => self.on_value_updated(handle, characteristic, value),
        }
    }

    // ------------------------------------------------------------------
    // Public operations
    // ------------------------------------------------------------------

    async fn start_pairing(&mut self, category: DeviceCategory) {
        if category == DeviceCategory::None {
            warn!("start_pairing called with DeviceCategory::None");
            return;
        }
        info!("pairing started for {:?}", category);

        if category.is_concrete() {
            self.devices.reset_data(category);
            if let Some(status) = self.devices.status_mut(category) {
                *status = DeviceStatus {
                    is_pairing: true,
                    ..Default::default()
                };
            }
            // Any previous pairing is invalidated; a fresh handshake must
            // write a new record before reconnects can target this category.
            self.records.remove(&category);
            self.persist(category, None).await;
        } else {
            for concrete in DeviceCategory::CONCRETE {
                if let Some(status) = self.devices.status_mut(concrete) {
                    status.is_pairing = true;
                    status.is_connecting = false;
                }
            }
        }

        self.intent = Some(category);
        self.reconnect_target = None;
        self.start_scan().await;
    }

    /// Idempotent: clears pairing/connecting flags everywhere and stops the
    /// scan, whether or not one is active.
    async fn stop_pairing(&mut self) {
        for category in DeviceCategory::CONCRETE {
            if let Some(status) = self.devices.status_mut(category) {
                status.is_pairing = false;
                status.is_connecting = false;
            }
        }
        // A scale reading may be mid-flight when pairing is aborted.
        if let Some(status) = self.devices.status_mut(DeviceCategory::Scale) {
            status.is_measuring = false;
            status.is_measurement_completed = false;
        }

        self.intent = None;
        self.reconnect_target = None;
        self.stop_scan().await;
    }

    async fn connect(&mut self, category: DeviceCategory) {
        if !category.is_concrete() {
            warn!("connect requires a concrete category, got {:?}", category);
            return;
        }
        // Re-sync with external writers before deciding whether a record
        // exists.
        match self.store.load_all().await {
            Ok(records) => self.records = records,
            Err(e) => warn!("failed to reload pairing records: {}", e),
        }

        let record = match self.records.get(&category) {
            Some(record) => record.clone(),
            None => {
                debug!("connect({:?}) ignored: no pairing record", category);
                return;
            }
        };
        if self.registry.is_connected(category) {
            debug!("connect({:?}) ignored: already connected", category);
            return;
        }

        if let Some(status) = self.devices.status_mut(category) {
            status.is_connecting = true;
            status.is_pairing = false;
            status.is_connection_failure = false;
        }
        self.intent = Some(category);
        self.reconnect_target = Some(record.identifier.clone());
        info!(
            "reconnect scan for {:?} (target {})",
            category, record.identifier
        );
        self.start_scan().await;
    }

    async fn disconnect(&mut self, category: DeviceCategory) {
        match category {
            DeviceCategory::AllDevices => {
                let handles: Vec<HandleId> =
                    self.registry.iter().map(|e| e.handle.clone()).collect();
                for handle in handles {
                    if let Err(e) = self.transport.cancel_connection(&handle).await {
                        debug!("disconnect of {} failed: {}", handle, e);
                    }
                }
            }
            category if category.is_concrete() => {
                let handle = self
                    .registry
                    .first_for_category(category)
                    .map(|e| e.handle.clone());
                if let Some(handle) = handle {
                    if let Err(e) = self.transport.cancel_connection(&handle).await {
                        debug!("disconnect of {} failed: {}", handle, e);
                    }
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Advertisement dispatch
    // ------------------------------------------------------------------

    async fn on_advertisement(
        &mut self,
        handle: HandleId,
        name: Option<String>,
        rssi: Option<i16>,
        payload: AdvertisementPayload,
    ) {
        // A callback may already be in flight when the scan is stopped;
        // intent is re-checked here rather than trusting delivery order.
        let intent = match self.intent {
            Some(intent) if self.scanning => intent,
            _ => return,
        };
        let name = match name {
            Some(name) => name,
            None => return,
        };

        let category = classify(&name);
        if category == DeviceCategory::None {
            return;
        }
        if intent != DeviceCategory::AllDevices && intent != category {
            return;
        }

        let newly_registered = self.registry.register(RegistryEntry {
            category,
            handle: handle.clone(),
            name: name.clone(),
            rssi,
            connected: false,
            physical_address: payload.physical_address.clone(),
        });
        if newly_registered {
            self.bus.publish_connectivity(ConnectivityEvent::DeviceDiscovered {
                category,
                handle: handle.clone(),
                name: name.clone(),
                rssi,
            });
        }

        // A device being explicitly reconnected bypasses the RSSI gate: it
        // is already trusted, and its first advertisement burst may be weak.
        if self.reconnect_target.as_deref() == Some(handle.as_str()) {
            if let Some(status) = self.devices.status_mut(category) {
                status.is_pairing = false;
            }
            if let Some(codec) = self.codecs.get_mut(category) {
                codec.adopt_handle(&handle);
            }
            info!("reconnecting to known {:?} device {}", category, handle);
            if let Err(e) = self.transport.connect(&handle).await {
                warn!("connect request for {} failed: {}", handle, e);
            }
            return;
        }

        // Open pairing: too-weak (or unknown-strength) signals are unsafe to
        // bind to.
        if rssi.unwrap_or(i16::MIN) < self.rssi_threshold {
            debug!(
                "discarding {:?} advertisement from '{}' at {:?} dBm (threshold {})",
                category, name, rssi, self.rssi_threshold
            );
            return;
        }

        let identity = match self
            .codecs
            .get_mut(category)
            .and_then(|codec| codec.claim_advertisement(&handle, &name, &payload))
        {
            Some(identity) => identity,
            None => {
                debug!("{:?} codec declined advertisement from '{}'", category, name);
                return;
            }
        };

        // First valid match wins; pairing ends here. A wildcard scan flags
        // every category, so the claim must unflag all of them.
        for concrete in DeviceCategory::CONCRETE {
            if let Some(status) = self.devices.status_mut(concrete) {
                status.is_pairing = false;
            }
        }
        if let Some(status) = self.devices.status_mut(category) {
            status.is_paired = true;
        }
        let record = PairedRecord {
            identifier: identity.identifier,
            display_name: identity.display_name,
            physical_address: identity.physical_address,
        };
        self.records.insert(category, record.clone());
        self.persist(category, Some(&record)).await;
        self.intent = None;
        self.stop_scan().await;

        info!("paired {:?} device '{}'", category, name);
        self.bus
            .publish_connectivity(ConnectivityEvent::DevicePaired { category, record });

        if let Some(status) = self.devices.status_mut(category) {
            status.is_connecting = true;
        }
        if let Err(e) = self.transport.connect(&handle).await {
            warn!("connect request for {} failed: {}", handle, e);
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    async fn on_connected(&mut self, handle: HandleId) {
        let category = match self.registry.category_of(&handle) {
            Some(category) => category,
            None => {
                debug!("connected event for unknown handle {}", handle);
                return;
            }
        };

        if self.reconnect_target.as_deref() == Some(handle.as_str()) {
            self.reconnect_target = None;
            self.intent = None;
            self.stop_scan().await;
        }

        let filter = self.codecs.get(category).and_then(|c| c.service_filter());
        if let Err(e) = self.transport.discover_services(&handle, filter).await {
            warn!("service discovery for {} failed: {}", handle, e);
        }

        self.devices.reset_data(category);
        if let Some(status) = self.devices.status_mut(category) {
            status.is_connected = true;
            status.is_connecting = false;
            status.is_disconnected = false;
            status.is_connection_failure = false;
        }
        self.registry.mark_connected(&handle, true);

        info!("{:?} connected ({})", category, handle);
        self.bus
            .publish_connectivity(ConnectivityEvent::DeviceConnected { category, handle });
    }

    fn on_connect_failed(&mut self, handle: HandleId, reason: String) {
        let category = match self.registry.category_of(&handle) {
            Some(category) => category,
            None => return,
        };
        warn!("connection to {:?} ({}) failed: {}", category, handle, reason);
        if let Some(status) = self.devices.status_mut(category) {
            status.is_connection_failure = true;
            status.is_connecting = false;
        }
        // No automatic retry; the caller decides whether to re-invoke
        // connect.
        self.bus
            .publish_connectivity(ConnectivityEvent::DeviceConnectFailed { category });
    }

    async fn on_disconnected(&mut self, handle: HandleId) {
        let category = match self.registry.category_of(&handle) {
            Some(category) => category,
            None => return,
        };

        self.registry.mark_connected(&handle, false);
        if let Some(status) = self.devices.status_mut(category) {
            status.is_connected = false;
            status.is_connecting = false;
            status.is_disconnected = true;
        }

        // Recording sessions cannot outlive their device.
        match category {
            DeviceCategory::JumpRope if self.is_measuring(DeviceCategory::JumpRope) => {
                self.stop_rope_recording().await;
            }
            DeviceCategory::HeartRateBelt if self.is_measuring(DeviceCategory::HeartRateBelt) => {
                self.stop_heart_recording();
            }
            _ => {}
        }

        self.codecs.release_everywhere(&handle);
        // Keep the entry only while it is the active reconnect target, so a
        // retry can still match it; everything else is evicted.
        if self.reconnect_target.as_deref() != Some(handle.as_str()) {
            self.registry.evict(&handle);
        }

        info!("{:?} disconnected ({})", category, handle);
        self.bus
            .publish_connectivity(ConnectivityEvent::DeviceDisconnected { category });
    }

    // ------------------------------------------------------------------
    // Discovery and telemetry
    // ------------------------------------------------------------------

    async fn on_services_discovered(&mut self, handle: HandleId, services: Vec<Uuid>) {
        let category = match self.registry.category_of(&handle) {
            Some(category) => category,
            None => return,
        };
        let filter = self.codecs.get(category).map(|c| c.characteristic_filter());
        for service in services {
            if let Err(e) = self
                .transport
                .discover_characteristics(&handle, service, filter)
                .await
            {
                warn!("characteristic discovery for {} failed: {}", handle, e);
            }
        }
    }

    async fn on_characteristics_discovered(
        &mut self,
        handle: HandleId,
        characteristics: Vec<Uuid>,
    ) {
        let category = match self.registry.category_of(&handle) {
            Some(category) => category,
            None => return,
        };
        let codec = match self.codecs.get(category) {
            Some(codec) => codec,
            None => return,
        };

        let notify: Vec<Uuid> = characteristics
            .iter()
            .copied()
            .filter(|c| codec.is_notify_characteristic(*c))
            .collect();

        // Setup commands issued as soon as the write characteristic shows up.
        let mut setup_writes: Vec<(Uuid, Vec<u8>)> = Vec::new();
        if let Some(write_char) = codec.write_characteristic() {
            if characteristics.contains(&write_char) {
                match category {
                    DeviceCategory::Thermometer => {
                        if let Some(cmd) = codec.build_command(&CommandKind::QueryMeasurement) {
                            setup_writes.push((write_char, cmd));
                        }
                    }
                    DeviceCategory::JumpRope => {
                        if let Some(cmd) = codec.build_command(&CommandKind::QueryBattery) {
                            setup_writes.push((write_char, cmd));
                        }
                        // Park the just-connected rope in free mode.
                        if let Some(cmd) = codec.build_command(&CommandKind::SetRopeMode {
                            mode: RopeMode::Free,
                            setting: 0,
                        }) {
                            setup_writes.push((write_char, cmd));
                        }
                    }
                    _ => {}
                }
            }
        }

        for characteristic in notify {
            if let Err(e) = self.transport.set_notify(&handle, characteristic, true).await {
                warn!("enabling notifications on {} failed: {}", characteristic, e);
            }
        }
        for (write_char, cmd) in setup_writes {
            if let Err(e) = self.transport.write_value(&handle, write_char, &cmd, true).await {
                warn!("setup write to {} failed: {}", write_char, e);
            }
        }
        // Defensive poll on top of the notify subscription; some firmwares
        // only push after the first read.
        for characteristic in characteristics {
            if let Err(e) = self.transport.read_value(&handle, characteristic).await {
                debug!("read of {} failed: {}", characteristic, e);
            }
        }
    }

    fn on_value_updated(&mut self, handle: HandleId, characteristic: Uuid, value: Vec<u8>) {
        // Stale callbacks for a peripheral that was reclassified or
        // disconnected fail the ownership guard and are dropped.
        let decoded = self
            .codecs
            .owner_of(&handle, characteristic)
            .and_then(|(category, codec)| {
                codec.decode(characteristic, &value).map(|e| (category, e))
            });
        match decoded {
            Some((category, event)) => self.apply_decoded(category, event),
            None => debug!(
                "dropping unowned/undecodable update on {} from {}",
                characteristic, handle
            ),
        }
    }

    fn apply_decoded(&mut self, category: DeviceCategory, event: DecodedEvent) {
        match event {
            DecodedEvent::Temperature {
                celsius,
                mode,
                battery,
            } => {
                let data = self.devices.thermometer_mut();
                data.temperature = Some(celsius);
                data.mode = Some(mode);
                data.battery = Some(battery);
                self.pulse_completed(DeviceCategory::Thermometer);
                self.bus.publish_clinical(ClinicalEvent::Temperature {
                    celsius,
                    mode,
                    battery,
                });
            }
            DecodedEvent::Oximetry {
                spo2,
                pulse_rate,
                perfusion_index,
            } => {
                let data = self.devices.oximeter_mut();
                data.spo2 = spo2;
                data.pulse_rate = pulse_rate;
                data.perfusion_index = perfusion_index;
                if let Some(status) = self.devices.status_mut(category) {
                    // finger out pauses the measurement rather than ending it
                    status.is_measuring = spo2.is_some();
                    status.is_pause_measurement = spo2.is_none();
                }
                self.bus.publish_clinical(ClinicalEvent::Oximetry {
                    spo2,
                    pulse_rate,
                    perfusion_index,
                });
            }
            DecodedEvent::PlethWave { samples } => {
                self.devices.oximeter_mut().waveform.extend_from_slice(&samples);
            }
            DecodedEvent::CuffPressure { mmhg } => {
                self.devices.sphygmometer_mut().pressure = Some(mmhg);
                if let Some(status) = self.devices.status_mut(category) {
                    status.is_measuring = true;
                    status.measurement_error = None;
                }
                self.bus.publish_clinical(ClinicalEvent::CuffPressure { mmhg });
            }
            DecodedEvent::BloodPressure {
                systolic,
                diastolic,
                pulse_rate,
            } => {
                let data = self.devices.sphygmometer_mut();
                data.systolic = Some(systolic);
                data.diastolic = Some(diastolic);
                data.pulse_rate = Some(pulse_rate);
                data.pressure = None;
                if let Some(status) = self.devices.status_mut(category) {
                    status.is_measuring = false;
                }
                self.pulse_completed(category);
                self.bus.publish_clinical(ClinicalEvent::BloodPressure {
                    systolic,
                    diastolic,
                    pulse_rate,
                });
            }
            DecodedEvent::BloodPressureError { code } => {
                if let Some(status) = self.devices.status_mut(category) {
                    status.is_measuring = false;
                    status.measurement_error = Some(format!("device error {}", code));
                }
                self.bus
                    .publish_clinical(ClinicalEvent::BloodPressureError { code });
            }
            DecodedEvent::Weight {
                kilograms,
                is_final,
            } => {
                let data = self.devices.scale_mut();
                data.weight_kg = Some(kilograms);
                data.is_final = is_final;
                if let Some(status) = self.devices.status_mut(category) {
                    status.is_measuring = !is_final;
                }
                if is_final {
                    self.pulse_completed(category);
                }
                self.bus.publish_clinical(ClinicalEvent::Weight {
                    kilograms,
                    is_final,
                });
            }
            DecodedEvent::RopeTelemetry {
                mode,
                setting,
                count,
                elapsed_secs,
                state,
            } => {
                let data = self.devices.jump_rope_mut();
                data.mode = Some(mode);
                data.setting = Some(setting);
                data.count = Some(count);
                data.elapsed_secs = Some(elapsed_secs);
                data.state = Some(state);
                self.bus.publish_fitness(FitnessEvent::RopeTelemetry {
                    mode,
                    setting,
                    count,
                    elapsed_secs,
                    state,
                });
            }
            DecodedEvent::RopeBattery { tier } => {
                self.devices.jump_rope_mut().battery_tier = Some(tier);
                self.bus.publish_fitness(FitnessEvent::RopeBattery { tier });
            }
            DecodedEvent::HeartRate { bpm } => {
                self.devices.heart_rate_mut().heart_rate = Some(bpm);
                self.bus.publish_fitness(FitnessEvent::HeartRate { bpm });
            }
            DecodedEvent::BeltBattery { percent } => {
                self.devices.heart_rate_mut().battery_percent = Some(percent);
                self.bus
                    .publish_fitness(FitnessEvent::BeltBattery { percent });
            }
        }
    }

    // ------------------------------------------------------------------
    // Recording sessions
    // ------------------------------------------------------------------

    async fn start_rope_recording(
        &mut self,
        goal: RopeGoal,
        done: oneshot::Sender<Result<(), RecordingError>>,
    ) {
        let (mode, setting) = match validate_goal(goal) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = done.send(Err(e));
                return;
            }
        };
        let handle = match self.registry.connected_handle(DeviceCategory::JumpRope) {
            Some(handle) => handle.clone(),
            None => {
                // Inherited gap: no completion fires without a connected
                // rope. The dropped sender surfaces as NotConnected at the
                // handle.
                warn!("jump rope recording requested with no connected rope");
                return;
            }
        };

        let data = self.devices.jump_rope_mut();
        data.history.clear();
        data.count = None;
        if let Some(status) = self.devices.status_mut(DeviceCategory::JumpRope) {
            status.is_measurement_completed = false;
        }

        self.write_rope_command(&handle, CommandKind::SetRopeMode { mode, setting })
            .await;
        // The rope ignores a mode write while still settling after connect;
        // the command is repeated once after a fixed delay, and only the
        // second send completes the operation.
        recording::schedule_command(
            ROPE_RESEND_DELAY,
            Command::RopeModeResend { goal, done },
            self.commands_tx.clone(),
        );
    }

    async fn resend_rope_mode(
        &mut self,
        goal: RopeGoal,
        done: oneshot::Sender<Result<(), RecordingError>>,
    ) {
        let (mode, setting) = match validate_goal(goal) {
            Ok(pair) => pair,
            Err(e) => {
                let _ = done.send(Err(e));
                return;
            }
        };
        let handle = match self.registry.connected_handle(DeviceCategory::JumpRope) {
            Some(handle) => handle.clone(),
            None => {
                // the rope disconnected during the settle delay
                debug!("rope vanished before mode resend");
                return;
            }
        };

        self.write_rope_command(&handle, CommandKind::SetRopeMode { mode, setting })
            .await;
        if let Some(status) = self.devices.status_mut(DeviceCategory::JumpRope) {
            status.is_measuring = true;
        }
        if let Some(task) = self.rope_sampler.take() {
            task.abort();
        }
        self.rope_sampler = Some(recording::spawn_sampler(
            DeviceCategory::JumpRope,
            self.commands_tx.clone(),
        ));
        info!("jump rope recording started ({:?})", goal);
        self.bus.publish_fitness(FitnessEvent::RecordingStarted {
            category: DeviceCategory::JumpRope,
        });
        let _ = done.send(Ok(()));
    }

    async fn stop_rope_recording(&mut self) {
        if let Some(task) = self.rope_sampler.take() {
            task.abort();
        }
        if let Some(handle) = self
            .registry
            .connected_handle(DeviceCategory::JumpRope)
            .cloned()
        {
            self.write_rope_command(&handle, CommandKind::StopRope).await;
        }
        if let Some(status) = self.devices.status_mut(DeviceCategory::JumpRope) {
            status.is_measuring = false;
        }
        self.pulse_completed(DeviceCategory::JumpRope);

        let history = self.devices.jump_rope().history.clone();
        info!("jump rope recording stopped ({} samples)", history.len());
        self.bus.publish_fitness(FitnessEvent::RecordingCompleted {
            category: DeviceCategory::JumpRope,
            history,
        });

        // Stopping a rope session always ends a concurrent belt session.
        if self.is_measuring(DeviceCategory::HeartRateBelt) {
            self.stop_heart_recording();
        }
    }

    fn start_heart_recording(&mut self) {
        if self
            .registry
            .connected_handle(DeviceCategory::HeartRateBelt)
            .is_none()
        {
            warn!("heart rate recording requested with no connected belt");
            return;
        }
        self.devices.heart_rate_mut().history.clear();
        if let Some(status) = self.devices.status_mut(DeviceCategory::HeartRateBelt) {
            status.is_measuring = true;
            status.is_measurement_completed = false;
        }
        if let Some(task) = self.heart_sampler.take() {
            task.abort();
        }
        self.heart_sampler = Some(recording::spawn_sampler(
            DeviceCategory::HeartRateBelt,
            self.commands_tx.clone(),
        ));
        info!("heart rate recording started");
        self.bus.publish_fitness(FitnessEvent::RecordingStarted {
            category: DeviceCategory::HeartRateBelt,
        });
    }

    fn stop_heart_recording(&mut self) {
        if let Some(task) = self.heart_sampler.take() {
            task.abort();
        }
        if let Some(status) = self.devices.status_mut(DeviceCategory::HeartRateBelt) {
            status.is_measuring = false;
        }
        self.pulse_completed(DeviceCategory::HeartRateBelt);

        let history = self.devices.heart_rate().history.clone();
        info!("heart rate recording stopped ({} samples)", history.len());
        self.bus.publish_fitness(FitnessEvent::RecordingCompleted {
            category: DeviceCategory::HeartRateBelt,
            history,
        });
    }

    /// One 1 Hz sampler tick: append the current scalar to the category's
    /// history, or skip silently when it is absent.
    fn sample_tick(&mut self, category: DeviceCategory) {
        if !self.is_measuring(category) {
            return;
        }
        let timestamp = Utc::now();
        match category {
            DeviceCategory::JumpRope => {
                let data = self.devices.jump_rope_mut();
                if let Some(count) = data.count {
                    data.history.push(HistorySample {
                        timestamp,
                        value: count,
                    });
                }
            }
            DeviceCategory::HeartRateBelt => {
                let data = self.devices.heart_rate_mut();
                if let Some(rate) = data.heart_rate {
                    data.history.push(HistorySample {
                        timestamp,
                        value: rate as u32,
                    });
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn is_measuring(&self, category: DeviceCategory) -> bool {
        self.devices
            .status(category)
            .map_or(false, |s| s.is_measuring)
    }

    /// Set the completion flag and schedule its reset, so consumers observe
    /// a pulse rather than a latched bit. The explicit event on the bus is
    /// the preferred signal.
    fn pulse_completed(&mut self, category: DeviceCategory) {
        if let Some(status) = self.devices.status_mut(category) {
            status.is_measurement_completed = true;
        }
        recording::schedule_command(
            COMPLETION_PULSE,
            Command::ClearCompletionPulse(category),
            self.commands_tx.clone(),
        );
    }

    async fn write_rope_command(&self, handle: &HandleId, kind: CommandKind) {
        let (write_char, cmd) = match self.codecs.get(DeviceCategory::JumpRope) {
            Some(codec) => match (codec.write_characteristic(), codec.build_command(&kind)) {
                (Some(write_char), Some(cmd)) => (write_char, cmd),
                _ => return,
            },
            None => return,
        };
        if let Err(e) = self.transport.write_value(handle, write_char, &cmd, true).await {
            warn!("rope command write failed: {}", e);
        }
    }

    async fn persist(&self, category: DeviceCategory, record: Option<&PairedRecord>) {
        // Best-effort by inherited contract: a failed write is logged and
        // otherwise swallowed.
        if let Err(e) = self.store.save(category, record).await {
            warn!("failed to persist pairing slot for {:?}: {}", category, e);
        }
    }

    async fn start_scan(&mut self) {
        // Duplicates enabled: the same peripheral must be re-evaluated as
        // its RSSI changes.
        if let Err(e) = self.transport.start_scan(true).await {
            warn!("failed to start scan: {}", e);
            return;
        }
        self.scanning = true;
    }

    async fn stop_scan(&mut self) {
        if let Err(e) = self.transport.stop_scan().await {
            debug!("stop scan: {}", e);
        }
        self.scanning = false;
    }
}
