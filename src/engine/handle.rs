use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::warn;

use crate::events::{ClinicalEvent, ConnectivityEvent, EventBus, FitnessEvent};
use crate::model::{DeviceCategory, DeviceSnapshot};

use super::recording::{RecordingError, RopeGoal};
use super::Command;

/// Cloneable front door to a running engine. All methods enqueue onto the
/// engine's command channel; queries wait for a reply over a oneshot.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    bus: EventBus,
}

impl HubHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, bus: EventBus) -> Self {
        Self { commands, bus }
    }

    /// Begin advertisement scanning for `category`; `AllDevices` scans with
    /// no category restriction.
    pub async fn start_pairing(&self, category: DeviceCategory) {
        self.send(Command::StartPairing(category)).await;
    }

    pub async fn stop_pairing(&self) {
        self.send(Command::StopPairing).await;
    }

    /// Reconnect to the device previously paired under `category`. Does
    /// nothing when no pairing record exists.
    pub async fn connect(&self, category: DeviceCategory) {
        self.send(Command::Connect(category)).await;
    }

    pub async fn disconnect(&self, category: DeviceCategory) {
        self.send(Command::Disconnect(category)).await;
    }

    pub async fn set_rssi_threshold(&self, dbm: i16) {
        self.send(Command::SetRssiThreshold(dbm)).await;
    }

    /// Configure and start a jump-rope session. Resolves only after the
    /// second (settling) mode write has gone out.
    pub async fn start_jump_rope_recording(
        &self,
        goal: RopeGoal,
    ) -> Result<(), RecordingError> {
        let (done, response) = oneshot::channel();
        self.send(Command::StartRopeRecording { goal, done }).await;
        // A dropped sender means the engine abandoned the session before
        // completing it, which only happens without a connected rope.
        response.await.unwrap_or(Err(RecordingError::NotConnected))
    }

    pub async fn stop_jump_rope_recording(&self) {
        self.send(Command::StopRopeRecording).await;
    }

    pub async fn start_heart_rate_recording(&self) {
        self.send(Command::StartHeartRateRecording).await;
    }

    pub async fn stop_heart_rate_recording(&self) {
        self.send(Command::StopHeartRateRecording).await;
    }

    /// Current status and data for one category. `None` for the sentinel
    /// categories.
    pub async fn snapshot(&self, category: DeviceCategory) -> Option<DeviceSnapshot> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Snapshot { category, reply }).await;
        response.await.ok().flatten()
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.bus.subscribe_connectivity()
    }

    pub fn subscribe_clinical(&self) -> broadcast::Receiver<ClinicalEvent> {
        self.bus.subscribe_clinical()
    }

    pub fn subscribe_fitness(&self) -> broadcast::Receiver<FitnessEvent> {
        self.bus.subscribe_fitness()
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            warn!("engine task is gone; command dropped");
        }
    }
}
