//! Observer fan-out.
//!
//! Three independent broadcast channels replace the original observer
//! protocols: consumers subscribe to the families they care about and ignore
//! the rest. Publishing never blocks the engine; a send with no subscribers
//! is simply dropped.

use tokio::sync::broadcast;

use crate::model::{
    DeviceCategory, HistorySample, RopeMode, RopeState, TemperatureMode,
};
use crate::store::PairedRecord;
use crate::transport::HandleId;

/// Transport-level lifecycle notifications.
#[derive(Debug, Clone)]
pub enum ConnectivityEvent {
    DeviceDiscovered {
        category: DeviceCategory,
        handle: HandleId,
        name: String,
        rssi: Option<i16>,
    },
    DevicePaired {
        category: DeviceCategory,
        record: PairedRecord,
    },
    DeviceConnected {
        category: DeviceCategory,
        handle: HandleId,
    },
    DeviceConnectFailed {
        category: DeviceCategory,
    },
    DeviceDisconnected {
        category: DeviceCategory,
    },
}

/// Decoded measurements from the clinical family (thermometer, oximeter,
/// blood-pressure cuff, scale).
#[derive(Debug, Clone)]
pub enum ClinicalEvent {
    Temperature {
        celsius: f64,
        mode: TemperatureMode,
        battery: u8,
    },
    Oximetry {
        spo2: Option<u8>,
        pulse_rate: Option<u16>,
        perfusion_index: Option<f64>,
    },
    CuffPressure {
        mmhg: u16,
    },
    BloodPressure {
        systolic: u16,
        diastolic: u16,
        pulse_rate: u16,
    },
    BloodPressureError {
        code: u8,
    },
    Weight {
        kilograms: f64,
        is_final: bool,
    },
}

/// Decoded events from the fitness family (jump rope, heart-rate belt),
/// plus recording session boundaries.
#[derive(Debug, Clone)]
pub enum FitnessEvent {
    RopeTelemetry {
        mode: RopeMode,
        setting: u32,
        count: u32,
        elapsed_secs: u32,
        state: RopeState,
    },
    RopeBattery {
        tier: u8,
    },
    HeartRate {
        bpm: u16,
    },
    BeltBattery {
        percent: u8,
    },
    RecordingStarted {
        category: DeviceCategory,
    },
    /// Emitted when a recording session ends, carrying the captured history.
    /// This is the explicit replacement for polling a completion flag.
    RecordingCompleted {
        category: DeviceCategory,
        history: Vec<HistorySample>,
    },
}

#[derive(Clone)]
pub struct EventBus {
    connectivity: broadcast::Sender<ConnectivityEvent>,
    clinical: broadcast::Sender<ClinicalEvent>,
    fitness: broadcast::Sender<FitnessEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (connectivity, _) = broadcast::channel(capacity);
        let (clinical, _) = broadcast::channel(capacity);
        let (fitness, _) = broadcast::channel(capacity);
        Self {
            connectivity,
            clinical,
            fitness,
        }
    }

    pub fn subscribe_connectivity(&self) -> broadcast::Receiver<ConnectivityEvent> {
        self.connectivity.subscribe()
    }

    pub fn subscribe_clinical(&self) -> broadcast::Receiver<ClinicalEvent> {
        self.clinical.subscribe()
    }

    pub fn subscribe_fitness(&self) -> broadcast::Receiver<FitnessEvent> {
        self.fitness.subscribe()
    }

    pub(crate) fn publish_connectivity(&self, event: ConnectivityEvent) {
        let _ = self.connectivity.send(event);
    }

    pub(crate) fn publish_clinical(&self, event: ClinicalEvent) {
        let _ = self.clinical.send(event);
    }

    pub(crate) fn publish_fitness(&self, event: FitnessEvent) {
        let _ = self.fitness.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
