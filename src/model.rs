//! Shared device model: categories, per-category status flags and telemetry
//! payloads, and the category-indexed aggregate the engine owns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The six supported peripheral families, plus the two sentinel values used
/// for classification misses (`None`) and broadcast operations (`AllDevices`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceCategory {
    Thermometer,
    Oximeter,
    Sphygmometer,
    Scale,
    JumpRope,
    HeartRateBelt,
    None,
    AllDevices,
}

impl DeviceCategory {
    /// The concrete categories, i.e. everything a real peripheral can be.
    pub const CONCRETE: [DeviceCategory; 6] = [
        DeviceCategory::Thermometer,
        DeviceCategory::Oximeter,
        DeviceCategory::Sphygmometer,
        DeviceCategory::Scale,
        DeviceCategory::JumpRope,
        DeviceCategory::HeartRateBelt,
    ];

    pub fn is_concrete(&self) -> bool {
        !matches!(self, DeviceCategory::None | DeviceCategory::AllDevices)
    }

    /// Stable key used for the persisted pairing slot of this category.
    pub fn slot_key(&self) -> &'static str {
        match self {
            DeviceCategory::Thermometer => "thermometer",
            DeviceCategory::Oximeter => "oximeter",
            DeviceCategory::Sphygmometer => "sphygmometer",
            DeviceCategory::Scale => "scale",
            DeviceCategory::JumpRope => "jump_rope",
            DeviceCategory::HeartRateBelt => "heart_rate_belt",
            DeviceCategory::None => "none",
            DeviceCategory::AllDevices => "all",
        }
    }

    /// Inverse of [`slot_key`](Self::slot_key) for the concrete categories.
    pub fn from_slot_key(key: &str) -> Option<DeviceCategory> {
        DeviceCategory::CONCRETE
            .into_iter()
            .find(|category| category.slot_key() == key)
    }
}

/// Connection/measurement lifecycle flags for one category.
///
/// At most one of `is_pairing`/`is_connecting` is true at a time, and
/// `is_connected`/`is_disconnected` are never both true; the engine maintains
/// those invariants on every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub is_pairing: bool,
    pub is_paired: bool,
    pub is_connecting: bool,
    pub is_connected: bool,
    pub is_connection_failure: bool,
    pub is_disconnected: bool,
    pub is_measuring: bool,
    pub is_measurement_completed: bool,
    pub is_pause_measurement: bool,
    pub measurement_error: Option<String>,
}

/// One timestamped scalar captured by a 1 Hz recording sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySample {
    pub timestamp: DateTime<Utc>,
    pub value: u32,
}

/// Thermometer measurement mode reported by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureMode {
    Body,
    Surface,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThermometerData {
    pub temperature: Option<f64>,
    pub mode: Option<TemperatureMode>,
    pub battery: Option<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OximeterData {
    pub spo2: Option<u8>,
    pub pulse_rate: Option<u16>,
    pub perfusion_index: Option<f64>,
    /// Raw pleth waveform samples, appended as notifications arrive.
    pub waveform: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SphygmometerData {
    /// Live cuff pressure while a measurement is in progress.
    pub pressure: Option<u16>,
    pub systolic: Option<u16>,
    pub diastolic: Option<u16>,
    pub pulse_rate: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScaleData {
    pub weight_kg: Option<f64>,
    /// False while the reading is still settling, true for the stable result.
    pub is_final: bool,
}

/// Jump-rope session mode as reported in telemetry frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RopeMode {
    Free,
    Timed,
    Counted,
}

/// Jump-rope device run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RopeState {
    Idle,
    Running,
    Paused,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JumpRopeData {
    pub count: Option<u32>,
    pub elapsed_secs: Option<u32>,
    pub mode: Option<RopeMode>,
    /// The configured target (seconds or jumps) for Timed/Counted modes.
    pub setting: Option<u32>,
    pub state: Option<RopeState>,
    /// Coarse battery tier, 0 (empty) to 3 (full).
    pub battery_tier: Option<u8>,
    pub history: Vec<HistorySample>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartRateData {
    pub heart_rate: Option<u16>,
    pub battery_percent: Option<u8>,
    pub history: Vec<HistorySample>,
}

/// Snapshot payload handed to consumers; one variant per concrete category.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeviceData {
    Thermometer(ThermometerData),
    Oximeter(OximeterData),
    Sphygmometer(SphygmometerData),
    Scale(ScaleData),
    JumpRope(JumpRopeData),
    HeartRateBelt(HeartRateData),
}

/// Point-in-time view of one category's status and telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub category: DeviceCategory,
    pub status: DeviceStatus,
    pub data: DeviceData,
}

impl DeviceSnapshot {
    /// The jump-rope count history, empty for every other category.
    pub fn rope_history(&self) -> &[HistorySample] {
        match &self.data {
            DeviceData::JumpRope(data) => &data.history,
            _ => &[],
        }
    }

    /// The heart-rate history, empty for every other category.
    pub fn heart_rate_history(&self) -> &[HistorySample] {
        match &self.data {
            DeviceData::HeartRateBelt(data) => &data.history,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Default)]
struct Slot<D> {
    status: DeviceStatus,
    data: D,
}

/// The category-indexed aggregate. Exactly one status+data pair per concrete
/// category; all access goes through the category accessors so no state
/// machine can reach another category's payload by accident.
#[derive(Debug, Default)]
pub struct Devices {
    thermometer: Slot<ThermometerData>,
    oximeter: Slot<OximeterData>,
    sphygmometer: Slot<SphygmometerData>,
    scale: Slot<ScaleData>,
    jump_rope: Slot<JumpRopeData>,
    heart_rate_belt: Slot<HeartRateData>,
}

impl Devices {
    pub fn status(&self, category: DeviceCategory) -> Option<&DeviceStatus> {
        match category {
            DeviceCategory::Thermometer => Some(&self.thermometer.status),
            DeviceCategory::Oximeter => Some(&self.oximeter.status),
            DeviceCategory::Sphygmometer => Some(&self.sphygmometer.status),
            DeviceCategory::Scale => Some(&self.scale.status),
            DeviceCategory::JumpRope => Some(&self.jump_rope.status),
            DeviceCategory::HeartRateBelt => Some(&self.heart_rate_belt.status),
            _ => None,
        }
    }

    pub fn status_mut(&mut self, category: DeviceCategory) -> Option<&mut DeviceStatus> {
        match category {
            DeviceCategory::Thermometer => Some(&mut self.thermometer.status),
            DeviceCategory::Oximeter => Some(&mut self.oximeter.status),
            DeviceCategory::Sphygmometer => Some(&mut self.sphygmometer.status),
            DeviceCategory::Scale => Some(&mut self.scale.status),
            DeviceCategory::JumpRope => Some(&mut self.jump_rope.status),
            DeviceCategory::HeartRateBelt => Some(&mut self.heart_rate_belt.status),
            _ => None,
        }
    }

    /// Replace the category's telemetry payload with an empty one. Used on
    /// pairing start and on every (re)connect.
    pub fn reset_data(&mut self, category: DeviceCategory) {
        match category {
            DeviceCategory::Thermometer => self.thermometer.data = Default::default(),
            DeviceCategory::Oximeter => self.oximeter.data = Default::default(),
            DeviceCategory::Sphygmometer => self.sphygmometer.data = Default::default(),
            DeviceCategory::Scale => self.scale.data = Default::default(),
            DeviceCategory::JumpRope => self.jump_rope.data = Default::default(),
            DeviceCategory::HeartRateBelt => self.heart_rate_belt.data = Default::default(),
            _ => {}
        }
    }

    pub fn snapshot(&self, category: DeviceCategory) -> Option<DeviceSnapshot> {
        let (status, data) = match category {
            DeviceCategory::Thermometer => (
                self.thermometer.status.clone(),
                DeviceData::Thermometer(self.thermometer.data.clone()),
            ),
            DeviceCategory::Oximeter => (
                self.oximeter.status.clone(),
                DeviceData::Oximeter(self.oximeter.data.clone()),
            ),
            DeviceCategory::Sphygmometer => (
                self.sphygmometer.status.clone(),
                DeviceData::Sphygmometer(self.sphygmometer.data.clone()),
            ),
            DeviceCategory::Scale => (
                self.scale.status.clone(),
                DeviceData::Scale(self.scale.data.clone()),
            ),
            DeviceCategory::JumpRope => (
                self.jump_rope.status.clone(),
                DeviceData::JumpRope(self.jump_rope.data.clone()),
            ),
            DeviceCategory::HeartRateBelt => (
                self.heart_rate_belt.status.clone(),
                DeviceData::HeartRateBelt(self.heart_rate_belt.data.clone()),
            ),
            _ => return None,
        };
        Some(DeviceSnapshot { category, status, data })
    }

    pub fn thermometer_mut(&mut self) -> &mut ThermometerData {
        &mut self.thermometer.data
    }

    pub fn oximeter_mut(&mut self) -> &mut OximeterData {
        &mut self.oximeter.data
    }

    pub fn sphygmometer_mut(&mut self) -> &mut SphygmometerData {
        &mut self.sphygmometer.data
    }

    pub fn scale_mut(&mut self) -> &mut ScaleData {
        &mut self.scale.data
    }

    pub fn jump_rope(&self) -> &JumpRopeData {
        &self.jump_rope.data
    }

    pub fn jump_rope_mut(&mut self) -> &mut JumpRopeData {
        &mut self.jump_rope.data
    }

    pub fn heart_rate(&self) -> &HeartRateData {
        &self.heart_rate_belt.data
    }

    pub fn heart_rate_mut(&mut self) -> &mut HeartRateData {
        &mut self.heart_rate_belt.data
    }
}
