//! Protocol codec abstraction.
//!
//! Each peripheral family speaks its own framing over a small set of GATT
//! characteristics. A [`ProtocolCodec`] owns the static service and
//! characteristic table for its family, recognizes advertisements, decodes
//! notification frames into [`DecodedEvent`]s, and builds outgoing command
//! bytes. Codecs hold per-transport state only (the handle they currently
//! own) and are invoked synchronously from the engine task.
//!
//! # Adding a new device family
//!
//! 1. Add the vendor name fragment to `classify::NAME_RULES`.
//! 2. Create a module with the family's UUID constants and frame parser.
//! 3. Implement [`ProtocolCodec`] and register it in [`CodecSet::with_defaults`].

pub mod heart_belt;
pub mod jump_rope;
pub mod oximeter;
pub mod scale;
pub mod sphygmometer;
pub mod thermometer;

use std::collections::HashMap;

use uuid::Uuid;

use crate::model::{DeviceCategory, RopeMode, RopeState, TemperatureMode};
use crate::transport::{AdvertisementPayload, HandleId};

/// Identity extracted from a claimed advertisement; becomes the persisted
/// pairing record.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub identifier: String,
    pub display_name: Option<String>,
    pub physical_address: Option<String>,
}

/// A decoded telemetry frame, category-specific.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
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
    PlethWave {
        samples: Vec<u8>,
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
}

/// Outgoing command requests the engine can ask a codec to encode.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// Thermometer: ask the device to report the current reading.
    QueryMeasurement,
    /// Jump rope: ask for the battery tier.
    QueryBattery,
    /// Jump rope: configure the session mode and target.
    SetRopeMode { mode: RopeMode, setting: u32 },
    /// Jump rope: end the current session.
    StopRope,
}

pub trait ProtocolCodec: Send + Sync {
    fn category(&self) -> DeviceCategory;

    /// Services to discover after connecting; `None` means all services.
    fn service_filter(&self) -> Option<&'static [Uuid]>;

    /// Characteristics of interest within the discovered services.
    fn characteristic_filter(&self) -> &'static [Uuid];

    fn is_notify_characteristic(&self, characteristic: Uuid) -> bool;

    /// The command characteristic, for families that accept writes.
    fn write_characteristic(&self) -> Option<Uuid> {
        None
    }

    /// Recognize an advertisement and extract identity. Claiming records the
    /// handle as owned by this codec.
    fn claim_advertisement(
        &mut self,
        handle: &HandleId,
        name: &str,
        payload: &AdvertisementPayload,
    ) -> Option<DeviceIdentity>;

    /// Take ownership of a handle without a fresh claim (reconnect path).
    fn adopt_handle(&mut self, handle: &HandleId);

    /// Guard against stale callbacks for peripherals this codec no longer
    /// owns.
    fn owns_handle(&self, handle: &HandleId) -> bool;

    fn release_handle(&mut self, handle: &HandleId);

    /// Decode one characteristic value. `None` means the frame is not
    /// recognized and must be discarded.
    fn decode(&self, characteristic: Uuid, value: &[u8]) -> Option<DecodedEvent>;

    fn build_command(&self, kind: &CommandKind) -> Option<Vec<u8>>;
}

/// Per-transport claim state shared by the default codecs.
#[derive(Debug, Default)]
pub(crate) struct OwnedHandle(Option<HandleId>);

impl OwnedHandle {
    pub fn set(&mut self, handle: &HandleId) {
        self.0 = Some(handle.clone());
    }

    pub fn matches(&self, handle: &HandleId) -> bool {
        self.0.as_deref() == Some(handle.as_str())
    }

    pub fn clear_if(&mut self, handle: &HandleId) {
        if self.matches(handle) {
            self.0 = None;
        }
    }
}

/// The codec registry, one codec per concrete category.
pub struct CodecSet {
    codecs: HashMap<DeviceCategory, Box<dyn ProtocolCodec>>,
}

impl CodecSet {
    pub fn with_defaults() -> Self {
        let mut codecs: HashMap<DeviceCategory, Box<dyn ProtocolCodec>> = HashMap::new();
        codecs.insert(
            DeviceCategory::Thermometer,
            Box::new(thermometer::ThermometerCodec::default()),
        );
        codecs.insert(
            DeviceCategory::Oximeter,
            Box::new(oximeter::OximeterCodec::default()),
        );
        codecs.insert(
            DeviceCategory::Sphygmometer,
            Box::new(sphygmometer::SphygmometerCodec::default()),
        );
        codecs.insert(DeviceCategory::Scale, Box::new(scale::ScaleCodec::default()));
        codecs.insert(
            DeviceCategory::JumpRope,
            Box::new(jump_rope::JumpRopeCodec::default()),
        );
        codecs.insert(
            DeviceCategory::HeartRateBelt,
            Box::new(heart_belt::HeartBeltCodec::default()),
        );
        Self { codecs }
    }

    pub fn get(&self, category: DeviceCategory) -> Option<&dyn ProtocolCodec> {
        self.codecs.get(&category).map(|c| c.as_ref())
    }

    pub fn get_mut(&mut self, category: DeviceCategory) -> Option<&mut Box<dyn ProtocolCodec>> {
        self.codecs.get_mut(&category)
    }

    /// Find the codec that lists `characteristic` in its table and currently
    /// owns `handle`.
    pub fn owner_of(
        &self,
        handle: &HandleId,
        characteristic: Uuid,
    ) -> Option<(DeviceCategory, &dyn ProtocolCodec)> {
        self.codecs.iter().find_map(|(category, codec)| {
            let listed = codec.characteristic_filter().contains(&characteristic);
            (listed && codec.owns_handle(handle)).then(|| (*category, codec.as_ref()))
        })
    }

    pub fn release_everywhere(&mut self, handle: &HandleId) {
        for codec in self.codecs.values_mut() {
            codec.release_handle(handle);
        }
    }
}
