//! Infrared thermometer (AOJ-20A family) codec.
//!
//! The device exposes a vendor service with one notify characteristic and one
//! write characteristic. It only reports after being asked: the engine writes
//! the 5-byte query command once the write characteristic is discovered, and
//! the reading arrives as a single notification frame:
//!
//! ```text
//! [0xAA, mode, temp_hi, temp_lo, battery]
//! ```
//!
//! Temperature is a big-endian u16 in hundredths of a degree Celsius; mode is
//! 0x01 (body) or 0x02 (surface); battery is a percentage.

use tracing::debug;
use uuid::Uuid;

use crate::classify::classify;
use crate::model::{DeviceCategory, TemperatureMode};
use crate::transport::{AdvertisementPayload, HandleId};

use super::{CommandKind, DecodedEvent, DeviceIdentity, OwnedHandle, ProtocolCodec};

pub const THERMOMETER_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFF0_0000_1000_8000_00805F9B34FB);
pub const THERMOMETER_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000FFF1_0000_1000_8000_00805F9B34FB);
pub const THERMOMETER_WRITE_UUID: Uuid = Uuid::from_u128(0x0000FFF2_0000_1000_8000_00805F9B34FB);

/// Fixed query sent right after characteristic discovery.
pub const QUERY_COMMAND: [u8; 5] = [0xE7, 0x00, 0x00, 0x00, 0x00];

const SERVICES: [Uuid; 1] = [THERMOMETER_SERVICE_UUID];
const CHARACTERISTICS: [Uuid; 2] = [THERMOMETER_NOTIFY_UUID, THERMOMETER_WRITE_UUID];

const FRAME_HEADER: u8 = 0xAA;

pub fn parse_frame(data: &[u8]) -> Option<DecodedEvent> {
    if data.len() < 5 || data[0] != FRAME_HEADER {
        debug!("unrecognized thermometer frame: {:02X?}", data);
        return None;
    }
    let mode = match data[1] {
        0x01 => TemperatureMode::Body,
        0x02 => TemperatureMode::Surface,
        other => {
            debug!("unknown thermometer mode byte 0x{:02X}", other);
            return None;
        }
    };
    let centi = u16::from_be_bytes([data[2], data[3]]);
    Some(DecodedEvent::Temperature {
        celsius: centi as f64 / 100.0,
        mode,
        battery: data[4].min(100),
    })
}

#[derive(Default)]
pub struct ThermometerCodec {
    owned: OwnedHandle,
}

impl ProtocolCodec for ThermometerCodec {
    fn category(&self) -> DeviceCategory {
        DeviceCategory::Thermometer
    }

    fn service_filter(&self) -> Option<&'static [Uuid]> {
        Some(&SERVICES)
    }

    fn characteristic_filter(&self) -> &'static [Uuid] {
        &CHARACTERISTICS
    }

    fn is_notify_characteristic(&self, characteristic: Uuid) -> bool {
        characteristic == THERMOMETER_NOTIFY_UUID
    }

    fn write_characteristic(&self) -> Option<Uuid> {
        Some(THERMOMETER_WRITE_UUID)
    }

    fn claim_advertisement(
        &mut self,
        handle: &HandleId,
        name: &str,
        payload: &AdvertisementPayload,
    ) -> Option<DeviceIdentity> {
        if classify(name) != DeviceCategory::Thermometer {
            return None;
        }
        self.owned.set(handle);
        Some(DeviceIdentity {
            identifier: handle.clone(),
            display_name: Some(name.to_string()),
            physical_address: payload.physical_address.clone(),
        })
    }

    fn adopt_handle(&mut self, handle: &HandleId) {
        self.owned.set(handle);
    }

    fn owns_handle(&self, handle: &HandleId) -> bool {
        self.owned.matches(handle)
    }

    fn release_handle(&mut self, handle: &HandleId) {
        self.owned.clear_if(handle);
    }

    fn decode(&self, characteristic: Uuid, value: &[u8]) -> Option<DecodedEvent> {
        (characteristic == THERMOMETER_NOTIFY_UUID)
            .then(|| parse_frame(value))
            .flatten()
    }

    fn build_command(&self, kind: &CommandKind) -> Option<Vec<u8>> {
        match kind {
            CommandKind::QueryMeasurement => Some(QUERY_COMMAND.to_vec()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_body_reading() {
        // 36.85 C = 3685 = 0x0E65, body mode, 80% battery
        let frame = [0xAA, 0x01, 0x0E, 0x65, 80];
        match parse_frame(&frame) {
            Some(DecodedEvent::Temperature { celsius, mode, battery }) => {
                assert!((celsius - 36.85).abs() < 1e-9);
                assert_eq!(mode, TemperatureMode::Body);
                assert_eq!(battery, 80);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn rejects_short_or_foreign_frames() {
        assert!(parse_frame(&[0xAA, 0x01, 0x0E]).is_none());
        assert!(parse_frame(&[0xBB, 0x01, 0x0E, 0x65, 80]).is_none());
        assert!(parse_frame(&[0xAA, 0x07, 0x0E, 0x65, 80]).is_none());
    }

    #[test]
    fn claim_requires_matching_name() {
        let mut codec = ThermometerCodec::default();
        let payload = AdvertisementPayload::default();
        assert!(codec
            .claim_advertisement(&"h1".to_string(), "QN-Scale1", &payload)
            .is_none());
        assert!(!codec.owns_handle(&"h1".to_string()));

        let identity = codec
            .claim_advertisement(&"h1".to_string(), "AOJ-20A-3F2B", &payload)
            .unwrap();
        assert_eq!(identity.identifier, "h1");
        assert!(codec.owns_handle(&"h1".to_string()));
    }
}
