//! Chest heart-rate belt codec.
//!
//! Unlike the vendor families, the belt implements the standard GATT Heart
//! Rate (0x180D) and Battery (0x180F) services. Heart Rate Measurement
//! (0x2A37) carries a flags byte: bit 0 selects u8 vs u16 little-endian rate.
//! Battery Level (0x2A19) is a single percentage byte.

use tracing::debug;
use uuid::Uuid;

use crate::classify::classify;
use crate::model::DeviceCategory;
use crate::transport::{AdvertisementPayload, HandleId};

use super::{CommandKind, DecodedEvent, DeviceIdentity, OwnedHandle, ProtocolCodec};

pub const HEART_RATE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180D_0000_1000_8000_00805F9B34FB);
pub const BATTERY_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000180F_0000_1000_8000_00805F9B34FB);
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x00002A37_0000_1000_8000_00805F9B34FB);
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x00002A19_0000_1000_8000_00805F9B34FB);

const SERVICES: [Uuid; 2] = [HEART_RATE_SERVICE_UUID, BATTERY_SERVICE_UUID];
const CHARACTERISTICS: [Uuid; 2] = [HEART_RATE_MEASUREMENT_UUID, BATTERY_LEVEL_UUID];

const FLAG_RATE_U16: u8 = 0x01;

pub fn parse_measurement(data: &[u8]) -> Option<DecodedEvent> {
    let flags = *data.first()?;
    let bpm = if flags & FLAG_RATE_U16 != 0 {
        if data.len() < 3 {
            debug!("heart rate u16 frame too short: {:02X?}", data);
            return None;
        }
        u16::from_le_bytes([data[1], data[2]])
    } else {
        if data.len() < 2 {
            debug!("heart rate u8 frame too short: {:02X?}", data);
            return None;
        }
        data[1] as u16
    };
    Some(DecodedEvent::HeartRate { bpm })
}

#[derive(Default)]
pub struct HeartBeltCodec {
    owned: OwnedHandle,
}

impl ProtocolCodec for HeartBeltCodec {
    fn category(&self) -> DeviceCategory {
        DeviceCategory::HeartRateBelt
    }

    fn service_filter(&self) -> Option<&'static [Uuid]> {
        Some(&SERVICES)
    }

    fn characteristic_filter(&self) -> &'static [Uuid] {
        &CHARACTERISTICS
    }

    fn is_notify_characteristic(&self, characteristic: Uuid) -> bool {
        characteristic == HEART_RATE_MEASUREMENT_UUID || characteristic == BATTERY_LEVEL_UUID
    }

    fn claim_advertisement(
        &mut self,
        handle: &HandleId,
        name: &str,
        payload: &AdvertisementPayload,
    ) -> Option<DeviceIdentity> {
        if classify(name) != DeviceCategory::HeartRateBelt {
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
        if characteristic == HEART_RATE_MEASUREMENT_UUID {
            parse_measurement(value)
        } else if characteristic == BATTERY_LEVEL_UUID {
            value.first().map(|pct| DecodedEvent::BeltBattery {
                percent: (*pct).min(100),
            })
        } else {
            None
        }
    }

    fn build_command(&self, _kind: &CommandKind) -> Option<Vec<u8>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_u8_rate() {
        assert_eq!(
            parse_measurement(&[0x00, 143]),
            Some(DecodedEvent::HeartRate { bpm: 143 })
        );
    }

    #[test]
    fn parses_u16_rate() {
        // 0x0122 = 290 bpm, little-endian per the GATT spec
        assert_eq!(
            parse_measurement(&[0x01, 0x22, 0x01]),
            Some(DecodedEvent::HeartRate { bpm: 290 })
        );
    }

    #[test]
    fn truncated_frames_are_discarded() {
        assert!(parse_measurement(&[]).is_none());
        assert!(parse_measurement(&[0x00]).is_none());
        assert!(parse_measurement(&[0x01, 0x22]).is_none());
    }

    #[test]
    fn battery_decodes_on_its_own_characteristic() {
        let codec = HeartBeltCodec::default();
        assert_eq!(
            codec.decode(BATTERY_LEVEL_UUID, &[87]),
            Some(DecodedEvent::BeltBattery { percent: 87 })
        );
        // battery bytes on the measurement characteristic are not a reading
        assert_eq!(
            codec.decode(HEART_RATE_MEASUREMENT_UUID, &[0x00, 87]),
            Some(DecodedEvent::HeartRate { bpm: 87 })
        );
    }
}
