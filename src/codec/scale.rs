//! Bathroom scale (QN-Scale family) codec.
//!
//! The scale advertises its MAC address in the manufacturer data block and
//! streams weight frames while someone stands on it:
//!
//! ```text
//! [0x10, flag, w_hi, w_lo]
//! ```
//!
//! Weight is a big-endian u16 in 10 g units; flag 0x00 is a live (settling)
//! reading, 0x01 the stable final result. The scale requires discovering all
//! services, as its notify characteristic moved between firmware revisions.

use tracing::debug;
use uuid::Uuid;

use crate::classify::classify;
use crate::model::DeviceCategory;
use crate::transport::{AdvertisementPayload, HandleId};

use super::{CommandKind, DecodedEvent, DeviceIdentity, OwnedHandle, ProtocolCodec};

pub const SCALE_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000FFE1_0000_1000_8000_00805F9B34FB);

const CHARACTERISTICS: [Uuid; 1] = [SCALE_NOTIFY_UUID];

const FRAME_HEADER: u8 = 0x10;
const FLAG_FINAL: u8 = 0x01;

/// Manufacturer ID under which the scale broadcasts its MAC address.
const SCALE_MANUFACTURER_ID: u16 = 0x01A8;

pub fn parse_frame(data: &[u8]) -> Option<DecodedEvent> {
    if data.len() < 4 || data[0] != FRAME_HEADER {
        debug!("unrecognized scale frame: {:02X?}", data);
        return None;
    }
    let decagrams = u16::from_be_bytes([data[2], data[3]]);
    Some(DecodedEvent::Weight {
        kilograms: decagrams as f64 / 100.0,
        is_final: data[1] == FLAG_FINAL,
    })
}

/// Extract the broadcast MAC from manufacturer data, if present.
fn address_from_payload(payload: &AdvertisementPayload) -> Option<String> {
    let bytes = payload.manufacturer_data.get(&SCALE_MANUFACTURER_ID)?;
    if bytes.len() < 6 {
        return None;
    }
    Some(
        bytes[..6]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(":"),
    )
}

#[derive(Default)]
pub struct ScaleCodec {
    owned: OwnedHandle,
}

impl ProtocolCodec for ScaleCodec {
    fn category(&self) -> DeviceCategory {
        DeviceCategory::Scale
    }

    fn service_filter(&self) -> Option<&'static [Uuid]> {
        // Firmware revisions disagree on the service UUID; discover all.
        None
    }

    fn characteristic_filter(&self) -> &'static [Uuid] {
        &CHARACTERISTICS
    }

    fn is_notify_characteristic(&self, characteristic: Uuid) -> bool {
        characteristic == SCALE_NOTIFY_UUID
    }

    fn claim_advertisement(
        &mut self,
        handle: &HandleId,
        name: &str,
        payload: &AdvertisementPayload,
    ) -> Option<DeviceIdentity> {
        if classify(name) != DeviceCategory::Scale {
            return None;
        }
        self.owned.set(handle);
        Some(DeviceIdentity {
            identifier: handle.clone(),
            display_name: Some(name.to_string()),
            physical_address: address_from_payload(payload)
                .or_else(|| payload.physical_address.clone()),
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
        (characteristic == SCALE_NOTIFY_UUID)
            .then(|| parse_frame(value))
            .flatten()
    }

    fn build_command(&self, _kind: &CommandKind) -> Option<Vec<u8>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_live_and_final_weight() {
        // 72.50 kg = 7250 = 0x1C52
        match parse_frame(&[0x10, 0x00, 0x1C, 0x52]) {
            Some(DecodedEvent::Weight { kilograms, is_final }) => {
                assert!((kilograms - 72.5).abs() < 1e-9);
                assert!(!is_final);
            }
            other => panic!("unexpected decode: {:?}", other),
        }

        match parse_frame(&[0x10, 0x01, 0x1C, 0x52]) {
            Some(DecodedEvent::Weight { is_final, .. }) => assert!(is_final),
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn extracts_mac_from_manufacturer_data() {
        let mut payload = AdvertisementPayload::default();
        payload
            .manufacturer_data
            .insert(SCALE_MANUFACTURER_ID, vec![0xAA, 0xBB, 0xCC, 0x11, 0x22, 0x33]);

        let mut codec = ScaleCodec::default();
        let identity = codec
            .claim_advertisement(&"h2".to_string(), "QN-Scale1", &payload)
            .unwrap();
        assert_eq!(identity.physical_address.as_deref(), Some("AA:BB:CC:11:22:33"));
    }

    #[test]
    fn short_manufacturer_block_falls_back_to_transport_address() {
        let mut payload = AdvertisementPayload::default();
        payload
            .manufacturer_data
            .insert(SCALE_MANUFACTURER_ID, vec![0xAA, 0xBB]);
        payload.physical_address = Some("11:22:33:44:55:66".to_string());

        let mut codec = ScaleCodec::default();
        let identity = codec
            .claim_advertisement(&"h2".to_string(), "QN-Scale1", &payload)
            .unwrap();
        assert_eq!(identity.physical_address.as_deref(), Some("11:22:33:44:55:66"));
    }
}
