//! Pulse oximeter (PC-60 family) codec.
//!
//! The oximeter streams two kinds of notification frames on one vendor
//! characteristic:
//!
//! ```text
//! [0x81, spo2, pulse, pi_tenths]      measurement frame
//! [0x80, s0, s1, ...]                 pleth waveform samples
//! ```
//!
//! SpO2 127 and pulse 255 are the vendor's "finger out" markers and decode to
//! absent values rather than readings.

use tracing::debug;
use uuid::Uuid;

use crate::classify::classify;
use crate::model::DeviceCategory;
use crate::transport::{AdvertisementPayload, HandleId};

use super::{CommandKind, DecodedEvent, DeviceIdentity, OwnedHandle, ProtocolCodec};

pub const OXIMETER_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFE0_0000_1000_8000_00805F9B34FB);
pub const OXIMETER_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000FFE4_0000_1000_8000_00805F9B34FB);

const SERVICES: [Uuid; 1] = [OXIMETER_SERVICE_UUID];
const CHARACTERISTICS: [Uuid; 1] = [OXIMETER_NOTIFY_UUID];

const MEASUREMENT_HEADER: u8 = 0x81;
const WAVEFORM_HEADER: u8 = 0x80;

const SPO2_INVALID: u8 = 127;
const PULSE_INVALID: u8 = 255;

pub fn parse_frame(data: &[u8]) -> Option<DecodedEvent> {
    match data.first()? {
        &MEASUREMENT_HEADER => {
            if data.len() < 4 {
                debug!("oximeter measurement frame too short: {:02X?}", data);
                return None;
            }
            let spo2 = (data[1] != SPO2_INVALID && data[1] <= 100).then_some(data[1]);
            let pulse_rate = (data[2] != PULSE_INVALID).then_some(data[2] as u16);
            let perfusion_index = (data[3] != 0).then_some(data[3] as f64 / 10.0);
            Some(DecodedEvent::Oximetry {
                spo2,
                pulse_rate,
                perfusion_index,
            })
        }
        &WAVEFORM_HEADER => {
            let samples = data[1..].to_vec();
            (!samples.is_empty()).then_some(DecodedEvent::PlethWave { samples })
        }
        other => {
            debug!("unrecognized oximeter header 0x{:02X}", other);
            None
        }
    }
}

#[derive(Default)]
pub struct OximeterCodec {
    owned: OwnedHandle,
}

impl ProtocolCodec for OximeterCodec {
    fn category(&self) -> DeviceCategory {
        DeviceCategory::Oximeter
    }

    fn service_filter(&self) -> Option<&'static [Uuid]> {
        Some(&SERVICES)
    }

    fn characteristic_filter(&self) -> &'static [Uuid] {
        &CHARACTERISTICS
    }

    fn is_notify_characteristic(&self, characteristic: Uuid) -> bool {
        characteristic == OXIMETER_NOTIFY_UUID
    }

    fn claim_advertisement(
        &mut self,
        handle: &HandleId,
        name: &str,
        payload: &AdvertisementPayload,
    ) -> Option<DeviceIdentity> {
        if classify(name) != DeviceCategory::Oximeter {
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
        (characteristic == OXIMETER_NOTIFY_UUID)
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
    fn parses_measurement_frame() {
        let frame = [0x81, 98, 72, 64];
        match parse_frame(&frame) {
            Some(DecodedEvent::Oximetry {
                spo2,
                pulse_rate,
                perfusion_index,
            }) => {
                assert_eq!(spo2, Some(98));
                assert_eq!(pulse_rate, Some(72));
                assert_eq!(perfusion_index, Some(6.4));
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn finger_out_markers_decode_to_absent() {
        let frame = [0x81, 127, 255, 0];
        match parse_frame(&frame) {
            Some(DecodedEvent::Oximetry {
                spo2,
                pulse_rate,
                perfusion_index,
            }) => {
                assert_eq!(spo2, None);
                assert_eq!(pulse_rate, None);
                assert_eq!(perfusion_index, None);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn parses_waveform_frame() {
        let frame = [0x80, 10, 20, 30];
        assert_eq!(
            parse_frame(&frame),
            Some(DecodedEvent::PlethWave {
                samples: vec![10, 20, 30]
            })
        );
        // header with no samples is noise
        assert!(parse_frame(&[0x80]).is_none());
    }
}
