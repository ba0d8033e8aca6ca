//! Blood-pressure cuff (AES-U181 family) codec.
//!
//! The cuff streams three frame types on one vendor characteristic while a
//! measurement runs:
//!
//! ```text
//! [0xB0, p_hi, p_lo]                              live cuff pressure (mmHg)
//! [0xB1, sys_hi, sys_lo, dia_hi, dia_lo, pulse]   final result
//! [0xBE, code]                                    measurement error
//! ```

use tracing::debug;
use uuid::Uuid;

use crate::classify::classify;
use crate::model::DeviceCategory;
use crate::transport::{AdvertisementPayload, HandleId};

use super::{CommandKind, DecodedEvent, DeviceIdentity, OwnedHandle, ProtocolCodec};

pub const SPHYGMO_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FF80_0000_1000_8000_00805F9B34FB);
pub const SPHYGMO_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000FF82_0000_1000_8000_00805F9B34FB);

const SERVICES: [Uuid; 1] = [SPHYGMO_SERVICE_UUID];
const CHARACTERISTICS: [Uuid; 1] = [SPHYGMO_NOTIFY_UUID];

const PRESSURE_HEADER: u8 = 0xB0;
const RESULT_HEADER: u8 = 0xB1;
const ERROR_HEADER: u8 = 0xBE;

pub fn parse_frame(data: &[u8]) -> Option<DecodedEvent> {
    match data.first()? {
        &PRESSURE_HEADER if data.len() >= 3 => Some(DecodedEvent::CuffPressure {
            mmhg: u16::from_be_bytes([data[1], data[2]]),
        }),
        &RESULT_HEADER if data.len() >= 6 => Some(DecodedEvent::BloodPressure {
            systolic: u16::from_be_bytes([data[1], data[2]]),
            diastolic: u16::from_be_bytes([data[3], data[4]]),
            pulse_rate: data[5] as u16,
        }),
        &ERROR_HEADER if data.len() >= 2 => Some(DecodedEvent::BloodPressureError { code: data[1] }),
        _ => {
            debug!("unrecognized sphygmometer frame: {:02X?}", data);
            None
        }
    }
}

#[derive(Default)]
pub struct SphygmometerCodec {
    owned: OwnedHandle,
}

impl ProtocolCodec for SphygmometerCodec {
    fn category(&self) -> DeviceCategory {
        DeviceCategory::Sphygmometer
    }

    fn service_filter(&self) -> Option<&'static [Uuid]> {
        Some(&SERVICES)
    }

    fn characteristic_filter(&self) -> &'static [Uuid] {
        &CHARACTERISTICS
    }

    fn is_notify_characteristic(&self, characteristic: Uuid) -> bool {
        characteristic == SPHYGMO_NOTIFY_UUID
    }

    fn claim_advertisement(
        &mut self,
        handle: &HandleId,
        name: &str,
        payload: &AdvertisementPayload,
    ) -> Option<DeviceIdentity> {
        if classify(name) != DeviceCategory::Sphygmometer {
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
        (characteristic == SPHYGMO_NOTIFY_UUID)
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
    fn parses_live_pressure() {
        // 0x00B4 = 180 mmHg while inflating
        assert_eq!(
            parse_frame(&[0xB0, 0x00, 0xB4]),
            Some(DecodedEvent::CuffPressure { mmhg: 180 })
        );
    }

    #[test]
    fn parses_result_frame() {
        // 118/76, pulse 64
        let frame = [0xB1, 0x00, 0x76, 0x00, 0x4C, 0x40];
        assert_eq!(
            parse_frame(&frame),
            Some(DecodedEvent::BloodPressure {
                systolic: 118,
                diastolic: 76,
                pulse_rate: 64,
            })
        );
    }

    #[test]
    fn parses_error_frame() {
        assert_eq!(
            parse_frame(&[0xBE, 0x02]),
            Some(DecodedEvent::BloodPressureError { code: 2 })
        );
    }

    #[test]
    fn truncated_frames_are_discarded() {
        assert!(parse_frame(&[0xB0, 0x00]).is_none());
        assert!(parse_frame(&[0xB1, 0x00, 0x76, 0x00]).is_none());
        assert!(parse_frame(&[0xBE]).is_none());
    }
}
