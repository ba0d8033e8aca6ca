//! Smart jump rope (QN-Rope family) codec.
//!
//! The rope exposes a vendor service with a notify characteristic for
//! telemetry and a write characteristic for commands. Telemetry and battery
//! frames:
//!
//! ```text
//! [0xA5, mode, set_hi, set_lo, cnt_hi, cnt_lo, t_hi, t_lo, state]
//! [0xA4, tier]
//! ```
//!
//! Commands are 5 bytes; the set-mode command carries a trailing additive
//! checksum over the first four bytes. The device ignores a set-mode command
//! sent while it is still settling after connect, which is why the engine
//! repeats it after a one-second delay.

use tracing::debug;
use uuid::Uuid;

use crate::classify::classify;
use crate::model::{DeviceCategory, RopeMode, RopeState};
use crate::transport::{AdvertisementPayload, HandleId};

use super::{CommandKind, DecodedEvent, DeviceIdentity, OwnedHandle, ProtocolCodec};

pub const ROPE_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000FFD0_0000_1000_8000_00805F9B34FB);
pub const ROPE_NOTIFY_UUID: Uuid = Uuid::from_u128(0x0000FFD1_0000_1000_8000_00805F9B34FB);
pub const ROPE_WRITE_UUID: Uuid = Uuid::from_u128(0x0000FFD2_0000_1000_8000_00805F9B34FB);

const SERVICES: [Uuid; 1] = [ROPE_SERVICE_UUID];
const CHARACTERISTICS: [Uuid; 2] = [ROPE_NOTIFY_UUID, ROPE_WRITE_UUID];

const TELEMETRY_HEADER: u8 = 0xA5;
const BATTERY_HEADER: u8 = 0xA4;

const CMD_SET_MODE: u8 = 0xA1;
const CMD_STOP: u8 = 0xA2;
const CMD_QUERY_BATTERY: u8 = 0xA4;

fn mode_byte(mode: RopeMode) -> u8 {
    match mode {
        RopeMode::Free => 0x00,
        RopeMode::Timed => 0x01,
        RopeMode::Counted => 0x02,
    }
}

fn mode_from_byte(byte: u8) -> Option<RopeMode> {
    match byte {
        0x00 => Some(RopeMode::Free),
        0x01 => Some(RopeMode::Timed),
        0x02 => Some(RopeMode::Counted),
        _ => None,
    }
}

fn state_from_byte(byte: u8) -> Option<RopeState> {
    match byte {
        0x00 => Some(RopeState::Idle),
        0x01 => Some(RopeState::Running),
        0x02 => Some(RopeState::Paused),
        _ => None,
    }
}

/// Build the 5-byte set-mode command with its additive checksum.
pub fn set_mode_command(mode: RopeMode, setting: u32) -> Vec<u8> {
    let setting = setting.min(u16::MAX as u32) as u16;
    let [hi, lo] = setting.to_be_bytes();
    let mut cmd = vec![CMD_SET_MODE, mode_byte(mode), hi, lo, 0];
    cmd[4] = cmd[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
    cmd
}

pub fn parse_frame(data: &[u8]) -> Option<DecodedEvent> {
    match data.first()? {
        &TELEMETRY_HEADER if data.len() >= 9 => {
            let mode = mode_from_byte(data[1])?;
            let state = state_from_byte(data[8])?;
            Some(DecodedEvent::RopeTelemetry {
                mode,
                setting: u16::from_be_bytes([data[2], data[3]]) as u32,
                count: u16::from_be_bytes([data[4], data[5]]) as u32,
                elapsed_secs: u16::from_be_bytes([data[6], data[7]]) as u32,
                state,
            })
        }
        &BATTERY_HEADER if data.len() >= 2 => Some(DecodedEvent::RopeBattery {
            tier: data[1].min(3),
        }),
        _ => {
            debug!("unrecognized jump rope frame: {:02X?}", data);
            None
        }
    }
}

#[derive(Default)]
pub struct JumpRopeCodec {
    owned: OwnedHandle,
}

impl ProtocolCodec for JumpRopeCodec {
    fn category(&self) -> DeviceCategory {
        DeviceCategory::JumpRope
    }

    fn service_filter(&self) -> Option<&'static [Uuid]> {
        Some(&SERVICES)
    }

    fn characteristic_filter(&self) -> &'static [Uuid] {
        &CHARACTERISTICS
    }

    fn is_notify_characteristic(&self, characteristic: Uuid) -> bool {
        characteristic == ROPE_NOTIFY_UUID
    }

    fn write_characteristic(&self) -> Option<Uuid> {
        Some(ROPE_WRITE_UUID)
    }

    fn claim_advertisement(
        &mut self,
        handle: &HandleId,
        name: &str,
        payload: &AdvertisementPayload,
    ) -> Option<DeviceIdentity> {
        if classify(name) != DeviceCategory::JumpRope {
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
        (characteristic == ROPE_NOTIFY_UUID)
            .then(|| parse_frame(value))
            .flatten()
    }

    fn build_command(&self, kind: &CommandKind) -> Option<Vec<u8>> {
        match kind {
            CommandKind::QueryBattery => Some(vec![CMD_QUERY_BATTERY, 0, 0, 0, 0]),
            CommandKind::SetRopeMode { mode, setting } => Some(set_mode_command(*mode, *setting)),
            CommandKind::StopRope => Some(vec![CMD_STOP, 0, 0, 0, 0]),
            CommandKind::QueryMeasurement => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_telemetry_frame() {
        // Timed mode, target 180 s, 42 jumps, 17 s elapsed, running
        let frame = [0xA5, 0x01, 0x00, 0xB4, 0x00, 0x2A, 0x00, 0x11, 0x01];
        assert_eq!(
            parse_frame(&frame),
            Some(DecodedEvent::RopeTelemetry {
                mode: RopeMode::Timed,
                setting: 180,
                count: 42,
                elapsed_secs: 17,
                state: RopeState::Running,
            })
        );
    }

    #[test]
    fn parses_battery_frame_and_clamps_tier() {
        assert_eq!(
            parse_frame(&[0xA4, 0x02]),
            Some(DecodedEvent::RopeBattery { tier: 2 })
        );
        assert_eq!(
            parse_frame(&[0xA4, 0x09]),
            Some(DecodedEvent::RopeBattery { tier: 3 })
        );
    }

    #[test]
    fn rejects_unknown_mode_or_state() {
        let bad_mode = [0xA5, 0x07, 0, 0, 0, 0, 0, 0, 0x01];
        assert!(parse_frame(&bad_mode).is_none());
        let bad_state = [0xA5, 0x00, 0, 0, 0, 0, 0, 0, 0x09];
        assert!(parse_frame(&bad_state).is_none());
    }

    #[test]
    fn set_mode_command_checksum() {
        let cmd = set_mode_command(RopeMode::Counted, 500);
        assert_eq!(cmd.len(), 5);
        assert_eq!(cmd[0], 0xA1);
        assert_eq!(cmd[1], 0x02);
        assert_eq!(u16::from_be_bytes([cmd[2], cmd[3]]), 500);
        let expected = cmd[..4].iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
        assert_eq!(cmd[4], expected);
    }

    #[test]
    fn free_mode_command_is_idle_default() {
        let cmd = set_mode_command(RopeMode::Free, 0);
        assert_eq!(&cmd[..4], &[0xA1, 0x00, 0x00, 0x00]);
    }
}
