//! Decoding of the accessory's GATT notification payloads.

use log::debug;
use uuid::Uuid;

use crate::codec::gesture::{Gesture, GestureEvent};
use crate::device::constants::{
    make_battery_uuid, make_firmware_version_uuid, make_sensor_button_uuid, make_sensor_fly_uuid,
    make_sensor_rotation_uuid, make_sensor_touch_uuid,
};
use crate::device::types::DeviceEvent;

/// The characteristics with a known payload format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicKind {
    Fly,
    Touch,
    Rotation,
    Button,
    FirmwareVersion,
    Battery,
}

impl CharacteristicKind {
    pub fn from_uuid(uuid: &Uuid) -> Option<CharacteristicKind> {
        let kinds = [
            (make_sensor_fly_uuid(), CharacteristicKind::Fly),
            (make_sensor_touch_uuid(), CharacteristicKind::Touch),
            (make_sensor_rotation_uuid(), CharacteristicKind::Rotation),
            (make_sensor_button_uuid(), CharacteristicKind::Button),
            (make_firmware_version_uuid(), CharacteristicKind::FirmwareVersion),
            (make_battery_uuid(), CharacteristicKind::Battery),
        ];

        kinds.into_iter().find(|(known, _)| known == uuid).map(|(_, kind)| kind)
    }
}

/**
 * Decodes a fly payload: `[direction, speed]`.
 *
 * Direction codes outside of 0-4 are reported as `FlyRight`. Firmware sends such codes for right
 * fly gestures, so this mapping must stay until that firmware is gone. Missing bytes read as 0.
 */
pub fn decode_fly(data: &[u8]) -> GestureEvent {
    let direction = data.first().copied().unwrap_or(0);
    let speed = data.get(1).copied().unwrap_or(0);

    let gesture = match direction {
        0 => Gesture::FlyLeft,
        1 => Gesture::FlyRight,
        2 => Gesture::FlyBackwards,
        3 => Gesture::FlyTowards,
        4 => Gesture::FlyUpDown,
        _ => Gesture::FlyRight,
    };

    let value = if gesture == Gesture::FlyUpDown { Some(i32::from(speed)) } else { None };
    GestureEvent::new(gesture, value)
}

/// Decodes a touch payload. Current firmware sends a single swipe byte; older firmware sends four bytes.
#[allow(deprecated)]
pub fn decode_touch(data: &[u8]) -> GestureEvent {
    let gesture = match data.len() {
        1 => match data[0] {
            0 => Gesture::SwipeLeft,
            1 => Gesture::SwipeRight,
            2 => Gesture::SwipeUp,
            3 => Gesture::SwipeDown,
            _ => Gesture::Undefined,
        },
        4 => decode_legacy_touch(data),
        _ => Gesture::Undefined,
    };

    GestureEvent::new(gesture, None)
}

/**
 * Decodes the four byte touch payload of older firmware: a 16-bit button mask followed by a
 * 16-bit event code, both little-endian. Every two bits of the mask belong to one touch area
 * (left, top, right, bottom). The first set bit with a known event code wins.
 */
#[deprecated(note = "only needed for accessories running firmware that predates single byte swipe notifications")]
pub fn decode_legacy_touch(data: &[u8]) -> Gesture {
    let button_mask = i16::from_le_bytes([data[0], data[1]]);
    let event = i16::from_le_bytes([data[2], data[3]]);

    const TOUCH_DOWN_GESTURES: [Gesture; 4] = [
        Gesture::TouchLeftDown,
        Gesture::TouchTopDown,
        Gesture::TouchRightDown,
        Gesture::TouchBottomDown,
    ];

    for bit in 0..8 {
        if button_mask & (1 << bit) == 0 {
            continue;
        }

        let touch_down = TOUCH_DOWN_GESTURES[bit / 2];
        let gesture = match event {
            1 => Some(touch_down),
            2 => touch_down.touch_release_gesture(),
            4 => touch_down.swipe_gesture(),
            _ => None,
        };

        if let Some(gesture) = gesture {
            return gesture;
        }
    }

    Gesture::Undefined
}

/// Decodes a rotation payload: a signed 16-bit little-endian angle delta. Panics on less than 2 bytes.
pub fn decode_rotation(data: &[u8]) -> GestureEvent {
    let value = i16::from_le_bytes([data[0], data[1]]);
    GestureEvent::new(Gesture::Rotate, Some(i32::from(value)))
}

/// Decodes a button payload. Panics on an empty buffer.
pub fn decode_button(data: &[u8]) -> GestureEvent {
    let value = data[0];
    let gesture = if value == 1 { Gesture::ButtonPress } else { Gesture::ButtonRelease };
    GestureEvent::new(gesture, Some(i32::from(value)))
}

pub fn decode_firmware_version(data: &[u8]) -> Option<String> {
    std::str::from_utf8(data).ok().map(|version| version.to_string())
}

/// Battery level in percent. Panics on an empty buffer.
pub fn decode_battery_level(data: &[u8]) -> u8 {
    data[0]
}

/**
 * Translates a value notification of one of the accessory's characteristics into a device event.
 *
 * Fixed size payloads that are too short are dropped here, so that the decoders above are never
 * invoked with them.
 */
#[allow(deprecated)]
pub fn decode_notification(characteristic: &Uuid, data: &[u8]) -> Option<DeviceEvent> {
    let kind = CharacteristicKind::from_uuid(characteristic)?;

    let required_length = match kind {
        CharacteristicKind::Rotation => 2,
        CharacteristicKind::Button | CharacteristicKind::Battery => 1,
        _ => 0,
    };

    if data.len() < required_length {
        debug!("Dropping {:?} notification with {} bytes", kind, data.len());
        return None;
    }

    let event = match kind {
        CharacteristicKind::Fly => DeviceEvent::Gesture(decode_fly(data)),
        CharacteristicKind::Touch => DeviceEvent::Gesture(decode_touch(data)),
        CharacteristicKind::Rotation => DeviceEvent::Gesture(decode_rotation(data)),
        CharacteristicKind::Button => DeviceEvent::Gesture(decode_button(data)),
        CharacteristicKind::Battery => DeviceEvent::BatteryLevel(decode_battery_level(data)),
        CharacteristicKind::FirmwareVersion => match decode_firmware_version(data) {
            Some(version) => DeviceEvent::FirmwareVersion(version),
            None => {
                debug!("Firmware version is not valid utf-8: {:02X?}", data);
                return None;
            },
        },
    };

    Some(event)
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use super::*;

    #[test]
    fn test_fly() {
        assert_eq!(decode_fly(&[4, 120]), GestureEvent::new(Gesture::FlyUpDown, Some(120)));
        assert_eq!(decode_fly(&[1, 0]), GestureEvent::new(Gesture::FlyRight, None));
        assert_eq!(decode_fly(&[0, 7]), GestureEvent::new(Gesture::FlyLeft, None));
        assert_eq!(decode_fly(&[3, 7]).gesture, Gesture::FlyTowards);
    }

    #[test]
    fn test_fly_unknown_direction_is_fly_right() {
        assert_eq!(decode_fly(&[5, 99]), GestureEvent::new(Gesture::FlyRight, None));
        assert_eq!(decode_fly(&[255, 0]).gesture, Gesture::FlyRight);
        assert_eq!(decode_fly(&[]).gesture, Gesture::FlyLeft);
    }

    #[test]
    fn test_fly_is_total() {
        for direction in 0..=255u8 {
            for speed in [0u8, 1, 128, 255] {
                let event = decode_fly(&[direction, speed]);
                assert_eq!(event.value.is_some(), event.gesture == Gesture::FlyUpDown);
            }
        }
    }

    #[test]
    fn test_touch_swipes() {
        assert_eq!(decode_touch(&[2]), GestureEvent::new(Gesture::SwipeUp, None));
        assert_eq!(decode_touch(&[0]).gesture, Gesture::SwipeLeft);
        assert_eq!(decode_touch(&[1]).gesture, Gesture::SwipeRight);
        assert_eq!(decode_touch(&[3]).gesture, Gesture::SwipeDown);
        assert_eq!(decode_touch(&[4]).gesture, Gesture::Undefined);
        assert_eq!(decode_touch(&[]).gesture, Gesture::Undefined);
        assert_eq!(decode_touch(&[1, 2, 3]).gesture, Gesture::Undefined);
    }

    #[test]
    fn test_legacy_touch() {
        // bit 2 -> top area
        assert_eq!(decode_touch(&[0b0000_0100, 0, 1, 0]).gesture, Gesture::TouchTopDown);
        assert_eq!(decode_touch(&[0b0000_0100, 0, 2, 0]).gesture, Gesture::TouchTopRelease);
        assert_eq!(decode_touch(&[0b0000_0100, 0, 4, 0]).gesture, Gesture::SwipeUp);
        // bit 7 -> bottom area
        assert_eq!(decode_touch(&[0b1000_0000, 0, 1, 0]).gesture, Gesture::TouchBottomDown);
        // double touch events are not reported
        assert_eq!(decode_touch(&[0b0000_0001, 0, 3, 0]).gesture, Gesture::Undefined);
        assert_eq!(decode_touch(&[0, 0, 1, 0]).gesture, Gesture::Undefined);
        // first set bit wins
        assert_eq!(decode_touch(&[0b0001_0010, 0, 4, 0]).gesture, Gesture::SwipeLeft);
        assert_eq!(decode_touch(&[0b0000_0100, 0, 1, 0]).value, None);
    }

    #[test]
    fn test_touch_is_total() {
        for byte in 0..=255u8 {
            let event = decode_touch(&[byte]);
            assert_eq!(event, decode_touch(&[byte]));
            assert_eq!(event.value, None);
            assert_eq!(event.gesture == Gesture::Undefined, byte > 3);
        }

        let downs = [Gesture::TouchLeftDown, Gesture::TouchTopDown, Gesture::TouchRightDown, Gesture::TouchBottomDown];
        for low in 0..=255u8 {
            for high in [0u8, 0x01, 0x80, 0xff] {
                for code in [0i16, 1, 2, 3, 4, 5, 8, 0x100, 0x401, -1, i16::MIN] {
                    let [code_low, code_high] = code.to_le_bytes();
                    let data = [low, high, code_low, code_high];
                    let event = decode_touch(&data);
                    assert_eq!(event, decode_touch(&data));
                    assert_eq!(event.value, None);

                    // only the low byte of the mask names touch areas
                    if low == 0 || ![1, 2, 4].contains(&code) {
                        assert_eq!(event.gesture, Gesture::Undefined, "{:?}", data);
                    }
                    if low != 0 && code == 1 {
                        assert_eq!(event.gesture, downs[low.trailing_zeros() as usize / 2], "{:?}", data);
                    }
                }
            }
        }
    }

    #[test]
    fn test_rotation() {
        let bytes = (-200i16).to_le_bytes();
        assert_eq!(decode_rotation(&bytes), GestureEvent::new(Gesture::Rotate, Some(-200)));
        assert_eq!(decode_rotation(&[0x10, 0x00]).value, Some(16));
    }

    #[test]
    fn test_button() {
        assert_eq!(decode_button(&[1]), GestureEvent::new(Gesture::ButtonPress, Some(1)));
        assert_eq!(decode_button(&[0]), GestureEvent::new(Gesture::ButtonRelease, Some(0)));
        assert_eq!(decode_button(&[2]).gesture, Gesture::ButtonRelease);
    }

    #[test]
    #[should_panic]
    fn test_rotation_rejects_short_buffer() {
        decode_rotation(&[1]);
    }

    #[test]
    fn test_notification_dispatch() {
        assert_eq!(
            decode_notification(&make_battery_uuid(), &[87]),
            Some(DeviceEvent::BatteryLevel(87))
        );
        assert_eq!(
            decode_notification(&make_firmware_version_uuid(), b"2.5.0"),
            Some(DeviceEvent::FirmwareVersion("2.5.0".to_string()))
        );
        assert_eq!(decode_notification(&make_firmware_version_uuid(), &[0xFF, 0xFE]), None);
        assert_eq!(
            decode_notification(&make_sensor_touch_uuid(), &[2]),
            Some(DeviceEvent::Gesture(GestureEvent::new(Gesture::SwipeUp, None)))
        );
        assert_eq!(decode_notification(&make_sensor_rotation_uuid(), &[1]), None);
        assert_eq!(decode_notification(&make_sensor_button_uuid(), &[]), None);
        assert_eq!(decode_notification(&Uuid::nil(), &[1, 2]), None);
    }
}
