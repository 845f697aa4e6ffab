//! Device command encoding.
//!
//! The scope firmware has no dedicated command channel: settings and register
//! sub-commands are multiplexed onto the generic control channels. Plain
//! settings are written as scaled 0..1 values; everything else is tagged with
//! a reserved negative sentinel code that tells the firmware how to interpret
//! the following writes.
//!
//! Register writes wider than one byte are split across paired value slots
//! carrying the high and low halves. The register map itself is
//! firmware-specific and out of scope here; this module's contract is only
//! that command records encode and decode deterministically and symmetrically.

use crate::device::ControlChannel;
use thiserror::Error;

/// Sentinel written to the command channel at connect time to initialize the
/// sensor (enables FPS, gain and exposure handling in the firmware).
pub const INIT_SENSOR: i32 = -1;

/// Sentinel selecting an I2C register write.
pub const PROTOCOL_I2C: i32 = -2;
/// Sentinel selecting an SPI register write.
pub const PROTOCOL_SPI: i32 = -3;

/// Value slot for bits 15..8 of a register value.
pub const VALUE_H: i32 = -5;
/// Value slot for bits 7..0 of a register value.
pub const VALUE_L: i32 = -6;
/// Value slot for bits 23..16 of a 24-bit register value.
pub const VALUE_H16: i32 = -7;
/// Reserved slot for the top byte of a future 32-bit split.
pub const VALUE_H24: i32 = -8;
/// Value slot for bits 15..8 of the second register value of a paired write.
pub const VALUE2_H: i32 = -9;
/// Value slot for bits 7..0 of the second register value of a paired write.
pub const VALUE2_L: i32 = -10;
/// Error marker reported by the firmware on a malformed command.
pub const COMMAND_ERROR: i32 = -20;

/// Status bit on the command channel that arms recording externally.
///
/// The firmware does not publish its bit assignment; bit 0 is used here and
/// is the only bit this library inspects.
pub const TRIG_RECORD_EXT: i64 = 0x01;

/// Register bus selected by a sentinel code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterProtocol {
    /// I2C sub-command.
    I2c,
    /// SPI sub-command.
    Spi,
}

impl RegisterProtocol {
    fn code(self) -> i32 {
        match self {
            RegisterProtocol::I2c => PROTOCOL_I2C,
            RegisterProtocol::Spi => PROTOCOL_SPI,
        }
    }

    fn from_code(code: i32) -> Option<Self> {
        match code {
            PROTOCOL_I2C => Some(RegisterProtocol::I2c),
            PROTOCOL_SPI => Some(RegisterProtocol::Spi),
            _ => None,
        }
    }
}

/// Width of a register value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterWidth {
    /// Single byte.
    Bits8,
    /// Two bytes, split high/low.
    Bits16,
    /// Three bytes, split high16/high/low.
    Bits24,
}

impl RegisterWidth {
    /// Largest value representable at this width.
    pub fn max_value(self) -> u32 {
        match self {
            RegisterWidth::Bits8 => 0xFF,
            RegisterWidth::Bits16 => 0xFFFF,
            RegisterWidth::Bits24 => 0xFF_FFFF,
        }
    }
}

/// A single sentinel-tagged write on the command channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireWord {
    /// Sentinel code selecting the slot this word fills.
    pub tag: i32,
    /// Payload byte (low 8 bits are significant).
    pub value: u8,
}

/// A decoded device command.
///
/// A tagged record rather than raw magic constants, so callers cannot mix
/// slots up; the wire encoding is unchanged for firmware compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Initialize the sensor. Issued once at connect time.
    InitSensor,
    /// Register write on the selected bus.
    RegisterWrite {
        /// Bus carrying the write.
        protocol: RegisterProtocol,
        /// Value width on the wire.
        width: RegisterWidth,
        /// Register value (must fit `width`).
        value: u32,
    },
}

/// Command encode/decode failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    /// Register value does not fit the declared width.
    #[error("register value {value:#x} exceeds {width:?}")]
    ValueOutOfRange {
        /// Offending value.
        value: u32,
        /// Declared width.
        width: RegisterWidth,
    },
    /// Wire sequence does not form a known command.
    #[error("malformed command sequence at word {position}")]
    Malformed {
        /// Index of the offending wire word.
        position: usize,
    },
    /// The firmware reported a command error.
    #[error("device reported command error")]
    DeviceError,
}

impl DeviceCommand {
    /// Encode this command into its sentinel-tagged wire words.
    pub fn encode(&self) -> Result<Vec<WireWord>, CommandError> {
        match *self {
            DeviceCommand::InitSensor => Ok(vec![WireWord {
                tag: INIT_SENSOR,
                value: 0,
            }]),
            DeviceCommand::RegisterWrite {
                protocol,
                width,
                value,
            } => {
                if value > width.max_value() {
                    return Err(CommandError::ValueOutOfRange { value, width });
                }
                let mut words = vec![WireWord {
                    tag: protocol.code(),
                    value: 0,
                }];
                match width {
                    RegisterWidth::Bits8 => {
                        words.push(WireWord {
                            tag: VALUE_L,
                            value: value as u8,
                        });
                    }
                    RegisterWidth::Bits16 => {
                        words.push(WireWord {
                            tag: VALUE_H,
                            value: (value >> 8) as u8,
                        });
                        words.push(WireWord {
                            tag: VALUE_L,
                            value: value as u8,
                        });
                    }
                    RegisterWidth::Bits24 => {
                        words.push(WireWord {
                            tag: VALUE_H16,
                            value: (value >> 16) as u8,
                        });
                        words.push(WireWord {
                            tag: VALUE_H,
                            value: (value >> 8) as u8,
                        });
                        words.push(WireWord {
                            tag: VALUE_L,
                            value: value as u8,
                        });
                    }
                }
                Ok(words)
            }
        }
    }

    /// Decode a sentinel-tagged wire sequence back into a command.
    ///
    /// The inverse of [`DeviceCommand::encode`]: any encoded sequence decodes
    /// to the original command.
    pub fn decode(words: &[WireWord]) -> Result<Self, CommandError> {
        let first = words.first().ok_or(CommandError::Malformed { position: 0 })?;

        if first.tag == COMMAND_ERROR {
            return Err(CommandError::DeviceError);
        }
        if first.tag == INIT_SENSOR {
            return if words.len() == 1 {
                Ok(DeviceCommand::InitSensor)
            } else {
                Err(CommandError::Malformed { position: 1 })
            };
        }

        let protocol = RegisterProtocol::from_code(first.tag)
            .ok_or(CommandError::Malformed { position: 0 })?;

        let expected_tags: (&[i32], RegisterWidth) = match words.len() {
            2 => (&[VALUE_L], RegisterWidth::Bits8),
            3 => (&[VALUE_H, VALUE_L], RegisterWidth::Bits16),
            4 => (&[VALUE_H16, VALUE_H, VALUE_L], RegisterWidth::Bits24),
            n => {
                return Err(CommandError::Malformed {
                    position: n.saturating_sub(1),
                })
            }
        };

        let mut value: u32 = 0;
        for (i, (word, &tag)) in words[1..].iter().zip(expected_tags.0).enumerate() {
            if word.tag != tag {
                return Err(CommandError::Malformed { position: i + 1 });
            }
            value = (value << 8) | u32::from(word.value);
        }

        Ok(DeviceCommand::RegisterWrite {
            protocol,
            width: expected_tags.1,
            value,
        })
    }
}

/// Wire value for an exposure setting on the operator 0-100 scale.
pub fn exposure_control_value(exposure: u8) -> f64 {
    f64::from(exposure.min(100)) / 100.0
}

/// Wire value for a gain setting on the operator 0-100 scale.
pub fn gain_control_value(gain: u8) -> f64 {
    f64::from(gain.min(100)) / 100.0
}

/// Wire value for the excitation LED power on the operator 0-100 scale.
///
/// The LED reaches full brightness at half of the channel's range, so the
/// delivered value is capped at half scale (100 maps to 0.5).
pub fn led_control_value(excitation: u8) -> f64 {
    f64::from(excitation.min(100)) / 2.0 / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_sensor_roundtrip() {
        let cmd = DeviceCommand::InitSensor;
        let words = cmd.encode().unwrap();
        assert_eq!(words, vec![WireWord { tag: INIT_SENSOR, value: 0 }]);
        assert_eq!(DeviceCommand::decode(&words).unwrap(), cmd);
    }

    #[test]
    fn test_register_write_8bit_roundtrip() {
        let cmd = DeviceCommand::RegisterWrite {
            protocol: RegisterProtocol::I2c,
            width: RegisterWidth::Bits8,
            value: 0xAB,
        };
        let words = cmd.encode().unwrap();
        assert_eq!(words[0].tag, PROTOCOL_I2C);
        assert_eq!(words[1], WireWord { tag: VALUE_L, value: 0xAB });
        assert_eq!(DeviceCommand::decode(&words).unwrap(), cmd);
    }

    #[test]
    fn test_register_write_16bit_split() {
        let cmd = DeviceCommand::RegisterWrite {
            protocol: RegisterProtocol::Spi,
            width: RegisterWidth::Bits16,
            value: 0x12_34,
        };
        let words = cmd.encode().unwrap();
        assert_eq!(words[0].tag, PROTOCOL_SPI);
        assert_eq!(words[1], WireWord { tag: VALUE_H, value: 0x12 });
        assert_eq!(words[2], WireWord { tag: VALUE_L, value: 0x34 });
        assert_eq!(DeviceCommand::decode(&words).unwrap(), cmd);
    }

    #[test]
    fn test_register_write_24bit_split() {
        let cmd = DeviceCommand::RegisterWrite {
            protocol: RegisterProtocol::I2c,
            width: RegisterWidth::Bits24,
            value: 0xAA_BB_CC,
        };
        let words = cmd.encode().unwrap();
        let tags: Vec<i32> = words.iter().map(|w| w.tag).collect();
        assert_eq!(tags, vec![PROTOCOL_I2C, VALUE_H16, VALUE_H, VALUE_L]);
        let bytes: Vec<u8> = words[1..].iter().map(|w| w.value).collect();
        assert_eq!(bytes, vec![0xAA, 0xBB, 0xCC]);
        assert_eq!(DeviceCommand::decode(&words).unwrap(), cmd);
    }

    #[test]
    fn test_value_out_of_range_rejected() {
        let cmd = DeviceCommand::RegisterWrite {
            protocol: RegisterProtocol::I2c,
            width: RegisterWidth::Bits8,
            value: 0x100,
        };
        assert_eq!(
            cmd.encode(),
            Err(CommandError::ValueOutOfRange {
                value: 0x100,
                width: RegisterWidth::Bits8
            })
        );
    }

    #[test]
    fn test_decode_rejects_shuffled_slots() {
        let words = vec![
            WireWord { tag: PROTOCOL_I2C, value: 0 },
            WireWord { tag: VALUE_L, value: 0x34 },
            WireWord { tag: VALUE_H, value: 0x12 },
        ];
        assert_eq!(
            DeviceCommand::decode(&words),
            Err(CommandError::Malformed { position: 1 })
        );
    }

    #[test]
    fn test_decode_surfaces_device_error() {
        let words = vec![WireWord { tag: COMMAND_ERROR, value: 0 }];
        assert_eq!(DeviceCommand::decode(&words), Err(CommandError::DeviceError));
    }

    #[test]
    fn test_led_half_scale_mapping() {
        assert_eq!(led_control_value(100), 0.5);
        assert_eq!(led_control_value(0), 0.0);
        assert_eq!(led_control_value(50), 0.25);
        // Over-range values are sanitized before scaling.
        assert_eq!(led_control_value(255), 0.5);
    }

    #[test]
    fn test_setting_scales() {
        assert_eq!(exposure_control_value(100), 1.0);
        assert_eq!(exposure_control_value(1), 0.01);
        assert_eq!(gain_control_value(32), 0.32);
    }
}
