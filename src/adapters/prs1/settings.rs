//! Therapy settings block carried by the "Equipment On" summary record.
//!
//! The block is 24 bytes:
//!
//! | Byte | Meaning |
//! |---|---|
//! | 0 | operating mode code |
//! | 1, 2 | min / max pressure, 0.1 cmH2O |
//! | 3, 4 | min / max pressure support, 0.1 cmH2O |
//! | 5 | ramp time, minutes |
//! | 6 | ramp start pressure, 0.1 cmH2O |
//! | 7 | [`FlexSettings`] |
//! | 8, 9 | [`HumidifierSettings`] |
//! | 10 | [`SystemFlags`] |
//! | 11 | [`DisplayFlags`] |
//! | 12..24 | reserved |

use serde::{Deserialize, Serialize};

use super::cursor::ByteCursor;
use crate::error::{ImportError, ProtocolError};
use crate::types::SessionSettings;

pub const SETTINGS_BLOCK_LEN: usize = 24;

/// Pressure values are stored in tenths of cmH2O
const PRESSURE_SCALE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Cpap,
    AutoCpap,
    Bilevel,
    AutoBilevel,
    CpapCheck,
    AutoTrial,
}

impl OperatingMode {
    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        match code {
            0x00 => Ok(OperatingMode::Cpap),
            0x01 => Ok(OperatingMode::AutoCpap),
            0x02 => Ok(OperatingMode::Bilevel),
            0x03 => Ok(OperatingMode::AutoBilevel),
            0x04 => Ok(OperatingMode::CpapCheck),
            0x05 => Ok(OperatingMode::AutoTrial),
            other => Err(ProtocolError::UnknownMode(other)),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Cpap => "CPAP",
            OperatingMode::AutoCpap => "Auto-CPAP",
            OperatingMode::Bilevel => "Bi-Level",
            OperatingMode::AutoBilevel => "Auto Bi-Level",
            OperatingMode::CpapCheck => "CPAP-Check",
            OperatingMode::AutoTrial => "Auto-Trial",
        }
    }

    pub fn is_bilevel(&self) -> bool {
        matches!(self, OperatingMode::Bilevel | OperatingMode::AutoBilevel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlexMode {
    None,
    CFlex,
    CFlexPlus,
    AFlex,
}

/// Byte 7: bits 0-2 flex level, bits 3-4 flex mode, bit 5 flex lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexSettings(pub u8);

impl FlexSettings {
    pub fn level(&self) -> u8 {
        self.0 & 0x07
    }

    pub fn mode(&self) -> FlexMode {
        match (self.0 >> 3) & 0x03 {
            0 => FlexMode::None,
            1 => FlexMode::CFlex,
            2 => FlexMode::CFlexPlus,
            _ => FlexMode::AFlex,
        }
    }

    pub fn locked(&self) -> bool {
        self.0 & 0x20 != 0
    }

    /// Human-readable form, e.g. `"C-Flex+ 2"`
    pub fn describe(&self) -> Option<String> {
        let name = match self.mode() {
            FlexMode::None => return None,
            FlexMode::CFlex => "C-Flex",
            FlexMode::CFlexPlus => "C-Flex+",
            FlexMode::AFlex => "A-Flex",
        };
        Some(format!("{name} {}", self.level()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumidifierMode {
    Fixed,
    Adaptive,
    HeatedTube,
    Passover,
}

/// Bytes 8-9 (and the payload of humidifier change records).
///
/// First byte: bits 0-2 humidity level, bit 3 humidifier connected,
/// bits 4-5 mode, bit 6 heated tube attached.
/// Second byte: bits 0-2 tube temperature level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HumidifierSettings(pub u8, pub u8);

impl HumidifierSettings {
    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self, ImportError> {
        Ok(Self(cursor.read_u8()?, cursor.read_u8()?))
    }

    pub fn level(&self) -> u8 {
        self.0 & 0x07
    }

    pub fn connected(&self) -> bool {
        self.0 & 0x08 != 0
    }

    pub fn mode(&self) -> HumidifierMode {
        match (self.0 >> 4) & 0x03 {
            0 => HumidifierMode::Fixed,
            1 => HumidifierMode::Adaptive,
            2 => HumidifierMode::HeatedTube,
            _ => HumidifierMode::Passover,
        }
    }

    pub fn heated_tube(&self) -> bool {
        self.0 & 0x40 != 0
    }

    pub fn tube_temperature(&self) -> u8 {
        self.1 & 0x07
    }
}

/// Byte 10: bits 0-2 resistance setting (0 = off), bit 3 resistance lock,
/// bit 4 15 mm hose, bit 5 auto-on, bit 6 auto-off, bit 7 mask alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemFlags(pub u8);

impl SystemFlags {
    pub fn resistance(&self) -> Option<u8> {
        match self.0 & 0x07 {
            0 => None,
            level => Some(level),
        }
    }

    pub fn resistance_locked(&self) -> bool {
        self.0 & 0x08 != 0
    }

    /// Hose diameter in millimetres
    pub fn hose_diameter_mm(&self) -> u8 {
        if self.0 & 0x10 != 0 {
            15
        } else {
            22
        }
    }

    pub fn auto_on(&self) -> bool {
        self.0 & 0x20 != 0
    }

    pub fn auto_off(&self) -> bool {
        self.0 & 0x40 != 0
    }

    pub fn mask_alert(&self) -> bool {
        self.0 & 0x80 != 0
    }
}

/// Byte 11: bit 0 shows AHI on the device display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayFlags(pub u8);

impl DisplayFlags {
    pub fn show_ahi(&self) -> bool {
        self.0 & 0x01 != 0
    }
}

/// Decoded settings block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prs1Settings {
    pub mode: OperatingMode,
    pub min_pressure: f64,
    pub max_pressure: f64,
    pub min_pressure_support: f64,
    pub max_pressure_support: f64,
    pub ramp_minutes: u8,
    pub ramp_pressure: f64,
    pub flex: FlexSettings,
    pub humidifier: HumidifierSettings,
    pub system: SystemFlags,
    pub display: DisplayFlags,
}

impl Prs1Settings {
    pub fn decode(cursor: &mut ByteCursor<'_>) -> Result<Self, ImportError> {
        let mut block = cursor.sub_cursor(SETTINGS_BLOCK_LEN)?;

        let mode = OperatingMode::from_code(block.read_u8()?)?;
        let min_pressure = block.read_u8()? as f64 * PRESSURE_SCALE;
        let max_pressure = block.read_u8()? as f64 * PRESSURE_SCALE;
        let min_pressure_support = block.read_u8()? as f64 * PRESSURE_SCALE;
        let max_pressure_support = block.read_u8()? as f64 * PRESSURE_SCALE;
        let ramp_minutes = block.read_u8()?;
        let ramp_pressure = block.read_u8()? as f64 * PRESSURE_SCALE;
        let flex = FlexSettings(block.read_u8()?);
        let humidifier = HumidifierSettings::decode(&mut block)?;
        let system = SystemFlags(block.read_u8()?);
        let display = DisplayFlags(block.read_u8()?);

        Ok(Self {
            mode,
            min_pressure,
            max_pressure,
            min_pressure_support,
            max_pressure_support,
            ramp_minutes,
            ramp_pressure,
            flex,
            humidifier,
            system,
            display,
        })
    }

    /// Family-agnostic view stored on the session
    pub fn to_session_settings(&self) -> SessionSettings {
        let bilevel = self.mode.is_bilevel();
        SessionSettings {
            mode: self.mode.as_str().to_string(),
            min_pressure: self.min_pressure,
            max_pressure: self.max_pressure,
            min_pressure_support: bilevel.then_some(self.min_pressure_support),
            max_pressure_support: bilevel.then_some(self.max_pressure_support),
            ramp_minutes: (self.ramp_minutes > 0).then_some(self.ramp_minutes),
            ramp_pressure: (self.ramp_minutes > 0).then_some(self.ramp_pressure),
            flex: self.flex.describe(),
            humidifier_level: self
                .humidifier
                .connected()
                .then_some(self.humidifier.level()),
        }
    }
}
