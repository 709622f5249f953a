use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Level;

pub const BAUD_RATES: [u32; 11] = [
    300, 600, 1200, 2400, 4800, 9600, 14400, 19200, 38400, 57600, 115_200,
];

pub const DEFAULT_BAUD_RATE: f64 = 9600.0;

/// Fastest rate the link accepts. At ten samples per bit this keeps one host
/// tick under 200 000 simulation steps.
pub const MAX_BAUD: f64 = 1_000_000.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("data bits must be 7 or 8, got {0}")]
    DataBits(u8),
    #[error("stop bits must be 1 or 2, got {0}")]
    StopBits(u8),
    #[error("idle bits must be a finite, non-negative number, got {0}")]
    IdleBits(f64),
    #[error("baud rate must be above 0 and at most 1000000, got {0}")]
    Baud(f64),
    #[error("character {0:?} does not fit in a byte")]
    CharOutOfRange(char),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

impl std::str::FromStr for Parity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "even" | "e" => Ok(Self::Even),
            "odd" | "o" => Ok(Self::Odd),
            other => Err(format!("unknown parity mode: {other}")),
        }
    }
}

/// Byte framing on one side of the link.
///
/// `idle_bits` is the guard time the transmitter keeps the line idle before
/// starting a frame; the receiver ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfig {
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: u8,
    pub idle_bits: f64,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            data_bits: 8,
            parity: Parity::None,
            stop_bits: 1,
            idle_bits: 0.0,
        }
    }
}

/// Partial update of a [`FrameConfig`]. Missing fields keep their value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameConfigPatch {
    pub data_bits: Option<u8>,
    pub parity: Option<Parity>,
    pub stop_bits: Option<u8>,
    pub idle_bits: Option<f64>,
}

impl FrameConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.data_bits, 7 | 8) {
            return Err(ConfigError::DataBits(self.data_bits));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(ConfigError::StopBits(self.stop_bits));
        }
        if !self.idle_bits.is_finite() || self.idle_bits < 0.0 {
            return Err(ConfigError::IdleBits(self.idle_bits));
        }
        Ok(())
    }

    /// Returns a copy with `patch` merged in, or the reason the result is invalid.
    pub fn patched(&self, patch: &FrameConfigPatch) -> Result<Self, ConfigError> {
        let merged = Self {
            data_bits: patch.data_bits.unwrap_or(self.data_bits),
            parity: patch.parity.unwrap_or(self.parity),
            stop_bits: patch.stop_bits.unwrap_or(self.stop_bits),
            idle_bits: patch.idle_bits.unwrap_or(self.idle_bits),
        };
        merged.validate()?;
        Ok(merged)
    }

    pub fn data_mask(&self) -> u8 {
        if self.data_bits >= 8 {
            0xFF
        } else {
            (1u8 << self.data_bits) - 1
        }
    }

    pub fn has_parity(&self) -> bool {
        self.parity != Parity::None
    }

    /// Start bit, data bits, optional parity bit and stop bits.
    pub fn total_bits(&self) -> u32 {
        1 + self.data_bits as u32 + u32::from(self.has_parity()) + self.stop_bits as u32
    }

    /// Parity bit for the low `data_bits` bits of `byte`, `None` when parity is off.
    pub fn parity_bit(&self, byte: u8) -> Option<Level> {
        let ones = (byte & self.data_mask()).count_ones();
        match self.parity {
            Parity::None => None,
            Parity::Even => Some(Level::from_bit((ones % 2) as u8)),
            Parity::Odd => Some(Level::from_bit(((ones + 1) % 2) as u8)),
        }
    }
}

pub fn validate_baud(baud: f64) -> Result<f64, ConfigError> {
    if baud > 0.0 && baud <= MAX_BAUD {
        Ok(baud)
    } else {
        Err(ConfigError::Baud(baud))
    }
}

/// Bytes for each character of `text`, or the first character above 255.
pub fn bytes_of(text: &str) -> Result<Vec<u8>, ConfigError> {
    text.chars()
        .map(|c| u8::try_from(c).map_err(|_| ConfigError::CharOutOfRange(c)))
        .collect()
}

/// Closest entry of [`BAUD_RATES`] to `baud`.
pub fn nearest_standard_baud(baud: f64) -> u32 {
    BAUD_RATES
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (*a as f64 - baud).abs();
            let db = (*b as f64 - baud).abs();
            da.total_cmp(&db)
        })
        .unwrap_or(DEFAULT_BAUD_RATE as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parity_law_holds_for_every_byte() {
        for data_bits in [7u8, 8] {
            let even = FrameConfig { data_bits, parity: Parity::Even, ..Default::default() };
            let odd = FrameConfig { data_bits, parity: Parity::Odd, ..Default::default() };
            for byte in 0..=255u8 {
                let ones = (byte & even.data_mask()).count_ones();
                let expected_even = if ones % 2 == 0 { Level::Low } else { Level::High };
                assert_eq!(even.parity_bit(byte), Some(expected_even), "byte {byte:#04x}");
                let expected_odd = if expected_even == Level::Low { Level::High } else { Level::Low };
                assert_eq!(odd.parity_bit(byte), Some(expected_odd), "byte {byte:#04x}");
            }
        }
    }

    #[test]
    fn no_parity_bit_when_disabled() {
        assert_eq!(FrameConfig::default().parity_bit(0x41), None);
    }

    #[test]
    fn seven_bit_parity_ignores_msb() {
        let cfg = FrameConfig { data_bits: 7, parity: Parity::Even, ..Default::default() };
        assert_eq!(cfg.parity_bit(0x80), Some(Level::Low));
        assert_eq!(cfg.data_mask(), 0x7F);
    }

    #[test]
    fn total_bits_counts_every_field() {
        assert_eq!(FrameConfig::default().total_bits(), 10);
        let cfg = FrameConfig { data_bits: 7, parity: Parity::Odd, stop_bits: 2, idle_bits: 0.0 };
        assert_eq!(cfg.total_bits(), 11);
    }

    #[test]
    fn patch_keeps_unspecified_fields() {
        let base = FrameConfig { idle_bits: 2.0, ..Default::default() };
        let patch = FrameConfigPatch { parity: Some(Parity::Odd), ..Default::default() };
        let merged = base.patched(&patch).unwrap();
        assert_eq!(merged.parity, Parity::Odd);
        assert_eq!(merged.data_bits, 8);
        assert_eq!(merged.idle_bits, 2.0);
    }

    #[test]
    fn patch_rejects_invalid_values() {
        let base = FrameConfig::default();
        let bad_data = FrameConfigPatch { data_bits: Some(9), ..Default::default() };
        assert_eq!(base.patched(&bad_data), Err(ConfigError::DataBits(9)));
        let bad_stop = FrameConfigPatch { stop_bits: Some(0), ..Default::default() };
        assert_eq!(base.patched(&bad_stop), Err(ConfigError::StopBits(0)));
        let bad_idle = FrameConfigPatch { idle_bits: Some(-1.0), ..Default::default() };
        assert!(matches!(base.patched(&bad_idle), Err(ConfigError::IdleBits(_))));
    }

    #[test]
    fn baud_validation() {
        assert_eq!(validate_baud(9600.0), Ok(9600.0));
        assert!(validate_baud(0.0).is_err());
        assert!(validate_baud(f64::NAN).is_err());
        assert!(validate_baud(-300.0).is_err());
        assert!(validate_baud(f64::INFINITY).is_err());
    }

    #[test]
    fn baud_upper_bound() {
        assert_eq!(validate_baud(MAX_BAUD), Ok(MAX_BAUD));
        assert_eq!(validate_baud(MAX_BAUD + 1.0), Err(ConfigError::Baud(MAX_BAUD + 1.0)));
        assert_eq!(validate_baud(1e300), Err(ConfigError::Baud(1e300)));
    }

    #[test]
    fn nearest_standard() {
        assert_eq!(nearest_standard_baud(9000.0), 9600);
        assert_eq!(nearest_standard_baud(1.0), 300);
        assert_eq!(nearest_standard_baud(1e9), 115_200);
    }

    #[test]
    fn bytes_of_keeps_latin1_and_rejects_wider() {
        assert_eq!(bytes_of("Aé"), Ok(vec![0x41, 0xE9]));
        assert_eq!(bytes_of("ok→no"), Err(ConfigError::CharOutOfRange('→')));
        assert_eq!(bytes_of(""), Ok(Vec::new()));
    }

    #[test]
    fn parity_from_str() {
        assert_eq!("Even".parse::<Parity>(), Ok(Parity::Even));
        assert_eq!("n".parse::<Parity>(), Ok(Parity::None));
        assert!("mark".parse::<Parity>().is_err());
    }
}
