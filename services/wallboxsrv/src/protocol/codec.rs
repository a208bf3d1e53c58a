//! Register word decoding and scaling
//!
//! Whole-number factors (×100 W) use integer arithmetic. Tenth factors divide
//! by 10.0 instead of multiplying by 0.1 so that a raw 15 reads as exactly 1.5.

use crate::error::{Result, StationError};

/// Watts from a register in 100 W units
pub fn hundred_watts(raw: u16) -> u32 {
    u32::from(raw) * 100
}

/// Register value in 100 W units, truncating and saturating
pub fn watts_to_register(watts: u32) -> u16 {
    u16::try_from(watts / 100).unwrap_or(u16::MAX)
}

/// Physical value from a register in 0.1 units (A, kWh)
pub fn tenths(raw: u16) -> f64 {
    f64::from(raw) / 10.0
}

/// Nearest raw register value for a quantity in 0.1 units
pub fn to_tenths(value: f64) -> u16 {
    (value * 10.0).round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// 32-bit value from two registers, high word first
pub fn u32_from_words(high: u16, low: u16) -> u32 {
    (u32::from(high) << 16) | u32::from(low)
}

/// Firmware version from the two firmware registers
///
/// First register: patch in the high byte. Second register: major in the
/// high byte, minor in the low byte.
pub fn decode_firmware(regs: &[u16]) -> Result<String> {
    let [first, second] = regs else {
        return Err(StationError::decode(format!(
            "Firmware needs 2 registers, got {}",
            regs.len()
        )));
    };
    let patch = first >> 8;
    let major = second >> 8;
    let minor = second & 0xFF;
    Ok(format!("{}.{}.{}", major, minor, patch))
}

/// ASCII string from big-endian packed registers
///
/// Trailing NUL bytes and whitespace are trimmed. An all-empty field decodes
/// to `None`; non-ASCII content is a decode failure.
pub fn decode_ascii(regs: &[u16]) -> Result<Option<String>> {
    let bytes: Vec<u8> = regs.iter().flat_map(|word| word.to_be_bytes()).collect();
    if let Some(bad) = bytes.iter().find(|b| !b.is_ascii()) {
        return Err(StationError::decode(format!(
            "Non-ASCII byte 0x{:02X} in string field",
            bad
        )));
    }
    let text: String = bytes.iter().map(|&b| char::from(b)).collect();
    let trimmed = text.trim_end_matches(|c: char| c == '\0' || c.is_whitespace());
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

/// Pack an ASCII string into `count` registers, NUL padded
pub fn encode_ascii(text: &str, count: usize) -> Vec<u16> {
    let mut bytes: Vec<u8> = text.bytes().take(count * 2).collect();
    bytes.resize(count * 2, 0);
    bytes
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect()
}

/// Registers returned by one block read, addressable by absolute address
#[derive(Debug, Clone)]
pub struct RegisterWindow {
    start: u16,
    words: Vec<u16>,
}

impl RegisterWindow {
    /// Wrap a read result, rejecting a short response
    pub fn new(start: u16, expected: u16, words: Vec<u16>) -> Result<Self> {
        if words.len() < usize::from(expected) {
            return Err(StationError::decode(format!(
                "Block at 0x{:04X}: expected {} registers, got {}",
                start,
                expected,
                words.len()
            )));
        }
        Ok(Self { start, words })
    }

    /// Word at an absolute register address
    pub fn word(&self, address: u16) -> Option<u16> {
        let index = address.checked_sub(self.start)?;
        self.words.get(usize::from(index)).copied()
    }

    /// Word at `base + offset`
    pub fn at(&self, base: u16, offset: u16) -> Option<u16> {
        self.word(base.checked_add(offset)?)
    }

    pub fn words(&self) -> &[u16] {
        &self.words
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_firmware_decode() {
        assert_eq!(decode_firmware(&[0x0500, 0x0102]).unwrap(), "1.2.5");
        assert_eq!(decode_firmware(&[0x0000, 0x0A14]).unwrap(), "10.20.0");
        assert!(decode_firmware(&[0x0500]).is_err());
    }

    #[test]
    fn test_ascii_decode_strips_trailing_nul() {
        let mut regs = vec![0x4142, 0x4344];
        regs.extend([0u16; 14]);
        assert_eq!(decode_ascii(&regs).unwrap().as_deref(), Some("ABCD"));
    }

    #[test]
    fn test_ascii_decode_odd_length_and_spaces() {
        // "ABC" followed by a NUL byte in the low half, then spaces
        let regs = [0x4142, 0x4300, 0x2020];
        assert_eq!(decode_ascii(&regs).unwrap().as_deref(), Some("ABC"));
        assert_eq!(decode_ascii(&[0, 0, 0]).unwrap(), None);
        assert!(decode_ascii(&[0xC3A9]).is_err());
    }

    #[test]
    fn test_ascii_encode_pads() {
        let regs = encode_ascii("SN-1", 4);
        assert_eq!(regs, vec![0x534E, 0x2D31, 0, 0]);
        assert_eq!(decode_ascii(&regs).unwrap().as_deref(), Some("SN-1"));
    }

    #[test]
    fn test_exact_tenths() {
        assert_eq!(tenths(15), 1.5);
        assert_eq!(tenths(3), 0.3);
        assert_eq!(tenths(160), 16.0);
        assert_eq!(tenths(123).to_string(), "12.3");
        assert_eq!(to_tenths(1.5), 15);
        assert_eq!(to_tenths(0.3), 3);
    }

    #[test]
    fn test_hundred_watt_units() {
        assert_eq!(hundred_watts(110), 11_000);
        assert_eq!(watts_to_register(11_000), 110);
        assert_eq!(watts_to_register(1_399), 13);
        assert_eq!(watts_to_register(u32::MAX), u16::MAX);
    }

    #[test]
    fn test_u32_from_words() {
        assert_eq!(u32_from_words(0x0001, 0x0002), 0x0001_0002);
        assert_eq!(u32_from_words(0, 3600), 3600);
    }

    #[test]
    fn test_register_window() {
        let window = RegisterWindow::new(0x0101, 3, vec![7, 8, 9]).unwrap();
        assert_eq!(window.word(0x0101), Some(7));
        assert_eq!(window.at(0x0100, 3), Some(9));
        assert_eq!(window.word(0x0100), None);
        assert_eq!(window.word(0x0104), None);
        assert!(RegisterWindow::new(0x0101, 8, vec![1, 2]).is_err());
    }
}
