//! CPU address to ledger offset translation.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::Address;

/// The two independently classified address spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressSpace {
    /// Cartridge ROM image
    Rom,
    /// Work RAM
    Ram,
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressSpace::Rom => write!(f, "ROM"),
            AddressSpace::Ram => write!(f, "RAM"),
        }
    }
}

/// Maps a CPU-visible address to `(offset, space)`.
pub trait AddressTranslator: Send {
    fn name(&self) -> &'static str;

    /// `None` for addresses that are not backed by either space (hardware
    /// registers, open bus, expansion chips).
    fn map(&self, address: Address) -> Option<(Address, AddressSpace)>;
}

/// Mode 20 ("LoROM") cartridge layout.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoRomTranslator;

impl LoRomTranslator {
    /// ROM offset of the emulation-mode reset vector.
    pub const RESET_VECTOR: usize = 0x7FFC;

    /// Emulation-mode reset vector, as a bank $00 CPU address.
    pub fn reset_vector(rom: &[u8]) -> Option<Address> {
        let lo = *rom.get(Self::RESET_VECTOR)?;
        let hi = *rom.get(Self::RESET_VECTOR + 1)?;
        Some(u16::from_le_bytes([lo, hi]) as Address)
    }
}

impl AddressTranslator for LoRomTranslator {
    fn name(&self) -> &'static str {
        "lorom"
    }

    fn map(&self, address: Address) -> Option<(Address, AddressSpace)> {
        if address > 0xFF_FFFF {
            return None;
        }
        let bank = address >> 16;
        let offset = address & 0xFFFF;
        match bank {
            0x7E | 0x7F => Some((((bank - 0x7E) << 16) | offset, AddressSpace::Ram)),
            _ if offset >= 0x8000 => {
                Some((((bank & 0x7F) << 15) | (offset & 0x7FFF), AddressSpace::Rom))
            }
            0x00..=0x3F | 0x80..=0xBF if offset < 0x2000 => Some((offset, AddressSpace::Ram)),
            _ => None,
        }
    }
}

/// CPU address equals ROM offset. Useful for raw binaries and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityTranslator;

impl AddressTranslator for IdentityTranslator {
    fn name(&self) -> &'static str {
        "identity"
    }

    fn map(&self, address: Address) -> Option<(Address, AddressSpace)> {
        Some((address, AddressSpace::Rom))
    }
}

/// Configurable choice of translator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingMode {
    #[default]
    #[serde(rename = "lorom")]
    #[value(name = "lorom")]
    LoRom,
    Identity,
}

impl MappingMode {
    pub fn translator(&self) -> Box<dyn AddressTranslator> {
        match self {
            MappingMode::LoRom => Box::new(LoRomTranslator),
            MappingMode::Identity => Box::new(IdentityTranslator),
        }
    }
}

impl fmt::Display for MappingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MappingMode::LoRom => write!(f, "LoROM"),
            MappingMode::Identity => write!(f, "identity"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x008000, Some((0x0000, AddressSpace::Rom)))]
    #[case(0x00FFFC, Some((0x7FFC, AddressSpace::Rom)))]
    #[case(0x018000, Some((0x8000, AddressSpace::Rom)))]
    #[case(0x808000, Some((0x0000, AddressSpace::Rom)))]
    #[case(0xFFFFFF, Some((0x3FFFFF, AddressSpace::Rom)))]
    #[case(0x001234, Some((0x1234, AddressSpace::Ram)))]
    #[case(0x801FFF, Some((0x1FFF, AddressSpace::Ram)))]
    #[case(0x7E0000, Some((0x00000, AddressSpace::Ram)))]
    #[case(0x7FFFFF, Some((0x1FFFF, AddressSpace::Ram)))]
    #[case(0x002100, None)]
    #[case(0x004200, None)]
    #[case(0x400000, None)]
    #[case(0x1000000, None)]
    fn test_lorom_map(#[case] address: Address, #[case] expected: Option<(Address, AddressSpace)>) {
        assert_eq!(LoRomTranslator.map(address), expected);
    }

    #[test]
    fn test_reset_vector() {
        let mut rom = vec![0u8; 0x8000];
        rom[0x7FFC] = 0x34;
        rom[0x7FFD] = 0x82;
        assert_eq!(LoRomTranslator::reset_vector(&rom), Some(0x8234));
        assert_eq!(LoRomTranslator::reset_vector(&rom[..0x100]), None);
    }

    #[test]
    fn test_identity() {
        assert_eq!(IdentityTranslator.map(0x1234), Some((0x1234, AddressSpace::Rom)));
        assert_eq!(MappingMode::Identity.translator().name(), "identity");
        assert_eq!(MappingMode::default().translator().name(), "lorom");
    }
}
