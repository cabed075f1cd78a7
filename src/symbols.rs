//! Symbol lookup for operand rendering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Lookup of names for operand values.
///
/// Symbols are a presentation concern only; nothing that classifies memory
/// consults them.
pub trait SymbolProvider {
    /// Name for `value` when rendered at `width` bytes.
    fn get_symbol(&self, value: u64, width: u8) -> Option<&str>;

    fn has_symbol(&self, value: u64, width: u8) -> bool {
        self.get_symbol(value, width).is_some()
    }
}

/// Provider with no symbols at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl SymbolProvider for NoSymbols {
    fn get_symbol(&self, _value: u64, _width: u8) -> Option<&str> {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SymbolEntry {
    value: u64,
    width: u8,
    name: String,
}

/// Symbol table keyed by `(value, width)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SymbolEntry>", into = "Vec<SymbolEntry>")]
pub struct SymbolTable {
    entries: BTreeMap<(u64, u8), String>,
}

impl From<Vec<SymbolEntry>> for SymbolTable {
    fn from(entries: Vec<SymbolEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .map(|e| ((e.value, e.width), e.name))
                .collect(),
        }
    }
}

impl From<SymbolTable> for Vec<SymbolEntry> {
    fn from(table: SymbolTable) -> Self {
        table
            .entries
            .into_iter()
            .map(|((value, width), name)| SymbolEntry { value, width, name })
            .collect()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a symbol.
    pub fn add(&mut self, value: u64, width: u8, name: impl Into<String>) {
        self.entries.insert((value, width), name.into());
    }

    pub fn remove(&mut self, value: u64, width: u8) -> Option<String> {
        self.entries.remove(&(value, width))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate `(value, width, name)` in value order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u8, &str)> {
        self.entries
            .iter()
            .map(|(&(value, width), name)| (value, width, name.as_str()))
    }

    /// Merge another table into this one; entries in `other` win.
    pub fn extend(&mut self, other: SymbolTable) {
        self.entries.extend(other.entries);
    }

    /// SNES PPU, CPU and DMA register names, as absolute (two-byte) operands.
    pub fn snes_registers() -> Self {
        const PPU: [&str; 0x34] = [
            "INIDISP", "OBSEL", "OAMADDL", "OAMADDH", "OAMDATA", "BGMODE", "MOSAIC", "BG1SC",
            "BG2SC", "BG3SC", "BG4SC", "BG12NBA", "BG34NBA", "BG1HOFS", "BG1VOFS", "BG2HOFS",
            "BG2VOFS", "BG3HOFS", "BG3VOFS", "BG4HOFS", "BG4VOFS", "VMAIN", "VMADDL", "VMADDH",
            "VMDATAL", "VMDATAH", "M7SEL", "M7A", "M7B", "M7C", "M7D", "M7X", "M7Y", "CGADD",
            "CGDATA", "W12SEL", "W34SEL", "WOBJSEL", "WH0", "WH1", "WH2", "WH3", "WBGLOG",
            "WOBJLOG", "TM", "TS", "TMW", "TSW", "CGWSEL", "CGADSUB", "COLDATA", "SETINI",
        ];
        const CPU: [(u64, &str); 21] = [
            (0x2140, "APUIO0"),
            (0x2141, "APUIO1"),
            (0x2142, "APUIO2"),
            (0x2143, "APUIO3"),
            (0x2180, "WMDATA"),
            (0x2181, "WMADDL"),
            (0x2182, "WMADDM"),
            (0x2183, "WMADDH"),
            (0x4200, "NMITIMEN"),
            (0x4201, "WRIO"),
            (0x4202, "WRMPYA"),
            (0x4203, "WRMPYB"),
            (0x4204, "WRDIVL"),
            (0x4205, "WRDIVH"),
            (0x4206, "WRDIVB"),
            (0x420B, "MDMAEN"),
            (0x420C, "HDMAEN"),
            (0x420D, "MEMSEL"),
            (0x4210, "RDNMI"),
            (0x4211, "TIMEUP"),
            (0x4212, "HVBJOY"),
        ];
        const DMA: [(u64, &str); 8] = [
            (0x0, "DMAP"),
            (0x1, "BBAD"),
            (0x2, "A1TL"),
            (0x3, "A1TH"),
            (0x4, "A1B"),
            (0x5, "DASL"),
            (0x6, "DASH"),
            (0xA, "NLTR"),
        ];

        let mut table = Self::new();
        for (i, name) in PPU.iter().enumerate() {
            table.add(0x2100 + i as u64, 2, *name);
        }
        for (address, name) in CPU {
            table.add(address, 2, name);
        }
        for channel in 0..8u64 {
            for (register, name) in DMA {
                table.add(0x4300 + channel * 0x10 + register, 2, format!("{}{}", name, channel));
            }
        }
        table
    }
}

impl SymbolProvider for SymbolTable {
    fn get_symbol(&self, value: u64, width: u8) -> Option<&str> {
        self.entries.get(&(value, width)).map(String::as_str)
    }
}
