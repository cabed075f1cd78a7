//! Decode-affecting processor state

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Address;

/// P register bit for a narrow accumulator/memory (M).
pub const FLAG_M: u8 = 0x20;
/// P register bit for narrow index registers (X).
pub const FLAG_X: u8 = 0x10;

/// Per-architecture state snapshot.
///
/// The set of variants is closed; each decoder owns exactly one of them and
/// treats anything else as "start from scratch".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "arch", rename_all = "snake_case")]
pub enum CpuState {
    /// No decode-affecting state
    Empty,
    /// 65816 emulation/width flags
    W65816(W65816State),
}

impl CpuState {
    /// The 65816 snapshot, if this is one.
    pub fn as_w65816(&self) -> Option<W65816State> {
        match self {
            CpuState::W65816(s) => Some(*s),
            CpuState::Empty => None,
        }
    }
}

impl Default for CpuState {
    fn default() -> Self {
        CpuState::Empty
    }
}

impl fmt::Display for CpuState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuState::Empty => write!(f, "-"),
            CpuState::W65816(s) => write!(f, "{}", s),
        }
    }
}

/// 65816 flags that change instruction length.
///
/// Values are immutable; every transition returns a new snapshot. While in
/// emulation mode both widths are pinned to 8 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "W65816Flags", into = "W65816Flags")]
pub struct W65816State {
    emulation: bool,
    accumulator_8bit: bool,
    index_8bit: bool,
}

#[derive(Serialize, Deserialize)]
struct W65816Flags {
    emulation: bool,
    accumulator_8bit: bool,
    index_8bit: bool,
}

impl From<W65816Flags> for W65816State {
    fn from(f: W65816Flags) -> Self {
        if f.emulation {
            W65816State::new()
        } else {
            W65816State::native(f.accumulator_8bit, f.index_8bit)
        }
    }
}

impl From<W65816State> for W65816Flags {
    fn from(s: W65816State) -> Self {
        W65816Flags {
            emulation: s.emulation,
            accumulator_8bit: s.accumulator_8bit,
            index_8bit: s.index_8bit,
        }
    }
}

impl Default for W65816State {
    fn default() -> Self {
        Self::new()
    }
}

impl W65816State {
    /// Power-on state: emulation mode, 8-bit accumulator and index.
    pub const fn new() -> Self {
        Self {
            emulation: true,
            accumulator_8bit: true,
            index_8bit: true,
        }
    }

    /// Native-mode state with explicit widths.
    pub const fn native(accumulator_8bit: bool, index_8bit: bool) -> Self {
        Self {
            emulation: false,
            accumulator_8bit,
            index_8bit,
        }
    }

    /// Build a snapshot from the E flag and the P register of a live CPU.
    pub fn from_registers(e: u8, p: u8) -> Self {
        if e != 0 {
            Self::new()
        } else {
            Self::native(p & FLAG_M != 0, p & FLAG_X != 0)
        }
    }

    pub fn emulation(&self) -> bool {
        self.emulation
    }

    pub fn accumulator_8bit(&self) -> bool {
        self.accumulator_8bit
    }

    pub fn index_8bit(&self) -> bool {
        self.index_8bit
    }

    /// Switch emulation mode. Any change of mode resets both widths to 8 bits.
    pub fn with_emulation(self, emulation: bool) -> Self {
        if emulation == self.emulation {
            return self;
        }
        Self {
            emulation,
            accumulator_8bit: true,
            index_8bit: true,
        }
    }

    /// REP: clear the M/X bits present in `mask`. No effect in emulation mode.
    pub fn with_rep(self, mask: u8) -> Self {
        if self.emulation {
            return self;
        }
        Self {
            emulation: false,
            accumulator_8bit: self.accumulator_8bit && mask & FLAG_M == 0,
            index_8bit: self.index_8bit && mask & FLAG_X == 0,
        }
    }

    /// SEP: set the M/X bits present in `mask`. No effect in emulation mode.
    pub fn with_sep(self, mask: u8) -> Self {
        if self.emulation {
            return self;
        }
        Self {
            emulation: false,
            accumulator_8bit: self.accumulator_8bit || mask & FLAG_M != 0,
            index_8bit: self.index_8bit || mask & FLAG_X != 0,
        }
    }
}

impl fmt::Display for W65816State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.emulation {
            return write!(f, "E");
        }
        write!(
            f,
            "N{}{}",
            if self.accumulator_8bit { "m" } else { "M" },
            if self.index_8bit { "x" } else { "X" }
        )
    }
}

/// Register file observed on a live 65816 at one instruction boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegisterSnapshot {
    pub e: u8,
    pub p: u8,
    pub db: u8,
    pub d: u16,
    pub x: u16,
    pub y: u16,
    pub s: u16,
    /// Program bank
    pub pb: u8,
    /// Program counter within the program bank
    pub pc: u16,
}

impl RegisterSnapshot {
    /// Full 24-bit CPU address of the current instruction.
    pub fn address(&self) -> Address {
        ((self.pb as Address) << 16) | self.pc as Address
    }

    /// Decode-affecting state implied by E and P.
    pub fn state(&self) -> W65816State {
        W65816State::from_registers(self.e, self.p)
    }

    /// X as used for addressing (high byte ignored with narrow index).
    pub fn index_x(&self) -> u16 {
        if self.state().index_8bit() {
            self.x & 0xFF
        } else {
            self.x
        }
    }

    /// Y as used for addressing (high byte ignored with narrow index).
    pub fn index_y(&self) -> u16 {
        if self.state().index_8bit() {
            self.y & 0xFF
        } else {
            self.y
        }
    }
}
