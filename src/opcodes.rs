//! 65816 opcode table

use crate::W65816State;

/// Register whose width decides the size of a variable immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Accumulator,
    Index,
}

/// Operand shape of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    /// `#v`, one or two bytes depending on M or X
    Immediate(Register),
    /// `#v`, always one byte (REP, SEP, BRK, COP, WDM)
    ImmediateByte,
    /// PEA pushes its two-byte operand as a constant
    AbsoluteConstant,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    AbsoluteLong,
    AbsoluteLongX,
    /// `(a)`, JMP only
    AbsoluteIndirect,
    /// `(a,X)`, JMP and JSR
    AbsoluteIndexedIndirect,
    /// `[a]`, JML only
    AbsoluteIndirectLong,
    DirectPage,
    DirectPageX,
    DirectPageY,
    DirectPageIndirect,
    DirectPageIndexedIndirect,
    DirectPageIndirectIndexed,
    DirectPageIndirectLong,
    DirectPageIndirectLongIndexed,
    StackRelative,
    StackRelativeIndirectIndexed,
    ProgramCounterRelative,
    ProgramCounterRelativeLong,
    BlockMove,
}

impl AddressingMode {
    /// Encoded length with the narrow form of any variable immediate.
    pub const fn base_length(&self) -> usize {
        use AddressingMode::*;
        match self {
            Implied => 1,
            Immediate(_) | ImmediateByte => 2,
            DirectPage
            | DirectPageX
            | DirectPageY
            | DirectPageIndirect
            | DirectPageIndexedIndirect
            | DirectPageIndirectIndexed
            | DirectPageIndirectLong
            | DirectPageIndirectLongIndexed
            | StackRelative
            | StackRelativeIndirectIndexed
            | ProgramCounterRelative => 2,
            AbsoluteConstant
            | Absolute
            | AbsoluteX
            | AbsoluteY
            | AbsoluteIndirect
            | AbsoluteIndexedIndirect
            | AbsoluteIndirectLong
            | ProgramCounterRelativeLong
            | BlockMove => 3,
            AbsoluteLong | AbsoluteLongX => 4,
        }
    }

    /// Extra immediate byte required under `state`.
    pub fn extra_length(&self, state: W65816State) -> usize {
        let wide = match self {
            AddressingMode::Immediate(Register::Accumulator) => !state.accumulator_8bit(),
            AddressingMode::Immediate(Register::Index) => !state.index_8bit(),
            _ => false,
        };
        usize::from(wide && !state.emulation())
    }
}

/// One opcode table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Opcode {
    pub mnemonic: &'static str,
    pub length: usize,
    pub mode: AddressingMode,
}

impl Opcode {
    /// Length of the instruction under `state`.
    pub fn length_for(&self, state: W65816State) -> usize {
        self.length + self.mode.extra_length(state)
    }
}

const fn op(mnemonic: &'static str, length: usize, mode: AddressingMode) -> Opcode {
    Opcode {
        mnemonic,
        length,
        mode,
    }
}

use AddressingMode::*;
use Register::{Accumulator as Acc, Index as Idx};

/// Every opcode byte, in order.
pub static OPCODES: [Opcode; 256] = [
    // 0x00
    op("BRK", 2, ImmediateByte),
    op("ORA", 2, DirectPageIndexedIndirect),
    op("COP", 2, ImmediateByte),
    op("ORA", 2, StackRelative),
    op("TSB", 2, DirectPage),
    op("ORA", 2, DirectPage),
    op("ASL", 2, DirectPage),
    op("ORA", 2, DirectPageIndirectLong),
    op("PHP", 1, Implied),
    op("ORA", 2, Immediate(Acc)),
    op("ASL", 1, Implied),
    op("PHD", 1, Implied),
    op("TSB", 3, Absolute),
    op("ORA", 3, Absolute),
    op("ASL", 3, Absolute),
    op("ORA", 4, AbsoluteLong),
    // 0x10
    op("BPL", 2, ProgramCounterRelative),
    op("ORA", 2, DirectPageIndirectIndexed),
    op("ORA", 2, DirectPageIndirect),
    op("ORA", 2, StackRelativeIndirectIndexed),
    op("TRB", 2, DirectPage),
    op("ORA", 2, DirectPageX),
    op("ASL", 2, DirectPageX),
    op("ORA", 2, DirectPageIndirectLongIndexed),
    op("CLC", 1, Implied),
    op("ORA", 3, AbsoluteY),
    op("INC", 1, Implied),
    op("TCS", 1, Implied),
    op("TRB", 3, Absolute),
    op("ORA", 3, AbsoluteX),
    op("ASL", 3, AbsoluteX),
    op("ORA", 4, AbsoluteLongX),
    // 0x20
    op("JSR", 3, Absolute),
    op("AND", 2, DirectPageIndexedIndirect),
    op("JSL", 4, AbsoluteLong),
    op("AND", 2, StackRelative),
    op("BIT", 2, DirectPage),
    op("AND", 2, DirectPage),
    op("ROL", 2, DirectPage),
    op("AND", 2, DirectPageIndirectLong),
    op("PLP", 1, Implied),
    op("AND", 2, Immediate(Acc)),
    op("ROL", 1, Implied),
    op("PLD", 1, Implied),
    op("BIT", 3, Absolute),
    op("AND", 3, Absolute),
    op("ROL", 3, Absolute),
    op("AND", 4, AbsoluteLong),
    // 0x30
    op("BMI", 2, ProgramCounterRelative),
    op("AND", 2, DirectPageIndirectIndexed),
    op("AND", 2, DirectPageIndirect),
    op("AND", 2, StackRelativeIndirectIndexed),
    op("BIT", 2, DirectPageX),
    op("AND", 2, DirectPageX),
    op("ROL", 2, DirectPageX),
    op("AND", 2, DirectPageIndirectLongIndexed),
    op("SEC", 1, Implied),
    op("AND", 3, AbsoluteY),
    op("DEC", 1, Implied),
    op("TSC", 1, Implied),
    op("BIT", 3, AbsoluteX),
    op("AND", 3, AbsoluteX),
    op("ROL", 3, AbsoluteX),
    op("AND", 4, AbsoluteLongX),
    // 0x40
    op("RTI", 1, Implied),
    op("EOR", 2, DirectPageIndexedIndirect),
    op("WDM", 2, ImmediateByte),
    op("EOR", 2, StackRelative),
    op("MVP", 3, BlockMove),
    op("EOR", 2, DirectPage),
    op("LSR", 2, DirectPage),
    op("EOR", 2, DirectPageIndirectLong),
    op("PHA", 1, Implied),
    op("EOR", 2, Immediate(Acc)),
    op("LSR", 1, Implied),
    op("PHK", 1, Implied),
    op("JMP", 3, Absolute),
    op("EOR", 3, Absolute),
    op("LSR", 3, Absolute),
    op("EOR", 4, AbsoluteLong),
    // 0x50
    op("BVC", 2, ProgramCounterRelative),
    op("EOR", 2, DirectPageIndirectIndexed),
    op("EOR", 2, DirectPageIndirect),
    op("EOR", 2, StackRelativeIndirectIndexed),
    op("MVN", 3, BlockMove),
    op("EOR", 2, DirectPageX),
    op("LSR", 2, DirectPageX),
    op("EOR", 2, DirectPageIndirectLongIndexed),
    op("CLI", 1, Implied),
    op("EOR", 3, AbsoluteY),
    op("PHY", 1, Implied),
    op("TCD", 1, Implied),
    op("JMP", 4, AbsoluteLong),
    op("EOR", 3, AbsoluteX),
    op("LSR", 3, AbsoluteX),
    op("EOR", 4, AbsoluteLongX),
    // 0x60
    op("RTS", 1, Implied),
    op("ADC", 2, DirectPageIndexedIndirect),
    op("PER", 3, ProgramCounterRelativeLong),
    op("ADC", 2, StackRelative),
    op("STZ", 2, DirectPage),
    op("ADC", 2, DirectPage),
    op("ROR", 2, DirectPage),
    op("ADC", 2, DirectPageIndirectLong),
    op("PLA", 1, Implied),
    op("ADC", 2, Immediate(Acc)),
    op("ROR", 1, Implied),
    op("RTL", 1, Implied),
    op("JMP", 3, AbsoluteIndirect),
    op("ADC", 3, Absolute),
    op("ROR", 3, Absolute),
    op("ADC", 4, AbsoluteLong),
    // 0x70
    op("BVS", 2, ProgramCounterRelative),
    op("ADC", 2, DirectPageIndirectIndexed),
    op("ADC", 2, DirectPageIndirect),
    op("ADC", 2, StackRelativeIndirectIndexed),
    op("STZ", 2, DirectPageX),
    op("ADC", 2, DirectPageX),
    op("ROR", 2, DirectPageX),
    op("ADC", 2, DirectPageIndirectLongIndexed),
    op("SEI", 1, Implied),
    op("ADC", 3, AbsoluteY),
    op("PLY", 1, Implied),
    op("TDC", 1, Implied),
    op("JMP", 3, AbsoluteIndexedIndirect),
    op("ADC", 3, AbsoluteX),
    op("ROR", 3, AbsoluteX),
    op("ADC", 4, AbsoluteLongX),
    // 0x80
    op("BRA", 2, ProgramCounterRelative),
    op("STA", 2, DirectPageIndexedIndirect),
    op("BRL", 3, ProgramCounterRelativeLong),
    op("STA", 2, StackRelative),
    op("STY", 2, DirectPage),
    op("STA", 2, DirectPage),
    op("STX", 2, DirectPage),
    op("STA", 2, DirectPageIndirectLong),
    op("DEY", 1, Implied),
    op("BIT", 2, Immediate(Acc)),
    op("TXA", 1, Implied),
    op("PHB", 1, Implied),
    op("STY", 3, Absolute),
    op("STA", 3, Absolute),
    op("STX", 3, Absolute),
    op("STA", 4, AbsoluteLong),
    // 0x90
    op("BCC", 2, ProgramCounterRelative),
    op("STA", 2, DirectPageIndirectIndexed),
    op("STA", 2, DirectPageIndirect),
    op("STA", 2, StackRelativeIndirectIndexed),
    op("STY", 2, DirectPageX),
    op("STA", 2, DirectPageX),
    op("STX", 2, DirectPageY),
    op("STA", 2, DirectPageIndirectLongIndexed),
    op("TYA", 1, Implied),
    op("STA", 3, AbsoluteY),
    op("TXS", 1, Implied),
    op("TXY", 1, Implied),
    op("STZ", 3, Absolute),
    op("STA", 3, AbsoluteX),
    op("STZ", 3, AbsoluteX),
    op("STA", 4, AbsoluteLongX),
    // 0xA0
    op("LDY", 2, Immediate(Idx)),
    op("LDA", 2, DirectPageIndexedIndirect),
    op("LDX", 2, Immediate(Idx)),
    op("LDA", 2, StackRelative),
    op("LDY", 2, DirectPage),
    op("LDA", 2, DirectPage),
    op("LDX", 2, DirectPage),
    op("LDA", 2, DirectPageIndirectLong),
    op("TAY", 1, Implied),
    op("LDA", 2, Immediate(Acc)),
    op("TAX", 1, Implied),
    op("PLB", 1, Implied),
    op("LDY", 3, Absolute),
    op("LDA", 3, Absolute),
    op("LDX", 3, Absolute),
    op("LDA", 4, AbsoluteLong),
    // 0xB0
    op("BCS", 2, ProgramCounterRelative),
    op("LDA", 2, DirectPageIndirectIndexed),
    op("LDA", 2, DirectPageIndirect),
    op("LDA", 2, StackRelativeIndirectIndexed),
    op("LDY", 2, DirectPageX),
    op("LDA", 2, DirectPageX),
    op("LDX", 2, DirectPageY),
    op("LDA", 2, DirectPageIndirectLongIndexed),
    op("CLV", 1, Implied),
    op("LDA", 3, AbsoluteY),
    op("TSX", 1, Implied),
    op("TYX", 1, Implied),
    op("LDY", 3, AbsoluteX),
    op("LDA", 3, AbsoluteX),
    op("LDX", 3, AbsoluteY),
    op("LDA", 4, AbsoluteLongX),
    // 0xC0
    op("CPY", 2, Immediate(Idx)),
    op("CMP", 2, DirectPageIndexedIndirect),
    op("REP", 2, ImmediateByte),
    op("CMP", 2, StackRelative),
    op("CPY", 2, DirectPage),
    op("CMP", 2, DirectPage),
    op("DEC", 2, DirectPage),
    op("CMP", 2, DirectPageIndirectLong),
    op("INY", 1, Implied),
    op("CMP", 2, Immediate(Acc)),
    op("DEX", 1, Implied),
    op("WAI", 1, Implied),
    op("CPY", 3, Absolute),
    op("CMP", 3, Absolute),
    op("DEC", 3, Absolute),
    op("CMP", 4, AbsoluteLong),
    // 0xD0
    op("BNE", 2, ProgramCounterRelative),
    op("CMP", 2, DirectPageIndirectIndexed),
    op("CMP", 2, DirectPageIndirect),
    op("CMP", 2, StackRelativeIndirectIndexed),
    op("PEI", 2, DirectPageIndirect),
    op("CMP", 2, DirectPageX),
    op("DEC", 2, DirectPageX),
    op("CMP", 2, DirectPageIndirectLongIndexed),
    op("CLD", 1, Implied),
    op("CMP", 3, AbsoluteY),
    op("PHX", 1, Implied),
    op("STP", 1, Implied),
    op("JML", 3, AbsoluteIndirectLong),
    op("CMP", 3, AbsoluteX),
    op("DEC", 3, AbsoluteX),
    op("CMP", 4, AbsoluteLongX),
    // 0xE0
    op("CPX", 2, Immediate(Idx)),
    op("SBC", 2, DirectPageIndexedIndirect),
    op("SEP", 2, ImmediateByte),
    op("SBC", 2, StackRelative),
    op("CPX", 2, DirectPage),
    op("SBC", 2, DirectPage),
    op("INC", 2, DirectPage),
    op("SBC", 2, DirectPageIndirectLong),
    op("INX", 1, Implied),
    op("SBC", 2, Immediate(Acc)),
    op("NOP", 1, Implied),
    op("XBA", 1, Implied),
    op("CPX", 3, Absolute),
    op("SBC", 3, Absolute),
    op("INC", 3, Absolute),
    op("SBC", 4, AbsoluteLong),
    // 0xF0
    op("BEQ", 2, ProgramCounterRelative),
    op("SBC", 2, DirectPageIndirectIndexed),
    op("SBC", 2, DirectPageIndirect),
    op("SBC", 2, StackRelativeIndirectIndexed),
    op("PEA", 3, AbsoluteConstant),
    op("SBC", 2, DirectPageX),
    op("INC", 2, DirectPageX),
    op("SBC", 2, DirectPageIndirectLongIndexed),
    op("SED", 1, Implied),
    op("SBC", 3, AbsoluteY),
    op("PLX", 1, Implied),
    op("XCE", 1, Implied),
    op("JSR", 3, AbsoluteIndexedIndirect),
    op("SBC", 3, AbsoluteX),
    op("INC", 3, AbsoluteX),
    op("SBC", 4, AbsoluteLongX),
];

/// Look up an opcode byte.
pub fn lookup(opcode: u8) -> &'static Opcode {
    &OPCODES[opcode as usize]
}

/// Opcodes that transfer control to a statically known target.
pub fn is_branch(opcode: u8) -> bool {
    matches!(
        opcode,
        0x10 | 0x30 | 0x50 | 0x70 | 0x90 | 0xB0 | 0xD0 | 0xF0 // conditional
            | 0x80 | 0x82 // BRA, BRL
            | 0x4C | 0x5C // JMP abs, JML long
            | 0x20 | 0x22 // JSR abs, JSL long
    )
}

/// Opcodes after which control never falls through.
pub fn is_terminator(opcode: u8) -> bool {
    matches!(
        opcode,
        0x80 | 0x82 // BRA, BRL
            | 0x4C | 0x5C | 0x6C | 0x7C | 0xDC // jumps
            | 0x60 | 0x6B | 0x40 // returns
            | 0x00 | 0x02 // BRK, COP
            | 0xDB // STP
    )
}

/// Mode toggle whose outcome depends on the carry flag.
pub const XCE: u8 = 0xFB;
pub const REP: u8 = 0xC2;
pub const SEP: u8 = 0xE2;

/// Mnemonics whose memory operand width follows the index width.
pub fn uses_index_width(mnemonic: &str) -> bool {
    matches!(mnemonic, "LDX" | "LDY" | "STX" | "STY" | "CPX" | "CPY")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lengths_match_modes() {
        for (byte, entry) in OPCODES.iter().enumerate() {
            assert_eq!(
                entry.length,
                entry.mode.base_length(),
                "opcode {:02X} ({})",
                byte,
                entry.mnemonic
            );
        }
    }

    #[test]
    fn test_known_entries() {
        assert_eq!(lookup(0xA9).mnemonic, "LDA");
        assert_eq!(lookup(0xA9).mode, Immediate(Acc));
        assert_eq!(lookup(0xA2).mode, Immediate(Idx));
        assert_eq!(lookup(0x5C).length, 4);
        assert_eq!(lookup(0xDC).mnemonic, "JML");
        assert_eq!(lookup(0xFB).mnemonic, "XCE");
        assert_eq!(lookup(0x54).mode, BlockMove);
    }

    #[test]
    fn test_variable_immediate_length() {
        let emu = W65816State::new();
        let wide = W65816State::native(false, false);
        let wide_a = W65816State::native(false, true);

        assert_eq!(lookup(0xA9).length_for(emu), 2);
        assert_eq!(lookup(0xA9).length_for(wide), 3);
        assert_eq!(lookup(0xA2).length_for(wide_a), 2);
        assert_eq!(lookup(0xA2).length_for(wide), 3);
        // fixed-width immediates never grow
        assert_eq!(lookup(REP).length_for(wide), 2);
        assert_eq!(lookup(0xAD).length_for(wide), 3);
    }

    #[test]
    fn test_branch_and_terminator_sets() {
        assert!(is_branch(0xD0) && !is_terminator(0xD0));
        assert!(is_branch(0x80) && is_terminator(0x80));
        assert!(is_branch(0x20) && !is_terminator(0x20));
        assert!(!is_branch(0x6C) && is_terminator(0x6C));
        assert!(!is_branch(0xFC) && !is_terminator(0xFC));
        assert!(!is_branch(0x62));
        assert_eq!((0..=255u8).filter(|&b| is_branch(b)).count(), 14);
        assert_eq!((0..=255u8).filter(|&b| is_terminator(b)).count(), 13);
    }
}
