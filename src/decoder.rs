//! 65816 instruction decoder.

use crate::opcodes::{self, AddressingMode, Opcode, REP, SEP, XCE};
use crate::{
    Address, CpuState, DecodeError, DecodeResult, Decoder, Endianness, Instruction, Operand,
    OperandSyntax, RegisterSnapshot, W65816State,
};

/// The 65816 has a 24-bit address bus.
pub const ADDRESS_MASK: Address = 0xFF_FFFF;

/// Stateful 65816 decoder.
///
/// Tracks the emulation and width flags across REP/SEP so that immediate
/// operands have the right length.
#[derive(Debug, Clone, Default)]
pub struct W65816Decoder {
    state: W65816State,
}

impl W65816Decoder {
    /// Decoder starting in emulation mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder starting from an explicit state.
    pub fn with_state(state: W65816State) -> Self {
        Self { state }
    }

    /// The current state without the `CpuState` wrapper.
    pub fn w65816_state(&self) -> W65816State {
        self.state
    }
}

impl Decoder for W65816Decoder {
    fn architecture_name(&self) -> &'static str {
        "65816"
    }

    fn endianness(&self) -> Endianness {
        Endianness::Little
    }

    fn state(&self) -> CpuState {
        CpuState::W65816(self.state)
    }

    fn set_state(&mut self, state: CpuState) {
        self.state = state.as_w65816().unwrap_or_default();
    }

    fn decode_next(&mut self, bytes: &[u8], address: Address) -> DecodeResult {
        if address > ADDRESS_MASK {
            return DecodeResult::Error(DecodeError::AddressOutOfSpace(address));
        }
        let Some(&opcode) = bytes.first() else {
            return DecodeResult::NeedMoreBytes(1);
        };

        let entry = opcodes::lookup(opcode);
        let state = self.state;
        let length = entry.length_for(state);
        if bytes.len() < length {
            return DecodeResult::NeedMoreBytes(length - bytes.len());
        }
        if entry.length != entry.mode.base_length() {
            return DecodeResult::Error(DecodeError::InvalidLength {
                mnemonic: entry.mnemonic,
                table: entry.length,
                mode: entry.mode.base_length(),
            });
        }

        let raw = &bytes[..length];
        let value = self.read_value(raw, 1, length - 1);
        let operands = build_operands(entry, raw, value, address);

        let is_branch = opcodes::is_branch(opcode);
        let is_terminator = opcodes::is_terminator(opcode);
        let mut next_addresses = Vec::with_capacity(2);
        if !is_terminator {
            next_addresses.push((address + length as Address) & ADDRESS_MASK);
        }
        if is_branch {
            match branch_target(opcode, entry.mode, value, address, length) {
                Some(target) if !next_addresses.contains(&target) => next_addresses.push(target),
                Some(_) => {}
                None => {
                    return DecodeResult::Error(DecodeError::UnresolvedBranchTarget {
                        mnemonic: entry.mnemonic.to_string(),
                        address,
                    })
                }
            }
        }

        let next_state = match opcode {
            REP => state.with_rep(raw[1]),
            SEP => state.with_sep(raw[1]),
            _ => state,
        };

        let instruction = Instruction {
            address,
            mnemonic: entry.mnemonic.to_string(),
            operands,
            bytes: raw.to_vec(),
            is_branch,
            is_terminator,
            invalidates_state: opcode == XCE,
            next_addresses,
            state: CpuState::W65816(state),
        };
        log::trace!("decoded {} [{}]", instruction, state);

        self.state = next_state;
        DecodeResult::Success {
            instruction,
            bytes_consumed: length,
        }
    }
}

/// Target of a PC-relative displacement, wrapping at the end of the bus.
fn relative_target(address: Address, length: usize, displacement: i64) -> Address {
    ((address as i64 + length as i64 + displacement) as Address) & ADDRESS_MASK
}

fn branch_target(
    opcode: u8,
    mode: AddressingMode,
    value: u64,
    address: Address,
    length: usize,
) -> Option<Address> {
    match mode {
        AddressingMode::ProgramCounterRelative => {
            Some(relative_target(address, length, value as u8 as i8 as i64))
        }
        AddressingMode::ProgramCounterRelativeLong => {
            Some(relative_target(address, length, value as u16 as i16 as i64))
        }
        // JMP/JSR abs stay in the program bank
        AddressingMode::Absolute if matches!(opcode, 0x4C | 0x20) => {
            Some((address & 0xFF_0000) | value)
        }
        AddressingMode::AbsoluteLong => Some(value),
        _ => None,
    }
}

fn build_operands(entry: &Opcode, raw: &[u8], value: u64, address: Address) -> Vec<Operand> {
    use AddressingMode::*;
    use OperandSyntax as S;

    let one = |syntax: OperandSyntax, width: u8| vec![Operand::new(syntax, width, value)];
    match entry.mode {
        Implied => Vec::new(),
        Immediate(_) => one(S::Immediate, (raw.len() - 1) as u8),
        ImmediateByte => one(S::Immediate, 1),
        AbsoluteConstant | Absolute => one(S::Plain, 2),
        AbsoluteX => one(S::IndexedX, 2),
        AbsoluteY => one(S::IndexedY, 2),
        AbsoluteLong => one(S::Plain, 3),
        AbsoluteLongX => one(S::IndexedX, 3),
        AbsoluteIndirect => one(S::Indirect, 2),
        AbsoluteIndexedIndirect => one(S::IndexedIndirectX, 2),
        AbsoluteIndirectLong => one(S::IndirectLong, 2),
        DirectPage => one(S::Plain, 1),
        DirectPageX => one(S::IndexedX, 1),
        DirectPageY => one(S::IndexedY, 1),
        DirectPageIndirect => one(S::Indirect, 1),
        DirectPageIndexedIndirect => one(S::IndexedIndirectX, 1),
        DirectPageIndirectIndexed => one(S::IndirectIndexedY, 1),
        DirectPageIndirectLong => one(S::IndirectLong, 1),
        DirectPageIndirectLongIndexed => one(S::IndirectLongIndexedY, 1),
        StackRelative => one(S::StackRelative, 1),
        StackRelativeIndirectIndexed => one(S::StackRelativeIndirectY, 1),
        ProgramCounterRelative => {
            let target = relative_target(address, raw.len(), raw[1] as i8 as i64);
            vec![Operand::new(S::Plain, 2, target & 0xFFFF)]
        }
        ProgramCounterRelativeLong => {
            let target = relative_target(address, raw.len(), value as u16 as i16 as i64);
            vec![Operand::new(S::Plain, 2, target & 0xFFFF)]
        }
        // encoded as destination bank, source bank; written source first
        BlockMove => vec![
            Operand::new(S::Plain, 1, raw[2] as u64).as_source(),
            Operand::new(S::Plain, 1, raw[1] as u64).as_destination(),
        ],
    }
}

/// A concrete memory span touched by an executed instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryAccess {
    /// 24-bit CPU address
    pub address: Address,
    /// Size in bytes
    pub size: u64,
}

/// Effective data addresses of `instruction` given the live registers it
/// executed with.
///
/// Indirect modes report the pointer itself, since the pointed-to address
/// would need the contents of memory. Block moves report nothing: their
/// length lives in the accumulator.
pub fn memory_accesses(instruction: &Instruction, regs: &RegisterSnapshot) -> Vec<MemoryAccess> {
    use AddressingMode::*;

    let Some(&opcode) = instruction.bytes.first() else {
        return Vec::new();
    };
    if opcodes::is_branch(opcode) {
        return Vec::new();
    }
    let entry = opcodes::lookup(opcode);
    let value = instruction
        .bytes
        .iter()
        .skip(1)
        .rev()
        .fold(0u64, |acc, &b| (acc << 8) | b as u64);

    let state = regs.state();
    let narrow = if opcodes::uses_index_width(entry.mnemonic) {
        state.index_8bit()
    } else {
        state.accumulator_8bit()
    };
    let width = if narrow { 1 } else { 2 };

    let x = regs.index_x() as u64;
    let y = regs.index_y() as u64;
    let data_bank = (regs.db as u64) << 16;
    let direct = |offset: u64| (regs.d as u64 + offset) & 0xFFFF;
    let stack = |offset: u64| (regs.s as u64 + offset) & 0xFFFF;
    let at = |address: u64, size: u64| {
        vec![MemoryAccess {
            address: address & ADDRESS_MASK,
            size,
        }]
    };

    match entry.mode {
        Absolute => at(data_bank | value, width),
        AbsoluteX => at((data_bank | value) + x, width),
        AbsoluteY => at((data_bank | value) + y, width),
        AbsoluteLong => at(value, width),
        AbsoluteLongX => at(value + x, width),
        DirectPage => at(direct(value), width),
        DirectPageX => at(direct(value + x), width),
        DirectPageY => at(direct(value + y), width),
        DirectPageIndirect | DirectPageIndirectIndexed => at(direct(value), 2),
        DirectPageIndexedIndirect => at(direct(value + x), 2),
        DirectPageIndirectLong | DirectPageIndirectLongIndexed => at(direct(value), 3),
        StackRelative => at(stack(value), width),
        StackRelativeIndirectIndexed => at(stack(value), 2),
        AbsoluteIndirect => at(value, 2),
        AbsoluteIndexedIndirect => at(((regs.pb as u64) << 16) | ((value + x) & 0xFFFF), 2),
        AbsoluteIndirectLong => at(value, 3),
        Implied
        | Immediate(_)
        | ImmediateByte
        | AbsoluteConstant
        | ProgramCounterRelative
        | ProgramCounterRelativeLong
        | BlockMove => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn emulation() -> W65816State {
        W65816State::new()
    }

    fn decode(state: W65816State, bytes: &[u8], address: Address) -> (Instruction, usize, W65816Decoder) {
        let mut decoder = W65816Decoder::with_state(state);
        match decoder.decode_next(bytes, address) {
            DecodeResult::Success {
                instruction,
                bytes_consumed,
            } => (instruction, bytes_consumed, decoder),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[test]
    fn test_decoder_metadata() {
        let decoder = W65816Decoder::new();
        assert_eq!(decoder.architecture_name(), "65816");
        assert_eq!(decoder.endianness(), Endianness::Little);
        assert_eq!(decoder.state(), CpuState::W65816(W65816State::new()));
    }

    #[test]
    fn test_lda_immediate_in_emulation() {
        let (insn, n, _) = decode(emulation(), &[0xA9, 0x42, 0xFF], 0x8000);
        assert_eq!(n, 2);
        assert_eq!(insn.bytes, vec![0xA9, 0x42]);
        assert_eq!(insn.operands.len(), 1);
        assert_eq!(insn.operands[0].text(), "#$42");
        assert_eq!(insn.text(), "LDA #$42");
        assert_eq!(insn.next_addresses, vec![0x8002]);
    }

    #[rstest]
    #[case(W65816State::new(), 2, "ADC #$42")]
    #[case(W65816State::native(true, true), 2, "ADC #$42")]
    #[case(W65816State::native(true, false), 2, "ADC #$42")]
    #[case(W65816State::native(false, true), 3, "ADC #$1242")]
    #[case(W65816State::native(false, false), 3, "ADC #$1242")]
    fn test_accumulator_immediate_across_states(
        #[case] state: W65816State,
        #[case] length: usize,
        #[case] text: &str,
    ) {
        let (insn, n, _) = decode(state, &[0x69, 0x42, 0x12], 0x8000);
        assert_eq!(n, length);
        assert_eq!(insn.text(), text);
        assert_eq!(insn.state, CpuState::W65816(state));
    }

    #[rstest]
    #[case(W65816State::new(), 2)]
    #[case(W65816State::native(false, true), 2)]
    #[case(W65816State::native(true, false), 3)]
    fn test_index_immediate_across_states(#[case] state: W65816State, #[case] length: usize) {
        let (insn, n, _) = decode(state, &[0xA2, 0x34, 0x12], 0x8000);
        assert_eq!(n, length);
        assert_eq!(insn.mnemonic, "LDX");
    }

    #[rstest]
    #[case(W65816State::new())]
    #[case(W65816State::native(false, false))]
    fn test_fixed_length_forms_ignore_state(#[case] state: W65816State) {
        let (jml, n, _) = decode(state, &[0x5C, 0x56, 0x34, 0x12], 0x8000);
        assert_eq!(n, 4);
        assert_eq!(jml.text(), "JMP $123456");

        let (sta, n, _) = decode(state, &[0x8D, 0x34, 0x12], 0x8000);
        assert_eq!(n, 3);
        assert_eq!(sta.text(), "STA $1234");

        let (lda, _, _) = decode(state, &[0xB7, 0x10], 0x8000);
        assert_eq!(lda.text(), "LDA [$10],Y");

        let (sr, _, _) = decode(state, &[0x13, 0x03], 0x8000);
        assert_eq!(sr.text(), "ORA ($03,S),Y");
    }

    #[test]
    fn test_rep_widens_in_native_mode() {
        let mut decoder = W65816Decoder::with_state(W65816State::native(true, true));
        let rep = decoder.decode_next(&[0xC2, 0x30], 0x8000);
        assert!(rep.is_success());
        assert_eq!(decoder.w65816_state(), W65816State::native(false, false));

        match decoder.decode_next(&[0xA9, 0x34, 0x12], 0x8002) {
            DecodeResult::Success {
                instruction,
                bytes_consumed,
            } => {
                assert_eq!(bytes_consumed, 3);
                assert_eq!(instruction.text(), "LDA #$1234");
                assert_eq!(
                    instruction.state,
                    CpuState::W65816(W65816State::native(false, false))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_rep_is_noop_in_emulation() {
        let (insn, _, decoder) = decode(emulation(), &[0xC2, 0x30], 0x8000);
        assert_eq!(insn.text(), "REP #$30");
        assert_eq!(decoder.w65816_state(), emulation());
    }

    #[test]
    fn test_sep_narrows() {
        let (insn, _, decoder) = decode(W65816State::native(false, false), &[0xE2, 0x20], 0x8000);
        // embedded state is the one before the instruction
        assert_eq!(insn.state, CpuState::W65816(W65816State::native(false, false)));
        assert_eq!(decoder.w65816_state(), W65816State::native(true, false));
    }

    #[test]
    fn test_need_more_bytes_leaves_state_untouched() {
        let wide = W65816State::native(false, false);
        let mut decoder = W65816Decoder::with_state(wide);
        assert_eq!(decoder.decode_next(&[], 0x8000), DecodeResult::NeedMoreBytes(1));
        // state-adjusted length is used for the shortfall
        assert_eq!(decoder.decode_next(&[0xA9, 0x00], 0x8000), DecodeResult::NeedMoreBytes(1));
        assert_eq!(decoder.decode_next(&[0xC2], 0x8000), DecodeResult::NeedMoreBytes(1));
        assert_eq!(decoder.w65816_state(), wide);

        let mut emu = W65816Decoder::new();
        assert_eq!(emu.decode_next(&[0x5C, 0x00], 0x8000), DecodeResult::NeedMoreBytes(2));
        assert!(emu.decode_next(&[0x5C, 0x00, 0x80, 0x00], 0x8000).is_success());
    }

    #[test]
    fn test_out_of_space_address_is_error() {
        let mut decoder = W65816Decoder::new();
        assert_eq!(
            decoder.decode_next(&[0xEA], 0x100_0000),
            DecodeResult::Error(DecodeError::AddressOutOfSpace(0x100_0000))
        );
    }

    #[test]
    fn test_backward_conditional_branch() {
        let (insn, n, _) = decode(emulation(), &[0xD0, 0xFB], 0x8010);
        assert_eq!(n, 2);
        assert!(insn.is_branch);
        assert!(!insn.is_terminator);
        assert_eq!(insn.next_addresses, vec![0x8012, 0x800D]);
        assert_eq!(insn.text(), "BNE $800D");
    }

    #[test]
    fn test_branch_to_self_deduplicates() {
        // BNE with displacement -2 targets itself, distinct from fallthrough
        let (insn, _, _) = decode(emulation(), &[0xD0, 0xFE], 0x8000);
        assert_eq!(insn.next_addresses, vec![0x8002, 0x8000]);

        // BNE +0 targets the fallthrough address
        let (insn, _, _) = decode(emulation(), &[0xD0, 0x00], 0x8000);
        assert_eq!(insn.next_addresses, vec![0x8002]);
    }

    #[test]
    fn test_unconditional_branches_have_no_fallthrough() {
        let (bra, _, _) = decode(emulation(), &[0x80, 0x10], 0x8000);
        assert!(bra.is_branch && bra.is_terminator);
        assert_eq!(bra.next_addresses, vec![0x8012]);

        let (brl, _, _) = decode(emulation(), &[0x82, 0x00, 0xF0], 0x8000);
        assert_eq!(brl.next_addresses, vec![0x7003]);
    }

    #[test]
    fn test_relative_target_wraps() {
        let (bra, _, _) = decode(emulation(), &[0x80, 0x05], 0xFF_FFFE);
        assert_eq!(bra.next_addresses, vec![0x000005]);
    }

    #[test]
    fn test_jump_and_call_targets() {
        let (jmp, _, _) = decode(emulation(), &[0x4C, 0x00, 0x90], 0x80_8000);
        assert_eq!(jmp.next_addresses, vec![0x80_9000]);
        assert_eq!(jmp.text(), "JMP $9000");

        let (jsr, _, _) = decode(emulation(), &[0x20, 0x00, 0x90], 0x80_8000);
        assert!(jsr.is_branch && !jsr.is_terminator);
        assert_eq!(jsr.next_addresses, vec![0x80_8003, 0x80_9000]);

        let (jsl, _, _) = decode(emulation(), &[0x22, 0x00, 0x80, 0x01], 0x80_8000);
        assert_eq!(jsl.next_addresses, vec![0x80_8004, 0x01_8000]);
    }

    #[test]
    fn test_indirect_jumps_terminate_without_edges() {
        for bytes in [[0x6C, 0x00, 0x10], [0x7C, 0x00, 0x10], [0xDC, 0x00, 0x10]] {
            let (insn, _, _) = decode(emulation(), &bytes, 0x8000);
            assert!(insn.is_terminator);
            assert!(!insn.is_branch);
            assert!(insn.next_addresses.is_empty());
        }
        let (jml, _, _) = decode(emulation(), &[0xDC, 0x00, 0x10], 0x8000);
        assert_eq!(jml.text(), "JML [$1000]");

        let (jsr, _, _) = decode(emulation(), &[0xFC, 0x00, 0x10], 0x8000);
        assert!(!jsr.is_branch && !jsr.is_terminator);
        assert_eq!(jsr.next_addresses, vec![0x8003]);
        assert_eq!(jsr.text(), "JSR ($1000,X)");
    }

    #[test]
    fn test_returns_terminate() {
        for op in [0x60u8, 0x6B, 0x40, 0xDB] {
            let (insn, n, _) = decode(emulation(), &[op], 0x8000);
            assert_eq!(n, 1);
            assert!(insn.is_terminator);
            assert!(insn.next_addresses.is_empty());
        }
    }

    #[test]
    fn test_block_move_operand_roles() {
        let (mvn, n, _) = decode(emulation(), &[0x54, 0x7E, 0x80], 0x8000);
        assert_eq!(n, 3);
        assert_eq!(mvn.text(), "MVN $80, $7E");
        assert!(mvn.operands[0].is_source && !mvn.operands[0].is_destination);
        assert!(mvn.operands[1].is_destination && !mvn.operands[1].is_source);

        let (lda, _, _) = decode(emulation(), &[0xBD, 0x00, 0x21], 0x8000);
        assert!(lda.operands.iter().all(|o| !o.is_source && !o.is_destination));
    }

    #[test]
    fn test_xce_invalidates_without_guessing() {
        let native = W65816State::native(false, false);
        let (insn, n, decoder) = decode(native, &[0xFB], 0x8000);
        assert_eq!(n, 1);
        assert!(insn.invalidates_state);
        assert_eq!(insn.next_addresses, vec![0x8001]);
        assert_eq!(decoder.w65816_state(), native);
    }

    #[test]
    fn test_per_is_not_a_branch() {
        let (per, _, _) = decode(emulation(), &[0x62, 0x10, 0x00], 0x8000);
        assert!(!per.is_branch);
        assert_eq!(per.text(), "PER $8013");
        assert_eq!(per.next_addresses, vec![0x8003]);
    }

    #[test]
    fn test_decode_is_deterministic() {
        let bytes = [0xC2, 0x30, 0xA9, 0x00, 0x80];
        let state = W65816State::native(true, true);
        let (a, na, da) = decode(state, &bytes, 0x8000);
        let (b, nb, db) = decode(state, &bytes, 0x8000);
        assert_eq!(a, b);
        assert_eq!(na, nb);
        assert_eq!(da.w65816_state(), db.w65816_state());
    }

    #[test]
    fn test_every_opcode_decodes() {
        for state in [W65816State::new(), W65816State::native(false, false)] {
            for op in 0..=255u8 {
                let bytes = [op, 0x00, 0x80, 0x00];
                let mut decoder = W65816Decoder::with_state(state);
                let result = decoder.decode_next(&bytes, 0x8000);
                assert!(result.is_success(), "opcode {:02X} failed: {:?}", op, result);
            }
        }
    }

    #[test]
    fn test_set_state_from_foreign_arch_resets() {
        let mut decoder = W65816Decoder::with_state(W65816State::native(false, false));
        decoder.set_state(CpuState::Empty);
        assert_eq!(decoder.w65816_state(), W65816State::new());
    }

    fn regs() -> RegisterSnapshot {
        RegisterSnapshot {
            e: 0,
            p: 0x30,
            db: 0x7E,
            d: 0x0100,
            x: 0x0004,
            y: 0x0002,
            s: 0x01F0,
            pb: 0x80,
            pc: 0x8000,
        }
    }

    #[rstest]
    #[case(&[0x8D, 0x34, 0x12], 0x7E1234, 1)]
    #[case(&[0x9D, 0x34, 0x12], 0x7E1238, 1)]
    #[case(&[0xB9, 0x34, 0x12], 0x7E1236, 1)]
    #[case(&[0x8F, 0x00, 0x20, 0x7F], 0x7F2000, 1)]
    #[case(&[0x85, 0x10], 0x000110, 1)]
    #[case(&[0x95, 0x10], 0x000114, 1)]
    #[case(&[0xB2, 0x10], 0x000110, 2)]
    #[case(&[0xA1, 0x10], 0x000114, 2)]
    #[case(&[0xB7, 0x10], 0x000110, 3)]
    #[case(&[0x83, 0x02], 0x0001F2, 1)]
    #[case(&[0x6C, 0x00, 0x10], 0x001000, 2)]
    #[case(&[0x7C, 0x00, 0x10], 0x801004, 2)]
    #[case(&[0xDC, 0x00, 0x10], 0x001000, 3)]
    fn test_memory_accesses(#[case] bytes: &[u8], #[case] address: Address, #[case] size: u64) {
        let state = regs().state();
        let (insn, _, _) = decode(state, bytes, 0x808000);
        assert_eq!(
            memory_accesses(&insn, &regs()),
            vec![MemoryAccess { address, size }]
        );
    }

    #[test]
    fn test_memory_access_width_follows_flags() {
        let wide = RegisterSnapshot { p: 0x00, ..regs() };
        let (sta, _, _) = decode(wide.state(), &[0x8D, 0x34, 0x12], 0x808000);
        assert_eq!(memory_accesses(&sta, &wide)[0].size, 2);

        let wide_index = RegisterSnapshot { p: 0x20, ..regs() };
        let (stx, _, _) = decode(wide_index.state(), &[0x8E, 0x34, 0x12], 0x808000);
        assert_eq!(memory_accesses(&stx, &wide_index)[0].size, 2);
        let (sta, _, _) = decode(wide_index.state(), &[0x8D, 0x34, 0x12], 0x808000);
        assert_eq!(memory_accesses(&sta, &wide_index)[0].size, 1);
    }

    #[test]
    fn test_no_memory_access_for_non_data_forms() {
        let cases: [&[u8]; 5] = [
            &[0xA9, 0x00],
            &[0xEA],
            &[0x4C, 0x00, 0x80],
            &[0x54, 0x7E, 0x7F],
            &[0xF4, 0x00, 0x10],
        ];
        for bytes in cases {
            let (insn, _, _) = decode(regs().state(), bytes, 0x808000);
            assert!(memory_accesses(&insn, &regs()).is_empty(), "{}", insn);
        }
    }
}
