//! Worklist-driven static discovery

use std::collections::HashSet;
use std::fmt;

use super::decode_at;
use crate::{
    Address, AddressSpace, CpuState, Decoder, Instruction, RegisterSnapshot, ResourcerError,
    Session,
};

/// Pending `(address, state)` pairs plus every address ever queued.
///
/// Addresses are marked visited when pushed, so an address is attempted at
/// most once per worklist however many edges lead to it.
#[derive(Debug, Clone, Default)]
pub struct Worklist {
    pending: Vec<(Address, CpuState)>,
    visited: HashSet<Address>,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `address` unless it was queued before. Returns whether it was.
    pub fn seed(&mut self, address: Address, state: CpuState) -> bool {
        if !self.visited.insert(address) {
            return false;
        }
        self.pending.push((address, state));
        true
    }

    pub fn pop(&mut self) -> Option<(Address, CpuState)> {
        self.pending.pop()
    }

    pub fn is_visited(&self, address: Address) -> bool {
        self.visited.contains(&address)
    }

    /// Number of pending entries.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Result of one worklist step.
#[derive(Debug)]
pub enum StepOutcome {
    /// An instruction was committed and its successors queued
    Committed(Instruction),
    /// An instruction was committed and its successors queued with a state
    /// that may not match the hardware
    Stalled(Instruction),
    /// The address was already classified, unmapped, or not in ROM
    Skipped(Address),
    /// Decoding or committing failed; only this branch is abandoned
    Failed {
        address: Address,
        error: ResourcerError,
    },
    /// Nothing left to do
    Exhausted,
}

/// Tally of a discovery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub steps: u64,
    pub committed: u64,
    pub stalled: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl DiscoveryStats {
    fn tally(&mut self, outcome: &StepOutcome) {
        self.steps += 1;
        match outcome {
            StepOutcome::Committed(_) => self.committed += 1,
            StepOutcome::Stalled(_) => {
                self.committed += 1;
                self.stalled += 1;
            }
            StepOutcome::Skipped(_) => self.skipped += 1,
            StepOutcome::Failed { .. } => self.failed += 1,
            StepOutcome::Exhausted => self.steps -= 1,
        }
    }
}

impl fmt::Display for DiscoveryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} steps: {} committed, {} stalled, {} skipped, {} failed",
            self.steps, self.committed, self.stalled, self.skipped, self.failed
        )
    }
}

/// Pop one entry, decode it, commit it, and queue its successors with the
/// post-decode state.
pub fn step(
    session: &mut Session,
    decoder: &mut dyn Decoder,
    worklist: &mut Worklist,
) -> StepOutcome {
    let Some((address, state)) = worklist.pop() else {
        return StepOutcome::Exhausted;
    };

    let offset = match session.map_address_to_space(address) {
        Some((offset, AddressSpace::Rom)) => offset,
        Some((_, space)) => {
            log::debug!("Skipping ${:06X}: executes from {}", address, space);
            return StepOutcome::Skipped(address);
        }
        None => {
            log::debug!("Skipping ${:06X}: unmapped", address);
            return StepOutcome::Skipped(address);
        }
    };
    if !session.region_is_unknown(AddressSpace::Rom, offset, offset) {
        return StepOutcome::Skipped(address);
    }

    decoder.set_state(state);
    let (instruction, _) = match decode_at(session, decoder, address, offset) {
        Ok(decoded) => decoded,
        Err(error) => {
            log::debug!("Abandoning ${:06X}: {}", address, error);
            return StepOutcome::Failed { address, error };
        }
    };
    if let Err(error) = session.commit_instruction(offset, instruction.clone()) {
        return StepOutcome::Failed { address, error };
    }

    // the decoder leaves the state untouched across a mode toggle
    let next_state = decoder.state();
    for &next in &instruction.next_addresses {
        if worklist.seed(next, next_state) {
            log::trace!("Queued ${:06X} [{}]", next, next_state);
        }
    }

    if instruction.invalidates_state {
        log::warn!(
            "Following {} with an unchanged CPU mode; its real effect is not known statically",
            instruction
        );
        return StepOutcome::Stalled(instruction);
    }
    StepOutcome::Committed(instruction)
}

/// Step until the worklist is empty.
pub fn run(
    session: &mut Session,
    decoder: &mut dyn Decoder,
    worklist: &mut Worklist,
) -> DiscoveryStats {
    let mut stats = DiscoveryStats::default();
    loop {
        let outcome = step(session, decoder, worklist);
        if matches!(outcome, StepOutcome::Exhausted) {
            break;
        }
        stats.tally(&outcome);
    }
    log::info!("Flood fill finished: {}", stats);
    stats
}

/// Flood-fill from a single seed with a fresh worklist.
pub fn run_from(
    session: &mut Session,
    decoder: &mut dyn Decoder,
    address: Address,
    state: CpuState,
) -> DiscoveryStats {
    let mut worklist = Worklist::new();
    worklist.seed(address, state);
    run(session, decoder, &mut worklist)
}

/// Commit the instruction a live CPU is about to execute, using its exact
/// register state. Successors are not explored; the next live step supplies
/// their state.
pub fn step_live(
    session: &mut Session,
    decoder: &mut dyn Decoder,
    registers: &RegisterSnapshot,
) -> StepOutcome {
    let mut worklist = Worklist::new();
    worklist.seed(
        registers.address(),
        CpuState::W65816(registers.state()),
    );
    step(session, decoder, &mut worklist)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::decoder::W65816Decoder;
    use crate::mapping::MappingMode;
    use crate::{RegionKind, W65816State};

    fn session(rom: Vec<u8>) -> Session {
        let config = SessionConfig {
            mapping: MappingMode::Identity,
            ..Default::default()
        };
        Session::new(rom, config).unwrap()
    }

    fn emulation() -> CpuState {
        CpuState::W65816(W65816State::new())
    }

    #[test]
    fn test_worklist_marks_visited_on_push() {
        let mut worklist = Worklist::new();
        assert!(worklist.seed(0x10, emulation()));
        assert!(!worklist.seed(0x10, CpuState::Empty));
        assert_eq!(worklist.len(), 1);
        assert_eq!(worklist.pop(), Some((0x10, emulation())));
        assert!(worklist.is_visited(0x10));
        assert!(!worklist.seed(0x10, emulation()));
        assert!(worklist.is_empty());
    }

    #[test]
    fn test_flood_fill_follows_both_edges() {
        // 0: BEQ +2 ; 2: NOP ; 3: NOP ; 4: RTS
        let mut s = session(vec![0xF0, 0x02, 0xEA, 0xEA, 0x60, 0xFF]);
        let stats = run_from(&mut s, &mut W65816Decoder::new(), 0, emulation());
        assert_eq!(stats.committed, 4);
        assert_eq!(stats.failed, 0);

        let ledger = s.ledger(AddressSpace::Rom);
        let code = ledger.range_containing_address(0).unwrap();
        assert_eq!((code.kind(), code.end()), (RegionKind::Code, 4));
        assert_eq!(ledger.kind_at(5), Some(RegionKind::Unknown));
    }

    #[test]
    fn test_state_propagates_to_successors() {
        // REP #$20 ; LDA #$1234 ; RTS
        let mut s = session(vec![0xC2, 0x20, 0xA9, 0x34, 0x12, 0x60]);
        let native = CpuState::W65816(W65816State::native(true, true));
        let stats = run_from(&mut s, &mut W65816Decoder::new(), 0, native);
        assert_eq!(stats.committed, 3);

        let code = s.ledger(AddressSpace::Rom).range_containing_address(2).unwrap();
        let lda = &code.instructions()[1];
        assert_eq!(lda.text(), "LDA #$1234");
        assert_eq!(lda.state, CpuState::W65816(W65816State::native(false, true)));
    }

    #[test]
    fn test_cycles_terminate() {
        // 0: BRA -2 (to itself)
        let mut s = session(vec![0x80, 0xFE]);
        let stats = run_from(&mut s, &mut W65816Decoder::new(), 0, emulation());
        assert_eq!(stats.committed, 1);
        assert_eq!(stats.steps, 1);
    }

    #[test]
    fn test_failed_branch_leaves_siblings_alone() {
        // 0: BEQ +2 -> 4 ; 2: RTS ; 3: pad ; 4: LDA abs truncated by the image end
        let mut s = session(vec![0xF0, 0x02, 0x60, 0x00, 0xAD, 0x00]);
        let stats = run_from(&mut s, &mut W65816Decoder::new(), 0, emulation());
        assert_eq!(stats.committed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(s.ledger(AddressSpace::Rom).kind_at(2), Some(RegionKind::Code));
        assert_eq!(s.ledger(AddressSpace::Rom).kind_at(4), Some(RegionKind::Unknown));
    }

    #[test]
    fn test_mode_toggle_stalls_but_follows_fallthrough() {
        // SEI ; CLC ; XCE ; REP #$30 ; LDA #$00 ; BRK #$60
        let mut s = session(vec![0x78, 0x18, 0xFB, 0xC2, 0x30, 0xA9, 0x00, 0x00, 0x60]);
        let stats = run_from(&mut s, &mut W65816Decoder::new(), 0, emulation());
        assert_eq!(stats.stalled, 1);
        assert_eq!(stats.committed, 6);

        let ledger = s.ledger(AddressSpace::Rom);
        assert_eq!(ledger.kind_at(3), Some(RegionKind::Code));
        // still emulation mode after the toggle, so REP is ignored and the
        // immediate stays one byte
        let code = ledger.range_containing_address(0).unwrap();
        assert_eq!((code.start(), code.end()), (0, 8));
        assert_eq!(code.instructions()[4].text(), "LDA #$00");
    }

    #[test]
    fn test_second_run_adds_nothing() {
        let rom = vec![0xF0, 0x02, 0xEA, 0xEA, 0x20, 0x00, 0x00, 0x60];
        let mut s = session(rom);
        run_from(&mut s, &mut W65816Decoder::new(), 0, emulation());
        let before = s.ledger(AddressSpace::Rom).clone();

        let stats = run_from(&mut s, &mut W65816Decoder::new(), 0, emulation());
        assert_eq!(stats.committed, 0);
        assert_eq!(stats.skipped, 1);
        assert_eq!(s.ledger(AddressSpace::Rom), &before);
    }

    #[test]
    fn test_step_live_uses_register_state() {
        let mut s = Session::new(vec![0xA9, 0x34, 0x12, 0x60], SessionConfig {
            mapping: MappingMode::LoRom,
            ..Default::default()
        })
        .unwrap();
        let regs = RegisterSnapshot {
            e: 0,
            p: 0x10,
            pb: 0x80,
            pc: 0x8000,
            ..Default::default()
        };
        match step_live(&mut s, &mut W65816Decoder::new(), &regs) {
            StepOutcome::Committed(insn) => {
                assert_eq!(insn.text(), "LDA #$1234");
                assert_eq!(insn.address, 0x808000);
            }
            other => panic!("unexpected {:?}", other),
        }
        // successors are left for the next live step
        assert_eq!(s.ledger(AddressSpace::Rom).kind_at(3), Some(RegionKind::Unknown));
    }

    #[test]
    fn test_ram_and_unmapped_seeds_are_skipped() {
        let mut s = Session::new(vec![0xEA; 0x10], SessionConfig::default()).unwrap();
        let mut worklist = Worklist::new();
        worklist.seed(0x7E0000, emulation());
        worklist.seed(0x002100, emulation());
        let stats = run(&mut s, &mut W65816Decoder::new(), &mut worklist);
        assert_eq!(stats.skipped, 2);
        assert_eq!(s.ledger(AddressSpace::Ram).len(), 1);
    }
}
