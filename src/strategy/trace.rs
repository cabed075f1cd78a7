//! Trace-driven discovery.
//!
//! Each trace record pins down the exact CPU state of one executed
//! instruction, so the instruction can be committed as Code without any
//! guessing, and the memory it touched can be classified as Data.

use std::fmt;
use std::io::BufRead;

use super::decode_at;
use crate::decoder::memory_accesses;
use crate::parser::{TraceParser, TraceRecord};
use crate::{AddressSpace, CpuState, Decoder, RegionKind, ResourcerError, Session};

/// Tally of a trace run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraceStats {
    pub records: u64,
    pub malformed: u64,
    /// Instructions newly committed as Code
    pub committed: u64,
    /// Instructions that were already known
    pub known: u64,
    /// Instructions starting inside an already-classified span
    pub misaligned: u64,
    /// Spans classified as Data
    pub data: u64,
    /// Rejected classifications
    pub conflicts: u64,
    pub decode_failures: u64,
    /// Instructions executed from RAM
    pub ram_execution: u64,
    pub unmapped: u64,
    /// Decoded text differs from the tracer's
    pub text_mismatches: u64,
}

impl fmt::Display for TraceStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records ({} malformed): {} committed, {} known, {} misaligned, {} data, \
             {} conflicts, {} decode failures, {} from RAM, {} unmapped, {} text mismatches",
            self.records,
            self.malformed,
            self.committed,
            self.known,
            self.misaligned,
            self.data,
            self.conflicts,
            self.decode_failures,
            self.ram_execution,
            self.unmapped,
            self.text_mismatches
        )
    }
}

/// Consumes trace records one at a time.
#[derive(Debug, Clone)]
pub struct TraceDiscovery {
    parser: TraceParser,
    stats: TraceStats,
}

impl TraceDiscovery {
    pub fn new() -> Result<Self, ResourcerError> {
        Ok(Self {
            parser: TraceParser::new()?,
            stats: TraceStats::default(),
        })
    }

    pub fn stats(&self) -> TraceStats {
        self.stats
    }

    /// Process every line of `reader`. Only I/O errors are fatal.
    pub fn run<R: BufRead>(
        &mut self,
        session: &mut Session,
        decoder: &mut dyn Decoder,
        reader: R,
    ) -> Result<TraceStats, ResourcerError> {
        for line in reader.lines() {
            self.feed_line(session, decoder, &line?);
        }
        log::info!("Trace finished: {}", self.stats);
        Ok(self.stats)
    }

    /// Process one trace line. Blank lines are ignored; malformed lines are
    /// counted and skipped.
    pub fn feed_line(&mut self, session: &mut Session, decoder: &mut dyn Decoder, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        match self.parser.parse_line(line) {
            Ok(record) => self.feed_record(session, decoder, &record),
            Err(e) => {
                log::trace!("{}", e);
                self.stats.malformed += 1;
            }
        }
    }

    /// Process one parsed record.
    pub fn feed_record(
        &mut self,
        session: &mut Session,
        decoder: &mut dyn Decoder,
        record: &TraceRecord,
    ) {
        self.stats.records += 1;
        let conflicts_before = session.conflicts().total();
        self.classify(session, decoder, record);
        self.stats.conflicts += session.conflicts().total() - conflicts_before;
    }

    fn classify(&mut self, session: &mut Session, decoder: &mut dyn Decoder, record: &TraceRecord) {
        let registers = &record.registers;
        let address = registers.address();
        decoder.set_state(CpuState::W65816(registers.state()));

        let offset = match session.map_address_to_space(address) {
            Some((offset, AddressSpace::Rom)) => offset,
            Some((_, AddressSpace::Ram)) => {
                log::debug!("${:06X} executes from RAM", address);
                self.stats.ram_execution += 1;
                return;
            }
            None => {
                log::debug!("${:06X} is not mapped", address);
                self.stats.unmapped += 1;
                return;
            }
        };

        let (instruction, consumed) = match decode_at(session, decoder, address, offset) {
            Ok(decoded) => decoded,
            Err(e) => {
                log::debug!("Cannot decode traced ${:06X}: {}", address, e);
                self.stats.decode_failures += 1;
                return;
            }
        };
        if consumed == 0 {
            return;
        }

        if !same_text(&record.text, &instruction.text()) {
            log::debug!(
                "Trace text mismatch at ${:06X}: traced '{}', decoded '{}'",
                address,
                record.text,
                instruction.text()
            );
            self.stats.text_mismatches += 1;
        }

        let end = offset + consumed as u64 - 1;
        if session.region_is_unknown(AddressSpace::Rom, offset, end) {
            if session.commit_instruction(offset, instruction.clone()).is_ok() {
                self.stats.committed += 1;
            }
        } else if starts_instruction(session, offset) {
            self.stats.known += 1;
        } else if let Err(e) = session.commit_instruction(offset, instruction.clone()) {
            log::debug!("Traced ${:06X} is misaligned: {}", address, e);
            self.stats.misaligned += 1;
        }

        // a branch operand is a code pointer, not data
        if instruction.is_branch {
            return;
        }
        for access in memory_accesses(&instruction, registers) {
            let Some((start, space)) = session.map_address_to_space(access.address) else {
                log::trace!("Access to unmapped ${:06X}", access.address);
                continue;
            };
            if session.classify_data(space, start, start + access.size - 1) {
                self.stats.data += 1;
            }
        }
    }
}

/// True when a committed instruction begins exactly at ROM `offset`.
fn starts_instruction(session: &Session, offset: u64) -> bool {
    let ledger = session.ledger(AddressSpace::Rom);
    match ledger.range_containing_address(offset) {
        Some(region) if region.kind() == RegionKind::Code => region
            .line_for_address(offset)
            .and_then(|line| region.address_for_line(line))
            == Some(offset),
        _ => false,
    }
}

/// Case- and whitespace-insensitive comparison of disassembly text.
fn same_text(traced: &str, decoded: &str) -> bool {
    let normalize = |s: &str| {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect::<String>()
    };
    normalize(traced) == normalize(decoded)
}
