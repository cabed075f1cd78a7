//! A resourcing session: one ROM image and everything learned about it.

use std::fmt;
use std::path::Path;

use crate::config::SessionConfig;
use crate::ledger::LineInfo;
use crate::mapping::AddressTranslator;
use crate::strategy::linear;
use crate::{
    project, Address, AddressSpace, Decoder, Instruction, RangeLedger, RegionBody, RegionKind,
    ResourcerError, SymbolTable,
};

/// A rejected classification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub space: AddressSpace,
    pub start: Address,
    pub end: Address,
    pub existing: RegionKind,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ${:06X}-${:06X} already {}",
            self.space, self.start, self.end, self.existing
        )
    }
}

/// Bounded record of conflicts; the total is always counted.
#[derive(Debug, Clone, Default)]
pub struct ConflictLog {
    recorded: Vec<Conflict>,
    total: u64,
    limit: usize,
}

impl ConflictLog {
    pub fn new(limit: usize) -> Self {
        Self {
            recorded: Vec::new(),
            total: 0,
            limit,
        }
    }

    pub fn record(&mut self, conflict: Conflict) {
        self.total += 1;
        if self.recorded.len() < self.limit {
            self.recorded.push(conflict);
        }
    }

    /// Conflicts kept individually, oldest first.
    pub fn recorded(&self) -> &[Conflict] {
        &self.recorded
    }

    /// Every conflict seen, including those past the limit.
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn clear(&mut self) {
        self.recorded.clear();
        self.total = 0;
    }
}

/// Owns the ROM image, both ledgers, the address translator and symbols.
///
/// All classification goes through here so that rejected requests end up in
/// the conflict log.
pub struct Session {
    config: SessionConfig,
    rom: Vec<u8>,
    rom_ledger: RangeLedger,
    ram_ledger: RangeLedger,
    translator: Box<dyn AddressTranslator>,
    symbols: SymbolTable,
    conflicts: ConflictLog,
}

impl Session {
    /// Start a fresh session with everything Unknown.
    pub fn new(rom: Vec<u8>, config: SessionConfig) -> Result<Self, ResourcerError> {
        let rom_ledger = RangeLedger::with_size(AddressSpace::Rom, rom.len() as u64)?;
        let ram_ledger = RangeLedger::with_size(AddressSpace::Ram, config.ram_size)?;
        log::info!(
            "New session: {} bytes of ROM, {} bytes of RAM, {} mapping",
            rom.len(),
            config.ram_size,
            config.mapping
        );
        Ok(Self {
            translator: config.mapping.translator(),
            conflicts: ConflictLog::new(config.max_recorded_conflicts),
            config,
            rom,
            rom_ledger,
            ram_ledger,
            symbols: SymbolTable::new(),
        })
    }

    /// Replace the address translator chosen by the config.
    pub fn with_translator(mut self, translator: Box<dyn AddressTranslator>) -> Self {
        self.translator = translator;
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    pub fn ledger(&self, space: AddressSpace) -> &RangeLedger {
        match space {
            AddressSpace::Rom => &self.rom_ledger,
            AddressSpace::Ram => &self.ram_ledger,
        }
    }

    fn ledger_mut(&mut self, space: AddressSpace) -> &mut RangeLedger {
        match space {
            AddressSpace::Rom => &mut self.rom_ledger,
            AddressSpace::Ram => &mut self.ram_ledger,
        }
    }

    /// Bytes backing `space`; RAM contents are not known statically.
    pub fn image(&self, space: AddressSpace) -> Option<&[u8]> {
        match space {
            AddressSpace::Rom => Some(&self.rom),
            AddressSpace::Ram => None,
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut SymbolTable {
        &mut self.symbols
    }

    pub fn conflicts(&self) -> &ConflictLog {
        &self.conflicts
    }

    pub fn map_address_to_space(&self, address: Address) -> Option<(Address, AddressSpace)> {
        self.translator.map(address)
    }

    /// Up to `len` ROM bytes starting at `offset`, clipped at the end of the
    /// image.
    pub fn fetch_bytes(&self, offset: Address, len: usize) -> &[u8] {
        let start = (offset as usize).min(self.rom.len());
        let end = start.saturating_add(len).min(self.rom.len());
        &self.rom[start..end]
    }

    pub fn region_is_unknown(&self, space: AddressSpace, start: Address, end: Address) -> bool {
        self.ledger(space).region_is_unknown(start, end)
    }

    pub fn line_for_address(&self, space: AddressSpace, address: Address) -> Option<u64> {
        self.ledger(space).line_for_address(address)
    }

    pub fn address_for_line(&self, space: AddressSpace, line: u64) -> Option<Address> {
        self.ledger(space).address_for_line(line)
    }

    /// Rendered listing line, with operands symbolicated.
    pub fn line_info(&self, space: AddressSpace, line: u64) -> Result<LineInfo, ResourcerError> {
        self.ledger(space)
            .line_info(line, self.image(space), &self.symbols)
            .ok_or(ResourcerError::LineOutOfRange(line))
    }

    /// Decode forward from CPU `address`, committing each instruction as
    /// Code. Stops at the first address that is not Unknown, before any
    /// instruction that would run past `end` when given, otherwise after the
    /// first terminator. Returns the last instruction committed.
    pub fn add_code_range(
        &mut self,
        decoder: &mut dyn Decoder,
        address: Address,
        end: Option<Address>,
    ) -> Result<Instruction, ResourcerError> {
        linear::run(self, decoder, address, end)
    }

    pub fn add_data_range(
        &mut self,
        space: AddressSpace,
        start: Address,
        end: Address,
        unit_size: Option<u64>,
    ) -> Result<(), ResourcerError> {
        let unit_size = unit_size.unwrap_or(self.config.data_unit_size);
        self.add_typed_range(space, start, end, RegionBody::Data { unit_size })
    }

    pub fn add_string_range(
        &mut self,
        space: AddressSpace,
        start: Address,
        end: Address,
        unit_size: Option<u64>,
    ) -> Result<(), ResourcerError> {
        let unit_size = unit_size.unwrap_or(self.config.string_unit_size);
        self.add_typed_range(space, start, end, RegionBody::String { unit_size })
    }

    /// Succeeds only when `[start, end]` is already Unknown; classified
    /// ranges are never reverted.
    pub fn add_unknown_range(
        &mut self,
        space: AddressSpace,
        start: Address,
        end: Address,
    ) -> Result<(), ResourcerError> {
        let result = self.ledger_mut(space).add_unknown_range(start, end);
        self.note(result)
    }

    pub fn add_label(
        &mut self,
        space: AddressSpace,
        address: Address,
        name: impl Into<String>,
    ) -> Result<(), ResourcerError> {
        let name = name.into();
        self.add_typed_range(space, address, address, RegionBody::Label { name })
    }

    pub fn add_comment(
        &mut self,
        space: AddressSpace,
        address: Address,
        lines: Vec<String>,
    ) -> Result<(), ResourcerError> {
        self.add_typed_range(space, address, address, RegionBody::Comment { lines })
    }

    pub fn add_typed_range(
        &mut self,
        space: AddressSpace,
        start: Address,
        end: Address,
        body: RegionBody,
    ) -> Result<(), ResourcerError> {
        if space == AddressSpace::Ram && body.kind() == RegionKind::Code {
            return Err(ResourcerError::UnsupportedRepresentation(
                "code ranges need image bytes; RAM has none".into(),
            ));
        }
        let result = self.ledger_mut(space).add_typed_range(start, end, body);
        self.note(result)
    }

    /// Commit one decoded instruction at ROM offset `offset`.
    pub fn commit_instruction(
        &mut self,
        offset: Address,
        instruction: Instruction,
    ) -> Result<(), ResourcerError> {
        let result = self.rom_ledger.add_instruction(offset, instruction);
        self.note(result)
    }

    /// Best-effort Data classification: applied only when the exact span is
    /// Unknown, otherwise recorded as a conflict. Spans past the end of the
    /// space are ignored.
    pub fn classify_data(&mut self, space: AddressSpace, start: Address, end: Address) -> bool {
        if end > self.ledger(space).max() {
            log::debug!(
                "Ignoring {} access ${:06X}-${:06X} past the end of the space",
                space,
                start,
                end
            );
            return false;
        }
        self.add_data_range(space, start, end, None).is_ok()
    }

    /// Write both ledgers and the symbol table to `path`.
    pub fn save_project<P: AsRef<Path>>(&self, path: P) -> Result<(), ResourcerError> {
        project::save(self, path.as_ref())
    }

    /// Replace both ledgers and the symbol table with those saved at `path`.
    /// Nothing changes unless the whole file is valid for this ROM.
    pub fn load_project<P: AsRef<Path>>(&mut self, path: P) -> Result<(), ResourcerError> {
        let file = project::load(path.as_ref())?;
        self.apply_project(file)
    }

    pub(crate) fn apply_project(&mut self, file: project::ProjectFile) -> Result<(), ResourcerError> {
        let (rom, ram, symbols) = file.into_parts(self.rom.len() as u64, self.config.ram_size)?;
        self.rom_ledger = rom;
        self.ram_ledger = ram;
        self.symbols = symbols;
        log::info!(
            "Loaded project: {} ROM ranges, {} RAM ranges, {} symbols",
            self.rom_ledger.len(),
            self.ram_ledger.len(),
            self.symbols.len()
        );
        Ok(())
    }

    /// Record classification conflicts and pass the result through.
    fn note(&mut self, result: Result<(), ResourcerError>) -> Result<(), ResourcerError> {
        if let Err(ResourcerError::ClassificationConflict {
            space,
            start,
            end,
            existing,
        }) = &result
        {
            let conflict = Conflict {
                space: *space,
                start: *start,
                end: *end,
                existing: *existing,
            };
            log::warn!("Classification conflict: {}", conflict);
            self.conflicts.record(conflict);
        }
        result
    }
}
