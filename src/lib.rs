//! Core IR, traits, and errors for the retro resourcer.
//!
//! This library turns raw 65816 ROM bytes into symbolic instructions and
//! incrementally builds a classification map ("what is code, what is data,
//! what is still unknown") over a ROM and a working-RAM address space. Both
//! static control-flow following and live execution traces feed the map.
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use std::fs;
//! use retro_resourcer::{
//!     config::SessionConfig,
//!     decoder::W65816Decoder,
//!     strategy::recursive,
//!     AddressSpace, CpuState, Session,
//! };
//!
//! let rom = fs::read("path/to/game.sfc").unwrap();
//! let config = SessionConfig::default();
//! let mut session = Session::new(rom, config).unwrap();
//!
//! // Flood-fill from the reset vector in emulation mode
//! let mut decoder = W65816Decoder::new();
//! let stats = recursive::run_from(
//!     &mut session,
//!     &mut decoder,
//!     0x8000,
//!     CpuState::W65816(Default::default()),
//! );
//! println!("{}", stats);
//!
//! for region in session.ledger(AddressSpace::Rom).regions() {
//!     println!("{:06X}-{:06X} {}", region.start(), region.end(), region.kind());
//! }
//! ```

pub mod config;
pub mod decoder;
pub mod format;
pub mod ledger;
pub mod mapping;
pub mod opcodes;
pub mod parser;
pub mod project;
pub mod session;
pub mod state;
pub mod strategy;
pub mod symbols;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use ledger::{LineInfo, RangeLedger, Region, RegionBody, RegionKind};
pub use mapping::{AddressSpace, AddressTranslator};
pub use session::Session;
pub use state::{CpuState, RegisterSnapshot, W65816State};
pub use symbols::{SymbolProvider, SymbolTable};

/// Represents an address (CPU-visible or ledger offset)
pub type Address = u64;

/// Maximum instruction size in bytes for any supported decoder
pub const MAX_INSTRUCTION_SIZE: usize = 4;

/// Byte order of multi-byte operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => write!(f, "little"),
            Endianness::Big => write!(f, "big"),
        }
    }
}

/// Syntactic template an operand value is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperandSyntax {
    /// `#v`
    Immediate,
    /// `v`
    Plain,
    /// `v,X`
    IndexedX,
    /// `v,Y`
    IndexedY,
    /// `v,S`
    StackRelative,
    /// `(v)`
    Indirect,
    /// `(v,X)`
    IndexedIndirectX,
    /// `(v),Y`
    IndirectIndexedY,
    /// `[v]`
    IndirectLong,
    /// `[v],Y`
    IndirectLongIndexedY,
    /// `(v,S),Y`
    StackRelativeIndirectY,
}

impl OperandSyntax {
    /// Wrap an already rendered value (hex literal or symbol name).
    pub fn render(&self, inner: &str) -> String {
        match self {
            OperandSyntax::Immediate => format!("#{}", inner),
            OperandSyntax::Plain => inner.to_string(),
            OperandSyntax::IndexedX => format!("{},X", inner),
            OperandSyntax::IndexedY => format!("{},Y", inner),
            OperandSyntax::StackRelative => format!("{},S", inner),
            OperandSyntax::Indirect => format!("({})", inner),
            OperandSyntax::IndexedIndirectX => format!("({},X)", inner),
            OperandSyntax::IndirectIndexedY => format!("({}),Y", inner),
            OperandSyntax::IndirectLong => format!("[{}]", inner),
            OperandSyntax::IndirectLongIndexedY => format!("[{}],Y", inner),
            OperandSyntax::StackRelativeIndirectY => format!("({},S),Y", inner),
        }
    }
}

/// One decoded operand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operand {
    /// Rendering template
    pub syntax: OperandSyntax,
    /// Width of the value in bytes (controls hex digits and symbol lookup)
    pub width: u8,
    /// Numeric value
    pub value: u64,
    /// Operand is read by the instruction
    pub is_source: bool,
    /// Operand is written by the instruction
    pub is_destination: bool,
}

impl Operand {
    /// Create an operand with neither role flag set.
    pub fn new(syntax: OperandSyntax, width: u8, value: u64) -> Self {
        Self {
            syntax,
            width,
            value,
            is_source: false,
            is_destination: false,
        }
    }

    /// Mark this operand as the source of a dual-address instruction.
    pub fn as_source(mut self) -> Self {
        self.is_source = true;
        self
    }

    /// Mark this operand as the destination of a dual-address instruction.
    pub fn as_destination(mut self) -> Self {
        self.is_destination = true;
        self
    }

    /// Canonical, unsymbolicated text (e.g. `$1234,X`).
    pub fn text(&self) -> String {
        let digits = self.width as usize * 2;
        self.syntax.render(&format!("${:0width$X}", self.value, width = digits))
    }

    /// Text with the value replaced by a symbol name when one exists.
    pub fn symbol_text(&self, symbols: &dyn SymbolProvider) -> String {
        match symbols.get_symbol(self.value, self.width) {
            Some(name) => self.syntax.render(name),
            None => self.text(),
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.text())
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// CPU address of the instruction
    pub address: Address,
    /// Instruction mnemonic (e.g. "LDA")
    pub mnemonic: String,
    /// Decoded operands, in assembler order
    pub operands: Vec<Operand>,
    /// Raw bytes of the instruction
    pub bytes: Vec<u8>,
    /// Transfers control to a statically known target
    pub is_branch: bool,
    /// Control never falls through to the next address
    pub is_terminator: bool,
    /// The instruction changes decode-affecting state in a way that cannot be
    /// determined from the instruction stream alone
    #[serde(default)]
    pub invalidates_state: bool,
    /// Addresses execution may continue at
    pub next_addresses: Vec<Address>,
    /// Processor state in effect before this instruction executed
    pub state: CpuState,
}

impl Instruction {
    /// Create a non-branching instruction with no successors.
    pub fn new(
        address: Address,
        mnemonic: impl Into<String>,
        operands: Vec<Operand>,
        bytes: Vec<u8>,
        state: CpuState,
    ) -> Self {
        Self {
            address,
            mnemonic: mnemonic.into(),
            operands,
            bytes,
            is_branch: false,
            is_terminator: false,
            invalidates_state: false,
            next_addresses: Vec::new(),
            state,
        }
    }

    /// Size of the instruction in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Address of the byte following this instruction.
    pub fn fallthrough(&self) -> Address {
        self.address + self.bytes.len() as Address
    }

    /// Canonical text, e.g. `LDA #$42`.
    pub fn text(&self) -> String {
        self.render(|op| op.text())
    }

    /// Text with symbol substitution applied to every operand.
    pub fn symbol_text(&self, symbols: &dyn SymbolProvider) -> String {
        self.render(|op| op.symbol_text(symbols))
    }

    fn render<F: Fn(&Operand) -> String>(&self, op_text: F) -> String {
        if self.operands.is_empty() {
            return self.mnemonic.clone();
        }
        let operands = self
            .operands
            .iter()
            .map(op_text)
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} {}", self.mnemonic, operands)
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06X}: {}", self.address, self.text())
    }
}

/// Structural decode failure for a single instruction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Opcode table length disagrees with the addressing mode
    #[error("Invalid {mnemonic} instruction length: table says {table}, mode requires {mode}")]
    InvalidLength {
        mnemonic: &'static str,
        table: usize,
        mode: usize,
    },

    /// A branch whose target could not be resolved
    #[error("Unresolved branch target for {mnemonic} at ${address:06X}")]
    UnresolvedBranchTarget { mnemonic: String, address: Address },

    /// Address lies outside the decoder's address space
    #[error("Address ${0:06X} is outside the address space")]
    AddressOutOfSpace(Address),
}

/// Result of attempting to decode one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// The window is too short; this many more bytes are required
    NeedMoreBytes(usize),
    /// The bytes do not form a valid instruction
    Error(DecodeError),
    /// An instruction was decoded
    Success {
        instruction: Instruction,
        bytes_consumed: usize,
    },
}

impl DecodeResult {
    /// True when an instruction was decoded.
    pub fn is_success(&self) -> bool {
        matches!(self, DecodeResult::Success { .. })
    }

    /// Convert into a `Result`, folding `NeedMoreBytes` into an error.
    pub fn into_result(self) -> Result<(Instruction, usize), ResourcerError> {
        match self {
            DecodeResult::Success {
                instruction,
                bytes_consumed,
            } => Ok((instruction, bytes_consumed)),
            DecodeResult::NeedMoreBytes(n) => Err(ResourcerError::NeedMoreBytes(n)),
            DecodeResult::Error(e) => Err(ResourcerError::Decode(e)),
        }
    }
}

/// Decoder trait: architecture-specific disassembler with mutable state.
///
/// Adding a target ISA means implementing this trait; nothing else in the
/// crate dispatches on the architecture name.
pub trait Decoder: Send {
    /// Name of the CPU architecture (e.g. "65816")
    fn architecture_name(&self) -> &'static str;

    /// Byte order of multi-byte operands
    fn endianness(&self) -> Endianness;

    /// Current decode-affecting state
    fn state(&self) -> CpuState;

    /// Replace the current state. A state from a different architecture
    /// resets the decoder to its initial state.
    fn set_state(&mut self, state: CpuState);

    /// Decode one instruction from the start of `bytes`.
    ///
    /// On `NeedMoreBytes` and `Error` the decoder state is left untouched, so
    /// the call can be repeated with a larger window.
    fn decode_next(&mut self, bytes: &[u8], address: Address) -> DecodeResult;

    /// Read `size` bytes at `offset` as an unsigned value in this
    /// architecture's byte order.
    fn read_value(&self, bytes: &[u8], offset: usize, size: usize) -> u64 {
        let slice = &bytes[offset..offset + size];
        match self.endianness() {
            Endianness::Little => slice
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64),
            Endianness::Big => slice.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        }
    }
}

/// Error type for resourcing operations
#[derive(Debug, thiserror::Error)]
pub enum ResourcerError {
    /// Structural decode failure
    #[error("Decoder error: {0}")]
    Decode(#[from] DecodeError),

    /// The image ended before the instruction did
    #[error("Need {0} more byte(s) to complete the instruction")]
    NeedMoreBytes(usize),

    /// Attempted to classify a span that is not entirely Unknown
    #[error("Classification conflict in {space}: ${start:06X}-${end:06X} overlaps {existing}")]
    ClassificationConflict {
        space: AddressSpace,
        start: Address,
        end: Address,
        existing: RegionKind,
    },

    /// Address beyond the end of an address space
    #[error("Address ${address:06X} is out of range for {space} (max ${max:06X})")]
    AddressOutOfRange {
        space: AddressSpace,
        address: Address,
        max: Address,
    },

    /// Listing line beyond the end of an address space
    #[error("Line {0} is out of range")]
    LineOutOfRange(u64),

    /// The CPU address does not map into any address space
    #[error("CPU address ${0:06X} is not mapped")]
    UnmappedAddress(Address),

    /// The CPU address maps into a space that has no image bytes
    #[error("CPU address ${address:06X} maps into {space}, which has no image bytes")]
    NoImageBytes { address: Address, space: AddressSpace },

    /// A range request that is malformed regardless of ledger contents
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// A trace line that does not match the record format
    #[error("Malformed trace record: {0}")]
    MalformedTraceRecord(String),

    /// An encoding this crate does not implement
    #[error("Unsupported representation: {0}")]
    UnsupportedRepresentation(String),

    /// A project file that cannot be applied to this session
    #[error("Invalid project: {0}")]
    InvalidProject(String),

    /// Trace pattern failed to compile
    #[error("Invalid trace pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Generic error
    #[error("{0}")]
    Generic(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::NoSymbols;

    fn lda_absolute() -> Instruction {
        Instruction::new(
            0x8000,
            "LDA",
            vec![Operand::new(OperandSyntax::IndexedX, 2, 0x2100)],
            vec![0xBD, 0x00, 0x21],
            CpuState::W65816(W65816State::default()),
        )
    }

    #[test]
    fn test_operand_text() {
        assert_eq!(Operand::new(OperandSyntax::Immediate, 1, 0x42).text(), "#$42");
        assert_eq!(Operand::new(OperandSyntax::Immediate, 2, 0x1242).text(), "#$1242");
        assert_eq!(Operand::new(OperandSyntax::IndexedY, 2, 0x1234).text(), "$1234,Y");
        assert_eq!(Operand::new(OperandSyntax::IndirectLong, 1, 0x42).text(), "[$42]");
        assert_eq!(
            Operand::new(OperandSyntax::StackRelativeIndirectY, 1, 0x03).text(),
            "($03,S),Y"
        );
    }

    #[test]
    fn test_operand_roles() {
        let plain = Operand::new(OperandSyntax::Plain, 1, 0x7E);
        assert!(!plain.is_source && !plain.is_destination);

        let src = plain.clone().as_source();
        assert!(src.is_source && !src.is_destination);

        let dst = plain.as_destination();
        assert!(!dst.is_source && dst.is_destination);
    }

    #[test]
    fn test_symbol_text_falls_back_to_text() {
        let op = Operand::new(OperandSyntax::Plain, 2, 0x2100);
        assert_eq!(op.symbol_text(&NoSymbols), op.text());

        let mut symbols = SymbolTable::new();
        symbols.add(0x2100, 2, "INIDISP");
        assert_eq!(op.symbol_text(&symbols), "INIDISP");

        // width participates in the lookup
        let narrow = Operand::new(OperandSyntax::Plain, 1, 0x2100);
        assert_eq!(narrow.symbol_text(&symbols), narrow.text());
    }

    #[test]
    fn test_instruction_text_forms_agree() {
        let insn = lda_absolute();
        assert_eq!(insn.text(), "LDA $2100,X");

        let mut symbols = SymbolTable::new();
        symbols.add(0x2100, 2, "INIDISP");
        assert_eq!(insn.symbol_text(&symbols), "LDA INIDISP,X");
        assert_eq!(insn.symbol_text(&NoSymbols), insn.text());
    }

    #[test]
    fn test_instruction_basics() {
        let insn = lda_absolute();
        assert_eq!(insn.size(), 3);
        assert_eq!(insn.fallthrough(), 0x8003);
        assert!(!insn.is_branch);
        assert!(!insn.is_terminator);
        assert!(insn.next_addresses.is_empty());
        assert_eq!(insn.to_string(), "008000: LDA $2100,X");

        let nop = Instruction::new(0x8000, "NOP", vec![], vec![0xEA], CpuState::Empty);
        assert_eq!(nop.text(), "NOP");
    }

    #[test]
    fn test_decode_result_into_result() {
        assert!(matches!(
            DecodeResult::NeedMoreBytes(2).into_result(),
            Err(ResourcerError::NeedMoreBytes(2))
        ));

        let err = DecodeResult::Error(DecodeError::AddressOutOfSpace(0x1000000));
        assert!(!err.is_success());
        assert!(matches!(err.into_result(), Err(ResourcerError::Decode(_))));

        let ok = DecodeResult::Success {
            instruction: lda_absolute(),
            bytes_consumed: 3,
        };
        assert!(ok.is_success());
        let (insn, n) = ok.into_result().unwrap();
        assert_eq!(n, 3);
        assert_eq!(insn.mnemonic, "LDA");
    }
}
