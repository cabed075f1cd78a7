//! Execution trace record parsing.
//!
//! One record per executed instruction:
//!
//! ```text
//! E=01|P=34|DB=00|D=0000|X=0000|Y=0000|S=01FF|00:8000: SEI
//! ```
//!
//! Fields are fixed-width upper-case hex. Lines that do not match are
//! rejected individually.

use regex::Regex;

use crate::{Address, RegisterSnapshot, ResourcerError};

const RECORD_PATTERN: &str = concat!(
    r"^E=([0-9A-F]{2})\|P=([0-9A-F]{2})\|DB=([0-9A-F]{2})\|D=([0-9A-F]{4})",
    r"\|X=([0-9A-F]{4})\|Y=([0-9A-F]{4})\|S=([0-9A-F]{4})",
    r"\|([0-9A-F]{2}):([0-9A-F]{4}):\s*(.*?)\s*$",
);

/// One parsed trace line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    /// Register file at the start of the instruction
    pub registers: RegisterSnapshot,
    /// Disassembly text as printed by the tracer
    pub text: String,
}

impl TraceRecord {
    /// CPU address of the traced instruction.
    pub fn address(&self) -> Address {
        self.registers.address()
    }
}

/// Compiled trace record parser.
#[derive(Debug, Clone)]
pub struct TraceParser {
    pattern: Regex,
}

impl TraceParser {
    pub fn new() -> Result<Self, ResourcerError> {
        Ok(Self {
            pattern: Regex::new(RECORD_PATTERN)?,
        })
    }

    /// Parse one line.
    pub fn parse_line(&self, line: &str) -> Result<TraceRecord, ResourcerError> {
        let malformed = || ResourcerError::MalformedTraceRecord(line.trim_end().to_string());
        let caps = self.pattern.captures(line).ok_or_else(malformed)?;

        let byte = |i: usize| {
            caps.get(i)
                .and_then(|m| u8::from_str_radix(m.as_str(), 16).ok())
                .ok_or_else(malformed)
        };
        let word = |i: usize| {
            caps.get(i)
                .and_then(|m| u16::from_str_radix(m.as_str(), 16).ok())
                .ok_or_else(malformed)
        };

        let registers = RegisterSnapshot {
            e: byte(1)?,
            p: byte(2)?,
            db: byte(3)?,
            d: word(4)?,
            x: word(5)?,
            y: word(6)?,
            s: word(7)?,
            pb: byte(8)?,
            pc: word(9)?,
        };
        let text = caps
            .get(10)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        Ok(TraceRecord { registers, text })
    }
}
