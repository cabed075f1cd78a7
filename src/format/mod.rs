//! Listing export

mod csv;
mod json;

pub use self::csv::*;
pub use self::json::*;

use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;

use crate::ledger::LineInfo;
use crate::{AddressSpace, ResourcerError, Session};

/// Supported listing formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Plain text listing (default)
    #[default]
    Text,
    /// CSV with a header row
    Csv,
    /// JSON Lines format (one JSON object per listing line)
    JsonLines,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::JsonLines => write!(f, "jsonl"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Ok(OutputFormat::Text),
            "csv" => Ok(OutputFormat::Csv),
            "jsonl" | "jsonlines" | "json-lines" => Ok(OutputFormat::JsonLines),
            _ => Err(format!("Unknown output format: {}", s)),
        }
    }
}

impl OutputFormat {
    /// Get all available output formats
    pub fn available_formats() -> &'static [Self] {
        &[OutputFormat::Text, OutputFormat::Csv, OutputFormat::JsonLines]
    }

    /// Get a formatter for this output format
    pub fn get_formatter(&self) -> Box<dyn ListingFormatter> {
        match self {
            OutputFormat::Text => Box::new(TextFormatter),
            OutputFormat::Csv => Box::new(CsvFormatter),
            OutputFormat::JsonLines => Box::new(JsonLinesFormatter),
        }
    }
}

/// Renders every line of one ledger.
pub trait ListingFormatter {
    fn format(&self, session: &Session, space: AddressSpace) -> Result<String, ResourcerError>;
}

/// Format listing lines as aligned text
pub struct TextFormatter;

/// Format listing lines as CSV
pub struct CsvFormatter;

/// Format listing lines as JSON Lines
pub struct JsonLinesFormatter;

/// Every listing line of `space`, in order.
pub(crate) fn listing_lines(
    session: &Session,
    space: AddressSpace,
) -> impl Iterator<Item = LineInfo> + '_ {
    let count = session.ledger(space).line_count();
    (0..count).filter_map(move |line| session.line_info(space, line).ok())
}

/// Space-separated upper-case hex.
pub(crate) fn hex_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

impl ListingFormatter for TextFormatter {
    fn format(&self, session: &Session, space: AddressSpace) -> Result<String, ResourcerError> {
        let mut output = String::new();
        for info in listing_lines(session, space) {
            let mut line = format!(
                "{:06X}  {:<11}  {}",
                info.address,
                hex_bytes(&info.bytes),
                info.details
            );
            if !info.comment.is_empty() {
                if !info.details.is_empty() {
                    line = format!("{:<40}", line);
                }
                line.push_str("; ");
                line.push_str(&info.comment);
            }
            output.push_str(line.trim_end());
            output.push('\n');
        }
        Ok(output)
    }
}
