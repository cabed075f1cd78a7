//! Range ledger: a gap-free, overlap-free classification of one address space.
//!
//! Every address in `[0, max]` belongs to exactly one [`Region`]. A fresh
//! ledger is a single Unknown region; classifying a span carves it out of the
//! Unknown region that contains it. Classified regions are never subdivided
//! or overwritten.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Address, AddressSpace, Instruction, ResourcerError, SymbolProvider};

/// Classification of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Unknown,
    Code,
    Data,
    String,
    Label,
    Comment,
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegionKind::Unknown => "unknown",
            RegionKind::Code => "code",
            RegionKind::Data => "data",
            RegionKind::String => "string",
            RegionKind::Label => "label",
            RegionKind::Comment => "comment",
        };
        write!(f, "{}", name)
    }
}

/// Kind-specific payload of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegionBody {
    /// Not yet classified; one line per byte
    Unknown,
    /// Decoded instructions tiling the region in order; one line each
    Code { instructions: Vec<Instruction> },
    /// Raw data; one line per `unit_size` bytes
    Data { unit_size: u64 },
    /// Text; one line per `unit_size` bytes
    String { unit_size: u64 },
    /// A named location; one line
    Label { name: String },
    /// Free text; one line per text line, all at the region start
    Comment { lines: Vec<String> },
}

impl RegionBody {
    pub fn kind(&self) -> RegionKind {
        match self {
            RegionBody::Unknown => RegionKind::Unknown,
            RegionBody::Code { .. } => RegionKind::Code,
            RegionBody::Data { .. } => RegionKind::Data,
            RegionBody::String { .. } => RegionKind::String,
            RegionBody::Label { .. } => RegionKind::Label,
            RegionBody::Comment { .. } => RegionKind::Comment,
        }
    }
}

/// One classified, contiguous span. `end` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    start: Address,
    end: Address,
    #[serde(flatten)]
    body: RegionBody,
}

impl Region {
    pub fn new(start: Address, end: Address, body: RegionBody) -> Self {
        Self { start, end, body }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    /// Number of bytes covered.
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn kind(&self) -> RegionKind {
        self.body.kind()
    }

    pub fn body(&self) -> &RegionBody {
        &self.body
    }

    pub fn contains(&self, address: Address) -> bool {
        self.start <= address && address <= self.end
    }

    /// Decoded instructions of a Code region; empty for every other kind.
    pub fn instructions(&self) -> &[Instruction] {
        match &self.body {
            RegionBody::Code { instructions } => instructions,
            _ => &[],
        }
    }

    /// Number of listing lines this region occupies.
    pub fn line_count(&self) -> u64 {
        match &self.body {
            RegionBody::Unknown => self.size(),
            RegionBody::Code { instructions } => instructions.len() as u64,
            RegionBody::Data { unit_size } | RegionBody::String { unit_size } => {
                self.size().div_ceil(*unit_size)
            }
            RegionBody::Label { .. } => 1,
            RegionBody::Comment { lines } => lines.len().max(1) as u64,
        }
    }

    /// Line within this region that `address` falls on.
    pub fn line_for_address(&self, address: Address) -> Option<u64> {
        if !self.contains(address) {
            return None;
        }
        let offset = address - self.start;
        match &self.body {
            RegionBody::Unknown => Some(offset),
            RegionBody::Data { unit_size } | RegionBody::String { unit_size } => {
                Some(offset / unit_size)
            }
            RegionBody::Code { instructions } => {
                let mut at = 0u64;
                for (line, insn) in instructions.iter().enumerate() {
                    at += insn.size() as u64;
                    if offset < at {
                        return Some(line as u64);
                    }
                }
                None
            }
            RegionBody::Label { .. } | RegionBody::Comment { .. } => Some(0),
        }
    }

    /// First address of `line` within this region.
    pub fn address_for_line(&self, line: u64) -> Option<Address> {
        if line >= self.line_count() {
            return None;
        }
        match &self.body {
            RegionBody::Unknown => Some(self.start + line),
            RegionBody::Data { unit_size } | RegionBody::String { unit_size } => {
                Some(self.start + line * unit_size)
            }
            RegionBody::Code { instructions } => Some(
                self.start
                    + instructions
                        .iter()
                        .take(line as usize)
                        .map(|i| i.size() as u64)
                        .sum::<u64>(),
            ),
            RegionBody::Label { .. } | RegionBody::Comment { .. } => Some(self.start),
        }
    }

    /// Rendered listing line. `image` holds the bytes of the address space,
    /// when it has any.
    pub fn line_info(
        &self,
        line: u64,
        image: Option<&[u8]>,
        symbols: &dyn SymbolProvider,
    ) -> Option<LineInfo> {
        let address = self.address_for_line(line)?;
        let image_bytes = |start: Address, len: u64| -> Vec<u8> {
            let end = (start + len).min(self.end + 1);
            image
                .and_then(|img| img.get(start as usize..(end as usize).min(img.len())))
                .map(<[u8]>::to_vec)
                .unwrap_or_default()
        };

        let (bytes, details, comment) = match &self.body {
            RegionBody::Unknown => {
                let bytes = image_bytes(address, 1);
                let details = match bytes.first() {
                    Some(&b) if b.is_ascii_graphic() || b == b' ' => (b as char).to_string(),
                    Some(_) => ".".to_string(),
                    None => String::new(),
                };
                (bytes, details, String::new())
            }
            RegionBody::Code { instructions } => {
                let insn = instructions.get(line as usize)?;
                (insn.bytes.clone(), insn.symbol_text(symbols), String::new())
            }
            RegionBody::Data { unit_size } => {
                let bytes = image_bytes(address, *unit_size);
                let details = if bytes.is_empty() {
                    String::new()
                } else {
                    let values = bytes
                        .iter()
                        .map(|b| format!("${:02X}", b))
                        .collect::<Vec<_>>()
                        .join(",");
                    format!("db {}", values)
                };
                (bytes, details, String::new())
            }
            RegionBody::String { unit_size } => {
                let bytes = image_bytes(address, *unit_size);
                let details = if bytes.is_empty() {
                    String::new()
                } else {
                    format!("db {}", quote_string(&bytes))
                };
                (bytes, details, String::new())
            }
            RegionBody::Label { name } => (Vec::new(), format!("{}:", name), String::new()),
            RegionBody::Comment { lines } => (
                Vec::new(),
                String::new(),
                lines.get(line as usize).cloned().unwrap_or_default(),
            ),
        };

        Some(LineInfo {
            line,
            address,
            kind: self.kind(),
            bytes,
            details,
            comment,
        })
    }

    fn check(&self) -> Result<(), String> {
        if self.start > self.end {
            return Err(format!("region ${:06X}-${:06X} is reversed", self.start, self.end));
        }
        match &self.body {
            RegionBody::Data { unit_size: 0 } | RegionBody::String { unit_size: 0 } => {
                Err(format!("region at ${:06X} has a zero unit size", self.start))
            }
            RegionBody::Code { instructions } => {
                if instructions.iter().any(|i| i.size() == 0) {
                    return Err(format!("empty instruction in code at ${:06X}", self.start));
                }
                let covered: u64 = instructions.iter().map(|i| i.size() as u64).sum();
                if covered != self.size() {
                    return Err(format!(
                        "code at ${:06X}-${:06X} covers {} bytes with instructions of {} bytes",
                        self.start,
                        self.end,
                        self.size(),
                        covered
                    ));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// Render bytes as an assembler string literal: printable runs quoted,
/// everything else as `$XX`.
fn quote_string(bytes: &[u8]) -> String {
    let mut parts = Vec::new();
    let mut run = String::new();
    for &b in bytes {
        if (b.is_ascii_graphic() || b == b' ') && b != b'"' {
            run.push(b as char);
        } else {
            if !run.is_empty() {
                parts.push(format!("\"{}\"", run));
                run.clear();
            }
            parts.push(format!("${:02X}", b));
        }
    }
    if !run.is_empty() {
        parts.push(format!("\"{}\"", run));
    }
    parts.join(",")
}

/// One rendered listing line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineInfo {
    /// Global line number within the ledger
    pub line: u64,
    /// Ledger offset of the line's first byte
    pub address: Address,
    pub kind: RegionKind,
    pub bytes: Vec<u8>,
    pub details: String,
    pub comment: String,
}

/// Ordered partition of `[0, max]` into regions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "LedgerRecord", into = "LedgerRecord")]
pub struct RangeLedger {
    space: AddressSpace,
    max: Address,
    regions: BTreeMap<Address, Region>,
}

#[derive(Serialize, Deserialize)]
struct LedgerRecord {
    space: AddressSpace,
    max: Address,
    ranges: Vec<Region>,
}

impl From<RangeLedger> for LedgerRecord {
    fn from(ledger: RangeLedger) -> Self {
        LedgerRecord {
            space: ledger.space,
            max: ledger.max,
            ranges: ledger.regions.into_values().collect(),
        }
    }
}

impl TryFrom<LedgerRecord> for RangeLedger {
    type Error = ResourcerError;

    fn try_from(record: LedgerRecord) -> Result<Self, Self::Error> {
        let mut regions = BTreeMap::new();
        for region in record.ranges {
            let start = region.start;
            if regions.insert(start, region).is_some() {
                return Err(ResourcerError::InvalidProject(format!(
                    "{}: two regions start at ${:06X}",
                    record.space, start
                )));
            }
        }
        let ledger = RangeLedger {
            space: record.space,
            max: record.max,
            regions,
        };
        ledger.validate()?;
        Ok(ledger)
    }
}

impl RangeLedger {
    /// A ledger covering `[0, max]` with a single Unknown region.
    pub fn new(space: AddressSpace, max: Address) -> Self {
        let mut regions = BTreeMap::new();
        regions.insert(0, Region::new(0, max, RegionBody::Unknown));
        Self {
            space,
            max,
            regions,
        }
    }

    /// A ledger covering `size` bytes.
    pub fn with_size(space: AddressSpace, size: u64) -> Result<Self, ResourcerError> {
        if size == 0 {
            return Err(ResourcerError::InvalidRange(format!(
                "{} address space cannot be empty",
                space
            )));
        }
        Ok(Self::new(space, size - 1))
    }

    pub fn space(&self) -> AddressSpace {
        self.space
    }

    /// Highest address (inclusive).
    pub fn max(&self) -> Address {
        self.max
    }

    /// Number of regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Regions in address order.
    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    /// Total listing lines.
    pub fn line_count(&self) -> u64 {
        self.regions.values().map(Region::line_count).sum()
    }

    pub fn range_containing_address(&self, address: Address) -> Option<&Region> {
        self.regions
            .range(..=address)
            .next_back()
            .map(|(_, r)| r)
            .filter(|r| r.contains(address))
    }

    /// The region that listing line `line` falls in, plus the line's offset
    /// within that region.
    pub fn range_containing_line(&self, line: u64) -> Option<(&Region, u64)> {
        let mut first = 0u64;
        for region in self.regions.values() {
            let count = region.line_count();
            if line < first + count {
                return Some((region, line - first));
            }
            first += count;
        }
        None
    }

    pub fn line_for_address(&self, address: Address) -> Option<u64> {
        let region = self.range_containing_address(address)?;
        let before: u64 = self
            .regions
            .range(..region.start)
            .map(|(_, r)| r.line_count())
            .sum();
        Some(before + region.line_for_address(address)?)
    }

    pub fn address_for_line(&self, line: u64) -> Option<Address> {
        let (region, offset) = self.range_containing_line(line)?;
        region.address_for_line(offset)
    }

    /// True when `[start, end]` lies entirely inside one Unknown region.
    pub fn region_is_unknown(&self, start: Address, end: Address) -> bool {
        if start > end || end > self.max {
            return false;
        }
        self.range_containing_address(start)
            .map(|r| r.kind() == RegionKind::Unknown && r.end >= end)
            .unwrap_or(false)
    }

    /// Kind of the region containing `address`.
    pub fn kind_at(&self, address: Address) -> Option<RegionKind> {
        self.range_containing_address(address).map(Region::kind)
    }

    /// Classify `[start, end]`, which must currently be entirely Unknown.
    pub fn add_typed_range(
        &mut self,
        start: Address,
        end: Address,
        body: RegionBody,
    ) -> Result<(), ResourcerError> {
        if body.kind() == RegionKind::Unknown {
            return self.add_unknown_range(start, end);
        }
        self.check_bounds(start, end)?;
        let region = Region::new(start, end, body);
        region.check().map_err(ResourcerError::InvalidRange)?;
        self.claim(region)?;
        if self.kind_at(start) == Some(RegionKind::Code) {
            self.merge_code(start);
        }
        Ok(())
    }

    /// Commit one decoded instruction at ledger offset `offset`, growing an
    /// adjacent Code region when there is one.
    pub fn add_instruction(
        &mut self,
        offset: Address,
        instruction: Instruction,
    ) -> Result<(), ResourcerError> {
        let size = instruction.size() as u64;
        if size == 0 {
            return Err(ResourcerError::InvalidRange(format!(
                "empty instruction at ${:06X}",
                offset
            )));
        }
        self.add_typed_range(
            offset,
            offset + size - 1,
            RegionBody::Code {
                instructions: vec![instruction],
            },
        )
    }

    /// Mark `[start, end]` as Unknown. Classified regions are never reverted,
    /// so this only succeeds on a span that is already Unknown.
    pub fn add_unknown_range(&mut self, start: Address, end: Address) -> Result<(), ResourcerError> {
        self.check_bounds(start, end)?;
        if self.region_is_unknown(start, end) {
            Ok(())
        } else {
            Err(self.conflict(start, end))
        }
    }

    /// Check the partition invariant and every region's internal consistency.
    pub fn validate(&self) -> Result<(), ResourcerError> {
        let invalid = |msg: String| ResourcerError::InvalidProject(format!("{}: {}", self.space, msg));

        let mut expected = 0u64;
        for (&key, region) in &self.regions {
            if key != region.start {
                return Err(invalid(format!("region keyed at ${:06X} starts at ${:06X}", key, region.start)));
            }
            if region.start != expected {
                return Err(invalid(format!("expected a region at ${:06X}, found ${:06X}", expected, region.start)));
            }
            region.check().map_err(invalid)?;
            if region.end > self.max {
                return Err(invalid(format!("region ${:06X}-${:06X} runs past the end", region.start, region.end)));
            }
            if region.end == self.max {
                if self.regions.range(region.start + 1..).next().is_some() {
                    return Err(invalid(format!("regions past the end ${:06X}", self.max)));
                }
                return Ok(());
            }
            expected = region.end + 1;
        }
        Err(invalid(format!("regions stop before the end ${:06X} (at ${:06X})", self.max, expected)))
    }

    /// Rendered listing line number `line`.
    pub fn line_info(
        &self,
        line: u64,
        image: Option<&[u8]>,
        symbols: &dyn SymbolProvider,
    ) -> Option<LineInfo> {
        let (region, offset) = self.range_containing_line(line)?;
        let mut info = region.line_info(offset, image, symbols)?;
        info.line = line;
        Some(info)
    }

    fn check_bounds(&self, start: Address, end: Address) -> Result<(), ResourcerError> {
        if start > end {
            return Err(ResourcerError::InvalidRange(format!(
                "start ${:06X} is after end ${:06X}",
                start, end
            )));
        }
        if end > self.max {
            return Err(ResourcerError::AddressOutOfRange {
                space: self.space,
                address: end,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Conflict describing the first classified region overlapping
    /// `[start, end]`.
    fn conflict(&self, start: Address, end: Address) -> ResourcerError {
        let existing = self
            .regions
            .values()
            .skip_while(|r| r.end < start)
            .take_while(|r| r.start <= end)
            .map(Region::kind)
            .find(|k| *k != RegionKind::Unknown)
            .unwrap_or(RegionKind::Unknown);
        ResourcerError::ClassificationConflict {
            space: self.space,
            start,
            end,
            existing,
        }
    }

    /// Replace the middle of the Unknown region hosting `region` with it,
    /// leaving Unknown remainders on either side.
    fn claim(&mut self, region: Region) -> Result<(), ResourcerError> {
        if !self.region_is_unknown(region.start, region.end) {
            return Err(self.conflict(region.start, region.end));
        }
        let host_start = match self.range_containing_address(region.start) {
            Some(host) => host.start,
            None => return Err(self.conflict(region.start, region.end)),
        };
        let Some(host) = self.regions.remove(&host_start) else {
            return Err(self.conflict(region.start, region.end));
        };

        if region.start > host.start {
            self.regions.insert(
                host.start,
                Region::new(host.start, region.start - 1, RegionBody::Unknown),
            );
        }
        if region.end < host.end {
            self.regions.insert(
                region.end + 1,
                Region::new(region.end + 1, host.end, RegionBody::Unknown),
            );
        }
        self.regions.insert(region.start, region);
        Ok(())
    }

    /// Fold the Code region at `start` into Code neighbours it touches.
    fn merge_code(&mut self, start: Address) {
        let mut key = start;
        let previous = self
            .regions
            .range(..start)
            .next_back()
            .map(|(&k, r)| (k, r.end));
        if let Some((prev_key, prev_end)) = previous {
            if prev_end + 1 == start && self.absorb(prev_key, start) {
                key = prev_key;
            }
        }
        if let Some(next_start) = self.regions.get(&key).map(|r| r.end + 1) {
            self.absorb(key, next_start);
        }
    }

    /// Move the instructions of the Code region at `from` onto the end of the
    /// Code region at `into`. Both must be Code.
    fn absorb(&mut self, into: Address, from: Address) -> bool {
        let is_code = |key: &Address| {
            self.regions.get(key).map(Region::kind) == Some(RegionKind::Code)
        };
        if !is_code(&into) || !is_code(&from) {
            return false;
        }
        let Some(source) = self.regions.remove(&from) else {
            return false;
        };
        let Some(target) = self.regions.get_mut(&into) else {
            return false;
        };
        if let (RegionBody::Code { instructions }, RegionBody::Code { instructions: more }) =
            (&mut target.body, source.body)
        {
            instructions.extend(more);
            target.end = source.end;
        }
        true
    }
}
