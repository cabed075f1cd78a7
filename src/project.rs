//! Project files: both ledgers and the symbol table as versioned JSON.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{AddressSpace, RangeLedger, ResourcerError, Session, SymbolTable};

/// Current project file version.
pub const PROJECT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ledgers {
    pub rom: RangeLedger,
    pub ram: RangeLedger,
}

/// On-disk form of a session's analysis state.
///
/// Each ledger validates its own partition while deserializing, so a file
/// that parses always holds two well-formed ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub version: u32,
    /// Size of the ROM image the project was built against
    pub rom_size: u64,
    pub ledgers: Ledgers,
    #[serde(default)]
    pub symbols: SymbolTable,
}

impl ProjectFile {
    /// Snapshot the analysis state of `session`.
    pub fn from_session(session: &Session) -> Self {
        Self {
            version: PROJECT_VERSION,
            rom_size: session.rom().len() as u64,
            ledgers: Ledgers {
                rom: session.ledger(AddressSpace::Rom).clone(),
                ram: session.ledger(AddressSpace::Ram).clone(),
            },
            symbols: session.symbols().clone(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, ResourcerError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, ResourcerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check the file against a session with `rom_len` bytes of ROM and
    /// `ram_size` bytes of RAM, and split it into its parts.
    pub fn into_parts(
        self,
        rom_len: u64,
        ram_size: u64,
    ) -> Result<(RangeLedger, RangeLedger, SymbolTable), ResourcerError> {
        if self.version != PROJECT_VERSION {
            return Err(ResourcerError::InvalidProject(format!(
                "unsupported version {} (expected {})",
                self.version, PROJECT_VERSION
            )));
        }
        if self.rom_size != rom_len {
            return Err(ResourcerError::InvalidProject(format!(
                "built for a {} byte ROM, this one has {} bytes",
                self.rom_size, rom_len
            )));
        }
        let Ledgers { rom, ram } = self.ledgers;
        check_ledger(&rom, AddressSpace::Rom, rom_len)?;
        check_ledger(&ram, AddressSpace::Ram, ram_size)?;
        Ok((rom, ram, self.symbols))
    }
}

fn check_ledger(ledger: &RangeLedger, space: AddressSpace, size: u64) -> Result<(), ResourcerError> {
    if ledger.space() != space {
        return Err(ResourcerError::InvalidProject(format!(
            "{} ledger found where the {} ledger belongs",
            ledger.space(),
            space
        )));
    }
    if ledger.max() + 1 != size {
        return Err(ResourcerError::InvalidProject(format!(
            "{} ledger covers {} bytes, expected {}",
            space,
            ledger.max() + 1,
            size
        )));
    }
    Ok(())
}

/// Write the analysis state of `session` to `path`.
pub fn save(session: &Session, path: &Path) -> Result<(), ResourcerError> {
    let file = ProjectFile::from_session(session);
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, &file)?;
    writer.flush()?;
    log::info!("Saved project to {}", path.display());
    Ok(())
}

/// Read a project file. Nothing is applied to any session here.
pub fn load(path: &Path) -> Result<ProjectFile, ResourcerError> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}
