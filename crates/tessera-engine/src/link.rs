//! Persisted bytecode units and the name merge performed when loading them.
//!
//! A unit on disk is a gzip stream holding the magic `TSBC`, a little-endian
//! `u32` format version and a bincode payload with the unit and the name
//! table it was compiled against.
//!
//! Handles in a loaded unit refer to the table it was written with, not to
//! the live interner. [`merge_names`] folds the stored table into the live
//! one and returns the handle renames the unit needs:
//!
//! - same handle, same name (ignoring case): kept as is
//! - same handle, different name: the name is interned anew and the handle
//!   renamed
//! - free handle: the name is installed at that handle, unless the live
//!   table already knows it under another handle, which is then used
//!
//! Nothing is merged unless the whole unit decoded successfully.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compiler::bytecode::{Bytecode, LabelError, Unit};
use crate::runtime::interner::{Ident, Interner, NameTable};

/// Leading bytes of every persisted unit.
pub const MAGIC: &[u8; 4] = b"TSBC";

/// Current persisted format version.
pub const FORMAT_VERSION: u32 = 1;

/// Unused slots a stored name table may leave beyond twice its entry count.
const HANDLE_SLACK: usize = 1024;

/// Errors raised while writing or loading units.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Reading or writing the file failed
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The gzip stream is corrupt or truncated
    #[error("decompression failed: {0}")]
    Decompress(io::Error),
    /// Not a persisted unit
    #[error("not a bytecode unit (bad magic)")]
    BadMagic,
    /// Written by an incompatible version
    #[error("unsupported format version {found} (expected {expected})")]
    Version {
        /// Version in the file
        found: u32,
        /// Version this build reads
        expected: u32,
    },
    /// The payload could not be encoded or decoded
    #[error("payload error: {0}")]
    Codec(#[from] bincode::Error),
    /// The unit uses a handle its name table does not define
    #[error("identifier {0} has no entry in the name table")]
    MissingName(Ident),
    /// A stored handle lies far beyond the size of its table
    #[error("name table with {entries} entries uses handle {handle}")]
    SparseNames {
        /// The offending handle
        handle: Ident,
        /// Entries in the stored table
        entries: usize,
    },
    /// A jump in the unit has no target
    #[error("malformed unit: {0}")]
    Label(#[from] LabelError),
}

#[derive(Serialize, Deserialize)]
struct Payload {
    names: NameTable,
    unit: Unit,
}

/// Handle renames produced by [`merge_names`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapTable {
    map: FxHashMap<Ident, Ident>,
}

impl RemapTable {
    /// Number of renamed handles.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns true if no handle needs renaming.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// The live handle for a stored handle.
    pub fn get(&self, id: Ident) -> Ident {
        self.map.get(&id).copied().unwrap_or(id)
    }

    /// Renames handles throughout `code`, nested bodies included.
    pub fn apply(&self, code: &mut Bytecode) {
        if self.map.is_empty() {
            return;
        }
        code.remap_identifiers(&mut |id| self.get(id));
    }
}

/// Serializes a unit together with the name table of `names`.
pub fn encode(unit: &Unit, names: &Interner) -> Result<Vec<u8>, LinkError> {
    let table = names.snapshot();
    for id in unit.code.all_identifiers() {
        if table.get(id).is_none() {
            return Err(LinkError::MissingName(id));
        }
    }
    let payload = Payload { names: table, unit: unit.clone() };

    let mut writer = GzEncoder::new(Vec::new(), Compression::default());
    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
    bincode::serialize_into(&mut writer, &payload)?;
    Ok(writer.finish()?)
}

/// Parses a persisted unit without touching any interner.
pub fn decode(bytes: &[u8]) -> Result<(NameTable, Unit), LinkError> {
    let mut reader = GzDecoder::new(bytes);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(LinkError::Decompress)?;
    if &magic != MAGIC {
        return Err(LinkError::BadMagic);
    }
    let mut version = [0u8; 4];
    reader.read_exact(&mut version).map_err(LinkError::Decompress)?;
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(LinkError::Version {
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let payload: Payload = bincode::deserialize_from(&mut reader)?;
    let entries = payload.names.len();
    let limit = entries.saturating_mul(2).saturating_add(HANDLE_SLACK);
    if let Some((handle, _)) = payload.names.entries.iter().find(|(id, _)| id.index() >= limit) {
        return Err(LinkError::SparseNames {
            handle: *handle,
            entries,
        });
    }
    for id in payload.unit.code.all_identifiers() {
        if payload.names.get(id).is_none() {
            return Err(LinkError::MissingName(id));
        }
    }
    payload.unit.code.verify_labels()?;
    Ok((payload.names, payload.unit))
}

/// Folds a stored name table into the live interner.
pub fn merge_names(table: &NameTable, names: &Interner) -> RemapTable {
    let mut remap = RemapTable::default();
    let mut adopted = 0;
    for (id, name) in &table.entries {
        let live = match names.lowercase_at(*id) {
            Some(lower) if lower == name.to_lowercase() => continue,
            Some(_) => names.intern(name),
            None if names.adopt_at(name, *id) => {
                adopted += 1;
                continue;
            }
            // known elsewhere, or the slot was taken since we looked
            None => names.intern(name),
        };
        if live != *id {
            remap.map.insert(*id, live);
        }
    }
    tracing::debug!(
        entries = table.len(),
        adopted,
        remapped = remap.len(),
        "merged name table"
    );
    remap
}

/// Decodes a unit and links it against `names`.
pub fn load(bytes: &[u8], names: &Interner) -> Result<Unit, LinkError> {
    let (table, mut unit) = decode(bytes)?;
    let remap = merge_names(&table, names);
    remap.apply(&mut unit.code);
    Ok(unit)
}

/// Writes a unit to `path`.
pub fn write_unit(path: impl AsRef<Path>, unit: &Unit, names: &Interner) -> Result<(), LinkError> {
    let path = path.as_ref();
    let bytes = encode(unit, names)?;
    fs::write(path, &bytes)?;
    tracing::debug!(path = %path.display(), bytes = bytes.len(), "wrote unit");
    Ok(())
}

/// Reads a unit from `path` and links it against `names`.
pub fn read_unit(path: impl AsRef<Path>, names: &Interner) -> Result<Unit, LinkError> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    let unit = load(&bytes, names)?;
    tracing::debug!(path = %path.display(), instructions = unit.code.len(), "loaded unit");
    Ok(unit)
}
