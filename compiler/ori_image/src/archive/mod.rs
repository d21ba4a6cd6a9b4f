//! Static archive writers.
//!
//! Each requested artifact kind becomes one `ar` archive. The layout
//! depends on the platform, so writing goes through [`ContainerWriter`]:
//!
//! - [`GnuWriter`]: System V / GNU layout used everywhere except Darwin
//! - [`BsdWriter`]: BSD layout with a `__.SYMDEF` index, used on Darwin
//!
//! Archives are deterministic: timestamps, owner and group are zero and
//! every member has mode `644`. The symbol index lists the global defined
//! symbols of members that parse as object files; other members (IR,
//! assembly) contribute nothing to it.

mod darwin;
mod gnu;

use std::fs;
use std::path::{Path, PathBuf};

use object::{Object, ObjectSymbol};
use tracing::{debug, trace};

use crate::target::TargetConfig;

pub use darwin::BsdWriter;
pub use gnu::GnuWriter;

pub(crate) const MAGIC: &[u8; 8] = b"!<arch>\n";
pub(crate) const HEADER_LEN: usize = 60;

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("failed to write archive `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("archive member `{member}` does not fit the {field} field")]
    FieldOverflow { member: String, field: &'static str },

    #[error("archive is too large for a 32-bit symbol index")]
    IndexOverflow,
}

/// Archive flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArchiveKind {
    Gnu,
    Bsd,
}

/// A named member buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveMember {
    pub name: String,
    pub data: Vec<u8>,
}

impl ArchiveMember {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            data: data.into(),
        }
    }

    /// Global symbols this member defines, in symbol table order. Empty
    /// when the member is not an object file.
    pub fn defined_symbols(&self) -> Vec<String> {
        let Ok(file) = object::File::parse(&*self.data) else {
            return Vec::new();
        };
        file.symbols()
            .filter(|sym| sym.is_global() && sym.is_definition())
            .filter_map(|sym| sym.name().ok().map(str::to_owned))
            .filter(|name| !name.is_empty())
            .collect()
    }
}

/// Serializes members into one archive image.
pub trait ContainerWriter: Send + Sync {
    fn kind(&self) -> ArchiveKind;

    /// Lay out `members` in order, with a symbol index.
    ///
    /// # Errors
    ///
    /// Returns an error when a member or offset does not fit the format.
    fn write(&self, members: &[ArchiveMember]) -> Result<Vec<u8>, ArchiveError>;
}

/// The writer for the platform `target` produces images for.
pub fn writer_for(target: &TargetConfig) -> Box<dyn ContainerWriter> {
    if target.is_darwin() {
        Box::new(BsdWriter)
    } else {
        Box::new(GnuWriter)
    }
}

/// Serialize `members` with `writer` and write the archive to `path`.
///
/// # Errors
///
/// Returns [`ArchiveError::Io`] when the file cannot be written, or a
/// layout error from the writer.
pub fn write_archive(
    path: &Path,
    writer: &dyn ContainerWriter,
    members: &[ArchiveMember],
) -> Result<(), ArchiveError> {
    let bytes = writer.write(members)?;
    debug!(
        path = %path.display(),
        kind = ?writer.kind(),
        members = members.len(),
        bytes = bytes.len(),
        "writing archive"
    );
    fs::write(path, bytes).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Append a fixed-width, space-padded header field.
pub(crate) fn push_field(
    out: &mut Vec<u8>,
    value: &str,
    width: usize,
    member: &str,
    field: &'static str,
) -> Result<(), ArchiveError> {
    if value.len() > width {
        return Err(ArchiveError::FieldOverflow {
            member: member.to_owned(),
            field,
        });
    }
    out.extend_from_slice(value.as_bytes());
    out.resize(out.len() + width - value.len(), b' ');
    Ok(())
}

/// Append a 60-byte member header with zeroed timestamps and ids.
pub(crate) fn push_header(
    out: &mut Vec<u8>,
    name_field: &str,
    size: usize,
    member: &str,
) -> Result<(), ArchiveError> {
    push_field(out, name_field, 16, member, "name")?;
    push_field(out, "0", 12, member, "timestamp")?;
    push_field(out, "0", 6, member, "owner")?;
    push_field(out, "0", 6, member, "group")?;
    push_field(out, "644", 8, member, "mode")?;
    push_field(out, &size.to_string(), 10, member, "size")?;
    out.extend_from_slice(b"`\n");
    Ok(())
}

/// Symbol names per member, in member order.
pub(crate) fn member_symbols(members: &[ArchiveMember]) -> Vec<Vec<String>> {
    members
        .iter()
        .map(|member| {
            let symbols = member.defined_symbols();
            trace!(member = %member.name, symbols = symbols.len(), "archive member");
            symbols
        })
        .collect()
}

pub(crate) fn offset_u32(offset: usize) -> Result<u32, ArchiveError> {
    u32::try_from(offset).map_err(|_| ArchiveError::IndexOverflow)
}
