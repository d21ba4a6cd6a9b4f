//! BSD archive layout as the Darwin linker expects it.
//!
//! Every member uses an extended `#1/<len>` name stored in front of its
//! data. Names are NUL-padded and data is padded so that each member's
//! content starts on an 8-byte boundary. The first member is the
//! `__.SYMDEF` ranlib index:
//!
//! ```text
//! u32 ranlib bytes, { u32 name offset, u32 member offset }*,
//! u32 string bytes, NUL-terminated names      (all little-endian)
//! ```

use super::{
    member_symbols, offset_u32, push_header, ArchiveError, ArchiveKind, ArchiveMember,
    ContainerWriter, HEADER_LEN, MAGIC,
};

const SYMDEF: &str = "__.SYMDEF";
const ALIGN: usize = 8;

#[derive(Clone, Copy, Debug, Default)]
pub struct BsdWriter;

fn align_pad(len: usize) -> usize {
    (ALIGN - len % ALIGN) % ALIGN
}

/// Length of `name` plus the NUL padding that aligns the content of a
/// member whose header starts at `pos`.
fn name_len_at(pos: usize, name: &str) -> usize {
    name.len() + align_pad(pos + HEADER_LEN + name.len())
}

fn push_member(out: &mut Vec<u8>, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
    let name_len = name_len_at(out.len(), name);
    let data_pad = align_pad(data.len());
    push_header(out, &format!("#1/{name_len}"), name_len + data.len() + data_pad, name)?;
    out.extend_from_slice(name.as_bytes());
    out.resize(out.len() + name_len - name.len(), 0);
    out.extend_from_slice(data);
    out.resize(out.len() + data_pad, b'\n');
    Ok(())
}

fn member_size_at(pos: usize, name: &str, data_len: usize) -> usize {
    HEADER_LEN + name_len_at(pos, name) + data_len + align_pad(data_len)
}

impl ContainerWriter for BsdWriter {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Bsd
    }

    fn write(&self, members: &[ArchiveMember]) -> Result<Vec<u8>, ArchiveError> {
        let symbols = member_symbols(members);
        let nsyms: usize = symbols.iter().map(Vec::len).sum();

        let mut strings = Vec::new();
        let mut name_offsets = Vec::with_capacity(nsyms);
        for name in symbols.iter().flatten() {
            name_offsets.push(strings.len());
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }
        let ranlib_len = 8 * nsyms;
        let unpadded = 4 + ranlib_len + 4 + strings.len();
        strings.resize(strings.len() + align_pad(unpadded), 0);
        let symdef_len = 4 + ranlib_len + 4 + strings.len();

        let mut offset = MAGIC.len();
        offset += member_size_at(offset, SYMDEF, symdef_len);
        let mut member_offsets = Vec::with_capacity(members.len());
        for member in members {
            member_offsets.push(offset);
            offset += member_size_at(offset, &member.name, member.data.len());
        }

        let mut symdef = Vec::with_capacity(symdef_len);
        symdef.extend_from_slice(&offset_u32(ranlib_len)?.to_le_bytes());
        let mut names = name_offsets.iter();
        for (syms, &member_offset) in symbols.iter().zip(&member_offsets) {
            for _ in syms {
                let name_offset = names.next().copied().unwrap_or_default();
                symdef.extend_from_slice(&offset_u32(name_offset)?.to_le_bytes());
                symdef.extend_from_slice(&offset_u32(member_offset)?.to_le_bytes());
            }
        }
        symdef.extend_from_slice(&offset_u32(strings.len())?.to_le_bytes());
        symdef.extend_from_slice(&strings);

        let mut out = Vec::with_capacity(offset);
        out.extend_from_slice(MAGIC);
        push_member(&mut out, SYMDEF, &symdef)?;
        for member in members {
            push_member(&mut out, &member.name, &member.data)?;
        }
        Ok(out)
    }
}
