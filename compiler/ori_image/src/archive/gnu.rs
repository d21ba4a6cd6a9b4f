//! System V / GNU archive layout.
//!
//! ```text
//! !<arch>\n
//! /                 symbol index: count, member offsets (big-endian), names
//! //                long member names, each ending in "/\n"
//! name/ | /<off>    members, padded to an even size with '\n'
//! ```

use super::{
    member_symbols, offset_u32, push_header, ArchiveError, ArchiveKind, ArchiveMember,
    ContainerWriter, HEADER_LEN, MAGIC,
};

/// Longest name stored directly in the header (one byte goes to the `/`).
const SHORT_NAME_MAX: usize = 15;

#[derive(Clone, Copy, Debug, Default)]
pub struct GnuWriter;

fn padded(len: usize) -> usize {
    len + len % 2
}

fn pad_even(out: &mut Vec<u8>) {
    if out.len() % 2 == 1 {
        out.push(b'\n');
    }
}

impl ContainerWriter for GnuWriter {
    fn kind(&self) -> ArchiveKind {
        ArchiveKind::Gnu
    }

    fn write(&self, members: &[ArchiveMember]) -> Result<Vec<u8>, ArchiveError> {
        let symbols = member_symbols(members);

        let mut long_names = Vec::new();
        let name_fields: Vec<String> = members
            .iter()
            .map(|member| {
                if member.name.len() <= SHORT_NAME_MAX && !member.name.contains('/') {
                    format!("{}/", member.name)
                } else {
                    let field = format!("/{}", long_names.len());
                    long_names.extend_from_slice(member.name.as_bytes());
                    long_names.extend_from_slice(b"/\n");
                    field
                }
            })
            .collect();
        pad_even(&mut long_names);

        let nsyms: usize = symbols.iter().map(Vec::len).sum();
        let mut sym_names = Vec::new();
        for name in symbols.iter().flatten() {
            sym_names.extend_from_slice(name.as_bytes());
            sym_names.push(0);
        }
        let symtab_len = 4 + 4 * nsyms + sym_names.len();

        let mut offset = MAGIC.len();
        if nsyms > 0 {
            offset += HEADER_LEN + padded(symtab_len);
        }
        if !long_names.is_empty() {
            offset += HEADER_LEN + long_names.len();
        }
        let mut member_offsets = Vec::with_capacity(members.len());
        for member in members {
            member_offsets.push(offset);
            offset += HEADER_LEN + padded(member.data.len());
        }

        let mut out = Vec::with_capacity(offset);
        out.extend_from_slice(MAGIC);

        if nsyms > 0 {
            push_header(&mut out, "/", symtab_len, "/")?;
            out.extend_from_slice(&offset_u32(nsyms)?.to_be_bytes());
            for (syms, &member_offset) in symbols.iter().zip(&member_offsets) {
                let member_offset = offset_u32(member_offset)?.to_be_bytes();
                for _ in syms {
                    out.extend_from_slice(&member_offset);
                }
            }
            out.extend_from_slice(&sym_names);
            pad_even(&mut out);
        }

        if !long_names.is_empty() {
            push_header(&mut out, "//", long_names.len(), "//")?;
            out.extend_from_slice(&long_names);
        }

        for (member, field) in members.iter().zip(&name_fields) {
            push_header(&mut out, field, member.data.len(), &member.name)?;
            out.extend_from_slice(&member.data);
            pad_even(&mut out);
        }
        Ok(out)
    }
}
