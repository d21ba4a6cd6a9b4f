//! Object File Emission
//!
//! Lays out each definition as a symbol in a relocatable object file:
//!
//! - ELF (Linux, FreeBSD)
//! - Mach-O (macOS)
//! - COFF (Windows)
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐    ┌──────────────┐    ┌──────────────────┐
//! │   Module    │───▶│   Encoder    │───▶│ object::write    │───▶ .o
//! │ (one shard) │    │ bytes+relocs │    │ symbols/sections │
//! └─────────────┘    └──────────────┘    └──────────────────┘
//! ```
//!
//! Functions go to the text section, read-only data to the read-only data
//! section, everything else to the data section. References to globals not
//! defined in the module become undefined symbols, created the first time a
//! relocation needs them.

use std::fmt;

use object::write::{Object, Relocation, StandardSection, Symbol, SymbolId, SymbolSection};
use object::{
    Architecture, BinaryFormat as ObjectFormat, Endianness, RelocationEncoding, RelocationFlags,
    RelocationKind, SectionKind, SymbolFlags, SymbolKind, SymbolScope,
};
use ori_lir::{
    codec, verify_module, DllStorage, GlobalId, GlobalKind, GlobalValue, Linkage, Module,
    Visibility,
};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::encode::{Encoded, Encoder};
use super::{CodegenBackend, EmitError, FileType};
use crate::target::{BinaryFormat, OptimizationLevel, TargetConfig};

/// Where a definition ended up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Placement {
    Text,
    ReadOnly,
    Data,
}

impl Placement {
    fn of(global: &GlobalValue) -> Self {
        match &global.kind {
            GlobalKind::Function(_) => Self::Text,
            GlobalKind::Data(data) if data.constant => Self::ReadOnly,
            GlobalKind::Data(_) | GlobalKind::Alias(_) => Self::Data,
        }
    }

    fn standard_section(self) -> StandardSection {
        match self {
            Self::Text => StandardSection::Text,
            Self::ReadOnly => StandardSection::ReadOnlyData,
            Self::Data => StandardSection::Data,
        }
    }
}

/// Reference code generation backend: writes object files with the
/// `object` crate and assembly as a data listing.
pub struct ObjectEmitter {
    config: TargetConfig,
    encoder: Encoder,
}

impl ObjectEmitter {
    pub fn new(config: &TargetConfig) -> Self {
        Self {
            encoder: Encoder {
                pointer_size: config.pointer_size(),
                little_endian: config.is_little_endian(),
            },
            config: config.clone(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    fn architecture(&self) -> Result<Architecture, EmitError> {
        let arch = self.config.components().arch.as_str();
        Ok(match arch {
            "x86_64" | "amd64" => Architecture::X86_64,
            "i386" | "i486" | "i586" | "i686" => Architecture::I386,
            "aarch64" | "arm64" => Architecture::Aarch64,
            a if a.starts_with("arm") || a.starts_with("thumb") => Architecture::Arm,
            "powerpc64" | "powerpc64le" | "ppc64" | "ppc64le" => Architecture::PowerPc64,
            "powerpc" | "ppc" => Architecture::PowerPc,
            "riscv64" => Architecture::Riscv64,
            "riscv32" => Architecture::Riscv32,
            "s390x" => Architecture::S390x,
            "mips" | "mipsel" => Architecture::Mips,
            "mips64" | "mips64el" => Architecture::Mips64,
            _ => {
                return Err(EmitError::UnsupportedArchitecture {
                    arch: arch.to_string(),
                })
            }
        })
    }

    fn object_format(&self, file_type: FileType) -> Result<ObjectFormat, EmitError> {
        match self.config.binary_format() {
            BinaryFormat::Elf => Ok(ObjectFormat::Elf),
            BinaryFormat::MachO => Ok(ObjectFormat::MachO),
            BinaryFormat::Coff => Ok(ObjectFormat::Coff),
            BinaryFormat::Wasm => Err(EmitError::UnsupportedFileType {
                file_type,
                triple: self.config.triple().to_string(),
            }),
        }
    }

    /// Symbol name as written to the object, before format mangling.
    fn symbol_name(id: GlobalId, global: &GlobalValue) -> String {
        if global.is_anonymous() {
            format!("__unnamed_{}", id.raw())
        } else {
            global.name.clone()
        }
    }

    /// Name as it appears in assembly, with the platform's global prefix.
    fn asm_name(&self, id: GlobalId, global: &GlobalValue) -> String {
        let name = Self::symbol_name(id, global);
        let prefixed = self.config.binary_format() == BinaryFormat::MachO
            || (self.config.binary_format() == BinaryFormat::Coff && self.config.pointer_size() == 4);
        if prefixed {
            format!("_{name}")
        } else {
            name
        }
    }

    fn scope(global: &GlobalValue) -> SymbolScope {
        if global.has_local_linkage() {
            SymbolScope::Compilation
        } else if global.visibility == Visibility::Hidden {
            SymbolScope::Linkage
        } else {
            SymbolScope::Dynamic
        }
    }

    fn symbol(id: GlobalId, global: &GlobalValue, section: SymbolSection) -> Symbol {
        Symbol {
            name: Self::symbol_name(id, global).into_bytes(),
            value: 0,
            size: 0,
            kind: if global.is_function() {
                SymbolKind::Text
            } else {
                SymbolKind::Data
            },
            scope: Self::scope(global),
            weak: global.linkage == Linkage::Weak,
            section,
            flags: SymbolFlags::None,
        }
    }

    fn encode(&self, global: &GlobalValue) -> Option<Encoded> {
        match &global.kind {
            GlobalKind::Function(func) => func.body.as_ref().map(|b| self.encoder.encode_body(b)),
            GlobalKind::Data(data) => data.init.as_ref().map(|_| self.encoder.encode_data(data)),
            GlobalKind::Alias(_) => None,
        }
    }

    fn align(&self, global: &GlobalValue) -> u64 {
        match &global.kind {
            GlobalKind::Data(data) => self.encoder.align_of(data),
            _ => 16,
        }
    }

    /// Follow alias chains to the definition they name.
    fn resolve_alias(module: &Module, mut id: GlobalId) -> Option<GlobalId> {
        for _ in 0..module.slot_count() {
            match module.get(id)?.as_alias() {
                Some(alias) => id = alias.aliasee,
                None => return Some(id),
            }
        }
        None
    }

    /// Emit a relocatable object file.
    ///
    /// # Errors
    ///
    /// Returns an error for Wasm targets, unknown architectures, aliases
    /// that do not resolve to a definition, or when the writer fails.
    pub fn emit_object_to_memory(&self, module: &Module) -> Result<Vec<u8>, EmitError> {
        let format = self.object_format(FileType::Object)?;
        let arch = self.architecture()?;
        let endian = if self.config.is_little_endian() {
            Endianness::Little
        } else {
            Endianness::Big
        };
        let mut obj = Object::new(format, arch, endian);

        if matches!(format, ObjectFormat::Elf | ObjectFormat::Coff) && !module.source_file.is_empty() {
            obj.add_file_symbol(module.source_file.as_bytes().to_vec());
        }

        let mut symbols: FxHashMap<GlobalId, SymbolId> = FxHashMap::default();
        let mut placed: FxHashMap<GlobalId, (Placement, u64, u64)> = FxHashMap::default();
        let mut pending_relocs: Vec<(Placement, u64, GlobalId)> = Vec::new();
        let mut exports: Vec<(String, bool)> = Vec::new();

        for (id, global) in module.iter() {
            let Some(encoded) = self.encode(global) else {
                continue;
            };
            let placement = Placement::of(global);
            let section = obj.section_id(placement.standard_section());
            let symbol = obj.add_symbol(Self::symbol(id, global, SymbolSection::Undefined));
            let offset = obj.add_symbol_data(symbol, section, &encoded.bytes, self.align(global));
            symbols.insert(id, symbol);
            placed.insert(id, (placement, offset, encoded.bytes.len() as u64));
            pending_relocs.extend(
                encoded
                    .relocs
                    .iter()
                    .map(|&(at, target)| (placement, offset + at, target)),
            );
            if global.dll_storage == DllStorage::Export {
                exports.push((Self::symbol_name(id, global), !global.is_function()));
            }
            trace!(symbol = %Self::symbol_name(id, global), offset, "placed");
        }

        for (id, global) in module.iter() {
            let Some(alias) = global.as_alias() else {
                continue;
            };
            let Some((placement, offset, size)) = Self::resolve_alias(module, alias.aliasee)
                .and_then(|target| placed.get(&target).copied())
            else {
                return Err(EmitError::ObjectWrite {
                    message: format!(
                        "alias '{}' does not resolve to a definition",
                        Self::symbol_name(id, global)
                    ),
                });
            };
            let section = obj.section_id(placement.standard_section());
            let mut symbol = Self::symbol(id, global, SymbolSection::Section(section));
            symbol.value = offset;
            symbol.size = size;
            if let Some(target) = module.get(alias.aliasee) {
                symbol.kind = if target.is_function() {
                    SymbolKind::Text
                } else {
                    SymbolKind::Data
                };
            }
            symbols.insert(id, obj.add_symbol(symbol));
        }

        let size = u8::try_from(self.config.pointer_size() * 8).unwrap_or(64);
        for (placement, offset, target) in pending_relocs {
            let symbol = match symbols.get(&target) {
                Some(&symbol) => symbol,
                None => {
                    let Some(global) = module.get(target) else {
                        return Err(EmitError::ObjectWrite {
                            message: format!("relocation against missing global #{}", target.raw()),
                        });
                    };
                    let symbol = obj.add_symbol(Self::symbol(target, global, SymbolSection::Undefined));
                    symbols.insert(target, symbol);
                    symbol
                }
            };
            let section = obj.section_id(placement.standard_section());
            obj.add_relocation(
                section,
                Relocation {
                    offset,
                    symbol,
                    addend: 0,
                    flags: RelocationFlags::Generic {
                        kind: RelocationKind::Absolute,
                        encoding: RelocationEncoding::Generic,
                        size,
                    },
                },
            )
            .map_err(|e| EmitError::ObjectWrite {
                message: e.to_string(),
            })?;
        }

        if format == ObjectFormat::Coff && !exports.is_empty() {
            let directives = obj.add_section(Vec::new(), b".drectve".to_vec(), SectionKind::Linker);
            let mut text = String::new();
            for (name, data) in &exports {
                text.push_str(" /EXPORT:");
                text.push_str(name);
                if *data {
                    text.push_str(",DATA");
                }
            }
            obj.append_section_data(directives, text.as_bytes(), 1);
        }

        if format == ObjectFormat::Elf {
            let comment = obj.add_section(Vec::new(), b".comment".to_vec(), SectionKind::OtherString);
            let mut producer = vec![0];
            producer.extend_from_slice(concat!("ori_image ", env!("CARGO_PKG_VERSION")).as_bytes());
            producer.push(0);
            obj.set_section_data(comment, producer, 1);
        }

        obj.write().map_err(|e| EmitError::ObjectWrite {
            message: e.to_string(),
        })
    }

    /// Emit an assembly listing of the module's data layout.
    ///
    /// # Errors
    ///
    /// Returns an error for Wasm targets.
    pub fn emit_assembly_to_memory(&self, module: &Module) -> Result<Vec<u8>, EmitError> {
        let format = self.object_format(FileType::Assembly)?;
        let mut out = Listing::default();
        out.line(format_args!("\t.file\t\"{}\"", module.source_file));

        for placement in [Placement::Text, Placement::ReadOnly, Placement::Data] {
            let mut header_written = false;
            for (id, global) in module.iter() {
                if Placement::of(global) != placement || global.is_alias() {
                    continue;
                }
                let Some(encoded) = self.encode(global) else {
                    continue;
                };
                if !header_written {
                    out.line(section_directive(format, placement));
                    header_written = true;
                }
                let name = self.asm_name(id, global);
                self.symbol_directives(&mut out, format, &name, global);
                out.line(format_args!("\t.p2align\t{}", self.align(global).trailing_zeros()));
                out.line(format_args!("{name}:"));
                self.data_directives(&mut out, module, &encoded);
            }
        }

        for (id, global) in module.iter() {
            let Some(alias) = global.as_alias() else {
                continue;
            };
            let Some(target) = module.get(alias.aliasee) else {
                continue;
            };
            let name = self.asm_name(id, global);
            self.symbol_directives(&mut out, format, &name, global);
            out.line(format_args!(
                "\t.set\t{name}, {}",
                self.asm_name(alias.aliasee, target)
            ));
        }

        Ok(out.text.into_bytes())
    }

    fn symbol_directives(&self, out: &mut Listing, format: ObjectFormat, name: &str, global: &GlobalValue) {
        if global.has_local_linkage() {
            return;
        }
        if global.linkage == Linkage::Weak {
            out.line(format_args!("\t.weak\t{name}"));
        } else {
            out.line(format_args!("\t.globl\t{name}"));
        }
        if global.visibility == Visibility::Hidden {
            match format {
                ObjectFormat::MachO => out.line(format_args!("\t.private_extern\t{name}")),
                ObjectFormat::Elf => out.line(format_args!("\t.hidden\t{name}")),
                _ => {}
            }
        }
    }

    fn data_directives(&self, out: &mut Listing, module: &Module, encoded: &Encoded) {
        let slot = self.config.pointer_size() as usize;
        let directive = if slot == 8 { ".quad" } else { ".long" };
        let mut relocs = encoded.relocs.iter().peekable();
        let mut at = 0usize;
        while at < encoded.bytes.len() {
            if let Some(&&(offset, target)) = relocs.peek() {
                if offset as usize == at {
                    relocs.next();
                    let name = module
                        .get(target)
                        .map_or_else(|| format!("__unnamed_{}", target.raw()), |g| self.asm_name(target, g));
                    out.line(format_args!("\t{directive}\t{name}"));
                    at += slot;
                    continue;
                }
            }
            let next_reloc = relocs
                .peek()
                .map_or(encoded.bytes.len(), |&&(offset, _)| offset as usize);
            let end = next_reloc.min(at + 16).min(encoded.bytes.len());
            let bytes: Vec<String> = encoded.bytes[at..end]
                .iter()
                .map(|b| format!("0x{b:02x}"))
                .collect();
            out.line(format_args!("\t.byte\t{}", bytes.join(",")));
            at = end;
        }
    }

    /// Drop local definitions nothing reachable refers to.
    fn strip_dead_locals(module: &mut Module) -> usize {
        let mut live: FxHashSet<GlobalId> = FxHashSet::default();
        let mut work: Vec<GlobalId> = module
            .iter()
            .filter(|(_, g)| !g.has_local_linkage() || g.compiler_used)
            .map(|(id, _)| id)
            .collect();
        while let Some(id) = work.pop() {
            if live.insert(id) {
                work.extend(module.references(id));
            }
        }
        let dead: Vec<GlobalId> = module
            .ids()
            .into_iter()
            .filter(|id| !live.contains(id))
            .collect();
        for &id in &dead {
            module.erase(id);
        }
        dead.len()
    }
}

fn section_directive(format: ObjectFormat, placement: Placement) -> &'static str {
    match (format, placement) {
        (ObjectFormat::MachO, Placement::Text) => "\t.section\t__TEXT,__text,regular,pure_instructions",
        (ObjectFormat::MachO, Placement::ReadOnly) => "\t.section\t__TEXT,__const",
        (ObjectFormat::MachO, Placement::Data) => "\t.section\t__DATA,__data",
        (ObjectFormat::Coff, Placement::ReadOnly) => "\t.section\t.rdata,\"dr\"",
        (_, Placement::Text) => "\t.text",
        (_, Placement::ReadOnly) => "\t.section\t.rodata",
        (_, Placement::Data) => "\t.data",
    }
}

#[derive(Default)]
struct Listing {
    text: String,
}

impl Listing {
    fn line(&mut self, line: impl fmt::Display) {
        use fmt::Write as _;
        // Writing to a String cannot fail.
        let _ = writeln!(self.text, "{line}");
    }
}

impl CodegenBackend for ObjectEmitter {
    fn target(&self) -> &TargetConfig {
        &self.config
    }

    fn write_ir(&self, module: &Module) -> Result<Vec<u8>, EmitError> {
        Ok(codec::serialize(module)?)
    }

    fn optimize(&self, module: &mut Module) -> Result<(), EmitError> {
        verify_module(module).map_err(EmitError::InvalidModule)?;
        if self.config.opt_level() > OptimizationLevel::None {
            let removed = Self::strip_dead_locals(module);
            debug!(module = %module.name, removed, "stripped dead local definitions");
        }
        Ok(())
    }

    fn emit(&self, module: &Module, file_type: FileType) -> Result<Vec<u8>, EmitError> {
        match file_type {
            FileType::Object => self.emit_object_to_memory(module),
            FileType::Assembly => self.emit_assembly_to_memory(module),
        }
    }
}

impl fmt::Debug for ObjectEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectEmitter")
            .field("triple", &self.config.triple())
            .field("format", &self.config.binary_format())
            .field("opt_level", &self.config.opt_level())
            .finish_non_exhaustive()
    }
}
