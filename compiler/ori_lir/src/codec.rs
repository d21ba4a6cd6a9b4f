//! Binary module codec with lazy body decoding.
//!
//! A module is serialized once and then opened by many readers, each of
//! which only needs a fraction of the bodies. Opening decodes the symbol
//! table; bodies and initializers stay as byte ranges into the buffer until
//! [`LazyModule::materialize`] asks for them.
//!
//! # Layout
//!
//! ```text
//! +--------+---------+------------+------------------+-----------------+
//! | "ORIL" | version | header len | header (bincode) | content section |
//! | 4 B    | u32 LE  | u64 LE     |                  | bincode blobs   |
//! +--------+---------+------------+------------------+-----------------+
//! ```
//!
//! The header holds the module properties, a string table, and one
//! symbol record per live global in id order. Ids are compacted on write:
//! erased slots disappear and references are renumbered. Each definition's
//! body or initializer is a separate bincode blob addressed by an
//! `(offset, len)` span relative to the start of the content section.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::body::FunctionBody;
use crate::constant::Constant;
use crate::global::{
    Alias, DataObject, DllStorage, FnAttributes, Function, GlobalId, GlobalKind, GlobalValue,
    Linkage, Visibility,
};
use crate::module::Module;
use crate::types::{DataType, FnType, ValueType};

const MAGIC: &[u8; 4] = b"ORIL";
const VERSION: u32 = 1;
/// Magic + version + header length.
const PREAMBLE_LEN: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("input is truncated")]
    Truncated,

    #[error("not a serialized module (bad magic)")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u32),

    #[error("malformed header: {0}")]
    Header(#[source] bincode::Error),

    #[error("string table reference out of range or not UTF-8")]
    BadString,

    #[error("malformed content for `{name}`: {source}")]
    Content {
        name: String,
        #[source]
        source: bincode::Error,
    },

    #[error("`{from}` references symbol index {index}, which is out of range")]
    DanglingReference { from: String, index: u32 },

    #[error("symbol name `{0}` appears more than once")]
    DuplicateName(String),

    #[error("use-list operations need a fully materialized module ({pending} bodies pending)")]
    UseListsUnavailable { pending: usize },

    #[error("failed to encode module: {0}")]
    Encode(#[source] bincode::Error),

    #[error("{what} does not fit the 32-bit format ({len})")]
    TooLarge { what: &'static str, len: usize },
}

// ── On-disk records ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
struct StrRef {
    offset: u32,
    len: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
struct Span {
    offset: u64,
    len: u64,
}

#[derive(Debug, Serialize, Deserialize)]
enum SymbolKind {
    Function { ty: FnType, attrs: FnAttributes },
    Data { ty: DataType, constant: bool, align: u32 },
    Alias { ty: ValueType, aliasee: GlobalId },
}

#[derive(Debug, Serialize, Deserialize)]
struct SymbolRecord {
    name: StrRef,
    linkage: Linkage,
    visibility: Visibility,
    dll_storage: DllStorage,
    dso_local: bool,
    compiler_used: bool,
    kind: SymbolKind,
    /// Body or initializer; `None` for declarations and aliases.
    content: Option<Span>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Header {
    name: StrRef,
    triple: StrRef,
    data_layout: StrRef,
    source_file: StrRef,
    flags: Vec<(StrRef, StrRef)>,
    strtab: Vec<u8>,
    symbols: Vec<SymbolRecord>,
}

#[derive(Default)]
struct StringTable {
    bytes: Vec<u8>,
    interned: FxHashMap<String, StrRef>,
}

impl StringTable {
    fn intern(&mut self, s: &str) -> Result<StrRef, CodecError> {
        if let Some(r) = self.interned.get(s) {
            return Ok(*r);
        }
        let r = StrRef {
            offset: to_u32(self.bytes.len(), "string table")?,
            len: to_u32(s.len(), "string")?,
        };
        self.bytes.extend_from_slice(s.as_bytes());
        self.interned.insert(s.to_owned(), r);
        Ok(r)
    }
}

fn to_u32(n: usize, what: &'static str) -> Result<u32, CodecError> {
    u32::try_from(n).map_err(|_| CodecError::TooLarge { what, len: n })
}

fn resolve_str(strtab: &[u8], r: StrRef) -> Result<String, CodecError> {
    let start = r.offset as usize;
    let end = start.checked_add(r.len as usize).ok_or(CodecError::BadString)?;
    let bytes = strtab.get(start..end).ok_or(CodecError::BadString)?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| CodecError::BadString)
}

// ── Writing ─────────────────────────────────────────────────────────

/// Serialize a module.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if a blob fails to encode and
/// [`CodecError::TooLarge`] when the symbol or string table outgrows
/// 32-bit offsets.
pub fn serialize(module: &Module) -> Result<Vec<u8>, CodecError> {
    let live = module.ids();
    let renumber: FxHashMap<GlobalId, GlobalId> = live
        .iter()
        .enumerate()
        .map(|(i, id)| -> Result<_, CodecError> {
            Ok((*id, GlobalId::new(to_u32(i, "symbol table")?)))
        })
        .collect::<Result<_, CodecError>>()?;
    // Dangling references keep an out-of-range index so readers reject them.
    let dangling = GlobalId::new(u32::MAX);
    let mut remap = |id: GlobalId| renumber.get(&id).copied().unwrap_or(dangling);

    let mut strings = StringTable::default();
    let mut content = Vec::new();
    let mut header = Header {
        name: strings.intern(&module.name)?,
        triple: strings.intern(&module.target_triple)?,
        data_layout: strings.intern(&module.data_layout)?,
        source_file: strings.intern(&module.source_file)?,
        ..Header::default()
    };
    header.flags = module
        .flags()
        .map(|(k, v)| -> Result<_, CodecError> { Ok((strings.intern(k)?, strings.intern(v)?)) })
        .collect::<Result<_, CodecError>>()?;

    for id in live {
        let global = &module[id];
        let mut push_blob = |blob: Vec<u8>| {
            let span = Span {
                offset: content.len() as u64,
                len: blob.len() as u64,
            };
            content.extend_from_slice(&blob);
            span
        };
        let (kind, span) = match &global.kind {
            GlobalKind::Function(func) => {
                let span = match &func.body {
                    Some(body) => {
                        let mut body = body.clone();
                        body.remap(&mut remap);
                        Some(push_blob(bincode::serialize(&body).map_err(CodecError::Encode)?))
                    }
                    None => None,
                };
                let kind = SymbolKind::Function {
                    ty: func.ty.clone(),
                    attrs: func.attrs.clone(),
                };
                (kind, span)
            }
            GlobalKind::Data(data) => {
                let span = match &data.init {
                    Some(init) => {
                        let mut init = init.clone();
                        init.remap(&mut remap);
                        Some(push_blob(bincode::serialize(&init).map_err(CodecError::Encode)?))
                    }
                    None => None,
                };
                let kind = SymbolKind::Data {
                    ty: data.ty.clone(),
                    constant: data.constant,
                    align: data.align,
                };
                (kind, span)
            }
            GlobalKind::Alias(alias) => (
                SymbolKind::Alias {
                    ty: alias.ty.clone(),
                    aliasee: remap(alias.aliasee),
                },
                None,
            ),
        };
        header.symbols.push(SymbolRecord {
            name: strings.intern(&global.name)?,
            linkage: global.linkage,
            visibility: global.visibility,
            dll_storage: global.dll_storage,
            dso_local: global.dso_local,
            compiler_used: global.compiler_used,
            kind,
            content: span,
        });
    }
    header.strtab = strings.bytes;

    let header_bytes = bincode::serialize(&header).map_err(CodecError::Encode)?;
    let mut out = Vec::with_capacity(PREAMBLE_LEN + header_bytes.len() + content.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&VERSION.to_le_bytes());
    out.extend_from_slice(&(header_bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&content);
    trace!(
        module = %module.name,
        symbols = header.symbols.len(),
        bytes = out.len(),
        "serialized module"
    );
    Ok(out)
}

/// Decode a module with every body materialized.
///
/// # Errors
///
/// Any [`CodecError`] from opening or materializing.
pub fn deserialize(bytes: &[u8]) -> Result<Module, CodecError> {
    LazyModule::open(bytes)?.into_module()
}

// ── Lazy reading ────────────────────────────────────────────────────

/// A module whose bodies are decoded on demand.
///
/// Until a definition is materialized, its slot in [`LazyModule::module`]
/// looks like a declaration; ask [`LazyModule::is_declaration`] instead of
/// the global itself.
pub struct LazyModule<'buf> {
    module: Module,
    content: &'buf [u8],
    pending: FxHashMap<GlobalId, Span>,
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, CodecError> {
    let raw = bytes.get(at..at + 4).ok_or(CodecError::Truncated)?;
    let arr: [u8; 4] = raw.try_into().map_err(|_| CodecError::Truncated)?;
    Ok(u32::from_le_bytes(arr))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, CodecError> {
    let raw = bytes.get(at..at + 8).ok_or(CodecError::Truncated)?;
    let arr: [u8; 8] = raw.try_into().map_err(|_| CodecError::Truncated)?;
    Ok(u64::from_le_bytes(arr))
}

impl<'buf> LazyModule<'buf> {
    /// Decode the symbol table of a serialized module.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] for a truncated buffer, wrong magic or
    /// version, a malformed header, or out-of-range references in the
    /// symbol table.
    pub fn open(bytes: &'buf [u8]) -> Result<Self, CodecError> {
        if bytes.len() < PREAMBLE_LEN {
            return Err(CodecError::Truncated);
        }
        if &bytes[..4] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let version = read_u32(bytes, 4)?;
        if version != VERSION {
            return Err(CodecError::UnsupportedVersion(version));
        }
        let header_len =
            usize::try_from(read_u64(bytes, 8)?).map_err(|_| CodecError::Truncated)?;
        let header_end = PREAMBLE_LEN
            .checked_add(header_len)
            .ok_or(CodecError::Truncated)?;
        let header_bytes = bytes
            .get(PREAMBLE_LEN..header_end)
            .ok_or(CodecError::Truncated)?;
        let header: Header = bincode::deserialize(header_bytes).map_err(CodecError::Header)?;
        let content = &bytes[header_end..];
        let strtab = header.strtab.as_slice();

        let mut module = Module::new(resolve_str(strtab, header.name)?);
        module.target_triple = resolve_str(strtab, header.triple)?;
        module.data_layout = resolve_str(strtab, header.data_layout)?;
        module.source_file = resolve_str(strtab, header.source_file)?;
        for (k, v) in &header.flags {
            module.set_flag(resolve_str(strtab, *k)?, resolve_str(strtab, *v)?);
        }

        let symbol_count = header.symbols.len();
        let mut pending = FxHashMap::default();
        for record in header.symbols {
            let name = resolve_str(strtab, record.name)?;
            let kind = match record.kind {
                SymbolKind::Function { ty, attrs } => GlobalKind::Function(Function {
                    ty,
                    attrs,
                    body: None,
                }),
                SymbolKind::Data {
                    ty,
                    constant,
                    align,
                } => GlobalKind::Data(DataObject {
                    ty,
                    constant,
                    align,
                    init: None,
                }),
                SymbolKind::Alias { ty, aliasee } => {
                    if aliasee.index() >= symbol_count {
                        return Err(CodecError::DanglingReference {
                            from: name,
                            index: aliasee.raw(),
                        });
                    }
                    GlobalKind::Alias(Alias { ty, aliasee })
                }
            };
            let id = module.add(GlobalValue {
                name: name.clone(),
                linkage: record.linkage,
                visibility: record.visibility,
                dll_storage: record.dll_storage,
                dso_local: record.dso_local,
                compiler_used: record.compiler_used,
                kind,
            });
            if module[id].name != name {
                return Err(CodecError::DuplicateName(name));
            }
            if let Some(span) = record.content {
                let end = span.offset.checked_add(span.len).ok_or(CodecError::Truncated)?;
                if end > content.len() as u64 {
                    return Err(CodecError::Truncated);
                }
                pending.insert(id, span);
            }
        }

        Ok(Self {
            module,
            content,
            pending,
        })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Mutable access to the module.
    ///
    /// Rewriting uses through this handle skips deferred bodies; use
    /// [`LazyModule::replace_all_uses_with`] for that.
    pub fn module_mut(&mut self) -> &mut Module {
        &mut self.module
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_materialized(&self, id: GlobalId) -> bool {
        !self.pending.contains_key(&id)
    }

    /// Declaration status that accounts for deferred bodies.
    pub fn is_declaration(&self, id: GlobalId) -> bool {
        self.is_materialized(id) && self.module.get(id).is_some_and(GlobalValue::is_declaration)
    }

    /// Decode the body or initializer of `id`. A no-op when it is already
    /// present or the global has none.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Content`] for an undecodable blob and
    /// [`CodecError::DanglingReference`] when it names a symbol index out of
    /// range.
    pub fn materialize(&mut self, id: GlobalId) -> Result<(), CodecError> {
        let Some(span) = self.pending.remove(&id) else {
            return Ok(());
        };
        let content = self.content;
        // Spans were bounds-checked in `open`.
        #[expect(clippy::cast_possible_truncation, reason = "checked against content length")]
        let blob = &content[span.offset as usize..(span.offset + span.len) as usize];
        let slots = self.module.slot_count();
        let Some(global) = self.module.get_mut(id) else {
            return Ok(());
        };
        let label = global_label(&global.name, id);
        let mut bad_ref = None;
        let mut check = |target: GlobalId| {
            if target.index() >= slots && bad_ref.is_none() {
                bad_ref = Some(target);
            }
        };
        let decode_failed = |source| CodecError::Content {
            name: label.clone(),
            source,
        };
        match &mut global.kind {
            GlobalKind::Function(func) => {
                let body: FunctionBody = bincode::deserialize(blob).map_err(decode_failed)?;
                body.for_each_global(&mut check);
                func.body = Some(body);
            }
            GlobalKind::Data(data) => {
                let init: Constant = bincode::deserialize(blob).map_err(decode_failed)?;
                init.for_each_global(&mut check);
                data.init = Some(init);
            }
            GlobalKind::Alias(_) => {}
        }
        if let Some(target) = bad_ref {
            return Err(CodecError::DanglingReference {
                from: label,
                index: target.raw(),
            });
        }
        trace!(global = %label, "materialized");
        Ok(())
    }

    /// Materialize every pending body, in id order.
    ///
    /// # Errors
    ///
    /// The first error from [`LazyModule::materialize`].
    pub fn materialize_all(&mut self) -> Result<(), CodecError> {
        let mut ids: Vec<GlobalId> = self.pending.keys().copied().collect();
        ids.sort_unstable();
        for id in ids {
            self.materialize(id)?;
        }
        Ok(())
    }

    /// Turn `id` into an external hidden declaration without decoding its
    /// body.
    pub fn make_external_declaration(&mut self, id: GlobalId) {
        self.pending.remove(&id);
        if let Some(global) = self.module.get_mut(id) {
            global.make_external_declaration();
        }
    }

    /// Erase a global, dropping any deferred body.
    pub fn erase(&mut self, id: GlobalId) -> Option<GlobalValue> {
        self.pending.remove(&id);
        self.module.erase(id)
    }

    /// Module-wide use replacement.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UseListsUnavailable`] while any body is still
    /// deferred, since uses inside it cannot be seen.
    pub fn replace_all_uses_with(
        &mut self,
        from: GlobalId,
        to: GlobalId,
    ) -> Result<usize, CodecError> {
        if !self.pending.is_empty() {
            return Err(CodecError::UseListsUnavailable {
                pending: self.pending.len(),
            });
        }
        Ok(self.module.replace_all_uses_with(from, to))
    }

    /// Materialize everything and return the plain module.
    ///
    /// # Errors
    ///
    /// The first error from [`LazyModule::materialize`].
    pub fn into_module(mut self) -> Result<Module, CodecError> {
        self.materialize_all()?;
        Ok(self.module)
    }
}

fn global_label(name: &str, id: GlobalId) -> String {
    if name.is_empty() {
        format!("#{}", id.raw())
    } else {
        name.to_owned()
    }
}
