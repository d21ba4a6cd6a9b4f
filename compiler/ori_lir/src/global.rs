//! Top-level definitions: functions, data objects, and aliases.
//!
//! A [`GlobalValue`] is addressed by its [`GlobalId`] inside a
//! [`Module`](crate::Module). Reference edges to other globals live in
//! function bodies, data initializers, and alias targets; the `for_each_*`
//! and `replace_*` helpers here are the only code that walks them, so every
//! pass in the workspace sees the same edge set.

use serde::{Deserialize, Serialize};

use crate::body::FunctionBody;
use crate::constant::Constant;
use crate::types::{DataType, FnType, ValueType};

// ── ID newtype ──────────────────────────────────────────────────────

/// Stable index of a global within its module.
///
/// Ids are allocated sequentially and never reused; erasing a global
/// leaves its slot empty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GlobalId(u32);

impl GlobalId {
    /// Create an id from a raw index.
    #[inline]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw `u32` value.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Get the index as `usize` (for indexing into `Vec`s).
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

// ── Symbol properties ───────────────────────────────────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Linkage {
    #[default]
    External,
    /// Visible to other definitions in the same module, not to the linker.
    Internal,
    /// Like `Internal`, and the symbol name is not emitted at all.
    Private,
    Weak,
}

impl Linkage {
    #[inline]
    pub fn is_local(self) -> bool {
        matches!(self, Self::Internal | Self::Private)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    #[default]
    Default,
    Hidden,
    Protected,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DllStorage {
    #[default]
    Default,
    Import,
    Export,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallingConv {
    #[default]
    C,
    X86StdCall,
}

/// Function attributes the image builder cares about.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FnAttributes {
    /// Must be inlined into every caller; never placed in a partition.
    pub always_inline: bool,
    /// Hexadecimal bit mask of target variants this function is cloned for.
    pub clone_set: Option<String>,
    pub calling_conv: CallingConv,
}

// ── Kinds ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub ty: FnType,
    pub attrs: FnAttributes,
    /// `None` for a declaration.
    pub body: Option<FunctionBody>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    pub ty: DataType,
    pub constant: bool,
    /// Alignment in bytes; 0 means natural alignment.
    pub align: u32,
    /// `None` for a declaration.
    pub init: Option<Constant>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub ty: ValueType,
    pub aliasee: GlobalId,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GlobalKind {
    Function(Function),
    Data(DataObject),
    Alias(Alias),
}

// ── GlobalValue ─────────────────────────────────────────────────────

/// A named (or anonymous) top-level definition or declaration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalValue {
    /// Empty for anonymous globals.
    pub name: String,
    pub linkage: Linkage,
    pub visibility: Visibility,
    pub dll_storage: DllStorage,
    pub dso_local: bool,
    /// Listed in the module's "compiler used" set: kept alive through
    /// optimization even without visible uses.
    pub compiler_used: bool,
    pub kind: GlobalKind,
}

impl GlobalValue {
    fn with_kind(name: impl Into<String>, kind: GlobalKind) -> Self {
        Self {
            name: name.into(),
            linkage: Linkage::External,
            visibility: Visibility::Default,
            dll_storage: DllStorage::Default,
            dso_local: false,
            compiler_used: false,
            kind,
        }
    }

    /// An external function declaration.
    pub fn function(name: impl Into<String>, ty: FnType) -> Self {
        Self::with_kind(
            name,
            GlobalKind::Function(Function {
                ty,
                attrs: FnAttributes::default(),
                body: None,
            }),
        )
    }

    /// An external data object; `init = None` makes it a declaration.
    pub fn data(name: impl Into<String>, ty: DataType, init: Option<Constant>) -> Self {
        Self::with_kind(
            name,
            GlobalKind::Data(DataObject {
                ty,
                constant: false,
                align: 0,
                init,
            }),
        )
    }

    pub fn alias(name: impl Into<String>, ty: ValueType, aliasee: GlobalId) -> Self {
        Self::with_kind(name, GlobalKind::Alias(Alias { ty, aliasee }))
    }

    /// Attach a body. No effect on non-functions.
    #[must_use]
    pub fn with_body(mut self, body: FunctionBody) -> Self {
        if let GlobalKind::Function(func) = &mut self.kind {
            func.body = Some(body);
        }
        self
    }

    #[must_use]
    pub fn with_linkage(mut self, linkage: Linkage) -> Self {
        self.linkage = linkage;
        self
    }

    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    /// Mark a data object read-only. No effect on other kinds.
    #[must_use]
    pub fn with_constant(mut self, constant: bool) -> Self {
        if let GlobalKind::Data(data) = &mut self.kind {
            data.constant = constant;
        }
        self
    }

    #[must_use]
    pub fn with_align(mut self, align: u32) -> Self {
        if let GlobalKind::Data(data) = &mut self.kind {
            data.align = align;
        }
        self
    }

    #[must_use]
    pub fn with_attrs(mut self, attrs: FnAttributes) -> Self {
        if let GlobalKind::Function(func) = &mut self.kind {
            func.attrs = attrs;
        }
        self
    }

    // ── Queries ─────────────────────────────────────────────────────

    #[inline]
    pub fn is_anonymous(&self) -> bool {
        self.name.is_empty()
    }

    /// A function without a body or a data object without an initializer.
    /// Aliases are always definitions.
    pub fn is_declaration(&self) -> bool {
        match &self.kind {
            GlobalKind::Function(func) => func.body.is_none(),
            GlobalKind::Data(data) => data.init.is_none(),
            GlobalKind::Alias(_) => false,
        }
    }

    #[inline]
    pub fn has_local_linkage(&self) -> bool {
        self.linkage.is_local()
    }

    pub fn as_function(&self) -> Option<&Function> {
        match &self.kind {
            GlobalKind::Function(func) => Some(func),
            _ => None,
        }
    }

    pub fn as_function_mut(&mut self) -> Option<&mut Function> {
        match &mut self.kind {
            GlobalKind::Function(func) => Some(func),
            _ => None,
        }
    }

    pub fn as_data(&self) -> Option<&DataObject> {
        match &self.kind {
            GlobalKind::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_data_mut(&mut self) -> Option<&mut DataObject> {
        match &mut self.kind {
            GlobalKind::Data(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_alias(&self) -> Option<&Alias> {
        match &self.kind {
            GlobalKind::Alias(alias) => Some(alias),
            _ => None,
        }
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        matches!(self.kind, GlobalKind::Function(_))
    }

    #[inline]
    pub fn is_alias(&self) -> bool {
        matches!(self.kind, GlobalKind::Alias(_))
    }

    /// Whether this is a function that must be inlined into its callers.
    pub fn is_always_inline(&self) -> bool {
        self.as_function().is_some_and(|func| func.attrs.always_inline)
    }

    /// The value type this global stands for.
    pub fn value_type(&self) -> ValueType {
        match &self.kind {
            GlobalKind::Function(func) => ValueType::Function(func.ty.clone()),
            GlobalKind::Data(data) => ValueType::Data(data.ty.clone()),
            GlobalKind::Alias(alias) => alias.ty.clone(),
        }
    }

    // ── Reference edges ─────────────────────────────────────────────

    /// Visit every global referenced by this one, in operand order.
    /// Duplicates are visited once per occurrence.
    pub fn for_each_reference(&self, f: &mut impl FnMut(GlobalId)) {
        match &self.kind {
            GlobalKind::Function(func) => {
                if let Some(body) = &func.body {
                    body.for_each_global(f);
                }
            }
            GlobalKind::Data(data) => {
                if let Some(init) = &data.init {
                    init.for_each_global(f);
                }
            }
            GlobalKind::Alias(alias) => f(alias.aliasee),
        }
    }

    /// Rewrite every reference to `from` into `to`, returning the number of
    /// operands rewritten.
    pub fn replace_references(&mut self, from: GlobalId, to: GlobalId) -> usize {
        self.remap_references(&mut |id| if id == from { to } else { id })
    }

    /// Apply `map` to every referenced id, returning the number of operands
    /// whose id changed.
    pub fn remap_references(&mut self, map: &mut impl FnMut(GlobalId) -> GlobalId) -> usize {
        match &mut self.kind {
            GlobalKind::Function(func) => func.body.as_mut().map_or(0, |body| body.remap(map)),
            GlobalKind::Data(data) => data.init.as_mut().map_or(0, |init| init.remap(map)),
            GlobalKind::Alias(alias) => {
                let next = map(alias.aliasee);
                let changed = usize::from(next != alias.aliasee);
                alias.aliasee = next;
                changed
            }
        }
    }

    /// Turn a definition into an external, hidden, DSO-local declaration:
    /// the function body is dropped, the data initializer cleared.
    /// Aliases are left alone (they cannot be declarations).
    pub fn make_external_declaration(&mut self) {
        match &mut self.kind {
            GlobalKind::Function(func) => func.body = None,
            GlobalKind::Data(data) => data.init = None,
            GlobalKind::Alias(_) => return,
        }
        self.linkage = Linkage::External;
        self.visibility = Visibility::Hidden;
        self.dso_local = true;
    }
}
