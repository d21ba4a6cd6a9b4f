//! Value types for globals.
//!
//! The image builder never inspects instruction semantics, so the type
//! system only carries what layout and stub creation need: scalar widths,
//! function signatures, and the byte size of data objects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar machine type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarType {
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    Half,
    Float,
    Double,
    Ptr,
}

impl ScalarType {
    /// Storage size in bytes. `Void` occupies nothing.
    #[must_use]
    pub fn size(self, pointer_size: u32) -> u64 {
        match self {
            Self::Void => 0,
            Self::I1 | Self::I8 => 1,
            Self::I16 | Self::Half => 2,
            Self::I32 | Self::Float => 4,
            Self::I64 | Self::Double => 8,
            Self::Ptr => u64::from(pointer_size),
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Void => "void",
            Self::I1 => "i1",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::Half => "half",
            Self::Float => "float",
            Self::Double => "double",
            Self::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// A function signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FnType {
    pub params: Vec<ScalarType>,
    pub ret: ScalarType,
    pub variadic: bool,
}

impl FnType {
    /// A non-variadic signature.
    #[must_use]
    pub fn new(params: Vec<ScalarType>, ret: ScalarType) -> Self {
        Self {
            params,
            ret,
            variadic: false,
        }
    }

    /// `void ()`, the signature used for opaque test and stub functions.
    #[must_use]
    pub fn void() -> Self {
        Self::new(Vec::new(), ScalarType::Void)
    }

    /// Mark the signature variadic.
    #[must_use]
    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }
}

impl fmt::Display for FnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (", self.ret)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{param}")?;
        }
        if self.variadic {
            f.write_str(if self.params.is_empty() { "..." } else { ", ..." })?;
        }
        f.write_str(")")
    }
}

/// The in-memory type of a data object.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Scalar(ScalarType),
    Array { elem: ScalarType, len: u64 },
    /// Opaque byte blob of a fixed size.
    Bytes(u64),
}

impl DataType {
    /// Storage size in bytes.
    #[must_use]
    pub fn size(&self, pointer_size: u32) -> u64 {
        match self {
            Self::Scalar(scalar) => scalar.size(pointer_size),
            Self::Array { elem, len } => elem.size(pointer_size) * len,
            Self::Bytes(len) => *len,
        }
    }

    /// Natural alignment in bytes (at least 1).
    #[must_use]
    pub fn natural_align(&self, pointer_size: u32) -> u32 {
        let elem = match self {
            Self::Scalar(scalar) | Self::Array { elem: scalar, .. } => scalar.size(pointer_size),
            Self::Bytes(_) => 1,
        };
        u32::try_from(elem.max(1)).unwrap_or(1)
    }
}

/// The value type of a global: what an alias or declaration stands for.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Function(FnType),
    Data(DataType),
}

impl ValueType {
    #[must_use]
    pub fn is_function(&self) -> bool {
        matches!(self, Self::Function(_))
    }
}
