//! Code Generation Backend
//!
//! The shard pipeline treats optimization and instruction selection as an
//! opaque service parameterized by the target. [`CodegenBackend`] is that
//! seam; [`ObjectEmitter`] is the in-tree implementation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   write_ir   ┌──────────────────┐
//! │   Module    │─────────────▶│ serialized IR    │
//! │ (one shard) │   optimize   └──────────────────┘
//! │             │──┐
//! │             │◀─┘  emit     ┌──────────────────┐
//! │             │─────────────▶│ object / assembly│
//! └─────────────┘              └──────────────────┘
//! ```
//!
//! Backends are shared by every worker thread, so they must be `Sync` and
//! must not keep per-module state.

mod encode;
mod emitter;

use std::fmt;

use ori_lir::{CodecError, Module, VerifyError};

use crate::target::{TargetConfig, TargetError};

pub use emitter::ObjectEmitter;

/// Machine code output flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileType {
    Object,
    Assembly,
}

impl FileType {
    /// Get the typical file extension for this file type.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Object => "o",
            Self::Assembly => "s",
        }
    }
}

/// Error type for code generation operations.
#[derive(Debug)]
pub enum EmitError {
    /// The backend cannot produce this file type for the target.
    UnsupportedFileType { file_type: FileType, triple: String },
    /// The target architecture has no object writer.
    UnsupportedArchitecture { arch: String },
    /// Target configuration could not be derived.
    Target(TargetError),
    /// The object writer rejected the module.
    ObjectWrite { message: String },
    /// The module failed verification before optimization.
    InvalidModule(Vec<VerifyError>),
    /// Serializing IR failed.
    Encode(CodecError),
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedFileType { file_type, triple } => {
                write!(f, "cannot emit {file_type:?} files for target '{triple}'")
            }
            Self::UnsupportedArchitecture { arch } => {
                write!(f, "no object writer for architecture '{arch}'")
            }
            Self::Target(err) => write!(f, "invalid target: {err}"),
            Self::ObjectWrite { message } => write!(f, "failed to write object file: {message}"),
            Self::InvalidModule(errors) => {
                write!(f, "module failed verification with {} error(s)", errors.len())?;
                if let Some(first) = errors.first() {
                    write!(f, ": {first}")?;
                }
                Ok(())
            }
            Self::Encode(err) => write!(f, "failed to serialize IR: {err}"),
        }
    }
}

impl std::error::Error for EmitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Target(err) => Some(err),
            Self::Encode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TargetError> for EmitError {
    fn from(err: TargetError) -> Self {
        Self::Target(err)
    }
}

impl From<CodecError> for EmitError {
    fn from(err: CodecError) -> Self {
        Self::Encode(err)
    }
}

/// Optimize-and-emit service used by every shard.
pub trait CodegenBackend: Sync {
    fn target(&self) -> &TargetConfig;

    /// Serialize the module as IR, in its current state.
    ///
    /// # Errors
    ///
    /// Returns an error when the module cannot be encoded.
    fn write_ir(&self, module: &Module) -> Result<Vec<u8>, EmitError>;

    /// Run the optimization pipeline in place.
    ///
    /// # Errors
    ///
    /// Returns an error when the module is not valid input.
    fn optimize(&self, module: &mut Module) -> Result<(), EmitError>;

    /// Produce machine code for the module.
    ///
    /// # Errors
    ///
    /// Returns an error for an unsupported file type or target, or when
    /// the writer rejects the module.
    fn emit(&self, module: &Module, file_type: FileType) -> Result<Vec<u8>, EmitError>;
}

#[cfg(test)]
mod tests;
