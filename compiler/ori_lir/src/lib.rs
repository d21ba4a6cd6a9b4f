//! Ori LIR: the low-level module representation consumed by the image builder.
//!
//! A [`Module`] is an arena of [`GlobalValue`]s (functions, data objects,
//! aliases) addressed by [`GlobalId`]. References between globals are the
//! [`Operand::Global`] operands of function bodies, [`Constant::GlobalAddr`]
//! entries of data initializers, and alias targets.
//!
//! # Modules
//!
//! - [`types`]: scalar, function, and data types
//! - [`global`] / [`module`]: definitions and the arena
//! - [`body`] / [`constant`]: function bodies and initializers
//! - [`verify`]: structural checks
//! - [`link`]: name-based linking of fragments
//! - [`codec`]: binary serialization with lazy body decoding

pub mod body;
pub mod codec;
pub mod constant;
pub mod global;
pub mod link;
pub mod module;
pub mod types;
pub mod verify;

pub use body::{BasicBlock, FunctionBody, Instruction, Opcode, Operand};
pub use codec::{CodecError, LazyModule};
pub use constant::Constant;
pub use global::{
    Alias, CallingConv, DataObject, DllStorage, FnAttributes, Function, GlobalId, GlobalKind,
    GlobalValue, Linkage, Visibility,
};
pub use link::{link_in, LinkError, LinkMap};
pub use module::Module;
pub use types::{DataType, FnType, ScalarType, ValueType};
pub use verify::{verify_module, VerifyError};

#[cfg(test)]
mod test_helpers;
