//! Structural module verification.
//!
//! Run after every transformation that rewrites references (materializing a
//! partition, linking fragments) to catch dangling ids early.

use rustc_hash::FxHashSet;

use crate::global::{GlobalId, GlobalKind};
use crate::module::Module;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    #[error("`{from}` references global {target:?}, which is not in the module")]
    DanglingReference { from: String, target: GlobalId },

    #[error("alias `{alias}` points at declaration `{aliasee}`")]
    AliasToDeclaration { alias: String, aliasee: String },

    #[error("declaration `{name}` has local linkage")]
    LocalDeclaration { name: String },

    #[error("name `{name}` is used by more than one global")]
    DuplicateName { name: String },
}

/// Display label for a global: its name, or `#<id>` when anonymous.
pub fn label(module: &Module, id: GlobalId) -> String {
    match module.get(id) {
        Some(global) if !global.name.is_empty() => global.name.clone(),
        _ => format!("#{}", id.raw()),
    }
}

/// Check the module and report every problem found.
///
/// # Errors
///
/// Returns all violations when at least one is found.
pub fn verify_module(module: &Module) -> Result<(), Vec<VerifyError>> {
    let mut errors = Vec::new();
    let mut names = FxHashSet::default();

    for (id, global) in module.iter() {
        if !global.name.is_empty() && !names.insert(global.name.as_str()) {
            errors.push(VerifyError::DuplicateName {
                name: global.name.clone(),
            });
        }

        if global.is_declaration() && global.has_local_linkage() {
            errors.push(VerifyError::LocalDeclaration {
                name: label(module, id),
            });
        }

        global.for_each_reference(&mut |target| {
            if !module.contains(target) {
                errors.push(VerifyError::DanglingReference {
                    from: label(module, id),
                    target,
                });
            }
        });

        if let GlobalKind::Alias(alias) = &global.kind {
            if module.get(alias.aliasee).is_some_and(|t| t.is_declaration()) {
                errors.push(VerifyError::AliasToDeclaration {
                    alias: label(module, id),
                    aliasee: label(module, alias.aliasee),
                });
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
