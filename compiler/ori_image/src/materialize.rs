//! Reducing a lazily opened module to one partition.
//!
//! Members of the partition keep their definitions. Every other externally
//! visible definition becomes an external hidden declaration without its
//! body ever being decoded. Local definitions (never partitioned) stay as
//! they are, so each shard carries its own copy.

use ori_lir::{verify_module, CodecError, GlobalId, LazyModule, Linkage, VerifyError};
use rustc_hash::FxHashSet;
use tracing::trace;

use crate::partition::Partition;
use crate::patch::retarget_through_placeholders;

#[derive(Debug, thiserror::Error)]
pub enum MaterializeError {
    #[error("partition member `{name}` is not in the module")]
    MissingMember { name: String },

    #[error("partition member `{name}` is a declaration or has local linkage")]
    InvalidMember { name: String },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("shard module is inconsistent after materialization: {}", .0.first().map(ToString::to_string).unwrap_or_default())]
    Verify(Vec<VerifyError>),
}

/// Materialize the definitions `partition` owns and declare everything else.
///
/// # Errors
///
/// Returns an error for a member that is absent, declared, or local, for
/// an undecodable body, or when the result fails verification.
pub fn materialize_preserved(
    lazy: &mut LazyModule<'_>,
    partition: &Partition,
) -> Result<(), MaterializeError> {
    let mut preserve: FxHashSet<GlobalId> = FxHashSet::default();
    for (name, &exported) in &partition.members {
        let id = lazy
            .module()
            .lookup(name)
            .ok_or_else(|| MaterializeError::MissingMember { name: name.clone() })?;
        if lazy.is_declaration(id) || lazy.module()[id].has_local_linkage() {
            return Err(MaterializeError::InvalidMember { name: name.clone() });
        }
        if exported {
            preserve.insert(id);
        } else {
            // Internal members need no preserve entry: local definitions
            // are never declared away.
            lazy.module_mut()[id].linkage = Linkage::Internal;
        }
    }

    let mut aliases = Vec::new();
    for id in lazy.module().ids() {
        let global = &lazy.module()[id];
        if preserve.contains(&id) || global.has_local_linkage() || lazy.is_declaration(id) {
            continue;
        }
        if global.is_alias() {
            aliases.push(id);
        } else {
            lazy.make_external_declaration(id);
        }
    }

    trace!(
        members = partition.members.len(),
        aliases = aliases.len(),
        "materializing partition"
    );
    retarget_through_placeholders(lazy, &aliases)?;
    lazy.materialize_all()?;

    verify_module(lazy.module()).map_err(MaterializeError::Verify)
}
