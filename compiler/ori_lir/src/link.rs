//! Linking module fragments into one module.
//!
//! Symbols resolve by name. A declaration in either module binds to the
//! other module's definition; a weak definition yields to a strong one;
//! local symbols never bind and are renamed on collision instead.

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::global::{GlobalId, GlobalValue, Linkage};
use crate::module::Module;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum LinkError {
    #[error("symbol `{name}` is defined in both `{dst}` and `{src}`")]
    DuplicateDefinition {
        name: String,
        dst: String,
        src: String,
    },

    #[error("symbol `{name}` is a function in one module and data in the other")]
    KindMismatch { name: String },
}

/// Where each source global ended up in the destination.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LinkMap {
    map: FxHashMap<GlobalId, GlobalId>,
}

impl LinkMap {
    pub fn get(&self, src: GlobalId) -> Option<GlobalId> {
        self.map.get(&src).copied()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

enum Resolution {
    /// Insert as a new global.
    Add,
    /// Insert as a new global after renaming the local `dst` symbol
    /// currently holding the name.
    AddDisplacing(GlobalId),
    /// Overwrite the `dst` declaration (or weak definition) with this one.
    Replace(GlobalId),
    /// Drop; references go to the existing `dst` global.
    Bind(GlobalId),
}

fn is_weak(global: &GlobalValue) -> bool {
    global.linkage == Linkage::Weak
}

fn resolve(dst: &Module, src_module: &str, global: &GlobalValue) -> Result<Resolution, LinkError> {
    if global.is_anonymous() || global.has_local_linkage() {
        return Ok(Resolution::Add);
    }
    let Some(existing_id) = dst.lookup(&global.name) else {
        return Ok(Resolution::Add);
    };
    let existing = &dst[existing_id];
    if existing.has_local_linkage() {
        return Ok(Resolution::AddDisplacing(existing_id));
    }
    if existing.value_type().is_function() != global.value_type().is_function() {
        return Err(LinkError::KindMismatch {
            name: global.name.clone(),
        });
    }
    match (existing.is_declaration(), global.is_declaration()) {
        (_, true) => Ok(Resolution::Bind(existing_id)),
        (true, false) => Ok(Resolution::Replace(existing_id)),
        (false, false) if is_weak(global) => Ok(Resolution::Bind(existing_id)),
        (false, false) if is_weak(existing) => Ok(Resolution::Replace(existing_id)),
        (false, false) => Err(LinkError::DuplicateDefinition {
            name: global.name.clone(),
            dst: dst.name.clone(),
            src: src_module.to_owned(),
        }),
    }
}

/// Move every global of `src` into `dst`.
///
/// Nothing is modified when an error is returned.
///
/// # Errors
///
/// Returns [`LinkError`] when two strong definitions share a name or a name
/// is a function on one side and data on the other.
pub fn link_in(dst: &mut Module, src: Module) -> Result<LinkMap, LinkError> {
    let src_name = src.name.clone();
    let resolutions = src
        .iter()
        .map(|(_, global)| resolve(dst, &src_name, global))
        .collect::<Result<Vec<_>, _>>()?;

    let (globals, flags) = src.into_parts();
    let mut link_map = LinkMap::default();
    let mut incoming = Vec::new();
    let (mut added, mut bound) = (0usize, 0usize);

    for ((src_id, global), resolution) in globals.into_iter().zip(resolutions) {
        let dst_id = match resolution {
            Resolution::Add => {
                added += 1;
                let id = dst.add(global);
                incoming.push(id);
                id
            }
            Resolution::AddDisplacing(local) => {
                let renamed = dst.unique_name(&format!("{}.local", global.name));
                dst.set_name(local, &renamed);
                added += 1;
                let id = dst.add(global);
                incoming.push(id);
                id
            }
            Resolution::Replace(existing) => {
                dst.replace(existing, global);
                incoming.push(existing);
                existing
            }
            Resolution::Bind(existing) => {
                bound += 1;
                existing
            }
        };
        link_map.map.insert(src_id, dst_id);
    }

    for id in incoming {
        if let Some(global) = dst.get_mut(id) {
            global.remap_references(&mut |target| link_map.get(target).unwrap_or(target));
        }
    }

    for (key, value) in flags {
        if dst.flag(&key).is_none() {
            dst.set_flag(key, value);
        }
    }

    debug!(
        src = %src_name,
        dst = %dst.name,
        added,
        bound,
        "linked module"
    );
    Ok(link_map)
}
