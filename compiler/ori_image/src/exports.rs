//! Export tables: the function and global indices the runtime loader uses
//! to find definitions inside an image.
//!
//! Before partitioning, the tables travel inside the module as four marker
//! data objects (`image_fvars`, `image_gvars` holding addresses and
//! `image_fvar_idxs`, `image_gvar_idxs` holding the matching indices).
//! [`extract`] turns them into an explicit [`ExportTable`] and erases the
//! markers so they never take part in partitioning.
//!
//! After a shard is materialized, [`construct_tables`] rebuilds the slice of
//! the tables that the shard owns, sorted by index, under shard-suffixed
//! names:
//!
//! ```text
//! image_fvar_offsets_<i>   [ptr; k]   addresses of owned functions
//! image_fvar_idxs_<i>      [u32; k]   their export indices, ascending
//! image_fvar_base_<i>      ptr        first owned function (or null)
//! image_gvar_*_<i>                    same for global variables
//! ```

use ori_lir::{Constant, DataType, GlobalId, GlobalValue, Module, ScalarType, Visibility};
use tracing::trace;

use crate::partition::Partition;

pub const FVARS_MARKER: &str = "image_fvars";
pub const GVARS_MARKER: &str = "image_gvars";
pub const FVAR_IDXS_MARKER: &str = "image_fvar_idxs";
pub const GVAR_IDXS_MARKER: &str = "image_gvar_idxs";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExportTableError {
    #[error("marker table `{name}` is malformed: {reason}")]
    MalformedMarker { name: String, reason: String },

    #[error("exported definition `{name}` is missing from shard {shard}")]
    MissingExport { name: String, shard: usize },

    #[error("exported definition `{name}` is only declared in shard {shard}")]
    DeclaredExport { name: String, shard: usize },
}

/// Ordered export lists. An entry's position is its export index.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExportTable {
    pub fvars: Vec<GlobalId>,
    pub gvars: Vec<GlobalId>,
}

impl ExportTable {
    pub fn new(fvars: Vec<GlobalId>, gvars: Vec<GlobalId>) -> Self {
        Self { fvars, gvars }
    }

    pub fn is_empty(&self) -> bool {
        self.fvars.is_empty() && self.gvars.is_empty()
    }
}

fn marker(name: &str, elem: ScalarType, init: Constant, len: usize) -> GlobalValue {
    GlobalValue::data(
        name,
        DataType::Array {
            elem,
            len: len as u64,
        },
        Some(init),
    )
    .with_constant(true)
    .with_visibility(Visibility::Hidden)
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "export indices are u32 by format"
)]
fn identity(len: usize) -> Constant {
    Constant::u32_array((0..len).map(|i| i as u32))
}

/// Add the four marker tables describing `table` to `module`.
pub fn emit_markers(module: &mut Module, table: &ExportTable) {
    let fvars = table.fvars.len();
    let gvars = table.gvars.len();
    module.add(marker(
        FVARS_MARKER,
        ScalarType::Ptr,
        Constant::address_table(table.fvars.iter().copied()),
        fvars,
    ));
    module.add(marker(
        GVARS_MARKER,
        ScalarType::Ptr,
        Constant::address_table(table.gvars.iter().copied()),
        gvars,
    ));
    module.add(marker(FVAR_IDXS_MARKER, ScalarType::I32, identity(fvars), fvars));
    module.add(marker(GVAR_IDXS_MARKER, ScalarType::I32, identity(gvars), gvars));
}

fn malformed(name: &str, reason: impl Into<String>) -> ExportTableError {
    ExportTableError::MalformedMarker {
        name: name.to_owned(),
        reason: reason.into(),
    }
}

fn read_addresses(module: &Module, name: &str) -> Result<Option<Vec<GlobalId>>, ExportTableError> {
    let Some(id) = module.lookup(name) else {
        return Ok(None);
    };
    let Some(Constant::Array(elems)) = module[id].as_data().and_then(|d| d.init.as_ref()) else {
        return Err(malformed(name, "expected an address array"));
    };
    elems
        .iter()
        .map(|elem| match elem {
            Constant::GlobalAddr(target) if module.contains(*target) => Ok(*target),
            _ => Err(malformed(name, "entry is not the address of a live global")),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

fn read_indices(module: &Module, name: &str, len: usize) -> Result<Vec<usize>, ExportTableError> {
    let Some(id) = module.lookup(name) else {
        return Ok((0..len).collect());
    };
    let Some(Constant::Array(elems)) = module[id].as_data().and_then(|d| d.init.as_ref()) else {
        return Err(malformed(name, "expected an index array"));
    };
    if elems.len() != len {
        return Err(malformed(
            name,
            format!("{} indices for {len} entries", elems.len()),
        ));
    }
    let mut seen = vec![false; len];
    let mut out = Vec::with_capacity(len);
    for elem in elems {
        let Constant::Int { value, .. } = elem else {
            return Err(malformed(name, "index is not an integer"));
        };
        let idx = usize::try_from(*value).unwrap_or(usize::MAX);
        if idx >= len || std::mem::replace(&mut seen[idx], true) {
            return Err(malformed(name, format!("index {value} out of range or repeated")));
        }
        out.push(idx);
    }
    Ok(out)
}

fn ordered(addresses: Vec<GlobalId>, indices: &[usize]) -> Vec<GlobalId> {
    let mut out = addresses.clone();
    for (addr, &idx) in addresses.into_iter().zip(indices) {
        out[idx] = addr;
    }
    out
}

/// Read the marker tables out of `module` and erase them.
///
/// Returns `None` when the module carries no markers.
///
/// # Errors
///
/// Returns [`ExportTableError::MalformedMarker`] when a marker is not the
/// expected array, names an erased global, or its index array is not a
/// permutation of `0..len`.
pub fn extract(module: &mut Module) -> Result<Option<ExportTable>, ExportTableError> {
    let fvars = read_addresses(module, FVARS_MARKER)?;
    let gvars = read_addresses(module, GVARS_MARKER)?;
    if fvars.is_none() && gvars.is_none() {
        return Ok(None);
    }
    let fvars = fvars.unwrap_or_default();
    let gvars = gvars.unwrap_or_default();
    let fidxs = read_indices(module, FVAR_IDXS_MARKER, fvars.len())?;
    let gidxs = read_indices(module, GVAR_IDXS_MARKER, gvars.len())?;

    for name in [FVARS_MARKER, GVARS_MARKER, FVAR_IDXS_MARKER, GVAR_IDXS_MARKER] {
        if let Some(id) = module.lookup(name) {
            module.erase(id);
        }
    }
    Ok(Some(ExportTable::new(
        ordered(fvars, &fidxs),
        ordered(gvars, &gidxs),
    )))
}

fn sorted_pairs<'a>(
    module: &Module,
    owned: impl Iterator<Item = (&'a String, &'a u32)>,
    shard: usize,
) -> Result<Vec<(u32, GlobalId)>, ExportTableError> {
    let mut pairs = owned
        .map(|(name, &idx)| {
            let id = module.lookup(name).ok_or_else(|| ExportTableError::MissingExport {
                name: name.clone(),
                shard,
            })?;
            if module[id].is_declaration() {
                return Err(ExportTableError::DeclaredExport {
                    name: name.clone(),
                    shard,
                });
            }
            Ok((idx, id))
        })
        .collect::<Result<Vec<_>, _>>()?;
    pairs.sort_unstable();
    Ok(pairs)
}

fn shard_table(name: String, ty: DataType, init: Constant, constant: bool) -> GlobalValue {
    let mut gv = GlobalValue::data(name, ty, Some(init))
        .with_constant(constant)
        .with_visibility(Visibility::Hidden);
    gv.dso_local = true;
    gv
}

fn emit_kind(module: &mut Module, kind: &str, pairs: &[(u32, GlobalId)], shard: usize) {
    let len = pairs.len() as u64;
    let base = pairs
        .first()
        .map_or(Constant::Zero, |&(_, id)| Constant::GlobalAddr(id));
    module.add(shard_table(
        format!("image_{kind}_offsets_{shard}"),
        DataType::Array {
            elem: ScalarType::Ptr,
            len,
        },
        Constant::address_table(pairs.iter().map(|&(_, id)| id)),
        true,
    ));
    module.add(shard_table(
        format!("image_{kind}_idxs_{shard}"),
        DataType::Array {
            elem: ScalarType::I32,
            len,
        },
        Constant::u32_array(pairs.iter().map(|&(idx, _)| idx)),
        true,
    ));
    module.add(shard_table(
        format!("image_{kind}_base_{shard}"),
        DataType::Scalar(ScalarType::Ptr),
        base,
        false,
    ));
}

/// Emit shard `shard`'s export tables for the definitions `partition` owns.
///
/// # Errors
///
/// Returns an error when an owned definition is missing from the module or
/// was reduced to a declaration.
pub fn construct_tables(
    module: &mut Module,
    partition: &Partition,
    shard: usize,
) -> Result<(), ExportTableError> {
    let fvars = sorted_pairs(module, partition.fvars.iter(), shard)?;
    let gvars = sorted_pairs(module, partition.gvars.iter(), shard)?;
    trace!(shard, fvars = fvars.len(), gvars = gvars.len(), "constructing export tables");
    emit_kind(module, "fvar", &fvars, shard);
    emit_kind(module, "gvar", &gvars, shard);
    Ok(())
}

/// Emit shard 0's tables straight from `table`, for single-shard builds
/// that skip partitioning.
#[expect(
    clippy::cast_possible_truncation,
    reason = "export indices are u32 by format"
)]
pub fn construct_single_shard(module: &mut Module, table: &ExportTable) {
    let fvars: Vec<(u32, GlobalId)> = table
        .fvars
        .iter()
        .enumerate()
        .map(|(i, &id)| (i as u32, id))
        .collect();
    let gvars: Vec<(u32, GlobalId)> = table
        .gvars
        .iter()
        .enumerate()
        .map(|(i, &id)| (i as u32, id))
        .collect();
    emit_kind(module, "fvar", &fvars, 0);
    emit_kind(module, "gvar", &gvars, 0);
}
