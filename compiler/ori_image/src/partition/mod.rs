//! Dependency-closed, weight-balanced partitioning of a module.
//!
//! Every definition that can be partitioned becomes a union-find node
//! weighted by [`global_weight`]. Each node is merged with every
//! definition it references, so a group is closed under reference edges
//! and can be compiled on its own. Groups are then packed greedily,
//! heaviest first, into whichever partition is currently lightest.
//!
//! Definitions that must be inlined into their callers are never
//! partitioned. Every shard keeps its own declaration of them and code
//! generation copies the body wherever it is needed.

mod union_find;

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use ori_lir::verify::label;
use ori_lir::{GlobalId, Linkage, Module, Visibility};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::exports::ExportTable;
use crate::weight::global_weight;

pub use union_find::UnionFind;

/// Prefix given to anonymous definitions so they can be found by name in
/// every shard.
pub const ANONYMOUS_PREFIX: &str = "__ori_ext_";

/// The definitions one shard compiles.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    /// Member names. `true` keeps the member visible to other shards,
    /// `false` demotes it to internal linkage when the shard is built.
    pub members: FxHashMap<String, bool>,
    /// Owned function export indices, by member name.
    pub fvars: FxHashMap<String, u32>,
    /// Owned global variable export indices, by member name.
    pub gvars: FxHashMap<String, u32>,
    pub weight: usize,
}

impl Partition {
    pub fn contains(&self, name: &str) -> bool {
        self.members.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// A broken partitioning invariant.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PartitionViolation {
    #[error("`{name}` is a member of partitions {first} and {second}")]
    DuplicateMember {
        name: String,
        first: usize,
        second: usize,
    },

    #[error("`{name}` is assigned but is not a definition in the module")]
    UnknownMember { name: String },

    #[error("declaration `{name}` was assigned to partition {partition}")]
    DeclarationAssigned { name: String, partition: usize },

    #[error("`{name}` cannot be partitioned but was assigned to partition {partition}")]
    NotPartitionable { name: String, partition: usize },

    #[error("definition `{name}` is not in any partition")]
    Unassigned { name: String },

    #[error("`{user}` (partition {user_partition}) references `{target}` (partition {target_partition})")]
    CrossPartitionReference {
        user: String,
        user_partition: usize,
        target: String,
        target_partition: usize,
    },

    #[error("{kind} export index {index} is owned by {owners} partitions")]
    ExportOwnership {
        kind: &'static str,
        index: u32,
        owners: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum PartitionError {
    #[error("cannot split a module into zero partitions")]
    ZeroPartitions,

    #[error("definition {id:?} has no name; run `name_anonymous_globals` first")]
    AnonymousDefinition { id: GlobalId },

    #[error("`{user}` cannot be partitioned but references partitionable `{target}`")]
    UnpartitionedReference { user: String, target: String },

    #[error("partitioning is inconsistent ({} violations, first: {})", .0.len(), first_violation(.0))]
    Violations(Vec<PartitionViolation>),
}

fn first_violation(violations: &[PartitionViolation]) -> String {
    violations
        .first()
        .map_or_else(String::new, ToString::to_string)
}

/// Whether `id` gets its own node: a definition that is not forced inline.
fn can_partition(module: &Module, id: GlobalId) -> bool {
    let global = &module[id];
    !global.is_declaration() && !global.is_always_inline()
}

/// Give every anonymous definition a unique `__ori_ext_<n>` name.
///
/// Returns the number of globals named.
pub fn name_anonymous_globals(module: &mut Module) -> usize {
    let anonymous: Vec<GlobalId> = module
        .iter()
        .filter(|(_, g)| g.is_anonymous() && !g.is_declaration())
        .map(|(id, _)| id)
        .collect();
    for (n, id) in anonymous.iter().enumerate() {
        module.set_name(*id, &format!("{ANONYMOUS_PREFIX}{n}"));
    }
    anonymous.len()
}

/// Split `module` into `threads` partitions.
///
/// Every partitionable definition is forced to external linkage and hidden
/// visibility, since it may now be referenced from another shard. The
/// result is checked with [`verify_partitioning`] before it is returned.
///
/// # Errors
///
/// - [`PartitionError::ZeroPartitions`] for `threads == 0`
/// - [`PartitionError::AnonymousDefinition`] for an unnamed definition
/// - [`PartitionError::UnpartitionedReference`] when a definition that
///   cannot be partitioned references one that can
/// - [`PartitionError::Violations`] when verification fails
pub fn partition_module(
    module: &mut Module,
    exports: &ExportTable,
    threads: usize,
) -> Result<Vec<Partition>, PartitionError> {
    if threads == 0 {
        return Err(PartitionError::ZeroPartitions);
    }

    let mut nodes: Vec<GlobalId> = Vec::new();
    let mut node_of: FxHashMap<GlobalId, usize> = FxHashMap::default();
    let mut weights = Vec::new();
    for id in module.ids() {
        if !can_partition(module, id) {
            continue;
        }
        let global = &mut module[id];
        if global.is_anonymous() {
            return Err(PartitionError::AnonymousDefinition { id });
        }
        global.linkage = Linkage::External;
        global.visibility = Visibility::Hidden;
        weights.push(global_weight(global));
        node_of.insert(id, nodes.len());
        nodes.push(id);
    }

    let mut groups = UnionFind::new(weights);
    for (id, global) in module.iter() {
        let user = node_of.get(&id).copied();
        let mut unpartitioned = None;
        global.for_each_reference(&mut |target| {
            let Some(&target_node) = node_of.get(&target) else {
                return;
            };
            match user {
                Some(user_node) => {
                    groups.union(user_node, target_node);
                }
                None => {
                    unpartitioned.get_or_insert(target);
                }
            }
        });
        if let Some(target) = unpartitioned {
            return Err(PartitionError::UnpartitionedReference {
                user: label(module, id),
                target: label(module, target),
            });
        }
    }

    // Roots ordered by descending group weight; ties keep module order.
    let mut members_of: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
    let mut roots = Vec::new();
    for node in 0..nodes.len() {
        let root = groups.find(node);
        let members = members_of.entry(root).or_default();
        if members.is_empty() {
            roots.push(root);
        }
        members.push(node);
    }
    roots.sort_by_key(|&root| Reverse(groups.set_weight(root)));

    let mut partitions = vec![Partition::default(); threads];
    let mut lightest: BinaryHeap<Reverse<(usize, usize)>> =
        (0..threads).map(|i| Reverse((0, i))).collect();
    let mut assigned: FxHashMap<GlobalId, usize> = FxHashMap::default();
    for root in roots {
        let Some(Reverse((weight, index))) = lightest.pop() else {
            break;
        };
        let partition = &mut partitions[index];
        for &node in members_of.get(&root).into_iter().flatten() {
            let id = nodes[node];
            partition.members.insert(module[id].name.clone(), true);
            assigned.insert(id, index);
        }
        partition.weight += groups.set_weight(root);
        trace!(partition = index, group_weight = groups.set_weight(root), "assigned group");
        lightest.push(Reverse((weight + groups.set_weight(root), index)));
    }

    record_exports(module, &exports.fvars, &assigned, &mut partitions, |p| &mut p.fvars);
    record_exports(module, &exports.gvars, &assigned, &mut partitions, |p| &mut p.gvars);

    debug!(
        threads,
        nodes = nodes.len(),
        weights = ?partitions.iter().map(|p| p.weight).collect::<Vec<_>>(),
        "partitioned module"
    );

    verify_partitioning(module, exports, &partitions).map_err(PartitionError::Violations)?;
    Ok(partitions)
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "export indices are u32 by format"
)]
fn record_exports(
    module: &Module,
    table: &[GlobalId],
    assigned: &FxHashMap<GlobalId, usize>,
    partitions: &mut [Partition],
    slot: impl Fn(&mut Partition) -> &mut FxHashMap<String, u32>,
) {
    for (idx, id) in table.iter().enumerate() {
        if let Some(&p) = assigned.get(id) {
            slot(&mut partitions[p]).insert(module[*id].name.clone(), idx as u32);
        }
    }
}

/// Check that `partitions` cover every partitionable definition of `module`
/// exactly once, never split a reference edge, and own every export index
/// exactly once.
///
/// # Errors
///
/// Returns every violation found.
pub fn verify_partitioning(
    module: &Module,
    exports: &ExportTable,
    partitions: &[Partition],
) -> Result<(), Vec<PartitionViolation>> {
    let mut violations = Vec::new();

    let mut owner: FxHashMap<&str, usize> = FxHashMap::default();
    for (i, partition) in partitions.iter().enumerate() {
        let mut names: Vec<&str> = partition.members.keys().map(String::as_str).collect();
        names.sort_unstable();
        for name in names {
            if let Some(&first) = owner.get(name) {
                violations.push(PartitionViolation::DuplicateMember {
                    name: name.to_owned(),
                    first,
                    second: i,
                });
                continue;
            }
            owner.insert(name, i);
            match module.lookup(name) {
                None => violations.push(PartitionViolation::UnknownMember {
                    name: name.to_owned(),
                }),
                Some(id) if module[id].is_declaration() => {
                    violations.push(PartitionViolation::DeclarationAssigned {
                        name: name.to_owned(),
                        partition: i,
                    });
                }
                Some(id) if module[id].is_always_inline() => {
                    violations.push(PartitionViolation::NotPartitionable {
                        name: name.to_owned(),
                        partition: i,
                    });
                }
                Some(_) => {}
            }
        }
    }

    for (id, global) in module.iter() {
        if !can_partition(module, id) {
            continue;
        }
        let Some(&user_partition) = owner.get(global.name.as_str()) else {
            violations.push(PartitionViolation::Unassigned {
                name: label(module, id),
            });
            continue;
        };
        for target in module.references(id) {
            if !module.contains(target) || !can_partition(module, target) {
                continue;
            }
            let target_name = module[target].name.as_str();
            if let Some(&target_partition) = owner.get(target_name) {
                if target_partition != user_partition {
                    violations.push(PartitionViolation::CrossPartitionReference {
                        user: global.name.clone(),
                        user_partition,
                        target: target_name.to_owned(),
                        target_partition,
                    });
                }
            }
        }
    }

    check_ownership(exports.fvars.len(), "function", partitions, |p| &p.fvars, &mut violations);
    check_ownership(exports.gvars.len(), "global", partitions, |p| &p.gvars, &mut violations);

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "export indices are u32 by format"
)]
fn check_ownership(
    len: usize,
    kind: &'static str,
    partitions: &[Partition],
    owned: impl Fn(&Partition) -> &FxHashMap<String, u32>,
    violations: &mut Vec<PartitionViolation>,
) {
    let mut owners = vec![0usize; len];
    for partition in partitions {
        for &idx in owned(partition).values() {
            match owners.get_mut(idx as usize) {
                Some(count) => *count += 1,
                None => violations.push(PartitionViolation::ExportOwnership {
                    kind,
                    index: idx,
                    owners: 1,
                }),
            }
        }
    }
    for (index, &count) in owners.iter().enumerate() {
        if count != 1 {
            violations.push(PartitionViolation::ExportOwnership {
                kind,
                index: index as u32,
                owners: count,
            });
        }
    }
}

#[cfg(test)]
mod tests;
