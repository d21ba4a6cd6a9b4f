//! Property tests for partitioning and shard reconstruction.
//!
//! Random modules of functions, address tables, and aliases of both are
//! split into a random number of partitions and checked for:
//! 1. Cover: every definition lands in exactly one partition
//! 2. Closure: both ends of every reference edge share a partition
//! 3. Exports: every export index is owned exactly once
//! 4. Balance: the weight spread is at most the heaviest group
//! 5. Fidelity: a shard rebuilt from the serialized module keeps its
//!    members' bodies and initializers unchanged

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]
#![allow(
    clippy::cast_possible_truncation,
    clippy::needless_pass_by_value,
    reason = "Proptest macros generate code with these patterns"
)]

use std::collections::{BTreeSet, HashMap};

use ori_image::exports::ExportTable;
use ori_image::partition::UnionFind;
use ori_image::weight::global_weight;
use ori_image::{materialize_preserved, partition_module, Partition};
use ori_lir::{
    codec, BasicBlock, Constant, DataType, FnType, FunctionBody, GlobalId, GlobalValue,
    Instruction, LazyModule, Module, Opcode, ScalarType,
};
use proptest::prelude::*;

/// Shape of a generated module.
#[derive(Clone, Debug)]
struct Shape {
    /// Per function: extra block count and callee indices.
    funcs: Vec<(usize, Vec<usize>)>,
    /// Per table: indices of the functions it points at.
    tables: Vec<Vec<usize>>,
    /// Per alias: whether it names a table rather than a function, the
    /// target (modulo the candidate count), and a function that calls it.
    aliases: Vec<(bool, usize, Option<usize>)>,
    /// Export flag per function, then per table, then per alias.
    exported: Vec<bool>,
    threads: usize,
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    (1usize..24, 0usize..6, 0usize..5, 1usize..6)
        .prop_flat_map(|(nfuncs, ntables, naliases, threads)| {
            let funcs = prop::collection::vec(
                (0usize..3, prop::collection::vec(0..nfuncs, 0..3)),
                nfuncs,
            );
            let tables = prop::collection::vec(prop::collection::vec(0..nfuncs, 1..4), ntables);
            let aliases = prop::collection::vec(
                (any::<bool>(), 0usize..64, prop::option::of(0..nfuncs)),
                naliases,
            );
            let exported = prop::collection::vec(any::<bool>(), nfuncs + ntables + naliases);
            (funcs, tables, aliases, exported, Just(threads))
        })
        .prop_map(|(funcs, tables, aliases, exported, threads)| Shape {
            funcs,
            tables,
            aliases,
            exported,
            threads,
        })
}

fn build(shape: &Shape) -> (Module, ExportTable) {
    let mut m = Module::new("random").with_target("x86_64-unknown-linux-gnu", "e-m:e-p:64:64");
    let ext = m.add(GlobalValue::function("ext", FnType::void()));
    let funcs: Vec<GlobalId> = (0..shape.funcs.len())
        .map(|i| m.add(GlobalValue::function(format!("f{i}"), FnType::void())))
        .collect();

    let tables: Vec<GlobalId> = shape
        .tables
        .iter()
        .enumerate()
        .map(|(i, targets)| {
            m.add(GlobalValue::data(
                format!("t{i}"),
                DataType::Array {
                    elem: ScalarType::Ptr,
                    len: targets.len() as u64,
                },
                Some(Constant::address_table(targets.iter().map(|&t| funcs[t]))),
            ))
        })
        .collect();

    // Callers of each function alias, by function index.
    let mut alias_calls: Vec<Vec<GlobalId>> = vec![Vec::new(); funcs.len()];
    let mut fn_aliases = Vec::new();
    let mut data_aliases = Vec::new();
    for (i, &(to_table, target, caller)) in shape.aliases.iter().enumerate() {
        let on_table = to_table && !tables.is_empty();
        let aliasee = if on_table {
            tables[target % tables.len()]
        } else {
            funcs[target % funcs.len()]
        };
        let ty = m[aliasee].value_type();
        let alias = m.add(GlobalValue::alias(format!("a{i}"), ty, aliasee));
        if on_table {
            data_aliases.push((alias, shape.exported[funcs.len() + tables.len() + i]));
        } else {
            fn_aliases.push((alias, shape.exported[funcs.len() + tables.len() + i]));
            if let Some(caller) = caller {
                alias_calls[caller].push(alias);
            }
        }
    }

    for (i, (extra_blocks, callees)) in shape.funcs.iter().enumerate() {
        let mut entry: Vec<Instruction> = callees
            .iter()
            .map(|&c| funcs[c])
            .chain(alias_calls[i].iter().copied())
            .map(|c| Instruction::call(c, []))
            .collect();
        if i == 0 {
            entry.push(Instruction::call(ext, []));
        }
        entry.push(Instruction::new(Opcode::Ret, []));
        let mut blocks = vec![BasicBlock::new(entry)];
        for _ in 0..*extra_blocks {
            blocks.push(BasicBlock::new(vec![Instruction::new(Opcode::Ret, [])]));
        }
        let func = m[funcs[i]].as_function_mut().unwrap();
        func.body = Some(FunctionBody::new(blocks));
    }

    let (fexp, rest) = shape.exported.split_at(funcs.len());
    let fvars = funcs
        .iter()
        .zip(fexp)
        .filter(|(_, e)| **e)
        .map(|(&id, _)| id)
        .chain(fn_aliases.iter().filter(|(_, e)| *e).map(|&(id, _)| id))
        .collect();
    let gvars = tables
        .iter()
        .zip(rest)
        .filter(|(_, e)| **e)
        .map(|(&id, _)| id)
        .chain(data_aliases.iter().filter(|(_, e)| *e).map(|&(id, _)| id))
        .collect();
    (m, ExportTable::new(fvars, gvars))
}

fn owners(partitions: &[Partition]) -> HashMap<String, usize> {
    let mut owner = HashMap::new();
    for (i, p) in partitions.iter().enumerate() {
        for name in p.members.keys() {
            owner.insert(name.clone(), i);
        }
    }
    owner
}

/// Weight of the heaviest dependency group.
fn heaviest_group(m: &Module) -> usize {
    let defs: Vec<GlobalId> = m
        .iter()
        .filter(|(_, g)| !g.is_declaration())
        .map(|(id, _)| id)
        .collect();
    let index: HashMap<GlobalId, usize> = defs.iter().enumerate().map(|(i, &id)| (id, i)).collect();
    let mut groups = UnionFind::new(defs.iter().map(|&id| global_weight(&m[id])).collect());
    for (i, &id) in defs.iter().enumerate() {
        for target in m.references(id) {
            if let Some(&j) = index.get(&target) {
                groups.union(i, j);
            }
        }
    }
    (0..defs.len())
        .map(|i| {
            let root = groups.find(i);
            groups.set_weight(root)
        })
        .max()
        .unwrap_or(0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn partitions_cover_definitions_disjointly(shape in shape_strategy()) {
        let (mut m, table) = build(&shape);
        let parts = partition_module(&mut m, &table, shape.threads).unwrap();
        prop_assert_eq!(parts.len(), shape.threads);

        let definitions: BTreeSet<String> = m
            .iter()
            .filter(|(_, g)| !g.is_declaration())
            .map(|(_, g)| g.name.clone())
            .collect();
        let union: BTreeSet<String> = parts.iter().flat_map(|p| p.members.keys().cloned()).collect();
        let total: usize = parts.iter().map(Partition::len).sum();
        prop_assert_eq!(&union, &definitions);
        prop_assert_eq!(total, definitions.len());
        prop_assert!(!union.contains("ext"));
    }

    #[test]
    fn reference_edges_stay_in_one_partition(shape in shape_strategy()) {
        let (mut m, table) = build(&shape);
        let parts = partition_module(&mut m, &table, shape.threads).unwrap();
        let owner = owners(&parts);
        for (id, global) in m.iter() {
            let Some(&from) = owner.get(&global.name) else { continue };
            for target in m.references(id) {
                if let Some(&to) = owner.get(&m[target].name) {
                    prop_assert_eq!(from, to, "{} -> {}", global.name, m[target].name);
                }
            }
        }
    }

    #[test]
    fn every_export_index_is_owned_once(shape in shape_strategy()) {
        let (mut m, table) = build(&shape);
        let parts = partition_module(&mut m, &table, shape.threads).unwrap();
        let mut fidx: Vec<u32> = parts.iter().flat_map(|p| p.fvars.values().copied()).collect();
        let mut gidx: Vec<u32> = parts.iter().flat_map(|p| p.gvars.values().copied()).collect();
        fidx.sort_unstable();
        gidx.sort_unstable();
        prop_assert_eq!(fidx, (0..table.fvars.len() as u32).collect::<Vec<_>>());
        prop_assert_eq!(gidx, (0..table.gvars.len() as u32).collect::<Vec<_>>());
    }

    #[test]
    fn weight_spread_is_bounded_by_heaviest_group(shape in shape_strategy()) {
        let (mut m, table) = build(&shape);
        let parts = partition_module(&mut m, &table, shape.threads).unwrap();
        let max = parts.iter().map(|p| p.weight).max().unwrap();
        let min = parts.iter().map(|p| p.weight).min().unwrap();
        prop_assert!(max - min <= heaviest_group(&m), "spread {} over {:?}", max - min, parts.iter().map(|p| p.weight).collect::<Vec<_>>());

        let total: usize = m
            .iter()
            .filter(|(_, g)| !g.is_declaration())
            .map(|(_, g)| global_weight(g))
            .sum();
        prop_assert_eq!(parts.iter().map(|p| p.weight).sum::<usize>(), total);
    }

    #[test]
    fn rebuilt_shards_keep_member_bodies(shape in shape_strategy()) {
        let (mut m, table) = build(&shape);
        let parts = partition_module(&mut m, &table, shape.threads).unwrap();
        let bytes = codec::serialize(&m).unwrap();

        for part in &parts {
            let mut lazy = LazyModule::open(&bytes).unwrap();
            materialize_preserved(&mut lazy, part).unwrap();
            let shard = lazy.into_module().unwrap();
            prop_assert_eq!(shard.len(), m.len());
            for (_, global) in shard.iter() {
                prop_assert!(
                    !global.is_alias() || part.contains(&global.name),
                    "foreign alias {} survived",
                    global.name
                );
            }

            for (_, original) in m.iter() {
                let rebuilt = &shard[shard.lookup(&original.name).unwrap()];
                if part.contains(&original.name) {
                    prop_assert_eq!(rebuilt, original);
                } else if !original.is_declaration() {
                    prop_assert!(rebuilt.is_declaration(), "{} kept a body", original.name);
                }
            }
        }
    }
}
