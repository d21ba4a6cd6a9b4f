use ori_lir::{FnType, GlobalValue, Linkage, ValueType, Visibility};
use pretty_assertions::assert_eq;

use crate::test_helpers::{abcg_module, func_calling, inline_leaf, int_data, linux_module, ptr_table};

use super::*;

fn sorted_members(p: &Partition) -> Vec<&str> {
    let mut names: Vec<&str> = p.members.keys().map(String::as_str).collect();
    names.sort_unstable();
    names
}

#[test]
fn abcg_splits_into_two_groups() {
    let (mut m, table) = abcg_module();
    let parts = partition_module(&mut m, &table, 2).unwrap();
    let mut groups: Vec<Vec<&str>> = parts.iter().map(sorted_members).collect();
    groups.sort();
    assert_eq!(groups, vec![vec!["a", "b"], vec!["c", "g"]]);

    // Every exported function index is owned once across both shards.
    let mut fidx: Vec<u32> = parts.iter().flat_map(|p| p.fvars.values().copied()).collect();
    fidx.sort_unstable();
    assert_eq!(fidx, vec![0, 1, 2]);
}

#[test]
fn heaviest_group_goes_first() {
    let (mut m, table) = abcg_module();
    let parts = partition_module(&mut m, &table, 2).unwrap();
    // {a, b} weighs 7, {c, g} weighs 4; the heavier group lands in
    // partition 0 because all partitions start empty.
    assert_eq!(sorted_members(&parts[0]), vec!["a", "b"]);
    assert_eq!(parts[0].weight, 7);
    assert_eq!(parts[1].weight, 4);
}

#[test]
fn partitionable_definitions_become_external_hidden() {
    let (mut m, table) = abcg_module();
    let b = m.lookup("b").unwrap();
    m[b].linkage = Linkage::Internal;
    partition_module(&mut m, &table, 2).unwrap();
    assert_eq!(m[b].linkage, Linkage::External);
    assert_eq!(m[b].visibility, Visibility::Hidden);
}

#[test]
fn more_partitions_than_groups_leaves_some_empty() {
    let (mut m, table) = abcg_module();
    let parts = partition_module(&mut m, &table, 4).unwrap();
    assert_eq!(parts.len(), 4);
    assert_eq!(parts.iter().filter(|p| p.is_empty()).count(), 2);
}

#[test]
fn zero_partitions_is_an_error() {
    let (mut m, table) = abcg_module();
    assert_eq!(
        partition_module(&mut m, &table, 0),
        Err(PartitionError::ZeroPartitions)
    );
}

#[test]
fn declarations_and_inline_functions_are_not_members() {
    let mut m = linux_module("m");
    let ext = m.add(GlobalValue::function("ext", FnType::void()));
    let helper = m.add(inline_leaf("helper"));
    m.add(func_calling("user", &[ext, helper]));
    let parts = partition_module(&mut m, &ExportTable::default(), 1).unwrap();
    assert_eq!(sorted_members(&parts[0]), vec!["user"]);
    assert_eq!(m[helper].linkage, Linkage::Internal);
}

#[test]
fn inline_function_referencing_a_node_is_fatal() {
    let mut m = linux_module("m");
    let leaf = m.add(func_calling("leaf", &[]));
    m.add(
        func_calling("helper", &[leaf])
            .with_linkage(Linkage::Internal)
            .with_attrs(ori_lir::FnAttributes {
                always_inline: true,
                ..ori_lir::FnAttributes::default()
            }),
    );
    assert_eq!(
        partition_module(&mut m, &ExportTable::default(), 2),
        Err(PartitionError::UnpartitionedReference {
            user: "helper".to_string(),
            target: "leaf".to_string(),
        })
    );
}

#[test]
fn anonymous_definitions_need_names() {
    let mut m = linux_module("m");
    let anon = m.add(int_data("", 7));
    assert!(matches!(
        partition_module(&mut m.clone(), &ExportTable::default(), 1),
        Err(PartitionError::AnonymousDefinition { .. })
    ));
    assert_eq!(name_anonymous_globals(&mut m), 1);
    assert_eq!(m[anon].name, "__ori_ext_0");
    assert!(partition_module(&mut m, &ExportTable::default(), 1).is_ok());
}

#[test]
fn aliases_share_a_partition_with_their_target() {
    let mut m = linux_module("m");
    let f = m.add(func_calling("f", &[]));
    m.add(GlobalValue::alias("f_alias", ValueType::Function(FnType::void()), f));
    m.add(func_calling("other", &[]));
    let parts = partition_module(&mut m, &ExportTable::default(), 2).unwrap();
    let owner = parts.iter().find(|p| p.contains("f")).unwrap();
    assert!(owner.contains("f_alias"));
}

#[test]
fn verify_reports_every_violation() {
    let (mut m, table) = abcg_module();
    let mut parts = partition_module(&mut m, &table, 2).unwrap();
    // Move `b` away from `a` and lose `g`'s export index.
    let (with_a, other) = if parts[0].contains("a") { (0, 1) } else { (1, 0) };
    parts[with_a].members.remove("b");
    let b_idx = parts[with_a].fvars.remove("b").unwrap();
    parts[other].members.insert("b".to_string(), true);
    parts[other].fvars.insert("b".to_string(), b_idx);
    parts[other].gvars.clear();

    let violations = verify_partitioning(&m, &table, &parts).unwrap_err();
    assert!(violations.iter().any(|v| matches!(
        v,
        PartitionViolation::CrossPartitionReference { user, target, .. }
            if user == "a" && target == "b"
    )));
    assert!(violations.contains(&PartitionViolation::ExportOwnership {
        kind: "global",
        index: 0,
        owners: 0,
    }));
}

#[test]
fn verify_catches_duplicates_and_unassigned() {
    let (mut m, table) = abcg_module();
    let mut parts = partition_module(&mut m, &table, 2).unwrap();
    let (with_c, other) = if parts[0].contains("c") { (0, 1) } else { (1, 0) };
    parts[other].members.insert("c".to_string(), true);
    parts[with_c].members.remove("g");

    let violations = verify_partitioning(&m, &table, &parts).unwrap_err();
    assert!(violations
        .iter()
        .any(|v| matches!(v, PartitionViolation::DuplicateMember { name, .. } if name == "c")));
    assert!(violations.contains(&PartitionViolation::Unassigned {
        name: "g".to_string(),
    }));
}

#[test]
fn verify_rejects_declared_members() {
    let mut m = linux_module("m");
    m.add(GlobalValue::function("ext", FnType::void()));
    let mut p = Partition::default();
    p.members.insert("ext".to_string(), true);
    p.members.insert("missing".to_string(), true);
    let violations = verify_partitioning(&m, &ExportTable::default(), &[p]).unwrap_err();
    assert!(violations.contains(&PartitionViolation::DeclarationAssigned {
        name: "ext".to_string(),
        partition: 0,
    }));
    assert!(violations.contains(&PartitionViolation::UnknownMember {
        name: "missing".to_string(),
    }));
}

#[test]
fn data_tables_pull_in_their_targets() {
    let mut m = linux_module("m");
    let x = m.add(int_data("x", 1));
    let y = m.add(int_data("y", 2));
    m.add(ptr_table("t", &[x, y]));
    m.add(int_data("z", 3));
    let parts = partition_module(&mut m, &ExportTable::default(), 2).unwrap();
    let owner = parts.iter().find(|p| p.contains("t")).unwrap();
    assert_eq!(sorted_members(owner), vec!["t", "x", "y"]);
}
