//! End-to-end image builds through the public API.

#![allow(clippy::unwrap_used, clippy::expect_used, reason = "Tests can panic")]

use std::path::Path;

use object::read::archive::ArchiveFile;
use object::{Object as _, ObjectSymbol as _};
use ori_image::{
    build_image, ArtifactKind, ImageOptions, ModuleInfo, NativeCode, ObjectEmitter, OutputPaths,
    TargetConfig, ThreadPolicy,
};
use ori_lir::{
    codec, BasicBlock, Constant, DataType, FnType, FunctionBody, GlobalId, GlobalValue,
    Instruction, Module, Opcode, ScalarType,
};
use pretty_assertions::assert_eq;

const LINUX: &str = "x86_64-unknown-linux-gnu";

fn func(name: &str, callees: &[GlobalId]) -> GlobalValue {
    let mut insts: Vec<Instruction> = callees.iter().map(|&c| Instruction::call(c, [])).collect();
    insts.push(Instruction::new(Opcode::Ret, []));
    GlobalValue::function(name, FnType::void())
        .with_body(FunctionBody::new(vec![BasicBlock::new(insts)]))
}

/// Functions `a -> b` and `c`, and `g = [&c]`. Exports: fvars [a, b, c],
/// gvars [g].
fn abcg(target: &TargetConfig) -> NativeCode {
    let mut m = Module::new("abcg");
    target.configure_module(&mut m);
    let b = m.add(func("b", &[]));
    let a = m.add(func("a", &[b]));
    let c = m.add(func("c", &[]));
    let g = m.add(GlobalValue::data(
        "g",
        DataType::Array {
            elem: ScalarType::Ptr,
            len: 1,
        },
        Some(Constant::address_table([c])),
    ));
    NativeCode {
        module: m,
        fvars: vec![a, b, c],
        gvars: vec![g],
        unit_map: Vec::new(),
    }
}

fn archive_members(path: &Path) -> Vec<(String, Vec<u8>)> {
    let bytes = std::fs::read(path).unwrap();
    let archive = ArchiveFile::parse(&*bytes).unwrap();
    archive
        .members()
        .map(|m| {
            let m = m.unwrap();
            (
                String::from_utf8(m.name().to_vec()).unwrap(),
                m.data(&*bytes).unwrap().to_vec(),
            )
        })
        .collect()
}

fn defined_globals(object: &[u8]) -> Vec<String> {
    let file = object::File::parse(object).unwrap();
    let mut names: Vec<String> = file
        .symbols()
        .filter(|s| s.is_global() && s.is_definition())
        .map(|s| s.name().unwrap().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn abcg_builds_two_shards() {
    let target = TargetConfig::from_triple(LINUX).unwrap();
    let backend = ObjectEmitter::new(&target);
    let dir = tempfile::tempdir().unwrap();
    let options = ImageOptions {
        paths: OutputPaths::default()
            .with(ArtifactKind::Object, dir.path().join("image.a"))
            .with(ArtifactKind::OptIr, dir.path().join("image-opt.a")),
        threads: ThreadPolicy::with_available(8).with_image_threads("2"),
        ..ImageOptions::default()
    };

    let report = build_image(abcg(&target), &backend, &options, None).unwrap();
    assert_eq!(report.stats.threads, 2);
    assert_eq!(report.stats.partition_weights, vec![7, 4]);
    assert!(report.diagnostics.is_empty());

    let objects = archive_members(&dir.path().join("image.a"));
    let names: Vec<&str> = objects.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["text#0.o", "text#1.o", "metadata.o"]);

    let shard0 = defined_globals(&objects[0].1);
    assert!(shard0.contains(&"a".to_string()));
    assert!(shard0.contains(&"b".to_string()));
    assert!(!shard0.contains(&"c".to_string()));
    let shard1 = defined_globals(&objects[1].1);
    assert!(shard1.contains(&"c".to_string()));
    assert!(shard1.contains(&"g".to_string()));
    assert!(shard1.contains(&"image_gvar_offsets_1".to_string()));
    assert!(defined_globals(&objects[2].1).contains(&"image_pointers".to_string()));

    // Optimized IR of each shard still declares what the other defines.
    let ir = archive_members(&dir.path().join("image-opt.a"));
    let shard1_ir = codec::deserialize(&ir[1].1).unwrap();
    let a = shard1_ir.lookup("a").unwrap();
    assert!(shard1_ir[a].is_declaration());
    assert_eq!(shard1_ir.source_file, "abcg#1");
}

#[test]
fn small_module_compiles_in_place() {
    let target = TargetConfig::from_triple(LINUX).unwrap();
    let backend = ObjectEmitter::new(&target);
    let dir = tempfile::tempdir().unwrap();
    let options = ImageOptions {
        paths: OutputPaths::default().with(ArtifactKind::Object, dir.path().join("image.a")),
        threads: ThreadPolicy::with_available(64),
        ..ImageOptions::default()
    };

    let report = build_image(abcg(&target), &backend, &options, None).unwrap();
    assert_eq!(report.stats.threads, 1);
    assert_eq!(report.stats.serialized_bytes, None);

    let objects = archive_members(&dir.path().join("image.a"));
    let names: Vec<&str> = objects.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["text#0.o", "metadata.o"]);
    assert_eq!(
        defined_globals(&objects[0].1)
            .into_iter()
            .filter(|n| n.len() == 1)
            .collect::<Vec<_>>(),
        vec!["a", "b", "c", "g"]
    );
}

#[test]
fn darwin_images_use_bsd_archives() {
    let target = TargetConfig::from_triple("arm64-apple-darwin").unwrap();
    let backend = ObjectEmitter::new(&target);
    let dir = tempfile::tempdir().unwrap();
    let options = ImageOptions {
        paths: OutputPaths::default().with(ArtifactKind::Object, dir.path().join("image.a")),
        payload: Some(vec![0xAB; 100]),
        ..ImageOptions::default()
    };

    build_image(abcg(&target), &backend, &options, None).unwrap();
    let bytes = std::fs::read(dir.path().join("image.a")).unwrap();
    let archive = ArchiveFile::parse(&*bytes).unwrap();
    assert_eq!(archive.kind(), object::read::archive::ArchiveKind::Bsd);
    let names: Vec<String> = archive_members(&dir.path().join("image.a"))
        .into_iter()
        .map(|(n, _)| n)
        .filter(|n| !n.starts_with("__.SYMDEF"))
        .collect();
    assert_eq!(names, vec!["text#0.o", "metadata.o", "sysimg.o"]);
}

#[test]
fn thread_policy_precedence() {
    let info = |triple: &str, globals: usize, weight: usize| ModuleInfo {
        triple: triple.to_string(),
        globals,
        weight,
        ..ModuleInfo::default()
    };
    let policy = ThreadPolicy::with_available(32);
    assert_eq!(policy.decide(&info(LINUX, 5000, 500)), 1);
    assert_eq!(policy.decide(&info("x86_64-pc-windows-msvc", 70_000, 10_000_000)), 1);

    let forced = policy.with_image_threads("4");
    assert_eq!(forced.decide(&info(LINUX, 5000, 500)), 4);
    assert_eq!(forced.decide(&info(LINUX, 70_000, 10_000_000)), 4);
    assert_eq!(forced.decide(&info("x86_64-pc-windows-msvc", 70_000, 500)), 1);
    assert_eq!(forced.decide(&info("x86_64-w64-mingw32", 70_000, 10_000_000)), 1);
    assert_eq!(forced.decide(&info("x86_64-w64-mingw32", 5000, 10_000_000)), 4);
}
