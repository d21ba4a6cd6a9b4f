use object::{Object as _, ObjectSymbol as _, SymbolKind};
use ori_lir::{FnType, GlobalId, GlobalValue, Linkage, Module};
use pretty_assertions::assert_eq;

use crate::target::{OptimizationLevel, TargetConfig};
use crate::test_helpers::{abcg_module, func_calling, linux_module, linux_target};

use super::*;

fn abcg_with_external() -> Module {
    let (mut m, _) = abcg_module();
    let ext = m.add(GlobalValue::function("ext", FnType::void()));
    m.add(func_calling("calls_ext", &[ext]));
    m
}

#[test]
fn elf_object_carries_every_definition() {
    let m = abcg_with_external();
    let emitter = ObjectEmitter::new(&linux_target());
    let bytes = emitter.emit(&m, FileType::Object).unwrap();

    let file = object::File::parse(&*bytes).unwrap();
    assert_eq!(file.format(), object::BinaryFormat::Elf);
    for name in ["a", "b", "c", "calls_ext"] {
        let sym = file.symbol_by_name(name).unwrap();
        assert!(sym.is_global(), "{name} should be global");
        assert!(!sym.is_undefined());
        assert_eq!(sym.kind(), SymbolKind::Text);
    }
    let g = file.symbol_by_name("g").unwrap();
    assert_eq!(g.kind(), SymbolKind::Data);
    assert!(file.symbol_by_name("ext").unwrap().is_undefined());
}

#[test]
fn local_definitions_stay_local() {
    let mut m = linux_module("m");
    let helper = m.add(func_calling("helper", &[]).with_linkage(Linkage::Internal));
    m.add(func_calling("root", &[helper]));
    let bytes = ObjectEmitter::new(&linux_target())
        .emit_object_to_memory(&m)
        .unwrap();
    let file = object::File::parse(&*bytes).unwrap();
    assert!(file.symbol_by_name("helper").unwrap().is_local());
    assert!(file.symbol_by_name("root").unwrap().is_global());
}

#[test]
fn macho_and_coff_objects_parse() {
    let (m, _) = abcg_module();
    for (triple, format) in [
        ("arm64-apple-darwin", object::BinaryFormat::MachO),
        ("x86_64-pc-windows-msvc", object::BinaryFormat::Coff),
    ] {
        let target = TargetConfig::from_triple(triple).unwrap().for_image();
        let bytes = ObjectEmitter::new(&target).emit_object_to_memory(&m).unwrap();
        let file = object::File::parse(&*bytes).unwrap();
        assert_eq!(file.format(), format, "{triple}");
    }
}

#[test]
fn wasm_is_unsupported() {
    let (m, _) = abcg_module();
    let target = TargetConfig::from_triple("wasm32-unknown-unknown").unwrap();
    let emitter = ObjectEmitter::new(&target);
    assert!(matches!(
        emitter.emit(&m, FileType::Object),
        Err(EmitError::UnsupportedFileType {
            file_type: FileType::Object,
            ..
        })
    ));
    assert!(matches!(
        emitter.emit(&m, FileType::Assembly),
        Err(EmitError::UnsupportedFileType { .. })
    ));
}

#[test]
fn unknown_architecture_is_reported() {
    let (m, _) = abcg_module();
    let target = TargetConfig::from_triple("sparc64-unknown-linux-gnu").unwrap();
    let err = ObjectEmitter::new(&target).emit_object_to_memory(&m).unwrap_err();
    assert_eq!(err.to_string(), "no object writer for architecture 'sparc64'");
}

#[test]
fn assembly_lists_labels_and_directives() {
    let m = abcg_with_external();
    let asm = ObjectEmitter::new(&linux_target())
        .emit(&m, FileType::Assembly)
        .unwrap();
    let text = String::from_utf8(asm).unwrap();
    assert!(text.starts_with("\t.file\t\"abcg\"\n"));
    assert!(text.contains("\t.text\n"));
    assert!(text.contains("\t.globl\ta\n"));
    assert!(text.contains("\na:\n"));
    assert!(text.contains("\ng:\n"));
    assert!(text.contains("\t.quad\tc\n"));
    assert!(!text.contains("\next:\n"));
}

#[test]
fn darwin_assembly_prefixes_names() {
    let (m, _) = abcg_module();
    let target = TargetConfig::from_triple("x86_64-apple-darwin").unwrap();
    let asm = ObjectEmitter::new(&target)
        .emit_assembly_to_memory(&m)
        .unwrap();
    let text = String::from_utf8(asm).unwrap();
    assert!(text.contains("\n_a:\n"));
    assert!(text.contains("\t.section\t__TEXT,__text,regular,pure_instructions\n"));
}

#[test]
fn optimize_strips_unreferenced_locals() {
    let mut m = linux_module("m");
    let live = m.add(func_calling("live", &[]).with_linkage(Linkage::Internal));
    m.add(func_calling("dead", &[]).with_linkage(Linkage::Internal));
    m.add(func_calling("root", &[live]));

    let target = linux_target().with_opt_level(OptimizationLevel::Default);
    ObjectEmitter::new(&target).optimize(&mut m).unwrap();
    assert!(m.lookup("live").is_some());
    assert!(m.lookup("root").is_some());
    assert!(m.lookup("dead").is_none());
}

#[test]
fn optimize_at_none_keeps_everything() {
    let mut m = linux_module("m");
    m.add(func_calling("dead", &[]).with_linkage(Linkage::Internal));
    ObjectEmitter::new(&linux_target()).optimize(&mut m).unwrap();
    assert!(m.lookup("dead").is_some());
}

#[test]
fn optimize_rejects_invalid_modules() {
    let mut m = linux_module("m");
    m.add(func_calling("f", &[GlobalId::new(99)]));
    let err = ObjectEmitter::new(&linux_target())
        .optimize(&mut m)
        .unwrap_err();
    assert!(matches!(err, EmitError::InvalidModule(ref errors) if !errors.is_empty()));
    assert!(err
        .to_string()
        .starts_with("module failed verification with 1 error(s): "));
}

#[test]
fn write_ir_round_trips() {
    let (m, _) = abcg_module();
    let bytes = ObjectEmitter::new(&linux_target()).write_ir(&m).unwrap();
    let back = ori_lir::codec::deserialize(&bytes).unwrap();
    assert_eq!(back.len(), m.len());
}

#[test]
fn emit_error_display() {
    let err = EmitError::UnsupportedFileType {
        file_type: FileType::Assembly,
        triple: "wasm32-unknown-unknown".to_string(),
    };
    assert_eq!(
        err.to_string(),
        "cannot emit Assembly files for target 'wasm32-unknown-unknown'"
    );
    assert_eq!(FileType::Object.extension(), "o");
    assert_eq!(FileType::Assembly.extension(), "s");
}
