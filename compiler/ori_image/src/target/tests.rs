use pretty_assertions::assert_eq;

use super::*;

#[test]
fn parse_three_and_four_components() {
    let c = TargetTripleComponents::parse("aarch64-apple-darwin").unwrap();
    assert_eq!(c.arch, "aarch64");
    assert_eq!(c.vendor, "apple");
    assert_eq!(c.os, "darwin");
    assert_eq!(c.env, None);

    let c = TargetTripleComponents::parse("x86_64-w64-windows-gnu-elf").unwrap();
    assert_eq!(c.env.as_deref(), Some("gnu-elf"));
    assert_eq!(c.to_string(), "x86_64-w64-windows-gnu-elf");
}

#[test]
fn parse_rejects_short_or_empty() {
    assert!(matches!(
        TargetTripleComponents::parse("x86_64-linux"),
        Err(TargetError::MalformedTriple { .. })
    ));
    assert!(matches!(
        TargetTripleComponents::parse("x86_64--linux"),
        Err(TargetError::MalformedTriple { .. })
    ));
}

#[test]
fn binary_format_follows_os_unless_elf_requested() {
    assert_eq!(BinaryFormat::for_triple("x86_64-unknown-linux-gnu"), BinaryFormat::Elf);
    assert_eq!(BinaryFormat::for_triple("x86_64-pc-windows-msvc"), BinaryFormat::Coff);
    assert_eq!(BinaryFormat::for_triple("arm64-apple-darwin"), BinaryFormat::MachO);
    assert_eq!(BinaryFormat::for_triple("x86_64-pc-windows-elf"), BinaryFormat::Elf);
    assert_eq!(BinaryFormat::for_triple("wasm32-unknown-unknown"), BinaryFormat::Wasm);
}

#[test]
fn for_image_restores_native_formats() {
    let win = TargetConfig::from_triple("x86_64-pc-windows-elf")
        .unwrap()
        .for_image();
    assert_eq!(win.binary_format(), BinaryFormat::Coff);
    assert_eq!(win.triple(), "x86_64-pc-windows-msvc");

    let mac = TargetConfig::from_triple("x86_64-apple-darwin-elf")
        .unwrap()
        .for_image();
    assert_eq!(mac.binary_format(), BinaryFormat::MachO);
    assert_eq!(mac.triple(), "x86_64-apple-macosx");
}

#[test]
fn mingw_and_cygwin_use_coff() {
    for triple in ["x86_64-w64-mingw32", "i686-pc-cygwin", "x86_64-pc-unknown-windows-gnu"] {
        let config = TargetConfig::from_triple(triple).unwrap();
        assert!(config.is_windows(), "{triple}");
        assert_eq!(config.binary_format(), BinaryFormat::Coff, "{triple}");
        let image = config.for_image();
        assert_eq!(image.binary_format(), BinaryFormat::Coff, "{triple}");
        assert_eq!(image.triple(), triple);
    }
    assert!(!TargetTripleComponents::parse("x86_64-unknown-linux-gnu")
        .unwrap()
        .is_windows());
}

#[test]
fn for_image_code_and_reloc_models() {
    let linux = TargetConfig::from_triple("x86_64-unknown-linux-gnu")
        .unwrap()
        .for_image();
    assert_eq!(linux.reloc_mode(), RelocMode::Pic);
    assert_eq!(linux.code_model(), CodeModel::Small);

    let ppc = TargetConfig::from_triple("powerpc64le-unknown-linux-gnu")
        .unwrap()
        .for_image();
    assert_eq!(ppc.code_model(), CodeModel::Medium);

    let win = TargetConfig::from_triple("x86_64-pc-windows-msvc")
        .unwrap()
        .for_image();
    assert_eq!(win.reloc_mode(), RelocMode::Default);
}

#[test]
fn pointer_size_and_layout() {
    let x64 = TargetConfig::from_triple("x86_64-unknown-linux-gnu").unwrap();
    assert_eq!(x64.pointer_size(), 8);
    assert_eq!(x64.data_layout(), "e-m:e-p:64:64-i64:64-n32:64-S128");

    let i686 = TargetConfig::from_triple("i686-pc-windows-msvc").unwrap();
    assert_eq!(i686.pointer_size(), 4);
    assert!(i686.data_layout().starts_with("e-m:w-p:32:32"));

    let ppc = TargetConfig::from_triple("powerpc64-unknown-linux-gnu").unwrap();
    assert!(!ppc.is_little_endian());
}

#[test]
fn opt_level_orders_by_strength() {
    let config = TargetConfig::from_triple("x86_64-unknown-linux-gnu")
        .unwrap()
        .with_opt_level(OptimizationLevel::Aggressive);
    assert_eq!(config.opt_level(), OptimizationLevel::Aggressive);
    assert!(OptimizationLevel::Less > OptimizationLevel::None);
}

#[test]
fn configure_module_stamps_target() {
    let config = TargetConfig::from_triple("aarch64-unknown-linux-gnu").unwrap();
    let mut module = Module::new("m");
    config.configure_module(&mut module);
    assert_eq!(module.target_triple, "aarch64-unknown-linux-gnu");
    assert_eq!(module.data_layout, config.data_layout());
    assert_eq!(module.flag(RELOC_FLAG), None);

    let image = config.for_image();
    image.configure_module(&mut module);
    assert_eq!(module.flag(RELOC_FLAG), Some("pic"));
    assert_eq!(module.flag(CODE_MODEL_FLAG), Some("small"));
}

#[test]
fn error_display() {
    let err = TargetTripleComponents::parse("bad").unwrap_err();
    assert_eq!(
        err.to_string(),
        "malformed target triple 'bad': need <arch>-<vendor>-<os>"
    );
}
