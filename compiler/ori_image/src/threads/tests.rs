use pretty_assertions::assert_eq;

use super::*;

fn info(triple: &str, globals: usize, weight: usize) -> ModuleInfo {
    ModuleInfo {
        triple: triple.to_string(),
        globals,
        weight,
        ..ModuleInfo::default()
    }
}

const LINUX: &str = "x86_64-unknown-linux-gnu";
const WINDOWS: &str = "x86_64-pc-windows-msvc";

#[test]
fn small_modules_use_one_thread() {
    let policy = ThreadPolicy::with_available(16);
    assert_eq!(policy.decide(&info(LINUX, 5000, 999)), 1);
}

#[test]
fn half_the_cores_capped_by_definitions() {
    let policy = ThreadPolicy::with_available(16);
    assert_eq!(policy.decide(&info(LINUX, 5000, 50_000)), 8);
    assert_eq!(policy.decide(&info(LINUX, 300, 50_000)), 3);
    // Fewer than a hundred definitions still gets one thread.
    assert_eq!(policy.decide(&info(LINUX, 40, 50_000)), 1);
}

#[test]
fn single_core_hosts_use_one_thread() {
    let policy = ThreadPolicy::with_available(1);
    assert_eq!(policy.decide(&info(LINUX, 5000, 50_000)), 1);
}

#[test]
fn override_beats_module_size() {
    let policy = ThreadPolicy::with_available(16).with_image_threads("6");
    assert_eq!(policy.decide(&info(LINUX, 10, 5)), 6);
}

#[test]
fn coff_export_limit_beats_override() {
    let policy = ThreadPolicy::with_available(16).with_image_threads("6");
    assert_eq!(policy.decide(&info(WINDOWS, COFF_EXPORT_LIMIT + 1, 1_000_000)), 1);
    assert_eq!(policy.decide(&info(WINDOWS, COFF_EXPORT_LIMIT, 1_000_000)), 6);
    // ELF has no such limit.
    assert_eq!(policy.decide(&info(LINUX, COFF_EXPORT_LIMIT + 1, 1_000_000)), 6);
}

#[test]
fn thirty_two_bit_hosts_use_one_thread() {
    let policy = ThreadPolicy::with_available(16)
        .with_image_threads("6")
        .with_host_32bit(true);
    assert_eq!(policy.decide(&info(LINUX, 5000, 50_000)), 1);
}

#[test]
fn cpu_threads_only_lowers() {
    let base = ThreadPolicy::with_available(16);
    let big = info(LINUX, 5000, 50_000);
    assert_eq!(base.clone().with_cpu_threads("3").decide(&big), 3);
    assert_eq!(base.clone().with_cpu_threads("64").decide(&big), 8);
    // Does not apply when the heuristic already settled on one thread.
    assert_eq!(base.with_cpu_threads("3").decide(&info(LINUX, 150, 50_000)), 1);
}

#[test]
fn invalid_values_are_ignored() {
    let big = info(LINUX, 5000, 50_000);
    for bad in ["0", "-2", "many", ""] {
        let policy = ThreadPolicy::with_available(16)
            .with_image_threads(bad)
            .with_cpu_threads(bad);
        assert_eq!(policy.decide(&big), 8, "value {bad:?}");
    }
    let leading = ThreadPolicy::with_available(16).with_image_threads(" 4");
    assert_eq!(leading.decide(&big), 4);
    for trailing in ["4 ", "4x", "4\n"] {
        let policy = ThreadPolicy::with_available(16).with_image_threads(trailing);
        assert_eq!(policy.decide(&big), 8, "value {trailing:?}");
    }
}

#[test]
fn invalid_values_are_listed() {
    let policy = ThreadPolicy::with_available(16)
        .with_image_threads("4 ")
        .with_cpu_threads("2");
    assert_eq!(
        policy.invalid_values(),
        vec![format!("ignoring {IMAGE_THREADS_ENV}=\"4 \": expected a positive integer")]
    );
    assert!(ThreadPolicy::with_available(16).invalid_values().is_empty());
}

#[test]
fn mingw_and_cygwin_count_as_coff() {
    let policy = ThreadPolicy::with_available(16).with_image_threads("4");
    for triple in [
        "x86_64-w64-mingw32",
        "i686-pc-cygwin",
        "i686-w64-windows-gnu",
        "x86_64-pc-windows-msvc",
    ] {
        assert_eq!(
            policy.decide(&info(triple, COFF_EXPORT_LIMIT + 1, 10_000_000)),
            1,
            "{triple}"
        );
    }
    assert_eq!(policy.decide(&info("x86_64-w64-mingw32", 5000, 50_000)), 4);
}

#[test]
fn unparseable_triple_is_not_coff() {
    let policy = ThreadPolicy::with_available(4).with_image_threads("2");
    assert_eq!(policy.decide(&info("garbage", COFF_EXPORT_LIMIT + 1, 10)), 2);
}
