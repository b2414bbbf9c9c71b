//! `DirHome` end-to-end: source files laid out on disk, built, and the
//! linked image written back to disk for a later session to reuse —
//! the filesystem-backed counterpart to the `MemHome` scenarios.

use std::fs;

use vmx_build::{build_pkgs, DirHome, Flags, Options};

#[test]
fn builds_from_disk_and_writes_the_image_back_to_disk() {
    let root = tempfile::tempdir().unwrap();
    let pkg_dir = root.path().join("main");
    fs::create_dir_all(&pkg_dir).unwrap();
    fs::write(pkg_dir.join("main.g"), "func main() { print(7) }").unwrap();

    let home = DirHome::new(root.path());
    let opts = Options { home: &home, std_root: None, flags: Flags::default() };
    let report = build_pkgs(&opts, &["main".to_string()]);

    assert!(report.diagnostics.is_empty(), "unexpected diagnostics: {:?}", report.diagnostics.as_slice());
    assert!(report.artifacts.contains_key("main"));

    let written = fs::read(pkg_dir.join("bin.img")).unwrap();
    assert_eq!(written, report.artifacts["main"]);

    let got = vmx_testing::build_and_run_main(&home, "main").unwrap();
    assert_eq!(got, "7\n");
}

#[test]
fn select_pkgs_expands_a_directory_tree_on_disk() {
    let root = tempfile::tempdir().unwrap();
    fs::create_dir_all(root.path().join("a")).unwrap();
    fs::create_dir_all(root.path().join("a/b")).unwrap();
    fs::write(root.path().join("a/x.g"), "func F() {}").unwrap();
    fs::write(root.path().join("a/b/y.g"), "func F() {}").unwrap();

    let home = DirHome::new(root.path());
    let mut got = vmx_build::select_pkgs(&home, "a/...").unwrap();
    got.sort();
    assert_eq!(got, vec!["a".to_string(), "a/b".to_string()]);
}
