//! The six concrete build-to-execution scenarios: each builds a
//! small in-memory package set through the whole pipeline and checks
//! an externally observable result (console output, build order, or
//! a rejected build), not an intermediate representation.

use vmx_build::MemHome;
use vmx_testing::{build_and_run_main, build_expecting_diagnostics};

#[test]
fn s1_prints_a_literal() {
    let mut home = MemHome::new();
    home.add_file("main", "main.g", "func main() { print(3) }");
    assert_eq!(build_and_run_main(&home, "main").unwrap(), "3\n");
}

#[test]
fn s2_prints_a_sum_of_two_locals() {
    let mut home = MemHome::new();
    home.add_file(
        "main",
        "main.g",
        "func main() { var a int = 2; var b int = 3; print(a + b) }",
    );
    assert_eq!(build_and_run_main(&home, "main").unwrap(), "5\n");
}

#[test]
fn s3_prints_a_counted_loop() {
    let mut home = MemHome::new();
    home.add_file(
        "main",
        "main.g",
        "func main() { for i := 0; i < 3; i++ { print(i) } }",
    );
    assert_eq!(build_and_run_main(&home, "main").unwrap(), "0\n1\n2\n");
}

#[test]
fn s4_calls_an_exported_function_in_an_imported_package() {
    let mut home = MemHome::new();
    home.add_file("p", "p.g", "func Add(a, b int) int { return a + b }");
    home.add_file(
        "main",
        "main.g",
        "import \"p\"\nfunc main() { print(p.Add(2, 40)) }",
    );
    assert_eq!(build_and_run_main(&home, "main").unwrap(), "42\n");
}

#[test]
fn s5_a_struct_cycle_is_rejected_with_no_image_produced() {
    let mut home = MemHome::new();
    home.add_file(
        "main",
        "main.g",
        "struct X { y Y }\nstruct Y { x X }\nfunc main() {}",
    );
    let summary = build_expecting_diagnostics(&home, "main");
    assert!(summary.to_lowercase().contains("cycl"), "expected a cycle diagnostic, got: {summary}");
}

#[test]
fn s6_build_order_is_deterministic_dependencies_first() {
    let mut home = MemHome::new();
    home.add_file("c", "c.g", "func F() {}");
    home.add_file("a", "a.g", "import \"c\"\nfunc F() {}");
    home.add_file("b", "b.g", "import \"c\"\nfunc F() {}");
    home.add_file("main", "main.g", "import \"a\"\nimport \"b\"\nfunc main() {}");

    let (order, diags) = vmx_build::plan(&home, None, &["main".to_string()]);
    assert!(diags.is_empty(), "unexpected diagnostics: {diags:?}");
    assert_eq!(order, vec!["c", "a", "b", "main"]);
}
