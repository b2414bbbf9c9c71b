//! Build-session orchestration (§4.6 steps 3-5): compiles nodes in
//! layout order, links `main`-declaring packages against their
//! transitive dependency closure, and runs each requested package's
//! `TestXxx` functions.
//!
//! Grounded on `builds/build.go`'s `build`/`buildPkg`/`buildMain`: a
//! single failing package aborts the remaining nodes in the session
//! (the Go source's `if es := buildPkg(...); es != nil { return es }`
//! inside its node loop), which this port keeps even though §7 frames
//! per-package diagnostic accumulation as not blocking "unrelated"
//! packages — see DESIGN.md for how the two are reconciled.

use std::collections::{HashMap, HashSet};

use vmx_syms::{Diagnostics, Pos};

use crate::error::BuildError;
use crate::graph::{discover, layout, Node, Parsed};
use crate::home::Home;
use crate::lang::{compile_asm, compile_g, namespace_library, CompiledPackage};

/// Base address every linked image starts at. Matches the address
/// `vmx-machine`'s own unit tests load programs at.
pub const LINK_BASE_ADDR: u32 = 0x8000;
/// Tick budget for one test-entry run before it's declared hung rather
/// than failed or passed. Generous for the tiny programs this pipeline
/// compiles.
const TEST_TICK_BUDGET: usize = 1_000_000;

#[derive(Debug, Clone, Default)]
pub struct Flags {
    pub static_only: bool,
    pub verbose: bool,
    pub run_tests: bool,
}

pub struct Options<'h> {
    pub home: &'h dyn Home,
    pub std_root: Option<String>,
    pub flags: Flags,
}

/// Outcome of running one `TestXxx` function to completion.
///
/// Pass/fail convention (an open question in §9's terms, since the
/// spec only says "collect pass/fail based on exit status" without
/// defining what an exit status is on this ISA): a test passes when
/// its image halts cleanly with `r0 == 0`, the same "exit code"
/// convention the CLI itself uses (§6's "non-zero on any ... failure").
/// Any other exception, or running out of the tick budget without
/// halting, is a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    Failed(String),
}

#[derive(Debug, Default)]
pub struct BuildReport {
    pub order: Vec<String>,
    pub diagnostics: Diagnostics,
    /// Linked binary image bytes per package declaring `main`.
    pub artifacts: HashMap<String, Vec<u8>>,
    pub test_results: HashMap<String, Vec<(String, TestOutcome)>>,
}

fn build_err(report: &mut BuildReport, pkg: &str, e: impl std::fmt::Display) {
    report.diagnostics.push(Pos::new(pkg, 0, 0), e.to_string());
}

/// `Plan(paths)`: discovery plus layout only, no compilation.
pub fn plan(home: &dyn Home, std_root: Option<&str>, paths: &[String]) -> (Vec<String>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let nodes = match discover(home, std_root, paths) {
        Ok((nodes, discover_diags)) => {
            diags.extend(discover_diags);
            nodes
        }
        Err(e) => {
            diags.push(Pos::new("<build>", 0, 0), e.to_string());
            return (Vec::new(), diags);
        }
    };
    if !diags.is_empty() {
        return (Vec::new(), diags);
    }
    match layout(&nodes) {
        Ok(order) => (order, diags),
        Err(e) => {
            diags.push(Pos::new("<build>", 0, 0), e.to_string());
            (Vec::new(), diags)
        }
    }
}

/// `BuildPkgs(paths)`: the full discover → layout → compile → link →
/// test pipeline.
pub fn build_pkgs(opts: &Options, paths: &[String]) -> BuildReport {
    let mut report = BuildReport::default();

    let nodes = match discover(opts.home, opts.std_root.as_deref(), paths) {
        Ok((nodes, discover_diags)) => {
            report.diagnostics.extend(discover_diags);
            nodes
        }
        Err(e) => {
            build_err(&mut report, "<build>", e);
            return report;
        }
    };
    if !report.diagnostics.is_empty() {
        return report;
    }

    let order = match layout(&nodes) {
        Ok(order) => order,
        Err(e) => {
            build_err(&mut report, "<build>", e);
            return report;
        }
    };
    report.order = order.clone();

    let top_level: HashSet<&str> = paths.iter().map(String::as_str).collect();
    let mut compiled: HashMap<String, CompiledPackage> = HashMap::new();

    for path in &order {
        if opts.flags.verbose {
            tracing::info!(package = %path, "building");
        }

        let (result, cdiags) = compile_node(path, &nodes[path], &compiled);
        if !cdiags.is_empty() {
            report.diagnostics.extend(cdiags);
            return report;
        }
        let compiled_pkg = result.expect("no diagnostics implies a compiled package");

        if opts.flags.static_only {
            compiled.insert(path.clone(), compiled_pkg);
            continue;
        }

        if compiled_pkg.has_main {
            match link_main(path, &compiled_pkg, &nodes, &compiled) {
                Ok(bytes) => match opts.home.write_bin(path, &bytes) {
                    Ok(()) => {
                        report.artifacts.insert(path.clone(), bytes);
                    }
                    Err(e) => {
                        build_err(&mut report, path, e);
                        return report;
                    }
                },
                Err(e) => {
                    build_err(&mut report, path, e);
                    return report;
                }
            }
        }

        if opts.flags.run_tests && top_level.contains(path.as_str()) && !compiled_pkg.test_entries.is_empty() {
            let (outcomes, test_diags) = run_tests(path, &compiled_pkg, &nodes, &compiled);
            report.test_results.insert(path.clone(), outcomes);
            if !test_diags.is_empty() {
                report.diagnostics.extend(test_diags);
                return report;
            }
        }

        compiled.insert(path.clone(), compiled_pkg);
    }

    report
}

fn compile_node(path: &str, node: &Node, compiled: &HashMap<String, CompiledPackage>) -> (Option<CompiledPackage>, Diagnostics) {
    let mut diags = Diagnostics::new();
    match &node.parsed {
        Parsed::G(files) => {
            let mut imports = HashMap::new();
            for (local, dep_path) in &node.imports {
                match compiled.get(dep_path).and_then(|cp| cp.g_exports.as_ref().map(|ex| (cp, ex))) {
                    Some((_, exports)) => {
                        imports.insert(local.clone(), (dep_path.clone(), exports.clone()));
                    }
                    None => diags.push(Pos::new(path, 0, 0), format!("{dep_path:?} is not a G package")),
                }
            }
            if !diags.is_empty() {
                return (None, diags);
            }
            compile_g(path, files, &imports)
        }
        Parsed::Asm(program) => {
            let mut imports = HashMap::new();
            for (local, dep_path) in &node.imports {
                match compiled.get(dep_path) {
                    Some(cp) => {
                        imports.insert(local.clone(), (dep_path.clone(), cp.export_names.clone()));
                    }
                    None => diags.push(Pos::new(path, 0, 0), format!("internal error: {dep_path:?} compiled out of order")),
                }
            }
            if !diags.is_empty() {
                return (None, diags);
            }
            compile_asm(path, program, &imports)
        }
    }
}

/// Every package reachable from `path` through import edges, deepest
/// dependency first (order doesn't matter for linking, since namespacing
/// guarantees no two dependencies' function names collide).
fn transitive_deps(path: &str, nodes: &HashMap<String, Node>) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    fn visit(path: &str, nodes: &HashMap<String, Node>, seen: &mut HashSet<String>, out: &mut Vec<String>) {
        let Some(node) = nodes.get(path) else { return };
        for (_, dep) in &node.imports {
            if seen.insert(dep.clone()) {
                visit(dep, nodes, seen, out);
                out.push(dep.clone());
            }
        }
    }
    visit(path, nodes, &mut seen, &mut out);
    out
}

fn dep_libs(path: &str, nodes: &HashMap<String, Node>, compiled: &HashMap<String, CompiledPackage>) -> Vec<vmx_image::Library> {
    let mut libs: Vec<vmx_image::Library> = transitive_deps(path, nodes)
        .iter()
        .filter_map(|dep| compiled.get(dep).map(|cp| namespace_library(&cp.lib, dep)))
        .collect();
    if matches!(nodes[path].parsed, Parsed::G(_)) {
        libs.push(vmx_lang::runtime::library());
    }
    libs
}

fn link_main(
    path: &str,
    compiled_pkg: &CompiledPackage,
    nodes: &HashMap<String, Node>,
    compiled: &HashMap<String, CompiledPackage>,
) -> Result<Vec<u8>, BuildError> {
    let mut libs = vec![compiled_pkg.lib.clone()];
    libs.extend(dep_libs(path, nodes, compiled));
    let (section, _entry) = vmx_image::link(&libs, LINK_BASE_ADDR, "main")?;
    Ok(vmx_image::write(&[section]))
}

fn run_tests(
    path: &str,
    compiled_pkg: &CompiledPackage,
    nodes: &HashMap<String, Node>,
    compiled: &HashMap<String, CompiledPackage>,
) -> (Vec<(String, TestOutcome)>, Diagnostics) {
    let shared_deps = dep_libs(path, nodes, compiled);
    let mut outcomes = Vec::new();
    let mut diags = Diagnostics::new();

    for (test_name, bare_lib) in &compiled_pkg.test_entries {
        let mut libs = vec![bare_lib.clone()];
        libs.extend(shared_deps.iter().cloned());

        let outcome = match vmx_image::link(&libs, LINK_BASE_ADDR, ":start") {
            Ok((section, entry)) => run_one_test(&section, entry),
            Err(e) => TestOutcome::Failed(e.to_string()),
        };

        if let TestOutcome::Failed(detail) = &outcome {
            diags.push(Pos::new(path, 0, 0), format!("test {test_name} failed: {detail}"));
        }
        outcomes.push((test_name.clone(), outcome));
    }

    (outcomes, diags)
}

fn run_one_test(section: &vmx_image::Section, entry: u32) -> TestOutcome {
    let mut machine = vmx_machine::Machine::new(vmx_machine::Config::default());
    if let Err(e) = machine.write_bytes(section.addr, &section.bytes) {
        return TestOutcome::Failed(e.to_string());
    }
    machine.set_pc(entry);

    let (_ticks, exc) = machine.run(TEST_TICK_BUDGET);
    match exc {
        Some(e) if e.kind == vmx_machine::core::ExceptionKind::Halt => {
            let exit_code = machine.dump_regs(0)[0];
            if exit_code == 0 {
                TestOutcome::Passed
            } else {
                TestOutcome::Failed(format!("non-zero exit status {exit_code}"))
            }
        }
        Some(e) => TestOutcome::Failed(e.to_string()),
        None => TestOutcome::Failed(format!("did not halt within {TEST_TICK_BUDGET} ticks")),
    }
}
