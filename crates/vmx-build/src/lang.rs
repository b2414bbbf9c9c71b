//! The language-collaborator contract (§6) and its two implementations
//! over `vmx-lang` (G) and `vmx-asm` (A), plus the symbol-namespacing
//! step that bridges `vmx-lang`'s per-package bare function names with
//! the qualified `"{pkg_path}.{name}"` call sites it emits for
//! cross-package calls (see DESIGN.md — this renaming step has no
//! counterpart in the distilled spec text, but is required for §8's S4
//! scenario to link at all, since two packages may legally declare a
//! function of the same bare name).

use std::collections::HashMap;

use vmx_syms::{Diagnostics, Pos};

/// One resolved or unresolved import statement discovered while
/// parsing a package, before the build graph has matched it against a
/// compiled dependency.
#[derive(Debug, Clone)]
pub struct ImportSpec {
    pub local_name: String,
    pub path: String,
    pub pos: Pos,
}

/// What a compiled package exposes to an importer, independent of
/// which language compiled it. `g_exports` is only populated for a G
/// package (an A package importing it, or vice versa, is rejected as
/// [`crate::error::BuildError::ImportWrongLanguage`] — this pipeline
/// only links same-language import graphs, matching `asm/lang.go`'s
/// own "can only import asm packages" restriction generalized to G).
#[derive(Debug, Clone)]
pub struct CompiledPackage {
    pub lib: vmx_image::Library,
    pub has_main: bool,
    pub export_names: Vec<String>,
    pub g_exports: Option<vmx_lang::PackageExports>,
    pub test_entries: Vec<(String, vmx_image::Library)>,
}

/// A dependency already compiled and ready to be imported, namespaced
/// so its functions don't collide with a same-named function declared
/// in the importing package.
pub struct ResolvedImport<'a> {
    pub path: &'a str,
    pub compiled: &'a CompiledPackage,
}

pub enum Lang {
    G,
    Asm,
}

impl Lang {
    pub fn tag(&self) -> &'static str {
        match self {
            Lang::G => "g",
            Lang::Asm => "asm",
        }
    }
}

/// Picks a language for a package from its file names. Exactly one
/// registered language may claim any given file; a package whose files
/// are claimed by zero or more than one language is a build error
/// (§7's "unknown language for file").
pub fn detect_lang(files: &[(String, String)]) -> Option<Lang> {
    let is_g = files.iter().any(|(name, _)| name.ends_with(".g"));
    let is_asm = files.iter().any(|(name, _)| vmx_asm::is_src(name));
    match (is_g, is_asm) {
        (true, false) => Some(Lang::G),
        (false, true) => Some(Lang::Asm),
        _ => None,
    }
}

/// Parses a package's files and extracts its import list (§4.6 step 1
/// "Prepare"), without yet resolving those imports against any other
/// package.
pub fn prepare_g(files: &[(String, String)]) -> (Vec<vmx_lang::ast::File>, Vec<ImportSpec>, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut asts = Vec::new();
    for (name, src) in files {
        let (file, pdiags) = vmx_lang::Parser::new(name, src).parse_file();
        diags.extend(pdiags);
        asts.push(file);
    }
    let (scope, rdiags) = vmx_lang::declare_top_level(&asts);
    diags.extend(rdiags);
    drop(scope);

    let imports = asts
        .iter()
        .flat_map(|f| f.imports.iter())
        .map(|imp| ImportSpec {
            local_name: imp.local_name.clone(),
            path: imp.path.clone(),
            pos: imp.pos.clone(),
        })
        .collect();

    (asts, imports, diags)
}

pub fn prepare_asm(files: &[(String, String)]) -> (vmx_asm::Program, Vec<ImportSpec>, Diagnostics) {
    let (program, diags) = vmx_asm::parse_package(files);
    let imports = program
        .imports
        .iter()
        .map(|imp| ImportSpec {
            local_name: imp.local_name.clone(),
            path: imp.path.clone(),
            pos: imp.pos.clone(),
        })
        .collect();
    (program, imports, diags)
}

/// Compiles one already-parsed G package against its resolved imports,
/// producing its main-entry library plus a bare-entry variant for
/// every zero-argument function named `TestXxx` (§4.6 step 5).
pub fn compile_g(
    pkg_path: &str,
    files: &[vmx_lang::ast::File],
    imports: &HashMap<String, (String, vmx_lang::PackageExports)>,
) -> (Option<CompiledPackage>, Diagnostics) {
    let (scope, rdiags) = vmx_lang::declare_top_level(files);
    let mut diags = rdiags;
    let (checked, cdiags) = vmx_lang::check_package(pkg_path, files, scope.symbols, imports);
    diags.extend(cdiags);
    if !diags.is_empty() {
        return (None, diags);
    }

    let lib = match vmx_lang::compile_package(&checked) {
        Ok(lib) => lib,
        Err(e) => {
            diags.push(Pos::new(pkg_path, 0, 0), e.to_string());
            return (None, diags);
        }
    };

    let has_main = lib.has_func("main");
    let export_names = checked.exports.funcs.keys().cloned().collect();

    let mut test_entries = Vec::new();
    for f in &checked.funcs {
        if f.name.starts_with("Test") && f.params.is_empty() {
            match vmx_lang::bare_func::compile_bare(&checked, &f.name) {
                Ok(bare) => test_entries.push((f.name.clone(), bare)),
                Err(e) => diags.push(Pos::new(pkg_path, 0, 0), e.to_string()),
            }
        }
    }

    (
        Some(CompiledPackage {
            lib,
            has_main,
            export_names,
            g_exports: Some(checked.exports),
            test_entries,
        }),
        diags,
    )
}

pub fn compile_asm(
    pkg_path: &str,
    program: &vmx_asm::Program,
    imports: &HashMap<String, (String, Vec<String>)>,
) -> (Option<CompiledPackage>, Diagnostics) {
    let (lib, diags) = vmx_asm::assemble(program, imports);
    if !diags.is_empty() {
        return (None, diags);
    }

    let has_main = lib.has_func("main");
    let export_names = vmx_asm::exported_funcs(program);

    let mut test_entries = Vec::new();
    for f in &program.funcs {
        if f.name.starts_with("Test") {
            match vmx_asm::bare_entry(&lib, &f.name) {
                Ok(bare) => test_entries.push((f.name.clone(), bare)),
                Err(e) => {
                    let mut d = Diagnostics::new();
                    d.push(Pos::new(pkg_path, 0, 0), e.to_string());
                    return (None, d);
                }
            }
        }
    }

    (
        Some(CompiledPackage {
            lib,
            has_main,
            export_names,
            g_exports: None,
            test_entries,
        }),
        Diagnostics::new(),
    )
}

/// Renames every function in `lib` from `name` to `"{pkg_path}.name"`
/// and rewrites same-package call relocations to match, so this
/// package's compiled output can be linked alongside any importer's
/// own (unqualified) function names without colliding. Relocations
/// that already reference another package (`"other.name"`) or the
/// always-linked print runtime are left untouched.
pub fn namespace_library(lib: &vmx_image::Library, pkg_path: &str) -> vmx_image::Library {
    let own_names: std::collections::HashSet<&str> = lib.funcs.iter().map(|f| f.name.as_str()).collect();
    let funcs = lib
        .funcs
        .iter()
        .map(|f| {
            let relocs = f
                .relocs
                .iter()
                .map(|r| {
                    let symbol = if own_names.contains(r.symbol.as_str()) {
                        format!("{pkg_path}.{}", r.symbol)
                    } else {
                        r.symbol.clone()
                    };
                    vmx_image::Reloc { offset: r.offset, symbol }
                })
                .collect();
            vmx_image::ObjFunc {
                name: format!("{pkg_path}.{}", f.name),
                code: f.code.clone(),
                relocs,
            }
        })
        .collect();
    vmx_image::Library { funcs }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespacing_renames_funcs_and_sibling_calls() {
        let lib = vmx_image::Library {
            funcs: vec![
                vmx_image::ObjFunc {
                    name: "helper".into(),
                    code: vec![0; 4],
                    relocs: vec![],
                },
                vmx_image::ObjFunc {
                    name: "Add".into(),
                    code: vec![0; 8],
                    relocs: vec![
                        vmx_image::Reloc { offset: 0, symbol: "helper".into() },
                        vmx_image::Reloc { offset: 4, symbol: "__print_int".into() },
                    ],
                },
            ],
        };
        let ns = namespace_library(&lib, "p");
        assert_eq!(ns.funcs[0].name, "p.helper");
        assert_eq!(ns.funcs[1].name, "p.Add");
        assert_eq!(ns.funcs[1].relocs[0].symbol, "p.helper");
        assert_eq!(ns.funcs[1].relocs[1].symbol, "__print_int");
    }
}
