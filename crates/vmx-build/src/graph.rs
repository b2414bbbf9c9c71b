//! Package discovery and dependency layout (§4.6 steps 1-2).
//!
//! Discovery is a memoized recursive walk: a package already present
//! in the graph (even mid-parse) is not revisited, so a true import
//! cycle naturally terminates the walk instead of looping forever —
//! the cycle itself is then reported by [`vmx_syms::Sorter`] during
//! layout, which needs a cycle check anyway.

use std::collections::HashMap;

use vmx_syms::{Diagnostics, Pos, Sorter};

use crate::error::BuildError;
use crate::home::Home;
use crate::lang::{detect_lang, prepare_asm, prepare_g, ImportSpec, Lang};

/// One discovered package, parsed but not yet compiled.
pub enum Parsed {
    G(Vec<vmx_lang::ast::File>),
    Asm(vmx_asm::Program),
}

pub struct Node {
    pub path: String,
    pub parsed: Parsed,
    /// `(local_name, resolved dependency path)`, in import-declaration order.
    pub imports: Vec<(String, String)>,
    pub run_tests: bool,
}

/// Resolves an import path against `home`, optionally falling back to
/// `std_root` joined with the path (mirrors `srchome.Home.AbsPath`'s
/// std-relative fallback, simplified to a single optional prefix).
fn resolve_import_path(home: &dyn Home, std_root: Option<&str>, path: &str) -> Option<String> {
    if home.exists(path) {
        return Some(path.to_string());
    }
    if let Some(std) = std_root {
        let joined = format!("{std}/{path}");
        if home.exists(&joined) {
            return Some(joined);
        }
    }
    None
}

/// Discovers `roots` and every package reachable through their
/// imports, returning the full node set and any discover-phase
/// diagnostics (parse errors, unresolved imports, wrong-language
/// imports). Per §4.6, discovery either succeeds as one unit or the
/// whole session is aborted before layout/compile ever runs.
pub fn discover(
    home: &dyn Home,
    std_root: Option<&str>,
    roots: &[String],
) -> Result<(HashMap<String, Node>, Diagnostics), BuildError> {
    let mut nodes: HashMap<String, Node> = HashMap::new();
    let mut diags = Diagnostics::new();

    for root in roots {
        discover_one(home, std_root, root, &mut nodes, &mut diags)?;
    }

    Ok((nodes, diags))
}

fn discover_one(
    home: &dyn Home,
    std_root: Option<&str>,
    path: &str,
    nodes: &mut HashMap<String, Node>,
    diags: &mut Diagnostics,
) -> Result<(), BuildError> {
    if nodes.contains_key(path) {
        return Ok(());
    }

    let files = home.files(path)?;
    let lang = detect_lang(&files).ok_or_else(|| BuildError::UnknownLanguage(path.to_string()))?;

    let (parsed, import_specs, pdiags): (Parsed, Vec<ImportSpec>, Diagnostics) = match lang {
        Lang::G => {
            let (asts, imports, d) = prepare_g(&files);
            (Parsed::G(asts), imports, d)
        }
        Lang::Asm => {
            let (program, imports, d) = prepare_asm(&files);
            (Parsed::Asm(program), imports, d)
        }
    };
    diags.extend(pdiags);

    // Reserve the slot before recursing so a cycle back to `path`
    // finds it already present and stops.
    nodes.insert(
        path.to_string(),
        Node {
            path: path.to_string(),
            parsed,
            imports: Vec::new(),
            run_tests: false,
        },
    );

    let mut resolved = Vec::with_capacity(import_specs.len());
    for imp in &import_specs {
        match resolve_import_path(home, std_root, &imp.path) {
            Some(dep_path) => {
                discover_one(home, std_root, &dep_path, nodes, diags)?;
                if let Some(dep_node) = nodes.get(&dep_path) {
                    if !same_lang(&nodes[path].parsed, &dep_node.parsed) {
                        diags.push(imp.pos.clone(), format!("{:?} imports {dep_path:?}, a different language", path));
                    }
                }
                resolved.push((imp.local_name.clone(), dep_path));
            }
            None => {
                diags.push(imp.pos.clone(), format!("import {:?} not found", imp.path));
            }
        }
    }
    nodes.get_mut(path).unwrap().imports = resolved;

    Ok(())
}

fn same_lang(a: &Parsed, b: &Parsed) -> bool {
    matches!((a, b), (Parsed::G(_), Parsed::G(_)) | (Parsed::Asm(_), Parsed::Asm(_)))
}

/// Builds a deterministic topological order over `nodes`, dependencies
/// first, ties broken lexicographically by path (§4.6 step 2, §8 S6).
pub fn layout(nodes: &HashMap<String, Node>) -> Result<Vec<String>, BuildError> {
    let mut paths: Vec<&String> = nodes.keys().collect();
    paths.sort();

    let mut sorter = Sorter::new("package");
    for path in paths {
        let node = &nodes[path];
        let deps: Vec<String> = node.imports.iter().map(|(_, p)| p.clone()).collect();
        sorter.add_node(path.clone(), Pos::new(path.as_str(), 0, 0), deps);
    }

    sorter.sort().map_err(|c| BuildError::Cycle(c.message()))
}
