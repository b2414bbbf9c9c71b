//! Pass A of the two-pass resolver (§4.7): walks every file in a
//! package and declares every top-level name — struct, function,
//! package-level variable, import — into one package-scope
//! [`SymbolTable`], before any file's body is type-checked. Order
//! across files and within a file does not matter: a function may call
//! another declared later in the same file or in a different file.
//!
//! Pass B (resolving identifiers inside function bodies through nested
//! block scopes) is folded into [`crate::check`], since in this
//! pipeline name resolution and typing happen in the same walk — the
//! same way `pl/sempass`'s visitor resolves and types an expression in
//! one pass rather than two separate tree walks.

use vmx_syms::{Diagnostics, SymKind, Symbol, SymbolTable};

use crate::ast::File;

/// The result of pass A: one flat package scope naming every
/// struct/func/var/import, plus any duplicate-declaration diagnostics.
pub struct PackageScope {
    pub symbols: SymbolTable,
}

/// Declares every top-level name across `files` into a single package
/// scope. A name already bound (in any file) is a conflict reported at
/// both positions, per §3's duplicate-declaration invariant.
pub fn declare_top_level(files: &[File]) -> (PackageScope, Diagnostics) {
    let mut symbols = SymbolTable::new();
    let mut diags = Diagnostics::new();

    for file in files {
        for imp in &file.imports {
            declare_one(&mut symbols, &mut diags, Symbol::new(imp.local_name.clone(), SymKind::Import, imp.pos.clone()));
        }
        for s in &file.structs {
            declare_one(&mut symbols, &mut diags, Symbol::new(s.name.clone(), SymKind::Struct, s.pos.clone()));
        }
        for v in &file.vars {
            for (name, pos) in &v.names {
                declare_one(&mut symbols, &mut diags, Symbol::new(name.clone(), SymKind::Var, pos.clone()));
            }
        }
        for f in &file.funcs {
            declare_one(&mut symbols, &mut diags, Symbol::new(f.name.clone(), SymKind::Func, f.pos.clone()));
        }
    }

    (PackageScope { symbols }, diags)
}

fn declare_one(symbols: &mut SymbolTable, diags: &mut Diagnostics, sym: Symbol) {
    let pos = sym.pos.clone();
    let name = sym.name.clone();
    let kind = sym.kind.as_str();
    if let Some(prev) = symbols.declare(sym) {
        diags.push(
            pos,
            format!("{name} redeclared as {kind}, previously declared at {}", prev.pos),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{File, FuncDecl};
    use vmx_syms::Pos;

    fn func(name: &str, line: u32) -> FuncDecl {
        FuncDecl {
            name: name.into(),
            pos: Pos::new("t.g", line, 1),
            params: vec![],
            results: vec![],
            body: vec![],
        }
    }

    #[test]
    fn forward_reference_across_files_is_allowed() {
        let f1 = File { funcs: vec![func("main", 1)], ..Default::default() };
        let f2 = File { funcs: vec![func("helper", 1)], ..Default::default() };
        let (scope, diags) = declare_top_level(&[f1, f2]);
        assert!(diags.is_empty());
        assert!(scope.symbols.contains("main"));
        assert!(scope.symbols.contains("helper"));
    }

    #[test]
    fn duplicate_top_level_name_conflicts() {
        let f1 = File { funcs: vec![func("main", 1)], ..Default::default() };
        let f2 = File { funcs: vec![func("main", 5)], ..Default::default() };
        let (_scope, diags) = declare_top_level(&[f1, f2]);
        assert_eq!(diags.len(), 1);
    }
}
