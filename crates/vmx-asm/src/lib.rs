//! Lexer, parser and assembler for the A assembly language (§1, §4.7):
//! a small line-oriented instruction syntax that targets
//! `vmx-machine`'s ISA directly, with no type system of its own.
//!
//! Mirrors the shape of `vmx-lang`'s front end (`parse` → `resolve
//! imports` → `compile`) closely enough that `vmx-build` can drive
//! either language through the same package pipeline, but keeps its
//! own instruction builder and assembler rather than sharing code with
//! `vmx-lang`, the same way `asm/lang.go` and `pl` are independent
//! packages in the original.

pub mod assembler;
pub mod builder;
pub mod parser;

use std::collections::HashMap;

use vmx_syms::Diagnostics;

pub use assembler::{assemble, bare_entry, exported_funcs, AsmError, BARE_ENTRY};
pub use parser::{parse_file, ImportStmt, Program, RawFunc};

/// Source file extension recognized as assembly (§4.7's per-language
/// `IsSrc` predicate).
pub const FILE_EXT: &str = ".s";

pub fn is_src(filename: &str) -> bool {
    filename.ends_with(FILE_EXT)
}

/// Parses every file in a package and merges the fragments into one
/// [`Program`], reporting cross-file duplicate function/import names
/// (pass A of name resolution, folded with parsing since the A
/// language has no nested scopes to resolve).
pub fn parse_package(files: &[(String, String)]) -> (Program, Diagnostics) {
    let mut program = Program::default();
    let mut diags = Diagnostics::new();
    let mut func_names = HashMap::new();
    let mut import_names = HashMap::new();

    for (name, src) in files {
        let (frag, fdiags) = parse_file(name, src);
        diags.extend(fdiags);
        for f in frag.funcs {
            if let Some(prev) = func_names.insert(f.name.clone(), f.pos.clone()) {
                diags.push(f.pos.clone(), format!("{} redeclared, previously declared at {prev}", f.name));
            }
            program.funcs.push(f);
        }
        for imp in frag.imports {
            if let Some(prev) = import_names.insert(imp.local_name.clone(), imp.pos.clone()) {
                diags.push(imp.pos.clone(), format!("{} redeclared, previously declared at {prev}", imp.local_name));
            }
            program.imports.push(imp);
        }
    }

    (program, diags)
}
