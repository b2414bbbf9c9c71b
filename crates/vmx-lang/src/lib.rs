//! Front end and code generator for the G language (§1, §4.7-§4.9):
//! lexer, parser, two-pass name resolver, struct/type checker and a
//! tree-walking code generator targeting `vmx-machine`'s ISA.

pub mod asm;
pub mod ast;
pub mod bare_func;
pub mod check;
pub mod codegen;
pub mod lexer;
pub mod parser;
pub mod resolve;
pub mod runtime;
pub mod tast;
pub mod types;

pub use check::{check_package, CheckedFunc, CheckedPackage, FuncSig, PackageExports, Prim};
pub use codegen::compile_package;
pub use lexer::Lexer;
pub use parser::Parser;
pub use resolve::{declare_top_level, PackageScope};
