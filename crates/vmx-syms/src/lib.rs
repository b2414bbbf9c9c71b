//! Source positions, diagnostics, symbol tables and the deterministic
//! topological sort shared by the resolver, type checker and build
//! driver (§3, §4.7, §4.8, §7, §9).

pub mod pos;
pub mod table;
pub mod toposort;

pub use pos::{Diagnostic, Diagnostics, Pos, Severity};
pub use table::{ScopeStack, SymKind, Symbol, SymbolTable};
pub use toposort::{Cycle, Sorter};
