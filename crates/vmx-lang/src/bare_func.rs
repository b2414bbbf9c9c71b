//! Bare-function compilation mode (§4.7, grounded on `pl/bare_func.go`):
//! link a package's functions as a standalone image with no `main`,
//! entering at a single designated function instead. Used by the test
//! runner to execute one `TestXxx` function per package without
//! requiring a `main` package around it.

use crate::check::CheckedPackage;
use crate::codegen::{compile_package, CodegenError};

/// The entry symbol `vmx_image::link` resolves against in bare-function
/// mode, by convention (mirrors `linker::link`'s own doc comment: "`:start`
/// for a bare-function image, `main` for a full program").
pub const BARE_ENTRY: &str = ":start";

/// Compiles `pkg` and rewrites `func_name`'s link symbol to
/// [`BARE_ENTRY`], so `vmx_image::link` can enter there directly
/// instead of requiring a package-level `main`.
///
/// Errors if `pkg` doesn't declare a function named `func_name` —
/// callers (the test runner, `vmx --pkg ... --test`) are expected to
/// have already confirmed it exists via `pkg.exports`.
pub fn compile_bare(pkg: &CheckedPackage, func_name: &str) -> Result<vmx_image::Library, CodegenError> {
    let mut lib = compile_package(pkg)?;
    let found = lib.funcs.iter_mut().find(|f| f.name == func_name).ok_or_else(|| {
        CodegenError::Unsupported(format!("no function {func_name:?} to enter as a bare-function image"))
    })?;
    found.name = BARE_ENTRY.to_string();
    Ok(lib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::check_package;
    use crate::parser::Parser;
    use crate::resolve::declare_top_level;
    use std::collections::HashMap;

    #[test]
    fn renames_the_chosen_function_to_the_bare_entry_symbol() {
        let (file, pdiags) = Parser::new("t.g", "func TestAdds() { print(1 + 1) }").parse_file();
        assert!(pdiags.is_empty(), "{:?}", pdiags.as_slice());
        let (scope, rdiags) = declare_top_level(std::slice::from_ref(&file));
        assert!(rdiags.is_empty());
        let (pkg, cdiags) = check_package("main", std::slice::from_ref(&file), scope.symbols, &HashMap::new());
        assert!(cdiags.is_empty(), "{:?}", cdiags.as_slice());

        let lib = compile_bare(&pkg, "TestAdds").unwrap();
        assert!(lib.funcs.iter().any(|f| f.name == BARE_ENTRY));
        assert!(!lib.funcs.iter().any(|f| f.name == "TestAdds"));
    }

    #[test]
    fn errors_on_an_unknown_entry_function() {
        let (file, _) = Parser::new("t.g", "func main() {}").parse_file();
        let (scope, _) = declare_top_level(std::slice::from_ref(&file));
        let (pkg, _) = check_package("main", std::slice::from_ref(&file), scope.symbols, &HashMap::new());
        assert!(compile_bare(&pkg, "NoSuchFunc").is_err());
    }
}
