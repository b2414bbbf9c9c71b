//! The build-level error taxonomy (§7's "Build" category): failures
//! that abort a session before or between package-level diagnostics,
//! as opposed to [`vmx_syms::Diagnostic`]s, which name a specific
//! source position inside one package.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BuildError {
    #[error("package not found: {0:?}")]
    PackageNotFound(String),
    #[error("no files in package {0:?}")]
    EmptyPackage(String),
    #[error("cannot determine a language for package {0:?}: no registered language claims its files")]
    UnknownLanguage(String),
    #[error("{0}")]
    Cycle(String),
    #[error(transparent)]
    Link(#[from] vmx_image::LinkError),
}
