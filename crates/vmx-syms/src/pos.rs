//! Source positions and the accumulate-don't-throw diagnostic list used
//! by the resolver, type checker and build driver (spec §4.9, §7).

use std::fmt;

/// A position in a source file: 1-based line and column, matching the
/// `path:line:col: message` format required by §6.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Pos {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(file: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            file: file.into(),
            line,
            col,
        }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

/// Diagnostic severity. Every diagnostic this pipeline emits today is
/// an error; `Warning` exists so embedders that want lint-style output
/// have somewhere to put it without a breaking change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One accumulated diagnostic. Per §4.9, violations never throw: a
/// rule that fails appends a `Diagnostic` and the caller returns a nil
/// sentinel sub-node to suppress cascaded errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{pos}: {message}")]
pub struct Diagnostic {
    pub pos: Pos,
    pub message: String,
    pub severity: Severity,
}

impl Diagnostic {
    pub fn error(pos: Pos, message: impl Into<String>) -> Self {
        Self {
            pos,
            message: message.into(),
            severity: Severity::Error,
        }
    }
}

/// An accumulating, ordered list of diagnostics. Every compile stage
/// passes one of these down instead of returning `Result<_, Error>` at
/// the first failure, so that a package with errors still reports
/// every problem found, not just the first.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, pos: Pos, message: impl Into<String>) {
        self.0.push(Diagnostic::error(pos, message));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.0
    }

    pub fn as_slice(&self) -> &[Diagnostic] {
        &self.0
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;
    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<Diagnostic> for Diagnostics {
    fn from_iter<T: IntoIterator<Item = Diagnostic>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
