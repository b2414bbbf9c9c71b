//! Line-oriented lexer and parser for the A assembly language.
//!
//! Grounded on `asm/lang.go` in `examples/original_source/`: one
//! statement per line, `;` comments to end of line, a `func NAME`
//! header opens a block that runs until the next `func`/`import` or
//! end of file, and bare `LABEL:` lines mark jump targets local to the
//! enclosing function.

use vmx_syms::{Diagnostics, Pos};

#[derive(Debug, Clone)]
pub struct ImportStmt {
    pub local_name: String,
    pub path: String,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct InsnLine {
    pub mnemonic: String,
    pub operands: Vec<String>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum Line {
    Label(String, Pos),
    Insn(InsnLine),
}

#[derive(Debug, Clone)]
pub struct RawFunc {
    pub name: String,
    pub pos: Pos,
    pub lines: Vec<Line>,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub imports: Vec<ImportStmt>,
    pub funcs: Vec<RawFunc>,
}

/// Splits `line` into whitespace/comma-separated tokens, dropping a
/// trailing `;`-comment first.
fn tokenize(line: &str) -> Vec<String> {
    let code = match line.find(';') {
        Some(i) => &line[..i],
        None => line,
    };
    code.split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.to_string())
        .collect()
}

fn unquote(tok: &str) -> Option<String> {
    let tok = tok.strip_prefix('"')?;
    let tok = tok.strip_suffix('"')?;
    Some(tok.to_string())
}

/// Parses one source file's text into a [`Program`] fragment. Callers
/// merge fragments from every file in a package and check for
/// cross-file duplicates themselves (mirrors `vmx_lang::resolve`'s
/// split between per-file parsing and package-wide declaration).
pub fn parse_file(file: &str, src: &str) -> (Program, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut prog = Program::default();
    let mut current: Option<RawFunc> = None;

    for (i, raw_line) in src.lines().enumerate() {
        let line_no = (i + 1) as u32;
        let toks = tokenize(raw_line);
        if toks.is_empty() {
            continue;
        }
        let pos = Pos::new(file, line_no, 1);

        if toks.len() == 1 && toks[0].ends_with(':') && toks[0].len() > 1 {
            let label = toks[0][..toks[0].len() - 1].to_string();
            match current.as_mut() {
                Some(f) => f.lines.push(Line::Label(label, pos)),
                None => diags.push(pos, "label outside a function body".to_string()),
            }
            continue;
        }

        match toks[0].as_str() {
            "import" if toks.len() == 3 => {
                let Some(path) = unquote(&toks[2]) else {
                    diags.push(pos, "import path must be a quoted string".to_string());
                    continue;
                };
                prog.imports.push(ImportStmt {
                    local_name: toks[1].clone(),
                    path,
                    pos,
                });
            }
            "import" => diags.push(pos, "expected: import alias \"pkg/path\"".to_string()),
            "func" if toks.len() == 2 => {
                if let Some(done) = current.take() {
                    prog.funcs.push(done);
                }
                current = Some(RawFunc {
                    name: toks[1].clone(),
                    pos,
                    lines: Vec::new(),
                });
            }
            "func" => diags.push(pos, "expected: func name".to_string()),
            mnemonic => match current.as_mut() {
                Some(f) => f.lines.push(Line::Insn(InsnLine {
                    mnemonic: mnemonic.to_string(),
                    operands: toks[1..].to_vec(),
                    pos,
                })),
                None => diags.push(pos, format!("{mnemonic} outside a function body")),
            },
        }
    }

    if let Some(done) = current.take() {
        prog.funcs.push(done);
    }

    (prog, diags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_import_func_and_label() {
        let src = "import p \"pkg/helper\"\nfunc main\n    loadimm r0, 3\nloop:\n    jmp loop\n";
        let (prog, diags) = parse_file("t.s", src);
        assert!(diags.is_empty(), "{:?}", diags.as_slice());
        assert_eq!(prog.imports.len(), 1);
        assert_eq!(prog.imports[0].path, "pkg/helper");
        assert_eq!(prog.funcs.len(), 1);
        assert_eq!(prog.funcs[0].lines.len(), 3);
    }

    #[test]
    fn strips_comments_and_blank_lines() {
        let src = "; a comment\nfunc f\n  ; another\n  nop ; trailing\n\n  halt\n";
        let (prog, diags) = parse_file("t.s", src);
        assert!(diags.is_empty());
        assert_eq!(prog.funcs[0].lines.len(), 2);
    }

    #[test]
    fn statement_outside_function_is_an_error() {
        let (_prog, diags) = parse_file("t.s", "nop\n");
        assert_eq!(diags.len(), 1);
    }
}
