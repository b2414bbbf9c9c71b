//! Turns a parsed [`crate::parser::Program`] into a [`vmx_image::Library`]:
//! register/immediate validation, label resolution within each function,
//! and call-site resolution against either a sibling function or an
//! imported package's exports.
//!
//! Grounded on `asm/lang.go` (the `asm` package compiles each function
//! independently and only resolves cross-package calls through the
//! importer table it was prepared with) and `asm/bare_func.go` (the
//! single-entry bare-function convention reused here for test running).

use std::collections::HashMap;

use vmx_machine::core::Instr;
use vmx_syms::{Diagnostics, Pos};

use crate::builder::InstrBuilder;
use crate::parser::{Line, Program, RawFunc};

/// The entry symbol a bare-function image is linked against, matching
/// `vmx_lang::bare_func::BARE_ENTRY`.
pub const BARE_ENTRY: &str = ":start";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AsmError {
    #[error("no function {0:?} to enter as a bare-function image")]
    NoSuchFunc(String),
}

fn parse_reg(tok: &str, pos: &Pos, diags: &mut Diagnostics) -> u8 {
    if tok == "sp" {
        return 31;
    }
    if let Some(n) = tok.strip_prefix('r') {
        if let Ok(v) = n.parse::<u32>() {
            if v < 32 {
                return v as u8;
            }
        }
    }
    diags.push(pos.clone(), format!("not a register: {tok:?} (expected r0-r31 or sp)"));
    0
}

fn parse_imm(tok: &str, pos: &Pos, bits: &str, diags: &mut Diagnostics) -> i16 {
    match tok.parse::<i64>() {
        Ok(v) if bits == "byte" && (-128..=127).contains(&v) => v as i16,
        Ok(v) if bits == "word" && (i16::MIN as i64..=i16::MAX as i64).contains(&v) => v as i16,
        Ok(_) => {
            diags.push(pos.clone(), format!("immediate {tok} out of range for a {bits}-sized operand"));
            0
        }
        Err(_) => {
            diags.push(pos.clone(), format!("not an integer: {tok:?}"));
            0
        }
    }
}

fn expect_n(operands: &[String], n: usize, mnemonic: &str, pos: &Pos, diags: &mut Diagnostics) -> bool {
    if operands.len() != n {
        diags.push(pos.clone(), format!("{mnemonic} expects {n} operand(s), found {}", operands.len()));
        false
    } else {
        true
    }
}

/// Resolves a `call` operand to its link symbol: a bare name must name
/// a function in this same package; `alias.name` must name an
/// exported function of an imported package.
fn resolve_callee(
    operand: &str,
    local_funcs: &std::collections::HashSet<String>,
    imports: &HashMap<String, (String, Vec<String>)>,
    pos: &Pos,
    diags: &mut Diagnostics,
) -> String {
    if let Some((alias, name)) = operand.split_once('.') {
        match imports.get(alias) {
            Some((dep_path, exports)) if exports.iter().any(|e| e == name) => format!("{dep_path}.{name}"),
            Some((dep_path, _)) => {
                diags.push(pos.clone(), format!("{dep_path} has no function {name:?}"));
                operand.to_string()
            }
            None => {
                diags.push(pos.clone(), format!("undefined package alias {alias:?}"));
                operand.to_string()
            }
        }
    } else {
        if !local_funcs.contains(operand) {
            diags.push(pos.clone(), format!("undefined function {operand:?}"));
        }
        operand.to_string()
    }
}

fn assemble_func(
    f: &RawFunc,
    local_funcs: &std::collections::HashSet<String>,
    imports: &HashMap<String, (String, Vec<String>)>,
    diags: &mut Diagnostics,
) -> vmx_image::ObjFunc {
    let mut labels: HashMap<String, usize> = HashMap::new();
    let mut idx = 0usize;
    for line in &f.lines {
        match line {
            Line::Label(name, pos) => {
                if labels.insert(name.clone(), idx).is_some() {
                    diags.push(pos.clone(), format!("label {name:?} redeclared"));
                }
            }
            Line::Insn(_) => idx += 1,
        }
    }

    let mut b = InstrBuilder::new();
    let mut branch_targets: Vec<(usize, String, Pos)> = Vec::new();

    for line in &f.lines {
        let Line::Insn(insn) = line else { continue };
        let ops = &insn.operands;
        let pos = &insn.pos;
        match insn.mnemonic.as_str() {
            "nop" => {
                expect_n(ops, 0, "nop", pos, diags);
                b.emit(Instr::Nop);
            }
            "halt" => {
                expect_n(ops, 0, "halt", pos, diags);
                b.emit(Instr::Halt);
            }
            "trap" => {
                expect_n(ops, 0, "trap", pos, diags);
                b.emit(Instr::Trap);
            }
            "ret" => {
                expect_n(ops, 0, "ret", pos, diags);
                b.emit(Instr::Ret);
            }
            "loadimm" => {
                if expect_n(ops, 2, "loadimm", pos, diags) {
                    let rd = parse_reg(&ops[0], pos, diags);
                    let imm = parse_imm(&ops[1], pos, "word", diags);
                    b.emit(Instr::LoadImm { rd, imm });
                }
            }
            "mov" => {
                if expect_n(ops, 2, "mov", pos, diags) {
                    let rd = parse_reg(&ops[0], pos, diags);
                    let ra = parse_reg(&ops[1], pos, diags);
                    b.emit(Instr::Mov { rd, ra });
                }
            }
            "add" | "sub" | "mul" | "div" => {
                if expect_n(ops, 3, &insn.mnemonic, pos, diags) {
                    let rd = parse_reg(&ops[0], pos, diags);
                    let ra = parse_reg(&ops[1], pos, diags);
                    let rb = parse_reg(&ops[2], pos, diags);
                    let i = match insn.mnemonic.as_str() {
                        "add" => Instr::Add { rd, ra, rb },
                        "sub" => Instr::Sub { rd, ra, rb },
                        "mul" => Instr::Mul { rd, ra, rb },
                        _ => Instr::Div { rd, ra, rb },
                    };
                    b.emit(i);
                }
            }
            "loadword" => {
                if expect_n(ops, 3, "loadword", pos, diags) {
                    let rd = parse_reg(&ops[0], pos, diags);
                    let ra = parse_reg(&ops[1], pos, diags);
                    let imm = parse_imm(&ops[2], pos, "byte", diags);
                    b.emit(Instr::LoadWord { rd, ra, imm });
                }
            }
            "storeword" => {
                if expect_n(ops, 3, "storeword", pos, diags) {
                    let ra = parse_reg(&ops[0], pos, diags);
                    let imm = parse_imm(&ops[1], pos, "byte", diags);
                    let rs = parse_reg(&ops[2], pos, diags);
                    b.emit(Instr::StoreWord { ra, imm, rs });
                }
            }
            "push" => {
                if expect_n(ops, 1, "push", pos, diags) {
                    let ra = parse_reg(&ops[0], pos, diags);
                    b.emit(Instr::Push { ra });
                }
            }
            "pop" => {
                if expect_n(ops, 1, "pop", pos, diags) {
                    let rd = parse_reg(&ops[0], pos, diags);
                    b.emit(Instr::Pop { rd });
                }
            }
            "jmp" => {
                if expect_n(ops, 1, "jmp", pos, diags) {
                    let at = b.emit(Instr::Jmp { offset: 0 });
                    branch_targets.push((at, ops[0].clone(), pos.clone()));
                }
            }
            "beq" | "blt" => {
                if expect_n(ops, 3, &insn.mnemonic, pos, diags) {
                    let ra = parse_reg(&ops[0], pos, diags);
                    let rb = parse_reg(&ops[1], pos, diags);
                    let at = if insn.mnemonic == "beq" {
                        b.emit(Instr::Beq { ra, rb, offset: 0 })
                    } else {
                        b.emit(Instr::Blt { ra, rb, offset: 0 })
                    };
                    branch_targets.push((at, ops[2].clone(), pos.clone()));
                }
            }
            "call" => {
                if expect_n(ops, 1, "call", pos, diags) {
                    let symbol = resolve_callee(&ops[0], local_funcs, imports, pos, diags);
                    b.emit_call(symbol);
                }
            }
            other => diags.push(pos.clone(), format!("unknown mnemonic {other:?}")),
        }
    }

    for (at, label, pos) in branch_targets {
        match labels.get(&label) {
            Some(&target) => b.patch(at, target),
            None => diags.push(pos, format!("undefined label {label:?}")),
        }
    }

    let (code, relocs) = b.into_bytes();
    vmx_image::ObjFunc { name: f.name.clone(), code, relocs }
}

/// Assembles every function in `program` into one [`vmx_image::Library`].
/// `imports` maps each local alias (from the program's `import`
/// statements) to the dependency's package path and the set of
/// function names it exports.
pub fn assemble(program: &Program, imports: &HashMap<String, (String, Vec<String>)>) -> (vmx_image::Library, Diagnostics) {
    let mut diags = Diagnostics::new();
    let mut seen = std::collections::HashSet::new();
    for f in &program.funcs {
        if !seen.insert(f.name.clone()) {
            diags.push(f.pos.clone(), format!("function {:?} redeclared", f.name));
        }
    }

    let mut funcs = Vec::new();
    for f in &program.funcs {
        funcs.push(assemble_func(f, &seen, imports, &mut diags));
    }

    (vmx_image::Library { funcs }, diags)
}

/// The set of function names a compiled package exposes to importers.
/// Every declared function is exported; the A language has no
/// visibility modifiers.
pub fn exported_funcs(program: &Program) -> Vec<String> {
    program.funcs.iter().map(|f| f.name.clone()).collect()
}

/// Renames `func_name`'s link symbol to [`BARE_ENTRY`] so the linker
/// can enter the image there directly, mirroring
/// `vmx_lang::bare_func::compile_bare`.
pub fn bare_entry(lib: &vmx_image::Library, func_name: &str) -> Result<vmx_image::Library, AsmError> {
    let mut lib = lib.clone();
    let found = lib
        .funcs
        .iter_mut()
        .find(|f| f.name == func_name)
        .ok_or_else(|| AsmError::NoSuchFunc(func_name.to_string()))?;
    found.name = BARE_ENTRY.to_string();
    Ok(lib)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;

    #[test]
    fn assembles_a_loop_with_a_local_call() {
        let src = "func add\n  add r0, r0, r1\n  ret\n\nfunc main\n  loadimm r0, 1\n  loadimm r1, 2\n  call add\nloop:\n  jmp loop\n  halt\n";
        let (prog, pdiags) = parse_file("t.s", src);
        assert!(pdiags.is_empty(), "{:?}", pdiags.as_slice());
        let (lib, diags) = assemble(&prog, &HashMap::new());
        assert!(diags.is_empty(), "{:?}", diags.as_slice());
        assert_eq!(lib.funcs.len(), 2);
        let main = lib.funcs.iter().find(|f| f.name == "main").unwrap();
        assert_eq!(main.relocs.len(), 1);
        assert_eq!(main.relocs[0].symbol, "add");
    }

    #[test]
    fn qualifies_calls_into_imported_packages() {
        let src = "import p \"pkg/helper\"\nfunc main\n  call p.helper\n  halt\n";
        let (prog, _) = parse_file("t.s", src);
        let mut imports = HashMap::new();
        imports.insert("p".to_string(), ("pkg/helper".to_string(), vec!["helper".to_string()]));
        let (lib, diags) = assemble(&prog, &imports);
        assert!(diags.is_empty(), "{:?}", diags.as_slice());
        assert_eq!(lib.funcs[0].relocs[0].symbol, "pkg/helper.helper");
    }

    #[test]
    fn undefined_label_is_a_diagnostic() {
        let src = "func main\n  jmp nowhere\n";
        let (prog, _) = parse_file("t.s", src);
        let (_lib, diags) = assemble(&prog, &HashMap::new());
        assert_eq!(diags.len(), 1);
    }

    #[test]
    fn bare_entry_renames_the_chosen_function() {
        let src = "func TestAdds\n  loadimm r0, 2\n  halt\n";
        let (prog, _) = parse_file("t.s", src);
        let (lib, diags) = assemble(&prog, &HashMap::new());
        assert!(diags.is_empty());
        let renamed = bare_entry(&lib, "TestAdds").unwrap();
        assert!(renamed.funcs.iter().any(|f| f.name == BARE_ENTRY));
        assert!(bare_entry(&lib, "NoSuchFunc").is_err());
    }
}
