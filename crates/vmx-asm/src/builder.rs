//! A label-patching instruction assembler for one function body.
//!
//! Deliberately not shared with `vmx_lang::asm::InstrBuilder`: the
//! original's `asm` package builds its own function bodies
//! independently of `pl`'s code generator (`asm/lang.go` has no
//! dependency on the `pl` package), so this crate keeps the same
//! separation rather than factoring out a shared helper crate.

use vmx_machine::core::{encode, Instr};

pub struct InstrBuilder {
    instrs: Vec<Instr>,
    pub relocs: Vec<vmx_image::Reloc>,
}

impl InstrBuilder {
    pub fn new() -> Self {
        Self { instrs: Vec::new(), relocs: Vec::new() }
    }

    pub fn emit(&mut self, i: Instr) -> usize {
        self.instrs.push(i);
        self.instrs.len() - 1
    }

    pub fn emit_call(&mut self, symbol: impl Into<String>) {
        let idx = self.emit(Instr::Call { offset: 0 });
        self.relocs.push(vmx_image::Reloc { offset: (idx * 4) as u32, symbol: symbol.into() });
    }

    /// Rewrites the branch/jump instruction at `at` to target
    /// instruction index `target`, both counted in words from the
    /// start of this function.
    pub fn patch(&mut self, at: usize, target: usize) {
        let offset = vmx_image::relative_word_offset((target * 4) as u32, (at * 4) as u32);
        self.instrs[at] = match self.instrs[at] {
            Instr::Jmp { .. } => Instr::Jmp { offset },
            Instr::Beq { ra, rb, .. } => Instr::Beq { ra, rb, offset },
            Instr::Blt { ra, rb, .. } => Instr::Blt { ra, rb, offset },
            other => panic!("patch target is not a branch instruction: {other:?}"),
        };
    }

    pub fn into_bytes(self) -> (Vec<u8>, Vec<vmx_image::Reloc>) {
        let bytes = self.instrs.into_iter().flat_map(encode).collect();
        (bytes, self.relocs)
    }
}

impl Default for InstrBuilder {
    fn default() -> Self {
        Self::new()
    }
}
