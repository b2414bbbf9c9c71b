//! A tiny label-patching instruction assembler shared by [`crate::codegen`]
//! (control flow for `if`/`for`/`break`/`continue`) and [`crate::runtime`]
//! (the hand-written `print` builtin). Neither needs a general-purpose
//! assembler — just "emit an instruction, remember where it went, patch
//! its branch offset once the target is known."
//!
//! Branch offsets are computed with `vmx_image::relative_word_offset`,
//! the same helper the linker uses for cross-function call relocations,
//! so both kinds of fixup agree on one encoding.

use vmx_machine::core::{encode, Instr};

/// A linear sequence of instructions for one function body, with
/// pending call relocations collected alongside.
pub struct InstrBuilder {
    instrs: Vec<Instr>,
    pub relocs: Vec<vmx_image::Reloc>,
}

impl InstrBuilder {
    pub fn new() -> Self {
        Self { instrs: Vec::new(), relocs: Vec::new() }
    }

    /// Appends an instruction, returning its index (one index == one
    /// 4-byte word).
    pub fn emit(&mut self, i: Instr) -> usize {
        self.instrs.push(i);
        self.instrs.len() - 1
    }

    /// The index the next `emit` will land at.
    pub fn here(&self) -> usize {
        self.instrs.len()
    }

    /// Emits a `Call` to `symbol`, recording a relocation the linker
    /// will patch once every function's address is known.
    pub fn emit_call(&mut self, symbol: impl Into<String>) {
        let idx = self.emit(Instr::Call { offset: 0 });
        self.relocs.push(vmx_image::Reloc { offset: (idx * 4) as u32, symbol: symbol.into() });
    }

    /// Rewrites the branch/jump instruction at `at` so it targets
    /// instruction index `target`.
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
