//! The per-core register file, instruction decoder and `tick` executor.
//!
//! §1 scopes concrete code-generator instruction selection out of this
//! specification; the instruction set below is the minimal concrete
//! decoder/executor contract the spec asks for (§4.2), picked to be
//! simple enough that a tree-walking code generator can target it
//! directly (see `vmx-lang::codegen`).

use vmx_memory::PhysicalMemory;

use crate::vpc::Bus;

/// Number of general registers.
pub const NUM_REGS: usize = 32;
/// Register index used by convention as the stack pointer. Per spec
/// §3, `r0` is not hardwired and no register is special at the
/// hardware level; this is purely an ISA calling convention.
pub const SP: usize = 31;

/// The kinds of exceptional condition a tick can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionKind {
    Align,
    PageFault,
    IllegalInstr,
    DivideByZero,
    Halt,
    Trap,
    VpcError,
}

/// A tick-aborting condition, carrying enough context to report or
/// debug it. Not a Rust panic/throw: these are values, returned from
/// [`Core::tick`] and [`crate::machine::Machine::tick`].
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("core {core} at pc {pc:#x}: {kind:?} ({detail})")]
pub struct CoreException {
    pub core: u8,
    pub pc: u32,
    pub kind: ExceptionKind,
    pub detail: String,
}

impl CoreException {
    fn new(core: u8, pc: u32, kind: ExceptionKind, detail: impl Into<String>) -> Self {
        Self {
            core,
            pc,
            kind,
            detail: detail.into(),
        }
    }
}

fn byte_at(b0: u8, b1: u8) -> i16 {
    i16::from_le_bytes([b0, b1])
}

/// One decoded 4-byte instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instr {
    Nop,
    Halt,
    Trap,
    LoadImm { rd: u8, imm: i16 },
    Mov { rd: u8, ra: u8 },
    Add { rd: u8, ra: u8, rb: u8 },
    Sub { rd: u8, ra: u8, rb: u8 },
    Mul { rd: u8, ra: u8, rb: u8 },
    Div { rd: u8, ra: u8, rb: u8 },
    LoadWord { rd: u8, ra: u8, imm: i16 },
    StoreWord { ra: u8, imm: i16, rs: u8 },
    Jmp { offset: i16 },
    Beq { ra: u8, rb: u8, offset: i16 },
    Blt { ra: u8, rb: u8, offset: i16 },
    Call { offset: i16 },
    Ret,
    Push { ra: u8 },
    Pop { rd: u8 },
}

const OP_NOP: u8 = 0x00;
const OP_HALT: u8 = 0x01;
const OP_LOADI: u8 = 0x02;
const OP_ADD: u8 = 0x03;
const OP_SUB: u8 = 0x04;
const OP_MUL: u8 = 0x05;
const OP_DIV: u8 = 0x06;
const OP_MOV: u8 = 0x07;
const OP_LOADW: u8 = 0x08;
const OP_STOREW: u8 = 0x09;
const OP_JMP: u8 = 0x0a;
const OP_BEQ: u8 = 0x0b;
const OP_BLT: u8 = 0x0c;
const OP_CALL: u8 = 0x0d;
const OP_RET: u8 = 0x0e;
const OP_PUSH: u8 = 0x0f;
const OP_POP: u8 = 0x10;
const OP_TRAP: u8 = 0x11;

/// Decodes one 4-byte little-endian instruction word. Returns `None` on
/// an unrecognized opcode (the caller raises `IllegalInstr`).
pub fn decode(word: [u8; 4]) -> Option<Instr> {
    let [op, b1, b2, b3] = word;
    Some(match op {
        OP_NOP => Instr::Nop,
        OP_HALT => Instr::Halt,
        OP_TRAP => Instr::Trap,
        OP_LOADI => Instr::LoadImm { rd: b1, imm: byte_at(b2, b3) },
        OP_MOV => Instr::Mov { rd: b1, ra: b2 },
        OP_ADD => Instr::Add { rd: b1, ra: b2, rb: b3 },
        OP_SUB => Instr::Sub { rd: b1, ra: b2, rb: b3 },
        OP_MUL => Instr::Mul { rd: b1, ra: b2, rb: b3 },
        OP_DIV => Instr::Div { rd: b1, ra: b2, rb: b3 },
        OP_LOADW => Instr::LoadWord { rd: b1, ra: b2, imm: (b3 as i8) as i16 },
        OP_STOREW => Instr::StoreWord { ra: b1, imm: (b2 as i8) as i16, rs: b3 },
        OP_JMP => Instr::Jmp { offset: byte_at(b1, b2) },
        OP_BEQ => Instr::Beq { ra: b1, rb: b2, offset: (b3 as i8) as i16 },
        OP_BLT => Instr::Blt { ra: b1, rb: b2, offset: (b3 as i8) as i16 },
        OP_CALL => Instr::Call { offset: byte_at(b1, b2) },
        OP_RET => Instr::Ret,
        OP_PUSH => Instr::Push { ra: b1 },
        OP_POP => Instr::Pop { rd: b1 },
        _ => return None,
    })
}

/// Encodes an instruction back into its 4-byte form (used by the code
/// generator).
pub fn encode(instr: Instr) -> [u8; 4] {
    match instr {
        Instr::Nop => [OP_NOP, 0, 0, 0],
        Instr::Halt => [OP_HALT, 0, 0, 0],
        Instr::Trap => [OP_TRAP, 0, 0, 0],
        Instr::LoadImm { rd, imm } => {
            let b = imm.to_le_bytes();
            [OP_LOADI, rd, b[0], b[1]]
        }
        Instr::Mov { rd, ra } => [OP_MOV, rd, ra, 0],
        Instr::Add { rd, ra, rb } => [OP_ADD, rd, ra, rb],
        Instr::Sub { rd, ra, rb } => [OP_SUB, rd, ra, rb],
        Instr::Mul { rd, ra, rb } => [OP_MUL, rd, ra, rb],
        Instr::Div { rd, ra, rb } => [OP_DIV, rd, ra, rb],
        Instr::LoadWord { rd, ra, imm } => [OP_LOADW, rd, ra, imm as i8 as u8],
        Instr::StoreWord { ra, imm, rs } => [OP_STOREW, ra, imm as i8 as u8, rs],
        Instr::Jmp { offset } => {
            let b = offset.to_le_bytes();
            [OP_JMP, b[0], b[1], 0]
        }
        Instr::Beq { ra, rb, offset } => [OP_BEQ, ra, rb, offset as i8 as u8],
        Instr::Blt { ra, rb, offset } => [OP_BLT, ra, rb, offset as i8 as u8],
        Instr::Call { offset } => {
            let b = offset.to_le_bytes();
            [OP_CALL, b[0], b[1], 0]
        }
        Instr::Ret => [OP_RET, 0, 0, 0],
        Instr::Push { ra } => [OP_PUSH, ra, 0, 0],
        Instr::Pop { rd } => [OP_POP, rd, 0, 0],
    }
}

/// One simulated processor: a register file, program counter and
/// index identifying it among its siblings.
pub struct Core {
    pub index: u8,
    pub regs: [u32; NUM_REGS],
    pub pc: u32,
}

impl Core {
    pub fn new(index: u8) -> Self {
        Self {
            index,
            regs: [0; NUM_REGS],
            pc: 0,
        }
    }

    /// Translates a virtual address to a physical one. Identity mapping
    /// at the current ISA revision; kept as its own function so a
    /// future MMU page-table walk can replace it without touching
    /// callers (per spec §4.2).
    fn translate(&self, virt: u32) -> u32 {
        virt
    }

    fn fetch(&self, mem: &PhysicalMemory) -> Result<[u8; 4], CoreException> {
        let phys = self.translate(self.pc);
        if phys % 4 != 0 {
            return Err(CoreException::new(self.index, self.pc, ExceptionKind::Align, "pc misaligned"));
        }
        let word = mem.read_word(phys).map_err(|_| {
            CoreException::new(self.index, self.pc, ExceptionKind::PageFault, "fetch out of range")
        })?;
        Ok(word.to_le_bytes())
    }

    fn read_mem_word(&self, mem: &PhysicalMemory, virt: u32) -> Result<u32, CoreException> {
        let phys = self.translate(virt);
        mem.read_word(phys).map_err(|e| self.mem_exception(virt, e))
    }

    fn write_mem_word(&self, mem: &mut PhysicalMemory, virt: u32, v: u32) -> Result<(), CoreException> {
        let phys = self.translate(virt);
        mem.write_word(phys, v).map_err(|e| self.mem_exception(virt, e))
    }

    fn mem_exception(&self, addr: u32, e: vmx_memory::MemoryError) -> CoreException {
        match e {
            vmx_memory::MemoryError::Misaligned(_) => {
                CoreException::new(self.index, self.pc, ExceptionKind::Align, format!("misaligned access at {addr:#x}"))
            }
            vmx_memory::MemoryError::OutOfRange(_) => {
                CoreException::new(self.index, self.pc, ExceptionKind::PageFault, format!("out of range access at {addr:#x}"))
            }
        }
    }

    fn reg(&self, i: u8) -> u32 {
        self.regs[i as usize % NUM_REGS]
    }

    fn set_reg(&mut self, i: u8, v: u32) {
        self.regs[i as usize % NUM_REGS] = v;
    }

    /// Executes exactly one instruction: fetch at `pc`, decode, execute,
    /// advance `pc` by 4 (or to a branch target). Returns the first
    /// exception produced, if any.
    pub fn tick(
        &mut self,
        mem: &mut PhysicalMemory,
        vpc: &mut Bus,
        rpc_base: u32,
    ) -> Option<CoreException> {
        let pc_before = self.pc;
        let word = match self.fetch(mem) {
            Ok(w) => w,
            Err(e) => return Some(e),
        };
        let instr = match decode(word) {
            Some(i) => i,
            None => {
                return Some(CoreException::new(
                    self.index,
                    pc_before,
                    ExceptionKind::IllegalInstr,
                    format!("opcode {:#x}", word[0]),
                ))
            }
        };

        let mut jumped = false;
        let result = self.execute(instr, mem, vpc, rpc_base, &mut jumped);
        if let Err(e) = result {
            return Some(e);
        }
        if !jumped {
            self.pc = pc_before.wrapping_add(4);
        }
        None
    }

    fn branch_to(&mut self, base_pc: u32, offset: i16, jumped: &mut bool) {
        let target = (base_pc as i64 + 4 + (offset as i64) * 4) as u32;
        self.pc = target;
        *jumped = true;
    }

    #[allow(clippy::too_many_arguments)]
    fn execute(
        &mut self,
        instr: Instr,
        mem: &mut PhysicalMemory,
        vpc: &mut Bus,
        rpc_base: u32,
        jumped: &mut bool,
    ) -> Result<(), CoreException> {
        let pc_before = self.pc;
        match instr {
            Instr::Nop => {}
            Instr::Halt => {
                return Err(CoreException::new(self.index, pc_before, ExceptionKind::Halt, "halt"))
            }
            Instr::Trap => {
                vpc.dispatch(mem, rpc_base).map_err(|e| {
                    CoreException::new(self.index, pc_before, ExceptionKind::VpcError, e.to_string())
                })?;
            }
            Instr::LoadImm { rd, imm } => self.set_reg(rd, imm as u32),
            Instr::Mov { rd, ra } => self.set_reg(rd, self.reg(ra)),
            Instr::Add { rd, ra, rb } => self.set_reg(rd, self.reg(ra).wrapping_add(self.reg(rb))),
            Instr::Sub { rd, ra, rb } => self.set_reg(rd, self.reg(ra).wrapping_sub(self.reg(rb))),
            Instr::Mul { rd, ra, rb } => self.set_reg(rd, self.reg(ra).wrapping_mul(self.reg(rb))),
            Instr::Div { rd, ra, rb } => {
                let divisor = self.reg(rb);
                if divisor == 0 {
                    return Err(CoreException::new(self.index, pc_before, ExceptionKind::DivideByZero, "division by zero"));
                }
                self.set_reg(rd, self.reg(ra) / divisor);
            }
            Instr::LoadWord { rd, ra, imm } => {
                let addr = (self.reg(ra) as i64 + imm as i64) as u32;
                let v = self.read_mem_word(mem, addr)?;
                self.set_reg(rd, v);
            }
            Instr::StoreWord { ra, imm, rs } => {
                let addr = (self.reg(ra) as i64 + imm as i64) as u32;
                self.write_mem_word(mem, addr, self.reg(rs))?;
            }
            Instr::Jmp { offset } => self.branch_to(pc_before, offset, jumped),
            Instr::Beq { ra, rb, offset } => {
                if self.reg(ra) == self.reg(rb) {
                    self.branch_to(pc_before, offset, jumped);
                }
            }
            Instr::Blt { ra, rb, offset } => {
                if (self.reg(ra) as i32) < (self.reg(rb) as i32) {
                    self.branch_to(pc_before, offset, jumped);
                }
            }
            Instr::Call { offset } => {
                let sp = self.reg(SP as u8).wrapping_sub(4);
                self.set_reg(SP as u8, sp);
                self.write_mem_word(mem, sp, pc_before.wrapping_add(4))?;
                self.branch_to(pc_before, offset, jumped);
            }
            Instr::Ret => {
                let sp = self.reg(SP as u8);
                let ret_addr = self.read_mem_word(mem, sp)?;
                self.set_reg(SP as u8, sp.wrapping_add(4));
                self.pc = ret_addr;
                *jumped = true;
            }
            Instr::Push { ra } => {
                let sp = self.reg(SP as u8).wrapping_sub(4);
                self.set_reg(SP as u8, sp);
                self.write_mem_word(mem, sp, self.reg(ra))?;
            }
            Instr::Pop { rd } => {
                let sp = self.reg(SP as u8);
                let v = self.read_mem_word(mem, sp)?;
                self.set_reg(SP as u8, sp.wrapping_add(4));
                self.set_reg(rd, v);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for instr in [
            Instr::Nop,
            Instr::Halt,
            Instr::Trap,
            Instr::LoadImm { rd: 3, imm: -7 },
            Instr::Add { rd: 1, ra: 2, rb: 3 },
            Instr::Jmp { offset: -2 },
            Instr::Call { offset: 5 },
            Instr::Ret,
        ] {
            assert_eq!(decode(encode(instr)), Some(instr));
        }
    }

    #[test]
    fn illegal_opcode_is_rejected() {
        assert_eq!(decode([0xff, 0, 0, 0]), None);
    }

    #[test]
    fn divide_by_zero_raises_exception() {
        let mut mem = PhysicalMemory::new(0);
        let mut vpc = Bus::new();
        let mut core = Core::new(0);
        mem.write_bytes(0, &encode(Instr::Div { rd: 0, ra: 0, rb: 1 })).unwrap();
        let e = core.tick(&mut mem, &mut vpc, 0).unwrap();
        assert_eq!(e.kind, ExceptionKind::DivideByZero);
    }

    #[test]
    fn halt_is_reported_as_an_exception_value() {
        let mut mem = PhysicalMemory::new(0);
        let mut vpc = Bus::new();
        let mut core = Core::new(0);
        mem.write_bytes(0, &encode(Instr::Halt)).unwrap();
        let e = core.tick(&mut mem, &mut vpc, 0).unwrap();
        assert_eq!(e.kind, ExceptionKind::Halt);
    }
}
