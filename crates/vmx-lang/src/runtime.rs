//! The builtin runtime library linked into every compiled package
//! (§4.6 "`print` is provided by the always-linked builtin library").
//!
//! The ISA has no decimal-formatting or string primitive (§1 scopes
//! concrete instruction selection out), so `print(n int)` is realized
//! here as hand-assembled instructions: convert `n` to ASCII decimal
//! digits in a scratch buffer, then issue one console-write VPC call
//! per character plus a trailing newline.
//!
//! Scratch addresses live in page 6, away from the pages the machine
//! reserves for devices (`PAGE_BASIC_IO`, `PAGE_RPC`, `PAGE_SYS_INFO`).

use vmx_machine::core::Instr;
use vmx_machine::devices::CONSOLE_CMD_WRITE;
use vmx_machine::machine::{PAGE_RPC, SERVICE_CONSOLE};
use vmx_memory::PAGE_SIZE;

use crate::asm::InstrBuilder;

const SCRATCH_PAGE: u32 = 6;
const DIGIT_BUF_BASE: u32 = SCRATCH_PAGE * PAGE_SIZE;
const ARG_BASE: u32 = SCRATCH_PAGE * PAGE_SIZE + 0x100;
const RESP_BASE: u32 = SCRATCH_PAGE * PAGE_SIZE + 0x200;
const RPC_BASE: u32 = PAGE_RPC * PAGE_SIZE;

/// Name the `print(...)` builtin call links against.
pub const PRINT_FUNC: &str = "__print_int";

/// Builds the always-linked runtime library (currently just `print`).
pub fn library() -> vmx_image::Library {
    vmx_image::Library { funcs: vec![print_int_func()] }
}

#[allow(clippy::too_many_arguments)]
fn emit_console_write(
    b: &mut InstrBuilder,
    arg_base: u8,
    rpc_base: u8,
    svc: u8,
    arg_len: u8,
    resp_base: u8,
    resp_cap: u8,
    arg_word: u8,
) {
    b.emit(Instr::StoreWord { ra: arg_base, imm: 0, rs: arg_word });
    b.emit(Instr::StoreWord { ra: rpc_base, imm: 0, rs: svc });
    b.emit(Instr::StoreWord { ra: rpc_base, imm: 4, rs: arg_base });
    b.emit(Instr::StoreWord { ra: rpc_base, imm: 8, rs: arg_len });
    b.emit(Instr::StoreWord { ra: rpc_base, imm: 12, rs: resp_base });
    b.emit(Instr::StoreWord { ra: rpc_base, imm: 16, rs: resp_cap });
    b.emit(Instr::Trap);
}

/// `__print_int(n: r0)`: prints `n` in decimal followed by `\n`.
fn print_int_func() -> vmx_image::ObjFunc {
    let n = 6;
    let neg = 7;
    let zero = 8;
    let ten = 9;
    let four = 11;
    let buf_base = 12;
    let ascii_off = 16;
    let minus = 17;
    let two56 = 18;
    let rpc = 19;
    let argb = 20;
    let respb = 21;
    let svc = 22;
    let arglen = 23;
    let respcap = 24;
    let newline = 25;
    let one = 29;
    let cnt = 10;
    let tmp = 13;
    let tmp2 = 14;
    let addr = 15;
    let i = 26;
    let dval = 27;
    let aword = 28;

    let mut b = InstrBuilder::new();

    b.emit(Instr::Mov { rd: n, ra: 0 });
    b.emit(Instr::LoadImm { rd: zero, imm: 0 });
    b.emit(Instr::LoadImm { rd: ten, imm: 10 });
    b.emit(Instr::LoadImm { rd: four, imm: 4 });
    b.emit(Instr::LoadImm { rd: buf_base, imm: DIGIT_BUF_BASE as i16 });
    b.emit(Instr::LoadImm { rd: ascii_off, imm: 48 });
    b.emit(Instr::LoadImm { rd: minus, imm: 45 });
    b.emit(Instr::LoadImm { rd: two56, imm: 256 });
    b.emit(Instr::LoadImm { rd: rpc, imm: RPC_BASE as i16 });
    b.emit(Instr::LoadImm { rd: argb, imm: ARG_BASE as i16 });
    b.emit(Instr::LoadImm { rd: respb, imm: RESP_BASE as i16 });
    b.emit(Instr::LoadImm { rd: svc, imm: SERVICE_CONSOLE as i16 });
    b.emit(Instr::LoadImm { rd: arglen, imm: 2 });
    b.emit(Instr::LoadImm { rd: respcap, imm: 0 });
    b.emit(Instr::LoadImm { rd: newline, imm: 10 });
    b.emit(Instr::LoadImm { rd: one, imm: 1 });
    b.emit(Instr::LoadImm { rd: neg, imm: 0 });
    b.emit(Instr::LoadImm { rd: cnt, imm: 0 });

    // if n < 0 { neg = 1; n = -n }
    let check_neg = b.emit(Instr::Blt { ra: n, rb: zero, offset: 0 });
    let skip_neg = b.emit(Instr::Jmp { offset: 0 });
    let l_negative = b.here();
    b.emit(Instr::LoadImm { rd: neg, imm: 1 });
    b.emit(Instr::Sub { rd: n, ra: zero, rb: n });
    let l_after_neg = b.here();
    b.patch(check_neg, l_negative);
    b.patch(skip_neg, l_after_neg);

    // do { digit = n % 10; buf[cnt++] = digit + '0'; n /= 10 } while (n > 0)
    let l_digit_loop = b.here();
    b.emit(Instr::Div { rd: tmp, ra: n, rb: ten });
    b.emit(Instr::Mul { rd: tmp2, ra: tmp, rb: ten });
    b.emit(Instr::Sub { rd: tmp2, ra: n, rb: tmp2 });
    b.emit(Instr::Add { rd: tmp2, ra: tmp2, rb: ascii_off });
    b.emit(Instr::Mul { rd: addr, ra: cnt, rb: four });
    b.emit(Instr::Add { rd: addr, ra: addr, rb: buf_base });
    b.emit(Instr::StoreWord { ra: addr, imm: 0, rs: tmp2 });
    b.emit(Instr::Add { rd: cnt, ra: cnt, rb: one });
    b.emit(Instr::Mov { rd: n, ra: tmp });
    let loop_again = b.emit(Instr::Blt { ra: zero, rb: n, offset: 0 });
    b.patch(loop_again, l_digit_loop);

    // if neg != 0, print '-'
    let skip_sign = b.emit(Instr::Beq { ra: neg, rb: zero, offset: 0 });
    b.emit(Instr::Mul { rd: aword, ra: minus, rb: two56 });
    emit_console_write(&mut b, argb, rpc, svc, arglen, respb, respcap, aword);
    let l_skip_sign = b.here();
    b.patch(skip_sign, l_skip_sign);

    // for (i = cnt - 1; i >= 0; i--) print(buf[i])
    b.emit(Instr::Sub { rd: i, ra: cnt, rb: one });
    let l_output_check = b.here();
    let output_done = b.emit(Instr::Blt { ra: i, rb: zero, offset: 0 });
    b.emit(Instr::Mul { rd: addr, ra: i, rb: four });
    b.emit(Instr::Add { rd: addr, ra: addr, rb: buf_base });
    b.emit(Instr::LoadWord { rd: dval, ra: addr, imm: 0 });
    b.emit(Instr::Mul { rd: aword, ra: dval, rb: two56 });
    emit_console_write(&mut b, argb, rpc, svc, arglen, respb, respcap, aword);
    b.emit(Instr::Sub { rd: i, ra: i, rb: one });
    let back_to_check = b.emit(Instr::Jmp { offset: 0 });
    b.patch(back_to_check, l_output_check);
    let l_output_done = b.here();
    b.patch(output_done, l_output_done);

    // trailing '\n'
    b.emit(Instr::Mul { rd: aword, ra: newline, rb: two56 });
    emit_console_write(&mut b, argb, rpc, svc, arglen, respb, respcap, aword);

    b.emit(Instr::Ret);

    let (code, relocs) = b.into_bytes();
    let _ = CONSOLE_CMD_WRITE; // cmd byte 0 is baked into `aword = ascii * 256`
    vmx_image::ObjFunc { name: PRINT_FUNC.to_string(), code, relocs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl std::io::Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run_print(n: i32) -> String {
        let out = SharedOutput::default();
        let mut main_asm = InstrBuilder::new();
        main_asm.emit(Instr::LoadImm { rd: 0, imm: n as i16 });
        main_asm.emit_call(PRINT_FUNC);
        main_asm.emit(Instr::Halt);
        let (code, relocs) = main_asm.into_bytes();
        let main = vmx_image::ObjFunc { name: "main".to_string(), code, relocs };

        let libs = [vmx_image::Library { funcs: vec![main] }, library()];
        let (section, entry) = vmx_image::link(&libs, 0x1000, "main").unwrap();

        let config = vmx_machine::Config {
            output: Box::new(out.clone()),
            init_pc: entry,
            ..Default::default()
        };
        let mut machine = vmx_machine::Machine::new(config);
        machine.write_bytes(section.addr, &section.bytes).unwrap();
        machine.set_pc(entry);
        let (_, exc) = machine.run(10_000);
        assert_eq!(exc.map(|e| e.kind), Some(vmx_machine::ExceptionKind::Halt));

        String::from_utf8(out.0.borrow().clone()).unwrap()
    }

    #[test]
    fn prints_a_positive_number_with_newline() {
        assert_eq!(run_print(3), "3\n");
    }

    #[test]
    fn prints_a_multi_digit_number_in_order() {
        assert_eq!(run_print(42), "42\n");
    }

    #[test]
    fn prints_a_negative_number_with_a_leading_sign() {
        assert_eq!(run_print(-7), "-7\n");
    }

    #[test]
    fn prints_zero_as_a_single_digit() {
        assert_eq!(run_print(0), "0\n");
    }
}
