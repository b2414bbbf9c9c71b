//! Tree-walking code generator from the typed AST (§4.9) to
//! `vmx-machine`'s ISA.
//!
//! Every function compiles independently into one [`vmx_image::ObjFunc`].
//! Locals live in a stack frame addressed off `SP`, never in a register
//! that's expected to survive a statement boundary: a handful of
//! bump-allocated temporaries carry intermediate values within one
//! statement and are reclaimed at the next. Registers other than `SP`
//! are caller-saved across a `Call` — nothing but a local's stack slot
//! is guaranteed to survive one.
//!
//! `LoadWord`/`StoreWord`'s `imm` and `Beq`/`Blt`'s `offset` are
//! single-byte-encoded (see `core::encode`), so any address beyond a
//! small constant is computed with explicit register arithmetic rather
//! than folded into an instruction's immediate field.

use std::collections::HashMap;

use vmx_machine::core::{Instr, SP as SP_USIZE};

use crate::asm::InstrBuilder;
use crate::check::{CheckedFunc, CheckedPackage};
use crate::runtime::PRINT_FUNC;
use crate::tast;
use crate::types::{Type, TypeArena, TypeId};

const ARG_REGS: [u8; 4] = [0, 1, 2, 3];
const RET_REG: u8 = 0;
const FRAME_TMP: u8 = 29;
const TEMP_BASE: u8 = 4;
const TEMP_MAX: u8 = 27;
const SP: u8 = SP_USIZE as u8;

#[derive(Debug, thiserror::Error)]
pub enum CodegenError {
    #[error("{0}: ran out of scratch registers for one statement")]
    OutOfTemps(String),
    #[error("codegen: {0}")]
    Unsupported(String),
}

/// Compiles every function in `pkg` into one [`vmx_image::Library`].
pub fn compile_package(pkg: &CheckedPackage) -> Result<vmx_image::Library, CodegenError> {
    let mut funcs = Vec::with_capacity(pkg.funcs.len());
    for f in &pkg.funcs {
        funcs.push(compile_func(pkg, f)?);
    }
    Ok(vmx_image::Library { funcs })
}

fn compile_func(pkg: &CheckedPackage, f: &CheckedFunc) -> Result<vmx_image::ObjFunc, CodegenError> {
    let mut counter = SlotCounter { next: f.params.len() as u32 };
    count_slots_block(&f.body, &mut counter);
    // Frame sizes stay well under i16::MAX for any program this subset
    // can express; LoadImm carries a full 16-bit field (unlike the
    // load/store/branch immediates), so this is safe.
    let frame_bytes = (counter.next * 4) as i16;

    let mut fc = FuncCodegen {
        pkg,
        scope: CodegenScope::new(),
        loops: Vec::new(),
        next_temp: TEMP_BASE,
        next_slot: f.params.len() as u32,
        frame_bytes,
        func_name: f.name.clone(),
    };
    for (i, (name, _ty)) in f.params.iter().enumerate() {
        fc.scope.declare(name, i as u32);
    }

    let mut ib = InstrBuilder::new();
    if frame_bytes != 0 {
        ib.emit(Instr::LoadImm { rd: FRAME_TMP, imm: frame_bytes });
        ib.emit(Instr::Sub { rd: SP, ra: SP, rb: FRAME_TMP });
    }
    for (i, _) in f.params.iter().enumerate() {
        if i < ARG_REGS.len() {
            fc.store_slot(&mut ib, i as u32, ARG_REGS[i])?;
        }
    }

    for s in &f.body {
        fc.gen_stmt(&mut ib, s)?;
    }
    emit_epilogue(&mut ib, frame_bytes);
    ib.emit(Instr::Ret);

    let (code, relocs) = ib.into_bytes();
    Ok(vmx_image::ObjFunc { name: f.name.clone(), code, relocs })
}

fn emit_epilogue(ib: &mut InstrBuilder, frame_bytes: i16) {
    if frame_bytes != 0 {
        ib.emit(Instr::LoadImm { rd: FRAME_TMP, imm: frame_bytes });
        ib.emit(Instr::Add { rd: SP, ra: SP, rb: FRAME_TMP });
    }
}

/// Counts the total number of local-variable stack slots a function
/// body declares. Slots are assigned once, monotonically, and never
/// reused across sibling block scopes — simpler than liveness-based
/// allocation, at the cost of a slightly larger frame.
struct SlotCounter {
    next: u32,
}

fn count_slots_block(stmts: &[tast::Stmt], counter: &mut SlotCounter) {
    for s in stmts {
        count_slots_stmt(s, counter);
    }
}

fn count_slots_stmt(s: &tast::Stmt, counter: &mut SlotCounter) {
    match s {
        tast::Stmt::VarDecl { names, .. } => counter.next += names.len() as u32,
        tast::Stmt::If { then, else_, .. } => {
            count_slots_stmt(then, counter);
            if let Some(e) = else_ {
                count_slots_stmt(e, counter);
            }
        }
        tast::Stmt::For { init, body, .. } => {
            if let Some(i) = init {
                count_slots_stmt(i, counter);
            }
            count_slots_stmt(body, counter);
        }
        tast::Stmt::Block(stmts) => count_slots_block(stmts, counter),
        tast::Stmt::Assign { .. }
        | tast::Stmt::Break
        | tast::Stmt::Continue
        | tast::Stmt::Return { .. }
        | tast::Stmt::Expr(_) => {}
    }
}

/// Name resolution for locals, mirroring `vmx_syms::ScopeStack`'s
/// block-shadowing: a stack of frames, innermost first.
struct CodegenScope {
    frames: Vec<HashMap<String, u32>>,
}

impl CodegenScope {
    fn new() -> Self {
        Self { frames: vec![HashMap::new()] }
    }

    fn push(&mut self) {
        self.frames.push(HashMap::new());
    }

    fn pop(&mut self) {
        self.frames.pop();
    }

    fn declare(&mut self, name: &str, slot: u32) {
        self.frames.last_mut().expect("at least one scope frame").insert(name.to_string(), slot);
    }

    fn lookup(&self, name: &str) -> u32 {
        for frame in self.frames.iter().rev() {
            if let Some(slot) = frame.get(name) {
                return *slot;
            }
        }
        unreachable!("codegen: undeclared local {name:?} (the checker should have rejected this)")
    }
}

struct LoopCtx {
    break_patches: Vec<usize>,
    continue_patches: Vec<usize>,
}

struct FuncCodegen<'a> {
    pkg: &'a CheckedPackage,
    scope: CodegenScope,
    loops: Vec<LoopCtx>,
    next_temp: u8,
    next_slot: u32,
    frame_bytes: i16,
    func_name: String,
}

impl<'a> FuncCodegen<'a> {
    fn types(&self) -> &TypeArena {
        &self.pkg.types
    }

    fn is_scalar(&self, ty: TypeId) -> bool {
        matches!(self.types().get(ty), Type::Int | Type::Uint | Type::Bool | Type::Pointer(_) | Type::Func(..))
    }

    fn temp(&mut self) -> Result<u8, CodegenError> {
        if self.next_temp > TEMP_MAX {
            return Err(CodegenError::OutOfTemps(self.func_name.clone()));
        }
        let t = self.next_temp;
        self.next_temp += 1;
        Ok(t)
    }

    fn reset_temps(&mut self) {
        self.next_temp = TEMP_BASE;
    }

    fn alloc_slot(&mut self) -> u32 {
        let s = self.next_slot;
        self.next_slot += 1;
        s
    }

    fn slot_addr(&mut self, ib: &mut InstrBuilder, slot: u32) -> Result<u8, CodegenError> {
        let t = self.temp()?;
        ib.emit(Instr::LoadImm { rd: t, imm: (slot * 4) as i16 });
        ib.emit(Instr::Add { rd: t, ra: SP, rb: t });
        Ok(t)
    }

    fn offset_addr(&mut self, ib: &mut InstrBuilder, base: u8, byte_off: u32) -> Result<u8, CodegenError> {
        if byte_off == 0 {
            return Ok(base);
        }
        let t = self.temp()?;
        ib.emit(Instr::LoadImm { rd: t, imm: byte_off as i16 });
        ib.emit(Instr::Add { rd: t, ra: base, rb: t });
        Ok(t)
    }

    fn store_slot(&mut self, ib: &mut InstrBuilder, slot: u32, val: u8) -> Result<(), CodegenError> {
        let addr = self.slot_addr(ib, slot)?;
        ib.emit(Instr::StoreWord { ra: addr, imm: 0, rs: val });
        Ok(())
    }

    fn copy_words(&mut self, ib: &mut InstrBuilder, dst: u8, src: u8, words: u32) -> Result<(), CodegenError> {
        for w in 0..words {
            let off = w * 4;
            let s_addr = self.offset_addr(ib, src, off)?;
            let d_addr = self.offset_addr(ib, dst, off)?;
            let tmp = self.temp()?;
            ib.emit(Instr::LoadWord { rd: tmp, ra: s_addr, imm: 0 });
            ib.emit(Instr::StoreWord { ra: d_addr, imm: 0, rs: tmp });
        }
        Ok(())
    }

    fn zero_words(&mut self, ib: &mut InstrBuilder, base: u8, words: u32) -> Result<(), CodegenError> {
        let zero = self.temp()?;
        ib.emit(Instr::LoadImm { rd: zero, imm: 0 });
        for w in 0..words {
            let addr = self.offset_addr(ib, base, w * 4)?;
            ib.emit(Instr::StoreWord { ra: addr, imm: 0, rs: zero });
        }
        Ok(())
    }

    /// Field byte offset of `field` on the struct type behind `base`'s
    /// type (either a struct value or a pointer to one).
    fn field_offset(&self, base_ty: TypeId, field: &str) -> Result<u32, CodegenError> {
        let struct_id = match self.types().get(base_ty) {
            Type::Pointer(inner) => *inner,
            _ => base_ty,
        };
        let Type::Struct(st) = self.types().get(struct_id) else {
            return Err(CodegenError::Unsupported(format!("{field}: base is not a struct")));
        };
        let mut off = 0u32;
        for (name, fty) in &st.fields {
            if name == field {
                return Ok(off);
            }
            off += self.types().size_words(*fty) * 4;
        }
        Err(CodegenError::Unsupported(format!("no field {field:?} on struct {}", st.name)))
    }

    /// The address an addressable expression refers to: a local's
    /// stack slot, a struct field, an array/slice element, or the
    /// pointer value behind a `*expr`.
    fn gen_addr(&mut self, ib: &mut InstrBuilder, e: &tast::Expr) -> Result<u8, CodegenError> {
        match e {
            tast::Expr::Ident { name, .. } => {
                let slot = self.scope.lookup(name);
                self.slot_addr(ib, slot)
            }
            tast::Expr::Member { expr, name, .. } => {
                let base_ty = expr.r().ty();
                let base_addr = match self.types().get(base_ty) {
                    Type::Pointer(_) => self.gen_expr(ib, expr)?,
                    _ => self.gen_addr(ib, expr)?,
                };
                let off = self.field_offset(base_ty, name)?;
                self.offset_addr(ib, base_addr, off)
            }
            tast::Expr::Index { array, index, r, .. } => {
                let base_addr = self.gen_array_base(ib, array)?;
                let idx = self.gen_expr(ib, index)?;
                let elem_bytes = self.types().size_words(r.ty()) * 4;
                let four = self.temp()?;
                ib.emit(Instr::LoadImm { rd: four, imm: elem_bytes as i16 });
                let byte_off = self.temp()?;
                ib.emit(Instr::Mul { rd: byte_off, ra: idx, rb: four });
                let t = self.temp()?;
                ib.emit(Instr::Add { rd: t, ra: base_addr, rb: byte_off });
                Ok(t)
            }
            tast::Expr::Star { expr, .. } => self.gen_expr(ib, expr),
            other => Err(CodegenError::Unsupported(format!("{other:?} is not addressable"))),
        }
    }

    /// The base address to index into: for an array value, its own
    /// address; for a slice, the pointer word stored in its header;
    /// for a pointer, the pointer value itself.
    fn gen_array_base(&mut self, ib: &mut InstrBuilder, array: &tast::Expr) -> Result<u8, CodegenError> {
        match self.types().get(array.r().ty()) {
            Type::Array(_, _) => self.gen_addr(ib, array),
            Type::Slice(_) => {
                let header = self.gen_addr(ib, array)?;
                let t = self.temp()?;
                ib.emit(Instr::LoadWord { rd: t, ra: header, imm: 0 });
                Ok(t)
            }
            Type::Pointer(_) => self.gen_expr(ib, array),
            _ => Err(CodegenError::Unsupported("indexing a non-array/slice/pointer value".into())),
        }
    }

    /// The value of a scalar expression, or the address of a composite
    /// one (arrays/structs are always handled by reference, per this
    /// generator's scalars-in-registers / composites-by-address split).
    fn gen_expr(&mut self, ib: &mut InstrBuilder, e: &tast::Expr) -> Result<u8, CodegenError> {
        match e {
            tast::Expr::IntConst { value, .. } => {
                let t = self.temp()?;
                ib.emit(Instr::LoadImm { rd: t, imm: *value as i16 });
                Ok(t)
            }
            tast::Expr::BoolConst { value, .. } => {
                let t = self.temp()?;
                ib.emit(Instr::LoadImm { rd: t, imm: if *value { 1 } else { 0 } });
                Ok(t)
            }
            tast::Expr::Ident { r, .. } | tast::Expr::Member { r, .. } | tast::Expr::Index { r, .. } => {
                if self.is_scalar(r.ty()) {
                    let addr = self.gen_addr(ib, e)?;
                    let t = self.temp()?;
                    ib.emit(Instr::LoadWord { rd: t, ra: addr, imm: 0 });
                    Ok(t)
                } else {
                    self.gen_addr(ib, e)
                }
            }
            tast::Expr::Star { r, .. } => {
                let addr = self.gen_addr(ib, e)?;
                if self.is_scalar(r.ty()) {
                    let t = self.temp()?;
                    ib.emit(Instr::LoadWord { rd: t, ra: addr, imm: 0 });
                    Ok(t)
                } else {
                    Ok(addr)
                }
            }
            tast::Expr::Op { a, op, b: bexpr, .. } => self.gen_op(ib, a.as_deref(), op, bexpr),
            tast::Expr::Call { callee, args, .. } => self.gen_call(ib, callee, args),
            tast::Expr::List { exprs, .. } => match exprs.first() {
                Some(first) => self.gen_expr(ib, first),
                None => Err(CodegenError::Unsupported("empty expression list".into())),
            },
            tast::Expr::Slice { .. } => Err(CodegenError::Unsupported("slice expressions".into())),
            tast::Expr::TypeExpr { .. } => Err(CodegenError::Unsupported("bare type expression".into())),
        }
    }

    fn gen_op(&mut self, ib: &mut InstrBuilder, a: Option<&tast::Expr>, op: &str, bexpr: &tast::Expr) -> Result<u8, CodegenError> {
        match (a, op) {
            (None, "!") => {
                let r = self.gen_expr(ib, bexpr)?;
                let one = self.temp()?;
                ib.emit(Instr::LoadImm { rd: one, imm: 1 });
                let t = self.temp()?;
                ib.emit(Instr::Sub { rd: t, ra: one, rb: r });
                Ok(t)
            }
            (None, "-") => {
                let r = self.gen_expr(ib, bexpr)?;
                let zero = self.temp()?;
                ib.emit(Instr::LoadImm { rd: zero, imm: 0 });
                let t = self.temp()?;
                ib.emit(Instr::Sub { rd: t, ra: zero, rb: r });
                Ok(t)
            }
            (None, other) => Err(CodegenError::Unsupported(format!("unary operator {other}"))),
            (Some(aexpr), _) => {
                let ra = self.gen_expr(ib, aexpr)?;
                let rb = self.gen_expr(ib, bexpr)?;
                self.gen_binop(ib, op, ra, rb)
            }
        }
    }

    fn gen_binop(&mut self, ib: &mut InstrBuilder, op: &str, ra: u8, rb: u8) -> Result<u8, CodegenError> {
        let t = self.temp()?;
        match op {
            "+" => {
                ib.emit(Instr::Add { rd: t, ra, rb });
                Ok(t)
            }
            "-" => {
                ib.emit(Instr::Sub { rd: t, ra, rb });
                Ok(t)
            }
            "*" => {
                ib.emit(Instr::Mul { rd: t, ra, rb });
                Ok(t)
            }
            "/" => {
                ib.emit(Instr::Div { rd: t, ra, rb });
                Ok(t)
            }
            // 0/1-encoded bools let `&&`/`||` lower to arithmetic rather
            // than a branch; this subset doesn't require them to
            // short-circuit.
            "&&" => {
                ib.emit(Instr::Mul { rd: t, ra, rb });
                Ok(t)
            }
            "||" => {
                let prod = self.temp()?;
                ib.emit(Instr::Mul { rd: prod, ra, rb });
                ib.emit(Instr::Add { rd: t, ra, rb });
                ib.emit(Instr::Sub { rd: t, ra: t, rb: prod });
                Ok(t)
            }
            "==" => self.gen_compare(ib, Instr::Beq { ra, rb, offset: 0 }, t, false),
            "!=" => self.gen_compare(ib, Instr::Beq { ra, rb, offset: 0 }, t, true),
            "<" => self.gen_compare(ib, Instr::Blt { ra, rb, offset: 0 }, t, false),
            "<=" => self.gen_compare(ib, Instr::Blt { ra: rb, rb: ra, offset: 0 }, t, true),
            ">" => self.gen_compare(ib, Instr::Blt { ra: rb, rb: ra, offset: 0 }, t, false),
            ">=" => self.gen_compare(ib, Instr::Blt { ra, rb, offset: 0 }, t, true),
            "<<" => self.gen_shift(ib, ra, rb, t, true),
            ">>" => self.gen_shift(ib, ra, rb, t, false),
            other => Err(CodegenError::Unsupported(format!("operator {other}"))),
        }
    }

    /// Emits `probe` (a `Beq`/`Blt` with a placeholder offset) and
    /// materializes its outcome as a 0/1 value in `t`, inverting it if
    /// `negate`. `<=`/`>`/`>=` are expressed by swapping operands or
    /// negating `==`/`<` rather than adding new branch shapes.
    fn gen_compare(&mut self, ib: &mut InstrBuilder, probe: Instr, t: u8, negate: bool) -> Result<u8, CodegenError> {
        ib.emit(Instr::LoadImm { rd: t, imm: 0 });
        let br = ib.emit(probe);
        let jend = ib.emit(Instr::Jmp { offset: 0 });
        let set_true = ib.here();
        ib.emit(Instr::LoadImm { rd: t, imm: 1 });
        let end = ib.here();
        ib.patch(br, set_true);
        ib.patch(jend, end);
        if negate {
            let one = self.temp()?;
            ib.emit(Instr::LoadImm { rd: one, imm: 1 });
            ib.emit(Instr::Sub { rd: t, ra: one, rb: t });
        }
        Ok(t)
    }

    /// No shift opcode exists, so `<<`/`>>` run a doubling/halving loop
    /// for `rb` iterations. `rb` is checked unsigned (§4.8), so no
    /// bound on iteration count beyond what the checker already allows.
    fn gen_shift(&mut self, ib: &mut InstrBuilder, ra: u8, rb: u8, t: u8, left: bool) -> Result<u8, CodegenError> {
        let counter = self.temp()?;
        ib.emit(Instr::Mov { rd: counter, ra: rb });
        ib.emit(Instr::Mov { rd: t, ra });
        let zero = self.temp()?;
        ib.emit(Instr::LoadImm { rd: zero, imm: 0 });
        let two = self.temp()?;
        ib.emit(Instr::LoadImm { rd: two, imm: 2 });
        let one = self.temp()?;
        ib.emit(Instr::LoadImm { rd: one, imm: 1 });
        let l_check = ib.here();
        let done = ib.emit(Instr::Beq { ra: counter, rb: zero, offset: 0 });
        if left {
            ib.emit(Instr::Mul { rd: t, ra: t, rb: two });
        } else {
            ib.emit(Instr::Div { rd: t, ra: t, rb: two });
        }
        ib.emit(Instr::Sub { rd: counter, ra: counter, rb: one });
        let back = ib.emit(Instr::Jmp { offset: 0 });
        ib.patch(back, l_check);
        let l_done = ib.here();
        ib.patch(done, l_done);
        Ok(t)
    }

    fn gen_call(&mut self, ib: &mut InstrBuilder, callee: &str, args: &[tast::Expr]) -> Result<u8, CodegenError> {
        if args.len() > ARG_REGS.len() {
            return Err(CodegenError::Unsupported(format!("{callee}: more than {} arguments", ARG_REGS.len())));
        }
        let mut arg_vals = Vec::with_capacity(args.len());
        for a in args {
            arg_vals.push(self.gen_expr(ib, a)?);
        }
        for (i, v) in arg_vals.iter().enumerate() {
            ib.emit(Instr::Mov { rd: ARG_REGS[i], ra: *v });
        }
        let symbol = if callee == "print" { PRINT_FUNC.to_string() } else { callee.to_string() };
        ib.emit_call(symbol);
        let t = self.temp()?;
        ib.emit(Instr::Mov { rd: t, ra: RET_REG });
        Ok(t)
    }

    fn gen_stmt(&mut self, ib: &mut InstrBuilder, s: &tast::Stmt) -> Result<(), CodegenError> {
        self.reset_temps();
        match s {
            tast::Stmt::Assign { lhs, rhs } => self.gen_assign(ib, lhs, rhs),
            tast::Stmt::VarDecl { names, types, values } => self.gen_var_decl(ib, names, types, values),
            tast::Stmt::If { cond, then, else_ } => self.gen_if(ib, cond, then, else_.as_deref()),
            tast::Stmt::For { init, cond, post, body } => {
                self.gen_for(ib, init.as_deref(), cond.as_ref(), post.as_deref(), body)
            }
            tast::Stmt::Break => self.gen_break(ib),
            tast::Stmt::Continue => self.gen_continue(ib),
            tast::Stmt::Return { values } => self.gen_return(ib, values),
            tast::Stmt::Expr(e) => {
                self.gen_expr(ib, e)?;
                Ok(())
            }
            tast::Stmt::Block(stmts) => self.gen_block(ib, stmts),
        }
    }

    fn gen_block(&mut self, ib: &mut InstrBuilder, stmts: &[tast::Stmt]) -> Result<(), CodegenError> {
        self.scope.push();
        for s in stmts {
            self.gen_stmt(ib, s)?;
        }
        self.scope.pop();
        Ok(())
    }

    fn gen_assign(&mut self, ib: &mut InstrBuilder, lhs: &[tast::Expr], rhs: &[tast::Expr]) -> Result<(), CodegenError> {
        for (l, r) in lhs.iter().zip(rhs.iter()) {
            let ty = l.r().ty();
            if self.is_scalar(ty) {
                let val = self.gen_expr(ib, r)?;
                let addr = self.gen_addr(ib, l)?;
                ib.emit(Instr::StoreWord { ra: addr, imm: 0, rs: val });
            } else {
                let src = self.gen_expr(ib, r)?;
                let dst = self.gen_addr(ib, l)?;
                let words = self.types().size_words(ty);
                self.copy_words(ib, dst, src, words)?;
            }
        }
        Ok(())
    }

    fn gen_var_decl(
        &mut self,
        ib: &mut InstrBuilder,
        names: &[String],
        types: &[TypeId],
        values: &[tast::Expr],
    ) -> Result<(), CodegenError> {
        let slots: Vec<u32> = names.iter().map(|_| self.alloc_slot()).collect();
        for (i, slot) in slots.iter().enumerate() {
            let ty = types[i];
            match values.get(i) {
                Some(v) if self.is_scalar(ty) => {
                    let val = self.gen_expr(ib, v)?;
                    self.store_slot(ib, *slot, val)?;
                }
                Some(v) => {
                    let src = self.gen_expr(ib, v)?;
                    let dst = self.slot_addr(ib, *slot)?;
                    self.copy_words(ib, dst, src, self.types().size_words(ty))?;
                }
                None if self.is_scalar(ty) => {
                    let zero = self.temp()?;
                    ib.emit(Instr::LoadImm { rd: zero, imm: 0 });
                    self.store_slot(ib, *slot, zero)?;
                }
                None => {
                    let dst = self.slot_addr(ib, *slot)?;
                    self.zero_words(ib, dst, self.types().size_words(ty))?;
                }
            }
        }
        for (name, slot) in names.iter().zip(slots) {
            self.scope.declare(name, slot);
        }
        Ok(())
    }

    fn gen_if(&mut self, ib: &mut InstrBuilder, cond: &tast::Expr, then: &tast::Stmt, else_: Option<&tast::Stmt>) -> Result<(), CodegenError> {
        let c = self.gen_expr(ib, cond)?;
        let zero = self.temp()?;
        ib.emit(Instr::LoadImm { rd: zero, imm: 0 });
        let jfalse = ib.emit(Instr::Beq { ra: c, rb: zero, offset: 0 });
        self.gen_stmt(ib, then)?;
        match else_ {
            Some(else_stmt) => {
                let jend = ib.emit(Instr::Jmp { offset: 0 });
                let else_start = ib.here();
                ib.patch(jfalse, else_start);
                self.gen_stmt(ib, else_stmt)?;
                let end = ib.here();
                ib.patch(jend, end);
            }
            None => {
                let end = ib.here();
                ib.patch(jfalse, end);
            }
        }
        Ok(())
    }

    fn gen_for(
        &mut self,
        ib: &mut InstrBuilder,
        init: Option<&tast::Stmt>,
        cond: Option<&tast::Expr>,
        post: Option<&tast::Stmt>,
        body: &tast::Stmt,
    ) -> Result<(), CodegenError> {
        self.scope.push();
        if let Some(i) = init {
            self.gen_stmt(ib, i)?;
        }
        let l_cond = ib.here();
        let mut jfalse_patch = None;
        if let Some(c) = cond {
            self.reset_temps();
            let cv = self.gen_expr(ib, c)?;
            let zero = self.temp()?;
            ib.emit(Instr::LoadImm { rd: zero, imm: 0 });
            jfalse_patch = Some(ib.emit(Instr::Beq { ra: cv, rb: zero, offset: 0 }));
        }

        self.loops.push(LoopCtx { break_patches: Vec::new(), continue_patches: Vec::new() });
        self.gen_stmt(ib, body)?;
        let l_post = ib.here();
        if let Some(p) = post {
            self.gen_stmt(ib, p)?;
        }
        let back = ib.emit(Instr::Jmp { offset: 0 });
        ib.patch(back, l_cond);
        let l_end = ib.here();
        if let Some(jf) = jfalse_patch {
            ib.patch(jf, l_end);
        }
        let ctx = self.loops.pop().expect("just pushed");
        for p in ctx.break_patches {
            ib.patch(p, l_end);
        }
        for p in ctx.continue_patches {
            ib.patch(p, l_post);
        }
        self.scope.pop();
        Ok(())
    }

    fn gen_break(&mut self, ib: &mut InstrBuilder) -> Result<(), CodegenError> {
        let idx = ib.emit(Instr::Jmp { offset: 0 });
        self.loops
            .last_mut()
            .ok_or_else(|| CodegenError::Unsupported("break outside a loop".into()))?
            .break_patches
            .push(idx);
        Ok(())
    }

    fn gen_continue(&mut self, ib: &mut InstrBuilder) -> Result<(), CodegenError> {
        let idx = ib.emit(Instr::Jmp { offset: 0 });
        self.loops
            .last_mut()
            .ok_or_else(|| CodegenError::Unsupported("continue outside a loop".into()))?
            .continue_patches
            .push(idx);
        Ok(())
    }

    fn gen_return(&mut self, ib: &mut InstrBuilder, values: &[tast::Expr]) -> Result<(), CodegenError> {
        if let Some(v) = values.first() {
            let val = self.gen_expr(ib, v)?;
            ib.emit(Instr::Mov { rd: RET_REG, ra: val });
        }
        emit_epilogue(ib, self.frame_bytes);
        ib.emit(Instr::Ret);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::check_package;
    use crate::parser::Parser;
    use crate::resolve::declare_top_level;
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

    fn run_source(src: &str) -> String {
        let (file, pdiags) = Parser::new("t.g", src).parse_file();
        assert!(pdiags.is_empty(), "{:?}", pdiags.as_slice());
        let (scope, rdiags) = declare_top_level(std::slice::from_ref(&file));
        assert!(rdiags.is_empty(), "{:?}", rdiags.as_slice());
        let (pkg, cdiags) = check_package("main", std::slice::from_ref(&file), scope.symbols, &HashMap::new());
        assert!(cdiags.is_empty(), "{:?}", cdiags.as_slice());

        let user_lib = compile_package(&pkg).unwrap();
        let libs = [user_lib, crate::runtime::library()];
        let (section, entry) = vmx_image::link(&libs, 0x1000, "main").unwrap();

        let out = SharedOutput::default();
        let config = vmx_machine::Config {
            output: Box::new(out.clone()),
            init_pc: entry,
            ..Default::default()
        };
        let mut machine = vmx_machine::Machine::new(config);
        machine.write_bytes(section.addr, &section.bytes).unwrap();
        machine.set_pc(entry);
        let (_, exc) = machine.run(100_000);
        assert_eq!(exc.map(|e| e.kind), Some(vmx_machine::ExceptionKind::Halt));

        String::from_utf8(out.0.borrow().clone()).unwrap()
    }

    #[test]
    fn prints_an_int_literal() {
        assert_eq!(run_source("func main() { print(3) }"), "3\n");
    }

    #[test]
    fn prints_the_sum_of_two_locals() {
        assert_eq!(run_source("func main() { var a int = 2; var b int = 3; print(a + b) }"), "5\n");
    }

    #[test]
    fn for_loop_prints_each_iteration() {
        let src = "func main() { for i := 0; i < 3; i = i + 1 { print(i) } }";
        assert_eq!(run_source(src), "0\n1\n2\n");
    }

    #[test]
    fn if_else_picks_the_right_branch() {
        let src = "func main() { var a int = 5; if a > 3 { print(1) } else { print(0) } }";
        assert_eq!(run_source(src), "1\n");
    }

    #[test]
    fn break_exits_the_loop_early() {
        let src = "func main() { for i := 0; i < 10; i = i + 1 { if i == 2 { break } print(i) } }";
        assert_eq!(run_source(src), "0\n1\n");
    }

    #[test]
    fn continue_skips_the_rest_of_the_body() {
        let src = "func main() { for i := 0; i < 4; i = i + 1 { if i == 1 { continue } print(i) } }";
        assert_eq!(run_source(src), "0\n2\n3\n");
    }

    #[test]
    fn calling_a_sibling_function_returns_its_result() {
        let src = "func add(a int, b int) int { return a + b } func main() { print(add(2, 40)) }";
        assert_eq!(run_source(src), "42\n");
    }
}
