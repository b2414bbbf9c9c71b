//! Struct ordering and the statement/expression type checker (§4.8,
//! §4.9): pass B of the resolver, folded into the same walk that
//! assigns every expression its [`tast::Ref`].
//!
//! Grounded on `pl/sempass/struct.go` (struct dependency collection +
//! `toposort.Sorter`), `pl/sempass/bool_op.go` (boolean unary/binary
//! rules), `pl/sempass/shift_op.go` ("shift amount must be unsigned")
//! and `pl/sempass/star.go` (pointer dereference) from
//! `examples/original_source/`.

use std::collections::HashMap;

use vmx_syms::{Diagnostics, Pos, SymKind, Symbol, ScopeStack, SymbolTable, Sorter};

use crate::ast;
use crate::tast;
use crate::types::{Type, TypeArena, TypeId};

/// A primitive-only shorthand for a function signature, used to
/// describe an imported package's exports without sharing the
/// importing package's `TypeArena` (each package owns its own arena;
/// translating a `TypeId` across arenas would need a richer import
/// format — see DESIGN.md). Cross-package calls in this subset are
/// therefore limited to functions whose params/results are all
/// primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prim {
    Int,
    Uint,
    Bool,
}

#[derive(Debug, Clone)]
pub struct FuncSig {
    pub params: Vec<Prim>,
    pub results: Vec<Prim>,
}

/// What a checked package exposes to packages that import it.
#[derive(Debug, Clone, Default)]
pub struct PackageExports {
    pub funcs: HashMap<String, FuncSig>,
}

/// One fully checked function, ready for `codegen`.
#[derive(Debug, Clone)]
pub struct CheckedFunc {
    pub name: String,
    pub params: Vec<(String, TypeId)>,
    pub results: Vec<TypeId>,
    pub body: Vec<tast::Stmt>,
}

/// The output of checking one package: its type arena (owns every
/// struct/pointer/array/slice type the package declared or used), its
/// structs in dependency order, and every checked function.
pub struct CheckedPackage {
    pub types: TypeArena,
    pub struct_order: Vec<String>,
    pub funcs: Vec<CheckedFunc>,
    pub exports: PackageExports,
}

struct Checker<'a> {
    pkg_path: &'a str,
    types: TypeArena,
    structs: HashMap<String, TypeId>,
    imports: &'a HashMap<String, (String, PackageExports)>,
    diags: Diagnostics,
    loop_depth: u32,
}

/// Checks one package's files against its resolved imports, producing
/// the checked package plus every diagnostic found. Never aborts early
/// — a package with errors still returns as much of a checked tree as
/// could be built, per §4.9's accumulate-don't-throw rule.
pub fn check_package(
    pkg_path: &str,
    files: &[ast::File],
    package_scope: SymbolTable,
    imports: &HashMap<String, (String, PackageExports)>,
) -> (CheckedPackage, Diagnostics) {
    let mut checker = Checker {
        pkg_path,
        types: TypeArena::new(),
        structs: HashMap::new(),
        imports,
        diags: Diagnostics::new(),
        loop_depth: 0,
    };

    let mut package_scope = package_scope;
    // `print` is predeclared in every package unless a file shadows it
    // with its own top-level declaration (§4.6 "print is provided by
    // the always-linked builtin library").
    let print_int = checker.types.int();
    let print_void = checker.types.void();
    let print_ty = checker.types.func(vec![print_int], vec![]);
    let _ = print_void;
    if package_scope
        .declare(Symbol::new("print", SymKind::Func, Pos::new("<builtin>", 0, 0)).with_type(print_ty))
        .is_none()
    {
        package_scope.set_type("print", print_ty);
    }

    let struct_order = checker.declare_and_order_structs(files, &mut package_scope);
    checker.type_struct_fields(files, &struct_order);
    checker.declare_func_signatures(files, &mut package_scope);

    let mut funcs = Vec::new();
    for file in files {
        for f in &file.funcs {
            if f.name == "print" {
                continue; // user already collided with the builtin; diagnostic raised when declared.
            }
            funcs.push(checker.check_func(f, &package_scope));
        }
    }

    let exports = checker.build_exports(&package_scope);

    (
        CheckedPackage {
            types: checker.types,
            struct_order,
            funcs,
            exports,
        },
        checker.diags,
    )
}

impl<'a> Checker<'a> {
    /// Collects every struct's direct same-package value-embedded field
    /// dependencies and orders them with [`Sorter`] (§4.8). A struct
    /// referenced only through a pointer/array-of-pointer/slice field
    /// does not count as a dependency — that's what lets a pointer
    /// field break an otherwise-cyclic pair of struct declarations.
    fn declare_and_order_structs(&mut self, files: &[ast::File], package_scope: &mut SymbolTable) -> Vec<String> {
        // First pass: declare every struct's placeholder + pointer type
        // so that forward references (A has a pointer to B, B is
        // declared after A in source) resolve.
        for file in files {
            for s in &file.structs {
                if self.structs.contains_key(&s.name) {
                    continue; // duplicate; already flagged by pass A.
                }
                let (struct_id, _ptr_id) = self.types.declare_struct(s.name.clone());
                self.structs.insert(s.name.clone(), struct_id);
                package_scope.set_type(&s.name, struct_id);
            }
        }

        let mut sorter = Sorter::new("struct");
        for file in files {
            for s in &file.structs {
                let deps = s
                    .fields
                    .iter()
                    .filter_map(|f| match &f.ty {
                        ast::TypeExpr::Named(name, _) if self.structs.contains_key(name) => Some(name.clone()),
                        _ => None,
                    })
                    .collect();
                sorter.add_node(s.name.clone(), s.pos.clone(), deps);
            }
        }

        match sorter.sort() {
            Ok(order) => order,
            Err(cycle) => {
                if let Some((_, pos)) = cycle.participants.first() {
                    self.diags.push(pos.clone(), cycle.message());
                }
                // Fall back to declaration order so the rest of the
                // package can still be checked.
                files.iter().flat_map(|f| f.structs.iter().map(|s| s.name.clone())).collect()
            }
        }
    }

    fn type_struct_fields(&mut self, files: &[ast::File], order: &[String]) {
        let decls: HashMap<&str, &ast::StructDecl> = files
            .iter()
            .flat_map(|f| f.structs.iter())
            .map(|s| (s.name.as_str(), s))
            .collect();
        for name in order {
            let Some(decl) = decls.get(name.as_str()) else { continue };
            let mut fields = Vec::new();
            let mut field_syms = SymbolTable::new();
            for f in &decl.fields {
                let Some(ty) = self.resolve_type(&f.ty) else { continue };
                fields.push((f.name.clone(), ty));
                if field_syms.declare(Symbol::new(f.name.clone(), SymKind::Field, f.pos.clone()).with_type(ty)).is_some() {
                    self.diags.push(f.pos.clone(), format!("duplicate field {:?}", f.name));
                }
            }
            let struct_id = self.structs[name];
            let st = self.types.struct_mut(struct_id);
            st.fields = fields;
            st.field_syms = field_syms;
        }
    }

    /// Resolves an `ast::TypeExpr` to a `TypeId` in this package's
    /// arena. A pointer to a struct reuses that struct's single
    /// reciprocal pointer type rather than minting a fresh one (§9).
    fn resolve_type(&mut self, te: &ast::TypeExpr) -> Option<TypeId> {
        match te {
            ast::TypeExpr::Named(name, pos) => {
                if let Some(id) = self.types.named(name) {
                    Some(id)
                } else if let Some(&id) = self.structs.get(name) {
                    Some(id)
                } else {
                    self.diags.push(pos.clone(), format!("unknown type {name:?}"));
                    None
                }
            }
            ast::TypeExpr::Pointer(inner) => {
                let inner_id = self.resolve_type(inner)?;
                if let Type::Struct(st) = self.types.get(inner_id) {
                    Some(st.pointer_type)
                } else {
                    Some(self.types.pointer(inner_id))
                }
            }
            ast::TypeExpr::Array(n, inner) => {
                let inner_id = self.resolve_type(inner)?;
                Some(self.types.array(inner_id, *n))
            }
            ast::TypeExpr::Slice(inner) => {
                let inner_id = self.resolve_type(inner)?;
                Some(self.types.slice(inner_id))
            }
        }
    }

    fn declare_func_signatures(&mut self, files: &[ast::File], package_scope: &mut SymbolTable) {
        for file in files {
            for f in &file.funcs {
                let params: Vec<TypeId> = f.params.iter().filter_map(|p| self.resolve_type(&p.ty)).collect();
                let results: Vec<TypeId> = f.results.iter().filter_map(|t| self.resolve_type(t)).collect();
                let func_ty = self.types.func(params, results);
                package_scope.set_type(&f.name, func_ty);
            }
        }
    }

    fn check_func(&mut self, f: &ast::FuncDecl, package_scope: &SymbolTable) -> CheckedFunc {
        let params: Vec<(String, TypeId)> = f
            .params
            .iter()
            .filter_map(|p| self.resolve_type(&p.ty).map(|t| (p.name.clone(), t)))
            .collect();
        let results: Vec<TypeId> = f.results.iter().filter_map(|t| self.resolve_type(t)).collect();

        let mut scope = ScopeStack::new(package_scope.clone());
        scope.push_block();
        for (name, ty) in &params {
            scope.declare(Symbol::new(name.clone(), SymKind::Param, f.pos.clone()).with_type(*ty));
        }

        let body = self.check_stmts(&f.body, &mut scope, &results);
        scope.pop_block();

        CheckedFunc {
            name: f.name.clone(),
            params,
            results,
            body,
        }
    }

    fn check_stmts(&mut self, stmts: &[ast::Stmt], scope: &mut ScopeStack, results: &[TypeId]) -> Vec<tast::Stmt> {
        stmts.iter().map(|s| self.check_stmt(s, scope, results)).collect()
    }

    fn check_stmt(&mut self, stmt: &ast::Stmt, scope: &mut ScopeStack, results: &[TypeId]) -> tast::Stmt {
        match stmt {
            ast::Stmt::Block(stmts) => {
                scope.push_block();
                let out = self.check_stmts(stmts, scope, results);
                scope.pop_block();
                tast::Stmt::Block(out)
            }
            ast::Stmt::VarDecl { decl } => self.check_var_decl(decl, scope),
            ast::Stmt::ShortDecl { names, rhs, pos } => {
                let values: Vec<tast::Expr> = rhs.iter().map(|e| self.check_expr(e, scope)).collect();
                let mut tys = Vec::new();
                for (i, (name, npos)) in names.iter().enumerate() {
                    let ty = values.get(i).map(|v| v.r().ty()).unwrap_or_else(|| self.types.int());
                    tys.push(ty);
                    if scope
                        .declare(Symbol::new(name.clone(), SymKind::Var, npos.clone()).with_type(ty))
                        .is_some()
                    {
                        self.diags.push(npos.clone(), format!("{name} redeclared in this block"));
                    }
                }
                let _ = pos;
                tast::Stmt::VarDecl {
                    names: names.iter().map(|(n, _)| n.clone()).collect(),
                    types: tys,
                    values,
                }
            }
            ast::Stmt::Assign { lhs, rhs, pos } => {
                let lhs_checked: Vec<tast::Expr> = lhs.iter().map(|e| self.check_expr(e, scope)).collect();
                for l in &lhs_checked {
                    if !l.r().addressable() {
                        self.diags.push(l.pos(), "cannot assign to a non-addressable expression".to_string());
                    }
                }
                let rhs_checked: Vec<tast::Expr> = rhs.iter().map(|e| self.check_expr(e, scope)).collect();
                if lhs_checked.len() != rhs_checked.len() {
                    self.diags.push(pos.clone(), "assignment count mismatch".to_string());
                }
                tast::Stmt::Assign { lhs: lhs_checked, rhs: rhs_checked }
            }
            ast::Stmt::If { cond, then, else_, pos } => {
                let cond = self.check_expr(cond, scope);
                if !self.types.is_bool(cond.r().ty()) {
                    self.diags.push(pos.clone(), "if condition must be bool".to_string());
                }
                let then = Box::new(self.check_stmt(then, scope, results));
                let else_ = else_.as_ref().map(|e| Box::new(self.check_stmt(e, scope, results)));
                tast::Stmt::If { cond, then, else_ }
            }
            ast::Stmt::For { init, cond, post, body, pos } => {
                scope.push_block();
                self.loop_depth += 1;
                let init = init.as_ref().map(|s| Box::new(self.check_stmt(s, scope, results)));
                let cond = cond.as_ref().map(|c| {
                    let c = self.check_expr(c, scope);
                    if !self.types.is_bool(c.r().ty()) {
                        self.diags.push(pos.clone(), "for condition must be bool".to_string());
                    }
                    c
                });
                let post = post.as_ref().map(|s| Box::new(self.check_stmt(s, scope, results)));
                let body = Box::new(self.check_stmt(body, scope, results));
                self.loop_depth -= 1;
                scope.pop_block();
                tast::Stmt::For { init, cond, post, body }
            }
            ast::Stmt::Break(pos) => {
                if self.loop_depth == 0 {
                    self.diags.push(pos.clone(), "break outside a loop".to_string());
                }
                tast::Stmt::Break
            }
            ast::Stmt::Continue(pos) => {
                if self.loop_depth == 0 {
                    self.diags.push(pos.clone(), "continue outside a loop".to_string());
                }
                tast::Stmt::Continue
            }
            ast::Stmt::Return { values, pos } => {
                let values: Vec<tast::Expr> = values.iter().map(|e| self.check_expr(e, scope)).collect();
                if values.len() != results.len() {
                    self.diags.push(pos.clone(), format!("expected {} return value(s), found {}", results.len(), values.len()));
                }
                tast::Stmt::Return { values }
            }
            ast::Stmt::Expr(e) => tast::Stmt::Expr(self.check_expr(e, scope)),
        }
    }

    fn check_var_decl(&mut self, decl: &ast::VarDecl, scope: &mut ScopeStack) -> tast::Stmt {
        let declared_ty = decl.ty.as_ref().and_then(|t| self.resolve_type(t));
        let values: Vec<tast::Expr> = decl.values.iter().map(|e| self.check_expr(e, scope)).collect();
        let mut tys = Vec::new();
        for (i, (name, pos)) in decl.names.iter().enumerate() {
            let ty = declared_ty.or_else(|| values.get(i).map(|v| v.r().ty())).unwrap_or_else(|| self.types.int());
            if let (Some(dty), Some(v)) = (declared_ty, values.get(i)) {
                if !self.types.assignable(dty, v.r().ty(), v.r().is_const()) {
                    self.diags.push(pos.clone(), format!("cannot assign {} to var of type {}", self.types.display(v.r().ty()), self.types.display(dty)));
                }
            }
            tys.push(ty);
            if scope
                .declare(Symbol::new(name.clone(), SymKind::Var, pos.clone()).with_type(ty))
                .is_some()
            {
                self.diags.push(pos.clone(), format!("{name} redeclared in this block"));
            }
        }
        tast::Stmt::VarDecl {
            names: decl.names.iter().map(|(n, _)| n.clone()).collect(),
            types: tys,
            values,
        }
    }

    fn check_expr(&mut self, e: &ast::Expr, scope: &mut ScopeStack) -> tast::Expr {
        match e {
            ast::Expr::Int(v, _) => tast::Expr::IntConst { value: *v, r: tast::Ref::single_const(self.types.int()) },
            ast::Expr::Bool(v, _) => tast::Expr::BoolConst { value: *v, r: tast::Ref::single_const(self.types.bool_()) },
            ast::Expr::Str(_, pos) => {
                self.diags.push(pos.clone(), "string literals are not yet supported outside call arguments".to_string());
                tast::Expr::IntConst { value: 0, r: tast::Ref::single_const(self.types.int()) }
            }
            ast::Expr::Ident(name, pos) => {
                let Some(sym) = scope.resolve(name) else {
                    self.diags.push(pos.clone(), format!("undefined: {name}"));
                    return tast::Expr::Ident { name: name.clone(), r: tast::Ref::single(self.types.int()), pos: pos.clone() };
                };
                let ty = sym.type_id.unwrap_or_else(|| self.types.int());
                let r = if sym.addressable {
                    tast::Ref::single_addressable(ty)
                } else {
                    tast::Ref::single(ty)
                };
                tast::Expr::Ident { name: name.clone(), r, pos: pos.clone() }
            }
            ast::Expr::Unary { op, op_pos, expr } => self.check_unary(op, op_pos, expr, scope),
            ast::Expr::Binary { a, op, op_pos, b } => self.check_binary(a, op, op_pos, b, scope),
            ast::Expr::Star { expr, pos } => {
                let inner = self.check_expr(expr, scope);
                match self.types.get(inner.r().ty()) {
                    Type::Pointer(target) => {
                        let target = *target;
                        tast::Expr::Star { expr: Box::new(inner), r: tast::Ref::single_addressable(target), pos: pos.clone() }
                    }
                    _ => {
                        self.diags.push(pos.clone(), "cannot dereference a non-pointer".to_string());
                        tast::Expr::Star { expr: Box::new(inner), r: tast::Ref::single(self.types.int()), pos: pos.clone() }
                    }
                }
            }
            ast::Expr::Call { func, args, pos } => self.check_call(func, args, pos, scope),
            ast::Expr::Index { array, index, pos } => {
                let array_c = self.check_expr(array, scope);
                let index_c = self.check_expr(index, scope);
                if !self.types.is_integer(index_c.r().ty()) {
                    self.diags.push(pos.clone(), "index must be an integer".to_string());
                }
                let elem = match self.types.get(array_c.r().ty()) {
                    Type::Array(inner, _) | Type::Slice(inner) => *inner,
                    _ => {
                        self.diags.push(pos.clone(), "cannot index a non-array/slice value".to_string());
                        self.types.int()
                    }
                };
                tast::Expr::Index { array: Box::new(array_c), index: Box::new(index_c), r: tast::Ref::single_addressable(elem), pos: pos.clone() }
            }
            ast::Expr::Slice { array, lo, hi, pos } => {
                let array_c = self.check_expr(array, scope);
                let lo_c = lo.as_ref().map(|e| Box::new(self.check_expr(e, scope)));
                let hi_c = hi.as_ref().map(|e| Box::new(self.check_expr(e, scope)));
                let elem = match self.types.get(array_c.r().ty()) {
                    Type::Array(inner, _) | Type::Slice(inner) => *inner,
                    _ => {
                        self.diags.push(pos.clone(), "cannot slice a non-array/slice value".to_string());
                        self.types.int()
                    }
                };
                let slice_ty = self.types.slice(elem);
                tast::Expr::Slice { array: Box::new(array_c), lo: lo_c, hi: hi_c, r: tast::Ref::single(slice_ty), pos: pos.clone() }
            }
            ast::Expr::Member { expr, name, pos } => self.check_member(expr, name, pos, scope, false),
            ast::Expr::List(exprs) => {
                let mut r = tast::Ref::void();
                let mut checked = Vec::new();
                for e in exprs {
                    let c = self.check_expr(e, scope);
                    r = r.append(c.r().clone());
                    checked.push(c);
                }
                tast::Expr::List { exprs: checked, r }
            }
        }
    }

    fn check_unary(&mut self, op: &str, op_pos: &Pos, expr: &ast::Expr, scope: &mut ScopeStack) -> tast::Expr {
        let inner = self.check_expr(expr, scope);
        let ty = inner.r().ty();
        match op {
            "!" => {
                if !self.types.is_bool(ty) {
                    self.diags.push(op_pos.clone(), "operator ! requires a bool operand".to_string());
                }
                tast::Expr::Op { a: None, op: op.into(), b: Box::new(inner), r: tast::Ref::single(self.types.bool_()), pos: op_pos.clone() }
            }
            "-" => {
                if !self.types.is_integer(ty) {
                    self.diags.push(op_pos.clone(), "unary - requires an integer operand".to_string());
                }
                tast::Expr::Op { a: None, op: op.into(), b: Box::new(inner), r: tast::Ref::single(ty), pos: op_pos.clone() }
            }
            _ => {
                self.diags.push(op_pos.clone(), format!("unknown unary operator {op:?}"));
                tast::Expr::Op { a: None, op: op.into(), b: Box::new(inner), r: tast::Ref::single(self.types.int()), pos: op_pos.clone() }
            }
        }
    }

    fn check_binary(&mut self, a: &ast::Expr, op: &str, op_pos: &Pos, b: &ast::Expr, scope: &mut ScopeStack) -> tast::Expr {
        let a_c = self.check_expr(a, scope);
        let b_c = self.check_expr(b, scope);
        let (ta, tb) = (a_c.r().ty(), b_c.r().ty());

        let result_ty = match op {
            "+" | "-" | "*" | "/" => {
                if !self.types.is_integer(ta) || !self.types.is_integer(tb) {
                    self.diags.push(op_pos.clone(), format!("operator {op} requires integer operands"));
                } else if !self.types.equal(ta, tb) && !a_c.r().is_const() && !b_c.r().is_const() {
                    self.diags.push(op_pos.clone(), format!("mismatched types for {op}: {} and {}", self.types.display(ta), self.types.display(tb)));
                }
                ta
            }
            "<<" | ">>" => {
                if !self.types.is_integer(ta) {
                    self.diags.push(op_pos.clone(), "shift requires an integer left operand".to_string());
                }
                // Grounded on shift_op.go: the shift amount must be unsigned.
                if !self.types.is_unsigned(tb) {
                    self.diags.push(op_pos.clone(), "shift amount must be unsigned".to_string());
                }
                ta
            }
            "==" | "!=" | "<" | "<=" | ">" | ">=" => {
                if !self.types.equal(ta, tb) && !(self.types.is_integer(ta) && self.types.is_integer(tb)) {
                    self.diags.push(op_pos.clone(), format!("cannot compare {} and {}", self.types.display(ta), self.types.display(tb)));
                }
                self.types.bool_()
            }
            "&&" | "||" => {
                if !self.types.is_bool(ta) || !self.types.is_bool(tb) {
                    self.diags.push(op_pos.clone(), format!("operator {op} requires bool operands"));
                }
                self.types.bool_()
            }
            _ => {
                self.diags.push(op_pos.clone(), format!("unknown binary operator {op:?}"));
                ta
            }
        };

        tast::Expr::Op {
            a: Some(Box::new(a_c)),
            op: op.into(),
            b: Box::new(b_c),
            r: tast::Ref::single(result_ty),
            pos: op_pos.clone(),
        }
    }

    fn check_member(&mut self, expr: &ast::Expr, name: &str, pos: &Pos, scope: &mut ScopeStack, _in_call: bool) -> tast::Expr {
        let base = self.check_expr(expr, scope);
        let base_ty = base.r().ty();
        let struct_id = match self.types.get(base_ty) {
            Type::Struct(_) => Some(base_ty),
            Type::Pointer(inner) if matches!(self.types.get(*inner), Type::Struct(_)) => Some(*inner),
            _ => None,
        };
        let Some(struct_id) = struct_id else {
            self.diags.push(pos.clone(), format!("value has no field {name:?}"));
            return tast::Expr::Member { expr: Box::new(base), name: name.into(), r: tast::Ref::single(self.types.int()), pos: pos.clone() };
        };
        let field_ty = match self.types.get(struct_id) {
            Type::Struct(st) => st.field_syms.lookup(name).and_then(|s| s.type_id),
            _ => None,
        };
        let Some(field_ty) = field_ty else {
            self.diags.push(pos.clone(), format!("no field {name:?} on this struct"));
            return tast::Expr::Member { expr: Box::new(base), name: name.into(), r: tast::Ref::single(self.types.int()), pos: pos.clone() };
        };
        tast::Expr::Member { expr: Box::new(base), name: name.into(), r: tast::Ref::single_addressable(field_ty), pos: pos.clone() }
    }

    /// Calls are resolved to a concrete link symbol directly (§4.6):
    /// `print(...)`, a same-package function, or `pkg.Func(...)` where
    /// `pkg` names an import.
    fn check_call(&mut self, func: &ast::Expr, args: &[ast::Expr], pos: &Pos, scope: &mut ScopeStack) -> tast::Expr {
        let args_c: Vec<tast::Expr> = args.iter().map(|a| self.check_expr(a, scope)).collect();

        if let ast::Expr::Member { expr, name, .. } = func {
            if let ast::Expr::Ident(alias, _) = expr.as_ref() {
                if let Some((pkg_path, exports)) = self.imports.get(alias) {
                    let pkg_path = pkg_path.clone();
                    return self.check_call_against_sig(
                        format!("{pkg_path}.{name}"),
                        exports.funcs.get(name).cloned(),
                        args_c,
                        pos,
                        name,
                    );
                }
            }
        }

        if let ast::Expr::Ident(name, _) = func {
            let callee = name.clone();
            let sig = scope.resolve(name).and_then(|s| s.type_id).map(|t| self.types.get(t).clone());
            let results = match sig {
                Some(Type::Func(_, results)) => results,
                _ => {
                    if name != "print" {
                        self.diags.push(pos.clone(), format!("{name} is not callable"));
                    }
                    vec![]
                }
            };
            let r = match results.len() {
                0 => tast::Ref::void(),
                _ => tast::Ref::single(results[0]),
            };
            return tast::Expr::Call { callee, args: args_c, r, pos: pos.clone() };
        }

        self.diags.push(pos.clone(), "unsupported call target".to_string());
        tast::Expr::Call { callee: String::new(), args: args_c, r: tast::Ref::void(), pos: pos.clone() }
    }

    fn check_call_against_sig(
        &mut self,
        callee: String,
        sig: Option<FuncSig>,
        args: Vec<tast::Expr>,
        pos: &Pos,
        name: &str,
    ) -> tast::Expr {
        let Some(sig) = sig else {
            self.diags.push(pos.clone(), format!("undefined function {name:?} in imported package"));
            return tast::Expr::Call { callee, args, r: tast::Ref::void(), pos: pos.clone() };
        };
        if args.len() != sig.params.len() {
            self.diags.push(pos.clone(), format!("{name} expects {} argument(s), found {}", sig.params.len(), args.len()));
        }
        let r = match sig.results.len() {
            0 => tast::Ref::void(),
            _ => tast::Ref::single(self.prim_type(sig.results[0])),
        };
        tast::Expr::Call { callee, args, r, pos: pos.clone() }
    }

    fn prim_type(&self, p: Prim) -> TypeId {
        match p {
            Prim::Int => self.types.int(),
            Prim::Uint => self.types.uint(),
            Prim::Bool => self.types.bool_(),
        }
    }

    fn build_exports(&self, package_scope: &SymbolTable) -> PackageExports {
        let mut exports = PackageExports::default();
        for sym in package_scope.iter() {
            if sym.kind != SymKind::Func {
                continue;
            }
            let Some(type_id) = sym.type_id else { continue };
            let Type::Func(params, results) = self.types.get(type_id) else { continue };
            let Some(params) = params.iter().map(|t| self.as_prim(*t)).collect::<Option<Vec<_>>>() else { continue };
            let Some(results) = results.iter().map(|t| self.as_prim(*t)).collect::<Option<Vec<_>>>() else { continue };
            exports.funcs.insert(sym.name.clone(), FuncSig { params, results });
        }
        let _ = self.pkg_path;
        exports
    }

    fn as_prim(&self, t: TypeId) -> Option<Prim> {
        match self.types.get(t) {
            Type::Int => Some(Prim::Int),
            Type::Uint => Some(Prim::Uint),
            Type::Bool => Some(Prim::Bool),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn check_src(src: &str) -> (CheckedPackage, Diagnostics) {
        let (file, pdiags) = Parser::new("t.g", src).parse_file();
        assert!(pdiags.is_empty(), "{:?}", pdiags.as_slice());
        let (scope, rdiags) = crate::resolve::declare_top_level(std::slice::from_ref(&file));
        assert!(rdiags.is_empty());
        check_package("main", &[file], scope.symbols, &HashMap::new())
    }

    #[test]
    fn print_builtin_call_type_checks() {
        let (_pkg, diags) = check_src("func main() { print(3) }");
        assert!(diags.is_empty(), "{:?}", diags.as_slice());
    }

    #[test]
    fn shift_by_a_signed_amount_is_rejected() {
        let (_pkg, diags) = check_src("func main() { var a int = 1; var b int = 2; a = a << b }");
        assert!(!diags.is_empty());
    }

    #[test]
    fn bool_operators_require_bool_operands() {
        let (_pkg, diags) = check_src("func main() { var a int = 1; if a { } }");
        assert!(!diags.is_empty());
    }

    #[test]
    fn struct_cycle_is_rejected() {
        let (_pkg, diags) = check_src("struct A { b B } struct B { a A } func main() { }");
        assert!(!diags.is_empty());
        assert!(diags.as_slice()[0].message.contains("cyclic"));
    }

    #[test]
    fn pointer_field_does_not_create_a_cycle() {
        let (_pkg, diags) = check_src("struct A { b *B } struct B { a *A } func main() { }");
        assert!(diags.is_empty(), "{:?}", diags.as_slice());
    }
}
