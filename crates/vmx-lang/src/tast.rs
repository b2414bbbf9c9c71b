//! The typed AST (§3, §4.9): the output of the type checker. Every
//! expression node carries a [`Ref`], an ordered list of one or more
//! `(type, addressable, const)` triples.

use vmx_syms::Pos;

use crate::types::TypeId;

#[derive(Debug, Clone, Copy)]
pub struct RefSlot {
    pub ty: TypeId,
    pub addressable: bool,
    pub is_const: bool,
}

/// A list of value slots attached to a typed expression. Length 1 for
/// a single-value expression; length > 1 for multi-return calls or
/// comma expression lists (§3).
#[derive(Debug, Clone, Default)]
pub struct Ref(pub Vec<RefSlot>);

impl Ref {
    pub fn single(ty: TypeId) -> Self {
        Ref(vec![RefSlot { ty, addressable: false, is_const: false }])
    }

    pub fn single_addressable(ty: TypeId) -> Self {
        Ref(vec![RefSlot { ty, addressable: true, is_const: false }])
    }

    pub fn single_const(ty: TypeId) -> Self {
        Ref(vec![RefSlot { ty, addressable: false, is_const: true }])
    }

    pub fn void() -> Self {
        Ref(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn is_single(&self) -> bool {
        self.0.len() == 1
    }

    pub fn ty(&self) -> TypeId {
        self.0[0].ty
    }

    pub fn addressable(&self) -> bool {
        self.0[0].addressable
    }

    pub fn is_const(&self) -> bool {
        self.0[0].is_const
    }

    /// `ExprList`'s `Ref` length equals the sum of its children's `Ref`
    /// lengths (§3 invariant).
    pub fn append(mut self, other: Ref) -> Ref {
        self.0.extend(other.0);
        self
    }
}

/// A fully typed expression node. Constant int/bool literals carry
/// their value inline for the checker's constant-folding rules (shift
/// typing, constant-overflow assignability) and for codegen.
#[derive(Debug, Clone)]
pub enum Expr {
    IntConst { value: i64, r: Ref },
    BoolConst { value: bool, r: Ref },
    Ident { name: String, r: Ref, pos: Pos },
    Op { a: Option<Box<Expr>>, op: String, b: Box<Expr>, r: Ref, pos: Pos },
    Star { expr: Box<Expr>, r: Ref, pos: Pos },
    TypeExpr { r: Ref },
    /// `callee` is already the fully linked symbol name (`"print"` for
    /// the builtin, `"path.Func"` for an import call, `"Func"` for a
    /// same-package call) — the checker resolves call targets to a
    /// concrete name since this subset has no first-class function
    /// values.
    Call { callee: String, args: Vec<Expr>, r: Ref, pos: Pos },
    Index { array: Box<Expr>, index: Box<Expr>, r: Ref, pos: Pos },
    Slice { array: Box<Expr>, lo: Option<Box<Expr>>, hi: Option<Box<Expr>>, r: Ref, pos: Pos },
    Member { expr: Box<Expr>, name: String, r: Ref, pos: Pos },
    List { exprs: Vec<Expr>, r: Ref },
}

impl Expr {
    pub fn r(&self) -> &Ref {
        match self {
            Expr::IntConst { r, .. }
            | Expr::BoolConst { r, .. }
            | Expr::Ident { r, .. }
            | Expr::Op { r, .. }
            | Expr::Star { r, .. }
            | Expr::TypeExpr { r }
            | Expr::Call { r, .. }
            | Expr::Index { r, .. }
            | Expr::Slice { r, .. }
            | Expr::Member { r, .. }
            | Expr::List { r, .. } => r,
        }
    }

    pub fn pos(&self) -> Pos {
        match self {
            Expr::IntConst { .. } | Expr::BoolConst { .. } | Expr::TypeExpr { .. } => {
                Pos::new("", 0, 0)
            }
            Expr::Ident { pos, .. }
            | Expr::Op { pos, .. }
            | Expr::Star { pos, .. }
            | Expr::Call { pos, .. }
            | Expr::Index { pos, .. }
            | Expr::Slice { pos, .. }
            | Expr::Member { pos, .. } => pos.clone(),
            Expr::List { exprs, .. } => exprs.first().map(|e| e.pos()).unwrap_or(Pos::new("", 0, 0)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign { lhs: Vec<Expr>, rhs: Vec<Expr> },
    VarDecl { names: Vec<String>, types: Vec<TypeId>, values: Vec<Expr> },
    If { cond: Expr, then: Box<Stmt>, else_: Option<Box<Stmt>> },
    For { init: Option<Box<Stmt>>, cond: Option<Expr>, post: Option<Box<Stmt>>, body: Box<Stmt> },
    Break,
    Continue,
    Return { values: Vec<Expr> },
    Expr(Expr),
    Block(Vec<Stmt>),
}
