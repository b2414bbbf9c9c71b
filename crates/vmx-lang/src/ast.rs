//! The untyped AST produced by the parser and consumed by the
//! resolver/checker. Per §1, shapes here are assumed by the rest of the
//! pipeline rather than being a deep contract of the parser itself.

use vmx_syms::Pos;

#[derive(Debug, Clone)]
pub enum TypeExpr {
    Named(String, Pos),
    Pointer(Box<TypeExpr>),
    Array(u32, Box<TypeExpr>),
    Slice(Box<TypeExpr>),
}

#[derive(Debug, Clone)]
pub enum Expr {
    Ident(String, Pos),
    Int(i64, Pos),
    Str(String, Pos),
    Bool(bool, Pos),
    Unary {
        op: String,
        op_pos: Pos,
        expr: Box<Expr>,
    },
    Binary {
        a: Box<Expr>,
        op: String,
        op_pos: Pos,
        b: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        pos: Pos,
    },
    Index {
        array: Box<Expr>,
        index: Box<Expr>,
        pos: Pos,
    },
    Slice {
        array: Box<Expr>,
        lo: Option<Box<Expr>>,
        hi: Option<Box<Expr>>,
        pos: Pos,
    },
    Member {
        expr: Box<Expr>,
        name: String,
        pos: Pos,
    },
    Star {
        expr: Box<Expr>,
        pos: Pos,
    },
    List(Vec<Expr>),
}

impl Expr {
    pub fn pos(&self) -> Pos {
        match self {
            Expr::Ident(_, p) | Expr::Int(_, p) | Expr::Str(_, p) | Expr::Bool(_, p) => p.clone(),
            Expr::Unary { op_pos, .. } => op_pos.clone(),
            Expr::Binary { op_pos, .. } => op_pos.clone(),
            Expr::Call { pos, .. } => pos.clone(),
            Expr::Index { pos, .. } => pos.clone(),
            Expr::Slice { pos, .. } => pos.clone(),
            Expr::Member { pos, .. } => pos.clone(),
            Expr::Star { pos, .. } => pos.clone(),
            Expr::List(exprs) => exprs.first().map(|e| e.pos()).unwrap_or(Pos::new("", 0, 0)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Assign {
        lhs: Vec<Expr>,
        rhs: Vec<Expr>,
        pos: Pos,
    },
    ShortDecl {
        names: Vec<(String, Pos)>,
        rhs: Vec<Expr>,
        pos: Pos,
    },
    VarDecl {
        decl: VarDecl,
    },
    If {
        cond: Expr,
        then: Box<Stmt>,
        else_: Option<Box<Stmt>>,
        pos: Pos,
    },
    For {
        init: Option<Box<Stmt>>,
        cond: Option<Expr>,
        post: Option<Box<Stmt>>,
        body: Box<Stmt>,
        pos: Pos,
    },
    Break(Pos),
    Continue(Pos),
    Return {
        values: Vec<Expr>,
        pos: Pos,
    },
    Expr(Expr),
    Block(Vec<Stmt>),
}

#[derive(Debug, Clone)]
pub struct VarDecl {
    pub names: Vec<(String, Pos)>,
    pub ty: Option<TypeExpr>,
    pub values: Vec<Expr>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub pos: Pos,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub pos: Pos,
    pub params: Vec<Param>,
    pub results: Vec<TypeExpr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub struct Field {
    pub name: String,
    pub pos: Pos,
    pub ty: TypeExpr,
}

#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: String,
    pub pos: Pos,
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub path: String,
    pub local_name: String,
    pub pos: Pos,
}

#[derive(Debug, Clone, Default)]
pub struct File {
    pub funcs: Vec<FuncDecl>,
    pub structs: Vec<StructDecl>,
    pub vars: Vec<VarDecl>,
    pub imports: Vec<ImportDecl>,
}
