//! Recursive-descent parser for G, producing the untyped AST in
//! [`crate::ast`]. See the module comment on [`crate::lexer`] for the
//! scope note this implementation falls under.

use vmx_syms::{Diagnostics, Pos};

use crate::ast::*;
use crate::lexer::{Lexer, TokKind, Token};

pub struct Parser {
    toks: Vec<Token>,
    pos: usize,
    pub diags: Diagnostics,
}

impl Parser {
    pub fn new(file: &str, src: &str) -> Self {
        Self {
            toks: Lexer::new(file, src).tokenize(),
            pos: 0,
            diags: Diagnostics::new(),
        }
    }

    fn cur(&self) -> &Token {
        &self.toks[self.pos]
    }

    fn cur_pos(&self) -> Pos {
        self.cur().pos.clone()
    }

    fn at_eof(&self) -> bool {
        self.cur().kind == TokKind::Eof
    }

    fn is(&self, lit: &str) -> bool {
        self.cur().lit == lit && self.cur().kind != TokKind::Eof
    }

    fn bump(&mut self) -> Token {
        let t = self.toks[self.pos].clone();
        if self.pos + 1 < self.toks.len() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, lit: &str) -> Option<Token> {
        if self.is(lit) {
            Some(self.bump())
        } else {
            self.diags.push(
                self.cur_pos(),
                format!("expected {lit:?}, found {:?}", self.cur().lit),
            );
            None
        }
    }

    fn ident(&mut self) -> Option<(String, Pos)> {
        if self.cur().kind == TokKind::Ident {
            let t = self.bump();
            Some((t.lit, t.pos))
        } else {
            self.diags
                .push(self.cur_pos(), format!("expected identifier, found {:?}", self.cur().lit));
            None
        }
    }

    /// Parses a whole file into a [`File`].
    pub fn parse_file(mut self) -> (File, Diagnostics) {
        let mut file = File::default();
        while !self.at_eof() {
            if self.is("import") {
                if let Some(i) = self.parse_import() {
                    file.imports.push(i);
                }
            } else if self.is("func") {
                if let Some(f) = self.parse_func() {
                    file.funcs.push(f);
                }
            } else if self.is("struct") {
                if let Some(s) = self.parse_struct() {
                    file.structs.push(s);
                }
            } else if self.is("var") {
                if let Some(v) = self.parse_var_decl() {
                    file.vars.push(v);
                }
            } else {
                self.diags
                    .push(self.cur_pos(), format!("unexpected top-level token {:?}", self.cur().lit));
                self.bump();
            }
        }
        (file, self.diags)
    }

    fn parse_import(&mut self) -> Option<ImportDecl> {
        let pos = self.cur_pos();
        self.expect("import")?;
        let tok = self.bump();
        let path = tok.lit.trim_matches('"').to_string();
        let local_name = path.rsplit('/').next().unwrap_or(&path).to_string();
        Some(ImportDecl {
            path,
            local_name,
            pos,
        })
    }

    fn parse_type(&mut self) -> Option<TypeExpr> {
        if self.is("*") {
            self.bump();
            return Some(TypeExpr::Pointer(Box::new(self.parse_type()?)));
        }
        if self.is("[") {
            self.bump();
            if self.is("]") {
                self.bump();
                return Some(TypeExpr::Slice(Box::new(self.parse_type()?)));
            }
            let n_tok = self.bump();
            let n: u32 = n_tok.lit.parse().unwrap_or(0);
            self.expect("]")?;
            return Some(TypeExpr::Array(n, Box::new(self.parse_type()?)));
        }
        let (name, pos) = self.ident()?;
        Some(TypeExpr::Named(name, pos))
    }

    fn parse_struct(&mut self) -> Option<StructDecl> {
        let pos = self.cur_pos();
        self.expect("struct")?;
        let (name, _) = self.ident()?;
        self.expect("{")?;
        let mut fields = Vec::new();
        while !self.is("}") && !self.at_eof() {
            let mut names = Vec::new();
            let (first, fpos) = self.ident()?;
            names.push((first, fpos));
            while self.is(",") {
                self.bump();
                names.push(self.ident()?);
            }
            let ty = self.parse_type()?;
            for (n, p) in names {
                fields.push(Field { name: n, pos: p, ty: ty.clone() });
            }
            if self.is(";") {
                self.bump();
            }
        }
        self.expect("}")?;
        Some(StructDecl { name, pos, fields })
    }

    fn parse_var_decl(&mut self) -> Option<VarDecl> {
        let pos = self.cur_pos();
        self.expect("var")?;
        let mut names = vec![self.ident()?];
        while self.is(",") {
            self.bump();
            names.push(self.ident()?);
        }
        let ty = if !self.is("=") {
            Some(self.parse_type()?)
        } else {
            None
        };
        let mut values = Vec::new();
        if self.is("=") {
            self.bump();
            values.push(self.parse_expr()?);
            while self.is(",") {
                self.bump();
                values.push(self.parse_expr()?);
            }
        }
        if self.is(";") {
            self.bump();
        }
        Some(VarDecl {
            names,
            ty,
            values,
            pos,
        })
    }

    fn parse_func(&mut self) -> Option<FuncDecl> {
        let pos = self.cur_pos();
        self.expect("func")?;
        let (name, _) = self.ident()?;
        self.expect("(")?;
        let mut params = Vec::new();
        while !self.is(")") && !self.at_eof() {
            let mut names = vec![self.ident()?];
            while self.is(",") && self.peek_is_ident_then_comma_or_type() {
                self.bump();
                names.push(self.ident()?);
            }
            let ty = self.parse_type()?;
            for (n, p) in names {
                params.push(Param { name: n, pos: p, ty: ty.clone() });
            }
            if self.is(",") {
                self.bump();
            }
        }
        self.expect(")")?;

        let mut results = Vec::new();
        if !self.is("{") {
            if self.is("(") {
                self.bump();
                while !self.is(")") {
                    results.push(self.parse_type()?);
                    if self.is(",") {
                        self.bump();
                    }
                }
                self.expect(")")?;
            } else {
                results.push(self.parse_type()?);
            }
        }

        let body = self.parse_block_stmts()?;
        Some(FuncDecl {
            name,
            pos,
            params,
            results,
            body,
        })
    }

    /// Lookahead used only to decide whether `a, b int` is still
    /// listing parameter names (as opposed to the end of the group).
    /// Conservative: a param group's shared type always follows the
    /// last name directly, so if the next token after a comma is an
    /// identifier and the one after *that* isn't `)`/`,` we treat it
    /// as another name.
    fn peek_is_ident_then_comma_or_type(&self) -> bool {
        let next = self.toks.get(self.pos + 1);
        matches!(next, Some(t) if t.kind == TokKind::Ident)
    }

    fn parse_block_stmts(&mut self) -> Option<Vec<Stmt>> {
        self.expect("{")?;
        let mut stmts = Vec::new();
        while !self.is("}") && !self.at_eof() {
            if self.is(";") {
                self.bump();
                continue;
            }
            stmts.push(self.parse_stmt()?);
        }
        self.expect("}")?;
        Some(stmts)
    }

    fn parse_stmt(&mut self) -> Option<Stmt> {
        if self.is("{") {
            return Some(Stmt::Block(self.parse_block_stmts()?));
        }
        if self.is("if") {
            return self.parse_if();
        }
        if self.is("for") {
            return self.parse_for();
        }
        if self.is("return") {
            let pos = self.cur_pos();
            self.bump();
            let mut values = Vec::new();
            if !self.is(";") && !self.is("}") {
                values.push(self.parse_expr()?);
                while self.is(",") {
                    self.bump();
                    values.push(self.parse_expr()?);
                }
            }
            self.semi();
            return Some(Stmt::Return { values, pos });
        }
        if self.is("break") {
            let pos = self.cur_pos();
            self.bump();
            self.semi();
            return Some(Stmt::Break(pos));
        }
        if self.is("continue") {
            let pos = self.cur_pos();
            self.bump();
            self.semi();
            return Some(Stmt::Continue(pos));
        }
        if self.is("var") {
            let decl = self.parse_var_decl()?;
            return Some(Stmt::VarDecl { decl });
        }
        self.parse_simple_stmt(true)
    }

    fn semi(&mut self) {
        if self.is(";") {
            self.bump();
        }
    }

    fn parse_if(&mut self) -> Option<Stmt> {
        let pos = self.cur_pos();
        self.expect("if")?;
        let cond = self.parse_expr()?;
        let then = Box::new(Stmt::Block(self.parse_block_stmts()?));
        let else_ = if self.is("else") {
            self.bump();
            if self.is("if") {
                Some(Box::new(self.parse_if()?))
            } else {
                Some(Box::new(Stmt::Block(self.parse_block_stmts()?)))
            }
        } else {
            None
        };
        Some(Stmt::If { cond, then, else_, pos })
    }

    fn parse_for(&mut self) -> Option<Stmt> {
        let pos = self.cur_pos();
        self.expect("for")?;
        if self.is("{") {
            let body = Box::new(Stmt::Block(self.parse_block_stmts()?));
            return Some(Stmt::For {
                init: None,
                cond: None,
                post: None,
                body,
                pos,
            });
        }
        // Either `for cond { }` or `for init; cond; post { }`.
        let checkpoint = self.pos;
        if !self.peek_has_semicolon_before_brace() {
            let cond = self.parse_expr()?;
            let body = Box::new(Stmt::Block(self.parse_block_stmts()?));
            return Some(Stmt::For {
                init: None,
                cond: Some(cond),
                post: None,
                body,
                pos,
            });
        }
        self.pos = checkpoint;
        let init = if self.is(";") {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt(false)?))
        };
        self.expect(";")?;
        let cond = if self.is(";") { None } else { Some(self.parse_expr()?) };
        self.expect(";")?;
        let post = if self.is("{") {
            None
        } else {
            Some(Box::new(self.parse_simple_stmt(false)?))
        };
        let body = Box::new(Stmt::Block(self.parse_block_stmts()?));
        Some(Stmt::For {
            init,
            cond,
            post,
            body,
            pos,
        })
    }

    fn peek_has_semicolon_before_brace(&self) -> bool {
        let mut depth = 0i32;
        for t in &self.toks[self.pos..] {
            match t.lit.as_str() {
                "(" | "[" => depth += 1,
                ")" | "]" => depth -= 1,
                ";" if depth == 0 => return true,
                "{" if depth == 0 => return false,
                _ => {}
            }
            if t.kind == TokKind::Eof {
                return false;
            }
        }
        false
    }

    /// `simple_stmt` covers assignment, short-decl, increment/decrement
    /// and bare expression statements — the forms legal in a `for`
    /// clause as well as as a standalone statement.
    fn parse_simple_stmt(&mut self, want_semi: bool) -> Option<Stmt> {
        let pos = self.cur_pos();
        let mut exprs = vec![self.parse_expr()?];
        while self.is(",") {
            self.bump();
            exprs.push(self.parse_expr()?);
        }

        if self.is("++") || self.is("--") {
            let op = self.bump().lit;
            if want_semi {
                self.semi();
            }
            let one = Expr::Int(1, pos.clone());
            let op_str = if op == "++" { "+" } else { "-" };
            return Some(Stmt::Assign {
                lhs: exprs.clone(),
                rhs: vec![Expr::Binary {
                    a: Box::new(exprs[0].clone()),
                    op: op_str.to_string(),
                    op_pos: pos.clone(),
                    b: Box::new(one),
                }],
                pos,
            });
        }

        if self.is(":=") {
            self.bump();
            let names = exprs
                .iter()
                .map(|e| match e {
                    Expr::Ident(n, p) => (n.clone(), p.clone()),
                    _ => (String::new(), pos.clone()),
                })
                .collect();
            let mut rhs = vec![self.parse_expr()?];
            while self.is(",") {
                self.bump();
                rhs.push(self.parse_expr()?);
            }
            if want_semi {
                self.semi();
            }
            return Some(Stmt::ShortDecl { names, rhs, pos });
        }

        if self.is("=") {
            self.bump();
            let mut rhs = vec![self.parse_expr()?];
            while self.is(",") {
                self.bump();
                rhs.push(self.parse_expr()?);
            }
            if want_semi {
                self.semi();
            }
            return Some(Stmt::Assign { lhs: exprs, rhs, pos });
        }

        if want_semi {
            self.semi();
        }
        Some(Stmt::Expr(if exprs.len() == 1 {
            exprs.pop().unwrap()
        } else {
            Expr::List(exprs)
        }))
    }

    // --- expression grammar, lowest to highest precedence ---

    fn parse_expr(&mut self) -> Option<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Option<Expr> {
        let mut a = self.parse_and()?;
        while self.is("||") {
            let op_pos = self.cur_pos();
            self.bump();
            let b = self.parse_and()?;
            a = Expr::Binary { a: Box::new(a), op: "||".into(), op_pos, b: Box::new(b) };
        }
        Some(a)
    }

    fn parse_and(&mut self) -> Option<Expr> {
        let mut a = self.parse_cmp()?;
        while self.is("&&") {
            let op_pos = self.cur_pos();
            self.bump();
            let b = self.parse_cmp()?;
            a = Expr::Binary { a: Box::new(a), op: "&&".into(), op_pos, b: Box::new(b) };
        }
        Some(a)
    }

    fn parse_cmp(&mut self) -> Option<Expr> {
        let mut a = self.parse_shift()?;
        while ["==", "!=", "<", "<=", ">", ">="].iter().any(|o| self.is(o)) {
            let op = self.cur().lit.clone();
            let op_pos = self.cur_pos();
            self.bump();
            let b = self.parse_shift()?;
            a = Expr::Binary { a: Box::new(a), op, op_pos, b: Box::new(b) };
        }
        Some(a)
    }

    fn parse_shift(&mut self) -> Option<Expr> {
        let mut a = self.parse_add()?;
        while self.is("<<") || self.is(">>") {
            let op = self.cur().lit.clone();
            let op_pos = self.cur_pos();
            self.bump();
            let b = self.parse_add()?;
            a = Expr::Binary { a: Box::new(a), op, op_pos, b: Box::new(b) };
        }
        Some(a)
    }

    fn parse_add(&mut self) -> Option<Expr> {
        let mut a = self.parse_mul()?;
        while self.is("+") || self.is("-") {
            let op = self.cur().lit.clone();
            let op_pos = self.cur_pos();
            self.bump();
            let b = self.parse_mul()?;
            a = Expr::Binary { a: Box::new(a), op, op_pos, b: Box::new(b) };
        }
        Some(a)
    }

    fn parse_mul(&mut self) -> Option<Expr> {
        let mut a = self.parse_unary()?;
        while self.is("*") || self.is("/") {
            let op = self.cur().lit.clone();
            let op_pos = self.cur_pos();
            self.bump();
            let b = self.parse_unary()?;
            a = Expr::Binary { a: Box::new(a), op, op_pos, b: Box::new(b) };
        }
        Some(a)
    }

    fn parse_unary(&mut self) -> Option<Expr> {
        if self.is("!") || self.is("-") {
            let op = self.cur().lit.clone();
            let op_pos = self.cur_pos();
            self.bump();
            let expr = self.parse_unary()?;
            return Some(Expr::Unary { op, op_pos, expr: Box::new(expr) });
        }
        if self.is("*") {
            let pos = self.cur_pos();
            self.bump();
            let expr = self.parse_unary()?;
            return Some(Expr::Star { expr: Box::new(expr), pos });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Option<Expr> {
        let mut e = self.parse_primary()?;
        loop {
            if self.is("(") {
                let pos = self.cur_pos();
                self.bump();
                let mut args = Vec::new();
                while !self.is(")") && !self.at_eof() {
                    args.push(self.parse_expr()?);
                    if self.is(",") {
                        self.bump();
                    }
                }
                self.expect(")")?;
                e = Expr::Call { func: Box::new(e), args, pos };
            } else if self.is(".") {
                self.bump();
                let (name, pos) = self.ident()?;
                e = Expr::Member { expr: Box::new(e), name, pos };
            } else if self.is("[") {
                let pos = self.cur_pos();
                self.bump();
                if self.is(":") {
                    self.bump();
                    let hi = if self.is("]") { None } else { Some(Box::new(self.parse_expr()?)) };
                    self.expect("]")?;
                    e = Expr::Slice { array: Box::new(e), lo: None, hi, pos };
                    continue;
                }
                let first = self.parse_expr()?;
                if self.is(":") {
                    self.bump();
                    let hi = if self.is("]") { None } else { Some(Box::new(self.parse_expr()?)) };
                    self.expect("]")?;
                    e = Expr::Slice { array: Box::new(e), lo: Some(Box::new(first)), hi, pos };
                } else {
                    self.expect("]")?;
                    e = Expr::Index { array: Box::new(e), index: Box::new(first), pos };
                }
            } else {
                break;
            }
        }
        Some(e)
    }

    fn parse_primary(&mut self) -> Option<Expr> {
        let pos = self.cur_pos();
        if self.is("(") {
            self.bump();
            let e = self.parse_expr()?;
            self.expect(")")?;
            return Some(e);
        }
        if self.is("true") {
            self.bump();
            return Some(Expr::Bool(true, pos));
        }
        if self.is("false") {
            self.bump();
            return Some(Expr::Bool(false, pos));
        }
        if self.cur().kind == TokKind::Int {
            let t = self.bump();
            return Some(Expr::Int(t.lit.parse().unwrap_or(0), pos));
        }
        if self.cur().lit.starts_with('"') {
            let t = self.bump();
            return Some(Expr::Str(t.lit.trim_matches('"').to_string(), pos));
        }
        if self.cur().kind == TokKind::Ident {
            let t = self.bump();
            return Some(Expr::Ident(t.lit, pos));
        }
        self.diags
            .push(pos.clone(), format!("unexpected token {:?} in expression", self.cur().lit));
        self.bump();
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_print_3() {
        let (file, diags) = Parser::new("t.g", "func main() { print(3) }").parse_file();
        assert!(diags.is_empty());
        assert_eq!(file.funcs.len(), 1);
        assert_eq!(file.funcs[0].body.len(), 1);
    }

    #[test]
    fn parses_for_loop_with_all_three_clauses() {
        let src = "func main() { for i := 0; i < 3; i++ { print(i) } }";
        let (file, diags) = Parser::new("t.g", src).parse_file();
        assert!(diags.is_empty(), "{:?}", diags.as_slice());
        assert_eq!(file.funcs[0].body.len(), 1);
    }

    #[test]
    fn parses_struct_with_shared_field_type() {
        let src = "struct X { a, b int }";
        let (file, diags) = Parser::new("t.g", src).parse_file();
        assert!(diags.is_empty(), "{:?}", diags.as_slice());
        assert_eq!(file.structs[0].fields.len(), 2);
    }

    #[test]
    fn parses_two_param_function() {
        let src = "func Add(a, b int) int { return a+b }";
        let (file, diags) = Parser::new("t.g", src).parse_file();
        assert!(diags.is_empty(), "{:?}", diags.as_slice());
        assert_eq!(file.funcs[0].params.len(), 2);
    }
}
