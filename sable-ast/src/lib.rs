#![forbid(unsafe_code)]

//! Plain-data syntax tree consumed by the semantic analyzer.
//!
//! Every expression, statement and block carries a [`NodeId`] unique within
//! its program. The analyzer keys per-node results (inferred types, resolved
//! variables, control-flow sections) on those ids, which is what lets it walk
//! the same function body several times without rebuilding anything.

use miette::SourceSpan;

pub type Span = SourceSpan;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(span: Span, node: T) -> Self {
        Self { span, node }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned {
            span: self.span,
            node: f(self.node),
        }
    }
}

pub fn span(start: usize, len: usize) -> Span {
    SourceSpan::new(start.into(), len)
}

pub fn span_between(start: usize, end: usize) -> Span {
    debug_assert!(end >= start);
    span(start, end - start)
}

pub type Ident = Spanned<String>;

/// Identity of a syntax node within one [`Program`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Default)]
pub struct NodeIdGen {
    next: u32,
}

impl NodeIdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> NodeId {
        let id = NodeId(self.next);
        self.next += 1;
        id
    }
}

/// A whole program. The top-level statements form the body of the implicit
/// `main` function.
#[derive(Clone, Debug, PartialEq)]
pub struct Program {
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Block {
    pub id: NodeId,
    pub span: Span,
    pub stmts: Vec<Stmt>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    VarDecl(VarDecl),
    If(IfStmt),
    While(WhileStmt),
    For(ForStmt),
    Foreach(ForeachStmt),
    Break(JumpStmt),
    Continue(JumpStmt),
    Return(ReturnStmt),
    Throw(ThrowStmt),
    ExprStmt(Expr),
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::VarDecl(s) => s.span,
            Stmt::If(s) => s.span,
            Stmt::While(s) => s.span,
            Stmt::For(s) => s.span,
            Stmt::Foreach(s) => s.span,
            Stmt::Break(s) | Stmt::Continue(s) => s.span,
            Stmt::Return(s) => s.span,
            Stmt::Throw(s) => s.span,
            Stmt::ExprStmt(e) => e.span,
        }
    }
}

/// `var x = e` / `global x = e`. Several declarations may share one
/// statement, as in `var a = 1, b = 2`.
#[derive(Clone, Debug, PartialEq)]
pub struct VarDecl {
    pub id: NodeId,
    pub span: Span,
    pub global: bool,
    pub decls: Vec<(Ident, Option<Expr>)>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct IfStmt {
    pub id: NodeId,
    pub span: Span,
    pub cond: Expr,
    pub then_block: Block,
    pub else_block: Option<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct WhileStmt {
    pub id: NodeId,
    pub span: Span,
    pub cond: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForStmt {
    pub id: NodeId,
    pub span: Span,
    pub init: Option<Box<Stmt>>,
    pub cond: Option<Expr>,
    pub step: Option<Expr>,
    pub body: Block,
}

/// `for k : v in container { ... }` — the key binder is optional.
#[derive(Clone, Debug, PartialEq)]
pub struct ForeachStmt {
    pub id: NodeId,
    pub span: Span,
    pub key: Option<Ident>,
    pub value: Ident,
    pub container: Expr,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct JumpStmt {
    pub id: NodeId,
    pub span: Span,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReturnStmt {
    pub id: NodeId,
    pub span: Span,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ThrowStmt {
    pub id: NodeId,
    pub span: Span,
    pub value: Option<Expr>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    Null,
    Boolean(bool),
    Integer(i64),
    Long(i64),
    Real(f64),
    /// Arbitrary-precision literal, kept textual until codegen.
    BigInt(String),
    Str(String),
    Ident(String),
    Array(Vec<Expr>),
    Set(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Interval {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    Object(Vec<(Ident, Expr)>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Member {
        base: Box<Expr>,
        member: Ident,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Function(FunctionExpr),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
}

/// An anonymous function value. Parameters are untyped; the analyzer
/// specializes the body per call-site argument tuple.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionExpr {
    pub params: Vec<Param>,
    pub body: Box<Block>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub span: Span,
    pub name: Ident,
    pub default: Option<Expr>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

/// Convenience constructor for well-formed trees, used by tests and by
/// front ends that lower from another surface syntax. Spans default to
/// zero-length; real parsers set them afterwards.
#[derive(Debug, Default)]
pub struct Builder {
    ids: NodeIdGen,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    fn zero_span() -> Span {
        span(0, 0)
    }

    pub fn ident_name(&mut self, name: &str) -> Ident {
        Spanned::new(Self::zero_span(), name.to_string())
    }

    pub fn expr(&mut self, kind: ExprKind) -> Expr {
        Expr {
            id: self.ids.fresh(),
            span: Self::zero_span(),
            kind,
        }
    }

    pub fn null(&mut self) -> Expr {
        self.expr(ExprKind::Null)
    }

    pub fn boolean(&mut self, v: bool) -> Expr {
        self.expr(ExprKind::Boolean(v))
    }

    pub fn integer(&mut self, v: i64) -> Expr {
        self.expr(ExprKind::Integer(v))
    }

    pub fn long(&mut self, v: i64) -> Expr {
        self.expr(ExprKind::Long(v))
    }

    pub fn real(&mut self, v: f64) -> Expr {
        self.expr(ExprKind::Real(v))
    }

    pub fn string(&mut self, v: &str) -> Expr {
        self.expr(ExprKind::Str(v.to_string()))
    }

    pub fn var(&mut self, name: &str) -> Expr {
        self.expr(ExprKind::Ident(name.to_string()))
    }

    pub fn array(&mut self, items: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Array(items))
    }

    pub fn map(&mut self, entries: Vec<(Expr, Expr)>) -> Expr {
        self.expr(ExprKind::Map(entries))
    }

    pub fn unary(&mut self, op: UnaryOp, operand: Expr) -> Expr {
        self.expr(ExprKind::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    pub fn binary(&mut self, op: BinOp, left: Expr, right: Expr) -> Expr {
        self.expr(ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn member(&mut self, base: Expr, member: &str) -> Expr {
        let member = self.ident_name(member);
        self.expr(ExprKind::Member {
            base: Box::new(base),
            member,
        })
    }

    pub fn index(&mut self, base: Expr, index: Expr) -> Expr {
        self.expr(ExprKind::Index {
            base: Box::new(base),
            index: Box::new(index),
        })
    }

    pub fn call(&mut self, callee: Expr, args: Vec<Expr>) -> Expr {
        self.expr(ExprKind::Call {
            callee: Box::new(callee),
            args,
        })
    }

    pub fn assign(&mut self, target: Expr, value: Expr) -> Expr {
        self.expr(ExprKind::Assign {
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    pub fn function(&mut self, params: &[&str], body: Block) -> Expr {
        let params = params
            .iter()
            .map(|p| Param {
                span: Self::zero_span(),
                name: self.ident_name(p),
                default: None,
            })
            .collect();
        self.expr(ExprKind::Function(FunctionExpr {
            params,
            body: Box::new(body),
        }))
    }

    pub fn function_with_params(&mut self, params: Vec<Param>, body: Block) -> Expr {
        self.expr(ExprKind::Function(FunctionExpr {
            params,
            body: Box::new(body),
        }))
    }

    pub fn param(&mut self, name: &str, default: Option<Expr>) -> Param {
        Param {
            span: Self::zero_span(),
            name: self.ident_name(name),
            default,
        }
    }

    pub fn block(&mut self, stmts: Vec<Stmt>) -> Block {
        Block {
            id: self.ids.fresh(),
            span: Self::zero_span(),
            stmts,
        }
    }

    pub fn var_decl(&mut self, name: &str, value: Option<Expr>) -> Stmt {
        let name = self.ident_name(name);
        Stmt::VarDecl(VarDecl {
            id: self.ids.fresh(),
            span: Self::zero_span(),
            global: false,
            decls: vec![(name, value)],
        })
    }

    pub fn expr_stmt(&mut self, expr: Expr) -> Stmt {
        Stmt::ExprStmt(expr)
    }

    pub fn if_stmt(&mut self, cond: Expr, then_block: Block, else_block: Option<Block>) -> Stmt {
        Stmt::If(IfStmt {
            id: self.ids.fresh(),
            span: Self::zero_span(),
            cond,
            then_block,
            else_block,
        })
    }

    pub fn while_stmt(&mut self, cond: Expr, body: Block) -> Stmt {
        Stmt::While(WhileStmt {
            id: self.ids.fresh(),
            span: Self::zero_span(),
            cond,
            body,
        })
    }

    pub fn foreach(&mut self, key: Option<&str>, value: &str, container: Expr, body: Block) -> Stmt {
        let key = key.map(|k| self.ident_name(k));
        let value = self.ident_name(value);
        Stmt::Foreach(ForeachStmt {
            id: self.ids.fresh(),
            span: Self::zero_span(),
            key,
            value,
            container,
            body,
        })
    }

    pub fn break_stmt(&mut self) -> Stmt {
        Stmt::Break(JumpStmt {
            id: self.ids.fresh(),
            span: Self::zero_span(),
        })
    }

    pub fn continue_stmt(&mut self) -> Stmt {
        Stmt::Continue(JumpStmt {
            id: self.ids.fresh(),
            span: Self::zero_span(),
        })
    }

    pub fn return_stmt(&mut self, value: Option<Expr>) -> Stmt {
        Stmt::Return(ReturnStmt {
            id: self.ids.fresh(),
            span: Self::zero_span(),
            value,
        })
    }

    pub fn throw_stmt(&mut self, value: Option<Expr>) -> Stmt {
        Stmt::Throw(ThrowStmt {
            id: self.ids.fresh(),
            span: Self::zero_span(),
            value,
        })
    }

    pub fn program(&mut self, stmts: Vec<Stmt>) -> Program {
        Program {
            body: self.block(stmts),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let mut b = Builder::new();
        let a = b.integer(1);
        let c = b.integer(1);
        assert_ne!(a.id, c.id);
        assert_eq!(a.kind, c.kind);
    }

    #[test]
    fn builder_produces_nested_calls() {
        let mut b = Builder::new();
        let f = b.var("f");
        let one = b.integer(1);
        let call = b.call(f, vec![one]);
        match &call.kind {
            ExprKind::Call { callee, args } => {
                assert!(matches!(callee.kind, ExprKind::Ident(ref n) if n == "f"));
                assert_eq!(args.len(), 1);
            }
            other => panic!("expected call, got {other:?}"),
        }
    }
}
