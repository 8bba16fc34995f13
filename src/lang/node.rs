//! Resolved syntax tree consumed by the bytecode compiler.
//!
//! The parser and resolver live outside this crate. By the time a tree
//! reaches the compiler, every identifier carries its [`Scope`] and slot
//! index, every function knows its locals and free variables, and
//! structural rules (`break` only inside loops, positional arguments before
//! named ones, at most 255 of each) have already been checked.

use serde::{Deserialize, Serialize};

/// A source position. Line and column are 1-based; a zero line means
/// "no position" and is never recorded in a position table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl Position {
    pub fn new(line: u32, col: u32) -> Self {
        Position { line, col }
    }

    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

// =============================================================================
// Bindings
// =============================================================================

/// Where a resolved name lives at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Slot in the current frame's locals.
    Local,
    /// Local slot captured by a nested function; boxed in a cell at frame entry.
    Cell,
    /// Entry in the current closure's free-variable tuple (always a cell).
    Free,
    /// Module-level variable, by index into the program's globals.
    Global,
    /// Host-supplied name, looked up by name in the predeclared dict.
    Predeclared,
    /// Built-in name, looked up by name in the universe.
    Universal,
}

/// A resolved declaration: a function local, a free variable, or a global.
///
/// For free variables, `scope` and `index` describe the variable as seen
/// from the *enclosing* function (`Cell` for one of its locals, `Free` for
/// one of its own free variables).
#[derive(Debug, Clone, PartialEq)]
pub struct Binding {
    pub name: String,
    pub pos: Position,
    pub scope: Scope,
    pub index: u32,
}

impl Binding {
    pub fn new(name: impl Into<String>, scope: Scope, index: u32) -> Self {
        Binding {
            name: name.into(),
            pos: Position::default(),
            scope,
            index,
        }
    }

    pub fn local(name: impl Into<String>) -> Self {
        Binding::new(name, Scope::Local, 0)
    }

    pub fn cell(name: impl Into<String>) -> Self {
        Binding::new(name, Scope::Cell, 0)
    }

    pub fn at(mut self, line: u32, col: u32) -> Self {
        self.pos = Position::new(line, col);
        self
    }
}

/// A use or definition of a name.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub pos: Position,
    pub scope: Scope,
    pub index: u32,
}

impl Ident {
    pub fn new(name: impl Into<String>, scope: Scope, index: u32) -> Self {
        Ident {
            name: name.into(),
            pos: Position::default(),
            scope,
            index,
        }
    }

    pub fn local(name: impl Into<String>, index: u32) -> Self {
        Ident::new(name, Scope::Local, index)
    }

    pub fn cell(name: impl Into<String>, index: u32) -> Self {
        Ident::new(name, Scope::Cell, index)
    }

    pub fn free(name: impl Into<String>, index: u32) -> Self {
        Ident::new(name, Scope::Free, index)
    }

    pub fn global(name: impl Into<String>, index: u32) -> Self {
        Ident::new(name, Scope::Global, index)
    }

    pub fn predeclared(name: impl Into<String>) -> Self {
        Ident::new(name, Scope::Predeclared, 0)
    }

    pub fn universal(name: impl Into<String>) -> Self {
        Ident::new(name, Scope::Universal, 0)
    }

    pub fn at(mut self, line: u32, col: u32) -> Self {
        self.pos = Position::new(line, col);
        self
    }
}

// =============================================================================
// Functions
// =============================================================================

/// One declared parameter, in source order.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    /// `x`
    Required(Ident),
    /// `x=default`
    Optional(Ident, Expr),
    /// bare `*`, separating keyword-only parameters
    Star,
    /// `*args`
    Varargs(Ident),
    /// `**kwargs`
    Kwargs(Ident),
}

/// A resolved function body: a `def`, a `lambda`, or the toplevel of a file.
///
/// `locals` lists the parameters first (ordinary and keyword-only in
/// declaration order, then `*args`, then `**kwargs`), followed by every
/// other local; each has scope `Local` or `Cell`.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub pos: Position,
    pub params: Vec<Param>,
    pub body: Vec<Stmt>,
    pub locals: Vec<Binding>,
    pub free_vars: Vec<Binding>,
    pub num_kwonly_params: u32,
    pub has_varargs: bool,
    pub has_kwargs: bool,
}

impl Function {
    pub fn new(name: impl Into<String>, body: Vec<Stmt>) -> Self {
        Function {
            name: name.into(),
            pos: Position::default(),
            params: Vec::new(),
            body,
            locals: Vec::new(),
            free_vars: Vec::new(),
            num_kwonly_params: 0,
            has_varargs: false,
            has_kwargs: false,
        }
    }

    /// Number of local slots taken by parameters; a bare `*` takes none.
    pub fn num_params(&self) -> u32 {
        self.params
            .iter()
            .filter(|p| !matches!(p, Param::Star))
            .count() as u32
    }
}

// =============================================================================
// Statements
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Expression evaluated for effect.
    Expr(Expr),

    /// `lhs = rhs`
    Assign {
        lhs: Expr,
        rhs: Expr,
        op_pos: Position,
    },

    /// `lhs op= rhs`
    AugAssign {
        op: BinOp,
        lhs: Expr,
        rhs: Expr,
        op_pos: Position,
    },

    /// `def name(...): ...`
    Def { name: Ident, function: Box<Function> },

    If {
        cond: Expr,
        then_body: Vec<Stmt>,
        else_body: Vec<Stmt>,
    },

    While { cond: Expr, body: Vec<Stmt> },

    /// `for vars in iterable: body`
    For {
        vars: Expr,
        iterable: Expr,
        body: Vec<Stmt>,
        for_pos: Position,
    },

    Return { result: Option<Expr> },

    Pass,
    Break,
    Continue,

    /// `load("module", "a", b="c")` binds `to[i]` to member `from[i]`.
    Load {
        load_pos: Position,
        module: String,
        module_pos: Position,
        from: Vec<String>,
        to: Vec<Ident>,
    },
}

// =============================================================================
// Expressions
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
    Tilde,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    In,
    NotIn,
    Plus,
    Minus,
    Star,
    Slash,
    SlashSlash,
    Percent,
    Amp,
    Pipe,
    Circumflex,
    LtLt,
    GtGt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictEntry {
    pub key: Expr,
    pub value: Expr,
    pub colon: Position,
}

/// One call argument. Positional arguments precede named ones.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Positional(Expr),
    Named(String, Expr),
    /// `*args`
    Star(Expr),
    /// `**kwargs`
    StarStar(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    For {
        vars: Expr,
        iterable: Expr,
        for_pos: Position,
    },
    If {
        cond: Expr,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ComprehensionBody {
    /// `[body for ...]`
    Elem(Expr),
    /// `{key: value for ...}`
    Entry(DictEntry),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub body: ComprehensionBody,
    pub clauses: Vec<Clause>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Ident(Ident),
    Literal {
        value: Literal,
        pos: Position,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Dict(Vec<DictEntry>),
    Paren(Box<Expr>),
    Unary {
        op: UnaryOp,
        x: Box<Expr>,
        pos: Position,
    },
    Binary {
        op: BinOp,
        x: Box<Expr>,
        y: Box<Expr>,
        pos: Position,
    },
    /// `then_expr if cond else else_expr`
    Cond {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Index {
        x: Box<Expr>,
        index: Box<Expr>,
        lbrack: Position,
    },
    Slice {
        x: Box<Expr>,
        lo: Option<Box<Expr>>,
        hi: Option<Box<Expr>>,
        step: Option<Box<Expr>>,
        lbrack: Position,
    },
    Dot {
        x: Box<Expr>,
        name: String,
        dot: Position,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Arg>,
        lparen: Position,
    },
    Comprehension(Box<Comprehension>),
    Lambda(Box<Function>),
}

impl Expr {
    pub fn int(n: i64) -> Expr {
        Expr::Literal {
            value: Literal::Int(n),
            pos: Position::default(),
        }
    }

    pub fn float(x: f64) -> Expr {
        Expr::Literal {
            value: Literal::Float(x),
            pos: Position::default(),
        }
    }

    pub fn string(s: impl Into<String>) -> Expr {
        Expr::Literal {
            value: Literal::String(s.into()),
            pos: Position::default(),
        }
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Expr {
        Expr::Literal {
            value: Literal::Bytes(b.into()),
            pos: Position::default(),
        }
    }

    pub fn ident(id: Ident) -> Expr {
        Expr::Ident(id)
    }

    pub fn unary(op: UnaryOp, x: Expr) -> Expr {
        Expr::Unary {
            op,
            x: Box::new(x),
            pos: Position::default(),
        }
    }

    pub fn binary(op: BinOp, x: Expr, y: Expr) -> Expr {
        Expr::Binary {
            op,
            x: Box::new(x),
            y: Box::new(y),
            pos: Position::default(),
        }
    }

    pub fn cond(cond: Expr, then_expr: Expr, else_expr: Expr) -> Expr {
        Expr::Cond {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    pub fn index(x: Expr, index: Expr) -> Expr {
        Expr::Index {
            x: Box::new(x),
            index: Box::new(index),
            lbrack: Position::default(),
        }
    }

    pub fn dot(x: Expr, name: impl Into<String>) -> Expr {
        Expr::Dot {
            x: Box::new(x),
            name: name.into(),
            dot: Position::default(),
        }
    }

    pub fn call(func: Expr, args: Vec<Arg>) -> Expr {
        Expr::Call {
            func: Box::new(func),
            args,
            lparen: Position::default(),
        }
    }

    /// Attach a position to the token this expression reports errors at.
    /// Expressions without a position of their own are returned unchanged.
    pub fn at(mut self, line: u32, col: u32) -> Expr {
        let p = Position::new(line, col);
        match &mut self {
            Expr::Ident(id) => id.pos = p,
            Expr::Literal { pos, .. } | Expr::Unary { pos, .. } | Expr::Binary { pos, .. } => {
                *pos = p
            }
            Expr::Index { lbrack, .. } | Expr::Slice { lbrack, .. } => *lbrack = p,
            Expr::Dot { dot, .. } => *dot = p,
            Expr::Call { lparen, .. } => *lparen = p,
            _ => {}
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_params_skips_bare_star() {
        let mut f = Function::new("f", vec![]);
        f.params = vec![
            Param::Required(Ident::local("a", 0)),
            Param::Star,
            Param::Optional(Ident::local("k", 1), Expr::int(1)),
            Param::Kwargs(Ident::local("kw", 2)),
        ];
        assert_eq!(f.num_params(), 3);
    }

    #[test]
    fn test_at_sets_call_position() {
        let e = Expr::call(Expr::ident(Ident::universal("len")), vec![]).at(3, 7);
        match e {
            Expr::Call { lparen, .. } => assert_eq!(lparen, Position::new(3, 7)),
            other => panic!("expected call, got {:?}", other),
        }
    }

    #[test]
    fn test_position_display() {
        assert_eq!(Position::new(12, 4).to_string(), "12:4");
        assert!(!Position::default().is_valid());
    }
}
