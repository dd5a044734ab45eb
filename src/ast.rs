//! Abstract syntax tree produced by [`crate::parser::Parser`] and annotated
//! in place by [`crate::resolver::Resolver`].
//!
//! Nodes own their names (`Rc<str>`) instead of borrowing tokens: closures
//! created by `eval`'d code outlive the source text they were parsed from.
//! Resolution results live in `Cell`/`OnceCell` fields so the resolver can
//! annotate a tree that is already shared through `Rc<FunctionDecl>`.

use std::cell::{Cell, OnceCell};
use std::rc::Rc;

use crate::environment::DeclKind;
use crate::rope::Rope;

/// Interned-ish identifier text.
pub type Name = Rc<str>;

/// Where an identifier reference lives at runtime, decided by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Slot {
    /// Not yet visited by the resolver.
    #[default]
    Unresolved,

    /// `depth` parent hops from the current environment, then slot `index`.
    /// Valid only while no frame crossed on the way is dynamic.
    Static { depth: usize, index: usize },

    /// Look the name up by walking the environment chain.
    Dynamic,
}

/// A reference to (or declaration of) a name.
#[derive(Debug)]
pub struct Identifier {
    pub name: Name,
    pub line: usize,
    pub slot: Cell<Slot>,
}

impl Identifier {
    pub fn new(name: Name, line: usize) -> Self {
        Self {
            name,
            line,
            slot: Cell::new(Slot::Unresolved),
        }
    }
}

/// Static descriptor attached to every call expression.
///
/// Fixed at parse/resolve time; consulted, never recomputed, when the call
/// executes.
#[derive(Debug, Default)]
pub struct EvalCallSite {
    callee_is_eval_identifier: bool,
    is_strict: Cell<bool>,
}

impl EvalCallSite {
    pub fn new(callee_is_eval_identifier: bool) -> Self {
        Self {
            callee_is_eval_identifier,
            is_strict: Cell::new(false),
        }
    }

    /// The callee is written as the bare identifier `eval`.
    pub fn callee_is_eval_identifier(&self) -> bool {
        self.callee_is_eval_identifier
    }

    /// The call appears in strict-mode code.
    pub fn is_strict(&self) -> bool {
        self.is_strict.get()
    }

    pub(crate) fn mark_strict(&self, strict: bool) {
        self.is_strict.set(strict);
    }
}

/// Bindings a scope creates on entry, computed by the resolver.
#[derive(Debug, Default)]
pub struct ScopeLayout {
    /// Bindings of this scope's own environment, in slot order.
    pub slots: Vec<(Name, DeclKind)>,

    /// `var`/function names owned by an outer variable scope.  Only sloppy
    /// `eval` code has these.
    pub hoisted: Vec<Name>,

    /// Function declarations instantiated when the scope is entered.
    pub functions: Vec<Rc<FunctionDecl>>,

    /// Slot receiving the function itself (named function expressions).
    pub callee_slot: Option<usize>,
}

#[derive(Debug, Clone)]
pub enum Literal {
    Number(f64),
    Str(Rope),
    Bool(bool),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
    TypeOf,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// `=` or a compound assignment operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Compound(BinaryOp),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    Increment,
    Decrement,
}

#[derive(Debug)]
pub enum MemberKey {
    Named(Name),
    Computed(Box<Expr>),
}

/// Function declarations, function expressions and arrows.
#[derive(Debug)]
pub struct FunctionDecl {
    pub name: Option<Name>,
    pub params: Vec<Identifier>,
    pub body: Vec<Stmt>,
    pub is_arrow: bool,
    /// Declared with `function name() {}` at statement level.
    pub is_declaration: bool,
    /// Body starts with a `"use strict"` directive.
    pub has_use_strict: bool,
    pub line: usize,

    /// Strictness after inheritance from enclosing code.
    pub strict: Cell<bool>,
    pub layout: OnceCell<ScopeLayout>,
}

#[derive(Debug)]
pub enum Expr {
    Literal(Literal),

    Identifier(Identifier),

    This(usize),

    /// `{ key: value, shorthand }`
    Object {
        properties: Vec<(Name, Expr)>,
        line: usize,
    },

    /// Function expression or arrow function.
    Function(Rc<FunctionDecl>),

    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
        line: usize,
    },

    /// `++x`, `x--`, …
    Update {
        op: UpdateOp,
        prefix: bool,
        target: Box<Expr>,
        line: usize,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        line: usize,
    },

    /// Short‑circuiting `&&` / `||`.
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// `test ? consequent : alternate`
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },

    Assign {
        op: AssignOp,
        target: Box<Expr>,
        value: Box<Expr>,
        line: usize,
    },

    /// `object.name` or `object[expr]`
    Member {
        object: Box<Expr>,
        property: MemberKey,
        line: usize,
    },

    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
        site: EvalCallSite,
        line: usize,
    },
}

impl Expr {
    pub fn line(&self) -> usize {
        match self {
            Expr::Literal(_) => 0,
            Expr::Identifier(id) => id.line,
            Expr::This(line) => *line,
            Expr::Object { line, .. } => *line,
            Expr::Function(decl) => decl.line,
            Expr::Unary { line, .. }
            | Expr::Update { line, .. }
            | Expr::Binary { line, .. }
            | Expr::Assign { line, .. }
            | Expr::Member { line, .. }
            | Expr::Call { line, .. } => *line,
            Expr::Logical { left, .. } => left.line(),
            Expr::Conditional { test, .. } => test.line(),
        }
    }
}

#[derive(Debug)]
pub struct Declarator {
    pub target: Identifier,
    pub init: Option<Expr>,
}

/// `{ … }` with its lexical scope.
#[derive(Debug)]
pub struct Block {
    pub body: Vec<Stmt>,
    pub layout: OnceCell<ScopeLayout>,
}

impl Block {
    pub fn new(body: Vec<Stmt>) -> Self {
        Self {
            body,
            layout: OnceCell::new(),
        }
    }
}

#[derive(Debug)]
pub struct CatchClause {
    pub param: Option<Identifier>,
    pub body: Block,
    pub layout: OnceCell<ScopeLayout>,
}

#[derive(Debug)]
pub enum Stmt {
    Expression(Expr),

    /// `var` / `let` / `const` with one or more declarators.
    Declaration {
        kind: DeclKind,
        declarations: Vec<Declarator>,
        line: usize,
    },

    /// Hoisted; executing the statement itself does nothing.
    Function(Rc<FunctionDecl>),

    Block(Block),

    If {
        condition: Expr,
        then_branch: Box<Stmt>,
        else_branch: Option<Box<Stmt>>,
    },

    While {
        condition: Expr,
        body: Box<Stmt>,
    },

    For {
        init: Option<Box<Stmt>>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
        layout: OnceCell<ScopeLayout>,
    },

    Break(usize),

    Continue(usize),

    Return {
        value: Option<Expr>,
        line: usize,
    },

    With {
        object: Expr,
        body: Box<Stmt>,
        line: usize,
    },

    Throw {
        value: Expr,
        line: usize,
    },

    Try {
        block: Block,
        handler: Option<CatchClause>,
        finalizer: Option<Block>,
        line: usize,
    },

    Empty,
}

/// A parsed script or `eval` text.
#[derive(Debug)]
pub struct Program {
    pub body: Vec<Stmt>,
    /// Starts with a `"use strict"` directive.
    pub has_use_strict: bool,
    /// Strictness after inheritance from a strict `eval` caller.
    pub strict: Cell<bool>,
    pub layout: OnceCell<ScopeLayout>,
}

impl Program {
    pub fn new(body: Vec<Stmt>, has_use_strict: bool) -> Self {
        Self {
            body,
            has_use_strict,
            strict: Cell::new(has_use_strict),
            layout: OnceCell::new(),
        }
    }
}
