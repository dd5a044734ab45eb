//! Static resolver pass.
//!
//! One walk over a parsed [`Program`] that:
//! 1. Hoists `var` and function declarations to their variable scope and
//!    records, per scope, the [`ScopeLayout`] the interpreter instantiates.
//! 2. Decides for every identifier reference whether it can be read from a
//!    fixed `(depth, index)` slot or must be looked up by name.
//! 3. Propagates strictness into functions and call sites.
//! 4. Reports early errors (`with` or `delete x` in strict code, lexical
//!    redeclaration, misplaced `return`/`break`/`continue`).
//!
//! The scope stack mirrors the environments the interpreter creates one for
//! one: a function call, a block or `for` with lexical declarations, a
//! `catch` with a parameter, a `with` statement and an `eval` program each
//! get exactly one frame.  Names of the global scope and names reached
//! through a `with` frame are always dynamic.

use std::collections::{HashMap, HashSet};
use std::mem;
use std::rc::Rc;

use log::{debug, info};

use crate::ast::{
    Block, Expr, FunctionDecl, Identifier, MemberKey, Name, Program, ScopeLayout, Slot, Stmt,
    UnaryOp,
};
use crate::environment::{DeclKind, ScopeKind};
use crate::error::{EngineError, Result};

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 1024 * 1024;

/// Resolve a top-level script.
pub fn resolve_script(program: &Program) -> Result<()> {
    Resolver::new().resolve_script(program)
}

/// Resolve `eval` text.  `strict_caller` is the strictness of the call site
/// (always `false` for indirect eval).
pub fn resolve_eval(program: &Program, strict_caller: bool) -> Result<()> {
    Resolver::new().resolve_eval(program, strict_caller)
}

struct Scope {
    kind: ScopeKind,
    names: HashMap<Name, usize>,
}

impl Scope {
    fn new(kind: ScopeKind, slots: &[(Name, DeclKind)]) -> Self {
        let names = slots
            .iter()
            .enumerate()
            .map(|(i, (name, _))| (name.clone(), i))
            .collect();

        Self { kind, names }
    }
}

/// `var` names and function declarations found below a statement list,
/// without entering nested functions.
#[derive(Default)]
struct VarScan {
    vars: Vec<(Name, usize)>,
    functions: Vec<Rc<FunctionDecl>>,
}

impl VarScan {
    fn of(body: &[Stmt]) -> Self {
        let mut scan = VarScan::default();
        for stmt in body {
            scan.stmt(stmt);
        }
        scan
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Declaration {
                kind: DeclKind::Var,
                declarations,
                ..
            } => {
                for d in declarations {
                    self.vars.push((d.target.name.clone(), d.target.line));
                }
            }
            Stmt::Function(decl) => self.functions.push(decl.clone()),
            Stmt::Block(block) => self.block(block),
            Stmt::If {
                then_branch,
                else_branch,
                ..
            } => {
                self.stmt(then_branch);
                if let Some(eb) = else_branch.as_deref() {
                    self.stmt(eb);
                }
            }
            Stmt::While { body, .. } | Stmt::With { body, .. } => self.stmt(body),
            Stmt::For { init, body, .. } => {
                if let Some(init) = init.as_deref() {
                    self.stmt(init);
                }
                self.stmt(body);
            }
            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                self.block(block);
                if let Some(h) = handler {
                    self.block(&h.body);
                }
                if let Some(f) = finalizer {
                    self.block(f);
                }
            }
            _ => {}
        }
    }

    fn block(&mut self, block: &Block) {
        for stmt in &block.body {
            self.stmt(stmt);
        }
    }

    /// Var names followed by function names, first occurrence only.
    fn hoisted_names(&self) -> Vec<Name> {
        let mut seen: HashSet<Name> = HashSet::new();
        let vars = self.vars.iter().map(|(n, _)| n.clone());
        let funcs = self.functions.iter().filter_map(|f| f.name.clone());

        vars.chain(funcs).filter(|n| seen.insert(n.clone())).collect()
    }

    fn first_line_of(&self, name: &str) -> Option<usize> {
        self.vars
            .iter()
            .find(|(n, _)| &**n == name)
            .map(|&(_, line)| line)
            .or_else(|| {
                self.functions
                    .iter()
                    .find(|f| f.name.as_deref() == Some(name))
                    .map(|f| f.line)
            })
    }
}

/// `let`/`const` names declared directly in `body`.
fn lexical_names(body: &[Stmt]) -> Result<Vec<(Name, DeclKind)>> {
    let mut names: Vec<(Name, DeclKind)> = Vec::new();

    for stmt in body {
        if let Stmt::Declaration {
            kind,
            declarations,
            ..
        } = stmt
        {
            if !kind.is_lexical() {
                continue;
            }

            for d in declarations {
                if names.iter().any(|(n, _)| *n == d.target.name) {
                    return Err(redeclared(&d.target.name, d.target.line));
                }
                names.push((d.target.name.clone(), *kind));
            }
        }
    }

    Ok(names)
}

fn redeclared(name: &str, line: usize) -> EngineError {
    EngineError::resolve(line, format!("Identifier '{}' has already been declared", name))
}

/// Lexical names of a block must not collide with `var`s hoisted through it.
fn check_var_collisions(lexicals: &[(Name, DeclKind)], scan: &VarScan) -> Result<()> {
    for (name, _) in lexicals {
        if let Some(line) = scan.first_line_of(name) {
            return Err(redeclared(name, line));
        }
    }

    Ok(())
}

/// Layout of a function's own frame: parameters, vars, functions, body
/// lexicals and, for named function expressions, the function itself.
fn function_layout(decl: &FunctionDecl) -> Result<ScopeLayout> {
    let mut slots: Vec<(Name, DeclKind)> = Vec::new();
    let mut seen: HashSet<Name> = HashSet::new();

    for param in &decl.params {
        if seen.insert(param.name.clone()) {
            slots.push((param.name.clone(), DeclKind::Parameter));
        } else if decl.strict.get() {
            return Err(EngineError::resolve(
                param.line,
                "Duplicate parameter name not allowed in this context",
            ));
        }
    }

    let scan = VarScan::of(&decl.body);
    for (name, _) in &scan.vars {
        if seen.insert(name.clone()) {
            slots.push((name.clone(), DeclKind::Var));
        }
    }
    for func in &scan.functions {
        if let Some(name) = &func.name {
            if seen.insert(name.clone()) {
                slots.push((name.clone(), DeclKind::Function));
            }
        }
    }

    for (name, kind) in lexical_names(&decl.body)? {
        if seen.contains(&name) {
            return Err(redeclared(&name, decl.line));
        }
        seen.insert(name.clone());
        slots.push((name, kind));
    }

    let mut callee_slot = None;
    if !decl.is_declaration && !decl.is_arrow {
        if let Some(name) = &decl.name {
            if !seen.contains(name) {
                callee_slot = Some(slots.len());
                slots.push((name.clone(), DeclKind::Function));
            }
        }
    }

    Ok(ScopeLayout {
        slots,
        hoisted: Vec::new(),
        functions: scan.functions,
        callee_slot,
    })
}

/// Layout of a script or `eval` program.  Strict `eval` keeps its `var`s;
/// everything else hoists them out.
fn program_layout(program: &Program, keep_vars: bool) -> Result<ScopeLayout> {
    let scan = VarScan::of(&program.body);
    let lexicals = lexical_names(&program.body)?;
    check_var_collisions(&lexicals, &scan)?;

    let hoisted = scan.hoisted_names();

    if keep_vars {
        let mut slots = lexicals;
        for name in hoisted {
            slots.push((name, DeclKind::Var));
        }

        return Ok(ScopeLayout {
            slots,
            hoisted: Vec::new(),
            functions: scan.functions,
            callee_slot: None,
        });
    }

    Ok(ScopeLayout {
        slots: lexicals,
        hoisted,
        functions: scan.functions,
        callee_slot: None,
    })
}

pub struct Resolver {
    scopes: Vec<Scope>,
    functions: Vec<Rc<FunctionDecl>>,
    loop_depth: usize,
    strict: bool,
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

impl Resolver {
    pub fn new() -> Self {
        info!("Resolver instantiated");

        Self {
            scopes: Vec::new(),
            functions: Vec::new(),
            loop_depth: 0,
            strict: false,
        }
    }

    pub fn resolve_script(&mut self, program: &Program) -> Result<()> {
        info!(
            "Beginning resolve pass over {} statement(s)",
            program.body.len()
        );

        self.strict = program.has_use_strict;
        program.strict.set(self.strict);

        let layout = program_layout(program, false)?;
        self.resolve_program(program, ScopeKind::Global, layout)
    }

    pub fn resolve_eval(&mut self, program: &Program, strict_caller: bool) -> Result<()> {
        info!(
            "Resolving eval code ({} statement(s), strict caller: {})",
            program.body.len(),
            strict_caller
        );

        self.strict = strict_caller || program.has_use_strict;
        program.strict.set(self.strict);

        let layout = program_layout(program, self.strict)?;
        self.resolve_program(program, ScopeKind::EvalScope, layout)
    }

    fn resolve_program(&mut self, program: &Program, kind: ScopeKind, layout: ScopeLayout) -> Result<()> {
        self.scopes.push(Scope::new(kind, &layout.slots));

        let functions = layout.functions.clone();
        let _ = program.layout.set(layout);

        self.resolve_hoisted(&functions)?;
        self.resolve_statements(&program.body)?;

        self.scopes.pop();
        Ok(())
    }

    /// Hoisted declarations are resolved where they are instantiated: at the
    /// top of their variable scope.
    fn resolve_hoisted(&mut self, functions: &[Rc<FunctionDecl>]) -> Result<()> {
        for decl in functions {
            self.resolve_function(decl)?;
        }
        Ok(())
    }

    fn resolve_statements(&mut self, body: &[Stmt]) -> Result<()> {
        for stmt in body {
            self.resolve_stmt(stmt)?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Statement resolution
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.resolve_stmt_inner(stmt))
    }

    fn resolve_stmt_inner(&mut self, stmt: &Stmt) -> Result<()> {
        match stmt {
            Stmt::Expression(expr) | Stmt::Throw { value: expr, .. } => {
                self.resolve_expr(expr)?;
            }

            Stmt::Declaration { declarations, .. } => {
                for d in declarations {
                    if let Some(init) = &d.init {
                        self.resolve_expr(init)?;
                    }
                    self.resolve_identifier(&d.target);
                }
            }

            // Resolved with the other hoisted declarations.
            Stmt::Function(_) | Stmt::Empty => {}

            Stmt::Block(block) => self.resolve_block(block)?,

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition)?;
                self.resolve_stmt(then_branch)?;
                if let Some(eb) = else_branch.as_deref() {
                    self.resolve_stmt(eb)?;
                }
            }

            Stmt::While { condition, body } => {
                self.resolve_expr(condition)?;
                self.resolve_loop_body(body)?;
            }

            Stmt::For {
                init,
                condition,
                update,
                body,
                layout,
            } => {
                let slots = match init.as_deref() {
                    Some(decl @ Stmt::Declaration { kind, .. }) if kind.is_lexical() => {
                        lexical_names(std::slice::from_ref(decl))?
                    }
                    _ => Vec::new(),
                };

                let scoped = !slots.is_empty();
                if scoped {
                    self.scopes.push(Scope::new(ScopeKind::Block, &slots));
                }

                if let Some(init) = init.as_deref() {
                    self.resolve_stmt(init)?;
                }
                if let Some(condition) = condition {
                    self.resolve_expr(condition)?;
                }
                if let Some(update) = update {
                    self.resolve_expr(update)?;
                }
                self.resolve_loop_body(body)?;

                if scoped {
                    self.scopes.pop();
                }

                let _ = layout.set(ScopeLayout {
                    slots,
                    ..ScopeLayout::default()
                });
            }

            Stmt::Break(line) => {
                if self.loop_depth == 0 {
                    return Err(EngineError::resolve(*line, "Illegal break statement"));
                }
            }

            Stmt::Continue(line) => {
                if self.loop_depth == 0 {
                    return Err(EngineError::resolve(
                        *line,
                        "Illegal continue statement: no surrounding iteration statement",
                    ));
                }
            }

            Stmt::Return { value, line } => {
                if self.functions.is_empty() {
                    return Err(EngineError::resolve(*line, "Illegal return statement"));
                }
                if let Some(v) = value {
                    self.resolve_expr(v)?;
                }
            }

            Stmt::With { object, body, line } => {
                if self.strict {
                    return Err(EngineError::resolve(
                        *line,
                        "Strict mode code may not include a with statement",
                    ));
                }

                self.resolve_expr(object)?;
                self.scopes.push(Scope::new(ScopeKind::With, &[]));
                self.resolve_stmt(body)?;
                self.scopes.pop();
            }

            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                self.resolve_block(block)?;

                if let Some(h) = handler {
                    let slots: Vec<(Name, DeclKind)> = h
                        .param
                        .iter()
                        .map(|p| (p.name.clone(), DeclKind::Parameter))
                        .collect();

                    let scoped = !slots.is_empty();
                    if scoped {
                        self.scopes.push(Scope::new(ScopeKind::Block, &slots));
                    }
                    if let Some(param) = &h.param {
                        self.resolve_identifier(param);
                    }
                    self.resolve_block(&h.body)?;
                    if scoped {
                        self.scopes.pop();
                    }

                    let _ = h.layout.set(ScopeLayout {
                        slots,
                        ..ScopeLayout::default()
                    });
                }

                if let Some(f) = finalizer {
                    self.resolve_block(f)?;
                }
            }
        }

        Ok(())
    }

    fn resolve_loop_body(&mut self, body: &Stmt) -> Result<()> {
        self.loop_depth += 1;
        let result = self.resolve_stmt(body);
        self.loop_depth -= 1;
        result
    }

    fn resolve_block(&mut self, block: &Block) -> Result<()> {
        let slots = lexical_names(&block.body)?;
        let scoped = !slots.is_empty();

        if scoped {
            check_var_collisions(&slots, &VarScan::of(&block.body))?;
            self.scopes.push(Scope::new(ScopeKind::Block, &slots));
        }

        self.resolve_statements(&block.body)?;

        if scoped {
            self.scopes.pop();
        }

        let _ = block.layout.set(ScopeLayout {
            slots,
            ..ScopeLayout::default()
        });

        Ok(())
    }

    fn resolve_function(&mut self, decl: &Rc<FunctionDecl>) -> Result<()> {
        let strict = self.strict || decl.has_use_strict;
        decl.strict.set(strict);

        debug!(
            "Resolving function '{}' (strict={})",
            decl.name.as_deref().unwrap_or("<anonymous>"),
            strict
        );

        let layout = function_layout(decl)?;
        let functions = layout.functions.clone();
        self.scopes.push(Scope::new(ScopeKind::Function, &layout.slots));
        let _ = decl.layout.set(layout);

        let saved_strict = mem::replace(&mut self.strict, strict);
        let saved_loops = mem::take(&mut self.loop_depth);
        self.functions.push(decl.clone());

        let result = (|| {
            for param in &decl.params {
                self.resolve_identifier(param);
            }
            self.resolve_hoisted(&functions)?;
            self.resolve_statements(&decl.body)
        })();

        self.functions.pop();
        self.loop_depth = saved_loops;
        self.strict = saved_strict;
        self.scopes.pop();

        result
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Expression resolution
    // ─────────────────────────────────────────────────────────────────────────

    fn resolve_expr(&mut self, expr: &Expr) -> Result<()> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.resolve_expr_inner(expr))
    }

    fn resolve_expr_inner(&mut self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Literal(_) | Expr::This(_) => {}

            Expr::Identifier(id) => self.resolve_identifier(id),

            Expr::Object { properties, .. } => {
                for (_, value) in properties {
                    self.resolve_expr(value)?;
                }
            }

            Expr::Function(decl) => self.resolve_function(decl)?,

            Expr::Unary { op, operand, line } => {
                if *op == UnaryOp::Delete && self.strict && matches!(**operand, Expr::Identifier(_)) {
                    return Err(EngineError::resolve(
                        *line,
                        "Delete of an unqualified identifier in strict mode.",
                    ));
                }
                self.resolve_expr(operand)?;
            }

            Expr::Update { target, .. } => self.resolve_expr(target)?,

            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)?;
            }

            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                self.resolve_expr(test)?;
                self.resolve_expr(consequent)?;
                self.resolve_expr(alternate)?;
            }

            Expr::Assign { target, value, .. } => {
                self.resolve_expr(value)?;
                self.resolve_expr(target)?;
            }

            Expr::Member {
                object, property, ..
            } => {
                self.resolve_expr(object)?;
                if let MemberKey::Computed(key) = property {
                    self.resolve_expr(key)?;
                }
            }

            Expr::Call {
                callee,
                arguments,
                site,
                ..
            } => {
                site.mark_strict(self.strict);

                self.resolve_expr(callee)?;
                for arg in arguments {
                    self.resolve_expr(arg)?;
                }
            }
        }

        Ok(())
    }

    /// Static slot when the name is found before reaching a `with` frame or
    /// the global scope.
    fn resolve_identifier(&self, id: &Identifier) {
        let mut depth = 0;

        for scope in self.scopes.iter().rev() {
            if matches!(scope.kind, ScopeKind::Global | ScopeKind::With) {
                break;
            }

            if let Some(&index) = scope.names.get(&id.name) {
                id.slot.set(Slot::Static { depth, index });
                return;
            }

            depth += 1;
        }

        id.slot.set(Slot::Dynamic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn function_body(program: &Program, index: usize) -> &[Stmt] {
        match &program.body[index] {
            Stmt::Function(decl) => &decl.body,
            other => panic!("expected function, got {:?}", other),
        }
    }

    fn returned_identifier(stmt: &Stmt) -> Slot {
        match stmt {
            Stmt::Return {
                value: Some(Expr::Identifier(id)),
                ..
            } => id.slot.get(),
            other => panic!("expected `return ident`, got {:?}", other),
        }
    }

    #[test]
    fn locals_get_static_slots() {
        let program = parse_program("function f(a) { var b; return b; }").unwrap();
        resolve_script(&program).unwrap();

        let body = function_body(&program, 0);
        assert_eq!(
            returned_identifier(&body[1]),
            Slot::Static { depth: 0, index: 1 }
        );
    }

    #[test]
    fn closure_reference_counts_frames() {
        let src = "function f(a) { function g() { return a; } return g; }";
        let program = parse_program(src).unwrap();
        resolve_script(&program).unwrap();

        let Stmt::Function(g) = &function_body(&program, 0)[0] else {
            panic!("expected nested function");
        };
        assert_eq!(
            returned_identifier(&g.body[0]),
            Slot::Static { depth: 1, index: 0 }
        );
    }

    #[test]
    fn globals_and_with_are_dynamic() {
        let src = "var x; function f(o) { with (o) return x; }";
        let program = parse_program(src).unwrap();
        resolve_script(&program).unwrap();

        let Stmt::With { body, .. } = &function_body(&program, 1)[0] else {
            panic!("expected with");
        };
        assert_eq!(returned_identifier(body), Slot::Dynamic);
    }

    #[test]
    fn eval_call_site_records_strictness() {
        let program = parse_program("function f() { 'use strict'; return eval('1'); }").unwrap();
        resolve_script(&program).unwrap();

        let Some(Stmt::Return {
            value: Some(Expr::Call { site, .. }),
            ..
        }) = function_body(&program, 0).last()
        else {
            panic!("expected `return eval(...)`");
        };
        assert!(site.callee_is_eval_identifier());
        assert!(site.is_strict());
    }

    #[test]
    fn strictness_is_inherited() {
        let src = "'use strict'; function f() { return function () {}; }";
        let program = parse_program(src).unwrap();
        resolve_script(&program).unwrap();

        let Stmt::Function(decl) = &program.body[1] else {
            panic!("expected function");
        };
        assert!(decl.strict.get());
        assert!(!decl.has_use_strict);
    }

    #[test]
    fn sloppy_eval_hoists_vars_out() {
        let program = parse_program("var a; let b; function c() {}").unwrap();
        resolve_eval(&program, false).unwrap();

        let layout = program.layout.get().unwrap();
        assert_eq!(layout.slots.len(), 1);
        assert_eq!(&*layout.hoisted[0], "a");
        assert_eq!(&*layout.hoisted[1], "c");
    }

    #[test]
    fn strict_eval_keeps_vars() {
        let program = parse_program("var a; function c() {}").unwrap();
        resolve_eval(&program, true).unwrap();

        let layout = program.layout.get().unwrap();
        assert!(layout.hoisted.is_empty());
        assert_eq!(layout.slots.len(), 2);
    }

    #[test]
    fn early_errors() {
        for src in [
            "'use strict'; with ({}) {}",
            "'use strict'; var x; delete x;",
            "let a; let a;",
            "let a; { var a; }",
            "return 1;",
            "break;",
            "function f() { continue; }",
        ] {
            let program = parse_program(src).unwrap();
            let err = resolve_script(&program).unwrap_err();
            assert!(err.is_static(), "{src}: {err}");
        }
    }
}
