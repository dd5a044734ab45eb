//! Tree-walking evaluator.
//!
//! Expressions evaluate to `Result<Value, Unwind>`.  The `Err` side carries
//! every non-local transfer: `return`, `break`, `continue`, thrown values
//! and the two fatal conditions.  Fatal unwinds skip `catch` *and*
//! `finally` and end the run.
//!
//! `this` lives in the call frame, never in an environment.

use std::io::{self, Write};
use std::mem;
use std::rc::Rc;

use log::{debug, info, warn};
use thiserror::Error;

use crate::ast::{
    AssignOp, BinaryOp, Block, Expr, FunctionDecl, Identifier, Literal, LogicalOp, MemberKey,
    Name, Program, ScopeLayout, Slot, Stmt, UnaryOp, UpdateOp,
};
use crate::environment::{self, DeclKind, EnvRef, ScopeError, ScopeKind};
use crate::error::{EngineError, ErrorKind, Result};
use crate::eval_dispatch::{self, CallKind, EvalMode};
use crate::parser::parse_program;
use crate::resolver::resolve_script;
use crate::rope::{Rope, RopeError, MAX_STRING_LENGTH};
use crate::value::{
    number_to_string, FunctionKind, FunctionRef, JsFunction, JsObject, NativeFn, ObjectRef,
    ThisMode, Value,
};

/// Maximum number of active script frames.
pub const MAX_CALL_DEPTH: usize = 1000;

const STACK_RED_ZONE: usize = 64 * 1024;
const STACK_GROW_SIZE: usize = 1024 * 1024;

/// Conditions no script handler may observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fatal {
    #[error("Maximum call stack size exceeded")]
    StackOverflow,

    #[error("Out of memory")]
    OutOfMemory,
}

/// Non-local exits from evaluation.
#[derive(Debug, Error)]
pub enum Unwind {
    #[error("return {0}")]
    Return(Value),

    #[error("break")]
    Break,

    #[error("continue")]
    Continue,

    #[error("Uncaught {0}")]
    Throw(Value),

    #[error(transparent)]
    Fatal(#[from] Fatal),
}

impl Unwind {
    /// Throw a fresh engine error object.
    pub fn error(kind: ErrorKind, message: impl AsRef<str>) -> Self {
        debug!("Throwing {}: {}", kind, message.as_ref());
        Unwind::Throw(Value::error(kind, message.as_ref()))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Unwind::Fatal(_))
    }

    /// Host-facing form of an unwind that escaped the outermost frame.
    pub fn into_engine_error(self) -> EngineError {
        match self {
            Unwind::Throw(value) => {
                let (kind, message) = value.error_details();
                EngineError::thrown(kind, message)
            }
            Unwind::Fatal(Fatal::StackOverflow) => EngineError::StackOverflow,
            Unwind::Fatal(Fatal::OutOfMemory) => EngineError::OutOfMemory,
            other => EngineError::thrown(None, format!("Illegal {}", other)),
        }
    }
}

impl From<ScopeError> for Unwind {
    fn from(err: ScopeError) -> Self {
        Unwind::error(err.kind(), err.to_string())
    }
}

impl From<RopeError> for Unwind {
    fn from(err: RopeError) -> Self {
        Unwind::error(ErrorKind::RangeError, err.to_string())
    }
}

pub type EvalResult<T> = std::result::Result<T, Unwind>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Script,
    Function,
    Eval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Created,
    Running,
    Returned,
    Thrown,
}

/// One active script, function or eval invocation.
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub kind: FrameKind,
    pub callee: Name,
    /// The function being run; `None` for the script frame.
    pub function: Option<FunctionRef>,
    pub this: Value,
    /// Environment that was current when the frame was pushed.  The caller
    /// resumes in it once this frame pops.
    pub caller_env: EnvRef,
    pub strict: bool,
    pub state: FrameState,
}

/// Notified once for every frame a thrown value unwinds through.
pub trait UnwindHook {
    fn frame_unwound(&mut self, frame: &CallFrame, thrown: &Value);
}

pub struct Interpreter {
    pub(crate) global: EnvRef,
    pub(crate) global_object: ObjectRef,
    pub(crate) env: EnvRef,
    pub(crate) frames: Vec<CallFrame>,
    pub(crate) intrinsic_eval: FunctionRef,
    max_call_depth: usize,
    unwind_hook: Option<Box<dyn UnwindHook>>,
    output: Box<dyn Write>,
    string_methods: Vec<(&'static str, FunctionRef)>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// Fresh global environment with `eval`, `print`, `undefined`, `NaN` and
    /// `Infinity`.  `print` writes to stdout.
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(output: Box<dyn Write>) -> Self {
        info!("Initializing Interpreter");

        let global = environment::new_global();
        let intrinsic_eval = JsFunction::native("eval", 1, eval_native);

        let string_methods = vec![
            ("charAt", JsFunction::native("charAt", 1, char_at_native)),
            ("charCodeAt", JsFunction::native("charCodeAt", 1, char_code_at_native)),
        ];

        let mut interp = Self {
            env: global.clone(),
            global,
            global_object: JsObject::new_ref(),
            frames: Vec::new(),
            intrinsic_eval: intrinsic_eval.clone(),
            max_call_depth: MAX_CALL_DEPTH,
            unwind_hook: None,
            output,
            string_methods,
        };

        debug!("Defining built-in globals");

        interp.define_global("eval", Value::Function(intrinsic_eval));
        interp.define_native("print", 0, print_native);
        interp.define_global("undefined", Value::Undefined);
        interp.define_global("NaN", Value::Number(f64::NAN));
        interp.define_global("Infinity", Value::Number(f64::INFINITY));

        interp
    }

    // ───────────────────────── host API ─────────────────────────

    /// Binds `name` in the global environment.
    pub fn define_global(&mut self, name: &str, value: Value) {
        let name: Name = Rc::from(name);

        if let Err(err) = environment::declare(&self.global, &name, DeclKind::Var, None)
            .and_then(|()| environment::assign(&self.global, &name, value, false))
        {
            warn!("Could not define global '{}': {}", name, err);
        }
    }

    pub fn define_native(&mut self, name: &str, arity: usize, func: NativeFn) {
        self.define_global(name, Value::Function(JsFunction::native(name, arity, func)));
    }

    /// Current value of a global binding.
    pub fn global_value(&self, name: &str) -> Option<Value> {
        environment::lookup(&self.global, &Rc::from(name)).ok().flatten()
    }

    pub fn set_max_call_depth(&mut self, depth: usize) {
        self.max_call_depth = depth;
    }

    pub fn set_unwind_hook(&mut self, hook: Box<dyn UnwindHook>) {
        self.unwind_hook = Some(hook);
    }

    pub fn global_env(&self) -> &EnvRef {
        &self.global
    }

    pub fn global_object(&self) -> &ObjectRef {
        &self.global_object
    }

    pub fn current_env(&self) -> &EnvRef {
        &self.env
    }

    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    /// The one function object direct eval is recognised by.
    pub fn intrinsic_eval(&self) -> &FunctionRef {
        &self.intrinsic_eval
    }

    /// Parses, resolves and runs `source` as a script.  Returns the
    /// completion value.
    pub fn run(&mut self, source: &str) -> Result<Value> {
        let program = parse_program(source)?;
        resolve_script(&program)?;
        self.execute_program(&program)
    }

    /// Runs an already resolved script.
    pub fn execute_program(&mut self, program: &Program) -> Result<Value> {
        info!("Executing program with {} statements", program.body.len());

        let frame = CallFrame {
            kind: FrameKind::Script,
            callee: Rc::from("<script>"),
            function: None,
            this: Value::Object(self.global_object.clone()),
            caller_env: self.env.clone(),
            strict: program.strict.get(),
            state: FrameState::Created,
        };

        let global = self.global.clone();
        let result = self.run_frame(frame, global, |interp| {
            interp.instantiate_script(program)?;
            interp.execute_statements(&program.body)
        });

        match result {
            Ok(completion) => {
                info!("Program completed successfully");
                Ok(completion.unwrap_or(Value::Undefined))
            }
            Err(unwind) => Err(unwind.into_engine_error()),
        }
    }

    /// Calls `callee` from host code.
    pub fn call(&mut self, callee: &Value, this: Value, args: &[Value]) -> Result<Value> {
        self.call_value(callee, this, args.to_vec(), "function")
            .map_err(Unwind::into_engine_error)
    }

    // ───────────────────────── frames ─────────────────────────

    pub(crate) fn current_this(&self) -> Value {
        match self.frames.last() {
            Some(frame) => frame.this.clone(),
            None => Value::Object(self.global_object.clone()),
        }
    }

    pub(crate) fn is_strict(&self) -> bool {
        self.frames.last().is_some_and(|f| f.strict)
    }

    /// Runs `body` in `env`, restoring the previous environment afterwards.
    pub(crate) fn in_env<T>(&mut self, env: EnvRef, body: impl FnOnce(&mut Self) -> T) -> T {
        let previous = mem::replace(&mut self.env, env);
        let result = body(self);
        self.env = previous;
        result
    }

    /// Pushes `frame`, runs `body` in `env` and pops the frame again,
    /// tracking its state and notifying the unwind hook on a throw.
    pub(crate) fn run_frame<T>(
        &mut self,
        mut frame: CallFrame,
        env: EnvRef,
        body: impl FnOnce(&mut Self) -> EvalResult<T>,
    ) -> EvalResult<T> {
        if self.frames.len() >= self.max_call_depth {
            warn!("Call depth limit {} reached", self.max_call_depth);
            return Err(Fatal::StackOverflow.into());
        }

        frame.state = FrameState::Running;
        self.frames.push(frame);

        let result = self.in_env(env, body);

        if let Some(mut frame) = self.frames.pop() {
            match &result {
                Err(Unwind::Throw(value)) => {
                    frame.state = FrameState::Thrown;
                    if let Some(hook) = self.unwind_hook.as_mut() {
                        hook.frame_unwound(&frame, value);
                    }
                }
                Err(Unwind::Fatal(_)) => frame.state = FrameState::Thrown,
                _ => frame.state = FrameState::Returned,
            }
            debug!("Frame '{}' finished as {:?}", frame.callee, frame.state);
        }

        result
    }

    fn instantiate_script(&mut self, program: &Program) -> EvalResult<()> {
        let Some(layout) = program.layout.get() else {
            return Err(Unwind::error(ErrorKind::SyntaxError, "Script was not resolved"));
        };

        let global = self.global.clone();

        for (name, kind) in &layout.slots {
            environment::declare(&global, name, *kind, None)?;
        }
        for name in &layout.hoisted {
            environment::declare(&global, name, DeclKind::Var, None)?;
        }
        self.instantiate_functions(&layout.functions, &global, |env, name, value| {
            environment::declare(env, name, DeclKind::Function, Some(value))
        })
    }

    /// Creates the closures of hoisted declarations in `env` and binds each
    /// with `bind`.
    pub(crate) fn instantiate_functions(
        &mut self,
        functions: &[Rc<FunctionDecl>],
        env: &EnvRef,
        bind: impl Fn(&EnvRef, &Name, Value) -> std::result::Result<(), ScopeError>,
    ) -> EvalResult<()> {
        for decl in functions {
            let Some(name) = &decl.name else { continue };
            let closure = self.make_closure(decl, env);
            bind(env, name, closure)?;
        }
        Ok(())
    }

    pub(crate) fn make_closure(&self, decl: &Rc<FunctionDecl>, env: &EnvRef) -> Value {
        let this_mode = if decl.is_arrow {
            ThisMode::Lexical(self.current_this())
        } else if decl.strict.get() {
            ThisMode::Strict
        } else {
            ThisMode::Sloppy
        };

        Value::Function(JsFunction::closure(decl.clone(), env.clone(), this_mode))
    }

    fn scoped_env(&self, layout: Option<&ScopeLayout>) -> Option<EnvRef> {
        let layout = layout.filter(|l| !l.slots.is_empty())?;
        let env = environment::new(ScopeKind::Block, Some(self.env.clone()), self.is_strict());

        {
            let mut frame = env.borrow_mut();
            for (name, kind) in &layout.slots {
                frame.define_slot(name, *kind, Value::Undefined);
            }
        }

        Some(env)
    }

    // ───────────────────────── calls ─────────────────────────

    pub(crate) fn call_value(
        &mut self,
        callee: &Value,
        this: Value,
        args: Vec<Value>,
        description: &str,
    ) -> EvalResult<Value> {
        match callee {
            Value::Function(func) => self.call_function(func, this, args),
            _ => Err(Unwind::error(
                ErrorKind::TypeError,
                format!("{} is not a function", description),
            )),
        }
    }

    pub fn call_function(
        &mut self,
        func: &FunctionRef,
        this: Value,
        args: Vec<Value>,
    ) -> EvalResult<Value> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || {
            self.call_function_inner(func, this, args)
        })
    }

    fn call_function_inner(
        &mut self,
        func: &FunctionRef,
        this: Value,
        args: Vec<Value>,
    ) -> EvalResult<Value> {
        debug!("Calling function '{}' with {} args", func.name, args.len());

        let closure = match &func.kind {
            FunctionKind::Native(native) => return (native.func)(self, &this, &args),
            FunctionKind::Closure(closure) => closure,
        };

        let decl = closure.decl.clone();
        let strict = decl.strict.get();
        let Some(layout) = decl.layout.get() else {
            return Err(Unwind::error(ErrorKind::SyntaxError, "Function was not resolved"));
        };

        let this = match &closure.this_mode {
            ThisMode::Lexical(captured) => captured.clone(),
            ThisMode::Strict => this,
            ThisMode::Sloppy => match this {
                Value::Undefined | Value::Null => Value::Object(self.global_object.clone()),
                other => other,
            },
        };

        let env = environment::new(ScopeKind::Function, Some(closure.env.clone()), strict);
        {
            let mut frame = env.borrow_mut();
            for (name, kind) in &layout.slots {
                frame.define_slot(name, *kind, Value::Undefined);
            }
        }

        // Missing arguments stay undefined; a repeated name takes the last.
        for (i, param) in decl.params.iter().enumerate() {
            let arg = args.get(i).cloned().unwrap_or(Value::Undefined);
            environment::declare(&env, &param.name, DeclKind::Parameter, Some(arg))?;
        }

        if let (Some(_), Some(name)) = (layout.callee_slot, &decl.name) {
            let callee = Value::Function(func.clone());
            environment::declare(&env, name, DeclKind::Function, Some(callee))?;
        }

        let frame = CallFrame {
            kind: FrameKind::Function,
            callee: func.name.clone(),
            function: Some(func.clone()),
            this,
            caller_env: self.env.clone(),
            strict,
            state: FrameState::Created,
        };

        let result = self.run_frame(frame, env.clone(), |interp| {
            interp.instantiate_functions(&layout.functions, &env, |env, name, value| {
                environment::declare(env, name, DeclKind::Function, Some(value))
            })?;
            interp.execute_statements(&decl.body)
        });

        match result {
            Ok(_) => Ok(Value::Undefined),
            Err(Unwind::Return(value)) => Ok(value),
            Err(Unwind::Break | Unwind::Continue) => Ok(Value::Undefined),
            Err(other) => Err(other),
        }
    }

    // ───────────────────────── statements ─────────────────────────

    /// Executes `statements` in order; the result is the completion value
    /// of the last statement that produced one.
    pub(crate) fn execute_statements(&mut self, statements: &[Stmt]) -> EvalResult<Option<Value>> {
        let mut completion = None;

        for stmt in statements {
            if let Some(value) = self.execute(stmt)? {
                completion = Some(value);
            }
        }

        Ok(completion)
    }

    pub fn execute(&mut self, stmt: &Stmt) -> EvalResult<Option<Value>> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.execute_inner(stmt))
    }

    fn execute_inner(&mut self, stmt: &Stmt) -> EvalResult<Option<Value>> {
        match stmt {
            Stmt::Expression(expr) => Ok(Some(self.evaluate(expr)?)),

            Stmt::Declaration {
                kind, declarations, ..
            } => {
                for d in declarations {
                    if kind.is_lexical() {
                        let value = match &d.init {
                            Some(init) => self.evaluate(init)?,
                            None => Value::Undefined,
                        };
                        self.initialize_identifier(&d.target, value)?;
                    } else if let Some(init) = &d.init {
                        let value = self.evaluate(init)?;
                        self.write_identifier(&d.target, value)?;
                    }
                }
                Ok(None)
            }

            Stmt::Function(_) | Stmt::Empty => Ok(None),

            Stmt::Block(block) => self.execute_block(block),

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)
                } else if let Some(else_stmt) = else_branch {
                    self.execute(else_stmt)
                } else {
                    Ok(None)
                }
            }

            Stmt::While { condition, body } => {
                debug!("Entering while loop");

                let mut completion = None;
                while self.evaluate(condition)?.is_truthy() {
                    match self.execute(body) {
                        Ok(value) => completion = value.or(completion),
                        Err(Unwind::Break) => break,
                        Err(Unwind::Continue) => continue,
                        Err(other) => return Err(other),
                    }
                }
                Ok(completion)
            }

            Stmt::For {
                init,
                condition,
                update,
                body,
                layout,
            } => {
                let env = self
                    .scoped_env(layout.get())
                    .unwrap_or_else(|| self.env.clone());

                self.in_env(env, |interp| {
                    if let Some(init) = init {
                        interp.execute(init)?;
                    }

                    let mut completion = None;
                    loop {
                        if let Some(condition) = condition {
                            if !interp.evaluate(condition)?.is_truthy() {
                                break;
                            }
                        }

                        match interp.execute(body) {
                            Ok(value) => completion = value.or(completion),
                            Err(Unwind::Break) => break,
                            Err(Unwind::Continue) => {}
                            Err(other) => return Err(other),
                        }

                        if let Some(update) = update {
                            interp.evaluate(update)?;
                        }
                    }
                    Ok(completion)
                })
            }

            Stmt::Break(_) => Err(Unwind::Break),

            Stmt::Continue(_) => Err(Unwind::Continue),

            Stmt::Return { value, .. } => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Undefined,
                };
                Err(Unwind::Return(value))
            }

            Stmt::With { object, body, .. } => {
                let target = self.evaluate(object)?;
                let env = environment::enter_with(&self.env, &target)?;
                self.in_env(env, |interp| interp.execute(body))
            }

            Stmt::Throw { value, .. } => {
                let thrown = self.evaluate(value)?;
                Err(Unwind::Throw(thrown))
            }

            Stmt::Try {
                block,
                handler,
                finalizer,
                ..
            } => {
                let result = match (self.execute_block(block), handler) {
                    (Err(Unwind::Throw(thrown)), Some(handler)) => {
                        debug!("Caught {}", thrown);

                        let env = match &handler.param {
                            Some(param) => {
                                let env = environment::new(
                                    ScopeKind::Block,
                                    Some(self.env.clone()),
                                    self.is_strict(),
                                );
                                env.borrow_mut()
                                    .define_slot(&param.name, DeclKind::Parameter, thrown);
                                env
                            }
                            None => self.env.clone(),
                        };
                        self.in_env(env, |interp| interp.execute_block(&handler.body))
                    }
                    (other, _) => other,
                };

                let fatal = matches!(result, Err(Unwind::Fatal(_)));
                if let (Some(finalizer), false) = (finalizer, fatal) {
                    self.execute_block(finalizer)?;
                }
                result
            }
        }
    }

    fn execute_block(&mut self, block: &Block) -> EvalResult<Option<Value>> {
        match self.scoped_env(block.layout.get()) {
            Some(env) => self.in_env(env, |interp| interp.execute_statements(&block.body)),
            None => self.execute_statements(&block.body),
        }
    }

    // ───────────────────────── identifiers ─────────────────────────

    fn lookup_identifier(&self, id: &Identifier) -> EvalResult<Option<Value>> {
        let found = match id.slot.get() {
            Slot::Static { depth, index } => {
                environment::lookup_slot(&self.env, depth, index, &id.name)?
            }
            Slot::Dynamic | Slot::Unresolved => environment::lookup(&self.env, &id.name)?,
        };
        Ok(found)
    }

    pub(crate) fn read_identifier(&self, id: &Identifier) -> EvalResult<Value> {
        match self.lookup_identifier(id)? {
            Some(value) => Ok(value),
            None => Err(ScopeError::NotDefined(id.name.clone()).into()),
        }
    }

    fn write_identifier(&self, id: &Identifier, value: Value) -> EvalResult<()> {
        let strict = self.is_strict();

        match id.slot.get() {
            Slot::Static { depth, index } => {
                environment::assign_slot(&self.env, depth, index, &id.name, value, strict)?
            }
            Slot::Dynamic | Slot::Unresolved => {
                environment::assign(&self.env, &id.name, value, strict)?
            }
        }
        Ok(())
    }

    fn initialize_identifier(&self, id: &Identifier, value: Value) -> EvalResult<()> {
        match id.slot.get() {
            Slot::Static { depth: 0, index } => {
                environment::initialize_slot(&self.env, index, &id.name, value)?
            }
            _ => environment::initialize(&self.env, &id.name, value)?,
        }
        Ok(())
    }

    // ───────────────────────── expressions ─────────────────────────

    pub fn evaluate(&mut self, expr: &Expr) -> EvalResult<Value> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.evaluate_inner(expr))
    }

    fn evaluate_inner(&mut self, expr: &Expr) -> EvalResult<Value> {
        match expr {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::Number(*n),
                Literal::Str(s) => Value::String(s.clone()),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Null => Value::Null,
            }),

            Expr::Identifier(id) => self.read_identifier(id),

            Expr::This(_) => Ok(self.current_this()),

            Expr::Object { properties, .. } => {
                let object = JsObject::new_ref();
                for (key, value) in properties {
                    let value = self.evaluate(value)?;
                    object.borrow_mut().set(key.clone(), value);
                }
                Ok(Value::Object(object))
            }

            Expr::Function(decl) => Ok(self.make_closure(decl, &self.env.clone())),

            Expr::Unary { op, operand, .. } => self.evaluate_unary(*op, operand),

            Expr::Update {
                op, prefix, target, ..
            } => self.evaluate_update(*op, *prefix, target),

            Expr::Binary {
                op, left, right, ..
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                binary(*op, &left, &right)
            }

            Expr::Logical { op, left, right } => {
                let left = self.evaluate(left)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.evaluate(right),
                }
            }

            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.evaluate(test)?.is_truthy() {
                    self.evaluate(consequent)
                } else {
                    self.evaluate(alternate)
                }
            }

            Expr::Assign {
                op, target, value, ..
            } => self.evaluate_assign(*op, target, value),

            Expr::Member {
                object, property, ..
            } => {
                let object = self.evaluate(object)?;
                let key = self.property_key(property)?;
                self.get_property(&object, &key)
            }

            Expr::Call {
                callee,
                arguments,
                site,
                ..
            } => {
                let (func, this) = match &**callee {
                    Expr::Member {
                        object, property, ..
                    } => {
                        let object = self.evaluate(object)?;
                        let key = self.property_key(property)?;
                        (self.get_property(&object, &key)?, object)
                    }
                    Expr::Identifier(id)
                        if matches!(id.slot.get(), Slot::Dynamic | Slot::Unresolved) =>
                    {
                        match environment::lookup_with_base(&self.env, &id.name)? {
                            (Some(func), base) => (func, base.unwrap_or(Value::Undefined)),
                            (None, _) => {
                                return Err(ScopeError::NotDefined(id.name.clone()).into())
                            }
                        }
                    }
                    other => (self.evaluate(other)?, Value::Undefined),
                };

                let mut args = Vec::with_capacity(arguments.len());
                for arg in arguments {
                    args.push(self.evaluate(arg)?);
                }

                match eval_dispatch::classify(site, &func, &self.intrinsic_eval) {
                    CallKind::DirectEval => eval_dispatch::perform_eval(
                        self,
                        &args,
                        EvalMode::Direct {
                            strict_caller: site.is_strict(),
                        },
                    ),
                    CallKind::Ordinary => {
                        self.call_value(&func, this, args, &describe_callee(callee))
                    }
                }
            }
        }
    }

    fn evaluate_unary(&mut self, op: UnaryOp, operand: &Expr) -> EvalResult<Value> {
        match op {
            UnaryOp::TypeOf => {
                // An unbound name is not an error here.
                let value = match operand {
                    Expr::Identifier(id) => self.lookup_identifier(id)?.unwrap_or(Value::Undefined),
                    other => self.evaluate(other)?,
                };
                Ok(Value::string(value.type_of()))
            }

            UnaryOp::Delete => match operand {
                Expr::Identifier(id) => Ok(Value::Bool(environment::delete_binding(
                    &self.env, &id.name,
                ))),
                Expr::Member {
                    object, property, ..
                } => {
                    let object = self.evaluate(object)?;
                    let key = self.property_key(property)?;
                    if let Some(target) = property_target(&object) {
                        target.borrow_mut().remove(&key);
                    }
                    Ok(Value::Bool(true))
                }
                other => {
                    self.evaluate(other)?;
                    Ok(Value::Bool(true))
                }
            },

            UnaryOp::Not => Ok(Value::Bool(!self.evaluate(operand)?.is_truthy())),

            UnaryOp::Negate => Ok(Value::Number(-self.evaluate(operand)?.to_number())),

            UnaryOp::Plus => Ok(Value::Number(self.evaluate(operand)?.to_number())),
        }
    }

    fn evaluate_update(&mut self, op: UpdateOp, prefix: bool, target: &Expr) -> EvalResult<Value> {
        let delta = match op {
            UpdateOp::Increment => 1.0,
            UpdateOp::Decrement => -1.0,
        };

        let (old, new) = match target {
            Expr::Identifier(id) => {
                let old = self.read_identifier(id)?.to_number();
                self.write_identifier(id, Value::Number(old + delta))?;
                (old, old + delta)
            }
            Expr::Member {
                object, property, ..
            } => {
                let object = self.evaluate(object)?;
                let key = self.property_key(property)?;
                let old = self.get_property(&object, &key)?.to_number();
                self.set_property(&object, key, Value::Number(old + delta))?;
                (old, old + delta)
            }
            _ => {
                return Err(Unwind::error(
                    ErrorKind::SyntaxError,
                    "Invalid left-hand side expression in update operation",
                ))
            }
        };

        Ok(Value::Number(if prefix { new } else { old }))
    }

    fn evaluate_assign(&mut self, op: AssignOp, target: &Expr, value: &Expr) -> EvalResult<Value> {
        match (target, op) {
            (Expr::Identifier(id), AssignOp::Assign) => {
                let value = self.evaluate(value)?;
                self.write_identifier(id, value.clone())?;
                Ok(value)
            }

            (Expr::Identifier(id), AssignOp::Compound(op)) => {
                let current = self.read_identifier(id)?;
                let rhs = self.evaluate(value)?;

                match (op, current) {
                    (BinaryOp::Add, Value::String(rope)) => self.append_to_identifier(id, rope, &rhs),
                    (_, current) => {
                        let result = binary(op, &current, &rhs)?;
                        self.write_identifier(id, result.clone())?;
                        Ok(result)
                    }
                }
            }

            (Expr::Member { object, property, .. }, op) => {
                let object = self.evaluate(object)?;
                let key = self.property_key(property)?;
                let value = self.evaluate(value)?;

                let result = match op {
                    AssignOp::Assign => value,
                    AssignOp::Compound(op) => {
                        let current = self.get_property(&object, &key)?;
                        binary(op, &current, &value)?
                    }
                };

                self.set_property(&object, key, result.clone())?;
                Ok(result)
            }

            _ => Err(Unwind::error(
                ErrorKind::SyntaxError,
                "Invalid left-hand side in assignment",
            )),
        }
    }

    /// `name += rhs` on a string.  The binding's own reference is released
    /// first so an unaliased rope can grow in place.
    fn append_to_identifier(&mut self, id: &Identifier, rope: Rope, rhs: &Value) -> EvalResult<Value> {
        let tail = rhs.to_rope();

        if rope.len() + tail.len() > MAX_STRING_LENGTH {
            return Err(RopeError::LengthOverflow.into());
        }

        self.write_identifier(id, Value::Undefined)?;
        let grown = rope.append(&tail)?;

        let result = Value::String(grown);
        self.write_identifier(id, result.clone())?;
        Ok(result)
    }

    // ───────────────────────── properties ─────────────────────────

    fn property_key(&mut self, property: &MemberKey) -> EvalResult<Name> {
        match property {
            MemberKey::Named(name) => Ok(name.clone()),
            MemberKey::Computed(expr) => {
                let key = self.evaluate(expr)?;
                Ok(match key {
                    Value::Number(n) => Rc::from(number_to_string(n).as_str()),
                    other => Rc::from(other.to_rope().to_string_lossy().as_str()),
                })
            }
        }
    }

    fn get_property(&self, object: &Value, key: &str) -> EvalResult<Value> {
        match object {
            Value::Undefined | Value::Null => Err(Unwind::error(
                ErrorKind::TypeError,
                format!("Cannot read properties of {} (reading '{}')", object, key),
            )),

            Value::Object(obj) => Ok(obj.borrow().get(key).unwrap_or(Value::Undefined)),

            Value::Function(func) => {
                if let Some(value) = func.properties.borrow().get(key) {
                    return Ok(value);
                }
                Ok(match key {
                    "name" => Value::string(&func.name),
                    "length" => Value::Number(func.arity() as f64),
                    _ => Value::Undefined,
                })
            }

            Value::String(rope) => Ok(self.string_property(rope, key)),

            Value::Bool(_) | Value::Number(_) => Ok(Value::Undefined),
        }
    }

    /// `length`, indices and the code-unit methods, answered from the rope
    /// without flattening.
    fn string_property(&self, rope: &Rope, key: &str) -> Value {
        if key == "length" {
            return Value::Number(rope.len() as f64);
        }

        if let Ok(index) = key.parse::<usize>() {
            return match rope.char_at(index) {
                Ok(unit) => Value::String(Rope::from_utf16(&[unit])),
                Err(_) => Value::Undefined,
            };
        }

        self.string_methods
            .iter()
            .find(|(name, _)| *name == key)
            .map_or(Value::Undefined, |(_, f)| Value::Function(f.clone()))
    }

    fn set_property(&self, object: &Value, key: Name, value: Value) -> EvalResult<()> {
        match property_target(object) {
            Some(target) => {
                target.borrow_mut().set(key, value);
                Ok(())
            }
            None if matches!(object, Value::Undefined | Value::Null) => Err(Unwind::error(
                ErrorKind::TypeError,
                format!("Cannot set properties of {} (setting '{}')", object, key),
            )),
            None if self.is_strict() => Err(Unwind::error(
                ErrorKind::TypeError,
                format!("Cannot create property '{}' on {}", key, object.type_of()),
            )),
            None => Ok(()),
        }
    }
}

/// Property bag behind an object or function value.
fn property_target(value: &Value) -> Option<ObjectRef> {
    match value {
        Value::Object(obj) => Some(obj.clone()),
        Value::Function(func) => Some(func.properties.clone()),
        _ => None,
    }
}

fn describe_callee(callee: &Expr) -> String {
    match callee {
        Expr::Identifier(id) => id.name.to_string(),
        Expr::Member {
            object,
            property: MemberKey::Named(name),
            ..
        } => format!("{}.{}", describe_callee(object), name),
        Expr::This(_) => "this".to_owned(),
        _ => "expression".to_owned(),
    }
}

pub(crate) fn binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let numeric = |f: fn(f64, f64) -> f64| Ok(Value::Number(f(left.to_number(), right.to_number())));

    match op {
        BinaryOp::Add => {
            let stringy = |v: &Value| matches!(v, Value::String(_)) || v.is_object_like();
            if stringy(left) || stringy(right) {
                let joined = Rope::concat(&left.to_rope(), &right.to_rope())?;
                Ok(Value::String(joined))
            } else {
                numeric(|a, b| a + b)
            }
        }
        BinaryOp::Sub => numeric(|a, b| a - b),
        BinaryOp::Mul => numeric(|a, b| a * b),
        BinaryOp::Div => numeric(|a, b| a / b),
        BinaryOp::Rem => numeric(|a, b| a % b),

        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };

            let result = ordering.is_some_and(|o| match op {
                BinaryOp::Less => o.is_lt(),
                BinaryOp::LessEqual => o.is_le(),
                BinaryOp::Greater => o.is_gt(),
                _ => o.is_ge(),
            });
            Ok(Value::Bool(result))
        }

        BinaryOp::Equal => Ok(Value::Bool(left.loose_equals(right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!left.loose_equals(right))),
        BinaryOp::StrictEqual => Ok(Value::Bool(left.strict_equals(right))),
        BinaryOp::StrictNotEqual => Ok(Value::Bool(!left.strict_equals(right))),
    }
}

// ───────────────────────── built-in natives ─────────────────────────

/// The intrinsic reached through anything but a direct call site.
fn eval_native(interp: &mut Interpreter, _this: &Value, args: &[Value]) -> EvalResult<Value> {
    eval_dispatch::perform_eval(interp, args, EvalMode::Indirect)
}

fn print_native(interp: &mut Interpreter, _this: &Value, args: &[Value]) -> EvalResult<Value> {
    let line = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");

    if let Err(err) = writeln!(interp.output, "{}", line) {
        warn!("print failed: {}", err);
    }

    Ok(Value::Undefined)
}

fn index_argument(args: &[Value]) -> f64 {
    args.first().map_or(0.0, |v| {
        let n = v.to_number();
        if n.is_nan() {
            0.0
        } else {
            n.trunc()
        }
    })
}

fn char_at_native(_interp: &mut Interpreter, this: &Value, args: &[Value]) -> EvalResult<Value> {
    let rope = this.to_rope();
    let index = index_argument(args);

    if index < 0.0 {
        return Ok(Value::String(Rope::empty()));
    }

    Ok(match rope.char_at(index as usize) {
        Ok(unit) => Value::String(Rope::from_utf16(&[unit])),
        Err(_) => Value::String(Rope::empty()),
    })
}

fn char_code_at_native(
    _interp: &mut Interpreter,
    this: &Value,
    args: &[Value],
) -> EvalResult<Value> {
    let rope = this.to_rope();
    let index = index_argument(args);

    if index < 0.0 {
        return Ok(Value::Number(f64::NAN));
    }

    Ok(match rope.char_at(index as usize) {
        Ok(unit) => Value::Number(f64::from(unit)),
        Err(_) => Value::Number(f64::NAN),
    })
}
