//! Direct versus indirect `eval`.
//!
//! Every call expression carries an [`EvalCallSite`] fixed at parse time.
//! A call is a *direct* eval only when the callee is written as the bare
//! identifier `eval` **and** the value that identifier resolves to right now
//! is the interpreter's intrinsic eval function.  The identity test runs on
//! every invocation: scripts may rebind `eval` between two executions of the
//! same call site.
//!
//! Direct eval runs the text in a fresh `EvalScope` frame whose parent is
//! the caller's current environment, with the caller's `this`.  Everything
//! else that reaches the intrinsic (`(eval || 0)(…)`, `var e = eval; e(…)`,
//! `obj.eval(…)`) runs it against the global environment.

use std::rc::Rc;

use log::{debug, info};

use crate::ast::EvalCallSite;
use crate::environment::{self, DeclKind, ScopeKind};
use crate::error::{EngineError, ErrorKind};
use crate::interpreter::{CallFrame, EvalResult, Fatal, FrameKind, FrameState, Interpreter, Unwind};
use crate::parser::parse_program;
use crate::resolver::resolve_eval;
use crate::rope::Rope;
use crate::value::{FunctionRef, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Ordinary,
    DirectEval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalMode {
    /// Caller's scope and `this`; `strict_caller` is the call site's
    /// strictness.
    Direct { strict_caller: bool },
    /// Global scope, global `this`, sloppy unless the text says otherwise.
    Indirect,
}

/// Decides how the call at `site` treats the already resolved `callee`.
pub fn classify(site: &EvalCallSite, callee: &Value, intrinsic: &FunctionRef) -> CallKind {
    if !site.callee_is_eval_identifier() {
        return CallKind::Ordinary;
    }

    match callee {
        Value::Function(func) if Rc::ptr_eq(func, intrinsic) => CallKind::DirectEval,
        _ => {
            debug!("'eval' is rebound at this call site; making an ordinary call");
            CallKind::Ordinary
        }
    }
}

/// Static failures of the eval text surface as a `SyntaxError` thrown at
/// the call site.  Exceeding the nesting limit stays fatal.
fn rethrow(err: EngineError) -> Unwind {
    match err {
        EngineError::StackOverflow => Unwind::Fatal(Fatal::StackOverflow),
        EngineError::OutOfMemory => Unwind::Fatal(Fatal::OutOfMemory),
        other => Unwind::error(ErrorKind::SyntaxError, other.message()),
    }
}

/// Runs the first argument as program text.  A non-string argument is
/// returned as is.
pub fn perform_eval(interp: &mut Interpreter, args: &[Value], mode: EvalMode) -> EvalResult<Value> {
    let source = match args.first() {
        Some(Value::String(source)) => source.clone(),
        Some(other) => return Ok(other.clone()),
        None => return Ok(Value::Undefined),
    };

    let (strict_caller, parent, this) = match mode {
        EvalMode::Direct { strict_caller } => {
            (strict_caller, interp.env.clone(), interp.current_this())
        }
        EvalMode::Indirect => (
            false,
            interp.global.clone(),
            Value::Object(interp.global_object.clone()),
        ),
    };

    info!(
        "{} eval of {} code units",
        if matches!(mode, EvalMode::Direct { .. }) {
            "Direct"
        } else {
            "Indirect"
        },
        source.len()
    );

    let text = source_text(&source);
    let program = parse_program(&text).map_err(rethrow)?;
    resolve_eval(&program, strict_caller).map_err(rethrow)?;

    let strict = program.strict.get();
    let Some(layout) = program.layout.get() else {
        return Err(Unwind::error(ErrorKind::SyntaxError, "eval code was not resolved"));
    };

    let env = environment::new(ScopeKind::EvalScope, Some(parent), strict);
    {
        let mut frame = env.borrow_mut();
        for (name, kind) in &layout.slots {
            frame.define_slot(name, *kind, Value::Undefined);
        }
    }

    let frame = CallFrame {
        kind: FrameKind::Eval,
        callee: Rc::from("eval"),
        function: Some(interp.intrinsic_eval.clone()),
        this,
        caller_env: interp.env.clone(),
        strict,
        state: FrameState::Created,
    };

    let completion = interp.run_frame(frame, env.clone(), |interp| {
        // Sloppy code declares through this frame into the caller's
        // variable scope; strict code keeps everything here.
        for name in &layout.hoisted {
            environment::declare_eval_var(&env, name, DeclKind::Var, None)?;
        }

        if strict {
            interp.instantiate_functions(&layout.functions, &env, |env, name, value| {
                environment::declare(env, name, DeclKind::Function, Some(value))
            })?;
        } else {
            interp.instantiate_functions(&layout.functions, &env, |env, name, value| {
                environment::declare_eval_var(env, name, DeclKind::Function, Some(value))
            })?;
        }

        interp.execute_statements(&program.body)
    })?;

    Ok(completion.unwrap_or(Value::Undefined))
}

/// Converts eval source to scannable text. Lone surrogates can only appear
/// meaningfully inside string literals, so each one is rewritten as a `\u`
/// escape that the scanner decodes back to the same code unit.
fn source_text(source: &Rope) -> String {
    let flat = source.flatten();
    let mut text = String::with_capacity(flat.len());
    let mut backslashes = 0usize;

    for decoded in char::decode_utf16(flat.code_units()) {
        match decoded {
            Ok(c) => {
                backslashes = if c == '\\' { backslashes + 1 } else { 0 };
                text.push(c);
            }
            Err(e) => {
                // An odd run already opened an escape; finish it in place.
                if backslashes % 2 == 0 {
                    text.push('\\');
                }
                text.push_str(&format!("u{:04x}", e.unpaired_surrogate()));
                backslashes = 0;
            }
        }
    }

    text
}
