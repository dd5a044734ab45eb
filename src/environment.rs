//! Scope chain.
//!
//! Every frame is an `Rc<RefCell<Environment>>` so closures can keep the
//! frame they were created in alive after the call that made it returns.
//!
//! Bindings live in a slot vector.  The resolver assigns most references a
//! `(depth, index)` pair up front; [`lookup_slot`] follows exactly `depth`
//! parent links and indexes the slot.  That shortcut is only sound while no
//! frame on the way has gained bindings the resolver could not see.  `with`
//! frames are dynamic from birth, and a variable scope becomes dynamic the
//! first time a sloppy direct `eval` adds a name to it.  Crossing a dynamic
//! frame sends the access back to the by-name walk.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use log::debug;
use thiserror::Error;

use crate::ast::Name;
use crate::error::ErrorKind;
use crate::value::{ObjectRef, Value};

/// Shared handle to a frame.
pub type EnvRef = Rc<RefCell<Environment>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Global,
    Function,
    Block,
    With,
    EvalScope,
}

/// How a name was introduced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Var,
    Let,
    Const,
    Function,
    Parameter,
}

impl DeclKind {
    /// `let` and `const` are block scoped and start uninitialized.
    pub fn is_lexical(self) -> bool {
        matches!(self, DeclKind::Let | DeclKind::Const)
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub mutable: bool,
    pub deletable: bool,
    pub initialized: bool,
    /// Introduced by `let`/`const`.
    pub lexical: bool,
}

impl Binding {
    fn new(kind: DeclKind, value: Value) -> Self {
        Self {
            value,
            mutable: kind != DeclKind::Const,
            deletable: false,
            initialized: !kind.is_lexical(),
            lexical: kind.is_lexical(),
        }
    }
}

/// Failures of binding operations, mapped onto script-visible errors by
/// the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("{0} is not defined")]
    NotDefined(Name),

    #[error("Cannot access '{0}' before initialization")]
    Uninitialized(Name),

    #[error("Assignment to constant variable '{0}'.")]
    ConstAssignment(Name),

    #[error("Identifier '{0}' has already been declared")]
    Redeclaration(Name),

    #[error("Cannot use 'with' on a non-object value")]
    WithNonObject,
}

impl ScopeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScopeError::NotDefined(_) | ScopeError::Uninitialized(_) => ErrorKind::ReferenceError,
            ScopeError::ConstAssignment(_) | ScopeError::WithNonObject => ErrorKind::TypeError,
            ScopeError::Redeclaration(_) => ErrorKind::SyntaxError,
        }
    }
}

#[derive(Debug)]
pub struct Environment {
    kind: ScopeKind,
    slots: Vec<Option<Binding>>,
    names: HashMap<Name, usize>,
    parent: Option<EnvRef>,
    object: Option<ObjectRef>,
    /// The `with` operand itself; calls to names found on `object` get it
    /// as `this`.
    with_this: Option<Value>,
    is_dynamic: bool,
    strict: bool,
}

impl Environment {
    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&EnvRef> {
        self.parent.as_ref()
    }

    /// Target object of a `with` frame.
    pub fn object(&self) -> Option<&ObjectRef> {
        self.object.as_ref()
    }

    pub fn is_dynamic(&self) -> bool {
        self.is_dynamic
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Marks the frame so static slot accesses that cross it fall back to
    /// name lookup.
    pub fn poison(&mut self) {
        self.is_dynamic = true;
    }

    /// Receives `var` and function declarations.
    pub fn is_variable_scope(&self) -> bool {
        match self.kind {
            ScopeKind::Global | ScopeKind::Function => true,
            ScopeKind::EvalScope => self.strict,
            ScopeKind::Block | ScopeKind::With => false,
        }
    }

    /// Own binding by name.
    pub fn binding(&self, name: &str) -> Option<&Binding> {
        let index = *self.names.get(name)?;
        self.slots.get(index)?.as_ref()
    }

    fn binding_mut(&mut self, name: &str) -> Option<&mut Binding> {
        let index = *self.names.get(name)?;
        self.slots.get_mut(index)?.as_mut()
    }

    pub fn has_own(&self, name: &str) -> bool {
        self.binding(name).is_some()
    }

    /// Live bindings in slot order.
    pub fn bindings(&self) -> impl Iterator<Item = (&Name, &Binding)> {
        let mut named: Vec<(&Name, usize)> = self.names.iter().map(|(n, &i)| (n, i)).collect();
        named.sort_by_key(|&(_, i)| i);
        named
            .into_iter()
            .filter_map(|(name, i)| self.slots.get(i)?.as_ref().map(|b| (name, b)))
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a binding, reusing the slot of a deleted binding of the same
    /// name.
    fn insert(&mut self, name: &Name, binding: Binding) -> usize {
        if let Some(&index) = self.names.get(name) {
            self.slots[index] = Some(binding);
            return index;
        }

        let index = self.slots.len();
        self.slots.push(Some(binding));
        self.names.insert(name.clone(), index);
        index
    }

    /// Slot `index` was created by the resolver's layout for `name`.
    pub fn define_slot(&mut self, name: &Name, kind: DeclKind, value: Value) -> usize {
        self.insert(name, Binding::new(kind, value))
    }
}

pub fn new_global() -> EnvRef {
    new(ScopeKind::Global, None, false)
}

pub fn new(kind: ScopeKind, parent: Option<EnvRef>, strict: bool) -> EnvRef {
    debug!("Creating {:?} environment (strict={})", kind, strict);

    Rc::new(RefCell::new(Environment {
        kind,
        slots: Vec::new(),
        names: HashMap::new(),
        parent,
        object: None,
        with_this: None,
        is_dynamic: false,
        strict,
    }))
}

/// `with (object) …` frame.  Always dynamic.
pub fn enter_with(parent: &EnvRef, object: &Value) -> Result<EnvRef, ScopeError> {
    let target = match object {
        Value::Object(obj) => obj.clone(),
        Value::Function(func) => func.properties.clone(),
        _ => return Err(ScopeError::WithNonObject),
    };

    let env = new(ScopeKind::With, Some(parent.clone()), false);
    {
        let mut frame = env.borrow_mut();
        frame.object = Some(target);
        frame.with_this = Some(object.clone());
        frame.is_dynamic = true;
    }

    Ok(env)
}

/// Calls `visit` on `env` and each ancestor until it returns `Some`.
fn walk<T>(env: &EnvRef, mut visit: impl FnMut(&EnvRef) -> Option<T>) -> Option<T> {
    let mut current = env.clone();

    loop {
        if let Some(found) = visit(&current) {
            return Some(found);
        }

        let parent = current.borrow().parent.clone();
        match parent {
            Some(p) => current = p,
            None => return None,
        }
    }
}

/// Nearest frame that receives `var` and function declarations.
pub fn variable_scope(env: &EnvRef) -> EnvRef {
    walk(env, |frame| frame.borrow().is_variable_scope().then(|| frame.clone()))
        .unwrap_or_else(|| root(env))
}

/// Outermost frame of the chain.
pub fn root(env: &EnvRef) -> EnvRef {
    let mut current = env.clone();

    loop {
        let parent = current.borrow().parent.clone();
        match parent {
            Some(p) => current = p,
            None => return current,
        }
    }
}

/// Introduces `name` of the given kind.
///
/// `var` and function declarations go to [`variable_scope`]; everything else
/// lands in `env` itself.  A repeated `var` keeps the current value, a
/// repeated function or parameter overwrites it, and a lexical name may not
/// be declared twice in one frame.
pub fn declare(
    env: &EnvRef,
    name: &Name,
    kind: DeclKind,
    init: Option<Value>,
) -> Result<(), ScopeError> {
    let target = match kind {
        DeclKind::Var | DeclKind::Function => variable_scope(env),
        _ => env.clone(),
    };
    let mut frame = target.borrow_mut();

    if let Some(existing) = frame.binding_mut(name) {
        if kind.is_lexical() || existing.lexical {
            return Err(ScopeError::Redeclaration(name.clone()));
        }

        match (kind, init) {
            (DeclKind::Var, _) | (_, None) => {}
            (_, Some(value)) => existing.value = value,
        }
        return Ok(());
    }

    let value = init.unwrap_or(Value::Undefined);
    frame.insert(name, Binding::new(kind, value));

    Ok(())
}

/// `var`/function declaration made by sloppy `eval` code.
///
/// The binding goes to the variable scope above `eval_env` and is
/// deletable.  Adding a new name poisons that scope.  A `let`/`const` of the
/// same name in any frame between the two is a conflict.
pub fn declare_eval_var(
    eval_env: &EnvRef,
    name: &Name,
    kind: DeclKind,
    init: Option<Value>,
) -> Result<(), ScopeError> {
    let target = variable_scope(eval_env);

    let conflict = walk(eval_env, |frame| {
        let f = frame.borrow();
        if f.binding(name).is_some_and(|b| b.lexical) {
            return Some(true);
        }
        Rc::ptr_eq(frame, &target).then_some(false)
    });

    if conflict == Some(true) {
        return Err(ScopeError::Redeclaration(name.clone()));
    }

    let mut frame = target.borrow_mut();

    if let Some(existing) = frame.binding_mut(name) {
        if let (DeclKind::Function, Some(value)) = (kind, init) {
            existing.value = value;
        }
        return Ok(());
    }

    debug!("eval introduces '{}' into {:?} scope", name, frame.kind);

    let mut binding = Binding::new(kind, init.unwrap_or(Value::Undefined));
    binding.deletable = true;
    frame.insert(name, binding);
    frame.is_dynamic = true;

    Ok(())
}

/// Result of a by-name search.
enum Found {
    Binding(EnvRef),
    Property(ObjectRef),
}

fn find(env: &EnvRef, name: &str) -> Option<Found> {
    walk(env, |frame| {
        let f = frame.borrow();
        if let Some(object) = &f.object {
            if object.borrow().has(name) {
                return Some(Found::Property(object.clone()));
            }
            return None;
        }
        f.has_own(name).then(|| Found::Binding(frame.clone()))
    })
}

/// By-name read.  `Ok(None)` means the name is not bound anywhere.
pub fn lookup(env: &EnvRef, name: &Name) -> Result<Option<Value>, ScopeError> {
    match find(env, name) {
        Some(Found::Property(object)) => Ok(object.borrow().get(name)),
        Some(Found::Binding(frame)) => {
            let f = frame.borrow();
            match f.binding(name) {
                Some(b) if !b.initialized => Err(ScopeError::Uninitialized(name.clone())),
                Some(b) => Ok(Some(b.value.clone())),
                None => Ok(None),
            }
        }
        None => Ok(None),
    }
}

/// By-name read of a callee.  Alongside the value comes the `with` operand
/// the name was found on, if any.
pub fn lookup_with_base(
    env: &EnvRef,
    name: &Name,
) -> Result<(Option<Value>, Option<Value>), ScopeError> {
    let base = walk(env, |frame| {
        let f = frame.borrow();
        match &f.object {
            Some(object) if object.borrow().has(name) => Some(f.with_this.clone()),
            Some(_) => None,
            None => f.has_own(name).then_some(None),
        }
    });

    Ok((lookup(env, name)?, base.flatten()))
}

/// Frame `depth` hops up, or `None` when a crossed frame is dynamic or the
/// chain is shorter than expected.
fn static_target(env: &EnvRef, depth: usize) -> Option<EnvRef> {
    let mut current = env.clone();

    for _ in 0..depth {
        let parent = {
            let f = current.borrow();
            if f.is_dynamic {
                return None;
            }
            f.parent.clone()
        };
        current = parent?;
    }

    Some(current)
}

/// Resolved read.  Falls back to [`lookup`] when the static path is no
/// longer trustworthy.
pub fn lookup_slot(
    env: &EnvRef,
    depth: usize,
    index: usize,
    name: &Name,
) -> Result<Option<Value>, ScopeError> {
    if let Some(target) = static_target(env, depth) {
        let f = target.borrow();
        if let Some(Some(binding)) = f.slots.get(index) {
            if !binding.initialized {
                return Err(ScopeError::Uninitialized(name.clone()));
            }
            return Ok(Some(binding.value.clone()));
        }
    }

    debug!("Slot ({}, {}) for '{}' is stale; walking the chain", depth, index, name);
    lookup(env, name)
}

fn write(binding: &mut Binding, name: &Name, value: Value) -> Result<(), ScopeError> {
    if !binding.initialized {
        return Err(ScopeError::Uninitialized(name.clone()));
    }
    if !binding.mutable {
        return Err(ScopeError::ConstAssignment(name.clone()));
    }

    binding.value = value;
    Ok(())
}

/// By-name write.
///
/// An unbound name becomes a deletable global in sloppy code and is a
/// `ReferenceError` in strict code.
pub fn assign(env: &EnvRef, name: &Name, value: Value, strict: bool) -> Result<(), ScopeError> {
    match find(env, name) {
        Some(Found::Property(object)) => {
            object.borrow_mut().set(name.clone(), value);
            Ok(())
        }
        Some(Found::Binding(frame)) => {
            let mut f = frame.borrow_mut();
            match f.binding_mut(name) {
                Some(binding) => write(binding, name, value),
                None => Err(ScopeError::NotDefined(name.clone())),
            }
        }
        None if strict => Err(ScopeError::NotDefined(name.clone())),
        None => {
            debug!("Creating implicit global '{}'", name);

            let global = root(env);
            let mut g = global.borrow_mut();
            let mut binding = Binding::new(DeclKind::Var, value);
            binding.deletable = true;
            g.insert(name, binding);
            Ok(())
        }
    }
}

/// Resolved write.
pub fn assign_slot(
    env: &EnvRef,
    depth: usize,
    index: usize,
    name: &Name,
    value: Value,
    strict: bool,
) -> Result<(), ScopeError> {
    if let Some(target) = static_target(env, depth) {
        let mut f = target.borrow_mut();
        if let Some(Some(binding)) = f.slots.get_mut(index) {
            return write(binding, name, value);
        }
    }

    assign(env, name, value, strict)
}

/// Ends the temporal dead zone of a `let`/`const` in `env` itself.
pub fn initialize(env: &EnvRef, name: &Name, value: Value) -> Result<(), ScopeError> {
    let mut f = env.borrow_mut();

    match f.binding_mut(name) {
        Some(binding) => {
            binding.value = value;
            binding.initialized = true;
            Ok(())
        }
        None => Err(ScopeError::NotDefined(name.clone())),
    }
}

/// Ends the temporal dead zone of the binding in slot `index` of `env`.
pub fn initialize_slot(
    env: &EnvRef,
    index: usize,
    name: &Name,
    value: Value,
) -> Result<(), ScopeError> {
    {
        let mut f = env.borrow_mut();
        if let Some(Some(binding)) = f.slots.get_mut(index) {
            binding.value = value;
            binding.initialized = true;
            return Ok(());
        }
    }

    initialize(env, name, value)
}

/// `delete name`.  Returns whether the name is now unbound.
pub fn delete_binding(env: &EnvRef, name: &Name) -> bool {
    match find(env, name) {
        Some(Found::Property(object)) => {
            object.borrow_mut().remove(name);
            true
        }
        Some(Found::Binding(frame)) => {
            let mut f = frame.borrow_mut();
            let Some(&index) = f.names.get(name) else {
                return true;
            };

            if f.slots[index].as_ref().is_some_and(|b| !b.deletable) {
                return false;
            }

            debug!("Deleted binding '{}'", name);
            f.slots[index] = None;
            true
        }
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Rc::from(s)
    }

    #[test]
    fn var_in_block_hoists_to_function_scope() {
        let global = new_global();
        let func = new(ScopeKind::Function, Some(global.clone()), false);
        let block = new(ScopeKind::Block, Some(func.clone()), false);

        declare(&block, &name("x"), DeclKind::Var, Some(Value::Number(1.0))).unwrap();

        assert!(func.borrow().has_own("x"));
        assert!(!block.borrow().has_own("x"));
    }

    #[test]
    fn let_starts_in_temporal_dead_zone() {
        let global = new_global();
        let block = new(ScopeKind::Block, Some(global), false);
        let x = name("x");

        declare(&block, &x, DeclKind::Let, None).unwrap();
        assert_eq!(lookup(&block, &x), Err(ScopeError::Uninitialized(x.clone())));

        initialize(&block, &x, Value::Number(3.0)).unwrap();
        assert!(matches!(lookup(&block, &x), Ok(Some(Value::Number(n))) if n == 3.0));
    }

    #[test]
    fn lexical_redeclaration_is_rejected() {
        let global = new_global();
        let x = name("x");

        declare(&global, &x, DeclKind::Let, None).unwrap();
        assert_eq!(
            declare(&global, &x, DeclKind::Var, None),
            Err(ScopeError::Redeclaration(x.clone()))
        );
    }

    #[test]
    fn const_assignment_fails() {
        let global = new_global();
        let c = name("c");

        declare(&global, &c, DeclKind::Const, None).unwrap();
        initialize(&global, &c, Value::Number(1.0)).unwrap();

        let err = assign(&global, &c, Value::Number(2.0), false).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeError);
    }

    #[test]
    fn sloppy_assignment_creates_deletable_global() {
        let global = new_global();
        let func = new(ScopeKind::Function, Some(global.clone()), false);
        let g = name("g");

        assign(&func, &g, Value::Bool(true), false).unwrap();
        assert!(global.borrow().binding("g").is_some_and(|b| b.deletable));

        assert!(delete_binding(&func, &g));
        assert!(matches!(lookup(&func, &g), Ok(None)));
    }

    #[test]
    fn strict_assignment_to_unbound_name_fails() {
        let global = new_global();
        let g = name("g");

        assert_eq!(
            assign(&global, &g, Value::Null, true),
            Err(ScopeError::NotDefined(g.clone()))
        );
    }

    #[test]
    fn poisoned_frame_defeats_static_slot() {
        let global = new_global();
        let outer = new(ScopeKind::Function, Some(global), false);
        let x = name("x");
        outer.borrow_mut().define_slot(&x, DeclKind::Var, Value::Number(1.0));

        let inner = new(ScopeKind::Function, Some(outer.clone()), false);
        let eval_env = new(ScopeKind::EvalScope, Some(inner.clone()), false);
        declare_eval_var(&eval_env, &x, DeclKind::Var, Some(Value::Number(2.0))).unwrap();

        assert!(inner.borrow().is_dynamic());
        assert!(matches!(
            lookup_slot(&inner, 1, 0, &x),
            Ok(Some(Value::Number(n))) if n == 2.0
        ));
    }

    #[test]
    fn eval_var_conflicting_with_block_let_is_rejected() {
        let global = new_global();
        let func = new(ScopeKind::Function, Some(global), false);
        let block = new(ScopeKind::Block, Some(func), false);
        let x = name("x");
        declare(&block, &x, DeclKind::Let, None).unwrap();

        let eval_env = new(ScopeKind::EvalScope, Some(block), false);
        assert_eq!(
            declare_eval_var(&eval_env, &x, DeclKind::Var, None),
            Err(ScopeError::Redeclaration(x.clone()))
        );
    }

    #[test]
    fn with_on_primitive_is_type_error() {
        let global = new_global();
        let err = enter_with(&global, &Value::Number(1.0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeError);
    }
}
