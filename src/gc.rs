//! Traceability for an external collector.
//!
//! Nothing here frees memory.  Environments, objects, functions and rope
//! nodes are reference counted; this module only lets a collector (or a
//! test) enumerate the roots the interpreter holds and the outgoing edges of
//! every node, which is what cycle detection needs.

use std::collections::{HashSet, VecDeque};
use std::rc::Rc;

use crate::environment::{EnvRef, Environment};
use crate::interpreter::Interpreter;
use crate::rope::Rope;
use crate::value::{FunctionKind, FunctionRef, JsFunction, JsObject, ObjectRef, ThisMode, Value};

/// A strong reference to a heap node.
#[derive(Clone)]
pub enum GcEdge {
    Environment(EnvRef),
    Object(ObjectRef),
    Function(FunctionRef),
    Rope(Rope),
}

impl GcEdge {
    /// Edge to the heap node behind `value`, if it has one.
    pub fn of(value: &Value) -> Option<GcEdge> {
        match value {
            Value::Object(obj) => Some(GcEdge::Object(obj.clone())),
            Value::Function(func) => Some(GcEdge::Function(func.clone())),
            Value::String(rope) => Some(GcEdge::Rope(rope.clone())),
            _ => None,
        }
    }

    /// Node identity.
    pub fn addr(&self) -> usize {
        match self {
            GcEdge::Environment(env) => Rc::as_ptr(env) as *const () as usize,
            GcEdge::Object(obj) => Rc::as_ptr(obj) as *const () as usize,
            GcEdge::Function(func) => Rc::as_ptr(func) as *const () as usize,
            GcEdge::Rope(rope) => rope.node_addr(),
        }
    }
}

/// Enumerates the outgoing edges of a node.
pub trait Trace {
    fn trace(&self, visit: &mut dyn FnMut(GcEdge));
}

fn trace_value(value: &Value, visit: &mut dyn FnMut(GcEdge)) {
    if let Some(edge) = GcEdge::of(value) {
        visit(edge);
    }
}

impl Trace for Environment {
    fn trace(&self, visit: &mut dyn FnMut(GcEdge)) {
        if let Some(parent) = self.parent() {
            visit(GcEdge::Environment(parent.clone()));
        }
        if let Some(object) = self.object() {
            visit(GcEdge::Object(object.clone()));
        }
        for (_, binding) in self.bindings() {
            trace_value(&binding.value, visit);
        }
    }
}

impl Trace for JsObject {
    fn trace(&self, visit: &mut dyn FnMut(GcEdge)) {
        for value in self.values() {
            trace_value(value, visit);
        }
    }
}

impl Trace for JsFunction {
    fn trace(&self, visit: &mut dyn FnMut(GcEdge)) {
        visit(GcEdge::Object(self.properties.clone()));

        if let FunctionKind::Closure(closure) = &self.kind {
            visit(GcEdge::Environment(closure.env.clone()));
            if let ThisMode::Lexical(this) = &closure.this_mode {
                trace_value(this, visit);
            }
        }
    }
}

impl Trace for Rope {
    fn trace(&self, visit: &mut dyn FnMut(GcEdge)) {
        for child in self.children() {
            visit(GcEdge::Rope(child));
        }
    }
}

impl Trace for GcEdge {
    fn trace(&self, visit: &mut dyn FnMut(GcEdge)) {
        match self {
            GcEdge::Environment(env) => env.borrow().trace(visit),
            GcEdge::Object(obj) => obj.borrow().trace(visit),
            GcEdge::Function(func) => func.trace(visit),
            GcEdge::Rope(rope) => rope.trace(visit),
        }
    }
}

impl Interpreter {
    /// Global environment and object, the intrinsic eval, the current
    /// environment, plus every active frame's function, `this` and the
    /// environment its caller resumes in.
    pub fn roots(&self, visit: &mut dyn FnMut(GcEdge)) {
        visit(GcEdge::Environment(self.global_env().clone()));
        visit(GcEdge::Object(self.global_object().clone()));
        visit(GcEdge::Function(self.intrinsic_eval().clone()));
        visit(GcEdge::Environment(self.current_env().clone()));

        for frame in self.frames() {
            if let Some(function) = &frame.function {
                visit(GcEdge::Function(function.clone()));
            }
            trace_value(&frame.this, visit);
            visit(GcEdge::Environment(frame.caller_env.clone()));
        }
    }
}

/// Number of distinct nodes of each kind reachable from the roots.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Census {
    pub environments: usize,
    pub objects: usize,
    pub functions: usize,
    pub ropes: usize,
}

/// Breadth-first walk from [`Interpreter::roots`].
pub fn reachable(interp: &Interpreter) -> Census {
    let mut queue: VecDeque<GcEdge> = VecDeque::new();
    interp.roots(&mut |edge| queue.push_back(edge));

    let mut seen: HashSet<usize> = HashSet::new();
    let mut census = Census::default();

    while let Some(edge) = queue.pop_front() {
        if !seen.insert(edge.addr()) {
            continue;
        }

        match edge {
            GcEdge::Environment(_) => census.environments += 1,
            GcEdge::Object(_) => census.objects += 1,
            GcEdge::Function(_) => census.functions += 1,
            GcEdge::Rope(_) => census.ropes += 1,
        }

        edge.trace(&mut |child| queue.push_back(child));
    }

    census
}
