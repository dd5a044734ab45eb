//! Script values and the conversions the evaluator needs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::{FunctionDecl, Name};
use crate::environment::EnvRef;
use crate::error::ErrorKind;
use crate::interpreter::{Interpreter, Unwind};
use crate::rope::Rope;

pub type ObjectRef = Rc<RefCell<JsObject>>;
pub type FunctionRef = Rc<JsFunction>;

/// Host functions receive the interpreter, `this` and the arguments.
pub type NativeFn = fn(&mut Interpreter, &Value, &[Value]) -> Result<Value, Unwind>;

#[derive(Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rope),
    Object(ObjectRef),
    Function(FunctionRef),
}

/// Plain property bag.  There are no prototypes.
#[derive(Debug, Default)]
pub struct JsObject {
    properties: HashMap<Name, Value>,
    is_error: bool,
}

impl JsObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_ref() -> ObjectRef {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.properties.get(key).cloned()
    }

    pub fn set(&mut self, key: Name, value: Value) {
        self.properties.insert(key, value);
    }

    pub fn has(&self, key: &str) -> bool {
        self.properties.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.properties.remove(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.properties.values()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Created by the engine for a thrown `SyntaxError`, `TypeError`, …
    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

/// How a closure binds `this` when called.
#[derive(Debug, Clone)]
pub enum ThisMode {
    /// Arrow functions keep the `this` of the frame that created them.
    Lexical(Value),
    /// `this` is whatever the caller passes.
    Strict,
    /// A missing `this` becomes the global object.
    Sloppy,
}

pub struct NativeFunction {
    pub arity: usize,
    pub func: NativeFn,
}

pub struct Closure {
    pub decl: Rc<FunctionDecl>,
    pub env: EnvRef,
    pub this_mode: ThisMode,
}

pub enum FunctionKind {
    Native(NativeFunction),
    Closure(Closure),
}

pub struct JsFunction {
    pub name: Name,
    pub kind: FunctionKind,
    /// Own properties (`f.x = 1`, `with (f)`).
    pub properties: ObjectRef,
}

impl JsFunction {
    pub fn native(name: &str, arity: usize, func: NativeFn) -> FunctionRef {
        Rc::new(JsFunction {
            name: Rc::from(name),
            kind: FunctionKind::Native(NativeFunction { arity, func }),
            properties: JsObject::new_ref(),
        })
    }

    pub fn closure(decl: Rc<FunctionDecl>, env: EnvRef, this_mode: ThisMode) -> FunctionRef {
        let name = decl.name.clone().unwrap_or_else(|| Rc::from(""));

        Rc::new(JsFunction {
            name,
            kind: FunctionKind::Closure(Closure {
                decl,
                env,
                this_mode,
            }),
            properties: JsObject::new_ref(),
        })
    }

    /// Declared parameter count.
    pub fn arity(&self) -> usize {
        match &self.kind {
            FunctionKind::Native(native) => native.arity,
            FunctionKind::Closure(closure) => closure.decl.params.len(),
        }
    }
}

impl fmt::Debug for JsFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            FunctionKind::Native(_) => write!(f, "<native fn {}>", self.name),
            FunctionKind::Closure(_) => write!(f, "<fn {}>", self.name),
        }
    }
}

impl Value {
    pub fn string(text: &str) -> Value {
        Value::String(Rope::from_str(text))
    }

    /// Engine-created error object with `name` and `message` properties.
    pub fn error(kind: ErrorKind, message: &str) -> Value {
        let mut object = JsObject::new();
        object.set(Rc::from("name"), Value::string(kind.name()));
        object.set(Rc::from("message"), Value::string(message));
        object.is_error = true;

        Value::Object(Rc::new(RefCell::new(object)))
    }

    /// Error kind and message of a thrown value, for reporting to the host.
    pub fn error_details(&self) -> (Option<ErrorKind>, String) {
        if let Value::Object(object) = self {
            let object = object.borrow();
            let name = object.get("name").map(|v| v.to_string());
            let message = object.get("message").map(|v| v.to_string());

            if let (Some(name), Some(message)) = (name, message) {
                return (ErrorKind::from_name(&name), message);
            }
        }

        (None, self.to_string())
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => !(*n == 0.0 || n.is_nan()),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Function(_) => true,
        }
    }

    pub fn is_object_like(&self) -> bool {
        matches!(self, Value::Object(_) | Value::Function(_))
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(&s.to_string_lossy()),
            Value::Object(_) | Value::Function(_) => f64::NAN,
        }
    }

    /// String conversion.  Strings come back as the same rope.
    pub fn to_rope(&self) -> Rope {
        match self {
            Value::String(s) => s.clone(),
            other => Rope::from_str(&other.to_string()),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a.equals(b),
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
            (Value::Undefined | Value::Null, _) | (_, Value::Undefined | Value::Null) => false,
            (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
                self.to_number() == other.to_number()
            }
            (Value::Bool(_), _) => Value::Number(self.to_number()).loose_equals(other),
            (_, Value::Bool(_)) => self.loose_equals(&Value::Number(other.to_number())),
            (a, b) if a.is_object_like() != b.is_object_like() => {
                a.to_rope().equals(&b.to_rope())
            }
            _ => self.strict_equals(other),
        }
    }
}

/// Numeric conversion of string contents.
pub fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();

    if trimmed.is_empty() {
        return 0.0;
    }

    if let Some(hex) = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
    {
        return u64::from_str_radix(hex, 16).map_or(f64::NAN, |n| n as f64);
    }

    match trimmed {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }

    // Rust also accepts "inf" and "nan", which are not numeric literals here.
    let numeric = trimmed
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));

    if !numeric {
        return f64::NAN;
    }

    trimmed.parse::<f64>().unwrap_or(f64::NAN)
}

/// Number formatting as scripts observe it.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_owned();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if n == 0.0 {
        return "0".to_owned();
    }

    if n.fract() == 0.0 && n.abs() < 1e21 {
        if n.abs() < 9.2e18 {
            let mut buf = itoa::Buffer::new();
            return buf.format(n as i64).to_owned();
        }
        // Shortest round-trip digits, zero-padded; `{:.0}` would print the
        // exact binary value instead.
        return n.to_string();
    }

    if n.abs() >= 1e21 || n.abs() < 1e-6 {
        let formatted = format!("{:e}", n);
        return match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        };
    }

    n.to_string()
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),

            Value::Null => write!(f, "null"),

            Value::Bool(b) => write!(f, "{}", b),

            Value::Number(n) => write!(f, "{}", number_to_string(*n)),

            Value::String(s) => write!(f, "{}", s.to_string_lossy()),

            Value::Object(object) => {
                let object = object.borrow();
                if object.is_error() {
                    let name = object.get("name").unwrap_or(Value::Undefined);
                    let message = object.get("message").unwrap_or(Value::Undefined);
                    write!(f, "{}: {}", name, message)
                } else {
                    write!(f, "[object Object]")
                }
            }

            Value::Function(func) => match func.kind {
                FunctionKind::Native(_) => {
                    write!(f, "function {}() {{ [native code] }}", func.name)
                }
                FunctionKind::Closure(_) => write!(f, "function {}() {{ ... }}", func.name),
            },
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s.to_string_lossy()),
            Value::Function(func) => write!(f, "{:?}", func),
            other => write!(f, "{}", other),
        }
    }
}

/// Same-value comparison (`NaN` equals itself, objects by identity).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan() => true,
            _ => self.strict_equals(other),
        }
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<Rope> for Value {
    fn from(rope: Rope) -> Self {
        Value::String(rope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_integers_use_shortest_digits() {
        assert_eq!(number_to_string(123456789012345680000.0), "123456789012345680000");
        assert_eq!(number_to_string(1e20), "100000000000000000000");
        assert_eq!(number_to_string(-9.5e18), "-9500000000000000000");
        assert_eq!(number_to_string(2f64.powi(63)), "9223372036854776000");
    }

    #[test]
    fn exponent_form_outside_the_plain_range() {
        assert_eq!(number_to_string(1e21), "1e+21");
        assert_eq!(number_to_string(1.5e-7), "1.5e-7");
        assert_eq!(number_to_string(0.1 + 0.2), "0.30000000000000004");
        assert_eq!(number_to_string(42.0), "42");
    }
}
