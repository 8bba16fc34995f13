use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::bytecode::ir::{CodeId, Constant, Funcode};
use crate::lang::ops;
use crate::runtime::runtime_error::Error;
use crate::runtime::thread::Thread;
use crate::runtime::vm_bc::Module;

/// Module-level bindings, in insertion order.
pub type StringDict = IndexMap<String, Value>;

/// Keyword arguments as passed to callables: `(name, value)` pairs.
pub type Kwargs = Vec<(Rc<str>, Value)>;

/// Runtime value.
///
/// Scalars are stored inline; strings, containers and callables are
/// reference counted so that copying a value onto the operand stack never
/// copies its contents. Mutable containers share identity between copies.
#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    /// 64-bit signed integer; arithmetic is overflow-checked.
    Int(i64),
    Float(f64),
    String(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<List>),
    Tuple(Rc<[Value]>),
    Dict(Rc<Dict>),
    Function(Rc<Function>),
    Builtin(Rc<Builtin>),

    /// Box for a captured local. Never visible to scripts.
    Cell(Rc<Cell>),

    /// Default-value placeholder for keyword-only parameters without a
    /// default. Never visible to scripts.
    Mandatory,
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn new_list(elems: Vec<Value>) -> Value {
        Value::List(Rc::new(List::new(elems)))
    }

    pub fn new_tuple(elems: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(elems))
    }

    pub fn new_dict() -> Value {
        Value::Dict(Rc::new(Dict::default()))
    }

    /// Materialize an entry of a program's constant pool.
    pub fn from_constant(c: &Constant) -> Value {
        match c {
            Constant::Int(n) => Value::Int(*n),
            Constant::Float(x) => Value::Float(*x),
            Constant::String(s) => Value::string(s),
            Constant::Bytes(b) => Value::Bytes(Rc::from(b.as_slice())),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Builtin(_) => "builtin_function_or_method",
            Value::Cell(_) => "cell",
            Value::Mandatory => "mandatory",
        }
    }

    /// Make this value and everything reachable from it immutable.
    pub fn freeze(&self) {
        match self {
            Value::List(l) => {
                if !l.frozen.replace(true) {
                    for v in l.elems.borrow().iter() {
                        v.freeze();
                    }
                }
            }
            Value::Dict(d) => {
                if !d.frozen.replace(true) {
                    for (k, v) in d.entries.borrow().iter() {
                        k.0.freeze();
                        v.freeze();
                    }
                }
            }
            Value::Tuple(elems) => elems.iter().for_each(Value::freeze),
            Value::Function(f) => {
                f.defaults.iter().for_each(Value::freeze);
                f.freevars.iter().for_each(Value::freeze);
            }
            Value::Builtin(b) => {
                if let Some(recv) = &b.recv {
                    recv.freeze();
                }
            }
            Value::Cell(c) => {
                if !c.frozen.replace(true) {
                    if let Some(v) = c.value.borrow().as_ref() {
                        v.freeze();
                    }
                }
            }
            _ => {}
        }
    }

    /// The `repr` form: strings are quoted.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        write_repr(&mut out, self, 0);
        out
    }
}

/// Nesting beyond this prints as `...`; lists can contain themselves.
const MAX_REPR_DEPTH: usize = 64;

fn write_repr(out: &mut String, v: &Value, depth: usize) {
    use std::fmt::Write;
    if depth > MAX_REPR_DEPTH {
        out.push_str("...");
        return;
    }
    match v {
        Value::String(s) => {
            let _ = write!(out, "{:?}", &**s);
        }
        Value::Bytes(b) => {
            let _ = write!(out, "b{:?}", String::from_utf8_lossy(b));
        }
        Value::List(l) => {
            out.push('[');
            write_elems(out, &l.elems.borrow(), depth);
            out.push(']');
        }
        Value::Tuple(elems) => {
            out.push('(');
            write_elems(out, elems, depth);
            if elems.len() == 1 {
                out.push(',');
            }
            out.push(')');
        }
        Value::Dict(d) => {
            out.push('{');
            for (i, (k, v)) in d.entries.borrow().iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_repr(out, &k.0, depth + 1);
                out.push_str(": ");
                write_repr(out, v, depth + 1);
            }
            out.push('}');
        }
        other => {
            let _ = write!(out, "{}", other);
        }
    }
}

fn write_elems(out: &mut String, elems: &[Value], depth: usize) {
    for (i, v) in elems.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_repr(out, v, depth + 1);
    }
}

impl fmt::Display for Value {
    /// The `str` form: strings print without quotes.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(true) => write!(f, "True"),
            Value::Bool(false) => write!(f, "False"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => {
                if x.is_finite() && x.fract() == 0.0 {
                    write!(f, "{:.1}", x)
                } else {
                    write!(f, "{}", x)
                }
            }
            Value::String(s) => write!(f, "{}", s),
            Value::Function(func) => write!(f, "<function {}>", func.name()),
            Value::Builtin(b) => match &b.recv {
                Some(recv) => write!(f, "<built-in method {} of {} value>", b.name, recv.type_name()),
                None => write!(f, "<built-in function {}>", b.name),
            },
            Value::Cell(_) => write!(f, "<cell>"),
            Value::Mandatory => write!(f, "<mandatory>"),
            Value::Bytes(_) | Value::List(_) | Value::Tuple(_) | Value::Dict(_) => {
                write!(f, "{}", self.repr())
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.repr())
    }
}

impl PartialEq for Value {
    /// Script-level equality; values that cannot be compared are unequal.
    fn eq(&self, other: &Value) -> bool {
        ops::equal(self, other).unwrap_or(false)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Value {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Value {
        Value::string(s)
    }
}

// =============================================================================
// Mutable containers
// =============================================================================

/// A frozen list rejects every mutation; a list being iterated rejects
/// them until the iteration ends.
#[derive(Default)]
pub struct List {
    pub(crate) elems: RefCell<Vec<Value>>,
    frozen: StdCell<bool>,
    iterating: StdCell<u32>,
}

impl List {
    pub fn new(elems: Vec<Value>) -> List {
        List {
            elems: RefCell::new(elems),
            frozen: StdCell::new(false),
            iterating: StdCell::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.elems.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> Option<Value> {
        self.elems.borrow().get(i).cloned()
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.elems.borrow().clone()
    }

    /// Fails if the list is frozen or being iterated.
    pub fn check_mutable(&self, verb: &str) -> Result<(), Error> {
        if self.frozen.get() {
            return Err(Error::msg(format!("cannot {} frozen list", verb)));
        }
        if self.iterating.get() > 0 {
            return Err(Error::msg(format!("cannot {} list during iteration", verb)));
        }
        Ok(())
    }

    pub fn append(&self, v: Value) -> Result<(), Error> {
        self.check_mutable("append to")?;
        self.elems.borrow_mut().push(v);
        Ok(())
    }

    pub(crate) fn lock(&self) {
        self.iterating.set(self.iterating.get() + 1);
    }

    pub(crate) fn unlock(&self) {
        self.iterating.set(self.iterating.get().saturating_sub(1));
    }
}

/// Hashable dictionary key. Construct with [`Key::new`], which rejects
/// unhashable values.
#[derive(Clone)]
pub struct Key(Value);

impl Key {
    pub fn new(v: Value) -> Result<Key, Error> {
        check_hashable(&v)?;
        Ok(Key(v))
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

fn check_hashable(v: &Value) -> Result<(), Error> {
    match v {
        Value::List(_) | Value::Dict(_) | Value::Cell(_) | Value::Mandatory => {
            Err(Error::msg(format!("unhashable type: {}", v.type_name())))
        }
        Value::Tuple(elems) => elems.iter().try_for_each(check_hashable),
        _ => Ok(()),
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Key) -> bool {
        ops::equal(&self.0, &other.0).unwrap_or(false)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value(&self.0, state);
    }
}

fn hash_value<H: Hasher>(v: &Value, state: &mut H) {
    match v {
        Value::None => 0u8.hash(state),
        Value::Bool(b) => {
            1u8.hash(state);
            b.hash(state);
        }
        // 1 == 1.0, so integral floats hash as ints
        Value::Int(n) => n.hash(state),
        Value::Float(x) => {
            if x.fract() == 0.0 && *x >= i64::MIN as f64 && *x < i64::MAX as f64 {
                (*x as i64).hash(state);
            } else {
                x.to_bits().hash(state);
            }
        }
        Value::String(s) => s.hash(state),
        Value::Bytes(b) => b.hash(state),
        Value::Tuple(elems) => {
            elems.len().hash(state);
            for e in elems.iter() {
                hash_value(e, state);
            }
        }
        Value::Function(f) => (Rc::as_ptr(f) as usize).hash(state),
        Value::Builtin(b) => (Rc::as_ptr(b) as usize).hash(state),
        Value::List(_) | Value::Dict(_) | Value::Cell(_) | Value::Mandatory => {}
    }
}

#[derive(Default)]
pub struct Dict {
    pub(crate) entries: RefCell<IndexMap<Key, Value>>,
    frozen: StdCell<bool>,
    iterating: StdCell<u32>,
}

impl Dict {
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, k: &Value) -> Result<Option<Value>, Error> {
        let key = Key::new(k.clone())?;
        Ok(self.entries.borrow().get(&key).cloned())
    }

    pub fn check_mutable(&self, verb: &str) -> Result<(), Error> {
        if self.frozen.get() {
            return Err(Error::msg(format!("cannot {} frozen dict", verb)));
        }
        if self.iterating.get() > 0 {
            return Err(Error::msg(format!("cannot {} dict during iteration", verb)));
        }
        Ok(())
    }

    /// Insert or replace; returns whether the key was new.
    pub fn set(&self, k: Value, v: Value) -> Result<bool, Error> {
        self.check_mutable("insert into")?;
        let key = Key::new(k)?;
        Ok(self.entries.borrow_mut().insert(key, v).is_none())
    }

    pub fn keys(&self) -> Vec<Value> {
        self.entries.borrow().keys().map(|k| k.0.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Value, Value)> {
        self.entries
            .borrow()
            .iter()
            .map(|(k, v)| (k.0.clone(), v.clone()))
            .collect()
    }

    pub(crate) fn lock(&self) {
        self.iterating.set(self.iterating.get() + 1);
    }

    pub(crate) fn unlock(&self) {
        self.iterating.set(self.iterating.get().saturating_sub(1));
    }
}

// =============================================================================
// Callables and cells
// =============================================================================

/// A closure: compiled code plus the defaults and captured cells it was
/// created with.
///
/// The module is held strongly: a module whose globals contain its own
/// functions forms a cycle and is never freed.
pub struct Function {
    pub module: Rc<Module>,
    pub code: CodeId,
    pub defaults: Vec<Value>,
    pub freevars: Vec<Value>,
}

impl Function {
    pub fn funcode(&self) -> &Funcode {
        let prog = &self.module.program;
        match self.code {
            CodeId::Toplevel => &prog.toplevel,
            CodeId::Nested(i) => &prog.functions[i as usize],
        }
    }

    pub fn name(&self) -> &str {
        &self.funcode().name
    }

    pub fn doc(&self) -> &str {
        &self.funcode().doc
    }

    /// Whether `other` runs the same compiled code. Closures created by
    /// separate evaluations of one `def` share code.
    pub fn same_code(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.module.program, &other.module.program) && self.code == other.code
    }
}

pub type BuiltinFn = fn(&mut Thread, &Builtin, &[Value], &Kwargs) -> Result<Value, Error>;

/// A host function, optionally bound to a receiver (a method value).
pub struct Builtin {
    pub name: &'static str,
    pub func: BuiltinFn,
    pub recv: Option<Value>,
}

impl Builtin {
    pub fn new(name: &'static str, func: BuiltinFn) -> Value {
        Value::Builtin(Rc::new(Builtin {
            name,
            func,
            recv: None,
        }))
    }

    pub fn method(name: &'static str, func: BuiltinFn, recv: Value) -> Value {
        Value::Builtin(Rc::new(Builtin {
            name,
            func,
            recv: Some(recv),
        }))
    }
}

/// Shared mutable box for a captured local. `None` is unbound.
#[derive(Default)]
pub struct Cell {
    pub(crate) value: RefCell<Option<Value>>,
    frozen: StdCell<bool>,
}

impl Cell {
    pub fn new(value: Option<Value>) -> Cell {
        Cell {
            value: RefCell::new(value),
            frozen: StdCell::new(false),
        }
    }

    pub fn get(&self) -> Option<Value> {
        self.value.borrow().clone()
    }

    pub fn set(&self, v: Value) {
        *self.value.borrow_mut() = Some(v);
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// An active iteration. Iterating a list or dict locks it against
/// mutation until the iterator is dropped.
pub enum ValueIter {
    List { list: Rc<List>, i: usize },
    Dict { dict: Rc<Dict>, i: usize },
    Seq { elems: Rc<[Value]>, i: usize },
}

impl ValueIter {
    pub fn new(v: &Value) -> Option<ValueIter> {
        match v {
            Value::List(l) => {
                l.lock();
                Some(ValueIter::List {
                    list: l.clone(),
                    i: 0,
                })
            }
            Value::Dict(d) => {
                d.lock();
                Some(ValueIter::Dict {
                    dict: d.clone(),
                    i: 0,
                })
            }
            Value::Tuple(elems) => Some(ValueIter::Seq {
                elems: elems.clone(),
                i: 0,
            }),
            _ => None,
        }
    }
}

impl Iterator for ValueIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let (item, i) = match self {
            ValueIter::List { list, i } => (list.get(*i), i),
            ValueIter::Dict { dict, i } => (
                dict.entries.borrow().get_index(*i).map(|(k, _)| k.0.clone()),
                i,
            ),
            ValueIter::Seq { elems, i } => (elems.get(*i).cloned(), i),
        };
        if item.is_some() {
            *i += 1;
        }
        item
    }
}

impl Drop for ValueIter {
    fn drop(&mut self) {
        match self {
            ValueIter::List { list, .. } => list.unlock(),
            ValueIter::Dict { dict, .. } => dict.unlock(),
            ValueIter::Seq { .. } => {}
        }
    }
}
