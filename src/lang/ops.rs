//! Operators over runtime values.
//!
//! The VM dispatches every arithmetic, comparison, membership, indexing and
//! attribute instruction through these functions. Integers are 64-bit and
//! overflow is an error, never a wrap.

use std::cmp::Ordering;
use std::rc::Rc;

use crate::lang::builtins;
use crate::lang::node::{BinOp, UnaryOp};
use crate::lang::value::{Dict, List, Value, ValueIter};
use crate::runtime::runtime_error::Error;

const MAX_COMPARE_DEPTH: usize = 10;

pub fn symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Or => "or",
        BinOp::And => "and",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Gt => ">",
        BinOp::Le => "<=",
        BinOp::Ge => ">=",
        BinOp::In => "in",
        BinOp::NotIn => "not in",
        BinOp::Plus => "+",
        BinOp::Minus => "-",
        BinOp::Star => "*",
        BinOp::Slash => "/",
        BinOp::SlashSlash => "//",
        BinOp::Percent => "%",
        BinOp::Amp => "&",
        BinOp::Pipe => "|",
        BinOp::Circumflex => "^",
        BinOp::LtLt => "<<",
        BinOp::GtGt => ">>",
    }
}

pub fn truth(v: &Value) -> bool {
    match v {
        Value::None | Value::Mandatory => false,
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(x) => *x != 0.0,
        Value::String(s) => !s.is_empty(),
        Value::Bytes(b) => !b.is_empty(),
        Value::List(l) => !l.is_empty(),
        Value::Tuple(t) => !t.is_empty(),
        Value::Dict(d) => !d.is_empty(),
        Value::Function(_) | Value::Builtin(_) | Value::Cell(_) => true,
    }
}

pub fn len(v: &Value) -> Option<usize> {
    match v {
        Value::String(s) => Some(s.len()),
        Value::Bytes(b) => Some(b.len()),
        Value::List(l) => Some(l.len()),
        Value::Tuple(t) => Some(t.len()),
        Value::Dict(d) => Some(d.len()),
        _ => None,
    }
}

pub fn is_iterable(v: &Value) -> bool {
    matches!(v, Value::List(_) | Value::Tuple(_) | Value::Dict(_))
}

pub fn iterate(v: &Value) -> Option<ValueIter> {
    ValueIter::new(v)
}

// =============================================================================
// Comparison
// =============================================================================

pub fn equal(x: &Value, y: &Value) -> Result<bool, Error> {
    equal_depth(x, y, MAX_COMPARE_DEPTH)
}

fn equal_depth(x: &Value, y: &Value, depth: usize) -> Result<bool, Error> {
    if depth == 0 {
        return Err(Error::msg("comparison exceeded maximum recursion depth"));
    }
    Ok(match (x, y) {
        (Value::None, Value::None) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Int(a), Value::Int(b)) => a == b,
        (Value::Float(a), Value::Float(b)) => a == b,
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        (Value::String(a), Value::String(b)) => a == b,
        (Value::Bytes(a), Value::Bytes(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            Rc::ptr_eq(a, b) || seq_equal(&a.elems.borrow(), &b.elems.borrow(), depth)?
        }
        (Value::Tuple(a), Value::Tuple(b)) => seq_equal(a, b, depth)?,
        (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b) || dict_equal(a, b, depth)?,
        (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
        (Value::Builtin(a), Value::Builtin(b)) => Rc::ptr_eq(a, b),
        _ => false,
    })
}

fn seq_equal(a: &[Value], b: &[Value], depth: usize) -> Result<bool, Error> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !equal_depth(x, y, depth - 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn dict_equal(a: &Dict, b: &Dict, depth: usize) -> Result<bool, Error> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (k, v) in a.items() {
        match b.get(&k)? {
            Some(w) if equal_depth(&v, &w, depth - 1)? => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

/// Evaluate a comparison operator.
pub fn compare(op: BinOp, x: &Value, y: &Value) -> Result<bool, Error> {
    match op {
        BinOp::Eq => equal(x, y),
        BinOp::Ne => Ok(!equal(x, y)?),
        BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            let Some(ord) = order(op, x, y, MAX_COMPARE_DEPTH)? else {
                // NaN
                return Ok(false);
            };
            Ok(match op {
                BinOp::Lt => ord == Ordering::Less,
                BinOp::Gt => ord == Ordering::Greater,
                BinOp::Le => ord != Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
        other => Err(Error::msg(format!("{} is not a comparison", symbol(other)))),
    }
}

fn order(op: BinOp, x: &Value, y: &Value, depth: usize) -> Result<Option<Ordering>, Error> {
    if depth == 0 {
        return Err(Error::msg("comparison exceeded maximum recursion depth"));
    }
    match (x, y) {
        (Value::Int(a), Value::Int(b)) => Ok(Some(a.cmp(b))),
        (Value::Float(a), Value::Float(b)) => Ok(a.partial_cmp(b)),
        (Value::Int(a), Value::Float(b)) => Ok((*a as f64).partial_cmp(b)),
        (Value::Float(a), Value::Int(b)) => Ok(a.partial_cmp(&(*b as f64))),
        (Value::Bool(a), Value::Bool(b)) => Ok(Some(a.cmp(b))),
        (Value::String(a), Value::String(b)) => Ok(Some(a.cmp(b))),
        (Value::Bytes(a), Value::Bytes(b)) => Ok(Some(a.cmp(b))),
        (Value::List(a), Value::List(b)) => {
            seq_order(op, &a.elems.borrow(), &b.elems.borrow(), depth)
        }
        (Value::Tuple(a), Value::Tuple(b)) => seq_order(op, a, b, depth),
        _ => Err(Error::msg(format!(
            "{} {} {} not implemented",
            x.type_name(),
            symbol(op),
            y.type_name()
        ))),
    }
}

fn seq_order(op: BinOp, a: &[Value], b: &[Value], depth: usize) -> Result<Option<Ordering>, Error> {
    for (x, y) in a.iter().zip(b) {
        if !equal_depth(x, y, depth - 1)? {
            return order(op, x, y, depth - 1);
        }
    }
    Ok(Some(a.len().cmp(&b.len())))
}

// =============================================================================
// Arithmetic
// =============================================================================

fn overflow() -> Error {
    Error::msg("int overflow")
}

fn unknown(op: BinOp, x: &Value, y: &Value) -> Error {
    Error::BinaryOp {
        op: symbol(op),
        x: x.type_name(),
        y: y.type_name(),
    }
}

fn as_float(v: &Value) -> Option<f64> {
    match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

/// Evaluate `x op y` for every operator except `and`/`or`, which the
/// compiler lowers to jumps.
pub fn binary(op: BinOp, x: &Value, y: &Value) -> Result<Value, Error> {
    match op {
        BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
            compare(op, x, y).map(Value::Bool)
        }
        BinOp::In => contains(y, x).map(Value::Bool),
        BinOp::NotIn => contains(y, x).map(|b| Value::Bool(!b)),
        BinOp::Plus => plus(x, y),
        BinOp::Minus => match (x, y) {
            (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
            _ => float_op(op, x, y, |a, b| a - b),
        },
        BinOp::Star => star(x, y),
        BinOp::Slash => {
            let (Some(a), Some(b)) = (as_float(x), as_float(y)) else {
                return Err(unknown(op, x, y));
            };
            if b == 0.0 {
                return Err(Error::msg("floating-point division by zero"));
            }
            Ok(Value::Float(a / b))
        }
        BinOp::SlashSlash => match (x, y) {
            (Value::Int(a), Value::Int(b)) => floor_div(*a, *b).map(Value::Int),
            _ => {
                let (Some(a), Some(b)) = (as_float(x), as_float(y)) else {
                    return Err(unknown(op, x, y));
                };
                if b == 0.0 {
                    return Err(Error::msg("floating-point division by zero"));
                }
                Ok(Value::Float((a / b).floor()))
            }
        },
        BinOp::Percent => match (x, y) {
            (Value::Int(a), Value::Int(b)) => floor_mod(*a, *b).map(Value::Int),
            _ => {
                let (Some(a), Some(b)) = (as_float(x), as_float(y)) else {
                    return Err(unknown(op, x, y));
                };
                if b == 0.0 {
                    return Err(Error::msg("floating-point modulo by zero"));
                }
                let r = a % b;
                Ok(Value::Float(if r != 0.0 && (r < 0.0) != (b < 0.0) { r + b } else { r }))
            }
        },
        BinOp::Amp => int_op(op, x, y, |a, b| Ok(a & b)),
        BinOp::Circumflex => int_op(op, x, y, |a, b| Ok(a ^ b)),
        BinOp::Pipe => match (x, y) {
            (Value::Dict(a), Value::Dict(b)) => {
                let out = Dict::default();
                for (k, v) in a.items().into_iter().chain(b.items()) {
                    out.set(k, v)?;
                }
                Ok(Value::Dict(Rc::new(out)))
            }
            _ => int_op(op, x, y, |a, b| Ok(a | b)),
        },
        BinOp::LtLt => int_op(op, x, y, shift_left),
        BinOp::GtGt => int_op(op, x, y, |a, b| {
            if b < 0 {
                return Err(Error::msg("negative shift count"));
            }
            Ok(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }),
        BinOp::And | BinOp::Or => Err(unknown(op, x, y)),
    }
}

fn plus(x: &Value, y: &Value) -> Result<Value, Error> {
    match (x, y) {
        (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
        (Value::String(a), Value::String(b)) => {
            let mut s = String::with_capacity(a.len() + b.len());
            s.push_str(a);
            s.push_str(b);
            Ok(Value::String(Rc::from(s)))
        }
        (Value::Bytes(a), Value::Bytes(b)) => Ok(Value::Bytes([&a[..], &b[..]].concat().into())),
        (Value::List(a), Value::List(b)) => {
            let mut elems = a.to_vec();
            elems.extend(b.to_vec());
            Ok(Value::new_list(elems))
        }
        (Value::Tuple(a), Value::Tuple(b)) => Ok(Value::Tuple(a.iter().chain(b.iter()).cloned().collect())),
        _ => float_op(BinOp::Plus, x, y, |a, b| a + b),
    }
}

fn star(x: &Value, y: &Value) -> Result<Value, Error> {
    match (x, y) {
        (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
        (Value::String(s), Value::Int(n)) | (Value::Int(n), Value::String(s)) => {
            let n = repeat_count(s.len(), *n)?;
            Ok(Value::String(Rc::from(s.repeat(n))))
        }
        (Value::Bytes(b), Value::Int(n)) | (Value::Int(n), Value::Bytes(b)) => {
            let n = repeat_count(b.len(), *n)?;
            Ok(Value::Bytes(b.repeat(n).into()))
        }
        (Value::List(l), Value::Int(n)) | (Value::Int(n), Value::List(l)) => {
            let elems = l.to_vec();
            let n = repeat_count(elems.len(), *n)?;
            Ok(Value::new_list(repeated(&elems, n).collect()))
        }
        (Value::Tuple(t), Value::Int(n)) | (Value::Int(n), Value::Tuple(t)) => {
            let n = repeat_count(t.len(), *n)?;
            Ok(Value::Tuple(repeated(t, n).collect()))
        }
        _ => float_op(BinOp::Star, x, y, |a, b| a * b),
    }
}

fn repeat_count(len: usize, n: i64) -> Result<usize, Error> {
    if n <= 0 {
        return Ok(0);
    }
    let n = usize::try_from(n).map_err(|_| overflow())?;
    match len.checked_mul(n) {
        Some(total) if total <= isize::MAX as usize => Ok(n),
        _ => Err(Error::msg("excessive repeat count")),
    }
}

fn repeated(elems: &[Value], n: usize) -> impl Iterator<Item = Value> + '_ {
    (0..n).flat_map(move |_| elems.iter().cloned())
}

fn float_op(op: BinOp, x: &Value, y: &Value, f: impl Fn(f64, f64) -> f64) -> Result<Value, Error> {
    match (as_float(x), as_float(y)) {
        (Some(a), Some(b)) => Ok(Value::Float(f(a, b))),
        _ => Err(unknown(op, x, y)),
    }
}

fn int_op(
    op: BinOp,
    x: &Value,
    y: &Value,
    f: impl Fn(i64, i64) -> Result<i64, Error>,
) -> Result<Value, Error> {
    match (x, y) {
        (Value::Int(a), Value::Int(b)) => f(*a, *b).map(Value::Int),
        _ => Err(unknown(op, x, y)),
    }
}

fn floor_div(a: i64, b: i64) -> Result<i64, Error> {
    if b == 0 {
        return Err(Error::msg("integer division by zero"));
    }
    let q = a.checked_div(b).ok_or_else(overflow)?;
    Ok(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
}

fn floor_mod(a: i64, b: i64) -> Result<i64, Error> {
    if b == 0 {
        return Err(Error::msg("integer modulo by zero"));
    }
    let r = a.checked_rem(b).unwrap_or(0);
    Ok(if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r })
}

fn shift_left(a: i64, b: i64) -> Result<i64, Error> {
    if b < 0 {
        return Err(Error::msg("negative shift count"));
    }
    if a == 0 {
        return Ok(0);
    }
    if b >= 64 {
        return Err(overflow());
    }
    let r = a << b;
    if r >> b != a {
        return Err(overflow());
    }
    Ok(r)
}

fn contains(container: &Value, x: &Value) -> Result<bool, Error> {
    match container {
        Value::List(l) => {
            for e in l.elems.borrow().iter() {
                if equal(e, x)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Tuple(t) => {
            for e in t.iter() {
                if equal(e, x)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Value::Dict(d) => Ok(d.get(x)?.is_some()),
        Value::String(s) => match x {
            Value::String(needle) => Ok(s.contains(&**needle)),
            _ => Err(Error::msg(format!(
                "'in <string>' requires string as left operand, not {}",
                x.type_name()
            ))),
        },
        Value::Bytes(b) => match x {
            Value::Bytes(needle) => Ok(needle.is_empty() || b.windows(needle.len()).any(|w| w == &needle[..])),
            Value::Int(n) => Ok(u8::try_from(*n).is_ok_and(|byte| b.contains(&byte))),
            _ => Err(Error::msg(format!(
                "'in <bytes>' requires bytes or int as left operand, not {}",
                x.type_name()
            ))),
        },
        _ => Err(unknown(BinOp::In, x, container)),
    }
}

pub fn unary(op: UnaryOp, x: &Value) -> Result<Value, Error> {
    let symbol = match op {
        UnaryOp::Not => return Ok(Value::Bool(!truth(x))),
        UnaryOp::Plus => "+",
        UnaryOp::Minus => "-",
        UnaryOp::Tilde => "~",
    };
    match (op, x) {
        (UnaryOp::Plus, Value::Int(_) | Value::Float(_)) => Ok(x.clone()),
        (UnaryOp::Minus, Value::Int(n)) => n.checked_neg().map(Value::Int).ok_or_else(overflow),
        (UnaryOp::Minus, Value::Float(f)) => Ok(Value::Float(-f)),
        (UnaryOp::Tilde, Value::Int(n)) => Ok(Value::Int(!n)),
        _ => Err(Error::UnaryOp {
            op: symbol,
            x: x.type_name(),
        }),
    }
}

// =============================================================================
// In-place update
// =============================================================================

/// Append every element of `iterable` to `list`.
pub fn list_extend(list: &List, iterable: &Value) -> Result<(), Error> {
    list.check_mutable("extend")?;
    let items: Vec<Value> = match iterable {
        // copy first so `x.extend(x)` terminates
        Value::List(other) => other.to_vec(),
        _ => iterate(iterable)
            .ok_or(Error::Unsupported {
                ty: iterable.type_name(),
                what: "iteration",
            })?
            .collect(),
    };
    list.elems.borrow_mut().extend(items);
    Ok(())
}

/// Insert every entry of `other` into `dict`, replacing existing keys.
pub fn dict_update(dict: &Dict, other: &Dict) -> Result<(), Error> {
    dict.check_mutable("apply |= to")?;
    for (k, v) in other.items() {
        dict.set(k, v)?;
    }
    Ok(())
}

// =============================================================================
// Indexing and slicing
// =============================================================================

fn index_int(container: &Value, y: &Value) -> Result<i64, Error> {
    match y {
        Value::Int(i) => Ok(*i),
        _ => Err(Error::msg(format!(
            "{} index: got {}, want int",
            container.type_name(),
            y.type_name()
        ))),
    }
}

fn resolve_index(i: i64, n: usize) -> Result<usize, Error> {
    let len = n as i64;
    let j = if i < 0 { i + len } else { i };
    if j < 0 || j >= len {
        return Err(Error::msg(format!("index {} out of range [{}:{}]", i, -len, len - 1)));
    }
    Ok(j as usize)
}

/// Evaluate `x[y]`.
pub fn get_index(x: &Value, y: &Value) -> Result<Value, Error> {
    match x {
        Value::List(l) => {
            let i = resolve_index(index_int(x, y)?, l.len())?;
            l.get(i).ok_or_else(|| Error::msg("list index out of range"))
        }
        Value::Tuple(t) => Ok(t[resolve_index(index_int(x, y)?, t.len())?].clone()),
        Value::String(s) => {
            let i = resolve_index(index_int(x, y)?, s.len())?;
            Ok(Value::String(Rc::from(String::from_utf8_lossy(&s.as_bytes()[i..=i]))))
        }
        Value::Bytes(b) => {
            let i = resolve_index(index_int(x, y)?, b.len())?;
            Ok(Value::Int(i64::from(b[i])))
        }
        Value::Dict(d) => d
            .get(y)?
            .ok_or_else(|| Error::msg(format!("key {} not in dict", y.repr()))),
        _ => Err(Error::Unsupported {
            ty: x.type_name(),
            what: "indexing",
        }),
    }
}

/// Evaluate `x[y] = z`.
pub fn set_index(x: &Value, y: &Value, z: Value) -> Result<(), Error> {
    match x {
        Value::List(l) => {
            l.check_mutable("assign to element of")?;
            let i = resolve_index(index_int(x, y)?, l.len())?;
            l.elems.borrow_mut()[i] = z;
            Ok(())
        }
        Value::Dict(d) => d.set(y.clone(), z).map(|_| ()),
        _ => Err(Error::Unsupported {
            ty: x.type_name(),
            what: "item assignment",
        }),
    }
}

fn slice_bound(v: &Value, what: &str) -> Result<Option<i64>, Error> {
    match v {
        Value::None => Ok(None),
        Value::Int(n) => Ok(Some(*n)),
        _ => Err(Error::msg(format!(
            "invalid slice {}: got {}, want int",
            what,
            v.type_name()
        ))),
    }
}

/// Element indices selected by `[lo:hi:step]` on a sequence of length `n`.
fn slice_indices(n: usize, lo: Option<i64>, hi: Option<i64>, step: i64) -> Vec<usize> {
    let len = n as i64;
    let adjust = |i: i64, min: i64, max: i64| {
        let i = if i < 0 { i + len } else { i };
        i.clamp(min, max)
    };

    let mut out = Vec::new();
    if step > 0 {
        let lo = lo.map_or(0, |i| adjust(i, 0, len));
        let hi = hi.map_or(len, |i| adjust(i, 0, len));
        let mut i = lo;
        while i < hi {
            out.push(i as usize);
            i += step;
        }
    } else {
        let lo = lo.map_or(len - 1, |i| adjust(i, -1, len - 1));
        let hi = hi.map_or(-1, |i| adjust(i, -1, len - 1));
        let mut i = lo;
        while i > hi {
            out.push(i as usize);
            i += step;
        }
    }
    out
}

/// Evaluate `x[lo:hi:step]`; absent bounds are `None`.
pub fn slice(x: &Value, lo: &Value, hi: &Value, step: &Value) -> Result<Value, Error> {
    let step = slice_bound(step, "step")?.unwrap_or(1);
    if step == 0 {
        return Err(Error::msg("zero is not a valid slice step"));
    }
    let lo = slice_bound(lo, "start index")?;
    let hi = slice_bound(hi, "end index")?;

    match x {
        Value::List(l) => {
            let elems = l.elems.borrow();
            let picked = slice_indices(elems.len(), lo, hi, step)
                .into_iter()
                .map(|i| elems[i].clone())
                .collect();
            Ok(Value::new_list(picked))
        }
        Value::Tuple(t) => Ok(Value::Tuple(
            slice_indices(t.len(), lo, hi, step)
                .into_iter()
                .map(|i| t[i].clone())
                .collect(),
        )),
        Value::String(s) => {
            let bytes = s.as_bytes();
            let picked: Vec<u8> = slice_indices(bytes.len(), lo, hi, step)
                .into_iter()
                .map(|i| bytes[i])
                .collect();
            Ok(Value::String(Rc::from(String::from_utf8_lossy(&picked))))
        }
        Value::Bytes(b) => Ok(Value::Bytes(
            slice_indices(b.len(), lo, hi, step)
                .into_iter()
                .map(|i| b[i])
                .collect(),
        )),
        _ => Err(Error::Unsupported {
            ty: x.type_name(),
            what: "slicing",
        }),
    }
}

// =============================================================================
// Attributes
// =============================================================================

/// Evaluate `x.name`. Only built-in methods are attributes.
pub fn get_attr(x: &Value, name: &str) -> Result<Value, Error> {
    builtins::method(x, name)
        .ok_or_else(|| Error::msg(format!("{} has no .{} field or method", x.type_name(), name)))
}

/// Evaluate `x.name = y`. No built-in type has assignable fields.
pub fn set_field(x: &Value, name: &str, _y: Value) -> Result<(), Error> {
    Err(Error::msg(format!(
        "can't assign to .{} field of {}",
        name,
        x.type_name()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    // =============================================================================
    // Test Helpers
    // =============================================================================

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    fn list(elems: Vec<Value>) -> Value {
        Value::new_list(elems)
    }

    fn assert_binary(op: BinOp, x: Value, y: Value, expected: Value) {
        let got = binary(op, &x, &y).expect("operation should succeed");
        assert_eq!(got, expected, "{:?} {} {:?}", x, symbol(op), y);
    }

    fn assert_binary_error(op: BinOp, x: Value, y: Value, contains: &str) {
        match binary(op, &x, &y) {
            Ok(v) => panic!("expected error containing '{}', got {:?}", contains, v),
            Err(e) => assert!(
                e.to_string().contains(contains),
                "expected error containing '{}', got: {}",
                contains,
                e
            ),
        }
    }

    #[test]
    fn test_int_arithmetic() {
        assert_binary(BinOp::Plus, int(2), int(3), int(5));
        assert_binary(BinOp::Minus, int(2), int(3), int(-1));
        assert_binary(BinOp::Star, int(6), int(7), int(42));
        assert_binary(BinOp::Slash, int(7), int(2), Value::Float(3.5));
    }

    #[test]
    fn test_floor_division_and_modulo() {
        assert_binary(BinOp::SlashSlash, int(7), int(2), int(3));
        assert_binary(BinOp::SlashSlash, int(-7), int(2), int(-4));
        assert_binary(BinOp::Percent, int(-7), int(2), int(1));
        assert_binary(BinOp::Percent, int(7), int(-2), int(-1));
        assert_binary_error(BinOp::SlashSlash, int(1), int(0), "integer division by zero");
    }

    #[test]
    fn test_int_overflow_is_an_error() {
        assert_binary_error(BinOp::Plus, int(i64::MAX), int(1), "int overflow");
        assert_binary_error(BinOp::Star, int(i64::MAX), int(2), "int overflow");
        assert_binary_error(BinOp::LtLt, int(1), int(64), "int overflow");
        assert!(unary(UnaryOp::Minus, &int(i64::MIN)).is_err());
    }

    #[test]
    fn test_mixed_int_float() {
        assert_binary(BinOp::Plus, int(1), Value::Float(0.5), Value::Float(1.5));
        assert!(equal(&int(1), &Value::Float(1.0)).unwrap());
    }

    #[test]
    fn test_sequence_concat_and_repeat() {
        assert_binary(BinOp::Plus, "ab".into(), "cd".into(), "abcd".into());
        assert_binary(BinOp::Star, "ab".into(), int(3), "ababab".into());
        assert_binary(BinOp::Star, int(-1), "ab".into(), "".into());
        assert_binary(
            BinOp::Plus,
            list(vec![int(1)]),
            list(vec![int(2)]),
            list(vec![int(1), int(2)]),
        );
    }

    #[test]
    fn test_unknown_binary_op() {
        assert_binary_error(BinOp::Plus, int(1), "a".into(), "unknown binary op: int + string");
    }

    #[test]
    fn test_membership() {
        assert_binary(BinOp::In, int(2), list(vec![int(1), int(2)]), Value::Bool(true));
        assert_binary(BinOp::NotIn, int(3), list(vec![int(1)]), Value::Bool(true));
        assert_binary(BinOp::In, "ell".into(), "hello".into(), Value::Bool(true));
        assert_binary_error(BinOp::In, int(1), "hello".into(), "requires string");
    }

    #[test]
    fn test_ordering() {
        assert!(compare(BinOp::Lt, &int(1), &int(2)).unwrap());
        assert!(compare(BinOp::Ge, &"b".into(), &"a".into()).unwrap());
        let a = Value::new_tuple(vec![int(1), int(2)]);
        let b = Value::new_tuple(vec![int(1), int(3)]);
        assert!(compare(BinOp::Lt, &a, &b).unwrap());
        let err = compare(BinOp::Lt, &int(1), &"a".into()).unwrap_err();
        assert_eq!(err.to_string(), "int < string not implemented");
    }

    #[test]
    fn test_index_negative_and_out_of_range() {
        let l = list(vec![int(10), int(20), int(30)]);
        assert_eq!(get_index(&l, &int(-1)).unwrap(), int(30));
        let err = get_index(&l, &int(3)).unwrap_err();
        assert_eq!(err.to_string(), "index 3 out of range [-3:2]");
    }

    #[test]
    fn test_dict_index_missing_key() {
        let d = Value::new_dict();
        set_index(&d, &"a".into(), int(1)).unwrap();
        assert_eq!(get_index(&d, &"a".into()).unwrap(), int(1));
        let err = get_index(&d, &"b".into()).unwrap_err();
        assert_eq!(err.to_string(), "key \"b\" not in dict");
    }

    #[test]
    fn test_slices() {
        let l = list((0..6).map(int).collect());
        let none = Value::None;
        assert_eq!(
            slice(&l, &int(1), &int(4), &none).unwrap(),
            list(vec![int(1), int(2), int(3)])
        );
        assert_eq!(
            slice(&l, &none, &none, &int(-2)).unwrap(),
            list(vec![int(5), int(3), int(1)])
        );
        assert_eq!(slice(&"hello".into(), &int(-3), &none, &none).unwrap(), "llo".into());
        assert!(slice(&l, &none, &none, &int(0)).is_err());
    }

    #[test]
    fn test_tuple_is_immutable() {
        let t = Value::new_tuple(vec![int(1)]);
        let err = set_index(&t, &int(0), int(2)).unwrap_err();
        assert_eq!(err.to_string(), "tuple value does not support item assignment");
    }

    #[test]
    fn test_dict_union() {
        let a = Value::new_dict();
        let b = Value::new_dict();
        set_index(&a, &"x".into(), int(1)).unwrap();
        set_index(&b, &"x".into(), int(2)).unwrap();
        set_index(&b, &"y".into(), int(3)).unwrap();
        let u = binary(BinOp::Pipe, &a, &b).unwrap();
        assert_eq!(get_index(&u, &"x".into()).unwrap(), int(2));
        assert_eq!(len(&u), Some(2));
    }

    #[test]
    fn test_extend_self() {
        let v = list(vec![int(1), int(2)]);
        let Value::List(l) = &v else { unreachable!() };
        list_extend(l, &v).unwrap();
        assert_eq!(l.len(), 4);
    }
}
