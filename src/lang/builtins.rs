//! The universe: names visible to every program without declaration, and
//! the methods of the built-in container types.

use std::rc::Rc;

use crate::lang::ops;
use crate::lang::value::{Builtin, Dict, Kwargs, StringDict, Value};
use crate::runtime::runtime_error::Error;
use crate::runtime::thread::Thread;

/// Upper bound on the length of a list produced by `range`.
const MAX_RANGE_LEN: i64 = 1 << 24;

thread_local! {
    static UNIVERSE: StringDict = make_universe();
}

fn make_universe() -> StringDict {
    let mut u = StringDict::new();
    u.insert("None".to_string(), Value::None);
    u.insert("True".to_string(), Value::Bool(true));
    u.insert("False".to_string(), Value::Bool(false));
    let fns: [(&'static str, crate::lang::value::BuiltinFn); 10] = [
        ("bool", bool_),
        ("dict", dict),
        ("len", len),
        ("list", list),
        ("print", print),
        ("range", range),
        ("repr", repr),
        ("str", str_),
        ("tuple", tuple),
        ("type", type_),
    ];
    for (name, f) in fns {
        u.insert(name.to_string(), Builtin::new(name, f));
    }
    u
}

/// Look up a universal name.
pub fn universe_lookup(name: &str) -> Option<Value> {
    UNIVERSE.with(|u| u.get(name).cloned())
}

/// A copy of every universal binding.
pub fn universe() -> StringDict {
    UNIVERSE.with(|u| u.clone())
}

/// Resolve a built-in method of `recv`, bound to it.
pub fn method(recv: &Value, name: &str) -> Option<Value> {
    let (name, f): (&'static str, crate::lang::value::BuiltinFn) = match (recv, name) {
        (Value::List(_), "append") => ("append", list_append),
        (Value::List(_), "extend") => ("extend", list_extend),
        (Value::Dict(_), "get") => ("get", dict_get),
        (Value::Dict(_), "keys") => ("keys", dict_keys),
        (Value::Dict(_), "items") => ("items", dict_items),
        _ => return None,
    };
    Some(Builtin::method(name, f, recv.clone()))
}

// =============================================================================
// Argument helpers
// =============================================================================

fn check_args(b: &Builtin, args: &[Value], kwargs: &Kwargs, min: usize, max: usize) -> Result<(), Error> {
    if !kwargs.is_empty() {
        return Err(Error::msg(format!("{}: unexpected keyword arguments", b.name)));
    }
    if args.len() < min {
        return Err(Error::msg(format!(
            "{}: got {} arguments, want at least {}",
            b.name,
            args.len(),
            min
        )));
    }
    if args.len() > max {
        return Err(Error::msg(format!(
            "{}: got {} arguments, want at most {}",
            b.name,
            args.len(),
            max
        )));
    }
    Ok(())
}

fn int_arg(b: &Builtin, v: &Value) -> Result<i64, Error> {
    match v {
        Value::Int(n) => Ok(*n),
        other => Err(Error::msg(format!(
            "{}: got {}, want int",
            b.name,
            other.type_name()
        ))),
    }
}

fn elements(b: &Builtin, v: &Value) -> Result<Vec<Value>, Error> {
    match ops::iterate(v) {
        Some(it) => Ok(it.collect()),
        None => Err(Error::msg(format!(
            "{}: got {}, want iterable",
            b.name,
            v.type_name()
        ))),
    }
}

fn receiver(b: &Builtin) -> Result<&Value, Error> {
    b.recv
        .as_ref()
        .ok_or_else(|| Error::msg(format!("{}: unbound method", b.name)))
}

// =============================================================================
// Functions
// =============================================================================

fn bool_(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 0, 1)?;
    Ok(Value::Bool(args.first().is_some_and(ops::truth)))
}

fn dict(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    if args.len() > 1 {
        return Err(Error::msg(format!("dict: got {} arguments, want at most 1", args.len())));
    }
    let out = Dict::default();
    if let Some(pairs) = args.first() {
        match pairs {
            Value::Dict(d) => {
                for (k, v) in d.items() {
                    out.set(k, v)?;
                }
            }
            other => {
                for (i, item) in elements(b, other)?.into_iter().enumerate() {
                    let kv = elements(b, &item)?;
                    let [k, v] = <[Value; 2]>::try_from(kv).map_err(|kv| {
                        Error::msg(format!(
                            "dict: element #{} has length {}, want 2",
                            i,
                            kv.len()
                        ))
                    })?;
                    out.set(k, v)?;
                }
            }
        }
    }
    for (k, v) in kwargs {
        out.set(Value::String(k.clone()), v.clone())?;
    }
    Ok(Value::Dict(Rc::new(out)))
}

fn len(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 1, 1)?;
    match ops::len(&args[0]) {
        Some(n) => Ok(Value::Int(n as i64)),
        None => Err(Error::msg(format!(
            "len: value of type {} has no len",
            args[0].type_name()
        ))),
    }
}

fn list(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 0, 1)?;
    match args.first() {
        Some(v) => Ok(Value::new_list(elements(b, v)?)),
        None => Ok(Value::new_list(Vec::new())),
    }
}

fn print(thread: &mut Thread, _: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    let sep = match kwargs.iter().find(|(k, _)| &**k == "sep") {
        Some((_, Value::String(s))) => s.to_string(),
        Some((_, other)) => {
            return Err(Error::msg(format!("print: for sep, got {}, want string", other.type_name())));
        }
        None => " ".to_string(),
    };
    if let Some((k, _)) = kwargs.iter().find(|(k, _)| &**k != "sep") {
        return Err(Error::msg(format!("print: unexpected keyword argument {}", k)));
    }
    let msg = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(&sep);
    thread.print(&msg);
    Ok(Value::None)
}

fn range(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 1, 3)?;
    let (start, stop, step) = match args {
        [stop] => (0, int_arg(b, stop)?, 1),
        [start, stop] => (int_arg(b, start)?, int_arg(b, stop)?, 1),
        [start, stop, step] => (int_arg(b, start)?, int_arg(b, stop)?, int_arg(b, step)?),
        _ => return Err(Error::msg("range: want 1 to 3 arguments")),
    };
    if step == 0 {
        return Err(Error::msg("range: step argument must not be zero"));
    }

    let span = if step > 0 {
        i128::from(stop) - i128::from(start)
    } else {
        i128::from(start) - i128::from(stop)
    };
    let count = if span <= 0 {
        0
    } else {
        (span + i128::from(step.unsigned_abs()) - 1) / i128::from(step.unsigned_abs())
    };
    if count > i128::from(MAX_RANGE_LEN) {
        return Err(Error::msg(format!("range: too many elements ({})", count)));
    }

    let elems = (0..count as i64).map(|i| Value::Int(start + i * step)).collect();
    Ok(Value::new_list(elems))
}

fn repr(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 1, 1)?;
    Ok(Value::string(&args[0].repr()))
}

fn str_(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 1, 1)?;
    match &args[0] {
        s @ Value::String(_) => Ok(s.clone()),
        other => Ok(Value::string(&other.to_string())),
    }
}

fn tuple(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 0, 1)?;
    match args.first() {
        Some(t @ Value::Tuple(_)) => Ok(t.clone()),
        Some(v) => Ok(Value::new_tuple(elements(b, v)?)),
        None => Ok(Value::new_tuple(Vec::new())),
    }
}

fn type_(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 1, 1)?;
    Ok(Value::string(args[0].type_name()))
}

// =============================================================================
// Methods
// =============================================================================

fn list_append(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 1, 1)?;
    let Value::List(l) = receiver(b)? else {
        return Err(Error::msg("append: receiver is not a list"));
    };
    l.append(args[0].clone())?;
    Ok(Value::None)
}

fn list_extend(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 1, 1)?;
    let Value::List(l) = receiver(b)? else {
        return Err(Error::msg("extend: receiver is not a list"));
    };
    ops::list_extend(l, &args[0])?;
    Ok(Value::None)
}

fn dict_get(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 1, 2)?;
    let Value::Dict(d) = receiver(b)? else {
        return Err(Error::msg("get: receiver is not a dict"));
    };
    Ok(d.get(&args[0])?
        .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::None)))
}

fn dict_keys(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 0, 0)?;
    let Value::Dict(d) = receiver(b)? else {
        return Err(Error::msg("keys: receiver is not a dict"));
    };
    Ok(Value::new_list(d.keys()))
}

fn dict_items(_: &mut Thread, b: &Builtin, args: &[Value], kwargs: &Kwargs) -> Result<Value, Error> {
    check_args(b, args, kwargs, 0, 0)?;
    let Value::Dict(d) = receiver(b)? else {
        return Err(Error::msg("items: receiver is not a dict"));
    };
    let items = d
        .items()
        .into_iter()
        .map(|(k, v)| Value::new_tuple(vec![k, v]))
        .collect();
    Ok(Value::new_list(items))
}
