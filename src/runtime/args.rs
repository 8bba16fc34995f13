use std::rc::Rc;

use crate::lang::value::{Dict, Function, Kwargs, Value};
use crate::runtime::runtime_error::Error;

/// Bind call arguments to the parameter slots of `func`.
///
/// Parameter slots come first in `locals`, in the order
///
/// ```text
/// def f(p1, p2=dp2, *args, k1, k2=dk2, **kwargs)
///       ^ positional   ^ keyword-only   then *args, then **kwargs
/// ```
///
/// The function's defaults cover every parameter from the first one with a
/// default onward; keyword-only parameters without one hold `MANDATORY`.
/// Slots left unbound are `None`.
pub fn bind_arguments(
    locals: &mut [Option<Value>],
    func: &Function,
    args: Vec<Value>,
    kwargs: Kwargs,
) -> Result<(), Error> {
    let fc = func.funcode();
    let name = func.name();

    if fc.num_params == 0 {
        let given = args.len() + kwargs.len();
        if given > 0 {
            return Err(Error::msg(format!(
                "function {} accepts no arguments ({} given)",
                name, given
            )));
        }
        return Ok(());
    }

    // ordinary parameters, excluding *args and **kwargs
    let mut nparams = fc.num_params as usize;
    let mut kwdict = None;
    if fc.has_kwargs {
        nparams -= 1;
        let d = Rc::new(Dict::default());
        locals[nparams] = Some(Value::Dict(d.clone()));
        kwdict = Some(d);
    }
    if fc.has_varargs {
        nparams -= 1;
    }
    let kwonly = fc.num_kwonly_params as usize;
    let nonkwonly = nparams - kwonly;

    let mut n = args.len();
    if n > nonkwonly {
        if !fc.has_varargs {
            return Err(Error::msg(format!(
                "function {} accepts {}{} positional argument{} ({} given)",
                name,
                if func.defaults.len() > kwonly { "at most " } else { "" },
                nonkwonly,
                if nonkwonly == 1 { "" } else { "s" },
                args.len()
            )));
        }
        n = nonkwonly;
    }

    let mut args = args.into_iter();
    for (slot, arg) in locals.iter_mut().zip(args.by_ref().take(n)) {
        *slot = Some(arg);
    }
    if fc.has_varargs {
        locals[nparams] = Some(Value::new_tuple(args.collect()));
    }

    let params = &fc.locals[..nparams];
    for (k, v) in kwargs {
        if let Some(i) = params.iter().position(|p| *p.name == *k) {
            if locals[i].is_some() {
                return Err(Error::msg(format!(
                    "function {} got multiple values for parameter {}",
                    name, k
                )));
            }
            locals[i] = Some(v);
            continue;
        }
        let Some(d) = &kwdict else {
            return Err(Error::msg(format!(
                "function {} got an unexpected keyword argument {}",
                name, k
            )));
        };
        if !d.set(Value::String(k.clone()), v)? {
            return Err(Error::msg(format!(
                "function {} got multiple values for parameter {}",
                name, k
            )));
        }
    }

    if n < nparams || kwonly > 0 {
        // first parameter with a default
        let m = nparams.saturating_sub(func.defaults.len());

        let mut missing = Vec::new();
        for i in n..m {
            if locals[i].is_none() {
                missing.push(params[i].name.as_str());
            }
        }
        for i in m.max(n)..nparams {
            if locals[i].is_some() {
                continue;
            }
            match &func.defaults[i - m] {
                Value::Mandatory => missing.push(params[i].name.as_str()),
                dflt => locals[i] = Some(dflt.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(Error::msg(format!(
                "function {} missing {} argument{} ({})",
                name,
                missing.len(),
                if missing.len() > 1 { "s" } else { "" },
                missing.join(", ")
            )));
        }
    }
    Ok(())
}
