use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::bytecode::encode::decode_uint32;
use crate::bytecode::ir::{CodeId, Program};
use crate::bytecode::op::Opcode;
use crate::lang::builtins;
use crate::lang::node::{BinOp, UnaryOp};
use crate::lang::ops;
use crate::lang::value::{Cell, Function, Kwargs, StringDict, Value, ValueIter};
use crate::runtime::args::bind_arguments;
use crate::runtime::runtime_error::Error;
use crate::runtime::thread::Thread;

// =============================================================================
// Modules
// =============================================================================

/// A program instantiated for execution: its global slots, its constant
/// pool as values, and the host's predeclared names.
pub struct Module {
    pub program: Rc<Program>,
    pub predeclared: StringDict,
    globals: RefCell<Vec<Option<Value>>>,
    constants: Vec<Value>,
}

impl Module {
    pub fn new(program: Rc<Program>, predeclared: StringDict) -> Rc<Module> {
        let constants = program.constants.iter().map(Value::from_constant).collect();
        let globals = RefCell::new(vec![None; program.globals.len()]);
        Rc::new(Module {
            program,
            predeclared,
            globals,
            constants,
        })
    }

    /// Bound globals, in declaration order.
    pub fn globals(&self) -> StringDict {
        let values = self.globals.borrow();
        self.program
            .globals
            .iter()
            .zip(values.iter())
            .filter_map(|(b, v)| Some((b.name.clone(), v.clone()?)))
            .collect()
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        let i = self.program.globals.iter().position(|b| b.name == name)?;
        self.globals.borrow()[i].clone()
    }

    pub fn freeze(&self) {
        for v in self.globals.borrow().iter().flatten() {
            v.freeze();
        }
    }

    /// Execute the toplevel code, returning what it returns.
    pub fn init(self: &Rc<Self>, thread: &mut Thread) -> Result<Value, Error> {
        let toplevel = Value::Function(Rc::new(Function {
            module: self.clone(),
            code: CodeId::Toplevel,
            defaults: Vec::new(),
            freevars: Vec::new(),
        }));
        call(thread, &toplevel, Vec::new(), Vec::new())
    }
}

/// Execute a program's toplevel and freeze the module. The globals are
/// returned even when execution fails, holding whatever was bound.
pub fn exec_program(
    thread: &mut Thread,
    program: Rc<Program>,
    predeclared: StringDict,
) -> (StringDict, Result<(), Error>) {
    debug!(file = %program.filename, thread = %thread.name, "executing program");
    let module = Module::new(program, predeclared);
    let result = module.init(thread).map(|_| ());
    module.freeze();
    (module.globals(), result)
}

/// Execute a program and return the value of its toplevel, as compiled by
/// `compile_expr`.
pub fn eval_program(
    thread: &mut Thread,
    program: Rc<Program>,
    predeclared: StringDict,
) -> Result<Value, Error> {
    debug!(file = %program.filename, thread = %thread.name, "evaluating program");
    let module = Module::new(program, predeclared);
    module.init(thread)
}

// =============================================================================
// Calls
// =============================================================================

/// Call a function or builtin. An error leaving the innermost call is
/// wrapped once with the call stack at that point.
pub fn call(thread: &mut Thread, f: &Value, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, Error> {
    let result = match f {
        Value::Function(func) => {
            thread.push_frame(f.clone())?;
            interpret(thread, func, args, kwargs)
        }
        Value::Builtin(b) => {
            thread.push_frame(f.clone())?;
            (b.func)(thread, b, &args, &kwargs)
        }
        other => {
            return Err(Error::msg(format!(
                "invalid call of non-function ({})",
                other.type_name()
            )));
        }
    };
    let result = result.map_err(|e| match e {
        Error::Eval(_) => e,
        e => Error::Eval(Box::new(thread.eval_error(e))),
    });
    thread.pop_frame();
    result
}

fn interpret(thread: &mut Thread, func: &Rc<Function>, args: Vec<Value>, kwargs: Kwargs) -> Result<Value, Error> {
    if !func.module.program.recursion {
        let recursive = thread
            .callers()
            .any(|c| matches!(c, Value::Function(g) if g.same_code(func)));
        if recursive {
            return Err(Error::Recursion(func.name().to_string()));
        }
    }

    let fc = func.funcode();
    let (mut locals, mut stack) = thread.take_buffers();
    locals.resize(fc.locals.len(), None);
    stack.reserve(fc.max_stack as usize);

    let result = bind_arguments(&mut locals, func, args, kwargs)
        .and_then(|()| run(thread, func, &mut locals, &mut stack));

    thread.restore_buffers(locals, stack);
    result
}

// =============================================================================
// Dispatch
// =============================================================================

fn internal(what: impl std::fmt::Display) -> Error {
    Error::msg(format!("internal error: {}", what))
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, Error> {
    stack.pop().ok_or_else(|| internal("stack underflow"))
}

/// Remove the top `n` values, preserving their order.
fn pop_n(stack: &mut Vec<Value>, n: usize) -> Result<std::vec::Drain<'_, Value>, Error> {
    let start = stack
        .len()
        .checked_sub(n)
        .ok_or_else(|| internal("stack underflow"))?;
    Ok(stack.drain(start..))
}

fn cell(slot: &Value) -> Result<&Cell, Error> {
    match slot {
        Value::Cell(c) => Ok(c),
        other => Err(internal(format!("expected cell, got {}", other.type_name()))),
    }
}

fn binop(op: Opcode) -> Option<BinOp> {
    Some(match op {
        Opcode::Lt => BinOp::Lt,
        Opcode::Gt => BinOp::Gt,
        Opcode::Ge => BinOp::Ge,
        Opcode::Le => BinOp::Le,
        Opcode::Eql => BinOp::Eq,
        Opcode::Neq => BinOp::Ne,
        Opcode::Plus => BinOp::Plus,
        Opcode::Minus => BinOp::Minus,
        Opcode::Star => BinOp::Star,
        Opcode::Slash => BinOp::Slash,
        Opcode::SlashSlash => BinOp::SlashSlash,
        Opcode::Percent => BinOp::Percent,
        Opcode::Amp => BinOp::Amp,
        Opcode::Pipe => BinOp::Pipe,
        Opcode::Circumflex => BinOp::Circumflex,
        Opcode::LtLt => BinOp::LtLt,
        Opcode::GtGt => BinOp::GtGt,
        Opcode::In => BinOp::In,
        _ => return None,
    })
}

fn run(
    thread: &mut Thread,
    func: &Function,
    locals: &mut [Option<Value>],
    stack: &mut Vec<Value>,
) -> Result<Value, Error> {
    let fc = func.funcode();
    let module = &*func.module;
    let prog = &*module.program;
    let code = fc.code.as_slice();

    for &i in &fc.cells {
        let slot = &mut locals[i as usize];
        *slot = Some(Value::Cell(Rc::new(Cell::new(slot.take()))));
    }

    // Dropping an iterator releases its container, so every exit path
    // below unlocks whatever the loop was iterating.
    let mut iters: Vec<ValueIter> = Vec::new();
    let mut pc: usize = 0;

    loop {
        debug_assert!(
            stack.len() <= fc.max_stack as usize,
            "operand stack depth {} exceeds max_stack {} in {}",
            stack.len(),
            fc.max_stack,
            fc.name
        );
        thread.tick()?;
        thread.set_pc(pc as u32);

        let byte = *code
            .get(pc)
            .ok_or_else(|| internal(format!("pc {} out of range", pc)))?;
        let op = Opcode::from_byte(byte)
            .ok_or_else(|| internal(format!("illegal opcode {} at pc {}", byte, pc)))?;
        pc += 1;
        let arg = if op.has_arg() {
            decode_uint32(code, &mut pc).ok_or_else(|| internal(format!("truncated operand at pc {}", pc)))?
        } else {
            0
        };

        match op {
            Opcode::Nop => {}

            Opcode::Dup => {
                let x = stack.last().cloned().ok_or_else(|| internal("stack underflow"))?;
                stack.push(x);
            }
            Opcode::Dup2 => {
                let n = stack.len();
                if n < 2 {
                    return Err(internal("stack underflow"));
                }
                stack.extend_from_within(n - 2..);
            }
            Opcode::Pop => {
                pop(stack)?;
            }
            Opcode::Exch => {
                let n = stack.len();
                if n < 2 {
                    return Err(internal("stack underflow"));
                }
                stack.swap(n - 2, n - 1);
            }

            Opcode::Lt
            | Opcode::Gt
            | Opcode::Ge
            | Opcode::Le
            | Opcode::Eql
            | Opcode::Neq
            | Opcode::Plus
            | Opcode::Minus
            | Opcode::Star
            | Opcode::Slash
            | Opcode::SlashSlash
            | Opcode::Percent
            | Opcode::Amp
            | Opcode::Pipe
            | Opcode::Circumflex
            | Opcode::LtLt
            | Opcode::GtGt
            | Opcode::In => {
                let op = binop(op).ok_or_else(|| internal("not a binary operator"))?;
                let y = pop(stack)?;
                let x = pop(stack)?;
                stack.push(ops::binary(op, &x, &y)?);
            }

            Opcode::UPlus | Opcode::UMinus | Opcode::Tilde | Opcode::Not => {
                let op = match op {
                    Opcode::UPlus => UnaryOp::Plus,
                    Opcode::UMinus => UnaryOp::Minus,
                    Opcode::Tilde => UnaryOp::Tilde,
                    _ => UnaryOp::Not,
                };
                let x = pop(stack)?;
                stack.push(ops::unary(op, &x)?);
            }

            Opcode::InplaceAdd => {
                let y = pop(stack)?;
                let x = pop(stack)?;
                let z = match &x {
                    Value::List(list) if ops::is_iterable(&y) => {
                        list.check_mutable("apply += to")?;
                        ops::list_extend(list, &y)?;
                        x.clone()
                    }
                    _ => ops::binary(BinOp::Plus, &x, &y)?,
                };
                stack.push(z);
            }
            Opcode::InplacePipe => {
                let y = pop(stack)?;
                let x = pop(stack)?;
                let z = match (&x, &y) {
                    (Value::Dict(dict), Value::Dict(other)) => {
                        ops::dict_update(dict, other)?;
                        x.clone()
                    }
                    _ => ops::binary(BinOp::Pipe, &x, &y)?,
                };
                stack.push(z);
            }

            Opcode::None => stack.push(Value::None),
            Opcode::True => stack.push(Value::Bool(true)),
            Opcode::False => stack.push(Value::Bool(false)),
            Opcode::Mandatory => stack.push(Value::Mandatory),

            Opcode::Jmp => pc = arg as usize,
            Opcode::Cjmp => {
                if ops::truth(&pop(stack)?) {
                    pc = arg as usize;
                }
            }

            Opcode::IterPush => {
                let x = pop(stack)?;
                let iter = ops::iterate(&x).ok_or(Error::Unsupported {
                    ty: x.type_name(),
                    what: "iteration",
                })?;
                iters.push(iter);
            }
            Opcode::IterJmp => {
                let iter = iters
                    .last_mut()
                    .ok_or_else(|| internal("ITERJMP without an iterator"))?;
                match iter.next() {
                    Some(x) => stack.push(x),
                    None => pc = arg as usize,
                }
            }
            Opcode::IterPop => {
                iters.pop();
            }

            Opcode::Return => return pop(stack),

            Opcode::SetIndex => {
                let z = pop(stack)?;
                let y = pop(stack)?;
                let x = pop(stack)?;
                ops::set_index(&x, &y, z)?;
            }
            Opcode::Index => {
                let y = pop(stack)?;
                let x = pop(stack)?;
                stack.push(ops::get_index(&x, &y)?);
            }
            Opcode::Attr => {
                let x = pop(stack)?;
                stack.push(ops::get_attr(&x, &prog.names[arg as usize])?);
            }
            Opcode::SetField => {
                let y = pop(stack)?;
                let x = pop(stack)?;
                ops::set_field(&x, &prog.names[arg as usize], y)?;
            }

            Opcode::MakeDict => stack.push(Value::new_dict()),
            Opcode::SetDict | Opcode::SetDictUniq => {
                let v = pop(stack)?;
                let k = pop(stack)?;
                let Value::Dict(dict) = pop(stack)? else {
                    return Err(internal("SETDICT on non-dict"));
                };
                let inserted = dict.set(k.clone(), v)?;
                if op == Opcode::SetDictUniq && !inserted {
                    return Err(Error::msg(format!("duplicate key: {}", k.repr())));
                }
            }
            Opcode::Append => {
                let elem = pop(stack)?;
                let Value::List(list) = pop(stack)? else {
                    return Err(internal("APPEND on non-list"));
                };
                list.append(elem)?;
            }

            Opcode::Slice => {
                let step = pop(stack)?;
                let hi = pop(stack)?;
                let lo = pop(stack)?;
                let x = pop(stack)?;
                stack.push(ops::slice(&x, &lo, &hi, &step)?);
            }

            Opcode::Unpack => unpack(stack, arg as usize)?,

            Opcode::Constant => stack.push(module.constants[arg as usize].clone()),

            Opcode::MakeTuple => {
                let tuple: Rc<[Value]> = pop_n(stack, arg as usize)?.collect();
                stack.push(Value::Tuple(tuple));
            }
            Opcode::MakeList => {
                let elems: Vec<Value> = pop_n(stack, arg as usize)?.collect();
                stack.push(Value::new_list(elems));
            }

            Opcode::MakeFunc => {
                let nested = prog
                    .functions
                    .get(arg as usize)
                    .ok_or_else(|| internal(format!("no function {}", arg)))?;
                let Value::Tuple(tuple) = pop(stack)? else {
                    return Err(internal("MAKEFUNC without a tuple"));
                };
                let n = tuple
                    .len()
                    .checked_sub(nested.free_vars.len())
                    .ok_or_else(|| internal("MAKEFUNC tuple too short"))?;
                stack.push(Value::Function(Rc::new(Function {
                    module: func.module.clone(),
                    code: CodeId::Nested(arg),
                    defaults: tuple[..n].to_vec(),
                    freevars: tuple[n..].to_vec(),
                })));
            }

            Opcode::Load => load(thread, stack, arg as usize)?,

            Opcode::SetLocal => locals[arg as usize] = Some(pop(stack)?),
            Opcode::SetLocalCell => {
                let v = pop(stack)?;
                let slot = locals[arg as usize]
                    .as_ref()
                    .ok_or_else(|| internal("unboxed cell local"))?;
                cell(slot)?.set(v);
            }
            Opcode::SetGlobal => {
                let v = pop(stack)?;
                module.globals.borrow_mut()[arg as usize] = Some(v);
            }

            Opcode::Local => {
                let v = locals[arg as usize].clone().ok_or_else(|| Error::Unbound {
                    kind: "local",
                    name: fc.locals[arg as usize].name.clone(),
                })?;
                stack.push(v);
            }
            Opcode::Free => stack.push(func.freevars[arg as usize].clone()),
            Opcode::FreeCell => {
                let v = cell(&func.freevars[arg as usize])?
                    .get()
                    .ok_or_else(|| Error::Unbound {
                        kind: "local",
                        name: fc.free_vars[arg as usize].name.clone(),
                    })?;
                stack.push(v);
            }
            Opcode::LocalCell => {
                let slot = locals[arg as usize]
                    .as_ref()
                    .ok_or_else(|| internal("unboxed cell local"))?;
                let v = cell(slot)?.get().ok_or_else(|| Error::Unbound {
                    kind: "local",
                    name: fc.locals[arg as usize].name.clone(),
                })?;
                stack.push(v);
            }
            Opcode::Global => {
                let v = module.globals.borrow()[arg as usize]
                    .clone()
                    .ok_or_else(|| Error::Unbound {
                        kind: "global",
                        name: prog.globals[arg as usize].name.clone(),
                    })?;
                stack.push(v);
            }
            Opcode::Predeclared => {
                let name = &prog.names[arg as usize];
                let v = module
                    .predeclared
                    .get(name)
                    .cloned()
                    .ok_or_else(|| internal(format!("predeclared variable {} is uninitialized", name)))?;
                stack.push(v);
            }
            Opcode::Universal => {
                let name = &prog.names[arg as usize];
                let v = builtins::universe_lookup(name)
                    .ok_or_else(|| internal(format!("universal variable {} is undefined", name)))?;
                stack.push(v);
            }

            Opcode::Call | Opcode::CallVar | Opcode::CallKw | Opcode::CallVarKw => {
                let result = call_op(thread, stack, op, arg)?;
                stack.push(result);
            }
        }
    }
}

/// `UNPACK<n>`: replace an iterable with its `n` elements, first on top.
fn unpack(stack: &mut Vec<Value>, n: usize) -> Result<(), Error> {
    let iterable = pop(stack)?;
    let Some(mut iter) = ops::iterate(&iterable) else {
        return Err(Error::msg(format!(
            "got {} in sequence assignment",
            iterable.type_name()
        )));
    };
    let mut elems: Vec<Value> = iter.by_ref().take(n).collect();
    if iter.next().is_some() {
        return Err(Error::msg(format!(
            "too many values to unpack (got {}, want {})",
            ops::len(&iterable).unwrap_or(0),
            n
        )));
    }
    if elems.len() < n {
        return Err(Error::msg(format!(
            "too few values to unpack (got {}, want {})",
            elems.len(),
            n
        )));
    }
    elems.reverse();
    stack.extend(elems);
    Ok(())
}

/// `LOAD<n>`: the module name is on top of `n` member names; each name is
/// replaced by the member's value.
fn load(thread: &mut Thread, stack: &mut Vec<Value>, n: usize) -> Result<(), Error> {
    let Value::String(module) = pop(stack)? else {
        return Err(internal("LOAD without a module name"));
    };
    let members = thread.load(&module).map_err(|e| Error::Load {
        module: module.to_string(),
        cause: Box::new(e),
    })?;

    let base = stack
        .len()
        .checked_sub(n)
        .ok_or_else(|| internal("stack underflow"))?;
    for slot in &mut stack[base..] {
        let Value::String(from) = &*slot else {
            return Err(internal("LOAD member name is not a string"));
        };
        let v = members.get(&**from).cloned().ok_or_else(|| {
            Error::msg(format!("load: name {} not found in module {}", from, module))
        })?;
        *slot = v;
    }
    Ok(())
}

/// The `CALL` family. Operands, from the bottom: the callee, positional
/// arguments, `(name, value)` pairs, then `*args` and `**kwargs` if the
/// opcode takes them.
fn call_op(thread: &mut Thread, stack: &mut Vec<Value>, op: Opcode, arg: u32) -> Result<Value, Error> {
    let kwargs_arg = match op {
        Opcode::CallKw | Opcode::CallVarKw => Some(pop(stack)?),
        _ => None,
    };
    let args_arg = match op {
        Opcode::CallVar | Opcode::CallVarKw => Some(pop(stack)?),
        _ => None,
    };

    let named = (arg & 0xff) as usize;
    let mut kwargs: Kwargs = Vec::with_capacity(named);
    let mut pairs = pop_n(stack, 2 * named)?;
    while let (Some(k), Some(v)) = (pairs.next(), pairs.next()) {
        let Value::String(k) = k else {
            return Err(internal("named argument without a string name"));
        };
        kwargs.push((k, v));
    }
    drop(pairs);

    if let Some(kw) = kwargs_arg {
        let Value::Dict(dict) = &kw else {
            return Err(Error::msg(format!(
                "argument after ** must be a mapping, not {}",
                kw.type_name()
            )));
        };
        for (k, v) in dict.items() {
            let Value::String(k) = k else {
                return Err(Error::msg(format!(
                    "keywords must be strings, not {}",
                    k.type_name()
                )));
            };
            kwargs.push((k, v));
        }
    }

    let mut args: Vec<Value> = pop_n(stack, (arg >> 8) as usize)?.collect();
    if let Some(extra) = args_arg {
        let Some(iter) = ops::iterate(&extra) else {
            return Err(Error::msg(format!(
                "argument after * must be iterable, not {}",
                extra.type_name()
            )));
        };
        args.extend(iter);
    }

    let function = pop(stack)?;
    call(thread, &function, args, kwargs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::{CompilerConfig, compile_expr, compile_file};
    use crate::lang::node::{
        Arg, Binding, Clause, Comprehension, ComprehensionBody, DictEntry, Expr, Function as Def,
        Ident, Param, Position, Scope, Stmt,
    };
    use crate::lang::value::Builtin;
    use std::cell::RefCell as StdRefCell;

    // =============================================================================
    // Test Helpers
    // =============================================================================

    fn g(name: &str, i: u32) -> Expr {
        Expr::ident(Ident::global(name, i))
    }

    fn u(name: &str) -> Expr {
        Expr::ident(Ident::universal(name))
    }

    fn s(text: &str) -> Expr {
        Expr::string(text)
    }

    fn assign(lhs: Expr, rhs: Expr) -> Stmt {
        Stmt::Assign {
            lhs,
            rhs,
            op_pos: Position::default(),
        }
    }

    fn aug(op: BinOp, lhs: Expr, rhs: Expr) -> Stmt {
        Stmt::AugAssign {
            op,
            lhs,
            rhs,
            op_pos: Position::default(),
        }
    }

    fn call_expr(f: Expr, args: Vec<Expr>) -> Expr {
        Expr::call(f, args.into_iter().map(Arg::Positional).collect())
    }

    fn ret(x: Expr) -> Stmt {
        Stmt::Return { result: Some(x) }
    }

    fn def(name: Ident, f: Def) -> Stmt {
        Stmt::Def {
            name,
            function: Box::new(f),
        }
    }

    fn globals_of(names: &[&str]) -> Vec<Binding> {
        names
            .iter()
            .enumerate()
            .map(|(i, n)| Binding::new(*n, Scope::Global, i as u32))
            .collect()
    }

    fn program(body: Vec<Stmt>, globals: &[&str], config: &CompilerConfig) -> Rc<Program> {
        Rc::new(compile_file("test.star", &body, &[], &globals_of(globals), config))
    }

    /// Compile and run a file body on a fresh thread.
    fn run(body: Vec<Stmt>, globals: &[&str]) -> (StringDict, Result<(), Error>) {
        let mut thread = Thread::new("test");
        run_on(&mut thread, body, globals, &CompilerConfig::default(), StringDict::new())
    }

    fn run_on(
        thread: &mut Thread,
        body: Vec<Stmt>,
        globals: &[&str],
        config: &CompilerConfig,
        predeclared: StringDict,
    ) -> (StringDict, Result<(), Error>) {
        exec_program(thread, program(body, globals, config), predeclared)
    }

    fn assert_global(body: Vec<Stmt>, globals: &[&str], name: &str, expected: Value) {
        let (g, result) = run(body, globals);
        if let Err(e) = result {
            panic!("execution failed: {}", e);
        }
        assert_eq!(g.get(name), Some(&expected), "global {}", name);
    }

    fn assert_error(body: Vec<Stmt>, globals: &[&str], contains: &str) {
        let (g, result) = run(body, globals);
        match result {
            Ok(()) => panic!("expected error containing '{}', got globals {:?}", contains, g),
            Err(e) => assert!(
                e.to_string().contains(contains),
                "expected error containing '{}', got: {}",
                contains,
                e
            ),
        }
    }

    fn int(n: i64) -> Value {
        Value::Int(n)
    }

    // =============================================================================
    // Expressions and statements
    // =============================================================================

    #[test]
    fn test_arithmetic_and_folded_strings() {
        let body = vec![
            assign(g("x", 0), Expr::binary(BinOp::Plus, Expr::int(1), Expr::int(2))),
            assign(
                g("y", 1),
                Expr::binary(BinOp::Plus, Expr::binary(BinOp::Plus, s("a"), s("b")), s("c")),
            ),
        ];
        let (globals, result) = run(body, &["x", "y"]);
        result.unwrap();
        assert_eq!(globals["x"], int(3));
        assert_eq!(globals["y"], Value::string("abc"));
    }

    #[test]
    fn test_while_loop_with_augmented_assignment() {
        // i = 0; total = 0
        // while i < 5: total += i; i += 1
        let body = vec![
            assign(g("i", 0), Expr::int(0)),
            assign(g("total", 1), Expr::int(0)),
            Stmt::While {
                cond: Expr::binary(BinOp::Lt, g("i", 0), Expr::int(5)),
                body: vec![
                    aug(BinOp::Plus, g("total", 1), g("i", 0)),
                    aug(BinOp::Plus, g("i", 0), Expr::int(1)),
                ],
            },
        ];
        assert_global(body, &["i", "total"], "total", int(10));
    }

    #[test]
    fn test_for_loop_and_conditionals() {
        // for x in [1, 2, 3, 4]: if x % 2 == 0: evens += x else: odds += x
        let body = vec![
            assign(g("evens", 1), Expr::int(0)),
            assign(g("odds", 2), Expr::int(0)),
            Stmt::For {
                vars: g("x", 0),
                iterable: Expr::List((1..=4).map(Expr::int).collect()),
                body: vec![Stmt::If {
                    cond: Expr::binary(
                        BinOp::Eq,
                        Expr::binary(BinOp::Percent, g("x", 0), Expr::int(2)),
                        Expr::int(0),
                    ),
                    then_body: vec![aug(BinOp::Plus, g("evens", 1), g("x", 0))],
                    else_body: vec![aug(BinOp::Plus, g("odds", 2), g("x", 0))],
                }],
                for_pos: Position::new(1, 1),
            },
        ];
        let (globals, result) = run(body, &["x", "evens", "odds"]);
        result.unwrap();
        assert_eq!(globals["evens"], int(6));
        assert_eq!(globals["odds"], int(4));
    }

    #[test]
    fn test_short_circuit_operators_yield_operands() {
        let body = vec![
            assign(g("a", 0), Expr::binary(BinOp::Or, Expr::int(0), s("x"))),
            assign(g("b", 1), Expr::binary(BinOp::And, Expr::int(0), s("x"))),
        ];
        let (globals, result) = run(body, &["a", "b"]);
        result.unwrap();
        assert_eq!(globals["a"], Value::string("x"));
        assert_eq!(globals["b"], int(0));
    }

    #[test]
    fn test_list_comprehension() {
        // ys = [x * 2 for x in [1, 2, 3] if x != 2]
        let comp = Comprehension {
            body: ComprehensionBody::Elem(Expr::binary(
                BinOp::Star,
                Expr::ident(Ident::local("x", 0)),
                Expr::int(2),
            )),
            clauses: vec![
                Clause::For {
                    vars: Expr::ident(Ident::local("x", 0)),
                    iterable: Expr::List(vec![Expr::int(1), Expr::int(2), Expr::int(3)]),
                    for_pos: Position::new(1, 10),
                },
                Clause::If {
                    cond: Expr::binary(BinOp::Ne, Expr::ident(Ident::local("x", 0)), Expr::int(2)),
                },
            ],
        };
        let body = vec![assign(g("ys", 0), Expr::Comprehension(Box::new(comp)))];
        let prog = compile_file(
            "test.star",
            &body,
            &[Binding::local("x")],
            &globals_of(&["ys"]),
            &CompilerConfig::default(),
        );
        let mut thread = Thread::new("test");
        let (globals, result) = exec_program(&mut thread, Rc::new(prog), StringDict::new());
        result.unwrap();
        assert_eq!(globals["ys"], Value::new_list(vec![int(2), int(6)]));
    }

    #[test]
    fn test_dict_literal_duplicate_key() {
        let entry = |k: &str, v: i64| DictEntry {
            key: s(k),
            value: Expr::int(v),
            colon: Position::default(),
        };
        let body = vec![assign(g("d", 0), Expr::Dict(vec![entry("a", 1), entry("a", 2)]))];
        assert_error(body, &["d"], "duplicate key: \"a\"");
    }

    #[test]
    fn test_unpack() {
        let pair = || Expr::Tuple(vec![Expr::int(1), Expr::int(2)]);
        let body = vec![assign(Expr::Tuple(vec![g("a", 0), g("b", 1)]), pair())];
        let (globals, result) = run(body, &["a", "b"]);
        result.unwrap();
        assert_eq!(globals["a"], int(1));
        assert_eq!(globals["b"], int(2));

        let too_many = vec![assign(Expr::Tuple(vec![g("a", 0)]), pair())];
        assert_error(too_many, &["a"], "too many values to unpack (got 2, want 1)");

        let too_few = vec![assign(
            Expr::Tuple(vec![g("a", 0), g("b", 1), g("c", 2)]),
            pair(),
        )];
        assert_error(too_few, &["a", "b", "c"], "too few values to unpack (got 2, want 3)");
    }

    #[test]
    fn test_stack_heavy_code_stays_within_max_stack() {
        // for (a, b) in [(1, 2), (3, 4)]: total += len([a, b, (a, b), [a]]) * b
        let pair = |x: i64, y: i64| Expr::Tuple(vec![Expr::int(x), Expr::int(y)]);
        let elems = vec![
            g("a", 0),
            g("b", 1),
            Expr::Tuple(vec![g("a", 0), g("b", 1)]),
            Expr::List(vec![g("a", 0)]),
        ];
        let body = vec![
            assign(g("total", 2), Expr::int(0)),
            Stmt::For {
                vars: Expr::Tuple(vec![g("a", 0), g("b", 1)]),
                iterable: Expr::List(vec![pair(1, 2), pair(3, 4)]),
                body: vec![aug(
                    BinOp::Plus,
                    g("total", 2),
                    Expr::binary(
                        BinOp::Star,
                        call_expr(u("len"), vec![Expr::List(elems)]),
                        g("b", 1),
                    ),
                )],
                for_pos: Position::new(1, 1),
            },
        ];
        assert_global(body, &["a", "b", "total"], "total", int(24));
    }

    #[test]
    fn test_unbound_global() {
        let body = vec![assign(g("y", 1), g("x", 0))];
        assert_error(body, &["x", "y"], "global variable x referenced before assignment");
    }

    #[test]
    fn test_unbound_local() {
        // def f(): r = v; v = 1
        let mut f = Def::new(
            "f",
            vec![
                assign(Expr::ident(Ident::local("r", 0)), Expr::ident(Ident::local("v", 1))),
                assign(Expr::ident(Ident::local("v", 1)), Expr::int(1)),
            ],
        );
        f.locals = vec![Binding::local("r"), Binding::local("v")];
        let body = vec![
            def(Ident::global("f", 0), f),
            Stmt::Expr(call_expr(g("f", 0), vec![])),
        ];
        assert_error(body, &["f"], "local variable v referenced before assignment");
    }

    #[test]
    fn test_iteration_locks_list() {
        // xs = [1, 2]; for x in xs: xs.append(x)
        let body = vec![
            assign(g("xs", 0), Expr::List(vec![Expr::int(1), Expr::int(2)])),
            Stmt::For {
                vars: g("x", 1),
                iterable: g("xs", 0),
                body: vec![Stmt::Expr(call_expr(Expr::dot(g("xs", 0), "append"), vec![g("x", 1)]))],
                for_pos: Position::new(1, 1),
            },
        ];
        assert_error(body, &["xs", "x"], "cannot append to list during iteration");
    }

    #[test]
    fn test_loop_exit_releases_list() {
        // xs = [1]; for x in xs: pass; xs.append(2); n = len(xs)
        let body = vec![
            assign(g("xs", 0), Expr::List(vec![Expr::int(1)])),
            Stmt::For {
                vars: g("x", 1),
                iterable: g("xs", 0),
                body: vec![Stmt::Pass],
                for_pos: Position::new(1, 1),
            },
            Stmt::Expr(call_expr(Expr::dot(g("xs", 0), "append"), vec![Expr::int(2)])),
            assign(g("n", 2), call_expr(u("len"), vec![g("xs", 0)])),
        ];
        assert_global(body, &["xs", "x", "n"], "n", int(2));
    }

    #[test]
    fn test_inplace_add_extends_shared_list() {
        // a = [1]; b = a; a += [2]; n = len(b)
        let body = vec![
            assign(g("a", 0), Expr::List(vec![Expr::int(1)])),
            assign(g("b", 1), g("a", 0)),
            aug(BinOp::Plus, g("a", 0), Expr::List(vec![Expr::int(2)])),
            assign(g("n", 2), call_expr(u("len"), vec![g("b", 1)])),
        ];
        assert_global(body, &["a", "b", "n"], "n", int(2));
    }

    #[test]
    fn test_inplace_pipe_merges_dict() {
        let entry = |k: &str, v: i64| DictEntry {
            key: s(k),
            value: Expr::int(v),
            colon: Position::default(),
        };
        let body = vec![
            assign(g("d", 0), Expr::Dict(vec![entry("a", 1)])),
            assign(g("e", 1), g("d", 0)),
            aug(BinOp::Pipe, g("d", 0), Expr::Dict(vec![entry("b", 2)])),
            assign(g("n", 2), call_expr(u("len"), vec![g("e", 1)])),
        ];
        assert_global(body, &["d", "e", "n"], "n", int(2));
    }

    #[test]
    fn test_globals_frozen_after_exec() {
        let body = vec![assign(g("xs", 0), Expr::List(vec![]))];
        let (globals, result) = run(body, &["xs"]);
        result.unwrap();
        let Value::List(l) = &globals["xs"] else {
            panic!("expected list");
        };
        assert!(l.append(int(1)).is_err());
    }

    #[test]
    fn test_partial_globals_on_error() {
        let body = vec![
            assign(g("a", 0), Expr::int(1)),
            assign(g("b", 1), Expr::binary(BinOp::SlashSlash, Expr::int(1), Expr::int(0))),
        ];
        let (globals, result) = run(body, &["a", "b"]);
        assert!(result.is_err());
        assert_eq!(globals.get("a"), Some(&int(1)));
        assert!(!globals.contains_key("b"));
    }

    #[test]
    fn test_eval_expression() {
        let prog = compile_expr(
            "expr",
            &Expr::binary(BinOp::Star, Expr::int(6), Expr::int(7)),
            &[],
            &CompilerConfig::default(),
        );
        let mut thread = Thread::new("test");
        let v = eval_program(&mut thread, Rc::new(prog), StringDict::new()).unwrap();
        assert_eq!(v, int(42));
        assert_eq!(thread.depth(), 0);
    }

    // =============================================================================
    // Functions and calls
    // =============================================================================

    /// def add(a, b=10): return a + b
    fn add_def() -> Stmt {
        let mut f = Def::new(
            "add",
            vec![ret(Expr::binary(
                BinOp::Plus,
                Expr::ident(Ident::local("a", 0)),
                Expr::ident(Ident::local("b", 1)),
            ))],
        );
        f.params = vec![
            Param::Required(Ident::local("a", 0)),
            Param::Optional(Ident::local("b", 1), Expr::int(10)),
        ];
        f.locals = vec![Binding::local("a"), Binding::local("b")];
        def(Ident::global("add", 0), f)
    }

    #[test]
    fn test_call_with_defaults_and_keywords() {
        let body = vec![
            add_def(),
            assign(g("r1", 1), call_expr(g("add", 0), vec![Expr::int(1)])),
            assign(
                g("r2", 2),
                Expr::call(
                    g("add", 0),
                    vec![
                        Arg::Positional(Expr::int(1)),
                        Arg::Named("b".to_string(), Expr::int(2)),
                    ],
                ),
            ),
        ];
        let (globals, result) = run(body, &["add", "r1", "r2"]);
        result.unwrap();
        assert_eq!(globals["r1"], int(11));
        assert_eq!(globals["r2"], int(3));
    }

    #[test]
    fn test_call_with_star_arguments() {
        let kw = Expr::Dict(vec![DictEntry {
            key: s("b"),
            value: Expr::int(5),
            colon: Position::default(),
        }]);
        let body = vec![
            add_def(),
            assign(
                g("r", 1),
                Expr::call(
                    g("add", 0),
                    vec![
                        Arg::Star(Expr::List(vec![Expr::int(1)])),
                        Arg::StarStar(kw),
                    ],
                ),
            ),
        ];
        assert_global(body, &["add", "r"], "r", int(6));
    }

    #[test]
    fn test_call_argument_errors() {
        let star_star = |x: Expr| {
            vec![
                add_def(),
                Stmt::Expr(Expr::call(
                    g("add", 0),
                    vec![Arg::Positional(Expr::int(1)), Arg::StarStar(x)],
                )),
            ]
        };
        assert_error(star_star(Expr::int(1)), &["add"], "argument after ** must be a mapping, not int");

        let int_key = Expr::Dict(vec![DictEntry {
            key: Expr::int(1),
            value: Expr::int(2),
            colon: Position::default(),
        }]);
        assert_error(star_star(int_key), &["add"], "keywords must be strings, not int");

        let star = vec![
            add_def(),
            Stmt::Expr(Expr::call(g("add", 0), vec![Arg::Star(Expr::int(1))])),
        ];
        assert_error(star, &["add"], "argument after * must be iterable, not int");

        let not_callable = vec![Stmt::Expr(call_expr(Expr::int(1), vec![]))];
        assert_error(not_callable, &[], "invalid call of non-function (int)");
    }

    /// def outer(v):
    ///     def get(): return v
    ///     return get
    fn outer_def() -> Stmt {
        let mut get = Def::new("get", vec![ret(Expr::ident(Ident::free("v", 0)))]);
        get.free_vars = vec![Binding::new("v", Scope::Cell, 0)];

        let mut outer = Def::new(
            "outer",
            vec![
                def(Ident::local("get", 1), get),
                ret(Expr::ident(Ident::local("get", 1))),
            ],
        );
        outer.params = vec![Param::Required(Ident::cell("v", 0))];
        outer.locals = vec![Binding::cell("v"), Binding::local("get")];
        def(Ident::global("outer", 0), outer)
    }

    #[test]
    fn test_closures_get_a_fresh_cell_per_call() {
        let body = vec![
            outer_def(),
            assign(g("a", 1), call_expr(g("outer", 0), vec![Expr::int(1)])),
            assign(g("b", 2), call_expr(g("outer", 0), vec![Expr::int(2)])),
            assign(g("ra", 3), call_expr(g("a", 1), vec![])),
            assign(g("rb", 4), call_expr(g("b", 2), vec![])),
        ];
        let (globals, result) = run(body, &["outer", "a", "b", "ra", "rb"]);
        result.unwrap();
        assert_eq!(globals["ra"], int(1));
        assert_eq!(globals["rb"], int(2));
    }

    #[test]
    fn test_closure_sees_later_assignment() {
        // def f():
        //     x = 1
        //     def get(): return x
        //     x = 2
        //     return get()
        let mut get = Def::new("get", vec![ret(Expr::ident(Ident::free("x", 0)))]);
        get.free_vars = vec![Binding::new("x", Scope::Cell, 0)];
        let mut f = Def::new(
            "f",
            vec![
                assign(Expr::ident(Ident::cell("x", 0)), Expr::int(1)),
                def(Ident::local("get", 1), get),
                assign(Expr::ident(Ident::cell("x", 0)), Expr::int(2)),
                ret(call_expr(Expr::ident(Ident::local("get", 1)), vec![])),
            ],
        );
        f.locals = vec![Binding::cell("x"), Binding::local("get")];
        let body = vec![
            def(Ident::global("f", 0), f),
            assign(g("r", 1), call_expr(g("f", 0), vec![])),
        ];
        assert_global(body, &["f", "r"], "r", int(2));
    }

    #[test]
    fn test_sibling_closures_share_one_cell() {
        // def f(n):
        //     x = n
        //     def a(): return x
        //     def b(): return x
        //     x = n + 1
        //     return (a, b)
        // p = f(1); q = f(5)
        // r = (p[0](), p[1](), q[0](), q[1]())
        let getter = |name: &str| {
            let mut d = Def::new(name, vec![ret(Expr::ident(Ident::free("x", 0)))]);
            d.free_vars = vec![Binding::new("x", Scope::Cell, 1)];
            d
        };
        let n = || Expr::ident(Ident::local("n", 0));
        let mut f = Def::new(
            "f",
            vec![
                assign(Expr::ident(Ident::cell("x", 1)), n()),
                def(Ident::local("a", 2), getter("a")),
                def(Ident::local("b", 3), getter("b")),
                assign(
                    Expr::ident(Ident::cell("x", 1)),
                    Expr::binary(BinOp::Plus, n(), Expr::int(1)),
                ),
                ret(Expr::Tuple(vec![
                    Expr::ident(Ident::local("a", 2)),
                    Expr::ident(Ident::local("b", 3)),
                ])),
            ],
        );
        f.params = vec![Param::Required(Ident::local("n", 0))];
        f.locals = vec![
            Binding::local("n"),
            Binding::cell("x"),
            Binding::local("a"),
            Binding::local("b"),
        ];

        let pick = |t: Expr, i: i64| call_expr(Expr::index(t, Expr::int(i)), vec![]);
        let body = vec![
            def(Ident::global("f", 0), f),
            assign(g("p", 1), call_expr(g("f", 0), vec![Expr::int(1)])),
            assign(g("q", 2), call_expr(g("f", 0), vec![Expr::int(5)])),
            assign(
                g("r", 3),
                Expr::Tuple(vec![
                    pick(g("p", 1), 0),
                    pick(g("p", 1), 1),
                    pick(g("q", 2), 0),
                    pick(g("q", 2), 1),
                ]),
            ),
        ];
        let (globals, result) = run(body, &["f", "p", "q", "r"]);
        result.unwrap();
        assert_eq!(
            globals["r"],
            Value::new_tuple(vec![int(2), int(2), int(6), int(6)])
        );

        let captured = |pair: &Value, i: usize| -> Rc<Cell> {
            let Value::Tuple(fs) = pair else {
                panic!("expected tuple, got {:?}", pair);
            };
            let Value::Function(func) = &fs[i] else {
                panic!("expected function");
            };
            match &func.freevars[0] {
                Value::Cell(c) => c.clone(),
                other => panic!("expected cell, got {:?}", other),
            }
        };
        let (pa, pb) = (captured(&globals["p"], 0), captured(&globals["p"], 1));
        let qa = captured(&globals["q"], 0);
        assert!(Rc::ptr_eq(&pa, &pb));
        assert!(!Rc::ptr_eq(&pa, &qa));
    }

    /// def f(n): return f(n)
    fn self_call() -> Stmt {
        let mut f = Def::new(
            "f",
            vec![ret(call_expr(g("f", 0), vec![Expr::ident(Ident::local("n", 0))]).at(1, 20))],
        );
        f.pos = Position::new(1, 1);
        f.params = vec![Param::Required(Ident::local("n", 0))];
        f.locals = vec![Binding::local("n")];
        def(Ident::global("f", 0), f)
    }

    #[test]
    fn test_recursion_guard_fires_on_second_entry() {
        let body = vec![
            self_call(),
            Stmt::Expr(call_expr(g("f", 0), vec![Expr::int(1)]).at(2, 2)),
        ];
        let (_, result) = run(body, &["f"]);
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "function f called recursively");
        let names: Vec<&str> = err
            .call_stack()
            .unwrap()
            .frames()
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["<toplevel>", "f", "f"]);
    }

    #[test]
    fn test_recursion_allowed_hits_depth_limit() {
        let mut thread = Thread::with_config(
            "test",
            crate::runtime::thread::ThreadConfig {
                max_call_depth: 8,
                ..Default::default()
            },
        );
        let config = CompilerConfig {
            recursion: true,
            ..CompilerConfig::default()
        };
        let body = vec![
            self_call(),
            Stmt::Expr(call_expr(g("f", 0), vec![Expr::int(1)])),
        ];
        let (_, result) = run_on(&mut thread, body, &["f"], &config, StringDict::new());
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "call depth limit exceeded (8)");
        assert_eq!(thread.depth(), 0);
    }

    #[test]
    fn test_traceback_positions() {
        // 1: def f():
        // 2:     return 1 // 0
        // 3: f()
        let mut f = Def::new(
            "f",
            vec![ret(Expr::binary(BinOp::SlashSlash, Expr::int(1), Expr::int(0)).at(2, 14))],
        );
        f.pos = Position::new(1, 5);
        let body = vec![
            def(Ident::global("f", 0), f),
            Stmt::Expr(call_expr(g("f", 0), vec![]).at(3, 2)),
        ];
        let (_, result) = run(body, &["f"]);
        let Err(Error::Eval(err)) = result else {
            panic!("expected an evaluation error");
        };
        assert_eq!(
            err.backtrace(),
            "Traceback (most recent call last):\n  test.star:3:2: in <toplevel>\n  test.star:2:14: in f\nError: integer division by zero"
        );
    }

    #[test]
    fn test_traceback_names_failing_builtin() {
        let body = vec![Stmt::Expr(call_expr(u("len"), vec![Expr::int(1)]).at(1, 4))];
        let (_, result) = run(body, &[]);
        let Err(Error::Eval(err)) = result else {
            panic!("expected an evaluation error");
        };
        let bt = err.backtrace();
        assert!(bt.contains("  test.star:1:4: in <toplevel>\n"), "{}", bt);
        assert!(bt.ends_with("Error in len: len: value of type int has no len"), "{}", bt);
    }

    // =============================================================================
    // Host interaction
    // =============================================================================

    fn stop(thread: &mut Thread, _: &Builtin, _: &[Value], _: &Kwargs) -> Result<Value, Error> {
        thread.cancel("halt");
        thread.print(&thread.steps().to_string());
        Ok(Value::None)
    }

    #[test]
    fn test_cancellation_stops_at_next_instruction() {
        let printed = Rc::new(StdRefCell::new(Vec::<String>::new()));
        let sink = printed.clone();
        let mut thread = Thread::new("test");
        thread.set_print(move |_, msg| sink.borrow_mut().push(msg.to_string()));

        let mut predeclared = StringDict::new();
        predeclared.insert("stop".to_string(), Builtin::new("stop", stop));
        let body = vec![
            Stmt::Expr(call_expr(Expr::ident(Ident::predeclared("stop")), vec![])),
            assign(g("x", 0), Expr::int(1)),
        ];
        let (globals, result) = run_on(&mut thread, body, &["x"], &CompilerConfig::default(), predeclared);

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "computation cancelled: halt");
        assert!(matches!(err.root(), Error::Cancelled(_)));
        assert!(!globals.contains_key("x"));

        let at_cancel: u64 = printed.borrow()[0].parse().unwrap();
        assert_eq!(thread.steps(), at_cancel + 1);
    }

    #[test]
    fn test_step_limit_stops_infinite_loop() {
        let mut thread = Thread::with_config(
            "test",
            crate::runtime::thread::ThreadConfig {
                max_steps: Some(1000),
                ..Default::default()
            },
        );
        let body = vec![Stmt::While {
            cond: u("True"),
            body: vec![Stmt::Pass],
        }];
        let (_, result) = run_on(&mut thread, body, &[], &CompilerConfig::default(), StringDict::new());
        assert_eq!(result.unwrap_err().to_string(), "computation cancelled: too many steps");
        assert_eq!(thread.steps(), 1000);
    }

    #[test]
    fn test_cancelled_before_start() {
        let mut thread = Thread::new("test");
        let handle = thread.cancel_handle();
        std::thread::spawn(move || handle.cancel("shutdown"))
            .join()
            .unwrap();
        let (_, result) = run_on(
            &mut thread,
            vec![assign(g("x", 0), Expr::int(1))],
            &["x"],
            &CompilerConfig::default(),
            StringDict::new(),
        );
        assert_eq!(result.unwrap_err().to_string(), "computation cancelled: shutdown");
        assert_eq!(thread.steps(), 1);
    }

    fn load_stmt(names: &[&str]) -> Stmt {
        Stmt::Load {
            load_pos: Position::new(1, 1),
            module: "lib.star".to_string(),
            module_pos: Position::new(1, 6),
            from: names.iter().map(|n| n.to_string()).collect(),
            to: names
                .iter()
                .enumerate()
                .map(|(i, n)| Ident::global(*n, i as u32))
                .collect(),
        }
    }

    fn loader(_: &mut Thread, module: &str) -> Result<StringDict, Error> {
        if module != "lib.star" {
            return Err(Error::msg("no such file"));
        }
        let mut members = StringDict::new();
        members.insert("a".to_string(), int(1));
        members.insert("b".to_string(), int(2));
        Ok(members)
    }

    #[test]
    fn test_load_binds_members() {
        let mut thread = Thread::new("test");
        thread.set_load(loader);
        let (globals, result) = run_on(
            &mut thread,
            vec![load_stmt(&["a", "b"])],
            &["a", "b"],
            &CompilerConfig::default(),
            StringDict::new(),
        );
        result.unwrap();
        assert_eq!(globals["a"], int(1));
        assert_eq!(globals["b"], int(2));
    }

    #[test]
    fn test_load_errors() {
        let mut thread = Thread::new("test");
        thread.set_load(loader);
        let (_, result) = run_on(
            &mut thread,
            vec![load_stmt(&["zzz"])],
            &["zzz"],
            &CompilerConfig::default(),
            StringDict::new(),
        );
        assert_eq!(
            result.unwrap_err().to_string(),
            "load: name zzz not found in module lib.star"
        );

        let (_, result) = run(vec![load_stmt(&["a"])], &["a"]);
        assert_eq!(
            result.unwrap_err().to_string(),
            "cannot load lib.star: load not implemented by this application"
        );
    }

    #[test]
    fn test_host_call_of_script_function() {
        let (globals, result) = run(vec![add_def()], &["add"]);
        result.unwrap();
        let mut thread = Thread::new("host");
        let v = call(
            &mut thread,
            &globals["add"],
            vec![int(2)],
            vec![(Rc::from("b"), int(3))],
        )
        .unwrap();
        assert_eq!(v, int(5));
    }
}
