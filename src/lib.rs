//! Bytecode compiler and virtual machine for a Starlark-family scripting
//! language.
//!
//! A resolved syntax tree ([`lang::node`]) is compiled into a [`Program`]
//! and executed on a [`Thread`]:
//!
//! ```ignore
//! let program = compile_file("main.star", &body, &locals, &globals, &CompilerConfig::default());
//! let mut thread = Thread::new("main");
//! let (globals, result) = exec_program(&mut thread, Rc::new(program), StringDict::new());
//! ```

pub mod bytecode;
pub mod lang;
pub mod runtime;

pub use bytecode::{CompilerConfig, Program, compile_expr, compile_file};
pub use lang::{StringDict, Value};
pub use runtime::{Error, EvalError, Thread, ThreadConfig, call, eval_program, exec_program};
