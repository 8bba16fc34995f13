//! Execution of compiled programs: threads and their frames, argument
//! binding, the dispatch loop, and runtime errors with tracebacks.

pub mod args;
pub mod runtime_error;
pub mod thread;
pub mod vm_bc;

pub use args::bind_arguments;
pub use runtime_error::{CallFrame, CallStack, Error, EvalError};
pub use thread::{CancelHandle, Thread, ThreadConfig};
pub use vm_bc::{Module, call, eval_program, exec_program};
