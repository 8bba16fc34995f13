//! Compiler from resolved syntax trees to bytecode, and the compiled form.
//!
//! A function body is lowered into a graph of basic blocks
//! ([`block`]), linearized with jump threading and stack-depth checks, and
//! encoded into a byte stream plus a position table ([`encode`]).

pub(crate) mod block;
pub mod compile;
pub mod disasm;
pub(crate) mod encode;
pub mod error;
pub mod ir;
pub mod op;

pub use compile::{CompilerConfig, compile_expr, compile_file};
pub use encode::PcLineCol;
pub use error::CodecError;
pub use ir::{BYTECODE_VERSION, Binding, CodeId, Constant, Funcode, Program};
pub use op::Opcode;
