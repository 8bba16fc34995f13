//! The language surface the compiler and VM agree on: the resolved syntax
//! tree handed over by the front end, and the host value model the VM
//! computes with.
//!
//! Values are reference-counted and single-threaded. Lists and dicts can be
//! frozen, and are locked against mutation while an iterator is live.

pub mod builtins;
pub mod node;
pub mod ops;
pub mod value;

pub use value::{Kwargs, StringDict, Value};
