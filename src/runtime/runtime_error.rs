use std::fmt;

use thiserror::Error;

use crate::lang::node::Position;

/// Errors raised while executing compiled code.
#[derive(Debug, Error)]
pub enum Error {
    /// Failure reported by a value operation or builtin.
    #[error("{0}")]
    Message(String),

    #[error("unknown binary op: {x} {op} {y}")]
    BinaryOp {
        op: &'static str,
        x: &'static str,
        y: &'static str,
    },

    #[error("unknown unary op: {op}{x}")]
    UnaryOp { op: &'static str, x: &'static str },

    #[error("{ty} value does not support {what}")]
    Unsupported { ty: &'static str, what: &'static str },

    #[error("{kind} variable {name} referenced before assignment")]
    Unbound { kind: &'static str, name: String },

    #[error("function {0} called recursively")]
    Recursion(String),

    #[error("call depth limit exceeded ({0})")]
    CallDepth(usize),

    #[error("computation cancelled: {0}")]
    Cancelled(String),

    #[error("cannot load {module}: {cause}")]
    Load {
        module: String,
        #[source]
        cause: Box<Error>,
    },

    #[error(transparent)]
    Eval(Box<EvalError>),
}

impl Error {
    pub fn msg(msg: impl Into<String>) -> Self {
        Error::Message(msg.into())
    }

    /// The call stack recorded when the error left a call, if it has.
    pub fn call_stack(&self) -> Option<&CallStack> {
        match self {
            Error::Eval(e) => Some(&e.call_stack),
            _ => None,
        }
    }

    /// The error as first raised, with any call-stack wrapping removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Eval(e) => e.cause.root(),
            other => other,
        }
    }
}

// =============================================================================
// Call stack
// =============================================================================

/// One active call. Builtins have no position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    pub name: String,
    pub file: String,
    pub pos: Position,
}

impl CallFrame {
    pub fn is_builtin(&self) -> bool {
        !self.pos.is_valid()
    }
}

/// Active calls, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack(pub Vec<CallFrame>);

impl CallStack {
    pub fn frames(&self) -> &[CallFrame] {
        &self.0
    }

    pub fn innermost(&self) -> Option<&CallFrame> {
        self.0.last()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.0 {
            writeln!(f, "  {}:{}: in {}", frame.file, frame.pos, frame.name)?;
        }
        Ok(())
    }
}

/// An error annotated with the call stack at the point it was raised.
#[derive(Debug, Error)]
#[error("{msg}")]
pub struct EvalError {
    pub msg: String,
    pub call_stack: CallStack,
    #[source]
    pub cause: Box<Error>,
}

impl EvalError {
    pub fn new(cause: Error, call_stack: CallStack) -> Self {
        EvalError {
            msg: cause.to_string(),
            call_stack,
            cause: Box::new(cause),
        }
    }

    /// Python-style traceback, most recent call last. When the innermost
    /// frame is a builtin the message names it instead of getting a line.
    pub fn backtrace(&self) -> String {
        let mut frames = self.call_stack.0.as_slice();
        let errmsg = match frames.split_last() {
            Some((last, rest)) if last.is_builtin() => {
                frames = rest;
                format!("Error in {}: {}", last.name, self.msg)
            }
            _ => format!("Error: {}", self.msg),
        };

        let mut out = String::from("Traceback (most recent call last):\n");
        out.push_str(&CallStack(frames.to_vec()).to_string());
        out.push_str(&errmsg);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(name: &str, line: u32, col: u32) -> CallFrame {
        CallFrame {
            name: name.to_string(),
            file: "a.star".to_string(),
            pos: Position::new(line, col),
        }
    }

    #[test]
    fn test_backtrace_script_frames() {
        let err = EvalError::new(
            Error::msg("boom"),
            CallStack(vec![frame("<toplevel>", 3, 1), frame("f", 1, 12)]),
        );
        assert_eq!(
            err.backtrace(),
            "Traceback (most recent call last):\n  a.star:3:1: in <toplevel>\n  a.star:1:12: in f\nError: boom"
        );
    }

    #[test]
    fn test_backtrace_builtin_innermost() {
        let err = EvalError::new(
            Error::msg("bad argument"),
            CallStack(vec![frame("<toplevel>", 2, 4), frame("len", 0, 0)]),
        );
        assert_eq!(
            err.backtrace(),
            "Traceback (most recent call last):\n  a.star:2:4: in <toplevel>\nError in len: bad argument"
        );
    }

    #[test]
    fn test_root_unwraps_eval() {
        let inner = Error::Cancelled("stop".to_string());
        let wrapped = Error::Eval(Box::new(EvalError::new(inner, CallStack::default())));
        assert_eq!(wrapped.to_string(), "computation cancelled: stop");
        assert!(matches!(wrapped.root(), Error::Cancelled(_)));
        assert!(wrapped.call_stack().is_some());
    }

    #[test]
    fn test_unbound_message() {
        let err = Error::Unbound {
            kind: "local",
            name: "x".to_string(),
        };
        assert_eq!(err.to_string(), "local variable x referenced before assignment");
    }
}
