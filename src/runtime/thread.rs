use std::fmt;
use std::mem;
use std::rc::Rc;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::lang::node::Position;
use crate::lang::value::{StringDict, Value};
use crate::runtime::runtime_error::{CallFrame, CallStack, Error, EvalError};

#[derive(Debug, Clone)]
pub struct ThreadConfig {
    /// Instructions to execute before the on-max-steps hook fires (or the
    /// thread cancels itself). `None` and zero are unlimited.
    pub max_steps: Option<u64>,
    pub max_call_depth: usize,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        ThreadConfig {
            max_steps: None,
            max_call_depth: 1000,
        }
    }
}

pub type PrintHook = Rc<dyn Fn(&Thread, &str)>;
pub type LoadHook = Rc<dyn Fn(&mut Thread, &str) -> Result<StringDict, Error>>;
pub type MaxStepsHook = Rc<dyn Fn(&Thread)>;

/// Cancels a thread from anywhere, including other OS threads. The first
/// reason set wins and is never cleared.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<OnceLock<String>>);

impl CancelHandle {
    pub fn cancel(&self, reason: impl Into<String>) {
        let _ = self.0.set(reason.into());
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.get().is_some()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CancelHandle").field(&self.0.get()).finish()
    }
}

/// One call activation. Frames are pooled: a popped frame keeps its
/// buffers for the next call at the same depth.
#[derive(Default)]
pub(crate) struct Frame {
    callable: Option<Value>,
    pc: u32,
    locals: Vec<Option<Value>>,
    stack: Vec<Value>,
    entered: Option<Instant>,
}

impl Frame {
    fn info(&self) -> Option<CallFrame> {
        match self.callable.as_ref()? {
            Value::Function(f) => Some(CallFrame {
                name: f.name().to_string(),
                file: f.module.program.filename.clone(),
                pos: f.funcode().position(self.pc),
            }),
            Value::Builtin(b) => Some(CallFrame {
                name: b.name.to_string(),
                file: "<builtin>".to_string(),
                pos: Position::default(),
            }),
            _ => None,
        }
    }
}

/// Execution state of one logical thread of evaluation: the call stack,
/// the step counter, cancellation and the host hooks.
pub struct Thread {
    pub name: String,
    config: ThreadConfig,
    frames: Vec<Frame>,
    depth: usize,
    steps: u64,
    max_steps: u64,
    cancel: CancelHandle,
    print: Option<PrintHook>,
    load: Option<LoadHook>,
    on_max_steps: Option<MaxStepsHook>,
}

impl Thread {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, ThreadConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: ThreadConfig) -> Self {
        let max_steps = match config.max_steps {
            None | Some(0) => u64::MAX,
            Some(n) => n,
        };
        Thread {
            name: name.into(),
            config,
            frames: Vec::new(),
            depth: 0,
            steps: 0,
            max_steps,
            cancel: CancelHandle::default(),
            print: None,
            load: None,
            on_max_steps: None,
        }
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.config
    }

    // Hooks

    pub fn set_print(&mut self, hook: impl Fn(&Thread, &str) + 'static) {
        self.print = Some(Rc::new(hook));
    }

    pub fn set_load(&mut self, hook: impl Fn(&mut Thread, &str) -> Result<StringDict, Error> + 'static) {
        self.load = Some(Rc::new(hook));
    }

    pub fn set_on_max_steps(&mut self, hook: impl Fn(&Thread) + 'static) {
        self.on_max_steps = Some(Rc::new(hook));
    }

    /// Output of the `print` builtin. Without a hook it becomes a log event.
    pub fn print(&self, msg: &str) {
        match &self.print {
            Some(hook) => hook(self, msg),
            None => info!(target: "kestrel::print", thread = %self.name, "{}", msg),
        }
    }

    pub(crate) fn load(&mut self, module: &str) -> Result<StringDict, Error> {
        let Some(hook) = self.load.clone() else {
            return Err(Error::msg("load not implemented by this application"));
        };
        debug!(thread = %self.name, module, "loading module");
        hook(self, module)
    }

    // Steps and cancellation

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Limit the number of instructions this thread may execute in total.
    /// Zero means no limit.
    pub fn set_max_steps(&mut self, max: u64) {
        self.max_steps = if max == 0 { u64::MAX } else { max };
    }

    /// Ask the thread to stop at the next instruction. Only the first
    /// reason is kept; cancellation cannot be undone.
    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if !self.cancel.is_cancelled() {
            debug!(thread = %self.name, reason = %reason, "thread cancelled");
        }
        self.cancel.cancel(reason);
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel.0.get().map(String::as_str)
    }

    /// Count one instruction, then fail if the thread has been cancelled.
    pub(crate) fn tick(&mut self) -> Result<(), Error> {
        self.steps += 1;
        if self.steps >= self.max_steps {
            if self.steps == self.max_steps {
                warn!(thread = %self.name, steps = self.steps, "step limit reached");
            }
            match self.on_max_steps.clone() {
                Some(hook) => hook(self),
                None => self.cancel("too many steps"),
            }
        }
        match self.cancel_reason() {
            Some(reason) => Err(Error::Cancelled(reason.to_string())),
            None => Ok(()),
        }
    }

    // Frames

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn push_frame(&mut self, callable: Value) -> Result<(), Error> {
        if self.depth >= self.config.max_call_depth {
            return Err(Error::CallDepth(self.config.max_call_depth));
        }
        if self.depth == self.frames.len() {
            self.frames.push(Frame::default());
        }
        let fr = &mut self.frames[self.depth];
        fr.callable = Some(callable);
        fr.pc = 0;
        fr.entered = Some(Instant::now());
        self.depth += 1;
        trace!(depth = self.depth, "call");
        Ok(())
    }

    pub(crate) fn pop_frame(&mut self) {
        self.depth -= 1;
        let fr = &mut self.frames[self.depth];
        let elapsed = fr.entered.take().map(|t| t.elapsed());
        fr.callable = None;
        trace!(depth = self.depth + 1, ?elapsed, "return");
    }

    /// Take the innermost frame's pooled buffers, emptied.
    pub(crate) fn take_buffers(&mut self) -> (Vec<Option<Value>>, Vec<Value>) {
        let fr = &mut self.frames[self.depth - 1];
        (mem::take(&mut fr.locals), mem::take(&mut fr.stack))
    }

    /// Return buffers to the innermost frame, dropping their contents.
    pub(crate) fn restore_buffers(&mut self, mut locals: Vec<Option<Value>>, mut stack: Vec<Value>) {
        locals.clear();
        stack.clear();
        let fr = &mut self.frames[self.depth - 1];
        fr.locals = locals;
        fr.stack = stack;
    }

    pub(crate) fn set_pc(&mut self, pc: u32) {
        self.frames[self.depth - 1].pc = pc;
    }

    /// Callables of the active frames below the innermost one.
    pub(crate) fn callers(&self) -> impl Iterator<Item = &Value> {
        self.frames[..self.depth.saturating_sub(1)]
            .iter()
            .filter_map(|fr| fr.callable.as_ref())
    }

    /// The active calls, outermost first, with the current position of each.
    pub fn call_stack(&self) -> CallStack {
        CallStack(self.frames[..self.depth].iter().filter_map(Frame::info).collect())
    }

    /// The call `depth` levels out from the innermost (0 is the innermost).
    pub fn call_frame(&self, depth: usize) -> Option<CallFrame> {
        let i = self.depth.checked_sub(depth + 1)?;
        self.frames[i].info()
    }

    /// Name of the function that called the innermost one; useful to
    /// builtins reporting errors on behalf of their caller.
    pub fn caller_name(&self) -> Option<String> {
        self.call_frame(1).map(|f| f.name)
    }

    pub(crate) fn eval_error(&self, cause: Error) -> EvalError {
        EvalError::new(cause, self.call_stack())
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("depth", &self.depth)
            .field("steps", &self.steps)
            .field("cancelled", &self.cancel_reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lang::value::Builtin;

    fn noop(_: &mut Thread, _: &Builtin, _: &[Value], _: &crate::lang::value::Kwargs) -> Result<Value, Error> {
        Ok(Value::None)
    }

    #[test]
    fn test_cancel_first_reason_wins() {
        let thread = Thread::new("t");
        thread.cancel("first");
        thread.cancel("second");
        assert_eq!(thread.cancel_reason(), Some("first"));
    }

    #[test]
    fn test_cancel_handle_from_other_thread() {
        let thread = Thread::new("t");
        let handle = thread.cancel_handle();
        std::thread::spawn(move || handle.cancel("remote"))
            .join()
            .unwrap();
        assert_eq!(thread.cancel_reason(), Some("remote"));
    }

    #[test]
    fn test_step_limit_cancels() {
        let mut thread = Thread::with_config(
            "t",
            ThreadConfig {
                max_steps: Some(3),
                ..ThreadConfig::default()
            },
        );
        assert!(thread.tick().is_ok());
        assert!(thread.tick().is_ok());
        let err = thread.tick().unwrap_err();
        assert_eq!(err.to_string(), "computation cancelled: too many steps");
        assert_eq!(thread.steps(), 3);
    }

    #[test]
    fn test_zero_step_limit_is_unlimited() {
        let mut configured = Thread::with_config(
            "t",
            ThreadConfig {
                max_steps: Some(0),
                ..ThreadConfig::default()
            },
        );
        let mut set = Thread::new("t");
        set.set_max_steps(0);
        for _ in 0..100 {
            assert!(configured.tick().is_ok());
            assert!(set.tick().is_ok());
        }
        assert_eq!(configured.steps(), 100);
    }

    #[test]
    fn test_on_max_steps_hook_replaces_cancel() {
        let mut thread = Thread::new("t");
        thread.set_max_steps(1);
        thread.set_on_max_steps(|t| t.cancel("budget"));
        let err = thread.tick().unwrap_err();
        assert_eq!(err.to_string(), "computation cancelled: budget");
    }

    #[test]
    fn test_frame_pool_and_call_depth() {
        let mut thread = Thread::with_config(
            "t",
            ThreadConfig {
                max_call_depth: 2,
                ..ThreadConfig::default()
            },
        );
        let f = Builtin::new("noop", noop);
        thread.push_frame(f.clone()).unwrap();
        thread.push_frame(f.clone()).unwrap();
        assert!(matches!(thread.push_frame(f.clone()), Err(Error::CallDepth(2))));
        assert_eq!(thread.call_stack().frames().len(), 2);
        assert_eq!(thread.caller_name().as_deref(), Some("noop"));

        thread.pop_frame();
        thread.pop_frame();
        assert_eq!(thread.depth(), 0);
        assert!(thread.call_stack().frames().is_empty());
        assert_eq!(thread.frames.len(), 2);
    }

    #[test]
    fn test_load_without_hook() {
        let mut thread = Thread::new("t");
        let err = thread.load("m.star").unwrap_err();
        assert_eq!(err.to_string(), "load not implemented by this application");
    }
}
