use thiserror::Error;

/// Failure to read or write the persisted form of a [`Program`](crate::bytecode::Program).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("bytecode too short ({0} bytes)")]
    Truncated(usize),

    #[error("not a compiled program (bad magic)")]
    BadMagic,

    #[error("bytecode version {found} is not supported (want {expected})")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("malformed program: {0}")]
    Malformed(postcard::Error),

    #[error("invalid instruction at pc {pc}")]
    BadInstruction { pc: usize },
}
