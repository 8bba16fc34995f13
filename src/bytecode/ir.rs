use std::cell::OnceCell;

use serde::{Deserialize, Serialize};

use crate::bytecode::encode::{PcLineCol, decode_pclinetab};
use crate::bytecode::error::CodecError;
use crate::lang::node::Position;

/// Version of the compiled form. Bump on any change to the opcode set, the
/// operand encoding, the position table, or the `Program`/`Funcode` layout.
pub const BYTECODE_VERSION: u32 = 1;

const MAGIC: &[u8; 4] = b"KSTB";
const HEADER_LEN: usize = MAGIC.len() + 4;

/// A name with the position of its declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub pos: Position,
}

/// A literal value in a program's constant pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// Identifies a compiled function within its program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeId {
    Toplevel,
    Nested(u32),
}

/// A compiled program: the pools shared by every function of one file,
/// plus its toplevel function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub filename: String,
    /// Attribute, predeclared and universal names, deduplicated.
    pub names: Vec<String>,
    /// Literal values, deduplicated by value and type.
    pub constants: Vec<Constant>,
    /// Nested functions, addressed by `MAKEFUNC`.
    pub functions: Vec<Funcode>,
    /// Modules named by `load` statements, in order of appearance.
    pub loads: Vec<Binding>,
    /// Module-level variables, addressed by `GLOBAL`/`SETGLOBAL`.
    pub globals: Vec<Binding>,
    pub toplevel: Funcode,
    /// Whether functions may call themselves.
    pub recursion: bool,
}

impl Program {
    pub fn funcode(&self, id: CodeId) -> Option<&Funcode> {
        match id {
            CodeId::Toplevel => Some(&self.toplevel),
            CodeId::Nested(i) => self.functions.get(i as usize),
        }
    }

    /// Serialize for a bytecode cache. The output is prefixed with a magic
    /// tag and `BYTECODE_VERSION`.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let body = postcard::to_allocvec(self).map_err(CodecError::Malformed)?;
        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Deserialize a program produced by [`Program::encode`]. Programs
    /// written by any other bytecode version are rejected.
    pub fn decode(data: &[u8]) -> Result<Program, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::Truncated(data.len()));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(CodecError::BadMagic);
        }
        let mut version = [0u8; 4];
        version.copy_from_slice(&data[MAGIC.len()..HEADER_LEN]);
        let found = u32::from_le_bytes(version);
        if found != BYTECODE_VERSION {
            return Err(CodecError::VersionMismatch {
                found,
                expected: BYTECODE_VERSION,
            });
        }
        postcard::from_bytes(&data[HEADER_LEN..]).map_err(CodecError::Malformed)
    }

    /// Cache key for a program compiled from a source with the given content
    /// digest. The bytecode version is part of the key.
    pub fn cache_key(digest: &str) -> String {
        format!("kestrel-bytecode-v{}:{}", BYTECODE_VERSION, digest)
    }
}

/// A single compiled function.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Funcode {
    pub pos: Position,
    pub name: String,
    pub doc: String,
    pub code: Vec<u8>,
    /// Delta-encoded `(pc, line, col)` rows; see `bytecode::encode`.
    pub pclinetab: Vec<u16>,
    /// Parameters first, then other locals.
    pub locals: Vec<Binding>,
    /// Indices of locals that must be boxed in cells at frame entry.
    pub cells: Vec<u32>,
    pub free_vars: Vec<Binding>,
    pub max_stack: u32,
    /// Number of local slots taken by parameters, including `*args`/`**kwargs`.
    pub num_params: u32,
    pub num_kwonly_params: u32,
    pub has_varargs: bool,
    pub has_kwargs: bool,

    #[serde(skip)]
    rows: OnceCell<Vec<PcLineCol>>,
}

impl Funcode {
    pub(crate) fn new(name: String, pos: Position) -> Self {
        Funcode {
            pos,
            name,
            doc: String::new(),
            code: Vec::new(),
            pclinetab: Vec::new(),
            locals: Vec::new(),
            cells: Vec::new(),
            free_vars: Vec::new(),
            max_stack: 0,
            num_params: 0,
            num_kwonly_params: 0,
            has_varargs: false,
            has_kwargs: false,
            rows: OnceCell::new(),
        }
    }

    /// Source position of the instruction at `pc`: the last recorded row at
    /// or before it, or the function's own position if there is none.
    pub fn position(&self, pc: u32) -> Position {
        let rows = self
            .rows
            .get_or_init(|| decode_pclinetab(&self.pclinetab, self.pos));

        // first row with pc > target
        let i = rows.partition_point(|row| row.pc <= pc);
        if i == 0 {
            return self.pos;
        }
        let row = &rows[i - 1];
        Position::new(row.line, row.col)
    }
}
