use serde::{Deserialize, Serialize};

use crate::bytecode::block::{BlockGraph, Layout};
use crate::bytecode::op::{OPCODE_ARG_MIN, Opcode};
use crate::lang::node::Position;

// =============================================================================
// Operands
// =============================================================================

/// Append `x` as unsigned LEB128, then pad with `NOP` bytes until at least
/// `min` bytes were written. Padded operands can be patched in place.
pub(crate) fn add_uint32(code: &mut Vec<u8>, mut x: u32, min: usize) {
    let end = code.len() + min;
    while x >= 0x80 {
        code.push((x as u8) | 0x80);
        x >>= 7;
    }
    code.push(x as u8);
    while code.len() < end {
        code.push(Opcode::Nop as u8);
    }
}

/// Encoded length of `x` without padding.
pub(crate) fn arg_len(mut x: u32) -> u32 {
    let mut n = 1;
    while x >= 0x80 {
        n += 1;
        x >>= 7;
    }
    n
}

/// Decode an operand starting at `*pc`, advancing `pc` past it. Returns
/// `None` if the code ends in the middle of the operand.
pub(crate) fn decode_uint32(code: &[u8], pc: &mut usize) -> Option<u32> {
    let mut arg: u32 = 0;
    let mut shift = 0;
    loop {
        let b = *code.get(*pc)?;
        *pc += 1;
        arg |= u32::from(b & 0x7f) << shift;
        if b < 0x80 {
            return Some(arg);
        }
        shift += 7;
        if shift > 28 {
            return None;
        }
    }
}

// =============================================================================
// Position table
// =============================================================================

/// One decoded row of a position table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcLineCol {
    pub pc: u32,
    pub line: u32,
    pub col: u32,
}

fn clip(x: i64, min: i64, max: i64) -> (i64, bool) {
    if x < min {
        (min, false)
    } else if x > max {
        (max, false)
    } else {
        (x, true)
    }
}

/// Incremental writer for the position table.
///
/// Each row is stored as one or more 16-bit entries of the form
/// `Δpc:u4 | Δline:i5 | Δcol:i6 | incomplete:u1`, relative to the previous
/// row. A delta that does not fit is clipped and the entry marked
/// incomplete; further entries carry the remainder.
struct PcLineTabWriter {
    prev_pc: u32,
    prev_line: i64,
    prev_col: i64,
    tab: Vec<u16>,
}

impl PcLineTabWriter {
    fn new(start: Position) -> Self {
        PcLineTabWriter {
            prev_pc: 0,
            prev_line: i64::from(start.line),
            prev_col: i64::from(start.col),
            tab: Vec::new(),
        }
    }

    fn add(&mut self, pc: u32, line: u32, col: u32) {
        loop {
            let mut incomplete: u16 = 0;

            let mut deltapc = pc - self.prev_pc;
            if deltapc > 0x0f {
                deltapc = 0x0f;
                incomplete = 1;
            }
            self.prev_pc += deltapc;

            let (deltaline, ok) = clip(i64::from(line) - self.prev_line, -0x10, 0x0f);
            if !ok {
                incomplete = 1;
            }
            self.prev_line += deltaline;

            let (deltacol, ok) = clip(i64::from(col) - self.prev_col, -0x20, 0x1f);
            if !ok {
                incomplete = 1;
            }
            self.prev_col += deltacol;

            let entry = ((deltapc as u16) << 12)
                | ((deltaline as u16) & 0x1f) << 7
                | ((deltacol as u16) & 0x3f) << 1
                | incomplete;
            self.tab.push(entry);
            if incomplete == 0 {
                break;
            }
        }
    }
}

/// Rebuild the rows of a position table. `start` is the position of the
/// function it belongs to.
pub fn decode_pclinetab(tab: &[u16], start: Position) -> Vec<PcLineCol> {
    let rows = tab.iter().filter(|&&x| x & 1 == 0).count();
    let mut out = Vec::with_capacity(rows);

    let mut pc: u32 = 0;
    let mut line = i64::from(start.line);
    let mut col = i64::from(start.col);
    for &x in tab {
        pc += u32::from(x >> 12);
        line += i64::from(((x as i16) << 4) >> 11);
        col += i64::from(((x as i16) << 9) >> 10);
        if x & 1 == 0 {
            out.push(PcLineCol {
                pc,
                line: line.max(0) as u32,
                col: col.max(0) as u32,
            });
        }
    }
    out
}

// =============================================================================
// Code generation
// =============================================================================

/// Serialize linearized blocks into a code stream and position table.
///
/// Panics if the emitted length differs from the length the linearizer
/// computed.
pub(crate) fn generate(graph: &BlockGraph, layout: &Layout, start: Position) -> (Vec<u8>, Vec<u16>) {
    let mut code = Vec::with_capacity(layout.code_len as usize);
    let mut pclinetab = PcLineTabWriter::new(start);

    for &id in &layout.order {
        let b = graph.block(id);
        for insn in &b.insns {
            if insn.line != 0 {
                pclinetab.add(code.len() as u32, insn.line, insn.col);
            }

            code.push(insn.op as u8);
            if insn.op >= OPCODE_ARG_MIN {
                let min = if insn.op.is_cond_jump() { 4 } else { 0 };
                add_uint32(&mut code, insn.arg, min);
            }
        }

        if let Some(jmp) = b.jmp {
            let target = graph.block(jmp);
            if target.index != b.index.map(|i| i + 1) {
                code.push(Opcode::Jmp as u8);
                add_uint32(&mut code, target.addr, 4);
            }
        }
    }

    if code.len() != layout.code_len as usize {
        panic!(
            "internal compiler error: wrong code length ({} bytes, expected {})",
            code.len(),
            layout.code_len
        );
    }

    (code, pclinetab.tab)
}
