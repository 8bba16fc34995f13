use std::collections::BTreeSet;
use std::fmt::Write;

use crate::bytecode::encode::decode_uint32;
use crate::bytecode::error::CodecError;
use crate::bytecode::ir::{Constant, Funcode, Program};
use crate::bytecode::op::Opcode;

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub pc: u32,
    pub op: Opcode,
    pub arg: Option<u32>,
}

/// Decode a code stream into instructions. Padding bytes after jump
/// operands decode as `NOP`s, exactly as the VM executes them.
pub fn instructions(code: &[u8]) -> Result<Vec<Instruction>, CodecError> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let start = pc;
        let op = Opcode::from_byte(code[pc]).ok_or(CodecError::BadInstruction { pc })?;
        pc += 1;
        let arg = if op.has_arg() {
            Some(decode_uint32(code, &mut pc).ok_or(CodecError::BadInstruction { pc: start })?)
        } else {
            None
        };
        out.push(Instruction {
            pc: start as u32,
            op,
            arg,
        });
    }
    Ok(out)
}

// =============================================================================
// Listing
// =============================================================================

/// Render a function as a textual listing: one instruction per line with
/// its address, operand and a comment resolving names, constants and
/// jump targets. Jump targets are marked with `►`.
pub fn disassemble(prog: &Program, f: &Funcode) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "function {} @ {}:{}", f.name, prog.filename, f.pos);
    let _ = writeln!(
        out,
        "  params={} kwonly={} varargs={} kwargs={} max_stack={}",
        f.num_params, f.num_kwonly_params, f.has_varargs, f.has_kwargs, f.max_stack
    );
    if !f.locals.is_empty() {
        let names: Vec<&str> = f.locals.iter().map(|b| b.name.as_str()).collect();
        let _ = writeln!(out, "  locals: {}", names.join(", "));
    }
    if !f.cells.is_empty() {
        let _ = writeln!(out, "  cells: {:?}", f.cells);
    }
    if !f.free_vars.is_empty() {
        let names: Vec<&str> = f.free_vars.iter().map(|b| b.name.as_str()).collect();
        let _ = writeln!(out, "  free: {}", names.join(", "));
    }

    let insns = match instructions(&f.code) {
        Ok(insns) => insns,
        Err(e) => {
            let _ = writeln!(out, "  <{}>", e);
            return out;
        }
    };

    let targets = collect_jump_targets(&insns);
    for insn in &insns {
        // padding
        if insn.op == Opcode::Nop {
            continue;
        }
        let marker = if targets.contains(&insn.pc) { "►" } else { " " };
        let _ = write!(out, "  {:04} {} {:<14}", insn.pc, marker, insn.op.name());
        if let Some(arg) = insn.arg {
            let _ = write!(out, " {:<6}", arg);
            let comment = annotate(prog, f, insn.op, arg);
            if !comment.is_empty() {
                let _ = write!(out, " ; {}", comment);
            }
        }
        out.push('\n');
    }
    out
}

fn collect_jump_targets(insns: &[Instruction]) -> BTreeSet<u32> {
    insns
        .iter()
        .filter(|i| matches!(i.op, Opcode::Jmp | Opcode::Cjmp | Opcode::IterJmp))
        .filter_map(|i| i.arg)
        .collect()
}

fn annotate(prog: &Program, f: &Funcode, op: Opcode, arg: u32) -> String {
    let i = arg as usize;
    match op {
        Opcode::Constant => match prog.constants.get(i) {
            Some(c) => format_constant(c),
            None => "<bad constant>".to_string(),
        },
        Opcode::Attr | Opcode::SetField | Opcode::Predeclared | Opcode::Universal => {
            prog.names.get(i).cloned().unwrap_or_default()
        }
        Opcode::Local | Opcode::SetLocal | Opcode::LocalCell | Opcode::SetLocalCell => {
            f.locals.get(i).map(|b| b.name.clone()).unwrap_or_default()
        }
        Opcode::Free | Opcode::FreeCell => {
            f.free_vars.get(i).map(|b| b.name.clone()).unwrap_or_default()
        }
        Opcode::Global | Opcode::SetGlobal => {
            prog.globals.get(i).map(|b| b.name.clone()).unwrap_or_default()
        }
        Opcode::MakeFunc => prog
            .functions
            .get(i)
            .map(|g| format!("func {}", g.name))
            .unwrap_or_default(),
        Opcode::Jmp | Opcode::Cjmp | Opcode::IterJmp => format!("-> {:04}", arg),
        Opcode::Call | Opcode::CallVar | Opcode::CallKw | Opcode::CallVarKw => {
            format!("{} positional, {} named", arg >> 8, arg & 0xff)
        }
        _ => String::new(),
    }
}

fn format_constant(c: &Constant) -> String {
    match c {
        Constant::Int(n) => n.to_string(),
        Constant::Float(x) => format!("{:?}", x),
        Constant::String(s) => format!("{:?}", s),
        Constant::Bytes(b) => format!("b{:?}", String::from_utf8_lossy(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::compile::{CompilerConfig, compile_file};
    use crate::lang::node::{Binding, Expr, Ident, Position, Scope, Stmt};

    fn loop_program() -> Program {
        // for x in xs: total = x
        let body = vec![Stmt::For {
            vars: Expr::ident(Ident::global("x", 0)),
            iterable: Expr::ident(Ident::global("xs", 1)),
            body: vec![Stmt::Assign {
                lhs: Expr::ident(Ident::global("total", 2)),
                rhs: Expr::ident(Ident::global("x", 0)),
                op_pos: Position::default(),
            }],
            for_pos: Position::new(1, 1),
        }];
        let globals: Vec<Binding> = ["x", "xs", "total"]
            .iter()
            .enumerate()
            .map(|(i, n)| Binding::new(*n, Scope::Global, i as u32))
            .collect();
        compile_file("loop.star", &body, &[], &globals, &CompilerConfig::default())
    }

    #[test]
    fn test_instructions_decode_padding_as_nops() {
        let code = vec![
            Opcode::True as u8,
            Opcode::Cjmp as u8,
            9,
            0,
            0,
            0,
            Opcode::None as u8,
            Opcode::Return as u8,
        ];
        let insns = instructions(&code).unwrap();
        assert_eq!(insns.len(), 7);
        assert_eq!(insns[1].arg, Some(9));
        assert_eq!(insns[2].op, Opcode::Nop);
        assert_eq!(insns[5].pc, 6);
    }

    #[test]
    fn test_instructions_rejects_bad_opcode() {
        assert!(matches!(
            instructions(&[0xff]),
            Err(CodecError::BadInstruction { pc: 0 })
        ));
        assert!(matches!(
            instructions(&[Opcode::Constant as u8, 0x80]),
            Err(CodecError::BadInstruction { pc: 0 })
        ));
    }

    #[test]
    fn test_disassembly_annotates_operands() {
        let prog = loop_program();
        let text = disassemble(&prog, &prog.toplevel);
        assert!(text.contains("function <toplevel> @ loop.star:1:1"));
        assert!(text.contains("ITERPUSH"));
        assert!(text.contains("ITERJMP"));
        assert!(text.contains("; xs"));
        assert!(text.contains("; total"));
        assert!(text.contains("►"));
        assert!(!text.contains("NOP"));
    }
}
