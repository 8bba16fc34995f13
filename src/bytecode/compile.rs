use std::borrow::Cow;

use indexmap::IndexSet;
use tracing::debug;

use crate::bytecode::block::{BlockGraph, BlockId, Insn, linearize};
use crate::bytecode::disasm::disassemble;
use crate::bytecode::encode::generate;
use crate::bytecode::ir::{self, Constant, Funcode, Program};
use crate::bytecode::op::{OPCODE_ARG_MIN, Opcode};
use crate::lang::node::{
    Arg, BinOp, Binding, Clause, Comprehension, ComprehensionBody, Expr, Function, Ident, Literal,
    Param, Position, Scope, Stmt, UnaryOp,
};

// =============================================================================
// Configuration
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct CompilerConfig {
    /// Allow functions to call themselves, directly or indirectly.
    pub recursion: bool,
    /// Log the disassembly of every compiled function at debug level.
    pub disassemble: bool,
}

// =============================================================================
// Entry points
// =============================================================================

/// Compile a resolved file.
///
/// `locals` are the toplevel's locals (comprehension variables at file
/// scope); `globals` are the module-level variables, in slot order.
pub fn compile_file(
    filename: &str,
    body: &[Stmt],
    locals: &[Binding],
    globals: &[Binding],
    config: &CompilerConfig,
) -> Program {
    let mut pcomp = Pcomp::default();
    let toplevel = pcomp.function("<toplevel>", Position::new(1, 1), body, locals, &[]);
    let program = pcomp.finish(filename, toplevel, globals, config);

    debug!(
        file = filename,
        functions = program.functions.len(),
        constants = program.constants.len(),
        names = program.names.len(),
        "compiled program"
    );
    if config.disassemble {
        debug!("{}", disassemble(&program, &program.toplevel));
        for f in &program.functions {
            debug!("{}", disassemble(&program, f));
        }
    }
    program
}

/// Compile a single expression as a program whose toplevel returns its value.
pub fn compile_expr(filename: &str, expr: &Expr, locals: &[Binding], config: &CompilerConfig) -> Program {
    let body = vec![Stmt::Return {
        result: Some(expr.clone()),
    }];
    compile_file(filename, &body, locals, &[], config)
}

// =============================================================================
// Program compiler: owns the shared pools
// =============================================================================

/// Constant pool key. Floats compare by bit pattern so that `0.0` and
/// `-0.0` (and NaNs) stay distinct and the key is hashable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Int(i64),
    Float(u64),
    String(String),
    Bytes(Vec<u8>),
}

impl From<ConstKey> for Constant {
    fn from(key: ConstKey) -> Constant {
        match key {
            ConstKey::Int(n) => Constant::Int(n),
            ConstKey::Float(bits) => Constant::Float(f64::from_bits(bits)),
            ConstKey::String(s) => Constant::String(s),
            ConstKey::Bytes(b) => Constant::Bytes(b),
        }
    }
}

#[derive(Default)]
struct Pcomp {
    names: IndexSet<String>,
    constants: IndexSet<ConstKey>,
    functions: Vec<Funcode>,
    loads: Vec<ir::Binding>,
}

impl Pcomp {
    fn name_index(&mut self, name: &str) -> u32 {
        if let Some(i) = self.names.get_index_of(name) {
            return i as u32;
        }
        self.names.insert_full(name.to_string()).0 as u32
    }

    fn constant_index(&mut self, key: ConstKey) -> u32 {
        self.constants.insert_full(key).0 as u32
    }

    fn function_index(&mut self, f: Funcode) -> u32 {
        self.functions.push(f);
        (self.functions.len() - 1) as u32
    }

    fn function(
        &mut self,
        name: &str,
        pos: Position,
        body: &[Stmt],
        locals: &[Binding],
        free_vars: &[Binding],
    ) -> Funcode {
        let mut funcode = Funcode::new(name.to_string(), pos);
        funcode.doc = doc_string(body);
        funcode.locals = bindings(locals);
        funcode.free_vars = bindings(free_vars);
        funcode.cells = locals
            .iter()
            .enumerate()
            .filter(|(_, b)| b.scope == Scope::Cell)
            .map(|(i, _)| i as u32)
            .collect();

        let mut fcomp = Fcomp {
            pcomp: self,
            graph: BlockGraph::new(),
            block: None,
            loops: Vec::new(),
            pos,
        };

        let entry = fcomp.graph.new_block();
        fcomp.block = Some(entry);
        fcomp.stmts(body);
        if fcomp.block.is_some() {
            fcomp.emit(Opcode::None);
            fcomp.emit(Opcode::Return);
        }

        let mut graph = fcomp.graph;
        let layout = linearize(&mut graph, entry);
        let (code, pclinetab) = generate(&graph, &layout, pos);
        funcode.code = code;
        funcode.pclinetab = pclinetab;
        funcode.max_stack = layout.max_stack;

        debug!(
            function = %funcode.name,
            code_len = funcode.code.len(),
            max_stack = funcode.max_stack,
            "compiled function"
        );
        funcode
    }

    fn finish(
        self,
        filename: &str,
        toplevel: Funcode,
        globals: &[Binding],
        config: &CompilerConfig,
    ) -> Program {
        Program {
            filename: filename.to_string(),
            names: self.names.into_iter().collect(),
            constants: self.constants.into_iter().map(Constant::from).collect(),
            functions: self.functions,
            loads: self.loads,
            globals: bindings(globals),
            toplevel,
            recursion: config.recursion,
        }
    }
}

fn bindings(bindings: &[Binding]) -> Vec<ir::Binding> {
    bindings
        .iter()
        .map(|b| ir::Binding {
            name: b.name.clone(),
            pos: b.pos,
        })
        .collect()
}

fn doc_string(body: &[Stmt]) -> String {
    match body.first() {
        Some(Stmt::Expr(Expr::Literal {
            value: Literal::String(s),
            ..
        })) => s.clone(),
        _ => String::new(),
    }
}

fn unparen(mut e: &Expr) -> &Expr {
    while let Expr::Paren(x) = e {
        e = x;
    }
    e
}

// =============================================================================
// Function compiler: lowers one body into a block graph
// =============================================================================

struct Loop {
    break_to: BlockId,
    continue_to: BlockId,
}

struct Fcomp<'a> {
    pcomp: &'a mut Pcomp,
    graph: BlockGraph,
    /// Block receiving code; `None` right after an unconditional jump.
    block: Option<BlockId>,
    loops: Vec<Loop>,
    /// Position attached to the next emitted instruction.
    pos: Position,
}

/// One operand of a flattened `+` chain.
struct Summand<'e> {
    x: Cow<'e, Expr>,
    plus_pos: Position,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Addable {
    String,
    Bytes,
    List,
    Tuple,
}

impl Fcomp<'_> {
    fn new_block(&mut self) -> BlockId {
        self.graph.new_block()
    }

    fn current(&self) -> BlockId {
        match self.block {
            Some(b) => b,
            None => panic!("internal compiler error: code emitted after unconditional jump"),
        }
    }

    fn set_pos(&mut self, pos: Position) {
        self.pos = pos;
    }

    fn push_insn(&mut self, op: Opcode, arg: u32) {
        let b = self.current();
        let insn = Insn {
            op,
            arg,
            line: self.pos.line,
            col: self.pos.col,
        };
        self.graph.block_mut(b).insns.push(insn);
        self.pos = Position::default();
    }

    fn emit(&mut self, op: Opcode) {
        if op >= OPCODE_ARG_MIN {
            panic!("internal compiler error: missing operand for {}", op);
        }
        self.push_insn(op, 0);
    }

    fn emit1(&mut self, op: Opcode, arg: u32) {
        if op < OPCODE_ARG_MIN {
            panic!("internal compiler error: unwanted operand for {}", op);
        }
        self.push_insn(op, arg);
    }

    /// End the current block with an unconditional jump to `b`.
    fn jump(&mut self, b: BlockId) {
        let cur = self.current();
        if cur == b {
            panic!("internal compiler error: self-jump");
        }
        self.graph.block_mut(cur).jmp = Some(b);
        self.block = None;
    }

    /// End the current block with a conditional jump: to `t` if the
    /// condition holds (for `ITERJMP`, if the iterator is exhausted),
    /// otherwise to `f`. The operand is patched during linearization.
    fn condjump(&mut self, op: Opcode, t: BlockId, f: BlockId) {
        if !op.is_cond_jump() {
            panic!("internal compiler error: not a conditional jump: {}", op);
        }
        self.emit1(op, 0);
        let cur = self.current();
        self.graph.block_mut(cur).cjmp = Some(t);
        self.jump(f);
    }

    fn name_index(&mut self, name: &str) -> u32 {
        self.pcomp.name_index(name)
    }

    fn string(&mut self, s: &str) {
        let i = self.pcomp.constant_index(ConstKey::String(s.to_string()));
        self.emit1(Opcode::Constant, i);
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn stmts(&mut self, stmts: &[Stmt]) {
        for stmt in stmts {
            self.stmt(stmt);
        }
    }

    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(x) => {
                // doc strings and other bare literals
                if matches!(x, Expr::Literal { .. }) {
                    return;
                }
                self.expr(x);
                self.emit(Opcode::Pop);
            }

            Stmt::Pass => {}

            Stmt::Break => {
                let b = self.innermost_loop().break_to;
                self.jump(b);
                self.block = Some(self.new_block());
            }

            Stmt::Continue => {
                let b = self.innermost_loop().continue_to;
                self.jump(b);
                self.block = Some(self.new_block());
            }

            Stmt::If {
                cond,
                then_body,
                else_body,
            } => {
                let t = self.new_block();
                let f = self.new_block();
                let done = self.new_block();

                self.ifelse(cond, t, f);

                self.block = Some(t);
                self.stmts(then_body);
                self.jump(done);

                self.block = Some(f);
                self.stmts(else_body);
                self.jump(done);

                self.block = Some(done);
            }

            Stmt::Assign { lhs, rhs, op_pos } => {
                self.expr(rhs);
                self.assign(*op_pos, lhs);
            }

            Stmt::AugAssign {
                op,
                lhs,
                rhs,
                op_pos,
            } => self.aug_assign(*op, lhs, rhs, *op_pos),

            Stmt::Def { name, function } => {
                self.function(function);
                self.set(name);
            }

            Stmt::For {
                vars,
                iterable,
                body,
                for_pos,
            } => {
                let head = self.new_block();
                let body_block = self.new_block();
                let tail = self.new_block();

                self.expr(iterable);
                self.set_pos(*for_pos);
                self.emit(Opcode::IterPush);
                self.jump(head);

                self.block = Some(head);
                self.condjump(Opcode::IterJmp, tail, body_block);

                self.block = Some(body_block);
                self.assign(*for_pos, vars);
                self.loops.push(Loop {
                    break_to: tail,
                    continue_to: head,
                });
                self.stmts(body);
                self.loops.pop();
                self.jump(head);

                self.block = Some(tail);
                self.emit(Opcode::IterPop);
            }

            Stmt::While { cond, body } => {
                let head = self.new_block();
                let body_block = self.new_block();
                let done = self.new_block();

                self.jump(head);
                self.block = Some(head);
                self.ifelse(cond, body_block, done);

                self.block = Some(body_block);
                self.loops.push(Loop {
                    break_to: done,
                    continue_to: head,
                });
                self.stmts(body);
                self.loops.pop();
                self.jump(head);

                self.block = Some(done);
            }

            Stmt::Return { result } => {
                match result {
                    Some(x) => self.expr(x),
                    None => self.emit(Opcode::None),
                }
                self.emit(Opcode::Return);
                self.block = Some(self.new_block());
            }

            Stmt::Load {
                load_pos,
                module,
                module_pos,
                from,
                to,
            } => {
                if from.len() != to.len() {
                    panic!("internal compiler error: load binds {} names from {}", to.len(), from.len());
                }
                for name in from {
                    self.string(name);
                }
                self.pcomp.loads.push(ir::Binding {
                    name: module.clone(),
                    pos: *module_pos,
                });
                self.string(module);
                self.set_pos(*load_pos);
                self.emit1(Opcode::Load, from.len() as u32);
                for id in to.iter().rev() {
                    self.set(id);
                }
            }
        }
    }

    fn innermost_loop(&self) -> &Loop {
        match self.loops.last() {
            Some(l) => l,
            None => panic!("internal compiler error: break or continue outside a loop"),
        }
    }

    fn aug_assign(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr, op_pos: Position) {
        // Evaluate the target's address once; `store` writes back.
        enum Store<'e> {
            Ident(&'e Ident),
            Index(Position),
            Field(Position, u32),
        }

        let store = match unparen(lhs) {
            Expr::Ident(id) => {
                self.lookup(id);
                Store::Ident(id)
            }
            Expr::Index { x, index, lbrack } => {
                self.expr(x);
                self.expr(index);
                self.emit(Opcode::Dup2);
                self.set_pos(*lbrack);
                self.emit(Opcode::Index);
                Store::Index(*lbrack)
            }
            Expr::Dot { x, name, dot } => {
                self.expr(x);
                self.emit(Opcode::Dup);
                let name = self.name_index(name);
                self.set_pos(*dot);
                self.emit1(Opcode::Attr, name);
                Store::Field(*dot, name)
            }
            other => panic!("internal compiler error: bad augmented assignment target {:?}", other),
        };

        self.expr(rhs);

        // x += y and x |= y update a mutable x in place.
        match op {
            BinOp::Plus => {
                self.set_pos(op_pos);
                self.emit(Opcode::InplaceAdd);
            }
            BinOp::Pipe => {
                self.set_pos(op_pos);
                self.emit(Opcode::InplacePipe);
            }
            _ => self.binop(op_pos, op),
        }

        match store {
            Store::Ident(id) => self.set(id),
            Store::Index(lbrack) => {
                self.set_pos(lbrack);
                self.emit(Opcode::SetIndex);
            }
            Store::Field(dot, name) => {
                self.set_pos(dot);
                self.emit1(Opcode::SetField, name);
            }
        }
    }

    /// Store the value on top of the stack into `lhs`.
    fn assign(&mut self, pos: Position, lhs: &Expr) {
        match lhs {
            Expr::Paren(x) => self.assign(pos, x),

            Expr::Ident(id) => self.set(id),

            Expr::Tuple(elems) | Expr::List(elems) => {
                self.set_pos(pos);
                self.emit1(Opcode::Unpack, elems.len() as u32);
                for elem in elems {
                    self.assign(pos, elem);
                }
            }

            Expr::Index { x, index, lbrack } => {
                self.expr(x);
                self.emit(Opcode::Exch);
                self.expr(index);
                self.emit(Opcode::Exch);
                self.set_pos(*lbrack);
                self.emit(Opcode::SetIndex);
            }

            Expr::Dot { x, name, dot } => {
                self.expr(x);
                self.emit(Opcode::Exch);
                let name = self.name_index(name);
                self.set_pos(*dot);
                self.emit1(Opcode::SetField, name);
            }

            other => panic!("internal compiler error: bad assignment target {:?}", other),
        }
    }

    fn set(&mut self, id: &Ident) {
        match id.scope {
            Scope::Local => self.emit1(Opcode::SetLocal, id.index),
            Scope::Cell => self.emit1(Opcode::SetLocalCell, id.index),
            Scope::Global => self.emit1(Opcode::SetGlobal, id.index),
            scope => panic!(
                "internal compiler error: {}: cannot assign to {} ({:?})",
                id.pos, id.name, scope
            ),
        }
    }

    fn lookup(&mut self, id: &Ident) {
        // universal lookups cannot fail
        if id.scope != Scope::Universal {
            self.set_pos(id.pos);
        }
        match id.scope {
            Scope::Local => self.emit1(Opcode::Local, id.index),
            Scope::Free => self.emit1(Opcode::FreeCell, id.index),
            Scope::Cell => self.emit1(Opcode::LocalCell, id.index),
            Scope::Global => self.emit1(Opcode::Global, id.index),
            Scope::Predeclared => {
                let name = self.name_index(&id.name);
                self.emit1(Opcode::Predeclared, name);
            }
            Scope::Universal => {
                let name = self.name_index(&id.name);
                self.emit1(Opcode::Universal, name);
            }
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    fn expr(&mut self, e: &Expr) {
        match e {
            Expr::Paren(x) => self.expr(x),

            Expr::Ident(id) => self.lookup(id),

            Expr::Literal { value, .. } => {
                let key = match value {
                    Literal::Int(n) => ConstKey::Int(*n),
                    Literal::Float(x) => ConstKey::Float(x.to_bits()),
                    Literal::String(s) => ConstKey::String(s.clone()),
                    Literal::Bytes(b) => ConstKey::Bytes(b.clone()),
                };
                let i = self.pcomp.constant_index(key);
                self.emit1(Opcode::Constant, i);
            }

            Expr::List(elems) => {
                for x in elems {
                    self.expr(x);
                }
                self.emit1(Opcode::MakeList, elems.len() as u32);
            }

            Expr::Tuple(elems) => {
                for x in elems {
                    self.expr(x);
                }
                self.emit1(Opcode::MakeTuple, elems.len() as u32);
            }

            Expr::Dict(entries) => {
                self.emit(Opcode::MakeDict);
                for entry in entries {
                    self.emit(Opcode::Dup);
                    self.expr(&entry.key);
                    self.expr(&entry.value);
                    self.set_pos(entry.colon);
                    self.emit(Opcode::SetDictUniq);
                }
            }

            Expr::Cond {
                cond,
                then_expr,
                else_expr,
            } => {
                let t = self.new_block();
                let f = self.new_block();
                let done = self.new_block();

                self.ifelse(cond, t, f);

                self.block = Some(t);
                self.expr(then_expr);
                self.jump(done);

                self.block = Some(f);
                self.expr(else_expr);
                self.jump(done);

                self.block = Some(done);
            }

            Expr::Index { x, index, lbrack } => {
                self.expr(x);
                self.expr(index);
                self.set_pos(*lbrack);
                self.emit(Opcode::Index);
            }

            Expr::Slice {
                x,
                lo,
                hi,
                step,
                lbrack,
            } => {
                self.set_pos(*lbrack);
                self.expr(x);
                for part in [lo, hi, step] {
                    match part {
                        Some(p) => self.expr(p),
                        None => self.emit(Opcode::None),
                    }
                }
                self.set_pos(*lbrack);
                self.emit(Opcode::Slice);
            }

            Expr::Comprehension(comp) => {
                match comp.body {
                    ComprehensionBody::Entry(_) => self.emit(Opcode::MakeDict),
                    ComprehensionBody::Elem(_) => self.emit1(Opcode::MakeList, 0),
                }
                self.comprehension(comp, 0);
            }

            Expr::Unary { op, x, pos } => {
                self.expr(x);
                self.set_pos(*pos);
                match op {
                    UnaryOp::Minus => self.emit(Opcode::UMinus),
                    UnaryOp::Plus => self.emit(Opcode::UPlus),
                    UnaryOp::Not => self.emit(Opcode::Not),
                    UnaryOp::Tilde => self.emit(Opcode::Tilde),
                }
            }

            Expr::Binary { op, x, y, pos } => match op {
                // x or y  =>  if x then x else y
                BinOp::Or => {
                    let done = self.new_block();
                    let yb = self.new_block();

                    self.expr(x);
                    self.emit(Opcode::Dup);
                    self.condjump(Opcode::Cjmp, done, yb);

                    self.block = Some(yb);
                    self.emit(Opcode::Pop);
                    self.expr(y);
                    self.jump(done);

                    self.block = Some(done);
                }

                // x and y  =>  if x then y else x
                BinOp::And => {
                    let done = self.new_block();
                    let yb = self.new_block();

                    self.expr(x);
                    self.emit(Opcode::Dup);
                    self.condjump(Opcode::Cjmp, yb, done);

                    self.block = Some(yb);
                    self.emit(Opcode::Pop);
                    self.expr(y);
                    self.jump(done);

                    self.block = Some(done);
                }

                BinOp::Plus => self.plus(e),

                _ => {
                    self.expr(x);
                    self.expr(y);
                    self.binop(*pos, *op);
                }
            },

            Expr::Dot { x, name, dot } => {
                self.expr(x);
                let name = self.name_index(name);
                self.set_pos(*dot);
                self.emit1(Opcode::Attr, name);
            }

            Expr::Call { func, args, lparen } => {
                self.expr(func);
                let (op, arg) = self.args(args);
                self.set_pos(*lparen);
                self.emit1(op, arg);
            }

            Expr::Lambda(f) => self.function(f),
        }
    }

    fn binop(&mut self, pos: Position, op: BinOp) {
        self.set_pos(pos);
        let code = match op {
            BinOp::Plus => Opcode::Plus,
            BinOp::Minus => Opcode::Minus,
            BinOp::Star => Opcode::Star,
            BinOp::Slash => Opcode::Slash,
            BinOp::SlashSlash => Opcode::SlashSlash,
            BinOp::Percent => Opcode::Percent,
            BinOp::Amp => Opcode::Amp,
            BinOp::Pipe => Opcode::Pipe,
            BinOp::Circumflex => Opcode::Circumflex,
            BinOp::LtLt => Opcode::LtLt,
            BinOp::GtGt => Opcode::GtGt,
            BinOp::Eq => Opcode::Eql,
            BinOp::Ne => Opcode::Neq,
            BinOp::Lt => Opcode::Lt,
            BinOp::Gt => Opcode::Gt,
            BinOp::Le => Opcode::Le,
            BinOp::Ge => Opcode::Ge,
            BinOp::In => Opcode::In,
            BinOp::NotIn => {
                self.emit(Opcode::In);
                self.emit(Opcode::Not);
                return;
            }
            BinOp::And | BinOp::Or => {
                panic!("internal compiler error: {:?} is not a strict operator", op)
            }
        };
        self.emit(code);
    }

    /// Compile an n-ary sum, folding runs of adjacent literals of the same
    /// addable kind into one literal.
    fn plus(&mut self, e: &Expr) {
        // (((a+b)+c)+d) becomes [a, +b, +c, +d]
        let mut args: Vec<Summand> = Vec::with_capacity(2);
        let mut cur = e;
        loop {
            match cur {
                Expr::Binary {
                    op: BinOp::Plus,
                    x,
                    y,
                    pos,
                } => {
                    args.push(Summand {
                        x: Cow::Borrowed(unparen(y)),
                        plus_pos: *pos,
                    });
                    cur = unparen(x);
                }
                left => {
                    args.push(Summand {
                        x: Cow::Borrowed(left),
                        plus_pos: Position::default(),
                    });
                    break;
                }
            }
        }
        args.reverse();

        let mut folded: Vec<Summand> = Vec::with_capacity(args.len());
        let mut i = 0;
        while i < args.len() {
            let mut j = i + 1;
            if let Some(kind) = addable(&args[i].x) {
                while j < args.len() && addable(&args[j].x) == Some(kind) {
                    j += 1;
                }
                if j > i + 1 {
                    folded.push(Summand {
                        x: Cow::Owned(add(kind, &args[i..j])),
                        plus_pos: args[i].plus_pos,
                    });
                    i = j;
                    continue;
                }
            }
            folded.push(Summand {
                x: args[i].x.clone(),
                plus_pos: args[i].plus_pos,
            });
            i = j;
        }

        self.expr(&folded[0].x);
        for summand in &folded[1..] {
            self.expr(&summand.x);
            self.set_pos(summand.plus_pos);
            self.emit(Opcode::Plus);
        }
    }

    /// Push the arguments of a call; returns the call opcode and operand.
    fn args(&mut self, args: &[Arg]) -> (Opcode, u32) {
        let mut positional = 0u32;
        let mut named = 0u32;
        let mut varargs = None;
        let mut kwargs = None;
        for arg in args {
            match arg {
                Arg::Positional(x) => {
                    self.expr(x);
                    positional += 1;
                }
                Arg::Named(name, x) => {
                    self.string(name);
                    self.expr(x);
                    named += 1;
                }
                Arg::Star(x) => varargs = Some(x),
                Arg::StarStar(x) => kwargs = Some(x),
            }
        }

        let mut op = Opcode::Call;
        if let Some(x) = varargs {
            self.expr(x);
            op = Opcode::CallVar;
        }
        if let Some(x) = kwargs {
            self.expr(x);
            op = if op == Opcode::CallVar {
                Opcode::CallVarKw
            } else {
                Opcode::CallKw
            };
        }

        if positional >= 256 || named >= 256 {
            panic!("internal compiler error: too many arguments in call");
        }
        (op, positional << 8 | named)
    }

    /// Lower clause `i` of a comprehension. The accumulator is on the stack.
    fn comprehension(&mut self, comp: &Comprehension, i: usize) {
        let Some(clause) = comp.clauses.get(i) else {
            self.emit(Opcode::Dup);
            match &comp.body {
                ComprehensionBody::Entry(entry) => {
                    self.expr(&entry.key);
                    self.expr(&entry.value);
                    self.set_pos(entry.colon);
                    self.emit(Opcode::SetDict);
                }
                ComprehensionBody::Elem(x) => {
                    self.expr(x);
                    self.emit(Opcode::Append);
                }
            }
            return;
        };

        match clause {
            Clause::If { cond } => {
                let t = self.new_block();
                let done = self.new_block();
                self.ifelse(cond, t, done);

                self.block = Some(t);
                self.comprehension(comp, i + 1);
                self.jump(done);

                self.block = Some(done);
            }

            Clause::For {
                vars,
                iterable,
                for_pos,
            } => {
                let head = self.new_block();
                let body = self.new_block();
                let tail = self.new_block();

                self.expr(iterable);
                self.set_pos(*for_pos);
                self.emit(Opcode::IterPush);
                self.jump(head);

                self.block = Some(head);
                self.condjump(Opcode::IterJmp, tail, body);

                self.block = Some(body);
                self.assign(*for_pos, vars);
                self.comprehension(comp, i + 1);
                self.jump(head);

                self.block = Some(tail);
                self.emit(Opcode::IterPop);
            }
        }
    }

    /// Branch to `t` if `cond` is true, else to `f`, without materializing
    /// intermediate booleans where possible.
    fn ifelse(&mut self, cond: &Expr, t: BlockId, f: BlockId) {
        match cond {
            Expr::Unary {
                op: UnaryOp::Not,
                x,
                ..
            } => {
                self.ifelse(x, f, t);
                return;
            }

            Expr::Binary {
                op: BinOp::And,
                x,
                y,
                ..
            } => {
                self.expr(x);
                let yb = self.new_block();
                self.condjump(Opcode::Cjmp, yb, f);

                self.block = Some(yb);
                self.ifelse(y, t, f);
                return;
            }

            Expr::Binary {
                op: BinOp::Or,
                x,
                y,
                ..
            } => {
                self.expr(x);
                let yb = self.new_block();
                self.condjump(Opcode::Cjmp, t, yb);

                self.block = Some(yb);
                self.ifelse(y, t, f);
                return;
            }

            Expr::Binary {
                op: BinOp::NotIn,
                x,
                y,
                pos,
            } => {
                self.expr(x);
                self.expr(y);
                self.binop(*pos, BinOp::In);
                self.condjump(Opcode::Cjmp, f, t);
                return;
            }

            _ => {}
        }

        self.expr(cond);
        self.condjump(Opcode::Cjmp, t, f);
    }

    /// Push a closure for `f`: defaults and captured cells are packed into
    /// one tuple that `MAKEFUNC` splits again.
    fn function(&mut self, f: &Function) {
        // evaluating defaults may fail
        self.set_pos(f.pos);

        // def f(p1, p2=dp2, *, k1, k2=dk2) packs (dp2, MANDATORY, dk2)
        let mut ndefaults = 0u32;
        let mut seen_star = false;
        for param in &f.params {
            match param {
                Param::Optional(_, default) => {
                    self.expr(default);
                    ndefaults += 1;
                }
                Param::Star | Param::Varargs(_) | Param::Kwargs(_) => seen_star = true,
                Param::Required(_) => {
                    if seen_star {
                        self.emit(Opcode::Mandatory);
                        ndefaults += 1;
                    }
                }
            }
        }

        // Capture the cells themselves, not their contents.
        for fv in &f.free_vars {
            match fv.scope {
                Scope::Free => self.emit1(Opcode::Free, fv.index),
                Scope::Cell => self.emit1(Opcode::Local, fv.index),
                scope => panic!(
                    "internal compiler error: free variable {} has scope {:?}",
                    fv.name, scope
                ),
            }
        }

        self.emit1(Opcode::MakeTuple, ndefaults + f.free_vars.len() as u32);

        let mut funcode = self
            .pcomp
            .function(&f.name, f.pos, &f.body, &f.locals, &f.free_vars);
        funcode.num_params = f.num_params();
        funcode.num_kwonly_params = f.num_kwonly_params;
        funcode.has_varargs = f.has_varargs;
        funcode.has_kwargs = f.has_kwargs;

        let index = self.pcomp.function_index(funcode);
        self.emit1(Opcode::MakeFunc, index);
    }
}

fn addable(e: &Expr) -> Option<Addable> {
    match e {
        Expr::Literal {
            value: Literal::String(_),
            ..
        } => Some(Addable::String),
        Expr::Literal {
            value: Literal::Bytes(_),
            ..
        } => Some(Addable::Bytes),
        Expr::List(_) => Some(Addable::List),
        Expr::Tuple(_) => Some(Addable::Tuple),
        _ => None,
    }
}

/// Sum of a run of literals that all have the given kind.
fn add(kind: Addable, args: &[Summand]) -> Expr {
    match kind {
        Addable::String => {
            let mut s = String::new();
            for arg in args {
                if let Expr::Literal {
                    value: Literal::String(part),
                    ..
                } = arg.x.as_ref()
                {
                    s.push_str(part);
                }
            }
            Expr::string(s)
        }
        Addable::Bytes => {
            let mut b = Vec::new();
            for arg in args {
                if let Expr::Literal {
                    value: Literal::Bytes(part),
                    ..
                } = arg.x.as_ref()
                {
                    b.extend_from_slice(part);
                }
            }
            Expr::bytes(b)
        }
        Addable::List | Addable::Tuple => {
            let mut elems = Vec::new();
            for arg in args {
                if let Expr::List(xs) | Expr::Tuple(xs) = arg.x.as_ref() {
                    elems.extend(xs.iter().cloned());
                }
            }
            if kind == Addable::List {
                Expr::List(elems)
            } else {
                Expr::Tuple(elems)
            }
        }
    }
}
