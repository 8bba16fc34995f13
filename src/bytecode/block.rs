use tracing::error;

use crate::bytecode::encode::arg_len;
use crate::bytecode::op::Opcode;

// =============================================================================
// Blocks
// =============================================================================

pub(crate) type BlockId = usize;

/// One instruction before encoding. `line == 0` means no position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Insn {
    pub op: Opcode,
    pub arg: u32,
    pub line: u32,
    pub col: u32,
}

impl Insn {
    fn stack_effect(&self) -> i32 {
        self.op.stack_effect(self.arg)
    }
}

/// A basic block: straight-line code with at most two successors.
///
/// `jmp` is the fallthrough (or unconditional) successor; `cjmp` is the
/// target of the conditional jump ending the block, if any.
#[derive(Debug, Default)]
pub(crate) struct Block {
    pub insns: Vec<Insn>,
    pub jmp: Option<BlockId>,
    pub cjmp: Option<BlockId>,
    pub initial_stack: Option<i32>,
    pub index: Option<usize>,
    pub addr: u32,
}

/// Arena owning every block of one function. Blocks refer to each other
/// by id, so loops need no shared ownership.
#[derive(Debug, Default)]
pub(crate) struct BlockGraph {
    blocks: Vec<Block>,
}

impl BlockGraph {
    pub fn new() -> Self {
        BlockGraph::default()
    }

    pub fn new_block(&mut self) -> BlockId {
        self.blocks.push(Block::default());
        self.blocks.len() - 1
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id]
    }

    /// First block with code reachable from `id` through empty blocks.
    fn jump_target(&self, mut id: BlockId) -> BlockId {
        while self.blocks[id].insns.is_empty() {
            match self.blocks[id].jmp {
                Some(next) => id = next,
                None => panic!("internal compiler error: empty block {} has no successor", id),
            }
        }
        id
    }
}

// =============================================================================
// Linearization
// =============================================================================

/// Final order and size of a function's code.
#[derive(Debug)]
pub(crate) struct Layout {
    pub order: Vec<BlockId>,
    pub code_len: u32,
    pub max_stack: u32,
}

struct Linearizer<'a> {
    graph: &'a mut BlockGraph,
    order: Vec<BlockId>,
    pc: u32,
    max_stack: i32,
    mismatches: usize,
}

impl Linearizer<'_> {
    fn set_initial_stack(&mut self, id: BlockId, depth: i32) {
        let b = self.graph.block_mut(id);
        match b.initial_stack {
            None => b.initial_stack = Some(depth),
            Some(d) if d == depth => {}
            Some(d) => {
                error!(
                    block = id,
                    expected = d,
                    got = depth,
                    "set_initial_stack: depth mismatch"
                );
                self.mismatches += 1;
            }
        }
    }

    /// Place every block reachable from `entry`. The jmp successor is laid
    /// out directly after its predecessor when unplaced, then the cjmp
    /// successor; a conditional jump is patched once its target has an
    /// address.
    fn run(&mut self, entry: BlockId) {
        let mut work = vec![Step::Visit(entry)];
        while let Some(step) = work.pop() {
            match step {
                Step::Visit(id) => self.visit(id, &mut work),
                Step::Cjmp { from, target, stack, slot } => {
                    let target = self.graph.jump_target(target);
                    self.graph.block_mut(from).cjmp = Some(target);
                    self.set_initial_stack(target, stack);
                    work.push(Step::Patch { from, target, slot });
                    work.push(Step::Visit(target));
                }
                Step::Patch { from, target, slot } => {
                    if let Some(i) = slot {
                        let addr = self.graph.block(target).addr;
                        self.graph.block_mut(from).insns[i].arg = addr;
                    }
                }
            }
        }
    }

    fn visit(&mut self, id: BlockId, work: &mut Vec<Step>) {
        if self.graph.block(id).index.is_some() {
            return;
        }
        {
            let b = self.graph.block_mut(id);
            b.index = Some(self.order.len());
            b.addr = self.pc;
        }
        self.order.push(id);

        let b = self.graph.block(id);
        let mut stack = b.initial_stack.unwrap_or(0);
        let mut cjmp_slot = None;
        let mut is_iterjmp = 0;
        for (i, insn) in b.insns.iter().enumerate() {
            self.pc += 1;

            if insn.op.has_arg() {
                match insn.op {
                    Opcode::Cjmp | Opcode::IterJmp => {
                        if insn.op == Opcode::IterJmp {
                            is_iterjmp = 1;
                        }
                        cjmp_slot = Some(i);
                        self.pc += 4;
                    }
                    _ => self.pc += arg_len(insn.arg),
                }
            }

            stack += insn.stack_effect();
            if stack < 0 {
                panic!(
                    "internal compiler error: stack underflow at {} in block {}",
                    insn.op, id
                );
            }
            self.max_stack = self.max_stack.max(stack + is_iterjmp);
        }

        let jmp = b.jmp;
        let cjmp = b.cjmp;

        // The cjmp successor is handled after everything the jmp successor
        // reaches has been placed.
        if let Some(target) = cjmp {
            work.push(Step::Cjmp {
                from: id,
                target,
                stack,
                slot: cjmp_slot,
            });
        }

        // Fall through to the jmp successor if it is not yet placed.
        if let Some(jmp) = jmp {
            let target = self.graph.jump_target(jmp);
            self.graph.block_mut(id).jmp = Some(target);

            self.set_initial_stack(target, stack + is_iterjmp);
            if self.graph.block(target).index.is_none() {
                work.push(Step::Visit(target));
            } else {
                // explicit backward JMP
                self.pc += 5;
            }
        }
    }
}

/// Pending linearization work, run last-in first-out.
enum Step {
    Visit(BlockId),
    Cjmp {
        from: BlockId,
        target: BlockId,
        stack: i32,
        slot: Option<usize>,
    },
    Patch {
        from: BlockId,
        target: BlockId,
        slot: Option<usize>,
    },
}

/// Order the blocks reachable from `entry`, assign addresses, thread jumps
/// through empty blocks, patch conditional jump targets, and compute the
/// peak operand stack depth.
///
/// Panics if two paths reach a block with different stack depths or if
/// any path drives the depth negative.
pub(crate) fn linearize(graph: &mut BlockGraph, entry: BlockId) -> Layout {
    let mut lin = Linearizer {
        graph,
        order: Vec::new(),
        pc: 0,
        max_stack: 0,
        mismatches: 0,
    };
    lin.set_initial_stack(entry, 0);
    lin.run(entry);

    if lin.mismatches > 0 {
        panic!(
            "internal compiler error: {} stack depth mismatch(es)",
            lin.mismatches
        );
    }

    Layout {
        order: lin.order,
        code_len: lin.pc,
        max_stack: lin.max_stack as u32,
    }
}
