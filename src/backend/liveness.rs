//! Backward data-flow liveness over the blocks of an assembly function.
//!
//! For every block `b`:
//!
//! ```text
//! live_out(b) = ∪ live_in(s) for s in successors(b)
//! live_in(b)  = use(b) ∪ (live_out(b) − def(b))
//! ```
//!
//! The worklist starts out holding every block, the exit block first, so
//! blocks that cannot reach the exit (infinite loops) are still solved.

use std::collections::VecDeque;

use hashbrown::HashSet;

use crate::{
    backend::asm::{self, BlockId, Instruction},
    index::Index,
};

/// Recomputes the control-flow edges from the terminator of every block.
pub fn rebuild_edges(function: &mut asm::Function) {
    for block in function.blocks.iter_mut() {
        block.predecessors.clear();
        block.successors.clear();
    }

    for id in function.blocks.indices() {
        let successors = match function.blocks[id].terminator() {
            Some(Instruction::Jump { target }) => vec![*target],
            Some(Instruction::Branch {
                positive, negative, ..
            }) => vec![*positive, *negative],
            _ => vec![],
        };

        for successor in successors {
            function.blocks[id].successors.insert(successor);
            function.blocks[successor].predecessors.insert(id);
        }
    }
}

/// Fills `use_set` and `def_set` of every block.
fn compute_local_sets(function: &mut asm::Function) {
    for block in function.blocks.iter_mut() {
        let mut uses = HashSet::new();
        let mut defs = HashSet::new();

        for instruction in &block.instructions {
            for register in instruction.uses() {
                if !defs.contains(&register) {
                    uses.insert(register);
                }
            }

            defs.extend(instruction.defs());
        }

        block.use_set = uses;
        block.def_set = defs;
    }
}

/// Computes `live_in` and `live_out` of every block from scratch.
pub fn compute_liveness(function: &mut asm::Function) {
    rebuild_edges(function);
    compute_local_sets(function);

    for block in function.blocks.iter_mut() {
        block.live_in.clear();
        block.live_out.clear();
    }

    let mut queued = vec![false; function.blocks.len()];
    let mut worklist = VecDeque::with_capacity(function.blocks.len());

    worklist.push_back(function.exit);
    queued[function.exit.index()] = true;

    for id in function.blocks.indices().rev() {
        if !queued[id.index()] {
            worklist.push_back(id);
            queued[id.index()] = true;
        }
    }

    let mut visits = 0usize;

    while let Some(id) = worklist.pop_front() {
        queued[id.index()] = false;
        visits += 1;

        let live_out = function.blocks[id]
            .successors
            .iter()
            .flat_map(|successor| function.blocks[*successor].live_in.iter().copied())
            .collect::<HashSet<_>>();

        let block = &mut function.blocks[id];

        let mut live_in = block.use_set.clone();
        live_in.extend(live_out.difference(&block.def_set).copied());

        block.live_out = live_out;

        if live_in != block.live_in {
            block.live_in = live_in;

            let predecessors = block.predecessors.iter().copied().collect::<Vec<BlockId>>();
            for predecessor in predecessors {
                if !queued[predecessor.index()] {
                    queued[predecessor.index()] = true;
                    worklist.push_back(predecessor);
                }
            }
        }
    }

    log::trace!(
        "liveness of `{}` converged after {visits} block visits",
        function.name
    );
}
