//! Graph-colouring register allocation (Chaitin-Briggs).
//!
//! Each round computes liveness, builds the interference graph, simplifies it
//! and colours the virtual registers optimistically. Registers that end up
//! without a colour are spilled to the frame and the round is repeated on the
//! rewritten function.

use std::collections::BTreeSet;

use hashbrown::{HashMap, HashSet};
use itertools::Itertools;

use crate::{
    backend::{
        CodegenOptions,
        asm::{self, Instruction, Offset, Register, VirtualRegister, Width, occurrence_counts},
        liveness::compute_liveness,
        riscv::{self, PhysicalRegister},
    },
    error::{InternalError, Result},
    index::Index,
    middle::ty::WORD_SIZE,
};

/// The colour chosen for every virtual register of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    pub colors: HashMap<VirtualRegister, PhysicalRegister>,
    /// Rounds it took to find a colouring without spills
    pub rounds: usize,
}

/// Registers that are live at the same time. Only virtual registers own an
/// adjacency list; physical registers are precoloured and only appear as
/// neighbours.
#[derive(Debug, Default)]
pub struct InterferenceGraph {
    pub adjacency: HashMap<VirtualRegister, HashSet<Register>>,
}

impl InterferenceGraph {
    /// Builds the graph from up-to-date liveness information.
    pub fn build(function: &asm::Function) -> Self {
        let mut graph = Self::default();

        for register in function.virtual_registers_in_use() {
            graph.adjacency.entry(register).or_default();
        }

        for block in function.blocks.iter() {
            let mut live = block.live_out.clone();

            for instruction in block.instructions.iter().rev() {
                let defs = instruction.defs();

                // a move does not make its source and destination interfere
                if let Instruction::Move { rs, .. } = instruction {
                    live.remove(rs);
                }

                for def in &defs {
                    for other in &live {
                        if other != def {
                            graph.add_edge(*def, *other);
                        }
                    }
                }

                for def in &defs {
                    live.remove(def);
                }

                live.extend(instruction.uses());
            }
        }

        graph
    }

    fn add_edge(&mut self, a: Register, b: Register) {
        if let Register::Virtual(v) = a {
            self.adjacency.entry(v).or_default().insert(b);
        }

        if let Register::Virtual(v) = b {
            self.adjacency.entry(v).or_default().insert(a);
        }
    }

    pub fn interferes(&self, a: VirtualRegister, b: Register) -> bool {
        self.adjacency.get(&a).is_some_and(|n| n.contains(&b))
    }
}

fn palette(options: &CodegenOptions) -> &'static [PhysicalRegister] {
    let budget = options
        .register_budget
        .unwrap_or(riscv::ALLOCATION_ORDER.len())
        .clamp(riscv::MINIMUM_REGISTER_BUDGET, riscv::ALLOCATION_ORDER.len());

    &riscv::ALLOCATION_ORDER[..budget]
}

/// Simplify and select. Returns the registers that could not be coloured
/// when colouring fails.
fn color(
    function: &asm::Function,
    graph: &InterferenceGraph,
    palette: &[PhysicalRegister],
) -> std::result::Result<HashMap<VirtualRegister, PhysicalRegister>, Vec<VirtualRegister>> {
    let k = palette.len();
    let costs = occurrence_counts(function);

    let degree = |register: VirtualRegister, remaining: &BTreeSet<VirtualRegister>| {
        graph.adjacency[&register]
            .iter()
            .filter(|neighbour| match neighbour {
                Register::Virtual(v) => remaining.contains(v),
                Register::Physical(p) => palette.contains(p),
            })
            .count()
    };

    /* Simplify */

    let mut remaining = graph.adjacency.keys().copied().collect::<BTreeSet<_>>();
    let mut stack = Vec::with_capacity(remaining.len());

    while !remaining.is_empty() {
        let trivial = remaining
            .iter()
            .copied()
            .find(|register| degree(*register, &remaining) < k);

        // Briggs: push a spill candidate optimistically, it may still get a colour
        let candidate = trivial.or_else(|| {
            remaining.iter().copied().min_by(|a, b| {
                let cost = |register: &VirtualRegister| {
                    if function.unspillable.contains(register) {
                        f64::INFINITY
                    } else {
                        costs.get(register).copied().unwrap_or(0) as f64
                            / degree(*register, &remaining).max(1) as f64
                    }
                };

                cost(a).total_cmp(&cost(b))
            })
        });

        let Some(chosen) = candidate else {
            break;
        };

        remaining.remove(&chosen);
        stack.push(chosen);
    }

    /* Select */

    let mut colors = HashMap::new();
    let mut uncolored = vec![];

    while let Some(register) = stack.pop() {
        let taken = graph.adjacency[&register]
            .iter()
            .filter_map(|neighbour| match neighbour {
                Register::Virtual(v) => colors.get(v).copied(),
                Register::Physical(p) => Some(*p),
            })
            .collect::<HashSet<_>>();

        match palette.iter().find(|color| !taken.contains(*color)) {
            Some(color) => {
                colors.insert(register, *color);
            }
            None => uncolored.push(register),
        }
    }

    if uncolored.is_empty() {
        Ok(colors)
    } else {
        Err(uncolored)
    }
}

/// Moves `spilled` into frame slots. Every use reloads the value into a fresh
/// temporary right before the instruction and every definition stores it
/// right after.
fn spill(function: &mut asm::Function, spilled: &[VirtualRegister]) {
    let slots = spilled
        .iter()
        .map(|register| {
            let slot = function.frame.allocate(WORD_SIZE, WORD_SIZE);
            (*register, slot)
        })
        .collect::<HashMap<_, _>>();

    let mut next_register = function.virtual_registers;
    let mut temporaries = HashSet::new();

    for block in function.blocks.iter_mut() {
        let instructions = std::mem::take(&mut block.instructions);

        for mut instruction in instructions {
            let mut replaced: HashMap<VirtualRegister, VirtualRegister> = HashMap::new();
            let mut reloads = vec![];
            let mut stores = vec![];

            instruction.map_registers(|register, access| {
                let Register::Virtual(v) = register else {
                    return register;
                };
                let Some(slot) = slots.get(&v) else {
                    return register;
                };

                let temporary = *replaced.entry(v).or_insert_with(|| {
                    let temporary = VirtualRegister::new(next_register);
                    next_register += 1;
                    temporaries.insert(temporary);
                    temporary
                });

                let memory = (Register::Virtual(temporary), Offset::Frame(*slot));
                match access {
                    asm::Access::Use => reloads.push(memory),
                    asm::Access::Def => stores.push(memory),
                }

                Register::Virtual(temporary)
            });

            for (rd, offset) in reloads.into_iter().unique() {
                block.instructions.push(Instruction::Load {
                    width: Width::Word,
                    rd,
                    base: Register::SP,
                    offset,
                });
            }

            block.instructions.push(instruction);

            for (rs, offset) in stores.into_iter().unique() {
                block.instructions.push(Instruction::Store {
                    width: Width::Word,
                    rs,
                    base: Register::SP,
                    offset,
                });
            }
        }
    }

    function.virtual_registers = next_register;
    function.unspillable.extend(temporaries);
}

/// Colours every virtual register of `function`, spilling until a colouring
/// is found. The function is rewritten with spill code but still refers to
/// virtual registers.
pub fn allocate(function: &mut asm::Function, options: &CodegenOptions) -> Result<Assignment> {
    let palette = palette(options);

    for round in 1..=options.max_allocation_rounds {
        compute_liveness(function);
        let graph = InterferenceGraph::build(function);

        match color(function, &graph, palette) {
            Ok(colors) => {
                log::debug!(
                    "allocated `{}` with {} colours in {round} rounds",
                    function.name,
                    palette.len()
                );
                return Ok(Assignment {
                    colors,
                    rounds: round,
                });
            }
            Err(spilled) => {
                log::debug!(
                    "round {round} of `{}` spills {}",
                    function.name,
                    spilled.iter().map(|r| Register::Virtual(*r)).join(", ")
                );
                spill(function, &spilled);
            }
        }
    }

    Err(InternalError::AllocationDidNotConverge {
        function: function.name.clone(),
        rounds: options.max_allocation_rounds,
    })
}

/// Verifies that no two interfering registers share a colour.
pub fn check_assignment(function: &asm::Function, assignment: &Assignment) -> Result<()> {
    let mut function = function.clone();
    compute_liveness(&mut function);
    let graph = InterferenceGraph::build(&function);

    let conflict = |first: Register, second: Register, register: String| {
        InternalError::ConflictingAssignment {
            function: function.name.clone(),
            first: first.to_string(),
            second: second.to_string(),
            register,
        }
    };

    for (register, neighbours) in graph.adjacency.iter().sorted_by_key(|(r, _)| **r) {
        let Some(color) = assignment.colors.get(register) else {
            return Err(conflict(
                Register::Virtual(*register),
                Register::Virtual(*register),
                "no register".to_owned(),
            ));
        };

        for neighbour in neighbours {
            let neighbour_color = match neighbour {
                Register::Virtual(v) => assignment.colors.get(v).copied(),
                Register::Physical(p) => Some(*p),
            };

            if neighbour_color == Some(*color) {
                return Err(conflict(
                    Register::Virtual(*register),
                    *neighbour,
                    color.to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Replaces every virtual register by its colour, drops the moves that became
/// no-ops and records the callee-saved registers the function now writes.
pub fn apply_assignment(function: &mut asm::Function, assignment: &Assignment) {
    for block in function.blocks.iter_mut() {
        for instruction in block.instructions.iter_mut() {
            instruction.map_registers(|register, _| match register {
                Register::Virtual(v) => assignment
                    .colors
                    .get(&v)
                    .map_or(register, |color| Register::Physical(*color)),
                physical => physical,
            });
        }

        block
            .instructions
            .retain(|instruction| !matches!(instruction, Instruction::Move { rd, rs } if rd == rs));
    }

    let written = function
        .instructions()
        .flat_map(Instruction::defs)
        .collect::<HashSet<_>>();

    function.saved_registers = riscv::CALLEE_SAVED
        .iter()
        .copied()
        .filter(|register| written.contains(&Register::Physical(*register)))
        .collect();
}

/// Allocates and rewrites `function` in place.
pub fn allocate_registers(function: &mut asm::Function, options: &CodegenOptions) -> Result<()> {
    let assignment = allocate(function, options)?;

    if cfg!(debug_assertions) {
        check_assignment(function, &assignment)?;
    }

    apply_assignment(function, &assignment);
    Ok(())
}
