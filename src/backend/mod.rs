//! The backend turns the IR into RV32IM assembly text.
//!
//! Code generation runs in three steps:
//! 1. Instruction selection maps IR instructions onto machine instructions
//!    over virtual registers and lays stack cells out as frame objects.
//! 2. Register allocation colours the virtual registers of every function
//!    with physical ones, spilling to the frame where it has to.
//! 3. Emission lays out the frames and prints the module.

pub mod asm;
pub mod emit;
pub mod isel;
pub mod liveness;
pub mod regalloc;
pub mod riscv;

use crate::{error::Result, middle::ir};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Print every IR instruction as a comment above the code selected for it
    pub emit_comments: bool,
    /// Limits allocation to the first `n` registers of the allocation order
    pub register_budget: Option<usize>,
    /// Gives up on a function after this many spill rounds
    pub max_allocation_rounds: usize,
}

impl Default for CodegenOptions {
    fn default() -> Self {
        Self {
            emit_comments: false,
            register_budget: None,
            max_allocation_rounds: 32,
        }
    }
}

/// Selects, allocates and emits `program`.
pub fn generate_assembly(program: &ir::Program, options: &CodegenOptions) -> Result<String> {
    let mut module = isel::select_program(program, options)?;

    for function in module.functions.iter_mut() {
        regalloc::allocate_registers(function, options)?;
    }

    log::debug!(
        "generated code for {} functions and {} strings",
        module.functions.len(),
        module.strings.len()
    );

    Ok(emit::emit_module(&module))
}
