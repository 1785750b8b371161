//! `mxc` compiles type-checked Mx* programs to RV32IM assembly.
//!
//! The front end hands over a typed AST together with the global symbol
//! table. [`middle::lowering`] turns it into a block-structured IR, and the
//! [`backend`] selects instructions, allocates registers and prints assembly.

pub mod backend;
pub mod error;
pub mod frontend;
pub mod index;
pub mod middle;

pub use error::{InternalError, Result};

use crate::{backend::CodegenOptions, frontend::{ast, symbols::GlobalSymbols}};

/// Compiles one compilation unit into assembly text.
pub fn compile(
    program: &ast::Program,
    symbols: &GlobalSymbols,
    options: &CodegenOptions,
) -> Result<String> {
    let ir = middle::lowering::lower_program(program, symbols)?;

    if log::log_enabled!(log::Level::Trace) {
        log::trace!(
            "lowered IR:\n{}",
            strip_ansi_escapes::strip_str(middle::ir::pretty_print::pretty_print_program(&ir))
        );
    }

    backend::generate_assembly(&ir, options)
}
