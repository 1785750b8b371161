//! The middle of the compiler: the typed AST is lowered into a control-flow
//! graph of basic blocks over stack cells, which the backend then turns into
//! machine code.

pub mod ir;
pub mod lowering;
pub mod runtime;
pub mod ty;
