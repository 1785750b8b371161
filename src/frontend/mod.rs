//! The contract with the front end. Lexing, parsing and semantic checking
//! happen elsewhere; what arrives here is a fully type-checked tree together
//! with its global symbol table.

pub mod ast;
pub mod intern;
pub mod symbols;
