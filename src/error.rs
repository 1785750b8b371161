//! Internal compiler errors.
//!
//! The front end guarantees a well-typed program, so everything reported here
//! is a defect in the input contract or in the compiler itself. Compilation of
//! the whole unit stops at the first one.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InternalError {
    #[error("unresolved symbol `{0}`")]
    UnresolvedSymbol(String),

    #[error("{0} does not denote an addressable location")]
    MissingAddress(String),

    #[error("{0} does not produce a value")]
    MissingValue(String),

    #[error("call to unknown function `{0}`")]
    UnresolvedCall(String),

    #[error("unknown struct type `{0}`")]
    UnknownStruct(String),

    #[error("struct `{structure}` has no member `{member}`")]
    UnknownMember { structure: String, member: String },

    #[error("`{0}` is defined more than once")]
    DuplicateDefinition(String),

    #[error("malformed expression: {0}")]
    MalformedExpression(String),

    #[error("`{statement}` outside of a loop in function `{function}`")]
    LoopControlOutsideLoop {
        statement: &'static str,
        function: String,
    },

    #[error("`this` used outside of a class method in function `{0}`")]
    ThisOutsideMethod(String),

    #[error("block `{label}` in function `{function}` has no terminator")]
    MissingTerminator { function: String, label: String },

    #[error("block `{label}` in function `{function}` has inconsistent control-flow edges")]
    InconsistentEdges { function: String, label: String },

    #[error("`{first}` and `{second}` are live together in `{function}` but share `{register}`")]
    ConflictingAssignment {
        function: String,
        first: String,
        second: String,
        register: String,
    },

    #[error("register allocation for `{function}` did not converge after {rounds} rounds")]
    AllocationDidNotConverge { function: String, rounds: usize },
}

pub type Result<T, E = InternalError> = std::result::Result<T, E>;
