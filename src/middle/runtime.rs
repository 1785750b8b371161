//! Entry points of the runtime support library the generated code links against.
//!
//! All of them follow the C calling convention. String comparisons return the
//! condition form directly.

use hashbrown::HashMap;
use once_cell::sync::Lazy;

use crate::frontend::{ast::BinaryOperatorKind, intern::InternedSymbol};

/// Runs the non-constant global initializers; called first thing in `main`.
pub const GLOBAL_INITIALIZER: &str = "__mx_global_init";

pub const MALLOC: &str = "__mx_malloc";
pub const STRLEN: &str = "__mx_strlen";
pub const STRCPY: &str = "__mx_strcpy";
pub const STRCAT: &str = "__mx_strcat";

pub const ENTRY_POINT: &str = "main";

/// Free functions every program can call without declaring them.
static BUILTIN_FUNCTIONS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("print", "print"),
        ("println", "println"),
        ("printInt", "printInt"),
        ("printlnInt", "printlnInt"),
        ("getString", "getString"),
        ("getInt", "getInt"),
        ("toString", "toString"),
    ])
});

/// Methods of `string`. The string itself is passed as the first argument.
static STRING_METHODS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("length", "__mx_string_length"),
        ("substring", "__mx_string_substring"),
        ("parseInt", "__mx_string_parseInt"),
        ("ord", "__mx_string_ord"),
    ])
});

/// The only method of arrays, answered from the array header without a call.
pub const ARRAY_SIZE_METHOD: &str = "size";

pub fn builtin_function(name: InternedSymbol) -> Option<InternedSymbol> {
    BUILTIN_FUNCTIONS
        .get(name.value())
        .map(|symbol| InternedSymbol::new(symbol))
}

pub fn string_method(name: InternedSymbol) -> Option<InternedSymbol> {
    STRING_METHODS
        .get(name.value())
        .map(|symbol| InternedSymbol::new(symbol))
}

pub fn string_comparison(operator: BinaryOperatorKind) -> Option<InternedSymbol> {
    let symbol = match operator {
        BinaryOperatorKind::Equals => "__mx_string_eq",
        BinaryOperatorKind::NotEquals => "__mx_string_ne",
        BinaryOperatorKind::LessThan => "__mx_string_lt",
        BinaryOperatorKind::LessThanOrEqualTo => "__mx_string_le",
        BinaryOperatorKind::GreaterThan => "__mx_string_gt",
        BinaryOperatorKind::GreaterThanOrEqualTo => "__mx_string_ge",
        _ => return None,
    };

    Some(InternedSymbol::new(symbol))
}

/// The symbol a class method (or constructor) is emitted under.
pub fn method_symbol(class: InternedSymbol, method: InternedSymbol) -> InternedSymbol {
    InternedSymbol::new(&format!("{class}.{method}"))
}
