//! The type-checked syntax tree handed over by the front end.
//!
//! Every expression carries the type the semantic checker assigned to it, and
//! every name has already been checked to resolve. Implicit `this` calls are
//! spelled out as [`CallTarget::Method`] on an [`ExpressionKind::This`] object.

use crate::frontend::intern::InternedSymbol;

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub definitions: Vec<Definition>,
}

#[derive(Debug, Clone)]
pub enum Definition {
    Function(FunctionDefinition),
    Class(ClassDefinition),
    Variable(VariableDefinition),
}

#[derive(Debug, Clone)]
pub struct FunctionDefinition {
    pub name: InternedSymbol,
    pub return_type: SemanticType,
    pub parameters: Vec<Parameter>,
    pub body: Vec<Statement>,
}

#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: InternedSymbol,
    pub ty: SemanticType,
}

#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub name: InternedSymbol,
    pub members: Vec<VariableDefinition>,
    /// Body of the user-declared constructor, if there is one
    pub constructor: Option<Vec<Statement>>,
    pub methods: Vec<FunctionDefinition>,
}

/// `int a = 1, b;`
#[derive(Debug, Clone)]
pub struct VariableDefinition {
    pub ty: SemanticType,
    pub declarators: Vec<Declarator>,
}

#[derive(Debug, Clone)]
pub struct Declarator {
    pub name: InternedSymbol,
    pub initializer: Option<Expression>,
}

#[derive(Debug, Clone)]
pub enum Statement {
    Block(Vec<Statement>),
    VariableDefinition(VariableDefinition),
    If {
        condition: Expression,
        positive: Vec<Statement>,
        negative: Vec<Statement>,
    },
    While {
        condition: Expression,
        body: Vec<Statement>,
    },
    For {
        initializer: Option<ForInitializer>,
        condition: Option<Expression>,
        step: Option<Expression>,
        body: Vec<Statement>,
    },
    Break,
    Continue,
    Return(Option<Expression>),
    Expression(Expression),
    Empty,
}

#[derive(Debug, Clone)]
pub enum ForInitializer {
    VariableDefinition(VariableDefinition),
    Expression(Expression),
}

#[derive(Debug, Clone)]
pub struct Expression {
    pub kind: ExpressionKind,
    pub ty: SemanticType,
}

#[derive(Debug, Clone)]
pub enum ExpressionKind {
    Literal(Literal),
    This,
    Variable(InternedSymbol),
    Binary {
        lhs: Box<Expression>,
        operator: BinaryOperatorKind,
        rhs: Box<Expression>,
    },
    Unary {
        operator: UnaryOperatorKind,
        operand: Box<Expression>,
    },
    Assignment {
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Ternary {
        condition: Box<Expression>,
        positive: Box<Expression>,
        negative: Box<Expression>,
    },
    Call {
        target: CallTarget,
        arguments: Vec<Expression>,
    },
    Index {
        array: Box<Expression>,
        index: Box<Expression>,
    },
    Member {
        object: Box<Expression>,
        member: InternedSymbol,
    },
    /// `new A`, `new int[n][m][]`. Only the leading dimensions carry a size.
    New {
        ty: SemanticType,
        dimensions: Vec<Expression>,
    },
}

#[derive(Debug, Clone)]
pub enum CallTarget {
    Function(InternedSymbol),
    Method {
        object: Box<Expression>,
        method: InternedSymbol,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Integer(i32),
    Boolean(bool),
    /// Already unescaped
    String(String),
    Null,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorKind {
    Add,                  // +
    Subtract,             // -
    Multiply,             // *
    Divide,               // /
    Modulus,              // %
    Equals,               // ==
    NotEquals,            // !=
    LessThan,             // <
    LessThanOrEqualTo,    // <=
    GreaterThan,          // >
    GreaterThanOrEqualTo, // >=
    LogicalAnd,           // &&
    LogicalOr,            // ||
    BitwiseAnd,           // &
    BitwiseOr,            // |
    BitwiseXor,           // ^
    ShiftLeft,            // <<
    ShiftRight,           // >>
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperatorClass {
    Arithmetic,
    Relational,
    Logical,
    Equality,
}

impl BinaryOperatorKind {
    pub fn class(self) -> BinaryOperatorClass {
        match self {
            Self::Add
            | Self::Subtract
            | Self::Multiply
            | Self::Divide
            | Self::Modulus
            | Self::BitwiseAnd
            | Self::BitwiseOr
            | Self::BitwiseXor
            | Self::ShiftLeft
            | Self::ShiftRight => BinaryOperatorClass::Arithmetic,
            Self::LessThan
            | Self::LessThanOrEqualTo
            | Self::GreaterThan
            | Self::GreaterThanOrEqualTo => BinaryOperatorClass::Relational,
            Self::LogicalAnd | Self::LogicalOr => BinaryOperatorClass::Logical,
            Self::Equals | Self::NotEquals => BinaryOperatorClass::Equality,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperatorKind {
    Plus,          // +
    Negate,        // -
    BitwiseNot,    // ~
    LogicalNot,    // !
    PreIncrement,  // ++x
    PreDecrement,  // --x
    PostIncrement, // x++
    PostDecrement, // x--
}

impl core::fmt::Display for UnaryOperatorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plus => write!(f, "+"),
            Self::Negate => write!(f, "-"),
            Self::BitwiseNot => write!(f, "~"),
            Self::LogicalNot => write!(f, "!"),
            Self::PreIncrement | Self::PostIncrement => write!(f, "++"),
            Self::PreDecrement | Self::PostDecrement => write!(f, "--"),
        }
    }
}

/// A front-end type: a base type plus an array dimension count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SemanticType {
    pub base: BaseType,
    pub dimensions: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Int,
    Bool,
    String,
    Void,
    Null,
    Class(InternedSymbol),
}

impl SemanticType {
    pub const fn scalar(base: BaseType) -> Self {
        Self {
            base,
            dimensions: 0,
        }
    }

    pub const fn int() -> Self {
        Self::scalar(BaseType::Int)
    }

    pub const fn bool() -> Self {
        Self::scalar(BaseType::Bool)
    }

    pub const fn string() -> Self {
        Self::scalar(BaseType::String)
    }

    pub const fn void() -> Self {
        Self::scalar(BaseType::Void)
    }

    pub const fn null() -> Self {
        Self::scalar(BaseType::Null)
    }

    pub fn class(name: impl Into<InternedSymbol>) -> Self {
        Self::scalar(BaseType::Class(name.into()))
    }

    pub fn array_of(mut self, dimensions: u32) -> Self {
        self.dimensions += dimensions;
        self
    }

    pub fn is_array(&self) -> bool {
        self.dimensions > 0
    }

    pub fn is_string(&self) -> bool {
        self.dimensions == 0 && self.base == BaseType::String
    }

    pub fn is_void(&self) -> bool {
        self.dimensions == 0 && self.base == BaseType::Void
    }

    pub fn class_name(&self) -> Option<InternedSymbol> {
        match self.base {
            BaseType::Class(name) if self.dimensions == 0 => Some(name),
            _ => None,
        }
    }
}

impl Expression {
    pub fn new(kind: ExpressionKind, ty: SemanticType) -> Self {
        Self { kind, ty }
    }

    /// A short human readable description used in error messages.
    pub fn describe(&self) -> String {
        match &self.kind {
            ExpressionKind::Literal(literal) => format!("literal `{literal:?}`"),
            ExpressionKind::This => "`this`".to_owned(),
            ExpressionKind::Variable(name) => format!("variable `{name}`"),
            ExpressionKind::Binary { operator, .. } => format!("binary `{operator:?}` expression"),
            ExpressionKind::Unary { operator, .. } => format!("unary `{operator}` expression"),
            ExpressionKind::Assignment { .. } => "assignment".to_owned(),
            ExpressionKind::Ternary { .. } => "conditional expression".to_owned(),
            ExpressionKind::Call {
                target: CallTarget::Function(name),
                ..
            } => format!("call to `{name}`"),
            ExpressionKind::Call {
                target: CallTarget::Method { method, .. },
                ..
            } => format!("call to method `{method}`"),
            ExpressionKind::Index { .. } => "array subscript".to_owned(),
            ExpressionKind::Member { member, .. } => format!("member access `.{member}`"),
            ExpressionKind::New { .. } => "`new` expression".to_owned(),
        }
    }
}
