//! Shared helpers for the integration tests: terse constructors for typed
//! syntax trees, a small interpreter that executes lowered IR, and an RV32
//! simulator for allocated machine code. Both run against the same simulated
//! heap and runtime library.

#![allow(dead_code)]

pub mod machine;
pub mod runtime;

use hashbrown::HashMap;
use mxc::{
    backend::{CodegenOptions, isel, regalloc::allocate_registers},
    frontend::{
        ast::{
            BinaryOperatorKind, CallTarget, ClassDefinition, Declarator, Definition, Expression,
            ExpressionKind, ForInitializer, FunctionDefinition, Literal, Parameter, Program,
            SemanticType, Statement, UnaryOperatorKind, VariableDefinition,
        },
        intern::InternedSymbol,
        symbols::GlobalSymbols,
    },
    middle::{
        ir::{self, BinaryOperator, Condition, Constant, Instruction, Operand, Terminator},
        lowering::lower_program,
        ty::Type,
    },
};

pub use machine::Machine;
pub use runtime::Runtime;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/* Syntax tree construction */

pub fn sym(name: &str) -> InternedSymbol {
    InternedSymbol::new(name)
}

pub fn int(value: i32) -> Expression {
    Expression::new(
        ExpressionKind::Literal(Literal::Integer(value)),
        SemanticType::int(),
    )
}

pub fn boolean(value: bool) -> Expression {
    Expression::new(
        ExpressionKind::Literal(Literal::Boolean(value)),
        SemanticType::bool(),
    )
}

pub fn string(value: &str) -> Expression {
    Expression::new(
        ExpressionKind::Literal(Literal::String(value.to_owned())),
        SemanticType::string(),
    )
}

pub fn var(name: &str, ty: SemanticType) -> Expression {
    Expression::new(ExpressionKind::Variable(sym(name)), ty)
}

pub fn this(class: &str) -> Expression {
    Expression::new(ExpressionKind::This, SemanticType::class(class))
}

pub fn binary(lhs: Expression, operator: BinaryOperatorKind, rhs: Expression) -> Expression {
    let ty = match operator.class() {
        mxc::frontend::ast::BinaryOperatorClass::Arithmetic => lhs.ty.clone(),
        _ => SemanticType::bool(),
    };

    Expression::new(
        ExpressionKind::Binary {
            lhs: Box::new(lhs),
            operator,
            rhs: Box::new(rhs),
        },
        ty,
    )
}

pub fn unary(operator: UnaryOperatorKind, operand: Expression) -> Expression {
    let ty = operand.ty.clone();

    Expression::new(
        ExpressionKind::Unary {
            operator,
            operand: Box::new(operand),
        },
        ty,
    )
}

pub fn assign(lhs: Expression, rhs: Expression) -> Expression {
    let ty = lhs.ty.clone();

    Expression::new(
        ExpressionKind::Assignment {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
        ty,
    )
}

pub fn ternary(condition: Expression, positive: Expression, negative: Expression) -> Expression {
    let ty = positive.ty.clone();

    Expression::new(
        ExpressionKind::Ternary {
            condition: Box::new(condition),
            positive: Box::new(positive),
            negative: Box::new(negative),
        },
        ty,
    )
}

pub fn call(name: &str, arguments: Vec<Expression>, ty: SemanticType) -> Expression {
    Expression::new(
        ExpressionKind::Call {
            target: CallTarget::Function(sym(name)),
            arguments,
        },
        ty,
    )
}

pub fn method(
    object: Expression,
    name: &str,
    arguments: Vec<Expression>,
    ty: SemanticType,
) -> Expression {
    Expression::new(
        ExpressionKind::Call {
            target: CallTarget::Method {
                object: Box::new(object),
                method: sym(name),
            },
            arguments,
        },
        ty,
    )
}

pub fn index(array: Expression, index: Expression) -> Expression {
    let ty = SemanticType {
        base: array.ty.base,
        dimensions: array.ty.dimensions - 1,
    };

    Expression::new(
        ExpressionKind::Index {
            array: Box::new(array),
            index: Box::new(index),
        },
        ty,
    )
}

pub fn member(object: Expression, name: &str, ty: SemanticType) -> Expression {
    Expression::new(
        ExpressionKind::Member {
            object: Box::new(object),
            member: sym(name),
        },
        ty,
    )
}

/// `new T[d0][d1]...`; `ty` is the type of the whole expression.
pub fn new_array(ty: SemanticType, dimensions: Vec<Expression>) -> Expression {
    Expression::new(
        ExpressionKind::New {
            ty: ty.clone(),
            dimensions,
        },
        ty,
    )
}

pub fn new_object(class: &str) -> Expression {
    let ty = SemanticType::class(class);

    Expression::new(
        ExpressionKind::New {
            ty: ty.clone(),
            dimensions: vec![],
        },
        ty,
    )
}

pub fn local(name: &str, ty: SemanticType, initializer: Option<Expression>) -> Statement {
    Statement::VariableDefinition(variables(name, ty, initializer))
}

pub fn variables(
    name: &str,
    ty: SemanticType,
    initializer: Option<Expression>,
) -> VariableDefinition {
    VariableDefinition {
        ty,
        declarators: vec![Declarator {
            name: sym(name),
            initializer,
        }],
    }
}

pub fn expr(expression: Expression) -> Statement {
    Statement::Expression(expression)
}

pub fn ret(value: Option<Expression>) -> Statement {
    Statement::Return(value)
}

pub fn if_else(
    condition: Expression,
    positive: Vec<Statement>,
    negative: Vec<Statement>,
) -> Statement {
    Statement::If {
        condition,
        positive,
        negative,
    }
}

pub fn while_loop(condition: Expression, body: Vec<Statement>) -> Statement {
    Statement::While { condition, body }
}

pub fn for_loop(
    initializer: Option<ForInitializer>,
    condition: Option<Expression>,
    step: Option<Expression>,
    body: Vec<Statement>,
) -> Statement {
    Statement::For {
        initializer,
        condition,
        step,
        body,
    }
}

pub fn function(
    name: &str,
    return_type: SemanticType,
    parameters: &[(&str, SemanticType)],
    body: Vec<Statement>,
) -> FunctionDefinition {
    FunctionDefinition {
        name: sym(name),
        return_type,
        parameters: parameters
            .iter()
            .map(|(name, ty)| Parameter {
                name: sym(name),
                ty: ty.clone(),
            })
            .collect(),
        body,
    }
}

pub fn class(
    name: &str,
    members: &[(&str, SemanticType)],
    constructor: Option<Vec<Statement>>,
    methods: Vec<FunctionDefinition>,
) -> ClassDefinition {
    ClassDefinition {
        name: sym(name),
        members: members
            .iter()
            .map(|(name, ty)| variables(name, ty.clone(), None))
            .collect(),
        constructor,
        methods,
    }
}

pub fn program(definitions: Vec<Definition>) -> Program {
    Program { definitions }
}

/// A program consisting of `int main() { body }` only.
pub fn main_program(body: Vec<Statement>) -> Program {
    program(vec![Definition::Function(function(
        "main",
        SemanticType::int(),
        &[],
        body,
    ))])
}

pub fn lower(program: &Program) -> ir::Program {
    init_logging();

    let symbols = GlobalSymbols::collect(program).expect("symbol collection failed");
    lower_program(program, &symbols).expect("lowering failed")
}

pub fn function_named<'a>(program: &'a ir::Program, name: &str) -> &'a ir::Function {
    program
        .function(sym(name))
        .unwrap_or_else(|| panic!("no function `{name}`"))
}

/// Every instruction of `function` in layout order.
pub fn instructions(function: &ir::Function) -> Vec<&Instruction> {
    function
        .ordered_blocks()
        .flat_map(|block| block.instructions.iter())
        .collect()
}

/* Interpreter */

const STEP_LIMIT: usize = 1_000_000;

/// Executes lowered IR. Stack cells are heap allocated and never freed.
pub struct Interpreter<'p> {
    program: &'p ir::Program,
    globals: HashMap<InternedSymbol, i32>,
    strings: HashMap<ir::StringId, i32>,
    steps: usize,

    pub runtime: Runtime,
}

impl<'p> Interpreter<'p> {
    pub fn new(program: &'p ir::Program) -> Self {
        let mut interpreter = Self {
            program,
            globals: HashMap::new(),
            strings: HashMap::new(),
            steps: 0,
            runtime: Runtime::new(),
        };

        for (id, value) in program.strings.iter() {
            let address = interpreter.runtime.allocate_string(value);
            interpreter.strings.insert(id, address);
        }

        for global in &program.globals {
            let address = interpreter.runtime.allocate(global.ty.size());
            interpreter.globals.insert(global.name, address);

            let value = interpreter.operand(&HashMap::new(), &global.initial);
            interpreter.runtime.write(address, global.ty.size(), value);
        }

        interpreter
    }

    /// Runs `main` and returns its exit code.
    pub fn run_main(&mut self) -> i32 {
        self.call("main", vec![])
    }

    fn operand(&self, registers: &HashMap<ir::RegisterId, i32>, operand: &Operand) -> i32 {
        match operand {
            Operand::Register(register) => *registers
                .get(register)
                .unwrap_or_else(|| panic!("register {register:?} read before it is written")),
            Operand::Constant(constant) => constant.bits(),
            Operand::Global(name) => self.globals[name],
            Operand::String(id) => self.strings[id],
        }
    }

    /// The type stored at `address`, as far as the IR knows it.
    fn stored_type(&self, function: &ir::Function, address: &Operand, value: &Operand) -> Type {
        let known = match address {
            Operand::Register(register) => function.register_type(*register).pointee(),
            Operand::Global(name) => self
                .program
                .globals
                .iter()
                .find(|g| g.name == *name)
                .map(|g| g.ty.clone()),
            _ => None,
        };

        known.unwrap_or_else(|| function.operand_type(value))
    }

    pub fn call(&mut self, name: &str, arguments: Vec<i32>) -> i32 {
        self.runtime.calls.push(name.to_owned());

        match self.program.function(InternedSymbol::new(name)) {
            Some(function) => self.execute(function, arguments),
            None => self.runtime.builtin(name, &arguments),
        }
    }

    fn execute(&mut self, function: &'p ir::Function, arguments: Vec<i32>) -> i32 {
        let mut registers = HashMap::new();

        for alloca in &function.allocas {
            if let Instruction::Alloca { destination, ty } = alloca {
                let address = self.runtime.allocate(ty.size());
                registers.insert(*destination, address);
            }
        }

        assert_eq!(
            function.parameters.len(),
            arguments.len(),
            "arity of `{}`",
            function.name
        );
        for (parameter, value) in function.parameters.iter().zip(arguments) {
            registers.insert(*parameter, value);
        }

        let mut block = &function.blocks[function.entry];

        loop {
            for instruction in &block.instructions {
                self.steps += 1;
                assert!(self.steps < STEP_LIMIT, "step limit exceeded");

                self.instruction(function, &mut registers, instruction);
            }

            match block.terminator.as_ref().expect("block without terminator") {
                Terminator::Jump { destination } => block = &function.blocks[*destination],
                Terminator::Branch {
                    condition,
                    positive,
                    negative,
                } => {
                    let target = if self.operand(&registers, condition) != 0 {
                        positive
                    } else {
                        negative
                    };
                    block = &function.blocks[*target];
                }
                Terminator::Return { value } => {
                    return value
                        .as_ref()
                        .map_or(0, |value| self.operand(&registers, value));
                }
            }
        }
    }

    fn instruction(
        &mut self,
        function: &ir::Function,
        registers: &mut HashMap<ir::RegisterId, i32>,
        instruction: &Instruction,
    ) {
        match instruction {
            Instruction::Alloca { .. } => panic!("alloca left inside a block"),
            Instruction::Load {
                destination,
                address,
            } => {
                let size = function.register_type(*destination).size();
                let address = self.operand(registers, address);
                registers.insert(*destination, self.runtime.read(address, size));
            }
            Instruction::Store { value, address } => {
                assert_ne!(
                    function.operand_type(value),
                    Type::Cond,
                    "condition-form value stored to memory in `{}`",
                    function.name
                );

                let size = self.stored_type(function, address, value).size();
                let value = self.operand(registers, value);
                let address = self.operand(registers, address);
                self.runtime.write(address, size, value);
            }
            Instruction::Binary {
                operator,
                destination,
                lhs,
                rhs,
            } => {
                let a = self.operand(registers, lhs);
                let b = self.operand(registers, rhs);

                let result = match operator {
                    BinaryOperator::Add => a.wrapping_add(b),
                    BinaryOperator::Sub => a.wrapping_sub(b),
                    BinaryOperator::Mul => a.wrapping_mul(b),
                    BinaryOperator::SDiv => a.wrapping_div(b),
                    BinaryOperator::SRem => a.wrapping_rem(b),
                    BinaryOperator::Shl => a.wrapping_shl(b as u32 & 31),
                    BinaryOperator::AShr => a.wrapping_shr(b as u32 & 31),
                    BinaryOperator::And => a & b,
                    BinaryOperator::Or => a | b,
                    BinaryOperator::Xor => a ^ b,
                };
                registers.insert(*destination, result);
            }
            Instruction::Compare {
                condition,
                destination,
                lhs,
                rhs,
            } => {
                let a = self.operand(registers, lhs);
                let b = self.operand(registers, rhs);

                let result = match condition {
                    Condition::Eq => a == b,
                    Condition::Ne => a != b,
                    Condition::Slt => a < b,
                    Condition::Sle => a <= b,
                    Condition::Sgt => a > b,
                    Condition::Sge => a >= b,
                };
                registers.insert(*destination, result as i32);
            }
            Instruction::ZeroExtend { destination, value }
            | Instruction::BitCast { destination, value } => {
                let value = self.operand(registers, value);
                registers.insert(*destination, value);
            }
            Instruction::Truncate { destination, value } => {
                let value = self.operand(registers, value);
                registers.insert(*destination, value & 1);
            }
            Instruction::GetArrayElementPointer {
                destination,
                base,
                element,
                index,
            } => {
                let base = self.operand(registers, base);
                let index = self.operand(registers, index);
                registers.insert(*destination, base + index * element.size() as i32);
            }
            Instruction::GetStructElementPointer {
                destination,
                base,
                structure,
                field,
            } => {
                let base = self.operand(registers, base);
                let offset = self
                    .program
                    .struct_type(*structure)
                    .expect("unknown struct")
                    .members[*field]
                    .offset;
                registers.insert(*destination, base + offset as i32);
            }
            Instruction::Call {
                destination,
                function: callee,
                arguments,
            } => {
                let arguments = arguments
                    .iter()
                    .map(|argument| {
                        assert_ne!(
                            function.operand_type(argument),
                            Type::Cond,
                            "condition-form argument passed to `{callee}`"
                        );
                        self.operand(registers, argument)
                    })
                    .collect();

                let result = self.call(callee.value(), arguments);

                if let Some(destination) = destination {
                    registers.insert(*destination, result);
                }
            }
        }
    }
}

/// Lowers and runs `program`, returning its exit code and printed output.
pub fn run(program: &Program) -> (i32, String) {
    let ir = lower(program);
    let mut interpreter = Interpreter::new(&ir);
    let code = interpreter.run_main();
    (code, interpreter.runtime.output)
}

/// Compiles `program` down to allocated machine code and runs it on the
/// simulator, returning its exit code and printed output.
pub fn run_allocated(program: &Program, options: &CodegenOptions) -> (i32, String) {
    let ir = lower(program);
    let mut module = isel::select_program(&ir, options).expect("instruction selection failed");

    for function in module.functions.iter_mut() {
        allocate_registers(function, options).expect("register allocation failed");
    }

    let mut machine = Machine::new(&module);
    let code = machine.run_main();
    (code, machine.runtime.output)
}

pub fn constant_int(value: i32) -> Operand {
    Operand::Constant(Constant::Int(value))
}
