use colored::Colorize;
use itertools::Itertools;

use crate::{
    index::Index,
    middle::{
        ir::{self, Operand},
        ty::Type,
    },
};

/// Renders a whole program as LLVM-flavoured text: struct types, string
/// constants, globals, the initializer and then every function.
pub fn pretty_print_program(program: &ir::Program) -> String {
    let structs = program.structs.iter().map(|s| {
        format!(
            "{} {} {{ {} }}",
            format!("%struct.{}", s.name).blue(),
            "= type".magenta(),
            s.members.iter().map(|m| m.ty.to_string()).join(", ")
        )
    });

    let strings = program.strings.iter().map(|(id, value)| {
        format!(
            "{} {} [{} x i8] c\"{}\\00\"",
            format!("@str.{}", id.index()).blue(),
            "= private unnamed_addr constant".magenta(),
            value.len() + 1,
            value.escape_default()
        )
    });

    let globals = program.globals.iter().map(|g| {
        format!(
            "{} {} {} {}",
            format!("@{}", g.name).blue(),
            "= global".magenta(),
            g.ty,
            g.initial
        )
    });

    let functions = program.all_functions().map(pretty_print_function);

    structs
        .chain(strings)
        .chain(globals)
        .chain(functions)
        .join("\n")
}

pub fn pretty_print_function(function: &ir::Function) -> String {
    let mut output = format!(
        "{} {} {}({}) {{\n",
        "define".magenta(),
        function.return_type,
        format!("@{}", function.name).blue(),
        function
            .parameters
            .iter()
            .map(|p| format!("{} {}", function.register_type(*p), register_name(function, *p)))
            .join(", ")
    );

    for block in function.ordered_blocks() {
        output.push_str(&format!("{}\n", format!("{}:", block.label).bright_red()));

        let allocas = (block.id == function.entry).then_some(function.allocas.iter());

        for instruction in allocas.into_iter().flatten().chain(&block.instructions) {
            output.push_str(&format!(
                "    {}\n",
                InstructionDisplay {
                    function,
                    instruction
                }
            ));
        }

        if let Some(terminator) = &block.terminator {
            output.push_str(&format!(
                "    {}\n",
                TerminatorDisplay {
                    function,
                    terminator
                }
            ));
        }
    }

    output.push('}');
    output
}

fn register_name(function: &ir::Function, register: ir::RegisterId) -> String {
    let name = match function.registers[register].name {
        Some(name) => format!("%{name}.{}", register.index()),
        None => format!("%{}", register.index()),
    };

    name.yellow().to_string()
}

impl core::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Type::Int => write!(f, "i32"),
            Type::Bool => write!(f, "i8"),
            Type::Cond => write!(f, "i1"),
            Type::StringPtr => write!(f, "i8*"),
            Type::Void => write!(f, "void"),
            Type::StructPtr(name) => write!(f, "%struct.{name}*"),
            Type::Pointer { base, depth } => {
                let base = match base.as_ref() {
                    // an opaque pointer is spelled `ptr`, one level fewer
                    Type::Void => return write!(f, "ptr{}", "*".repeat(*depth as usize - 1)),
                    other => other.to_string(),
                };

                write!(f, "{base}{}", "*".repeat(*depth as usize))
            }
        }
    }
}

impl core::fmt::Display for ir::Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            ir::Constant::Int(value) => value.to_string(),
            ir::Constant::Bool(value) | ir::Constant::Cond(value) => {
                (*value as u8).to_string()
            }
            ir::Constant::Null => "null".to_owned(),
        };

        write!(f, "{}", text.purple())
    }
}

impl core::fmt::Display for Operand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Register(register) => {
                write!(f, "{}", format!("%{}", register.index()).yellow())
            }
            Operand::Constant(constant) => write!(f, "{constant}"),
            Operand::Global(name) => write!(f, "{}", format!("@{name}").blue()),
            Operand::String(id) => write!(f, "{}", format!("@str.{}", id.index()).blue()),
        }
    }
}

/// Displays an instruction with its register names resolved against the
/// owning function.
pub struct InstructionDisplay<'a> {
    pub function: &'a ir::Function,
    pub instruction: &'a ir::Instruction,
}

pub struct TerminatorDisplay<'a> {
    pub function: &'a ir::Function,
    pub terminator: &'a ir::Terminator,
}

impl InstructionDisplay<'_> {
    fn operand(&self, operand: &Operand) -> String {
        operand_text(self.function, operand)
    }

    fn typed(&self, operand: &Operand) -> String {
        typed_operand(self.function, operand)
    }
}

fn operand_text(function: &ir::Function, operand: &Operand) -> String {
    match operand {
        Operand::Register(register) => register_name(function, *register),
        other => other.to_string(),
    }
}

fn typed_operand(function: &ir::Function, operand: &Operand) -> String {
    format!(
        "{} {}",
        function.operand_type(operand),
        operand_text(function, operand)
    )
}

impl core::fmt::Display for InstructionDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let function = self.function;
        let define = |destination: ir::RegisterId| {
            format!("{} {}", register_name(function, destination), "=".white())
        };

        match self.instruction {
            ir::Instruction::Alloca { destination, ty } => {
                write!(f, "{} {} {ty}", define(*destination), "alloca".cyan())
            }
            ir::Instruction::Load {
                destination,
                address,
            } => write!(
                f,
                "{} {} {}, {}",
                define(*destination),
                "load".cyan(),
                function.register_type(*destination),
                self.typed(address)
            ),
            ir::Instruction::Store { value, address } => write!(
                f,
                "{} {}, {}",
                "store".cyan(),
                self.typed(value),
                self.typed(address)
            ),
            ir::Instruction::Binary {
                operator,
                destination,
                lhs,
                rhs,
            } => write!(
                f,
                "{} {} {}, {}",
                define(*destination),
                operator.to_string().cyan(),
                self.typed(lhs),
                self.operand(rhs)
            ),
            ir::Instruction::Compare {
                condition,
                destination,
                lhs,
                rhs,
            } => write!(
                f,
                "{} {} {condition} {}, {}",
                define(*destination),
                "icmp".cyan(),
                self.typed(lhs),
                self.operand(rhs)
            ),
            ir::Instruction::ZeroExtend { destination, value } => write!(
                f,
                "{} {} {} to {}",
                define(*destination),
                "zext".cyan(),
                self.typed(value),
                function.register_type(*destination)
            ),
            ir::Instruction::Truncate { destination, value } => write!(
                f,
                "{} {} {} to {}",
                define(*destination),
                "trunc".cyan(),
                self.typed(value),
                function.register_type(*destination)
            ),
            ir::Instruction::BitCast { destination, value } => write!(
                f,
                "{} {} {} to {}",
                define(*destination),
                "bitcast".cyan(),
                self.typed(value),
                function.register_type(*destination)
            ),
            ir::Instruction::GetArrayElementPointer {
                destination,
                base,
                element,
                index,
            } => write!(
                f,
                "{} {} {element}, {}, {}",
                define(*destination),
                "getelementptr".cyan(),
                self.typed(base),
                self.typed(index)
            ),
            ir::Instruction::GetStructElementPointer {
                destination,
                base,
                structure,
                field,
            } => write!(
                f,
                "{} {} %struct.{structure}, {}, i32 0, i32 {}",
                define(*destination),
                "getelementptr".cyan(),
                self.typed(base),
                field.to_string().purple()
            ),
            ir::Instruction::Call {
                destination,
                function: callee,
                arguments,
            } => {
                let return_type = match destination {
                    Some(destination) => {
                        write!(f, "{} ", define(*destination))?;
                        function.register_type(*destination).to_string()
                    }
                    None => "void".to_owned(),
                };

                write!(
                    f,
                    "{} {return_type} {}({})",
                    "call".cyan(),
                    format!("@{callee}").blue(),
                    arguments.iter().map(|a| self.typed(a)).join(", ")
                )
            }
        }
    }
}

impl core::fmt::Display for TerminatorDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = |id: ir::BlockId| format!("%{}", self.function.blocks[id].label).blue();

        match self.terminator {
            ir::Terminator::Jump { destination } => {
                write!(f, "{} label {}", "br".cyan(), label(*destination))
            }
            ir::Terminator::Branch {
                condition,
                positive,
                negative,
            } => write!(
                f,
                "{} {}, label {}, label {}",
                "br".cyan(),
                typed_operand(self.function, condition),
                label(*positive),
                label(*negative)
            ),
            ir::Terminator::Return { value: Some(value) } => {
                write!(f, "{} {}", "ret".cyan(), typed_operand(self.function, value))
            }
            ir::Terminator::Return { value: None } => write!(f, "{} void", "ret".cyan()),
        }
    }
}
