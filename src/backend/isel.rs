//! Instruction selection: maps every IR instruction onto RV32IM instructions
//! over an unbounded supply of virtual registers.
//!
//! Stack cells (`alloca`) become frame objects addressed relative to `sp`, so
//! a load or store through a cell never materialises its address.

use hashbrown::HashMap;

use crate::{
    backend::{
        CodegenOptions,
        asm::{
            self, ArithmeticOperator, DataItem, DataValue, FrameSlot, ImmediateOperator,
            Instruction, Offset, Register, Width,
        },
        liveness,
        riscv::{self, PhysicalRegister},
    },
    error::{InternalError, Result},
    index::Index,
    middle::{
        ir::{
            self, BinaryOperator, Condition, Operand, RegisterId, Terminator,
            pretty_print::{InstructionDisplay, TerminatorDisplay},
        },
        ty::Type,
    },
};

/// Assembly label of a pooled string constant.
pub fn string_label(id: ir::StringId) -> String {
    format!(".str.{}", id.index())
}

pub fn select_program(program: &ir::Program, options: &CodegenOptions) -> Result<asm::Module> {
    let strings = program
        .strings
        .iter()
        .map(|(id, value)| (string_label(id), value.to_owned()))
        .collect();

    let globals = program
        .globals
        .iter()
        .map(|global| {
            let value = match (&global.initial, &global.ty) {
                (Operand::String(id), _) => DataValue::Address(string_label(*id)),
                (Operand::Constant(constant), Type::Bool) => DataValue::Byte(constant.bits() as u8),
                (Operand::Constant(constant), _) => DataValue::Word(constant.bits()),
                (other, _) => {
                    return Err(InternalError::MalformedExpression(format!(
                        "global `{}` is initialized with non-constant {other:?}",
                        global.name
                    )));
                }
            };

            Ok(DataItem {
                label: global.name.value().to_owned(),
                value,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let functions = program
        .all_functions()
        .map(|function| FunctionSelector::new(program, function, options).select())
        .collect::<Result<Vec<_>>>()?;

    Ok(asm::Module {
        strings,
        globals,
        functions,
    })
}

struct FunctionSelector<'a> {
    program: &'a ir::Program,
    source: &'a ir::Function,
    options: &'a CodegenOptions,
    output: asm::Function,
    values: HashMap<RegisterId, Register>,
    cells: HashMap<RegisterId, FrameSlot>,
    blocks: HashMap<ir::BlockId, asm::BlockId>,
    current: asm::BlockId,
}

impl<'a> FunctionSelector<'a> {
    fn new(
        program: &'a ir::Program,
        source: &'a ir::Function,
        options: &'a CodegenOptions,
    ) -> Self {
        Self {
            program,
            source,
            options,
            output: asm::Function::new(source.name.value().to_owned()),
            values: HashMap::new(),
            cells: HashMap::new(),
            blocks: HashMap::new(),
            current: asm::BlockId::new(0),
        }
    }

    fn select(mut self) -> Result<asm::Function> {
        for block in self.source.ordered_blocks() {
            let id = self
                .output
                .blocks
                .push(asm::Block::new(asm::BlockId::new(0), block.label.clone()));
            self.output.blocks[id].id = id;
            self.blocks.insert(block.id, id);
        }

        self.output.entry = self.block(self.source.entry)?;
        self.output.exit = self.block(self.source.exit)?;

        for alloca in &self.source.allocas {
            if let ir::Instruction::Alloca { destination, ty } = alloca {
                let layout = ty.layout();
                let slot = self.output.frame.allocate(layout.size, layout.alignment);
                self.cells.insert(*destination, slot);
            }
        }

        /* Parameters arrive in a0-a7, the rest on the caller's stack */

        self.current = self.output.entry;

        for (index, parameter) in self.source.parameters.iter().enumerate() {
            let value = self.value_register(*parameter);

            match riscv::ARGUMENT_REGISTERS.get(index) {
                Some(register) => self.push(Instruction::Move {
                    rd: value,
                    rs: (*register).into(),
                }),
                None => self.push(Instruction::Load {
                    width: Width::Word,
                    rd: value,
                    base: Register::SP,
                    offset: Offset::Incoming((index - riscv::ARGUMENT_REGISTERS.len()) as u32),
                }),
            }
        }

        for block in self.source.ordered_blocks() {
            self.current = self.block(block.id)?;

            for instruction in &block.instructions {
                if self.options.emit_comments {
                    let text = InstructionDisplay {
                        function: self.source,
                        instruction,
                    }
                    .to_string();
                    self.push(Instruction::Comment(strip_ansi_escapes::strip_str(text)));
                }

                self.select_instruction(instruction)?;
            }

            let terminator =
                block
                    .terminator
                    .as_ref()
                    .ok_or_else(|| InternalError::MissingTerminator {
                        function: self.output.name.clone(),
                        label: block.label.clone(),
                    })?;

            if self.options.emit_comments {
                let text = TerminatorDisplay {
                    function: self.source,
                    terminator,
                }
                .to_string();
                self.push(Instruction::Comment(strip_ansi_escapes::strip_str(text)));
            }

            self.select_terminator(terminator)?;
        }

        liveness::rebuild_edges(&mut self.output);

        log::trace!(
            "selected {} instructions for `{}`",
            self.output.instructions().count(),
            self.output.name
        );

        Ok(self.output)
    }

    fn block(&self, block: ir::BlockId) -> Result<asm::BlockId> {
        self.blocks
            .get(&block)
            .copied()
            .ok_or_else(|| InternalError::InconsistentEdges {
                function: self.output.name.clone(),
                label: self.source.blocks[block].label.clone(),
            })
    }

    fn push(&mut self, instruction: Instruction) {
        self.output.blocks[self.current]
            .instructions
            .push(instruction);
    }

    fn fresh(&mut self) -> Register {
        self.output.new_virtual_register()
    }

    /// The virtual register holding the value of IR register `register`.
    fn value_register(&mut self, register: RegisterId) -> Register {
        if let Some(value) = self.values.get(&register) {
            return *value;
        }

        let value = self.fresh();
        self.values.insert(register, value);
        value
    }

    /// Puts `operand` into a register, emitting whatever is needed to build it.
    fn operand(&mut self, operand: &Operand) -> Register {
        match operand {
            Operand::Register(register) => match self.cells.get(register).copied() {
                Some(slot) => {
                    let rd = self.fresh();
                    self.push(Instruction::FrameAddress { rd, slot });
                    rd
                }
                None => self.value_register(*register),
            },
            Operand::Constant(constant) if constant.bits() == 0 => Register::ZERO,
            Operand::Constant(constant) => {
                let rd = self.fresh();
                self.push(Instruction::LoadImmediate {
                    rd,
                    value: constant.bits(),
                });
                rd
            }
            Operand::Global(name) => {
                let rd = self.fresh();
                self.push(Instruction::LoadAddress {
                    rd,
                    symbol: name.value().to_owned(),
                });
                rd
            }
            Operand::String(id) => {
                let rd = self.fresh();
                self.push(Instruction::LoadAddress {
                    rd,
                    symbol: string_label(*id),
                });
                rd
            }
        }
    }

    /// Base register and offset addressing the memory `address` points to.
    fn address(&mut self, address: &Operand) -> (Register, Offset) {
        if let Operand::Register(register) = address
            && let Some(slot) = self.cells.get(register)
        {
            return (Register::SP, Offset::Frame(*slot));
        }

        (self.operand(address), Offset::Immediate(0))
    }

    /// The type of the value stored at `address`.
    fn pointee_type(&self, address: &Operand) -> Option<Type> {
        match address {
            Operand::Register(register) => self.source.register_type(*register).pointee(),
            Operand::Global(name) => self
                .program
                .globals
                .iter()
                .find(|g| g.name == *name)
                .map(|g| g.ty.clone()),
            _ => None,
        }
    }

    fn select_instruction(&mut self, instruction: &ir::Instruction) -> Result<()> {
        match instruction {
            // hoisted into the frame
            ir::Instruction::Alloca { .. } => {}
            ir::Instruction::Load {
                destination,
                address,
            } => {
                let width = Width::of_size(self.source.register_type(*destination).size());
                let (base, offset) = self.address(address);
                let rd = self.value_register(*destination);

                self.push(Instruction::Load {
                    width,
                    rd,
                    base,
                    offset,
                });
            }
            ir::Instruction::Store { value, address } => {
                let ty = self
                    .pointee_type(address)
                    .unwrap_or_else(|| self.source.operand_type(value));
                let rs = self.operand(value);
                let (base, offset) = self.address(address);

                self.push(Instruction::Store {
                    width: Width::of_size(ty.size()),
                    rs,
                    base,
                    offset,
                });
            }
            ir::Instruction::Binary {
                operator,
                destination,
                lhs,
                rhs,
            } => self.select_binary(*operator, *destination, lhs, rhs),
            ir::Instruction::Compare {
                condition,
                destination,
                lhs,
                rhs,
            } => self.select_compare(*condition, *destination, lhs, rhs),
            ir::Instruction::ZeroExtend { destination, value }
            | ir::Instruction::BitCast { destination, value } => {
                let rs = self.operand(value);
                let rd = self.value_register(*destination);
                self.push(Instruction::Move { rd, rs });
            }
            ir::Instruction::Truncate { destination, value } => {
                let rs1 = self.operand(value);
                let rd = self.value_register(*destination);
                self.push(Instruction::ArithmeticImmediate {
                    operator: ImmediateOperator::Andi,
                    rd,
                    rs1,
                    value: 1,
                });
            }
            ir::Instruction::GetArrayElementPointer {
                destination,
                base,
                element,
                index,
            } => self.select_array_element(*destination, base, element, index),
            ir::Instruction::GetStructElementPointer {
                destination,
                base,
                structure,
                field,
            } => {
                let layout = self
                    .program
                    .struct_type(*structure)
                    .ok_or_else(|| InternalError::UnknownStruct(structure.to_string()))?;
                let member =
                    layout
                        .members
                        .get(*field)
                        .ok_or_else(|| InternalError::UnknownMember {
                            structure: structure.to_string(),
                            member: format!("#{field}"),
                        })?;

                let base = self.operand(base);
                let rd = self.value_register(*destination);
                self.add_offset(rd, base, member.offset as i32);
            }
            ir::Instruction::Call {
                destination,
                function,
                arguments,
            } => self.select_call(*destination, function.value(), arguments),
        }

        Ok(())
    }

    /// `rd = base + offset`
    fn add_offset(&mut self, rd: Register, base: Register, offset: i32) {
        if riscv::fits_immediate(offset as i64) {
            self.push(Instruction::ArithmeticImmediate {
                operator: ImmediateOperator::Addi,
                rd,
                rs1: base,
                value: offset,
            });
        } else {
            let scaled = self.fresh();
            self.push(Instruction::LoadImmediate {
                rd: scaled,
                value: offset,
            });
            self.push(Instruction::Arithmetic {
                operator: ArithmeticOperator::Add,
                rd,
                rs1: base,
                rs2: scaled,
            });
        }
    }

    fn select_binary(
        &mut self,
        operator: BinaryOperator,
        destination: RegisterId,
        lhs: &Operand,
        rhs: &Operand,
    ) {
        let immediate = match (operator, rhs) {
            (BinaryOperator::Add, Operand::Constant(c)) => {
                Some((ImmediateOperator::Addi, c.bits()))
            }
            (BinaryOperator::Sub, Operand::Constant(c)) if c.bits() != i32::MIN => {
                Some((ImmediateOperator::Addi, -c.bits()))
            }
            (BinaryOperator::And, Operand::Constant(c)) => {
                Some((ImmediateOperator::Andi, c.bits()))
            }
            (BinaryOperator::Or, Operand::Constant(c)) => Some((ImmediateOperator::Ori, c.bits())),
            (BinaryOperator::Xor, Operand::Constant(c)) => {
                Some((ImmediateOperator::Xori, c.bits()))
            }
            (BinaryOperator::Shl, Operand::Constant(c)) => {
                Some((ImmediateOperator::Slli, c.bits() & 31))
            }
            (BinaryOperator::AShr, Operand::Constant(c)) => {
                Some((ImmediateOperator::Srai, c.bits() & 31))
            }
            _ => None,
        }
        .filter(|(_, value)| riscv::fits_immediate(*value as i64));

        let rs1 = self.operand(lhs);

        if let Some((operator, value)) = immediate {
            let rd = self.value_register(destination);
            self.push(Instruction::ArithmeticImmediate {
                operator,
                rd,
                rs1,
                value,
            });
            return;
        }

        let rs2 = self.operand(rhs);
        let rd = self.value_register(destination);
        let operator = match operator {
            BinaryOperator::Add => ArithmeticOperator::Add,
            BinaryOperator::Sub => ArithmeticOperator::Sub,
            BinaryOperator::Mul => ArithmeticOperator::Mul,
            BinaryOperator::SDiv => ArithmeticOperator::Div,
            BinaryOperator::SRem => ArithmeticOperator::Rem,
            BinaryOperator::Shl => ArithmeticOperator::Sll,
            BinaryOperator::AShr => ArithmeticOperator::Sra,
            BinaryOperator::And => ArithmeticOperator::And,
            BinaryOperator::Or => ArithmeticOperator::Or,
            BinaryOperator::Xor => ArithmeticOperator::Xor,
        };

        self.push(Instruction::Arithmetic {
            operator,
            rd,
            rs1,
            rs2,
        });
    }

    fn select_compare(
        &mut self,
        condition: Condition,
        destination: RegisterId,
        lhs: &Operand,
        rhs: &Operand,
    ) {
        let a = self.operand(lhs);
        let b = self.operand(rhs);
        let rd = self.value_register(destination);

        let arithmetic = |operator, rd, rs1, rs2| Instruction::Arithmetic {
            operator,
            rd,
            rs1,
            rs2,
        };
        let immediate = |operator, rd, rs1, value| Instruction::ArithmeticImmediate {
            operator,
            rd,
            rs1,
            value,
        };

        match condition {
            Condition::Slt => self.push(arithmetic(ArithmeticOperator::Slt, rd, a, b)),
            Condition::Sgt => self.push(arithmetic(ArithmeticOperator::Slt, rd, b, a)),
            Condition::Sle | Condition::Sge => {
                // a <= b is !(b < a)
                let (rs1, rs2) = if condition == Condition::Sle { (b, a) } else { (a, b) };
                let less = self.fresh();
                self.push(arithmetic(ArithmeticOperator::Slt, less, rs1, rs2));
                self.push(immediate(ImmediateOperator::Xori, rd, less, 1));
            }
            Condition::Eq | Condition::Ne => {
                let difference = if b == Register::ZERO {
                    a
                } else {
                    let difference = self.fresh();
                    self.push(arithmetic(ArithmeticOperator::Xor, difference, a, b));
                    difference
                };

                if condition == Condition::Eq {
                    self.push(immediate(ImmediateOperator::Sltiu, rd, difference, 1));
                } else {
                    self.push(arithmetic(
                        ArithmeticOperator::Sltu,
                        rd,
                        Register::ZERO,
                        difference,
                    ));
                }
            }
        }
    }

    fn select_array_element(
        &mut self,
        destination: RegisterId,
        base: &Operand,
        element: &Type,
        index: &Operand,
    ) {
        let size = element.size() as i32;
        let base = self.operand(base);

        if let Operand::Constant(constant) = index {
            let rd = self.value_register(destination);
            self.add_offset(rd, base, constant.bits().wrapping_mul(size));
            return;
        }

        let index = self.operand(index);
        let scaled = match size {
            1 => index,
            size if (size as u32).is_power_of_two() => {
                let scaled = self.fresh();
                self.push(Instruction::ArithmeticImmediate {
                    operator: ImmediateOperator::Slli,
                    rd: scaled,
                    rs1: index,
                    value: size.trailing_zeros() as i32,
                });
                scaled
            }
            size => {
                let factor = self.fresh();
                let scaled = self.fresh();
                self.push(Instruction::LoadImmediate { rd: factor, value: size });
                self.push(Instruction::Arithmetic {
                    operator: ArithmeticOperator::Mul,
                    rd: scaled,
                    rs1: index,
                    rs2: factor,
                });
                scaled
            }
        };

        let rd = self.value_register(destination);
        self.push(Instruction::Arithmetic {
            operator: ArithmeticOperator::Add,
            rd,
            rs1: base,
            rs2: scaled,
        });
    }

    fn select_call(
        &mut self,
        destination: Option<RegisterId>,
        symbol: &str,
        arguments: &[Operand],
    ) {
        // every argument is built before any argument register is written
        let values = arguments
            .iter()
            .map(|argument| self.operand(argument))
            .collect::<Vec<_>>();

        let in_registers = values.len().min(riscv::ARGUMENT_REGISTERS.len());
        let (register_arguments, stack_arguments) = values.split_at(in_registers);

        for (index, value) in stack_arguments.iter().enumerate() {
            self.push(Instruction::Store {
                width: Width::Word,
                rs: *value,
                base: Register::SP,
                offset: Offset::Outgoing(index as u32),
            });
        }

        self.output.frame.outgoing_arguments = self
            .output
            .frame
            .outgoing_arguments
            .max(stack_arguments.len() as u32);

        for (register, value) in riscv::ARGUMENT_REGISTERS.iter().zip(register_arguments) {
            self.push(Instruction::Move {
                rd: (*register).into(),
                rs: *value,
            });
        }

        self.push(Instruction::Call {
            symbol: symbol.to_owned(),
            arguments: in_registers,
        });
        self.output.makes_calls = true;

        if let Some(destination) = destination {
            let rd = self.value_register(destination);
            self.push(Instruction::Move {
                rd,
                rs: riscv::RETURN_REGISTER.into(),
            });
        }
    }

    fn select_terminator(&mut self, terminator: &Terminator) -> Result<()> {
        match terminator {
            Terminator::Jump { destination } => {
                let target = self.block(*destination)?;
                self.push(Instruction::Jump { target });
            }
            Terminator::Branch {
                condition,
                positive,
                negative,
            } => {
                let positive = self.block(*positive)?;
                let negative = self.block(*negative)?;

                if positive == negative {
                    self.push(Instruction::Jump { target: positive });
                } else {
                    let condition = self.operand(condition);
                    self.push(Instruction::Branch {
                        condition,
                        positive,
                        negative,
                    });
                }
            }
            Terminator::Return { value } => {
                if let Some(value) = value {
                    let rs = self.operand(value);
                    self.push(Instruction::Move {
                        rd: PhysicalRegister::A0.into(),
                        rs,
                    });
                }

                self.push(Instruction::Return {
                    value: value.is_some(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_labels_are_numbered() {
        assert_eq!(string_label(ir::StringId::new(3)), ".str.3");
    }
}
