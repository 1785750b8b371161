//! An RV32IM simulator for allocated machine code.
//!
//! It runs an `asm::Module` after register allocation, laying every frame out
//! the way the emitter does. Calls clobber every caller-saved register, and
//! returning from a function asserts that `sp` and the callee-saved registers
//! hold what they held on entry.

use hashbrown::HashMap;
use mxc::backend::{
    asm::{
        self, ArithmeticOperator, DataValue, FrameLayout, ImmediateOperator, Instruction, Offset,
        Register, Width,
    },
    riscv::{self, PhysicalRegister},
};

use super::runtime::Runtime;

const STACK_SIZE: u32 = 1 << 20;
const STEP_LIMIT: usize = 5_000_000;

/// Written into caller-saved registers after every call
const CLOBBERED: i32 = 0x5a5a_5a5a;

pub struct Machine<'m> {
    module: &'m asm::Module,
    registers: HashMap<PhysicalRegister, i32>,
    symbols: HashMap<String, i32>,
    steps: usize,

    pub runtime: Runtime,
}

impl<'m> Machine<'m> {
    pub fn new(module: &'m asm::Module) -> Self {
        let mut machine = Self {
            module,
            registers: HashMap::new(),
            symbols: HashMap::new(),
            steps: 0,
            runtime: Runtime::new(),
        };

        for (label, value) in &module.strings {
            let address = machine.runtime.allocate_string(value);
            machine.symbols.insert(label.clone(), address);
        }

        for item in &module.globals {
            let (size, value) = match &item.value {
                DataValue::Word(value) => (4, *value),
                DataValue::Byte(value) => (1, *value as i32),
                DataValue::Address(label) => (4, machine.symbols[label]),
            };

            let address = machine.runtime.allocate(size);
            machine.runtime.write(address, size, value);
            machine.symbols.insert(item.label.clone(), address);
        }

        let stack = machine.runtime.allocate(STACK_SIZE);
        let top = (stack + STACK_SIZE as i32) & !(asm::STACK_ALIGNMENT as i32 - 1);
        machine.set(PhysicalRegister::Sp, top);

        machine
    }

    /// Runs `main` and returns its exit code.
    pub fn run_main(&mut self) -> i32 {
        self.call("main", 0)
    }

    fn get(&self, register: impl Into<Register>) -> i32 {
        match register.into() {
            Register::Physical(PhysicalRegister::Zero) => 0,
            Register::Physical(register) => self.registers.get(&register).copied().unwrap_or(0),
            virtual_register => panic!("{virtual_register} survived register allocation"),
        }
    }

    fn set(&mut self, register: impl Into<Register>, value: i32) {
        match register.into() {
            Register::Physical(PhysicalRegister::Zero) => {}
            Register::Physical(register) => {
                self.registers.insert(register, value);
            }
            virtual_register => panic!("{virtual_register} survived register allocation"),
        }
    }

    fn call(&mut self, symbol: &str, arguments: usize) -> i32 {
        self.runtime.calls.push(symbol.to_owned());

        let module = self.module;
        match module.function(symbol) {
            Some(function) => self.execute(function),
            None => {
                let values = riscv::ARGUMENT_REGISTERS[..arguments]
                    .iter()
                    .map(|register| self.get(*register))
                    .collect::<Vec<_>>();

                let result = self.runtime.builtin(symbol, &values);
                self.set(riscv::RETURN_REGISTER, result);
            }
        }

        for register in riscv::CALLER_SAVED {
            if register != riscv::RETURN_REGISTER {
                self.set(register, CLOBBERED);
            }
        }

        self.get(riscv::RETURN_REGISTER)
    }

    fn execute(&mut self, function: &'m asm::Function) {
        let layout = FrameLayout::compute(&function.frame, &function.frame_saved_registers());
        let preserved = riscv::CALLEE_SAVED.map(|register| self.get(register));
        let entry_sp = self.get(Register::SP);

        /* Prologue */

        let sp = entry_sp - layout.size as i32;
        self.set(Register::SP, sp);

        for (register, offset) in &layout.saved_register_offsets {
            let value = self.get(*register);
            self.runtime.write(sp + *offset as i32, 4, value);
        }

        let mut block = &function.blocks[function.entry];

        loop {
            let mut next = None;

            for instruction in &block.instructions {
                self.steps += 1;
                assert!(self.steps < STEP_LIMIT, "step limit exceeded");

                match instruction {
                    Instruction::Jump { target } => {
                        next = Some(*target);
                        break;
                    }
                    Instruction::Branch {
                        condition,
                        positive,
                        negative,
                    } => {
                        next = Some(if self.get(*condition) != 0 {
                            *positive
                        } else {
                            *negative
                        });
                        break;
                    }
                    Instruction::Return { .. } => {
                        self.epilogue(&layout);

                        assert_eq!(
                            self.get(Register::SP),
                            entry_sp,
                            "`{}` does not restore sp",
                            function.name
                        );
                        for (register, before) in riscv::CALLEE_SAVED.iter().zip(preserved) {
                            assert_eq!(
                                self.get(*register),
                                before,
                                "`{}` does not preserve {register}",
                                function.name
                            );
                        }

                        return;
                    }
                    other => self.instruction(&layout, other),
                }
            }

            let target = next.unwrap_or_else(|| {
                panic!(
                    "block `{}` of `{}` falls off its end",
                    block.label, function.name
                )
            });
            block = &function.blocks[target];
        }
    }

    fn epilogue(&mut self, layout: &FrameLayout) {
        let sp = self.get(Register::SP);

        for (register, offset) in &layout.saved_register_offsets {
            let value = self.runtime.read(sp + *offset as i32, 4);
            self.set(*register, value);
        }

        self.set(Register::SP, sp + layout.size as i32);
    }

    fn address(&self, layout: &FrameLayout, base: Register, offset: Offset) -> i32 {
        self.get(base) + layout.resolve(offset) as i32
    }

    fn instruction(&mut self, layout: &FrameLayout, instruction: &Instruction) {
        match instruction {
            Instruction::LoadImmediate { rd, value } => self.set(*rd, *value),
            Instruction::LoadAddress { rd, symbol } => {
                let address = *self
                    .symbols
                    .get(symbol)
                    .unwrap_or_else(|| panic!("unknown symbol `{symbol}`"));
                self.set(*rd, address);
            }
            Instruction::Move { rd, rs } => {
                let value = self.get(*rs);
                self.set(*rd, value);
            }
            Instruction::Arithmetic {
                operator,
                rd,
                rs1,
                rs2,
            } => {
                let value = arithmetic(*operator, self.get(*rs1), self.get(*rs2));
                self.set(*rd, value);
            }
            Instruction::ArithmeticImmediate {
                operator,
                rd,
                rs1,
                value,
            } => {
                let value = immediate(*operator, self.get(*rs1), *value);
                self.set(*rd, value);
            }
            Instruction::FrameAddress { rd, slot } => {
                let address = self.address(layout, Register::SP, Offset::Frame(*slot));
                self.set(*rd, address);
            }
            Instruction::Load {
                width,
                rd,
                base,
                offset,
            } => {
                let address = self.address(layout, *base, *offset);
                let value = self.runtime.read(address, size(*width));
                self.set(*rd, value);
            }
            Instruction::Store {
                width,
                rs,
                base,
                offset,
            } => {
                let address = self.address(layout, *base, *offset);
                let value = self.get(*rs);
                self.runtime.write(address, size(*width), value);
            }
            Instruction::Call { symbol, arguments } => {
                self.call(symbol, *arguments);
            }
            Instruction::Comment(_) => {}
            Instruction::Jump { .. } | Instruction::Branch { .. } | Instruction::Return { .. } => {
                unreachable!("terminators end the block walk")
            }
        }
    }
}

fn size(width: Width) -> u32 {
    match width {
        Width::Byte => 1,
        Width::Word => 4,
    }
}

fn arithmetic(operator: ArithmeticOperator, a: i32, b: i32) -> i32 {
    match operator {
        ArithmeticOperator::Add => a.wrapping_add(b),
        ArithmeticOperator::Sub => a.wrapping_sub(b),
        ArithmeticOperator::Mul => a.wrapping_mul(b),
        ArithmeticOperator::Div if b == 0 => -1,
        ArithmeticOperator::Div => a.wrapping_div(b),
        ArithmeticOperator::Rem if b == 0 => a,
        ArithmeticOperator::Rem => a.wrapping_rem(b),
        ArithmeticOperator::Sll => a.wrapping_shl(b as u32 & 31),
        ArithmeticOperator::Sra => a.wrapping_shr(b as u32 & 31),
        ArithmeticOperator::And => a & b,
        ArithmeticOperator::Or => a | b,
        ArithmeticOperator::Xor => a ^ b,
        ArithmeticOperator::Slt => (a < b) as i32,
        ArithmeticOperator::Sltu => ((a as u32) < (b as u32)) as i32,
    }
}

fn immediate(operator: ImmediateOperator, a: i32, value: i32) -> i32 {
    match operator {
        ImmediateOperator::Addi => a.wrapping_add(value),
        ImmediateOperator::Slli => a.wrapping_shl(value as u32 & 31),
        ImmediateOperator::Srai => a.wrapping_shr(value as u32 & 31),
        ImmediateOperator::Andi => a & value,
        ImmediateOperator::Ori => a | value,
        ImmediateOperator::Xori => a ^ value,
        ImmediateOperator::Slti => (a < value) as i32,
        ImmediateOperator::Sltiu => ((a as u32) < (value as u32)) as i32,
    }
}
