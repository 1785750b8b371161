//! Prints an allocated assembly module as GNU `as` input for RV32IM.

use itertools::Itertools;

use crate::{
    backend::{
        asm::{self, DataValue, FrameLayout, Instruction, Offset, Register},
        riscv,
    },
    index::Index,
};

pub fn emit_module(module: &asm::Module) -> String {
    let functions = module.functions.iter().map(emit_function).join("\n");

    let strings = module
        .strings
        .iter()
        .map(|(label, value)| format!("{label}:\n    .asciz {}", format_asm_string(value)))
        .join("\n");

    let globals = module
        .globals
        .iter()
        .map(|item| match &item.value {
            DataValue::Word(value) => {
                format!("    .p2align 2\n{}:\n    .word {value}", item.label)
            }
            DataValue::Address(target) => {
                format!("    .p2align 2\n{}:\n    .word {target}", item.label)
            }
            DataValue::Byte(value) => format!("{}:\n    .byte {value}", item.label),
        })
        .join("\n");

    format!(
        indoc::indoc! {r#"
            # generated code
            .section .rodata

            {0}

            .data

            {1}

            .text

            {2}"#},
        strings, globals, functions
    )
}

/// Quotes `string` for `.asciz`, escaping everything that is not printable ASCII.
pub fn format_asm_string(string: &str) -> String {
    let mut output = String::with_capacity(string.len() + 2);
    output.push('"');

    for byte in string.bytes() {
        match byte {
            b'"' => output.push_str("\\\""),
            b'\\' => output.push_str("\\\\"),
            b'\n' => output.push_str("\\n"),
            b'\t' => output.push_str("\\t"),
            b'\r' => output.push_str("\\r"),
            0x20..=0x7e => output.push(byte as char),
            other => output.push_str(&format!("\\{other:03o}")),
        }
    }

    output.push('"');
    output
}

fn block_label(function: &asm::Function, block: asm::BlockId) -> String {
    format!(".{}", function.blocks[block].label)
}

fn emit_function(function: &asm::Function) -> String {
    let layout = FrameLayout::compute(&function.frame, &function.frame_saved_registers());
    let mut assembler = Assembler::new(function, &layout);

    assembler.global_label(&function.name);
    assembler.function_prologue();

    for (index, block) in function.blocks.enumerate() {
        assembler.label(block_label(function, index));

        let next = function.blocks.get(index.plus(1)).map(|b| b.id);

        for instruction in &block.instructions {
            assembler.instruction(instruction, next);
        }
    }

    assembler.into_output()
}

struct Assembler<'a> {
    output: String,
    function: &'a asm::Function,
    layout: &'a FrameLayout,
}

impl<'a> Assembler<'a> {
    fn new(function: &'a asm::Function, layout: &'a FrameLayout) -> Self {
        Self {
            output: String::new(),
            function,
            layout,
        }
    }

    fn into_output(self) -> String {
        self.output
    }

    fn push_line(&mut self, string: impl AsRef<str>) {
        self.output.push_str(string.as_ref());
        self.output.push('\n');
    }

    fn emit(&mut self, string: impl AsRef<str>) {
        self.output.push_str("    ");
        self.push_line(string);
    }

    fn global_label(&mut self, name: &str) {
        self.emit(format!(".globl {name}"));
        self.emit(".p2align 2");
        self.push_line(format!("{name}:"));
    }

    fn label(&mut self, name: impl AsRef<str>) {
        self.push_line(format!("{}:", name.as_ref()));
    }

    fn comment(&mut self, comment: impl AsRef<str>) {
        self.emit(format!("# {}", comment.as_ref()));
    }

    /// `mnemonic register, offset(base)`, going through the scratch register
    /// when the offset does not fit an immediate.
    fn memory(&mut self, mnemonic: &str, register: Register, base: Register, offset: i64) {
        if riscv::fits_immediate(offset) {
            self.emit(format!("{mnemonic} {register}, {offset}({base})"));
        } else {
            let scratch = riscv::SCRATCH;
            self.emit(format!("li {scratch}, {offset}"));
            self.emit(format!("add {scratch}, {scratch}, {base}"));
            self.emit(format!("{mnemonic} {register}, 0({scratch})"));
        }
    }

    /// `sp += amount`
    fn adjust_stack(&mut self, amount: i64) {
        if riscv::fits_immediate(amount) {
            self.emit(format!("addi sp, sp, {amount}"));
        } else {
            let scratch = riscv::SCRATCH;
            self.emit(format!("li {scratch}, {amount}"));
            self.emit(format!("add sp, sp, {scratch}"));
        }
    }

    fn function_prologue(&mut self) {
        if self.layout.size == 0 {
            return;
        }

        self.adjust_stack(-(self.layout.size as i64));

        for (register, offset) in self.layout.saved_register_offsets.clone() {
            self.memory("sw", register.into(), Register::SP, offset as i64);
        }
    }

    fn function_epilogue(&mut self) {
        if self.layout.size != 0 {
            for (register, offset) in self.layout.saved_register_offsets.clone() {
                self.memory("lw", register.into(), Register::SP, offset as i64);
            }

            self.adjust_stack(self.layout.size as i64);
        }

        self.emit("ret");
    }

    fn instruction(&mut self, instruction: &Instruction, next: Option<asm::BlockId>) {
        match instruction {
            Instruction::LoadImmediate { rd, value } => self.emit(format!("li {rd}, {value}")),
            Instruction::LoadAddress { rd, symbol } => self.emit(format!("la {rd}, {symbol}")),
            Instruction::Move { rd, rs } => self.emit(format!("mv {rd}, {rs}")),
            Instruction::Arithmetic {
                operator,
                rd,
                rs1,
                rs2,
            } => self.emit(format!("{operator} {rd}, {rs1}, {rs2}")),
            Instruction::ArithmeticImmediate {
                operator,
                rd,
                rs1,
                value,
            } => self.emit(format!("{operator} {rd}, {rs1}, {value}")),
            Instruction::FrameAddress { rd, slot } => {
                let offset = self.layout.resolve(Offset::Frame(*slot));

                if riscv::fits_immediate(offset) {
                    self.emit(format!("addi {rd}, sp, {offset}"));
                } else {
                    self.emit(format!("li {}, {offset}", riscv::SCRATCH));
                    self.emit(format!("add {rd}, sp, {}", riscv::SCRATCH));
                }
            }
            Instruction::Load {
                width,
                rd,
                base,
                offset,
            } => {
                let offset = self.layout.resolve(*offset);
                self.memory(width.load_mnemonic(), *rd, *base, offset);
            }
            Instruction::Store {
                width,
                rs,
                base,
                offset,
            } => {
                let offset = self.layout.resolve(*offset);
                self.memory(width.store_mnemonic(), *rs, *base, offset);
            }
            Instruction::Call { symbol, .. } => self.emit(format!("call {symbol}")),
            Instruction::Comment(text) => self.comment(text),
            Instruction::Jump { target } => {
                if next != Some(*target) {
                    self.emit(format!("j {}", block_label(self.function, *target)));
                }
            }
            Instruction::Branch {
                condition,
                positive,
                negative,
            } => {
                if next == Some(*positive) {
                    self.emit(format!(
                        "beqz {condition}, {}",
                        block_label(self.function, *negative)
                    ));
                } else {
                    self.emit(format!(
                        "bnez {condition}, {}",
                        block_label(self.function, *positive)
                    ));

                    if next != Some(*negative) {
                        self.emit(format!("j {}", block_label(self.function, *negative)));
                    }
                }
            }
            Instruction::Return { .. } => self.function_epilogue(),
        }
    }
}
