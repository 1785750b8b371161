//! The assembly-level program: RV32IM instructions over virtual and physical
//! registers, grouped into basic blocks that mirror the IR blocks.
//!
//! Each instruction reports the registers it reads and writes. Only
//! *tracked* registers (virtual registers and allocatable physical ones) are
//! reported; `zero`, `sp`, `ra` and the other reserved registers never take
//! part in liveness or interference.

use std::collections::BTreeSet;

use hashbrown::{HashMap, HashSet};

use crate::{
    backend::riscv::{self, PhysicalRegister},
    index::{Index, IndexVec, simple_index},
    middle::ty::align_to,
};

simple_index! {
    pub struct BlockId;
}

simple_index! {
    pub struct VirtualRegister;
}

simple_index! {
    pub struct FrameSlot;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Register {
    Physical(PhysicalRegister),
    Virtual(VirtualRegister),
}

impl Register {
    pub const ZERO: Register = Register::Physical(PhysicalRegister::Zero);
    pub const SP: Register = Register::Physical(PhysicalRegister::Sp);

    pub fn is_tracked(self) -> bool {
        match self {
            Register::Physical(register) => register.is_allocatable(),
            Register::Virtual(_) => true,
        }
    }
}

impl From<PhysicalRegister> for Register {
    fn from(value: PhysicalRegister) -> Self {
        Register::Physical(value)
    }
}

impl core::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Register::Physical(register) => write!(f, "{register}"),
            Register::Virtual(register) => write!(f, "%v{}", register.index()),
        }
    }
}

/// A memory offset, resolved to bytes once the frame layout is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Offset {
    Immediate(i32),
    /// The start of a frame object, relative to `sp`
    Frame(FrameSlot),
    /// The n-th stack-passed argument of this function, in the caller's frame
    Incoming(u32),
    /// The n-th stack-passed argument of a call made by this function
    Outgoing(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    pub fn of_size(size: u32) -> Self {
        if size == 1 { Width::Byte } else { Width::Word }
    }

    pub fn load_mnemonic(self) -> &'static str {
        match self {
            Width::Byte => "lbu",
            Width::Word => "lw",
        }
    }

    pub fn store_mnemonic(self) -> &'static str {
        match self {
            Width::Byte => "sb",
            Width::Word => "sw",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ArithmeticOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Sll,
    Sra,
    And,
    Or,
    Xor,
    Slt,
    Sltu,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ImmediateOperator {
    Addi,
    Slli,
    Srai,
    Andi,
    Ori,
    Xori,
    Slti,
    Sltiu,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    LoadImmediate {
        rd: Register,
        value: i32,
    },
    LoadAddress {
        rd: Register,
        symbol: String,
    },
    Move {
        rd: Register,
        rs: Register,
    },
    Arithmetic {
        operator: ArithmeticOperator,
        rd: Register,
        rs1: Register,
        rs2: Register,
    },
    ArithmeticImmediate {
        operator: ImmediateOperator,
        rd: Register,
        rs1: Register,
        value: i32,
    },
    /// `rd = sp + offset(slot)`
    FrameAddress {
        rd: Register,
        slot: FrameSlot,
    },
    Load {
        width: Width,
        rd: Register,
        base: Register,
        offset: Offset,
    },
    Store {
        width: Width,
        rs: Register,
        base: Register,
        offset: Offset,
    },
    /// Reads the first `arguments` argument registers and clobbers every
    /// caller-saved register
    Call {
        symbol: String,
        arguments: usize,
    },
    Comment(String),
    Jump {
        target: BlockId,
    },
    /// `bnez condition, positive` followed by `j negative`
    Branch {
        condition: Register,
        positive: BlockId,
        negative: BlockId,
    },
    /// Restores the frame and returns; reads `a0` when a value is returned
    Return {
        value: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Use,
    Def,
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Instruction::Jump { .. } | Instruction::Branch { .. } | Instruction::Return { .. }
        )
    }

    fn raw_uses(&self) -> Vec<Register> {
        match self {
            Instruction::Move { rs, .. } => vec![*rs],
            Instruction::Arithmetic { rs1, rs2, .. } => vec![*rs1, *rs2],
            Instruction::ArithmeticImmediate { rs1, .. } => vec![*rs1],
            Instruction::Load { base, .. } => vec![*base],
            Instruction::Store { rs, base, .. } => vec![*rs, *base],
            Instruction::Call { arguments, .. } => riscv::ARGUMENT_REGISTERS
                [..(*arguments).min(riscv::ARGUMENT_REGISTERS.len())]
                .iter()
                .map(|r| Register::Physical(*r))
                .collect(),
            Instruction::Branch { condition, .. } => vec![*condition],
            Instruction::Return { value: true } => {
                vec![Register::Physical(riscv::RETURN_REGISTER)]
            }
            Instruction::LoadImmediate { .. }
            | Instruction::LoadAddress { .. }
            | Instruction::FrameAddress { .. }
            | Instruction::Comment(_)
            | Instruction::Jump { .. }
            | Instruction::Return { value: false } => vec![],
        }
    }

    fn raw_defs(&self) -> Vec<Register> {
        match self {
            Instruction::LoadImmediate { rd, .. }
            | Instruction::LoadAddress { rd, .. }
            | Instruction::Move { rd, .. }
            | Instruction::Arithmetic { rd, .. }
            | Instruction::ArithmeticImmediate { rd, .. }
            | Instruction::FrameAddress { rd, .. }
            | Instruction::Load { rd, .. } => vec![*rd],
            Instruction::Call { .. } => riscv::CALLER_SAVED
                .iter()
                .map(|r| Register::Physical(*r))
                .collect(),
            Instruction::Store { .. }
            | Instruction::Comment(_)
            | Instruction::Jump { .. }
            | Instruction::Branch { .. }
            | Instruction::Return { .. } => vec![],
        }
    }

    /// Tracked registers read by this instruction.
    pub fn uses(&self) -> Vec<Register> {
        let mut uses = self.raw_uses();
        uses.retain(|r| r.is_tracked());
        uses.dedup();
        uses
    }

    /// Tracked registers written by this instruction.
    pub fn defs(&self) -> Vec<Register> {
        let mut defs = self.raw_defs();
        defs.retain(|r| r.is_tracked());
        defs
    }

    /// Rewrites every explicit register operand. Implicit operands (call
    /// arguments and clobbers, the return value register) are physical and
    /// never rewritten.
    pub fn map_registers(&mut self, mut f: impl FnMut(Register, Access) -> Register) {
        match self {
            Instruction::LoadImmediate { rd, .. }
            | Instruction::LoadAddress { rd, .. }
            | Instruction::FrameAddress { rd, .. } => *rd = f(*rd, Access::Def),
            Instruction::Move { rd, rs } => {
                *rs = f(*rs, Access::Use);
                *rd = f(*rd, Access::Def);
            }
            Instruction::Arithmetic { rd, rs1, rs2, .. } => {
                *rs1 = f(*rs1, Access::Use);
                *rs2 = f(*rs2, Access::Use);
                *rd = f(*rd, Access::Def);
            }
            Instruction::ArithmeticImmediate { rd, rs1, .. } => {
                *rs1 = f(*rs1, Access::Use);
                *rd = f(*rd, Access::Def);
            }
            Instruction::Load { rd, base, .. } => {
                *base = f(*base, Access::Use);
                *rd = f(*rd, Access::Def);
            }
            Instruction::Store { rs, base, .. } => {
                *rs = f(*rs, Access::Use);
                *base = f(*base, Access::Use);
            }
            Instruction::Branch { condition, .. } => *condition = f(*condition, Access::Use),
            Instruction::Call { .. }
            | Instruction::Comment(_)
            | Instruction::Jump { .. }
            | Instruction::Return { .. } => {}
        }
    }
}

impl core::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Offset::Immediate(value) => write!(f, "{value}"),
            Offset::Frame(slot) => write!(f, "<slot{}>", slot.index()),
            Offset::Incoming(n) => write!(f, "<in{n}>"),
            Offset::Outgoing(n) => write!(f, "<out{n}>"),
        }
    }
}

/// Symbolic rendering, used for logging before the frame is laid out.
impl core::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Instruction::LoadImmediate { rd, value } => write!(f, "li {rd}, {value}"),
            Instruction::LoadAddress { rd, symbol } => write!(f, "la {rd}, {symbol}"),
            Instruction::Move { rd, rs } => write!(f, "mv {rd}, {rs}"),
            Instruction::Arithmetic {
                operator,
                rd,
                rs1,
                rs2,
            } => write!(f, "{operator} {rd}, {rs1}, {rs2}"),
            Instruction::ArithmeticImmediate {
                operator,
                rd,
                rs1,
                value,
            } => write!(f, "{operator} {rd}, {rs1}, {value}"),
            Instruction::FrameAddress { rd, slot } => {
                write!(f, "addi {rd}, sp, {}", Offset::Frame(*slot))
            }
            Instruction::Load {
                width,
                rd,
                base,
                offset,
            } => write!(f, "{} {rd}, {offset}({base})", width.load_mnemonic()),
            Instruction::Store {
                width,
                rs,
                base,
                offset,
            } => write!(f, "{} {rs}, {offset}({base})", width.store_mnemonic()),
            Instruction::Call { symbol, .. } => write!(f, "call {symbol}"),
            Instruction::Comment(text) => write!(f, "# {text}"),
            Instruction::Jump { target } => write!(f, "j <block{}>", target.index()),
            Instruction::Branch {
                condition,
                positive,
                negative,
            } => write!(
                f,
                "bnez {condition}, <block{}>; j <block{}>",
                positive.index(),
                negative.index()
            ),
            Instruction::Return { .. } => write!(f, "ret"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub predecessors: BTreeSet<BlockId>,
    pub successors: BTreeSet<BlockId>,

    /// Registers read before any write in this block
    pub use_set: HashSet<Register>,
    /// Registers written in this block
    pub def_set: HashSet<Register>,
    pub live_in: HashSet<Register>,
    pub live_out: HashSet<Register>,
}

impl Block {
    pub fn new(id: BlockId, label: String) -> Self {
        Self {
            id,
            label,
            instructions: vec![],
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            use_set: HashSet::new(),
            def_set: HashSet::new(),
            live_in: HashSet::new(),
            live_out: HashSet::new(),
        }
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.is_terminator())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameObject {
    pub size: u32,
    pub alignment: u32,
}

/// The stack frame of a function, before final layout.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub objects: IndexVec<FrameSlot, FrameObject>,
    /// Number of stack-passed arguments of the largest call
    pub outgoing_arguments: u32,
}

impl Frame {
    pub fn allocate(&mut self, size: u32, alignment: u32) -> FrameSlot {
        self.objects.push(FrameObject {
            size: size.max(1),
            alignment: alignment.max(1),
        })
    }
}

/// Byte offsets of everything in a laid out frame, from the final `sp`.
///
/// ```text
/// high  | saved registers  |
///       | frame objects    |
/// sp -> | outgoing args    |
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLayout {
    pub size: u32,
    pub object_offsets: Vec<u32>,
    pub saved_register_offsets: Vec<(PhysicalRegister, u32)>,
}

pub const STACK_ALIGNMENT: u32 = 16;

impl FrameLayout {
    pub fn compute(frame: &Frame, saved_registers: &[PhysicalRegister]) -> Self {
        let mut offset = frame.outgoing_arguments * riscv_word();

        let object_offsets = frame
            .objects
            .iter()
            .map(|object| {
                let start = align_to(offset, object.alignment);
                offset = start + object.size;
                start
            })
            .collect();

        offset = align_to(offset, riscv_word());

        let saved_register_offsets = saved_registers
            .iter()
            .map(|register| {
                let start = offset;
                offset += riscv_word();
                (*register, start)
            })
            .collect();

        Self {
            size: align_to(offset, STACK_ALIGNMENT),
            object_offsets,
            saved_register_offsets,
        }
    }

    pub fn resolve(&self, offset: Offset) -> i64 {
        match offset {
            Offset::Immediate(value) => value as i64,
            Offset::Frame(slot) => self.object_offsets[slot.index()] as i64,
            Offset::Incoming(n) => (self.size + n * riscv_word()) as i64,
            Offset::Outgoing(n) => (n * riscv_word()) as i64,
        }
    }
}

fn riscv_word() -> u32 {
    crate::middle::ty::WORD_SIZE
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub blocks: IndexVec<BlockId, Block>,
    pub entry: BlockId,
    pub exit: BlockId,
    pub frame: Frame,
    pub virtual_registers: usize,
    /// Spill temporaries; spilling them again could never make progress
    pub unspillable: HashSet<VirtualRegister>,
    /// Callee-saved registers the body writes, filled in by the allocator
    pub saved_registers: Vec<PhysicalRegister>,
    pub makes_calls: bool,
}

impl Function {
    pub fn new(name: String) -> Self {
        Self {
            name,
            blocks: IndexVec::new(),
            entry: BlockId(0),
            exit: BlockId(0),
            frame: Frame::default(),
            virtual_registers: 0,
            unspillable: HashSet::new(),
            saved_registers: vec![],
            makes_calls: false,
        }
    }

    pub fn new_virtual_register(&mut self) -> Register {
        let register = VirtualRegister::new(self.virtual_registers);
        self.virtual_registers += 1;
        Register::Virtual(register)
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.blocks.iter().flat_map(|b| b.instructions.iter())
    }

    /// Every virtual register mentioned anywhere in the function.
    pub fn virtual_registers_in_use(&self) -> BTreeSet<VirtualRegister> {
        self.instructions()
            .flat_map(|i| i.uses().into_iter().chain(i.defs()))
            .filter_map(|r| match r {
                Register::Virtual(v) => Some(v),
                Register::Physical(_) => None,
            })
            .collect()
    }

    /// Registers that still need to be written to the frame by the prologue.
    pub fn frame_saved_registers(&self) -> Vec<PhysicalRegister> {
        let mut registers = self.saved_registers.clone();

        if self.makes_calls {
            registers.insert(0, PhysicalRegister::Ra);
        }

        registers
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    Word(i32),
    Byte(u8),
    Address(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    pub label: String,
    pub value: DataValue,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    /// `(label, contents)` of every string constant
    pub strings: Vec<(String, String)>,
    pub globals: Vec<DataItem>,
    pub functions: Vec<Function>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}

/// Counts how often each virtual register is mentioned; the allocator spills
/// the least used ones first.
pub fn occurrence_counts(function: &Function) -> HashMap<VirtualRegister, usize> {
    let mut counts = HashMap::new();

    for instruction in function.instructions() {
        for register in instruction.uses().into_iter().chain(instruction.defs()) {
            if let Register::Virtual(v) = register {
                *counts.entry(v).or_insert(0) += 1;
            }
        }
    }

    counts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_clobber_caller_saved_registers_only() {
        let call = Instruction::Call {
            symbol: "f".to_owned(),
            arguments: 2,
        };

        let defs = call.defs();
        assert!(defs.contains(&Register::Physical(PhysicalRegister::T0)));
        assert!(defs.contains(&Register::Physical(PhysicalRegister::A0)));
        assert!(!defs.contains(&Register::Physical(PhysicalRegister::S0)));
        // ra is reserved, so it is not tracked
        assert!(!defs.contains(&Register::Physical(PhysicalRegister::Ra)));

        assert_eq!(
            call.uses(),
            vec![
                Register::Physical(PhysicalRegister::A0),
                Register::Physical(PhysicalRegister::A1)
            ]
        );
    }

    #[test]
    fn reserved_registers_are_invisible_to_liveness() {
        let store = Instruction::Store {
            width: Width::Word,
            rs: Register::ZERO,
            base: Register::SP,
            offset: Offset::Immediate(0),
        };

        assert!(store.uses().is_empty());
        assert!(store.defs().is_empty());
    }

    #[test]
    fn frame_layout_places_saved_registers_on_top() {
        let mut frame = Frame::default();
        let byte = frame.allocate(1, 1);
        let word = frame.allocate(4, 4);
        frame.outgoing_arguments = 2;

        let layout = FrameLayout::compute(&frame, &[PhysicalRegister::Ra, PhysicalRegister::S0]);

        assert_eq!(layout.resolve(Offset::Frame(byte)), 8);
        assert_eq!(layout.resolve(Offset::Frame(word)), 12);
        assert_eq!(
            layout.saved_register_offsets,
            vec![(PhysicalRegister::Ra, 16), (PhysicalRegister::S0, 20)]
        );
        assert_eq!(layout.size, 32);
        assert_eq!(layout.resolve(Offset::Incoming(1)), 36);
        assert_eq!(layout.resolve(Offset::Outgoing(1)), 4);
    }
}
