//! The block-structured intermediate representation.
//!
//! Variables live in stack cells (`alloca`) and are accessed through explicit
//! loads and stores, so no phi nodes are needed. Every function has a single
//! exit block that returns the value stored in its return cell.

use std::collections::{BTreeSet, VecDeque};

use hashbrown::{HashMap, HashSet};

use crate::{
    frontend::intern::InternedSymbol,
    index::{IndexVec, simple_index},
    middle::ty::{StructType, Type},
};

pub mod pretty_print;
pub mod verify;

simple_index! {
    pub struct BlockId;
}

simple_index! {
    pub struct RegisterId;
}

simple_index! {
    pub struct StringId;
}

#[derive(Debug, Default)]
pub struct Program {
    pub structs: Vec<StructType>,
    pub strings: StringPool,
    pub globals: Vec<GlobalVariable>,
    /// Runs the non-constant global initializers. Elided when there are none.
    pub initializer: Option<Function>,
    pub functions: Vec<Function>,
}

impl Program {
    pub fn struct_type(&self, name: InternedSymbol) -> Option<&StructType> {
        self.structs.iter().find(|s| s.name == name)
    }

    /// The initializer (if any) followed by the user functions in declaration order.
    pub fn all_functions(&self) -> impl Iterator<Item = &Function> {
        self.initializer.iter().chain(self.functions.iter())
    }

    pub fn function(&self, name: InternedSymbol) -> Option<&Function> {
        self.all_functions().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone)]
pub struct GlobalVariable {
    pub name: InternedSymbol,
    pub ty: Type,
    /// Either a constant or a string address
    pub initial: Operand,
}

/// Deduplicated string constants.
#[derive(Debug, Default)]
pub struct StringPool {
    values: IndexVec<StringId, String>,
    lookup: HashMap<String, StringId>,
}

impl StringPool {
    pub fn intern(&mut self, value: &str) -> StringId {
        if let Some(id) = self.lookup.get(value) {
            return *id;
        }

        let id = self.values.push(value.to_owned());
        self.lookup.insert(value.to_owned(), id);
        id
    }

    pub fn get(&self, id: StringId) -> &str {
        &self.values[id]
    }

    pub fn iter(&self) -> impl Iterator<Item = (StringId, &str)> {
        self.values.enumerate().map(|(id, s)| (id, s.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Register {
    pub id: RegisterId,
    pub ty: Type,
    /// Source-level name, only used when printing
    pub name: Option<InternedSymbol>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: InternedSymbol,
    pub return_type: Type,
    pub parameters: Vec<RegisterId>,
    pub registers: IndexVec<RegisterId, Register>,
    /// Every `Instruction::Alloca` of the function, hoisted out of the blocks
    pub allocas: Vec<Instruction>,
    pub blocks: IndexVec<BlockId, Block>,
    /// Blocks in emission order. Blocks not listed here are dead.
    pub layout: Vec<BlockId>,
    pub entry: BlockId,
    pub exit: BlockId,
}

impl Function {
    pub fn new(name: InternedSymbol, return_type: Type) -> Self {
        Self {
            name,
            return_type,
            parameters: vec![],
            registers: IndexVec::new(),
            allocas: vec![],
            blocks: IndexVec::new(),
            layout: vec![],
            entry: BlockId(0),
            exit: BlockId(0),
        }
    }

    pub fn ordered_blocks(&self) -> impl Iterator<Item = &Block> {
        self.layout.iter().map(|id| &self.blocks[*id])
    }

    pub fn register_type(&self, register: RegisterId) -> &Type {
        &self.registers[register].ty
    }

    pub fn is_alloca(&self, register: RegisterId) -> bool {
        self.allocas.iter().any(|a| a.destination() == Some(register))
    }

    pub fn operand_type(&self, operand: &Operand) -> Type {
        match operand {
            Operand::Register(register) => self.register_type(*register).clone(),
            Operand::Constant(constant) => constant.ty(),
            Operand::String(_) => Type::StringPtr,
            // the global's value type is not known here; only its address is
            Operand::Global(_) => Type::Pointer {
                base: Box::new(Type::Void),
                depth: 1,
            },
        }
    }

    /// Recomputes predecessor and successor sets of all laid out blocks from
    /// their terminators.
    pub fn rebuild_edges(&mut self) {
        for block in self.blocks.iter_mut() {
            block.predecessors.clear();
            block.successors.clear();
        }

        for index in 0..self.layout.len() {
            let id = self.layout[index];
            let successors = self.blocks[id]
                .terminator
                .as_ref()
                .map(Terminator::successors)
                .unwrap_or_default();

            for successor in successors {
                self.blocks[id].successors.insert(successor);
                self.blocks[successor].predecessors.insert(id);
            }
        }
    }

    /// Drops every block that cannot be reached from the entry block. The
    /// exit block is always kept so the function keeps a single exit.
    pub fn prune_unreachable_blocks(&mut self) {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from([self.entry]);

        while let Some(id) = queue.pop_front() {
            if !reachable.insert(id) {
                continue;
            }

            if let Some(terminator) = &self.blocks[id].terminator {
                queue.extend(terminator.successors());
            }
        }

        let before = self.layout.len();
        let exit = self.exit;

        self.layout.retain(|id| reachable.contains(id) || *id == exit);

        if self.layout.len() != before {
            log::trace!(
                "pruned {} unreachable blocks from `{}`",
                before - self.layout.len(),
                self.name
            );
        }

        self.rebuild_edges();
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub id: BlockId,
    pub label: String,
    pub instructions: Vec<Instruction>,
    pub terminator: Option<Terminator>,
    pub predecessors: BTreeSet<BlockId>,
    pub successors: BTreeSet<BlockId>,
    /// Set once control has definitely left the block. Nothing can be added afterwards.
    pub finished: bool,
}

impl Block {
    /// Creates a block, optionally with a provisional terminator that a later
    /// `terminate` call will replace.
    pub fn new(id: BlockId, label: String, terminator: Option<Terminator>) -> Self {
        Self {
            id,
            label,
            instructions: vec![],
            terminator,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            finished: false,
        }
    }

    /// Appends `instruction` unless the block is finished, in which case the
    /// instruction is dead and silently dropped.
    pub fn push(&mut self, instruction: Instruction) -> bool {
        if self.finished {
            log::trace!("dropping dead instruction in `{}`: {instruction:?}", self.label);
            return false;
        }

        self.instructions.push(instruction);
        true
    }

    pub fn terminate(&mut self, terminator: Terminator) -> bool {
        if self.finished {
            log::trace!("dropping dead terminator in `{}`: {terminator:?}", self.label);
            return false;
        }

        self.terminator = Some(terminator);
        self.finished = true;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    Shl,
    AShr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Condition {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Int(i32),
    Bool(bool),
    Cond(bool),
    Null,
}

impl Constant {
    pub fn ty(self) -> Type {
        match self {
            Constant::Int(_) => Type::Int,
            Constant::Bool(_) => Type::Bool,
            Constant::Cond(_) => Type::Cond,
            Constant::Null => Type::Pointer {
                base: Box::new(Type::Void),
                depth: 1,
            },
        }
    }

    /// The constant as a machine word.
    pub fn bits(self) -> i32 {
        match self {
            Constant::Int(value) => value,
            Constant::Bool(value) | Constant::Cond(value) => value as i32,
            Constant::Null => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(RegisterId),
    Constant(Constant),
    /// The address of a global variable
    Global(InternedSymbol),
    /// The address of a pooled string constant
    String(StringId),
}

impl From<RegisterId> for Operand {
    fn from(value: RegisterId) -> Self {
        Operand::Register(value)
    }
}

impl From<Constant> for Operand {
    fn from(value: Constant) -> Self {
        Operand::Constant(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// Reserves a stack cell holding one `ty`; `destination` is its address
    Alloca {
        destination: RegisterId,
        ty: Type,
    },
    Load {
        destination: RegisterId,
        address: Operand,
    },
    Store {
        value: Operand,
        address: Operand,
    },
    Binary {
        operator: BinaryOperator,
        destination: RegisterId,
        lhs: Operand,
        rhs: Operand,
    },
    Compare {
        condition: Condition,
        destination: RegisterId,
        lhs: Operand,
        rhs: Operand,
    },
    /// Condition form to storage form
    ZeroExtend {
        destination: RegisterId,
        value: Operand,
    },
    /// Storage form to condition form
    Truncate {
        destination: RegisterId,
        value: Operand,
    },
    BitCast {
        destination: RegisterId,
        value: Operand,
    },
    GetArrayElementPointer {
        destination: RegisterId,
        base: Operand,
        element: Type,
        index: Operand,
    },
    GetStructElementPointer {
        destination: RegisterId,
        base: Operand,
        structure: InternedSymbol,
        field: usize,
    },
    Call {
        destination: Option<RegisterId>,
        function: InternedSymbol,
        arguments: Vec<Operand>,
    },
}

impl Instruction {
    pub fn destination(&self) -> Option<RegisterId> {
        match self {
            Instruction::Alloca { destination, .. }
            | Instruction::Load { destination, .. }
            | Instruction::Binary { destination, .. }
            | Instruction::Compare { destination, .. }
            | Instruction::ZeroExtend { destination, .. }
            | Instruction::Truncate { destination, .. }
            | Instruction::BitCast { destination, .. }
            | Instruction::GetArrayElementPointer { destination, .. }
            | Instruction::GetStructElementPointer { destination, .. } => Some(*destination),
            Instruction::Call { destination, .. } => *destination,
            Instruction::Store { .. } => None,
        }
    }

    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Instruction::Alloca { .. } => vec![],
            Instruction::Load { address, .. } => vec![*address],
            Instruction::Store { value, address } => vec![*value, *address],
            Instruction::Binary { lhs, rhs, .. } | Instruction::Compare { lhs, rhs, .. } => {
                vec![*lhs, *rhs]
            }
            Instruction::ZeroExtend { value, .. }
            | Instruction::Truncate { value, .. }
            | Instruction::BitCast { value, .. } => vec![*value],
            Instruction::GetArrayElementPointer { base, index, .. } => vec![*base, *index],
            Instruction::GetStructElementPointer { base, .. } => vec![*base],
            Instruction::Call { arguments, .. } => arguments.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Jump {
        destination: BlockId,
    },
    Branch {
        condition: Operand,
        positive: BlockId,
        negative: BlockId,
    },
    Return {
        value: Option<Operand>,
    },
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump { destination } => vec![*destination],
            Terminator::Branch {
                positive, negative, ..
            } if positive == negative => vec![*positive],
            Terminator::Branch {
                positive, negative, ..
            } => vec![*positive, *negative],
            Terminator::Return { .. } => vec![],
        }
    }
}
