//! IR types and the memory layout of RV32 values and structs.

use crate::{
    frontend::{
        ast::{BaseType, SemanticType},
        intern::InternedSymbol,
    },
    middle::ir::Constant,
};

/// Size in bytes of an `int` and of every pointer.
pub const WORD_SIZE: u32 = 4;

/// Arrays carry their element count in one word right before the data.
pub const ARRAY_HEADER_SIZE: u32 = WORD_SIZE;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Int,
    /// Storage form of a boolean: one byte holding 0 or 1
    Bool,
    /// Condition form of a boolean: a single bit, never stored to memory
    Cond,
    /// A pointer to raw bytes. Strings and `malloc` results have this type.
    StringPtr,
    Void,
    StructPtr(InternedSymbol),
    /// `depth` levels of indirection to `base`. `base` is never a `Pointer`.
    Pointer {
        base: Box<Type>,
        depth: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u32,
    pub alignment: u32,
}

pub fn align_to(offset: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return offset;
    }

    offset.div_ceil(alignment) * alignment
}

impl Type {
    pub fn pointer_to(&self) -> Type {
        match self {
            Type::Pointer { base, depth } => Type::Pointer {
                base: base.clone(),
                depth: depth + 1,
            },
            other => Type::Pointer {
                base: Box::new(other.clone()),
                depth: 1,
            },
        }
    }

    /// The type obtained by dereferencing `self` once, if `self` is a typed pointer.
    pub fn pointee(&self) -> Option<Type> {
        match self {
            Type::Pointer { base, depth: 1 } => Some(base.as_ref().clone()),
            Type::Pointer { base, depth } => Some(Type::Pointer {
                base: base.clone(),
                depth: depth - 1,
            }),
            _ => None,
        }
    }

    pub fn layout(&self) -> Layout {
        let size = match self {
            Type::Void => 0,
            Type::Bool | Type::Cond => 1,
            Type::Int | Type::StringPtr | Type::StructPtr(_) | Type::Pointer { .. } => WORD_SIZE,
        };

        Layout {
            size,
            alignment: size.max(1),
        }
    }

    pub fn size(&self) -> u32 {
        self.layout().size
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            Type::StringPtr | Type::StructPtr(_) | Type::Pointer { .. }
        )
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Type::Bool | Type::Cond)
    }

    /// The value a variable of this type holds before anything is assigned to it.
    pub fn zero(&self) -> Constant {
        match self {
            Type::Int | Type::Void => Constant::Int(0),
            Type::Bool => Constant::Bool(false),
            Type::Cond => Constant::Cond(false),
            Type::StringPtr | Type::StructPtr(_) | Type::Pointer { .. } => Constant::Null,
        }
    }

    /// Maps a front-end type onto its IR representation. Booleans map to their
    /// storage form since this is used for variables, parameters and fields.
    pub fn lower(ty: &SemanticType) -> Type {
        let scalar = match ty.base {
            BaseType::Int => Type::Int,
            BaseType::Bool => Type::Bool,
            BaseType::String => Type::StringPtr,
            BaseType::Void => Type::Void,
            BaseType::Null => Type::Pointer {
                base: Box::new(Type::Void),
                depth: 1,
            },
            BaseType::Class(name) => Type::StructPtr(name),
        };

        (0..ty.dimensions).fold(scalar, |ty, _| ty.pointer_to())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub name: InternedSymbol,
    pub ty: Type,
    pub offset: u32,
}

/// The memory layout of a class. Built once, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructType {
    pub name: InternedSymbol,
    pub members: Vec<StructMember>,
    pub size: u32,
    pub has_constructor: bool,
}

impl StructType {
    /// Lays out `members` sequentially in declaration order, each naturally aligned.
    pub fn new(
        name: InternedSymbol,
        members: impl IntoIterator<Item = (InternedSymbol, Type)>,
        has_constructor: bool,
    ) -> Self {
        let mut offset = 0;

        let members = members
            .into_iter()
            .map(|(name, ty)| {
                let layout = ty.layout();
                let member_offset = align_to(offset, layout.alignment);

                offset = member_offset + layout.size;

                StructMember {
                    name,
                    ty,
                    offset: member_offset,
                }
            })
            .collect();

        Self {
            name,
            members,
            size: align_to(offset, WORD_SIZE),
            has_constructor,
        }
    }

    pub fn member(&self, name: InternedSymbol) -> Option<(usize, &StructMember)> {
        self.members.iter().enumerate().find(|(_, m)| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sym(s: &str) -> InternedSymbol {
        InternedSymbol::new(s)
    }

    #[test]
    fn members_are_naturally_aligned() {
        let layout = StructType::new(
            sym("Node"),
            [
                (sym("flag"), Type::Bool),
                (sym("value"), Type::Int),
                (sym("other"), Type::Bool),
                (sym("next"), Type::StructPtr(sym("Node"))),
            ],
            false,
        );

        let offsets = layout.members.iter().map(|m| m.offset).collect::<Vec<_>>();
        assert_eq!(offsets, [0, 4, 8, 12]);
        assert_eq!(layout.size, 16);
        assert_eq!(layout.member(sym("next")).map(|(i, _)| i), Some(3));
        assert!(layout.member(sym("missing")).is_none());
    }

    #[test]
    fn trailing_bytes_round_up_to_a_word() {
        let layout = StructType::new(
            sym("Flags"),
            [(sym("a"), Type::Bool), (sym("b"), Type::Bool)],
            true,
        );

        assert_eq!(layout.members[1].offset, 1);
        assert_eq!(layout.size, WORD_SIZE);
        assert!(layout.has_constructor);
    }

    #[test]
    fn pointer_depth_accumulates() {
        let matrix = Type::lower(&SemanticType::int().array_of(2));

        assert_eq!(
            matrix,
            Type::Pointer {
                base: Box::new(Type::Int),
                depth: 2
            }
        );
        assert_eq!(matrix.pointee(), Some(Type::Int.pointer_to()));
        assert_eq!(matrix.pointee().and_then(|t| t.pointee()), Some(Type::Int));
        assert_eq!(Type::Int.pointee(), None);
    }
}
