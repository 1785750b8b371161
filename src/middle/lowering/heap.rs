//! Heap allocation (`new`) and the runtime-backed string operations.

use crate::{
    error::{InternalError, Result},
    frontend::{
        ast::{Expression, SemanticType},
        intern::InternedSymbol,
    },
    middle::{
        ir::{BinaryOperator, Condition, Constant, Operand, Terminator},
        lowering::{BodyLoweringContext, expressions::Lowered},
        runtime,
        ty::{ARRAY_HEADER_SIZE, Type, WORD_SIZE},
    },
};

impl BodyLoweringContext<'_> {
    pub(super) fn lower_new(
        &mut self,
        ty: &SemanticType,
        dimensions: &[Expression],
    ) -> Result<Lowered> {
        if !ty.is_array() {
            let class = ty.class_name().ok_or_else(|| {
                InternalError::MalformedExpression(format!("`new` of non-class type {ty:?}"))
            })?;

            return Ok(Lowered::Value(self.allocate_object(class)?));
        }

        // every dimension is evaluated exactly once, before anything is allocated
        let counts = dimensions
            .iter()
            .map(|dimension| self.lower_value(dimension))
            .collect::<Result<Vec<_>>>()?;

        Ok(Lowered::Value(
            self.allocate_array(&Type::lower(ty), &counts)?,
        ))
    }

    fn allocate_object(&mut self, class: InternedSymbol) -> Result<Operand> {
        let layout = self.struct_layout(class)?;

        let memory = self.call_value(
            runtime::MALLOC,
            vec![Constant::Int(layout.size.max(1) as i32).into()],
            Type::StringPtr,
        );
        let object = self.bit_cast(memory, Type::StructPtr(class));

        if layout.has_constructor {
            self.call(
                runtime::method_symbol(class, class),
                vec![object],
                Type::Void,
            );
        }

        Ok(object)
    }

    /// Allocates one level of `array_type` with `counts[0]` elements and,
    /// while there are more counts, fills every element with a freshly
    /// allocated sub-array.
    ///
    /// Memory layout: `[count][element 0][element 1]...`; the returned
    /// pointer addresses element 0, so the count sits at index -1.
    fn allocate_array(&mut self, array_type: &Type, counts: &[Operand]) -> Result<Operand> {
        let (count, remaining) = counts.split_first().ok_or_else(|| {
            InternalError::MalformedExpression("`new` array without a dimension".to_owned())
        })?;
        let element = array_type.pointee().ok_or_else(|| {
            InternalError::MalformedExpression(format!(
                "`new` array of non-array type {array_type}"
            ))
        })?;

        let element_size = element.size() as i32;
        let header_size = ARRAY_HEADER_SIZE as i32;

        /* Allocate count * size + header bytes */

        let bytes = match count {
            Operand::Constant(Constant::Int(count)) => Operand::from(Constant::Int(
                count.wrapping_mul(element_size).wrapping_add(header_size),
            )),
            _ => {
                let scaled =
                    self.binary(BinaryOperator::Mul, *count, Constant::Int(element_size).into());
                self.binary(BinaryOperator::Add, scaled, Constant::Int(header_size).into())
            }
        };

        let memory = self.call_value(runtime::MALLOC, vec![bytes], Type::StringPtr);

        /* Write the header and step over it */

        let header = self.bit_cast(memory, Type::Int.pointer_to());
        self.store(*count, header);

        let first_element = self.array_element(
            header,
            &Type::Int,
            Constant::Int((header_size as u32 / WORD_SIZE) as i32).into(),
        );
        let array = self.bit_cast(first_element, array_type.clone());

        if !remaining.is_empty() {
            self.fill_sub_arrays(array, &element, *count, remaining)?;
        }

        Ok(array)
    }

    /// `for (i = 0; i < count; i++) array[i] = new element[remaining...]`
    fn fill_sub_arrays(
        &mut self,
        array: Operand,
        element: &Type,
        count: Operand,
        remaining: &[Operand],
    ) -> Result<()> {
        let counter = self.alloca(Type::Int, None);
        self.store(Constant::Int(0).into(), counter.into());

        let inherited = self.inherited_terminator();
        let next_block = self.create_block("new_end", inherited);
        let condition_block = self.create_block("new_cond", None);
        let body_block = self.create_block(
            "new_body",
            Some(Terminator::Jump {
                destination: condition_block,
            }),
        );

        self.jump(condition_block);

        self.switch_to(condition_block);
        let index = self.load(counter.into(), Type::Int);
        let condition = self.compare(Condition::Slt, index, count);
        self.terminate(Terminator::Branch {
            condition,
            positive: body_block,
            negative: next_block,
        });

        self.switch_to(body_block);
        let sub_array = self.allocate_array(element, remaining)?;
        let index = self.load(counter.into(), Type::Int);
        let slot = self.array_element(array, element, index);
        self.store(sub_array, slot);

        let index = self.binary(BinaryOperator::Add, index, Constant::Int(1).into());
        self.store(index, counter.into());
        self.jump(condition_block);

        self.switch_to(next_block);
        Ok(())
    }

    /// `array.size()`: the word right before the first element.
    pub(super) fn array_length(&mut self, array: Operand) -> Operand {
        let words = self.bit_cast(array, Type::Int.pointer_to());
        let header = self.array_element(words, &Type::Int, Constant::Int(-1).into());

        self.load(header, Type::Int)
    }

    /// `lhs + rhs` on strings: a fresh buffer of both lengths plus the
    /// terminator, filled by copy and append.
    pub(super) fn concatenate(&mut self, lhs: Operand, rhs: Operand) -> Operand {
        let lhs_length = self.call_value(runtime::STRLEN, vec![lhs], Type::Int);
        let rhs_length = self.call_value(runtime::STRLEN, vec![rhs], Type::Int);

        let length = self.binary(BinaryOperator::Add, lhs_length, rhs_length);
        let bytes = self.binary(BinaryOperator::Add, length, Constant::Int(1).into());
        let buffer = self.call_value(runtime::MALLOC, vec![bytes], Type::StringPtr);

        self.call(
            InternedSymbol::new(runtime::STRCPY),
            vec![buffer, lhs],
            Type::Void,
        );
        self.call(
            InternedSymbol::new(runtime::STRCAT),
            vec![buffer, rhs],
            Type::Void,
        );

        buffer
    }
}
