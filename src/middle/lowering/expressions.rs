use crate::{
    error::{InternalError, Result},
    frontend::{
        ast::{
            BinaryOperatorKind, CallTarget, Expression, ExpressionKind, Literal, SemanticType,
            UnaryOperatorKind,
        },
        intern::InternedSymbol,
    },
    middle::{
        ir::{BinaryOperator, Condition, Constant, Instruction, Operand, Terminator},
        lowering::BodyLoweringContext,
        runtime,
        ty::Type,
    },
};

/// The result of lowering an expression. Lvalues stay addresses until
/// something actually needs their value, so assignment and reads share the
/// same addressing code.
#[derive(Debug, Clone)]
pub(super) enum Lowered {
    Value(Operand),
    Address { address: Operand, ty: Type },
    Void,
}

fn arithmetic_operator(operator: BinaryOperatorKind) -> Option<BinaryOperator> {
    Some(match operator {
        BinaryOperatorKind::Add => BinaryOperator::Add,
        BinaryOperatorKind::Subtract => BinaryOperator::Sub,
        BinaryOperatorKind::Multiply => BinaryOperator::Mul,
        BinaryOperatorKind::Divide => BinaryOperator::SDiv,
        BinaryOperatorKind::Modulus => BinaryOperator::SRem,
        BinaryOperatorKind::BitwiseAnd => BinaryOperator::And,
        BinaryOperatorKind::BitwiseOr => BinaryOperator::Or,
        BinaryOperatorKind::BitwiseXor => BinaryOperator::Xor,
        BinaryOperatorKind::ShiftLeft => BinaryOperator::Shl,
        BinaryOperatorKind::ShiftRight => BinaryOperator::AShr,
        _ => return None,
    })
}

fn comparison(operator: BinaryOperatorKind) -> Option<Condition> {
    Some(match operator {
        BinaryOperatorKind::Equals => Condition::Eq,
        BinaryOperatorKind::NotEquals => Condition::Ne,
        BinaryOperatorKind::LessThan => Condition::Slt,
        BinaryOperatorKind::LessThanOrEqualTo => Condition::Sle,
        BinaryOperatorKind::GreaterThan => Condition::Sgt,
        BinaryOperatorKind::GreaterThanOrEqualTo => Condition::Sge,
        _ => return None,
    })
}

impl BodyLoweringContext<'_> {
    /// Lowers `expression` and loads it if it produced an address.
    pub(super) fn lower_value(&mut self, expression: &Expression) -> Result<Operand> {
        match self.lower_expression(expression)? {
            Lowered::Value(value) => Ok(value),
            Lowered::Address { address, ty } => Ok(self.load(address, ty)),
            Lowered::Void => Err(InternalError::MissingValue(expression.describe())),
        }
    }

    /// Lowers a boolean expression into condition form, ready for a branch.
    pub(super) fn lower_condition(&mut self, expression: &Expression) -> Result<Operand> {
        let value = self.lower_value(expression)?;
        Ok(self.as_condition(value))
    }

    fn lower_address(&mut self, expression: &Expression) -> Result<(Operand, Type)> {
        match self.lower_expression(expression)? {
            Lowered::Address { address, ty } => Ok((address, ty)),
            _ => Err(InternalError::MissingAddress(expression.describe())),
        }
    }

    pub(super) fn lower_expression(&mut self, expression: &Expression) -> Result<Lowered> {
        match &expression.kind {
            ExpressionKind::Literal(literal) => Ok(Lowered::Value(self.lower_literal(literal))),
            ExpressionKind::This => self
                .this
                .map(|this| Lowered::Value(this.into()))
                .ok_or_else(|| InternalError::ThisOutsideMethod(self.function_name())),
            ExpressionKind::Variable(name) => {
                let (address, ty) = self.resolve_variable(*name)?;
                Ok(Lowered::Address { address, ty })
            }
            ExpressionKind::Binary { lhs, operator, rhs } => {
                self.lower_binary(lhs, *operator, rhs)
            }
            ExpressionKind::Unary { operator, operand } => self.lower_unary(*operator, operand),
            ExpressionKind::Assignment { lhs, rhs } => {
                let value = self.lower_value(rhs)?;
                let (address, ty) = self.lower_address(lhs)?;
                let value = self.as_storage(value);

                self.store(value, address);
                Ok(Lowered::Address { address, ty })
            }
            ExpressionKind::Ternary {
                condition,
                positive,
                negative,
            } => self.lower_ternary(condition, positive, negative, &expression.ty),
            ExpressionKind::Call { target, arguments } => {
                self.lower_call(target, arguments, &expression.ty)
            }
            ExpressionKind::Index { array, index } => {
                let base = self.lower_value(array)?;
                let index = self.lower_value(index)?;
                let element = Type::lower(&expression.ty);
                let address = self.array_element(base, &element, index);

                Ok(Lowered::Address {
                    address,
                    ty: element,
                })
            }
            ExpressionKind::Member { object, member } => {
                let class = object.ty.class_name().ok_or_else(|| {
                    InternalError::MalformedExpression(format!(
                        "{} on a value that is not a class instance",
                        expression.describe()
                    ))
                })?;
                let base = self.lower_value(object)?;
                let (address, ty) = self.member_address(base, class, *member)?;

                Ok(Lowered::Address { address, ty })
            }
            ExpressionKind::New { ty, dimensions } => self.lower_new(ty, dimensions),
        }
    }

    fn lower_literal(&mut self, literal: &Literal) -> Operand {
        match literal {
            Literal::Integer(value) => Constant::Int(*value).into(),
            Literal::Boolean(value) => Constant::Cond(*value).into(),
            Literal::String(value) => Operand::String(self.strings.intern(value)),
            Literal::Null => Constant::Null.into(),
        }
    }

    fn lower_binary(
        &mut self,
        lhs: &Expression,
        operator: BinaryOperatorKind,
        rhs: &Expression,
    ) -> Result<Lowered> {
        match operator {
            BinaryOperatorKind::LogicalAnd => return self.lower_short_circuit(lhs, true, rhs),
            BinaryOperatorKind::LogicalOr => return self.lower_short_circuit(lhs, false, rhs),
            _ => {}
        }

        let left = self.lower_value(lhs)?;
        let right = self.lower_value(rhs)?;

        if lhs.ty.is_string() && rhs.ty.is_string() {
            return self.lower_string_operation(left, operator, right);
        }

        if let Some(operator) = arithmetic_operator(operator) {
            return Ok(Lowered::Value(self.binary(operator, left, right)));
        }

        let condition = comparison(operator).ok_or_else(|| {
            InternalError::MalformedExpression(format!("unsupported operator `{operator:?}`"))
        })?;

        // booleans are compared in storage form
        let (left, right) = if Type::lower(&lhs.ty).is_boolean() {
            (self.as_storage(left), self.as_storage(right))
        } else {
            (left, right)
        };

        Ok(Lowered::Value(self.compare(condition, left, right)))
    }

    fn lower_string_operation(
        &mut self,
        left: Operand,
        operator: BinaryOperatorKind,
        right: Operand,
    ) -> Result<Lowered> {
        if operator == BinaryOperatorKind::Add {
            return Ok(Lowered::Value(self.concatenate(left, right)));
        }

        let function = runtime::string_comparison(operator).ok_or_else(|| {
            InternalError::MalformedExpression(format!("`{operator:?}` applied to strings"))
        })?;

        Ok(Lowered::Value(self.call_value(
            function.value(),
            vec![left, right],
            Type::Cond,
        )))
    }

    /// `a && b` and `a || b`. The right operand only runs when the left one
    /// does not already decide the result; both paths write a byte into a
    /// temporary cell that the join block reads back.
    fn lower_short_circuit(
        &mut self,
        lhs: &Expression,
        is_and: bool,
        rhs: &Expression,
    ) -> Result<Lowered> {
        let tag = if is_and { "and" } else { "or" };
        let result = self.alloca(Type::Bool, None);

        let left = self.lower_condition(lhs)?;

        let inherited = self.inherited_terminator();
        let next_block = self.create_block(&format!("{tag}_end"), inherited);
        let rhs_block = self.create_block(
            &format!("{tag}_rhs"),
            Some(Terminator::Jump {
                destination: next_block,
            }),
        );
        let short_block = self.create_block(
            &format!("{tag}_short"),
            Some(Terminator::Jump {
                destination: next_block,
            }),
        );

        let (positive, negative) = if is_and {
            (rhs_block, short_block)
        } else {
            (short_block, rhs_block)
        };

        self.terminate(Terminator::Branch {
            condition: left,
            positive,
            negative,
        });

        /* Decided by the left operand alone */

        self.switch_to(short_block);
        self.store(Constant::Bool(!is_and).into(), result.into());
        self.jump(next_block);

        /* Decided by the right operand */

        self.switch_to(rhs_block);
        let right = self.lower_value(rhs)?;
        let right = self.as_storage(right);
        self.store(right, result.into());
        self.jump(next_block);

        self.switch_to(next_block);
        let value = self.load(result.into(), Type::Bool);

        Ok(Lowered::Value(self.as_condition(value)))
    }

    fn lower_ternary(
        &mut self,
        condition: &Expression,
        positive: &Expression,
        negative: &Expression,
        ty: &SemanticType,
    ) -> Result<Lowered> {
        let result_type = Type::lower(ty);
        let result = (!ty.is_void()).then(|| self.alloca(result_type.clone(), None));

        let condition = self.lower_condition(condition)?;

        let inherited = self.inherited_terminator();
        let next_block = self.create_block("cond_end", inherited);
        let positive_block = self.create_block(
            "cond_true",
            Some(Terminator::Jump {
                destination: next_block,
            }),
        );
        let negative_block = self.create_block(
            "cond_false",
            Some(Terminator::Jump {
                destination: next_block,
            }),
        );

        self.terminate(Terminator::Branch {
            condition,
            positive: positive_block,
            negative: negative_block,
        });

        for (block, branch) in [(positive_block, positive), (negative_block, negative)] {
            self.switch_to(block);

            match result {
                Some(result) => {
                    let value = self.lower_value(branch)?;
                    let value = self.as_storage(value);
                    self.store(value, result.into());
                }
                None => {
                    self.lower_expression(branch)?;
                }
            }

            self.jump(next_block);
        }

        self.switch_to(next_block);

        Ok(match result {
            Some(result) => Lowered::Value(self.load(result.into(), result_type)),
            None => Lowered::Void,
        })
    }

    fn lower_unary(
        &mut self,
        operator: UnaryOperatorKind,
        operand: &Expression,
    ) -> Result<Lowered> {
        let value = match operator {
            UnaryOperatorKind::Plus => self.lower_value(operand)?,
            UnaryOperatorKind::Negate => {
                let value = self.lower_value(operand)?;
                self.binary(BinaryOperator::Sub, Constant::Int(0).into(), value)
            }
            UnaryOperatorKind::BitwiseNot => {
                let value = self.lower_value(operand)?;
                self.binary(BinaryOperator::Xor, value, Constant::Int(-1).into())
            }
            UnaryOperatorKind::LogicalNot => {
                let condition = self.lower_condition(operand)?;

                match condition {
                    Operand::Constant(Constant::Cond(value)) => Constant::Cond(!value).into(),
                    _ => self.binary(
                        BinaryOperator::Xor,
                        condition,
                        Constant::Cond(true).into(),
                    ),
                }
            }
            UnaryOperatorKind::PreIncrement
            | UnaryOperatorKind::PreDecrement
            | UnaryOperatorKind::PostIncrement
            | UnaryOperatorKind::PostDecrement => {
                let step = match operator {
                    UnaryOperatorKind::PreIncrement | UnaryOperatorKind::PostIncrement => {
                        BinaryOperator::Add
                    }
                    _ => BinaryOperator::Sub,
                };

                let (address, ty) = self.lower_address(operand)?;
                let old = self.load(address, ty.clone());
                let new = self.binary(step, old, Constant::Int(1).into());
                self.store(new, address);

                return Ok(match operator {
                    // prefix forms are lvalues
                    UnaryOperatorKind::PreIncrement | UnaryOperatorKind::PreDecrement => {
                        Lowered::Address { address, ty }
                    }
                    _ => Lowered::Value(old),
                });
            }
        };

        Ok(Lowered::Value(value))
    }

    fn lower_call(
        &mut self,
        target: &CallTarget,
        arguments: &[Expression],
        ty: &SemanticType,
    ) -> Result<Lowered> {
        let (function, mut operands) = match target {
            CallTarget::Function(name) => {
                let function = match self.tables.symbols.function(*name) {
                    Some(_) => *name,
                    None => runtime::builtin_function(*name)
                        .ok_or_else(|| InternalError::UnresolvedCall(name.to_string()))?,
                };

                (function, vec![])
            }
            CallTarget::Method { object, method } if object.ty.is_array() => {
                if method.value() != runtime::ARRAY_SIZE_METHOD {
                    return Err(InternalError::UnresolvedCall(format!("[].{method}")));
                }

                let array = self.lower_value(object)?;
                return Ok(Lowered::Value(self.array_length(array)));
            }
            CallTarget::Method { object, method } if object.ty.is_string() => {
                let function = runtime::string_method(*method)
                    .ok_or_else(|| InternalError::UnresolvedCall(format!("string.{method}")))?;
                let this = self.lower_value(object)?;

                (function, vec![this])
            }
            CallTarget::Method { object, method } => {
                let class = object.ty.class_name().ok_or_else(|| {
                    InternalError::MalformedExpression(format!(
                        "method `{method}` called on a value that is not a class instance"
                    ))
                })?;

                let declared = self
                    .tables
                    .symbols
                    .class(class)
                    .is_some_and(|c| c.methods.contains_key(method));

                if !declared {
                    return Err(InternalError::UnresolvedCall(format!("{class}.{method}")));
                }

                let this = self.lower_value(object)?;
                (runtime::method_symbol(class, *method), vec![this])
            }
        };

        for argument in arguments {
            let value = self.lower_value(argument)?;
            operands.push(self.as_storage(value));
        }

        Ok(match self.call(function, operands, Type::lower(ty)) {
            Some(value) => Lowered::Value(value),
            None => Lowered::Void,
        })
    }

    pub(super) fn array_element(
        &mut self,
        base: Operand,
        element: &Type,
        index: Operand,
    ) -> Operand {
        let destination = self.create_register(element.pointer_to(), None);

        self.push_instruction(Instruction::GetArrayElementPointer {
            destination,
            base,
            element: element.clone(),
            index,
        });
        destination.into()
    }

    pub(super) fn member_address(
        &mut self,
        base: Operand,
        class: InternedSymbol,
        member: InternedSymbol,
    ) -> Result<(Operand, Type)> {
        let layout = self.struct_layout(class)?;
        let (field, declaration) =
            layout
                .member(member)
                .ok_or_else(|| InternalError::UnknownMember {
                    structure: class.to_string(),
                    member: member.to_string(),
                })?;

        let destination = self.create_register(declaration.ty.pointer_to(), None);

        self.push_instruction(Instruction::GetStructElementPointer {
            destination,
            base,
            structure: class,
            field,
        });
        Ok((destination.into(), declaration.ty.clone()))
    }
}
