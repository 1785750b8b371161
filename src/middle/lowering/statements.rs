use crate::{
    error::{InternalError, Result},
    frontend::ast::{Expression, ForInitializer, Statement, VariableDefinition},
    middle::{
        ir::Terminator,
        lowering::{BodyLoweringContext, LoopTargets, Storage},
        ty::Type,
    },
};

impl BodyLoweringContext<'_> {
    pub(super) fn lower_statements(&mut self, statements: &[Statement]) -> Result<()> {
        statements
            .iter()
            .try_for_each(|statement| self.lower_statement(statement))
    }

    /// Lowers `statements` inside a fresh lexical scope.
    fn lower_scoped(&mut self, statements: &[Statement]) -> Result<()> {
        self.scopes.push();
        self.lower_statements(statements)?;
        self.scopes.pop();
        Ok(())
    }

    fn lower_statement(&mut self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Block(statements) => self.lower_scoped(statements),
            Statement::VariableDefinition(definition) => self.lower_local_variables(definition),
            Statement::If {
                condition,
                positive,
                negative,
            } => self.lower_if(condition, positive, negative),
            Statement::While { condition, body } => self.lower_while(condition, body),
            Statement::For {
                initializer,
                condition,
                step,
                body,
            } => self.lower_for(
                initializer.as_ref(),
                condition.as_ref(),
                step.as_ref(),
                body,
            ),
            Statement::Break => {
                let targets = self.loop_targets("break")?;
                self.jump(targets.break_target());
                Ok(())
            }
            Statement::Continue => {
                let targets = self.loop_targets("continue")?;
                self.jump(targets.continue_target());
                Ok(())
            }
            Statement::Return(value) => self.lower_return(value.as_ref()),
            Statement::Expression(expression) => {
                self.lower_expression(expression)?;
                Ok(())
            }
            Statement::Empty => Ok(()),
        }
    }

    fn loop_targets(&self, statement: &'static str) -> Result<LoopTargets> {
        self.scopes
            .innermost_loop()
            .ok_or_else(|| InternalError::LoopControlOutsideLoop {
                statement,
                function: self.function_name(),
            })
    }

    fn lower_local_variables(&mut self, definition: &VariableDefinition) -> Result<()> {
        let ty = Type::lower(&definition.ty);

        for declarator in &definition.declarators {
            let cell = self.alloca(ty.clone(), Some(declarator.name));

            if let Some(initializer) = &declarator.initializer {
                let value = self.lower_value(initializer)?;
                let value = self.as_storage(value);
                self.store(value, cell.into());
            }

            // declared after the initializer so `int x = x;` sees the outer `x`
            self.scopes
                .declare(declarator.name, Storage::Local(cell), ty.clone());
        }

        Ok(())
    }

    fn lower_if(
        &mut self,
        condition: &Expression,
        positive: &[Statement],
        negative: &[Statement],
    ) -> Result<()> {
        // the condition may itself split the current block
        let condition = self.lower_condition(condition)?;

        let inherited = self.inherited_terminator();
        let next_block = self.create_block("if_end", inherited);
        let then_block = self.create_block(
            "if_then",
            Some(Terminator::Jump {
                destination: next_block,
            }),
        );
        let else_block = (!negative.is_empty()).then(|| {
            self.create_block(
                "if_else",
                Some(Terminator::Jump {
                    destination: next_block,
                }),
            )
        });

        self.terminate(Terminator::Branch {
            condition,
            positive: then_block,
            negative: else_block.unwrap_or(next_block),
        });

        self.switch_to(then_block);
        self.lower_scoped(positive)?;
        self.jump(next_block);

        if let Some(else_block) = else_block {
            self.switch_to(else_block);
            self.lower_scoped(negative)?;
            self.jump(next_block);
        }

        self.switch_to(next_block);
        Ok(())
    }

    fn lower_while(&mut self, condition: &Expression, body: &[Statement]) -> Result<()> {
        let inherited = self.inherited_terminator();
        let next_block = self.create_block("while_end", inherited);
        let condition_block = self.create_block("while_cond", None);
        let body_block = self.create_block(
            "while_body",
            Some(Terminator::Jump {
                destination: condition_block,
            }),
        );

        self.jump(condition_block);

        /* Condition */

        self.switch_to(condition_block);
        let condition = self.lower_condition(condition)?;
        self.terminate(Terminator::Branch {
            condition,
            positive: body_block,
            negative: next_block,
        });

        /* Body */

        self.scopes.push_loop(LoopTargets {
            condition: condition_block,
            step: None,
            next: next_block,
        });
        self.switch_to(body_block);
        self.lower_statements(body)?;
        self.jump(condition_block);
        self.scopes.pop();

        self.switch_to(next_block);
        Ok(())
    }

    fn lower_for(
        &mut self,
        initializer: Option<&ForInitializer>,
        condition: Option<&Expression>,
        step: Option<&Expression>,
        body: &[Statement],
    ) -> Result<()> {
        // the initializer's variables are only visible inside the loop
        self.scopes.push();

        match initializer {
            Some(ForInitializer::VariableDefinition(definition)) => {
                self.lower_local_variables(definition)?
            }
            Some(ForInitializer::Expression(expression)) => {
                self.lower_expression(expression)?;
            }
            None => {}
        }

        let inherited = self.inherited_terminator();
        let next_block = self.create_block("for_end", inherited);
        let condition_block = self.create_block("for_cond", None);
        let step_block = self.create_block(
            "for_step",
            Some(Terminator::Jump {
                destination: condition_block,
            }),
        );
        let body_block = self.create_block(
            "for_body",
            Some(Terminator::Jump {
                destination: step_block,
            }),
        );

        self.jump(condition_block);

        /* Condition. A missing condition loops forever */

        self.switch_to(condition_block);
        match condition {
            Some(condition) => {
                let condition = self.lower_condition(condition)?;
                self.terminate(Terminator::Branch {
                    condition,
                    positive: body_block,
                    negative: next_block,
                });
            }
            None => self.jump(body_block),
        }

        /* Body */

        self.scopes.push_loop(LoopTargets {
            condition: condition_block,
            step: Some(step_block),
            next: next_block,
        });
        self.switch_to(body_block);
        self.lower_statements(body)?;
        self.jump(step_block);
        self.scopes.pop();

        /* Step */

        self.switch_to(step_block);
        if let Some(step) = step {
            self.lower_expression(step)?;
        }
        self.jump(condition_block);

        self.switch_to(next_block);
        self.scopes.pop();
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expression>) -> Result<()> {
        match (value, self.return_slot) {
            (Some(expression), _) if expression.ty.is_void() => {
                self.lower_expression(expression)?;
            }
            (Some(expression), Some(slot)) => {
                let value = self.lower_value(expression)?;
                let value = self.as_storage(value);
                self.store(value, slot.into());
            }
            (Some(expression), None) => {
                return Err(InternalError::MalformedExpression(format!(
                    "{} returned from void function `{}`",
                    expression.describe(),
                    self.function_name()
                )));
            }
            (None, _) => {}
        }

        let exit = self.function.exit;
        self.jump(exit);
        Ok(())
    }
}
