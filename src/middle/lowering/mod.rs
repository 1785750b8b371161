//! Lowers the type-checked AST into the block-structured IR.
//!
//! Lowering walks each function body once, keeping a *current block* that
//! instructions are appended to. Control flow statements split the current
//! block: the block that continues after the statement (the join block)
//! inherits whatever terminator the current block had so far, and the current
//! block is re-terminated with a branch into the statement. Blocks are
//! finished as soon as control definitely leaves them (`return`, `break`,
//! `continue`, branches), after which anything appended to them is dead and
//! silently dropped.

mod expressions;
mod heap;
mod scope;
mod statements;

use hashbrown::HashMap;

pub use scope::{LoopTargets, ScopeStack, Storage};

use crate::{
    error::{InternalError, Result},
    frontend::{
        ast::{self, ExpressionKind, Literal},
        intern::InternedSymbol,
        symbols::GlobalSymbols,
    },
    index::Index,
    middle::{
        ir::{
            self, BinaryOperator, BlockId, Condition, Constant, GlobalVariable, Instruction,
            Operand, RegisterId, StringPool, Terminator, verify::verify_function,
        },
        runtime,
        ty::{StructType, Type},
    },
};

/// Module-wide facts every function body is lowered against.
struct ModuleTables<'a> {
    symbols: &'a GlobalSymbols,
    structs: HashMap<InternedSymbol, StructType>,
    globals: HashMap<InternedSymbol, Type>,
}

/// Lowers a whole compilation unit.
pub fn lower_program(program: &ast::Program, symbols: &GlobalSymbols) -> Result<ir::Program> {
    let mut output = ir::Program::default();
    let mut next_label = 0;

    /* Struct layouts, in class declaration order */

    output.structs = symbols
        .classes()
        .map(|class| {
            StructType::new(
                class.name,
                class
                    .members
                    .iter()
                    .map(|(name, ty)| (*name, Type::lower(ty))),
                class.has_constructor,
            )
        })
        .collect();

    let mut tables = ModuleTables {
        symbols,
        structs: output
            .structs
            .iter()
            .map(|s| (s.name, s.clone()))
            .collect(),
        globals: HashMap::new(),
    };

    /* Globals. Literal initializers are folded into the data section */

    let mut deferred_initializers = vec![];

    for definition in &program.definitions {
        let ast::Definition::Variable(definition) = definition else {
            continue;
        };

        let ty = Type::lower(&definition.ty);

        for declarator in &definition.declarators {
            if tables.globals.insert(declarator.name, ty.clone()).is_some() {
                return Err(InternalError::DuplicateDefinition(
                    declarator.name.to_string(),
                ));
            }

            let initial = match &declarator.initializer {
                Some(ast::Expression {
                    kind: ExpressionKind::Literal(literal),
                    ..
                }) => constant_initializer(literal, &mut output.strings),
                Some(expression) => {
                    deferred_initializers.push((declarator.name, expression));
                    ty.zero().into()
                }
                None => ty.zero().into(),
            };

            output.globals.push(GlobalVariable {
                name: declarator.name,
                ty: ty.clone(),
                initial,
            });
        }
    }

    if !deferred_initializers.is_empty() {
        let mut context = BodyLoweringContext::new(
            &tables,
            &mut output.strings,
            &mut next_label,
            InternedSymbol::new(runtime::GLOBAL_INITIALIZER),
            Type::Void,
            None,
        );

        for (name, expression) in deferred_initializers {
            let value = context.lower_value(expression)?;
            let value = context.as_storage(value);
            context.store(value, Operand::Global(name));
        }

        output.initializer = Some(context.finish()?);
    }

    let call_initializer = output.initializer.is_some();
    let tables = &tables;

    /* Function bodies */

    for definition in &program.definitions {
        match definition {
            ast::Definition::Function(function) => {
                let is_entry_point = function.name.value() == runtime::ENTRY_POINT;

                output.functions.push(lower_body(
                    tables,
                    &mut output.strings,
                    &mut next_label,
                    BodySource {
                        name: function.name,
                        return_type: &function.return_type,
                        parameters: &function.parameters,
                        body: &function.body,
                        owner: None,
                        call_initializer: call_initializer && is_entry_point,
                    },
                )?);
            }
            ast::Definition::Class(class) => {
                if let Some(constructor) = &class.constructor {
                    output.functions.push(lower_body(
                        tables,
                        &mut output.strings,
                        &mut next_label,
                        BodySource {
                            name: runtime::method_symbol(class.name, class.name),
                            return_type: &ast::SemanticType::void(),
                            parameters: &[],
                            body: constructor,
                            owner: Some(class.name),
                            call_initializer: false,
                        },
                    )?);
                }

                for method in &class.methods {
                    output.functions.push(lower_body(
                        tables,
                        &mut output.strings,
                        &mut next_label,
                        BodySource {
                            name: runtime::method_symbol(class.name, method.name),
                            return_type: &method.return_type,
                            parameters: &method.parameters,
                            body: &method.body,
                            owner: Some(class.name),
                            call_initializer: false,
                        },
                    )?);
                }
            }
            ast::Definition::Variable(_) => {}
        }
    }

    Ok(output)
}

fn constant_initializer(literal: &Literal, strings: &mut StringPool) -> Operand {
    match literal {
        Literal::Integer(value) => Constant::Int(*value).into(),
        Literal::Boolean(value) => Constant::Bool(*value).into(),
        Literal::String(value) => Operand::String(strings.intern(value)),
        Literal::Null => Constant::Null.into(),
    }
}

struct BodySource<'ast> {
    name: InternedSymbol,
    return_type: &'ast ast::SemanticType,
    parameters: &'ast [ast::Parameter],
    body: &'ast [ast::Statement],
    /// The class whose constructor or method this is
    owner: Option<InternedSymbol>,
    call_initializer: bool,
}

fn lower_body(
    tables: &ModuleTables,
    strings: &mut StringPool,
    next_label: &mut u32,
    source: BodySource,
) -> Result<ir::Function> {
    log::debug!("lowering function `{}`", source.name);

    let mut context = BodyLoweringContext::new(
        tables,
        strings,
        next_label,
        source.name,
        Type::lower(source.return_type),
        source.owner,
    );

    for parameter in source.parameters {
        context.declare_parameter(parameter.name, Type::lower(&parameter.ty));
    }

    if source.call_initializer {
        context.call(
            InternedSymbol::new(runtime::GLOBAL_INITIALIZER),
            vec![],
            Type::Void,
        );
    }

    context.lower_statements(source.body)?;
    context.finish()
}

struct BodyLoweringContext<'a> {
    tables: &'a ModuleTables<'a>,
    strings: &'a mut StringPool,
    next_label: &'a mut u32,

    function: ir::Function,
    current_block: BlockId,
    scopes: ScopeStack,

    /// Set while lowering a constructor or method
    owner: Option<InternedSymbol>,
    this: Option<RegisterId>,
    return_slot: Option<RegisterId>,
}

impl<'a> BodyLoweringContext<'a> {
    fn new(
        tables: &'a ModuleTables<'a>,
        strings: &'a mut StringPool,
        next_label: &'a mut u32,
        name: InternedSymbol,
        return_type: Type,
        owner: Option<InternedSymbol>,
    ) -> Self {
        let mut context = Self {
            tables,
            strings,
            next_label,
            function: ir::Function::new(name, return_type.clone()),
            current_block: BlockId::new(0),
            scopes: ScopeStack::default(),
            owner,
            this: None,
            return_slot: None,
        };

        let entry = context.create_block("entry", None);
        let exit = context.create_block("exit", None);

        // falling off the end of the body returns
        context.function.blocks[entry].terminator = Some(Terminator::Jump { destination: exit });
        context.function.entry = entry;
        context.function.exit = exit;
        context.switch_to(entry);
        context.scopes.push();

        if let Some(class) = owner {
            let this = context.create_register(Type::StructPtr(class), Some("this".into()));
            context.function.parameters.push(this);
            context.this = Some(this);
        }

        if return_type != Type::Void {
            let slot = context.alloca(return_type.clone(), Some("retval".into()));
            context.store(return_type.zero().into(), slot.into());
            context.return_slot = Some(slot);
        }

        context
    }

    /// Parameters arrive in registers and are spilled to a stack cell so they
    /// can be assigned to like any other local.
    fn declare_parameter(&mut self, name: InternedSymbol, ty: Type) {
        let register = self.create_register(ty.clone(), Some(name));
        self.function.parameters.push(register);

        let cell = self.alloca(ty.clone(), Some(name));
        self.store(register.into(), cell.into());
        self.scopes.declare(name, Storage::Local(cell), ty);
    }

    /// Fills in the exit block and hands the finished function over.
    fn finish(mut self) -> Result<ir::Function> {
        let exit = self.function.exit;
        self.switch_to(exit);

        let return_slot = self.return_slot;
        let value = return_slot.map(|slot| {
            let ty = self.function.return_type.clone();
            self.load(slot.into(), ty)
        });

        self.terminate(Terminator::Return { value });

        self.function.prune_unreachable_blocks();
        verify_function(&self.function)?;

        log::debug!(
            "lowered `{}` into {} blocks and {} registers",
            self.function.name,
            self.function.layout.len(),
            self.function.registers.len()
        );

        Ok(self.function)
    }

    fn function_name(&self) -> String {
        self.function.name.to_string()
    }

    fn create_label(&mut self, tag: &str) -> String {
        let label = format!("{tag}{}", *self.next_label);
        *self.next_label += 1;
        label
    }

    fn create_block(&mut self, tag: &str, terminator: Option<Terminator>) -> BlockId {
        let label = self.create_label(tag);
        let id = self.function.blocks.next_index();

        self.function
            .blocks
            .push(ir::Block::new(id, label, terminator))
    }

    /// The terminator a block split off the current one should start with.
    fn inherited_terminator(&self) -> Option<Terminator> {
        self.function.blocks[self.current_block].terminator.clone()
    }

    fn switch_to(&mut self, block: BlockId) {
        self.function.layout.push(block);
        self.current_block = block;
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.function.blocks[self.current_block].terminate(terminator);
    }

    fn jump(&mut self, destination: BlockId) {
        self.terminate(Terminator::Jump { destination });
    }

    fn create_register(&mut self, ty: Type, name: Option<InternedSymbol>) -> RegisterId {
        let id = self.function.registers.next_index();
        self.function.registers.push(ir::Register { id, ty, name })
    }

    fn push_instruction(&mut self, instruction: Instruction) {
        match instruction {
            Instruction::Alloca { .. } => self.function.allocas.push(instruction),
            _ => {
                self.function.blocks[self.current_block].push(instruction);
            }
        }
    }

    fn alloca(&mut self, ty: Type, name: Option<InternedSymbol>) -> RegisterId {
        let destination = self.create_register(ty.pointer_to(), name);
        self.push_instruction(Instruction::Alloca { destination, ty });
        destination
    }

    fn load(&mut self, address: Operand, ty: Type) -> Operand {
        let destination = self.create_register(ty, None);
        self.push_instruction(Instruction::Load {
            destination,
            address,
        });
        destination.into()
    }

    fn store(&mut self, value: Operand, address: Operand) {
        self.push_instruction(Instruction::Store { value, address });
    }

    /// The result has the type of `lhs`.
    fn binary(&mut self, operator: BinaryOperator, lhs: Operand, rhs: Operand) -> Operand {
        let destination = self.create_register(self.function.operand_type(&lhs), None);
        self.push_instruction(Instruction::Binary {
            operator,
            destination,
            lhs,
            rhs,
        });
        destination.into()
    }

    fn compare(&mut self, condition: Condition, lhs: Operand, rhs: Operand) -> Operand {
        let destination = self.create_register(Type::Cond, None);
        self.push_instruction(Instruction::Compare {
            condition,
            destination,
            lhs,
            rhs,
        });
        destination.into()
    }

    fn bit_cast(&mut self, value: Operand, ty: Type) -> Operand {
        let destination = self.create_register(ty, None);
        self.push_instruction(Instruction::BitCast { destination, value });
        destination.into()
    }

    fn call(
        &mut self,
        function: InternedSymbol,
        arguments: Vec<Operand>,
        return_type: Type,
    ) -> Option<Operand> {
        let destination =
            (return_type != Type::Void).then(|| self.create_register(return_type, None));

        self.push_instruction(Instruction::Call {
            destination,
            function,
            arguments,
        });
        destination.map(Operand::from)
    }

    /// Calls a runtime function that is known to return a value.
    fn call_value(
        &mut self,
        function: &str,
        arguments: Vec<Operand>,
        return_type: Type,
    ) -> Operand {
        let destination = self.create_register(return_type, None);

        self.push_instruction(Instruction::Call {
            destination: Some(destination),
            function: InternedSymbol::new(function),
            arguments,
        });
        destination.into()
    }

    /// Narrows a boolean in storage form to condition form.
    fn as_condition(&mut self, value: Operand) -> Operand {
        match value {
            Operand::Constant(Constant::Bool(b)) => Constant::Cond(b).into(),
            _ if self.function.operand_type(&value) == Type::Bool => {
                let destination = self.create_register(Type::Cond, None);
                self.push_instruction(Instruction::Truncate { destination, value });
                destination.into()
            }
            _ => value,
        }
    }

    /// Widens a boolean in condition form to storage form. Everything that is
    /// written to memory, passed to a function or returned goes through here.
    fn as_storage(&mut self, value: Operand) -> Operand {
        match value {
            Operand::Constant(Constant::Cond(b)) => Constant::Bool(b).into(),
            _ if self.function.operand_type(&value) == Type::Cond => {
                let destination = self.create_register(Type::Bool, None);
                self.push_instruction(Instruction::ZeroExtend { destination, value });
                destination.into()
            }
            _ => value,
        }
    }

    fn struct_layout(&self, name: InternedSymbol) -> Result<&'a StructType> {
        let tables: &'a ModuleTables<'a> = self.tables;

        tables
            .structs
            .get(&name)
            .ok_or_else(|| InternalError::UnknownStruct(name.to_string()))
    }

    /// Resolves a bare identifier to the address of its storage: locals
    /// first, then members of the enclosing class, then globals.
    fn resolve_variable(&mut self, name: InternedSymbol) -> Result<(Operand, Type)> {
        if let Some((storage, ty)) = self.scopes.resolve(name) {
            return Ok((storage.address(), ty.clone()));
        }

        if let (Some(owner), Some(this)) = (self.owner, self.this) {
            if self.struct_layout(owner)?.member(name).is_some() {
                return self.member_address(this.into(), owner, name);
            }
        }

        if let Some(ty) = self.tables.globals.get(&name) {
            return Ok((Operand::Global(name), ty.clone()));
        }

        Err(InternalError::UnresolvedSymbol(name.to_string()))
    }
}
