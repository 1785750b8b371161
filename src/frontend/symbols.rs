//! The resolved global symbol table: user functions and classes.

use hashbrown::HashMap;

use crate::{
    error::{InternalError, Result},
    frontend::{
        ast::{self, SemanticType},
        intern::InternedSymbol,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub return_type: SemanticType,
    pub parameters: Vec<SemanticType>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassSymbol {
    pub name: InternedSymbol,
    /// Member variables in declaration order
    pub members: Vec<(InternedSymbol, SemanticType)>,
    pub methods: HashMap<InternedSymbol, FunctionSignature>,
    pub has_constructor: bool,
}

#[derive(Debug, Clone, Default)]
pub struct GlobalSymbols {
    functions: HashMap<InternedSymbol, FunctionSignature>,
    classes: HashMap<InternedSymbol, ClassSymbol>,
    class_order: Vec<InternedSymbol>,
}

impl FunctionSignature {
    fn of(definition: &ast::FunctionDefinition) -> Self {
        Self {
            return_type: definition.return_type.clone(),
            parameters: definition.parameters.iter().map(|p| p.ty.clone()).collect(),
        }
    }
}

impl GlobalSymbols {
    /// Collects every top-level function and class of `program`.
    pub fn collect(program: &ast::Program) -> Result<Self> {
        let mut symbols = Self::default();

        for definition in &program.definitions {
            match definition {
                ast::Definition::Function(function) => {
                    symbols.insert_function(function.name, FunctionSignature::of(function))?;
                }
                ast::Definition::Class(class) => {
                    let mut methods = HashMap::new();

                    for method in &class.methods {
                        if methods
                            .insert(method.name, FunctionSignature::of(method))
                            .is_some()
                        {
                            return Err(InternalError::DuplicateDefinition(format!(
                                "{}.{}",
                                class.name, method.name
                            )));
                        }
                    }

                    let members = class
                        .members
                        .iter()
                        .flat_map(|definition| {
                            definition
                                .declarators
                                .iter()
                                .map(|d| (d.name, definition.ty.clone()))
                        })
                        .collect();

                    symbols.insert_class(ClassSymbol {
                        name: class.name,
                        members,
                        methods,
                        has_constructor: class.constructor.is_some(),
                    })?;
                }
                ast::Definition::Variable(_) => {}
            }
        }

        Ok(symbols)
    }

    pub fn insert_function(
        &mut self,
        name: InternedSymbol,
        signature: FunctionSignature,
    ) -> Result<()> {
        if self.functions.insert(name, signature).is_some() {
            return Err(InternalError::DuplicateDefinition(name.to_string()));
        }

        Ok(())
    }

    pub fn insert_class(&mut self, class: ClassSymbol) -> Result<()> {
        let name = class.name;

        if self.classes.insert(name, class).is_some() {
            return Err(InternalError::DuplicateDefinition(name.to_string()));
        }

        self.class_order.push(name);
        Ok(())
    }

    pub fn function(&self, name: InternedSymbol) -> Option<&FunctionSignature> {
        self.functions.get(&name)
    }

    pub fn class(&self, name: InternedSymbol) -> Option<&ClassSymbol> {
        self.classes.get(&name)
    }

    /// Classes in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = &ClassSymbol> {
        self.class_order.iter().filter_map(|name| self.classes.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::{Declarator, Definition, FunctionDefinition, VariableDefinition};

    fn empty_function(name: &str) -> Definition {
        Definition::Function(FunctionDefinition {
            name: InternedSymbol::new(name),
            return_type: SemanticType::void(),
            parameters: vec![],
            body: vec![],
        })
    }

    #[test]
    fn collects_classes_in_declaration_order() {
        let class = |name: &str| {
            Definition::Class(ast::ClassDefinition {
                name: InternedSymbol::new(name),
                members: vec![VariableDefinition {
                    ty: SemanticType::int(),
                    declarators: vec![
                        Declarator {
                            name: InternedSymbol::new("x"),
                            initializer: None,
                        },
                        Declarator {
                            name: InternedSymbol::new("y"),
                            initializer: None,
                        },
                    ],
                }],
                constructor: None,
                methods: vec![],
            })
        };

        let program = ast::Program {
            definitions: vec![class("B"), empty_function("f"), class("A")],
        };
        let symbols = GlobalSymbols::collect(&program).unwrap();

        let names = symbols.classes().map(|c| c.name.value()).collect::<Vec<_>>();
        assert_eq!(names, ["B", "A"]);

        let a = symbols.class(InternedSymbol::new("A")).unwrap();
        assert_eq!(a.members.len(), 2);
        assert!(!a.has_constructor);
        assert!(symbols.function(InternedSymbol::new("f")).is_some());
    }

    #[test]
    fn duplicate_functions_are_rejected() {
        let program = ast::Program {
            definitions: vec![empty_function("twice"), empty_function("twice")],
        };

        assert_eq!(
            GlobalSymbols::collect(&program).unwrap_err(),
            InternalError::DuplicateDefinition("twice".to_owned())
        );
    }
}
