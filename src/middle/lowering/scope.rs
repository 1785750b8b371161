use hashbrown::HashMap;

use crate::{
    frontend::intern::InternedSymbol,
    middle::{
        ir::{BlockId, Operand, RegisterId},
        ty::Type,
    },
};

/// Where a named variable lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    /// A stack cell; the register holds its address
    Local(RegisterId),
    Global(InternedSymbol),
}

impl Storage {
    pub fn address(self) -> Operand {
        match self {
            Storage::Local(register) => Operand::Register(register),
            Storage::Global(name) => Operand::Global(name),
        }
    }
}

/// The blocks `break` and `continue` jump to inside a loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTargets {
    pub condition: BlockId,
    /// Only `for` loops have a step block
    pub step: Option<BlockId>,
    pub next: BlockId,
}

impl LoopTargets {
    pub fn continue_target(&self) -> BlockId {
        self.step.unwrap_or(self.condition)
    }

    pub fn break_target(&self) -> BlockId {
        self.next
    }
}

#[derive(Debug, Default)]
struct Scope {
    variables: HashMap<InternedSymbol, (Storage, Type)>,
    loop_targets: Option<LoopTargets>,
}

/// The lexical environment of the body being lowered. Each scope lives
/// exactly as long as its syntactic region, so a stack is enough to
/// represent the parent chain.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<Scope>,
}

impl ScopeStack {
    pub fn push(&mut self) {
        self.scopes.push(Scope::default());
    }

    pub fn push_loop(&mut self, targets: LoopTargets) {
        self.scopes.push(Scope {
            variables: HashMap::new(),
            loop_targets: Some(targets),
        });
    }

    pub fn pop(&mut self) {
        self.scopes.pop();
    }

    pub fn declare(&mut self, name: InternedSymbol, storage: Storage, ty: Type) {
        if self.scopes.is_empty() {
            self.push();
        }

        if let Some(scope) = self.scopes.last_mut() {
            scope.variables.insert(name, (storage, ty));
        }
    }

    /// Looks `name` up from the innermost scope outwards.
    pub fn resolve(&self, name: InternedSymbol) -> Option<(Storage, &Type)> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.variables.get(&name))
            .map(|(storage, ty)| (*storage, ty))
    }

    pub fn innermost_loop(&self) -> Option<LoopTargets> {
        self.scopes.iter().rev().find_map(|scope| scope.loop_targets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn inner_declarations_shadow_outer_ones() {
        let x = InternedSymbol::new("x");
        let mut scopes = ScopeStack::default();

        scopes.declare(x, Storage::Global(x), Type::Int);
        scopes.push();
        scopes.declare(x, Storage::Local(RegisterId::new(3)), Type::Bool);

        assert_eq!(
            scopes.resolve(x).map(|(s, _)| s),
            Some(Storage::Local(RegisterId::new(3)))
        );

        scopes.pop();
        assert_eq!(scopes.resolve(x).map(|(s, _)| s), Some(Storage::Global(x)));
    }

    #[test]
    fn loop_targets_come_from_the_innermost_loop() {
        let outer = LoopTargets {
            condition: BlockId::new(1),
            step: None,
            next: BlockId::new(2),
        };
        let inner = LoopTargets {
            condition: BlockId::new(3),
            step: Some(BlockId::new(4)),
            next: BlockId::new(5),
        };
        let mut scopes = ScopeStack::default();

        assert_eq!(scopes.innermost_loop(), None);

        scopes.push_loop(outer);
        scopes.push_loop(inner);
        scopes.push();

        let targets = scopes.innermost_loop().unwrap();
        assert_eq!(targets.continue_target(), BlockId::new(4));
        assert_eq!(targets.break_target(), BlockId::new(5));

        scopes.pop();
        scopes.pop();
        assert_eq!(scopes.innermost_loop().unwrap().continue_target(), BlockId::new(1));
    }
}
