use std::collections::BTreeSet;

use crate::{
    error::{InternalError, Result},
    middle::ir::{Function, Program},
};

/// Checks the structural invariants of a lowered function: the entry block
/// comes first, every laid out block has a terminator, and successor and
/// predecessor sets agree with the terminators.
pub fn verify_function(function: &Function) -> Result<()> {
    let function_name = function.name.to_string();
    let inconsistent = |label: &str| InternalError::InconsistentEdges {
        function: function_name.clone(),
        label: label.to_owned(),
    };

    if function.layout.first() != Some(&function.entry) {
        return Err(inconsistent(&function.blocks[function.entry].label));
    }

    if !function.layout.contains(&function.exit) {
        return Err(inconsistent(&function.blocks[function.exit].label));
    }

    let laid_out = function.layout.iter().copied().collect::<BTreeSet<_>>();

    for block in function.ordered_blocks() {
        let Some(terminator) = &block.terminator else {
            return Err(InternalError::MissingTerminator {
                function: function_name.clone(),
                label: block.label.clone(),
            });
        };

        let targets = terminator.successors().into_iter().collect::<BTreeSet<_>>();

        if targets != block.successors || !targets.is_subset(&laid_out) {
            return Err(inconsistent(&block.label));
        }

        let predecessors_agree = block
            .predecessors
            .iter()
            .all(|p| laid_out.contains(p) && function.blocks[*p].successors.contains(&block.id));

        if !predecessors_agree {
            return Err(inconsistent(&block.label));
        }
    }

    Ok(())
}

pub fn verify_program(program: &Program) -> Result<()> {
    program.all_functions().try_for_each(verify_function)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        frontend::intern::InternedSymbol,
        index::Index,
        middle::{
            ir::{Block, BlockId, Terminator},
            ty::Type,
        },
    };

    fn two_block_function(terminate_entry: bool) -> Function {
        let mut function = Function::new(InternedSymbol::new("verify_me"), Type::Void);
        let entry = function.blocks.next_index();
        let exit = BlockId::new(1);

        function.blocks.push(Block::new(
            entry,
            "entry0".to_owned(),
            terminate_entry.then_some(Terminator::Jump { destination: exit }),
        ));
        function.blocks.push(Block::new(
            exit,
            "exit1".to_owned(),
            Some(Terminator::Return { value: None }),
        ));
        function.entry = entry;
        function.exit = exit;
        function.layout = vec![entry, exit];
        function.rebuild_edges();
        function
    }

    #[test]
    fn well_formed_function_passes() {
        assert_eq!(verify_function(&two_block_function(true)), Ok(()));
    }

    #[test]
    fn missing_terminator_is_reported() {
        assert_eq!(
            verify_function(&two_block_function(false)),
            Err(InternalError::MissingTerminator {
                function: "verify_me".to_owned(),
                label: "entry0".to_owned()
            })
        );
    }

    #[test]
    fn stale_successor_sets_are_reported() {
        let mut function = two_block_function(true);
        function.blocks[function.exit].successors.insert(function.entry);

        assert!(matches!(
            verify_function(&function),
            Err(InternalError::InconsistentEdges { .. })
        ));
    }
}
