//! Abstracted operations and basic blocks.
//!
//! Operations are instructions after flow abstraction: synthetic opcodes
//! are in play, jump/call operands have been renumbered to block ids, and
//! every operation carries its stack effect once arity inference has run.

use flw_core::Opcode;

use crate::natives::NativeRegistry;

/// One abstracted operation: an opcode, its arguments, and the number of
/// stack slots it pushes and pops.
///
/// `pops` starts out unknown for natives missing from the registry and for
/// CALLs; flow abstraction fills them in afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub opcode: Opcode,
    pub args: Vec<i64>,
    pub pushes: Option<u32>,
    pub pops: Option<u32>,
}

impl Operation {
    pub fn new(opcode: Opcode, args: Vec<i64>, natives: &NativeRegistry) -> Operation {
        let (pushes, pops) = match opcode {
            Opcode::Func | Opcode::Send => {
                let pushes = if opcode == Opcode::Func { 1 } else { 0 };
                // Unknown natives leave pops to be inferred from the stack.
                let pops = natives
                    .lookup(args[0] as u16)
                    .map(|f| u32::from(f.num_params));
                (Some(pushes), pops)
            }
            // Nothing is known about a call until procedure arity inference.
            Opcode::Call => (None, None),
            _ => match opcode.stack_effect() {
                Some((pushes, pops)) => (Some(pushes), Some(pops)),
                None => (None, None),
            },
        };
        Operation { opcode, args, pushes, pops }
    }

    pub fn display(&self) -> String {
        let args = if self.args.is_empty() {
            String::new()
        } else {
            format!("{:?}", self.args)
        };
        let effect = format!(
            "(+{} -{})",
            self.pushes.map_or("?".to_string(), |p| p.to_string()),
            self.pops.map_or("?".to_string(), |p| p.to_string()),
        );
        format!("{}\t{}\t{}", self.opcode.mnemonic(), args, effect)
    }
}

/// A list of operations with exactly one entry and one exit.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub operations: Vec<Operation>,
    pub id: u32,
}

impl BasicBlock {
    pub fn display(&self) -> String {
        let mut lines = vec![format!("-Block {}", self.id)];
        lines.extend(self.operations.iter().map(Operation::display));
        lines.join("\n")
    }
}

/// Name and arity of one procedure.
///
/// `pushes` is the return arity; this dialect has no value-returning
/// procedures, so it is always 0 today.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcedureInfo {
    /// Block id of the procedure's entry
    pub block_num: u32,
    pub name: String,
    pub pushes: u32,
    /// Parameter count, inferred from the entry block's pop prologue
    pub pops: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::natives::Game;

    #[test]
    fn test_known_native_gets_registry_arity() {
        let natives = NativeRegistry::for_game(Game::Eo3).unwrap();
        // rand(x) takes one parameter and returns a value.
        let func = Operation::new(Opcode::Func, vec![0x80], &natives);
        assert_eq!(func.pushes, Some(1));
        assert_eq!(func.pops, Some(1));

        let send = Operation::new(Opcode::Send, vec![0x90], &natives);
        assert_eq!(send.pushes, Some(0));
        assert_eq!(send.pops, Some(0));
    }

    #[test]
    fn test_unknown_native_leaves_pops_open() {
        let natives = NativeRegistry::for_game(Game::Eo3).unwrap();
        let func = Operation::new(Opcode::Func, vec![0x7FFF], &natives);
        assert_eq!(func.pushes, Some(1));
        assert_eq!(func.pops, None);
    }

    #[test]
    fn test_call_is_fully_unknown() {
        let natives = NativeRegistry::for_game(Game::Eo3).unwrap();
        let call = Operation::new(Opcode::Call, vec![2], &natives);
        assert_eq!(call.pushes, None);
        assert_eq!(call.pops, None);
    }

    #[test]
    fn test_static_effects_pass_through() {
        let natives = NativeRegistry::for_game(Game::Eo3).unwrap();
        let add = Operation::new(Opcode::Add, vec![], &natives);
        assert_eq!((add.pushes, add.pops), (Some(1), Some(2)));
    }
}
