//! Flow blocks: the instruction stream sliced at label boundaries.

use crate::alerts::Alerts;
use crate::instruction::Instruction;
use crate::label::{Label, LabelKind};
use crate::opcode::Opcode;

/// A label plus the instructions between it and the next label.
///
/// After construction every block ends in END, JUMP, GOTO, or IF; blocks
/// that would fall off the end get an explicit GOTO to the next label.
#[derive(Debug, Clone)]
pub struct FlowBlock {
    pub name: String,
    /// Stream location of the block's label
    pub start: u32,
    /// Index of the originating label within its section; rewritten during
    /// flow abstraction
    pub label_index: u16,
    pub label_kind: LabelKind,
    pub instructions: Vec<Instruction>,
    pub procedure_id: u32,
}

impl FlowBlock {
    /// Build a block from a slice of the decoded stream (sentinel slots
    /// included; they are dropped here).
    ///
    /// `dce` discards instructions after the first unconditional terminator.
    /// It is always on for decompilation and only optional for disassembly
    /// listings.
    pub fn new(
        label: &Label,
        instructions: &[Option<Instruction>],
        procedure_id: u32,
        next_label: Option<&Label>,
        dce: bool,
        alerts: &mut Alerts,
    ) -> FlowBlock {
        let mut instructions: Vec<Instruction> =
            instructions.iter().filter_map(|i| i.clone()).collect();

        if dce {
            if let Some(end) =
                instructions.iter().position(|i| i.opcode.is_block_ender())
            {
                instructions.truncate(end + 1);
            }
        }

        let no_fallthrough = match instructions.last() {
            None => true,
            Some(last) => {
                !(last.opcode.is_block_ender() || last.opcode == Opcode::If)
            }
        };
        if no_fallthrough {
            match next_label {
                Some(next) => instructions.push(Instruction::synthetic_goto(next.index)),
                None => alerts.warn(
                    "Final block does not end in an IF, JUMP, GOTO, or END, or is empty.",
                ),
            }
        }

        FlowBlock {
            name: label.name.clone(),
            start: label.target_location,
            label_index: label.index,
            label_kind: label.kind,
            instructions,
            procedure_id,
        }
    }

    /// Render the block as a disassembly listing.
    pub fn display(&self, proc_labels: &[Label], jump_labels: &[Label]) -> String {
        let mut lines = vec![format!("label: {}", self.name)];
        for instr in &self.instructions {
            lines.push(instr.display(proc_labels, jump_labels));
        }
        lines.join("\n")
    }
}
