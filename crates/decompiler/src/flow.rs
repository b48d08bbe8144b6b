//! Flow abstraction: from decoded flow blocks to basic blocks of
//! operations.
//!
//! Three rewrites happen here, plus arity inference:
//!
//! - `IF` becomes `COND(target, fallthrough)` and the block is split right
//!   after it, so conditional branches only ever end a block.
//! - `COMM` becomes `FUNC` when the following instruction reads the result
//!   register (`PUSHREG`, which is consumed), `SEND` otherwise.
//! - An inter-procedure `JUMP` becomes `CALL` followed by `END`.
//!
//! Unreachable jump blocks are dropped, and all surviving blocks are
//! renumbered densely; jump and call operands follow the renumbering.

use std::collections::{BTreeMap, HashMap};

use flw_core::label::LabelKind;
use flw_core::{Alerts, FlowFile, Opcode};
use tracing::debug;

use crate::natives::NativeRegistry;
use crate::operation::{BasicBlock, Operation, ProcedureInfo};

/// Output of flow abstraction: densely numbered basic blocks, procedure
/// descriptors, and the user-named labels keyed by their new block id.
#[derive(Debug)]
pub struct AbstractFlow {
    pub blocks: Vec<BasicBlock>,
    pub procedures: Vec<ProcedureInfo>,
    pub special_labels: BTreeMap<u32, String>,
}

/// Run flow abstraction over a parsed container.
pub fn abstract_flow(
    flow: &FlowFile,
    natives: &NativeRegistry,
    alerts: &mut Alerts,
) -> Result<AbstractFlow, String> {
    // Renumber surviving blocks densely, procedure by procedure.
    let mut jump_map: HashMap<u16, u32> = HashMap::new();
    let mut proc_map: HashMap<u16, u32> = HashMap::new();
    let mut kept: Vec<&flw_core::FlowBlock> = Vec::new();
    let mut procedures: Vec<ProcedureInfo> = Vec::new();
    let mut special_labels: BTreeMap<u32, String> = BTreeMap::new();

    let mut next_id: u32 = 0;
    for (graph, proc_blocks) in flow.block_graphs.iter().zip(&flow.flow_blocks) {
        for block in proc_blocks {
            if block.label_kind == LabelKind::Jump && !graph.is_reachable(block.label_index) {
                continue;
            }
            match block.label_kind {
                LabelKind::Procedure => {
                    proc_map.insert(block.label_index, next_id);
                    procedures.push(ProcedureInfo {
                        block_num: next_id,
                        name: block.name.clone(),
                        pushes: 0,
                        pops: 0,
                    });
                }
                LabelKind::Jump => {
                    jump_map.insert(block.label_index, next_id);
                }
                LabelKind::Special => {
                    jump_map.insert(block.label_index, next_id);
                    special_labels.insert(next_id, block.name.clone());
                }
            }
            kept.push(block);
            next_id += 1;
        }
    }
    let renumbered_count = next_id;

    let map_jump = |operand: u32, alerts: &mut Alerts| -> u32 {
        match jump_map.get(&(operand as u16)) {
            Some(&new) => new,
            None => {
                alerts.warn(format!("Jump to removed or unknown block {}.", operand));
                0
            }
        }
    };
    let map_proc = |operand: u32, alerts: &mut Alerts| -> u32 {
        match proc_map.get(&(operand as u16)) {
            Some(&new) => new,
            None => {
                alerts.warn(format!("Call to unknown procedure label {}.", operand));
                0
            }
        }
    };

    // Build the operation blocks, splitting after every COND that is not
    // already the last instruction of its block.
    let mut blocks: Vec<Option<BasicBlock>> = Vec::new();
    blocks.resize_with(renumbered_count as usize, || None);
    let put_block = |blocks: &mut Vec<Option<BasicBlock>>, block: BasicBlock| {
        let idx = block.id as usize;
        if idx >= blocks.len() {
            blocks.resize_with(idx + 1, || None);
        }
        blocks[idx] = Some(block);
    };

    for (kept_idx, block) in kept.iter().enumerate() {
        let mut current_id = kept_idx as u32;
        let mut operations: Vec<Operation> = Vec::new();
        let mut need_skip = false;
        let instrs = &block.instructions;
        for (idx, instr) in instrs.iter().enumerate() {
            if need_skip {
                need_skip = false;
                continue;
            }
            match instr.opcode {
                Opcode::If => {
                    let target = i64::from(map_jump(instr.operand, alerts));
                    let is_last = idx == instrs.len() - 1;
                    // The fallthrough branch is the block holding the rest
                    // of these instructions.
                    let fallthrough = i64::from(next_id);
                    if is_last {
                        alerts.warn(format!(
                            "Block {} ends in an IF with no explicit fall-through jump.",
                            current_id
                        ));
                    }
                    operations.push(Operation::new(
                        Opcode::Cond,
                        vec![target, fallthrough],
                        natives,
                    ));
                    put_block(
                        &mut blocks,
                        BasicBlock { operations: std::mem::take(&mut operations), id: current_id },
                    );
                    if !is_last {
                        current_id = next_id;
                        next_id += 1;
                    }
                }
                Opcode::Comm => {
                    let reads_result =
                        instrs.get(idx + 1).is_some_and(|n| n.opcode == Opcode::PushReg);
                    if reads_result {
                        need_skip = true;
                        operations.push(Operation::new(
                            Opcode::Func,
                            vec![i64::from(instr.operand)],
                            natives,
                        ));
                    } else {
                        operations.push(Operation::new(
                            Opcode::Send,
                            vec![i64::from(instr.operand)],
                            natives,
                        ));
                    }
                }
                Opcode::Jump => {
                    operations.push(Operation::new(
                        Opcode::Call,
                        vec![i64::from(map_proc(instr.operand, alerts))],
                        natives,
                    ));
                    operations.push(Operation::new(Opcode::End, vec![], natives));
                }
                Opcode::Goto => {
                    operations.push(Operation::new(
                        Opcode::Goto,
                        vec![i64::from(map_jump(instr.operand, alerts))],
                        natives,
                    ));
                }
                Opcode::Call => {
                    operations.push(Operation::new(
                        Opcode::Call,
                        vec![i64::from(map_proc(instr.operand, alerts))],
                        natives,
                    ));
                }
                opcode if !opcode.has_operand() => {
                    operations.push(Operation::new(opcode, vec![], natives));
                }
                opcode => {
                    // Wide operands are unsigned (or float bits); narrow
                    // ones were sign-extended by the decoder.
                    let arg = if instr.wide {
                        i64::from(instr.operand)
                    } else {
                        i64::from(instr.operand_i32())
                    };
                    operations.push(Operation::new(opcode, vec![arg], natives));
                }
            }
        }
        // Whatever is left (or the whole block when no split happened).
        let already_stored =
            blocks.get(current_id as usize).is_some_and(|b| b.is_some());
        if !operations.is_empty() || !already_stored {
            put_block(&mut blocks, BasicBlock { operations, id: current_id });
        }
    }

    let mut blocks: Vec<BasicBlock> = blocks
        .into_iter()
        .enumerate()
        .map(|(idx, b)| b.ok_or_else(|| format!("block {} was never constructed", idx)))
        .collect::<Result<_, String>>()?;
    debug!(blocks = blocks.len(), procedures = procedures.len(), "abstracted flow");

    infer_procedure_arity(&mut blocks, &mut procedures, alerts);
    resolve_stack_effects(&mut blocks, &procedures, alerts);

    Ok(AbstractFlow { blocks, procedures, special_labels })
}

/// Infer each procedure's parameter count from its entry block: arguments
/// are popped immediately, so count pops until the first operation that is
/// not part of that prologue.
fn infer_procedure_arity(
    blocks: &mut [BasicBlock],
    procedures: &mut [ProcedureInfo],
    alerts: &mut Alerts,
) {
    for proc in procedures.iter_mut() {
        let block = &blocks[proc.block_num as usize];
        let mut pops: u32 = 0;
        for oper in &block.operations {
            match oper.opcode {
                Opcode::PopIx
                | Opcode::PopFx
                | Opcode::PopLix
                | Opcode::PopLfx
                | Opcode::Cond => pops += 1,
                Opcode::Proc => {}
                Opcode::Func | Opcode::Send => match oper.pops {
                    Some(p) => pops += p,
                    None => {
                        alerts.warn(
                            "An unknown native function begins a procedure. \
                             Cannot determine the number of arguments to the procedure.",
                        );
                        break;
                    }
                },
                _ => break,
            }
        }
        proc.pops = pops;
        proc.pushes = 0;
    }
}

/// Fill in unknown pops by walking each block's stack height: an unknown
/// native must consume exactly what would otherwise be left over at the
/// block's lowest future height.
fn resolve_stack_effects(
    blocks: &mut [BasicBlock],
    procedures: &[ProcedureInfo],
    alerts: &mut Alerts,
) {
    let pop_map: HashMap<u32, u32> =
        procedures.iter().map(|p| (p.block_num, p.pops)).collect();

    for block in blocks.iter_mut() {
        let mut height: i64 = pop_map.get(&block.id).copied().unwrap_or(0).into();
        for idx in 0..block.operations.len() {
            if block.operations[idx].opcode == Opcode::Call {
                let callee = block.operations[idx].args[0] as u32;
                match procedures.iter().find(|p| p.block_num == callee) {
                    Some(proc) => {
                        block.operations[idx].pushes = Some(proc.pushes);
                        block.operations[idx].pops = Some(proc.pops);
                    }
                    None => alerts.warn(format!(
                        "CALL in block {} targets no known procedure.",
                        block.id
                    )),
                }
            }
            if block.operations[idx].pops.is_none() {
                let lowest = lowest_height_after(&block.operations, idx, height);
                if lowest < 0 {
                    alerts.warn(format!("Stack underflowed in block {}!", block.id));
                }
                block.operations[idx].pops = Some(lowest.max(0) as u32);
            }
            let oper = &block.operations[idx];
            height -= i64::from(oper.pops.unwrap_or(0));
            if height < 0 {
                alerts.warn(format!("Stack underflowed in block {}!", block.id));
            }
            height += i64::from(oper.pushes.unwrap_or(0));
        }
        if height != 0 {
            alerts.warn(format!(
                "Stack holds {} leftover value(s) at the end of block {}.",
                height, block.id
            ));
        }
    }
}

/// Minimum stack height reached from just before `operations[idx]` to the
/// end of the block, counting the operation's pushes but not its (unknown)
/// pops. Later unknown pops count as zero.
fn lowest_height_after(operations: &[Operation], idx: usize, height: i64) -> i64 {
    let mut height = height;
    let mut lowest = height;
    height += i64::from(operations[idx].pushes.unwrap_or(0));
    for oper in &operations[idx + 1..] {
        if let Some(pops) = oper.pops {
            height -= i64::from(pops);
        }
        lowest = lowest.min(height);
        height += i64::from(oper.pushes.unwrap_or(0));
    }
    lowest
}
