//! Per-procedure reachability over flow blocks.
//!
//! Builds jump-target out-edges for one procedure's blocks and marks which
//! non-entry blocks are reachable from the entry. A revisit of a block that
//! lies on the path that discovered it flags a directed cycle; cycles are
//! legal (loops), the flag just tells later stages to expect them.

use std::collections::{BTreeSet, HashMap, VecDeque};

use crate::alerts::Alerts;
use crate::block::FlowBlock;

/// Out-edge and reachability data for one procedure.
#[derive(Debug, Clone)]
pub struct FlowBlockGraph {
    /// Jump targets of the entry block
    pub start_outs: BTreeSet<u16>,
    /// Jump targets of every non-entry block, keyed by its label index
    pub other_outs: HashMap<u16, BTreeSet<u16>>,
    /// Reachability of every non-entry block; the entry is implicitly live
    pub reachable: HashMap<u16, bool>,
    pub has_cycles: bool,
}

impl FlowBlockGraph {
    pub fn new(proc_blocks: &[FlowBlock], alerts: &mut Alerts) -> FlowBlockGraph {
        fn out_edges(block: &FlowBlock) -> BTreeSet<u16> {
            block
                .instructions
                .iter()
                .filter(|i| i.opcode.is_jumper())
                .map(|i| i.operand as u16)
                .collect()
        }

        // A lone entry block has nothing to reach.
        if proc_blocks.len() <= 1 {
            return FlowBlockGraph {
                start_outs: BTreeSet::new(),
                other_outs: HashMap::new(),
                reachable: HashMap::new(),
                has_cycles: false,
            };
        }

        let start_outs = out_edges(&proc_blocks[0]);
        let other_outs: HashMap<u16, BTreeSet<u16>> = proc_blocks[1..]
            .iter()
            .map(|b| (b.label_index, out_edges(b)))
            .collect();

        let mut reachable: HashMap<u16, bool> =
            other_outs.keys().map(|&i| (i, false)).collect();
        let mut has_cycles = false;

        // BFS from the entry, remembering the discovery path of each block
        // so a revisit along its own path marks a directed cycle.
        let mut paths: HashMap<u16, Vec<u16>> = HashMap::new();
        let mut queue: VecDeque<u16> = VecDeque::new();

        let push_new = |outs: &BTreeSet<u16>,
                            pre: &[u16],
                            reachable: &mut HashMap<u16, bool>,
                            paths: &mut HashMap<u16, Vec<u16>>,
                            queue: &mut VecDeque<u16>,
                            has_cycles: &mut bool,
                            alerts: &mut Alerts| {
            for &target in outs {
                match reachable.get_mut(&target) {
                    None => alerts.warn(format!(
                        "Jump target {} is outside this procedure's blocks.",
                        target
                    )),
                    Some(seen) if *seen => {
                        if pre.contains(&target) {
                            *has_cycles = true;
                        }
                    }
                    Some(seen) => {
                        *seen = true;
                        let mut path = pre.to_vec();
                        path.push(target);
                        paths.insert(target, path);
                        queue.push_back(target);
                    }
                }
            }
        };

        push_new(
            &start_outs,
            &[],
            &mut reachable,
            &mut paths,
            &mut queue,
            &mut has_cycles,
            alerts,
        );
        while let Some(current) = queue.pop_front() {
            let pre = paths.get(&current).cloned().unwrap_or_default();
            if let Some(outs) = other_outs.get(&current).cloned() {
                push_new(
                    &outs,
                    &pre,
                    &mut reachable,
                    &mut paths,
                    &mut queue,
                    &mut has_cycles,
                    alerts,
                );
            }
        }

        FlowBlockGraph { start_outs, other_outs, reachable, has_cycles }
    }

    /// Whether the block with the given label index is reachable from the
    /// procedure entry. The entry itself is always live.
    pub fn is_reachable(&self, label_index: u16) -> bool {
        self.reachable.get(&label_index).copied().unwrap_or(false)
    }
}
