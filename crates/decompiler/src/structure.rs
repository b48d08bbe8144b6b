//! Control-flow structuring passes.
//!
//! Order matters and is fixed: user labels first (they create the graph
//! shapes nothing else can express), then natural loops from back edges,
//! then single-goto compression, then the undirected-cycle merge. The
//! merge pass is skipped in handwritten mode, where its acyclicity
//! assumption is not safe.

use std::collections::BTreeSet;

use flw_core::Alerts;
use tracing::debug;

use crate::abst::Abst;
use crate::ast::{AstNode, BlockId, Tag};
use crate::cfg::ControlFlowGraph;

impl Abst {
    /// Turn user-named labels into `Label` statements and their references
    /// into `ReallyGoto`s, keeping one reference as a natural jump where
    /// that is safe.
    pub(crate) fn handle_special_labels(&mut self, alerts: &mut Alerts) {
        let label_blocks: Vec<u32> = self.special_labels.keys().copied().collect();
        for label_block in label_blocks {
            let label_block = BlockId(label_block);

            // Follow a chain of single-goto blocks to its end, discarding
            // the chain itself.
            let mut chain_end = label_block;
            let mut seen = BTreeSet::new();
            loop {
                if !seen.insert(chain_end) {
                    alerts.warn(format!(
                        "Goto chain from label block {} loops back on itself.",
                        label_block.0
                    ));
                    break;
                }
                let children = &self.block(chain_end).children;
                if children.len() == 1 {
                    let stmt_id = children[0];
                    let stmt = self.node(stmt_id);
                    if stmt.tag == Tag::Goto {
                        let next = stmt.val_block(0);
                        self.mark_block_unused(chain_end);
                        self.release_node(stmt_id);
                        chain_end = next;
                        continue;
                    }
                }
                break;
            }

            let label_stmt = self
                .alloc_node(AstNode::new(Tag::Label, vec![i64::from(label_block.0)], vec![]));
            self.block_mut(chain_end).children.insert(0, label_stmt);
            self.special_blocks.insert(chain_end);

            // Split the live references to the label block into the one
            // conditional branch (if any), other ifs, and plain gotos.
            let mut if_reaches: Vec<BlockId> = Vec::new();
            let mut goto_reaches: Vec<BlockId> = Vec::new();
            let mut chain_has_preds = false;
            for &b in &self.used_blocks() {
                let Some(last) = self.last_stmt(b) else { continue };
                let stmt = self.node(last);
                match stmt.tag {
                    Tag::Goto | Tag::If => {
                        if stmt.vals.contains(&i64::from(label_block.0)) {
                            if stmt.tag == Tag::If {
                                if_reaches.push(b);
                            } else {
                                goto_reaches.push(b);
                            }
                        }
                        if stmt.vals.contains(&i64::from(chain_end.0)) {
                            chain_has_preds = true;
                        }
                    }
                    _ => {}
                }
            }
            if if_reaches.len() > 1 {
                alerts.warn("2 or more if statements have branches to the same label");
            }

            let mut reaches: Vec<BlockId> =
                if_reaches.iter().chain(goto_reaches.iter()).copied().collect();

            // One reference survives as a real jump, redirected to the
            // chain end; unless the chain collapsed and the chain end has
            // other predecessors, in which case every reference must stay
            // an explicit goto.
            let keep_natural_jump = !(chain_has_preds && chain_end != label_block);
            if keep_natural_jump && !reaches.is_empty() {
                let first = reaches.remove(0);
                if let Some(last) = self.last_stmt(first) {
                    let stmt = self.node_mut(last);
                    if stmt.tag == Tag::If {
                        for idx in 0..stmt.vals.len().min(2) {
                            if stmt.vals[idx] == i64::from(label_block.0) {
                                stmt.vals[idx] = i64::from(chain_end.0);
                            }
                        }
                    } else {
                        stmt.vals[0] = i64::from(chain_end.0);
                    }
                }
            }
            for b in reaches {
                let Some(last) = self.last_stmt(b) else { continue };
                self.release_subtree(last);
                let really = self.alloc_node(AstNode::new(
                    Tag::ReallyGoto,
                    vec![i64::from(label_block.0)],
                    vec![],
                ));
                if let Some(slot) = self.block_mut(b).children.last_mut() {
                    *slot = really;
                }
                self.special_gotos.insert(b);
            }
        }
    }

    /// Recover natural loops from back edges and rewrite jumps inside each
    /// loop into `continue`/`break` statements.
    pub(crate) fn handle_directed_cycles(&mut self, alerts: &mut Alerts) {
        let cfg = ControlFlowGraph::new(self, alerts);
        debug!(loops = cfg.loops.len(), "recovering natural loops");

        // Innermost loops come first, so an outer loop always sees its
        // inner loops already structured.
        for control_loop in &cfg.loops {
            let entry = control_loop.entry_block;
            let Some(terminal) = self.last_stmt(entry) else {
                alerts.warn(format!("Loop entry block {} is empty; loop skipped.", entry.0));
                continue;
            };
            let if_stmt = self.node(terminal).clone();
            if if_stmt.tag != Tag::If || if_stmt.vals.len() != 2 || if_stmt.children.is_empty() {
                alerts.warn(format!(
                    "Loop entry block {} does not end in a two-way conditional; loop skipped.",
                    entry.0
                ));
                continue;
            }

            // Branch order decides whether the guard is the stay-in-loop
            // condition or its negation.
            let mut inner_block = if_stmt.val_block(0);
            let mut break_block = if_stmt.val_block(1);
            let mut cond = if_stmt.children[0];
            if break_block != control_loop.break_block {
                std::mem::swap(&mut inner_block, &mut break_block);
                cond = self.negate_bool(cond);
            }
            self.set_node(
                terminal,
                AstNode::new(
                    Tag::Loop,
                    vec![
                        i64::from(inner_block.0),
                        i64::from(break_block.0),
                        i64::from(control_loop.continue_block.0),
                    ],
                    vec![cond],
                ),
            );

            // Dropping the continue block's terminal jump breaks the
            // explicit cycle.
            if let Some(jump) = self.block_mut(control_loop.continue_block).children.pop() {
                self.release_node(jump);
            }

            // Remaining jumps to the continue/break blocks become
            // continue/break statements; conditional branches get a tiny
            // block holding just the statement.
            let other_blocks: Vec<BlockId> =
                control_loop.other_blocks.iter().copied().collect();
            for block in other_blocks {
                let Some(last) = self.last_stmt(block) else { continue };
                match self.node(last).tag {
                    Tag::Goto => {
                        let dest = self.node(last).val_block(0);
                        let tag = if dest == control_loop.continue_block {
                            Tag::Continue
                        } else if dest == control_loop.break_block {
                            Tag::Break
                        } else {
                            continue;
                        };
                        self.release_node(last);
                        let stmt = self.alloc_node(AstNode::new(tag, vec![], vec![]));
                        if let Some(slot) = self.block_mut(block).children.last_mut() {
                            *slot = stmt;
                        }
                    }
                    Tag::If => {
                        let vals = self.node(last).vals.clone();
                        for (idx, &val) in vals.iter().enumerate() {
                            let dest = BlockId(val as u32);
                            let tag = if dest == control_loop.continue_block {
                                Tag::Continue
                            } else if dest == control_loop.break_block {
                                Tag::Break
                            } else {
                                continue;
                            };
                            let new_block = self.new_single_block(tag);
                            self.node_mut(last).vals[idx] = i64::from(new_block.0);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    /// Dissolve blocks that contain nothing but a single `goto`,
    /// retargeting their predecessors directly.
    pub(crate) fn clear_single_gotos(&mut self) {
        for idx in 0..self.block_count() {
            let comes_from = BlockId(idx as u32);
            if !self.block_is_used(comes_from) {
                continue;
            }
            let children = self.block(comes_from).children.clone();
            if children.len() != 1 {
                continue;
            }
            let stmt_id = children[0];
            if self.node(stmt_id).tag != Tag::Goto {
                continue;
            }
            let goes_to = self.node(stmt_id).val_block(0);

            for jdx in 0..self.block_count() {
                let pred = BlockId(jdx as u32);
                if !self.block_is_used(pred) {
                    continue;
                }
                let Some(last) = self.last_stmt(pred) else { continue };
                if matches!(self.node(last).tag, Tag::If | Tag::Goto | Tag::Loop) {
                    for val in &mut self.node_mut(last).vals {
                        if *val == i64::from(comes_from.0) {
                            *val = i64::from(goes_to.0);
                        }
                    }
                }
            }
            self.release_node(stmt_id);
            self.mark_block_unused(comes_from);
        }
    }

    /// Merge join blocks (multiple predecessors) into the least common
    /// ancestor of their predecessors. Only safe once directed cycles are
    /// gone; a residual cycle aborts the pass with a warning.
    pub(crate) fn handle_undirected_cycles(&mut self, alerts: &mut Alerts) {
        let block_count = self.block_count();
        let mut predecessors: Vec<Vec<BlockId>> = vec![Vec::new(); block_count];
        for &b in &self.used_blocks() {
            let Some(last) = self.last_stmt(b) else { continue };
            let stmt = self.node(last);
            if matches!(stmt.tag, Tag::If | Tag::Goto | Tag::Loop) {
                for &val in &stmt.vals {
                    predecessors[val as usize].push(b);
                }
            }
        }

        let Some(order) = self.reverse_topological_order(&predecessors, alerts) else {
            return;
        };

        for b in order {
            if predecessors[b.index()].len() > 1 {
                let Some(target) = self.lca(&predecessors[b.index()], &predecessors, alerts)
                else {
                    return;
                };
                if target == b {
                    alerts.warn(format!(
                        "Join block {} is its own merge target; merge skipped.",
                        b.0
                    ));
                    continue;
                }
                self.merge_into(b, target, &predecessors, alerts);
            }
        }
    }

    /// Reverse topological order over the predecessor relation: a block
    /// comes before every one of its predecessors. `None` if a residual
    /// cycle is found.
    fn reverse_topological_order(
        &self,
        predecessors: &[Vec<BlockId>],
        alerts: &mut Alerts,
    ) -> Option<Vec<BlockId>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }
        let mut marks = vec![Mark::White; predecessors.len()];
        let mut order: Vec<BlockId> = Vec::new();

        for &start in &self.used_blocks() {
            if marks[start.index()] != Mark::White {
                continue;
            }
            let mut stack: Vec<(BlockId, usize)> = vec![(start, 0)];
            marks[start.index()] = Mark::Gray;
            while let Some(&mut (b, ref mut next)) = stack.last_mut() {
                if *next < predecessors[b.index()].len() {
                    let pred = predecessors[b.index()][*next];
                    *next += 1;
                    match marks[pred.index()] {
                        Mark::White => {
                            marks[pred.index()] = Mark::Gray;
                            stack.push((pred, 0));
                        }
                        Mark::Gray => {
                            alerts.warn(
                                "Control flow still contains a cycle after loop recovery; \
                                 skipping the join-merge pass.",
                            );
                            return None;
                        }
                        Mark::Black => {}
                    }
                } else {
                    stack.pop();
                    marks[b.index()] = Mark::Black;
                    order.insert(0, b);
                }
            }
        }
        Some(order)
    }

    /// Least common ancestor of a set of blocks, reduced pairwise.
    fn lca(
        &self,
        blocks: &[BlockId],
        predecessors: &[Vec<BlockId>],
        alerts: &mut Alerts,
    ) -> Option<BlockId> {
        let mut current: Vec<BlockId> = blocks.to_vec();
        while current.len() > 1 {
            let mut reduced: Vec<BlockId> = Vec::new();
            for pair in current.chunks(2) {
                match *pair {
                    [a, b] => reduced.push(self.lca2(a, b, predecessors, alerts)?),
                    [a] => reduced.push(a),
                    _ => unreachable!("chunks(2) yields one- or two-element slices"),
                }
            }
            current = reduced;
        }
        current.first().copied()
    }

    /// Walk both blocks toward their procedure entry and intersect the
    /// paths. The walk is capped; running out means the graph is not the
    /// shape this pass requires.
    fn lca2(
        &self,
        b1: BlockId,
        b2: BlockId,
        predecessors: &[Vec<BlockId>],
        alerts: &mut Alerts,
    ) -> Option<BlockId> {
        let cap = predecessors.len() + 1;
        let mut b1_path = vec![b1];
        let mut current = b1;
        for _ in 0..cap {
            if self.procedure_map.contains_key(&current.0) {
                break;
            }
            match predecessors[current.index()].first() {
                Some(&pred) => {
                    current = pred;
                    b1_path.push(current);
                }
                None => break,
            }
        }

        let mut current = b2;
        for _ in 0..cap {
            if b1_path.contains(&current) {
                return Some(current);
            }
            match predecessors[current.index()].first() {
                Some(&pred) => current = pred,
                None => break,
            }
        }
        alerts.warn(format!(
            "No common ancestor for blocks {} and {}; skipping the join-merge pass.",
            b1.0, b2.0
        ));
        None
    }

    /// Detach `inner` from its predecessors and append its statements to
    /// `outer`.
    fn merge_into(
        &mut self,
        inner: BlockId,
        outer: BlockId,
        predecessors: &[Vec<BlockId>],
        alerts: &mut Alerts,
    ) {
        for &pred in &predecessors[inner.index()] {
            let Some(last) = self.last_stmt(pred) else { continue };
            match self.node(last).tag {
                Tag::Goto => {
                    self.release_node(last);
                    self.block_mut(pred).children.pop();
                }
                Tag::If => {
                    let vals = self.node(last).vals.clone();
                    if vals.len() >= 2 && vals[1] == i64::from(inner.0) {
                        self.node_mut(last).vals.pop();
                    } else if !vals.is_empty() && vals[0] == i64::from(inner.0) {
                        let guard = self.node(last).children[0];
                        let negated = self.negate_bool(guard);
                        let stmt = self.node_mut(last);
                        stmt.children[0] = negated;
                        stmt.vals.remove(0);
                    } else {
                        alerts.warn(format!(
                            "Conditional in block {} no longer references merged block {}.",
                            pred.0, inner.0
                        ));
                    }
                }
                // Loop back-references are block slots, not jumps; they are
                // not rewritten here.
                _ => {}
            }
        }
        let inner_children = std::mem::take(&mut self.block_mut(inner).children);
        self.block_mut(outer).children.extend(inner_children);
        self.mark_block_unused(inner);
    }
}
