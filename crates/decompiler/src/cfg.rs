//! Control-flow graph over the ABST.
//!
//! Built once directed-goto structure is final (after special-label
//! handling) and consumed by natural-loop recovery. Dominators and
//! post-dominators use the classical iterative intersection fixpoint;
//! edges are classified by an explicit-stack DFS so deep graphs cannot
//! overflow the call stack.

use std::collections::{BTreeMap, BTreeSet};

use flw_core::Alerts;

use crate::abst::Abst;
use crate::ast::{BlockId, Tag};

/// DFS classification of an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Tree,
    Forward,
    Back,
    Cross,
}

/// The blocks making up one natural loop.
#[derive(Debug, Clone)]
pub struct ControlLoop {
    pub entry_block: BlockId,
    pub continue_block: BlockId,
    pub break_block: BlockId,
    pub other_blocks: BTreeSet<BlockId>,
    pub all_blocks: BTreeSet<BlockId>,
}

/// Adjacency, dominance, and loop data for one ABST.
#[derive(Debug)]
pub struct ControlFlowGraph {
    pub vertices: BTreeSet<BlockId>,
    pub sources: BTreeSet<BlockId>,
    pub sinks: BTreeSet<BlockId>,
    pub succs: BTreeMap<BlockId, BTreeSet<BlockId>>,
    pub preds: BTreeMap<BlockId, BTreeSet<BlockId>>,
    pub edges: BTreeSet<(BlockId, BlockId)>,
    pub dominators: BTreeMap<BlockId, BTreeSet<BlockId>>,
    pub post_dominators: BTreeMap<BlockId, BTreeSet<BlockId>>,
    pub edge_labels: BTreeMap<(BlockId, BlockId), EdgeKind>,
    /// Discovery path of each vertex reached by the DFS
    pub dfs_paths: BTreeMap<BlockId, Vec<BlockId>>,
    pub has_cycles: bool,
    pub loops: Vec<ControlLoop>,
}

impl ControlFlowGraph {
    pub fn new(tree: &Abst, alerts: &mut Alerts) -> ControlFlowGraph {
        let mut graph = ControlFlowGraph {
            vertices: BTreeSet::new(),
            sources: BTreeSet::new(),
            sinks: BTreeSet::new(),
            succs: BTreeMap::new(),
            preds: BTreeMap::new(),
            edges: BTreeSet::new(),
            dominators: BTreeMap::new(),
            post_dominators: BTreeMap::new(),
            edge_labels: BTreeMap::new(),
            dfs_paths: BTreeMap::new(),
            has_cycles: false,
            loops: Vec::new(),
        };
        graph.build(tree);
        graph.dominators = graph.compute_dominators(Direction::Forward);
        graph.post_dominators = graph.compute_dominators(Direction::Backward);
        graph.classify_edges();
        graph.collect_loops(alerts);
        graph
    }

    fn build(&mut self, tree: &Abst) {
        self.vertices = tree.used_blocks().into_iter().collect();
        self.sources = tree.procedures.iter().map(|p| BlockId(p.block_num)).collect();
        // Returns are added below; user gotos leave the structured region.
        self.sinks = tree.special_gotos.clone();
        for &v in &self.vertices {
            self.succs.entry(v).or_default();
            self.preds.entry(v).or_default();
        }
        for &tail in &self.vertices {
            // Jumps only occur as a block's final statement, by
            // construction of the lifter.
            let Some(last) = tree.last_stmt(tail) else { continue };
            let last = tree.node(last);
            let heads: Vec<BlockId> = match last.tag {
                Tag::Goto | Tag::If => {
                    (0..last.vals.len()).map(|i| last.val_block(i)).collect()
                }
                Tag::Return => {
                    self.sinks.insert(tail);
                    Vec::new()
                }
                _ => Vec::new(),
            };
            for head in heads {
                self.succs.entry(tail).or_default().insert(head);
                self.preds.entry(head).or_default().insert(tail);
                self.edges.insert((tail, head));
            }
        }
    }

    fn compute_dominators(&self, direction: Direction) -> BTreeMap<BlockId, BTreeSet<BlockId>> {
        let (adjacency, roots) = match direction {
            Direction::Forward => (&self.preds, &self.sources),
            Direction::Backward => (&self.succs, &self.sinks),
        };

        let mut dominators: BTreeMap<BlockId, BTreeSet<BlockId>> = BTreeMap::new();
        for &root in roots {
            dominators.insert(root, BTreeSet::from([root]));
        }
        let others: Vec<BlockId> =
            self.vertices.iter().copied().filter(|v| !roots.contains(v)).collect();
        for &v in &others {
            dominators.insert(v, self.vertices.clone());
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &v in &others {
                let neighbors = adjacency.get(&v).cloned().unwrap_or_default();
                let mut new_dom: BTreeSet<BlockId> = if neighbors.is_empty() {
                    // Unreachable in this direction; it dominates itself.
                    BTreeSet::new()
                } else {
                    let mut iter = neighbors.iter();
                    let first = *iter.next().expect("non-empty neighbor set");
                    let mut acc = dominators[&first].clone();
                    for n in iter {
                        acc = acc.intersection(&dominators[n]).copied().collect();
                    }
                    acc
                };
                new_dom.insert(v);
                if dominators[&v] != new_dom {
                    changed = true;
                    dominators.insert(v, new_dom);
                }
            }
        }
        dominators
    }

    /// Depth-first search from every source, labeling edges and recording
    /// each vertex's discovery path.
    fn classify_edges(&mut self) {
        let mut paths: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
        for &source in &self.sources {
            if paths.contains_key(&source) {
                continue;
            }
            paths.insert(source, vec![source]);
            let mut stack: Vec<(BlockId, Vec<BlockId>, usize)> = vec![(
                source,
                self.succs.get(&source).map(|s| s.iter().copied().collect()).unwrap_or_default(),
                0,
            )];
            while let Some(frame) = stack.last_mut() {
                let (v, succs, idx) = (frame.0, frame.1.clone(), frame.2);
                if idx >= succs.len() {
                    stack.pop();
                    continue;
                }
                frame.2 += 1;
                let u = succs[idx];
                if let Some(u_path) = paths.get(&u) {
                    let v_path = &paths[&v];
                    if v_path.contains(&u) {
                        self.edge_labels.insert((v, u), EdgeKind::Back);
                        self.has_cycles = true;
                    } else if u_path.contains(&v) {
                        self.edge_labels.insert((v, u), EdgeKind::Forward);
                    } else {
                        self.edge_labels.insert((v, u), EdgeKind::Cross);
                    }
                } else {
                    self.edge_labels.insert((v, u), EdgeKind::Tree);
                    let mut u_path = paths[&v].clone();
                    u_path.push(u);
                    paths.insert(u, u_path);
                    stack.push((
                        u,
                        self.succs.get(&u).map(|s| s.iter().copied().collect()).unwrap_or_default(),
                        0,
                    ));
                }
            }
        }
        self.dfs_paths = paths;
    }

    /// Every back edge `(u -> v)` defines a loop entered at `v` whose
    /// iteration jump lives in `u`. Shape deviations are warned about but
    /// do not stop the loop from being collected; only a break block that
    /// cannot be identified does.
    fn collect_loops(&mut self, alerts: &mut Alerts) {
        let mut loops = Vec::new();
        for (&(u, v), &label) in &self.edge_labels {
            if label != EdgeKind::Back {
                continue;
            }
            let entry_block = v;
            let continue_block = u;
            let empty = BTreeSet::new();
            let entry_succs = self.succs.get(&entry_block).unwrap_or(&empty);
            if entry_succs.len() != 2 {
                alerts.warn(format!(
                    "Entry block {} does not have 2 children.",
                    entry_block.0
                ));
            }
            if self.succs.get(&continue_block).map_or(0, BTreeSet::len) != 1 {
                alerts.warn(format!(
                    "Continue block {} does not have 1 child.",
                    continue_block.0
                ));
            }
            let mut should_be_dominated: BTreeSet<BlockId> = entry_succs.clone();
            should_be_dominated.insert(continue_block);
            let dominates_all = should_be_dominated.iter().all(|b| {
                self.dominators.get(b).is_some_and(|d| d.contains(&entry_block))
            });
            if !dominates_all {
                alerts.warn("Entry block does not dominate a child or the continue block");
            }
            let entry_postdominates_continue = self
                .post_dominators
                .get(&continue_block)
                .is_some_and(|d| d.contains(&entry_block));
            if !entry_postdominates_continue {
                alerts.warn("Entry block is not post-dominated by the continue block.");
            }

            // The break block is the child not on the path that reached
            // the continue block.
            let continue_path = self.dfs_paths.get(&continue_block).cloned().unwrap_or_default();
            let candidates: Vec<BlockId> = entry_succs
                .iter()
                .copied()
                .filter(|c| !continue_path.contains(c))
                .collect();
            if candidates.len() != 1 {
                alerts.warn(format!(
                    "Break block of the loop at {} is reached from {} children.",
                    entry_block.0,
                    candidates.len()
                ));
                continue;
            }
            let break_block = candidates[0];

            // Everything reachable from the entry without crossing the
            // break block belongs to the loop.
            let named = BTreeSet::from([entry_block, continue_block, break_block]);
            let mut other_blocks: BTreeSet<BlockId> = BTreeSet::new();
            let mut explore = vec![entry_block];
            while let Some(next) = explore.pop() {
                for &succ in self.succs.get(&next).unwrap_or(&empty) {
                    if !other_blocks.contains(&succ) && !named.contains(&succ) {
                        other_blocks.insert(succ);
                        explore.push(succ);
                    }
                }
            }

            let mut all_blocks = other_blocks.clone();
            all_blocks.extend(named);
            loops.push(ControlLoop {
                entry_block,
                continue_block,
                break_block,
                other_blocks,
                all_blocks,
            });
        }
        // Inner loops have strictly fewer member blocks, so ordering by
        // size realizes the set-inclusion order with innermost first.
        loops.sort_by_key(|l| (l.all_blocks.len(), l.entry_block));
        self.loops = loops;
    }
}

enum Direction {
    Forward,
    Backward,
}
