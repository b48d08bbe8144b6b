//! The abstract block syntax tree (ABST).
//!
//! Two arenas with parallel tombstone vectors: one of block-level `Seq`
//! nodes (index = block id) and one of inner nodes. Nodes are created
//! during lifting and never move; passes mutate them in place and delete
//! by flipping `used` to false, so sibling references stay valid across
//! any number of restructuring passes.

use std::collections::{BTreeMap, BTreeSet};

use flw_core::{Alerts, Opcode};
use tracing::debug;

use crate::ast::{AstNode, BlockId, NodeId, Tag};
use crate::flow::AbstractFlow;
use crate::operation::{BasicBlock, ProcedureInfo};

/// Iteration cap for fixed-point passes; keeps a non-monotone pass from
/// looping forever.
pub const FIXED_POINT_CAP: usize = 1000;

/// The tree under construction, plus the procedure and label context the
/// passes need.
#[derive(Debug)]
pub struct Abst {
    /// Block-level `Seq` nodes, indexed by block id
    blocks: Vec<AstNode>,
    block_used: Vec<bool>,
    /// Inner statement/expression nodes, indexed by [`NodeId`]
    inner: Vec<AstNode>,
    inner_used: Vec<bool>,
    pub procedures: Vec<ProcedureInfo>,
    /// Block id of each procedure entry, mapped to its name
    pub procedure_map: BTreeMap<u32, String>,
    procedure_pop_map: BTreeMap<u32, u32>,
    /// User label names keyed by the block id the label originally named
    pub special_labels: BTreeMap<u32, String>,
    /// Blocks that carry a `Label` statement after structuring
    pub special_blocks: BTreeSet<BlockId>,
    /// Blocks whose terminator became a `ReallyGoto`
    pub special_gotos: BTreeSet<BlockId>,
}

impl Abst {
    // ---- arena primitives ----

    /// Mint a fresh inner-node id. The slot starts as a placeholder; the
    /// lifter fills every minted id before a block is finished, and a
    /// pending id left unfilled is reported as a lift failure.
    pub fn fresh_id(&mut self) -> NodeId {
        let id = NodeId(self.inner.len() as u32);
        self.inner.push(AstNode::new(Tag::Seq, vec![], vec![]));
        self.inner_used.push(true);
        id
    }

    pub fn set_node(&mut self, id: NodeId, node: AstNode) {
        self.inner[id.0 as usize] = node;
    }

    /// Store a new node and return its id.
    pub fn alloc_node(&mut self, node: AstNode) -> NodeId {
        let id = self.fresh_id();
        self.set_node(id, node);
        id
    }

    /// Append a new block containing the given `Seq` node.
    pub fn alloc_block(&mut self, node: AstNode) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(node);
        self.block_used.push(true);
        id
    }

    /// A new block holding a single statement of the given tag.
    pub fn new_single_block(&mut self, tag: Tag) -> BlockId {
        let stmt = self.alloc_node(AstNode::new(tag, vec![], vec![]));
        self.alloc_block(AstNode::new(Tag::Seq, vec![], vec![stmt]))
    }

    pub fn node(&self, id: NodeId) -> &AstNode {
        &self.inner[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AstNode {
        &mut self.inner[id.0 as usize]
    }

    pub fn block(&self, id: BlockId) -> &AstNode {
        &self.blocks[id.index()]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut AstNode {
        &mut self.blocks[id.index()]
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn inner_count(&self) -> usize {
        self.inner.len()
    }

    pub fn block_is_used(&self, id: BlockId) -> bool {
        self.block_used[id.index()]
    }

    pub fn node_is_used(&self, id: NodeId) -> bool {
        self.inner_used[id.0 as usize]
    }

    pub fn mark_block_unused(&mut self, id: BlockId) {
        self.block_used[id.index()] = false;
    }

    pub fn release_node(&mut self, id: NodeId) {
        self.inner_used[id.0 as usize] = false;
    }

    /// Tombstone a node and everything reachable below it.
    pub fn release_subtree(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(id) = stack.pop() {
            self.inner_used[id.0 as usize] = false;
            stack.extend(self.node(id).children.iter().copied());
        }
    }

    /// Live block ids, in index order.
    pub fn used_blocks(&self) -> Vec<BlockId> {
        (0..self.blocks.len() as u32).map(BlockId).filter(|&b| self.block_is_used(b)).collect()
    }

    /// The terminator position of a block: its last statement, if any.
    pub fn last_stmt(&self, block: BlockId) -> Option<NodeId> {
        self.block(block).children.last().copied()
    }

    /// Wrap an expression in a boolean negation, returning the new node.
    pub fn negate_bool(&mut self, exp: NodeId) -> NodeId {
        self.alloc_node(AstNode::new(Tag::BoolNot, vec![], vec![exp]))
    }

    pub fn parameter_count(&self, block: BlockId) -> Option<u32> {
        self.procedure_pop_map.get(&block.0).copied()
    }

    /// Run per-block rewrites until nothing changes, bounded by
    /// [`FIXED_POINT_CAP`].
    pub fn fixed_point<F>(&mut self, mut pass: F)
    where
        F: FnMut(&mut Abst, BlockId) -> bool,
    {
        for _ in 0..FIXED_POINT_CAP {
            let mut changed = false;
            for idx in 0..self.blocks.len() {
                let block = BlockId(idx as u32);
                if self.block_is_used(block) {
                    changed |= pass(self, block);
                }
            }
            if !changed {
                return;
            }
        }
    }

    /// Run a rewrite once over every live block.
    pub fn for_each_block<F>(&mut self, mut pass: F)
    where
        F: FnMut(&mut Abst, BlockId),
    {
        for idx in 0..self.blocks.len() {
            let block = BlockId(idx as u32);
            if self.block_is_used(block) {
                pass(self, block);
            }
        }
    }

    // ---- construction ----

    /// Lift abstracted basic blocks into an ABST and run the structuring
    /// and cleanup passes in their fixed order.
    pub fn build(
        flow: &AbstractFlow,
        handwritten: bool,
        alerts: &mut Alerts,
    ) -> Result<Abst, String> {
        let mut tree = Abst::lift(flow, alerts)?;

        tree.handle_special_labels(alerts);
        tree.handle_directed_cycles(alerts);
        tree.clear_single_gotos();
        if !handwritten {
            tree.handle_undirected_cycles(alerts);
        }
        tree.clean_loops();
        tree.clean_empty_blocks();
        Ok(tree)
    }

    /// Lift only: the raw statement tree with every jump still a `Goto`.
    pub fn lift(flow: &AbstractFlow, alerts: &mut Alerts) -> Result<Abst, String> {
        let mut tree = Abst {
            blocks: Vec::with_capacity(flow.blocks.len()),
            block_used: Vec::with_capacity(flow.blocks.len()),
            inner: Vec::new(),
            inner_used: Vec::new(),
            procedures: flow.procedures.clone(),
            procedure_map: flow
                .procedures
                .iter()
                .map(|p| (p.block_num, p.name.clone()))
                .collect(),
            procedure_pop_map: flow
                .procedures
                .iter()
                .map(|p| (p.block_num, p.pops))
                .collect(),
            special_labels: flow.special_labels.clone(),
            special_blocks: BTreeSet::new(),
            special_gotos: BTreeSet::new(),
        };

        for (blocknum, block) in flow.blocks.iter().enumerate() {
            let seq = tree.lift_block(blocknum as u32, block, alerts)?;
            tree.blocks.push(seq);
            tree.block_used.push(true);
        }
        debug!(
            blocks = tree.blocks.len(),
            nodes = tree.inner.len(),
            "lifted operations into the ABST"
        );
        Ok(tree)
    }

    /// Lift one block by walking its operations in reverse. Consumers are
    /// created before their producers, so a stack of pending ids connects
    /// each producer to the slot waiting for it.
    fn lift_block(
        &mut self,
        blocknum: u32,
        block: &BasicBlock,
        alerts: &mut Alerts,
    ) -> Result<AstNode, String> {
        let mut stmts: Vec<NodeId> = Vec::new();
        let mut pending: Vec<NodeId> = Vec::new();

        for oper in block.operations.iter().rev() {
            match lift_tag(oper.opcode) {
                Some(tag) => {
                    let pushes = oper.pushes.unwrap_or(0);
                    let pops = oper.pops.unwrap_or(0);
                    self.create_node(
                        tag,
                        oper.args.clone(),
                        pushes,
                        pops,
                        blocknum,
                        &mut stmts,
                        &mut pending,
                    )?;
                }
                None if oper.opcode == Opcode::Proc => {
                    if let Some(params) = self.parameter_count(BlockId(blocknum)) {
                        for argnum in 0..params {
                            self.create_node(
                                Tag::Var,
                                vec![-1 - i64::from(argnum)],
                                1,
                                0,
                                blocknum,
                                &mut stmts,
                                &mut pending,
                            )?;
                        }
                    }
                }
                None => alerts.warn(format!(
                    "Operation {} could not be added to the ABST",
                    oper.display()
                )),
            }
        }

        if !pending.is_empty() {
            return Err(format!(
                "block {} left {} consumer(s) without a producer; \
                 stack effects are inconsistent",
                blocknum,
                pending.len()
            ));
        }

        // Statements were prepended in reverse walk order.
        stmts.reverse();
        Ok(AstNode::new(Tag::Seq, vec![], stmts))
    }

    /// Shared node-creation step of the lifter.
    ///
    /// A value-producing operation takes over the id its consumer is
    /// waiting on; a statement gets a fresh id at the front of the block.
    /// Either way the operation's own operand slots are minted and pushed
    /// for earlier (in source order) operations to fill.
    #[allow(clippy::too_many_arguments)]
    fn create_node(
        &mut self,
        tag: Tag,
        vals: Vec<i64>,
        pushes: u32,
        pops: u32,
        blocknum: u32,
        stmts: &mut Vec<NodeId>,
        pending: &mut Vec<NodeId>,
    ) -> Result<(), String> {
        let id = if pushes > 0 {
            pending.pop().ok_or_else(|| {
                format!(
                    "block {} produced a value no later operation consumes; \
                     stack effects are inconsistent",
                    blocknum
                )
            })?
        } else {
            let id = self.fresh_id();
            stmts.push(id);
            id
        };
        let children: Vec<NodeId> = (0..pops).map(|_| self.fresh_id()).collect();
        for &child in children.iter().rev() {
            pending.push(child);
        }
        self.set_node(id, AstNode::new(tag, vals, children));
        Ok(())
    }

    /// Raw dump of both arenas, for debugging and golden tests.
    pub fn dump(&self) -> String {
        let mut out = vec!["Blocks:".to_string()];
        for idx in 0..self.blocks.len() {
            let block = BlockId(idx as u32);
            out.push(format!(
                "{}: Used: {}, {}",
                idx,
                self.block_is_used(block),
                self.block(block)
            ));
        }
        out.push(String::new());
        out.push("Nodes:".to_string());
        for idx in 0..self.inner.len() {
            let id = NodeId(idx as u32);
            out.push(format!(
                "v{}: Used: {}, {}",
                idx,
                self.node_is_used(id),
                self.node(id)
            ));
        }
        out.join("\n")
    }
}

/// Tag an operation lifts to, or `None` for PROC (handled separately) and
/// for opcodes this dialect never materializes.
fn lift_tag(opcode: Opcode) -> Option<Tag> {
    Some(match opcode {
        Opcode::PushI | Opcode::PushIx | Opcode::PushIs => Tag::Lit,
        Opcode::PushF | Opcode::PushIf => Tag::FloatLit,
        Opcode::PushLix | Opcode::PushLfx => Tag::Var,
        Opcode::PopLix | Opcode::PopLfx => Tag::Assign,
        Opcode::Add => Tag::Add,
        Opcode::Sub => Tag::Sub,
        Opcode::Mul => Tag::Mul,
        Opcode::Div => Tag::Div,
        Opcode::Or => Tag::Or,
        Opcode::And => Tag::And,
        Opcode::Eq => Tag::Eq,
        Opcode::Neq => Tag::Neq,
        Opcode::Lt => Tag::Lt,
        Opcode::Gt => Tag::Gt,
        Opcode::Lte => Tag::Lte,
        Opcode::Gte => Tag::Gte,
        Opcode::Minus => Tag::Neg,
        Opcode::Not => Tag::BitNot,
        Opcode::Func => Tag::Func,
        Opcode::Send => Tag::Send,
        Opcode::Call => Tag::Call,
        Opcode::End => Tag::Return,
        Opcode::Goto => Tag::Goto,
        Opcode::Cond => Tag::If,
        _ => return None,
    })
}
