//! Post-structuring cleanup.
//!
//! Loops come out of structuring with explicit `continue`s everywhere and
//! a separate update block; these passes hoist continues out of
//! conditionals where that preserves behavior, strip the implicit trailing
//! continue, fold the update block into the body when no continue needs
//! it, and then collapse every empty block the earlier passes left behind.

use std::collections::BTreeSet;

use crate::abst::{Abst, FIXED_POINT_CAP};
use crate::ast::{AstNode, BlockId, Tag};

impl Abst {
    pub(crate) fn clean_loops(&mut self) {
        // Hoist continues out of conditionals, loop body by loop body.
        let blocks = self.used_blocks();
        for &b in &blocks {
            for stmt in self.block(b).children.clone() {
                if self.node(stmt).tag == Tag::Loop {
                    let inner = self.node(stmt).val_block(0);
                    self.move_safe_continues(inner);
                }
            }
        }

        // A continue as the last statement of a loop body is implicit.
        for &b in &blocks {
            for stmt in self.block(b).children.clone() {
                if self.node(stmt).tag == Tag::Loop {
                    let inner = self.node(stmt).val_block(0);
                    if let Some(&last) = self.block(inner).children.last() {
                        if self.node(last).tag == Tag::Continue {
                            self.release_node(last);
                            self.block_mut(inner).children.pop();
                        }
                    }
                }
            }
        }

        // With no continues left, the update block can run at the end of
        // the body instead of in a separate slot, turning a for-style loop
        // into a while.
        for &b in &blocks {
            for stmt in self.block(b).children.clone() {
                let node = self.node(stmt);
                if node.tag == Tag::Loop && node.vals.len() == 3 {
                    let inner = node.val_block(0);
                    let update = node.vals[2];
                    if !self.block_has_continues(inner) {
                        let goto =
                            self.alloc_node(AstNode::new(Tag::Goto, vec![update], vec![]));
                        self.block_mut(inner).children.push(goto);
                        self.node_mut(stmt).vals.pop();
                    }
                }
            }
        }
    }

    /// When every branch of a conditional leaves normal control flow, a
    /// trailing `continue` inside each branch can move out after the
    /// conditional, and whatever followed it in the sequence is dead.
    fn move_safe_continues(&mut self, block: BlockId) {
        let mut idx = 0;
        while idx < self.block(block).children.len() {
            let child = self.block(block).children[idx];
            if self.node(child).tag == Tag::If {
                let branches: Vec<BlockId> = (0..self.node(child).vals.len())
                    .map(|i| self.node(child).val_block(i))
                    .collect();
                for &branch in &branches {
                    self.move_safe_continues(branch);
                }

                let chain_ends: Vec<BlockId> =
                    branches.iter().map(|&b| self.goto_chain_end(b)).collect();
                let all_broken = chain_ends.iter().all(|&end| {
                    self.block(end).children.last().is_some_and(|&last| {
                        matches!(
                            self.node(last).tag,
                            Tag::Return | Tag::Break | Tag::Continue | Tag::ReallyGoto
                        )
                    })
                });
                if all_broken {
                    for &end in &chain_ends {
                        if let Some(&last) = self.block(end).children.last() {
                            if self.node(last).tag == Tag::Continue {
                                self.release_node(last);
                                self.block_mut(end).children.pop();
                            }
                        }
                    }
                    let dead: Vec<_> =
                        self.block(block).children[idx + 1..].to_vec();
                    for stmt in dead {
                        self.release_subtree(stmt);
                    }
                    let cont = self.alloc_node(AstNode::new(Tag::Continue, vec![], vec![]));
                    let children = &mut self.block_mut(block).children;
                    children.truncate(idx + 1);
                    children.push(cont);
                }
            }
            idx += 1;
        }
    }

    /// Block at the end of a chain of terminal gotos.
    fn goto_chain_end(&self, start: BlockId) -> BlockId {
        let mut end = start;
        let mut seen = BTreeSet::new();
        while seen.insert(end) {
            match self.block(end).children.last() {
                Some(&last) if self.node(last).tag == Tag::Goto => {
                    end = self.node(last).val_block(0);
                }
                _ => break,
            }
        }
        end
    }

    /// Whether a block contains a `continue` belonging to the current
    /// loop. Descends through gotos and conditionals but not into nested
    /// loops, whose continues are their own.
    fn block_has_continues(&self, block: BlockId) -> bool {
        let mut pending = vec![block];
        let mut seen = BTreeSet::new();
        while let Some(b) = pending.pop() {
            if !seen.insert(b) {
                continue;
            }
            for &stmt in &self.block(b).children {
                match self.node(stmt).tag {
                    Tag::Continue => return true,
                    Tag::Goto | Tag::If => {
                        let node = self.node(stmt);
                        pending.extend((0..node.vals.len()).map(|i| node.val_block(i)));
                    }
                    _ => {}
                }
            }
        }
        false
    }

    /// Remove references to empty blocks: gotos vanish, conditional
    /// branches drop (flipping the guard when the then-branch is the empty
    /// one), loops lose empty update slots. Runs to a fixed point since
    /// each removal can empty another block.
    pub(crate) fn clean_empty_blocks(&mut self) {
        for _ in 0..FIXED_POINT_CAP {
            let mut changed = false;
            for &b in &self.used_blocks() {
                let mut idx = 0;
                while idx < self.block(b).children.len() {
                    let stmt = self.block(b).children[idx];
                    match self.node(stmt).tag {
                        Tag::Goto => {
                            let dest = self.node(stmt).val_block(0);
                            if self.block(dest).children.is_empty() {
                                self.release_node(stmt);
                                self.block_mut(b).children.remove(idx);
                                self.mark_block_unused(dest);
                                changed = true;
                                continue;
                            }
                        }
                        Tag::If => {
                            let vals = self.node(stmt).vals.clone();
                            if vals.len() == 1 {
                                let dest = BlockId(vals[0] as u32);
                                if self.block(dest).children.is_empty() {
                                    self.release_subtree(stmt);
                                    self.block_mut(b).children.remove(idx);
                                    self.mark_block_unused(dest);
                                    changed = true;
                                    continue;
                                }
                            } else if vals.len() >= 2 {
                                let t_block = BlockId(vals[0] as u32);
                                let f_block = BlockId(vals[1] as u32);
                                if self.block(f_block).children.is_empty() {
                                    self.node_mut(stmt).vals.pop();
                                    self.mark_block_unused(f_block);
                                    changed = true;
                                } else if self.block(t_block).children.is_empty() {
                                    let guard = self.node(stmt).children[0];
                                    let negated = self.negate_bool(guard);
                                    let node = self.node_mut(stmt);
                                    node.children[0] = negated;
                                    node.vals.remove(0);
                                    self.mark_block_unused(t_block);
                                    changed = true;
                                }
                            }
                        }
                        Tag::Loop => {
                            if self.node(stmt).vals.len() == 3 {
                                let update = self.node(stmt).val_block(2);
                                if self.block(update).children.is_empty() {
                                    self.node_mut(stmt).vals.pop();
                                    self.mark_block_unused(update);
                                    changed = true;
                                }
                            }
                        }
                        _ => {}
                    }
                    idx += 1;
                }
            }
            if !changed {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::AbstractFlow;
    use crate::operation::ProcedureInfo;
    use std::collections::BTreeMap;

    fn empty_tree() -> Abst {
        let flow = AbstractFlow {
            blocks: Vec::new(),
            procedures: vec![ProcedureInfo {
                block_num: 0,
                name: "_main".to_string(),
                pushes: 0,
                pops: 0,
            }],
            special_labels: BTreeMap::new(),
        };
        let mut alerts = flw_core::Alerts::new();
        Abst::lift(&flow, &mut alerts).unwrap()
    }

    fn block_of(tree: &mut Abst, stmts: Vec<crate::ast::NodeId>) -> BlockId {
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], stmts))
    }

    #[test]
    fn test_trailing_continue_stripped() {
        // 0: loop(1, 2); 1: [send, continue]; 2: [return]
        let mut tree = empty_tree();
        let guard = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let loop_stmt = tree.alloc_node(AstNode::new(Tag::Loop, vec![1, 2], vec![guard]));
        block_of(&mut tree, vec![loop_stmt]); // 0
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        let cont = tree.alloc_node(AstNode::new(Tag::Continue, vec![], vec![]));
        block_of(&mut tree, vec![send, cont]); // 1
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        block_of(&mut tree, vec![ret]); // 2

        tree.clean_loops();
        let inner = tree.block(BlockId(1)).children.clone();
        assert_eq!(inner.len(), 1);
        assert_eq!(tree.node(inner[0]).tag, Tag::Send);
    }

    #[test]
    fn test_update_block_merged_when_no_continues() {
        // 0: loop(1, 2, update=3); 1: [send]; 2: [return]; 3: [assign]
        let mut tree = empty_tree();
        let guard = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let loop_stmt = tree.alloc_node(AstNode::new(Tag::Loop, vec![1, 2, 3], vec![guard]));
        block_of(&mut tree, vec![loop_stmt]); // 0
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        block_of(&mut tree, vec![send]); // 1
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        block_of(&mut tree, vec![ret]); // 2
        let lit = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let assign = tree.alloc_node(AstNode::new(Tag::Assign, vec![0], vec![lit]));
        block_of(&mut tree, vec![assign]); // 3

        tree.clean_loops();
        // The update slot is gone and the body now ends by jumping to it.
        let loop_node = tree.node(loop_stmt);
        assert_eq!(loop_node.vals, vec![1, 2]);
        let inner = tree.block(BlockId(1)).children.clone();
        assert_eq!(tree.node(*inner.last().unwrap()).tag, Tag::Goto);
    }

    #[test]
    fn test_update_block_kept_when_continue_remains() {
        // 0: loop(1, 2, update=3); 1: [if(4, 5), send] where branch 4
        // continues early but branch 5 falls through, so the continue
        // cannot be hoisted and must survive inside the conditional.
        let mut tree = empty_tree();
        let guard = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let loop_stmt = tree.alloc_node(AstNode::new(Tag::Loop, vec![1, 2, 3], vec![guard]));
        block_of(&mut tree, vec![loop_stmt]); // 0
        let guard2 = tree.alloc_node(AstNode::new(Tag::Var, vec![0], vec![]));
        let if_stmt = tree.alloc_node(AstNode::new(Tag::If, vec![4, 5], vec![guard2]));
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        block_of(&mut tree, vec![if_stmt, send]); // 1
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        block_of(&mut tree, vec![ret]); // 2
        let lit = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let assign = tree.alloc_node(AstNode::new(Tag::Assign, vec![0], vec![lit]));
        block_of(&mut tree, vec![assign]); // 3
        let cont = tree.alloc_node(AstNode::new(Tag::Continue, vec![], vec![]));
        block_of(&mut tree, vec![cont]); // 4
        let send5 = tree.alloc_node(AstNode::new(Tag::Send, vec![0x91], vec![]));
        block_of(&mut tree, vec![send5]); // 5

        tree.clean_loops();
        // A continue survives inside the conditional, so the update slot
        // must stay.
        assert_eq!(tree.node(loop_stmt).vals.len(), 3);
    }

    #[test]
    fn test_safe_continue_hoisted_and_dead_tail_removed() {
        // Loop body: [if(4, 5), send] where both branches end in a
        // continue; the send after the if is unreachable.
        let mut tree = empty_tree();
        let guard = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let loop_stmt = tree.alloc_node(AstNode::new(Tag::Loop, vec![1, 2], vec![guard]));
        block_of(&mut tree, vec![loop_stmt]); // 0
        let guard2 = tree.alloc_node(AstNode::new(Tag::Var, vec![0], vec![]));
        let if_stmt = tree.alloc_node(AstNode::new(Tag::If, vec![4, 5], vec![guard2]));
        let dead_send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        block_of(&mut tree, vec![if_stmt, dead_send]); // 1
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        block_of(&mut tree, vec![ret]); // 2
        let unused = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        block_of(&mut tree, vec![unused]); // 3 (filler so branch ids line up)
        let send4 = tree.alloc_node(AstNode::new(Tag::Send, vec![0x91], vec![]));
        let cont4 = tree.alloc_node(AstNode::new(Tag::Continue, vec![], vec![]));
        block_of(&mut tree, vec![send4, cont4]); // 4
        let cont5 = tree.alloc_node(AstNode::new(Tag::Continue, vec![], vec![]));
        block_of(&mut tree, vec![cont5]); // 5

        tree.clean_loops();

        // Both branch continues were stripped; one continue stands right
        // after the conditional; the dead send is gone. The trailing
        // continue of the body is then itself stripped as implicit.
        let body = tree.block(BlockId(1)).children.clone();
        assert_eq!(body.len(), 1);
        assert_eq!(tree.node(body[0]).tag, Tag::If);
        assert!(!tree.node_is_used(dead_send));
        let branch4 = tree.block(BlockId(4)).children.clone();
        assert_eq!(branch4.len(), 1);
        assert_eq!(tree.node(branch4[0]).tag, Tag::Send);
    }

    #[test]
    fn test_goto_to_empty_block_removed() {
        let mut tree = empty_tree();
        let goto = tree.alloc_node(AstNode::new(Tag::Goto, vec![1], vec![]));
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        block_of(&mut tree, vec![goto, ret]); // 0
        block_of(&mut tree, vec![]); // 1: empty
        tree.clean_empty_blocks();
        assert!(!tree.block_is_used(BlockId(1)));
        let children = tree.block(BlockId(0)).children.clone();
        assert_eq!(children.len(), 1);
        assert_eq!(tree.node(children[0]).tag, Tag::Return);
    }

    #[test]
    fn test_if_with_empty_else_drops_branch() {
        let mut tree = empty_tree();
        let guard = tree.alloc_node(AstNode::new(Tag::Var, vec![0], vec![]));
        let if_stmt = tree.alloc_node(AstNode::new(Tag::If, vec![1, 2], vec![guard]));
        block_of(&mut tree, vec![if_stmt]); // 0
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        block_of(&mut tree, vec![send]); // 1
        block_of(&mut tree, vec![]); // 2: empty else
        tree.clean_empty_blocks();
        let node = tree.node(if_stmt);
        assert_eq!(node.vals, vec![1]);
        // Guard untouched.
        assert_eq!(tree.node(node.children[0]).tag, Tag::Var);
        assert!(!tree.block_is_used(BlockId(2)));
    }

    #[test]
    fn test_if_with_empty_then_flips_guard() {
        let mut tree = empty_tree();
        let guard = tree.alloc_node(AstNode::new(Tag::Var, vec![0], vec![]));
        let if_stmt = tree.alloc_node(AstNode::new(Tag::If, vec![1, 2], vec![guard]));
        block_of(&mut tree, vec![if_stmt]); // 0
        block_of(&mut tree, vec![]); // 1: empty then
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        block_of(&mut tree, vec![send]); // 2
        tree.clean_empty_blocks();
        let node = tree.node(if_stmt).clone();
        assert_eq!(node.vals, vec![2]);
        assert_eq!(tree.node(node.children[0]).tag, Tag::BoolNot);
        assert!(!tree.block_is_used(BlockId(1)));
    }

    #[test]
    fn test_empty_both_branches_drop_whole_if() {
        // Both branches empty: else dropped first, then the whole if.
        let mut tree = empty_tree();
        let guard = tree.alloc_node(AstNode::new(Tag::Var, vec![0], vec![]));
        let if_stmt = tree.alloc_node(AstNode::new(Tag::If, vec![1, 2], vec![guard]));
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        block_of(&mut tree, vec![if_stmt, ret]); // 0
        block_of(&mut tree, vec![]); // 1
        block_of(&mut tree, vec![]); // 2
        tree.clean_empty_blocks();
        let children = tree.block(BlockId(0)).children.clone();
        assert_eq!(children.len(), 1);
        assert_eq!(tree.node(children[0]).tag, Tag::Return);
        assert!(!tree.node_is_used(if_stmt));
    }

    #[test]
    fn test_loop_with_empty_update_drops_slot() {
        let mut tree = empty_tree();
        let guard = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let loop_stmt = tree.alloc_node(AstNode::new(Tag::Loop, vec![1, 2, 3], vec![guard]));
        block_of(&mut tree, vec![loop_stmt]); // 0
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        block_of(&mut tree, vec![send]); // 1
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        block_of(&mut tree, vec![ret]); // 2
        block_of(&mut tree, vec![]); // 3: empty update
        tree.clean_empty_blocks();
        assert_eq!(tree.node(loop_stmt).vals, vec![1, 2]);
        assert!(!tree.block_is_used(BlockId(3)));
    }
}
