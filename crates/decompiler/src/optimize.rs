//! Optional optimization passes.
//!
//! All of these are rendering aids: they make the emitted pseudocode
//! shorter without changing what the script does. Native calls can have
//! side effects, so subtrees are only discarded where the rewrite rules
//! guarantee the discarded code never ran (dead branches) or is a literal.

use std::collections::BTreeSet;

use tracing::debug;

use crate::abst::{Abst, FIXED_POINT_CAP};
use crate::ast::{BlockId, NodeId, Tag, ValueType};
use crate::natives::{NativeRegistry, NativeType};

/// Which optimization passes to run. The pass order is fixed; these only
/// switch passes on or off.
#[derive(Debug, Clone, Copy)]
pub struct OptimizeOptions {
    pub flatten_conditionals: bool,
    pub flatten_elses: bool,
    pub constant_folding: bool,
    pub simplify_conditions: bool,
}

impl OptimizeOptions {
    pub fn all() -> OptimizeOptions {
        OptimizeOptions {
            flatten_conditionals: true,
            flatten_elses: true,
            constant_folding: true,
            simplify_conditions: true,
        }
    }

    pub fn none() -> OptimizeOptions {
        OptimizeOptions {
            flatten_conditionals: false,
            flatten_elses: false,
            constant_folding: false,
            simplify_conditions: false,
        }
    }
}

impl Abst {
    /// Run the enabled passes in their fixed order.
    pub fn optimize(&mut self, options: OptimizeOptions, natives: &NativeRegistry) {
        debug!(?options, "optimizing the ABST");
        if options.flatten_conditionals {
            self.flatten_conds();
        }
        if options.flatten_elses {
            self.eliminate_useless_elses();
        }
        if options.constant_folding {
            self.fold_constants();
        }
        if options.simplify_conditions {
            self.infer_types(natives);
            self.simplify_boolean_expressions();
        }
    }

    /// `if a: X else: { if b: Y else: Z }` becomes
    /// `if a: X elif b: Y else: Z` whenever the else block holds nothing
    /// but the inner conditional.
    pub fn flatten_conds(&mut self) {
        self.fixed_point(|tree, block| {
            let mut change = false;
            for stmt in tree.block(block).children.clone() {
                if tree.node(stmt).tag != Tag::If {
                    continue;
                }
                for _ in 0..FIXED_POINT_CAP {
                    let vals = &tree.node(stmt).vals;
                    if vals.len() < 2 {
                        break;
                    }
                    let else_block = BlockId(*vals.last().expect("len checked") as u32);
                    let else_children = tree.block(else_block).children.clone();
                    if else_children.len() != 1
                        || tree.node(else_children[0]).tag != Tag::If
                    {
                        break;
                    }
                    let inner = tree.node(else_children[0]).clone();
                    tree.mark_block_unused(else_block);
                    tree.release_node(else_children[0]);
                    let node = tree.node_mut(stmt);
                    node.children.extend(inner.children);
                    node.vals.pop();
                    node.vals.extend(inner.vals);
                    change = true;
                }
            }
            change
        });
    }

    /// When every non-else branch of a conditional always leaves the
    /// procedure (or the enclosing loop iteration), the else block can be
    /// hoisted to run after the conditional.
    pub fn eliminate_useless_elses(&mut self) {
        self.fixed_point(|tree, block| {
            for (child_idx, stmt) in tree.block(block).children.clone().into_iter().enumerate()
            {
                let node = tree.node(stmt);
                if node.tag != Tag::If || node.vals.len() <= node.children.len() {
                    continue;
                }
                let non_else = node.vals[..node.vals.len() - 1].to_vec();
                let hoistable = non_else
                    .iter()
                    .all(|&v| tree.always_breaks_flow(BlockId(v as u32)));
                if !hoistable {
                    continue;
                }
                let else_block =
                    BlockId(tree.node_mut(stmt).vals.pop().expect("has else") as u32);
                let hoisted = std::mem::take(&mut tree.block_mut(else_block).children);
                let children = &mut tree.block_mut(block).children;
                children.splice(child_idx + 1..child_idx + 1, hoisted);
                tree.mark_block_unused(else_block);
                // The sequence being iterated changed; rescan the block.
                return true;
            }
            false
        });
    }

    /// Strict check: every path through the block ends in `return`,
    /// `reallygoto`, `break`, or `continue`. A conditional without an
    /// else never qualifies, since its false path falls through.
    fn always_breaks_flow(&self, block: BlockId) -> bool {
        self.always_breaks_flow_inner(block, &mut BTreeSet::new())
    }

    /// `seen` holds the current path only, so two branches sharing a join
    /// block are each judged on their own merits; a genuine cycle still
    /// comes back false.
    fn always_breaks_flow_inner(&self, block: BlockId, seen: &mut BTreeSet<BlockId>) -> bool {
        if !seen.insert(block) {
            return false;
        }
        let result = match self.block(block).children.last() {
            None => false,
            Some(&last) => {
                let node = self.node(last);
                match node.tag {
                    Tag::Return | Tag::ReallyGoto | Tag::Break | Tag::Continue => true,
                    Tag::Goto => self.always_breaks_flow_inner(node.val_block(0), seen),
                    // A conditional without an else falls through, so it
                    // never qualifies on its own.
                    Tag::If if node.vals.len() == node.children.len() => false,
                    Tag::If => {
                        let branches: Vec<BlockId> =
                            (0..node.vals.len()).map(|i| node.val_block(i)).collect();
                        branches.iter().all(|&b| self.always_breaks_flow_inner(b, seen))
                    }
                    _ => false,
                }
            }
        };
        seen.remove(&block);
        result
    }

    /// Bottom-up constant folding over every live block.
    pub fn fold_constants(&mut self) {
        self.for_each_block(|tree, block| {
            for stmt in tree.block(block).children.clone() {
                tree.fold_node(stmt);
            }
        });
    }

    fn fold_node(&mut self, id: NodeId) {
        for child in self.node(id).children.clone() {
            self.fold_node(child);
        }
        let tag = self.node(id).tag;
        if !is_foldable(tag) {
            return;
        }
        let mut vals = Vec::new();
        for &child in &self.node(id).children {
            let child_node = self.node(child);
            if child_node.tag != Tag::Lit {
                return;
            }
            vals.push(child_node.vals[0]);
        }
        let Some(folded) = fold_op(tag, &vals) else { return };
        for child in self.node(id).children.clone() {
            self.release_node(child);
        }
        let node = self.node_mut(id);
        node.tag = Tag::Lit;
        node.vals = vec![folded];
        node.children = Vec::new();
    }

    /// Shallow type inference: enough to know which expressions are
    /// definitely boolean so that `simplify_boolean_expressions` can act.
    pub fn infer_types(&mut self, natives: &NativeRegistry) {
        self.for_each_block(|tree, block| {
            for stmt in tree.block(block).children.clone() {
                tree.infer_node(stmt, natives);
            }
        });
    }

    fn infer_node(&mut self, id: NodeId, natives: &NativeRegistry) {
        for child in self.node(id).children.clone() {
            self.infer_node(child, natives);
        }
        let node = self.node(id);
        let ty = match node.tag {
            Tag::Seq | Tag::Assign | Tag::Send | Tag::Return | Tag::If | Tag::Goto => {
                ValueType::Stmt
            }
            Tag::Eq | Tag::Neq | Tag::Lt | Tag::Gt | Tag::Lte | Tag::Gte | Tag::BoolNot => {
                ValueType::Bool
            }
            Tag::Add | Tag::Sub | Tag::Mul | Tag::Div | Tag::Neg | Tag::BitNot => ValueType::Int,
            Tag::And | Tag::Or => {
                let all_bool = node
                    .children
                    .iter()
                    .all(|&c| self.node(c).ty == ValueType::Bool);
                if all_bool { ValueType::Bool } else { return }
            }
            // 0 and 1 could be either; anything else is numeric.
            Tag::Lit => {
                if node.vals[0] != 0 && node.vals[0] != 1 {
                    ValueType::Int
                } else {
                    return;
                }
            }
            Tag::FloatLit => ValueType::Int,
            Tag::Func => match natives.lookup(node.vals[0] as u16).map(|f| f.return_type) {
                Some(NativeType::Int) => ValueType::Int,
                Some(NativeType::Bool) => ValueType::Bool,
                _ => return,
            },
            _ => return,
        };
        self.node_mut(id).ty = ty;
    }

    /// Identity and annihilator laws for and/or against a literal, and
    /// eq/neq against 0/1 on a boolean operand. Iterated to a fixed point
    /// because a rewrite can expose another.
    pub fn simplify_boolean_expressions(&mut self) {
        self.fixed_point(|tree, block| {
            let mut changed = false;
            for stmt in tree.block(block).children.clone() {
                changed |= tree.simplify_node(stmt);
            }
            changed
        });
    }

    fn simplify_node(&mut self, id: NodeId) -> bool {
        let mut changed = false;
        for child in self.node(id).children.clone() {
            changed |= self.simplify_node(child);
        }
        let node = self.node(id);
        match node.tag {
            Tag::And | Tag::Or => {
                let annihilator: i64 = if node.tag == Tag::And { 0 } else { 1 };
                let identity = 1 - annihilator;
                let Some((bool_side, lit_side)) = self.split_bool_and_lit(id) else {
                    return changed;
                };
                let lit_val = self.node(lit_side).vals[0];
                if lit_val == identity {
                    let kept = self.node(bool_side).clone();
                    self.release_node(bool_side);
                    self.release_node(lit_side);
                    self.node_mut(id).copy_from(&kept);
                    changed = true;
                } else if lit_val == annihilator {
                    for child in self.node(id).children.clone() {
                        self.release_subtree(child);
                    }
                    self.node_mut(id).update(
                        Tag::Lit,
                        vec![annihilator],
                        Vec::new(),
                        ValueType::Bool,
                    );
                    changed = true;
                }
            }
            Tag::Eq | Tag::Neq => {
                let is_eq = node.tag == Tag::Eq;
                let Some((bool_side, lit_side)) = self.split_bool_and_lit(id) else {
                    return changed;
                };
                let lit_val = self.node(lit_side).vals[0];
                // eq-with-1 and neq-with-0 keep the operand; the duals
                // negate it.
                let keep = (is_eq && lit_val == 1) || (!is_eq && lit_val == 0);
                let negate = (is_eq && lit_val == 0) || (!is_eq && lit_val == 1);
                if keep {
                    let kept = self.node(bool_side).clone();
                    self.release_node(bool_side);
                    self.release_node(lit_side);
                    self.node_mut(id).copy_from(&kept);
                    changed = true;
                } else if negate {
                    self.release_node(lit_side);
                    self.node_mut(id).update(
                        Tag::BoolNot,
                        Vec::new(),
                        vec![bool_side],
                        ValueType::Bool,
                    );
                    changed = true;
                }
            }
            _ => {}
        }
        changed
    }

    /// For a two-child node, the (boolean-typed child, literal child)
    /// pair, if the node has exactly that shape.
    fn split_bool_and_lit(&self, id: NodeId) -> Option<(NodeId, NodeId)> {
        let node = self.node(id);
        if node.children.len() != 2 {
            return None;
        }
        let (a, b) = (node.children[0], node.children[1]);
        let (a_node, b_node) = (self.node(a), self.node(b));
        if a_node.tag == Tag::Lit && b_node.ty == ValueType::Bool {
            Some((b, a))
        } else if b_node.tag == Tag::Lit && a_node.ty == ValueType::Bool {
            Some((a, b))
        } else {
            None
        }
    }
}

fn is_foldable(tag: Tag) -> bool {
    matches!(
        tag,
        Tag::Add
            | Tag::Sub
            | Tag::Mul
            | Tag::Div
            | Tag::Neg
            | Tag::BitNot
            | Tag::BoolNot
            | Tag::Or
            | Tag::And
            | Tag::Eq
            | Tag::Neq
            | Tag::Lt
            | Tag::Gt
            | Tag::Lte
            | Tag::Gte
    )
}

/// Fold one operation over literal operands. Division follows the
/// script engine's integer semantics (flooring), and dividing by a
/// literal zero yields the dividend rather than failing.
fn fold_op(tag: Tag, vals: &[i64]) -> Option<i64> {
    Some(match (tag, vals) {
        (Tag::Add, [a, b]) => a.wrapping_add(*b),
        (Tag::Sub, [a, b]) => a.wrapping_sub(*b),
        (Tag::Mul, [a, b]) => a.wrapping_mul(*b),
        (Tag::Div, [a, b]) => {
            if *b == 0 {
                *a
            } else {
                floor_div(*a, *b)
            }
        }
        (Tag::Neg, [a]) => a.wrapping_neg(),
        (Tag::BitNot, [a]) => !a,
        (Tag::BoolNot, [a]) => {
            if *a == 1 {
                0
            } else {
                1
            }
        }
        (Tag::Or, [a, b]) => a | b,
        (Tag::And, [a, b]) => a & b,
        (Tag::Eq, [a, b]) => i64::from(a == b),
        (Tag::Neq, [a, b]) => i64::from(a != b),
        (Tag::Lt, [a, b]) => i64::from(a < b),
        (Tag::Gt, [a, b]) => i64::from(a > b),
        (Tag::Lte, [a, b]) => i64::from(a <= b),
        (Tag::Gte, [a, b]) => i64::from(a >= b),
        _ => return None,
    })
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) { q - 1 } else { q }
}
