//! Pretty-printer: renders a structured ABST as Python-like pseudocode.
//!
//! Rendering is read-only. Native calls go through an injectable
//! formatter first, so a caller with game knowledge (names, skill tables)
//! can replace `set_action_skill(12)` with prose; returning `None` falls
//! back to `name(args)` with the registry name, or `func_0xNNNN` for
//! natives the registry does not know.

use crate::abst::Abst;
use crate::ast::{AstNode, BlockId, Tag};
use crate::natives::NativeRegistry;

/// Callback deciding how a native call is rendered: receives the native
/// index, the parameter nodes, and the parameters already rendered as
/// text. `None` means "use the default rendering".
pub type NativeFormatter<'a> =
    dyn FnMut(u16, &[&AstNode], &[String]) -> Option<String> + 'a;

const INDENT: &str = "    ";
const LABEL_MARK: &str = "--label:";

/// Nesting depth past which rendering gives up; only reachable when
/// structuring left a cycle behind.
const MAX_RENDER_DEPTH: usize = 4096;

/// Render every procedure of the tree.
pub fn display_decompilation(
    tree: &Abst,
    natives: &NativeRegistry,
    formatter: Option<&mut NativeFormatter<'_>>,
) -> String {
    let mut printer = Printer { tree, natives, formatter, depth: 0 };
    let mut procs = Vec::new();
    for proc in &tree.procedures {
        let args: Vec<String> =
            (0..proc.pops).map(|n| display_var_name(-1 - i64::from(n))).collect();
        let body = printer.stmt_block(BlockId(proc.block_num));
        let rendered = format!("{}({}):\n{}", proc.name, args.join(","), indent(&body));
        procs.push(unindent_labels(&rendered));
    }
    procs.join("\n\n")
}

fn indent(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + INDENT.len());
    out.push_str(INDENT);
    out.push_str(&s.replace('\n', &format!("\n{}", INDENT)));
    out
}

/// Labels are emitted flush left, the way they would be written by hand.
fn unindent_labels(s: &str) -> String {
    s.lines()
        .map(|line| if line.contains(LABEL_MARK) { line.trim_start() } else { line })
        .collect::<Vec<_>>()
        .join("\n")
}

fn display_var_name(index: i64) -> String {
    if index >= 0 {
        format!("r{}", index)
    } else {
        format!("p{}", -1 - index)
    }
}

struct Printer<'t, 'f, 'c> {
    tree: &'t Abst,
    natives: &'t NativeRegistry,
    formatter: Option<&'f mut NativeFormatter<'c>>,
    depth: usize,
}

impl Printer<'_, '_, '_> {
    fn native_name(&self, index: u16) -> String {
        match self.natives.lookup(index) {
            Some(func) => func.display_name().to_string(),
            None => format!("func_0x{:04x}", index),
        }
    }

    fn func_or_send(&mut self, node: &AstNode) -> String {
        let tree = self.tree;
        let params: Vec<String> =
            node.children.iter().map(|&c| self.exp(tree.node(c))).collect();
        let index = node.vals[0] as u16;
        if let Some(formatter) = self.formatter.as_mut() {
            let param_nodes: Vec<&AstNode> =
                node.children.iter().map(|&c| tree.node(c)).collect();
            if let Some(formatted) = (*formatter)(index, &param_nodes, &params) {
                return formatted;
            }
        }
        format!("{}({})", self.native_name(index), params.join(", "))
    }

    fn stmt_block(&mut self, block: BlockId) -> String {
        let tree = self.tree;
        self.depth += 1;
        let out = if self.depth > MAX_RENDER_DEPTH {
            "# rendering depth exceeded; control flow was not fully structured".to_string()
        } else {
            self.stmt(tree.block(block))
        };
        self.depth -= 1;
        out
    }

    fn stmt(&mut self, node: &AstNode) -> String {
        let tree = self.tree;
        match node.tag {
            Tag::Seq => {
                if node.children.is_empty() {
                    return "pass".to_string();
                }
                node.children
                    .iter()
                    .map(|&c| self.stmt(tree.node(c)))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            Tag::Assign => format!(
                "{} = {}",
                display_var_name(node.vals[0]),
                self.exp(tree.node(node.children[0]))
            ),
            Tag::Return => "return".to_string(),
            Tag::Break => "break".to_string(),
            Tag::Continue => "continue".to_string(),
            // Internal gotos disappear: the target renders inline.
            Tag::Goto => self.stmt_block(node.val_block(0)),
            Tag::Label => {
                format!("{} {}", LABEL_MARK, self.label_name(node.vals[0]))
            }
            Tag::ReallyGoto => format!("goto {}", self.label_name(node.vals[0])),
            Tag::Call => {
                let name = tree
                    .procedure_map
                    .get(&(node.vals[0] as u32))
                    .cloned()
                    .unwrap_or_else(|| format!("proc_{}", node.vals[0]));
                let params: Vec<String> =
                    node.children.iter().map(|&c| self.exp(tree.node(c))).collect();
                format!("{}({})", name, params.join(", "))
            }
            Tag::Send => self.func_or_send(node),
            Tag::If => self.if_stmt(node),
            Tag::Loop => self.loop_stmt(node),
            other => format!("# unexpected statement {:?}", other),
        }
    }

    fn if_stmt(&mut self, node: &AstNode) -> String {
        let tree = self.tree;
        let mut guard_lines = Vec::new();
        for (idx, &child) in node.children.iter().enumerate() {
            let keyword = if idx == 0 { "if" } else { "elif" };
            let guard = self.exp(tree.node(child));
            guard_lines.push(format!("{} {}:", keyword, guard));
        }
        let mut branches = Vec::new();
        for idx in 0..node.vals.len() {
            branches.push(indent(&self.stmt_block(node.val_block(idx))));
        }
        let mut lines = Vec::new();
        if guard_lines.len() == branches.len() {
            for (guard, branch) in guard_lines.iter().zip(&branches) {
                lines.push(guard.clone());
                lines.push(branch.clone());
            }
        } else {
            // One more branch than guards: the final one is the else.
            for (guard, branch) in guard_lines.iter().zip(&branches) {
                lines.push(guard.clone());
                lines.push(branch.clone());
            }
            lines.push("else:".to_string());
            lines.push(branches.last().cloned().unwrap_or_default());
        }
        lines.join("\n")
    }

    fn loop_stmt(&mut self, node: &AstNode) -> String {
        let tree = self.tree;
        let cond = self.exp(tree.node(node.children[0]));
        let inner = indent(&self.stmt_block(node.val_block(0)));
        let after = self.stmt_block(node.val_block(1));
        let top = if node.vals.len() == 3 {
            let update = self.stmt_block(node.val_block(2)).replace('\n', ", ");
            format!("for(; {}; {} ):", cond, update)
        } else {
            format!("while {}:", cond)
        };
        [top, inner, after].join("\n")
    }

    fn exp(&mut self, node: &AstNode) -> String {
        let tree = self.tree;
        if let Some(symbol) = node.tag.binary_symbol() {
            let lhs = self.exp(tree.node(node.children[0]));
            let rhs = self.exp(tree.node(node.children[1]));
            return format!("({} {} {})", lhs, symbol, rhs);
        }
        if let Some(symbol) = node.tag.unary_symbol() {
            let arg = self.exp(tree.node(node.children[0]));
            return format!("{}{}", symbol, arg);
        }
        match node.tag {
            Tag::Var => display_var_name(node.vals[0]),
            Tag::Lit => node.vals[0].to_string(),
            Tag::FloatLit => format!("{}", f32::from_bits(node.vals[0] as u32)),
            Tag::Func => self.func_or_send(node),
            other => format!("<unexpected expression {:?}>", other),
        }
    }

    fn label_name(&self, label_block: i64) -> String {
        self.tree
            .special_labels
            .get(&(label_block as u32))
            .cloned()
            .unwrap_or_else(|| format!("label_{}", label_block))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::AbstractFlow;
    use crate::natives::Game;
    use crate::operation::ProcedureInfo;
    use std::collections::BTreeMap;

    fn natives() -> NativeRegistry {
        NativeRegistry::for_game(Game::Eo3).unwrap()
    }

    fn tree_with_proc(special_labels: BTreeMap<u32, String>) -> Abst {
        let flow = AbstractFlow {
            blocks: Vec::new(),
            procedures: vec![ProcedureInfo {
                block_num: 0,
                name: "_main".to_string(),
                pushes: 0,
                pops: 0,
            }],
            special_labels,
        };
        let mut alerts = flw_core::Alerts::new();
        Abst::lift(&flow, &mut alerts).unwrap()
    }

    #[test]
    fn test_render_assign_and_return() {
        let mut tree = tree_with_proc(BTreeMap::new());
        let lit = tree.alloc_node(AstNode::new(Tag::Lit, vec![5], vec![]));
        let assign = tree.alloc_node(AstNode::new(Tag::Assign, vec![0], vec![lit]));
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![assign, ret]));

        let out = display_decompilation(&tree, &natives(), None);
        assert_eq!(out, "_main():\n    r0 = 5\n    return");
    }

    #[test]
    fn test_render_parameters_and_empty_body() {
        let mut tree = tree_with_proc(BTreeMap::new());
        tree.procedures[0].pops = 2;
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![]));
        let out = display_decompilation(&tree, &natives(), None);
        assert_eq!(out, "_main(p0,p1):\n    pass");
    }

    #[test]
    fn test_render_if_else() {
        let mut tree = tree_with_proc(BTreeMap::new());
        let guard = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let if_stmt = tree.alloc_node(AstNode::new(Tag::If, vec![1, 2], vec![guard]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![if_stmt])); // 0
        let l1 = tree.alloc_node(AstNode::new(Tag::Lit, vec![20], vec![]));
        let a1 = tree.alloc_node(AstNode::new(Tag::Assign, vec![0], vec![l1]));
        let r1 = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![a1, r1])); // 1
        let l2 = tree.alloc_node(AstNode::new(Tag::Lit, vec![10], vec![]));
        let a2 = tree.alloc_node(AstNode::new(Tag::Assign, vec![0], vec![l2]));
        let r2 = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![a2, r2])); // 2

        let out = display_decompilation(&tree, &natives(), None);
        assert_eq!(
            out,
            "_main():\n    if 1:\n        r0 = 20\n        return\n    else:\n        r0 = 10\n        return"
        );
    }

    #[test]
    fn test_render_while_loop() {
        // loop(body=1, break=2) with guard (r0 < 10).
        let mut tree = tree_with_proc(BTreeMap::new());
        let r0 = tree.alloc_node(AstNode::new(Tag::Var, vec![0], vec![]));
        let ten = tree.alloc_node(AstNode::new(Tag::Lit, vec![10], vec![]));
        let cmp = tree.alloc_node(AstNode::new(Tag::Lt, vec![], vec![r0, ten]));
        let loop_stmt = tree.alloc_node(AstNode::new(Tag::Loop, vec![1, 2], vec![cmp]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![loop_stmt])); // 0
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![send])); // 1
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![ret])); // 2

        let out = display_decompilation(&tree, &natives(), None);
        assert_eq!(
            out,
            "_main():\n    while (r0 < 10):\n        set_action_attack()\n    return"
        );
    }

    #[test]
    fn test_render_for_loop_with_update() {
        let mut tree = tree_with_proc(BTreeMap::new());
        let guard = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let loop_stmt = tree.alloc_node(AstNode::new(Tag::Loop, vec![1, 2, 3], vec![guard]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![loop_stmt])); // 0
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x90], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![send])); // 1
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![ret])); // 2
        let one = tree.alloc_node(AstNode::new(Tag::Lit, vec![1], vec![]));
        let assign = tree.alloc_node(AstNode::new(Tag::Assign, vec![0], vec![one]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![assign])); // 3

        let out = display_decompilation(&tree, &natives(), None);
        assert!(out.contains("for(; 1; r0 = 1 ):"));
    }

    #[test]
    fn test_render_label_flush_left_and_goto() {
        let mut tree = tree_with_proc(BTreeMap::from([(1, "retry".to_string())]));
        let label = tree.alloc_node(AstNode::new(Tag::Label, vec![1], vec![]));
        let really = tree.alloc_node(AstNode::new(Tag::ReallyGoto, vec![1], vec![]));
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![label, really, ret]));

        let out = display_decompilation(&tree, &natives(), None);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[1], "--label: retry");
        assert_eq!(lines[2], "    goto retry");
    }

    #[test]
    fn test_render_unknown_native_fallback() {
        let mut tree = tree_with_proc(BTreeMap::new());
        let arg = tree.alloc_node(AstNode::new(Tag::Lit, vec![3], vec![]));
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x7FF], vec![arg]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![send]));
        let out = display_decompilation(&tree, &natives(), None);
        assert!(out.contains("func_0x07ff(3)"));
    }

    #[test]
    fn test_render_speculative_name_stripped() {
        let mut tree = tree_with_proc(BTreeMap::new());
        let arg = tree.alloc_node(AstNode::new(Tag::Lit, vec![7], vec![]));
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x81], vec![arg]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![send]));
        let out = display_decompilation(&tree, &natives(), None);
        // _set_flag renders without its underscore.
        assert!(out.contains("set_flag(7)"));
    }

    #[test]
    fn test_formatter_overrides_rendering() {
        let mut tree = tree_with_proc(BTreeMap::new());
        let arg = tree.alloc_node(AstNode::new(Tag::Lit, vec![2], vec![]));
        let send = tree.alloc_node(AstNode::new(Tag::Send, vec![0x91], vec![arg]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![send]));

        let mut formatter = |index: u16, _nodes: &[&AstNode], _strs: &[String]| {
            (index == 0x91).then(|| "Use Fire Breath (skill 2).".to_string())
        };
        let out = display_decompilation(&tree, &natives(), Some(&mut formatter));
        assert!(out.contains("Use Fire Breath (skill 2)."));
    }

    #[test]
    fn test_render_goto_inlines_target_block() {
        let mut tree = tree_with_proc(BTreeMap::new());
        let goto = tree.alloc_node(AstNode::new(Tag::Goto, vec![1], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![goto])); // 0
        let ret = tree.alloc_node(AstNode::new(Tag::Return, vec![], vec![]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![ret])); // 1
        let out = display_decompilation(&tree, &natives(), None);
        assert_eq!(out, "_main():\n    return");
    }

    #[test]
    fn test_unary_and_nested_expressions() {
        let mut tree = tree_with_proc(BTreeMap::new());
        let r0 = tree.alloc_node(AstNode::new(Tag::Var, vec![0], vec![]));
        let neg = tree.alloc_node(AstNode::new(Tag::Neg, vec![], vec![r0]));
        let two = tree.alloc_node(AstNode::new(Tag::Lit, vec![2], vec![]));
        let mul = tree.alloc_node(AstNode::new(Tag::Mul, vec![], vec![neg, two]));
        let assign = tree.alloc_node(AstNode::new(Tag::Assign, vec![1], vec![mul]));
        tree.alloc_block(AstNode::new(Tag::Seq, vec![], vec![assign]));
        let out = display_decompilation(&tree, &natives(), None);
        assert!(out.contains("r1 = (-r0 * 2)"));
    }
}
