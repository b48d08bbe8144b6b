//! Structural invariants of the ABST after the full pass pipeline.
//!
//! Whatever the passes did, the arenas must stay consistent: every node
//! reachable from a live block is live and referenced from exactly one
//! place, and rendering mentions every reachable statement exactly once.

use std::collections::HashMap;

use flw_core::Alerts;
use flw_core::testing::build_container;
use flwdec::ast::{BlockId, NodeId};
use flwdec::natives::{Game, NativeRegistry};
use flwdec::optimize::OptimizeOptions;
use flwdec::{Abst, abstract_flow};

fn build_tree(data: &[u8], optimize: bool) -> Abst {
    let natives = NativeRegistry::for_game(Game::Eo3).unwrap();
    let mut alerts = Alerts::new();
    let flow_file = flw_core::FlowFile::parse(data, true, &mut alerts).unwrap();
    let flow = abstract_flow(&flow_file, &natives, &mut alerts).unwrap();
    let mut tree = Abst::build(&flow, false, &mut alerts).unwrap();
    if optimize {
        tree.optimize(OptimizeOptions::all(), &natives);
    }
    tree
}

/// Count how often each inner node is referenced from live blocks,
/// walking the children relation.
fn reference_counts(tree: &Abst) -> HashMap<NodeId, usize> {
    let mut counts: HashMap<NodeId, usize> = HashMap::new();
    let mut stack: Vec<NodeId> = Vec::new();
    for block in tree.used_blocks() {
        for &stmt in &tree.block(block).children {
            *counts.entry(stmt).or_default() += 1;
            stack.push(stmt);
        }
    }
    while let Some(id) = stack.pop() {
        for &child in &tree.node(id).children {
            *counts.entry(child).or_default() += 1;
            stack.push(child);
        }
    }
    counts
}

fn assert_arena_invariants(tree: &Abst) {
    let counts = reference_counts(tree);
    for (&id, &count) in &counts {
        assert!(
            tree.node_is_used(id),
            "node {} is referenced from a live block but tombstoned",
            id
        );
        assert_eq!(count, 1, "node {} is referenced {} times", id, count);
    }
}

fn branching_script() -> Vec<u8> {
    // Conditionals, a join, a loop, and native calls all at once.
    // _main:  PUSHIS 0; POPLIX 0; GOTO _loop
    // _loop:  PUSHIS 3; PUSHLIX 0; LT; IF _body; GOTO _exit
    // _body:  PUSHLIX 0; IF _skip; GOTO _incr
    // _skip:  COMM 0x90; GOTO _incr
    // _incr:  PUSHIS 1; PUSHLIX 0; ADD; POPLIX 0; GOTO _loop
    // _exit:  END
    build_container(
        &[("_main", 0)],
        &[("_loop", 3), ("_body", 8), ("_skip", 10), ("_incr", 12), ("_exit", 17)],
        &[
            (0x1D, 0),
            (0x20, 0),
            (0x0D, 0),
            (0x1D, 3),
            (0x1E, 0),
            (0x18, 0),
            (0x1C, 1),
            (0x0D, 4),
            (0x1E, 0),
            (0x1C, 2),
            (0x08, 0x90),
            (0x0D, 3),
            (0x1D, 1),
            (0x1E, 0),
            (0x0E, 0),
            (0x20, 0),
            (0x0D, 0),
            (0x09, 0),
        ],
        0,
    )
}

#[test]
fn test_single_reference_invariant_after_structuring() {
    let tree = build_tree(&branching_script(), false);
    assert_arena_invariants(&tree);
}

#[test]
fn test_single_reference_invariant_after_optimization() {
    let tree = build_tree(&branching_script(), true);
    assert_arena_invariants(&tree);
}

#[test]
fn test_procedure_entries_stay_live() {
    let tree = build_tree(&branching_script(), true);
    for proc in &tree.procedures {
        assert!(tree.block_is_used(BlockId(proc.block_num)));
    }
}

#[test]
fn test_lift_only_blocks_end_in_explicit_jumps() {
    // Before structuring, every block is a straight-line sequence closed
    // by an explicit terminator; nothing is implicit yet.
    use flwdec::ast::Tag;
    let natives = NativeRegistry::for_game(Game::Eo3).unwrap();
    let mut alerts = Alerts::new();
    let flow_file =
        flw_core::FlowFile::parse(&branching_script(), true, &mut alerts).unwrap();
    let flow = abstract_flow(&flow_file, &natives, &mut alerts).unwrap();
    let tree = Abst::lift(&flow, &mut alerts).unwrap();

    for block in tree.used_blocks() {
        let last = tree.block(block).children.last().copied().unwrap();
        assert!(
            matches!(tree.node(last).tag, Tag::Goto | Tag::If | Tag::Return),
            "block {:?} does not end in an explicit jump",
            block
        );
    }
    assert_arena_invariants(&tree);
}

#[test]
fn test_constant_folding_is_idempotent_on_whole_tree() {
    let mut tree = build_tree(&branching_script(), false);
    tree.fold_constants();
    let once = tree.dump();
    tree.fold_constants();
    assert_eq!(tree.dump(), once);
}
