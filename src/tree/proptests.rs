//! Property-based tests for tree structure
//!
//! Random sequences of branch, select and delete operations made through the
//! selected path must leave every cached weight equal to the true descendant
//! count, and every selection pointing at an existing child.

use super::*;
use crate::llm::testing::MockTransport;
use crate::store::MemoryStore;
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Branch { depth: usize },
    Select { depth: usize, child: usize },
    Delete { depth: usize, child: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..8).prop_map(|depth| Op::Branch { depth }),
        1 => (0usize..8, 0usize..4).prop_map(|(depth, child)| Op::Select { depth, child }),
        1 => (0usize..8, 0usize..4).prop_map(|(depth, child)| Op::Delete { depth, child }),
    ]
}

fn new_tree() -> (ConversationTree, Arc<MemoryStore>) {
    let records = Arc::new(MemoryStore::new());
    let tasks = Arc::new(TaskStore::new(Arc::new(MockTransport::new())));
    let settings = Arc::new(SettingsStore::load(records.clone()));
    (ConversationTree::new(records.clone(), tasks, settings), records)
}

fn apply(tree: &ConversationTree, op: &Op, counter: &mut usize) -> TreeResult<()> {
    let path = tree.selected_path()?;
    match *op {
        Op::Branch { depth } => {
            let cursor = &path[depth % path.len()];
            *counter += 1;
            cursor.create_branch(BranchRequest {
                content: Some(format!("m{counter}")),
                ..BranchRequest::default()
            })?;
        }
        Op::Select { depth, child } => {
            let cursor = &path[depth % path.len()];
            let children = cursor.node().children;
            if !children.is_empty() {
                cursor.select_child(&children[child % children.len()])?;
            }
        }
        Op::Delete { depth, child } => {
            let cursor = &path[depth % path.len()];
            let children = cursor.node().children;
            if !children.is_empty() {
                cursor.delete_child(&children[child % children.len()])?;
            }
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn prop_cached_weights_match_descendant_count(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (tree, _records) = new_tree();
        let mut counter = 0;

        for op in &ops {
            apply(&tree, op, &mut counter).unwrap();

            let reachable = tree.subtree_ids(ROOT_ID);
            for id in &reachable {
                let expected = tree.subtree_ids(id).len() as u64 - 1;
                prop_assert_eq!(tree.node(id).weight, expected, "weight of {} after {:?}", id, op);
            }
        }
    }

    #[test]
    fn prop_selection_always_points_at_a_child(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (tree, _records) = new_tree();
        let mut counter = 0;

        for op in &ops {
            apply(&tree, op, &mut counter).unwrap();
        }

        for id in tree.subtree_ids(ROOT_ID) {
            let node = tree.node(&id);
            match &node.selected {
                Some(selected) => prop_assert!(node.children.contains(selected)),
                None => prop_assert!(node.children.is_empty()),
            }
        }
    }

    #[test]
    fn prop_deletion_leaves_no_orphans(ops in prop::collection::vec(arb_op(), 1..40)) {
        let (tree, records) = new_tree();
        let mut counter = 0;

        for op in &ops {
            apply(&tree, op, &mut counter).unwrap();
        }

        let mut reachable = tree.subtree_ids(ROOT_ID);
        reachable.sort();
        prop_assert_eq!(records.keys(), reachable.clone());
        prop_assert_eq!(tree.repair_weights(ROOT_ID).unwrap(), reachable.len() as u64 - 1);
    }
}
