//! Property tests for DAG compilation: cycle detection and root/leaf
//! computation should hold for any acyclic-by-construction node mapping, and
//! closing a chain into a cycle should always be rejected.

use proptest::collection::vec as pvec;
use proptest::prelude::*;
use ramus::dag::{compile, NodeDescriptor};
use ramus::error::DagCompileError;
use ramus::node::node_fn;
use rustc_hash::FxHashMap;
use serde_json::json;

fn noop() -> NodeDescriptor<()> {
    NodeDescriptor::new(node_fn(|_input| async move { Ok(json!(null)) }))
}

fn node_name(i: usize) -> String {
    format!("n{i}")
}

/// Node `i`'s parents are derived from `seeds[i]` as a bitmask over `0..i`,
/// so the resulting mapping is acyclic by construction no matter which bits
/// are set.
fn parents_of(i: usize, seed: u32) -> Vec<usize> {
    (0..i).filter(|&p| (seed >> (p % 32)) & 1 == 1).collect()
}

fn layered_dag_strategy() -> impl Strategy<Value = Vec<u32>> {
    (2usize..20).prop_flat_map(|n| pvec(any::<u32>(), n))
}

fn build_nodes(seeds: &[u32]) -> FxHashMap<String, NodeDescriptor<()>> {
    seeds
        .iter()
        .enumerate()
        .map(|(i, &seed)| {
            let descriptor = noop().parents(parents_of(i, seed).into_iter().map(node_name));
            (node_name(i), descriptor)
        })
        .collect()
}

proptest! {
    #[test]
    fn layered_dag_always_compiles(seeds in layered_dag_strategy()) {
        let nodes = build_nodes(&seeds);
        let compiled = compile(&nodes).expect("acyclic-by-construction DAG must compile");

        let mut expected_roots: Vec<String> = (0..seeds.len())
            .filter(|&i| parents_of(i, seeds[i]).is_empty())
            .map(node_name)
            .collect();
        expected_roots.sort();
        let mut actual_roots = compiled.root_set.clone();
        actual_roots.sort();
        prop_assert_eq!(actual_roots, expected_roots);

        let named: Vec<usize> = (0..seeds.len()).flat_map(|i| parents_of(i, seeds[i])).collect();
        let mut expected_leaves: Vec<String> = (0..seeds.len())
            .filter(|i| !named.contains(i))
            .map(node_name)
            .collect();
        expected_leaves.sort();
        let mut actual_leaves = compiled.leaf_set.clone();
        actual_leaves.sort();
        prop_assert_eq!(actual_leaves, expected_leaves);
    }

    #[test]
    fn closing_a_chain_is_always_a_cycle(chain_len in 2usize..20) {
        let mut nodes: FxHashMap<String, NodeDescriptor<()>> = (0..chain_len)
            .map(|i| {
                let parents: Vec<usize> = if i == 0 { Vec::new() } else { vec![i - 1] };
                (node_name(i), noop().parents(parents.into_iter().map(node_name)))
            })
            .collect();

        let first = node_name(0);
        let last = node_name(chain_len - 1);
        let first_descriptor = nodes.remove(&first).unwrap().parents([last]);
        nodes.insert(first, first_descriptor);

        prop_assert!(matches!(compile(&nodes), Err(DagCompileError::Cycle { .. })));
    }
}
