//! Benchmarks for DAG compilation (cycle detection, root/leaf computation).

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ramus::dag::{compile, NodeDescriptor};
use ramus::node::node_fn;
use rustc_hash::FxHashMap;
use serde_json::json;

fn noop_node(parents: &[String]) -> NodeDescriptor<()> {
    NodeDescriptor::new(node_fn(|_input| async move { Ok(json!(null)) })).parents(parents.to_vec())
}

/// `root -> n0 -> n1 -> ... -> n(count-1)`.
fn build_linear(count: usize) -> FxHashMap<String, NodeDescriptor<()>> {
    let mut nodes = FxHashMap::default();
    nodes.insert("root".to_string(), noop_node(&[]));
    let mut previous = "root".to_string();
    for i in 0..count {
        let name = format!("n{i}");
        nodes.insert(name.clone(), noop_node(&[previous.clone()]));
        previous = name;
    }
    nodes
}

/// `root -> [n0..n(width-1)]`, every worker an independent leaf.
fn build_fanout(width: usize) -> FxHashMap<String, NodeDescriptor<()>> {
    let mut nodes = FxHashMap::default();
    nodes.insert("root".to_string(), noop_node(&[]));
    for i in 0..width {
        nodes.insert(format!("n{i}"), noop_node(&["root".to_string()]));
    }
    nodes
}

/// `depth` layers of `width` nodes each, every node depending on every node
/// in the previous layer (root layer depends on a single `root`).
fn build_diamond(depth: usize, width: usize) -> FxHashMap<String, NodeDescriptor<()>> {
    let mut nodes = FxHashMap::default();
    nodes.insert("root".to_string(), noop_node(&[]));

    let mut previous_layer: Vec<String> = vec!["root".to_string()];
    for layer in 0..depth {
        let mut current_layer = Vec::with_capacity(width);
        for node in 0..width {
            let name = format!("L{layer}_N{node}");
            nodes.insert(name.clone(), noop_node(&previous_layer));
            current_layer.push(name);
        }
        previous_layer = current_layer;
    }
    nodes
}

fn bench_dag_compile(c: &mut Criterion) {
    let mut group = c.benchmark_group("dag_compile");

    for size in [10, 50, 100, 200] {
        group.bench_with_input(BenchmarkId::new("linear", size), &size, |b, &size| {
            b.iter(|| compile(&build_linear(size)).expect("compilation should succeed"));
        });
    }

    for width in [10, 50, 100] {
        group.bench_with_input(BenchmarkId::new("fanout", width), &width, |b, &width| {
            b.iter(|| compile(&build_fanout(width)).expect("compilation should succeed"));
        });
    }

    for (depth, width) in [(5, 10), (10, 10), (5, 20)] {
        group.bench_with_input(
            BenchmarkId::new("diamond", format!("{depth}x{width}")),
            &(depth, width),
            |b, &(depth, width)| {
                b.iter(|| compile(&build_diamond(depth, width)).expect("compilation should succeed"));
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_dag_compile);
criterion_main!(benches);
