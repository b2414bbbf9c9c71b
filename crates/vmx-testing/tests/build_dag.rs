//! Property 5 (§8): for any acyclic package dependency graph, the
//! build layout places every package after all of its dependencies,
//! and two runs over the same graph produce the same order.

use std::collections::BTreeMap;

use proptest::prelude::*;
use vmx_build::MemHome;

const NAMES: [&str; 6] = ["a", "b", "c", "d", "e", "f"];

/// An acyclic graph over a prefix of [`NAMES`]: node `i` may only
/// depend on nodes `j < i`, which rules out cycles by construction
/// while still letting the strategy shrink to small, varied DAGs.
fn acyclic_graph() -> impl Strategy<Value = BTreeMap<usize, Vec<usize>>> {
    (1usize..=NAMES.len()).prop_flat_map(|n| {
        let per_node: Vec<_> = (0..n)
            .map(|i| proptest::collection::vec(0..i.max(1), 0..i.min(3)).prop_map(move |mut deps| {
                deps.retain(|&d| d < i);
                deps.sort();
                deps.dedup();
                deps
            }))
            .collect();
        per_node.prop_map(move |deps| (0..n).zip(deps).collect::<BTreeMap<_, _>>())
    })
}

fn build_home(graph: &BTreeMap<usize, Vec<usize>>) -> (MemHome, Vec<String>) {
    let mut home = MemHome::new();
    let mut roots = Vec::new();
    for (&i, deps) in graph {
        let name = NAMES[i];
        let imports: String = deps.iter().map(|&d| format!("import \"{}\"\n", NAMES[d])).collect();
        home.add_file(name, format!("{name}.g"), format!("{imports}func F() {{}}"));
        roots.push(name.to_string());
    }
    (home, roots)
}

proptest::proptest! {
    #[test]
    fn layout_always_orders_dependencies_before_dependents(graph in acyclic_graph()) {
        let (home, roots) = build_home(&graph);
        let (order, diags) = vmx_build::plan(&home, None, &roots);
        proptest::prop_assert!(diags.is_empty(), "unexpected diagnostics: {:?}", diags);
        proptest::prop_assert_eq!(order.len(), graph.len());

        let position: BTreeMap<&str, usize> = order.iter().enumerate().map(|(i, p)| (p.as_str(), i)).collect();
        for (&i, deps) in &graph {
            for &d in deps {
                proptest::prop_assert!(position[NAMES[d]] < position[NAMES[i]]);
            }
        }
    }

    #[test]
    fn layout_is_deterministic_across_repeated_runs(graph in acyclic_graph()) {
        let (home, roots) = build_home(&graph);
        let (first, _) = vmx_build::plan(&home, None, &roots);
        let (second, _) = vmx_build::plan(&home, None, &roots);
        proptest::prop_assert_eq!(first, second);
    }
}
