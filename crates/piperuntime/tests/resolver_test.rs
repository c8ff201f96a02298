use pipecore::{NodeSpec, NodeType, WorkflowDefinition, WorkflowError};
use piperuntime::resolver;
use std::collections::HashMap;

fn step(id: &str) -> NodeSpec {
    NodeSpec::new(id, NodeType::Delay).with_config("duration_ms", 0.0)
}

fn linear() -> WorkflowDefinition {
    let mut wf = WorkflowDefinition::new("linear", "Linear");
    wf.add_node(NodeSpec::new("trigger", NodeType::ManualTrigger));
    wf.add_node(step("a"));
    wf.add_node(NodeSpec::new("b", NodeType::Results));
    wf.connect("trigger", "a");
    wf.connect("a", "b");
    wf
}

/// Small deterministic generator so the ordering property is checked over
/// many graph shapes without pulling in a property-testing crate.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn random_dag(seed: u64) -> WorkflowDefinition {
    let mut rng = Lcg(seed);
    let count = 2 + rng.below(14) as usize;
    let mut wf = WorkflowDefinition::new(format!("dag-{}", seed), "Random");

    // Rank i may only depend on lower ranks; declaration order is shuffled.
    let mut ids: Vec<usize> = (0..count).collect();
    for i in (1..ids.len()).rev() {
        let j = rng.below(i as u64 + 1) as usize;
        ids.swap(i, j);
    }
    for id in &ids {
        wf.add_node(step(&format!("n{}", id)));
    }
    for target in 1..count {
        for source in 0..target {
            if rng.below(3) == 0 {
                wf.connect(format!("n{}", source), format!("n{}", target));
            }
        }
    }
    wf
}

#[test]
fn test_linear_order_and_levels() {
    let order = resolver::resolve(&linear()).unwrap();

    assert_eq!(order.order, vec!["trigger", "a", "b"]);
    assert_eq!(order.levels, vec![vec!["trigger"], vec!["a"], vec!["b"]]);
    assert_eq!(order.dependencies_of("b"), ["a".to_string()]);
    assert!(order.dependencies_of("trigger").is_empty());
    assert_eq!(order.level_of("b"), Some(2));
    assert_eq!(order.critical_path, vec!["trigger", "a", "b"]);
}

#[test]
fn test_order_is_topological_for_random_dags() {
    for seed in 0..200 {
        let wf = random_dag(seed);
        let order = resolver::resolve(&wf).unwrap_or_else(|e| panic!("seed {}: {}", seed, e));

        assert_eq!(order.order.len(), wf.nodes.len(), "seed {}: every node is ordered", seed);

        let position: HashMap<&str, usize> = order
            .order
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        for edge in &wf.edges {
            assert!(
                position[edge.source.as_str()] < position[edge.target.as_str()],
                "seed {}: {} must precede {}",
                seed,
                edge.source,
                edge.target
            );
            assert!(
                order.level_of(&edge.source) < order.level_of(&edge.target),
                "seed {}: {} must sit in an earlier level than {}",
                seed,
                edge.source,
                edge.target
            );
        }
    }
}

#[test]
fn test_parallel_branches_share_a_level() {
    let mut wf = WorkflowDefinition::new("fan", "Fan out");
    wf.add_node(NodeSpec::new("trigger", NodeType::ManualTrigger));
    for id in ["a", "b", "c"] {
        wf.add_node(step(id));
        wf.connect("trigger", id);
    }
    wf.add_node(NodeSpec::new("done", NodeType::Results));
    for id in ["a", "b", "c"] {
        wf.connect(id, "done");
    }

    let order = resolver::resolve(&wf).unwrap();
    assert_eq!(order.levels.len(), 3);
    assert_eq!(order.levels[1], vec!["a", "b", "c"]);
    assert_eq!(order.dependencies_of("done"), ["a", "b", "c"].map(String::from));
}

#[test]
fn test_cycle_is_reported_with_its_members() {
    let mut wf = WorkflowDefinition::new("loop", "Loop");
    wf.add_node(NodeSpec::new("trigger", NodeType::ManualTrigger));
    wf.add_node(step("a"));
    wf.add_node(step("b"));
    wf.add_node(step("c"));
    wf.connect("trigger", "a");
    wf.connect("a", "b");
    wf.connect("b", "c");
    wf.connect("c", "a");

    match resolver::resolve(&wf) {
        Err(WorkflowError::CyclicDependency { nodes }) => {
            assert_eq!(nodes, vec!["a", "b", "c"]);
        }
        other => panic!("expected a cyclic dependency, got {:?}", other),
    }
}

#[test]
fn test_edge_to_unknown_node_is_rejected() {
    let mut wf = linear();
    wf.connect("a", "ghost");

    assert_eq!(
        resolver::resolve(&wf).unwrap_err(),
        WorkflowError::NodeNotFound("ghost".to_string())
    );
}

#[test]
fn test_critical_path_follows_longest_branch() {
    let mut wf = WorkflowDefinition::new("branches", "Branches");
    wf.add_node(NodeSpec::new("trigger", NodeType::ManualTrigger));
    wf.add_node(step("short"));
    wf.add_node(step("long1"));
    wf.add_node(step("long2"));
    wf.add_node(NodeSpec::new("sink", NodeType::Results));
    wf.connect("trigger", "short");
    wf.connect("short", "sink");
    wf.connect("trigger", "long1");
    wf.connect("long1", "long2");
    wf.connect("long2", "sink");

    let order = resolver::resolve(&wf).unwrap();
    assert_eq!(order.critical_path, vec!["trigger", "long1", "long2", "sink"]);
}

#[test]
fn test_empty_workflow_resolves_to_nothing() {
    let wf = WorkflowDefinition::new("empty", "Empty");
    let order = resolver::resolve(&wf).unwrap();

    assert!(order.order.is_empty());
    assert!(order.levels.is_empty());
    assert!(order.critical_path.is_empty());
}
