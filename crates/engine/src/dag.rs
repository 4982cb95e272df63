//! DAG validation — run this before registering or executing a graph.
//!
//! Rules enforced:
//! 1. Task IDs must be unique within the graph.
//! 2. Every edge must reference valid task IDs (both `from` and `to`).
//! 3. Every declared task input must be a direct upstream of that task.
//! 4. The directed graph must be acyclic (topological sort must succeed).
//!
//! Returns a topologically-sorted list of task IDs on success.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{models::WorkflowGraph, EngineError};

/// Validate the graph and return its tasks in topological order.
///
/// Ties are broken by declaration order, so the result is deterministic.
///
/// # Errors
/// - [`EngineError::DuplicateTaskId`] if two tasks share an ID.
/// - [`EngineError::UnknownTaskReference`] if an edge references a missing task.
/// - [`EngineError::InputNotUpstream`] if a task reads a non-upstream output.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(graph: &WorkflowGraph) -> Result<Vec<String>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure task IDs are unique
    // -----------------------------------------------------------------------
    let mut seen_ids: HashSet<&str> = HashSet::new();
    for task in &graph.tasks {
        if !seen_ids.insert(task.id.as_str()) {
            return Err(EngineError::DuplicateTaskId(task.id.clone()));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &graph.edges {
        if !seen_ids.contains(edge.from.as_str()) {
            return Err(EngineError::UnknownTaskReference {
                task_id: edge.from.clone(),
                side: "from",
            });
        }
        if !seen_ids.contains(edge.to.as_str()) {
            return Err(EngineError::UnknownTaskReference {
                task_id: edge.to.clone(),
                side: "to",
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3. Inputs must come from direct upstream tasks
    // -----------------------------------------------------------------------
    let edge_set: HashSet<(&str, &str)> = graph
        .edges
        .iter()
        .map(|e| (e.from.as_str(), e.to.as_str()))
        .collect();

    for task in &graph.tasks {
        for input in &task.inputs {
            if !edge_set.contains(&(input.as_str(), task.id.as_str())) {
                return Err(EngineError::InputNotUpstream {
                    task_id: task.id.clone(),
                    input: input.clone(),
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // 4. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();

    for task in &graph.tasks {
        adjacency.entry(task.id.as_str()).or_default();
        in_degree.entry(task.id.as_str()).or_insert(0);
    }

    for edge in &graph.edges {
        adjacency
            .entry(edge.from.as_str())
            .or_default()
            .push(edge.to.as_str());
        *in_degree.entry(edge.to.as_str()).or_insert(0) += 1;
    }

    // Seed with roots, in declaration order.
    let mut queue: VecDeque<&str> = graph
        .tasks
        .iter()
        .map(|t| t.id.as_str())
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(graph.tasks.len());

    while let Some(task_id) = queue.pop_front() {
        sorted.push(task_id.to_owned());

        if let Some(neighbours) = adjacency.get(task_id) {
            for &neighbour in neighbours {
                let deg = in_degree.entry(neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(neighbour);
                }
            }
        }
    }

    // If we didn't visit every task the graph contains a cycle.
    if sorted.len() != graph.tasks.len() {
        return Err(EngineError::CycleDetected(graph.name.clone()));
    }

    Ok(sorted)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Task;

    fn graph_of(ids: &[&str]) -> WorkflowGraph {
        ids.iter().fold(WorkflowGraph::new("test"), |g, id| {
            g.task(Task::operator(*id, "mock"))
        })
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let graph = graph_of(&["a", "b", "c"]).chain(&["a", "b", "c"]);

        let sorted = validate_dag(&graph).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c"]);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let graph = graph_of(&["a", "b", "c", "d"])
            .fan_out("a", &["b", "c"])
            .fan_in(&["b", "c"], "d");

        let sorted = validate_dag(&graph).expect("should be valid");
        assert_eq!(sorted, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn duplicate_task_id_is_rejected() {
        let graph = graph_of(&["a", "a"]);
        assert!(matches!(
            validate_dag(&graph),
            Err(EngineError::DuplicateTaskId(id)) if id == "a"
        ));
    }

    #[test]
    fn edge_referencing_missing_task_is_rejected() {
        let graph = graph_of(&["a"]).edge("a", "ghost");
        assert!(matches!(
            validate_dag(&graph),
            Err(EngineError::UnknownTaskReference { task_id, side: "to" }) if task_id == "ghost"
        ));
    }

    #[test]
    fn input_from_non_upstream_is_rejected() {
        // c reads a, but only b feeds c.
        let graph = WorkflowGraph::new("test")
            .task(Task::operator("a", "mock"))
            .task(Task::operator("b", "mock"))
            .task(Task::operator("c", "mock").with_inputs(["a"]))
            .chain(&["a", "b", "c"]);

        assert!(matches!(
            validate_dag(&graph),
            Err(EngineError::InputNotUpstream { task_id, input }) if task_id == "c" && input == "a"
        ));
    }

    #[test]
    fn cycle_is_detected() {
        // A → B → C → A
        let graph = graph_of(&["a", "b", "c"])
            .chain(&["a", "b", "c"])
            .edge("c", "a");
        assert!(matches!(validate_dag(&graph), Err(EngineError::CycleDetected(name)) if name == "test"));
    }

    #[test]
    fn single_task_no_edges_is_valid() {
        let graph = graph_of(&["solo"]);
        let sorted = validate_dag(&graph).expect("single task should be valid");
        assert_eq!(sorted, vec!["solo"]);
    }
}
