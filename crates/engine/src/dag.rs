//! Workflow graph validation; run before persisting a workflow.
//!
//! Rules enforced:
//! 1. Node IDs must be unique within the workflow.
//! 2. Every edge must reference valid node IDs (both `source` and `target`).
//! 3. Every node config must pass its own schema check.
//! 4. Fan-out: edges leaving a condition node carry distinct `true_path` /
//!    `false_path` labels; any other node has at most one outgoing edge and
//!    it is unlabelled.
//! 5. Trigger nodes have no incoming edges, and an active workflow has at
//!    least one trigger.
//! 6. The directed graph must be acyclic (topological sort must succeed).
//!
//! Returns a topologically-sorted list of node IDs on success.

use std::collections::{HashMap, HashSet, VecDeque};

use uuid::Uuid;

use nodes::{NodeKind, FALSE_PATH, TRUE_PATH};

use crate::{EngineError, models::Workflow};

/// Validate the workflow's graph and return nodes in topological order.
///
/// # Errors
/// - [`EngineError::DuplicateNodeId`] if two nodes share an ID.
/// - [`EngineError::UnknownNodeReference`] if an edge references a missing node.
/// - [`EngineError::InvalidNodeConfig`] if a node's config is malformed.
/// - [`EngineError::GraphConfiguration`] for fan-out or trigger violations.
/// - [`EngineError::CycleDetected`] if the graph is not acyclic.
pub fn validate_dag(workflow: &Workflow) -> Result<Vec<Uuid>, EngineError> {
    // -----------------------------------------------------------------------
    // 1. Ensure node IDs are unique
    // -----------------------------------------------------------------------
    let mut kinds: HashMap<Uuid, NodeKind> = HashMap::new();
    for node in &workflow.nodes {
        if kinds.insert(node.id, node.kind()).is_some() {
            return Err(EngineError::DuplicateNodeId(node.id));
        }
    }

    // -----------------------------------------------------------------------
    // 2. Validate edge endpoints
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        if !kinds.contains_key(&edge.source) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.source,
                side: "source",
            });
        }
        if !kinds.contains_key(&edge.target) {
            return Err(EngineError::UnknownNodeReference {
                node_id: edge.target,
                side: "target",
            });
        }
    }

    // -----------------------------------------------------------------------
    // 3. Node configs
    // -----------------------------------------------------------------------
    for node in &workflow.nodes {
        node.config.validate().map_err(|e| EngineError::InvalidNodeConfig {
            node_id: node.id,
            message: e.to_string(),
        })?;
    }

    // -----------------------------------------------------------------------
    // 4. Fan-out rules
    // -----------------------------------------------------------------------
    let mut outgoing: HashMap<Uuid, Vec<Option<&str>>> = HashMap::new();
    for edge in &workflow.edges {
        outgoing
            .entry(edge.source)
            .or_default()
            .push(edge.condition_path.as_deref());
    }

    for (source, labels) in &outgoing {
        if kinds[source] == NodeKind::Condition {
            let mut seen: HashSet<&str> = HashSet::new();
            for label in labels {
                match label {
                    Some(l) if *l == TRUE_PATH || *l == FALSE_PATH => {
                        if !seen.insert(*l) {
                            return Err(EngineError::GraphConfiguration(format!(
                                "condition node '{source}' has more than one '{l}' edge"
                            )));
                        }
                    }
                    Some(l) => {
                        return Err(EngineError::GraphConfiguration(format!(
                            "condition node '{source}' has an edge labelled '{l}'; \
                             expected '{TRUE_PATH}' or '{FALSE_PATH}'"
                        )));
                    }
                    None => {
                        return Err(EngineError::GraphConfiguration(format!(
                            "condition node '{source}' has an unlabelled outgoing edge"
                        )));
                    }
                }
            }
        } else {
            if labels.iter().any(Option::is_some) {
                return Err(EngineError::GraphConfiguration(format!(
                    "only condition nodes may have labelled edges (node '{source}')"
                )));
            }
            if labels.len() > 1 {
                return Err(EngineError::GraphConfiguration(format!(
                    "node '{source}' has {} outgoing edges; at most one is allowed",
                    labels.len()
                )));
            }
        }
    }

    // -----------------------------------------------------------------------
    // 5. Triggers
    // -----------------------------------------------------------------------
    for edge in &workflow.edges {
        if kinds[&edge.target] == NodeKind::Trigger {
            return Err(EngineError::GraphConfiguration(format!(
                "trigger node '{}' cannot have incoming edges",
                edge.target
            )));
        }
    }

    if workflow.is_active && !kinds.values().any(|k| *k == NodeKind::Trigger) {
        return Err(EngineError::GraphConfiguration(
            "an active workflow needs at least one trigger node".into(),
        ));
    }

    // -----------------------------------------------------------------------
    // 6. Topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut adjacency: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    let mut in_degree: HashMap<Uuid, usize> = HashMap::new();

    for node in &workflow.nodes {
        adjacency.entry(node.id).or_default();
        in_degree.entry(node.id).or_insert(0);
    }

    for edge in &workflow.edges {
        adjacency.entry(edge.source).or_default().push(edge.target);
        *in_degree.entry(edge.target).or_insert(0) += 1;
    }

    // Seed in declaration order so the result is stable.
    let mut queue: VecDeque<Uuid> = workflow
        .nodes
        .iter()
        .map(|n| n.id)
        .filter(|id| in_degree[id] == 0)
        .collect();

    let mut sorted: Vec<Uuid> = Vec::with_capacity(workflow.nodes.len());

    while let Some(node_id) = queue.pop_front() {
        sorted.push(node_id);

        if let Some(neighbours) = adjacency.get(&node_id) {
            for neighbour in neighbours {
                let deg = in_degree.entry(*neighbour).or_insert(0);
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*neighbour);
                }
            }
        }
    }

    if sorted.len() != workflow.nodes.len() {
        return Err(EngineError::CycleDetected);
    }

    Ok(sorted)
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, Node};
    use nodes::{ActionOperation, NodeConfig, Predicate};
    use serde_json::{json, Map};

    fn trigger() -> Node {
        Node::new(NodeConfig::Trigger { event_type: "lead.created".into() })
    }

    fn action() -> Node {
        let mut values = Map::new();
        values.insert("touched".into(), json!(true));
        Node::new(NodeConfig::Action { action: ActionOperation::SetFields { values } })
    }

    fn condition() -> Node {
        Node::new(NodeConfig::Condition {
            predicate: Predicate::compare("value", nodes::CompareOp::Gt, json!(10000)),
        })
    }

    fn workflow(nodes: Vec<Node>, edges: Vec<Edge>) -> Workflow {
        Workflow::new(Uuid::new_v4(), "test", nodes, edges)
    }

    #[test]
    fn valid_linear_graph_returns_sorted_order() {
        // T → A → B
        let (t, a, b) = (trigger(), action(), action());
        let expected = vec![t.id, a.id, b.id];
        let edges = vec![Edge::new(t.id, a.id), Edge::new(a.id, b.id)];
        let wf = workflow(vec![t, a, b], edges);

        let sorted = validate_dag(&wf).expect("should be valid");
        assert_eq!(sorted, expected);
    }

    #[test]
    fn valid_condition_diamond() {
        //     T
        //     |
        //     C
        //    / \
        //   A   B
        let (t, c, a, b) = (trigger(), condition(), action(), action());
        let (t_id, c_id, a_id, b_id) = (t.id, c.id, a.id, b.id);
        let wf = workflow(
            vec![t, c, a, b],
            vec![
                Edge::new(t_id, c_id),
                Edge::labelled(c_id, a_id, TRUE_PATH),
                Edge::labelled(c_id, b_id, FALSE_PATH),
            ],
        );

        let sorted = validate_dag(&wf).expect("should be valid");
        assert_eq!(sorted.first(), Some(&t_id));
        assert_eq!(sorted.len(), 4);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let a = action();
        let mut dup = action();
        dup.id = a.id;
        let wf = workflow(vec![trigger(), a.clone(), dup], vec![]);
        assert!(matches!(
            validate_dag(&wf),
            Err(EngineError::DuplicateNodeId(id)) if id == a.id
        ));
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let t = trigger();
        let ghost = Uuid::new_v4();
        let edges = vec![Edge::new(t.id, ghost)];
        let wf = workflow(vec![t], edges);
        assert!(matches!(
            validate_dag(&wf),
            Err(EngineError::UnknownNodeReference { node_id, side: "target" }) if node_id == ghost
        ));
    }

    #[test]
    fn cycle_is_detected() {
        // T → A → B → A
        let (t, a, b) = (trigger(), action(), action());
        let edges = vec![
            Edge::new(t.id, a.id),
            Edge::new(a.id, b.id),
            Edge::new(b.id, a.id),
        ];
        let wf = workflow(vec![t, a, b], edges);
        assert!(matches!(validate_dag(&wf), Err(EngineError::CycleDetected)));
    }

    #[test]
    fn action_fan_out_is_rejected() {
        let (t, a, b, c) = (trigger(), action(), action(), action());
        let edges = vec![Edge::new(t.id, a.id), Edge::new(a.id, b.id), Edge::new(a.id, c.id)];
        let wf = workflow(vec![t, a, b, c], edges);
        assert!(matches!(validate_dag(&wf), Err(EngineError::GraphConfiguration(_))));
    }

    #[test]
    fn unknown_branch_label_is_rejected() {
        let (t, c, a) = (trigger(), condition(), action());
        let edges = vec![Edge::new(t.id, c.id), Edge::labelled(c.id, a.id, "maybe")];
        let wf = workflow(vec![t, c, a], edges);
        assert!(matches!(validate_dag(&wf), Err(EngineError::GraphConfiguration(_))));
    }

    #[test]
    fn duplicate_branch_label_is_rejected() {
        let (t, c, a, b) = (trigger(), condition(), action(), action());
        let edges = vec![
            Edge::new(t.id, c.id),
            Edge::labelled(c.id, a.id, TRUE_PATH),
            Edge::labelled(c.id, b.id, TRUE_PATH),
        ];
        let wf = workflow(vec![t, c, a, b], edges);
        assert!(matches!(validate_dag(&wf), Err(EngineError::GraphConfiguration(_))));
    }

    #[test]
    fn labelled_edge_from_action_is_rejected() {
        let (t, a, b) = (trigger(), action(), action());
        let edges = vec![Edge::new(t.id, a.id), Edge::labelled(a.id, b.id, TRUE_PATH)];
        let wf = workflow(vec![t, a, b], edges);
        assert!(matches!(validate_dag(&wf), Err(EngineError::GraphConfiguration(_))));
    }

    #[test]
    fn active_workflow_without_trigger_is_rejected() {
        let wf = workflow(vec![action()], vec![]);
        assert!(matches!(validate_dag(&wf), Err(EngineError::GraphConfiguration(_))));

        let mut inactive = workflow(vec![action()], vec![]);
        inactive.is_active = false;
        assert!(validate_dag(&inactive).is_ok());
    }

    #[test]
    fn trigger_with_incoming_edge_is_rejected() {
        let (t, a, t2) = (trigger(), action(), trigger());
        let edges = vec![Edge::new(t.id, a.id), Edge::new(a.id, t2.id)];
        let wf = workflow(vec![t, a, t2], edges);
        assert!(matches!(validate_dag(&wf), Err(EngineError::GraphConfiguration(_))));
    }

    #[test]
    fn invalid_node_config_is_rejected() {
        let t = trigger();
        let bad = Node::new(NodeConfig::Trigger { event_type: "  ".into() });
        let bad_id = bad.id;
        let wf = workflow(vec![t, bad], vec![]);
        assert!(matches!(
            validate_dag(&wf),
            Err(EngineError::InvalidNodeConfig { node_id, .. }) if node_id == bad_id
        ));
    }

    #[test]
    fn single_trigger_no_edges_is_valid() {
        let t = trigger();
        let id = t.id;
        let sorted = validate_dag(&workflow(vec![t], vec![])).expect("single node should be valid");
        assert_eq!(sorted, vec![id]);
    }
}
