//! Pure step helpers: merging writes and computing the next frontier

use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeId, END};
use crate::state::{StateError, StateSchema};
use serde_json::Value;

/// Merge node updates into `state` in the order given.
///
/// Callers pass `writes` sorted by node declaration order; that order is what
/// makes same-key writes within one superstep reproducible.
pub(crate) fn apply_writes(
    schema: &StateSchema,
    state: &mut Value,
    writes: &[(NodeId, Value)],
) -> Result<()> {
    for (node, update) in writes {
        schema.apply(state, update).map_err(|err| match err {
            StateError::ReducerMismatch(_) => GraphError::from(err),
            other => GraphError::NodeExecution {
                node: node.clone(),
                error: other.to_string(),
            },
        })?;
    }
    Ok(())
}

/// Frontier of the next superstep.
///
/// Follows every static edge of each completed node and evaluates every router
/// against the merged state. Targets equal to [`END`] drop out. The result is
/// deduplicated and sorted by declaration order.
pub(crate) fn next_frontier(graph: &Graph, completed: &[NodeId], state: &Value) -> Result<Vec<NodeId>> {
    let mut next = Vec::new();
    for node in completed {
        for edge in graph.edges_from(node) {
            let target = match edge {
                Edge::Direct(target) => target.clone(),
                Edge::Conditional { router, branches } => {
                    let label = router(state);
                    match branches.get(&label) {
                        Some(target) => target.clone(),
                        None if label == END => END.to_string(),
                        None => {
                            return Err(GraphError::RouterReturnedInvalidLabel {
                                node: node.clone(),
                                label,
                            })
                        }
                    }
                }
            };
            if target != END {
                next.push(target);
            }
        }
    }
    graph.sort_by_declaration(&mut next);
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{NodeSpec, Router};
    use crate::state::AppendReducer;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn node(id: &str) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            handler: Arc::new(|_| Box::pin(async { Ok(Value::Null) })),
            subgraph: None,
        }
    }

    fn graph() -> Graph {
        let mut graph = Graph::new();
        for id in ["route", "a", "b", "join"] {
            graph.add_node(node(id));
        }
        graph.set_entry("route");
        let router: Router = Arc::new(|state: &Value| {
            state["choice"].as_str().unwrap_or("none").to_string()
        });
        graph.add_edge(
            "route",
            Edge::Conditional {
                router,
                branches: BTreeMap::from([
                    ("left".to_string(), "a".to_string()),
                    ("done".to_string(), END.to_string()),
                ]),
            },
        );
        graph.add_edge("route", Edge::Direct("b".to_string()));
        graph.add_edge("b", Edge::Direct("join".to_string()));
        graph.add_edge("a", Edge::Direct("join".to_string()));
        graph
    }

    #[test]
    fn test_static_and_conditional_targets() {
        let graph = graph();
        let next = next_frontier(&graph, &["route".to_string()], &json!({"choice": "left"})).unwrap();
        assert_eq!(next, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_end_label_drops_branch() {
        let graph = graph();
        let next = next_frontier(&graph, &["route".to_string()], &json!({"choice": "done"})).unwrap();
        assert_eq!(next, vec!["b".to_string()]);

        let next = next_frontier(&graph, &["route".to_string()], &json!({"choice": END})).unwrap();
        assert_eq!(next, vec!["b".to_string()]);
    }

    #[test]
    fn test_fan_in_deduplicates() {
        let graph = graph();
        let next = next_frontier(&graph, &["a".to_string(), "b".to_string()], &json!({})).unwrap();
        assert_eq!(next, vec!["join".to_string()]);
    }

    #[test]
    fn test_invalid_label() {
        let graph = graph();
        let err = next_frontier(&graph, &["route".to_string()], &json!({"choice": "right"})).unwrap_err();
        assert!(matches!(
            err,
            GraphError::RouterReturnedInvalidLabel { ref node, ref label } if node == "route" && label == "right"
        ));
    }

    #[test]
    fn test_writes_merge_in_given_order() {
        let schema = StateSchema::new().with_reducer("log", AppendReducer);
        let mut state = json!({"log": []});
        let writes = vec![
            ("a".to_string(), json!({"log": ["from a"]})),
            ("b".to_string(), json!({"log": ["from b"]})),
        ];
        apply_writes(&schema, &mut state, &writes).unwrap();
        assert_eq!(state["log"], json!(["from a", "from b"]));
    }

    #[test]
    fn test_bad_update_is_attributed_to_node() {
        let schema = StateSchema::new();
        let mut state = json!({});
        let writes = vec![("a".to_string(), json!("oops"))];
        let err = apply_writes(&schema, &mut state, &writes).unwrap_err();
        assert!(matches!(err, GraphError::NodeExecution { ref node, .. } if node == "a"));
    }
}
