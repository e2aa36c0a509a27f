//! Pure state machine for the revision loop
//!
//! No I/O and no async: given the node that just finished and the state it
//! produced, decide which node runs next.
//!
//! ```text
//! start → writer → reviewer ─┬─► writer        (continue flag true)
//!                            └─► publisher → end
//! ```

use redraft_core::RevisionState;
use serde::{Deserialize, Serialize};

/// A node of the graph, or the terminal marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Node {
    Writer,
    Reviewer,
    Publisher,
    /// Terminal marker; nothing left to run
    End,
}

impl Node {
    /// Node every fresh run enters at
    pub const ENTRY: Node = Node::Writer;

    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Writer => "writer",
            Node::Reviewer => "reviewer",
            Node::Publisher => "publisher",
            Node::End => "end",
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of the reviewer's conditional edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Send the draft back for another revision
    Writer,
    /// Stop revising and finalize
    Publisher,
}

impl From<Route> for Node {
    fn from(route: Route) -> Self {
        match route {
            Route::Writer => Node::Writer,
            Route::Publisher => Node::Publisher,
        }
    }
}

/// Conditional edge out of the reviewer
///
/// Depends on the continue flag alone. An absent flag routes to the
/// publisher, so malformed state always terminates.
pub fn route(state: &RevisionState) -> Route {
    match state.continue_flag() {
        Some(true) => Route::Writer,
        Some(false) | None => Route::Publisher,
    }
}

/// Node to run after `completed` has produced `state`
pub fn next_node(completed: Node, state: &RevisionState) -> Node {
    match completed {
        Node::Writer => Node::Reviewer,
        Node::Reviewer => route(state).into(),
        Node::Publisher | Node::End => Node::End,
    }
}

/// Kind of edge in the static graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeKind {
    Always,
    /// Taken when `route` picks this target
    Conditional,
}

/// Edge in the static graph; `None` stands for the implicit start marker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub from: Option<Node>,
    pub to: Node,
    pub kind: EdgeKind,
}

/// Static edge list of the revision graph
pub fn edges() -> Vec<Edge> {
    vec![
        Edge {
            from: None,
            to: Node::ENTRY,
            kind: EdgeKind::Always,
        },
        Edge {
            from: Some(Node::Writer),
            to: Node::Reviewer,
            kind: EdgeKind::Always,
        },
        Edge {
            from: Some(Node::Reviewer),
            to: Node::Writer,
            kind: EdgeKind::Conditional,
        },
        Edge {
            from: Some(Node::Reviewer),
            to: Node::Publisher,
            kind: EdgeKind::Conditional,
        },
        Edge {
            from: Some(Node::Publisher),
            to: Node::End,
            kind: EdgeKind::Always,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use redraft_core::Decision;

    fn state_with_flag(flag: Option<bool>) -> RevisionState {
        let json = match flag {
            Some(f) => format!(r#"{{"original_message": "hi", "continue_flag": {}}}"#, f),
            None => r#"{"original_message": "hi"}"#.to_string(),
        };
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_route_true_false_and_absent() {
        assert_eq!(route(&state_with_flag(Some(true))), Route::Writer);
        assert_eq!(route(&state_with_flag(Some(false))), Route::Publisher);
        assert_eq!(route(&state_with_flag(None)), Route::Publisher);
    }

    #[test]
    fn test_route_is_idempotent() {
        for flag in [Some(true), Some(false), None] {
            let state = state_with_flag(flag);
            assert_eq!(route(&state), route(&state));
        }
    }

    #[test]
    fn test_route_ignores_decision() {
        let mut state = RevisionState::new("hi").unwrap();
        state.record_draft("d");
        state.record_review("fine", Decision::Approve, 3);
        assert_eq!(route(&state), Route::Publisher);

        let fresh = RevisionState::new("hi").unwrap();
        assert_eq!(fresh.decision(), Decision::Revise);
        assert_eq!(route(&fresh), Route::Writer);
    }

    #[test]
    fn test_next_node_sequence() {
        let mut state = RevisionState::new("hi").unwrap();
        assert_eq!(next_node(Node::Writer, &state), Node::Reviewer);

        state.record_draft("d");
        state.record_review("more", Decision::Revise, 3);
        assert_eq!(next_node(Node::Reviewer, &state), Node::Writer);

        state.force_approve("cap");
        assert_eq!(next_node(Node::Reviewer, &state), Node::Publisher);
        assert_eq!(next_node(Node::Publisher, &state), Node::End);
        assert_eq!(next_node(Node::End, &state), Node::End);
    }

    #[test]
    fn test_graph_shape() {
        let edges = edges();
        assert!(edges
            .iter()
            .any(|e| e.from.is_none() && e.to == Node::Writer));

        let from_reviewer: Vec<_> = edges
            .iter()
            .filter(|e| e.from == Some(Node::Reviewer))
            .collect();
        assert_eq!(from_reviewer.len(), 2);
        assert!(from_reviewer
            .iter()
            .all(|e| e.kind == EdgeKind::Conditional));

        assert!(edges
            .iter()
            .any(|e| e.from == Some(Node::Publisher) && e.to == Node::End));
    }

    #[test]
    fn test_node_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Node::Publisher).unwrap(), "\"publisher\"");
        let node: Node = serde_json::from_str("\"reviewer\"").unwrap();
        assert_eq!(node, Node::Reviewer);
    }
}
