use crate::state_machine::{StateId, StateKind, StateNode, StateTable, Transition};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{HashMap, HashSet};

/// Directed graph view of a pattern.
///
/// Nodes are the states of a [`StateTable`] and edges their transitions.
/// Transitions whose target label does not resolve are left out; the
/// validator reports them separately.
pub struct PatternGraph<'a> {
    pub graph: DiGraph<&'a StateNode, &'a Transition>,

    /// Maps table ids to graph indices
    pub state_index: HashMap<StateId, NodeIndex>,

    table: &'a StateTable,
}

impl<'a> PatternGraph<'a> {
    pub fn build(table: &'a StateTable) -> Self {
        let mut graph = DiGraph::new();
        let mut state_index = HashMap::new();

        for node in table.nodes() {
            state_index.insert(node.id, graph.add_node(node));
        }

        for node in table.nodes() {
            for transition in node.transitions() {
                if let Some(target) = table.lookup(&transition.target) {
                    graph.add_edge(
                        state_index[&node.id],
                        state_index[&target.id],
                        transition,
                    );
                }
            }
        }

        Self {
            graph,
            state_index,
            table,
        }
    }

    /// States reachable from the entry state, the entry itself included
    pub fn reachable(&self) -> HashSet<StateId> {
        let mut reached = HashSet::new();
        let Some(first) = self.table.first() else {
            return reached;
        };

        let mut bfs = Bfs::new(&self.graph, self.state_index[&first.id]);
        while let Some(idx) = bfs.next(&self.graph) {
            reached.insert(self.graph[idx].id);
        }
        reached
    }

    /// States the entry state can never lead to
    pub fn unreachable_states(&self) -> Vec<&'a StateNode> {
        let reached = self.reachable();
        self.table
            .nodes()
            .iter()
            .filter(|n| !reached.contains(&n.id))
            .collect()
    }

    pub fn reachable_end_states(&self) -> Vec<&'a StateNode> {
        let reached = self.reachable();
        self.table
            .nodes()
            .iter()
            .filter(|n| n.is_end() && reached.contains(&n.id))
            .collect()
    }

    /// Non-end states without outgoing edges
    pub fn dead_ends(&self) -> Vec<&'a StateNode> {
        self.graph
            .node_indices()
            .filter(|&idx| {
                !self.graph[idx].is_end()
                    && self
                        .graph
                        .edges_directed(idx, Direction::Outgoing)
                        .next()
                        .is_none()
            })
            .map(|idx| self.graph[idx])
            .collect()
    }

    pub fn has_cycles(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Export to DOT format for Graphviz
    pub fn to_dot(&self) -> String {
        let mut dot = "digraph Pattern {\n".to_string();
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box, style=filled];\n\n");

        for node in self.table.nodes() {
            let shape = match node.kind {
                StateKind::End { .. } => ", shape=doublecircle",
                StateKind::Start { .. } | StateKind::TriggerStart { .. } => ", shape=circle",
                _ => "",
            };
            dot.push_str(&format!(
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\"{}];\n",
                escape(&node.label),
                escape(&node.display_short()),
                node.kind.color(),
                shape
            ));
        }

        dot.push('\n');

        for edge in self.graph.edge_indices() {
            if let Some((from, to)) = self.graph.edge_endpoints(edge) {
                dot.push_str(&format!(
                    "  \"{}\" -> \"{}\" [label=\"{}\"];\n",
                    escape(&self.graph[from].label),
                    escape(&self.graph[to].label),
                    escape(&self.graph[edge].display_label())
                ));
            }
        }

        dot.push_str("}\n");
        dot
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            total_states: self.graph.node_count(),
            total_transitions: self.graph.edge_count(),
            end_states: self.table.nodes().iter().filter(|n| n.is_end()).count(),
            has_cycles: self.has_cycles(),
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStats {
    pub total_states: usize,
    pub total_transitions: usize,
    pub end_states: usize,
    pub has_cycles: bool,
}
