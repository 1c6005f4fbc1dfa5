// Network visualization graph - one node per post, edges between posts
// Nodes are indexed by id so single-node patches stay O(1)

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    /// Same id as the backing post
    pub id: String,
    pub label: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub from: String,
    pub to: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl NetworkEdge {
    pub fn touches(&self, node_id: &str) -> bool {
        self.from == node_id || self.to == node_id
    }
}

/// Wire shape: `{ "nodes": [...], "edges": [...] }`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphPayload {
    #[serde(default)]
    nodes: Vec<NetworkNode>,
    #[serde(default)]
    edges: Vec<NetworkEdge>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "GraphPayload", into = "GraphPayload")]
pub struct NetworkGraph {
    nodes: Vec<NetworkNode>,
    edges: Vec<NetworkEdge>,
    index: HashMap<String, usize>,
}

impl From<GraphPayload> for NetworkGraph {
    fn from(payload: GraphPayload) -> Self {
        Self::new(payload.nodes, payload.edges)
    }
}

impl From<NetworkGraph> for GraphPayload {
    fn from(graph: NetworkGraph) -> Self {
        Self {
            nodes: graph.nodes,
            edges: graph.edges,
        }
    }
}

impl NetworkGraph {
    /// Build a graph; later duplicates of a node id are dropped
    pub fn new(nodes: Vec<NetworkNode>, edges: Vec<NetworkEdge>) -> Self {
        let mut graph = Self {
            nodes: Vec::with_capacity(nodes.len()),
            edges,
            index: HashMap::with_capacity(nodes.len()),
        };
        for node in nodes {
            if !graph.index.contains_key(&node.id) {
                graph.index.insert(node.id.clone(), graph.nodes.len());
                graph.nodes.push(node);
            }
        }
        graph
    }

    pub fn nodes(&self) -> &[NetworkNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[NetworkEdge] {
        &self.edges
    }

    pub fn node(&self, id: &str) -> Option<&NetworkNode> {
        self.index.get(id).map(|&pos| &self.nodes[pos])
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut NetworkNode> {
        match self.index.get(id) {
            Some(&pos) => self.nodes.get_mut(pos),
            None => None,
        }
    }

    pub fn node_position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Replace the node with the same id in place, or insert it at `position`
    /// (clamped; appended when `None`).
    pub fn upsert_node(&mut self, node: NetworkNode, position: Option<usize>) {
        if let Some(existing) = self.node_mut(&node.id) {
            *existing = node;
            return;
        }
        match position {
            Some(pos) if pos < self.nodes.len() => {
                self.nodes.insert(pos, node);
                self.reindex();
            }
            _ => {
                self.index.insert(node.id.clone(), self.nodes.len());
                self.nodes.push(node);
            }
        }
    }

    /// Remove a node and every edge touching it. Returns the node with its former
    /// position and the removed edges with theirs.
    pub fn remove_node(&mut self, id: &str) -> Option<RemovedNode> {
        let position = self.index.remove(id)?;
        let node = self.nodes.remove(position);
        if position < self.nodes.len() {
            self.reindex();
        }
        let edges = self.remove_edges_touching(id);
        Some(RemovedNode {
            position,
            node,
            edges,
        })
    }

    /// Prune edges referencing `id`, keeping their original indices
    pub fn remove_edges_touching(&mut self, id: &str) -> Vec<(usize, NetworkEdge)> {
        let mut removed = Vec::new();
        let mut kept = Vec::with_capacity(self.edges.len());
        for (pos, edge) in self.edges.drain(..).enumerate() {
            if edge.touches(id) {
                removed.push((pos, edge));
            } else {
                kept.push(edge);
            }
        }
        self.edges = kept;
        removed
    }

    /// Re-insert edges at their recorded indices (ascending order expected)
    pub fn restore_edges(&mut self, edges: Vec<(usize, NetworkEdge)>) {
        for (pos, edge) in edges {
            if pos <= self.edges.len() {
                self.edges.insert(pos, edge);
            } else {
                self.edges.push(edge);
            }
        }
    }

    /// Keep only nodes accepted by `keep`, then drop edges left dangling
    pub fn retain_nodes<F>(&mut self, mut keep: F) -> usize
    where
        F: FnMut(&NetworkNode) -> bool,
    {
        let before = self.nodes.len();
        self.nodes.retain(|node| keep(node));
        let removed = before - self.nodes.len();
        if removed > 0 {
            self.reindex();
            let index = &self.index;
            self.edges
                .retain(|edge| index.contains_key(&edge.from) && index.contains_key(&edge.to));
        }
        removed
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }

    fn reindex(&mut self) {
        self.index.clear();
        for (pos, node) in self.nodes.iter().enumerate() {
            self.index.insert(node.id.clone(), pos);
        }
    }
}

/// A node taken out of the graph together with its incident edges
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedNode {
    pub position: usize,
    pub node: NetworkNode,
    pub edges: Vec<(usize, NetworkEdge)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str) -> NetworkNode {
        NetworkNode {
            id: id.to_string(),
            label: "Ada".to_string(),
            value: 1.0,
            group: None,
        }
    }

    fn edge(from: &str, to: &str) -> NetworkEdge {
        NetworkEdge {
            from: from.to_string(),
            to: to.to_string(),
            value: 1.0,
            title: None,
        }
    }

    #[test]
    fn test_remove_node_prunes_edges_and_restores() {
        let mut graph = NetworkGraph::new(
            vec![node("a"), node("b"), node("c")],
            vec![edge("a", "b"), edge("b", "c"), edge("a", "c")],
        );
        let original = graph.clone();

        let removed = graph.remove_node("b").unwrap();
        assert_eq!(removed.position, 1);
        assert_eq!(removed.edges.len(), 2);
        assert_eq!(graph.edges().len(), 1);
        assert_eq!(graph.node_position("c"), Some(1));

        graph.upsert_node(removed.node, Some(removed.position));
        graph.restore_edges(removed.edges);
        assert_eq!(graph, original);
    }

    #[test]
    fn test_duplicate_payload_nodes_collapse() {
        let json = r#"{"nodes":[{"id":"a","label":"x","value":1},{"id":"a","label":"y","value":2}],"edges":[]}"#;
        let graph: NetworkGraph = serde_json::from_str(json).unwrap();
        assert_eq!(graph.nodes().len(), 1);
        assert_eq!(graph.node("a").unwrap().label, "x");

        let back = serde_json::to_value(&graph).unwrap();
        assert!(back.get("index").is_none());
        assert_eq!(back["nodes"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_retain_nodes_drops_dangling_edges() {
        let mut graph = NetworkGraph::new(vec![node("a"), node("b")], vec![edge("a", "b")]);
        let removed = graph.retain_nodes(|n| n.id != "a");
        assert_eq!(removed, 1);
        assert!(graph.edges().is_empty());
        assert_eq!(graph.node_position("b"), Some(0));
    }
}
