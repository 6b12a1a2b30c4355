//! Dependency graph construction
//!
//! Turns a template into a validated graph: one node per resource, edges
//! from attribute references and explicit `depends-on`, duplicate and
//! dangling references rejected, cycles reported with the full path, and a
//! stable topological order computed up front.

use crate::error::{EngineError, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use stratus_template::{Expr, Template};
use tracing::debug;

/// One resource in the dependency graph.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    pub id: String,
    pub resource_type: String,
    pub properties: Vec<(String, Expr)>,
    /// Merged dependency ids: attribute references plus explicit
    /// `depends-on`, deduplicated, first mention first
    pub dependencies: Vec<String>,
    /// Position in the template, used to break ordering ties
    pub declaration_index: usize,
}

/// Validated dependency graph over a template's resources.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: Vec<ResourceNode>,
    index: HashMap<String, usize>,
    /// Indices of nodes depending on each node
    dependents: Vec<Vec<usize>>,
    /// Node indices, dependencies before dependents
    topo: Vec<usize>,
}

impl Graph {
    /// Build and validate the graph for a template.
    #[tracing::instrument(skip(template), fields(stack = %template.name))]
    pub fn build(template: &Template) -> Result<Graph> {
        let mut nodes = Vec::with_capacity(template.resources.len());
        let mut index = HashMap::new();

        for (declaration_index, decl) in template.resources.iter().enumerate() {
            if index.contains_key(&decl.id) {
                return Err(EngineError::DuplicateResource(decl.id.clone()));
            }

            let mut dependencies: Vec<String> = Vec::new();
            for (_, expr) in &decl.properties {
                for (target, _) in expr.references() {
                    if !dependencies.iter().any(|d| d == target) {
                        dependencies.push(target.to_string());
                    }
                }
            }
            for target in &decl.depends_on {
                if !dependencies.iter().any(|d| d == target) {
                    dependencies.push(target.clone());
                }
            }

            index.insert(decl.id.clone(), declaration_index);
            nodes.push(ResourceNode {
                id: decl.id.clone(),
                resource_type: decl.resource_type.clone(),
                properties: decl.properties.clone(),
                dependencies,
                declaration_index,
            });
        }

        // Every edge target must exist
        for node in &nodes {
            for target in &node.dependencies {
                if !index.contains_key(target) {
                    return Err(EngineError::DanglingReference {
                        referrer: node.id.clone(),
                        target: target.clone(),
                    });
                }
            }
        }

        // Output expressions may only reference declared resources
        for output in &template.outputs {
            for (target, _) in output.value.references() {
                if !index.contains_key(target) {
                    return Err(EngineError::DanglingReference {
                        referrer: format!("output {}", output.name),
                        target: target.to_string(),
                    });
                }
            }
        }

        let mut dependents = vec![Vec::new(); nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for target in &node.dependencies {
                dependents[index[target]].push(i);
            }
        }

        let graph = Graph {
            nodes,
            index,
            dependents,
            topo: Vec::new(),
        };

        if let Some(cycle) = graph.find_cycle() {
            return Err(EngineError::CyclicDependency(cycle));
        }

        let topo = graph.topological_sort();
        debug!(nodes = graph.nodes.len(), "Built dependency graph");

        Ok(Graph { topo, ..graph })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: &str) -> Option<&ResourceNode> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Nodes in dependency order: every dependency precedes its dependents,
    /// ties broken by declaration order.
    pub fn topological_order(&self) -> impl Iterator<Item = &ResourceNode> {
        self.topo.iter().map(|&i| &self.nodes[i])
    }

    /// Ids of nodes that depend on `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        match self.index.get(id) {
            Some(&i) => self.dependents[i]
                .iter()
                .map(|&d| self.nodes[d].id.as_str())
                .collect(),
            None => Vec::new(),
        }
    }

    /// Iterative three-color depth-first search. Returns the node sequence
    /// along the back edge when a cycle exists.
    fn find_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Gray,
            Black,
        }

        let mut marks = vec![Mark::White; self.nodes.len()];

        for start in 0..self.nodes.len() {
            if marks[start] != Mark::White {
                continue;
            }

            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Gray;

            while let Some(frame) = stack.last_mut() {
                let (node, cursor) = *frame;
                let deps = &self.nodes[node].dependencies;

                if cursor < deps.len() {
                    frame.1 += 1;
                    let next = self.index[&deps[cursor]];
                    match marks[next] {
                        Mark::White => {
                            marks[next] = Mark::Gray;
                            stack.push((next, 0));
                        }
                        Mark::Gray => {
                            let mut cycle: Vec<String> = stack
                                .iter()
                                .skip_while(|(n, _)| *n != next)
                                .map(|(n, _)| self.nodes[*n].id.clone())
                                .collect();
                            cycle.push(self.nodes[next].id.clone());
                            return Some(cycle);
                        }
                        Mark::Black => {}
                    }
                } else {
                    marks[node] = Mark::Black;
                    stack.pop();
                }
            }
        }

        None
    }

    /// Kahn's algorithm. Among simultaneously ready nodes the lowest
    /// declaration index goes first, so the order is stable across runs.
    fn topological_sort(&self) -> Vec<usize> {
        let mut in_degree: Vec<usize> = self.nodes.iter().map(|n| n.dependencies.len()).collect();
        let mut ready = BinaryHeap::new();
        for (i, &degree) in in_degree.iter().enumerate() {
            if degree == 0 {
                ready.push(Reverse(i));
            }
        }

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse(node)) = ready.pop() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.push(Reverse(dependent));
                }
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_template::parse_template_str;

    fn graph_of(kdl: &str) -> Result<Graph> {
        let template = parse_template_str(kdl, "test".to_string()).map_err(EngineError::from)?;
        Graph::build(&template)
    }

    #[test]
    fn test_edges_from_refs_and_depends_on() {
        let graph = graph_of(
            r#"
            resource "vpc" type="network" { cidr "10.0.0.0/16" }
            resource "subnet" type="subnet" {
                network (attr)"vpc.id"
                depends-on "firewall"
            }
            resource "firewall" type="security-group" { network (attr)"vpc.id" }
            "#,
        )
        .unwrap();

        let subnet = graph.node("subnet").unwrap();
        assert_eq!(subnet.dependencies, vec!["vpc", "firewall"]);
        assert_eq!(graph.dependents_of("vpc"), vec!["subnet", "firewall"]);
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let graph = graph_of(
            r#"
            resource "vpc" type="network" { cidr "10.0.0.0/16" }
            resource "server" type="compute-instance" {
                network (attr)"vpc.id"
                gateway (attr)"vpc.cidr"
                depends-on "vpc"
            }
            "#,
        )
        .unwrap();

        assert_eq!(graph.node("server").unwrap().dependencies, vec!["vpc"]);
    }

    #[test]
    fn test_topological_order_respects_edges() {
        let graph = graph_of(
            r#"
            resource "record" type="dns-record" { zone (attr)"zone.id" }
            resource "zone" type="dns-zone" { name "internal" }
            resource "vpc" type="network" { cidr "10.0.0.0/16" }
            resource "subnet" type="subnet" { network (attr)"vpc.id" }
            "#,
        )
        .unwrap();

        let order: Vec<&str> = graph.topological_order().map(|n| n.id.as_str()).collect();
        let position = |id: &str| order.iter().position(|&o| o == id).unwrap();

        assert!(position("zone") < position("record"));
        assert!(position("vpc") < position("subnet"));
    }

    #[test]
    fn test_topological_tie_break_is_declaration_order() {
        let graph = graph_of(
            r#"
            resource "c" type="network" { cidr "10.2.0.0/16" }
            resource "a" type="network" { cidr "10.0.0.0/16" }
            resource "b" type="network" { cidr "10.1.0.0/16" }
            "#,
        )
        .unwrap();

        let order: Vec<&str> = graph.topological_order().map(|n| n.id.as_str()).collect();
        // No edges at all, so declaration order wins
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_cycle_reported_with_full_path() {
        let err = graph_of(
            r#"
            resource "a" type="network" { peer (attr)"b.id" }
            resource "b" type="network" { peer (attr)"c.id" }
            resource "c" type="network" { peer (attr)"a.id" }
            "#,
        )
        .unwrap_err();

        match err {
            EngineError::CyclicDependency(cycle) => {
                assert_eq!(cycle.len(), 4);
                assert_eq!(cycle.first(), cycle.last());
                for id in ["a", "b", "c"] {
                    assert!(cycle.iter().any(|c| c == id), "missing {id} in {cycle:?}");
                }
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = graph_of(
            r#"
            resource "a" type="network" { peer (attr)"a.id" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency(_)));
    }

    #[test]
    fn test_dangling_reference() {
        let err = graph_of(
            r#"
            resource "subnet" type="subnet" { network (attr)"vpc.id" }
            "#,
        )
        .unwrap_err();

        match err {
            EngineError::DanglingReference { referrer, target } => {
                assert_eq!(referrer, "subnet");
                assert_eq!(target, "vpc");
            }
            other => panic!("expected dangling reference, got {other:?}"),
        }
    }

    #[test]
    fn test_dangling_output_reference() {
        let err = graph_of(
            r#"
            resource "vpc" type="network" { cidr "10.0.0.0/16" }
            output "gone" (attr)"missing.id"
            "#,
        )
        .unwrap_err();

        match err {
            EngineError::DanglingReference { referrer, target } => {
                assert_eq!(referrer, "output gone");
                assert_eq!(target, "missing");
            }
            other => panic!("expected dangling reference, got {other:?}"),
        }
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        // A linear chain long enough to break a recursive traversal
        let mut kdl = String::from("resource \"r0\" type=\"network\" { cidr \"10.0.0.0/16\" }\n");
        for i in 1..5000 {
            kdl.push_str(&format!(
                "resource \"r{i}\" type=\"network\" {{ peer (attr)\"r{}.id\" }}\n",
                i - 1
            ));
        }

        let graph = graph_of(&kdl).unwrap();
        let order: Vec<&str> = graph.topological_order().map(|n| n.id.as_str()).collect();
        assert_eq!(order.first(), Some(&"r0"));
        assert_eq!(order.last(), Some(&"r4999"));
    }
}
