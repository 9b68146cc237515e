use std::collections::{BTreeMap, BTreeSet, VecDeque};

use anyhow::Result;
use tracing::*;

use super::Graph;
use crate::CanonError;

/// A node with two or more routes leading to a strictly lower floor.
///
/// Field order is the comparison order: floor, then node id, then the upstairs edge ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Inbound {
    pub floor: usize,
    pub id: String,
    pub upstairs: Vec<String>,
}

/// Anomalies bucketed by floor, with the floors listed deepest first.
pub type Buckets<T> = (BTreeMap<usize, Vec<T>>, Vec<usize>);

impl Graph {
    pub fn reset_floor(&mut self) {
        for node in self.nodes.values_mut() {
            node.floor = None;
        }
        self.floored_by = None;
    }

    pub fn floored_by(&self) -> Option<&str> {
        self.floored_by.as_deref()
    }

    pub fn is_floored(&self) -> bool {
        self.floored_by.is_some()
    }

    pub fn floor_of(&self, id: &str) -> Option<usize> {
        self.nodes.get(id).and_then(|node| node.floor)
    }

    pub(crate) fn set_floor(&mut self, id: &str, floor: Option<usize>) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.floor = floor;
        }
    }

    /// Groups nodes by their hop distance from `root`.
    ///
    /// A node keeps the lowest floor offered by any neighbor and only re-broadcasts when it
    /// moves down, so the result is the BFS distance. Unreachable nodes keep their current
    /// floor, which is `None` after [`Graph::reset_floor`].
    ///
    /// # Returns
    ///
    /// * The floors mapping, floor to sorted node ids.
    pub fn group_by_floor(&mut self, root: &str) -> Result<BTreeMap<usize, Vec<String>>, CanonError> {
        if !self.nodes.contains_key(root) {
            return Err(CanonError::UnknownNode(root.to_string()));
        }
        self.set_floor(root, Some(0));
        let mut queue = VecDeque::from([root.to_string()]);
        while let Some(current) = queue.pop_front() {
            let offer = self.floor_of(&current).unwrap_or(0) + 1;
            let neighbors: Vec<String> = self.routes(&current).iter().map(|r| r.to.clone()).collect();
            for neighbor in neighbors {
                match self.floor_of(&neighbor) {
                    Some(floor) if floor <= offer => {}
                    _ => {
                        trace!("{neighbor}: joining floor {offer}");
                        self.set_floor(&neighbor, Some(offer));
                        queue.push_back(neighbor);
                    }
                }
            }
        }
        self.floored_by = Some(root.to_string());
        Ok(self.floors())
    }

    /// Floor to sorted node ids, for every floored node.
    pub fn floors(&self) -> BTreeMap<usize, Vec<String>> {
        let mut floors: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for node in self.nodes.values() {
            if let Some(floor) = node.floor {
                floors.entry(floor).or_default().push(node.id.clone());
            }
        }
        floors
    }

    /// Drops every node that the last floor grouping did not reach.
    pub fn remove_unfloored(&mut self) -> Result<usize, CanonError> {
        let unfloored: Vec<String> = self
            .nodes
            .values()
            .filter(|node| node.floor.is_none())
            .map(|node| node.id.clone())
            .collect();
        for id in &unfloored {
            trace!("Removing unreachable node {id}");
            self.remove_node(id)?;
        }
        Ok(unfloored.len())
    }

    /// Edges whose two endpoints sit on the same floor.
    pub fn find_cobounds(&self) -> Vec<String> {
        self.edges
            .values()
            .filter(|edge| match (self.floor_of(&edge.id_a), self.floor_of(&edge.id_b)) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            })
            .map(|edge| edge.id.clone())
            .collect()
    }

    pub fn find_inbounds(&self) -> Vec<Inbound> {
        let mut inbounds = Vec::new();
        for node in self.nodes.values() {
            let Some(floor) = node.floor else { continue };
            let upstairs: Vec<String> = self
                .routes(&node.id)
                .iter()
                .filter(|route| matches!(self.floor_of(&route.to), Some(f) if f < floor))
                .map(|route| route.edge.clone())
                .collect();
            if upstairs.len() > 1 {
                inbounds.push(Inbound {
                    floor,
                    id: node.id.clone(),
                    upstairs,
                });
            }
        }
        inbounds
    }

    pub fn cobounds_by_floor(&self) -> Result<Buckets<String>, CanonError> {
        if !self.is_floored() {
            return Err(CanonError::Unfloored("bucket co-bounds"));
        }
        let mut buckets: BTreeMap<usize, Vec<String>> = BTreeMap::new();
        for id_edge in self.find_cobounds() {
            let floor = self
                .edge(&id_edge)
                .and_then(|edge| self.floor_of(&edge.id_a))
                .ok_or_else(|| CanonError::UnknownEdge(id_edge.clone()))?;
            buckets.entry(floor).or_default().push(id_edge);
        }
        let floors = buckets.keys().rev().copied().collect();
        Ok((buckets, floors))
    }

    pub fn inbounds_by_floor(&self) -> Result<Buckets<Inbound>, CanonError> {
        if !self.is_floored() {
            return Err(CanonError::Unfloored("bucket in-bounds"));
        }
        let mut inbounds = self.find_inbounds();
        inbounds.sort_by(|a, b| b.cmp(a));
        let mut buckets: BTreeMap<usize, Vec<Inbound>> = BTreeMap::new();
        for inbound in inbounds {
            buckets.entry(inbound.floor).or_default().push(inbound);
        }
        let floors = buckets.keys().rev().copied().collect();
        Ok((buckets, floors))
    }

    /// Number of in-bounds and co-bounds the graph would show if floored from `id`.
    pub fn evaluate_bounds(&self, id: &str) -> Result<(usize, usize), CanonError> {
        let mut graph = self.clone();
        graph.reset_floor();
        graph.group_by_floor(id)?;
        Ok((graph.find_inbounds().len(), graph.find_cobounds().len()))
    }

    /// Every minimum-hop path between `src` and `dst`.
    ///
    /// Paths only climb one floor at a time from `src`, and each is listed from its far end
    /// back to `src`.
    pub fn enumerate_simple_paths(&self, src: &str, dst: &str) -> Result<Vec<Vec<String>>, CanonError> {
        let mut graph = self.clone();
        graph.reset_floor();
        graph.group_by_floor(src)?;
        let Some(floor_max) = graph.floor_of(dst) else {
            debug!("No path from {src} to {dst}");
            return Ok(Vec::new());
        };

        let mut ancestors = vec![src.to_string()];
        let paths = graph.build_paths(src, floor_max, &mut ancestors);
        Ok(paths
            .into_iter()
            .filter(|path| path.iter().any(|id| id == src) && path.iter().any(|id| id == dst))
            .collect())
    }

    fn build_paths(&self, current: &str, floor_max: usize, ancestors: &mut Vec<String>) -> Vec<Vec<String>> {
        let floor = self.floor_of(current).unwrap_or(0);
        if floor == floor_max {
            return vec![vec![current.to_string()]];
        }
        let neighbors: BTreeSet<&str> = self
            .routes(current)
            .iter()
            .map(|route| route.to.as_str())
            .filter(|id| !ancestors.iter().any(|a| a == id))
            .filter(|id| self.floor_of(id) == Some(floor + 1))
            .collect();
        if neighbors.is_empty() {
            return vec![vec![current.to_string()]];
        }

        ancestors.push(current.to_string());
        let mut paths = Vec::new();
        for neighbor in neighbors {
            for mut path in self.build_paths(neighbor, floor_max, ancestors) {
                path.push(current.to_string());
                paths.push(path);
            }
        }
        ancestors.pop();
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::super::labeled_graph;
    use super::*;

    fn diamond() -> Graph {
        // A - B - D - E, A - C - D
        labeled_graph(
            &[("A", "A"), ("B", "B"), ("C", "C"), ("D", "D"), ("E", "E")],
            &[("A", "B"), ("A", "C"), ("B", "D"), ("C", "D"), ("D", "E")],
        )
    }

    #[test]
    fn test_group_by_floor() {
        let mut graph = diamond();
        let floors = graph.group_by_floor("A").unwrap();
        assert_eq!(floors[&0], vec!["A"]);
        assert_eq!(floors[&1], vec!["B", "C"]);
        assert_eq!(floors[&2], vec!["D"]);
        assert_eq!(floors[&3], vec!["E"]);
        assert_eq!(graph.floored_by(), Some("A"));

        graph.reset_floor();
        assert!(!graph.is_floored());
        assert!(graph.floors().is_empty());
    }

    #[test]
    fn test_unreachable_nodes_stay_unfloored() {
        let mut graph = labeled_graph(&[("a", "A"), ("b", "B"), ("c", "C")], &[("a", "b")]);
        graph.group_by_floor("a").unwrap();
        assert_eq!(graph.floor_of("c"), None);
        assert_eq!(graph.remove_unfloored().unwrap(), 1);
        assert_eq!(graph.node_count(), 2);
    }

    #[test]
    fn test_bounds() {
        let mut graph = diamond();
        assert!(graph.cobounds_by_floor().is_err());
        graph.group_by_floor("A").unwrap();
        assert!(graph.find_cobounds().is_empty());
        assert_eq!(
            graph.find_inbounds(),
            vec![Inbound {
                floor: 2,
                id: "D".to_string(),
                upstairs: vec!["3".to_string(), "4".to_string()],
            }]
        );

        // Floored from D, B and C share floor 1 with A at floor 2: one in-bound, no co-bound.
        assert_eq!(graph.evaluate_bounds("D").unwrap(), (1, 0));

        let mut triangle = labeled_graph(
            &[("a", "A"), ("b", "B"), ("c", "C")],
            &[("a", "b"), ("b", "c"), ("c", "a")],
        );
        triangle.group_by_floor("a").unwrap();
        let (buckets, floors) = triangle.cobounds_by_floor().unwrap();
        assert_eq!(floors, vec![1]);
        assert_eq!(buckets[&1], vec!["2"]);
    }

    #[test]
    fn test_enumerate_simple_paths() {
        let graph = diamond();
        let paths = graph.enumerate_simple_paths("A", "D").unwrap();
        assert_eq!(
            paths,
            vec![
                vec!["D".to_string(), "B".to_string(), "A".to_string()],
                vec!["D".to_string(), "C".to_string(), "A".to_string()],
            ]
        );
        let paths = graph.enumerate_simple_paths("A", "B").unwrap();
        assert_eq!(paths, vec![vec!["B".to_string(), "A".to_string()]]);
    }
}
