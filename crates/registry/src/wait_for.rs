//! Wait-for graph and cycle detection.
//!
//! An edge `X -> Y` means worker X is blocked on a resource held by worker Y.
//! A worker blocks on at most one resource at a time, so every node has at
//! most one outgoing edge and cycle search is a simple walk.

use hazard_types::{ResourceId, WorkerId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// One blocked worker and what it is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WaitEdge {
    pub waiter: WorkerId,
    pub resource: ResourceId,
    pub holder: WorkerId,
}

/// A cycle of workers, each waiting on a resource held by the next.
///
/// Rotated so that the smallest worker id comes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WaitCycle {
    pub edges: Vec<WaitEdge>,
}

impl WaitCycle {
    /// Workers in the cycle, in wait order.
    pub fn workers(&self) -> Vec<WorkerId> {
        self.edges.iter().map(|e| e.waiter).collect()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Whether `worker` is part of the cycle.
    pub fn contains(&self, worker: WorkerId) -> bool {
        self.edges.iter().any(|e| e.waiter == worker)
    }
}

/// Directed graph of blocked workers.
///
/// Keeps a forward index (waiter -> edge) and a reverse index
/// (holder -> waiters) so both "who am I waiting for" and "who is waiting
/// on me" are direct lookups.
#[derive(Debug, Default, Clone)]
pub struct WaitForGraph {
    /// waiter -> edge
    edges: BTreeMap<WorkerId, WaitEdge>,
    /// Reverse index: holder -> workers blocked on it
    waiters_of: HashMap<WorkerId, HashSet<WorkerId>>,
}

impl WaitForGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `waiter` is blocked on `resource`, currently held by `holder`.
    ///
    /// A later edge for the same waiter replaces the earlier one.
    pub fn add(&mut self, waiter: WorkerId, resource: ResourceId, holder: WorkerId) {
        if let Some(old) = self.edges.insert(
            waiter,
            WaitEdge {
                waiter,
                resource,
                holder,
            },
        ) {
            self.unlink(old);
        }
        self.waiters_of.entry(holder).or_default().insert(waiter);
    }

    /// Drop the edge out of `waiter`, if any.
    pub fn remove(&mut self, waiter: WorkerId) {
        if let Some(edge) = self.edges.remove(&waiter) {
            self.unlink(edge);
        }
    }

    fn unlink(&mut self, edge: WaitEdge) {
        if let Some(waiters) = self.waiters_of.get_mut(&edge.holder) {
            waiters.remove(&edge.waiter);
            if waiters.is_empty() {
                self.waiters_of.remove(&edge.holder);
            }
        }
    }

    /// The worker `waiter` is blocked on, if any.
    pub fn waits_for(&self, waiter: WorkerId) -> Option<WorkerId> {
        self.edges.get(&waiter).map(|e| e.holder)
    }

    /// Workers blocked on something `holder` owns.
    pub fn waiters_of(&self, holder: WorkerId) -> Option<&HashSet<WorkerId>> {
        self.waiters_of.get(&holder)
    }

    /// All edges in waiter order.
    pub fn edges(&self) -> impl Iterator<Item = &WaitEdge> {
        self.edges.values()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every cycle in the graph, ordered by their smallest member.
    pub fn cycles(&self) -> Vec<WaitCycle> {
        let mut visited: BTreeSet<WorkerId> = BTreeSet::new();
        let mut cycles = Vec::new();

        for &start in self.edges.keys() {
            if visited.contains(&start) {
                continue;
            }

            // Walk the unique outgoing path until it ends, closes on itself,
            // or runs into a path explored by an earlier walk.
            let mut path: Vec<WorkerId> = Vec::new();
            let mut position: HashMap<WorkerId, usize> = HashMap::new();
            let mut current = start;
            loop {
                if let Some(&at) = position.get(&current) {
                    cycles.push(self.cycle_from(&path[at..]));
                    break;
                }
                if visited.contains(&current) {
                    break;
                }
                position.insert(current, path.len());
                path.push(current);
                match self.waits_for(current) {
                    Some(next) => current = next,
                    None => break,
                }
            }
            visited.extend(path);
        }

        cycles.sort_by_key(|c| c.edges.first().map(|e| e.waiter));
        cycles
    }

    fn cycle_from(&self, members: &[WorkerId]) -> WaitCycle {
        let min_at = members
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| **w)
            .map(|(i, _)| i)
            .unwrap_or(0);
        let edges = members[min_at..]
            .iter()
            .chain(&members[..min_at])
            .filter_map(|w| self.edges.get(w).copied())
            .collect();
        WaitCycle { edges }
    }

    /// Whether at least two workers wait on each other in a cycle.
    pub fn has_deadlock(&self) -> bool {
        self.cycles().iter().any(|c| c.len() >= 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn w(id: u32) -> WorkerId {
        WorkerId(id)
    }

    fn r(id: usize) -> ResourceId {
        ResourceId(id)
    }

    #[test]
    fn test_two_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add(w(0), r(1), w(1));
        graph.add(w(1), r(0), w(0));

        let cycles = graph.cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].workers(), vec![w(0), w(1)]);
        assert_eq!(cycles[0].edges[0].resource, r(1));
        assert_eq!(cycles[0].edges[1].resource, r(0));
        assert!(graph.has_deadlock());
    }

    #[test]
    fn test_chain_without_cycle() {
        let mut graph = WaitForGraph::new();
        graph.add(w(0), r(1), w(1));
        graph.add(w(1), r(2), w(2));

        assert!(graph.cycles().is_empty());
        assert!(!graph.has_deadlock());
        assert_eq!(graph.waits_for(w(0)), Some(w(1)));
        assert_eq!(graph.waits_for(w(2)), None);
    }

    #[test]
    fn test_cycle_with_tail_is_rotated_to_smallest() {
        // 0 -> 3 -> 2 -> 4 -> 3 (cycle 2,3,4 with tail 0)
        let mut graph = WaitForGraph::new();
        graph.add(w(0), r(3), w(3));
        graph.add(w(3), r(2), w(2));
        graph.add(w(2), r(4), w(4));
        graph.add(w(4), r(3), w(3));

        let cycles = graph.cycles();
        assert_eq!(cycles.len(), 1);
        assert_eq!(cycles[0].workers(), vec![w(2), w(4), w(3)]);
        assert!(!cycles[0].contains(w(0)));
    }

    #[test]
    fn test_disjoint_cycles() {
        let mut graph = WaitForGraph::new();
        graph.add(w(5), r(4), w(4));
        graph.add(w(4), r(5), w(5));
        graph.add(w(1), r(2), w(2));
        graph.add(w(2), r(1), w(1));

        let cycles = graph.cycles();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[0].workers(), vec![w(1), w(2)]);
        assert_eq!(cycles[1].workers(), vec![w(4), w(5)]);
    }

    #[test]
    fn test_reverse_index_tracks_replacement_and_removal() {
        let mut graph = WaitForGraph::new();
        graph.add(w(0), r(1), w(1));
        graph.add(w(2), r(1), w(1));
        assert_eq!(
            graph.waiters_of(w(1)),
            Some(&[w(0), w(2)].into_iter().collect())
        );

        // Worker 0 now waits on someone else.
        graph.add(w(0), r(3), w(3));
        assert_eq!(graph.waiters_of(w(1)), Some(&[w(2)].into_iter().collect()));
        assert_eq!(graph.waiters_of(w(3)), Some(&[w(0)].into_iter().collect()));

        graph.remove(w(2));
        assert!(graph.waiters_of(w(1)).is_none());
        assert_eq!(graph.len(), 1);
    }
}
