//! Property-based checks against a reachability oracle.
//!
//! The retained set of `O` is everything reachable from `O` that is not
//! reachable from any root once `O` is removed from the graph.

use proptest::prelude::*;
use std::collections::{HashSet, VecDeque};

use retained_size::interfaces::ReferenceKind;
use retained_size::simulated::{ObjectId, SimulatedHeap};
use retained_size::{clean_heap_tags, compute_retained_size_and_held_objects};

#[derive(Debug, Clone)]
struct Graph {
    sizes: Vec<i64>,
    edges: Vec<(usize, usize)>,
    roots: Vec<usize>,
}

impl Graph {
    fn build(&self) -> SimulatedHeap {
        let heap = SimulatedHeap::new();
        for (index, &size) in self.sizes.iter().enumerate() {
            heap.allocate(index as i64, size);
        }
        for &(from, to) in &self.edges {
            heap.add_reference(ObjectId(from), ObjectId(to));
        }
        for &root in &self.roots {
            heap.add_root(ReferenceKind::StackLocal, ObjectId(root));
        }
        heap
    }

    fn successors(&self, object: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges
            .iter()
            .filter(move |(from, _)| *from == object)
            .map(|(_, to)| *to)
    }

    /// Reachable from `starts`, never entering `removed`.
    fn reachable(&self, starts: &[usize], removed: Option<usize>) -> HashSet<usize> {
        let mut seen = HashSet::new();
        let mut queue: VecDeque<usize> = starts
            .iter()
            .copied()
            .filter(|start| Some(*start) != removed)
            .collect();

        while let Some(object) = queue.pop_front() {
            if !seen.insert(object) {
                continue;
            }
            for next in self.successors(object) {
                if Some(next) != removed && !seen.contains(&next) {
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    fn retained_by(&self, object: usize) -> HashSet<usize> {
        let outside = self.reachable(&self.roots, Some(object));
        self.reachable(&[object], None)
            .difference(&outside)
            .copied()
            .collect()
    }
}

fn arb_graph() -> impl Strategy<Value = (Graph, usize)> {
    (1usize..24).prop_flat_map(|count| {
        (
            prop::collection::vec(1i64..512, count),
            prop::collection::vec((0..count, 0..count), 0..count * 3),
            prop::collection::vec(0..count, 0..4),
            0..count,
        )
            .prop_map(|(sizes, edges, roots, start)| {
                (
                    Graph {
                        sizes,
                        edges,
                        roots,
                    },
                    start,
                )
            })
    })
}

proptest! {
    #[test]
    fn matches_reachability_oracle((graph, start) in arb_graph()) {
        let heap = graph.build();
        let report = compute_retained_size_and_held_objects(&heap, ObjectId(start), 60_000)
            .expect("computation succeeds");

        let expected = graph.retained_by(start);
        let expected_size: i64 = expected.iter().map(|&index| graph.sizes[index]).sum();
        let expected_held: HashSet<ObjectId> = expected
            .iter()
            .filter(|&&index| index != start)
            .map(|&index| ObjectId(index))
            .collect();

        prop_assert_eq!(report.retained_size, expected_size);
        prop_assert!(report.retained_size >= graph.sizes[start]);

        let held: HashSet<ObjectId> = report.held_objects.iter().copied().collect();
        prop_assert_eq!(held.len(), report.held_objects.len(), "no duplicates");
        prop_assert_eq!(held, expected_held);
    }

    #[test]
    fn runs_are_independent_of_each_other((graph, start) in arb_graph(), other in 0usize..24) {
        let other = other % graph.sizes.len();
        let heap = graph.build();

        let first = compute_retained_size_and_held_objects(&heap, ObjectId(start), 60_000)
            .expect("computation succeeds");
        compute_retained_size_and_held_objects(&heap, ObjectId(other), 60_000)
            .expect("computation succeeds");
        let again = compute_retained_size_and_held_objects(&heap, ObjectId(start), 60_000)
            .expect("computation succeeds");

        prop_assert_eq!(first.retained_size, again.retained_size);

        clean_heap_tags(&heap).expect("cleanup succeeds");
        prop_assert!(heap.tagged_objects().is_empty());
    }
}
