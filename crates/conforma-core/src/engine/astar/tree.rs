use std::collections::BinaryHeap;

use tracing::trace;

use crate::core::conf::{ConfIndex, ScoredConf};
use crate::core::energy::EnergyMatrix;
use crate::core::pruning::PruningMatrix;
use crate::engine::config::SearchConfig;

use super::node::{FrontierEntry, LinkArena};
use super::order::BranchOrdering;
use super::scoring::{self, Heuristic};

/// The branch-and-bound search driver over one conformation space.
///
/// Each call to [`next_conf`](Self::next_conf) pops the minimum-score
/// frontier node; a terminal node is yielded as the next enumerated
/// conformation, anything else branches on one free position and pushes a
/// child per unpruned, pair-compatible rotamer. With an admissible heuristic
/// the yielded scores never decrease and the first conformation is the
/// optimum over the unpruned space. An exhausted frontier is normal
/// termination, not an error.
///
/// A tree is single-threaded; parallelism belongs to per-conformation
/// refinement, never to the frontier.
pub struct ConfTree<'a> {
    emat: &'a EnergyMatrix,
    pmat: &'a PruningMatrix,
    heuristic: Heuristic,
    ordering: BranchOrdering,
    arena: LinkArena,
    frontier: BinaryHeap<FrontierEntry>,
    next_seq: u64,
    scratch_parent: ConfIndex,
    scratch_child: ConfIndex,
    decisions: Vec<(usize, usize)>,
    num_emitted: u64,
}

impl<'a> ConfTree<'a> {
    pub fn new(emat: &'a EnergyMatrix, pmat: &'a PruningMatrix, config: &SearchConfig) -> Self {
        assert_eq!(
            emat.num_pos(),
            pmat.num_pos(),
            "energy and pruning matrices disagree on the number of positions"
        );
        for pos in 0..emat.num_pos() {
            assert_eq!(
                emat.num_rotamers_at(pos),
                pmat.num_rotamers_at(pos),
                "energy and pruning matrices disagree on the rotamers at position {pos}"
            );
        }

        let num_pos = emat.num_pos();
        let heuristic = Heuristic::from_config(&config.heuristic);
        let ordering = BranchOrdering::from_config(config.ordering, emat, pmat);

        let root_index = ConfIndex::new(num_pos);
        let root_h = heuristic.score(emat, pmat, &root_index);

        let mut frontier = BinaryHeap::new();
        frontier.push(FrontierEntry {
            score: emat.const_term() + root_h,
            gscore: 0.0,
            seq: 0,
            link: None,
        });

        Self {
            emat,
            pmat,
            heuristic,
            ordering,
            arena: LinkArena::new(),
            frontier,
            next_seq: 1,
            scratch_parent: ConfIndex::new(num_pos),
            scratch_child: ConfIndex::new(num_pos),
            decisions: Vec::with_capacity(num_pos),
            num_emitted: 0,
        }
    }

    /// The next conformation in non-decreasing score order, or `None` once
    /// the unpruned space is fully enumerated.
    pub fn next_conf(&mut self) -> Option<ScoredConf> {
        while let Some(entry) = self.frontier.pop() {
            let mut decisions = std::mem::take(&mut self.decisions);
            decisions.clear();
            self.arena.collect_decisions(entry.link, &mut decisions);
            self.scratch_parent.index_decisions(&mut decisions);
            self.decisions = decisions;

            if self.scratch_parent.num_undefined() == 0 {
                self.num_emitted += 1;
                trace!(
                    score = entry.score,
                    emitted = self.num_emitted,
                    frontier = self.frontier.len(),
                    "enumerated conformation"
                );
                return Some(ScoredConf::new(
                    self.scratch_parent.full_assignment(),
                    entry.score,
                ));
            }

            let pos = self
                .ordering
                .choose(self.emat, self.pmat, &self.scratch_parent);

            'rots: for rot in self.pmat.unpruned_rotamers_at(pos) {
                for (dpos, drot) in self.scratch_parent.defined() {
                    if self.pmat.is_pair_pruned(pos, rot, dpos, drot) {
                        continue 'rots;
                    }
                }

                self.scratch_child.index_child(&self.scratch_parent, pos, rot);
                let gscore =
                    entry.gscore + scoring::gscore_delta(self.emat, &self.scratch_parent, pos, rot);
                let hscore = self
                    .heuristic
                    .score(self.emat, self.pmat, &self.scratch_child);
                let score = self.emat.const_term() + gscore + hscore;
                debug_assert!(!score.is_nan(), "node score must not be NaN");

                let link = self.arena.push(entry.link, pos, rot);
                self.frontier.push(FrontierEntry {
                    score,
                    gscore,
                    seq: self.next_seq,
                    link: Some(link),
                });
                self.next_seq += 1;
            }
        }
        None
    }

    /// Conformations emitted so far.
    pub fn num_emitted(&self) -> u64 {
        self.num_emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::config::{
        HeuristicKind, MplpConfig, OrderingKind, SearchConfigBuilder,
    };

    /// The two-position scenario from the design discussions: singleton
    /// energies {pos0: [0, 5], pos1: [0, 3]}, pairwise pos0 x pos1 =
    /// [[0, 1], [2, 0]].
    fn two_by_two() -> EnergyMatrix {
        let mut emat = EnergyMatrix::new(&[2, 2]);
        emat.set_one_body(0, 1, 5.0);
        emat.set_one_body(1, 1, 3.0);
        emat.set_pairwise(0, 0, 1, 0, 0.0);
        emat.set_pairwise(0, 0, 1, 1, 1.0);
        emat.set_pairwise(0, 1, 1, 0, 2.0);
        emat.set_pairwise(0, 1, 1, 1, 0.0);
        emat
    }

    fn conf_energy(emat: &EnergyMatrix, rotamers: &[usize]) -> f64 {
        let mut decisions: Vec<(usize, usize)> =
            rotamers.iter().copied().enumerate().collect();
        let mut index = ConfIndex::new(rotamers.len());
        index.index_decisions(&mut decisions);
        emat.const_term() + scoring::gscore(emat, &index)
    }

    fn enumerate_all(tree: &mut ConfTree) -> Vec<ScoredConf> {
        std::iter::from_fn(|| tree.next_conf()).collect()
    }

    #[test]
    fn first_conformation_is_the_optimum() {
        let emat = two_by_two();
        let pmat = PruningMatrix::new(&[2, 2], 0.0);
        let config = SearchConfigBuilder::new().build().unwrap();
        let mut tree = ConfTree::new(&emat, &pmat, &config);

        let first = tree.next_conf().unwrap();
        assert_eq!(first.rotamers, vec![0, 0]);
        assert!((first.score - 0.0).abs() < 1e-12);
    }

    #[test]
    fn enumeration_is_complete_and_monotone() {
        let emat = two_by_two();
        let pmat = PruningMatrix::new(&[2, 2], 0.0);
        let config = SearchConfigBuilder::new().build().unwrap();
        let mut tree = ConfTree::new(&emat, &pmat, &config);

        let confs = enumerate_all(&mut tree);
        assert_eq!(confs.len(), 4);
        assert_eq!(tree.num_emitted(), 4);

        let scores: Vec<f64> = confs.iter().map(|c| c.score).collect();
        assert_eq!(scores, vec![0.0, 4.0, 7.0, 8.0]);
        for conf in &confs {
            assert!((conf.score - conf_energy(&emat, &conf.rotamers)).abs() < 1e-9);
        }

        // Exhaustion is sticky.
        assert!(tree.next_conf().is_none());
        assert!(tree.next_conf().is_none());
    }

    fn mixed_sign_emat() -> EnergyMatrix {
        let mut emat = EnergyMatrix::new(&[2, 3, 2]);
        emat.set_const_term(-2.0);
        emat.set_one_body(0, 0, 1.5);
        emat.set_one_body(0, 1, -0.5);
        emat.set_one_body(1, 0, 2.0);
        emat.set_one_body(1, 2, -1.0);
        emat.set_one_body(2, 1, 3.0);
        for (p1, r1, p2, r2, e) in [
            (1, 0, 0, 0, -2.0),
            (1, 1, 0, 0, 1.0),
            (1, 2, 0, 1, 0.5),
            (2, 0, 0, 1, -0.75),
            (2, 1, 1, 2, 2.5),
            (2, 0, 1, 0, -1.25),
        ] {
            emat.set_pairwise(p1, r1, p2, r2, e);
        }
        emat
    }

    fn brute_force_order(emat: &EnergyMatrix) -> Vec<f64> {
        let mut energies = Vec::new();
        for r0 in 0..2 {
            for r1 in 0..3 {
                for r2 in 0..2 {
                    energies.push(conf_energy(emat, &[r0, r1, r2]));
                }
            }
        }
        energies.sort_by(|a, b| a.partial_cmp(b).unwrap());
        energies
    }

    #[test]
    fn every_strategy_finds_the_same_ordered_enumeration() {
        let emat = mixed_sign_emat();
        let pmat = PruningMatrix::new(&[2, 3, 2], 0.0);
        let expected = brute_force_order(&emat);

        let configs = [
            SearchConfigBuilder::new()
                .ordering(OrderingKind::Dynamic)
                .build()
                .unwrap(),
            SearchConfigBuilder::new()
                .ordering(OrderingKind::Static)
                .build()
                .unwrap(),
            SearchConfigBuilder::new()
                .heuristic(HeuristicKind::Mplp(MplpConfig::default()))
                .build()
                .unwrap(),
        ];

        for config in &configs {
            let mut tree = ConfTree::new(&emat, &pmat, config);
            let confs = enumerate_all(&mut tree);
            assert_eq!(confs.len(), expected.len());
            for (conf, want) in confs.iter().zip(&expected) {
                assert!(
                    (conf.score - want).abs() < 1e-9,
                    "enumeration out of order: got {} want {want}",
                    conf.score
                );
            }
        }
    }

    #[test]
    fn enumeration_is_deterministic() {
        let emat = mixed_sign_emat();
        let pmat = PruningMatrix::new(&[2, 3, 2], 0.0);
        let config = SearchConfigBuilder::new().build().unwrap();

        let first: Vec<Vec<usize>> = enumerate_all(&mut ConfTree::new(&emat, &pmat, &config))
            .into_iter()
            .map(|c| c.rotamers)
            .collect();
        let second: Vec<Vec<usize>> = enumerate_all(&mut ConfTree::new(&emat, &pmat, &config))
            .into_iter()
            .map(|c| c.rotamers)
            .collect();
        assert_eq!(first, second);
    }

    #[test]
    fn pruned_rotamers_are_never_emitted() {
        let emat = two_by_two();
        let mut pmat = PruningMatrix::new(&[2, 2], 0.0);
        pmat.prune_rotamer(0, 1);

        let config = SearchConfigBuilder::new().build().unwrap();
        let mut tree = ConfTree::new(&emat, &pmat, &config);
        let confs = enumerate_all(&mut tree);

        assert_eq!(confs.len(), 2);
        assert!(confs.iter().all(|c| c.rotamers[0] != 1));
    }

    #[test]
    fn pair_pruned_combinations_are_never_emitted() {
        let emat = two_by_two();
        let mut pmat = PruningMatrix::new(&[2, 2], 0.0);
        pmat.prune_pair(0, 0, 1, 1);

        let config = SearchConfigBuilder::new().build().unwrap();
        let mut tree = ConfTree::new(&emat, &pmat, &config);
        let confs = enumerate_all(&mut tree);

        assert_eq!(confs.len(), 3);
        assert!(
            confs
                .iter()
                .all(|c| !(c.rotamers[0] == 0 && c.rotamers[1] == 1))
        );
    }

    #[test]
    fn const_term_shifts_every_score() {
        let mut emat = two_by_two();
        emat.set_const_term(10.0);
        let pmat = PruningMatrix::new(&[2, 2], 0.0);

        let config = SearchConfigBuilder::new().build().unwrap();
        let mut tree = ConfTree::new(&emat, &pmat, &config);
        let first = tree.next_conf().unwrap();
        assert!((first.score - 10.0).abs() < 1e-12);
    }

    #[test]
    fn empty_space_yields_one_empty_conformation() {
        let mut emat = EnergyMatrix::new(&[]);
        emat.set_const_term(1.5);
        let pmat = PruningMatrix::new(&[], 0.0);

        let config = SearchConfigBuilder::new().build().unwrap();
        let mut tree = ConfTree::new(&emat, &pmat, &config);

        let conf = tree.next_conf().unwrap();
        assert!(conf.rotamers.is_empty());
        assert!((conf.score - 1.5).abs() < 1e-12);
        assert!(tree.next_conf().is_none());
    }

    #[test]
    fn fully_pruned_space_exhausts_without_emitting() {
        let emat = two_by_two();
        let mut pmat = PruningMatrix::new(&[2, 2], 0.0);
        pmat.prune_rotamer(1, 0);
        pmat.prune_rotamer(1, 1);

        let config = SearchConfigBuilder::new().build().unwrap();
        let mut tree = ConfTree::new(&emat, &pmat, &config);
        assert!(tree.next_conf().is_none());
        assert_eq!(tree.num_emitted(), 0);
    }

    #[test]
    #[should_panic(expected = "disagree on the number of positions")]
    fn mismatched_matrices_abort() {
        let emat = two_by_two();
        let pmat = PruningMatrix::new(&[2, 2, 2], 0.0);
        let config = SearchConfigBuilder::new().build().unwrap();
        ConfTree::new(&emat, &pmat, &config);
    }
}
