//! # Dead-End Elimination
//!
//! The fixed-point pruning engine. Within an energy window `Ew`, a rotamer is
//! eliminated when some competitor at its position beats it by more than `Ew`
//! in every completion (Goldstein dominance); rotamer pairs are eliminated by
//! the analogous pair test. Cheap single-rotamer tests run every cycle, the
//! expensive pair tests only once singles stop making progress, and the loop
//! ends when a full cycle adds nothing. Flags are only ever added, so the
//! fixed point always terminates.
//!
//! Dominance scans are read-only and data-parallel under the `parallel`
//! feature; flag mutation stays serial between scans.

use itertools::Itertools;
use tracing::{debug, info};

use crate::core::energy::EnergyMatrix;
use crate::core::pruning::PruningMatrix;
use crate::engine::config::PruningSchedule;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    pub rotamers_pruned: usize,
    pub pairs_pruned: usize,
    pub passes: usize,
}

/// One pruning run at a fixed window over a fixed energy matrix.
pub struct PruningEngine<'a> {
    emat: &'a EnergyMatrix,
    window: f64,
}

impl<'a> PruningEngine<'a> {
    pub fn new(emat: &'a EnergyMatrix, window: f64) -> Self {
        assert!(window >= 0.0, "pruning window must be non-negative");
        Self { emat, window }
    }

    pub fn window(&self) -> f64 {
        self.window
    }

    /// Runs elimination cycles until a full cycle prunes nothing new.
    pub fn prune(&self, pmat: &mut PruningMatrix) -> PruneStats {
        assert_eq!(
            self.emat.num_pos(),
            pmat.num_pos(),
            "energy and pruning matrices disagree on the number of positions"
        );

        let initial_rotamers = pmat.count_pruned_rotamers();
        let initial_pairs = pmat.count_pruned_pairs();
        let mut num_rotamers = initial_rotamers;
        let mut num_pairs = initial_pairs;
        let mut passes = 0;

        loop {
            passes += 1;
            self.singles_pass(pmat);
            let mut new_rotamers = pmat.count_pruned_rotamers();
            let mut new_pairs = pmat.count_pruned_pairs();

            if new_rotamers == num_rotamers && new_pairs == num_pairs {
                // Singles reached their fixed point; bring in the pair tests.
                self.pairs_pass(pmat);
                new_rotamers = pmat.count_pruned_rotamers();
                new_pairs = pmat.count_pruned_pairs();
            }

            let done = new_rotamers == num_rotamers && new_pairs == num_pairs;
            debug!(
                pass = passes,
                rotamers = new_rotamers - num_rotamers,
                pairs = new_pairs - num_pairs,
                "elimination cycle finished"
            );
            num_rotamers = new_rotamers;
            num_pairs = new_pairs;
            if done {
                break;
            }
        }

        let stats = PruneStats {
            rotamers_pruned: num_rotamers - initial_rotamers,
            pairs_pruned: num_pairs - initial_pairs,
            passes,
        };
        info!(
            window = self.window,
            rotamers = stats.rotamers_pruned,
            pairs = stats.pairs_pruned,
            passes = stats.passes,
            "pruning fixed point reached"
        );
        stats
    }

    fn singles_pass(&self, pmat: &mut PruningMatrix) {
        let candidates: Vec<(usize, usize)> = (0..pmat.num_pos())
            .flat_map(|pos| {
                pmat.unpruned_rotamers_at(pos)
                    .into_iter()
                    .map(move |rot| (pos, rot))
            })
            .collect();

        let snapshot: &PruningMatrix = pmat;

        #[cfg(not(feature = "parallel"))]
        let to_prune: Vec<(usize, usize)> = candidates
            .iter()
            .copied()
            .filter(|&(pos, rot)| self.is_single_dominated(snapshot, pos, rot))
            .collect();

        #[cfg(feature = "parallel")]
        let to_prune: Vec<(usize, usize)> = candidates
            .par_iter()
            .copied()
            .filter(|&(pos, rot)| self.is_single_dominated(snapshot, pos, rot))
            .collect();

        for (pos, rot) in to_prune {
            pmat.prune_rotamer(pos, rot);
        }
    }

    fn pairs_pass(&self, pmat: &mut PruningMatrix) {
        let mut candidates = Vec::new();
        for pos1 in 0..pmat.num_pos() {
            for pos2 in 0..pos1 {
                let rots1 = pmat.unpruned_rotamers_at(pos1);
                let rots2 = pmat.unpruned_rotamers_at(pos2);
                for (&rot1, &rot2) in rots1.iter().cartesian_product(rots2.iter()) {
                    if !pmat.is_pair_pruned(pos1, rot1, pos2, rot2) {
                        candidates.push((pos1, rot1, pos2, rot2));
                    }
                }
            }
        }

        let snapshot: &PruningMatrix = pmat;

        #[cfg(not(feature = "parallel"))]
        let to_prune: Vec<(usize, usize, usize, usize)> = candidates
            .iter()
            .copied()
            .filter(|&(p1, r1, p2, r2)| self.is_pair_dominated(snapshot, p1, r1, p2, r2))
            .collect();

        #[cfg(feature = "parallel")]
        let to_prune: Vec<(usize, usize, usize, usize)> = candidates
            .par_iter()
            .copied()
            .filter(|&(p1, r1, p2, r2)| self.is_pair_dominated(snapshot, p1, r1, p2, r2))
            .collect();

        for (pos1, rot1, pos2, rot2) in to_prune {
            pmat.prune_pair(pos1, rot1, pos2, rot2);
        }
    }

    fn is_single_dominated(&self, pmat: &PruningMatrix, pos: usize, rot: usize) -> bool {
        pmat.unpruned_rotamers_at(pos)
            .into_iter()
            .filter(|&competitor| competitor != rot)
            .any(|competitor| self.singles_margin(pmat, pos, rot, competitor) > self.window)
    }

    /// A lower bound on how much worse `rot` is than `competitor` over every
    /// completion. NaN comparisons fail closed, so conflicting infinities can
    /// never cause an unsound prune.
    fn singles_margin(&self, pmat: &PruningMatrix, pos: usize, rot: usize, competitor: usize) -> f64 {
        let mut margin = self.emat.one_body(pos, rot) - self.emat.one_body(pos, competitor);

        for other in (0..pmat.num_pos()).filter(|&p| p != pos) {
            let worst = pmat
                .unpruned_rotamers_at(other)
                .into_iter()
                .map(|orot| {
                    self.emat.pairwise(pos, rot, other, orot)
                        - self.emat.pairwise(pos, competitor, other, orot)
                })
                .fold(f64::INFINITY, f64::min);
            if worst.is_finite() || worst == f64::NEG_INFINITY {
                margin += worst;
            }
        }

        if self.emat.has_higher_order_terms() {
            margin += self.triple_slack(&[(pos, rot)], &[(pos, competitor)]);
        }
        margin
    }

    fn is_pair_dominated(
        &self,
        pmat: &PruningMatrix,
        pos1: usize,
        rot1: usize,
        pos2: usize,
        rot2: usize,
    ) -> bool {
        let rots1 = pmat.unpruned_rotamers_at(pos1);
        let rots2 = pmat.unpruned_rotamers_at(pos2);
        rots1
            .iter()
            .cartesian_product(rots2.iter())
            .filter(|&(&c1, &c2)| (c1, c2) != (rot1, rot2))
            .filter(|&(&c1, &c2)| !pmat.is_pair_pruned(pos1, c1, pos2, c2))
            .any(|(&c1, &c2)| {
                self.pair_margin(pmat, pos1, rot1, pos2, rot2, c1, c2) > self.window
            })
    }

    fn pair_margin(
        &self,
        pmat: &PruningMatrix,
        pos1: usize,
        rot1: usize,
        pos2: usize,
        rot2: usize,
        comp1: usize,
        comp2: usize,
    ) -> f64 {
        let mut margin = self.emat.one_body(pos1, rot1) + self.emat.one_body(pos2, rot2)
            + self.emat.pairwise(pos1, rot1, pos2, rot2)
            - self.emat.one_body(pos1, comp1)
            - self.emat.one_body(pos2, comp2)
            - self.emat.pairwise(pos1, comp1, pos2, comp2);

        for other in (0..pmat.num_pos()).filter(|&p| p != pos1 && p != pos2) {
            let worst = pmat
                .unpruned_rotamers_at(other)
                .into_iter()
                .map(|orot| {
                    self.emat.pairwise(pos1, rot1, other, orot)
                        + self.emat.pairwise(pos2, rot2, other, orot)
                        - self.emat.pairwise(pos1, comp1, other, orot)
                        - self.emat.pairwise(pos2, comp2, other, orot)
                })
                .fold(f64::INFINITY, f64::min);
            if worst.is_finite() || worst == f64::NEG_INFINITY {
                margin += worst;
            }
        }

        if self.emat.has_higher_order_terms() {
            margin += self.triple_slack(
                &[(pos1, rot1), (pos2, rot2)],
                &[(pos1, comp1), (pos2, comp2)],
            );
        }
        margin
    }

    /// A conservative bound on the triple-correction difference between the
    /// candidate and competitor slots: candidate terms at their minimum
    /// possible contribution, competitor terms at their maximum.
    fn triple_slack(&self, candidate: &[(usize, usize)], competitor: &[(usize, usize)]) -> f64 {
        let involves = |slots: &[(usize, usize)], term: &crate::core::energy::TripleTerm| {
            let term_slots = [
                (term.pos1, term.rot1),
                (term.pos2, term.rot2),
                (term.pos3, term.rot3),
            ];
            slots.iter().any(|slot| term_slots.contains(slot))
        };

        let mut slack = 0.0;
        for term in self.emat.triples() {
            if involves(candidate, term) {
                slack += f64::min(0.0, term.energy);
            }
            if involves(competitor, term) {
                slack -= f64::max(0.0, term.energy);
            }
        }
        slack
    }
}

/// The outcome of widening the pruning window toward a pruned-count target.
#[derive(Debug)]
pub struct WideningOutcome {
    pub pmat: PruningMatrix,
    pub window: f64,
    pub stats: PruneStats,
    /// False when the ceiling was reached with the pruned count still above
    /// target; the caller decides whether to accept looser accuracy.
    pub target_met: bool,
}

/// Rebuilds pruning at progressively wider windows until the count of pruned
/// conformations drops to `target_max_pruned`, bounded by the schedule's
/// ceiling. Widening a window keeps more near-optimal rotamers, so each step
/// derives a fresh matrix rather than relaxing the old flags.
pub fn prune_to_target(
    emat: &EnergyMatrix,
    schedule: &PruningSchedule,
    start_window: f64,
    target_max_pruned: f64,
) -> WideningOutcome {
    let mut window = start_window;
    loop {
        window = (window + schedule.widening_step).min(schedule.window_ceiling);
        let mut pmat = PruningMatrix::new(emat.num_rotamers(), window);
        let stats = PruningEngine::new(emat, window).prune(&mut pmat);
        let pruned = pmat.num_pruned_confs();
        info!(window, pruned, target = target_max_pruned, "widened pruning window");

        if pruned <= target_max_pruned || window >= schedule.window_ceiling {
            return WideningOutcome {
                pmat,
                window,
                stats,
                target_met: pruned <= target_max_pruned,
            };
        }
    }
}
