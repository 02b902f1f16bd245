//! Node scoring: the exact g-score over assigned positions and the admissible
//! completion heuristics.
//!
//! Interactions are charged exactly once: a pairwise term belongs to g when
//! both positions are assigned, and otherwise to the contribution of its
//! highest-ordered undefined position. Triple corrections follow the same
//! rule via their highest-ordered undefined slot. Admissibility needs no sign
//! assumption on the energies.

pub mod mplp;
pub mod traditional;

use std::collections::BTreeMap;

use crate::core::conf::ConfIndex;
use crate::core::energy::EnergyMatrix;
use crate::core::pruning::PruningMatrix;
use crate::engine::config::{HeuristicKind, MplpConfig};

/// The heuristic strategy selected at search construction. A closed set of
/// variants: correctness is identical, only bound tightness and per-node cost
/// differ.
#[derive(Debug, Clone)]
pub(crate) enum Heuristic {
    Traditional,
    Mplp(MplpConfig),
}

impl Heuristic {
    pub fn from_config(kind: &HeuristicKind) -> Self {
        match kind {
            HeuristicKind::Traditional => Self::Traditional,
            HeuristicKind::Mplp(config) => Self::Mplp(config.clone()),
        }
    }

    /// A lower bound on the energy of the best completion of `index`.
    pub fn score(&self, emat: &EnergyMatrix, pmat: &PruningMatrix, index: &ConfIndex) -> f64 {
        match self {
            Self::Traditional => traditional::score(emat, pmat, index),
            Self::Mplp(config) => mplp::score(emat, pmat, index, config),
        }
    }
}

/// The exact energy of the assigned sub-problem: one-body terms for every
/// defined position, pairwise terms between defined pairs, and triple
/// corrections whose three slots are all defined.
pub fn gscore(emat: &EnergyMatrix, index: &ConfIndex) -> f64 {
    let mut energy = 0.0;
    for (i, (pos1, rot1)) in index.defined().enumerate() {
        energy += emat.one_body(pos1, rot1);
        for (pos2, rot2) in index.defined().take(i) {
            energy += emat.pairwise(pos1, rot1, pos2, rot2);
            if emat.has_higher_order_terms() {
                for term in emat.triples_for_pair(pos1, rot1, pos2, rot2) {
                    if index.rotamer_at(term.pos3) == Some(term.rot3) {
                        energy += term.energy;
                    }
                }
            }
        }
    }
    energy
}

/// The g-score increase from assigning `rot` at `pos` on top of `parent`:
/// the new one-body term, pairwise terms against every already-defined
/// position, and triple corrections completed by this assignment.
pub fn gscore_delta(emat: &EnergyMatrix, parent: &ConfIndex, pos: usize, rot: usize) -> f64 {
    let mut energy = emat.one_body(pos, rot);
    for (dpos, drot) in parent.defined() {
        energy += emat.pairwise(pos, rot, dpos, drot);
    }
    if emat.has_higher_order_terms() {
        for term in emat.triples_involving(pos, rot) {
            let completed = [
                (term.pos1, term.rot1),
                (term.pos2, term.rot2),
                (term.pos3, term.rot3),
            ]
            .into_iter()
            .filter(|&(tpos, _)| tpos != pos)
            .all(|(tpos, trot)| parent.rotamer_at(tpos) == Some(trot));
            if completed {
                energy += term.energy;
            }
        }
    }
    energy
}

/// The admissible contribution of assigning `rot` at undefined position
/// `pos`: its one-body energy, exact pairwise terms toward every defined
/// position, and minimum pairwise terms toward each lower-ordered undefined
/// position, with triple corrections bounded the same way.
pub(crate) fn rotamer_contribution(
    emat: &EnergyMatrix,
    pmat: &PruningMatrix,
    index: &ConfIndex,
    pos: usize,
    rot: usize,
) -> f64 {
    let mut energy = emat.one_body(pos, rot);

    for (dpos, drot) in index.defined() {
        energy += emat.pairwise(pos, rot, dpos, drot);
        if emat.has_higher_order_terms() {
            energy += triple_pair_bound(emat, pmat, index, pos, rot, dpos, drot);
        }
    }

    for &upos in index.undefined().iter().filter(|&&p| p < pos) {
        let mut best = f64::INFINITY;
        for urot in pmat.unpruned_rotamers_at(upos) {
            if pmat.is_pair_pruned(pos, rot, upos, urot) {
                continue;
            }
            let mut pair_energy = emat.pairwise(pos, rot, upos, urot);
            if emat.has_higher_order_terms() {
                pair_energy += triple_pair_bound(emat, pmat, index, pos, rot, upos, urot);
            }
            best = best.min(pair_energy);
        }
        energy += best;
    }

    // Triples whose two higher slots are both already defined are charged by
    // their lowest slot, this position.
    if emat.has_higher_order_terms() {
        for term in emat.triples_with_lowest(pos) {
            if term.rot3 == rot
                && index.rotamer_at(term.pos1) == Some(term.rot1)
                && index.rotamer_at(term.pos2) == Some(term.rot2)
            {
                energy += term.energy;
            }
        }
    }

    energy
}

/// A lower bound on the triple corrections attached to the given pair: exact
/// where the third slot is defined, minimum over its unpruned rotamers where
/// it is not (zero counts for rotamers without a term).
fn triple_pair_bound(
    emat: &EnergyMatrix,
    pmat: &PruningMatrix,
    index: &ConfIndex,
    pos_a: usize,
    rot_a: usize,
    pos_b: usize,
    rot_b: usize,
) -> f64 {
    let mut by_third: BTreeMap<usize, BTreeMap<usize, f64>> = BTreeMap::new();
    for term in emat.triples_for_pair(pos_a, rot_a, pos_b, rot_b) {
        *by_third
            .entry(term.pos3)
            .or_default()
            .entry(term.rot3)
            .or_insert(0.0) += term.energy;
    }

    let mut bound = 0.0;
    for (pos3, by_rot) in by_third {
        match index.rotamer_at(pos3) {
            Some(rot3) => bound += by_rot.get(&rot3).copied().unwrap_or(0.0),
            None => {
                let rots = pmat.unpruned_rotamers_at(pos3);
                if !rots.is_empty() {
                    bound += rots
                        .iter()
                        .map(|rot3| by_rot.get(rot3).copied().unwrap_or(0.0))
                        .fold(f64::INFINITY, f64::min);
                }
            }
        }
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(num_pos: usize, decisions: &[(usize, usize)]) -> ConfIndex {
        let mut index = ConfIndex::new(num_pos);
        let mut decisions = decisions.to_vec();
        index.index_decisions(&mut decisions);
        index
    }

    fn sample_emat() -> EnergyMatrix {
        let mut emat = EnergyMatrix::new(&[2, 2, 2]);
        emat.set_one_body(0, 0, 1.0);
        emat.set_one_body(0, 1, 2.0);
        emat.set_one_body(1, 0, 0.5);
        emat.set_one_body(2, 1, -1.0);
        emat.set_pairwise(1, 0, 0, 0, 0.25);
        emat.set_pairwise(2, 1, 0, 0, 4.0);
        emat.set_pairwise(2, 1, 1, 0, -0.5);
        emat
    }

    #[test]
    fn gscore_sums_defined_terms_only() {
        let emat = sample_emat();

        let partial = indexed(3, &[(0, 0), (1, 0)]);
        assert!((gscore(&emat, &partial) - (1.0 + 0.5 + 0.25)).abs() < 1e-12);

        let full = indexed(3, &[(0, 0), (1, 0), (2, 1)]);
        let expected = 1.0 + 0.5 + (-1.0) + 0.25 + 4.0 + (-0.5);
        assert!((gscore(&emat, &full) - expected).abs() < 1e-12);
    }

    #[test]
    fn gscore_delta_matches_full_recomputation() {
        let emat = sample_emat();
        let parent = indexed(3, &[(0, 0), (1, 0)]);
        let child = indexed(3, &[(0, 0), (1, 0), (2, 1)]);

        let delta = gscore_delta(&emat, &parent, 2, 1);
        let recomputed = gscore(&emat, &child) - gscore(&emat, &parent);
        assert!((delta - recomputed).abs() < 1e-12);
    }

    #[test]
    fn gscore_includes_triples_only_when_fully_defined() {
        let mut emat = sample_emat();
        emat.add_triple([(0, 0), (1, 0), (2, 1)], 10.0);

        let partial = indexed(3, &[(0, 0), (1, 0)]);
        assert!((gscore(&emat, &partial) - 1.75).abs() < 1e-12);

        let full = indexed(3, &[(0, 0), (1, 0), (2, 1)]);
        let expected = 1.0 + 0.5 + (-1.0) + 0.25 + 4.0 + (-0.5) + 10.0;
        assert!((gscore(&emat, &full) - expected).abs() < 1e-12);

        let delta = gscore_delta(&emat, &partial, 2, 1);
        assert!((delta - (gscore(&emat, &full) - gscore(&emat, &partial))).abs() < 1e-12);
    }

    #[test]
    fn contribution_charges_defined_exactly_and_undefined_minimally() {
        let emat = sample_emat();
        let pmat = PruningMatrix::new(&[2, 2, 2], 0.0);

        // Position 2 charges toward defined position 0 exactly and toward
        // undefined position 1 via the minimum over its rotamers.
        let index = indexed(3, &[(0, 0)]);
        let contribution = rotamer_contribution(&emat, &pmat, &index, 2, 1);
        let expected = -1.0 + emat.pairwise(2, 1, 0, 0)
            + f64::min(emat.pairwise(2, 1, 1, 0), emat.pairwise(2, 1, 1, 1));
        assert!((contribution - expected).abs() < 1e-12);
    }

    #[test]
    fn contribution_skips_pair_pruned_combinations() {
        let emat = sample_emat();
        let mut pmat = PruningMatrix::new(&[2, 2, 2], 0.0);
        // With (2,1)x(1,0) flagged, the minimum must come from (1,1).
        pmat.prune_pair(2, 1, 1, 0);

        let index = indexed(3, &[(0, 0)]);
        let contribution = rotamer_contribution(&emat, &pmat, &index, 2, 1);
        let expected = -1.0 + emat.pairwise(2, 1, 0, 0) + emat.pairwise(2, 1, 1, 1);
        assert!((contribution - expected).abs() < 1e-12);
    }

    #[test]
    fn contribution_is_infinite_when_a_lower_position_is_dead() {
        let emat = sample_emat();
        let mut pmat = PruningMatrix::new(&[2, 2, 2], 0.0);
        pmat.prune_rotamer(1, 0);
        pmat.prune_rotamer(1, 1);

        let index = indexed(3, &[]);
        assert!(rotamer_contribution(&emat, &pmat, &index, 2, 0).is_infinite());
    }
}
