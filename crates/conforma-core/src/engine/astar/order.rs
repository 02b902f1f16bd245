use crate::core::conf::ConfIndex;
use crate::core::energy::EnergyMatrix;
use crate::core::pruning::PruningMatrix;
use crate::engine::config::OrderingKind;

use super::scoring::rotamer_contribution;

/// Which free position a node branches on next.
///
/// `Static` fixes one order up front and reuses it for every node; `Dynamic`
/// re-evaluates at each node, opening the most differentiating branch first.
#[derive(Debug)]
pub(crate) enum BranchOrdering {
    Static(Vec<usize>),
    Dynamic,
}

impl BranchOrdering {
    pub fn from_config(kind: OrderingKind, emat: &EnergyMatrix, pmat: &PruningMatrix) -> Self {
        match kind {
            OrderingKind::Static => Self::Static(static_order(emat, pmat)),
            OrderingKind::Dynamic => Self::Dynamic,
        }
    }

    /// Picks the next branching position among the currently undefined ones.
    pub fn choose(&self, emat: &EnergyMatrix, pmat: &PruningMatrix, index: &ConfIndex) -> usize {
        match self {
            Self::Static(order) => order
                .iter()
                .copied()
                .find(|&pos| index.is_undefined(pos))
                .expect("choose called with no undefined positions"),
            Self::Dynamic => dynamic_choice(emat, pmat, index),
        }
    }
}

/// The gap between the mean and the best per-rotamer contribution at a
/// position: how much the branch differentiates its children. Positions with
/// infeasible rotamers score infinite so dead branches are resolved first.
fn position_gap(emat: &EnergyMatrix, pmat: &PruningMatrix, index: &ConfIndex, pos: usize) -> f64 {
    let rots = pmat.unpruned_rotamers_at(pos);
    if rots.is_empty() {
        return f64::INFINITY;
    }

    let mut best = f64::INFINITY;
    let mut sum = 0.0;
    for &rot in &rots {
        let contribution = rotamer_contribution(emat, pmat, index, pos, rot);
        best = best.min(contribution);
        sum += contribution;
    }
    if !best.is_finite() {
        return f64::INFINITY;
    }
    let mean = sum / rots.len() as f64;
    mean - best
}

fn dynamic_choice(emat: &EnergyMatrix, pmat: &PruningMatrix, index: &ConfIndex) -> usize {
    let mut choice = None;
    let mut best_gap = f64::NEG_INFINITY;
    for &pos in index.undefined() {
        let gap = position_gap(emat, pmat, index, pos);
        if gap > best_gap {
            best_gap = gap;
            choice = Some(pos);
        }
    }
    choice.expect("choose called with no undefined positions")
}

/// The static order: the dynamic gap metric evaluated once at the root, most
/// differentiating positions first. Ties keep position order so the result
/// is deterministic.
fn static_order(emat: &EnergyMatrix, pmat: &PruningMatrix) -> Vec<usize> {
    let root = ConfIndex::new(emat.num_pos());
    let mut order: Vec<usize> = (0..emat.num_pos()).collect();
    let gaps: Vec<f64> = order
        .iter()
        .map(|&pos| position_gap(emat, pmat, &root, pos))
        .collect();
    order.sort_by(|&a, &b| {
        gaps[b]
            .partial_cmp(&gaps[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    order
}
