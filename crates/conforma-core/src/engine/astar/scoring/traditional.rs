use crate::core::conf::ConfIndex;
use crate::core::energy::EnergyMatrix;
use crate::core::pruning::PruningMatrix;

/// The traditional admissible bound: for each undefined position, the minimum
/// contribution over its unpruned rotamers, summed. Each contribution charges
/// interactions toward defined and lower-ordered undefined positions only, so
/// no interaction is counted twice.
pub fn score(emat: &EnergyMatrix, pmat: &PruningMatrix, index: &ConfIndex) -> f64 {
    index
        .undefined()
        .iter()
        .map(|&pos| {
            pmat.unpruned_rotamers_at(pos)
                .into_iter()
                .map(|rot| super::rotamer_contribution(emat, pmat, index, pos, rot))
                .fold(f64::INFINITY, f64::min)
        })
        .sum()
}
