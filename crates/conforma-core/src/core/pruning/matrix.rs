/// Pruned flags over a discrete conformation space, derived under a specific
/// energy window (the pruning interval).
///
/// A matrix starts with nothing pruned and flags are only ever added, so
/// pruning at a fixed window is monotone. The pruning engine is the only
/// mutator, and only between search passes; during an active search the
/// matrix is read-only and safely shared.
#[derive(Debug, Clone)]
pub struct PruningMatrix {
    num_rotamers: Vec<usize>,
    one_body: Vec<Vec<bool>>,
    // Triangular: pairwise[pos1][pos2][rot1][rot2] for pos2 < pos1.
    pairwise: Vec<Vec<Vec<Vec<bool>>>>,
    pruning_interval: f64,
}

impl PruningMatrix {
    /// A matrix with nothing pruned, derived under the given window.
    pub fn new(num_rotamers: &[usize], pruning_interval: f64) -> Self {
        let one_body = num_rotamers.iter().map(|&n| vec![false; n]).collect();
        let pairwise = num_rotamers
            .iter()
            .enumerate()
            .map(|(pos1, &n1)| {
                (0..pos1)
                    .map(|pos2| vec![vec![false; num_rotamers[pos2]]; n1])
                    .collect()
            })
            .collect();

        Self {
            num_rotamers: num_rotamers.to_vec(),
            one_body,
            pairwise,
            pruning_interval,
        }
    }

    pub fn num_pos(&self) -> usize {
        self.num_rotamers.len()
    }

    pub fn num_rotamers_at(&self, pos: usize) -> usize {
        self.num_rotamers[pos]
    }

    pub fn pruning_interval(&self) -> f64 {
        self.pruning_interval
    }

    pub fn is_pruned(&self, pos: usize, rot: usize) -> bool {
        self.one_body[pos][rot]
    }

    /// Whether the rotamer pair is flagged; position order is normalized.
    /// Singleton flags are checked separately by callers.
    pub fn is_pair_pruned(&self, pos1: usize, rot1: usize, pos2: usize, rot2: usize) -> bool {
        assert_ne!(pos1, pos2, "pair pruning requires two distinct positions");
        if pos1 > pos2 {
            self.pairwise[pos1][pos2][rot1][rot2]
        } else {
            self.pairwise[pos2][pos1][rot2][rot1]
        }
    }

    pub fn prune_rotamer(&mut self, pos: usize, rot: usize) {
        self.one_body[pos][rot] = true;
    }

    pub fn prune_pair(&mut self, pos1: usize, rot1: usize, pos2: usize, rot2: usize) {
        assert_ne!(pos1, pos2, "pair pruning requires two distinct positions");
        if pos1 > pos2 {
            self.pairwise[pos1][pos2][rot1][rot2] = true;
        } else {
            self.pairwise[pos2][pos1][rot2][rot1] = true;
        }
    }

    /// The unpruned rotamers at a position, in increasing order.
    pub fn unpruned_rotamers_at(&self, pos: usize) -> Vec<usize> {
        self.one_body[pos]
            .iter()
            .enumerate()
            .filter(|&(_, &pruned)| !pruned)
            .map(|(rot, _)| rot)
            .collect()
    }

    pub fn count_pruned_rotamers(&self) -> usize {
        self.one_body
            .iter()
            .map(|rots| rots.iter().filter(|&&pruned| pruned).count())
            .sum()
    }

    pub fn count_pruned_pairs(&self) -> usize {
        self.pairwise
            .iter()
            .flatten()
            .flatten()
            .map(|row| row.iter().filter(|&&pruned| pruned).count())
            .sum()
    }

    /// The number of conformations in the full space.
    ///
    /// Counts are kept in f64: exact up to 2^53 and monotone beyond, which is
    /// all the partition-function accounting needs.
    pub fn num_total_confs(&self) -> f64 {
        self.num_rotamers.iter().map(|&n| n as f64).product()
    }

    /// An upper bound on the unpruned conformation count: the per-position
    /// product of unpruned rotamer counts (pair flags are not discounted).
    pub fn num_unpruned_confs(&self) -> f64 {
        (0..self.num_pos())
            .map(|pos| {
                self.one_body[pos].iter().filter(|&&pruned| !pruned).count() as f64
            })
            .product()
    }

    /// The conformations excluded by singleton pruning.
    pub fn num_pruned_confs(&self) -> f64 {
        self.num_total_confs() - self.num_unpruned_confs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_matrix_has_nothing_pruned() {
        let pmat = PruningMatrix::new(&[2, 3], 0.0);
        assert_eq!(pmat.count_pruned_rotamers(), 0);
        assert_eq!(pmat.count_pruned_pairs(), 0);
        assert_eq!(pmat.unpruned_rotamers_at(1), vec![0, 1, 2]);
        assert_eq!(pmat.num_unpruned_confs(), 6.0);
        assert_eq!(pmat.num_pruned_confs(), 0.0);
    }

    #[test]
    fn prune_rotamer_updates_flags_and_counts() {
        let mut pmat = PruningMatrix::new(&[2, 3], 5.0);
        pmat.prune_rotamer(1, 0);
        pmat.prune_rotamer(1, 2);

        assert!(pmat.is_pruned(1, 0));
        assert!(!pmat.is_pruned(1, 1));
        assert_eq!(pmat.count_pruned_rotamers(), 2);
        assert_eq!(pmat.unpruned_rotamers_at(1), vec![1]);
        assert_eq!(pmat.num_unpruned_confs(), 2.0);
        assert_eq!(pmat.num_pruned_confs(), 4.0);
        assert_eq!(pmat.pruning_interval(), 5.0);
    }

    #[test]
    fn pair_flags_are_symmetric_in_position_order() {
        let mut pmat = PruningMatrix::new(&[2, 3], 0.0);
        pmat.prune_pair(0, 1, 1, 2);

        assert!(pmat.is_pair_pruned(0, 1, 1, 2));
        assert!(pmat.is_pair_pruned(1, 2, 0, 1));
        assert!(!pmat.is_pair_pruned(0, 0, 1, 2));
        assert_eq!(pmat.count_pruned_pairs(), 1);
    }

    #[test]
    fn fully_pruned_position_empties_the_space() {
        let mut pmat = PruningMatrix::new(&[2, 2], 0.0);
        pmat.prune_rotamer(0, 0);
        pmat.prune_rotamer(0, 1);
        assert_eq!(pmat.num_unpruned_confs(), 0.0);
        assert!(pmat.unpruned_rotamers_at(0).is_empty());
    }
}
