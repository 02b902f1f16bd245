use std::collections::HashMap;

use crate::core::conf::ConfIndex;
use crate::core::energy::EnergyMatrix;
use crate::core::pruning::PruningMatrix;
use crate::engine::config::{MplpConfig, MplpSchedule};

// Finite stand-in for infinite energies inside the relaxation. Lowering an
// entry can only loosen the bound, never break admissibility, and keeping the
// arithmetic finite avoids inf - inf poisoning in the dual updates.
const ENERGY_CAP: f64 = 1e30;

fn cap(energy: f64) -> f64 {
    energy.min(ENERGY_CAP)
}

/// The MPLP-refined bound: runs a bounded number of message-passing sweeps
/// over the pairwise energy graph restricted to the undefined positions and
/// their unpruned rotamers, and returns the best dual value seen, floored at
/// the traditional bound so refinement strictly dominates it.
pub fn score(
    emat: &EnergyMatrix,
    pmat: &PruningMatrix,
    index: &ConfIndex,
    config: &MplpConfig,
) -> f64 {
    let floor = super::traditional::score(emat, pmat, index);
    if !floor.is_finite() || index.num_undefined() < 2 {
        return floor;
    }
    Relaxation::build(emat, pmat, index).solve(config, floor)
}

struct Relaxation {
    /// Unpruned rotamers per undefined position (the variable domains).
    domains: Vec<Vec<usize>>,
    /// Unary potentials: one-body plus exact interactions with defined
    /// positions.
    theta: Vec<Vec<f64>>,
    /// Pairwise potentials between undefined positions, keyed by node-index
    /// pair (a, b) with a < b, laid out as [ka][kb].
    theta_pair: HashMap<(usize, usize), Vec<Vec<f64>>>,
    /// Admissible constant for triple terms spanning three undefined
    /// positions, which the pairwise relaxation cannot represent.
    constant: f64,
}

impl Relaxation {
    fn build(emat: &EnergyMatrix, pmat: &PruningMatrix, index: &ConfIndex) -> Self {
        let positions: Vec<usize> = index.undefined().to_vec();
        let node_of: HashMap<usize, usize> =
            positions.iter().enumerate().map(|(i, &p)| (p, i)).collect();
        let domains: Vec<Vec<usize>> = positions
            .iter()
            .map(|&pos| pmat.unpruned_rotamers_at(pos))
            .collect();

        let mut theta: Vec<Vec<f64>> = Vec::with_capacity(positions.len());
        for (i, &pos) in positions.iter().enumerate() {
            let mut unary = Vec::with_capacity(domains[i].len());
            for &rot in &domains[i] {
                let mut energy = cap(emat.one_body(pos, rot));
                for (dpos, drot) in index.defined() {
                    energy += cap(emat.pairwise(pos, rot, dpos, drot));
                }
                unary.push(energy);
            }
            theta.push(unary);
        }

        let mut theta_pair = HashMap::new();
        for a in 0..positions.len() {
            for b in (a + 1)..positions.len() {
                let mut table = vec![vec![0.0; domains[b].len()]; domains[a].len()];
                for (ka, &rot_a) in domains[a].iter().enumerate() {
                    for (kb, &rot_b) in domains[b].iter().enumerate() {
                        table[ka][kb] =
                            cap(emat.pairwise(positions[a], rot_a, positions[b], rot_b));
                    }
                }
                theta_pair.insert((a, b), table);
            }
        }

        // Distribute triple corrections by how many of their slots are still
        // undefined: one -> unary, two -> pairwise, three -> constant bound.
        let mut constant = 0.0;
        for term in emat.triples() {
            let slots = [
                (term.pos1, term.rot1),
                (term.pos2, term.rot2),
                (term.pos3, term.rot3),
            ];
            if slots
                .iter()
                .any(|&(pos, rot)| index.is_undefined(pos) && pmat.is_pruned(pos, rot))
            {
                continue;
            }
            let defined_match = |&(pos, rot): &(usize, usize)| index.rotamer_at(pos) == Some(rot);
            let undefined: Vec<(usize, usize)> = slots
                .iter()
                .copied()
                .filter(|&(pos, _)| index.is_undefined(pos))
                .collect();

            match undefined.as_slice() {
                [] => {} // fully assigned: charged by the g-score
                [(pos, rot)] => {
                    if slots.iter().filter(|s| !index.is_undefined(s.0)).all(defined_match) {
                        let node = node_of[pos];
                        if let Ok(k) = domains[node].binary_search(rot) {
                            theta[node][k] += cap(term.energy);
                        }
                    }
                }
                [(pos_x, rot_x), (pos_y, rot_y)] => {
                    if slots.iter().filter(|s| !index.is_undefined(s.0)).all(defined_match) {
                        let (mut a, mut ka_rot) = (node_of[pos_x], *rot_x);
                        let (mut b, mut kb_rot) = (node_of[pos_y], *rot_y);
                        if a > b {
                            std::mem::swap(&mut a, &mut b);
                            std::mem::swap(&mut ka_rot, &mut kb_rot);
                        }
                        if let (Ok(ka), Ok(kb)) = (
                            domains[a].binary_search(&ka_rot),
                            domains[b].binary_search(&kb_rot),
                        ) {
                            theta_pair.get_mut(&(a, b)).unwrap()[ka][kb] += cap(term.energy);
                        }
                    }
                }
                _ => constant += f64::min(0.0, term.energy),
            }
        }

        Self {
            domains,
            theta,
            theta_pair,
            constant,
        }
    }

    fn solve(self, config: &MplpConfig, floor: f64) -> f64 {
        let n = self.domains.len();
        let mut beliefs = self.theta.clone();
        let mut messages: HashMap<(usize, usize), Vec<f64>> = HashMap::new();
        let mut edges = Vec::with_capacity(n * (n - 1) / 2);
        for a in 0..n {
            for b in (a + 1)..n {
                messages.insert((a, b), vec![0.0; self.domains[b].len()]);
                messages.insert((b, a), vec![0.0; self.domains[a].len()]);
                edges.push((a, b));
            }
        }

        let mut best = floor;
        let mut previous = f64::NEG_INFINITY;
        for _ in 0..config.max_iterations {
            match config.schedule {
                MplpSchedule::Edge => {
                    for &(a, b) in &edges {
                        self.update_edge(a, b, &mut beliefs, &mut messages);
                    }
                }
                MplpSchedule::Node => {
                    for i in 0..n {
                        for j in 0..n {
                            if i != j {
                                self.update_edge(i.min(j), i.max(j), &mut beliefs, &mut messages);
                            }
                        }
                    }
                }
            }

            // The dual value is a valid lower bound once every edge has been
            // updated in the sweep; keep the best one seen.
            let bound = self.constant
                + beliefs
                    .iter()
                    .map(|b| b.iter().copied().fold(f64::INFINITY, f64::min))
                    .sum::<f64>();
            best = best.max(bound);
            if bound - previous < config.convergence_threshold {
                break;
            }
            previous = bound;
        }
        best
    }

    /// One half-split dual update of edge (a, b), a < b: both directed
    /// messages are recomputed together and the endpoint beliefs updated in
    /// place.
    fn update_edge(
        &self,
        a: usize,
        b: usize,
        beliefs: &mut [Vec<f64>],
        messages: &mut HashMap<(usize, usize), Vec<f64>>,
    ) {
        let lam_ba = messages.remove(&(b, a)).expect("message buffers initialized");
        let lam_ab = messages.remove(&(a, b)).expect("message buffers initialized");

        let gamma_a: Vec<f64> = beliefs[a]
            .iter()
            .zip(&lam_ba)
            .map(|(belief, lam)| belief - lam)
            .collect();
        let gamma_b: Vec<f64> = beliefs[b]
            .iter()
            .zip(&lam_ab)
            .map(|(belief, lam)| belief - lam)
            .collect();

        let pair = &self.theta_pair[&(a, b)];

        let new_ba: Vec<f64> = (0..gamma_a.len())
            .map(|ka| {
                let reach = (0..gamma_b.len())
                    .map(|kb| pair[ka][kb] + gamma_b[kb])
                    .fold(f64::INFINITY, f64::min);
                0.5 * (reach - gamma_a[ka])
            })
            .collect();
        let new_ab: Vec<f64> = (0..gamma_b.len())
            .map(|kb| {
                let reach = (0..gamma_a.len())
                    .map(|ka| pair[ka][kb] + gamma_a[ka])
                    .fold(f64::INFINITY, f64::min);
                0.5 * (reach - gamma_b[kb])
            })
            .collect();

        for (ka, (gamma, lam)) in gamma_a.iter().zip(&new_ba).enumerate() {
            beliefs[a][ka] = gamma + lam;
        }
        for (kb, (gamma, lam)) in gamma_b.iter().zip(&new_ab).enumerate() {
            beliefs[b][kb] = gamma + lam;
        }
        messages.insert((b, a), new_ba);
        messages.insert((a, b), new_ab);
    }
}
