use std::collections::HashSet;

use tracing::{debug, trace};

use crate::core::utils::logdomain::{LogSum, ln_add_exp};

/// The accumulator's state machine. `Estimating` is the only live state; the
/// other three are terminal and reported to the caller as values, never as
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Estimating,
    /// The target epsilon was met, or the enumeration cap was reached.
    Estimated,
    /// The space was exhausted (or pruning cannot be widened further) with
    /// the bound still above target.
    NotEnoughConformations,
    /// The remaining mass underflows to zero weight, so the bound can never
    /// tighten to the target.
    NotEnoughFiniteEnergies,
}

/// A snapshot of the three mass terms and the effective epsilon.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PfuncValues {
    pub ln_qstar: f64,
    pub ln_qprime: f64,
    pub ln_pstar: f64,
    pub epsilon: f64,
}

impl PfuncValues {
    /// Certified lower bound on the partition function.
    pub fn ln_lower_bound(&self) -> f64 {
        self.ln_qstar
    }

    /// Upper bound: accumulated mass plus everything still unenumerated.
    pub fn ln_upper_bound(&self) -> f64 {
        ln_add_exp(ln_add_exp(self.ln_qstar, self.ln_qprime), self.ln_pstar)
    }
}

/// Consumes conformations in non-decreasing score order and decides when the
/// estimate is good enough, or why it never will be.
pub struct Accumulator {
    rt: f64,
    target_epsilon: f64,
    max_confs: Option<u64>,
    qstar: LogSum,
    ln_qprime: f64,
    ln_pstar: f64,
    num_unpruned: f64,
    num_accumulated: u64,
    seen: HashSet<Vec<usize>>,
    status: Status,
    e0: Option<f64>,
}

impl Accumulator {
    pub fn new(target_epsilon: f64, rt: f64, max_confs: Option<u64>, num_unpruned: f64) -> Self {
        assert!(target_epsilon > 0.0 && target_epsilon < 1.0);
        assert!(rt > 0.0);
        Self {
            rt,
            target_epsilon,
            max_confs,
            qstar: LogSum::zero(),
            ln_qprime: f64::NEG_INFINITY,
            ln_pstar: f64::NEG_INFINITY,
            num_unpruned,
            num_accumulated: 0,
            seen: HashSet::new(),
            status: Status::Estimating,
            e0: None,
        }
    }

    /// ln of the Boltzmann weight `exp(-energy / RT)`. Infinite energy maps
    /// to zero weight; NaN energies are infeasible geometry and count as
    /// zero weight too.
    pub fn ln_weight(&self, energy: f64) -> f64 {
        if energy.is_nan() {
            f64::NEG_INFINITY
        } else {
            -energy / self.rt
        }
    }

    /// Seeds `pstar` from the optimum's lower bound: every pruned
    /// conformation weighs at most `exp(-(bound + window) / RT)`.
    pub fn init_pstar(&mut self, gmec_lower_bound: f64, window: f64, num_pruned: f64) {
        self.e0 = Some(gmec_lower_bound + window);
        self.ln_pstar = if num_pruned > 0.0 {
            self.ln_weight(gmec_lower_bound + window) + num_pruned.ln()
        } else {
            f64::NEG_INFINITY
        };
        debug!(ln_pstar = self.ln_pstar, num_pruned, "seeded pruned-mass bound");
    }

    /// The energy `pstar` was seeded at: the optimum's lower bound plus the
    /// pruning window. `None` until [`init_pstar`](Self::init_pstar) runs.
    pub fn e0(&self) -> Option<f64> {
        self.e0
    }

    /// Folds in one enumerated conformation: its enumeration `score` (the
    /// bound, non-decreasing across calls) and its refined `energy`.
    /// Conformations already accumulated (re-enumerated after a restart) are
    /// skipped so mass is never double counted.
    pub fn accumulate(&mut self, rotamers: Vec<usize>, score: f64, energy: f64) -> Status {
        if self.status != Status::Estimating {
            return self.status;
        }
        if !self.seen.insert(rotamers) {
            trace!("skipping re-enumerated conformation");
            return self.status;
        }
        self.num_accumulated += 1;

        let ln_bound_weight = self.ln_weight(score);
        if ln_bound_weight == f64::NEG_INFINITY {
            // Scores never decrease, so everything still unenumerated weighs
            // zero as well: the estimate is as tight as it will ever get.
            self.ln_qprime = f64::NEG_INFINITY;
            self.status = if self.epsilon() <= self.target_epsilon {
                Status::Estimated
            } else {
                Status::NotEnoughFiniteEnergies
            };
            return self.status;
        }

        self.qstar.add_ln(self.ln_weight(energy));

        let remaining = (self.num_unpruned - self.num_accumulated as f64).max(0.0);
        self.ln_qprime = if remaining > 0.0 {
            ln_bound_weight + remaining.ln()
        } else {
            f64::NEG_INFINITY
        };

        let epsilon = self.epsilon();
        trace!(
            epsilon,
            ln_qstar = self.qstar.ln(),
            accumulated = self.num_accumulated,
            "accumulated conformation"
        );
        if epsilon <= self.target_epsilon || self.cap_reached() {
            self.status = Status::Estimated;
        }
        self.status
    }

    /// Signals that the tree is exhausted: no unenumerated mass remains.
    pub fn on_exhausted(&mut self) -> Status {
        if self.status != Status::Estimating {
            return self.status;
        }
        self.ln_qprime = f64::NEG_INFINITY;
        self.status = if self.epsilon() <= self.target_epsilon {
            Status::Estimated
        } else {
            Status::NotEnoughConformations
        };
        self.status
    }

    /// `1 - qstar / (qstar + qprime + pstar)`, in [0, 1]. Evaluated as
    /// `-expm1(ln_qstar - ln_denominator)`, which is stable both near
    /// qstar = 0 and near convergence. An all-zero denominator reads as 1
    /// (nothing certified yet).
    pub fn epsilon(&self) -> f64 {
        let ln_denominator = ln_add_exp(
            ln_add_exp(self.qstar.ln(), self.ln_qprime),
            self.ln_pstar,
        );
        if ln_denominator == f64::NEG_INFINITY {
            return 1.0;
        }
        -(self.qstar.ln() - ln_denominator).exp_m1()
    }

    fn cap_reached(&self) -> bool {
        self.max_confs
            .is_some_and(|cap| self.num_accumulated >= cap)
    }

    /// Rearms the accumulator after the caller re-pruned at a wider window.
    /// Accumulated mass and the seen-set survive; only the bounds over the
    /// not-yet-enumerated space are rebuilt.
    pub fn reset_for_restart(&mut self, num_unpruned: f64) {
        self.num_unpruned = num_unpruned;
        self.ln_qprime = f64::NEG_INFINITY;
        self.ln_pstar = f64::NEG_INFINITY;
        self.e0 = None;
        self.status = Status::Estimating;
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn target_epsilon(&self) -> f64 {
        self.target_epsilon
    }

    pub fn num_accumulated(&self) -> u64 {
        self.num_accumulated
    }

    pub fn num_pruned_estimate(&self, num_total: f64) -> f64 {
        (num_total - self.num_unpruned).max(0.0)
    }

    pub fn values(&self) -> PfuncValues {
        PfuncValues {
            ln_qstar: self.qstar.ln(),
            ln_qprime: self.ln_qprime,
            ln_pstar: self.ln_pstar,
            epsilon: self.epsilon(),
        }
    }
}
