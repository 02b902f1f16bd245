use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crossbeam_channel::unbounded;
use tracing::{debug, info, instrument};

use crate::core::conf::ScoredConf;
use crate::core::energy::EnergyMatrix;
use crate::core::pruning::PruningMatrix;
use crate::engine::astar::ConfTree;
use crate::engine::config::{PfuncConfig, SearchConfig};
use crate::engine::dee::{self, PruningEngine};
use crate::engine::error::EngineError;
use crate::engine::pfunc::{Accumulator, PfuncValues, Status};
use crate::engine::tasks::TaskExecutor;

/// The external refinement service: fully minimize one candidate's continuous
/// energy. Infeasible geometry surfaces as `+inf`, never as an error; a panic
/// inside an implementation is recorded the same way.
pub trait ConfRefiner: Send + Sync {
    fn refine(&self, conf: &ScoredConf) -> f64;
}

/// Passthrough for rigid (discrete) estimates: the enumeration bound is the
/// energy.
pub struct BoundRefiner;

impl ConfRefiner for BoundRefiner {
    fn refine(&self, conf: &ScoredConf) -> f64 {
        conf.score
    }
}

#[derive(Debug)]
pub struct PfuncResult {
    pub status: Status,
    pub values: PfuncValues,
    pub num_refined: u64,
    /// The pruning window of the final pass.
    pub pruning_window: f64,
    pub restarted: bool,
}

type Refined = (u64, ScoredConf, f64);

/// Estimates the partition function to the configured relative error.
///
/// Control flow: prune at the initial window, enumerate candidates in
/// non-decreasing score order, dispatch each to the refinement service
/// through the task executor, and fold refined energies into the accumulator
/// strictly in tree order (out-of-order completions wait in a reorder
/// buffer). If the space runs out with the bound still above target, the
/// pruning window is widened toward a derived pruned-count target and the
/// search restarts from scratch, once; failure after that surfaces as a
/// terminal status value, never a panic.
#[instrument(skip_all, name = "pfunc_workflow")]
pub fn estimate<R: ConfRefiner + 'static>(
    emat: &EnergyMatrix,
    search: &SearchConfig,
    config: &PfuncConfig,
    refiner: Arc<R>,
) -> Result<PfuncResult, EngineError> {
    let mut window = config.pruning.initial_window;
    if !emat.is_valid_for(window) {
        return Err(EngineError::StaleEnergyMatrix {
            tagged: emat.pruning_interval(),
            required: window,
        });
    }

    let mut pmat = PruningMatrix::new(emat.num_rotamers(), window);
    PruningEngine::new(emat, window).prune(&mut pmat);

    let mut accumulator = Accumulator::new(
        config.target_epsilon,
        config.rt,
        config.max_confs,
        pmat.num_unpruned_confs(),
    );
    let executor: TaskExecutor<Refined> =
        TaskExecutor::start(config.executor.num_threads, config.executor.queue_capacity);

    let mut restarted = false;
    loop {
        run_pass(
            emat,
            &pmat,
            search,
            config,
            &mut accumulator,
            &executor,
            &refiner,
            window,
        );

        if accumulator.status() == Status::NotEnoughConformations && !restarted {
            restarted = true;
            info!(
                epsilon = accumulator.values().epsilon,
                "target epsilon unreachable at window {window}; widening and restarting"
            );
            match widen_for_restart(emat, config, &accumulator, window)? {
                Some((new_pmat, new_window)) => {
                    window = new_window;
                    pmat = new_pmat;
                    accumulator.reset_for_restart(pmat.num_unpruned_confs());
                    continue;
                }
                None => break,
            }
        }
        break;
    }

    executor.stop();
    let result = PfuncResult {
        status: accumulator.status(),
        values: accumulator.values(),
        num_refined: accumulator.num_accumulated(),
        pruning_window: window,
        restarted,
    };
    info!(
        status = ?result.status,
        epsilon = result.values.epsilon,
        refined = result.num_refined,
        "estimation finished"
    );
    Ok(result)
}

#[allow(clippy::too_many_arguments)]
fn run_pass<R: ConfRefiner + 'static>(
    emat: &EnergyMatrix,
    pmat: &PruningMatrix,
    search: &SearchConfig,
    config: &PfuncConfig,
    accumulator: &mut Accumulator,
    executor: &TaskExecutor<Refined>,
    refiner: &Arc<R>,
    window: f64,
) {
    let mut tree = ConfTree::new(emat, pmat, search);
    let (results_tx, results_rx) = unbounded::<Refined>();
    let mut pending: BTreeMap<u64, (ScoredConf, f64)> = BTreeMap::new();
    let mut next_apply: u64 = 0;
    let mut submitted: u64 = 0;
    let mut applied: u64 = 0;
    let buffer_cap = (config.executor.task_buffer.max(1) * config.executor.num_threads.max(1)) as u64;
    let mut exhausted = false;

    while accumulator.status() == Status::Estimating {
        match tree.next_conf() {
            Some(conf) => {
                if accumulator.e0().is_none() {
                    // The first conformation's score is the lower bound on
                    // the optimum; it seeds the pruned-mass estimate.
                    accumulator.init_pstar(conf.score, window, pmat.num_pruned_confs());
                }

                let seq = submitted;
                submitted += 1;
                let refiner = Arc::clone(refiner);
                let tx = results_tx.clone();
                executor.submit(
                    Box::new(move || {
                        let energy = catch_unwind(AssertUnwindSafe(|| refiner.refine(&conf)))
                            .unwrap_or(f64::INFINITY);
                        (seq, conf, energy)
                    }),
                    Some(Box::new(move |result| {
                        let _ = tx.send(result);
                    })),
                );
            }
            None => {
                exhausted = true;
                break;
            }
        }

        while let Ok((seq, conf, energy)) = results_rx.try_recv() {
            pending.insert(seq, (conf, energy));
        }
        applied += apply_in_order(&mut pending, &mut next_apply, accumulator);

        // Backpressure: bound how many refinements wait in flight or in the
        // reorder buffer. Every submitted sequence number is guaranteed to
        // arrive, so a blocking receive always makes progress.
        while accumulator.status() == Status::Estimating && submitted - applied > buffer_cap {
            let (seq, conf, energy) = results_rx
                .recv()
                .expect("refinement result channel closed early");
            pending.insert(seq, (conf, energy));
            applied += apply_in_order(&mut pending, &mut next_apply, accumulator);
        }
    }

    // Let in-flight refinements land, then fold in whatever is still
    // applicable (a terminal accumulator ignores the leftovers).
    executor.wait_for_finish();
    while let Ok((seq, conf, energy)) = results_rx.try_recv() {
        pending.insert(seq, (conf, energy));
    }
    apply_in_order(&mut pending, &mut next_apply, accumulator);

    if exhausted && accumulator.status() == Status::Estimating {
        let status = accumulator.on_exhausted();
        debug!(?status, "conformation space exhausted");
    }
}

fn apply_in_order(
    pending: &mut BTreeMap<u64, (ScoredConf, f64)>,
    next_apply: &mut u64,
    accumulator: &mut Accumulator,
) -> u64 {
    let mut applied = 0;
    while let Some((conf, energy)) = pending.remove(next_apply) {
        accumulator.accumulate(conf.rotamers, conf.score, energy);
        *next_apply += 1;
        applied += 1;
    }
    applied
}

/// Derives a pruned-count target from the current estimate and widens the
/// pruning window toward it. The target formula is best-effort policy, not a
/// provable bound: the pruned mass must shrink to roughly `qstar * rho` for
/// the target epsilon to become reachable.
fn widen_for_restart(
    emat: &EnergyMatrix,
    config: &PfuncConfig,
    accumulator: &Accumulator,
    current_window: f64,
) -> Result<Option<(PruningMatrix, f64)>, EngineError> {
    let ceiling = config.pruning.window_ceiling;
    if !emat.is_valid_for(ceiling) {
        return Err(EngineError::StaleEnergyMatrix {
            tagged: emat.pruning_interval(),
            required: ceiling,
        });
    }

    let rho = config.target_epsilon / (1.0 - config.target_epsilon);
    let ln_weight_e0 = accumulator.e0().map(|e0| accumulator.ln_weight(e0));

    match ln_weight_e0 {
        Some(ln_w) if ln_w > f64::NEG_INFINITY => {
            let values = accumulator.values();
            let target_pruned = ((values.ln_qstar + rho.ln() - ln_w).exp() - 1.0).max(0.0);
            debug!(target_pruned, "derived pruning target");

            let outcome = dee::prune_to_target(emat, &config.pruning, current_window, target_pruned);
            if outcome.target_met {
                Ok(Some((outcome.pmat, outcome.window)))
            } else {
                info!(
                    window = outcome.window,
                    "pruning target unreachable at the window ceiling"
                );
                Ok(None)
            }
        }
        _ => {
            // The seed weight underflowed (or nothing was ever enumerated):
            // no finite target can be derived, so jump straight to the
            // ceiling and keep whatever that window allows.
            let mut pmat = PruningMatrix::new(emat.num_rotamers(), ceiling);
            PruningEngine::new(emat, ceiling).prune(&mut pmat);
            Ok(Some((pmat, ceiling)))
        }
    }
}
