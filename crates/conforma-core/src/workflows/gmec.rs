use tracing::{info, instrument};

use crate::core::conf::ScoredConf;
use crate::core::energy::EnergyMatrix;
use crate::core::pruning::PruningMatrix;
use crate::engine::astar::ConfTree;
use crate::engine::config::GmecConfig;
use crate::engine::dee::{PruneStats, PruningEngine};
use crate::engine::error::EngineError;

#[derive(Debug)]
pub struct GmecResult {
    /// The enumerated window: optimum first, then every conformation within
    /// `energy_window` of it, in non-decreasing score order.
    pub confs: Vec<ScoredConf>,
    pub prune_stats: PruneStats,
    /// True when the unpruned space ran out before the window did.
    pub space_exhausted: bool,
}

impl GmecResult {
    /// The global minimum-energy conformation over the unpruned space.
    pub fn gmec(&self) -> Option<&ScoredConf> {
        self.confs.first()
    }
}

/// Finds the GMEC and every conformation scoring within the window above it.
#[instrument(skip_all, name = "gmec_workflow")]
pub fn find_gmec(emat: &EnergyMatrix, config: &GmecConfig) -> Result<GmecResult, EngineError> {
    if !emat.is_valid_for(config.energy_window) {
        return Err(EngineError::StaleEnergyMatrix {
            tagged: emat.pruning_interval(),
            required: config.energy_window,
        });
    }

    let mut pmat = PruningMatrix::new(emat.num_rotamers(), config.energy_window);
    let prune_stats = PruningEngine::new(emat, config.energy_window).prune(&mut pmat);

    let mut tree = ConfTree::new(emat, &pmat, &config.search);
    let mut confs = Vec::new();
    let mut space_exhausted = false;
    let mut cutoff = f64::INFINITY;
    loop {
        match tree.next_conf() {
            Some(conf) => {
                if conf.score > cutoff {
                    break;
                }
                if confs.is_empty() {
                    cutoff = conf.score + config.energy_window;
                    info!(score = conf.score, "optimum found");
                }
                confs.push(conf);
            }
            None => {
                space_exhausted = true;
                break;
            }
        }
    }

    info!(num_confs = confs.len(), space_exhausted, "window enumeration finished");
    Ok(GmecResult {
        confs,
        prune_stats,
        space_exhausted,
    })
}
