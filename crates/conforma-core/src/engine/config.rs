use thiserror::Error;

/// RT in kcal/mol at 298.15 K, the default thermodynamic scale for Boltzmann
/// weighting.
pub const RT_ROOM_TEMP: f64 = 0.0019891 * 298.15;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Incompatible options: {0}")]
    IncompatibleOptions(&'static str),

    #[error("Parameter out of range: {0}")]
    OutOfRange(&'static str),
}

/// Which message-passing sweep the MPLP scorer runs. Both schedules apply the
/// same dual update; the choice trades bound tightness per unit time, never
/// correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MplpSchedule {
    Edge,
    Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MplpConfig {
    pub schedule: MplpSchedule,
    pub max_iterations: usize,
    /// Stop iterating once one sweep improves the bound by less than this.
    pub convergence_threshold: f64,
}

impl Default for MplpConfig {
    fn default() -> Self {
        Self {
            schedule: MplpSchedule::Edge,
            max_iterations: 10,
            convergence_threshold: 1e-4,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeuristicKind {
    Traditional,
    Mplp(MplpConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderingKind {
    Static,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    pub heuristic: HeuristicKind,
    pub ordering: OrderingKind,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            heuristic: HeuristicKind::Traditional,
            ordering: OrderingKind::Dynamic,
        }
    }
}

#[derive(Default)]
pub struct SearchConfigBuilder {
    heuristic: Option<HeuristicKind>,
    ordering: Option<OrderingKind>,
}

impl SearchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn heuristic(mut self, heuristic: HeuristicKind) -> Self {
        self.heuristic = Some(heuristic);
        self
    }

    pub fn ordering(mut self, ordering: OrderingKind) -> Self {
        self.ordering = Some(ordering);
        self
    }

    pub fn build(self) -> Result<SearchConfig, ConfigError> {
        let heuristic = self.heuristic.unwrap_or(HeuristicKind::Traditional);
        let ordering = match (&heuristic, self.ordering) {
            // Recomputing a branching order after an expensive relaxation at
            // every node wastes the relaxation; MPLP runs with a static order.
            (HeuristicKind::Mplp(_), Some(OrderingKind::Dynamic)) => {
                return Err(ConfigError::IncompatibleOptions(
                    "the MPLP heuristic requires static ordering",
                ));
            }
            (HeuristicKind::Mplp(_), None) => OrderingKind::Static,
            (_, Some(ordering)) => ordering,
            (_, None) => OrderingKind::Dynamic,
        };
        Ok(SearchConfig { heuristic, ordering })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GmecConfig {
    /// Conformations within this window above the optimum are enumerated too.
    pub energy_window: f64,
    pub search: SearchConfig,
}

#[derive(Default)]
pub struct GmecConfigBuilder {
    energy_window: Option<f64>,
    search: Option<SearchConfig>,
}

impl GmecConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn energy_window(mut self, window: f64) -> Self {
        self.energy_window = Some(window);
        self
    }

    pub fn search(mut self, search: SearchConfig) -> Self {
        self.search = Some(search);
        self
    }

    pub fn build(self) -> Result<GmecConfig, ConfigError> {
        let energy_window = self.energy_window.unwrap_or(0.0);
        if !(energy_window >= 0.0) {
            return Err(ConfigError::OutOfRange("energy_window must be >= 0"));
        }
        Ok(GmecConfig {
            energy_window,
            search: self.search.unwrap_or_default(),
        })
    }
}

/// How the partition-function workflow widens the pruning window when the
/// current window cannot reach the accuracy target.
#[derive(Debug, Clone, PartialEq)]
pub struct PruningSchedule {
    pub initial_window: f64,
    pub widening_step: f64,
    pub window_ceiling: f64,
}

impl Default for PruningSchedule {
    fn default() -> Self {
        Self {
            initial_window: 10.0,
            widening_step: 1.0,
            window_ceiling: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    pub num_threads: usize,
    pub queue_capacity: usize,
    /// Conformations allowed in flight per worker before submission throttles.
    pub task_buffer: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            num_threads: 1,
            queue_capacity: 2,
            task_buffer: 8,
        }
    }
}

impl ExecutorConfig {
    /// A pool of `num_threads` workers with queues sized so workers rarely
    /// block waiting for the next task.
    pub fn with_threads(num_threads: usize) -> Self {
        let num_threads = num_threads.max(1);
        Self {
            num_threads,
            queue_capacity: num_threads * 2,
            task_buffer: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PfuncConfig {
    pub target_epsilon: f64,
    pub rt: f64,
    /// Stop with `Estimated` after this many refined conformations even if
    /// the target epsilon has not been reached.
    pub max_confs: Option<u64>,
    pub pruning: PruningSchedule,
    pub executor: ExecutorConfig,
}

#[derive(Default)]
pub struct PfuncConfigBuilder {
    target_epsilon: Option<f64>,
    rt: Option<f64>,
    max_confs: Option<u64>,
    pruning: Option<PruningSchedule>,
    executor: Option<ExecutorConfig>,
}

impl PfuncConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn target_epsilon(mut self, epsilon: f64) -> Self {
        self.target_epsilon = Some(epsilon);
        self
    }

    pub fn rt(mut self, rt: f64) -> Self {
        self.rt = Some(rt);
        self
    }

    pub fn max_confs(mut self, cap: u64) -> Self {
        self.max_confs = Some(cap);
        self
    }

    pub fn pruning(mut self, schedule: PruningSchedule) -> Self {
        self.pruning = Some(schedule);
        self
    }

    pub fn executor(mut self, executor: ExecutorConfig) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn build(self) -> Result<PfuncConfig, ConfigError> {
        let target_epsilon = self
            .target_epsilon
            .ok_or(ConfigError::MissingParameter("target_epsilon"))?;
        if !(target_epsilon > 0.0 && target_epsilon < 1.0) {
            return Err(ConfigError::OutOfRange(
                "target_epsilon must be in (0, 1)",
            ));
        }

        let rt = self.rt.unwrap_or(RT_ROOM_TEMP);
        if !(rt > 0.0) {
            return Err(ConfigError::OutOfRange("rt must be > 0"));
        }

        let pruning = self.pruning.unwrap_or_default();
        if !(pruning.widening_step > 0.0) {
            return Err(ConfigError::OutOfRange("widening_step must be > 0"));
        }
        if !(pruning.window_ceiling >= pruning.initial_window) {
            return Err(ConfigError::OutOfRange(
                "window_ceiling must be >= initial_window",
            ));
        }

        Ok(PfuncConfig {
            target_epsilon,
            rt,
            max_confs: self.max_confs,
            pruning,
            executor: self.executor.unwrap_or_default(),
        })
    }
}
