//! Solver configuration.
use xsat_macros::DocDefault;

/// Polarity used when branching on a variable.
#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolarityMode {
    /// Use the last value assigned to the variable (phase saving).
    Auto,
    /// Always branch on the positive literal.
    Pos,
    /// Always branch on the negative literal.
    Neg,
    /// Use a pseudo random polarity.
    Rnd,
    /// Use the phase set through the solver API, ignoring phase saving.
    User,
}

/// Strategy used to schedule restarts.
#[derive(Copy, Clone, Eq, PartialEq, Debug, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartType {
    /// Luby sequence scaled by `luby_restart_interval_scale` conflicts.
    #[serde(alias = "static")]
    Luby,
    /// Restart when the short term glue average exceeds the long term average.
    #[serde(alias = "dynamic")]
    Glue,
}

/// Configurable parameters used during solving.
#[derive(DocDefault)]
pub struct SolverConfig {
    /// Amount of progress logging, 0 disables all progress output. (Default: 0)
    pub verbosity: u32,

    /// Give up after this many conflicts. (Default: u64::max_value())
    pub confl_limit: u64,

    /// Reserved, must be 1. Proof generation requires single threaded solving. (Default: 1)
    pub num_threads: u32,

    /// Polarity used when branching on a variable. (Default: PolarityMode::Auto)
    pub polarity_mode: PolarityMode,

    /// Strategy used to schedule restarts. (Default: RestartType::Luby)
    pub restart_type: RestartType,

    /// Multiplicative decay for the VSIDS decision heuristic. (Default: 0.95)
    pub vsids_decay: f32,

    /// Multiplicative decay for clause activities. (Default: 0.999)
    pub clause_activity_decay: f32,

    /// Number of conflicts between local clause reductions. (Default: 15000)
    pub reduce_locals_interval: u64,

    /// Number of conflicts between mid clause reductions. (Default: 10000)
    pub reduce_mids_interval: u64,

    /// Scaling factor for luby sequence based restarts (number of conflicts). (Default: 128)
    pub luby_restart_interval_scale: u64,

    /// Restart when the short term glue EMA exceeds the long term EMA times this margin. (Default: 1.25)
    pub restart_glue_margin: f64,

    /// Minimal number of conflicts between glue based restarts. (Default: 50)
    pub restart_glue_min_interval: u64,

    /// Number of conflicts between inprocessing batches. (Default: 20000)
    pub inprocess_interval: u64,

    /// Enable failed literal probing and hyper binary resolution. (Default: true)
    pub enable_probing: bool,

    /// Enable bounded variable elimination. (Default: true)
    pub enable_elim: bool,

    /// Enable XOR recovery from CNF and XOR conglomeration. (Default: true)
    pub enable_xor: bool,

    /// Enable incremental Gaussian elimination over the XOR clauses. (Default: true)
    pub enable_gauss: bool,

    /// Enable hyper binary resolution during probing. (Default: true)
    pub hyper_bin: bool,

    /// Bogoprop budget for a single probing pass. (Default: 2_000_000)
    pub probe_budget: u64,

    /// Disable hyper binary resolution for the next pass when it used more than this fraction of
    /// the probing budget. (Default: 0.8)
    pub probe_hyper_bin_cost_ratio: f64,

    /// Bogoprop budget for a single subsumption and elimination pass. (Default: 4_000_000)
    pub subsume_budget: u64,

    /// Skip variable elimination for variables with more occurrences of a polarity. (Default: 16)
    pub elim_occurrence_limit: usize,

    /// Allow this many more resolvents than eliminated originals. (Default: 0)
    pub elim_grow_limit: usize,

    /// Maximal width of XOR constraints recovered from CNF clauses. (Default: 6)
    pub xor_finder_max_width: usize,

    /// Minimal number of connected XOR clauses to form a Gaussian elimination matrix. (Default: 3)
    pub gauss_min_xors: usize,

    /// Number of decision levels between Gaussian elimination matrix snapshots. (Default: 2)
    pub gauss_snapshot_interval: usize,
}

impl SolverConfig {
    /// Human readable listing of all config options and their defaults, for `--config-option help`
    /// style command line output.
    pub fn help() -> String {
        concat!(
            "verbosity: amount of progress logging (default: 0)\n",
            "confl_limit: give up after this many conflicts (default: unlimited)\n",
            "num_threads: reserved, must be 1 (default: 1)\n",
            "polarity_mode: branching polarity, one of auto|pos|neg|rnd|user (default: auto)\n",
            "restart_type: restart strategy, one of luby|glue (default: luby)\n",
            "vsids_decay: multiplicative decay for the VSIDS decision heuristic (default: 0.95)\n",
            "clause_activity_decay: multiplicative decay for clause activities (default: 0.999)\n",
            "reduce_locals_interval: conflicts between local clause reductions (default: 15000)\n",
            "reduce_mids_interval: conflicts between mid clause reductions (default: 10000)\n",
            "luby_restart_interval_scale: scaling factor for luby restarts (default: 128)\n",
            "restart_glue_margin: glue EMA ratio triggering dynamic restarts (default: 1.25)\n",
            "restart_glue_min_interval: minimal conflicts between glue restarts (default: 50)\n",
            "inprocess_interval: conflicts between inprocessing batches (default: 20000)\n",
            "enable_probing: failed literal probing (default: true)\n",
            "enable_elim: bounded variable elimination (default: true)\n",
            "enable_xor: XOR recovery and conglomeration (default: true)\n",
            "enable_gauss: Gaussian elimination over XOR clauses (default: true)\n",
            "hyper_bin: hyper binary resolution during probing (default: true)\n",
            "probe_budget: bogoprops per probing pass (default: 2000000)\n",
            "probe_hyper_bin_cost_ratio: budget fraction disabling hyper binary resolution (default: 0.8)\n",
            "subsume_budget: bogoprops per subsumption pass (default: 4000000)\n",
            "elim_occurrence_limit: occurrence cutoff for variable elimination (default: 16)\n",
            "elim_grow_limit: allowed clause count growth during elimination (default: 0)\n",
            "xor_finder_max_width: maximal width of recovered XORs (default: 6)\n",
            "gauss_min_xors: minimal matrix size for Gaussian elimination (default: 3)\n",
            "gauss_snapshot_interval: levels between Gauss matrix snapshots (default: 2)\n",
        )
        .to_owned()
    }
}

macro_rules! config_update {
    ($($field:ident: $type:ty,)*) => {
        /// A partial update to a [`SolverConfig`].
        ///
        /// Fields left as `None` leave the corresponding [`SolverConfig`] field unchanged when
        /// applied.
        #[derive(Default, Clone, serde::Deserialize)]
        #[serde(default)]
        pub struct SolverConfigUpdate {
            $(pub $field: Option<$type>,)*
        }

        impl SolverConfigUpdate {
            /// An update that changes nothing.
            pub fn new() -> SolverConfigUpdate {
                SolverConfigUpdate::default()
            }

            /// Overlay another update's set fields on top of this one.
            pub fn merge(&mut self, other: SolverConfigUpdate) {
                $(
                    if other.$field.is_some() {
                        self.$field = other.$field;
                    }
                )*
            }

            /// Apply this update's set fields to a [`SolverConfig`].
            pub fn apply_to(&self, config: &mut SolverConfig) {
                $(
                    if let Some(value) = self.$field {
                        config.$field = value;
                    }
                )*
            }
        }
    };
}

config_update! {
    verbosity: u32,
    confl_limit: u64,
    num_threads: u32,
    polarity_mode: PolarityMode,
    restart_type: RestartType,
    vsids_decay: f32,
    clause_activity_decay: f32,
    reduce_locals_interval: u64,
    reduce_mids_interval: u64,
    luby_restart_interval_scale: u64,
    restart_glue_margin: f64,
    restart_glue_min_interval: u64,
    inprocess_interval: u64,
    enable_probing: bool,
    enable_elim: bool,
    enable_xor: bool,
    enable_gauss: bool,
    hyper_bin: bool,
    probe_budget: u64,
    probe_hyper_bin_cost_ratio: f64,
    subsume_budget: u64,
    elim_occurrence_limit: usize,
    elim_grow_limit: usize,
    xor_finder_max_width: usize,
    gauss_min_xors: usize,
    gauss_snapshot_interval: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_docs() {
        let config = SolverConfig::default();
        assert_eq!(config.num_threads, 1);
        assert_eq!(config.polarity_mode, PolarityMode::Auto);
        assert_eq!(config.restart_type, RestartType::Luby);
        assert_eq!(config.reduce_locals_interval, 15000);
        assert!(config.enable_xor);
    }

    #[test]
    fn update_merge_and_apply() {
        let mut config = SolverConfig::default();

        let mut update = SolverConfigUpdate::new();
        update.vsids_decay = Some(0.9);

        let mut other = SolverConfigUpdate::new();
        other.vsids_decay = Some(0.8);
        other.enable_gauss = Some(false);

        update.merge(other);
        update.apply_to(&mut config);

        assert_eq!(config.vsids_decay, 0.8);
        assert!(!config.enable_gauss);
    }
}
