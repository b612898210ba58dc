//! Flagging strategies: named, ordered compositions of detector, combiner
//! and flagger steps.
//!
//! A strategy is pure data — a validated list of tagged step descriptors —
//! plus [`StrategyDef::run`], which threads a sample array, its accumulated
//! significance and its accumulated flags through the steps. Named
//! strategies are fixed, versioned configurations: downstream science
//! reproducibility depends on their identity, so changing a named strategy's
//! steps or thresholds is a breaking change that must be published under a
//! new name.

use std::collections::BTreeMap;

use itertools::Itertools;
use lazy_static::lazy_static;
use log::trace;
use ndarray::{Array2, ArrayView2};

use crate::{
    error::{ShapeMismatch, StrategyError},
    flags::{
        iterative_flag, threshold_flag, watershed_flag, IterFlagOpts, RunawayReport,
    },
    metrics::{
        combine_metrics, detrend_medfilt, windowed_zscore, MetricReduction, WindowHalfWidths,
    },
};

/// One step of a flagging strategy.
///
/// Steps are tagged variants rather than boxed closures so that strategies
/// stay inspectable and versionable.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategyStep {
    /// The median-filter-residual detector
    /// ([`detrend_medfilt`](crate::metrics::detrend_medfilt))
    DetrendMedfilt {
        /// Sliding-window half-widths
        widths: WindowHalfWidths,
    },
    /// The windowed robust z-score detector
    /// ([`windowed_zscore`](crate::metrics::windowed_zscore))
    WindowedZscore {
        /// Sliding-window half-widths
        widths: WindowHalfWidths,
    },
    /// Fuse every significance array produced so far into one
    CombineMetrics {
        /// The order-independent reduction to fuse with
        reduction: MetricReduction,
    },
    /// Flag cells whose significance magnitude exceeds `nsig`
    ThresholdFlag {
        /// Threshold in robust standard deviations
        nsig: f64,
    },
    /// Grow the accumulated flags into adjacent cells above the (lower)
    /// watershed threshold
    WatershedFlag {
        /// Watershed threshold in robust standard deviations
        nsig_adj: f64,
    },
    /// Iteratively flag against the statistics of the unflagged population,
    /// with a runaway guard
    IterativeFlag {
        /// Options for the iterative flagger
        opts: IterFlagOpts,
    },
}

impl StrategyStep {
    fn kind_name(&self) -> &'static str {
        match self {
            StrategyStep::DetrendMedfilt { .. } => "detrend_medfilt",
            StrategyStep::WindowedZscore { .. } => "windowed_zscore",
            StrategyStep::CombineMetrics { .. } => "combine_metrics",
            StrategyStep::ThresholdFlag { .. } => "threshold_flag",
            StrategyStep::WatershedFlag { .. } => "watershed_flag",
            StrategyStep::IterativeFlag { .. } => "iterative_flag",
        }
    }

    fn is_detector(&self) -> bool {
        matches!(
            self,
            StrategyStep::DetrendMedfilt { .. } | StrategyStep::WindowedZscore { .. }
        )
    }
}

/// The result of running a strategy over one (time, frequency) array.
#[derive(Debug, Clone)]
pub struct StrategyOutcome {
    /// The accumulated flags: a superset of the prior flags
    pub flags: Array2<bool>,
    /// The significance array as of the last detector or combiner step. NaN
    /// everywhere if the strategy ran no detector.
    pub significance: Array2<f64>,
    /// Runaway-guard reports from any iterative steps, in step order
    pub runaway: Vec<RunawayReport>,
}

/// A named, validated, immutable list of strategy steps.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyDef {
    name: String,
    steps: Vec<StrategyStep>,
}

impl StrategyDef {
    /// Validate a step list and wrap it as a strategy.
    ///
    /// # Errors
    ///
    /// [`StrategyError`] if the step list is empty, a parameter is out of
    /// range, or a combiner/flagger appears before any detector has produced
    /// a significance array. These are all construction-time errors: a
    /// strategy that constructs will not fail structurally during a run.
    pub fn new(name: impl Into<String>, steps: Vec<StrategyStep>) -> Result<Self, StrategyError> {
        let name = name.into();
        Self::validate(&name, &steps)?;
        Ok(Self { name, steps })
    }

    /// The strategy's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The strategy's steps.
    pub fn steps(&self) -> &[StrategyStep] {
        &self.steps
    }

    fn validate(name: &str, steps: &[StrategyStep]) -> Result<(), StrategyError> {
        if steps.is_empty() {
            return Err(StrategyError::EmptyStrategy { name: name.into() });
        }
        let bad_param = |index: usize, step: &'static str, reason: String| {
            Err(StrategyError::BadStepParam {
                name: name.into(),
                index,
                step,
                reason,
            })
        };
        let mut seen_detector = false;
        for (index, step) in steps.iter().enumerate() {
            let kind = step.kind_name();
            match step {
                StrategyStep::DetrendMedfilt { widths } | StrategyStep::WindowedZscore { widths } => {
                    if widths.time == 0 && widths.freq == 0 {
                        return bad_param(
                            index,
                            kind,
                            "window half-widths cannot both be zero".into(),
                        );
                    }
                }
                StrategyStep::CombineMetrics { .. } => {}
                StrategyStep::ThresholdFlag { nsig } => {
                    if !nsig.is_finite() || *nsig <= 0.0 {
                        return bad_param(index, kind, format!("nsig must be positive, got {nsig}"));
                    }
                }
                StrategyStep::WatershedFlag { nsig_adj } => {
                    if !nsig_adj.is_finite() || *nsig_adj <= 0.0 {
                        return bad_param(
                            index,
                            kind,
                            format!("nsig_adj must be positive, got {nsig_adj}"),
                        );
                    }
                }
                StrategyStep::IterativeFlag { opts } => {
                    if !opts.nsig.is_finite() || opts.nsig <= 0.0 {
                        return bad_param(
                            index,
                            kind,
                            format!("nsig must be positive, got {}", opts.nsig),
                        );
                    }
                    if opts.max_iter == 0 {
                        return bad_param(index, kind, "max_iter must be at least 1".into());
                    }
                    if !(opts.max_flag_frac > 0.0 && opts.max_flag_frac <= 1.0) {
                        return bad_param(
                            index,
                            kind,
                            format!(
                                "max_flag_frac must be in (0, 1], got {}",
                                opts.max_flag_frac
                            ),
                        );
                    }
                }
            }
            if step.is_detector() {
                seen_detector = true;
            } else if !seen_detector {
                return Err(StrategyError::MissingSignificance {
                    name: name.into(),
                    index,
                    step: kind,
                });
            }
        }
        Ok(())
    }

    /// Run the strategy over one (time, frequency) sample array.
    ///
    /// Flags accumulate from `prior` (or from nothing): once a cell is
    /// flagged it stays flagged for the rest of the run. Detectors exclude
    /// the accumulated flags from their window statistics, so a detector
    /// placed after a flagger sees the residual with earlier contamination
    /// masked out. Each detector pushes its significance onto a stack;
    /// [`StrategyStep::CombineMetrics`] collapses the stack; flaggers
    /// consume the most recent significance.
    ///
    /// # Errors
    ///
    /// [`ShapeMismatch`] if `prior` is provided with a different shape to
    /// `data`.
    pub fn run(
        &self,
        data: ArrayView2<f64>,
        prior: Option<ArrayView2<bool>>,
    ) -> Result<StrategyOutcome, ShapeMismatch> {
        if let Some(ref prior) = prior {
            if prior.dim() != data.dim() {
                return Err(ShapeMismatch {
                    argument: "prior",
                    function: "StrategyDef::run",
                    expected: format!("{:?}", data.dim()),
                    received: format!("{:?}", prior.dim()),
                });
            }
        }
        let mut flags =
            prior.map_or_else(|| Array2::from_elem(data.dim(), false), |p| p.to_owned());
        let mut significance = Array2::from_elem(data.dim(), f64::NAN);
        let mut metric_stack: Vec<Array2<f64>> = vec![];
        let mut runaway = vec![];

        for step in &self.steps {
            trace!("strategy {} step {}", self.name, step.kind_name());
            match step {
                StrategyStep::DetrendMedfilt { widths } => {
                    significance = detrend_medfilt(data, Some(flags.view()), *widths)?;
                    metric_stack.push(significance.clone());
                }
                StrategyStep::WindowedZscore { widths } => {
                    significance = windowed_zscore(data, Some(flags.view()), *widths)?;
                    metric_stack.push(significance.clone());
                }
                StrategyStep::CombineMetrics { reduction } => {
                    let views: Vec<ArrayView2<f64>> =
                        metric_stack.iter().map(Array2::view).collect();
                    significance = combine_metrics(&views, *reduction)?;
                    metric_stack = vec![significance.clone()];
                }
                StrategyStep::ThresholdFlag { nsig } => {
                    let new = threshold_flag(significance.view(), *nsig);
                    flags.zip_mut_with(&new, |acc, &n| *acc = *acc || n);
                }
                StrategyStep::WatershedFlag { nsig_adj } => {
                    flags = watershed_flag(significance.view(), flags.view(), *nsig_adj)?;
                }
                StrategyStep::IterativeFlag { opts } => {
                    let outcome = iterative_flag(significance.view(), Some(flags.view()), *opts)?;
                    flags = outcome.flags;
                    runaway.extend(outcome.runaway);
                }
            }
        }

        Ok(StrategyOutcome {
            flags,
            significance,
            runaway,
        })
    }
}

lazy_static! {
    /// The named strategies this build knows about.
    static ref STRATEGIES: BTreeMap<&'static str, StrategyDef> = {
        let mut registry = BTreeMap::new();
        let mut insert = |name: &'static str, steps: Vec<StrategyStep>| {
            let def = StrategyDef::new(name, steps).expect("builtin strategies are valid");
            registry.insert(name, def);
        };
        // a quick single-pass strategy for smoke tests and previews
        insert(
            "minimal",
            vec![
                StrategyStep::DetrendMedfilt {
                    widths: WindowHalfWidths { time: 8, freq: 8 },
                },
                StrategyStep::ThresholdFlag { nsig: 5.0 },
            ],
        );
        // the H1C observing-season strategy
        insert(
            "h1c",
            vec![
                StrategyStep::DetrendMedfilt {
                    widths: WindowHalfWidths { time: 8, freq: 8 },
                },
                StrategyStep::ThresholdFlag { nsig: 6.0 },
                StrategyStep::WatershedFlag { nsig_adj: 2.0 },
            ],
        );
        // H1C plus a second detector pass over the flagged residual, to
        // catch contamination masked by a strong first-pass signal
        insert(
            "h1c-twopass",
            vec![
                StrategyStep::DetrendMedfilt {
                    widths: WindowHalfWidths { time: 8, freq: 8 },
                },
                StrategyStep::ThresholdFlag { nsig: 6.0 },
                StrategyStep::WatershedFlag { nsig_adj: 2.0 },
                StrategyStep::WindowedZscore {
                    widths: WindowHalfWidths { time: 8, freq: 8 },
                },
                StrategyStep::CombineMetrics {
                    reduction: MetricReduction::MaxAbs,
                },
                StrategyStep::ThresholdFlag { nsig: 6.0 },
                StrategyStep::WatershedFlag { nsig_adj: 2.0 },
            ],
        );
        registry
    };
}

/// Look up a named strategy.
///
/// # Errors
///
/// [`StrategyError::UnknownStrategy`] if no strategy with that name is
/// registered.
pub fn strategy(name: &str) -> Result<&'static StrategyDef, StrategyError> {
    STRATEGIES
        .get(name)
        .ok_or_else(|| StrategyError::UnknownStrategy {
            name: name.into(),
            available: STRATEGIES.keys().join(", "),
        })
}

/// The names of every registered strategy, sorted.
pub fn strategy_names() -> Vec<&'static str> {
    STRATEGIES.keys().copied().collect()
}
