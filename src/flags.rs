//! Methods for converting significance arrays into boolean flags, and for
//! flagging whole visibility cubes one baseline at a time.

use std::collections::VecDeque;
use std::fmt::Display;

use derive_builder::Builder;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::{trace, warn};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};
use rayon::prelude::*;

use crate::{
    error::{ShapeMismatch, XrfiError},
    metrics::MAD_TO_SIGMA,
    strategy::{strategy, StrategyDef},
};

/// What the iterative flagger does with the pass that trips the runaway
/// guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunawayPolicy {
    /// Keep the flags from the offending pass, then stop
    Halt,
    /// Drop the flags from the offending pass, then stop
    Revert,
}

/// Options for the iterative flagger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterFlagOpts {
    /// Threshold in robust standard deviations
    pub nsig: f64,
    /// Maximum number of passes
    pub max_iter: usize,
    /// Fraction of cells beyond which the runaway guard trips
    pub max_flag_frac: f64,
    /// What to do with the pass that trips the guard
    pub policy: RunawayPolicy,
}

impl Default for IterFlagOpts {
    fn default() -> Self {
        Self {
            nsig: 6.0,
            max_iter: 20,
            max_flag_frac: 0.5,
            policy: RunawayPolicy::Halt,
        }
    }
}

/// A warning-level record that the runaway guard tripped.
///
/// Partial flags remain scientifically usable, so this is attached to the
/// result rather than raised as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct RunawayReport {
    /// Fraction of cells flagged when the guard tripped
    pub flagged_frac: f64,
    /// The configured guard fraction
    pub max_flag_frac: f64,
    /// The pass (1-based) on which the guard tripped
    pub iteration: usize,
}

/// The result of running the iterative flagger over one array.
#[derive(Debug, Clone)]
pub struct IterFlagOutcome {
    /// Flags, a superset of the prior flags
    pub flags: Array2<bool>,
    /// Number of passes performed
    pub iterations: usize,
    /// Present if the runaway guard tripped
    pub runaway: Option<RunawayReport>,
}

/// Flag every cell whose significance magnitude exceeds `nsig`. NaN
/// significance never flags.
pub fn threshold_flag(sig: ArrayView2<f64>, nsig: f64) -> Array2<bool> {
    sig.mapv(|s| s.is_finite() && s.abs() > nsig)
}

/// Grow seed flags into adjacent cells whose significance magnitude exceeds
/// the (lower) watershed threshold `nsig_adj`.
///
/// Growth is 4-connected in (time, frequency) and repeats until no cell is
/// added, implemented with an explicit frontier queue rather than recursion.
/// The result is a superset of the seeds, and the operation is idempotent:
/// applying it again to its own output adds nothing.
///
/// # Errors
///
/// [`ShapeMismatch`] if `seeds` and `sig` disagree in shape.
pub fn watershed_flag(
    sig: ArrayView2<f64>,
    seeds: ArrayView2<bool>,
    nsig_adj: f64,
) -> Result<Array2<bool>, ShapeMismatch> {
    if seeds.dim() != sig.dim() {
        return Err(ShapeMismatch {
            argument: "seeds",
            function: "watershed_flag",
            expected: format!("{:?}", sig.dim()),
            received: format!("{:?}", seeds.dim()),
        });
    }
    let (num_times, num_freqs) = sig.dim();
    let mut flags = seeds.to_owned();
    let mut frontier: VecDeque<(usize, usize)> = flags
        .indexed_iter()
        .filter(|&(_, &flagged)| flagged)
        .map(|(idx, _)| idx)
        .collect();
    while let Some((t, f)) = frontier.pop_front() {
        let mut neighbours = [None; 4];
        if t > 0 {
            neighbours[0] = Some((t - 1, f));
        }
        if t + 1 < num_times {
            neighbours[1] = Some((t + 1, f));
        }
        if f > 0 {
            neighbours[2] = Some((t, f - 1));
        }
        if f + 1 < num_freqs {
            neighbours[3] = Some((t, f + 1));
        }
        for (nt, nf) in neighbours.into_iter().flatten() {
            let s = sig[[nt, nf]];
            if !flags[[nt, nf]] && s.is_finite() && s.abs() > nsig_adj {
                flags[[nt, nf]] = true;
                frontier.push_back((nt, nf));
            }
        }
    }
    Ok(flags)
}

/// Iteratively flag outliers against the robust statistics of the
/// currently-unflagged population.
///
/// Each pass recomputes the median and MAD of the unflagged finite cells of
/// `sig` and flags any cell further than `nsig` robust standard deviations
/// from the median. Passes stop on convergence (no new flags), after
/// `max_iter` passes, or when the runaway guard trips: if more than
/// `max_flag_frac` of cells end up flagged, no further flagging happens in
/// this array and a [`RunawayReport`] is attached to the outcome. Whether the
/// offending pass is kept or dropped is governed by [`RunawayPolicy`].
///
/// The returned flags are a superset of the prior flags.
///
/// # Errors
///
/// [`ShapeMismatch`] if `prior` is provided with a different shape to `sig`.
pub fn iterative_flag(
    sig: ArrayView2<f64>,
    prior: Option<ArrayView2<bool>>,
    opts: IterFlagOpts,
) -> Result<IterFlagOutcome, ShapeMismatch> {
    if let Some(ref prior) = prior {
        if prior.dim() != sig.dim() {
            return Err(ShapeMismatch {
                argument: "prior",
                function: "iterative_flag",
                expected: format!("{:?}", sig.dim()),
                received: format!("{:?}", prior.dim()),
            });
        }
    }
    let mut flags = prior.map_or_else(|| Array2::from_elem(sig.dim(), false), |p| p.to_owned());
    let num_cells = sig.len();
    let mut iterations = 0;
    let mut runaway = None;
    let mut population = Vec::with_capacity(num_cells);

    while iterations < opts.max_iter {
        iterations += 1;
        population.clear();
        population.extend(
            sig.iter()
                .zip(flags.iter())
                .filter(|&(s, &flagged)| !flagged && s.is_finite())
                .map(|(&s, _)| s),
        );
        if population.is_empty() {
            break;
        }
        population.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
        let med = population[population.len() / 2];
        let mut deviations: Vec<f64> = population.iter().map(|&v| (v - med).abs()).collect();
        deviations.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
        let scale = MAD_TO_SIGMA * deviations[deviations.len() / 2];
        if scale <= 0.0 {
            break;
        }

        let new_flags: Vec<(usize, usize)> = sig
            .indexed_iter()
            .filter(|&(idx, &s)| {
                !flags[idx] && s.is_finite() && ((s - med) / scale).abs() > opts.nsig
            })
            .map(|(idx, _)| idx)
            .collect();
        if new_flags.is_empty() {
            break;
        }
        for &idx in &new_flags {
            flags[idx] = true;
        }

        let flagged_frac =
            flags.iter().filter(|&&flagged| flagged).count() as f64 / num_cells as f64;
        if flagged_frac > opts.max_flag_frac {
            if opts.policy == RunawayPolicy::Revert {
                for &idx in &new_flags {
                    flags[idx] = false;
                }
            }
            warn!(
                "runaway flagging: {:.1}% of cells flagged on pass {} (guard at {:.1}%), stopping",
                100.0 * flagged_frac,
                iterations,
                100.0 * opts.max_flag_frac
            );
            runaway = Some(RunawayReport {
                flagged_frac,
                max_flag_frac: opts.max_flag_frac,
                iteration: iterations,
            });
            break;
        }
    }

    Ok(IterFlagOutcome {
        flags,
        iterations,
        runaway,
    })
}

/// Run a flagging strategy over every baseline of a visibility amplitude
/// cube with axes (time, frequency, baseline), in parallel.
///
/// Providing some existing flags is required, and they must be the same
/// dimension as the provided amplitude cube. If `re_apply_existing` is true,
/// each baseline's existing flags seed the strategy as prior flags and
/// survive into the result; otherwise they are ignored and overwritten by
/// the strategy's own flags.
///
/// Returns the per-baseline significance cube, and any runaway reports as
/// (baseline index, report) pairs.
///
/// # Errors
///
/// [`ShapeMismatch`] if `flag_array` and `amps_tfb` disagree in shape.
pub fn flag_vis_existing(
    strategy: &StrategyDef,
    amps_tfb: ArrayView3<f64>,
    flag_array: &mut Array3<bool>,
    re_apply_existing: bool,
    draw_progress: bool,
) -> Result<(Array3<f64>, Vec<(usize, RunawayReport)>), XrfiError> {
    trace!("start flag_vis_existing, strategy {}", strategy.name());

    if flag_array.dim() != amps_tfb.dim() {
        return Err(XrfiError::ShapeMismatch(ShapeMismatch {
            argument: "flag_array",
            function: "flag_vis_existing",
            expected: format!("{:?}", amps_tfb.dim()),
            received: format!("{:?}", flag_array.dim()),
        }));
    }

    let draw_target = if draw_progress {
        ProgressDrawTarget::stderr()
    } else {
        ProgressDrawTarget::hidden()
    };

    // The total flagging progress.
    let num_baselines = amps_tfb.dim().2;
    let flag_progress = ProgressBar::with_draw_target(Some(num_baselines as u64), draw_target);
    flag_progress.set_style(
        ProgressStyle::default_bar()
            .template("{msg:16}: [{elapsed_precise}] [{wide_bar:.cyan/blue}] {percent:3}% ({eta:5})")
            .unwrap()
            .progress_chars("=> "),
    );
    flag_progress.set_message("flagging b'lines");

    let mut sig_array = Array3::from_elem(amps_tfb.dim(), f64::NAN);

    let reports: Vec<Vec<(usize, RunawayReport)>> = amps_tfb
        .axis_iter(Axis(2))
        .into_par_iter()
        .zip(flag_array.axis_iter_mut(Axis(2)))
        .zip(sig_array.axis_iter_mut(Axis(2)))
        .enumerate()
        .map(|(baseline_idx, ((amps_baseline, mut flag_baseline), mut sig_baseline))| {
            let prior = if re_apply_existing {
                Some(flag_baseline.to_owned())
            } else {
                None
            };
            let outcome = strategy.run(amps_baseline, prior.as_ref().map(|p| p.view()))?;
            flag_baseline.assign(&outcome.flags);
            sig_baseline.assign(&outcome.significance);
            flag_progress.inc(1);
            Ok(outcome
                .runaway
                .into_iter()
                .map(|report| (baseline_idx, report))
                .collect())
        })
        .collect::<Result<Vec<_>, ShapeMismatch>>()?;

    flag_progress.finish();
    trace!("end flag_vis_existing");
    Ok((sig_array, reports.into_iter().flatten().collect()))
}

/// Shorthand for [`flag_vis_existing`] with a fresh flag array.
///
/// # Errors
///
/// See [`flag_vis_existing`].
pub fn flag_vis(
    strategy: &StrategyDef,
    amps_tfb: ArrayView3<f64>,
) -> Result<(Array3<bool>, Array3<f64>), XrfiError> {
    let mut flag_array = Array3::from_elem(amps_tfb.dim(), false);
    let (sig_array, _) = flag_vis_existing(strategy, amps_tfb, &mut flag_array, false, false)?;
    Ok((flag_array, sig_array))
}

/// Options for flagging a chunk of visibility data
#[derive(Builder, Debug, Clone)]
pub struct FlagOpts {
    /// The name of the flagging strategy to run
    #[builder(default = "String::from(\"h1c\")")]
    pub strategy: String,

    /// Whether existing flags seed the strategy and survive into the result
    #[builder(default = "true")]
    pub re_apply_existing: bool,

    /// Whether to draw progress bars
    #[builder(default = "true")]
    pub draw_progress: bool,
}

impl Display for FlagOpts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Will flag with strategy {}.", self.strategy)?;
        writeln!(
            f,
            "{} re-apply existing flags.",
            if self.re_apply_existing {
                "Will"
            } else {
                "Will not"
            }
        )?;
        Ok(())
    }
}

impl FlagOpts {
    /// A one line description of what flagging will do.
    pub fn as_comment(&self) -> String {
        format!(
            "flagging with {}{}",
            self.strategy,
            if self.re_apply_existing {
                ", re-applying existing flags"
            } else {
                ""
            }
        )
    }

    /// Look up the named strategy and run it over the amplitude cube.
    ///
    /// # Errors
    ///
    /// [`StrategyError`](crate::error::StrategyError) if the strategy name is
    /// unknown; otherwise see [`flag_vis_existing`].
    pub fn flag(
        &self,
        amps_tfb: ArrayView3<f64>,
        flag_array: &mut Array3<bool>,
    ) -> Result<(Array3<f64>, Vec<(usize, RunawayReport)>), XrfiError> {
        let strategy = strategy(&self.strategy)?;
        flag_vis_existing(
            strategy,
            amps_tfb,
            flag_array,
            self.re_apply_existing,
            self.draw_progress,
        )
    }
}
