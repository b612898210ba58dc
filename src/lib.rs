#![warn(missing_docs)]
#![warn(clippy::missing_safety_doc)]
#![warn(clippy::missing_errors_doc)]

//! xrfi is a library of statistical detection and flagging routines for
//! radio frequency interference (RFI) in radio interferometer data.
//!
//! Detectors turn (time, frequency) sample arrays into robust significance
//! scores, flaggers turn significance into boolean flags (fixed thresholds,
//! adaptive thresholds with a runaway guard, and watershed growth), and
//! named strategies chain them into reproducible step lists. Results live in
//! [`FlagSet`] containers that can be combined, thresholded and collapsed
//! across baselines, antennas and waterfalls.
//!
//! # Examples
//!
//! Here's an example of how to flag a visibility amplitude cube:
//!
//! ```rust
//! use xrfi::{flag_vis, ndarray::Array3, strategy};
//!
//! // a (time, frequency, baseline) amplitude cube: a structured background
//! // with one contaminated cell on the second baseline
//! let mut amps = Array3::from_shape_fn((32, 32, 2), |(t, f, b)| {
//!     10.0 + ((t * 31 + f * 17 + b * 7) % 13) as f64 * 0.1
//! });
//! amps[[16, 16, 1]] = 1000.0;
//!
//! // run the H1C observing-season strategy over every baseline
//! let h1c = strategy("h1c").unwrap();
//! let (flags, sig) = flag_vis(h1c, amps.view()).unwrap();
//!
//! assert!(flags[[16, 16, 1]]);
//! assert!(sig[[16, 16, 1]] > 6.0);
//! assert!(!flags[[16, 16, 0]]);
//! assert!(!flags[[0, 0, 0]]);
//! ```
//!
//! # Details
//!
//! The detection semantics follow the HERA H1C analysis: median-filter
//! detrending with windowed robust scale estimates, watershed growth from
//! threshold seeds, and NaN significance for degenerate windows so that a
//! bad cell never aborts a run. Strategies are data, not code: a validated
//! list of tagged steps, looked up by name from a fixed registry, so a
//! published strategy name always means the same flags.

pub mod error;
pub mod flags;
pub mod flagset;
pub mod metrics;
pub mod strategy;

#[cfg(test)]
pub(crate) mod test_common;

// Re-export the array crates so callers don't have to chase version
// compatibility.
pub use ndarray;
pub use num_complex;

pub use error::{FlagSetError, ShapeMismatch, StrategyError, XrfiError};
pub use flags::{
    flag_vis, flag_vis_existing, iterative_flag, threshold_flag, watershed_flag, FlagOpts,
    FlagOptsBuilder, IterFlagOpts, IterFlagOutcome, RunawayPolicy, RunawayReport,
};
pub use flagset::{FlagSet, SetData, SetKind, SetMode};
pub use metrics::{
    amps_from_complex, combine_metrics, detrend_medfilt, medfilt2d, windowed_zscore,
    MetricReduction, WindowHalfWidths,
};
pub use strategy::{strategy, strategy_names, StrategyDef, StrategyOutcome, StrategyStep};
