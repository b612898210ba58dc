//! Detector primitives: turning (time, frequency) sample arrays into
//! significance arrays, and combining significance arrays from several
//! detectors.
//!
//! All detectors share the same contract: given a real 2D amplitude array and
//! an optional mask of prior flags, produce a same-shaped array of robust
//! significance scores. Cells whose local statistics are degenerate (an
//! entirely pre-flagged window, or a zero scale estimate) come out as NaN and
//! are excluded from every subsequent threshold comparison and reduction —
//! they never abort a run.

use ndarray::{Array2, ArrayView2};
use num_complex::Complex;

use crate::error::ShapeMismatch;

/// Scale factor converting a median absolute deviation into an estimate of
/// the standard deviation of Gaussian noise.
pub const MAD_TO_SIGMA: f64 = 1.4826;

/// Median of the squared residuals of unit-variance Gaussian noise. Dividing
/// a windowed median of squared residuals by this value estimates the
/// variance.
const MEDIAN_SQ_TO_VAR: f64 = 0.456;

/// Half-widths of the sliding window used by the windowed detectors, in
/// samples along the time and frequency axes. A window extends `time` cells
/// either side of the centre in time and `freq` cells in frequency, clamped
/// at the array boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowHalfWidths {
    /// Half-width along the time axis
    pub time: usize,
    /// Half-width along the frequency axis
    pub freq: usize,
}

/// Order-independent reductions for fusing several significance arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricReduction {
    /// The largest magnitude among the inputs
    MaxAbs,
    /// Root mean square of the inputs
    QuadMean,
    /// Mean magnitude of the inputs
    AbsMean,
}

impl MetricReduction {
    pub(crate) fn name(self) -> &'static str {
        match self {
            MetricReduction::MaxAbs => "maxabs",
            MetricReduction::QuadMean => "quadmean",
            MetricReduction::AbsMean => "absmean",
        }
    }
}

/// Reduce an iterator of metric values, skipping NaNs. NaN is returned only
/// when every input is NaN (or the iterator is empty).
pub(crate) fn nan_reduce(values: impl Iterator<Item = f64>, reduction: MetricReduction) -> f64 {
    let mut count = 0_usize;
    let mut acc = 0.0_f64;
    for v in values.filter(|v| v.is_finite()) {
        count += 1;
        match reduction {
            MetricReduction::MaxAbs => acc = acc.max(v.abs()),
            MetricReduction::QuadMean => acc += v * v,
            MetricReduction::AbsMean => acc += v.abs(),
        }
    }
    if count == 0 {
        return f64::NAN;
    }
    match reduction {
        MetricReduction::MaxAbs => acc,
        MetricReduction::QuadMean => (acc / count as f64).sqrt(),
        MetricReduction::AbsMean => acc / count as f64,
    }
}

/// Median of a scratch buffer of finite values. Sorts in place; the midpoint
/// average is used for even counts.
fn median_in_place(buf: &mut [f64]) -> Option<f64> {
    if buf.is_empty() {
        return None;
    }
    buf.sort_unstable_by(|a, b| a.partial_cmp(b).unwrap());
    let mid = buf.len() / 2;
    if buf.len() % 2 == 0 {
        Some((buf[mid - 1] + buf[mid]) / 2.0)
    } else {
        Some(buf[mid])
    }
}

/// Check that an optional prior-flag mask matches the data shape.
fn check_prior(
    data: &ArrayView2<f64>,
    prior: Option<&ArrayView2<bool>>,
    function: &'static str,
) -> Result<(), ShapeMismatch> {
    if let Some(prior) = prior {
        if prior.dim() != data.dim() {
            return Err(ShapeMismatch {
                argument: "prior",
                function,
                expected: format!("{:?}", data.dim()),
                received: format!("{:?}", prior.dim()),
            });
        }
    }
    Ok(())
}

/// Gather the finite, unflagged values of the window centred on
/// (`t`, `f`) into `buf`. Windows are clamped at the array boundary, so a
/// corner cell sees roughly a quarter window rather than an error.
fn gather_window(
    data: &ArrayView2<f64>,
    prior: Option<&ArrayView2<bool>>,
    t: usize,
    f: usize,
    widths: WindowHalfWidths,
    buf: &mut Vec<f64>,
) {
    let (num_times, num_freqs) = data.dim();
    buf.clear();
    let t_range = t.saturating_sub(widths.time)..(t + widths.time + 1).min(num_times);
    for ti in t_range {
        let f_range = f.saturating_sub(widths.freq)..(f + widths.freq + 1).min(num_freqs);
        for fi in f_range {
            if prior.map_or(false, |p| p[[ti, fi]]) {
                continue;
            }
            let v = data[[ti, fi]];
            if v.is_finite() {
                buf.push(v);
            }
        }
    }
}

/// Convert a 2D array of complex visibilities to amplitudes for the
/// detectors.
pub fn amps_from_complex(vis: ArrayView2<Complex<f32>>) -> Array2<f64> {
    vis.mapv(|v| f64::from(v.norm()))
}

/// Sliding-window median filter over a (time, frequency) array.
///
/// Prior-flagged and non-finite cells are excluded from each window's
/// statistics. A window with nothing left in it produces NaN. Windows are
/// truncated at the array boundary rather than erroring.
///
/// # Errors
///
/// [`ShapeMismatch`] if `prior` is provided with a different shape to `data`.
pub fn medfilt2d(
    data: ArrayView2<f64>,
    prior: Option<ArrayView2<bool>>,
    widths: WindowHalfWidths,
) -> Result<Array2<f64>, ShapeMismatch> {
    check_prior(&data, prior.as_ref(), "medfilt2d")?;
    let mut buf = Vec::with_capacity((2 * widths.time + 1) * (2 * widths.freq + 1));
    let mut out = Array2::from_elem(data.dim(), f64::NAN);
    for ((t, f), o) in out.indexed_iter_mut() {
        gather_window(&data, prior.as_ref(), t, f, widths, &mut buf);
        if let Some(med) = median_in_place(&mut buf) {
            *o = med;
        }
    }
    Ok(out)
}

/// Windowed robust-statistic detector.
///
/// For each cell, the median and median absolute deviation of the local
/// window (excluding prior-flagged cells) estimate the background location
/// and scale; the significance is `(value - median) / (1.4826 * MAD)`.
/// A cell whose window is entirely pre-flagged, or whose scale estimate is
/// zero, gets NaN significance.
///
/// # Errors
///
/// [`ShapeMismatch`] if `prior` is provided with a different shape to `data`.
pub fn windowed_zscore(
    data: ArrayView2<f64>,
    prior: Option<ArrayView2<bool>>,
    widths: WindowHalfWidths,
) -> Result<Array2<f64>, ShapeMismatch> {
    check_prior(&data, prior.as_ref(), "windowed_zscore")?;
    let mut buf = Vec::with_capacity((2 * widths.time + 1) * (2 * widths.freq + 1));
    let mut out = Array2::from_elem(data.dim(), f64::NAN);
    for ((t, f), o) in out.indexed_iter_mut() {
        let v = data[[t, f]];
        if !v.is_finite() {
            continue;
        }
        gather_window(&data, prior.as_ref(), t, f, widths, &mut buf);
        let Some(med) = median_in_place(&mut buf) else {
            continue;
        };
        for b in buf.iter_mut() {
            *b = (*b - med).abs();
        }
        let mad = median_in_place(&mut buf).unwrap();
        let scale = MAD_TO_SIGMA * mad;
        if scale > 0.0 {
            *o = (v - med) / scale;
        }
    }
    Ok(out)
}

/// Median-filter-residual detector.
///
/// Smooths the array with [`medfilt2d`], subtracts the smooth background,
/// then normalizes the residual by a windowed robust scale estimate
/// `sqrt(medfilt2d(residual^2) / 0.456)`. This exposes narrow-band or
/// short-duration outliers riding on a slowly varying background.
///
/// # Errors
///
/// [`ShapeMismatch`] if `prior` is provided with a different shape to `data`.
pub fn detrend_medfilt(
    data: ArrayView2<f64>,
    prior: Option<ArrayView2<bool>>,
    widths: WindowHalfWidths,
) -> Result<Array2<f64>, ShapeMismatch> {
    check_prior(&data, prior.as_ref(), "detrend_medfilt")?;
    let smooth = medfilt2d(data, prior, widths)?;
    let residual = &data - &smooth;
    let residual_sq = residual.mapv(|r| r * r);
    let scale_sq = medfilt2d(residual_sq.view(), prior, widths)?;
    let mut out = Array2::from_elem(data.dim(), f64::NAN);
    for (o, (&r, &s2)) in out.iter_mut().zip(residual.iter().zip(scale_sq.iter())) {
        let scale = (s2 / MEDIAN_SQ_TO_VAR).sqrt();
        if r.is_finite() && scale.is_finite() && scale > 0.0 {
            *o = r / scale;
        }
    }
    Ok(out)
}

/// Fuse several significance arrays of identical shape into one with an
/// order-independent reduction.
///
/// NaN inputs are treated as absent; a cell of the result is NaN only when
/// every input is NaN there.
///
/// # Errors
///
/// [`ShapeMismatch`] if `stack` is empty or its members disagree in shape.
pub fn combine_metrics(
    stack: &[ArrayView2<f64>],
    reduction: MetricReduction,
) -> Result<Array2<f64>, ShapeMismatch> {
    let Some(first) = stack.first() else {
        return Err(ShapeMismatch {
            argument: "stack",
            function: "combine_metrics",
            expected: "at least one metric array".into(),
            received: "0 arrays".into(),
        });
    };
    let dim = first.dim();
    for metric in &stack[1..] {
        if metric.dim() != dim {
            return Err(ShapeMismatch {
                argument: "stack",
                function: "combine_metrics",
                expected: format!("{dim:?}"),
                received: format!("{:?}", metric.dim()),
            });
        }
    }
    Ok(Array2::from_shape_fn(dim, |idx| {
        nan_reduce(stack.iter().map(|metric| metric[idx]), reduction)
    }))
}
