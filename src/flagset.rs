//! A container for flag and metric arrays across the three shapes they come
//! in: per-baseline, per-antenna, and waterfall.
//!
//! A [`FlagSet`] couples an array with its shape kind, its mode (boolean
//! flags or continuous significance metrics) and the coordinate metadata
//! needed to check that two sets line up before combining them. Sets are
//! immutable value objects: every transforming operation returns a new set,
//! so intermediate pipeline state can be inspected or rolled back.

use ndarray::{ArrayD, Axis, IxDyn};

use crate::{
    error::{FlagSetError, ShapeMismatch},
    metrics::{nan_reduce, MetricReduction},
};

/// The shape kind of a [`FlagSet`], with the identifiers of its leading
/// axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetKind {
    /// One (time, frequency, polarization) plane per cross-correlated
    /// antenna pair
    Baseline {
        /// The antenna pairs along the leading axis
        ant_pairs: Vec<(usize, usize)>,
    },
    /// One (time, frequency, polarization) plane per antenna
    Antenna {
        /// The antenna numbers along the leading axis
        ants: Vec<usize>,
    },
    /// A single (time, frequency, polarization) plane shared across all
    /// baselines and antennas
    Waterfall,
}

impl SetKind {
    /// The kind as a short lowercase name.
    pub fn name(&self) -> &'static str {
        match self {
            SetKind::Baseline { .. } => "baseline",
            SetKind::Antenna { .. } => "antenna",
            SetKind::Waterfall => "waterfall",
        }
    }
}

/// The mode of a [`FlagSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Boolean flags
    Flag,
    /// Continuous significance metrics
    Metric,
}

impl SetMode {
    /// The mode as a short lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            SetMode::Flag => "flag",
            SetMode::Metric => "metric",
        }
    }
}

/// The payload of a [`FlagSet`]; the variant is the set's mode.
#[derive(Debug, Clone, PartialEq)]
pub enum SetData {
    /// Boolean flags
    Flags(ArrayD<bool>),
    /// Continuous significance metrics
    Metrics(ArrayD<f64>),
}

impl SetData {
    fn shape(&self) -> &[usize] {
        match self {
            SetData::Flags(arr) => arr.shape(),
            SetData::Metrics(arr) => arr.shape(),
        }
    }
}

/// Repeat an array along a new leading axis.
fn broadcast_leading<T: Clone>(arr: &ArrayD<T>, size: usize) -> ArrayD<T> {
    let mut shape = vec![size];
    shape.extend_from_slice(arr.shape());
    arr.view()
        .insert_axis(Axis(0))
        .broadcast(IxDyn(&shape))
        .unwrap()
        .to_owned()
}

/// A flag or metric array, its shape kind, and the metadata needed to align
/// it with other sets.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagSet {
    kind: SetKind,
    data: SetData,
    times: Vec<f64>,
    freqs_hz: Vec<f64>,
    pols: Vec<String>,
}

impl FlagSet {
    /// Wrap an array as a flag set, checking that its shape is exactly what
    /// the kind and metadata imply:
    ///
    /// - baseline kind: `[num_ant_pairs, num_times, num_freqs, num_pols]`
    /// - antenna kind: `[num_ants, num_times, num_freqs, num_pols]`
    /// - waterfall kind: `[num_times, num_freqs, num_pols]`
    ///
    /// # Errors
    ///
    /// [`ShapeMismatch`] if the array shape disagrees with the metadata.
    pub fn new(
        kind: SetKind,
        data: SetData,
        times: Vec<f64>,
        freqs_hz: Vec<f64>,
        pols: Vec<String>,
    ) -> Result<Self, FlagSetError> {
        let mut expected = match &kind {
            SetKind::Baseline { ant_pairs } => vec![ant_pairs.len()],
            SetKind::Antenna { ants } => vec![ants.len()],
            SetKind::Waterfall => vec![],
        };
        expected.extend([times.len(), freqs_hz.len(), pols.len()]);
        if data.shape() != expected.as_slice() {
            return Err(FlagSetError::ShapeMismatch(ShapeMismatch {
                argument: "data",
                function: "FlagSet::new",
                expected: format!("{expected:?}"),
                received: format!("{:?}", data.shape()),
            }));
        }
        Ok(Self {
            kind,
            data,
            times,
            freqs_hz,
            pols,
        })
    }

    /// The set's shape kind.
    pub fn kind(&self) -> &SetKind {
        &self.kind
    }

    /// The set's mode, derived from its payload.
    pub fn mode(&self) -> SetMode {
        match self.data {
            SetData::Flags(_) => SetMode::Flag,
            SetData::Metrics(_) => SetMode::Metric,
        }
    }

    /// The shape of the stored array.
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Time centroids, seconds.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// Frequency channel centres, Hz.
    pub fn freqs_hz(&self) -> &[f64] {
        &self.freqs_hz
    }

    /// Polarization labels.
    pub fn pols(&self) -> &[String] {
        &self.pols
    }

    /// The flag array, if this is a flag-mode set.
    pub fn flags(&self) -> Option<&ArrayD<bool>> {
        match &self.data {
            SetData::Flags(arr) => Some(arr),
            SetData::Metrics(_) => None,
        }
    }

    /// The metric array, if this is a metric-mode set.
    pub fn metrics(&self) -> Option<&ArrayD<f64>> {
        match &self.data {
            SetData::Metrics(arr) => Some(arr),
            SetData::Flags(_) => None,
        }
    }

    /// Check that two sets can be combined: same kind with the same
    /// identifiers, same shape, same coordinates.
    fn check_compatible(&self, other: &Self, op: &'static str) -> Result<(), FlagSetError> {
        match (&self.kind, &other.kind) {
            (SetKind::Baseline { ant_pairs: a }, SetKind::Baseline { ant_pairs: b }) => {
                if a != b {
                    return Err(FlagSetError::MetadataMismatch {
                        op,
                        field: "ant_pairs",
                    });
                }
            }
            (SetKind::Antenna { ants: a }, SetKind::Antenna { ants: b }) => {
                if a != b {
                    return Err(FlagSetError::MetadataMismatch { op, field: "ants" });
                }
            }
            (SetKind::Waterfall, SetKind::Waterfall) => {}
            _ => {
                return Err(FlagSetError::KindMismatch {
                    op,
                    lhs: self.kind.name(),
                    rhs: other.kind.name(),
                })
            }
        }
        if self.shape() != other.shape() {
            return Err(FlagSetError::ShapeMismatch(ShapeMismatch {
                argument: "other",
                function: "FlagSet::check_compatible",
                expected: format!("{:?}", self.shape()),
                received: format!("{:?}", other.shape()),
            }));
        }
        if self.times != other.times {
            return Err(FlagSetError::MetadataMismatch { op, field: "times" });
        }
        if self.freqs_hz != other.freqs_hz {
            return Err(FlagSetError::MetadataMismatch {
                op,
                field: "freqs_hz",
            });
        }
        if self.pols != other.pols {
            return Err(FlagSetError::MetadataMismatch { op, field: "pols" });
        }
        Ok(())
    }

    /// Element-wise logical OR of two flag-mode sets.
    ///
    /// # Errors
    ///
    /// [`FlagSetError::ModeMismatch`] unless both sets are flag mode —
    /// metric sets must be converted with [`FlagSet::to_flag`] first — and
    /// the compatibility errors of kind/shape/metadata disagreement.
    pub fn or(&self, other: &Self) -> Result<Self, FlagSetError> {
        let (a, b) = match (&self.data, &other.data) {
            (SetData::Flags(a), SetData::Flags(b)) => (a, b),
            _ => {
                return Err(FlagSetError::ModeMismatch {
                    op: "or",
                    lhs: self.mode().name(),
                    rhs: other.mode().name(),
                })
            }
        };
        self.check_compatible(other, "or")?;
        let mut out = a.clone();
        out.zip_mut_with(b, |x, &y| *x = *x || y);
        Ok(Self {
            data: SetData::Flags(out),
            ..self.clone()
        })
    }

    /// Element-wise merge of two metric-mode sets with an order-independent
    /// reduction. A cell is NaN only where both inputs are NaN.
    ///
    /// # Errors
    ///
    /// [`FlagSetError::ModeMismatch`] unless both sets are metric mode, and
    /// the compatibility errors of kind/shape/metadata disagreement.
    pub fn combine_metrics_with(
        &self,
        other: &Self,
        reduction: MetricReduction,
    ) -> Result<Self, FlagSetError> {
        let (a, b) = match (&self.data, &other.data) {
            (SetData::Metrics(a), SetData::Metrics(b)) => (a, b),
            _ => {
                return Err(FlagSetError::ModeMismatch {
                    op: "combine",
                    lhs: self.mode().name(),
                    rhs: other.mode().name(),
                })
            }
        };
        self.check_compatible(other, "combine")?;
        let mut out = a.clone();
        out.zip_mut_with(b, |x, &y| *x = nan_reduce([*x, y].into_iter(), reduction));
        Ok(Self {
            data: SetData::Metrics(out),
            ..self.clone()
        })
    }

    /// Convert a metric-mode set to flag mode by thresholding: a cell is
    /// flagged where its metric magnitude exceeds `nsig`. NaN never flags.
    ///
    /// # Errors
    ///
    /// [`FlagSetError::WrongMode`] on a flag-mode set.
    pub fn to_flag(&self, nsig: f64) -> Result<Self, FlagSetError> {
        let SetData::Metrics(metrics) = &self.data else {
            return Err(FlagSetError::WrongMode {
                op: "to_flag",
                expected: "metric",
                received: self.mode().name(),
            });
        };
        let flags = metrics.mapv(|v| v.is_finite() && v.abs() > nsig);
        Ok(Self {
            data: SetData::Flags(flags),
            ..self.clone()
        })
    }

    /// Collapse a baseline- or antenna-kind set to waterfall kind by
    /// reducing over the leading axis: logical OR for flags, `reduction`
    /// for metrics (NaN inputs absent from the reduction).
    ///
    /// # Errors
    ///
    /// [`FlagSetError::WrongKind`] on a waterfall set.
    pub fn to_waterfall(&self, reduction: MetricReduction) -> Result<Self, FlagSetError> {
        if matches!(self.kind, SetKind::Waterfall) {
            return Err(FlagSetError::WrongKind {
                op: "to_waterfall",
                expected: "baseline or antenna",
                received: self.kind.name(),
            });
        }
        let data = match &self.data {
            SetData::Flags(flags) => {
                SetData::Flags(flags.map_axis(Axis(0), |lane| lane.iter().any(|&f| f)))
            }
            SetData::Metrics(metrics) => SetData::Metrics(
                metrics.map_axis(Axis(0), |lane| nan_reduce(lane.iter().copied(), reduction)),
            ),
        };
        Ok(Self {
            kind: SetKind::Waterfall,
            data,
            times: self.times.clone(),
            freqs_hz: self.freqs_hz.clone(),
            pols: self.pols.clone(),
        })
    }

    /// Broadcast a waterfall set up to baseline kind, repeating its plane
    /// for every antenna pair.
    ///
    /// # Errors
    ///
    /// [`FlagSetError::WrongKind`] on a non-waterfall set.
    pub fn to_baseline(&self, ant_pairs: Vec<(usize, usize)>) -> Result<Self, FlagSetError> {
        if !matches!(self.kind, SetKind::Waterfall) {
            return Err(FlagSetError::WrongKind {
                op: "to_baseline",
                expected: "waterfall",
                received: self.kind.name(),
            });
        }
        let data = match &self.data {
            SetData::Flags(flags) => SetData::Flags(broadcast_leading(flags, ant_pairs.len())),
            SetData::Metrics(metrics) => {
                SetData::Metrics(broadcast_leading(metrics, ant_pairs.len()))
            }
        };
        Ok(Self {
            kind: SetKind::Baseline { ant_pairs },
            data,
            times: self.times.clone(),
            freqs_hz: self.freqs_hz.clone(),
            pols: self.pols.clone(),
        })
    }

    /// Broadcast a waterfall set up to antenna kind, repeating its plane for
    /// every antenna.
    ///
    /// # Errors
    ///
    /// [`FlagSetError::WrongKind`] on a non-waterfall set.
    pub fn to_antenna(&self, ants: Vec<usize>) -> Result<Self, FlagSetError> {
        if !matches!(self.kind, SetKind::Waterfall) {
            return Err(FlagSetError::WrongKind {
                op: "to_antenna",
                expected: "waterfall",
                received: self.kind.name(),
            });
        }
        let data = match &self.data {
            SetData::Flags(flags) => SetData::Flags(broadcast_leading(flags, ants.len())),
            SetData::Metrics(metrics) => SetData::Metrics(broadcast_leading(metrics, ants.len())),
        };
        Ok(Self {
            kind: SetKind::Antenna { ants },
            data,
            times: self.times.clone(),
            freqs_hz: self.freqs_hz.clone(),
            pols: self.pols.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayD, IxDyn};

    use super::*;

    fn coords(num_times: usize, num_freqs: usize, num_pols: usize) -> (Vec<f64>, Vec<f64>, Vec<String>) {
        let times = (0..num_times).map(|t| 1e9 + t as f64 * 2.0).collect();
        let freqs_hz = (0..num_freqs).map(|f| 100e6 + f as f64 * 40e3).collect();
        let pols = ["XX", "YY", "XY", "YX"][..num_pols]
            .iter()
            .map(|p| p.to_string())
            .collect();
        (times, freqs_hz, pols)
    }

    fn waterfall_flags(num_times: usize, num_freqs: usize, num_pols: usize) -> FlagSet {
        let (times, freqs_hz, pols) = coords(num_times, num_freqs, num_pols);
        FlagSet::new(
            SetKind::Waterfall,
            SetData::Flags(ArrayD::from_elem(
                IxDyn(&[num_times, num_freqs, num_pols]),
                false,
            )),
            times,
            freqs_hz,
            pols,
        )
        .unwrap()
    }

    #[test]
    fn test_shape_invariant_baseline() {
        let (times, freqs_hz, pols) = coords(3, 4, 2);
        let ant_pairs = vec![(0, 1), (0, 2)];
        // 2 x 3 x 4 x 2: fine
        let good = FlagSet::new(
            SetKind::Baseline {
                ant_pairs: ant_pairs.clone(),
            },
            SetData::Flags(ArrayD::from_elem(IxDyn(&[2, 3, 4, 2]), false)),
            times.clone(),
            freqs_hz.clone(),
            pols.clone(),
        );
        assert!(good.is_ok());
        assert_eq!(good.unwrap().shape(), &[2, 3, 4, 2]);

        // wrong number of baselines: hard error, not a broadcast
        let bad = FlagSet::new(
            SetKind::Baseline { ant_pairs },
            SetData::Flags(ArrayD::from_elem(IxDyn(&[3, 3, 4, 2]), false)),
            times,
            freqs_hz,
            pols,
        );
        assert!(matches!(bad, Err(FlagSetError::ShapeMismatch(_))));
    }

    #[test]
    fn test_shape_invariant_waterfall() {
        let (times, freqs_hz, pols) = coords(3, 4, 1);
        let bad = FlagSet::new(
            SetKind::Waterfall,
            SetData::Flags(ArrayD::from_elem(IxDyn(&[4, 3, 1]), false)),
            times,
            freqs_hz,
            pols,
        );
        assert!(matches!(bad, Err(FlagSetError::ShapeMismatch(_))));
    }

    /// The worked scenario: A flags (3,4), B flags (3,4) and (5,5); their OR
    /// flags exactly those two cells.
    #[test]
    fn test_or_flags() {
        let mut a = waterfall_flags(8, 8, 1);
        let mut b = waterfall_flags(8, 8, 1);
        if let SetData::Flags(arr) = &mut a.data {
            arr[IxDyn(&[3, 4, 0])] = true;
        }
        if let SetData::Flags(arr) = &mut b.data {
            arr[IxDyn(&[3, 4, 0])] = true;
            arr[IxDyn(&[5, 5, 0])] = true;
        }
        let combined = a.or(&b).unwrap();
        let flags = combined.flags().unwrap();
        let flagged: Vec<_> = flags
            .indexed_iter()
            .filter(|&(_, &f)| f)
            .map(|(idx, _)| idx)
            .collect();
        assert_eq!(flagged.len(), 2);
        assert!(flags[IxDyn(&[3, 4, 0])]);
        assert!(flags[IxDyn(&[5, 5, 0])]);
        // immutable: the inputs are untouched
        assert_eq!(a.flags().unwrap().iter().filter(|&&f| f).count(), 1);
    }

    #[test]
    fn test_or_mode_mismatch() {
        let a = waterfall_flags(4, 4, 1);
        let (times, freqs_hz, pols) = coords(4, 4, 1);
        let b = FlagSet::new(
            SetKind::Waterfall,
            SetData::Metrics(ArrayD::from_elem(IxDyn(&[4, 4, 1]), 0.0)),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        assert!(matches!(a.or(&b), Err(FlagSetError::ModeMismatch { .. })));
    }

    #[test]
    fn test_or_metadata_mismatch() {
        let a = waterfall_flags(4, 4, 1);
        let mut b = waterfall_flags(4, 4, 1);
        b.times[0] += 1.0;
        assert!(matches!(
            a.or(&b),
            Err(FlagSetError::MetadataMismatch { field: "times", .. })
        ));
    }

    #[test]
    fn test_or_kind_mismatch() {
        let (times, freqs_hz, pols) = coords(4, 4, 1);
        let a = FlagSet::new(
            SetKind::Antenna { ants: vec![0] },
            SetData::Flags(ArrayD::from_elem(IxDyn(&[1, 4, 4, 1]), false)),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        let b = waterfall_flags(4, 4, 1);
        assert!(matches!(a.or(&b), Err(FlagSetError::KindMismatch { .. })));
    }

    /// The worked scenario: metrics [0.1, 6.2, 3.9] at cutoff 5 convert to
    /// [false, true, false].
    #[test]
    fn test_to_flag() {
        let (times, freqs_hz, pols) = coords(1, 3, 1);
        let mut metrics = ArrayD::from_elem(IxDyn(&[1, 3, 1]), 0.0);
        metrics[IxDyn(&[0, 0, 0])] = 0.1;
        metrics[IxDyn(&[0, 1, 0])] = 6.2;
        metrics[IxDyn(&[0, 2, 0])] = 3.9;
        let set = FlagSet::new(
            SetKind::Waterfall,
            SetData::Metrics(metrics),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        let flagged = set.to_flag(5.0).unwrap();
        assert_eq!(flagged.mode(), SetMode::Flag);
        let flags = flagged.flags().unwrap();
        assert!(!flags[IxDyn(&[0, 0, 0])]);
        assert!(flags[IxDyn(&[0, 1, 0])]);
        assert!(!flags[IxDyn(&[0, 2, 0])]);
    }

    #[test]
    fn test_to_flag_nan_never_flags() {
        let (times, freqs_hz, pols) = coords(1, 2, 1);
        let mut metrics = ArrayD::from_elem(IxDyn(&[1, 2, 1]), f64::NAN);
        metrics[IxDyn(&[0, 1, 0])] = 9.0;
        let set = FlagSet::new(
            SetKind::Waterfall,
            SetData::Metrics(metrics),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        let flags = set.to_flag(5.0).unwrap();
        assert!(!flags.flags().unwrap()[IxDyn(&[0, 0, 0])]);
        assert!(flags.flags().unwrap()[IxDyn(&[0, 1, 0])]);
    }

    #[test]
    fn test_to_flag_wrong_mode() {
        let set = waterfall_flags(2, 2, 1);
        assert!(matches!(
            set.to_flag(5.0),
            Err(FlagSetError::WrongMode { .. })
        ));
    }

    #[test]
    fn test_to_waterfall_flags_or() {
        let (times, freqs_hz, pols) = coords(2, 3, 1);
        let mut flags = ArrayD::from_elem(IxDyn(&[2, 2, 3, 1]), false);
        flags[IxDyn(&[0, 0, 1, 0])] = true;
        flags[IxDyn(&[1, 1, 2, 0])] = true;
        let set = FlagSet::new(
            SetKind::Baseline {
                ant_pairs: vec![(0, 1), (0, 2)],
            },
            SetData::Flags(flags),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        let waterfall = set.to_waterfall(MetricReduction::MaxAbs).unwrap();
        assert_eq!(waterfall.kind().name(), "waterfall");
        assert_eq!(waterfall.shape(), &[2, 3, 1]);
        let wf = waterfall.flags().unwrap();
        assert!(wf[IxDyn(&[0, 1, 0])]);
        assert!(wf[IxDyn(&[1, 2, 0])]);
        assert_eq!(wf.iter().filter(|&&f| f).count(), 2);
    }

    #[test]
    fn test_to_waterfall_metrics_reductions() {
        let (times, freqs_hz, pols) = coords(1, 1, 1);
        let mut metrics = ArrayD::from_elem(IxDyn(&[3, 1, 1, 1]), 0.0);
        metrics[IxDyn(&[0, 0, 0, 0])] = 3.0;
        metrics[IxDyn(&[1, 0, 0, 0])] = -4.0;
        metrics[IxDyn(&[2, 0, 0, 0])] = f64::NAN;
        let set = FlagSet::new(
            SetKind::Antenna {
                ants: vec![0, 1, 2],
            },
            SetData::Metrics(metrics),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        let maxabs = set.to_waterfall(MetricReduction::MaxAbs).unwrap();
        assert_abs_diff_eq!(maxabs.metrics().unwrap()[IxDyn(&[0, 0, 0])], 4.0);
        // the NaN antenna is absent from the mean
        let quadmean = set.to_waterfall(MetricReduction::QuadMean).unwrap();
        assert_abs_diff_eq!(
            quadmean.metrics().unwrap()[IxDyn(&[0, 0, 0])],
            12.5_f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_to_waterfall_all_nan_lane() {
        let (times, freqs_hz, pols) = coords(1, 1, 1);
        let metrics = ArrayD::from_elem(IxDyn(&[2, 1, 1, 1]), f64::NAN);
        let set = FlagSet::new(
            SetKind::Antenna { ants: vec![0, 1] },
            SetData::Metrics(metrics),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        let waterfall = set.to_waterfall(MetricReduction::MaxAbs).unwrap();
        assert!(waterfall.metrics().unwrap()[IxDyn(&[0, 0, 0])].is_nan());
    }

    #[test]
    fn test_to_waterfall_wrong_kind() {
        let set = waterfall_flags(2, 2, 1);
        assert!(matches!(
            set.to_waterfall(MetricReduction::MaxAbs),
            Err(FlagSetError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_to_baseline_broadcast() {
        let mut wf = waterfall_flags(2, 2, 1);
        if let SetData::Flags(arr) = &mut wf.data {
            arr[IxDyn(&[1, 0, 0])] = true;
        }
        let ant_pairs = vec![(0, 1), (0, 2), (1, 2)];
        let baseline = wf.to_baseline(ant_pairs.clone()).unwrap();
        assert_eq!(baseline.shape(), &[3, 2, 2, 1]);
        assert_eq!(
            baseline.kind(),
            &SetKind::Baseline { ant_pairs }
        );
        let flags = baseline.flags().unwrap();
        for baseline_idx in 0..3 {
            assert!(flags[IxDyn(&[baseline_idx, 1, 0, 0])]);
            assert!(!flags[IxDyn(&[baseline_idx, 0, 0, 0])]);
        }
    }

    #[test]
    fn test_to_antenna_broadcast_metrics() {
        let (times, freqs_hz, pols) = coords(1, 2, 1);
        let mut metrics = ArrayD::from_elem(IxDyn(&[1, 2, 1]), 0.0);
        metrics[IxDyn(&[0, 1, 0])] = 7.5;
        let wf = FlagSet::new(
            SetKind::Waterfall,
            SetData::Metrics(metrics),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        let per_ant = wf.to_antenna(vec![10, 20]).unwrap();
        assert_eq!(per_ant.shape(), &[2, 1, 2, 1]);
        assert_abs_diff_eq!(per_ant.metrics().unwrap()[IxDyn(&[1, 0, 1, 0])], 7.5);
    }

    #[test]
    fn test_to_baseline_wrong_kind() {
        let (times, freqs_hz, pols) = coords(2, 2, 1);
        let set = FlagSet::new(
            SetKind::Antenna { ants: vec![0] },
            SetData::Flags(ArrayD::from_elem(IxDyn(&[1, 2, 2, 1]), false)),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        assert!(matches!(
            set.to_baseline(vec![(0, 1)]),
            Err(FlagSetError::WrongKind { .. })
        ));
    }

    #[test]
    fn test_combine_metrics_with() {
        let (times, freqs_hz, pols) = coords(1, 2, 1);
        let mut a_arr = ArrayD::from_elem(IxDyn(&[1, 2, 1]), 0.0);
        a_arr[IxDyn(&[0, 0, 0])] = 3.0;
        a_arr[IxDyn(&[0, 1, 0])] = f64::NAN;
        let mut b_arr = ArrayD::from_elem(IxDyn(&[1, 2, 1]), 0.0);
        b_arr[IxDyn(&[0, 0, 0])] = -4.0;
        b_arr[IxDyn(&[0, 1, 0])] = 2.0;
        let a = FlagSet::new(
            SetKind::Waterfall,
            SetData::Metrics(a_arr),
            times.clone(),
            freqs_hz.clone(),
            pols.clone(),
        )
        .unwrap();
        let b = FlagSet::new(
            SetKind::Waterfall,
            SetData::Metrics(b_arr),
            times,
            freqs_hz,
            pols,
        )
        .unwrap();
        let combined = a.combine_metrics_with(&b, MetricReduction::MaxAbs).unwrap();
        let metrics = combined.metrics().unwrap();
        assert_abs_diff_eq!(metrics[IxDyn(&[0, 0, 0])], 4.0);
        // NaN on one side is absent, not contagious
        assert_abs_diff_eq!(metrics[IxDyn(&[0, 1, 0])], 2.0);
    }

    #[test]
    fn test_combine_metrics_with_mode_mismatch() {
        let a = waterfall_flags(2, 2, 1);
        let b = waterfall_flags(2, 2, 1);
        assert!(matches!(
            a.combine_metrics_with(&b, MetricReduction::MaxAbs),
            Err(FlagSetError::ModeMismatch { .. })
        ));
    }
}
