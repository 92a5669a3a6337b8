//! Robust fitting of retention time correction models.
//!
//! The candidate pairs feeding the fitter come from a tolerance match on
//! uncorrected retention times, so a large fraction of them are wrong.
//! Random sample consensus handles that: fit on a minimal random subset,
//! count how many observations the fitted curve explains, and keep the
//! best-supported curve seen across the iteration budget.

use nalgebra::{DMatrix, DVector};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// The correction curve family to search over.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    /// `rt' = slope * rt + intercept`
    #[default]
    Linear,
    /// `rt' = a2 * rt^2 + a1 * rt + a0`, for drifts a line cannot follow
    Quadratic,
}

impl ModelFamily {
    /// The smallest sample that determines a member of the family
    pub const fn minimum_points(&self) -> usize {
        match self {
            ModelFamily::Linear => 2,
            ModelFamily::Quadratic => 3,
        }
    }

    const fn degree(&self) -> usize {
        match self {
            ModelFamily::Linear => 1,
            ModelFamily::Quadratic => 2,
        }
    }
}

/// One observation linking a retention time in the run being corrected to
/// a retention time on the reference axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RtPair {
    /// RT in the run being corrected
    pub source: f64,
    /// RT on the reference axis
    pub target: f64,
}

impl RtPair {
    pub fn new(source: f64, target: f64) -> Self {
        Self { source, target }
    }
}

/// A fitted mapping from one run's retention time axis onto another's.
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectionCurve {
    /// Leave retention times untouched
    Identity,
    Linear {
        slope: f64,
        intercept: f64,
    },
    Quadratic {
        a2: f64,
        a1: f64,
        a0: f64,
    },
}

impl CorrectionCurve {
    pub fn correct(&self, rt: f64) -> f64 {
        match *self {
            CorrectionCurve::Identity => rt,
            CorrectionCurve::Linear { slope, intercept } => slope * rt + intercept,
            CorrectionCurve::Quadratic { a2, a1, a0 } => (a2 * rt + a1) * rt + a0,
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, CorrectionCurve::Identity)
    }

    /// Coefficients come back from the solver lowest order first
    fn from_coefficients(coefficients: &[f64]) -> Option<Self> {
        match *coefficients {
            [intercept, slope] => Some(CorrectionCurve::Linear { slope, intercept }),
            [a0, a1, a2] => Some(CorrectionCurve::Quadratic { a2, a1, a0 }),
            _ => None,
        }
    }
}

/// The outcome of a consensus fit: the curve, the observations supporting
/// it, the residual bound they satisfied, and the total inlier residual.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentModel {
    pub curve: CorrectionCurve,
    /// Indices into the observation list the curve was fitted against
    pub inliers: Vec<usize>,
    /// The largest absolute residual an inlier was allowed
    pub threshold: f64,
    /// Total absolute residual over the inliers
    pub residual: f64,
}

impl AlignmentModel {
    /// The do-nothing model used when no curve earns its keep
    pub fn identity() -> Self {
        Self {
            curve: CorrectionCurve::Identity,
            inliers: Vec::new(),
            threshold: 0.0,
            residual: 0.0,
        }
    }

    pub fn correct(&self, rt: f64) -> f64 {
        self.curve.correct(rt)
    }
}

/// Random sample consensus over retention time pairs.
///
/// Sampling is driven by a seeded [`StdRng`], so the same seed and input
/// always produce the same model.
#[derive(Debug)]
pub struct RansacFitter {
    pub family: ModelFamily,
    /// Largest absolute residual an observation may have and still count as
    /// an inlier
    pub threshold: f64,
    /// Sampling budget
    pub iterations: usize,
    rng: StdRng,
}

impl RansacFitter {
    pub fn new(family: ModelFamily, threshold: f64, iterations: usize, seed: u64) -> Self {
        Self {
            family,
            threshold,
            iterations,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Robustly fit a correction curve to `pairs`.
    ///
    /// Returns `None` when no member of the family is supported well enough
    /// to beat leaving retention times untouched: too few observations, no
    /// finite fit, or a consensus no larger than the identity mapping's.
    /// The caller recovers by using the identity model.
    pub fn fit(&mut self, pairs: &[RtPair]) -> Option<AlignmentModel> {
        let minimum = self.family.minimum_points();
        if pairs.len() < minimum {
            debug!(
                available = pairs.len(),
                required = minimum,
                "too few observations to fit a correction"
            );
            return None;
        }

        let mut best: Option<(Vec<usize>, f64)> = None;
        for _ in 0..self.iterations {
            let sample = rand::seq::index::sample(&mut self.rng, pairs.len(), minimum).into_vec();
            let Some(curve) = fit_least_squares(pairs, &sample, self.family.degree()) else {
                continue;
            };
            let (inliers, residual) = self.consensus(pairs, &curve);
            if inliers.len() < minimum {
                continue;
            }
            let better = match &best {
                None => true,
                Some((best_inliers, best_residual)) => {
                    inliers.len() > best_inliers.len()
                        || (inliers.len() == best_inliers.len() && residual < *best_residual)
                }
            };
            if better {
                best = Some((inliers, residual));
            }
        }

        let (inliers, _) = best?;

        // a curve that explains no more than raw tolerance matching would is
        // worse than doing nothing
        let (identity_inliers, _) = self.consensus(pairs, &CorrectionCurve::Identity);
        if inliers.len() <= identity_inliers.len() {
            debug!(
                consensus = inliers.len(),
                identity = identity_inliers.len(),
                "consensus no better than identity"
            );
            return None;
        }

        // refine on the full consensus set
        let curve = fit_least_squares(pairs, &inliers, self.family.degree())?;
        let residual = inliers
            .iter()
            .map(|&i| (curve.correct(pairs[i].source) - pairs[i].target).abs())
            .sum();
        Some(AlignmentModel {
            curve,
            inliers,
            threshold: self.threshold,
            residual,
        })
    }

    fn consensus(&self, pairs: &[RtPair], curve: &CorrectionCurve) -> (Vec<usize>, f64) {
        let mut inliers = Vec::new();
        let mut residual = 0.0;
        for (i, pair) in pairs.iter().enumerate() {
            let r = (curve.correct(pair.source) - pair.target).abs();
            if r <= self.threshold {
                inliers.push(i);
                residual += r;
            }
        }
        (inliers, residual)
    }
}

/// Least squares polynomial fit of `pairs[indices]` via SVD, lowest order
/// coefficient first. Degenerate subsets yield `None`.
fn fit_least_squares(pairs: &[RtPair], indices: &[usize], degree: usize) -> Option<CorrectionCurve> {
    if indices.len() < degree + 1 {
        return None;
    }
    let mut design = DMatrix::zeros(indices.len(), degree + 1);
    let mut observed = DVector::zeros(indices.len());
    for (row, &i) in indices.iter().enumerate() {
        let pair = pairs[i];
        let mut term = 1.0;
        for column in 0..=degree {
            design[(row, column)] = term;
            term *= pair.source;
        }
        observed[row] = pair.target;
    }
    let coefficients = design.svd(true, true).solve(&observed, 1e-10).ok()?;
    if !coefficients.iter().all(|c| c.is_finite()) {
        return None;
    }
    CorrectionCurve::from_coefficients(coefficients.as_slice())
}

#[cfg(test)]
mod test {
    use super::*;

    fn drifted_pairs(slope: f64, intercept: f64, n: usize) -> Vec<RtPair> {
        (0..n)
            .map(|i| {
                let rt = 2.0 + i as f64 * 0.7;
                RtPair::new(rt, slope * rt + intercept)
            })
            .collect()
    }

    #[test]
    fn test_recovers_linear_drift_through_outliers() {
        let mut pairs = drifted_pairs(1.05, 0.2, 20);
        // gross mismatches from the uncorrected match pass
        for i in 0..6 {
            pairs.push(RtPair::new(3.0 + i as f64, 11.0 - i as f64));
        }
        let mut fitter = RansacFitter::new(ModelFamily::Linear, 0.02, 500, 42);
        let model = fitter.fit(&pairs).expect("a supported model");
        assert_eq!(model.inliers.len(), 20);
        match model.curve {
            CorrectionCurve::Linear { slope, intercept } => {
                assert!((slope - 1.05).abs() < 1e-6);
                assert!((intercept - 0.2).abs() < 1e-6);
            }
            other => panic!("expected a linear curve, got {other:?}"),
        }
    }

    #[test]
    fn test_quadratic_family_follows_curved_drift() {
        let pairs: Vec<_> = (0..15)
            .map(|i| {
                let rt = 1.0 + i as f64 * 0.9;
                RtPair::new(rt, 0.002 * rt * rt + 1.01 * rt + 0.1)
            })
            .collect();
        let mut fitter = RansacFitter::new(ModelFamily::Quadratic, 0.01, 500, 7);
        let model = fitter.fit(&pairs).expect("a supported model");
        assert_eq!(model.inliers.len(), 15);
        assert!(model.residual < 1e-6);
        assert!(matches!(model.curve, CorrectionCurve::Quadratic { .. }));
    }

    #[test]
    fn test_same_seed_same_model() {
        let mut pairs = drifted_pairs(0.98, 0.4, 12);
        pairs.push(RtPair::new(5.0, 1.0));
        pairs.push(RtPair::new(9.0, 2.0));
        let model_a = RansacFitter::new(ModelFamily::Linear, 0.05, 200, 11).fit(&pairs);
        let model_b = RansacFitter::new(ModelFamily::Linear, 0.05, 200, 11).fit(&pairs);
        assert_eq!(model_a, model_b);
        assert!(model_a.is_some());
    }

    #[test]
    fn test_too_few_points_yields_no_model() {
        let pairs = drifted_pairs(1.0, 0.5, 1);
        let mut fitter = RansacFitter::new(ModelFamily::Linear, 0.05, 100, 0);
        assert!(fitter.fit(&pairs).is_none());

        let pairs = drifted_pairs(1.0, 0.5, 2);
        let mut fitter = RansacFitter::new(ModelFamily::Quadratic, 0.05, 100, 0);
        assert!(fitter.fit(&pairs).is_none());
    }

    #[test]
    fn test_identity_beats_unhelpful_model() {
        // observations already agree across runs, correcting buys nothing
        let pairs = drifted_pairs(1.0, 0.0, 10);
        let mut fitter = RansacFitter::new(ModelFamily::Linear, 0.05, 200, 3);
        assert!(fitter.fit(&pairs).is_none());
    }

    #[test]
    fn test_correction_curves_evaluate() {
        assert_eq!(CorrectionCurve::Identity.correct(4.2), 4.2);
        let line = CorrectionCurve::Linear {
            slope: 2.0,
            intercept: 1.0,
        };
        assert_eq!(line.correct(3.0), 7.0);
        let curve = CorrectionCurve::Quadratic {
            a2: 1.0,
            a1: 0.0,
            a0: -1.0,
        };
        assert_eq!(curve.correct(3.0), 8.0);
        assert!(CorrectionCurve::Identity.is_identity());
        assert!(!line.is_identity());
    }
}
