//! Candidate enumeration and assignment between two sets of rows.
//!
//! Matching runs twice per table pair: once on raw retention times to
//! gather observations for model fitting, and once on corrected retention
//! times to settle the final row assignment.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::table::RowLike;
use crate::tolerance::{MzTolerance, RtTolerance};

/// The rules deciding whether two rows may describe the same analyte.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchSettings {
    pub mz_tolerance: MzTolerance,
    pub rt_tolerance: RtTolerance,
    /// Charges must agree under `Option` equality; a missing charge agrees
    /// only with another missing charge
    pub require_same_charge: bool,
    /// At least one annotation description must be shared
    pub require_same_annotation: bool,
}

impl MatchSettings {
    pub fn new(mz_tolerance: MzTolerance, rt_tolerance: RtTolerance) -> Self {
        Self {
            mz_tolerance,
            rt_tolerance,
            require_same_charge: false,
            require_same_annotation: false,
        }
    }
}

/// A candidate correspondence between a reference row and a candidate row,
/// with the coordinate distances that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowMatch {
    pub reference: usize,
    pub candidate: usize,
    pub mz_distance: f64,
    pub rt_distance: f64,
}

/// Enumerate every `(reference, candidate)` index pair whose m/z and
/// retention time fall within tolerance and whose charge/annotation
/// constraints, when required, agree. Several candidates per reference row
/// are possible; [`assign_greedy`] resolves them to a 1:1 assignment.
///
/// Windows are centered on the reference row's coordinates. Matches are
/// produced in reference-row order.
pub fn candidate_pairs<R: RowLike, C: RowLike>(
    reference: &[R],
    candidates: &[C],
    settings: &MatchSettings,
) -> Vec<RowMatch> {
    let mut matches = Vec::new();
    for (i, r) in reference.iter().enumerate() {
        for (j, c) in candidates.iter().enumerate() {
            if !settings.mz_tolerance.contains(r.mz(), c.mz()) {
                continue;
            }
            if !settings
                .rt_tolerance
                .contains(r.rt() as f64, c.rt() as f64)
            {
                continue;
            }
            if settings.require_same_charge && r.charge() != c.charge() {
                continue;
            }
            if settings.require_same_annotation && !r.shares_annotation(c) {
                continue;
            }
            matches.push(RowMatch {
                reference: i,
                candidate: j,
                mz_distance: (r.mz() - c.mz()).abs(),
                rt_distance: (r.rt() as f64 - c.rt() as f64).abs(),
            });
        }
    }
    matches
}

/// Resolve candidate matches to a 1:1 assignment.
///
/// Reference rows claim in table order; each takes its nearest still
/// unclaimed candidate, nearest retention time first, then nearest m/z.
/// Returns `(reference, candidate)` pairs; candidates left unclaimed are
/// absent.
pub fn assign_greedy(matches: &[RowMatch], n_candidates: usize) -> Vec<(usize, usize)> {
    let mut claimed = vec![false; n_candidates];
    let mut assignment = Vec::new();
    for (reference, group) in &matches.iter().group_by(|m| m.reference) {
        let best = group.filter(|m| !claimed[m.candidate]).min_by(|a, b| {
            a.rt_distance
                .total_cmp(&b.rt_distance)
                .then_with(|| a.mz_distance.total_cmp(&b.mz_distance))
        });
        if let Some(m) = best {
            claimed[m.candidate] = true;
            assignment.push((reference, m.candidate));
        }
    }
    assignment
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::annotation::IonAnnotation;
    use crate::table::FeatureTableRow;

    fn settings(mz_abs: f64, ppm: f64, rt: f64) -> MatchSettings {
        MatchSettings::new(MzTolerance::new(mz_abs, ppm), RtTolerance::new(rt, false))
    }

    fn rows(values: &[(f64, f32)]) -> Vec<FeatureTableRow> {
        values
            .iter()
            .enumerate()
            .map(|(i, &(mz, rt))| FeatureTableRow::new(i as u32, mz, rt))
            .collect()
    }

    #[test]
    fn test_pairs_within_tolerance() {
        let reference = rows(&[(500.0, 5.0), (600.0, 8.0)]);
        let candidates = rows(&[(500.002, 5.05), (600.5, 8.0), (600.001, 8.2)]);
        let matches = candidate_pairs(&reference, &candidates, &settings(0.003, 5.0, 0.1));
        assert_eq!(matches.len(), 1);
        assert_eq!((matches[0].reference, matches[0].candidate), (0, 0));
    }

    #[test]
    fn test_widening_tolerance_never_loses_pairs() {
        let reference = rows(&[(500.0, 5.0), (600.0, 8.0), (700.0, 11.0)]);
        let candidates = rows(&[(500.002, 5.05), (600.004, 8.15), (700.05, 11.0)]);
        let mut last = 0;
        for (mz_abs, rt) in [(0.001, 0.02), (0.003, 0.1), (0.01, 0.2), (0.1, 0.5)] {
            let found = candidate_pairs(&reference, &candidates, &settings(mz_abs, 5.0, rt)).len();
            assert!(found >= last);
            last = found;
        }
        assert_eq!(last, 3);
    }

    #[test]
    fn test_charge_gating() {
        let reference = vec![FeatureTableRow::new(0, 500.0, 5.0).with_charge(2)];
        let candidates = vec![
            FeatureTableRow::new(0, 500.0, 5.0),
            FeatureTableRow::new(1, 500.0005, 5.01).with_charge(2),
        ];
        let mut s = settings(0.003, 5.0, 0.1);
        s.require_same_charge = true;
        let matches = candidate_pairs(&reference, &candidates, &s);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].candidate, 1);

        // missing charge agrees only with missing charge
        let bare = vec![FeatureTableRow::new(0, 500.0, 5.0)];
        let matches = candidate_pairs(&bare, &candidates, &s);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].candidate, 0);
    }

    #[test]
    fn test_annotation_gating() {
        let reference =
            vec![FeatureTableRow::new(0, 500.0, 5.0)
                .with_annotation(IonAnnotation::new("PC(16:0/18:1)"))];
        let candidates = vec![
            FeatureTableRow::new(0, 500.0, 5.0).with_annotation(IonAnnotation::new("other")),
            FeatureTableRow::new(1, 500.0005, 5.01)
                .with_annotation(IonAnnotation::new("PC(16:0/18:1)")),
        ];
        let mut s = settings(0.003, 5.0, 0.1);
        s.require_same_annotation = true;
        let matches = candidate_pairs(&reference, &candidates, &s);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].candidate, 1);
    }

    #[test]
    fn test_greedy_prefers_nearest_rt_then_mz() {
        let reference = rows(&[(500.0, 5.0)]);
        let candidates = rows(&[(500.002, 5.08), (500.002, 5.02), (500.001, 5.02)]);
        let matches = candidate_pairs(&reference, &candidates, &settings(0.003, 5.0, 0.1));
        assert_eq!(matches.len(), 3);
        let assignment = assign_greedy(&matches, candidates.len());
        // equal rt distance between candidates 1 and 2, smaller mz wins
        assert_eq!(assignment, vec![(0, 2)]);
    }

    #[test]
    fn test_greedy_assignment_is_one_to_one() {
        let reference = rows(&[(500.0, 5.0), (500.001, 5.01)]);
        let candidates = rows(&[(500.0, 5.0), (500.001, 5.01)]);
        let matches = candidate_pairs(&reference, &candidates, &settings(0.01, 5.0, 0.5));
        // every pair is within tolerance of every other
        assert_eq!(matches.len(), 4);
        let assignment = assign_greedy(&matches, candidates.len());
        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment[0], (0, 0));
        assert_eq!(assignment[1], (1, 1));
    }
}
