//! Alignment of LC-MS feature tables across independently processed runs.
//!
//! Retention time drifts unpredictably and nonlinearly between runs, so
//! rows describing the same analyte cannot be matched on raw coordinates
//! alone. [`RansacAligner`] robustly fits a retention time correction per
//! input table against the growing master row set, re-matches on the
//! corrected axis, and merges agreeing rows into one consolidated
//! [`FeatureTable`] in which every source row appears exactly once.

pub mod aligner;
pub mod annotation;
pub mod matching;
pub mod merge;
pub mod ransac;
pub mod table;
pub mod tolerance;

pub use aligner::{
    AlignmentError, AlignmentHandle, AlignmentOutcome, AlignmentState, RansacAligner,
    RansacAlignerSettings, Stage,
};
pub use annotation::IonAnnotation;
pub use matching::{MatchSettings, RowMatch};
pub use merge::{MasterRowSet, MergeError, MergedRow};
pub use ransac::{AlignmentModel, CorrectionCurve, ModelFamily, RansacFitter, RtPair};
pub use table::{ColumnKind, CorrectedRow, FeatureTable, FeatureTableRow, RowLike};
pub use tolerance::{MzTolerance, RtTolerance};
