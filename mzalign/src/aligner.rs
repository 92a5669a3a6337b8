//! The alignment orchestrator.
//!
//! [`RansacAligner`] drives the whole multi-table alignment: the first
//! input table seeds the master row set, and every further table is
//! matched, retention-time corrected against the master, re-matched, and
//! merged in. The aligner is consumed by [`RansacAligner::align`], so each
//! instance runs exactly once; observers hold an [`AlignmentHandle`] for
//! state, progress, and cancellation.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::matching::{assign_greedy, candidate_pairs, MatchSettings};
use crate::merge::{MasterRowSet, MergeError};
use crate::ransac::{AlignmentModel, ModelFamily, RansacFitter, RtPair};
use crate::table::{CorrectedRow, FeatureTable, RowLike};
use crate::tolerance::{MzTolerance, RtTolerance};

/// Default RANSAC sampling budget per table pair
pub const DEFAULT_MAX_ITERATIONS: usize = 3000;

/// Where in the pipeline a failure occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Read,
    Match,
    Fit,
    Merge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Read => "reading",
            Stage::Match => "matching",
            Stage::Fit => "model fitting",
            Stage::Merge => "merging",
        };
        f.write_str(name)
    }
}

/// An error that aborts an alignment run
#[derive(Debug, Error)]
pub enum AlignmentError {
    #[error("no feature tables were provided")]
    EmptyInput,
    #[error("invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("failed while {stage} on table {table}: {source}")]
    Processing {
        table: String,
        stage: Stage,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
}

/// The complete parameter set for one alignment run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RansacAlignerSettings {
    pub mz_tolerance: MzTolerance,
    pub rt_tolerance: RtTolerance,
    pub require_same_charge: bool,
    pub require_same_annotation: bool,
    /// Name assigned to the output table
    pub output_name: String,
    /// Inlier residual bound as a fraction of the retention time tolerance
    /// window, in `[0, 1]`
    pub inlier_threshold: f64,
    pub model_family: ModelFamily,
    /// Seed for the per-table-pair sampling streams
    pub seed: u64,
    pub max_iterations: usize,
}

impl RansacAlignerSettings {
    pub fn new<S: Into<String>>(
        mz_tolerance: MzTolerance,
        rt_tolerance: RtTolerance,
        output_name: S,
        inlier_threshold: f64,
    ) -> Self {
        Self {
            mz_tolerance,
            rt_tolerance,
            require_same_charge: false,
            require_same_annotation: false,
            output_name: output_name.into(),
            inlier_threshold,
            model_family: ModelFamily::default(),
            seed: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn require_same_charge(mut self, value: bool) -> Self {
        self.require_same_charge = value;
        self
    }

    pub fn require_same_annotation(mut self, value: bool) -> Self {
        self.require_same_annotation = value;
        self
    }

    pub fn model_family(mut self, family: ModelFamily) -> Self {
        self.model_family = family;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn max_iterations(mut self, iterations: usize) -> Self {
        self.max_iterations = iterations;
        self
    }

    fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            mz_tolerance: self.mz_tolerance,
            rt_tolerance: self.rt_tolerance,
            require_same_charge: self.require_same_charge,
            require_same_annotation: self.require_same_annotation,
        }
    }

    fn validate(&self) -> Result<(), AlignmentError> {
        if !(self.mz_tolerance.absolute >= 0.0) || !(self.mz_tolerance.ppm >= 0.0) {
            return Err(AlignmentError::InvalidParameter {
                name: "mz_tolerance",
                reason: "windows must be non-negative".into(),
            });
        }
        if !(self.rt_tolerance.value >= 0.0) {
            return Err(AlignmentError::InvalidParameter {
                name: "rt_tolerance",
                reason: "the window must be non-negative".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.inlier_threshold) {
            return Err(AlignmentError::InvalidParameter {
                name: "inlier_threshold",
                reason: format!("{} does not lie in [0, 1]", self.inlier_threshold),
            });
        }
        if self.max_iterations == 0 {
            return Err(AlignmentError::InvalidParameter {
                name: "max_iterations",
                reason: "at least one sampling iteration is required".into(),
            });
        }
        Ok(())
    }
}

/// Lifecycle of one alignment run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignmentState {
    Created,
    Running,
    Finished,
    Canceled,
    Failed,
}

impl AlignmentState {
    fn encode(self) -> u8 {
        match self {
            AlignmentState::Created => 0,
            AlignmentState::Running => 1,
            AlignmentState::Finished => 2,
            AlignmentState::Canceled => 3,
            AlignmentState::Failed => 4,
        }
    }

    fn decode(value: u8) -> Self {
        match value {
            1 => AlignmentState::Running,
            2 => AlignmentState::Finished,
            3 => AlignmentState::Canceled,
            4 => AlignmentState::Failed,
            _ => AlignmentState::Created,
        }
    }
}

const PROGRESS_UNKNOWN: u64 = u64::MAX;

#[derive(Debug)]
struct HandleState {
    state: AtomicU8,
    cancel: AtomicBool,
    progress: AtomicU64,
}

impl Default for HandleState {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(AlignmentState::Created.encode()),
            cancel: AtomicBool::new(false),
            progress: AtomicU64::new(PROGRESS_UNKNOWN),
        }
    }
}

/// A shared view onto one alignment run: its state, fractional progress,
/// and a cooperative cancellation flag. Clones observe the same run, and
/// the handle stays valid after the aligner itself has been consumed.
#[derive(Debug, Default, Clone)]
pub struct AlignmentHandle {
    inner: Arc<HandleState>,
}

impl AlignmentHandle {
    pub fn state(&self) -> AlignmentState {
        AlignmentState::decode(self.inner.state.load(Ordering::Acquire))
    }

    /// Fraction of input tables folded into the master set so far, or
    /// `None` before the first table has been processed
    pub fn progress(&self) -> Option<f64> {
        match self.inner.progress.load(Ordering::Acquire) {
            PROGRESS_UNKNOWN => None,
            bits => Some(f64::from_bits(bits)),
        }
    }

    /// Ask the run to stop at the next safe point. Idempotent; the flag is
    /// polled once per table, so one table pair may still complete.
    pub fn cancel(&self) {
        self.inner.cancel.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.inner.cancel.load(Ordering::Acquire)
    }

    fn set_state(&self, state: AlignmentState) {
        self.inner.state.store(state.encode(), Ordering::Release);
    }

    fn set_progress(&self, fraction: f64) {
        self.inner
            .progress
            .store(fraction.to_bits(), Ordering::Release);
    }
}

/// What a run that did not fail produced
#[derive(Debug, Clone)]
pub enum AlignmentOutcome {
    /// The consolidated feature table
    Finished(FeatureTable),
    /// A cancellation request was observed; there is no result
    Canceled,
}

impl AlignmentOutcome {
    pub fn into_table(self) -> Option<FeatureTable> {
        match self {
            AlignmentOutcome::Finished(table) => Some(table),
            AlignmentOutcome::Canceled => None,
        }
    }
}

/// Aligns feature tables from independently processed runs into one
/// consolidated table.
///
/// ```
/// use mzalign::{
///     FeatureTable, FeatureTableRow, MzTolerance, RansacAligner,
///     RansacAlignerSettings, RtTolerance,
/// };
///
/// let run_1 = FeatureTable::with_rows(
///     "run 1",
///     vec![FeatureTableRow::new(0, 720.5551, 10.50)],
/// );
/// let run_2 = FeatureTable::with_rows(
///     "run 2",
///     vec![FeatureTableRow::new(0, 720.5553, 10.55)],
/// );
///
/// let settings = RansacAlignerSettings::new(
///     MzTolerance::new(0.003, 5.0),
///     RtTolerance::new(0.1, false),
///     "aligned",
///     0.4,
/// );
/// let aligner = RansacAligner::new(settings)?;
/// let output = aligner
///     .align(&[run_1, run_2])?
///     .into_table()
///     .expect("not canceled");
/// assert_eq!(output.len(), 1);
/// # Ok::<(), mzalign::AlignmentError>(())
/// ```
#[derive(Debug)]
pub struct RansacAligner {
    settings: RansacAlignerSettings,
    handle: AlignmentHandle,
}

impl RansacAligner {
    /// Validate `settings` and prepare a single-use aligner
    pub fn new(settings: RansacAlignerSettings) -> Result<Self, AlignmentError> {
        settings.validate()?;
        Ok(Self {
            settings,
            handle: AlignmentHandle::default(),
        })
    }

    /// The status handle for this run. Clone it out before calling
    /// [`align`](RansacAligner::align).
    pub fn handle(&self) -> AlignmentHandle {
        self.handle.clone()
    }

    pub fn settings(&self) -> &RansacAlignerSettings {
        &self.settings
    }

    /// Align `tables` in input order. Consumes the aligner: one invocation
    /// per instance.
    pub fn align(self, tables: &[FeatureTable]) -> Result<AlignmentOutcome, AlignmentError> {
        self.handle.set_state(AlignmentState::Running);
        match self.run(tables) {
            Ok(outcome) => {
                self.handle.set_state(match outcome {
                    AlignmentOutcome::Finished(_) => AlignmentState::Finished,
                    AlignmentOutcome::Canceled => AlignmentState::Canceled,
                });
                Ok(outcome)
            }
            Err(error) => {
                self.handle.set_state(AlignmentState::Failed);
                Err(error)
            }
        }
    }

    /// Pull tables from upstream collaborators, wrapping any read failure
    /// as a processing error, then align.
    pub fn align_sources<I, E>(self, sources: I) -> Result<AlignmentOutcome, AlignmentError>
    where
        I: IntoIterator<Item = Result<FeatureTable, E>>,
        E: Error + Send + Sync + 'static,
    {
        let mut tables = Vec::new();
        for (index, source) in sources.into_iter().enumerate() {
            match source {
                Ok(table) => tables.push(table),
                Err(error) => {
                    self.handle.set_state(AlignmentState::Failed);
                    return Err(AlignmentError::Processing {
                        table: format!("#{index}"),
                        stage: Stage::Read,
                        source: Box::new(error),
                    });
                }
            }
        }
        self.align(&tables)
    }

    fn run(&self, tables: &[FeatureTable]) -> Result<AlignmentOutcome, AlignmentError> {
        if tables.is_empty() {
            return Err(AlignmentError::EmptyInput);
        }

        let total = tables.len();
        let match_settings = self.settings.match_settings();

        if self.handle.is_canceled() {
            return Ok(AlignmentOutcome::Canceled);
        }

        let mut master = MasterRowSet::new(total);
        for row in tables[0].rows() {
            master
                .insert(0, row)
                .map_err(|e| self.merge_failure(&tables[0], e))?;
        }
        self.handle.set_progress(1.0 / total as f64);
        debug!(
            table = tables[0].name(),
            rows = master.len(),
            "seeded master row set"
        );

        for (index, table) in tables.iter().enumerate().skip(1) {
            if self.handle.is_canceled() {
                info!(table = table.name(), "alignment canceled");
                return Ok(AlignmentOutcome::Canceled);
            }
            self.fold_table(&mut master, index, table, &match_settings)?;
            self.handle
                .set_progress((index + 1) as f64 / total as f64);
        }

        let output = master.build(self.settings.output_name.clone(), tables);
        info!(
            rows = output.len(),
            tables = total,
            name = output.name(),
            "alignment finished"
        );
        Ok(AlignmentOutcome::Finished(output))
    }

    /// Match `table` against the master set, correct its retention times,
    /// and merge every one of its rows in.
    fn fold_table(
        &self,
        master: &mut MasterRowSet,
        index: usize,
        table: &FeatureTable,
        match_settings: &MatchSettings,
    ) -> Result<(), AlignmentError> {
        // first pass on raw retention times, to gather fitting observations
        let candidates = candidate_pairs(master.rows(), table.rows(), match_settings);
        let pairs: Vec<RtPair> = candidates
            .iter()
            .map(|m| {
                RtPair::new(
                    table.rows()[m.candidate].rt as f64,
                    master.rows()[m.reference].rt() as f64,
                )
            })
            .collect();

        let threshold = self.settings.inlier_threshold * self.settings.rt_tolerance.nominal_window();
        let seed = self.settings.seed.wrapping_add(index as u64);
        let mut fitter = RansacFitter::new(
            self.settings.model_family,
            threshold,
            self.settings.max_iterations,
            seed,
        );
        let model = match fitter.fit(&pairs) {
            Some(model) => {
                debug!(
                    table = table.name(),
                    inliers = model.inliers.len(),
                    curve = ?model.curve,
                    "fitted retention time correction"
                );
                model
            }
            None => {
                debug!(
                    table = table.name(),
                    observations = pairs.len(),
                    "no usable correction, retention times stay uncorrected"
                );
                AlignmentModel::identity()
            }
        };

        // second pass on corrected retention times settles the assignment
        let corrected: Vec<CorrectedRow<'_>> = table
            .rows()
            .iter()
            .map(|row| CorrectedRow::new(row, model.correct(row.rt as f64) as f32))
            .collect();
        let matches = candidate_pairs(master.rows(), &corrected, match_settings);
        let assignment = assign_greedy(&matches, corrected.len());

        let mut claimed_by: Vec<Option<usize>> = vec![None; corrected.len()];
        for (reference, candidate) in assignment {
            claimed_by[candidate] = Some(reference);
        }

        let mut fresh = 0usize;
        for (j, row) in table.rows().iter().enumerate() {
            let outcome = match claimed_by[j] {
                Some(reference) => master.bind(reference, index, row),
                None => {
                    fresh += 1;
                    master.insert(index, row)
                }
            };
            outcome.map_err(|e| self.merge_failure(table, e))?;
        }
        debug!(
            table = table.name(),
            matched = table.len() - fresh,
            fresh,
            "merged table into master row set"
        );
        Ok(())
    }

    fn merge_failure(&self, table: &FeatureTable, error: MergeError) -> AlignmentError {
        AlignmentError::Processing {
            table: table.name().to_string(),
            stage: Stage::Merge,
            source: Box::new(error),
        }
    }
}
