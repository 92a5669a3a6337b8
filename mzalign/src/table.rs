//! The in-memory feature table model.
//!
//! A [`FeatureTable`] is the full set of features detected in one sample
//! run: an ordered sequence of [`FeatureTableRow`]s plus the schema of
//! columns those rows populate. Tables are read-only inputs to alignment
//! and immutable once an aligner returns one.

use std::collections::BTreeSet;
use std::ops::Index;

use mzpeaks::CentroidPeak;

use crate::annotation::IonAnnotation;

/// The columns a feature table can carry. A table's schema is the set of
/// columns populated by at least one of its rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ColumnKind {
    Mz,
    Rt,
    Charge,
    IonAnnotations,
    Peak,
}

/// One detected analyte occurrence in a single run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeatureTableRow {
    /// Identifier within the owning table
    pub id: u32,
    pub mz: f64,
    /// Retention time; the unit (seconds or minutes) is fixed by the caller
    /// and must agree across all tables in one alignment
    pub rt: f32,
    pub charge: Option<i32>,
    pub annotations: Vec<IonAnnotation>,
    /// The representative data point backing this feature, when retained
    pub peak: Option<CentroidPeak>,
}

impl FeatureTableRow {
    pub fn new(id: u32, mz: f64, rt: f32) -> Self {
        Self {
            id,
            mz,
            rt,
            ..Default::default()
        }
    }

    pub fn with_charge(mut self, charge: i32) -> Self {
        self.charge = Some(charge);
        self
    }

    pub fn with_annotation(mut self, annotation: IonAnnotation) -> Self {
        self.annotations.push(annotation);
        self
    }

    pub fn with_peak(mut self, peak: CentroidPeak) -> Self {
        self.peak = Some(peak);
        self
    }

    /// The columns this row populates
    pub fn columns(&self) -> impl Iterator<Item = ColumnKind> + '_ {
        [
            Some(ColumnKind::Mz),
            Some(ColumnKind::Rt),
            self.charge.map(|_| ColumnKind::Charge),
            (!self.annotations.is_empty()).then_some(ColumnKind::IonAnnotations),
            self.peak.as_ref().map(|_| ColumnKind::Peak),
        ]
        .into_iter()
        .flatten()
    }
}

/// A read-only, row-shaped view the matcher can work over, regardless of
/// whether the underlying storage is a source row, a merged row, or a
/// borrowed row with an overlaid coordinate.
pub trait RowLike {
    fn mz(&self) -> f64;
    fn rt(&self) -> f32;
    fn charge(&self) -> Option<i32>;
    fn annotations(&self) -> &[IonAnnotation];

    /// Whether any annotation description is shared with `other`
    fn shares_annotation<T: RowLike + ?Sized>(&self, other: &T) -> bool {
        self.annotations().iter().any(|a| {
            other
                .annotations()
                .iter()
                .any(|b| a.description == b.description)
        })
    }
}

impl RowLike for FeatureTableRow {
    fn mz(&self) -> f64 {
        self.mz
    }

    fn rt(&self) -> f32 {
        self.rt
    }

    fn charge(&self) -> Option<i32> {
        self.charge
    }

    fn annotations(&self) -> &[IonAnnotation] {
        &self.annotations
    }
}

/// A borrowed row whose retention time has been overlaid by a fitted
/// correction. Used for the corrected-RT re-matching pass.
#[derive(Debug, Clone, Copy)]
pub struct CorrectedRow<'a> {
    row: &'a FeatureTableRow,
    rt: f32,
}

impl<'a> CorrectedRow<'a> {
    pub fn new(row: &'a FeatureTableRow, rt: f32) -> Self {
        Self { row, rt }
    }

    pub fn inner(&self) -> &'a FeatureTableRow {
        self.row
    }
}

impl RowLike for CorrectedRow<'_> {
    fn mz(&self) -> f64 {
        self.row.mz
    }

    fn rt(&self) -> f32 {
        self.rt
    }

    fn charge(&self) -> Option<i32> {
        self.row.charge
    }

    fn annotations(&self) -> &[IonAnnotation] {
        &self.row.annotations
    }
}

/// The full set of features detected in one sample run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FeatureTable {
    name: String,
    rows: Vec<FeatureTableRow>,
    columns: BTreeSet<ColumnKind>,
}

impl FeatureTable {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            rows: Vec::new(),
            columns: BTreeSet::new(),
        }
    }

    pub fn with_rows<S: Into<String>>(name: S, rows: Vec<FeatureTableRow>) -> Self {
        let mut table = Self::new(name);
        for row in rows {
            table.push_row(row);
        }
        table
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rows(&self) -> &[FeatureTableRow] {
        &self.rows
    }

    /// The union of columns populated by this table's rows, plus any added
    /// explicitly
    pub fn columns(&self) -> &BTreeSet<ColumnKind> {
        &self.columns
    }

    /// Record `kind` in the schema even if no current row populates it
    pub fn add_column(&mut self, kind: ColumnKind) {
        self.columns.insert(kind);
    }

    /// Append `row`, folding the columns it populates into the schema
    pub fn push_row(&mut self, row: FeatureTableRow) {
        self.columns.extend(row.columns());
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FeatureTableRow> {
        self.rows.iter()
    }

    /// The rows satisfying an arbitrary predicate. Any `FnMut(&FeatureTableRow) -> bool`
    /// may be supplied; selection logic is injected rather than subclassed.
    pub fn rows_matching<'a, F>(
        &'a self,
        mut predicate: F,
    ) -> impl Iterator<Item = &'a FeatureTableRow> + 'a
    where
        F: FnMut(&FeatureTableRow) -> bool + 'a,
    {
        self.rows.iter().filter(move |&row| predicate(row))
    }
}

impl Index<usize> for FeatureTable {
    type Output = FeatureTableRow;

    fn index(&self, index: usize) -> &Self::Output {
        &self.rows[index]
    }
}

impl<'a> IntoIterator for &'a FeatureTable {
    type Item = &'a FeatureTableRow;
    type IntoIter = std::slice::Iter<'a, FeatureTableRow>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_table() -> FeatureTable {
        FeatureTable::with_rows(
            "run 1",
            vec![
                FeatureTableRow::new(0, 720.5551, 10.5)
                    .with_annotation(IonAnnotation::new("PE(17:0/17:0)")),
                FeatureTableRow::new(1, 746.5708, 11.2).with_charge(1),
                FeatureTableRow::new(2, 552.5036, 9.05),
            ],
        )
    }

    #[test]
    fn test_schema_union_over_rows() {
        let table = make_table();
        let columns = table.columns();
        assert!(columns.contains(&ColumnKind::Mz));
        assert!(columns.contains(&ColumnKind::Rt));
        assert!(columns.contains(&ColumnKind::Charge));
        assert!(columns.contains(&ColumnKind::IonAnnotations));
        assert!(!columns.contains(&ColumnKind::Peak));
    }

    #[test]
    fn test_rows_matching_predicate() {
        let table = make_table();
        let charged: Vec<_> = table.rows_matching(|row| row.charge.is_some()).collect();
        assert_eq!(charged.len(), 1);
        assert_eq!(charged[0].id, 1);

        let heavy = table.rows_matching(|row| row.mz > 700.0).count();
        assert_eq!(heavy, 2);
    }

    #[test]
    fn test_corrected_row_overlays_rt_only() {
        let table = make_table();
        let corrected = CorrectedRow::new(&table[0], 10.62);
        assert_eq!(corrected.rt(), 10.62);
        assert_eq!(corrected.mz(), table[0].mz);
        assert_eq!(corrected.annotations().len(), 1);
        assert_eq!(corrected.inner().rt, 10.5);
    }
}
