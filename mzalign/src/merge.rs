//! Accumulation of matched source rows into merged output rows.

use thiserror::Error;

use crate::annotation::IonAnnotation;
use crate::table::{ColumnKind, FeatureTable, FeatureTableRow, RowLike};

/// A source row may bind to a merged row at most once per input table.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MergeError {
    #[error("table {table} already contributed row {bound} to this merged row")]
    AlreadyBound { table: usize, bound: u32 },
    #[error("table index {table} is outside this row set of {tables} tables")]
    UnknownTable { table: usize, tables: usize },
}

/// One output row under construction: the evolving aggregate plus the
/// identifiers of the source rows backing it, at most one per input table.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedRow {
    row: FeatureTableRow,
    sources: Vec<Option<u32>>,
}

impl MergedRow {
    fn new(n_tables: usize) -> Self {
        Self {
            row: FeatureTableRow::default(),
            sources: vec![None; n_tables],
        }
    }

    /// Bind `source` from `table` onto this merged row.
    ///
    /// The binding is one-time per table slot. The first contribution seeds
    /// the aggregate coordinates; later ones only fill slots still empty, so
    /// a contributor missing a column never blanks merged data. Annotations
    /// append in bind order, skipping values the aggregate already carries.
    pub fn bind(&mut self, table: usize, source: &FeatureTableRow) -> Result<(), MergeError> {
        if table >= self.sources.len() {
            return Err(MergeError::UnknownTable {
                table,
                tables: self.sources.len(),
            });
        }
        if let Some(bound) = self.sources[table] {
            return Err(MergeError::AlreadyBound { table, bound });
        }
        let first = self.sources.iter().all(Option::is_none);
        self.sources[table] = Some(source.id);

        if first {
            self.row.mz = source.mz;
            self.row.rt = source.rt;
        }
        if self.row.charge.is_none() {
            self.row.charge = source.charge;
        }
        if self.row.peak.is_none() {
            self.row.peak = source.peak.clone();
        }
        for annotation in &source.annotations {
            if !self.row.annotations.contains(annotation) {
                self.row.annotations.push(annotation.clone());
            }
        }
        Ok(())
    }

    /// The aggregate row as accumulated so far
    pub fn row(&self) -> &FeatureTableRow {
        &self.row
    }

    /// Source row identifiers, one slot per input table
    pub fn sources(&self) -> &[Option<u32>] {
        &self.sources
    }

    pub fn n_sources(&self) -> usize {
        self.sources.iter().flatten().count()
    }
}

impl RowLike for MergedRow {
    fn mz(&self) -> f64 {
        self.row.mz
    }

    fn rt(&self) -> f32 {
        self.row.rt
    }

    fn charge(&self) -> Option<i32> {
        self.row.charge
    }

    fn annotations(&self) -> &[IonAnnotation] {
        &self.row.annotations
    }
}

/// The orchestrator's working state: the ordered merged rows accumulated so
/// far. Every source row of every input table lands in exactly one merged
/// row, either by binding onto a matched row or by seeding a fresh one.
#[derive(Debug)]
pub struct MasterRowSet {
    rows: Vec<MergedRow>,
    n_tables: usize,
}

impl MasterRowSet {
    pub fn new(n_tables: usize) -> Self {
        Self {
            rows: Vec::new(),
            n_tables,
        }
    }

    /// Append a fresh merged row seeded from a single source row
    pub fn insert(&mut self, table: usize, source: &FeatureTableRow) -> Result<(), MergeError> {
        let mut row = MergedRow::new(self.n_tables);
        row.bind(table, source)?;
        self.rows.push(row);
        Ok(())
    }

    /// Bind `source` onto the merged row at `index`
    pub fn bind(
        &mut self,
        index: usize,
        table: usize,
        source: &FeatureTableRow,
    ) -> Result<(), MergeError> {
        self.rows[index].bind(table, source)
    }

    pub fn rows(&self) -> &[MergedRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Materialize into the output table. Rows are renumbered in
    /// accumulation order; the schema is the union of the input schemas plus
    /// the aggregated annotation column.
    pub fn build<S: Into<String>>(self, name: S, inputs: &[FeatureTable]) -> FeatureTable {
        let mut table = FeatureTable::new(name);
        for kind in inputs.iter().flat_map(|input| input.columns()) {
            table.add_column(*kind);
        }
        table.add_column(ColumnKind::IonAnnotations);
        for (i, merged) in self.rows.into_iter().enumerate() {
            let mut row = merged.row;
            row.id = i as u32;
            table.push_row(row);
        }
        table
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn annotated(id: u32, mz: f64, rt: f32, label: &str) -> FeatureTableRow {
        FeatureTableRow::new(id, mz, rt).with_annotation(IonAnnotation::new(label))
    }

    #[test]
    fn test_bind_is_one_time_per_table() {
        let mut merged = MergedRow::new(2);
        let row = annotated(7, 720.55, 10.5, "PE(17:0/17:0)");
        merged.bind(0, &row).unwrap();
        assert_eq!(
            merged.bind(0, &row),
            Err(MergeError::AlreadyBound { table: 0, bound: 7 })
        );
        merged.bind(1, &row).unwrap();
        assert_eq!(merged.n_sources(), 2);
        assert_eq!(
            merged.bind(2, &row),
            Err(MergeError::UnknownTable { table: 2, tables: 2 })
        );
    }

    #[test]
    fn test_first_contribution_wins_scalars() {
        let mut merged = MergedRow::new(2);
        merged
            .bind(0, &FeatureTableRow::new(0, 720.5551, 10.5))
            .unwrap();
        merged
            .bind(1, &FeatureTableRow::new(3, 720.5555, 10.56).with_charge(1))
            .unwrap();
        // coordinates stay with the seed, the empty charge slot fills in
        assert_eq!(merged.row().mz, 720.5551);
        assert_eq!(merged.row().rt, 10.5);
        assert_eq!(merged.row().charge, Some(1));
    }

    #[test]
    fn test_annotations_concatenate_in_order_without_repeats() {
        let mut merged = MergedRow::new(3);
        merged
            .bind(0, &annotated(0, 720.55, 10.5, "PE(17:0/17:0)"))
            .unwrap();
        merged
            .bind(1, &annotated(0, 720.55, 10.55, "1. PE(17:0/17:0)"))
            .unwrap();
        // same value again contributes nothing new
        merged
            .bind(2, &annotated(0, 720.55, 10.52, "PE(17:0/17:0)"))
            .unwrap();
        let labels: Vec<_> = merged
            .annotations()
            .iter()
            .map(|a| a.description.as_str())
            .collect();
        assert_eq!(labels, vec!["PE(17:0/17:0)", "1. PE(17:0/17:0)"]);
    }

    #[test]
    fn test_build_unions_schemas_and_renumbers() {
        let left = FeatureTable::with_rows(
            "run 1",
            vec![annotated(5, 720.55, 10.5, "PE(17:0/17:0)")],
        );
        let right = FeatureTable::with_rows(
            "run 2",
            vec![FeatureTableRow::new(9, 746.57, 11.2).with_charge(1)],
        );

        let mut master = MasterRowSet::new(2);
        master.insert(0, &left[0]).unwrap();
        master.insert(1, &right[0]).unwrap();
        let output = master.build("aligned", &[left, right]);

        assert_eq!(output.name(), "aligned");
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].id, 0);
        assert_eq!(output[1].id, 1);
        for kind in [
            ColumnKind::Mz,
            ColumnKind::Rt,
            ColumnKind::Charge,
            ColumnKind::IonAnnotations,
        ] {
            assert!(output.columns().contains(&kind));
        }
    }
}
