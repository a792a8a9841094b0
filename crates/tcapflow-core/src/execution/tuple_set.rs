//! Columnar record batches.

use tcapflow_common::types::{Row, Value};
use tcapflow_common::utils::error::{Error, Result};

/// A columnar batch of records flowing between pipeline stages.
///
/// Columns are positional; the names live in the [`TupleSpec`] of whichever
/// atomic computation produced the batch. Stages never mutate a batch in
/// place, they consume it and return a new one.
///
/// [`TupleSpec`]: tcapflow_common::types::TupleSpec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TupleSet {
    columns: Vec<Vec<Value>>,
    num_rows: usize,
}

impl TupleSet {
    /// Creates a tuple set from columns of equal length.
    ///
    /// # Errors
    ///
    /// Returns an error if the columns differ in length.
    pub fn new(columns: Vec<Vec<Value>>) -> Result<Self> {
        let num_rows = columns.first().map_or(0, Vec::len);
        if let Some(bad) = columns.iter().position(|c| c.len() != num_rows) {
            return Err(Error::Internal(format!(
                "column {bad} has {} rows, expected {num_rows}",
                columns[bad].len()
            )));
        }
        Ok(Self { columns, num_rows })
    }

    /// Creates an empty tuple set with `num_columns` columns.
    #[must_use]
    pub fn empty(num_columns: usize) -> Self {
        Self {
            columns: vec![Vec::new(); num_columns],
            num_rows: 0,
        }
    }

    /// Builds a tuple set from a single column.
    #[must_use]
    pub fn from_column(values: Vec<Value>) -> Self {
        let num_rows = values.len();
        Self {
            columns: vec![values],
            num_rows,
        }
    }

    /// Builds a tuple set from rows that each hold `num_columns` values.
    ///
    /// # Errors
    ///
    /// Returns an error if a row has the wrong width.
    pub fn from_rows<I>(num_columns: usize, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut builder = TupleSetBuilder::new(num_columns);
        for row in rows {
            builder.push_row(row)?;
        }
        Ok(builder.finish())
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Number of columns.
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num_rows == 0
    }

    /// Returns a column by position.
    #[must_use]
    pub fn column(&self, index: usize) -> Option<&[Value]> {
        self.columns.get(index).map(Vec::as_slice)
    }

    /// Returns a column, or a typed error naming the stage that asked.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is out of range.
    pub fn column_checked(&self, index: usize, stage: &str) -> Result<&[Value]> {
        self.column(index).ok_or_else(|| {
            Error::execution(format!(
                "{stage}: column {index} out of range for a batch of {} columns",
                self.columns.len()
            ))
        })
    }

    /// Copies out one row.
    #[must_use]
    pub fn row(&self, index: usize) -> Row {
        self.columns.iter().map(|c| c[index].clone()).collect()
    }

    /// Gathers the values at `positions` for one row.
    #[must_use]
    pub fn gather(&self, row: usize, positions: &[usize]) -> Row {
        positions.iter().map(|&p| self.columns[p][row].clone()).collect()
    }

    /// Copies the columns at `positions`, in that order.
    #[must_use]
    pub fn project(&self, positions: &[usize]) -> Vec<Vec<Value>> {
        positions.iter().map(|&p| self.columns[p].clone()).collect()
    }

    /// Consumes the tuple set, returning its columns.
    #[must_use]
    pub fn into_columns(self) -> Vec<Vec<Value>> {
        self.columns
    }

    /// Iterates rows as owned [`Row`]s.
    pub fn rows(&self) -> impl Iterator<Item = Row> + '_ {
        (0..self.num_rows).map(|i| self.row(i))
    }
}

/// Row-at-a-time builder for a [`TupleSet`].
#[derive(Debug)]
pub struct TupleSetBuilder {
    columns: Vec<Vec<Value>>,
    num_rows: usize,
}

impl TupleSetBuilder {
    /// Creates a builder for `num_columns` columns.
    #[must_use]
    pub fn new(num_columns: usize) -> Self {
        Self {
            columns: vec![Vec::new(); num_columns],
            num_rows: 0,
        }
    }

    /// Appends a row.
    ///
    /// # Errors
    ///
    /// Returns an error if the row has the wrong width.
    pub fn push_row<I>(&mut self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut width = 0;
        for (column, value) in self.columns.iter_mut().zip(row) {
            column.push(value);
            width += 1;
        }
        if width != self.columns.len() {
            for column in self.columns.iter_mut().take(width) {
                column.pop();
            }
            return Err(Error::Internal(format!(
                "row of width {width} pushed into a batch of {} columns",
                self.columns.len()
            )));
        }
        self.num_rows += 1;
        Ok(())
    }

    /// Number of rows so far.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Finishes the batch.
    #[must_use]
    pub fn finish(self) -> TupleSet {
        TupleSet {
            columns: self.columns,
            num_rows: self.num_rows,
        }
    }
}
