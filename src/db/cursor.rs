//! Forward-only row cursor over an open result set.

use crate::db::driver::RowSource;
use crate::error::SqlResult;
use crate::models::{ColumnMeta, Value};
use tracing::debug;

/// Lazy cursor wrapping a driver row source.
///
/// Reading past the last row is not an error: it closes the source, marks the
/// cursor exhausted and yields an empty row, every time it is asked again.
pub struct ResultCursor<R: RowSource> {
    source: R,
    exhausted: bool,
    rows_read: u64,
}

impl<R: RowSource> ResultCursor<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            exhausted: false,
            rows_read: 0,
        }
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        self.source.columns()
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Advance one row. An empty row signals end of data.
    pub fn fetch_row(&mut self) -> SqlResult<Vec<Value>> {
        if self.exhausted {
            return Ok(Vec::new());
        }
        match self.source.next_row() {
            Some(row) => {
                // A row that fails to decode is still consumed.
                self.rows_read += 1;
                row
            }
            None => {
                self.exhausted = true;
                self.source.close();
                debug!(rows_read = self.rows_read, "Result set exhausted");
                Ok(Vec::new())
            }
        }
    }

    /// Close the cursor early (superseding statement or connection teardown).
    pub fn close(mut self) {
        if !self.exhausted {
            self.exhausted = true;
            self.source.close();
        }
    }
}

impl<R: RowSource> std::fmt::Debug for ResultCursor<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("columns", &self.source.columns())
            .field("exhausted", &self.exhausted)
            .field("rows_read", &self.rows_read)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{MemoryCell, MemoryRows};

    fn cursor(rows: Vec<Vec<MemoryCell>>) -> ResultCursor<MemoryRows> {
        ResultCursor::new(MemoryRows::new(
            vec![ColumnMeta::new("id", "INTEGER")],
            rows,
        ))
    }

    #[test]
    fn test_fetch_until_exhausted() {
        let mut cursor = cursor(vec![
            vec![MemoryCell::Value(Value::Number(1.0))],
            vec![MemoryCell::Value(Value::Number(2.0))],
        ]);
        assert_eq!(cursor.fetch_row().unwrap(), vec![Value::Number(1.0)]);
        assert!(!cursor.is_exhausted());
        assert_eq!(cursor.fetch_row().unwrap(), vec![Value::Number(2.0)]);
        assert!(!cursor.is_exhausted());
        assert!(cursor.fetch_row().unwrap().is_empty());
        assert!(cursor.is_exhausted());
        assert_eq!(cursor.rows_read(), 2);
    }

    #[test]
    fn test_idempotent_past_end() {
        let mut cursor = cursor(vec![]);
        for _ in 0..3 {
            assert!(cursor.fetch_row().unwrap().is_empty());
            assert!(cursor.is_exhausted());
        }
    }

    #[test]
    fn test_unsupported_column_fails_lazily() {
        let mut cursor = cursor(vec![
            vec![MemoryCell::Value(Value::Number(1.0))],
            vec![MemoryCell::Opaque("BLOB".to_string())],
            vec![MemoryCell::Value(Value::Number(3.0))],
        ]);
        assert!(cursor.fetch_row().is_ok());
        assert!(cursor.fetch_row().is_err());
        assert_eq!(cursor.fetch_row().unwrap(), vec![Value::Number(3.0)]);
    }
}
