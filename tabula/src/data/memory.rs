use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, PoisonError, RwLock,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::{
    data::{
        shared_input, shared_output, Column, KeyColumn, Row, RowsInput, RowsInputDelete,
        RowsInputUpdate, RowsOutput, SharedInput, SharedOutput, SourceFactory,
    },
    error::{Error, ExecResult},
    types::{ops, Operation, Value},
};

/// An in-memory table.
///
/// Deleted rows leave a hole behind, so that the position of an open
/// cursor stays valid.
#[derive(Debug)]
pub struct MemoryTable {
    name: String,
    columns: Vec<Column>,
    key_columns: Vec<KeyColumn>,
    rows: RwLock<Vec<Option<Row>>>,
    scans: AtomicUsize,
    read_only: bool,
}

impl MemoryTable {
    pub fn new(name: impl Into<String>, columns: Vec<Column>) -> MemoryTable {
        MemoryTable {
            name: name.into(),
            columns,
            key_columns: Vec::new(),
            rows: RwLock::new(Vec::new()),
            scans: AtomicUsize::new(0),
            read_only: false,
        }
    }

    /// Declares a key column, evaluated by the table's inputs.
    pub fn with_key_column(mut self, key: KeyColumn) -> MemoryTable {
        self.key_columns.push(key);
        self
    }

    /// Disables update and delete support.
    pub fn read_only(mut self) -> MemoryTable {
        self.read_only = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn insert(&self, values: Vec<Value>) -> ExecResult<()> {
        if values.len() != self.columns.len() {
            return Err(Error::ExecError(format!(
                "table `{}` has {} columns, got {} values",
                self.name,
                self.columns.len(),
                values.len()
            )));
        }
        self.write_rows().push(Some(Row::from(values)));
        Ok(())
    }

    /// Returns a copy of the live rows.
    pub fn rows(&self) -> Vec<Row> {
        self.read_rows().iter().flatten().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_rows().iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of scans (first reads after an open or reset) performed over
    /// the table so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Acquire)
    }

    pub fn input(self: &Arc<Self>) -> MemoryRowsInput {
        MemoryRowsInput {
            table: Arc::clone(self),
            position: None,
            current: None,
            conditions: Vec::new(),
            opened: false,
            scan_pending: true,
        }
    }

    pub fn output(self: &Arc<Self>) -> MemoryRowsOutput {
        MemoryRowsOutput {
            table: Arc::clone(self),
        }
    }

    fn read_rows(&self) -> std::sync::RwLockReadGuard<'_, Vec<Option<Row>>> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_rows(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Option<Row>>> {
        self.rows.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cursor over a [`MemoryTable`]. Key column conditions are evaluated
/// while scanning.
pub struct MemoryRowsInput {
    table: Arc<MemoryTable>,
    position: Option<usize>,
    current: Option<Row>,
    conditions: Vec<(usize, Operation, Value)>,
    opened: bool,
    scan_pending: bool,
}

impl MemoryRowsInput {
    fn accepts(&self, row: &Row) -> ExecResult<bool> {
        for (column, op, value) in &self.conditions {
            if !ops::binary(*op, &row.value(*column), value)?.is_truthy() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn ensure_open(&self) -> ExecResult<()> {
        if self.opened {
            Ok(())
        } else {
            Err(Error::Source(format!("input `{}` is not open", self.table.name)))
        }
    }
}

#[async_trait]
impl RowsInput for MemoryRowsInput {
    fn columns(&self) -> &[Column] {
        &self.table.columns
    }

    async fn open(&mut self) -> ExecResult<()> {
        self.opened = true;
        self.position = None;
        self.current = None;
        self.scan_pending = true;
        Ok(())
    }

    async fn close(&mut self) -> ExecResult<()> {
        self.opened = false;
        self.current = None;
        Ok(())
    }

    async fn reset(&mut self) -> ExecResult<()> {
        self.position = None;
        self.current = None;
        self.scan_pending = true;
        Ok(())
    }

    async fn read_value(&self, column_index: usize) -> ExecResult<Value> {
        self.ensure_open()?;
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| Error::Source("no current row".into()))?;
        row.get(column_index)
            .cloned()
            .ok_or_else(|| Error::Source(format!("column index {column_index} is out of range")))
    }

    async fn read_next(&mut self) -> ExecResult<bool> {
        self.ensure_open()?;
        if self.scan_pending {
            self.scan_pending = false;
            let scans = self.table.scans.fetch_add(1, Ordering::AcqRel) + 1;
            debug!(table = %self.table.name, scans, conditions = self.conditions.len(), "scanning");
        }
        let mut next = self.position.map_or(0, |i| i + 1);
        loop {
            let candidate = {
                let rows = self.table.read_rows();
                if next >= rows.len() {
                    None
                } else {
                    Some(rows[next].clone())
                }
            };
            let Some(slot) = candidate else {
                self.position = Some(next);
                self.current = None;
                return Ok(false);
            };
            if let Some(row) = slot {
                if self.accepts(&row)? {
                    self.position = Some(next);
                    self.current = Some(row);
                    return Ok(true);
                }
            }
            next += 1;
        }
    }

    fn key_columns(&self) -> &[KeyColumn] {
        &self.table.key_columns
    }

    async fn set_key_column_value(
        &mut self,
        column_index: usize,
        op: Operation,
        value: Value,
    ) -> ExecResult<()> {
        let supported = self
            .table
            .key_columns
            .iter()
            .any(|key| key.column_index == column_index && key.supports(op));
        if !supported {
            return Err(Error::ExecError(format!(
                "column {column_index} of `{}` doesn't support `{op}` conditions",
                self.table.name
            )));
        }
        self.conditions.retain(|(c, o, _)| !(*c == column_index && *o == op));
        self.conditions.push((column_index, op, value));
        Ok(())
    }

    async fn unset_key_column_value(&mut self, column_index: usize, op: Operation) -> ExecResult<()> {
        self.conditions.retain(|(c, o, _)| !(*c == column_index && *o == op));
        Ok(())
    }

    fn as_updatable(&mut self) -> Option<&mut dyn RowsInputUpdate> {
        if self.table.read_only {
            None
        } else {
            Some(self)
        }
    }

    fn as_deletable(&mut self) -> Option<&mut dyn RowsInputDelete> {
        if self.table.read_only {
            None
        } else {
            Some(self)
        }
    }
}

#[async_trait]
impl RowsInputUpdate for MemoryRowsInput {
    async fn update_value(&mut self, column_index: usize, value: Value) -> ExecResult<bool> {
        let (Some(position), Some(current)) = (self.position, self.current.as_mut()) else {
            return Ok(false);
        };
        let mut rows = self.table.write_rows();
        let Some(Some(row)) = rows.get_mut(position) else {
            return Ok(false);
        };
        row.set(column_index, value.clone());
        current.set(column_index, value);
        Ok(true)
    }
}

#[async_trait]
impl RowsInputDelete for MemoryRowsInput {
    async fn delete(&mut self) -> ExecResult<bool> {
        let Some(position) = self.position else {
            return Ok(false);
        };
        let removed = self
            .table
            .write_rows()
            .get_mut(position)
            .and_then(Option::take)
            .is_some();
        Ok(removed)
    }
}

/// Appends rows into a [`MemoryTable`].
pub struct MemoryRowsOutput {
    table: Arc<MemoryTable>,
}

#[async_trait]
impl RowsOutput for MemoryRowsOutput {
    fn columns(&self) -> &[Column] {
        &self.table.columns
    }

    async fn open(&mut self) -> ExecResult<()> {
        Ok(())
    }

    async fn close(&mut self) -> ExecResult<()> {
        Ok(())
    }

    async fn write_values(&mut self, values: &[Value]) -> ExecResult<()> {
        self.table.insert(values.to_vec())
    }
}

/// Named in-memory tables, resolvable by `OPEN`, `FROM` and `INSERT INTO`.
#[derive(Default)]
pub struct MemorySources {
    tables: DashMap<String, Arc<MemoryTable>>,
}

impl MemorySources {
    pub fn new() -> MemorySources {
        MemorySources::default()
    }

    pub fn register(&self, table: MemoryTable) -> Arc<MemoryTable> {
        let table = Arc::new(table);
        self.tables
            .insert(table.name.to_ascii_lowercase(), Arc::clone(&table));
        table
    }

    pub fn get(&self, name: &str) -> Option<Arc<MemoryTable>> {
        self.tables
            .get(&name.to_ascii_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    fn find(&self, uri: &str) -> ExecResult<Arc<MemoryTable>> {
        self.get(uri)
            .ok_or_else(|| Error::CannotFindIdentifier(uri.to_owned()))
    }
}

#[async_trait]
impl SourceFactory for MemorySources {
    async fn create_input(&self, uri: &str) -> ExecResult<SharedInput> {
        Ok(shared_input(self.find(uri)?.input()))
    }

    async fn create_output(&self, uri: &str) -> ExecResult<SharedOutput> {
        Ok(shared_output(self.find(uri)?.output()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DataType;

    fn table() -> Arc<MemoryTable> {
        let table = MemoryTable::new(
            "t",
            vec![
                Column::new("id", DataType::Integer),
                Column::new("name", DataType::String),
            ],
        )
        .with_key_column(KeyColumn::new(0).with_operation(Operation::Equals));
        for (id, name) in [(1, "a"), (2, "b"), (3, "c")] {
            table.insert(vec![Value::from(id), Value::from(name)]).unwrap();
        }
        Arc::new(table)
    }

    #[tokio::test]
    async fn key_conditions_filter_the_scan() -> ExecResult<()> {
        let table = table();
        let mut input = table.input();
        input.open().await?;
        input.set_key_column_value(0, Operation::Equals, Value::from(2)).await?;
        assert!(input.read_next().await?);
        assert_eq!(input.read_value(1).await?, Value::from("b"));
        assert!(!input.read_next().await?);

        input.unset_key_column_value(0, Operation::Equals).await?;
        input.reset().await?;
        let mut count = 0;
        while input.read_next().await? {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(table.scan_count(), 2);

        let unsupported = input.set_key_column_value(1, Operation::Equals, Value::from("a")).await;
        assert!(unsupported.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn delete_keeps_cursor_valid() -> ExecResult<()> {
        let table = table();
        let mut input = table.input();
        input.open().await?;
        let mut seen = Vec::new();
        while input.read_next().await? {
            let id = input.read_value(0).await?;
            if id == Value::from(2) {
                assert!(input.as_deletable().unwrap().delete().await?);
            }
            seen.push(id);
        }
        assert_eq!(seen.len(), 3);
        assert_eq!(table.len(), 2);
        Ok(())
    }
}
