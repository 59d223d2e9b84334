//! Row-level diffs.
//!
//! [`RowDiffSource`] turns the map events of an [`AsyncDiffer`] over a
//! table's row Map into rows of one output schema, tagged with how they
//! changed. A modified row comes out as two rows: the old version
//! (`ModifiedOld`) followed by the new one (`ModifiedNew`), each with a map
//! of the columns that differ.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use crate::async_diff::AsyncDiffer;
use crate::cancel::CancelToken;
use crate::config::DiffConfig;
use crate::diff::DiffEvent;
use crate::error::{Error, Result};
use crate::root_value::Table;
use crate::schema::{Row, RowConverter, Schema};
use crate::value::Value;

/// Events pulled from the differ per refill.
const REFILL_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffType {
    Added,
    Removed,
    ModifiedOld,
    ModifiedNew,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRow {
    pub row: Row,
    pub diff_type: DiffType,
    /// Column name to change, for modified rows only.
    pub col_diffs: Option<BTreeMap<String, DiffType>>,
}

/// What the pipeline does after a bad row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadRowAction {
    Continue,
    Abort,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub rows: u64,
    pub bad_rows: u64,
}

pub struct RowDiffSource {
    differ: AsyncDiffer,
    old_conv: RowConverter,
    new_conv: RowConverter,
    wait_timeout: Duration,
    buffered: VecDeque<Result<DiffRow>>,
}

impl RowDiffSource {
    /// Both converters must target the same output schema.
    pub fn new(
        differ: AsyncDiffer,
        old_conv: RowConverter,
        new_conv: RowConverter,
        wait_timeout: Duration,
    ) -> Result<Self> {
        if old_conv.dest_schema() != new_conv.dest_schema() {
            return Err(Error::Schema(
                "old and new rows must convert to the same output schema".into(),
            ));
        }
        Ok(RowDiffSource {
            differ,
            old_conv,
            new_conv,
            wait_timeout,
            buffered: VecDeque::new(),
        })
    }

    /// Diff two versions of a table, reporting rows in the union of both
    /// schemas.
    pub fn for_tables(old: &Table, new: &Table, config: &DiffConfig) -> Result<Self> {
        let out = old.schema().union(new.schema())?;
        let differ = AsyncDiffer::start(old.rows().tree().clone(), new.rows().tree().clone(), config);
        Self::new(
            differ,
            RowConverter::new(old.schema(), &out)?,
            RowConverter::new(new.schema(), &out)?,
            config.wait_timeout(),
        )
    }

    pub fn schema(&self) -> &Schema {
        self.new_conv.dest_schema()
    }

    /// Next changed row.
    ///
    /// `Ok(None)` at the end of the diff, `Err(NotReady)` when nothing
    /// arrived within the wait timeout, `Err(BadRow)` for a row that could
    /// not be decoded or converted; both errors leave the source usable.
    pub fn next_diff(&mut self) -> Result<Option<DiffRow>> {
        if let Some(item) = self.buffered.pop_front() {
            return item.map(Some);
        }
        if self.differ.is_done() {
            return Ok(None);
        }

        let events = self.differ.get_diffs(REFILL_BATCH, self.wait_timeout)?;
        if events.is_empty() {
            return if self.differ.is_done() {
                Ok(None)
            } else {
                Err(Error::NotReady)
            };
        }
        for event in events {
            self.buffer_event(event);
        }
        match self.buffered.pop_front() {
            Some(item) => item.map(Some),
            None => Ok(None),
        }
    }

    fn buffer_event(&mut self, event: DiffEvent) {
        match event {
            DiffEvent::Added { key, value } => {
                let row = convert(&self.new_conv, &key, &value).map(|row| DiffRow {
                    row,
                    diff_type: DiffType::Added,
                    col_diffs: None,
                });
                self.buffered.push_back(row);
            }
            DiffEvent::Removed { key, value } => {
                let row = convert(&self.old_conv, &key, &value).map(|row| DiffRow {
                    row,
                    diff_type: DiffType::Removed,
                    col_diffs: None,
                });
                self.buffered.push_back(row);
            }
            DiffEvent::Modified { key, old, new } => {
                let pair = convert(&self.old_conv, &key, &old)
                    .and_then(|o| Ok((o, convert(&self.new_conv, &key, &new)?)));
                match pair {
                    Ok((old_row, new_row)) => {
                        let (old_cols, new_cols) = self.column_diffs(&old_row, &new_row);
                        self.buffered.push_back(Ok(DiffRow {
                            row: old_row,
                            diff_type: DiffType::ModifiedOld,
                            col_diffs: Some(old_cols),
                        }));
                        self.buffered.push_back(Ok(DiffRow {
                            row: new_row,
                            diff_type: DiffType::ModifiedNew,
                            col_diffs: Some(new_cols),
                        }));
                    }
                    Err(e) => self.buffered.push_back(Err(e)),
                }
            }
        }
    }

    /// Per-column changes of a modified row: a column both source schemas
    /// have changed if its values differ; otherwise it was removed (only the
    /// old schema has it) or added.
    fn column_diffs(
        &self,
        old_row: &Row,
        new_row: &Row,
    ) -> (BTreeMap<String, DiffType>, BTreeMap<String, DiffType>) {
        let mut old_cols = BTreeMap::new();
        let mut new_cols = BTreeMap::new();
        for column in self.schema().columns() {
            let in_old = self.old_conv.src_schema().by_tag(column.tag).is_some();
            let in_new = self.new_conv.src_schema().by_tag(column.tag).is_some();
            if in_old && in_new {
                if old_row.get(column.tag) != new_row.get(column.tag) {
                    old_cols.insert(column.name.clone(), DiffType::ModifiedOld);
                    new_cols.insert(column.name.clone(), DiffType::ModifiedNew);
                }
            } else if in_old {
                old_cols.insert(column.name.clone(), DiffType::Removed);
            } else {
                new_cols.insert(column.name.clone(), DiffType::Added);
            }
        }
        (old_cols, new_cols)
    }

    /// Drain the source into `sink`.
    ///
    /// `NotReady` is retried. Each bad row is logged and handed to
    /// `on_bad_row`, which decides whether to keep going; aborting returns
    /// the bad row's error.
    pub fn for_each_diff(
        &mut self,
        mut sink: impl FnMut(DiffRow) -> Result<()>,
        mut on_bad_row: impl FnMut(&Error) -> BadRowAction,
        cancel: Option<&CancelToken>,
    ) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();
        loop {
            if let Some(token) = cancel {
                token.check()?;
            }
            match self.next_diff() {
                Ok(Some(row)) => {
                    stats.rows += 1;
                    sink(row)?;
                }
                Ok(None) => break,
                Err(Error::NotReady) => continue,
                Err(e @ Error::BadRow(_)) => {
                    stats.bad_rows += 1;
                    log::warn!("bad row in diff: {}", e);
                    if on_bad_row(&e) == BadRowAction::Abort {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(stats)
    }

    pub fn close(&mut self) -> Result<()> {
        self.differ.close()?;
        Ok(())
    }
}

fn convert(conv: &RowConverter, key: &Value, value: &Value) -> Result<Row> {
    let row = Row::from_kv(key, value).and_then(|row| conv.convert(&row));
    row.map_err(|e| match e {
        Error::BadRow(_) => e,
        other => Error::BadRow(other.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::Map;
    use crate::config::Config;
    use crate::schema::Column;
    use crate::store::MemoryChunkStore;
    use crate::value::ValueKind;
    use crate::value_store::ValueStore;
    use std::sync::Arc;

    fn store() -> ValueStore {
        ValueStore::new(Arc::new(MemoryChunkStore::new()), &Config::default())
    }

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", 0, ValueKind::Int).primary_key(),
            Column::new("name", 1, ValueKind::String),
            Column::new("age", 2, ValueKind::Uint),
        ])
        .unwrap()
    }

    fn person(id: i64, name: &str, age: u64) -> Row {
        Row::from_values([
            (0, Value::Int(id)),
            (1, Value::from(name)),
            (2, Value::Uint(age)),
        ])
    }

    fn drain(source: &mut RowDiffSource) -> Vec<DiffRow> {
        let mut rows = Vec::new();
        let stats = source
            .for_each_diff(
                |row| {
                    rows.push(row);
                    Ok(())
                },
                |_| BadRowAction::Abort,
                None,
            )
            .unwrap();
        assert_eq!(stats.bad_rows, 0);
        rows
    }

    #[test]
    fn test_added_removed_modified() {
        let vs = store();
        let old = Table::from_rows(
            &vs,
            schema(),
            vec![person(1, "Ada", 36), person(2, "Bob", 40), person(3, "Cy", 22)],
        )
        .unwrap();
        let new = old
            .put_rows(vec![person(1, "Ada L", 36), person(4, "Dee", 30)])
            .unwrap()
            .delete_rows(vec![vec![Value::Int(2)]])
            .unwrap();

        let mut source = RowDiffSource::for_tables(&old, &new, &DiffConfig::default()).unwrap();
        let rows = drain(&mut source);
        let types: Vec<DiffType> = rows.iter().map(|r| r.diff_type).collect();
        assert_eq!(
            types,
            vec![
                DiffType::ModifiedOld,
                DiffType::ModifiedNew,
                DiffType::Removed,
                DiffType::Added
            ]
        );

        let expected_old = BTreeMap::from([("name".to_string(), DiffType::ModifiedOld)]);
        let expected_new = BTreeMap::from([("name".to_string(), DiffType::ModifiedNew)]);
        assert_eq!(rows[0].col_diffs.as_ref(), Some(&expected_old));
        assert_eq!(rows[1].col_diffs.as_ref(), Some(&expected_new));
        assert_eq!(rows[0].row.get(1), Some(&Value::from("Ada")));
        assert_eq!(rows[1].row.get(1), Some(&Value::from("Ada L")));
        assert_eq!(rows[2].row.get(0), Some(&Value::Int(2)));
        assert!(rows[2].col_diffs.is_none());
        assert_eq!(rows[3].row.get(1), Some(&Value::from("Dee")));

        assert_eq!(source.next_diff().unwrap(), None);
        source.close().unwrap();
    }

    #[test]
    fn test_schema_change_column_diffs() {
        let vs = store();
        let old = Table::from_rows(&vs, schema(), vec![person(1, "Ada", 36)]).unwrap();
        let new_schema = Schema::new(vec![
            Column::new("id", 0, ValueKind::Int).primary_key(),
            Column::new("name", 1, ValueKind::String),
            Column::new("email", 3, ValueKind::String),
        ])
        .unwrap();
        let row = Row::from_values([
            (0, Value::Int(1)),
            (1, Value::from("Ada")),
            (3, Value::from("ada@example.com")),
        ]);
        let new = Table::from_rows(&vs, new_schema, vec![row]).unwrap();

        let mut source = RowDiffSource::for_tables(&old, &new, &DiffConfig::default()).unwrap();
        assert_eq!(source.schema().columns().len(), 4);
        let rows = drain(&mut source);
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0].col_diffs,
            Some(BTreeMap::from([("age".to_string(), DiffType::Removed)]))
        );
        assert_eq!(
            rows[1].col_diffs,
            Some(BTreeMap::from([("email".to_string(), DiffType::Added)]))
        );
    }

    fn corrupt_rows_source(on_old: &ValueStore) -> RowDiffSource {
        // rows written behind the schema's back: tag 1 holds an Int
        let old = Map::new(on_old).unwrap();
        let mut editor = old.edit();
        for id in 0..3 {
            let (key, value) = person(id, "ok", 1).to_kv(&schema()).unwrap();
            editor.set(key, value);
        }
        editor.set(
            Value::Tuple(vec![Value::Uint(0), Value::Int(10)]),
            Value::Tuple(vec![Value::Uint(1), Value::Int(5)]),
        );
        let new = editor.finalize().unwrap();
        let conv = RowConverter::identity(&schema());
        let differ = AsyncDiffer::start(old.tree().clone(), new.tree().clone(), &DiffConfig::default());
        RowDiffSource::new(differ, conv.clone(), conv, Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_bad_row_continue_and_abort() {
        let vs = store();

        let mut source = corrupt_rows_source(&vs);
        let mut good = 0;
        let mut seen = Vec::new();
        let stats = source
            .for_each_diff(
                |_| {
                    good += 1;
                    Ok(())
                },
                |e| {
                    seen.push(e.to_string());
                    BadRowAction::Continue
                },
                None,
            )
            .unwrap();
        assert_eq!(good, 3);
        assert_eq!(stats, PipelineStats { rows: 3, bad_rows: 1 });
        assert_eq!(seen.len(), 1);

        let mut source = corrupt_rows_source(&vs);
        let result = source.for_each_diff(|_| Ok(()), |_| BadRowAction::Abort, None);
        assert!(matches!(result, Err(Error::BadRow(_))));
    }

    #[test]
    fn test_pipeline_cancel() {
        let vs = store();
        let mut source = corrupt_rows_source(&vs);
        let token = CancelToken::new();
        token.cancel();
        let result = source.for_each_diff(|_| Ok(()), |_| BadRowAction::Continue, Some(&token));
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_mismatched_output_schemas() {
        let vs = store();
        let map = Map::new(&vs).unwrap();
        let other = Schema::new(vec![Column::new("k", 9, ValueKind::Int).primary_key()]).unwrap();
        let differ = AsyncDiffer::start(map.tree().clone(), map.tree().clone(), &DiffConfig::default());
        assert!(matches!(
            RowDiffSource::new(
                differ,
                RowConverter::identity(&schema()),
                RowConverter::identity(&other),
                Duration::from_secs(1)
            ),
            Err(Error::Schema(_))
        ));
    }
}
