//! Bulk-write executor.
//!
//! Homogeneous writes accumulate and flush as grouped statements —
//! multi-row inserts, per-table `DELETE ... WHERE id = ANY($1)` — in a
//! single transaction, automatically at 100 pending operations or on an
//! explicit `flush`. Duplicates *within* a batch are collapsed before
//! execution (first occurrence wins) and reported in the flush report;
//! conflicts against rows already in the table roll the whole batch
//! back with every conflicting key enumerated in one error.

use super::identifiers::{validate_table, validate_writable_column};
use super::{bind_params, DatabaseError, DatabaseManager, SqlParam};
use sqlx::Row;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Pending operations that trigger an automatic flush.
pub const FLUSH_THRESHOLD: usize = 100;

#[derive(Debug, Clone)]
struct PendingInsert {
    table: String,
    key_column: String,
    columns: Vec<String>,
    /// Natural-key value used for conflict reporting.
    key: String,
    values: Vec<SqlParam>,
}

#[derive(Debug, Clone)]
struct PendingUpdate {
    table: String,
    id: i64,
    assignments: Vec<(String, SqlParam)>,
}

#[derive(Debug, Clone)]
struct PendingDelete {
    table: String,
    id: i64,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    /// Keys submitted more than once in the same batch; only the first
    /// occurrence was executed.
    pub collapsed_duplicates: Vec<String>,
}

/// Accumulates writes and flushes them transactionally.
pub struct BatchExecutor {
    db: Arc<DatabaseManager>,
    threshold: usize,
    inserts: Vec<PendingInsert>,
    updates: Vec<PendingUpdate>,
    deletes: Vec<PendingDelete>,
}

impl BatchExecutor {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self::with_threshold(db, FLUSH_THRESHOLD)
    }

    pub fn with_threshold(db: Arc<DatabaseManager>, threshold: usize) -> Self {
        Self {
            db,
            threshold: threshold.max(1),
            inserts: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
        }
    }

    pub fn pending(&self) -> usize {
        self.inserts.len() + self.updates.len() + self.deletes.len()
    }

    /// Queue an insert. `key` is the natural-key value (a text column)
    /// used for duplicate collapsing and conflict reporting. Returns a
    /// report when the threshold triggered an automatic flush.
    pub async fn add_insert(
        &mut self,
        table: &str,
        key_column: &str,
        columns: &[&str],
        key: &str,
        values: Vec<SqlParam>,
    ) -> Result<Option<BatchReport>, DatabaseError> {
        validate_table(table)?;
        validate_writable_column(key_column)?;
        for column in columns {
            validate_writable_column(column)?;
        }
        if columns.len() != values.len() {
            return Err(DatabaseError::Decode(format!(
                "insert into {table}: {} columns but {} values",
                columns.len(),
                values.len()
            )));
        }

        self.inserts.push(PendingInsert {
            table: table.to_string(),
            key_column: key_column.to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            key: key.to_string(),
            values,
        });
        self.maybe_flush().await
    }

    /// Queue an update by id.
    pub async fn add_update(
        &mut self,
        table: &str,
        id: i64,
        assignments: Vec<(&str, SqlParam)>,
    ) -> Result<Option<BatchReport>, DatabaseError> {
        validate_table(table)?;
        for (column, _) in &assignments {
            validate_writable_column(column)?;
        }
        self.updates.push(PendingUpdate {
            table: table.to_string(),
            id,
            assignments: assignments
                .into_iter()
                .map(|(c, v)| (c.to_string(), v))
                .collect(),
        });
        self.maybe_flush().await
    }

    /// Queue a delete by id.
    pub async fn add_delete(
        &mut self,
        table: &str,
        id: i64,
    ) -> Result<Option<BatchReport>, DatabaseError> {
        validate_table(table)?;
        self.deletes.push(PendingDelete {
            table: table.to_string(),
            id,
        });
        self.maybe_flush().await
    }

    async fn maybe_flush(&mut self) -> Result<Option<BatchReport>, DatabaseError> {
        if self.pending() >= self.threshold {
            Ok(Some(self.flush().await?))
        } else {
            Ok(None)
        }
    }

    /// Execute everything pending in one transaction.
    ///
    /// On a unique-constraint conflict against existing rows the whole
    /// batch rolls back and the error carries every conflicting key.
    pub async fn flush(&mut self) -> Result<BatchReport, DatabaseError> {
        if self.pending() == 0 {
            return Ok(BatchReport::default());
        }

        let (inserts, collapsed) = collapse_duplicates(std::mem::take(&mut self.inserts));
        let updates = std::mem::take(&mut self.updates);
        let deletes = std::mem::take(&mut self.deletes);

        let insert_groups = group_inserts(inserts);
        let report = self
            .db
            .within_transaction(move |tx| {
                Box::pin(async move {
                    let mut report = BatchReport::default();
                    let mut conflicts: Vec<String> = Vec::new();

                    for group in &insert_groups {
                        let sql = build_insert_sql(group);
                        let mut params = Vec::new();
                        for row in &group.rows {
                            params.extend(row.values.iter().cloned());
                        }

                        let returned = bind_params(sqlx::query(&sql), &params)
                            .fetch_all(&mut **tx)
                            .await?;
                        let kept: HashSet<String> = returned
                            .iter()
                            .filter_map(|row| row.try_get::<String, _>(0).ok())
                            .collect();

                        for row in &group.rows {
                            if kept.contains(&row.key) {
                                report.inserted += 1;
                            } else {
                                conflicts.push(row.key.clone());
                            }
                        }
                    }

                    for update in &updates {
                        let sql = build_update_sql(update);
                        let mut params: Vec<SqlParam> =
                            update.assignments.iter().map(|(_, v)| v.clone()).collect();
                        params.push(SqlParam::I64(update.id));
                        let result = bind_params(sqlx::query(&sql), &params)
                            .execute(&mut **tx)
                            .await?;
                        report.updated += result.rows_affected();
                    }

                    for (table, ids) in group_deletes(&deletes) {
                        let sql = format!("DELETE FROM {table} WHERE id = ANY($1)");
                        let result =
                            bind_params(sqlx::query(&sql), &[SqlParam::I64Array(ids)])
                                .execute(&mut **tx)
                                .await?;
                        report.deleted += result.rows_affected();
                    }

                    if !conflicts.is_empty() {
                        warn!(
                            conflicts = conflicts.len(),
                            "batch rolled back on unique conflicts"
                        );
                        return Err(DatabaseError::UniqueConflicts(conflicts));
                    }

                    Ok(report)
                })
            })
            .await?;

        let mut report = report;
        report.collapsed_duplicates = collapsed;
        debug!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "batch flushed"
        );
        Ok(report)
    }
}

impl Drop for BatchExecutor {
    fn drop(&mut self) {
        if self.pending() > 0 {
            warn!(
                pending = self.pending(),
                "batch executor dropped with unflushed operations"
            );
        }
    }
}

struct InsertGroup {
    table: String,
    key_column: String,
    columns: Vec<String>,
    rows: Vec<PendingInsert>,
}

/// Collapse rows sharing a (table, key) identity; first wins.
fn collapse_duplicates(inserts: Vec<PendingInsert>) -> (Vec<PendingInsert>, Vec<String>) {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut kept = Vec::with_capacity(inserts.len());
    let mut collapsed = Vec::new();
    for insert in inserts {
        let identity = (insert.table.clone(), insert.key.clone());
        if seen.insert(identity) {
            kept.push(insert);
        } else {
            collapsed.push(insert.key);
        }
    }
    (kept, collapsed)
}

/// Group homogeneous inserts into multi-row statements.
fn group_inserts(inserts: Vec<PendingInsert>) -> Vec<InsertGroup> {
    let mut groups: Vec<InsertGroup> = Vec::new();
    for insert in inserts {
        match groups.iter_mut().find(|g| {
            g.table == insert.table && g.columns == insert.columns && g.key_column == insert.key_column
        }) {
            Some(group) => group.rows.push(insert),
            None => groups.push(InsertGroup {
                table: insert.table.clone(),
                key_column: insert.key_column.clone(),
                columns: insert.columns.clone(),
                rows: vec![insert],
            }),
        }
    }
    groups
}

/// Multi-row insert with per-row conflict detection: rows that hit an
/// existing unique value are skipped by the statement and identified by
/// the missing `RETURNING` key.
fn build_insert_sql(group: &InsertGroup) -> String {
    let columns = group.columns.join(", ");
    let width = group.columns.len();
    let rows: Vec<String> = (0..group.rows.len())
        .map(|row| {
            let placeholders: Vec<String> = (0..width)
                .map(|col| format!("${}", row * width + col + 1))
                .collect();
            format!("({})", placeholders.join(", "))
        })
        .collect();
    format!(
        "INSERT INTO {} ({}) VALUES {} ON CONFLICT DO NOTHING RETURNING {}",
        group.table,
        columns,
        rows.join(", "),
        group.key_column
    )
}

fn build_update_sql(update: &PendingUpdate) -> String {
    let assignments: Vec<String> = update
        .assignments
        .iter()
        .enumerate()
        .map(|(i, (column, _))| format!("{column} = ${}", i + 1))
        .collect();
    format!(
        "UPDATE {} SET {} WHERE id = ${}",
        update.table,
        assignments.join(", "),
        update.assignments.len() + 1
    )
}

fn group_deletes(deletes: &[PendingDelete]) -> Vec<(String, Vec<i64>)> {
    let mut groups: Vec<(String, Vec<i64>)> = Vec::new();
    for delete in deletes {
        match groups.iter_mut().find(|(table, _)| table == &delete.table) {
            Some((_, ids)) => ids.push(delete.id),
            None => groups.push((delete.table.clone(), vec![delete.id])),
        }
    }
    groups
}
