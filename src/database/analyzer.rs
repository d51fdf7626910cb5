//! Slow-query tracking and index suggestion.
//!
//! Every executed query reports its SQL template (templates bind with
//! `$n` placeholders, so the text is already normalized), the bound
//! parameter shape, duration and row count. The analyzer keeps the 100
//! slowest calls over a rolling 24 h window, flags anything over
//! 500 ms, and can point at predicate columns that no known index
//! covers.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

/// Calls above this duration are classified as slow.
pub const SLOW_THRESHOLD: Duration = Duration::from_millis(500);

/// Retained slowest-query count.
pub const RETAINED_QUERIES: usize = 100;

/// Rolling retention window.
pub const RETENTION_WINDOW: chrono::Duration = chrono::Duration::hours(24);

/// One recorded query execution.
#[derive(Debug, Clone)]
pub struct QueryRecord {
    pub sql: String,
    pub param_shape: String,
    pub duration: Duration,
    pub rows: u64,
    pub at: DateTime<Utc>,
}

impl QueryRecord {
    pub fn is_slow(&self) -> bool {
        self.duration >= SLOW_THRESHOLD
    }
}

/// A predicate column with no covering index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSuggestion {
    pub table: String,
    pub column: String,
    pub occurrences: usize,
}

static FROM_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfrom\s+([a-z_][a-z0-9_]*)").expect("static regex"));
static PREDICATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b([a-z_][a-z0-9_]*)\s*(?:=|>|<|>=|<=|<>|!=|like|ilike|@@|<->|<=>)")
        .expect("static regex")
});

/// Query analyzer. Shared behind an `Arc`; interior mutability only.
#[derive(Default)]
pub struct QueryAnalyzer {
    slowest: Mutex<Vec<QueryRecord>>,
    known_indexes: Mutex<HashMap<String, HashSet<String>>>,
}

impl QueryAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an index the schema is known to carry, so it is not
    /// re-suggested.
    pub fn register_index(&self, table: &str, column: &str) {
        self.known_indexes
            .lock()
            .expect("analyzer mutex poisoned")
            .entry(table.to_string())
            .or_default()
            .insert(column.to_string());
    }

    /// Report one executed query.
    pub fn record(&self, sql: &str, param_shape: &str, duration: Duration, rows: u64) {
        let record = QueryRecord {
            sql: sql.to_string(),
            param_shape: param_shape.to_string(),
            duration,
            rows,
            at: Utc::now(),
        };

        if record.is_slow() {
            warn!(
                duration_ms = duration.as_millis() as u64,
                rows,
                sql = %compact(sql),
                "slow query"
            );
        }

        let mut slowest = self.slowest.lock().expect("analyzer mutex poisoned");
        let horizon = Utc::now() - RETENTION_WINDOW;
        slowest.retain(|r| r.at >= horizon);

        if slowest.len() < RETAINED_QUERIES {
            slowest.push(record);
            return;
        }
        // Replace the fastest retained entry if this one is slower.
        if let Some((idx, fastest)) = slowest
            .iter()
            .enumerate()
            .min_by_key(|(_, r)| r.duration)
            .map(|(idx, r)| (idx, r.duration))
        {
            if record.duration > fastest {
                slowest[idx] = record;
            }
        }
    }

    /// Retained queries, slowest first.
    pub fn slow_queries(&self) -> Vec<QueryRecord> {
        let mut records: Vec<QueryRecord> = {
            let slowest = self.slowest.lock().expect("analyzer mutex poisoned");
            let horizon = Utc::now() - RETENTION_WINDOW;
            slowest.iter().filter(|r| r.at >= horizon).cloned().collect()
        };
        records.sort_by(|a, b| b.duration.cmp(&a.duration));
        records
    }

    /// Inspect retained slow queries for predicate columns absent from
    /// the known indexes, most frequent first.
    pub fn suggest_indexes(&self) -> Vec<IndexSuggestion> {
        let known = self.known_indexes.lock().expect("analyzer mutex poisoned");
        let mut counts: HashMap<(String, String), usize> = HashMap::new();

        for record in self.slow_queries() {
            if !record.is_slow() {
                continue;
            }
            let Some(table) = FROM_RE
                .captures(&record.sql)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_lowercase())
            else {
                continue;
            };
            let Some(where_clause) = record
                .sql
                .to_lowercase()
                .split_once(" where ")
                .map(|(_, tail)| tail.to_string())
            else {
                continue;
            };
            for cap in PREDICATE_RE.captures_iter(&where_clause) {
                let column = cap[1].to_string();
                let covered = known
                    .get(&table)
                    .map(|cols| cols.contains(&column))
                    .unwrap_or(false);
                if !covered {
                    *counts.entry((table.clone(), column)).or_insert(0) += 1;
                }
            }
        }

        let mut suggestions: Vec<IndexSuggestion> = counts
            .into_iter()
            .map(|((table, column), occurrences)| IndexSuggestion {
                table,
                column,
                occurrences,
            })
            .collect();
        suggestions.sort_by(|a, b| b.occurrences.cmp(&a.occurrences));
        suggestions
    }
}

fn compact(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}
