//! Query Audit Log
//!
//! One entry per question handled: what was asked, the final query text and
//! how the run ended. Entries are bounded in memory and, when a file is
//! configured, persisted as a single JSON array after every write.

use crate::error::{AnalystError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_query: String,
    pub query_text: String,
    pub execution_id: String,
    pub success: bool,
    pub row_count: usize,
    pub attempts: u32,
    pub error: Option<String>,
}

impl AuditEntry {
    pub fn new(
        user_query: impl Into<String>,
        query_text: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            user_query: user_query.into(),
            query_text: query_text.into(),
            execution_id: execution_id.into(),
            success: false,
            row_count: 0,
            attempts: 1,
            error: None,
        }
    }

    pub fn succeeded(mut self, row_count: usize, attempts: u32) -> Self {
        self.success = true;
        self.row_count = row_count;
        self.attempts = attempts;
        self.error = None;
        self
    }

    pub fn failed(mut self, error: impl Into<String>, attempts: u32) -> Self {
        self.success = false;
        self.row_count = 0;
        self.attempts = attempts;
        self.error = Some(error.into());
        self
    }
}

/// Receives one entry per terminal outcome.
pub trait AuditSink: Send + Sync {
    fn log(&self, entry: AuditEntry) -> Result<()>;

    /// Most recent entries, oldest first.
    fn recent(&self, limit: usize) -> Vec<AuditEntry>;

    /// Case-insensitive substring match on the question or the query text.
    fn search(&self, term: &str) -> Vec<AuditEntry>;

    fn statistics(&self) -> AuditStatistics;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStatistics {
    pub total_queries: usize,
    pub successful_queries: usize,
    pub failed_queries: usize,
    /// Percentage, rounded to two decimals.
    pub success_rate: f64,
    pub average_attempts: f64,
    pub total_rows_returned: usize,
}

pub struct QueryLog {
    log_file: Option<PathBuf>,
    entries: Mutex<VecDeque<AuditEntry>>,
    capacity: usize,
}

impl QueryLog {
    /// A log that never touches the filesystem.
    pub fn in_memory(capacity: usize) -> Self {
        Self {
            log_file: None,
            entries: Mutex::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open a file-backed log, loading any entries already on disk.
    pub fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self> {
        let path = path.into();
        let capacity = capacity.max(1);

        let mut entries: VecDeque<AuditEntry> = match fs::read_to_string(&path) {
            Ok(text) if !text.trim().is_empty() => match serde_json::from_str::<Vec<AuditEntry>>(&text) {
                Ok(entries) => entries.into(),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unreadable query log, starting empty");
                    VecDeque::new()
                }
            },
            Ok(_) => VecDeque::new(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(e) => return Err(e.into()),
        };
        while entries.len() > capacity {
            entries.pop_front();
        }

        let log = Self {
            log_file: Some(path),
            entries: Mutex::new(entries),
            capacity,
        };
        log.persist(&log.lock())?;
        Ok(log)
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AuditEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, entries: &VecDeque<AuditEntry>) -> Result<()> {
        let Some(path) = &self.log_file else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(entries)?;
        fs::write(path, json)
            .map_err(|e| AnalystError::Audit(format!("Failed to write {}: {}", path.display(), e)))
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl AuditSink for QueryLog {
    fn log(&self, entry: AuditEntry) -> Result<()> {
        let mut entries = self.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        self.persist(&entries)
    }

    fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    fn search(&self, term: &str) -> Vec<AuditEntry> {
        let needle = term.to_lowercase();
        self.lock()
            .iter()
            .filter(|e| {
                e.user_query.to_lowercase().contains(&needle)
                    || e.query_text.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect()
    }

    fn statistics(&self) -> AuditStatistics {
        let entries = self.lock();
        let total = entries.len();
        if total == 0 {
            return AuditStatistics {
                total_queries: 0,
                successful_queries: 0,
                failed_queries: 0,
                success_rate: 0.0,
                average_attempts: 0.0,
                total_rows_returned: 0,
            };
        }

        let successful = entries.iter().filter(|e| e.success).count();
        let attempts: u64 = entries.iter().map(|e| e.attempts as u64).sum();
        AuditStatistics {
            total_queries: total,
            successful_queries: successful,
            failed_queries: total - successful,
            success_rate: round2(successful as f64 / total as f64 * 100.0),
            average_attempts: round2(attempts as f64 / total as f64),
            total_rows_returned: entries.iter().map(|e| e.row_count).sum(),
        }
    }
}
