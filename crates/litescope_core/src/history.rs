use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One executed action, as shown in the action-history view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionEntry {
    pub id: Uuid,
    /// Optional short tag, e.g. "drop table".
    pub name: Option<String>,
    pub sql: String,
    pub timestamp: i64,
    pub execution_time_ms: u64,
    pub affected_rows: Option<u64>,
}

impl ActionEntry {
    pub fn new(
        name: Option<String>,
        sql: String,
        execution_time: Duration,
        affected_rows: Option<u64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            sql,
            timestamp: chrono::Utc::now().timestamp(),
            execution_time_ms: execution_time.as_millis() as u64,
            affected_rows,
        }
    }

    pub fn sql_preview(&self, max_len: usize) -> String {
        let single_line = self.sql.split_whitespace().collect::<Vec<_>>().join(" ");
        if single_line.chars().count() <= max_len {
            return single_line;
        }
        let truncated: String = single_line.chars().take(max_len.saturating_sub(1)).collect();
        format!("{truncated}…")
    }
}

/// Bounded in-memory store; the host persists the serialized entries.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HistoryStore {
    entries: VecDeque<ActionEntry>,
    #[serde(skip)]
    capacity: usize,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self { entries: VecDeque::new(), capacity: capacity.max(1) }
    }

    pub fn push(&mut self, entry: ActionEntry) {
        self.entries.push_back(entry);
        // A deserialized store has no capacity; treat it as unbounded.
        let capacity = if self.capacity == 0 { usize::MAX } else { self.capacity };
        while self.entries.len() > capacity {
            self.entries.pop_front();
        }
    }

    /// Newest first.
    pub fn entries(&self) -> impl Iterator<Item = &ActionEntry> {
        self.entries.iter().rev()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
