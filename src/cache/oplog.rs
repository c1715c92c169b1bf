//! Operation Log
//!
//! Bounded ring buffer of recent core operations for diagnostics. The
//! oldest record is dropped once the buffer is full.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::metrics::OperationType;

/// Default number of retained records
pub const DEFAULT_OPERATION_LOG_CAPACITY: usize = 1000;

/// Extra facts about an operation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OperationMetadata {
    /// Serialized value size in bytes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compressed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard_id: Option<u32>,
    /// Keys touched by a batched call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One completed operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub op: OperationType,
    pub key: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub success: bool,
    pub retry_count: u32,
    pub metadata: OperationMetadata,
}

impl OperationRecord {
    pub fn new(op: OperationType, key: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            op,
            key: key.into(),
            started_at,
            completed_at: started_at,
            success: false,
            retry_count: 0,
            metadata: OperationMetadata::default(),
        }
    }

    pub fn duration_ms(&self) -> i64 {
        (self.completed_at - self.started_at).num_milliseconds()
    }
}

/// Append-only bounded log
#[derive(Debug)]
pub struct OperationLog {
    capacity: usize,
    records: Mutex<VecDeque<OperationRecord>>,
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new(DEFAULT_OPERATION_LOG_CAPACITY)
    }
}

impl OperationLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
        }
    }

    pub fn push(&self, record: OperationRecord) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.lock();
        while records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// Up to `n` most recent records, oldest first
    pub fn recent(&self, n: usize) -> Vec<OperationRecord> {
        let records = self.records.lock();
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}
