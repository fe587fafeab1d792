//! Audit persistence contract and bundled stores.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::info;

use super::record::ActivityRecord;
use crate::error::{AppError, AppResult};

/// Destination for finalized activity records.
///
/// Implementations may perform I/O. Errors are reported as
/// `AppError::Persistence` and are never surfaced to the audited operation.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn create_log(&self, record: &ActivityRecord) -> AppResult<()>;
}

/// Keeps records in memory. Used by tests and local runs.
#[derive(Debug, Default)]
pub struct InMemoryAuditStore {
    records: Mutex<Vec<ActivityRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything stored so far, oldest first.
    pub fn records(&self) -> Vec<ActivityRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn create_log(&self, record: &ActivityRecord) -> AppResult<()> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// Emits each record as one JSON line on the `audit` tracing target.
///
/// Route that target to durable storage with the subscriber configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditStore;

#[async_trait]
impl AuditStore for TracingAuditStore {
    async fn create_log(&self, record: &ActivityRecord) -> AppResult<()> {
        let json = serde_json::to_string(record)
            .map_err(|e| AppError::Persistence(format!("cannot encode record: {e}")))?;
        info!(
            target: "audit",
            record_id = %record.id,
            user_id = %record.user_id,
            action = record.action.as_str(),
            status = record.status.as_str(),
            record = %json,
            "activity"
        );
        Ok(())
    }
}
