//! Durable staging of background records pending sync.
//!
//! The worker only appends. Reading and deleting belong to the sync
//! consumer (see the `pending` and `ack` subcommands).

mod record;
mod staging;

pub use record::{iso_timestamp, StagedRecord};
pub use staging::StagingStore;

use crate::error::DbError;

/// Append-only destination for staged records.
pub trait RecordSink: Send + Sync {
  /// Durably store `record`, returning its key once committed.
  fn append(&self, record: &StagedRecord) -> Result<i64, DbError>;
}

/// Sink used when the staging database could not be opened at boot.
/// Every append fails with the original reason.
pub struct Unavailable {
  reason: String,
}

impl Unavailable {
  pub fn new(error: &DbError) -> Self {
    Self {
      reason: error.to_string(),
    }
  }
}

impl RecordSink for Unavailable {
  fn append(&self, _record: &StagedRecord) -> Result<i64, DbError> {
    Err(DbError::Unavailable(self.reason.clone()))
  }
}
