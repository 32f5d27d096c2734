//! Error type for `tether-store-sqlite`.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] tether_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// A transactional write targeted a row that no longer exists.
  #[error("identity record not found: {0}")]
  RecordNotFound(Uuid),

  #[error("contact not found: {0}")]
  ContactNotFound(Uuid),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
