//! Domain rows the reconciliation engine reads and mutates.
//!
//! These are thin row structs; all meaningful behaviour lives in the engine
//! ([`crate::reconcile`]) and the store trait ([`crate::store`]). An
//! [`IdentityRecord`] is the join point conversations attach to — the same
//! real contact can accumulate several per inbox over time, one per external
//! key the channel has used for them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Scoping rows ────────────────────────────────────────────────────────────

/// Top-level tenancy scope. Owns contacts and inboxes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
  pub account_id: Uuid,
  pub name:       String,
  pub created_at: DateTime<Utc>,
}

/// A channel endpoint within an account. All identity-record lookups and
/// source-key uniqueness are scoped to one inbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbox {
  pub inbox_id:   Uuid,
  pub account_id: Uuid,
  pub name:       String,
  pub created_at: DateTime<Utc>,
}

// ─── Contact ─────────────────────────────────────────────────────────────────

/// A person the account exchanges messages with.
///
/// `phone_number` (in `+<digits>` form) and `identifier` (an opaque tag
/// assigned by the channel provider) are each effectively unique within an
/// account. The engine preserves that uniqueness by refusing any mutation
/// that would collide with another contact; it never assumes the database
/// enforces it against its own writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
  pub contact_id:   Uuid,
  pub account_id:   Uuid,
  pub name:         String,
  pub phone_number: Option<String>,
  pub identifier:   Option<String>,
  pub created_at:   DateTime<Utc>,
}

/// Which unique [`Contact`] column a conflict probe inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
  Identifier,
  PhoneNumber,
}

// ─── Identity record ─────────────────────────────────────────────────────────

/// A (inbox, source key) → contact binding.
///
/// `source_id` is the external key the channel addressed the contact by:
/// either a raw phone string or a linked-identity token. At most one record
/// exists per (inbox, source_id); the store backs this with a UNIQUE index
/// as the last-resort guard against racing migrations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
  pub record_id:  Uuid,
  pub inbox_id:   Uuid,
  pub contact_id: Uuid,
  pub source_id:  String,
  pub created_at: DateTime<Utc>,
}

// ─── Conversation ────────────────────────────────────────────────────────────

/// A message thread. Belongs to exactly one identity record at any time;
/// a merge may re-point it at a different record, but it is never deleted
/// by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
  pub conversation_id: Uuid,
  pub record_id:       Uuid,
  pub contact_id:      Uuid,
  pub inbox_id:        Uuid,
  pub created_at:      DateTime<Utc>,
}
