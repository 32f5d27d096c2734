//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings. UUIDs are stored as
//! hyphenated lowercase strings.

use chrono::{DateTime, Utc};
use tether_core::model::{Contact, Conversation, IdentityRecord, Inbox};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from an `inboxes` row.
pub struct RawInbox {
  pub inbox_id:   String,
  pub account_id: String,
  pub name:       String,
  pub created_at: String,
}

impl RawInbox {
  pub fn into_inbox(self) -> Result<Inbox> {
    Ok(Inbox {
      inbox_id:   decode_uuid(&self.inbox_id)?,
      account_id: decode_uuid(&self.account_id)?,
      name:       self.name,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `contacts` row.
pub struct RawContact {
  pub contact_id:   String,
  pub account_id:   String,
  pub name:         String,
  pub phone_number: Option<String>,
  pub identifier:   Option<String>,
  pub created_at:   String,
}

impl RawContact {
  pub fn into_contact(self) -> Result<Contact> {
    Ok(Contact {
      contact_id:   decode_uuid(&self.contact_id)?,
      account_id:   decode_uuid(&self.account_id)?,
      name:         self.name,
      phone_number: self.phone_number,
      identifier:   self.identifier,
      created_at:   decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from an `identity_records` row.
pub struct RawIdentityRecord {
  pub record_id:  String,
  pub inbox_id:   String,
  pub contact_id: String,
  pub source_id:  String,
  pub created_at: String,
}

impl RawIdentityRecord {
  pub fn into_record(self) -> Result<IdentityRecord> {
    Ok(IdentityRecord {
      record_id:  decode_uuid(&self.record_id)?,
      inbox_id:   decode_uuid(&self.inbox_id)?,
      contact_id: decode_uuid(&self.contact_id)?,
      source_id:  self.source_id,
      created_at: decode_dt(&self.created_at)?,
    })
  }
}

/// Raw strings read directly from a `conversations` row.
pub struct RawConversation {
  pub conversation_id: String,
  pub record_id:       String,
  pub contact_id:      String,
  pub inbox_id:        String,
  pub created_at:      String,
}

impl RawConversation {
  pub fn into_conversation(self) -> Result<Conversation> {
    Ok(Conversation {
      conversation_id: decode_uuid(&self.conversation_id)?,
      record_id:       decode_uuid(&self.record_id)?,
      contact_id:      decode_uuid(&self.contact_id)?,
      inbox_id:        decode_uuid(&self.inbox_id)?,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}
