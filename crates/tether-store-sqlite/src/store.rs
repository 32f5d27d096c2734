//! [`SqliteStore`] — the SQLite implementation of [`IdentityStore`].

use std::path::Path;

use chrono::Utc;
use rusqlite::OptionalExtension as _;
use uuid::Uuid;

use tether_core::{
  model::{Account, Contact, ContactField, Conversation, IdentityRecord, Inbox},
  store::IdentityStore,
};

use crate::{
  Error, Result,
  encode::{
    RawContact, RawConversation, RawIdentityRecord, RawInbox, encode_dt,
    encode_uuid,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Tether identity store backed by a single SQLite file.
///
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store — useful for testing.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  // ── Seeding writes ────────────────────────────────────────────────────────
  //
  // The engine never creates these rows; the surrounding ingestion pipeline
  // (and the test suite) does.

  pub async fn create_account(&self, name: &str) -> Result<Account> {
    let account = Account {
      account_id: Uuid::new_v4(),
      name:       name.to_owned(),
      created_at: Utc::now(),
    };

    let id_str   = encode_uuid(account.account_id);
    let at_str   = encode_dt(account.created_at);
    let name_str = account.name.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO accounts (account_id, name, created_at) VALUES (?1, ?2, ?3)",
          rusqlite::params![id_str, name_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(account)
  }

  pub async fn create_inbox(&self, account_id: Uuid, name: &str) -> Result<Inbox> {
    let inbox = Inbox {
      inbox_id: Uuid::new_v4(),
      account_id,
      name: name.to_owned(),
      created_at: Utc::now(),
    };

    let id_str      = encode_uuid(inbox.inbox_id);
    let account_str = encode_uuid(account_id);
    let at_str      = encode_dt(inbox.created_at);
    let name_str    = inbox.name.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO inboxes (inbox_id, account_id, name, created_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![id_str, account_str, name_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(inbox)
  }

  pub async fn create_contact(
    &self,
    account_id: Uuid,
    name: &str,
    phone_number: Option<&str>,
    identifier: Option<&str>,
  ) -> Result<Contact> {
    let contact = Contact {
      contact_id: Uuid::new_v4(),
      account_id,
      name: name.to_owned(),
      phone_number: phone_number.map(str::to_owned),
      identifier: identifier.map(str::to_owned),
      created_at: Utc::now(),
    };

    let id_str      = encode_uuid(contact.contact_id);
    let account_str = encode_uuid(account_id);
    let at_str      = encode_dt(contact.created_at);
    let name_str    = contact.name.clone();
    let phone_str   = contact.phone_number.clone();
    let ident_str   = contact.identifier.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO contacts (contact_id, account_id, name, phone_number, identifier, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
          rusqlite::params![id_str, account_str, name_str, phone_str, ident_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(contact)
  }

  pub async fn create_identity_record(
    &self,
    inbox_id: Uuid,
    contact_id: Uuid,
    source_id: &str,
  ) -> Result<IdentityRecord> {
    let record = IdentityRecord {
      record_id: Uuid::new_v4(),
      inbox_id,
      contact_id,
      source_id: source_id.to_owned(),
      created_at: Utc::now(),
    };

    let id_str      = encode_uuid(record.record_id);
    let inbox_str   = encode_uuid(inbox_id);
    let contact_str = encode_uuid(contact_id);
    let source_str  = record.source_id.clone();
    let at_str      = encode_dt(record.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO identity_records (record_id, inbox_id, contact_id, source_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, inbox_str, contact_str, source_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(record)
  }

  pub async fn create_conversation(
    &self,
    record: &IdentityRecord,
  ) -> Result<Conversation> {
    let conversation = Conversation {
      conversation_id: Uuid::new_v4(),
      record_id:       record.record_id,
      contact_id:      record.contact_id,
      inbox_id:        record.inbox_id,
      created_at:      Utc::now(),
    };

    let id_str      = encode_uuid(conversation.conversation_id);
    let record_str  = encode_uuid(record.record_id);
    let contact_str = encode_uuid(record.contact_id);
    let inbox_str   = encode_uuid(record.inbox_id);
    let at_str      = encode_dt(conversation.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO conversations (conversation_id, record_id, contact_id, inbox_id, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![id_str, record_str, contact_str, inbox_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(conversation)
  }

  // ── Read-backs ────────────────────────────────────────────────────────────

  pub async fn get_contact(&self, contact_id: Uuid) -> Result<Option<Contact>> {
    let id_str = encode_uuid(contact_id);

    let raw: Option<RawContact> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT contact_id, account_id, name, phone_number, identifier, created_at
             FROM contacts WHERE contact_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawContact {
                contact_id:   row.get(0)?,
                account_id:   row.get(1)?,
                name:         row.get(2)?,
                phone_number: row.get(3)?,
                identifier:   row.get(4)?,
                created_at:   row.get(5)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawContact::into_contact).transpose()
  }

  pub async fn get_record(&self, record_id: Uuid) -> Result<Option<IdentityRecord>> {
    let id_str = encode_uuid(record_id);

    let raw: Option<RawIdentityRecord> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT record_id, inbox_id, contact_id, source_id, created_at
             FROM identity_records WHERE record_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawIdentityRecord {
                record_id:  row.get(0)?,
                inbox_id:   row.get(1)?,
                contact_id: row.get(2)?,
                source_id:  row.get(3)?,
                created_at: row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawIdentityRecord::into_record).transpose()
  }

  /// All identity records binding `contact_id` within `inbox_id`.
  pub async fn records_for_contact(
    &self,
    inbox_id: Uuid,
    contact_id: Uuid,
  ) -> Result<Vec<IdentityRecord>> {
    let inbox_str   = encode_uuid(inbox_id);
    let contact_str = encode_uuid(contact_id);

    let raws: Vec<RawIdentityRecord> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT record_id, inbox_id, contact_id, source_id, created_at
           FROM identity_records
           WHERE inbox_id = ?1 AND contact_id = ?2
           ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![inbox_str, contact_str], |row| {
            Ok(RawIdentityRecord {
              record_id:  row.get(0)?,
              inbox_id:   row.get(1)?,
              contact_id: row.get(2)?,
              source_id:  row.get(3)?,
              created_at: row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawIdentityRecord::into_record).collect()
  }

  /// All conversations currently attached to `record_id`.
  pub async fn conversations_for_record(
    &self,
    record_id: Uuid,
  ) -> Result<Vec<Conversation>> {
    let record_str = encode_uuid(record_id);

    let raws: Vec<RawConversation> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT conversation_id, record_id, contact_id, inbox_id, created_at
           FROM conversations
           WHERE record_id = ?1
           ORDER BY created_at",
        )?;
        let rows = stmt
          .query_map(rusqlite::params![record_str], |row| {
            Ok(RawConversation {
              conversation_id: row.get(0)?,
              record_id:       row.get(1)?,
              contact_id:      row.get(2)?,
              inbox_id:        row.get(3)?,
              created_at:      row.get(4)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws
      .into_iter()
      .map(RawConversation::into_conversation)
      .collect()
  }
}

// ─── IdentityStore impl ──────────────────────────────────────────────────────

impl IdentityStore for SqliteStore {
  type Error = Error;

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn get_inbox(&self, inbox_id: Uuid) -> Result<Option<Inbox>> {
    let id_str = encode_uuid(inbox_id);

    let raw: Option<RawInbox> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT inbox_id, account_id, name, created_at
             FROM inboxes WHERE inbox_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawInbox {
                inbox_id:   row.get(0)?,
                account_id: row.get(1)?,
                name:       row.get(2)?,
                created_at: row.get(3)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawInbox::into_inbox).transpose()
  }

  async fn find_record_by_key(
    &self,
    inbox_id: Uuid,
    source_id: &str,
  ) -> Result<Option<IdentityRecord>> {
    let inbox_str  = encode_uuid(inbox_id);
    let source_str = source_id.to_owned();

    let raw: Option<RawIdentityRecord> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT record_id, inbox_id, contact_id, source_id, created_at
             FROM identity_records WHERE inbox_id = ?1 AND source_id = ?2",
            rusqlite::params![inbox_str, source_str],
            |row| {
              Ok(RawIdentityRecord {
                record_id:  row.get(0)?,
                inbox_id:   row.get(1)?,
                contact_id: row.get(2)?,
                source_id:  row.get(3)?,
                created_at: row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawIdentityRecord::into_record).transpose()
  }

  async fn find_contact_by_phone(
    &self,
    account_id: Uuid,
    phone_e164: &str,
  ) -> Result<Option<Contact>> {
    let account_str = encode_uuid(account_id);
    let phone_str   = phone_e164.to_owned();

    let raw: Option<RawContact> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT contact_id, account_id, name, phone_number, identifier, created_at
             FROM contacts
             WHERE account_id = ?1 AND phone_number = ?2
             ORDER BY created_at LIMIT 1",
            rusqlite::params![account_str, phone_str],
            |row| {
              Ok(RawContact {
                contact_id:   row.get(0)?,
                account_id:   row.get(1)?,
                name:         row.get(2)?,
                phone_number: row.get(3)?,
                identifier:   row.get(4)?,
                created_at:   row.get(5)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawContact::into_contact).transpose()
  }

  async fn find_record_for_contact(
    &self,
    inbox_id: Uuid,
    contact_id: Uuid,
  ) -> Result<Option<IdentityRecord>> {
    let inbox_str   = encode_uuid(inbox_id);
    let contact_str = encode_uuid(contact_id);

    let raw: Option<RawIdentityRecord> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            "SELECT record_id, inbox_id, contact_id, source_id, created_at
             FROM identity_records
             WHERE inbox_id = ?1 AND contact_id = ?2
             ORDER BY created_at LIMIT 1",
            rusqlite::params![inbox_str, contact_str],
            |row| {
              Ok(RawIdentityRecord {
                record_id:  row.get(0)?,
                inbox_id:   row.get(1)?,
                contact_id: row.get(2)?,
                source_id:  row.get(3)?,
                created_at: row.get(4)?,
              })
            },
          )
          .optional()?)
      })
      .await?;

    raw.map(RawIdentityRecord::into_record).transpose()
  }

  async fn contact_field_taken(
    &self,
    account_id: Uuid,
    field: ContactField,
    value: &str,
    exclude_contact_id: Uuid,
  ) -> Result<bool> {
    let column = match field {
      ContactField::Identifier => "identifier",
      ContactField::PhoneNumber => "phone_number",
    };
    let sql = format!(
      "SELECT 1 FROM contacts
       WHERE account_id = ?1 AND {column} = ?2 AND contact_id != ?3
       LIMIT 1"
    );

    let account_str = encode_uuid(account_id);
    let value_str   = value.to_owned();
    let exclude_str = encode_uuid(exclude_contact_id);

    let taken: bool = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &sql,
            rusqlite::params![account_str, value_str, exclude_str],
            |_| Ok(true),
          )
          .optional()?
          .unwrap_or(false))
      })
      .await?;

    Ok(taken)
  }

  // ── Transactional writes ──────────────────────────────────────────────────

  async fn merge_identity_records(
    &self,
    source_record_id: Uuid,
    target_record_id: Uuid,
  ) -> Result<()> {
    let source_str = encode_uuid(source_record_id);
    let target_str = encode_uuid(target_record_id);

    let deleted: usize = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        tx.execute(
          "UPDATE conversations SET record_id = ?1 WHERE record_id = ?2",
          rusqlite::params![target_str, source_str],
        )?;
        let deleted = tx.execute(
          "DELETE FROM identity_records WHERE record_id = ?1",
          rusqlite::params![source_str],
        )?;

        // Source row gone from under us: drop the transaction uncommitted
        // so the re-parenting above rolls back too.
        if deleted == 0 {
          return Ok(0);
        }

        tx.commit()?;
        Ok(deleted)
      })
      .await?;

    if deleted == 0 {
      return Err(Error::RecordNotFound(source_record_id));
    }
    Ok(())
  }

  async fn rekey_identity_record(
    &self,
    record_id: Uuid,
    new_source_id: &str,
    contact_id: Uuid,
    identifier: &str,
    phone_number: Option<&str>,
  ) -> Result<()> {
    let record_str  = encode_uuid(record_id);
    let source_str  = new_source_id.to_owned();
    let contact_str = encode_uuid(contact_id);
    let ident_str   = identifier.to_owned();
    let phone_str   = phone_number.map(str::to_owned);

    let (record_hit, contact_hit): (usize, usize) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;

        // A UNIQUE (inbox_id, source_id) violation surfaces here if a
        // racing migration already claimed the key.
        let record_hit = tx.execute(
          "UPDATE identity_records SET source_id = ?1 WHERE record_id = ?2",
          rusqlite::params![source_str, record_str],
        )?;
        if record_hit == 0 {
          return Ok((0, 0));
        }

        let contact_hit = match phone_str {
          Some(phone) => tx.execute(
            "UPDATE contacts SET identifier = ?1, phone_number = ?2 WHERE contact_id = ?3",
            rusqlite::params![ident_str, phone, contact_str],
          )?,
          None => tx.execute(
            "UPDATE contacts SET identifier = ?1 WHERE contact_id = ?2",
            rusqlite::params![ident_str, contact_str],
          )?,
        };
        if contact_hit == 0 {
          // Roll back the record re-key by dropping the transaction.
          return Ok((record_hit, 0));
        }

        tx.commit()?;
        Ok((record_hit, contact_hit))
      })
      .await?;

    if record_hit == 0 {
      return Err(Error::RecordNotFound(record_id));
    }
    if contact_hit == 0 {
      return Err(Error::ContactNotFound(contact_id));
    }
    Ok(())
  }
}
