//! SQL schema for the Tether SQLite store.
//!
//! Executed once at connection startup via `PRAGMA user_version`. Future
//! migrations will be gated on that version number.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS accounts (
    account_id  TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inboxes (
    inbox_id    TEXT PRIMARY KEY,
    account_id  TEXT NOT NULL REFERENCES accounts(account_id),
    name        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

-- phone_number ('+<digits>') and identifier are each effectively unique
-- per account. The engine preserves that by probing before every write,
-- so no UNIQUE index is declared here; legacy data may hold duplicates.
CREATE TABLE IF NOT EXISTS contacts (
    contact_id    TEXT PRIMARY KEY,
    account_id    TEXT NOT NULL REFERENCES accounts(account_id),
    name          TEXT NOT NULL,
    phone_number  TEXT,
    identifier    TEXT,
    created_at    TEXT NOT NULL
);

-- One row per external key the channel has used for a contact in an
-- inbox. The UNIQUE index is the last-resort guard against two racing
-- migrations claiming the same key.
CREATE TABLE IF NOT EXISTS identity_records (
    record_id   TEXT PRIMARY KEY,
    inbox_id    TEXT NOT NULL REFERENCES inboxes(inbox_id),
    contact_id  TEXT NOT NULL REFERENCES contacts(contact_id),
    source_id   TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE (inbox_id, source_id)
);

CREATE TABLE IF NOT EXISTS conversations (
    conversation_id TEXT PRIMARY KEY,
    record_id       TEXT NOT NULL REFERENCES identity_records(record_id),
    contact_id      TEXT NOT NULL REFERENCES contacts(contact_id),
    inbox_id        TEXT NOT NULL REFERENCES inboxes(inbox_id),
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS contacts_account_phone_idx
    ON contacts(account_id, phone_number);
CREATE INDEX IF NOT EXISTS contacts_account_identifier_idx
    ON contacts(account_id, identifier);
CREATE INDEX IF NOT EXISTS identity_records_contact_idx
    ON identity_records(inbox_id, contact_id);
CREATE INDEX IF NOT EXISTS conversations_record_idx
    ON conversations(record_id);

PRAGMA user_version = 1;
";
