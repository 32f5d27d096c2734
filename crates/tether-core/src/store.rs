//! The `IdentityStore` trait — the persistence seam the engine runs against.
//!
//! The trait is implemented by storage backends (e.g. `tether-store-sqlite`).
//! The reconciliation engine depends on this abstraction, not on any concrete
//! backend. Reads are side-effect-free snapshots; the two write operations
//! are each a single atomic transaction in any conforming backend.

use std::future::Future;

use uuid::Uuid;

use crate::model::{Contact, ContactField, IdentityRecord, Inbox};

/// Abstraction over the relational state the engine reconciles.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes. Implementations must guarantee that the
/// two mutating methods commit all of their row updates or none of them —
/// partial application must never be observable to concurrent readers.
pub trait IdentityStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Retrieve an inbox by id. Resolves the account scope for contact
  /// lookups and conflict probes.
  fn get_inbox(
    &self,
    inbox_id: Uuid,
  ) -> impl Future<Output = Result<Option<Inbox>, Self::Error>> + Send + '_;

  /// Find the identity record keyed by `source_id` in this inbox, if any.
  /// Backs both the phone-key and the lid-key lookup.
  fn find_record_by_key<'a>(
    &'a self,
    inbox_id: Uuid,
    source_id: &'a str,
  ) -> impl Future<Output = Result<Option<IdentityRecord>, Self::Error>> + Send + 'a;

  /// Find a contact in the account whose stored `phone_number` equals
  /// `phone_e164` (already in `+<digits>` form). Fallback path used only
  /// when no phone-keyed identity record exists.
  fn find_contact_by_phone<'a>(
    &'a self,
    account_id: Uuid,
    phone_e164: &'a str,
  ) -> impl Future<Output = Result<Option<Contact>, Self::Error>> + Send + 'a;

  /// Find the identity record binding `contact_id` within this inbox, if
  /// any. Used by the fallback branch after a contact was located by its
  /// stored phone number.
  fn find_record_for_contact(
    &self,
    inbox_id: Uuid,
    contact_id: Uuid,
  ) -> impl Future<Output = Result<Option<IdentityRecord>, Self::Error>> + Send + '_;

  /// Does any contact in the account other than `exclude_contact_id`
  /// already hold `value` in `field`?
  ///
  /// The single conflict predicate shared by every guarded branch. Must be
  /// evaluated before the corresponding mutation, never after.
  fn contact_field_taken<'a>(
    &'a self,
    account_id: Uuid,
    field: ContactField,
    value: &'a str,
    exclude_contact_id: Uuid,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + 'a;

  // ── Transactional writes ──────────────────────────────────────────────

  /// Re-parent every conversation from `source_record_id` to
  /// `target_record_id`, then delete the source record. One transaction.
  ///
  /// Callers must already have established that both records belong to the
  /// same contact; this method performs no conflict checking of its own.
  fn merge_identity_records(
    &self,
    source_record_id: Uuid,
    target_record_id: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Re-key an identity record and update its owning contact, in one
  /// transaction: set the record's `source_id` to `new_source_id`, the
  /// contact's `identifier` to `identifier`, and — when `phone_number` is
  /// `Some` — the contact's `phone_number`.
  ///
  /// A UNIQUE violation on (inbox_id, source_id) aborts the whole
  /// transaction and surfaces as an error; it indicates a racing migration
  /// already claimed the key.
  fn rekey_identity_record<'a>(
    &'a self,
    record_id: Uuid,
    new_source_id: &'a str,
    contact_id: Uuid,
    identifier: &'a str,
    phone_number: Option<&'a str>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;
}
