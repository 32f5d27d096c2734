//! The reconciliation engine: one pass that collapses a contact's phone-keyed
//! and lid-keyed identity trails into one.
//!
//! A pass is a bounded read-then-write sequence: resolve the two candidate
//! records, pick exactly one of four branches (a pure decision), run the
//! conflict guard on branches that mutate contact fields, then hand one
//! transactional write to the store. The engine keeps no state between
//! calls and is idempotent — a second identical invocation lands on a
//! no-op path.
//!
//! Ambiguous or unsafe merges fail silently closed: they return
//! [`Outcome::Skipped`] with state untouched. Only persistence and
//! integrity failures propagate as errors.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
  Error, Result,
  model::{ContactField, IdentityRecord, Inbox},
  store::IdentityStore,
};

// ─── Inputs ──────────────────────────────────────────────────────────────────

/// One reconciliation request, as extracted from an inbound provider payload
/// by the ingestion pipeline. The engine validates nothing beyond the keys
/// being non-empty and distinct.
#[derive(Debug, Clone)]
pub struct ReconcileRequest {
  pub inbox_id:   Uuid,
  /// Raw phone-form key, digits only (no leading `+`).
  pub phone:      String,
  /// Linked-identity token issued by the channel provider.
  pub lid:        String,
  /// Opaque external-identity tag to stamp onto the contact.
  pub identifier: String,
}

impl ReconcileRequest {
  pub fn new(
    inbox_id: Uuid,
    phone: impl Into<String>,
    lid: impl Into<String>,
    identifier: impl Into<String>,
  ) -> Self {
    Self {
      inbox_id,
      phone: phone.into(),
      lid: lid.into(),
      identifier: identifier.into(),
    }
  }

  /// The stored-contact form of the phone key.
  fn phone_e164(&self) -> String { format!("+{}", self.phone) }
}

// ─── Outcomes ────────────────────────────────────────────────────────────────

/// Why a pass declined to mutate anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
  /// Phone or lid was empty.
  BlankKey,
  /// Phone and lid are the same string; nothing to reconcile.
  IdenticalKeys,
  /// The two keys belong to two different contacts. Merging would combine
  /// unrelated people's histories, so both records are left untouched.
  CrossContactCollision,
  /// Another contact already holds the target identifier.
  IdentifierTaken,
  /// Another contact already holds the target phone number.
  PhoneNumberTaken,
  /// A lid-keyed record already exists in the inbox; re-keying would
  /// duplicate a source key.
  LidKeyPresent,
  /// No contact in the account stores this phone number.
  NoMatchingContact,
  /// The located contact has no identity record in this inbox.
  NoRecordForContact,
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
  /// Two records for the same contact were collapsed into the lid-keyed
  /// one; all conversations moved, the phone-keyed record is gone.
  Merged,
  /// The phone-keyed record was re-keyed to the lid and its contact's
  /// identifier and phone number updated.
  Rekeyed,
  /// A contact located by stored phone number had its record re-keyed and
  /// its identifier updated; the phone number was left as-is.
  FallbackRekeyed,
  /// Nothing was changed.
  Skipped(SkipReason),
}

// ─── Dispatch ────────────────────────────────────────────────────────────────

/// The four mutually exclusive branches over the two lookup results.
#[derive(Debug)]
enum Branch {
  /// Both records exist and bind the same contact.
  Merge {
    source: IdentityRecord,
    target: IdentityRecord,
  },
  /// Only the phone-keyed record exists.
  Rekey { record: IdentityRecord },
  /// Both records exist but bind different contacts.
  CrossContact {
    phone_rec: IdentityRecord,
    lid_rec:   IdentityRecord,
  },
  /// No phone-keyed record; try to locate the contact by stored phone
  /// number instead. Carries the lid-keyed record if one exists.
  Fallback { lid_rec: Option<IdentityRecord> },
}

/// Pure branch selection — no side effects, exhaustive by construction.
fn dispatch(
  phone_rec: Option<IdentityRecord>,
  lid_rec: Option<IdentityRecord>,
) -> Branch {
  match (phone_rec, lid_rec) {
    (Some(p), Some(l)) if p.contact_id == l.contact_id => {
      Branch::Merge { source: p, target: l }
    }
    (Some(p), Some(l)) => Branch::CrossContact { phone_rec: p, lid_rec: l },
    (Some(p), None) => Branch::Rekey { record: p },
    (None, l) => Branch::Fallback { lid_rec: l },
  }
}

// ─── Engine ──────────────────────────────────────────────────────────────────

fn store_err<E>(e: E) -> Error
where
  E: std::error::Error + Send + Sync + 'static,
{
  Error::Store(Box::new(e))
}

/// Run one reconciliation pass for `(inbox, phone, lid, identifier)`.
///
/// Business no-op conditions (blank keys, identical keys, cross-contact
/// collision, conflicts) return `Ok(Outcome::Skipped(_))` with no state
/// change. Persistence failures — including a UNIQUE violation from a
/// racing migration — propagate as `Err`.
pub async fn reconcile<S: IdentityStore>(
  store: &S,
  req: &ReconcileRequest,
) -> Result<Outcome> {
  if req.phone.is_empty() || req.lid.is_empty() {
    return Ok(Outcome::Skipped(SkipReason::BlankKey));
  }
  if req.phone == req.lid {
    return Ok(Outcome::Skipped(SkipReason::IdenticalKeys));
  }

  let inbox = store
    .get_inbox(req.inbox_id)
    .await
    .map_err(store_err)?
    .ok_or(Error::InboxNotFound(req.inbox_id))?;

  let phone_rec = store
    .find_record_by_key(req.inbox_id, &req.phone)
    .await
    .map_err(store_err)?;
  let lid_rec = store
    .find_record_by_key(req.inbox_id, &req.lid)
    .await
    .map_err(store_err)?;

  match dispatch(phone_rec, lid_rec) {
    Branch::Merge { source, target } => {
      debug!(
        source = %source.record_id,
        target = %target.record_id,
        contact = %target.contact_id,
        "merging identity records"
      );
      store
        .merge_identity_records(source.record_id, target.record_id)
        .await
        .map_err(store_err)?;
      Ok(Outcome::Merged)
    }
    Branch::Rekey { record } => rekey_in_place(store, &inbox, req, &record).await,
    Branch::CrossContact { phone_rec, lid_rec } => {
      warn!(
        phone_contact = %phone_rec.contact_id,
        lid_contact = %lid_rec.contact_id,
        "phone and lid keys bind different contacts; refusing to merge"
      );
      Ok(Outcome::Skipped(SkipReason::CrossContactCollision))
    }
    Branch::Fallback { lid_rec } => {
      fallback_rekey(store, &inbox, req, lid_rec).await
    }
  }
}

/// Convert the phone-keyed record (and its contact) into a lid-keyed one.
/// Both conflict probes run before any mutation.
async fn rekey_in_place<S: IdentityStore>(
  store: &S,
  inbox: &Inbox,
  req: &ReconcileRequest,
  record: &IdentityRecord,
) -> Result<Outcome> {
  let phone_e164 = req.phone_e164();

  let identifier_taken = store
    .contact_field_taken(
      inbox.account_id,
      ContactField::Identifier,
      &req.identifier,
      record.contact_id,
    )
    .await
    .map_err(store_err)?;
  if identifier_taken {
    warn!(contact = %record.contact_id, "identifier held by another contact; skipping rekey");
    return Ok(Outcome::Skipped(SkipReason::IdentifierTaken));
  }

  let phone_taken = store
    .contact_field_taken(
      inbox.account_id,
      ContactField::PhoneNumber,
      &phone_e164,
      record.contact_id,
    )
    .await
    .map_err(store_err)?;
  if phone_taken {
    warn!(contact = %record.contact_id, "phone number held by another contact; skipping rekey");
    return Ok(Outcome::Skipped(SkipReason::PhoneNumberTaken));
  }

  debug!(record = %record.record_id, contact = %record.contact_id, "re-keying identity record to lid");
  store
    .rekey_identity_record(
      record.record_id,
      &req.lid,
      record.contact_id,
      &req.identifier,
      Some(&phone_e164),
    )
    .await
    .map_err(store_err)?;
  Ok(Outcome::Rekeyed)
}

/// No phone-keyed record exists; locate the contact by its stored phone
/// number and re-key its record in this inbox.
///
/// The phone number itself is never touched on this path — it already
/// matched, which is how the contact was found. Note this branch runs only
/// the identifier probe, not the phone probe.
async fn fallback_rekey<S: IdentityStore>(
  store: &S,
  inbox: &Inbox,
  req: &ReconcileRequest,
  lid_rec: Option<IdentityRecord>,
) -> Result<Outcome> {
  let contact = match store
    .find_contact_by_phone(inbox.account_id, &req.phone_e164())
    .await
    .map_err(store_err)?
  {
    Some(c) => c,
    None => return Ok(Outcome::Skipped(SkipReason::NoMatchingContact)),
  };

  let record = match store
    .find_record_for_contact(req.inbox_id, contact.contact_id)
    .await
    .map_err(store_err)?
  {
    Some(r) => r,
    None => return Ok(Outcome::Skipped(SkipReason::NoRecordForContact)),
  };

  // Re-keying while a lid-keyed record exists would put two records on the
  // same (inbox, source_id).
  if lid_rec.is_some() {
    return Ok(Outcome::Skipped(SkipReason::LidKeyPresent));
  }

  let identifier_taken = store
    .contact_field_taken(
      inbox.account_id,
      ContactField::Identifier,
      &req.identifier,
      contact.contact_id,
    )
    .await
    .map_err(store_err)?;
  if identifier_taken {
    warn!(contact = %contact.contact_id, "identifier held by another contact; skipping fallback rekey");
    return Ok(Outcome::Skipped(SkipReason::IdentifierTaken));
  }

  debug!(record = %record.record_id, contact = %contact.contact_id, "fallback re-key of identity record to lid");
  store
    .rekey_identity_record(
      record.record_id,
      &req.lid,
      contact.contact_id,
      &req.identifier,
      None,
    )
    .await
    .map_err(store_err)?;
  Ok(Outcome::FallbackRekeyed)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
