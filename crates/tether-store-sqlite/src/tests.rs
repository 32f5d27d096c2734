//! Integration tests for `SqliteStore` against an in-memory database,
//! driving the reconciliation engine end to end.

use tether_core::{
  model::{Account, Inbox},
  reconcile::{Outcome, ReconcileRequest, SkipReason, reconcile},
  store::IdentityStore as _,
};
use uuid::Uuid;

use crate::SqliteStore;

const PHONE: &str = "5511912345678";
const PHONE_E164: &str = "+5511912345678";
const LID: &str = "12345678";
const IDENTIFIER: &str = "12345678@lid";

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

async fn seeded() -> (SqliteStore, Account, Inbox) {
  let s = store().await;
  let account = s.create_account("Acme Support").await.unwrap();
  let inbox = s.create_inbox(account.account_id, "WhatsApp BR").await.unwrap();
  (s, account, inbox)
}

fn request(inbox: &Inbox) -> ReconcileRequest {
  ReconcileRequest::new(inbox.inbox_id, PHONE, LID, IDENTIFIER)
}

// ─── Preconditions ───────────────────────────────────────────────────────────

#[tokio::test]
async fn blank_phone_is_a_noop() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let record = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();

  let req = ReconcileRequest::new(inbox.inbox_id, "", LID, IDENTIFIER);
  let outcome = reconcile(&s, &req).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::BlankKey));

  let untouched = s.get_record(record.record_id).await.unwrap().unwrap();
  assert_eq!(untouched.source_id, PHONE);
}

#[tokio::test]
async fn blank_lid_is_a_noop() {
  let (s, _, inbox) = seeded().await;

  let req = ReconcileRequest::new(inbox.inbox_id, PHONE, "", IDENTIFIER);
  let outcome = reconcile(&s, &req).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::BlankKey));
}

#[tokio::test]
async fn identical_keys_is_a_noop() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let record = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();

  let req = ReconcileRequest::new(inbox.inbox_id, PHONE, PHONE, IDENTIFIER);
  let outcome = reconcile(&s, &req).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::IdenticalKeys));

  let untouched = s.get_record(record.record_id).await.unwrap().unwrap();
  assert_eq!(untouched.source_id, PHONE);
}

#[tokio::test]
async fn unknown_inbox_is_an_error() {
  let s = store().await;
  let req = ReconcileRequest::new(Uuid::new_v4(), PHONE, LID, IDENTIFIER);

  let err = reconcile(&s, &req).await.unwrap_err();
  assert!(matches!(err, tether_core::Error::InboxNotFound(_)));
}

// ─── Merge ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn merge_moves_conversations_and_deletes_phone_record() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let r1 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();
  let r2 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, LID)
    .await
    .unwrap();

  s.create_conversation(&r1).await.unwrap();
  s.create_conversation(&r1).await.unwrap();
  s.create_conversation(&r2).await.unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Merged);

  // R1 is gone; all three conversations now reference R2.
  assert!(s.get_record(r1.record_id).await.unwrap().is_none());
  let moved = s.conversations_for_record(r2.record_id).await.unwrap();
  assert_eq!(moved.len(), 3);
  assert!(moved.iter().all(|c| c.record_id == r2.record_id));

  // Exactly one record left for the contact in this inbox.
  let records = s
    .records_for_contact(inbox.inbox_id, contact.contact_id)
    .await
    .unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].record_id, r2.record_id);
}

#[tokio::test]
async fn merge_leaves_conversation_contact_mapping_unchanged() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let r1 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();
  let r2 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, LID)
    .await
    .unwrap();
  s.create_conversation(&r1).await.unwrap();

  reconcile(&s, &request(&inbox)).await.unwrap();

  let moved = s.conversations_for_record(r2.record_id).await.unwrap();
  assert_eq!(moved.len(), 1);
  assert_eq!(moved[0].contact_id, contact.contact_id);
  assert_eq!(moved[0].inbox_id, inbox.inbox_id);
}

// ─── Migrate-in-place ────────────────────────────────────────────────────────

#[tokio::test]
async fn rekey_updates_record_and_contact() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let r1 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Rekeyed);

  let rekeyed = s.get_record(r1.record_id).await.unwrap().unwrap();
  assert_eq!(rekeyed.source_id, LID);

  let updated = s.get_contact(contact.contact_id).await.unwrap().unwrap();
  assert_eq!(updated.identifier.as_deref(), Some(IDENTIFIER));
  assert_eq!(updated.phone_number.as_deref(), Some(PHONE_E164));
}

#[tokio::test]
async fn rekey_blocked_by_identifier_conflict() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let r1 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();
  // Unrelated contact already holds the target identifier.
  s.create_contact(account.account_id, "Mallory", None, Some(IDENTIFIER))
    .await
    .unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::IdentifierTaken));

  let untouched = s.get_record(r1.record_id).await.unwrap().unwrap();
  assert_eq!(untouched.source_id, PHONE);
  let contact_after = s.get_contact(contact.contact_id).await.unwrap().unwrap();
  assert_eq!(contact_after.identifier, None);
  assert_eq!(contact_after.phone_number.as_deref(), Some(PHONE_E164));
}

#[tokio::test]
async fn rekey_blocked_by_phone_conflict() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", None, None)
    .await
    .unwrap();
  let r1 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();
  // The phone number was reassigned to a different contact out-of-band.
  s.create_contact(account.account_id, "Mallory", Some(PHONE_E164), None)
    .await
    .unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::PhoneNumberTaken));

  let untouched = s.get_record(r1.record_id).await.unwrap().unwrap();
  assert_eq!(untouched.source_id, PHONE);
  let contact_after = s.get_contact(contact.contact_id).await.unwrap().unwrap();
  assert_eq!(contact_after.identifier, None);
  assert_eq!(contact_after.phone_number, None);
}

// ─── Cross-contact collision ─────────────────────────────────────────────────

#[tokio::test]
async fn cross_contact_records_survive_unchanged() {
  let (s, account, inbox) = seeded().await;
  let alice = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let bob = s
    .create_contact(account.account_id, "Bob", None, None)
    .await
    .unwrap();

  let alice_rec = s
    .create_identity_record(inbox.inbox_id, alice.contact_id, PHONE)
    .await
    .unwrap();
  let bob_rec = s
    .create_identity_record(inbox.inbox_id, bob.contact_id, LID)
    .await
    .unwrap();
  s.create_conversation(&alice_rec).await.unwrap();
  s.create_conversation(&bob_rec).await.unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::CrossContactCollision));

  // Both records survive with their keys; no conversation moved.
  let a = s.get_record(alice_rec.record_id).await.unwrap().unwrap();
  assert_eq!(a.source_id, PHONE);
  let b = s.get_record(bob_rec.record_id).await.unwrap().unwrap();
  assert_eq!(b.source_id, LID);
  assert_eq!(
    s.conversations_for_record(alice_rec.record_id).await.unwrap().len(),
    1
  );
  assert_eq!(
    s.conversations_for_record(bob_rec.record_id).await.unwrap().len(),
    1
  );
}

// ─── Fallback migrate ────────────────────────────────────────────────────────

#[tokio::test]
async fn fallback_rekeys_contact_found_by_phone() {
  let (s, account, inbox) = seeded().await;
  // No record keyed by the raw phone string; the contact's record sits
  // under a legacy key, but the contact is findable by stored phone number.
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let legacy = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, "legacy:5511")
    .await
    .unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::FallbackRekeyed);

  let rekeyed = s.get_record(legacy.record_id).await.unwrap().unwrap();
  assert_eq!(rekeyed.source_id, LID);

  let updated = s.get_contact(contact.contact_id).await.unwrap().unwrap();
  assert_eq!(updated.identifier.as_deref(), Some(IDENTIFIER));
  // The phone number is left alone on this path.
  assert_eq!(updated.phone_number.as_deref(), Some(PHONE_E164));
}

#[tokio::test]
async fn fallback_blocked_when_lid_record_exists() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let legacy = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, "legacy:5511")
    .await
    .unwrap();
  // A lid-keyed record is already present in the inbox.
  let other = s
    .create_contact(account.account_id, "Bob", None, None)
    .await
    .unwrap();
  s.create_identity_record(inbox.inbox_id, other.contact_id, LID)
    .await
    .unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::LidKeyPresent));

  let untouched = s.get_record(legacy.record_id).await.unwrap().unwrap();
  assert_eq!(untouched.source_id, "legacy:5511");
}

#[tokio::test]
async fn fallback_noop_when_no_contact_matches() {
  let (s, _, inbox) = seeded().await;

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::NoMatchingContact));
}

#[tokio::test]
async fn fallback_noop_when_contact_has_no_record_in_inbox() {
  let (s, account, inbox) = seeded().await;
  s.create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::NoRecordForContact));
}

#[tokio::test]
async fn fallback_blocked_by_identifier_conflict() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let legacy = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, "legacy:5511")
    .await
    .unwrap();
  s.create_contact(account.account_id, "Mallory", None, Some(IDENTIFIER))
    .await
    .unwrap();

  let outcome = reconcile(&s, &request(&inbox)).await.unwrap();
  assert_eq!(outcome, Outcome::Skipped(SkipReason::IdentifierTaken));

  let untouched = s.get_record(legacy.record_id).await.unwrap().unwrap();
  assert_eq!(untouched.source_id, "legacy:5511");
  let contact_after = s.get_contact(contact.contact_id).await.unwrap().unwrap();
  assert_eq!(contact_after.identifier, None);
}

// ─── Idempotence ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconcile_twice_after_merge_is_stable() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let r1 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();
  let r2 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, LID)
    .await
    .unwrap();
  s.create_conversation(&r1).await.unwrap();
  s.create_conversation(&r2).await.unwrap();

  assert_eq!(reconcile(&s, &request(&inbox)).await.unwrap(), Outcome::Merged);
  // Second pass finds no phone-keyed record and a lid key already in
  // place, so it lands on a no-op path.
  assert!(matches!(
    reconcile(&s, &request(&inbox)).await.unwrap(),
    Outcome::Skipped(_)
  ));

  let records = s
    .records_for_contact(inbox.inbox_id, contact.contact_id)
    .await
    .unwrap();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].source_id, LID);
  assert_eq!(
    s.conversations_for_record(records[0].record_id).await.unwrap().len(),
    2
  );
}

#[tokio::test]
async fn reconcile_twice_after_rekey_is_stable() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", Some(PHONE_E164), None)
    .await
    .unwrap();
  let r1 = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, PHONE)
    .await
    .unwrap();

  assert_eq!(reconcile(&s, &request(&inbox)).await.unwrap(), Outcome::Rekeyed);
  assert_eq!(
    reconcile(&s, &request(&inbox)).await.unwrap(),
    Outcome::Skipped(SkipReason::LidKeyPresent)
  );

  let record = s.get_record(r1.record_id).await.unwrap().unwrap();
  assert_eq!(record.source_id, LID);
  let contact_after = s.get_contact(contact.contact_id).await.unwrap().unwrap();
  assert_eq!(contact_after.identifier.as_deref(), Some(IDENTIFIER));
  assert_eq!(contact_after.phone_number.as_deref(), Some(PHONE_E164));
}

// ─── Constraint surfacing ────────────────────────────────────────────────────

#[tokio::test]
async fn rekey_onto_claimed_key_surfaces_unique_violation() {
  let (s, account, inbox) = seeded().await;
  let alice = s
    .create_contact(account.account_id, "Alice", None, None)
    .await
    .unwrap();
  let bob = s
    .create_contact(account.account_id, "Bob", None, None)
    .await
    .unwrap();
  let alice_rec = s
    .create_identity_record(inbox.inbox_id, alice.contact_id, PHONE)
    .await
    .unwrap();
  // The lid key is already claimed, as a racing migration would leave it.
  s.create_identity_record(inbox.inbox_id, bob.contact_id, LID)
    .await
    .unwrap();

  let err = s
    .rekey_identity_record(alice_rec.record_id, LID, alice.contact_id, IDENTIFIER, None)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::Database(_)));

  // The failed transaction left no partial state behind.
  let untouched = s.get_record(alice_rec.record_id).await.unwrap().unwrap();
  assert_eq!(untouched.source_id, PHONE);
  let contact_after = s.get_contact(alice.contact_id).await.unwrap().unwrap();
  assert_eq!(contact_after.identifier, None);
}

#[tokio::test]
async fn merge_missing_source_record_is_an_error() {
  let (s, account, inbox) = seeded().await;
  let contact = s
    .create_contact(account.account_id, "Alice", None, None)
    .await
    .unwrap();
  let target = s
    .create_identity_record(inbox.inbox_id, contact.contact_id, LID)
    .await
    .unwrap();

  let err = s
    .merge_identity_records(Uuid::new_v4(), target.record_id)
    .await
    .unwrap_err();
  assert!(matches!(err, crate::Error::RecordNotFound(_)));
}
