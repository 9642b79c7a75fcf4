//! Persisted account store.
//!
//! An insertion-ordered collection of credential records, serialized to a
//! single JSON document. Identity mutations (add/delete) persist the full
//! document immediately; status-only mutations stay in memory and are only
//! flushed at orderly shutdown. Lookups compare `(user, domain)` pairs
//! structurally — the formatted AOR string exists only for display and the
//! engine-facing command surface.

use crate::engine::TelephonyEngine;
use crate::persist::BlobStore;
use crate::protocol::{parse_aor, Account};

/// Blob name of the persisted account document.
const ACCOUNTS_BLOB: &str = "accounts.json";

pub struct AccountStore {
    records: Vec<Account>,
    store: Box<dyn BlobStore>,
}

impl AccountStore {
    /// Load the persisted document. Any read or parse failure means "no
    /// accounts yet": the store starts empty and the next persist rewrites
    /// the document. Every loaded record gets a registration attempt, then
    /// the `current` flags are resynced from the engine.
    pub fn load(store: Box<dyn BlobStore>, engine: &mut dyn TelephonyEngine) -> Self {
        let records = match store.get(ACCOUNTS_BLOB) {
            Ok(Some(bytes)) => match serde_json::from_slice::<Vec<Account>>(&bytes) {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(error = %e, "Malformed account document, starting empty");
                    Vec::new()
                }
            },
            Ok(None) => {
                tracing::info!("No persisted accounts, starting empty");
                Vec::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read account document, starting empty");
                Vec::new()
            }
        };

        let mut this = Self { records, store };

        for account in &this.records {
            if let Err(e) = engine.start_registration(account) {
                tracing::warn!(aor = %account.aor(), error = %e, "Registration attempt failed");
            }
        }
        this.sync_current(engine);
        this
    }

    pub fn records(&self) -> &[Account] {
        &self.records
    }

    /// Add an account. An existing record with the same `(user, domain)` is
    /// removed first, so a duplicate add replaces rather than duplicates.
    /// Issues the engine registration and persists the full document.
    pub fn add(&mut self, mut account: Account, engine: &mut dyn TelephonyEngine) {
        // Derived flags are never taken from the client.
        account.status = None;
        account.current = None;

        self.records
            .retain(|r| !r.matches(&account.user, &account.domain));

        if let Err(e) = engine.start_registration(&account) {
            tracing::warn!(aor = %account.aor(), error = %e, "Registration attempt failed");
        }

        tracing::info!(aor = %account.aor(), "Account added");
        self.records.push(account);
        self.persist();
    }

    /// Delete the account matching `(user, domain)`. A miss is a no-op, not
    /// an error. Tears down the engine registration and clears the engine's
    /// active-registration pointer if it pointed at the removed identity.
    /// Returns whether a record was removed.
    pub fn delete(&mut self, user: &str, domain: &str, engine: &mut dyn TelephonyEngine) -> bool {
        let index = match self.records.iter().position(|r| r.matches(user, domain)) {
            Some(index) => index,
            None => return false,
        };

        let removed = self.records.remove(index);
        let aor = removed.aor();

        if let Err(e) = engine.drop_registration(&aor) {
            tracing::warn!(aor = %aor, error = %e, "De-registration failed");
        }
        if engine.current_aor().as_deref() == Some(aor.as_str()) {
            engine.clear_current();
        }

        tracing::info!(aor = %aor, "Account deleted");
        self.persist();
        true
    }

    /// Replace the derived registration status of the record matching `aor`.
    /// In-memory only — flushed at shutdown, not persisted here. A miss is a
    /// no-op. Returns whether a record matched.
    pub fn set_status(&mut self, aor: &str, status: bool) -> bool {
        let (user, domain) = match parse_aor(aor) {
            Some(parts) => parts,
            None => return false,
        };

        match self.records.iter_mut().find(|r| r.matches(user, domain)) {
            Some(record) => {
                record.status = Some(status);
                true
            }
            None => false,
        }
    }

    /// Resync the `current` flags from the engine's active-registration
    /// pointer: clear every flag, then set it on the one matching record.
    pub fn sync_current(&mut self, engine: &mut dyn TelephonyEngine) {
        let current = engine.current_aor();
        let target = current.as_deref().and_then(parse_aor);

        for record in &mut self.records {
            record.current = None;
        }
        if let Some((user, domain)) = target {
            if let Some(record) = self.records.iter_mut().find(|r| r.matches(user, domain)) {
                record.current = Some(true);
            }
        }
    }

    /// Orderly shutdown: flush the full document (picking up any status-only
    /// mutations held in memory) and clear the engine's active registration.
    pub fn close(&mut self, engine: &mut dyn TelephonyEngine) {
        self.persist();
        engine.clear_current();
    }

    /// Write the full document. A failure is a warning, never fatal: the
    /// in-memory state stays authoritative and the next mutating operation
    /// retries the write.
    fn persist(&self) {
        let result = serde_json::to_vec_pretty(&self.records)
            .map_err(Into::into)
            .and_then(|bytes| self.store.set(ACCOUNTS_BLOB, &bytes));
        if let Err(e) = result {
            tracing::warn!(error = %e, "Failed to persist account document");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::persist::mem::MemStore;
    use crate::protocol::Transport;

    fn account(user: &str, domain: &str) -> Account {
        Account {
            user: user.into(),
            password: "pw".into(),
            domain: domain.into(),
            transport: Transport::Udp,
            status: None,
            current: None,
            options: BTreeMap::new(),
        }
    }

    fn empty_store(engine: &mut MockEngine) -> (AccountStore, MemStore) {
        let blobs = MemStore::new();
        let store = AccountStore::load(Box::new(blobs.clone()), engine);
        (store, blobs)
    }

    #[test]
    fn load_from_missing_document_starts_empty() {
        let mut engine = MockEngine::new();
        let (store, _) = empty_store(&mut engine);
        assert!(store.records().is_empty());
        assert!(engine.taken().is_empty());
    }

    #[test]
    fn load_from_corrupt_document_starts_empty() {
        let blobs = MemStore::new();
        blobs.seed("accounts.json", b"{not json");

        let mut engine = MockEngine::new();
        let store = AccountStore::load(Box::new(blobs), &mut engine);
        assert!(store.records().is_empty());
    }

    #[test]
    fn load_registers_every_persisted_account() {
        let blobs = MemStore::new();
        blobs.seed(
            "accounts.json",
            br#"[{"user":"alice","password":"pw","domain":"example.com"},
                 {"user":"bob","password":"pw","domain":"x.com"}]"#,
        );

        let mut engine = MockEngine::new();
        let store = AccountStore::load(Box::new(blobs), &mut engine);

        assert_eq!(store.records().len(), 2);
        let commands = engine.taken();
        assert_eq!(commands.len(), 2);
        assert!(commands[0].contains("sip:alice@example.com;transport=udp"));
        assert!(commands[1].contains("sip:bob@x.com;transport=udp"));
    }

    #[test]
    fn add_issues_registration_and_persists() {
        let mut engine = MockEngine::new();
        let (mut store, blobs) = empty_store(&mut engine);

        store.add(account("alice", "example.com"), &mut engine);

        assert_eq!(store.records().len(), 1);
        assert!(engine.taken()[0].contains("sip:alice@example.com;transport=udp"));

        let persisted: Vec<Account> =
            serde_json::from_slice(&blobs.contents("accounts.json").unwrap()).unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].user, "alice");
    }

    #[test]
    fn add_strips_client_supplied_derived_flags() {
        let mut engine = MockEngine::new();
        let (mut store, _) = empty_store(&mut engine);

        let mut acc = account("alice", "example.com");
        acc.status = Some(true);
        acc.current = Some(true);
        store.add(acc, &mut engine);

        assert!(store.records()[0].status.is_none());
        assert!(store.records()[0].current.is_none());
    }

    #[test]
    fn duplicate_add_keeps_one_record_with_latest_fields() {
        let mut engine = MockEngine::new();
        let (mut store, _) = empty_store(&mut engine);

        store.add(account("alice", "example.com"), &mut engine);
        let mut updated = account("alice", "example.com");
        updated.password = "changed".into();
        store.add(updated, &mut engine);

        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].password, "changed");
    }

    #[test]
    fn identities_stay_unique_across_adds() {
        let mut engine = MockEngine::new();
        let (mut store, _) = empty_store(&mut engine);

        store.add(account("alice", "example.com"), &mut engine);
        store.add(account("alice", "other.com"), &mut engine);
        store.add(account("alice", "example.com"), &mut engine);
        store.add(account("bob", "example.com"), &mut engine);

        for record in store.records() {
            let dupes = store
                .records()
                .iter()
                .filter(|r| r.matches(&record.user, &record.domain))
                .count();
            assert_eq!(dupes, 1, "{} duplicated", record.aor());
        }
    }

    #[test]
    fn delete_removes_and_deregisters() {
        let mut engine = MockEngine::new();
        let (mut store, blobs) = empty_store(&mut engine);

        store.add(account("alice", "example.com"), &mut engine);
        assert!(store.delete("alice", "example.com", &mut engine));

        assert!(store.records().is_empty());
        assert!(engine
            .taken()
            .contains(&"unregister sip:alice@example.com".to_string()));

        let persisted: Vec<Account> =
            serde_json::from_slice(&blobs.contents("accounts.json").unwrap()).unwrap();
        assert!(persisted.is_empty());
    }

    #[test]
    fn delete_of_absent_identity_is_noop() {
        let mut engine = MockEngine::new();
        let (mut store, _) = empty_store(&mut engine);

        store.add(account("alice", "example.com"), &mut engine);
        let before = engine.taken().len();

        assert!(!store.delete("ghost", "example.com", &mut engine));
        assert_eq!(store.records().len(), 1);
        assert_eq!(engine.taken().len(), before);
    }

    #[test]
    fn delete_clears_current_only_when_it_pointed_at_removed() {
        let mut engine = MockEngine::new();
        let (mut store, _) = empty_store(&mut engine);
        store.add(account("alice", "example.com"), &mut engine);
        store.add(account("bob", "x.com"), &mut engine);

        engine.set_current(Some("sip:bob@x.com"));
        store.delete("alice", "example.com", &mut engine);
        assert_eq!(engine.current_aor().as_deref(), Some("sip:bob@x.com"));

        store.delete("bob", "x.com", &mut engine);
        assert!(engine.current_aor().is_none());
    }

    #[test]
    fn set_status_matches_structurally() {
        let mut engine = MockEngine::new();
        let (mut store, blobs) = empty_store(&mut engine);
        store.add(account("alice", "example.com"), &mut engine);
        let persisted_before = blobs.contents("accounts.json").unwrap();

        assert!(store.set_status("sip:alice@example.com", true));
        assert_eq!(store.records()[0].status, Some(true));

        assert!(store.set_status("sip:alice@example.com", false));
        assert_eq!(store.records()[0].status, Some(false));

        // Status-only mutation is held in memory, not persisted.
        assert_eq!(blobs.contents("accounts.json").unwrap(), persisted_before);
    }

    #[test]
    fn set_status_for_unknown_aor_is_noop() {
        let mut engine = MockEngine::new();
        let (mut store, _) = empty_store(&mut engine);
        store.add(account("alice", "example.com"), &mut engine);

        assert!(!store.set_status("sip:ghost@example.com", true));
        assert!(!store.set_status("garbage", true));
        assert!(store.records()[0].status.is_none());
    }

    #[test]
    fn sync_current_marks_at_most_one_record() {
        let mut engine = MockEngine::new();
        let (mut store, _) = empty_store(&mut engine);
        store.add(account("alice", "example.com"), &mut engine);
        store.add(account("bob", "x.com"), &mut engine);

        engine.set_current(Some("sip:alice@example.com"));
        store.sync_current(&mut engine);
        engine.set_current(Some("sip:bob@x.com"));
        store.sync_current(&mut engine);

        let flagged: Vec<_> = store
            .records()
            .iter()
            .filter(|r| r.current == Some(true))
            .collect();
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].user, "bob");
    }

    #[test]
    fn sync_current_with_no_active_registration_clears_all() {
        let mut engine = MockEngine::new();
        let (mut store, _) = empty_store(&mut engine);
        store.add(account("alice", "example.com"), &mut engine);

        engine.set_current(Some("sip:alice@example.com"));
        store.sync_current(&mut engine);
        assert_eq!(store.records()[0].current, Some(true));

        engine.set_current(None);
        store.sync_current(&mut engine);
        assert!(store.records()[0].current.is_none());
    }

    #[test]
    fn close_flushes_status_and_clears_engine_current() {
        let mut engine = MockEngine::new();
        let (mut store, blobs) = empty_store(&mut engine);
        store.add(account("alice", "example.com"), &mut engine);
        store.set_status("sip:alice@example.com", true);
        engine.set_current(Some("sip:alice@example.com"));

        store.close(&mut engine);

        let persisted: Vec<Account> =
            serde_json::from_slice(&blobs.contents("accounts.json").unwrap()).unwrap();
        assert_eq!(persisted[0].status, Some(true));
        assert!(engine.current_aor().is_none());
    }

    #[test]
    fn persisted_document_survives_reload() {
        let blobs = MemStore::new();
        let mut engine = MockEngine::new();
        {
            let mut store = AccountStore::load(Box::new(blobs.clone()), &mut engine);
            store.add(account("alice", "example.com"), &mut engine);
        }

        let mut engine2 = MockEngine::new();
        let store = AccountStore::load(Box::new(blobs), &mut engine2);
        assert_eq!(store.records().len(), 1);
        assert_eq!(store.records()[0].aor(), "sip:alice@example.com");
        // Reload re-issues the registration attempt.
        assert_eq!(engine2.taken().len(), 1);
    }
}
