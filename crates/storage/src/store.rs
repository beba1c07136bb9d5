// Path: crates/storage/src/store.rs
//! The redb-backed record store.
//!
//! Layout: one database file, fixed-width big-endian keys so that range
//! scans iterate in block order.
//!
//! - `STATES`:   block_be(8)            -> bincode(State)
//! - `HEAD`:     b"HEAD"                -> block_be(8) of the latest state
//! - `EONS`:     eon_index_be(8)        -> bincode(Eon)
//! - `EON_ACTIVATIONS`: activation_be(8) -> eon_index_be(8)
//! - `KEYPERS`:  address(20)            -> first_seen_block_be(8)
//! - `TOGGLES`:  effective_block_be(8)  -> bincode(ActiveToggle)
//! - `EPOCHS`:   eon_be(8) ++ block_be(8) -> bincode(Epoch)

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;

use shutter_types::{ActiveToggle, Eon, Epoch, KeyperAddress, State, StoreError};

const STATES: TableDefinition<&[u8; 8], &[u8]> = TableDefinition::new("STATES");
const HEAD: TableDefinition<&[u8; 4], &[u8; 8]> = TableDefinition::new("HEAD");
const EONS: TableDefinition<&[u8; 8], &[u8]> = TableDefinition::new("EONS");
const EON_ACTIVATIONS: TableDefinition<&[u8; 8], &[u8; 8]> =
    TableDefinition::new("EON_ACTIVATIONS");
const KEYPERS: TableDefinition<&[u8; 20], &[u8; 8]> = TableDefinition::new("KEYPERS");
const TOGGLES: TableDefinition<&[u8; 8], &[u8]> = TableDefinition::new("TOGGLES");
const EPOCHS: TableDefinition<&[u8; 16], &[u8]> = TableDefinition::new("EPOCHS");

fn be64(x: u64) -> [u8; 8] {
    x.to_be_bytes()
}

fn parse_u64(bytes: &[u8; 8]) -> u64 {
    u64::from_be_bytes(*bytes)
}

fn key_head() -> [u8; 4] {
    *b"HEAD"
}

fn k_epoch(eon_index: u64, block: u64) -> [u8; 16] {
    let mut k = [0u8; 16];
    k[..8].copy_from_slice(&be64(eon_index));
    k[8..].copy_from_slice(&be64(block));
    k
}

fn backend<E: std::fmt::Display>(e: E) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn encode<T: Serialize>(v: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(v).map_err(|e| StoreError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Codec(e.to_string()))
}

/// The persistent record store.
///
/// The state reconciler is the only writer; any number of readers may query
/// concurrently. Every write method runs inside a single redb write
/// transaction, so readers never observe a partially-applied event.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Opens (or creates) the database at `path` and ensures all tables
    /// exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(backend)?;
        {
            let w = db.begin_write().map_err(backend)?;
            {
                w.open_table(STATES).map_err(backend)?;
                w.open_table(HEAD).map_err(backend)?;
                w.open_table(EONS).map_err(backend)?;
                w.open_table(EON_ACTIVATIONS).map_err(backend)?;
                w.open_table(KEYPERS).map_err(backend)?;
                w.open_table(TOGGLES).map_err(backend)?;
                w.open_table(EPOCHS).map_err(backend)?;
            }
            w.commit().map_err(backend)?;
        }
        tracing::info!(target: "storage", path = %path.display(), "database opened");
        Ok(Self { db: Arc::new(db) })
    }

    // ---- writes (state reconciler only) ----

    /// Inserts a pending state row for `block`. No-op if the row exists.
    pub fn insert_pending_state(&self, block: u64) -> Result<(), StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut states = w.open_table(STATES).map_err(backend)?;
            let key = be64(block);
            let exists = states.get(&key).map_err(backend)?.is_some();
            if !exists {
                let row = encode(&State::pending(block))?;
                states.insert(&key, row.as_slice()).map_err(backend)?;
            }
        }
        w.commit().map_err(backend)?;
        Ok(())
    }

    /// Finalizes the state row for `block`: demotes the previous latest row
    /// and promotes the new one, atomically.
    ///
    /// Fails with [`StoreError::OrderingViolation`] if `block` does not
    /// advance past the current latest block.
    pub fn finalize_state(
        &self,
        block: u64,
        eon_index: Option<u64>,
        shutter_active: bool,
    ) -> Result<State, StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        let finalized = {
            let mut states = w.open_table(STATES).map_err(backend)?;
            let mut head = w.open_table(HEAD).map_err(backend)?;

            let prior = head
                .get(&key_head())
                .map_err(backend)?
                .map(|g| parse_u64(g.value()));
            if let Some(latest) = prior {
                if block <= latest {
                    return Err(StoreError::OrderingViolation { block, latest });
                }
                let key = be64(latest);
                let mut old: State = match states.get(&key).map_err(backend)? {
                    Some(g) => decode(g.value())?,
                    None => {
                        return Err(StoreError::Backend(format!(
                            "latest state row for block {latest} missing"
                        )))
                    }
                };
                old.is_latest = false;
                let row = encode(&old)?;
                states.insert(&key, row.as_slice()).map_err(backend)?;
            }

            let key = be64(block);
            let mut state: State = match states.get(&key).map_err(backend)? {
                Some(g) => decode(g.value())?,
                None => State::pending(block),
            };
            state.is_pending = false;
            state.is_latest = true;
            state.eon_index = eon_index;
            state.shutter_active = Some(shutter_active);
            let row = encode(&state)?;
            states.insert(&key, row.as_slice()).map_err(backend)?;
            head.insert(&key_head(), &key).map_err(backend)?;
            state
        };
        w.commit().map_err(backend)?;
        Ok(finalized)
    }

    /// Applies one keyper-set announcement in a single transaction: records
    /// the member addresses (idempotent, keeping the block each address was
    /// first seen in) and creates the eon row with its activation-block
    /// index entry.
    ///
    /// A repeated announcement with identical contents is a no-op; the same
    /// index with different contents is a data error.
    pub fn insert_keyper_set(&self, eon: &Eon, insert_block: u64) -> Result<(), StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut eons = w.open_table(EONS).map_err(backend)?;
            let key = be64(eon.index);
            if let Some(g) = eons.get(&key).map_err(backend)? {
                let existing: Eon = decode(g.value())?;
                let same = existing.activation_block == eon.activation_block
                    && existing.threshold == eon.threshold
                    && existing.keypers == eon.keypers;
                if same {
                    return Ok(());
                }
                return Err(StoreError::DuplicateEon { index: eon.index });
            }

            let mut keypers = w.open_table(KEYPERS).map_err(backend)?;
            for addr in &eon.keypers {
                // addresses can be members of multiple keyper sets
                let known = keypers.get(addr.as_bytes()).map_err(backend)?.is_some();
                if !known {
                    keypers
                        .insert(addr.as_bytes(), &be64(insert_block))
                        .map_err(backend)?;
                }
            }

            let row = encode(eon)?;
            eons.insert(&key, row.as_slice()).map_err(backend)?;
            let mut activations = w.open_table(EON_ACTIVATIONS).map_err(backend)?;
            activations
                .insert(&be64(eon.activation_block), &key)
                .map_err(backend)?;
        }
        w.commit().map_err(backend)?;
        Ok(())
    }

    /// Attaches the broadcast public key to an existing eon and returns the
    /// refreshed row.
    ///
    /// Fails with [`StoreError::UnknownEon`] if the eon was never announced
    /// (a dependency-ordering violation in the event stream).
    pub fn attach_eon_public_key(&self, index: u64, key_bytes: &[u8]) -> Result<Eon, StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        let eon = {
            let mut eons = w.open_table(EONS).map_err(backend)?;
            let key = be64(index);
            let mut eon: Eon = match eons.get(&key).map_err(backend)? {
                Some(g) => decode(g.value())?,
                None => return Err(StoreError::UnknownEon { index }),
            };
            eon.public_key = Some(key_bytes.to_vec());
            let row = encode(&eon)?;
            eons.insert(&key, row.as_slice()).map_err(backend)?;
            eon
        };
        w.commit().map_err(backend)?;
        Ok(eon)
    }

    /// Persists a pause/unpause toggle under its effective block.
    pub fn insert_active_toggle(&self, toggle: &ActiveToggle) -> Result<(), StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        {
            let mut toggles = w.open_table(TOGGLES).map_err(backend)?;
            let row = encode(toggle)?;
            toggles
                .insert(&be64(toggle.effective_block), row.as_slice())
                .map_err(backend)?;
        }
        w.commit().map_err(backend)?;
        Ok(())
    }

    /// Persists a decryption-key record, unique per `(eon_index, block)`.
    ///
    /// Returns whether the row was inserted; a duplicate arrival leaves the
    /// existing record untouched (on-conflict-do-nothing).
    pub fn insert_epoch(&self, epoch: &Epoch) -> Result<bool, StoreError> {
        let w = self.db.begin_write().map_err(backend)?;
        let inserted = {
            let mut epochs = w.open_table(EPOCHS).map_err(backend)?;
            let key = k_epoch(epoch.eon_index, epoch.block);
            if epochs.get(&key).map_err(backend)?.is_some() {
                false
            } else {
                let row = encode(epoch)?;
                epochs.insert(&key, row.as_slice()).map_err(backend)?;
                true
            }
        };
        w.commit().map_err(backend)?;
        Ok(inserted)
    }

    // ---- reads ----

    /// The current latest (finalized) state row, if any.
    pub fn latest_state(&self) -> Result<Option<State>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let head = r.open_table(HEAD).map_err(backend)?;
        let block = match head.get(&key_head()).map_err(backend)? {
            Some(g) => parse_u64(g.value()),
            None => return Ok(None),
        };
        let states = r.open_table(STATES).map_err(backend)?;
        let out = match states.get(&be64(block)).map_err(backend)? {
            Some(g) => Ok(Some(decode(g.value())?)),
            None => Err(StoreError::Backend(format!(
                "latest state row for block {block} missing"
            ))),
        };
        out
    }

    /// The state row for `block`, pending or finalized.
    pub fn state_at(&self, block: u64) -> Result<Option<State>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let states = r.open_table(STATES).map_err(backend)?;
        let out = match states.get(&be64(block)).map_err(backend)? {
            Some(g) => Ok(Some(decode(g.value())?)),
            None => Ok(None),
        };
        out
    }

    /// The highest block number any state row exists for, pending included.
    pub fn last_observed_block(&self) -> Result<Option<u64>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let states = r.open_table(STATES).map_err(backend)?;
        let out = match states.iter().map_err(backend)?.next_back() {
            Some(entry) => {
                let (k, _) = entry.map_err(backend)?;
                Ok(Some(parse_u64(k.value())))
            }
            None => Ok(None),
        };
        out
    }

    /// Point lookup of an eon by its index.
    pub fn eon_by_index(&self, index: u64) -> Result<Option<Eon>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let eons = r.open_table(EONS).map_err(backend)?;
        let out = match eons.get(&be64(index)).map_err(backend)? {
            Some(g) => Ok(Some(decode(g.value())?)),
            None => Ok(None),
        };
        out
    }

    /// The eon active at `block`: the one with the greatest activation
    /// block not exceeding `block`, or `None` if no eon covers it.
    pub fn eon_at_block(&self, block: u64) -> Result<Option<Eon>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let activations = r.open_table(EON_ACTIVATIONS).map_err(backend)?;
        let upper = be64(block);
        let index = match activations
            .range::<&[u8; 8]>(..=&upper)
            .map_err(backend)?
            .next_back()
        {
            Some(entry) => {
                let (_, v) = entry.map_err(backend)?;
                parse_u64(v.value())
            }
            None => return Ok(None),
        };
        let eons = r.open_table(EONS).map_err(backend)?;
        let out = match eons.get(&be64(index)).map_err(backend)? {
            Some(g) => Ok(Some(decode(g.value())?)),
            None => Err(StoreError::Backend(format!(
                "activation index points at missing eon {index}"
            ))),
        };
        out
    }

    /// The most recent toggle effective at or before `block`, if any.
    pub fn active_toggle_at(&self, block: u64) -> Result<Option<ActiveToggle>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let toggles = r.open_table(TOGGLES).map_err(backend)?;
        let upper = be64(block);
        let out = match toggles
            .range::<&[u8; 8]>(..=&upper)
            .map_err(backend)?
            .next_back()
        {
            Some(entry) => {
                let (_, v) = entry.map_err(backend)?;
                Ok(Some(decode(v.value())?))
            }
            None => Ok(None),
        };
        out
    }

    /// The decryption-key record relevant for inclusion at `block` under the
    /// given eon, if one arrived.
    pub fn epoch_for_inclusion(
        &self,
        eon_index: u64,
        block: u64,
    ) -> Result<Option<Epoch>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let epochs = r.open_table(EPOCHS).map_err(backend)?;
        let out = match epochs.get(&k_epoch(eon_index, block)).map_err(backend)? {
            Some(g) => Ok(Some(decode(g.value())?)),
            None => Ok(None),
        };
        out
    }

    /// All known eons, in index order. Used to prime in-memory caches at
    /// startup.
    pub fn eons(&self) -> Result<Vec<Eon>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let eons = r.open_table(EONS).map_err(backend)?;
        let mut out = Vec::new();
        for entry in eons.iter().map_err(backend)? {
            let (_, v) = entry.map_err(backend)?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    /// All recorded toggles, in effective-block order. Used to prime
    /// in-memory caches at startup.
    pub fn active_toggles(&self) -> Result<Vec<ActiveToggle>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let toggles = r.open_table(TOGGLES).map_err(backend)?;
        let mut out = Vec::new();
        for entry in toggles.iter().map_err(backend)? {
            let (_, v) = entry.map_err(backend)?;
            out.push(decode(v.value())?);
        }
        Ok(out)
    }

    /// The block a keyper address was first recorded in, if known.
    pub fn keyper_first_seen(&self, addr: &KeyperAddress) -> Result<Option<u64>, StoreError> {
        let r = self.db.begin_read().map_err(backend)?;
        let keypers = r.open_table(KEYPERS).map_err(backend)?;
        let out = match keypers.get(addr.as_bytes()).map_err(backend)? {
            Some(g) => Ok(Some(parse_u64(g.value()))),
            None => Ok(None),
        };
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shutter_types::IdentityPreimage;

    fn open_store() -> (tempfile::TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("relay.redb")).unwrap();
        (dir, store)
    }

    fn eon(index: u64, activation_block: u64) -> Eon {
        Eon {
            index,
            is_finalized: true,
            activation_block,
            threshold: 2,
            public_key: None,
            keypers: vec![KeyperAddress::new([index as u8 + 1; 20])],
        }
    }

    #[test]
    fn pending_insert_is_idempotent() {
        let (_dir, store) = open_store();
        store.insert_pending_state(4).unwrap();
        store.insert_pending_state(4).unwrap();
        let state = store.state_at(4).unwrap().unwrap();
        assert!(state.is_pending);
        assert!(!state.is_latest);
    }

    #[test]
    fn finalize_promotes_and_demotes_atomically() {
        let (_dir, store) = open_store();
        store.insert_pending_state(1).unwrap();
        store.finalize_state(1, None, false).unwrap();
        store.insert_pending_state(2).unwrap();
        store.finalize_state(2, None, true).unwrap();

        let latest = store.latest_state().unwrap().unwrap();
        assert_eq!(latest.block, 2);
        assert!(latest.is_latest);
        assert_eq!(latest.shutter_active, Some(true));

        // old row demoted but kept for per-block lookups
        let old = store.state_at(1).unwrap().unwrap();
        assert!(!old.is_latest);
        assert!(!old.is_pending);
    }

    #[test]
    fn finalize_rejects_non_increasing_blocks() {
        let (_dir, store) = open_store();
        store.insert_pending_state(5).unwrap();
        store.finalize_state(5, None, false).unwrap();
        let err = store.finalize_state(5, None, false).unwrap_err();
        assert!(matches!(
            err,
            StoreError::OrderingViolation { block: 5, latest: 5 }
        ));
        let err = store.finalize_state(3, None, false).unwrap_err();
        assert!(matches!(
            err,
            StoreError::OrderingViolation { block: 3, latest: 5 }
        ));
    }

    #[test]
    fn eon_at_block_picks_greatest_activation_not_exceeding() {
        let (_dir, store) = open_store();
        store.insert_keyper_set(&eon(0, 3), 1).unwrap();
        store.insert_keyper_set(&eon(1, 10), 5).unwrap();

        assert!(store.eon_at_block(2).unwrap().is_none());
        assert_eq!(store.eon_at_block(3).unwrap().unwrap().index, 0);
        assert_eq!(store.eon_at_block(9).unwrap().unwrap().index, 0);
        assert_eq!(store.eon_at_block(10).unwrap().unwrap().index, 1);
        assert_eq!(store.eon_at_block(u64::MAX).unwrap().unwrap().index, 1);
    }

    #[test]
    fn duplicate_eon_with_different_members_is_a_data_error() {
        let (_dir, store) = open_store();
        store.insert_keyper_set(&eon(0, 3), 1).unwrap();
        // identical announcement: no-op
        store.insert_keyper_set(&eon(0, 3), 1).unwrap();
        // same index, different membership: rejected
        let mut other = eon(0, 3);
        other.keypers = vec![KeyperAddress::new([9u8; 20])];
        let err = store.insert_keyper_set(&other, 1).unwrap_err();
        assert!(matches!(err, StoreError::DuplicateEon { index: 0 }));
    }

    #[test]
    fn public_key_requires_existing_eon() {
        let (_dir, store) = open_store();
        let err = store.attach_eon_public_key(7, b"pk").unwrap_err();
        assert!(matches!(err, StoreError::UnknownEon { index: 7 }));

        store.insert_keyper_set(&eon(7, 1), 1).unwrap();
        let updated = store.attach_eon_public_key(7, b"pk").unwrap();
        assert_eq!(updated.public_key.as_deref(), Some(&b"pk"[..]));
        assert_eq!(
            store.eon_by_index(7).unwrap().unwrap().public_key,
            Some(b"pk".to_vec())
        );
    }

    #[test]
    fn toggle_lookup_is_most_recent_at_or_before() {
        let (_dir, store) = open_store();
        store
            .insert_active_toggle(&ActiveToggle::new(1, true))
            .unwrap();
        store
            .insert_active_toggle(&ActiveToggle::new(8, false))
            .unwrap();

        // toggle emitted at 1 is effective from 2
        assert!(store.active_toggle_at(1).unwrap().is_none());
        assert!(store.active_toggle_at(2).unwrap().unwrap().active);
        assert!(store.active_toggle_at(8).unwrap().unwrap().active);
        assert!(!store.active_toggle_at(9).unwrap().unwrap().active);
    }

    #[test]
    fn epoch_insert_is_on_conflict_do_nothing() {
        let (_dir, store) = open_store();
        let first = Epoch {
            eon_index: 0,
            identity: IdentityPreimage::for_block(10),
            secret_key: Some(vec![1, 2, 3]),
            block: 10,
        };
        assert!(store.insert_epoch(&first).unwrap());

        let mut replay = first.clone();
        replay.secret_key = Some(vec![9, 9, 9]);
        assert!(!store.insert_epoch(&replay).unwrap());

        let kept = store.epoch_for_inclusion(0, 10).unwrap().unwrap();
        assert_eq!(kept.secret_key, Some(vec![1, 2, 3]));
    }

    #[test]
    fn keyper_records_keep_their_first_seen_block() {
        let (_dir, store) = open_store();
        let addr = KeyperAddress::new([1u8; 20]);
        // the same address shows up again in a later committee
        store.insert_keyper_set(&eon(0, 3), 1).unwrap();
        let mut next = eon(1, 10);
        next.keypers = vec![addr, KeyperAddress::new([9u8; 20])];
        store.insert_keyper_set(&next, 5).unwrap();

        assert_eq!(store.keyper_first_seen(&addr).unwrap(), Some(1));
        assert_eq!(
            store.keyper_first_seen(&KeyperAddress::new([9u8; 20])).unwrap(),
            Some(5)
        );
    }
}
