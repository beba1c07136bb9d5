// Path: crates/keys/src/manager.rs
//! The key manager control loop.
//!
//! State transitions are serialized by construction: one task owns the eon
//! cache, the received-key map and the pending-request list, and blocks only
//! on its own inboxes and the shutdown signal. A key arrival is matched
//! against the whole pending list before the next inbox item is processed,
//! so no request can be missed due to interleaving.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};

use shutter_storage::Store;
use shutter_types::{
    ActiveToggle, Eon, IdentityPreimage, KeyperAddress, KeysError, NewSecretKey, State, StoreError,
};

use crate::request::{CancelRequest, Command, KeyRequest, KeyRequestHandle, KeyRequestResult};

const FACT_BUFFER: usize = 10;

/// Fatal conditions of the control loop. Request-scoped errors never show
/// up here; they resolve individual promises instead.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// A producer-side channel closed while the loop still expected input.
    #[error("{0} channel closed")]
    InboxClosed(&'static str),
}

/// A read-only snapshot of the eon cache, refreshed by the control loop.
#[derive(Debug, Clone, Default)]
pub struct EonView {
    eons: Arc<BTreeMap<u64, Eon>>,
}

/// The key manager actor. Create with [`Manager::new`], then drive with
/// [`Manager::run`] on its own task.
pub struct Manager {
    store: Store,
    eons: BTreeMap<u64, Eon>,
    toggles: BTreeMap<u64, bool>,
    keys: HashMap<(u64, IdentityPreimage), Vec<u8>>,
    latest: Option<State>,
    pending: Vec<KeyRequest>,

    commands: mpsc::UnboundedReceiver<Command>,
    new_state: mpsc::Receiver<State>,
    new_eon: mpsc::Receiver<Eon>,
    new_toggle: mpsc::Receiver<ActiveToggle>,
    new_key: mpsc::Receiver<NewSecretKey>,
    shutdown: watch::Receiver<bool>,
    view: watch::Sender<EonView>,
}

/// The caller-facing side of the manager: request/promise API, fact senders
/// for the reconciler, and point lookups against the eon snapshot.
#[derive(Clone)]
pub struct ManagerHandle {
    commands: mpsc::UnboundedSender<Command>,
    new_state: mpsc::Sender<State>,
    new_eon: mpsc::Sender<Eon>,
    new_toggle: mpsc::Sender<ActiveToggle>,
    new_key: mpsc::Sender<NewSecretKey>,
    view: watch::Receiver<EonView>,
    next_id: Arc<AtomicU64>,
}

impl Manager {
    /// Builds the manager, priming the eon/toggle caches and the latest
    /// state from the store so a restarted node resumes where it left off.
    pub fn new(
        store: Store,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(Self, ManagerHandle), StoreError> {
        let mut eons = BTreeMap::new();
        for eon in store.eons()? {
            eons.insert(eon.index, eon);
        }
        let mut toggles = BTreeMap::new();
        for toggle in store.active_toggles()? {
            toggles.insert(toggle.effective_block, toggle.active);
        }
        let latest = store.latest_state()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::channel(FACT_BUFFER);
        let (eon_tx, eon_rx) = mpsc::channel(FACT_BUFFER);
        let (toggle_tx, toggle_rx) = mpsc::channel(FACT_BUFFER);
        let (key_tx, key_rx) = mpsc::channel(FACT_BUFFER);
        let (view_tx, view_rx) = watch::channel(EonView {
            eons: Arc::new(eons.clone()),
        });

        let manager = Self {
            store,
            eons,
            toggles,
            keys: HashMap::new(),
            latest,
            pending: Vec::new(),
            commands: command_rx,
            new_state: state_rx,
            new_eon: eon_rx,
            new_toggle: toggle_rx,
            new_key: key_rx,
            shutdown,
            view: view_tx,
        };
        let handle = ManagerHandle {
            commands: command_tx,
            new_state: state_tx,
            new_eon: eon_tx,
            new_toggle: toggle_tx,
            new_key: key_tx,
            view: view_rx,
            next_id: Arc::new(AtomicU64::new(0)),
        };
        Ok((manager, handle))
    }

    /// Runs the event loop until shutdown. On shutdown every still-pending
    /// request is resolved with an aborted outcome, not silently dropped.
    pub async fn run(mut self) -> Result<(), ManagerError> {
        tracing::debug!(target: "keys", "manager starting event loop");
        loop {
            tokio::select! {
                changed = self.shutdown.changed() => {
                    let stop = match changed {
                        Ok(()) => *self.shutdown.borrow(),
                        Err(_) => true,
                    };
                    if stop {
                        self.abort_pending();
                        return Ok(());
                    }
                }
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Request(req)) => self.handle_request(req),
                    Some(Command::Cancel { id }) => self.handle_cancel(id),
                    None => return self.close("command"),
                },
                state = self.new_state.recv() => match state {
                    Some(state) => self.handle_new_state(state),
                    None => return self.close("state"),
                },
                eon = self.new_eon.recv() => match eon {
                    Some(eon) => self.handle_new_eon(eon),
                    None => return self.close("eon"),
                },
                toggle = self.new_toggle.recv() => match toggle {
                    Some(toggle) => self.handle_new_toggle(toggle),
                    None => return self.close("toggle"),
                },
                key = self.new_key.recv() => match key {
                    Some(key) => self.handle_new_key(key),
                    None => return self.close("secret-key"),
                },
            }
        }
    }

    fn close(&mut self, channel: &'static str) -> Result<(), ManagerError> {
        self.abort_pending();
        Err(ManagerError::InboxClosed(channel))
    }

    fn handle_request(&mut self, mut req: KeyRequest) {
        tracing::info!(target: "keys", block = req.block, id = req.id, "scheduling key request");
        match self.evaluate(req.block) {
            Some(outcome) => {
                tracing::info!(
                    target: "keys",
                    block = req.block,
                    success = outcome.is_ok(),
                    "filled key request promise"
                );
                req.fill(outcome);
            }
            None => {
                req.touch();
                self.pending.push(req);
            }
        }
    }

    fn handle_cancel(&mut self, id: u64) {
        // unknown ids mean the request was already resolved: a no-op
        if let Some(pos) = self.pending.iter().position(|r| r.id == id) {
            let mut req = self.pending.swap_remove(pos);
            tracing::info!(target: "keys", block = req.block, id, "key request canceled by caller");
            req.fill(Err(KeysError::Canceled));
        }
    }

    fn handle_new_state(&mut self, state: State) {
        tracing::info!(target: "keys", block = state.block, "received new latest state");
        self.latest = Some(state);
        self.check_pending();
    }

    fn handle_new_eon(&mut self, eon: Eon) {
        tracing::info!(
            target: "keys",
            eon = eon.index,
            has_public_key = eon.public_key.is_some(),
            "refreshing eon cache"
        );
        self.eons.insert(eon.index, eon);
        self.view.send_replace(EonView {
            eons: Arc::new(self.eons.clone()),
        });
        self.check_pending();
    }

    fn handle_new_toggle(&mut self, toggle: ActiveToggle) {
        self.toggles.insert(toggle.effective_block, toggle.active);
        self.check_pending();
    }

    fn handle_new_key(&mut self, key: NewSecretKey) {
        tracing::info!(
            target: "keys",
            eon = key.eon,
            identity = %key.identity,
            "received decryption key"
        );
        self.keys.insert((key.eon, key.identity), key.secret_key);
        self.check_pending();
    }

    /// Re-scans the whole pending list once, fulfilling every request that
    /// became decidable and compacting the list to the unmatched remainder.
    fn check_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let mut remaining = Vec::with_capacity(self.pending.len());
        for mut req in std::mem::take(&mut self.pending) {
            match self.evaluate(req.block) {
                Some(outcome) => {
                    tracing::info!(
                        target: "keys",
                        block = req.block,
                        success = outcome.is_ok(),
                        "filled key request promise"
                    );
                    req.fill(outcome);
                }
                None => {
                    req.touch();
                    remaining.push(req);
                }
            }
        }
        self.pending = remaining;
    }

    /// Decides a request for `block` against the current view.
    ///
    /// `None` means "not decidable yet, keep waiting": the state horizon has
    /// not reached the block, or the key simply has not arrived.
    fn evaluate(&self, block: u64) -> Option<Result<Vec<u8>, KeysError>> {
        let latest = self.latest.as_ref()?;
        // only decide requests for up to the next block after the known
        // latest state
        if block > latest.block + 1 {
            return None;
        }

        let active = self
            .toggles
            .range(..=block)
            .next_back()
            .map(|(_, active)| *active)
            .unwrap_or(false);
        if !active {
            return Some(Err(KeysError::NotActive { block }));
        }

        let eon = match self.eon_at(block) {
            Some(eon) => eon,
            None => return Some(Err(KeysError::NoEonForBlock { block })),
        };
        // without a broadcast public key the eon cannot release keys;
        // shutter counts as inactive for its blocks
        if eon.public_key.is_none() {
            return Some(Err(KeysError::NotActive { block }));
        }

        let identity = IdentityPreimage::for_block(block);
        if let Some(key) = self.keys.get(&(eon.index, identity)) {
            return Some(Ok(key.clone()));
        }
        // keys received before a restart only exist as persisted records
        match self.store.epoch_for_inclusion(eon.index, block) {
            Ok(Some(epoch)) => epoch.secret_key.map(Ok),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(
                    target: "keys",
                    block,
                    error = %err,
                    "epoch lookup failed, keeping request pending"
                );
                None
            }
        }
    }

    fn eon_at(&self, block: u64) -> Option<&Eon> {
        self.eons
            .values()
            .filter(|eon| eon.activation_block <= block)
            .max_by_key(|eon| eon.activation_block)
    }

    fn abort_pending(&mut self) {
        for mut req in std::mem::take(&mut self.pending) {
            tracing::debug!(
                target: "keys",
                block = req.block,
                waited = ?req.requested_at.elapsed(),
                idle = ?req.last_checked.elapsed(),
                "aborting pending key request on shutdown"
            );
            req.fill(Err(KeysError::Aborted));
        }
    }
}

impl ManagerHandle {
    /// Registers a decryption-key request for `block`.
    ///
    /// This does not actively request the key from the keypers; it
    /// subscribes to fulfillment as soon as the key is received from them.
    /// If the manager is already gone the handle resolves immediately with
    /// an aborted outcome.
    pub fn request_decryption_key(&self, block: u64) -> KeyRequestHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (promise_tx, promise_rx) = oneshot::channel::<KeyRequestResult>();
        let cancel = CancelRequest {
            id,
            commands: self.commands.clone(),
        };
        let request = KeyRequest::new(id, block, promise_tx);
        if let Err(rejected) = self.commands.send(Command::Request(request)) {
            if let Command::Request(mut request) = rejected.0 {
                request.fill(Err(KeysError::Aborted));
            }
        }
        KeyRequestHandle::new(block, promise_rx, cancel)
    }

    /// The public key of `eon`, if the eon is known and its key was
    /// broadcast. Unknown eons return `None` rather than an error.
    pub fn get_public_key(&self, eon: u64) -> Option<Vec<u8>> {
        self.view
            .borrow()
            .eons
            .get(&eon)
            .and_then(|e| e.public_key.clone())
    }

    /// Whether `addr` is a member of `eon`'s committee. Unknown eons are
    /// simply `false`.
    pub fn is_keyper_in_eon(&self, eon: u64, addr: &KeyperAddress) -> bool {
        self.view
            .borrow()
            .eons
            .get(&eon)
            .map(|e| e.has_keyper(addr))
            .unwrap_or(false)
    }

    /// Sender for newly finalized latest states.
    pub fn new_state_sender(&self) -> mpsc::Sender<State> {
        self.new_state.clone()
    }

    /// Sender for new or refreshed eons.
    pub fn new_eon_sender(&self) -> mpsc::Sender<Eon> {
        self.new_eon.clone()
    }

    /// Sender for newly recorded activation toggles.
    pub fn new_toggle_sender(&self) -> mpsc::Sender<ActiveToggle> {
        self.new_toggle.clone()
    }

    /// Sender for verified secret keys.
    pub fn new_key_sender(&self) -> mpsc::Sender<NewSecretKey> {
        self.new_key.clone()
    }
}
