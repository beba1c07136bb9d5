// Path: crates/sync/src/service.rs
//! The reconciler event loop and its submit handle.

use thiserror::Error;
use tokio::sync::mpsc;

use shutter_storage::Store;
use shutter_types::{
    ActiveToggle, ChainEvent, Eon, EonPublicKey, Epoch, KeyperSet, LatestBlock, NewSecretKey,
    ShutterState, State, StoreError,
};

const EVENT_BUFFER: usize = 10;

/// The submit side of the reconciler: one handler function per event type,
/// exposed to the upstream chain-event source and the verified-key feed.
#[derive(Clone)]
pub struct SyncHandle {
    events: mpsc::Sender<ChainEvent>,
}

/// The reconciler loop has terminated and no longer accepts events.
#[derive(Debug, Error)]
#[error("sync loop is no longer accepting events")]
pub struct SubmitError;

impl SyncHandle {
    /// Submits any chain event.
    pub async fn submit(&self, ev: ChainEvent) -> Result<(), SubmitError> {
        self.events.send(ev).await.map_err(|_| SubmitError)
    }

    /// A new unsafe head was observed.
    pub async fn submit_latest_block(&self, ev: LatestBlock) -> Result<(), SubmitError> {
        self.submit(ChainEvent::LatestBlock(ev)).await
    }

    /// A keyper committee was announced.
    pub async fn submit_keyper_set(&self, ev: KeyperSet) -> Result<(), SubmitError> {
        self.submit(ChainEvent::KeyperSet(ev)).await
    }

    /// An eon public key was broadcast.
    pub async fn submit_eon_public_key(&self, ev: EonPublicKey) -> Result<(), SubmitError> {
        self.submit(ChainEvent::EonPublicKey(ev)).await
    }

    /// The protocol was paused or unpaused.
    pub async fn submit_shutter_state(&self, ev: ShutterState) -> Result<(), SubmitError> {
        self.submit(ChainEvent::ShutterState(ev)).await
    }

    /// A verified secret key arrived from the peer network.
    pub async fn submit_new_secret_key(&self, ev: NewSecretKey) -> Result<(), SubmitError> {
        self.submit(ChainEvent::NewSecretKey(ev)).await
    }
}

/// Fact channels into the key manager's event loop.
///
/// Sends block until the manager drains its inbox; the manager never reaches
/// into the reconciler's state, and vice versa. A closed channel is treated
/// as "manager gone" and only logged: the reconciler keeps the store current
/// regardless.
pub struct FactSenders {
    /// Newly finalized latest states.
    pub new_state: mpsc::Sender<State>,
    /// New or refreshed eons (committee announced, public key attached).
    pub new_eon: mpsc::Sender<Eon>,
    /// Newly recorded activation toggles.
    pub new_toggle: mpsc::Sender<ActiveToggle>,
    /// Verified secret keys, after persistence.
    pub new_key: mpsc::Sender<NewSecretKey>,
}

/// The state reconciler.
///
/// Owns the store's write side. Create with [`SyncService::new`], then drive
/// either with [`SyncService::run`] or, in tests, one event at a time with
/// [`SyncService::process_next`].
pub struct SyncService {
    store: Store,
    facts: FactSenders,
    events: mpsc::Receiver<ChainEvent>,
}

impl SyncService {
    /// Creates the service and its submit handle.
    pub fn new(store: Store, facts: FactSenders) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        (
            Self {
                store,
                facts,
                events: rx,
            },
            SyncHandle { events: tx },
        )
    }

    /// Runs the synchronized write loop until the event channel closes or an
    /// unrecoverable error occurs.
    pub async fn run(mut self) -> Result<(), StoreError> {
        tracing::debug!(target: "sync", "reconciler starting event loop");
        while self.process_next().await? {}
        tracing::debug!(target: "sync", "event channel closed, reconciler stopping");
        Ok(())
    }

    /// Consumes one event from the channel and processes it synchronously.
    /// Returns `false` once the channel is closed.
    ///
    /// CAREFUL, do not call this while the service is simultaneously being
    /// driven by [`SyncService::run`].
    pub async fn process_next(&mut self) -> Result<bool, StoreError> {
        let Some(ev) = self.events.recv().await else {
            return Ok(false);
        };
        self.handle_event(ev).await?;
        Ok(true)
    }

    async fn handle_event(&mut self, ev: ChainEvent) -> Result<(), StoreError> {
        match ev {
            ChainEvent::LatestBlock(lb) => self.handle_latest_block(lb).await,
            ChainEvent::KeyperSet(ks) => self.handle_keyper_set(ks).await,
            ChainEvent::EonPublicKey(epk) => self.handle_eon_public_key(epk).await,
            ChainEvent::ShutterState(ss) => self.handle_shutter_state(ss).await,
            ChainEvent::NewSecretKey(sk) => self.handle_new_secret_key(sk).await,
        }
    }

    /// Inserts the pending row for the new head, then finalizes it: the
    /// active eon is the one with the greatest activation block not above
    /// the head, and the activity flag comes from the most recent toggle
    /// effective at or before the head, carried forward from the prior
    /// latest state when no toggle was ever recorded.
    async fn handle_latest_block(&mut self, lb: LatestBlock) -> Result<(), StoreError> {
        let block = lb.number;
        tracing::info!(target: "sync", block, "handle new unsafe head");
        self.store.insert_pending_state(block)?;

        let prior = self.store.latest_state()?;
        let eon = self.store.eon_at_block(block)?;
        let shutter_active = match self.store.active_toggle_at(block)? {
            Some(toggle) => toggle.active,
            None => prior
                .as_ref()
                .and_then(|p| p.shutter_active)
                .unwrap_or(false),
        };

        let state =
            self.store
                .finalize_state(block, eon.as_ref().map(|e| e.index), shutter_active)?;
        tracing::info!(
            target: "sync",
            block,
            eon_index = ?state.eon_index,
            shutter_active,
            "new latest state finalized"
        );
        if self.facts.new_state.send(state).await.is_err() {
            tracing::warn!(target: "sync", "key manager gone, dropping state fact");
        }
        Ok(())
    }

    /// Upserts the (possibly overlapping) keyper membership and creates the
    /// eon row. An empty member list is legal.
    async fn handle_keyper_set(&mut self, ks: KeyperSet) -> Result<(), StoreError> {
        tracing::info!(target: "sync", eon = ks.eon, activation_block = ks.activation_block, "handle keyper set");
        let eon = Eon {
            index: ks.eon,
            is_finalized: true,
            activation_block: ks.activation_block,
            threshold: ks.threshold,
            public_key: None,
            keypers: ks.members,
        };
        self.store.insert_keyper_set(&eon, ks.at_block)?;
        tracing::info!(target: "sync", eon = eon.index, keypers = eon.keypers.len(), "saved eon keyper set");
        if self.facts.new_eon.send(eon).await.is_err() {
            tracing::warn!(target: "sync", "key manager gone, dropping eon fact");
        }
        Ok(())
    }

    async fn handle_eon_public_key(&mut self, epk: EonPublicKey) -> Result<(), StoreError> {
        tracing::info!(target: "sync", eon = epk.eon, "handle eon public key");
        let eon = self.store.attach_eon_public_key(epk.eon, &epk.key)?;
        tracing::info!(target: "sync", eon = eon.index, "eon public key attached");
        if self.facts.new_eon.send(eon).await.is_err() {
            tracing::warn!(target: "sync", "key manager gone, dropping eon fact");
        }
        Ok(())
    }

    /// Although the toggle event is emitted in `at_block`, the state it
    /// represents only takes effect one block after.
    async fn handle_shutter_state(&mut self, ss: ShutterState) -> Result<(), StoreError> {
        let toggle = ActiveToggle::new(ss.at_block, ss.active);
        tracing::info!(
            target: "sync",
            active = toggle.active,
            effective_block = toggle.effective_block,
            "handle shutter paused/unpaused event"
        );
        self.store.insert_active_toggle(&toggle)?;
        if self.facts.new_toggle.send(toggle).await.is_err() {
            tracing::warn!(target: "sync", "key manager gone, dropping toggle fact");
        }
        Ok(())
    }

    /// Persists an arriving key record before forwarding it, so a restart
    /// can still serve it. Duplicate deliveries are logged, not errors.
    async fn handle_new_secret_key(&mut self, sk: NewSecretKey) -> Result<(), StoreError> {
        let block = sk.identity.block();
        let epoch = Epoch {
            eon_index: sk.eon,
            identity: sk.identity,
            secret_key: Some(sk.secret_key.clone()),
            block,
        };
        let inserted = self.store.insert_epoch(&epoch)?;
        if !inserted {
            tracing::info!(target: "sync", eon = sk.eon, block, "handled duplicate decryption key, not inserted");
            return Ok(());
        }
        tracing::info!(target: "sync", eon = sk.eon, block, "decryption key inserted");
        if self.facts.new_key.send(sk).await.is_err() {
            tracing::warn!(target: "sync", "key manager gone, dropping secret-key fact");
        }
        Ok(())
    }
}
