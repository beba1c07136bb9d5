// Path: crates/keys/tests/manager.rs
//! Behavioral tests for the key manager: at-most-once fulfillment, cancel
//! semantics, shutdown broadcast, and the activity/eon evaluation rules.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use shutter_keys::{Manager, ManagerError, ManagerHandle};
use shutter_storage::Store;
use shutter_types::{
    ActiveToggle, Eon, Epoch, IdentityPreimage, KeyperAddress, KeysError, NewSecretKey, State,
};

struct Fixture {
    _dir: tempfile::TempDir,
    store: Store,
    handle: ManagerHandle,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<Result<(), ManagerError>>,
}

fn start() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("relay.redb")).unwrap();
    start_with_store(dir, store)
}

fn start_with_store(dir: tempfile::TempDir, store: Store) -> Fixture {
    let (shutdown, shutdown_rx) = watch::channel(false);
    let (manager, handle) = Manager::new(store.clone(), shutdown_rx).unwrap();
    let task = tokio::spawn(manager.run());
    Fixture {
        _dir: dir,
        store,
        handle,
        shutdown,
        task,
    }
}

fn latest_state(block: u64) -> State {
    State {
        block,
        is_latest: true,
        is_pending: false,
        eon_index: None,
        shutter_active: Some(true),
    }
}

fn eon_with_key(index: u64, activation_block: u64) -> Eon {
    Eon {
        index,
        is_finalized: true,
        activation_block,
        threshold: 2,
        public_key: Some(vec![0xEE; 96]),
        keypers: vec![KeyperAddress::new([7u8; 20])],
    }
}

/// Primes an environment in which block 10 is decryptable once its key
/// arrives: shutter active from block 1, eon 0 active from block 0, latest
/// state at block 9.
async fn prime_active(fx: &Fixture) {
    fx.handle
        .new_toggle_sender()
        .send(ActiveToggle::new(0, true))
        .await
        .unwrap();
    fx.handle
        .new_eon_sender()
        .send(eon_with_key(0, 0))
        .await
        .unwrap();
    fx.handle
        .new_state_sender()
        .send(latest_state(9))
        .await
        .unwrap();
}

fn secret_key_for(block: u64) -> NewSecretKey {
    NewSecretKey {
        eon: 0,
        identity: IdentityPreimage::for_block(block),
        secret_key: vec![0xAB; 32],
    }
}

#[tokio::test]
async fn request_is_fulfilled_by_later_key_arrival() {
    let fx = start();
    prime_active(&fx).await;

    let request = fx.handle.request_decryption_key(10);
    fx.handle
        .new_key_sender()
        .send(secret_key_for(10))
        .await
        .unwrap();

    let result = request.wait().await;
    assert_eq!(result.block, 10);
    assert_eq!(result.outcome, Ok(vec![0xAB; 32]));
}

#[tokio::test]
async fn request_for_already_known_key_resolves() {
    let fx = start();
    prime_active(&fx).await;
    fx.handle
        .new_key_sender()
        .send(secret_key_for(10))
        .await
        .unwrap();

    let result = fx.handle.request_decryption_key(10).wait().await;
    assert_eq!(result.outcome, Ok(vec![0xAB; 32]));
}

#[tokio::test]
async fn canceled_request_resolves_once_and_stays_canceled() {
    let fx = start();
    prime_active(&fx).await;

    let request = fx.handle.request_decryption_key(10);
    let cancel = request.cancel_request();
    cancel.cancel();
    // canceling twice is a no-op
    cancel.cancel();

    let result = request.wait().await;
    assert_eq!(result.outcome, Err(KeysError::Canceled));

    // a key arriving afterwards must not re-resolve anything; a fresh
    // request for the same block sees it normally
    fx.handle
        .new_key_sender()
        .send(secret_key_for(10))
        .await
        .unwrap();
    let retry = fx.handle.request_decryption_key(10).wait().await;
    assert_eq!(retry.outcome, Ok(vec![0xAB; 32]));
}

#[tokio::test]
async fn dropping_the_handle_cancels_the_request() {
    let fx = start();
    prime_active(&fx).await;

    let request = fx.handle.request_decryption_key(10);
    drop(request);

    // the loop retires the entry; a later key leaves nothing dangling and
    // the manager keeps serving
    fx.handle
        .new_key_sender()
        .send(secret_key_for(10))
        .await
        .unwrap();
    let result = fx.handle.request_decryption_key(10).wait().await;
    assert_eq!(result.outcome, Ok(vec![0xAB; 32]));
}

#[tokio::test]
async fn inactive_shutter_resolves_not_active() {
    let fx = start();
    // latest state known, but no toggle was ever observed
    fx.handle
        .new_state_sender()
        .send(latest_state(5))
        .await
        .unwrap();

    let result = fx.handle.request_decryption_key(3).wait().await;
    assert_eq!(result.outcome, Err(KeysError::NotActive { block: 3 }));
}

#[tokio::test]
async fn no_eon_for_block_is_a_request_error() {
    let fx = start();
    fx.handle
        .new_toggle_sender()
        .send(ActiveToggle::new(0, true))
        .await
        .unwrap();
    fx.handle
        .new_state_sender()
        .send(latest_state(5))
        .await
        .unwrap();

    let result = fx.handle.request_decryption_key(3).wait().await;
    assert_eq!(result.outcome, Err(KeysError::NoEonForBlock { block: 3 }));
}

#[tokio::test]
async fn eon_without_public_key_counts_as_inactive() {
    let fx = start();
    fx.handle
        .new_toggle_sender()
        .send(ActiveToggle::new(0, true))
        .await
        .unwrap();
    let mut eon = eon_with_key(0, 0);
    eon.public_key = None;
    fx.handle.new_eon_sender().send(eon).await.unwrap();
    fx.handle
        .new_state_sender()
        .send(latest_state(5))
        .await
        .unwrap();

    let result = fx.handle.request_decryption_key(3).wait().await;
    assert_eq!(result.outcome, Err(KeysError::NotActive { block: 3 }));
}

#[tokio::test]
async fn requests_beyond_the_state_horizon_wait() {
    let fx = start();
    prime_active(&fx).await;

    // latest is 9, so block 12 is beyond latest + 1 and must wait even
    // though its key is already known
    let request = fx.handle.request_decryption_key(12);
    fx.handle
        .new_key_sender()
        .send(secret_key_for(12))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    fx.handle
        .new_state_sender()
        .send(latest_state(11))
        .await
        .unwrap();
    let result = request.wait().await;
    assert_eq!(result.outcome, Ok(vec![0xAB; 32]));
}

#[tokio::test]
async fn shutdown_aborts_every_pending_request() {
    let fx = start();
    // no state at all: every request waits
    let first = fx.handle.request_decryption_key(1);
    let second = fx.handle.request_decryption_key(2);
    tokio::time::sleep(Duration::from_millis(20)).await;

    fx.shutdown.send(true).unwrap();

    assert_eq!(first.wait().await.outcome, Err(KeysError::Aborted));
    assert_eq!(second.wait().await.outcome, Err(KeysError::Aborted));
    fx.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn request_after_shutdown_resolves_aborted() {
    let fx = start();
    fx.shutdown.send(true).unwrap();
    fx.task.await.unwrap().unwrap();

    let result = fx.handle.request_decryption_key(5).wait().await;
    assert_eq!(result.outcome, Err(KeysError::Aborted));
}

#[tokio::test]
async fn keys_persisted_before_a_restart_are_served() {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("relay.redb")).unwrap();
    // a previous run recorded the eon, its key broadcast, the toggle and
    // the arrived epoch key
    let mut eon = eon_with_key(0, 0);
    eon.public_key = None;
    store.insert_keyper_set(&eon, 0).unwrap();
    store.attach_eon_public_key(0, &[0xEE; 96]).unwrap();
    store
        .insert_active_toggle(&ActiveToggle::new(0, true))
        .unwrap();
    store
        .insert_epoch(&Epoch {
            eon_index: 0,
            identity: IdentityPreimage::for_block(10),
            secret_key: Some(vec![0xCD; 32]),
            block: 10,
        })
        .unwrap();
    store.insert_pending_state(9).unwrap();
    store.finalize_state(9, Some(0), true).unwrap();

    let fx = start_with_store(dir, store);
    let result = fx.handle.request_decryption_key(10).wait().await;
    assert_eq!(result.outcome, Ok(vec![0xCD; 32]));
}

#[tokio::test]
async fn eon_view_serves_point_lookups() {
    let fx = start();
    let eon = eon_with_key(4, 100);
    fx.handle.new_eon_sender().send(eon.clone()).await.unwrap();

    // the view snapshot refreshes asynchronously
    let mut tries = 0;
    while fx.handle.get_public_key(4).is_none() && tries < 100 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        tries += 1;
    }
    assert_eq!(fx.handle.get_public_key(4), Some(vec![0xEE; 96]));
    assert!(fx
        .handle
        .is_keyper_in_eon(4, &KeyperAddress::new([7u8; 20])));
    assert!(!fx
        .handle
        .is_keyper_in_eon(4, &KeyperAddress::new([8u8; 20])));

    // unknown eons are a not-found sentinel, not an error
    assert_eq!(fx.handle.get_public_key(9), None);
    assert!(!fx.handle.is_keyper_in_eon(9, &KeyperAddress::new([7u8; 20])));
    let _ = &fx.store;
}
