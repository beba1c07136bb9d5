// Path: crates/node/src/node.rs
//! Component wiring and lifecycle.

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

use shutter_ipc::server;
use shutter_keys::{Manager, ManagerError, ManagerHandle};
use shutter_storage::Store;
use shutter_sync::{FactSenders, SyncHandle, SyncService};
use shutter_types::StoreError;

use crate::config::Config;

/// A started relay node.
///
/// Holds the handles of the three long-running loops. Dropping the node
/// without [`Node::begin_shutdown`] leaves the loops running detached.
pub struct Node {
    sync_handle: Option<SyncHandle>,
    manager_handle: ManagerHandle,
    shutdown: watch::Sender<bool>,
    manager_task: JoinHandle<Result<(), ManagerError>>,
    sync_task: JoinHandle<Result<(), StoreError>>,
    grpc_task: JoinHandle<Result<(), tonic::transport::Error>>,
}

fn flatten<E: Into<anyhow::Error>>(res: Result<Result<(), E>, JoinError>) -> anyhow::Result<()> {
    match res {
        Ok(inner) => inner.map_err(Into::into),
        Err(join) => Err(join.into()),
    }
}

impl Node {
    /// Opens the store and spawns the key manager, the state reconciler and
    /// the gRPC service. Must be called within a tokio runtime.
    pub fn start(cfg: Config) -> anyhow::Result<Self> {
        cfg.check()?;
        let store = Store::open(&cfg.db_path)?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (manager, manager_handle) = Manager::new(store.clone(), shutdown_rx)?;
        let facts = FactSenders {
            new_state: manager_handle.new_state_sender(),
            new_eon: manager_handle.new_eon_sender(),
            new_toggle: manager_handle.new_toggle_sender(),
            new_key: manager_handle.new_key_sender(),
        };
        let (sync_service, sync_handle) = SyncService::new(store, facts);

        let manager_task = tokio::spawn(manager.run());
        let sync_task = tokio::spawn(sync_service.run());

        let mut grpc_shutdown = shutdown.subscribe();
        let grpc_task = tokio::spawn(server::serve(
            manager_handle.clone(),
            cfg.grpc_listen_addr,
            async move {
                loop {
                    if *grpc_shutdown.borrow() {
                        break;
                    }
                    if grpc_shutdown.changed().await.is_err() {
                        break;
                    }
                }
            },
        ));

        tracing::info!(
            target: "node",
            db = %cfg.db_path.display(),
            grpc = %cfg.grpc_listen_addr,
            "shutter relay node started"
        );
        Ok(Self {
            sync_handle: Some(sync_handle),
            manager_handle,
            shutdown,
            manager_task,
            sync_task,
            grpc_task,
        })
    }

    /// The submit side of the reconciler, for the upstream chain-event
    /// source and the verified-key feed.
    pub fn sync_handle(&self) -> Option<SyncHandle> {
        self.sync_handle.clone()
    }

    /// The key manager's caller-facing handle.
    pub fn key_manager(&self) -> &ManagerHandle {
        &self.manager_handle
    }

    /// Signals shutdown: the manager aborts every pending request, the gRPC
    /// server stops accepting new calls and drains in-flight ones, and the
    /// reconciler stops once its event channel is released.
    pub fn begin_shutdown(&mut self) {
        let _ = self.shutdown.send(true);
        // closing our copy of the event channel lets the reconciler drain
        // and exit; external clones keep it alive until they drop too
        self.sync_handle = None;
    }

    /// Waits for all loops to finish. The first error wins.
    pub async fn wait(self) -> anyhow::Result<()> {
        let Node {
            manager_task,
            sync_task,
            grpc_task,
            ..
        } = self;
        let (manager_res, sync_res, grpc_res) = tokio::join!(manager_task, sync_task, grpc_task);
        let mut out = flatten(manager_res);
        for res in [flatten(sync_res), flatten(grpc_res)] {
            if out.is_ok() {
                out = res;
            }
        }
        out
    }

    /// Runs until an interrupt arrives or any loop exits on its own, then
    /// tears the node down.
    pub async fn run_until_stopped(mut self) -> anyhow::Result<()> {
        let mut first: anyhow::Result<()> = Ok(());
        let mut manager_done = false;
        let mut sync_done = false;
        let mut grpc_done = false;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(target: "node", "interrupt received, shutting down");
            }
            res = &mut self.manager_task => {
                manager_done = true;
                first = flatten(res);
            }
            res = &mut self.sync_task => {
                sync_done = true;
                first = flatten(res);
            }
            res = &mut self.grpc_task => {
                grpc_done = true;
                first = flatten(res);
            }
        }

        self.begin_shutdown();
        let Node {
            manager_task,
            sync_task,
            grpc_task,
            ..
        } = self;
        let mut collect = |res: anyhow::Result<()>| {
            if first.is_ok() {
                first = res;
            }
        };
        if !manager_done {
            collect(flatten(manager_task.await));
        }
        if !sync_done {
            collect(flatten(sync_task.await));
        }
        if !grpc_done {
            collect(flatten(grpc_task.await));
        }
        first
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shutter_types::{ChainEvent, LatestBlock};

    #[tokio::test]
    async fn node_starts_reconciles_and_shuts_down_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config {
            db_path: dir.path().join("relay.redb"),
            grpc_listen_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let mut node = Node::start(cfg).unwrap();

        let sync = node.sync_handle().unwrap();
        sync.submit(ChainEvent::LatestBlock(LatestBlock { number: 1 }))
            .await
            .unwrap();
        sync.submit(ChainEvent::LatestBlock(LatestBlock { number: 2 }))
            .await
            .unwrap();
        drop(sync);

        // a request that can never be decided is aborted by the shutdown
        let pending = node.key_manager().request_decryption_key(100);

        node.begin_shutdown();
        let result = pending.wait().await;
        assert_eq!(
            result.outcome,
            Err(shutter_types::KeysError::Aborted)
        );
        node.wait().await.unwrap();
    }
}
