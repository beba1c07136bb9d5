// Path: crates/ipc/src/server.rs
//! Implementation of the decryption-key gRPC service.

use std::future::Future;
use std::net::SocketAddr;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

use shutter_keys::ManagerHandle;
use shutter_types::KeysError;

use crate::decryption::decryption_key_service_server::{
    DecryptionKeyService, DecryptionKeyServiceServer,
};
use crate::decryption::{
    DecryptionKey, DecryptionKeyStreamRequest, DecryptionKeyStreamResponse,
    GetDecryptionKeyRequest, GetDecryptionKeyResponse,
};
use crate::errs;

// capacity 1: the loop only advances to the next block once the previous
// message has left for the transport
const STREAM_BUFFER: usize = 1;

/// The service implementation; one per node, cheap to clone.
#[derive(Clone)]
pub struct DecryptionKeyServer {
    manager: ManagerHandle,
}

impl DecryptionKeyServer {
    /// Wraps a key-manager handle.
    pub fn new(manager: ManagerHandle) -> Self {
        Self { manager }
    }
}

/// Resolves one block against the key manager and renders the outcome.
///
/// Blocks until the result promise resolves. If the enclosing call is
/// canceled by the transport, this future is dropped and the request handle
/// signals the cancellation back to the manager so the pending entry is
/// retired.
async fn resolve_key(manager: &ManagerHandle, block: u64) -> Result<DecryptionKey, Status> {
    let request = manager.request_decryption_key(block);
    let result = request.wait().await;
    match result.outcome {
        Ok(key) => Ok(DecryptionKey {
            active: true,
            key,
            block: result.block,
        }),
        // not (yet) decryptable is a regular response, not an error
        Err(KeysError::NotActive { .. }) => Ok(DecryptionKey {
            active: false,
            key: Vec::new(),
            block: result.block,
        }),
        Err(err) => Err(errs::status_for(&err)),
    }
}

#[tonic::async_trait]
impl DecryptionKeyService for DecryptionKeyServer {
    async fn get_decryption_key(
        &self,
        request: Request<GetDecryptionKeyRequest>,
    ) -> Result<Response<GetDecryptionKeyResponse>, Status> {
        let block = request.into_inner().block;
        tracing::info!(target: "grpc", block, "received call GetDecryptionKey");
        let result = resolve_key(&self.manager, block).await;
        tracing::info!(
            target: "grpc",
            block,
            has_key = result.as_ref().map(|k| k.active).unwrap_or(false),
            "served call GetDecryptionKey"
        );
        let key = result?;
        Ok(Response::new(GetDecryptionKeyResponse {
            decryption_key: Some(key),
        }))
    }

    type DecryptionKeyStreamStream = ReceiverStream<Result<DecryptionKeyStreamResponse, Status>>;

    async fn decryption_key_stream(
        &self,
        request: Request<DecryptionKeyStreamRequest>,
    ) -> Result<Response<Self::DecryptionKeyStreamStream>, Status> {
        let start_block = request.into_inner().start_block;
        tracing::info!(target: "grpc", start_block, "received call DecryptionKeyStream");
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let manager = self.manager.clone();

        tokio::spawn(async move {
            let mut block = start_block;
            let mut counter = 0u64;
            loop {
                match resolve_key(&manager, block).await {
                    Ok(key) => {
                        let msg = DecryptionKeyStreamResponse {
                            counter,
                            decryption_key: Some(key),
                        };
                        // a send failure means the stream broke; terminate
                        // without retry, reconnection is the caller's move
                        if tx.send(Ok(msg)).await.is_err() {
                            tracing::debug!(target: "grpc", block, "key stream receiver gone");
                            break;
                        }
                        counter += 1;
                        block += 1;
                    }
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

/// Serves the decryption-key service on `addr` until `shutdown` resolves.
///
/// Stops accepting new RPCs on shutdown but waits until currently active
/// calls are served.
pub async fn serve(
    manager: ManagerHandle,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send,
) -> Result<(), tonic::transport::Error> {
    tracing::info!(target: "grpc", %addr, "decryption-key service listening");
    Server::builder()
        .add_service(DecryptionKeyServiceServer::new(DecryptionKeyServer::new(
            manager,
        )))
        .serve_with_shutdown(addr, shutdown)
        .await
}
