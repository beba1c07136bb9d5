// Path: crates/ipc/src/client.rs
//! Client for the decryption-key service.

use tonic::transport::{Channel, Endpoint};
use tonic::{Status, Streaming};

use crate::decryption::decryption_key_service_client::DecryptionKeyServiceClient;
use crate::decryption::{
    DecryptionKey, DecryptionKeyStreamRequest, DecryptionKeyStreamResponse,
    GetDecryptionKeyRequest,
};

/// A connected decryption-key service client.
pub struct Client {
    inner: DecryptionKeyServiceClient<Channel>,
}

impl Client {
    /// Dials `endpoint` (e.g. `http://127.0.0.1:9191`).
    pub async fn connect(endpoint: String) -> Result<Self, tonic::transport::Error> {
        let channel = Endpoint::from_shared(endpoint)?.connect().await?;
        Ok(Self {
            inner: DecryptionKeyServiceClient::new(channel),
        })
    }

    /// Fetches the key for one block. Blocks until the server resolves the
    /// request or the call is canceled.
    pub async fn get_key(&mut self, block: u64) -> Result<DecryptionKey, Status> {
        let response = self
            .inner
            .get_decryption_key(GetDecryptionKeyRequest { block })
            .await?
            .into_inner();
        response
            .decryption_key
            .ok_or_else(|| Status::internal("response carried no decryption key"))
    }

    /// Opens a key stream starting at `start_block`.
    pub async fn stream_keys(&mut self, start_block: u64) -> Result<KeyStream, Status> {
        let stream = self
            .inner
            .decryption_key_stream(DecryptionKeyStreamRequest { start_block })
            .await?
            .into_inner();
        Ok(KeyStream {
            inner: stream,
            resume_block: start_block,
        })
    }
}

/// An open key stream that tracks how far it advanced, so a broken stream
/// can be resumed from the first block not yet delivered.
pub struct KeyStream {
    inner: Streaming<DecryptionKeyStreamResponse>,
    resume_block: u64,
}

impl KeyStream {
    /// The next key in block order; `None` once the server ended the
    /// stream.
    pub async fn next_key(&mut self) -> Result<Option<DecryptionKey>, Status> {
        match self.inner.message().await? {
            Some(msg) => {
                let key = msg
                    .decryption_key
                    .ok_or_else(|| Status::internal("stream message carried no decryption key"))?;
                self.resume_block = key.block + 1;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    /// Where to restart after a broken stream: the block after the last one
    /// delivered.
    pub fn resume_block(&self) -> u64 {
        self.resume_block
    }
}
