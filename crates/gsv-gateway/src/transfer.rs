// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! Transfer state machine (spec §4.8): moves bytes between two endpoints,
//! each either a connected node (by `nodeId` + path) or the gateway's own
//! blob store (`node == "gsv"` + key).

use async_trait::async_trait;
use gsv_protocol::GatewayError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const GSV_ENDPOINT: &str = "gsv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEndpoint {
    pub node: String,
    pub path: String,
}

impl TransferEndpoint {
    pub fn is_gateway(&self) -> bool {
        self.node == GSV_ENDPOINT
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Init,
    MetaWait,
    AcceptWait,
    Streaming,
    Completing,
}

#[derive(Debug, Clone)]
pub struct Transfer {
    pub transfer_id: u64,
    pub call_id: String,
    pub session_key: String,
    pub source: TransferEndpoint,
    pub destination: TransferEndpoint,
    pub state: TransferState,
    pub size: Option<u64>,
    pub mime: Option<String>,
    pub bytes_transferred: u64,
}

/// Custom R2-style object metadata (`X-R2-Meta`, `expiresAt` gate on
/// `/media/{uuid.ext}`) — a flat string map, stored alongside the bytes.
pub type BlobMeta = HashMap<String, String>;

/// Fixed-length readable/writable access to the gateway's own blob storage,
/// used when a transfer endpoint is `"gsv"` rather than a connected node,
/// and by the `GET|PUT /fs/{r2-key}` and `GET /media/{uuid.ext}` HTTP
/// routes (spec §6).
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Vec<u8>, GatewayError>;
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), GatewayError>;
    async fn put_meta(&self, key: &str, meta: BlobMeta) -> Result<(), GatewayError>;
    async fn meta(&self, key: &str) -> Result<BlobMeta, GatewayError>;
}

pub struct InMemoryBlobStore {
    data: Mutex<HashMap<String, Vec<u8>>>,
    meta: Mutex<HashMap<String, BlobMeta>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self { data: Mutex::new(HashMap::new()), meta: Mutex::new(HashMap::new()) }
    }
}

impl Default for InMemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, GatewayError> {
        self.data.lock().unwrap().get(key).cloned().ok_or_else(|| GatewayError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: &[u8]) -> Result<(), GatewayError> {
        self.data.lock().unwrap().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn put_meta(&self, key: &str, meta: BlobMeta) -> Result<(), GatewayError> {
        self.meta.lock().unwrap().insert(key.to_string(), meta);
        Ok(())
    }

    async fn meta(&self, key: &str) -> Result<BlobMeta, GatewayError> {
        Ok(self.meta.lock().unwrap().get(key).cloned().unwrap_or_default())
    }
}

pub struct TransferTable {
    next_id: AtomicU64,
    transfers: Mutex<HashMap<u64, Transfer>>,
    pub blob_store: Arc<dyn BlobStore>,
    /// Bytes accumulated so far for a transfer whose destination is the
    /// gateway's own blob store rather than a connected node — the WS
    /// binary-frame handler has nowhere else to hold them between chunks,
    /// since `BlobStore::put` takes the whole object at once.
    gsv_buffers: Mutex<HashMap<u64, Vec<u8>>>,
}

impl TransferTable {
    pub fn new(blob_store: Arc<dyn BlobStore>) -> Self {
        Self { next_id: AtomicU64::new(1), transfers: Mutex::new(HashMap::new()), blob_store, gsv_buffers: Mutex::new(HashMap::new()) }
    }

    pub fn append_gsv_chunk(&self, transfer_id: u64, bytes: &[u8]) {
        self.gsv_buffers.lock().unwrap().entry(transfer_id).or_default().extend_from_slice(bytes);
    }

    pub fn take_gsv_buffer(&self, transfer_id: u64) -> Vec<u8> {
        self.gsv_buffers.lock().unwrap().remove(&transfer_id).unwrap_or_default()
    }

    /// `transferRequest`: allocates a monotonically increasing id and opens
    /// the state machine in `init` → `meta-wait`. Gsv↔gsv is rejected at
    /// request time per spec.
    pub fn request(&self, call_id: String, session_key: String, source: TransferEndpoint, destination: TransferEndpoint) -> Result<Transfer, GatewayError> {
        if source.is_gateway() && destination.is_gateway() {
            return Err(GatewayError::BadParams("gateway-to-gateway transfers are not supported".into()));
        }
        let transfer_id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let transfer = Transfer {
            transfer_id,
            call_id,
            session_key,
            source,
            destination,
            state: TransferState::MetaWait,
            size: None,
            mime: None,
            bytes_transferred: 0,
        };
        self.transfers.lock().unwrap().insert(transfer_id, transfer.clone());
        Ok(transfer)
    }

    pub fn get(&self, transfer_id: u64) -> Option<Transfer> {
        self.transfers.lock().unwrap().get(&transfer_id).cloned()
    }

    pub fn on_meta(&self, transfer_id: u64, size: u64, mime: String) -> Result<Transfer, GatewayError> {
        self.transition(transfer_id, TransferState::MetaWait, TransferState::AcceptWait, |t| {
            t.size = Some(size);
            t.mime = Some(mime);
        })
    }

    pub fn on_accept(&self, transfer_id: u64) -> Result<Transfer, GatewayError> {
        self.transition(transfer_id, TransferState::AcceptWait, TransferState::Streaming, |_| {})
    }

    pub fn on_chunk(&self, transfer_id: u64, bytes_len: u64) -> Result<Transfer, GatewayError> {
        let mut transfers = self.transfers.lock().unwrap();
        let transfer = transfers.get_mut(&transfer_id).ok_or_else(|| GatewayError::NotFound(format!("transfer {transfer_id}")))?;
        if transfer.state != TransferState::Streaming {
            return Err(GatewayError::Conflict(format!("transfer {transfer_id} not in streaming state")));
        }
        transfer.bytes_transferred += bytes_len;
        Ok(transfer.clone())
    }

    pub fn on_complete(&self, transfer_id: u64) -> Result<Transfer, GatewayError> {
        self.transition(transfer_id, TransferState::Streaming, TransferState::Completing, |_| {})
    }

    /// `transfer.done`: the terminal transition. Removes the transfer from
    /// the table and returns it so the caller can resolve the pending
    /// `session.toolResult`.
    pub fn finish(&self, transfer_id: u64, bytes_transferred: Option<u64>) -> Result<Transfer, GatewayError> {
        let mut transfers = self.transfers.lock().unwrap();
        let mut transfer = transfers.remove(&transfer_id).ok_or_else(|| GatewayError::NotFound(format!("transfer {transfer_id}")))?;
        if transfer.state != TransferState::Completing {
            transfers.insert(transfer_id, transfer);
            return Err(GatewayError::Conflict(format!("transfer {transfer_id} not in completing state")));
        }
        if let Some(n) = bytes_transferred {
            transfer.bytes_transferred = n;
        }
        Ok(transfer)
    }

    /// Any error, disconnect, or explicit error field fails the transfer:
    /// durable + in-memory state is dropped and the caller resolves the
    /// pending `session.toolResult` with an error.
    pub fn fail(&self, transfer_id: u64) -> Option<Transfer> {
        self.gsv_buffers.lock().unwrap().remove(&transfer_id);
        self.transfers.lock().unwrap().remove(&transfer_id)
    }

    pub fn transfers_touching_node(&self, node_id: &str) -> Vec<Transfer> {
        self.transfers
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.source.node == node_id || t.destination.node == node_id)
            .cloned()
            .collect()
    }

    fn transition(&self, transfer_id: u64, from: TransferState, to: TransferState, mutate: impl FnOnce(&mut Transfer)) -> Result<Transfer, GatewayError> {
        let mut transfers = self.transfers.lock().unwrap();
        let transfer = transfers.get_mut(&transfer_id).ok_or_else(|| GatewayError::NotFound(format!("transfer {transfer_id}")))?;
        if transfer.state != from {
            return Err(GatewayError::Conflict(format!("transfer {transfer_id} expected state {from:?}, was {:?}", transfer.state)));
        }
        mutate(transfer);
        transfer.state = to;
        Ok(transfer.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_endpoint(node: &str) -> TransferEndpoint {
        TransferEndpoint { node: node.into(), path: "/tmp/x".into() }
    }

    #[test]
    fn rejects_gateway_to_gateway_transfer_at_request_time() {
        let table = TransferTable::new(Arc::new(InMemoryBlobStore::new()));
        let err = table
            .request("c1".into(), "agent:a".into(), TransferEndpoint { node: GSV_ENDPOINT.into(), path: "a".into() }, TransferEndpoint { node: GSV_ENDPOINT.into(), path: "b".into() })
            .unwrap_err();
        assert!(matches!(err, GatewayError::BadParams(_)));
    }

    #[test]
    fn happy_path_walks_every_state_in_order() {
        let table = TransferTable::new(Arc::new(InMemoryBlobStore::new()));
        let transfer = table.request("c1".into(), "agent:a".into(), node_endpoint("n1"), node_endpoint("n2")).unwrap();
        assert_eq!(transfer.state, TransferState::MetaWait);

        let transfer = table.on_meta(transfer.transfer_id, 1024, "application/octet-stream".into()).unwrap();
        assert_eq!(transfer.state, TransferState::AcceptWait);

        let transfer = table.on_accept(transfer.transfer_id).unwrap();
        assert_eq!(transfer.state, TransferState::Streaming);

        let transfer = table.on_chunk(transfer.transfer_id, 512).unwrap();
        assert_eq!(transfer.bytes_transferred, 512);

        let transfer = table.on_complete(transfer.transfer_id).unwrap();
        assert_eq!(transfer.state, TransferState::Completing);

        let transfer = table.finish(transfer.transfer_id, Some(512)).unwrap();
        assert_eq!(transfer.bytes_transferred, 512);
        assert!(table.get(transfer.transfer_id).is_none());
    }

    #[test]
    fn chunk_outside_streaming_state_is_rejected() {
        let table = TransferTable::new(Arc::new(InMemoryBlobStore::new()));
        let transfer = table.request("c1".into(), "agent:a".into(), node_endpoint("n1"), node_endpoint("n2")).unwrap();
        let err = table.on_chunk(transfer.transfer_id, 10).unwrap_err();
        assert!(matches!(err, GatewayError::Conflict(_)));
    }

    #[test]
    fn fail_removes_the_transfer_from_the_table() {
        let table = TransferTable::new(Arc::new(InMemoryBlobStore::new()));
        let transfer = table.request("c1".into(), "agent:a".into(), node_endpoint("n1"), node_endpoint("n2")).unwrap();
        assert!(table.fail(transfer.transfer_id).is_some());
        assert!(table.get(transfer.transfer_id).is_none());
    }
}
