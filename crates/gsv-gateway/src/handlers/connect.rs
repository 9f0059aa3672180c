// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//!
//! `connect` (spec §4.2 step 1-4): validates the handshake, registers the
//! connection under the right `PeerKey`, and replies with `HelloOk`.

use crate::connection::{ConnCtx, ConnectionEntry, ConnectionRegistry, Outbound, PeerKey};
use crate::node_service::NodeService;
use crate::state::GatewayState;
use gsv_protocol::{ConnectParams, ConnectionMode, GatewayError, HelloOk, PROTOCOL_VERSION};
use subtle::ConstantTimeEq;
use tokio::sync::mpsc;

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.ct_eq(b).into()
}

pub struct ConnectOutcome {
    pub ctx: ConnCtx,
    pub hello: HelloOk,
}

/// Runs the full handshake and registers the socket. Called directly by
/// the WebSocket loop (not through [`crate::dispatcher::dispatch`]) because
/// it is the one handler that needs the connection's own outbound sender
/// before a [`ConnCtx`] exists to thread through the generic dispatch path.
pub async fn handle(
    state: &GatewayState,
    connection_id: &str,
    sender: mpsc::UnboundedSender<Outbound>,
    params: ConnectParams,
    now_ms: i64,
) -> Result<ConnectOutcome, GatewayError> {
    if params.min_protocol > PROTOCOL_VERSION || params.max_protocol < PROTOCOL_VERSION {
        return Err(GatewayError::UnsupportedProtocol);
    }

    if let Some(expected) = state.config.get_path("auth.token").and_then(|v| v.as_str().map(str::to_string)) {
        let presented = params.auth.as_ref().and_then(|a| a.token.as_deref()).unwrap_or("");
        if !constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
            return Err(GatewayError::Unauthorized);
        }
    }

    let mode = params.client.mode;
    let peer_id = match mode {
        ConnectionMode::Client => params.client.id.clone(),
        ConnectionMode::Node => params.client.id.clone(),
        ConnectionMode::Channel => {
            let channel = params.client.channel.clone().ok_or_else(|| GatewayError::BadParams("channel mode requires client.channel".into()))?;
            let account_id = params.client.account_id.clone().unwrap_or_else(|| "default".to_string());
            format!("{channel}:{account_id}")
        }
    };

    if mode == ConnectionMode::Node {
        let runtime = params.node_runtime.clone().ok_or_else(|| GatewayError::BadParams("node connections must supply nodeRuntime".into()))?;
        let tools = params.tools.clone().unwrap_or_default();
        NodeService::validate_capability_closure(&runtime)?;
        state.nodes.register_node(&peer_id, runtime, tools, params.client.platform.clone(), params.client.version.clone(), now_ms).await?;
    }

    register_connection(&state.connections, mode, &peer_id, params.client.account_id.clone(), connection_id, params.client.version.clone(), params.client.platform.clone(), sender);

    if mode == ConnectionMode::Client {
        state.sessions.touch(&state.main_key(), now_ms).await.ok();
    }

    let ctx = ConnCtx { connection_id: connection_id.to_string(), mode, peer_id, account_id: params.client.account_id };
    let hello = HelloOk::new(connection_id.to_string(), state.server_version.clone());
    Ok(ConnectOutcome { ctx, hello })
}

fn register_connection(
    registry: &ConnectionRegistry,
    mode: ConnectionMode,
    peer_id: &str,
    account_id: Option<String>,
    connection_id: &str,
    client_version: String,
    client_platform: String,
    sender: mpsc::UnboundedSender<Outbound>,
) {
    let key = match mode {
        ConnectionMode::Client => PeerKey::Client(peer_id.to_string()),
        ConnectionMode::Node => PeerKey::Node(peer_id.to_string()),
        ConnectionMode::Channel => PeerKey::Channel(peer_id.to_string()),
    };
    let entry = ConnectionEntry {
        connection_id: connection_id.to_string(),
        mode,
        client_id: None,
        node_id: None,
        channel_key: None,
        account_id,
        client_version,
        client_platform,
        sender,
    };
    registry.register(key, entry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::InMemoryBlobStore;
    use gsv_persist::{CronStore, InMemoryKvStore, KvStore};
    use gsv_protocol::{AuthParams, ClientInfo};
    use gsv_session::LoopbackSessionBridge;
    use serde_json::json;
    use std::sync::Arc;

    fn test_state() -> GatewayState {
        let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
        let cron_store = Arc::new(CronStore::open_in_memory().unwrap());
        let (tx, _rx) = mpsc::unbounded_channel();
        GatewayState::new(
            "0.1.0".into(),
            kv,
            cron_store,
            Arc::new(InMemoryBlobStore::new()),
            Arc::new(LoopbackSessionBridge::new(tx)),
            gsv_config::ConfigStore::new(json!({"session": {"mainKey": "agent:main", "defaultAgentId": "main"}})),
        )
    }

    fn client_params(mode: ConnectionMode) -> ConnectParams {
        ConnectParams {
            min_protocol: 1,
            max_protocol: 1,
            client: ClientInfo { id: "c1".into(), version: "1.0".into(), platform: "mac".into(), mode, channel: None, account_id: None },
            tools: None,
            node_runtime: None,
            auth: Some(AuthParams { token: Some("t".into()) }),
        }
    }

    #[tokio::test]
    async fn a_client_handshake_registers_the_connection_and_returns_hello_ok() {
        let state = test_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let outcome = handle(&state, "conn-1", tx, client_params(ConnectionMode::Client), 0).await.unwrap();
        assert_eq!(outcome.hello.protocol, 1);
        assert!(state.connections.sender_for_client("c1").is_some());
    }

    #[tokio::test]
    async fn a_node_without_node_runtime_is_rejected() {
        let state = test_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let err = handle(&state, "conn-1", tx, client_params(ConnectionMode::Node), 0).await.unwrap_err();
        assert!(matches!(err, GatewayError::BadParams(_)));
    }

    #[tokio::test]
    async fn an_unsupported_protocol_range_is_rejected() {
        let state = test_state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut params = client_params(ConnectionMode::Client);
        params.max_protocol = 0;
        let err = handle(&state, "conn-1", tx, params, 0).await.unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedProtocol));
    }
}
