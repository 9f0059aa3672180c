// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! End-to-end exercise of spec §8 scenario 1 ("tool roundtrip (client)")
//! against a real bound TCP listener: a fake node dials in over
//! `gsv-node-client`, a fake UI client does the same, and the client's
//! `tool.invoke` is observed to produce exactly one `res` while the
//! node sees exactly one `tool.invoke` event.

use gsv_gateway::state::GatewayState;
use gsv_gateway::transfer::InMemoryBlobStore;
use gsv_node_client::NodeClient;
use gsv_persist::{CronStore, InMemoryKvStore, KvStore};
use gsv_protocol::{Capability, ClientInfo, ConnectParams, ConnectionMode, Frame, NodeRuntimeInfo, ToolDefinition};
use gsv_session::LoopbackSessionBridge;
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

async fn spawn_gateway() -> SocketAddr {
    let kv: Arc<dyn KvStore> = Arc::new(InMemoryKvStore::new());
    let cron_store = Arc::new(CronStore::open_in_memory().unwrap());
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let state = Arc::new(GatewayState::new(
        "test".into(),
        kv,
        cron_store,
        Arc::new(InMemoryBlobStore::new()),
        Arc::new(LoopbackSessionBridge::new(tx)),
        gsv_config::ConfigStore::new(json!({"session": {"mainKey": "agent:main", "defaultAgentId": "main"}})),
    ));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        tokio::spawn(gsv_gateway::run_broadcast_task(state.clone(), rx));
        axum::serve(listener, gsv_gateway::http::router(state).into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
    });
    // Give the listener a beat to start accepting.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    addr
}

fn node_connect_params() -> ConnectParams {
    let mut tool_capabilities = HashMap::new();
    tool_capabilities.insert("Bash".to_string(), vec![Capability::ShellExec]);
    ConnectParams {
        min_protocol: 1,
        max_protocol: 1,
        client: ClientInfo { id: "n1".into(), version: "1.0".into(), platform: "linux".into(), mode: ConnectionMode::Node, channel: None, account_id: None },
        tools: Some(vec![ToolDefinition { name: "Bash".into(), description: "runs a shell command".into(), input_schema: json!({"type": "object"}) }]),
        node_runtime: Some(NodeRuntimeInfo { host_capabilities: vec![Capability::ShellExec], tool_capabilities, host_os: Some("linux".into()), host_env: None }),
        auth: None,
    }
}

fn client_connect_params() -> ConnectParams {
    ConnectParams {
        min_protocol: 1,
        max_protocol: 1,
        client: ClientInfo { id: "c1".into(), version: "1.0".into(), platform: "mac".into(), mode: ConnectionMode::Client, channel: None, account_id: None },
        tools: None,
        node_runtime: None,
        auth: None,
    }
}

#[tokio::test]
async fn client_tool_invoke_round_trips_through_a_connected_node() {
    let addr = spawn_gateway().await;
    let url = format!("ws://{addr}/ws");

    let (mut node, _hello) = NodeClient::connect(&url, node_connect_params()).await.unwrap();
    let (mut client, _hello) = NodeClient::connect(&url, client_connect_params()).await.unwrap();

    client.request("tool.invoke", Some(json!({"tool": "n1__Bash", "arguments": {"cmd": "echo hi"}}))).await.unwrap();

    let invoke_evt = node
        .wait_for(|f| matches!(f, Frame::Evt { event, .. } if event == "tool.invoke"))
        .await
        .unwrap();
    let Frame::Evt { payload: Some(payload), .. } = invoke_evt else { panic!("expected tool.invoke event with payload") };
    let call_id = payload["callId"].as_str().unwrap().to_string();
    assert_eq!(payload["tool"], "Bash");

    node.request("tool.result", Some(json!({"callId": call_id, "result": "hi\n"}))).await.unwrap();

    let reply = client.wait_for(|f| matches!(f, Frame::Res { .. })).await.unwrap();
    match reply {
        Frame::Res { ok, payload, .. } => {
            assert!(ok);
            assert_eq!(payload.unwrap()["result"], "hi\n");
        }
        _ => panic!("expected res frame"),
    }
}

#[tokio::test]
async fn tool_invoke_against_an_unknown_node_returns_404() {
    let addr = spawn_gateway().await;
    let url = format!("ws://{addr}/ws");
    let (mut client, _hello) = NodeClient::connect(&url, client_connect_params()).await.unwrap();

    client.request("tool.invoke", Some(json!({"tool": "ghost__Bash", "arguments": {}}))).await.unwrap();
    let reply = client.wait_for(|f| matches!(f, Frame::Res { .. })).await.unwrap();
    match reply {
        Frame::Res { ok, error, .. } => {
            assert!(!ok);
            assert_eq!(error.unwrap().code, 404);
        }
        _ => panic!("expected res frame"),
    }
}

#[tokio::test]
async fn node_forget_against_a_connected_node_returns_409() {
    let addr = spawn_gateway().await;
    let url = format!("ws://{addr}/ws");

    let (_node, _hello) = NodeClient::connect(&url, node_connect_params()).await.unwrap();
    let (mut client, _hello) = NodeClient::connect(&url, client_connect_params()).await.unwrap();

    client.request("node.forget", Some(json!({"nodeId": "n1"}))).await.unwrap();
    let reply = client.wait_for(|f| matches!(f, Frame::Res { .. })).await.unwrap();
    match reply {
        Frame::Res { ok, error, .. } => {
            assert!(!ok);
            assert_eq!(error.unwrap().code, 409);
        }
        _ => panic!("expected res frame"),
    }
}

#[tokio::test]
async fn a_node_disconnect_fails_its_pending_logs_call_with_503() {
    let addr = spawn_gateway().await;
    let url = format!("ws://{addr}/ws");

    let node = NodeClient::connect(&url, node_connect_params()).await.unwrap().0;
    let (mut client, _hello) = NodeClient::connect(&url, client_connect_params()).await.unwrap();

    client.request("logs.get", Some(json!({}))).await.unwrap();
    // Give the gateway a beat to register the pending logs call before the
    // node drops, so the disconnect sweep actually has something to fail.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    drop(node);

    let reply = client.wait_for(|f| matches!(f, Frame::Res { .. })).await.unwrap();
    match reply {
        Frame::Res { ok, error, .. } => {
            assert!(!ok);
            assert_eq!(error.unwrap().code, 503);
        }
        _ => panic!("expected res frame"),
    }
}

#[tokio::test]
async fn a_reconnecting_node_replaces_the_prior_socket_which_is_closed_with_1000() {
    let addr = spawn_gateway().await;
    let url = format!("ws://{addr}/ws");

    let (mut node_a, _hello) = NodeClient::connect(&url, node_connect_params()).await.unwrap();
    let (_node_b, _hello) = NodeClient::connect(&url, node_connect_params()).await.unwrap();

    // Socket A should observe a close frame (or the stream ending) now that
    // B has replaced it under the same nodeId (spec P5).
    let closed = tokio::time::timeout(std::time::Duration::from_secs(2), node_a.recv()).await;
    match closed {
        Ok(Ok(None)) => {}
        Ok(Ok(Some(_))) => {}
        other => panic!("expected socket A to observe closure, got {other:?}"),
    }
}
