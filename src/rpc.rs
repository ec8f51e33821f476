use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::node::NodeRef;

// Stateless JSON-over-HTTP request/response envelope. Every cross-peer
// operation in routing, membership and key transfer goes through here; the
// caller supplies the timeout appropriate to its context (stabilize probes
// are short, join-time routing is generous).

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessAck {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusAck {
    pub status: String,
}

// Payload of /update_finger_table: set entry i to node s
#[derive(Debug, Serialize, Deserialize)]
pub struct FingerUpdate {
    pub i: usize,
    pub s: NodeRef,
}

// Payload of /transfer_keys: the joiner asks its successor for the arc
// (lower_bound ?? successor.predecessor, node_id]
#[derive(Debug, Serialize, Deserialize)]
pub struct TransferRequest {
    pub node_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransferReply {
    pub keys: HashMap<String, String>,
}

// Payload of /receive_keys: a departing peer hands over its whole store
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyBundle {
    pub data: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessorUpdate {
    pub successor: NodeRef,
}

// The predecessor may legitimately be null: a departing peer with no
// predecessor propagates the absence
#[derive(Debug, Serialize, Deserialize)]
pub struct PredecessorUpdate {
    pub predecessor: Option<NodeRef>,
}

async fn get_json<T: DeserializeOwned>(client: &Client, url: &str, timeout: Duration) -> Result<T> {
    let resp = client
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?;
    if !resp.status().is_success() {
        bail!("GET {} returned {}", url, resp.status());
    }
    resp.json::<T>()
        .await
        .with_context(|| format!("GET {} returned malformed JSON", url))
}

async fn post_json<B: Serialize, T: DeserializeOwned>(
    client: &Client,
    url: &str,
    body: &B,
    timeout: Duration,
) -> Result<T> {
    let resp = client
        .post(url)
        .timeout(timeout)
        .json(body)
        .send()
        .await
        .with_context(|| format!("POST {} failed", url))?;
    if !resp.status().is_success() {
        bail!("POST {} returned {}", url, resp.status());
    }
    resp.json::<T>()
        .await
        .with_context(|| format!("POST {} returned malformed JSON", url))
}

// Ask `peer` for the successor of key_id
pub async fn find_successor(
    client: &Client,
    peer: &NodeRef,
    key_id: u64,
    timeout: Duration,
) -> Result<NodeRef> {
    find_successor_at(client, &peer.label(), key_id, timeout).await
}

// Same, addressed by a raw "host:port" string (the join bootstrap)
pub async fn find_successor_at(
    client: &Client,
    addr: &str,
    key_id: u64,
    timeout: Duration,
) -> Result<NodeRef> {
    let url = format!("http://{}/find_successor?key_id={}", addr, key_id);
    get_json(client, &url, timeout).await
}

pub async fn successor_of(client: &Client, peer: &NodeRef, timeout: Duration) -> Result<NodeRef> {
    let url = format!("{}/successor", peer.base_url());
    get_json(client, &url, timeout).await
}

// The remote predecessor pointer may be unset, which comes back as null
pub async fn predecessor_of(
    client: &Client,
    peer: &NodeRef,
    timeout: Duration,
) -> Result<Option<NodeRef>> {
    let url = format!("{}/get_predecessor", peer.base_url());
    get_json(client, &url, timeout).await
}

pub async fn closest_preceding_finger(
    client: &Client,
    peer: &NodeRef,
    key_id: u64,
    timeout: Duration,
) -> Result<NodeRef> {
    let url = format!(
        "{}/closest_preceding_finger?key_id={}",
        peer.base_url(),
        key_id
    );
    get_json(client, &url, timeout).await
}

pub async fn notify(
    client: &Client,
    peer: &NodeRef,
    me: &NodeRef,
    timeout: Duration,
) -> Result<bool> {
    let url = format!("{}/notify", peer.base_url());
    let ack: SuccessAck = post_json(client, &url, me, timeout).await?;
    Ok(ack.success)
}

pub async fn update_finger_table(
    client: &Client,
    peer: &NodeRef,
    i: usize,
    s: &NodeRef,
    timeout: Duration,
) -> Result<bool> {
    let url = format!("{}/update_finger_table", peer.base_url());
    let body = FingerUpdate { i, s: s.clone() };
    let ack: SuccessAck = post_json(client, &url, &body, timeout).await?;
    Ok(ack.success)
}

// Ask a new successor to yield the arc of keys we now own
pub async fn request_transfer(
    client: &Client,
    peer: &NodeRef,
    node_id: u64,
    lower_bound: Option<u64>,
    timeout: Duration,
) -> Result<HashMap<String, String>> {
    let url = format!("{}/transfer_keys", peer.base_url());
    let body = TransferRequest {
        node_id,
        lower_bound,
    };
    let reply: TransferReply = post_json(client, &url, &body, timeout).await?;
    Ok(reply.keys)
}

// Hand a batch of keys to `peer` (used on departure)
pub async fn send_keys(
    client: &Client,
    peer: &NodeRef,
    data: HashMap<String, String>,
    timeout: Duration,
) -> Result<()> {
    let url = format!("{}/receive_keys", peer.base_url());
    let _: StatusAck = post_json(client, &url, &KeyBundle { data }, timeout).await?;
    Ok(())
}

pub async fn set_successor_of(
    client: &Client,
    peer: &NodeRef,
    successor: &NodeRef,
    timeout: Duration,
) -> Result<()> {
    let url = format!("{}/update_successor", peer.base_url());
    let body = SuccessorUpdate {
        successor: successor.clone(),
    };
    let _: StatusAck = post_json(client, &url, &body, timeout).await?;
    Ok(())
}

pub async fn set_predecessor_of(
    client: &Client,
    peer: &NodeRef,
    predecessor: Option<NodeRef>,
    timeout: Duration,
) -> Result<()> {
    let url = format!("{}/update_predecessor", peer.base_url());
    let _: StatusAck = post_json(client, &url, &PredecessorUpdate { predecessor }, timeout).await?;
    Ok(())
}

// Full snapshot of a remote peer, kept as a raw JSON value for the
// network_state walk
pub async fn node_info(client: &Client, peer: &NodeRef, timeout: Duration) -> Result<Value> {
    let url = format!("{}/node_info", peer.base_url());
    get_json(client, &url, timeout).await
}

// Forward a client store one hop; the receiving peer stores unconditionally.
// The reply body is passed through untouched so the caller can extend the
// path list.
pub async fn forward_store(
    client: &Client,
    peer: &NodeRef,
    key: &str,
    value: String,
    timeout: Duration,
) -> Result<(StatusCode, Value)> {
    let url = format!("{}/store/{}?forwarded=1", peer.base_url(), key);
    let resp = client
        .post(&url)
        .timeout(timeout)
        .body(value)
        .send()
        .await
        .with_context(|| format!("POST {} failed", url))?;
    let status = resp.status();
    let body = resp
        .json::<Value>()
        .await
        .with_context(|| format!("POST {} returned malformed JSON", url))?;
    Ok((status, body))
}

pub async fn forward_lookup(
    client: &Client,
    peer: &NodeRef,
    key: &str,
    timeout: Duration,
) -> Result<(StatusCode, Value)> {
    let url = format!("{}/lookup/{}?forwarded=1", peer.base_url(), key);
    let resp = client
        .get(&url)
        .timeout(timeout)
        .send()
        .await
        .with_context(|| format!("GET {} failed", url))?;
    let status = resp.status();
    let body = resp
        .json::<Value>()
        .await
        .with_context(|| format!("GET {} returned malformed JSON", url))?;
    Ok((status, body))
}
