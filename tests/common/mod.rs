// Each test binary pulls in the subset of helpers it needs
#![allow(dead_code)]

use std::time::Duration;

use actix_web::{web, App, HttpServer};
use serde_json::Value;

use chordkv::{api, Peer};

// Spawn a peer with a live HTTP listener on 127.0.0.1:port. The returned
// handle is the same shared state the handlers see, so tests can drive
// stabilization deterministically instead of waiting on a timed background
// loop.
pub async fn spawn_peer(port: u16, m: u32) -> web::Data<Peer> {
    let peer = web::Data::new(Peer::new("127.0.0.1", port, m));
    let state = peer.clone();
    let server =
        HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
            .workers(1)
            .bind(("127.0.0.1", port))
            .unwrap_or_else(|e| panic!("failed to bind port {}: {}", port, e))
            .run();
    actix_rt::spawn(server);

    // Give the listener a moment to come up
    tokio::time::sleep(Duration::from_millis(100)).await;
    peer
}

pub fn url(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", port, path)
}

// POST /join with an optional bootstrap address, panicking on a non-success
// reply
pub async fn join(client: &reqwest::Client, port: u16, bootstrap: Option<u16>) {
    let body = bootstrap
        .map(|p| format!("127.0.0.1:{}", p))
        .unwrap_or_default();
    let reply: Value = client
        .post(url(port, "/join"))
        .body(body)
        .send()
        .await
        .expect("join request failed")
        .json()
        .await
        .expect("join reply was not JSON");
    assert_eq!(reply["status"], "success", "join failed: {}", reply);
}

// Run stabilize + fix_fingers across all peers for a number of rounds. One
// round per peer is one maintenance tick; m rounds fully rebuild every
// finger table.
pub async fn stabilize_ring(peers: &[web::Data<Peer>], rounds: usize) {
    for _ in 0..rounds {
        for peer in peers {
            peer.stabilize().await;
            peer.fix_fingers().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// Follow successor pointers from `start` until the walk returns to it,
// collecting the ids seen. Panics if the ring does not close within `max`
// steps.
pub async fn collect_ring(peers: &[web::Data<Peer>], start: usize, max: usize) -> Vec<u64> {
    let mut ids = vec![peers[start].me.id];
    let mut current = peers[start].successor().await;
    for _ in 0..max {
        if current.id == peers[start].me.id {
            return ids;
        }
        ids.push(current.id);
        let next = peers
            .iter()
            .find(|p| p.me.id == current.id)
            .expect("successor pointer leads outside the test ring");
        current = next.successor().await;
    }
    panic!("ring did not close after {} steps: {:?}", max, ids);
}

pub async fn store(client: &reqwest::Client, port: u16, key: &str, value: &str) -> Value {
    client
        .post(url(port, &format!("/store/{}", key)))
        .body(value.to_string())
        .send()
        .await
        .expect("store request failed")
        .json()
        .await
        .expect("store reply was not JSON")
}

pub async fn lookup(client: &reqwest::Client, port: u16, key: &str) -> (u16, Value) {
    let resp = client
        .get(url(port, &format!("/lookup/{}", key)))
        .send()
        .await
        .expect("lookup request failed");
    let status = resp.status().as_u16();
    let body = resp.json().await.expect("lookup reply was not JSON");
    (status, body)
}

// Find `count` consecutive-ish ports whose node ids are pairwise distinct on
// the m-bit ring, so test rings never collapse two peers onto one id
pub fn distinct_ports(base: u16, count: usize, m: u32) -> Vec<u16> {
    let mut ports = Vec::new();
    let mut ids = std::collections::HashSet::new();
    let mut port = base;
    while ports.len() < count {
        let id = chordkv::keyspace::hash_address("127.0.0.1", port, m);
        if ids.insert(id) {
            ports.push(port);
        }
        port += 1;
    }
    ports
}

// Keys currently held by the peer at `port`, via its /data_store endpoint
pub async fn data_store_keys(
    client: &reqwest::Client,
    port: u16,
) -> std::collections::HashSet<String> {
    let reply: Value = client
        .get(url(port, "/data_store"))
        .send()
        .await
        .expect("data_store request failed")
        .json()
        .await
        .expect("data_store reply was not JSON");
    reply["data"]
        .as_object()
        .expect("data_store reply had no data map")
        .keys()
        .cloned()
        .collect()
}
