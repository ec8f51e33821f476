mod common;

use serde_json::json;

use common::{join, lookup, spawn_peer, store};

// A single peer is a complete ring: it owns every key and serves store and
// lookup locally with a one-entry path.
#[actix_web::test]
async fn test_solo_ring_store_and_lookup() {
    let port = 15100;
    let peer = spawn_peer(port, 7).await;
    let client = reqwest::Client::new();
    join(&client, port, None).await;

    let reply = store(&client, port, "hello", "world").await;
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["node_id"], peer.me.id);
    assert_eq!(reply["path"], json!([peer.me.id]));

    let (status, reply) = lookup(&client, port, "hello").await;
    assert_eq!(status, 200);
    assert_eq!(reply["status"], "success");
    assert_eq!(reply["value"], "world");
    assert_eq!(reply["node_id"], peer.me.id);
    assert_eq!(reply["path"], json!([peer.me.id]));
}

#[actix_web::test]
async fn test_solo_ring_lookup_miss_is_404() {
    let port = 15101;
    let peer = spawn_peer(port, 7).await;
    let client = reqwest::Client::new();
    join(&client, port, None).await;

    let (status, reply) = lookup(&client, port, "missing").await;
    assert_eq!(status, 404);
    assert_eq!(reply["status"], "error");
    assert_eq!(reply["node_id"], peer.me.id);
    assert_eq!(reply["path"], json!([peer.me.id]));
}

#[actix_web::test]
async fn test_solo_ring_overwrite() {
    let port = 15102;
    spawn_peer(port, 7).await;
    let client = reqwest::Client::new();
    join(&client, port, None).await;

    store(&client, port, "color", "red").await;
    store(&client, port, "color", "blue").await;

    let (status, reply) = lookup(&client, port, "color").await;
    assert_eq!(status, 200);
    assert_eq!(reply["value"], "blue");
}
