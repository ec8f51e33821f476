mod common;

use serde_json::Value;

use common::{
    collect_ring, data_store_keys, distinct_ports, join, lookup, spawn_peer, stabilize_ring, store,
    url,
};

// Graceful departure from a four-peer ring: the leaver's keys re-home to its
// successor, the neighbours splice together, and every key stays reachable.
#[actix_web::test]
async fn test_departure_rehomes_keys_and_relinks() {
    let m = 7;
    let ports = distinct_ports(15510, 4, m);
    let mut peers = Vec::new();
    let client = reqwest::Client::new();

    for (i, port) in ports.iter().enumerate() {
        let peer = spawn_peer(*port, m).await;
        join(&client, *port, (i > 0).then_some(ports[0])).await;
        peers.push(peer);
        stabilize_ring(&peers, 3).await;
    }
    stabilize_ring(&peers, m as usize).await;

    let keys: Vec<String> = (0..30).map(|i| format!("record-{}", i)).collect();
    for key in &keys {
        store(&client, ports[0], key, "payload").await;
    }

    // Depart the peer holding the most keys so the hand-off is observable
    let mut held = Vec::new();
    for port in &ports {
        held.push(data_store_keys(&client, *port).await);
    }
    let leaver = (0..peers.len())
        .max_by_key(|i| held[*i].len())
        .expect("no peers");
    let leaver_keys = held[leaver].clone();
    assert!(leaver_keys.len() >= 2, "leaver holds too few keys to observe");

    let old_successor = peers[leaver].successor().await;
    let old_predecessor = peers[leaver]
        .predecessor()
        .await
        .expect("leaver has no predecessor");

    let reply: Value = client
        .post(url(ports[leaver], "/depart"))
        .send()
        .await
        .expect("depart request failed")
        .json()
        .await
        .expect("depart reply was not JSON");
    assert_eq!(reply["status"], "success");

    // The successor received every key the leaver held
    let succ_index = peers
        .iter()
        .position(|p| p.me.id == old_successor.id)
        .expect("successor not in test ring");
    let succ_held = data_store_keys(&client, ports[succ_index]).await;
    for key in &leaver_keys {
        assert!(succ_held.contains(key), "key '{}' lost in departure", key);
    }

    // Neighbours were spliced around the leaver
    let pred_index = peers
        .iter()
        .position(|p| p.me.id == old_predecessor.id)
        .expect("predecessor not in test ring");
    assert_eq!(peers[pred_index].successor().await.id, old_successor.id);
    assert_eq!(
        peers[succ_index].predecessor().await.expect("successor lost its predecessor").id,
        old_predecessor.id
    );

    // The leaver is reset to a fresh solo state
    assert_eq!(peers[leaver].successor().await.id, peers[leaver].me.id);
    assert!(peers[leaver].predecessor().await.is_none());
    assert!(data_store_keys(&client, ports[leaver]).await.is_empty());

    // Let the remaining peers repair their fingers, then every key must
    // still be reachable from a surviving entry point
    let remaining: Vec<_> = peers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != leaver)
        .map(|(_, p)| p.clone())
        .collect();
    stabilize_ring(&remaining, 2 * m as usize).await;

    let ring = collect_ring(&remaining, 0, 6).await;
    assert_eq!(ring.len(), remaining.len(), "ring is {:?}", ring);

    for key in &keys {
        let (status, reply) = lookup(&client, ports[pred_index], key).await;
        assert_eq!(status, 200, "lookup of '{}' failed: {}", key, reply);
        assert_eq!(reply["value"], "payload");
    }
}
