use std::collections::HashSet;

use actix_web::http::StatusCode;
use actix_web::{get, post, web, HttpResponse, Responder};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::config::{DIAGNOSTIC_TIMEOUT, JOIN_TIMEOUT, NETWORK_STATE_LIMIT};
use crate::keyspace::hash_key;
use crate::node::{NodeRef, Peer};
use crate::rpc::{self, FingerUpdate, KeyBundle, PredecessorUpdate, SuccessorUpdate, TransferRequest};

// HTTP surface of a peer: the client-facing store/lookup pair, the
// peer-to-peer RPC endpoints behind routing and membership, and a few
// diagnostics. Every error reply carries {status, message, node_id}.

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(node_info)
        .service(successor)
        .service(get_predecessor)
        .service(notify)
        .service(closest_preceding_finger)
        .service(find_successor)
        .service(find_predecessor)
        .service(update_finger_table)
        .service(transfer_keys)
        .service(store_key)
        .service(lookup_key)
        .service(join)
        .service(depart)
        .service(update_successor)
        .service(update_predecessor)
        .service(receive_keys)
        .service(finger_table)
        .service(data_store)
        .service(network_state);
}

fn error_body(message: String, node_id: u64) -> Value {
    json!({
        "status": "error",
        "message": message,
        "node_id": node_id,
    })
}

#[derive(Deserialize)]
struct KeyIdQuery {
    key_id: u64,
}

#[derive(Deserialize)]
struct ForwardQuery {
    forwarded: Option<String>,
}

impl ForwardQuery {
    fn is_forwarded(&self) -> bool {
        self.forwarded.as_deref() == Some("1")
    }
}

// A forwarded reply accumulates the traversal path on the way back out
fn append_to_path(reply: &mut Value, node_id: u64) {
    match reply.get_mut("path").and_then(|p| p.as_array_mut()) {
        Some(path) => path.push(json!(node_id)),
        None => {
            if let Some(obj) = reply.as_object_mut() {
                obj.insert("path".to_string(), json!([node_id]));
            }
        }
    }
}

fn passthrough_status(status: reqwest::StatusCode) -> StatusCode {
    StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

#[get("/health")]
async fn health(peer: web::Data<Peer>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "node_id": peer.me.id,
        "successor": peer.successor().await.id,
        "predecessor": peer.predecessor().await.map(|p| p.id),
    }))
}

#[get("/node_info")]
async fn node_info(peer: web::Data<Peer>) -> impl Responder {
    HttpResponse::Ok().json(peer.info().await)
}

#[get("/successor")]
async fn successor(peer: web::Data<Peer>) -> impl Responder {
    HttpResponse::Ok().json(peer.successor().await)
}

#[get("/get_predecessor")]
async fn get_predecessor(peer: web::Data<Peer>) -> impl Responder {
    // Serializes to null when the pointer is unset
    HttpResponse::Ok().json(peer.predecessor().await)
}

#[post("/notify")]
async fn notify(body: web::Json<NodeRef>, peer: web::Data<Peer>) -> impl Responder {
    let accepted = peer.notify(body.into_inner()).await;
    HttpResponse::Ok().json(json!({ "success": accepted }))
}

#[get("/closest_preceding_finger")]
async fn closest_preceding_finger(
    query: web::Query<KeyIdQuery>,
    peer: web::Data<Peer>,
) -> impl Responder {
    HttpResponse::Ok().json(peer.closest_preceding_finger(query.key_id).await)
}

#[get("/find_successor")]
async fn find_successor(query: web::Query<KeyIdQuery>, peer: web::Data<Peer>) -> impl Responder {
    HttpResponse::Ok().json(peer.find_successor(query.key_id).await)
}

#[get("/find_predecessor")]
async fn find_predecessor(query: web::Query<KeyIdQuery>, peer: web::Data<Peer>) -> impl Responder {
    HttpResponse::Ok().json(peer.find_predecessor(query.key_id).await)
}

#[post("/update_finger_table")]
async fn update_finger_table(
    body: web::Json<FingerUpdate>,
    peer: web::Data<Peer>,
) -> impl Responder {
    let FingerUpdate { i, s } = body.into_inner();
    let changed = peer.update_finger_table(s, i).await;
    HttpResponse::Ok().json(json!({ "success": changed }))
}

// A new predecessor claims its arc of our keys. The explicit lower bound
// keeps the arc exact even when our predecessor pointer has already moved
// to the claimant.
#[post("/transfer_keys")]
async fn transfer_keys(body: web::Json<TransferRequest>, peer: web::Data<Peer>) -> impl Responder {
    let req = body.into_inner();
    let lower = match req.lower_bound {
        Some(lb) => lb,
        // If our predecessor pointer already moved to the claimant, the
        // bound (pred, claimant] would degenerate to the whole ring; our own
        // id bounds the arc we actually gave up
        None => match peer.predecessor().await {
            Some(pred) if pred.id != req.node_id => pred.id,
            _ => peer.me.id,
        },
    };

    let keys = peer.store.write().await.take_arc(lower, req.node_id, peer.m);
    if !keys.is_empty() {
        log::info!(
            "node {}: transferring {} keys to new predecessor {}",
            peer.me.id,
            keys.len(),
            req.node_id
        );
    }
    HttpResponse::Ok().json(json!({ "keys": keys }))
}

#[post("/store/{key}")]
async fn store_key(
    path: web::Path<String>,
    query: web::Query<ForwardQuery>,
    body: web::Bytes,
    peer: web::Data<Peer>,
) -> impl Responder {
    let key = path.into_inner();
    let value = match String::from_utf8(body.to_vec()) {
        Ok(v) => v,
        Err(_) => {
            return HttpResponse::BadRequest()
                .json(error_body("value must be valid UTF-8".to_string(), peer.me.id));
        }
    };

    let key_id = hash_key(&key, peer.m);
    // A forwarded request has already been routed by the entry peer; store
    // here unconditionally rather than risk ping-ponging during churn
    if query.is_forwarded() || peer.is_responsible(key_id).await {
        peer.store.write().await.put(key.clone(), value);
        log::info!("node {}: stored key '{}'", peer.me.id, key);
        return HttpResponse::Ok().json(json!({
            "status": "success",
            "message": format!("key '{}' stored at node {}", key, peer.me.id),
            "node_id": peer.me.id,
            "path": [peer.me.id],
        }));
    }

    let owner = peer.find_successor(key_id).await;
    match rpc::forward_store(&peer.client, &owner, &key, value, JOIN_TIMEOUT).await {
        Ok((status, mut reply)) => {
            append_to_path(&mut reply, peer.me.id);
            HttpResponse::build(passthrough_status(status)).json(reply)
        }
        Err(e) => HttpResponse::InternalServerError()
            .json(error_body(format!("failed to store key: {:#}", e), peer.me.id)),
    }
}

#[get("/lookup/{key}")]
async fn lookup_key(
    path: web::Path<String>,
    query: web::Query<ForwardQuery>,
    peer: web::Data<Peer>,
) -> impl Responder {
    let key = path.into_inner();
    let key_id = hash_key(&key, peer.m);

    if query.is_forwarded() || peer.is_responsible(key_id).await {
        return match peer.store.read().await.get(&key) {
            Some(value) => HttpResponse::Ok().json(json!({
                "status": "success",
                "key": key,
                "value": value,
                "node_id": peer.me.id,
                "path": [peer.me.id],
            })),
            None => HttpResponse::NotFound().json(json!({
                "status": "error",
                "message": format!("key '{}' not found", key),
                "node_id": peer.me.id,
                "path": [peer.me.id],
            })),
        };
    }

    let owner = peer.find_successor(key_id).await;
    match rpc::forward_lookup(&peer.client, &owner, &key, JOIN_TIMEOUT).await {
        Ok((status, mut reply)) => {
            append_to_path(&mut reply, peer.me.id);
            // Misses keep their 404 from the serving peer
            HttpResponse::build(passthrough_status(status)).json(reply)
        }
        Err(e) => HttpResponse::InternalServerError()
            .json(error_body(format!("failed to lookup key: {:#}", e), peer.me.id)),
    }
}

// Body: bootstrap "host:port", or empty to start a solo ring
#[post("/join")]
async fn join(body: web::Bytes, peer: web::Data<Peer>) -> impl Responder {
    let bootstrap = String::from_utf8_lossy(&body).trim().to_string();
    let bootstrap = (!bootstrap.is_empty()).then_some(bootstrap);

    match peer.join(bootstrap.as_deref()).await {
        Ok(()) => HttpResponse::Ok().json(json!({
            "status": "success",
            "message": format!("node {} joined the network", peer.me.id),
            "node_id": peer.me.id,
            "successor": peer.successor().await,
            "predecessor": peer.predecessor().await,
        })),
        Err(e) => HttpResponse::InternalServerError()
            .json(error_body(format!("failed to join network: {:#}", e), peer.me.id)),
    }
}

#[post("/depart")]
async fn depart(peer: web::Data<Peer>) -> impl Responder {
    peer.depart().await;
    HttpResponse::Ok().json(json!({
        "status": "success",
        "message": format!("node {} departed", peer.me.id),
    }))
}

#[post("/update_successor")]
async fn update_successor(body: web::Json<SuccessorUpdate>, peer: web::Data<Peer>) -> impl Responder {
    peer.set_successor(body.into_inner().successor).await;
    HttpResponse::Ok().json(json!({ "status": "success" }))
}

#[post("/update_predecessor")]
async fn update_predecessor(
    body: web::Json<PredecessorUpdate>,
    peer: web::Data<Peer>,
) -> impl Responder {
    peer.set_predecessor(body.into_inner().predecessor).await;
    HttpResponse::Ok().json(json!({ "status": "success" }))
}

// A departing predecessor drains its whole store into ours
#[post("/receive_keys")]
async fn receive_keys(body: web::Json<KeyBundle>, peer: web::Data<Peer>) -> impl Responder {
    let data = body.into_inner().data;
    if !data.is_empty() {
        log::info!("node {}: received {} keys", peer.me.id, data.len());
    }
    peer.store.write().await.merge(data);
    HttpResponse::Ok().json(json!({ "status": "received" }))
}

#[get("/finger_table")]
async fn finger_table(peer: web::Data<Peer>) -> impl Responder {
    HttpResponse::Ok().json(json!({
        "node_id": peer.me.id,
        "finger_table": peer.finger_table().await,
    }))
}

#[get("/data_store")]
async fn data_store(peer: web::Data<Peer>) -> impl Responder {
    let store = peer.store.read().await;
    HttpResponse::Ok().json(json!({
        "node_id": peer.me.id,
        "data_count": store.len(),
        "data": store.snapshot(),
    }))
}

// Walk the ring via successor pointers, collecting each peer's snapshot
#[get("/network_state")]
async fn network_state(peer: web::Data<Peer>) -> impl Responder {
    let own = serde_json::to_value(peer.info().await).unwrap_or(Value::Null);
    let mut nodes = vec![own];
    let mut visited: HashSet<u64> = HashSet::from([peer.me.id]);

    let mut current = peer.successor().await;
    let mut count = 0;
    while current.id != peer.me.id && count < NETWORK_STATE_LIMIT {
        if !visited.insert(current.id) {
            break;
        }
        count += 1;

        match rpc::node_info(&peer.client, &current, DIAGNOSTIC_TIMEOUT).await {
            Ok(info) => {
                let next = info
                    .get("successor")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<NodeRef>(v).ok());
                nodes.push(info);
                match next {
                    Some(n) => current = n,
                    None => break,
                }
            }
            Err(e) => {
                log::warn!(
                    "node {}: network_state walk stopped at node {}: {:#}",
                    peer.me.id,
                    current.id,
                    e
                );
                break;
            }
        }
    }

    HttpResponse::Ok().json(json!({ "nodes": nodes }))
}
