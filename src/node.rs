use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::keyspace::{finger_start, hash_address, in_interval};
use crate::storage::Storage;

// A reference to a peer on the ring. Equality is by identifier; the ip/port
// pair is only used to reach the peer. On the wire this is {node_id, ip, port}.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRef {
    #[serde(rename = "node_id")]
    pub id: u64,
    pub ip: String,
    pub port: u16,
}

impl NodeRef {
    pub fn new(ip: &str, port: u16, m: u32) -> Self {
        NodeRef {
            id: hash_address(ip, port, m),
            ip: ip.to_string(),
            port,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    pub fn label(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for NodeRef {}

// One finger table entry: the first live peer at or after `start` clockwise
#[derive(Debug, Clone, Serialize)]
pub struct FingerEntry {
    pub start: u64,
    #[serde(rename = "successor")]
    pub node: NodeRef,
}

// Mutable routing state of a peer. fingers[0].node mirrors `successor` at
// every site that assigns the successor pointer.
#[derive(Debug)]
pub struct RingState {
    pub successor: NodeRef,
    pub predecessor: Option<NodeRef>,
    pub fingers: Vec<FingerEntry>,
    pub next_finger: usize,
}

// One Chord peer: immutable identity plus routing state, key store and the
// HTTP client used for all outbound RPCs.
pub struct Peer {
    pub me: NodeRef,
    pub m: u32,
    pub(crate) ring: RwLock<RingState>,
    pub(crate) store: RwLock<Storage>,
    pub(crate) client: Client,
}

impl Peer {
    // A fresh peer points successor, predecessor and every finger at itself
    pub fn new(ip: &str, port: u16, m: u32) -> Self {
        let me = NodeRef::new(ip, port, m);
        let fingers = (0..m)
            .map(|i| FingerEntry {
                start: finger_start(me.id, i, m),
                node: me.clone(),
            })
            .collect();

        log::info!("node initialized with id {} at {}", me.id, me.label());

        Peer {
            me: me.clone(),
            m,
            ring: RwLock::new(RingState {
                successor: me.clone(),
                predecessor: Some(me),
                fingers,
                next_finger: 0,
            }),
            store: RwLock::new(Storage::new()),
            client: Client::default(),
        }
    }

    pub async fn successor(&self) -> NodeRef {
        self.ring.read().await.successor.clone()
    }

    pub async fn predecessor(&self) -> Option<NodeRef> {
        self.ring.read().await.predecessor.clone()
    }

    // Assigning the successor keeps finger 0 in lockstep
    pub async fn set_successor(&self, node: NodeRef) {
        let mut ring = self.ring.write().await;
        ring.fingers[0].node = node.clone();
        ring.successor = node;
    }

    pub async fn set_predecessor(&self, node: Option<NodeRef>) {
        self.ring.write().await.predecessor = node;
    }

    pub async fn finger_table(&self) -> Vec<FingerEntry> {
        self.ring.read().await.fingers.clone()
    }

    // A key belongs to us iff it falls in (predecessor, self]; with no
    // predecessor we are the only node and own everything
    pub async fn is_responsible(&self, key_id: u64) -> bool {
        match &self.ring.read().await.predecessor {
            None => true,
            Some(pred) => in_interval(key_id, pred.id, self.me.id, false, true),
        }
    }

    // Another peer claims it may be our predecessor; accept only if it
    // tightens the arc. Interleavings of concurrent notifies are safe because
    // each accepted candidate strictly shrinks (predecessor, self).
    pub async fn notify(&self, candidate: NodeRef) -> bool {
        let mut ring = self.ring.write().await;
        let accept = match &ring.predecessor {
            None => true,
            Some(pred) => in_interval(candidate.id, pred.id, self.me.id, false, false),
        };
        if accept {
            log::debug!("node {}: predecessor updated to {}", self.me.id, candidate.id);
            ring.predecessor = Some(candidate);
        }
        accept
    }

    // Snapshot for /node_info and the network_state walk
    pub async fn info(&self) -> NodeInfo {
        let ring = self.ring.read().await;
        let data_count = self.store.read().await.len();
        NodeInfo {
            node_id: self.me.id,
            ip: self.me.ip.clone(),
            port: self.me.port,
            successor: ring.successor.clone(),
            predecessor: ring.predecessor.clone(),
            finger_table: ring
                .fingers
                .iter()
                .map(|f| FingerSummary {
                    start: f.start,
                    successor_id: f.node.id,
                })
                .collect(),
            data_count,
            m: self.m,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerSummary {
    pub start: u64,
    pub successor_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: u64,
    pub ip: String,
    pub port: u16,
    pub successor: NodeRef,
    pub predecessor: Option<NodeRef>,
    pub finger_table: Vec<FingerSummary>,
    pub data_count: usize,
    pub m: u32,
}
