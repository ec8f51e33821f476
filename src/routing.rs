use crate::config::{JOIN_TIMEOUT, MAX_WALK_HOPS, ROUTING_TIMEOUT};
use crate::keyspace::in_interval;
use crate::node::{NodeRef, Peer};
use crate::rpc;

// Routing is read-only with respect to ring state: these operations take
// snapshots of the pointers they need and may run concurrently with each
// other and with the maintenance task.
impl Peer {
    // Scan the finger table from the top down and return the first entry
    // strictly between us and the key; fall back to ourselves when no finger
    // precedes the key.
    pub async fn closest_preceding_finger(&self, key_id: u64) -> NodeRef {
        let ring = self.ring.read().await;
        for finger in ring.fingers.iter().rev() {
            if in_interval(finger.node.id, self.me.id, key_id, false, false) {
                return finger.node.clone();
            }
        }
        self.me.clone()
    }

    // Resolve the peer owning key_id. One local interval test answers it for
    // our own successor arc; otherwise the query is forwarded as a chained
    // RPC through the closest preceding finger. Any transport failure falls
    // back to our successor.
    pub async fn find_successor(&self, key_id: u64) -> NodeRef {
        let successor = self.successor().await;
        if in_interval(key_id, self.me.id, successor.id, false, true) {
            return successor;
        }

        let hop = self.closest_preceding_finger(key_id).await;
        // A finger table still pointing at ourselves means the ring has
        // fewer peers than fingers; the successor is the best answer
        if hop.id == self.me.id {
            return successor;
        }

        match rpc::find_successor(&self.client, &hop, key_id, ROUTING_TIMEOUT).await {
            // A hop strictly preceding the key can never own it; answering
            // with itself means the peer has detached from the ring (for
            // instance after departing). Fall back so fix_fingers can evict it.
            Ok(found) if found.id == hop.id => {
                log::warn!(
                    "node {}: node {} answered find_successor({}) with itself, treating as detached",
                    self.me.id,
                    hop.id,
                    key_id
                );
                successor
            }
            Ok(found) => found,
            Err(e) => {
                log::warn!(
                    "node {}: find_successor({}) via node {} failed: {:#}",
                    self.me.id,
                    key_id,
                    hop.id,
                    e
                );
                successor
            }
        }
    }

    // Iterative walk towards the peer immediately preceding key_id. Each
    // round asks the current candidate for its closest preceding finger and
    // refreshes the candidate's successor; the walk ends when key_id falls
    // in (candidate, candidate.successor]. Transport failures end the walk
    // with the best candidate so far.
    pub async fn find_predecessor(&self, key_id: u64) -> NodeRef {
        let successor = self.successor().await;
        if successor.id == self.me.id {
            return self.me.clone();
        }
        if in_interval(key_id, self.me.id, successor.id, false, true) {
            return self.me.clone();
        }

        let mut candidate = self.me.clone();
        let mut candidate_succ = successor;
        let mut hops = 0u32;

        while !in_interval(key_id, candidate.id, candidate_succ.id, false, true) {
            if hops >= MAX_WALK_HOPS {
                log::warn!(
                    "node {}: predecessor walk for {} exceeded {} hops, stopping at node {}",
                    self.me.id,
                    key_id,
                    MAX_WALK_HOPS,
                    candidate.id
                );
                break;
            }
            hops += 1;

            if candidate.id == self.me.id {
                candidate = self.closest_preceding_finger(key_id).await;
                if candidate.id == self.me.id {
                    return self.me.clone();
                }
            } else {
                match rpc::closest_preceding_finger(&self.client, &candidate, key_id, JOIN_TIMEOUT)
                    .await
                {
                    Ok(next) => candidate = next,
                    Err(e) => {
                        log::warn!(
                            "node {}: predecessor walk could not query node {}: {:#}",
                            self.me.id,
                            candidate.id,
                            e
                        );
                        return self.me.clone();
                    }
                }
            }

            match rpc::successor_of(&self.client, &candidate, JOIN_TIMEOUT).await {
                Ok(s) => candidate_succ = s,
                Err(e) => {
                    log::warn!(
                        "node {}: predecessor walk could not fetch successor of node {}: {:#}",
                        self.me.id,
                        candidate.id,
                        e
                    );
                    return candidate;
                }
            }
        }

        candidate
    }
}
