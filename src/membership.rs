use anyhow::{Context, Result};

use crate::config::{JOIN_TIMEOUT, ROUTING_TIMEOUT, STABILIZE_TIMEOUT};
use crate::keyspace::{finger_inverse, finger_start, in_interval};
use crate::node::{NodeRef, Peer};
use crate::rpc;

// Ring membership: join, the notify/stabilize reconciliation pair, finger
// gossip on join, and graceful departure. All mutations funnel through the
// ring write lock; no lock is held across an outbound RPC.
impl Peer {
    // Join the ring through a bootstrap peer, or become a solo ring when no
    // bootstrap is given. On bootstrap failure nothing has been committed:
    // the peer stays solo and the caller reports the error.
    pub async fn join(&self, bootstrap: Option<&str>) -> Result<()> {
        let Some(bootstrap) = bootstrap else {
            log::info!("node {}: first node in the ring", self.me.id);
            self.set_predecessor(None).await;
            return Ok(());
        };

        let successor = rpc::find_successor_at(&self.client, bootstrap, self.me.id, JOIN_TIMEOUT)
            .await
            .with_context(|| format!("bootstrap {} did not resolve a successor", bootstrap))?;
        log::info!(
            "node {}: joining via {}, successor is node {}",
            self.me.id,
            bootstrap,
            successor.id
        );
        self.set_successor(successor.clone()).await;

        // The successor's predecessor at this moment bounds the arc we take
        // over; fetch it before notify can move the pointer to us
        let old_pred = match rpc::predecessor_of(&self.client, &successor, JOIN_TIMEOUT).await {
            Ok(pred) => pred,
            Err(e) => {
                log::warn!(
                    "node {}: could not fetch predecessor of successor {}: {:#}",
                    self.me.id,
                    successor.id,
                    e
                );
                None
            }
        };

        self.init_finger_table(bootstrap).await;

        if let Err(e) = rpc::notify(&self.client, &successor, &self.me, JOIN_TIMEOUT).await {
            log::warn!(
                "node {}: failed to notify successor {}: {:#}",
                self.me.id,
                successor.id,
                e
            );
        }

        if successor.id != self.me.id {
            self.pull_keys_from_successor(&successor, old_pred.map(|p| p.id))
                .await;
        }

        Ok(())
    }

    // Claim our arc of keys from the successor. The lower bound is the
    // successor's old predecessor when known, so the transferred arc is
    // exactly (old_pred, us] even if the successor already saw our notify.
    async fn pull_keys_from_successor(&self, successor: &NodeRef, lower_bound: Option<u64>) {
        match rpc::request_transfer(
            &self.client,
            successor,
            self.me.id,
            lower_bound,
            JOIN_TIMEOUT,
        )
        .await
        {
            Ok(keys) => {
                if !keys.is_empty() {
                    log::info!(
                        "node {}: received {} keys from successor {}",
                        self.me.id,
                        keys.len(),
                        successor.id
                    );
                    self.store.write().await.merge(keys);
                }
            }
            Err(e) => {
                log::warn!(
                    "node {}: key transfer from successor {} failed: {:#}",
                    self.me.id,
                    successor.id,
                    e
                );
            }
        }
    }

    // Eager finger construction at join time. Consecutive fingers whose
    // start already lies inside the previous entry's arc are copied without
    // a round trip; the rest are resolved through the bootstrap. Entries
    // that fail to resolve keep pointing at ourselves and are repaired by
    // fix_fingers.
    async fn init_finger_table(&self, bootstrap: &str) {
        let successor = self.successor().await;

        match rpc::predecessor_of(&self.client, &successor, JOIN_TIMEOUT).await {
            Ok(Some(pred)) => self.set_predecessor(Some(pred)).await,
            Ok(None) => {}
            Err(e) => {
                log::warn!(
                    "node {}: could not initialize predecessor from successor {}: {:#}",
                    self.me.id,
                    successor.id,
                    e
                );
            }
        }

        for i in 1..self.m as usize {
            let start = finger_start(self.me.id, i as u32, self.m);
            let prev = self.ring.read().await.fingers[i - 1].node.clone();

            if in_interval(start, self.me.id, prev.id, true, false) {
                // The previous finger already covers this start
                self.ring.write().await.fingers[i].node = prev;
            } else {
                match rpc::find_successor_at(&self.client, bootstrap, start, JOIN_TIMEOUT).await {
                    Ok(s) => self.ring.write().await.fingers[i].node = s,
                    Err(e) => {
                        log::warn!(
                            "node {}: could not resolve finger {} (start {}): {:#}",
                            self.me.id,
                            i,
                            start,
                            e
                        );
                    }
                }
            }
        }

        self.update_others().await;
    }

    // Tell every peer whose finger table should now contain us. The i-th
    // finger of the predecessor of (self - 2^i) may be us.
    pub async fn update_others(&self) {
        for i in 0..self.m {
            let target = finger_inverse(self.me.id, i, self.m);
            let p = self.find_predecessor(target).await;
            if p.id == self.me.id {
                continue;
            }
            match rpc::update_finger_table(&self.client, &p, i as usize, &self.me, JOIN_TIMEOUT)
                .await
            {
                Ok(true) => {
                    log::debug!(
                        "node {}: node {} adopted us as finger {}",
                        self.me.id,
                        p.id,
                        i
                    );
                }
                Ok(false) => {}
                Err(e) => {
                    log::warn!(
                        "node {}: finger update on node {} failed: {:#}",
                        self.me.id,
                        p.id,
                        e
                    );
                }
            }
        }
    }

    // Gossip handler: adopt s as finger i if it tightens the entry, then
    // pass the update counter-clockwise. The propagation stops where the
    // interval test fails, or at s itself.
    pub async fn update_finger_table(&self, s: NodeRef, i: usize) -> bool {
        if i >= self.m as usize || s.id == self.me.id {
            return false;
        }

        let (should_update, predecessor) = {
            let ring = self.ring.read().await;
            let current = &ring.fingers[i].node;
            let update = current.id == self.me.id
                || in_interval(s.id, self.me.id, current.id, true, false);
            (update, ring.predecessor.clone())
        };
        if !should_update {
            return false;
        }

        {
            let mut ring = self.ring.write().await;
            ring.fingers[i].node = s.clone();
            // Finger 0 mirrors the successor pointer
            if i == 0 {
                ring.successor = s.clone();
            }
        }
        log::debug!("node {}: finger {} set to node {}", self.me.id, i, s.id);

        if let Some(pred) = predecessor {
            if pred.id != s.id && pred.id != self.me.id {
                if let Err(e) =
                    rpc::update_finger_table(&self.client, &pred, i, &s, JOIN_TIMEOUT).await
                {
                    log::warn!(
                        "node {}: could not propagate finger {} to predecessor {}: {:#}",
                        self.me.id,
                        i,
                        pred.id,
                        e
                    );
                }
            }
        }

        true
    }

    // Periodic reconciliation with the successor: adopt its predecessor as
    // our successor when that peer sits between us, then remind the
    // successor of our existence. An unreachable successor is kept and
    // retried on the next tick.
    pub async fn stabilize(&self) {
        let successor = self.successor().await;

        match rpc::predecessor_of(&self.client, &successor, STABILIZE_TIMEOUT).await {
            Ok(Some(x)) => {
                if in_interval(x.id, self.me.id, successor.id, false, false) {
                    log::debug!(
                        "node {}: stabilize adopts node {} as successor",
                        self.me.id,
                        x.id
                    );
                    self.set_successor(x).await;
                }
            }
            Ok(None) => {}
            Err(e) => {
                log::warn!(
                    "node {}: could not contact successor {}, keeping current: {:#}",
                    self.me.id,
                    successor.id,
                    e
                );
                return;
            }
        }

        let successor = self.successor().await;
        if let Err(e) = rpc::notify(&self.client, &successor, &self.me, STABILIZE_TIMEOUT).await {
            log::warn!(
                "node {}: failed to notify successor {}: {:#}",
                self.me.id,
                successor.id,
                e
            );
        }
    }

    // Periodic single-entry finger repair driven by a rotating cursor
    pub async fn fix_fingers(&self) {
        let (i, start) = {
            let mut ring = self.ring.write().await;
            let i = (ring.next_finger + 1) % self.m as usize;
            ring.next_finger = i;
            let start = finger_start(self.me.id, i as u32, self.m);
            ring.fingers[i].start = start;
            (i, start)
        };

        let node = self.find_successor(start).await;

        let mut ring = self.ring.write().await;
        if i == 0 {
            ring.successor = node.clone();
        }
        ring.fingers[i].node = node;
    }

    // Graceful departure: hand our keys to the successor and splice our
    // neighbours together. Each step is best effort; local state is reset
    // no matter what, and any remaining healing falls to the neighbours'
    // stabilize loops.
    pub async fn depart(&self) {
        log::info!("node {}: leaving the network", self.me.id);

        let (successor, predecessor) = {
            let ring = self.ring.read().await;
            (ring.successor.clone(), ring.predecessor.clone())
        };

        if successor.id != self.me.id {
            let data = self.store.read().await.snapshot();
            if !data.is_empty() {
                log::info!(
                    "node {}: transferring {} keys to successor {}",
                    self.me.id,
                    data.len(),
                    successor.id
                );
                if let Err(e) =
                    rpc::send_keys(&self.client, &successor, data, ROUTING_TIMEOUT).await
                {
                    log::warn!(
                        "node {}: key hand-off to successor {} failed: {:#}",
                        self.me.id,
                        successor.id,
                        e
                    );
                }
            }
        }

        if let Some(pred) = &predecessor {
            if pred.id != self.me.id {
                if let Err(e) =
                    rpc::set_successor_of(&self.client, pred, &successor, ROUTING_TIMEOUT).await
                {
                    log::warn!(
                        "node {}: could not update successor pointer of predecessor {}: {:#}",
                        self.me.id,
                        pred.id,
                        e
                    );
                }
            }
        }

        if successor.id != self.me.id {
            if let Err(e) = rpc::set_predecessor_of(
                &self.client,
                &successor,
                predecessor.clone(),
                ROUTING_TIMEOUT,
            )
            .await
            {
                log::warn!(
                    "node {}: could not update predecessor pointer of successor {}: {:#}",
                    self.me.id,
                    successor.id,
                    e
                );
            }
        }

        // Reset to a fresh solo state regardless of RPC outcomes
        {
            let mut ring = self.ring.write().await;
            ring.successor = self.me.clone();
            ring.predecessor = None;
            for finger in ring.fingers.iter_mut() {
                finger.node = self.me.clone();
            }
            ring.next_finger = 0;
        }
        self.store.write().await.clear();
    }
}
