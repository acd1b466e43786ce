//! §4.8 Lock Manager — shared/exclusive locks on rows and tables, FIFO
//! per-resource queues, periodic wait-for-graph deadlock detection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::common::{Rid, TxnId};
use crate::error::{EngineError, Result};

use super::wait_for_graph::WaitForGraph;

/// Backstop for a waiter whose cycle the periodic detector hasn't yet
/// scanned: nothing should block on a lock forever even if the detector
/// task is slow or not running (e.g. a single-threaded embedding of the
/// engine with no background tasks spawned).
const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn compatible(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Row(Rid),
    Table(u32),
}

struct Waiter {
    txn_id: TxnId,
    mode: LockMode,
    aborted: bool,
}

struct Queue {
    holders: Vec<(TxnId, LockMode)>,
    waiters: VecDeque<Waiter>,
}

impl Queue {
    fn new() -> Self {
        Self {
            holders: Vec::new(),
            waiters: VecDeque::new(),
        }
    }

    fn compatible_with_holders(&self, txn_id: TxnId, mode: LockMode) -> bool {
        self.holders
            .iter()
            .all(|&(holder, held_mode)| holder == txn_id || mode.compatible(held_mode))
    }
}

struct ResourceSlot {
    queue: Mutex<Queue>,
    cv: Condvar,
}

/// Owns one lock table shared by every connection. Two-phase locking is
/// enforced by callers (via `Transaction::state`), not by this type:
/// the manager only grants and releases on request.
pub struct LockManager {
    resources: Mutex<HashMap<Resource, Arc<ResourceSlot>>>,
    wait_for: Mutex<WaitForGraph>,
    pub wait_timeout: Option<Duration>,
}

impl LockManager {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            wait_for: Mutex::new(WaitForGraph::new()),
            wait_timeout: Some(DEFAULT_WAIT_TIMEOUT),
        }
    }

    fn slot_for(&self, resource: Resource) -> Arc<ResourceSlot> {
        let mut resources = self.resources.lock().unwrap();
        resources
            .entry(resource)
            .or_insert_with(|| {
                Arc::new(ResourceSlot {
                    queue: Mutex::new(Queue::new()),
                    cv: Condvar::new(),
                })
            })
            .clone()
    }

    pub fn acquire(&self, txn_id: TxnId, resource: Resource, mode: LockMode) -> Result<()> {
        let slot = self.slot_for(resource);
        let mut queue = slot.queue.lock().unwrap();

        if let Some(&(_, held)) = queue.holders.iter().find(|&&(h, _)| h == txn_id) {
            if held == mode || held == LockMode::Exclusive {
                return Ok(());
            }
        }

        let can_grant_now =
            queue.waiters.is_empty() && queue.compatible_with_holders(txn_id, mode);
        if can_grant_now {
            queue.holders.push((txn_id, mode));
            return Ok(());
        }

        queue.waiters.push_back(Waiter {
            txn_id,
            mode,
            aborted: false,
        });
        for &(holder, _) in &queue.holders {
            if holder != txn_id {
                self.wait_for.lock().unwrap().add_edge(txn_id, holder);
            }
        }

        let deadline = self.wait_timeout.map(|d| Instant::now() + d);
        loop {
            let Some(pos) = queue.waiters.iter().position(|w| w.txn_id == txn_id) else {
                // `try_grant` already popped us into `holders`.
                self.wait_for.lock().unwrap().remove_transaction(txn_id);
                return Ok(());
            };
            if queue.waiters[pos].aborted {
                queue.waiters.remove(pos);
                self.wait_for.lock().unwrap().remove_transaction(txn_id);
                return Err(EngineError::ConcurrencyAbort(format!(
                    "txn {txn_id} selected as deadlock victim"
                )));
            }
            queue = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        queue.waiters.remove(pos);
                        self.wait_for.lock().unwrap().remove_transaction(txn_id);
                        return Err(EngineError::ConcurrencyAbort(format!(
                            "txn {txn_id} timed out waiting for lock"
                        )));
                    }
                    slot.cv.wait_timeout(queue, deadline - now).unwrap().0
                }
                None => slot.cv.wait(queue).unwrap(),
            };
        }
    }

    pub fn release_all(&self, txn_id: TxnId, resources: &[Resource]) {
        for &resource in resources {
            let slot = self.slot_for(resource);
            let mut queue = slot.queue.lock().unwrap();
            queue.holders.retain(|&(h, _)| h != txn_id);
            try_grant(&mut queue);
            slot.cv.notify_all();
        }
    }

    /// One pass of the periodic deadlock scan: finds a cycle, if any,
    /// and aborts its youngest member (highest txn id), per the policy
    /// named in the concurrency design.
    pub fn detect_and_resolve(&self) -> Option<TxnId> {
        let cycle = self.wait_for.lock().unwrap().find_cycle()?;
        let victim = *cycle.iter().max()?;
        self.mark_aborted(victim);
        Some(victim)
    }

    fn mark_aborted(&self, txn_id: TxnId) {
        let resources: Vec<Resource> = self.resources.lock().unwrap().keys().copied().collect();
        for resource in resources {
            let slot = self.slot_for(resource);
            let mut queue = slot.queue.lock().unwrap();
            let mut touched = false;
            for waiter in queue.waiters.iter_mut() {
                if waiter.txn_id == txn_id {
                    waiter.aborted = true;
                    touched = true;
                }
            }
            if touched {
                slot.cv.notify_all();
            }
        }
        self.wait_for.lock().unwrap().remove_transaction(txn_id);
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

fn try_grant(queue: &mut Queue) {
    while let Some(front) = queue.waiters.front() {
        if queue.compatible_with_holders(front.txn_id, front.mode) {
            let w = queue.waiters.pop_front().unwrap();
            queue.holders.push((w.txn_id, w.mode));
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_locks_are_compatible() {
        let lm = LockManager::new();
        let r = Resource::Row(Rid::new(1, 0));
        lm.acquire(1, r, LockMode::Shared).unwrap();
        lm.acquire(2, r, LockMode::Shared).unwrap();
    }

    #[test]
    fn exclusive_excludes_shared() {
        let lm = LockManager::new();
        let r = Resource::Table(1);
        lm.acquire(1, r, LockMode::Exclusive).unwrap();
        lm.release_all(1, &[r]);
        lm.acquire(2, r, LockMode::Shared).unwrap();
    }

    #[test]
    fn detects_and_resolves_a_deadlock() {
        let lm = Arc::new(LockManager::new());
        let a = Resource::Row(Rid::new(1, 0));
        let b = Resource::Row(Rid::new(2, 0));
        lm.acquire(1, a, LockMode::Exclusive).unwrap();
        lm.acquire(2, b, LockMode::Exclusive).unwrap();

        let lm2 = lm.clone();
        let t1 = std::thread::spawn(move || lm2.acquire(1, b, LockMode::Exclusive));
        std::thread::sleep(Duration::from_millis(20));
        let lm3 = lm.clone();
        let t2 = std::thread::spawn(move || lm3.acquire(2, a, LockMode::Exclusive));
        std::thread::sleep(Duration::from_millis(20));

        let victim = lm.detect_and_resolve();
        assert!(victim.is_some());

        let _ = t1.join();
        let _ = t2.join();
    }
}
