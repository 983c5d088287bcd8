//! FIFO queue of requests waiting for a connection.
//!
//! The queue itself is not synchronised: the pool keeps it inside its core
//! state and only touches it under the core lock. Each waiter owns the
//! sending half of a one-shot channel; the requesting task awaits the
//! receiving half.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::PoolError;

/// What a waiter eventually receives.
pub type WaitResult<T> = Result<T, PoolError>;

/// `now + timeout`, saturating far in the future for huge timeouts.
pub(crate) fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now.checked_add(timeout)
        .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365 * 30))
}

/// A queued request.
#[derive(Debug)]
struct Waiter<T> {
    id: u64,
    arrived_at: Instant,
    deadline: Instant,
    timeout: Duration,
    tx: oneshot::Sender<WaitResult<T>>,
}

/// A successful hand-over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Served {
    /// Id of the waiter that received the item.
    pub waiter_id: u64,
    /// How long it waited.
    pub waited: Duration,
}

/// FIFO queue of waiters.
#[derive(Debug)]
pub struct WaitingQueue<T> {
    waiters: VecDeque<Waiter<T>>,
    next_id: u64,
}

impl<T> Default for WaitingQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WaitingQueue<T> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            waiters: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Number of queued waiters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Whether nobody is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }

    /// Whether waiter `id` is still queued.
    #[must_use]
    pub fn contains(&self, id: u64) -> bool {
        self.waiters.iter().any(|w| w.id == id)
    }

    /// Append a waiter expiring `timeout` after `now`.
    pub fn enqueue(
        &mut self,
        now: Instant,
        timeout: Duration,
    ) -> (u64, oneshot::Receiver<WaitResult<T>>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_id;
        self.next_id += 1;
        self.waiters.push_back(Waiter {
            id,
            arrived_at: now,
            deadline: deadline_after(now, timeout),
            timeout,
            tx,
        });
        (id, rx)
    }

    /// Hand the item in `slot` to the oldest live waiter.
    ///
    /// Waiters past their deadline met on the way are failed with
    /// [`PoolError::Timeout`]; waiters whose receiver is gone are dropped.
    /// The item is taken out of `slot` only if a waiter accepted it.
    pub fn fulfill(&mut self, slot: &mut Option<T>, now: Instant) -> Option<Served> {
        while let Some(waiter) = self.waiters.pop_front() {
            if now >= waiter.deadline {
                let _ = waiter.tx.send(Err(PoolError::Timeout {
                    timeout: waiter.timeout,
                }));
                continue;
            }
            let Some(item) = slot.take() else {
                self.waiters.push_front(waiter);
                return None;
            };
            match waiter.tx.send(Ok(item)) {
                Ok(()) => {
                    return Some(Served {
                        waiter_id: waiter.id,
                        waited: now.saturating_duration_since(waiter.arrived_at),
                    });
                }
                Err(returned) => *slot = returned.ok(),
            }
        }
        None
    }

    /// Resolve waiter `id` with `err`. Returns `false` if it was not queued.
    pub fn fail(&mut self, id: u64, err: PoolError) -> bool {
        match self.take(id) {
            Some(waiter) => {
                let _ = waiter.tx.send(Err(err));
                true
            }
            None => false,
        }
    }

    /// Remove waiter `id` without resolving it. The order of the others is
    /// preserved.
    pub fn remove(&mut self, id: u64) -> bool {
        self.take(id).is_some()
    }

    fn take(&mut self, id: u64) -> Option<Waiter<T>> {
        let pos = self.waiters.iter().position(|w| w.id == id)?;
        self.waiters.remove(pos)
    }

    /// Fail every waiter past its deadline and forget the abandoned ones.
    /// Returns how many were removed.
    pub fn expire_now(&mut self, now: Instant) -> usize {
        let before = self.waiters.len();
        let mut expired = Vec::new();
        let mut kept = VecDeque::with_capacity(before);
        for waiter in self.waiters.drain(..) {
            if now >= waiter.deadline || waiter.tx.is_closed() {
                expired.push(waiter);
            } else {
                kept.push_back(waiter);
            }
        }
        self.waiters = kept;
        for waiter in expired {
            let _ = waiter.tx.send(Err(PoolError::Timeout {
                timeout: waiter.timeout,
            }));
        }
        before - self.waiters.len()
    }

    /// Fail every waiter with the error built by `err`.
    pub fn drain_with(&mut self, mut err: impl FnMut() -> PoolError) -> usize {
        let n = self.waiters.len();
        for waiter in self.waiters.drain(..) {
            let _ = waiter.tx.send(Err(err()));
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(1);

    #[tokio::test(start_paused = true)]
    async fn test_fifo_order() {
        let mut queue = WaitingQueue::new();
        let now = Instant::now();
        let (id1, mut rx1) = queue.enqueue(now, TIMEOUT);
        let (id2, mut rx2) = queue.enqueue(now, TIMEOUT);

        let served = queue.fulfill(&mut Some("a"), now).unwrap();
        assert_eq!(served.waiter_id, id1);
        let mut slot = Some("b");
        let served = queue.fulfill(&mut slot, now).unwrap();
        assert_eq!(served.waiter_id, id2);
        assert_eq!(slot, None);

        assert_eq!(rx1.try_recv().unwrap().unwrap(), "a");
        assert_eq!(rx2.try_recv().unwrap().unwrap(), "b");

        let mut slot = Some("c");
        assert_eq!(queue.fulfill(&mut slot, now), None);
        assert_eq!(slot, Some("c"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_keeps_order() {
        let mut queue = WaitingQueue::new();
        let now = Instant::now();
        let (id1, _rx1) = queue.enqueue(now, TIMEOUT);
        let (id2, _rx2) = queue.enqueue(now, TIMEOUT);
        let (id3, _rx3) = queue.enqueue(now, TIMEOUT);

        assert!(queue.remove(id2));
        assert!(!queue.remove(id2));
        assert!(!queue.contains(id2));

        assert_eq!(queue.fulfill(&mut Some(1), now).unwrap().waiter_id, id1);
        assert_eq!(queue.fulfill(&mut Some(2), now).unwrap().waiter_id, id3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fulfill_skips_dropped_and_expired() {
        let mut queue = WaitingQueue::new();
        let now = Instant::now();
        let (_, mut expired_rx) = queue.enqueue(now, Duration::from_millis(10));
        let (_, dropped_rx) = queue.enqueue(now, TIMEOUT);
        let (id3, _rx3) = queue.enqueue(now, TIMEOUT);
        drop(dropped_rx);

        let later = now + Duration::from_millis(20);
        let mut slot = Some("conn");
        let served = queue.fulfill(&mut slot, later).unwrap();
        assert_eq!(slot, None);
        assert_eq!(served.waiter_id, id3);
        assert_eq!(served.waited, Duration::from_millis(20));
        assert!(matches!(
            expired_rx.try_recv().unwrap(),
            Err(PoolError::Timeout { .. })
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_kept_when_every_receiver_is_gone() {
        let mut queue = WaitingQueue::new();
        let now = Instant::now();
        let (_, first) = queue.enqueue(now, TIMEOUT);
        let (_, second) = queue.enqueue(now, TIMEOUT);
        drop(first);
        drop(second);

        let mut slot = Some("conn");
        assert_eq!(queue.fulfill(&mut slot, now), None);
        assert_eq!(slot, Some("conn"));
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_now() {
        let mut queue: WaitingQueue<()> = WaitingQueue::new();
        let now = Instant::now();
        let (_, mut short_rx) = queue.enqueue(now, Duration::from_millis(100));
        let (long_id, _long_rx) = queue.enqueue(now, TIMEOUT);

        assert_eq!(queue.expire_now(now + Duration::from_millis(150)), 1);
        assert!(queue.contains(long_id));
        assert!(matches!(
            short_rx.try_recv().unwrap(),
            Err(PoolError::Timeout { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_and_drain() {
        let mut queue: WaitingQueue<()> = WaitingQueue::new();
        let now = Instant::now();
        let (id1, mut rx1) = queue.enqueue(now, TIMEOUT);
        let (_, mut rx2) = queue.enqueue(now, TIMEOUT);

        assert!(queue.fail(id1, PoolError::WrongPool));
        assert!(matches!(rx1.try_recv().unwrap(), Err(PoolError::WrongPool)));

        assert_eq!(queue.drain_with(|| PoolError::PoolClosed), 1);
        assert!(matches!(rx2.try_recv().unwrap(), Err(PoolError::PoolClosed)));
        assert!(queue.is_empty());
    }
}
