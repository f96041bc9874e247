// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounded producer/consumer queue with an oldest-drop policy, replacing
//! the teaching example's blocking `mpsc::sync_channel` (producer blocks
//! when full). The USB completion path must never block on a slow TCP
//! client, so `push` here drops the front element instead.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct Inner {
    items: VecDeque<Vec<u8>>,
    dropped: u64,
}

/// Single linked FIFO guarded by one mutex + condition variable, shared
/// between the USB completion thread (producer) and the TCP sender
/// thread (consumer). The producer never blocks: at capacity it drops
/// the oldest buffered item before appending the new one.
#[derive(Debug)]
pub struct SampleQueue {
    capacity: usize,
    state: Mutex<Inner>,
    cv: Condvar,
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        SampleQueue {
            capacity: capacity.max(1),
            state: Mutex::new(Inner {
                items: VecDeque::new(),
                dropped: 0,
            }),
            cv: Condvar::new(),
        }
    }

    /// Never blocks. Returns the number of items dropped to make room
    /// for this one (0 or 1).
    pub fn push(&self, item: Vec<u8>) -> u64 {
        let mut inner = self.state.lock().unwrap();
        let mut dropped_now = 0;
        if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
            dropped_now = 1;
        }
        inner.items.push_back(item);
        drop(inner);
        self.cv.notify_one();
        dropped_now
    }

    /// Waits up to `timeout` for an item. `None` means the wait timed
    /// out with the queue still empty — the caller (spec §4.6) treats
    /// this as grounds to terminate the session.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut inner = self.state.lock().unwrap();
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            let (guard, result) = self.cv.wait_timeout(inner, timeout).unwrap();
            inner = guard;
            if result.timed_out() && inner.items.is_empty() {
                return None;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_count(&self) -> u64 {
        self.state.lock().unwrap().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oldest_drop_keeps_the_newest_items_in_order() {
        let queue = SampleQueue::new(3);
        for label in 1..=5u8 {
            queue.push(vec![label]);
        }
        assert_eq!(queue.dropped_count(), 2);
        let mut received = Vec::new();
        while let Some(item) = queue.pop_timeout(Duration::from_millis(10)) {
            received.push(item[0]);
        }
        assert_eq!(received, vec![3, 4, 5]);
    }

    #[test]
    fn pop_timeout_returns_none_on_empty_queue() {
        let queue = SampleQueue::new(4);
        assert!(queue.pop_timeout(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn never_exceeds_its_bound() {
        let queue = SampleQueue::new(2);
        for label in 0..10u8 {
            queue.push(vec![label]);
            assert!(queue.len() <= 2);
        }
    }
}
