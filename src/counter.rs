// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Active Object Counter
//!
//! Rendezvous primitive a listener container shares with its consumers. Each
//! consumer registers itself when it starts and is released once the broker
//! confirms its cancellation, so the container can wait until every consumer
//! has fully stopped before declaring its own shutdown complete.

use parking_lot::{Condvar, Mutex};
use std::{
    collections::HashSet,
    hash::Hash,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

/// Tracks the set of active instances identified by `K`.
///
/// Instances are kept in a set, so releasing an instance twice or releasing
/// one that was never added leaves the count untouched.
#[derive(Debug)]
pub struct ActiveObjectCounter<K> {
    objects: Mutex<HashSet<K>>,
    released: Condvar,
    active: AtomicBool,
}

impl<K> ActiveObjectCounter<K>
where
    K: Eq + Hash,
{
    pub fn new() -> ActiveObjectCounter<K> {
        ActiveObjectCounter {
            objects: Mutex::new(HashSet::new()),
            released: Condvar::new(),
            active: AtomicBool::new(true),
        }
    }

    /// Registers one active instance.
    pub fn add(&self, object: K) {
        self.objects.lock().insert(object);
    }

    /// Deregisters an instance, waking waiters when none remain.
    ///
    /// # Returns
    /// `true` only when the instance was registered
    pub fn release(&self, object: &K) -> bool {
        let mut objects = self.objects.lock();
        let removed = objects.remove(object);
        if objects.is_empty() {
            self.released.notify_all();
        }
        removed
    }

    /// Blocks until every registered instance has been released or `timeout`
    /// elapses.
    ///
    /// # Returns
    /// `true` if the count reached zero within the timeout
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut objects = self.objects.lock();

        while !objects.is_empty() {
            if self.released.wait_until(&mut objects, deadline).timed_out() {
                return objects.is_empty();
            }
        }

        true
    }

    pub fn count(&self) -> usize {
        self.objects.lock().len()
    }

    /// Whether the owning container is still running.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Marks the owning container as shutting down.
    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl<K> Default for ActiveObjectCounter<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn double_release_does_not_corrupt_count() {
        let counter = ActiveObjectCounter::new();
        counter.add(1);
        counter.add(2);

        assert!(counter.release(&1));
        assert!(!counter.release(&1));
        assert!(!counter.release(&3));
        assert_eq!(counter.count(), 1);
    }

    #[test]
    fn wait_times_out_while_objects_remain() {
        let counter = ActiveObjectCounter::new();
        counter.add("consumer");

        let started = Instant::now();
        assert!(!counter.wait(Duration::from_millis(50)));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn wait_returns_immediately_when_empty() {
        let counter = ActiveObjectCounter::<u32>::default();
        assert!(counter.wait(Duration::from_secs(5)));
    }

    #[test]
    fn waiter_unblocks_only_after_last_release() {
        let counter = Arc::new(ActiveObjectCounter::new());
        counter.add(1);
        counter.add(2);

        let waiter = {
            let counter = counter.clone();
            thread::spawn(move || counter.wait(Duration::from_secs(10)))
        };

        counter.release(&1);
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        counter.release(&2);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn concurrent_add_and_release_lose_no_updates() {
        let counter = Arc::new(ActiveObjectCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|worker| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        counter.add(worker * 1000 + i);
                    }
                    for i in 0..50 {
                        counter.release(&(worker * 1000 + i));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.count(), 8 * 50);
    }

    #[test]
    fn deactivate_flips_active_flag() {
        let counter = ActiveObjectCounter::<u8>::new();
        assert!(counter.is_active());
        counter.deactivate();
        assert!(!counter.is_active());
    }
}
