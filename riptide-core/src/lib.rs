#![allow(dead_code)]

//! riptide-core: a concurrent, lock-free priority queue.
//!
//! (key, value) pairs go in from any number of threads; [`PriorityQueue::pop`]
//! hands them back in decreasing key order, optionally gated by a priority
//! threshold. No operation takes a lock; contention is resolved by CAS
//! retries and cooperative helping, and dead nodes are recycled through a
//! reference-counted free list rather than returned to the allocator.

mod internal;

pub mod key;
pub mod queue;

pub use key::SentinelKey;
pub use queue::PriorityQueue;
