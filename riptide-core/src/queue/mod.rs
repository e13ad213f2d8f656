//! The lock-free priority queue.
//!
//! # Organization
//!
//! - [`priority_queue`] - the queue itself: sorted list walk, insert/pop,
//!   cooperative help-delete, reference-counted reclamation
//! - [`node`] - node layout, counter encoding, free list (pub(crate))
//!
//! # Usage
//!
//! ```
//! use riptide_core::PriorityQueue;
//!
//! let queue: PriorityQueue<&str, u32> = PriorityQueue::new();
//! queue.insert("low", 1);
//! queue.insert("high", 9);
//! assert_eq!(queue.pop(), Some("high"));
//! ```

pub(crate) mod node;
pub mod priority_queue;

pub use priority_queue::PriorityQueue;
