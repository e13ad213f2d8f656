use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::internal::MarkedPtr;
use crate::key::SentinelKey;
use crate::queue::node::{FreeList, Node, NodePtr, Payload};

///
/// Concurrent priority queue based on a lock-free sorted single list, after
/// Sundell and Tsigas, with Valois-style per-node reference counting for
/// memory reclamation (using the Michael-Scott claim-bit correction).
///
// List structure (sorted by descending key):
//
// ┌──────┐    ┌──────┐    ┌──────┐    ┌──────┐    ┌──────┐
// │ HEAD │───►│  30  │───►│  20  │───►│  10  │───►│ TAIL │
// │(+max)│    │      │    │      │    │      │    │(-min)│
// └──────┘    └──────┘    └──────┘    └──────┘    └──────┘
//
// Both sentinels live as long as the queue. Two tag bits drive removal:
//
//   value mark: pop CASes the low bit onto a node's value pointer to claim
//               the payload. This is pop's linearization point. The node
//               stays traversable; it is a husk awaiting physical removal.
//   link mark:  help_delete CASes the low bit onto the husk's next pointer.
//               A marked link means the holding node is logically deleted,
//               and no insert can attach behind it (the link CAS expects an
//               unmarked pointer).
//
// Any thread that trips over a marked node finishes the unlink: find the
// predecessor edge, CAS it over to the successor, leave a marked-null
// terminal tag in the dead node's next.
//
// REFERENCE PROTOCOL:
// ===================
// Every pointer a thread dereferences is held under a reference it took
// with safe_read and returns with release. Each list edge (a next field, or
// the head slot) also owns one reference to its target. Unlinking a node
// transfers its outgoing reference to the new predecessor edge, which is
// why the terminal tag must be in place before the dead node's count can
// reach zero. Nodes whose count reaches zero are claimed and recycled onto
// the free list; they are only handed back to the allocator when the queue
// drops. That type-stability is load-bearing: a stale safe_read may bump
// the counter of a node that has already been recycled, and the bump must
// land on a live object.
//
pub struct PriorityQueue<V, K: SentinelKey> {
    head: AtomicPtr<Node<V, K>>,
    tail: NodePtr<V, K>,
    free_list: FreeList<V, K>,
    _marker: PhantomData<V>,
}

// Safety: the queue hands values across threads (V: Send) and compares keys
// concurrently by shared reference (K: Sync for the shared queue).
unsafe impl<V: Send, K: SentinelKey + Send> Send for PriorityQueue<V, K> {}
unsafe impl<V: Send, K: SentinelKey + Send + Sync> Sync for PriorityQueue<V, K> {}

impl<V, K> PriorityQueue<V, K>
where
    K: SentinelKey,
{
    /// Create an empty queue: a `max_sentinel` head linked to a
    /// `min_sentinel` tail.
    pub fn new() -> Self {
        let tail = Box::into_raw(Box::new(Node::new(K::min_sentinel(), ptr::null_mut())));
        let head = Box::new(Node::new(K::max_sentinel(), ptr::null_mut()));
        head.set_next(tail);

        PriorityQueue {
            head: AtomicPtr::new(Box::into_raw(head)),
            tail,
            free_list: FreeList::new(),
            _marker: PhantomData,
        }
    }

    /// Preallocate exactly `count` nodes onto the free list, so that the
    /// next `count` concurrent inserts need no allocator call.
    pub fn reserve(&self, count: usize) {
        for _ in 0..count {
            let node = Box::into_raw(Box::new(Node::new(K::min_sentinel(), ptr::null_mut())));
            // Dropping the birth reference sends the node straight to the
            // free list.
            self.release(node);
        }
    }

    /// Insert `value` with priority `key`.
    ///
    /// Keys drain highest-first; an entry whose key ties an existing entry
    /// lands after it. Linearizes at the successful link CAS.
    pub fn insert(&self, value: V, key: K) {
        debug_assert!(
            key >= K::min_sentinel() && key <= K::max_sentinel(),
            "key outside the span of the sentinel keys"
        );

        let payload = Box::into_raw(Box::new(Payload(value)));
        let new_node = self.get_new_node(payload, key);

        loop {
            let mut prev = self.safe_read(&self.head);
            let mut cur = self.read_next(prev);

            // Find the adjacent pair surrounding the insertion point: stop
            // at the first node whose key is strictly below ours.
            while cur != self.tail && unsafe { (*cur).key() >= (*new_node).key() } {
                self.release(prev);
                prev = cur;
                cur = self.read_next(prev);
            }

            // The new node takes over prev's counted reference to cur.
            unsafe { (*new_node).set_next(cur) };
            let linked = unsafe { (*prev).cas_next_weak(cur, new_node).is_ok() };

            self.release(prev);
            self.release(cur);
            if linked {
                return;
            }
        }
    }

    /// Pop the highest-priority entry, or `None` if the queue is empty.
    pub fn pop(&self) -> Option<V> {
        self.pop_internal(None)
    }

    /// Pop the highest-priority entry only if its key is strictly greater
    /// than `threshold`; otherwise return `None` without dequeuing.
    pub fn pop_above(&self, threshold: &K) -> Option<V> {
        self.pop_internal(Some(threshold))
    }

    fn pop_internal(&self, threshold: Option<&K>) -> Option<V> {
        loop {
            let cur = self.read_next(self.head.load(Ordering::Acquire));

            if cur == self.tail {
                self.release(cur);
                return None;
            }
            if let Some(threshold) = threshold {
                if unsafe { !((*cur).key() > threshold) } {
                    self.release(cur);
                    return None;
                }
            }

            // Claim the payload by marking the value pointer. Success here
            // is the linearization point of pop.
            let value = MarkedPtr::unmask(unsafe { (*cur).get_value() });
            debug_assert!(!value.is_null(), "live node without a payload");
            let claimed = unsafe {
                (*cur)
                    .cas_value(value, MarkedPtr::new(value).with_mark().as_raw())
                    .is_ok()
            };

            if claimed {
                self.release(cur);
                // Physical removal is deferred: the next walker that trips
                // over the husk retires it through help_delete.
                return Some(unsafe { Box::from_raw(value) }.0);
            }

            // Another popper beat us to this node; help retire it and try
            // the next candidate.
            let prev = self.help_delete(cur);
            self.release(prev);
            self.release(cur);
        }
    }

    // =========================================================================
    // Reference-counted reads
    // =========================================================================

    /// Load a node pointer from `slot` and take a counted reference on it.
    ///
    /// Returns null when the slot is null or holds a marked link; a marked
    /// link means the holding node is being unlinked, and the caller
    /// recovers through `help_delete`.
    fn safe_read(&self, slot: &AtomicPtr<Node<V, K>>) -> NodePtr<V, K> {
        loop {
            let read = slot.load(Ordering::Acquire);
            if read.is_null() || MarkedPtr::new(read).is_marked() {
                return ptr::null_mut();
            }

            unsafe { (*read).add_ref() };
            if slot.load(Ordering::Acquire) == read {
                return read;
            }
            // The slot moved under us; undo and retry.
            self.release(read);
        }
    }

    /// Drop one counted reference to `node` (null is a no-op).
    ///
    /// The thread whose release drives the count to zero claims the node,
    /// recycles it, and carries on down the detached chain iteratively;
    /// the terminal tag left by `help_delete` stops the walk at an edge
    /// that was transferred to a live predecessor.
    fn release(&self, node: NodePtr<V, K>) {
        let mut node = node;
        while !node.is_null() {
            // Non-zero remainder: live references remain, or the node is
            // already claimed and on the free list.
            if unsafe { (*node).sub_ref() } != 0 {
                return;
            }
            // A concurrent safe_read can still revive the count; only the
            // claim winner may touch the node from here on.
            if !unsafe { (*node).try_claim() } {
                return;
            }

            let next = MarkedPtr::unmask(unsafe { (*node).get_next() });
            self.free_list.push(node);
            node = next;
        }
    }

    /// Fetch a node for insertion, preferring the free list over the
    /// allocator. The returned node carries one caller-owned reference;
    /// its next pointer is stale and must be set before linking.
    fn get_new_node(&self, value: *mut Payload<V>, key: K) -> NodePtr<V, K> {
        loop {
            let node = self.safe_read(&self.free_list.head);
            if node.is_null() {
                // Empty free list: fall back to the allocator.
                return Box::into_raw(Box::new(Node::new(key, value)));
            }

            let chained = unsafe { (*node).get_next() };
            if self
                .free_list
                .head
                .compare_exchange(node, chained, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                unsafe {
                    (*node).clear_claim();
                    // Safety: detached and unpublished, we own the node.
                    (*node).set_key(key);
                    (*node).set_value(value);
                }
                return node;
            }

            // Someone else checked this one out.
            self.release(node);
        }
    }

    // =========================================================================
    // Traversal and cooperative unlink
    // =========================================================================

    /// Return a counted reference to `node`'s successor.
    ///
    /// If `node` turns out to be condemned (marked link), help finish its
    /// unlink and continue from the predecessor `help_delete` hands back.
    /// The caller's own reference to `node` is left untouched.
    fn read_next(&self, node: NodePtr<V, K>) -> NodePtr<V, K> {
        let mut current = node;
        let mut owned = false;
        loop {
            let next = self.safe_read(unsafe { (*current).next_slot() });
            if !next.is_null() {
                if owned {
                    self.release(current);
                }
                return next;
            }

            let pred = self.help_delete(current);
            if owned {
                self.release(current);
            }
            current = pred;
            owned = true;
        }
    }

    /// Make physical-unlink progress on the condemned `node` and return a
    /// counted reference to a node preceding its old position.
    fn help_delete(&self, node: NodePtr<V, K>) -> NodePtr<V, K> {
        // Install the link mark; after this no insert can attach behind
        // `node`, and traversals divert through this routine.
        loop {
            let next = unsafe { (*node).get_next() };
            if MarkedPtr::new(next).is_marked() {
                break;
            }
            let marked = MarkedPtr::new(next).with_mark().as_raw();
            if unsafe { (*node).cas_next_weak(next, marked).is_ok() } {
                break;
            }
        }

        let succ = MarkedPtr::unmask(unsafe { (*node).get_next() });
        if succ.is_null() {
            // Terminal tag: an earlier helper finished the whole job.
            return self.safe_read(&self.head);
        }

        loop {
            let mut prev = self.safe_read(&self.head);
            let mut tmp = self.read_next(prev);

            // Walk to the edge pointing at `node`, or past where it used
            // to sit.
            while tmp != node && tmp != self.tail && unsafe { (*node).key() <= (*tmp).key() } {
                self.release(prev);
                prev = tmp;
                tmp = self.read_next(prev);
            }

            if tmp != node {
                // Already spliced out by another helper.
                self.release(tmp);
                return prev;
            }

            if unsafe { (*prev).cas_next(node, succ).is_ok() } {
                // The node's own reference to succ moved into prev's edge.
                // Leave the terminal tag before dropping the edge reference
                // so the release cascade never walks the transferred edge.
                let terminal = MarkedPtr::new(ptr::null_mut()).with_mark().as_raw();
                unsafe { (*node).set_next(terminal) };
                self.release(node);
                self.release(tmp);
                return prev;
            }

            self.release(prev);
            self.release(tmp);
        }
    }
}

impl<V, K> Default for PriorityQueue<V, K>
where
    K: SentinelKey,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, K: SentinelKey> Drop for PriorityQueue<V, K> {
    /// Tear down the queue.
    ///
    /// Precondition: no other thread is still operating on the queue; the
    /// borrow checker enforces this for safe callers. Remaining payloads
    /// are drained and dropped, then every node comes home: the drain left
    /// the list as head -> tail with all other nodes recycled, and the
    /// free list frees its chain when it drops.
    fn drop(&mut self) {
        while self.pop().is_some() {}

        let head = self.head.load(Ordering::Relaxed);
        unsafe {
            drop(Box::from_raw(head));
            drop(Box::from_raw(self.tail));
        }
    }
}
