//! Verifies that a reserved queue recycles node storage instead of
//! allocating: `reserve(n)` followed by n insert/pop pairs must not touch
//! the heap. Lives in its own test binary because it installs a counting
//! global allocator, and any parallel test would pollute the tally.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

use riptide_core::PriorityQueue;

struct CountingAllocator;

static ALLOCATIONS: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        ALLOCATIONS.fetch_add(1, Ordering::Relaxed);
        unsafe { System.alloc(layout) }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        unsafe { System.dealloc(ptr, layout) }
    }
}

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

#[test]
fn test_reserved_insert_pop_pairs_do_not_allocate() {
    // Zero-sized payloads: boxing them is allocation-free, so the only
    // possible heap traffic is node storage.
    let queue: PriorityQueue<(), u32> = PriorityQueue::new();
    queue.reserve(1024);

    let before = ALLOCATIONS.load(Ordering::Relaxed);
    for i in 0..1024_u32 {
        queue.insert((), i % 17);
        assert!(queue.pop().is_some());
    }
    let after = ALLOCATIONS.load(Ordering::Relaxed);

    assert_eq!(after - before, 0, "reserved queue hit the allocator");

    // The recycled nodes are still good for another full round.
    for i in 0..1024_u32 {
        queue.insert((), i);
        assert!(queue.pop().is_some());
    }
    assert_eq!(queue.pop(), None);
    assert_eq!(
        ALLOCATIONS.load(Ordering::Relaxed) - before,
        0,
        "second round allocated despite the free list"
    );
}
