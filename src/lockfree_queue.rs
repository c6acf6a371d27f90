use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::hazard_domain::HazardDomain;
use crate::hazard_pointer::{HazardPointer, RetireGuard};
use crate::util::CacheAligned;

struct QueueDomainTag;

struct FIFONode<T> {
    element: Option<T>,
    next: AtomicPtr<FIFONode<T>>,
}

impl<T> FIFONode<T> {
    fn new(element: T) -> Self {
        FIFONode {
            element: Some(element),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn dummy() -> Self {
        FIFONode {
            element: None,
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Michael-Scott FIFO queue: a singly linked list with atomic `head` and
/// `tail`, a consumed dummy node at the head, and a private
/// [`HazardDomain`] for reclamation.
///
/// `head` and `tail` are never null. `head` points at the dummy; the first
/// real value lives in the dummy's successor. A node is retired the moment
/// its successor becomes the new head. `tail` may lag behind the last
/// linked node by one; enqueuers help it forward when they observe the lag,
/// and dequeuers push it off a node they are about to unlink so that no
/// retired node is ever reachable from `tail`.
pub struct LockFreeQueue<T> {
    domain: HazardDomain<FIFONode<T>, QueueDomainTag>,
    head: CacheAligned<AtomicPtr<FIFONode<T>>>,
    tail: CacheAligned<AtomicPtr<FIFONode<T>>>,
}

// Dequeued elements may be handed to, and deferred nodes dropped on, any
// thread.
unsafe impl<T: Send> Send for LockFreeQueue<T> {}
unsafe impl<T: Send> Sync for LockFreeQueue<T> {}

impl<T> LockFreeQueue<T> {
    pub fn new() -> Self {
        let dummy = Box::into_raw(Box::new(FIFONode::dummy()));
        LockFreeQueue {
            domain: HazardDomain::new(),
            head: CacheAligned::new(AtomicPtr::new(dummy)),
            tail: CacheAligned::new(AtomicPtr::new(dummy)),
        }
    }

    /// Append `element` at the tail. Lock-free; loops only while other
    /// enqueuers win the terminal-link race.
    pub fn enqueue(&self, element: T) {
        let node = Box::into_raw(Box::new(FIFONode::new(element)));
        let hp = HazardPointer::make(&self.domain);
        loop {
            let tail = hp.protect(&self.tail);
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if !next.is_null() {
                // The tail pointer lags behind the last node; help it
                // forward and retry.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            if unsafe { &(*tail).next }
                .compare_exchange(ptr::null_mut(), node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                // Advancing the tail is best-effort; a loser here leaves a
                // lag the next operation repairs.
                let _ = self
                    .tail
                    .compare_exchange(tail, node, Ordering::Release, Ordering::Relaxed);
                return;
            }
        }
    }

    /// Detach the value behind the dummy, if any. The old dummy is retired;
    /// its successor becomes the new dummy.
    pub fn dequeue(&self) -> Option<T> {
        let hp_head = HazardPointer::make(&self.domain);
        let hp_next = HazardPointer::make(&self.domain);
        loop {
            let head = hp_head.protect(&self.head);
            let tail = self.tail.load(Ordering::Acquire);
            let next_src = unsafe { &(*head).next };
            let mut next = next_src.load(Ordering::Relaxed);
            if !hp_next.try_protect(&mut next, next_src) {
                continue;
            }
            if next.is_null() {
                return None;
            }
            if head == tail {
                // Unlinking the node the tail rests on would leave the tail
                // dangling; push it forward first.
                let _ = self
                    .tail
                    .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                let _retire = unsafe { RetireGuard::new(&self.domain, head) };
                // The promoted node is the new dummy, owned by the queue;
                // only this call path touches its element.
                let element = unsafe { (*next).element.take() };
                debug_assert!(element.is_some());
                return element;
            }
        }
    }
}

impl<T> Default for LockFreeQueue<T> {
    fn default() -> Self {
        LockFreeQueue::new()
    }
}

impl<T> Drop for LockFreeQueue<T> {
    fn drop(&mut self) {
        // Precondition: no threads perform concurrent access. Walks from
        // the dummy inclusive; pending retirees are freed by the domain
        // field right after.
        let mut node = *self.head.get_mut();
        while !node.is_null() {
            node = unsafe { Box::from_raw(node) }.next.load(Ordering::Relaxed);
        }
    }
}
