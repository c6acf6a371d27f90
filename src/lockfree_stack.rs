use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::hazard_domain::HazardDomain;
use crate::hazard_pointer::{HazardPointer, RetireGuard};
use crate::util::CacheAligned;

struct StackDomainTag;

type LIFONodePtr<T> = *mut LIFONode<T>;

struct LIFONode<T> {
    element: Option<T>,
    previous: LIFONodePtr<T>,
}

impl<T> LIFONode<T> {
    fn new(element: T) -> Self {
        LIFONode {
            element: Some(element),
            previous: ptr::null_mut(),
        }
    }
}

/// Treiber stack: a singly linked LIFO with one atomic head pointer,
/// reclaimed through a private [`HazardDomain`].
///
/// `push` never dereferences shared nodes and needs no protection; `pop`
/// holds one hazard pointer across the unlink.
pub struct LockFreeStack<T> {
    domain: HazardDomain<LIFONode<T>, StackDomainTag>,
    head: CacheAligned<AtomicPtr<LIFONode<T>>>,
}

// Popped elements may be handed to, and deferred nodes dropped on, any
// thread.
unsafe impl<T: Send> Send for LockFreeStack<T> {}
unsafe impl<T: Send> Sync for LockFreeStack<T> {}

impl<T> LockFreeStack<T> {
    pub fn new() -> Self {
        LockFreeStack {
            domain: HazardDomain::new(),
            head: CacheAligned::new(AtomicPtr::new(ptr::null_mut())),
        }
    }

    pub fn push(&self, element: T) {
        let node = Box::into_raw(Box::new(LIFONode::new(element)));
        let mut old = self.head.load(Ordering::Relaxed);
        loop {
            unsafe { (*node).previous = old };
            match self
                .head
                .compare_exchange_weak(old, node, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(curr) => old = curr,
            }
        }
    }

    pub fn pop(&self) -> Option<T> {
        let hp = HazardPointer::make(&self.domain);
        loop {
            let node = hp.protect(&self.head);
            if node.is_null() {
                return None;
            }
            // The only field read after the load; the protected node cannot
            // be reclaimed underneath us.
            let previous = unsafe { (*node).previous };
            if self
                .head
                .compare_exchange_weak(node, previous, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                let _retire = unsafe { RetireGuard::new(&self.domain, node) };
                let element = unsafe { (*node).element.take() };
                debug_assert!(element.is_some());
                return element;
            }
        }
    }
}

impl<T> Default for LockFreeStack<T> {
    fn default() -> Self {
        LockFreeStack::new()
    }
}

impl<T> Drop for LockFreeStack<T> {
    fn drop(&mut self) {
        // Precondition: no threads perform concurrent access. The walk
        // bypasses hazard protection; pending retirees are freed by the
        // domain field right after.
        let mut head = *self.head.get_mut();
        while !head.is_null() {
            head = unsafe { Box::from_raw(head) }.previous;
        }
    }
}
