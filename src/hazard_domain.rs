use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use log::{trace, warn};

use crate::error::Status;
use crate::util;
use crate::util::CacheAligned;

/// Default number of protection cells per domain.
pub const DEFAULT_MAX_OBJECTS: usize = 128;

/// Upper bound on distinct threads that may ever call into one domain.
pub const MAX_THREAD_COUNT: usize = 4096;

/// Retire-list length that triggers the first scan, as a multiple of the
/// cell count.
const RETIRE_THRESHOLD_INIT_FACTOR: usize = 2;

/// Cap on the doubling amortisation threshold, as a multiple of the cell
/// count.
const RETIRE_THRESHOLD_CAP_FACTOR: usize = 32;

static SENTINEL_STORAGE: u8 = 0;

/// Fixed non-null address marking a captured cell that is not yet
/// publishing a real pointer. Process-wide, never dereferenced, and never
/// equal to null or to any heap node.
pub(crate) fn sentinel<T>() -> *mut T {
    &SENTINEL_STORAGE as *const u8 as *mut T
}

/// One entry of a domain's protection table.
///
/// The cell is a single atomic pointer with three states: null (free), the
/// process-wide sentinel (captured, publishing nothing) and a real node
/// address (the pointee must not be reclaimed). Each cell is padded to the
/// destructive-interference granularity so independent cells never share a
/// cache line.
pub struct ProtectionCell<T> {
    pointer: AtomicPtr<T>,
}

impl<T> ProtectionCell<T> {
    fn new() -> Self {
        ProtectionCell {
            pointer: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Attempt the free -> reserved transition.
    fn try_reserve(&self) -> bool {
        self.pointer
            .compare_exchange(
                ptr::null_mut(),
                sentinel::<T>(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Publish `data` as the protected address.
    #[inline]
    pub fn publish(&self, data: *mut T) {
        self.pointer.store(data, Ordering::Release);
    }

    /// Return the cell to the free state.
    #[inline]
    pub fn clear(&self) {
        self.pointer.store(ptr::null_mut(), Ordering::Release);
    }

    #[inline]
    pub fn load(&self) -> *mut T {
        self.pointer.load(Ordering::Acquire)
    }
}

struct RetireSlot<T> {
    list: Vec<*mut T>,
    threshold: usize,
    parity: bool,
}

impl<T> RetireSlot<T> {
    fn new(threshold: usize) -> Self {
        RetireSlot {
            list: Vec::new(),
            threshold,
            parity: false,
        }
    }
}

/// Protection-slot table and deferred-reclamation engine for one node type.
///
/// A domain owns `MAX_OBJECTS` protection cells shared by every thread and
/// one retire list per thread, reached through [`util::get_thread_id`].
/// At most `MAX_OBJECTS` [`HazardPointer`](crate::hazard_pointer::HazardPointer)
/// handles may be live on one domain at any instant.
///
/// The `P` parameter is a placeholder tag: two domains over the same
/// `(T, MAX_OBJECTS)` pair but different tags are distinct types and fully
/// independent.
pub struct HazardDomain<T, P = (), const MAX_OBJECTS: usize = DEFAULT_MAX_OBJECTS> {
    cells: Box<[CacheAligned<ProtectionCell<T>>]>,
    threads: Box<[CacheAligned<UnsafeCell<RetireSlot<T>>>]>,
    _placeholder: PhantomData<P>,
}

// The cell table is shared atomics; retire slot i is touched only by the
// thread whose id is i, except under `&mut self`. Reclamation may drop a
// `T` on a thread other than the one that allocated it.
unsafe impl<T: Send, P, const MAX_OBJECTS: usize> Send for HazardDomain<T, P, MAX_OBJECTS> {}
unsafe impl<T: Send, P, const MAX_OBJECTS: usize> Sync for HazardDomain<T, P, MAX_OBJECTS> {}

impl<T, P, const MAX_OBJECTS: usize> HazardDomain<T, P, MAX_OBJECTS> {
    pub fn new() -> Self {
        let threshold = RETIRE_THRESHOLD_INIT_FACTOR * MAX_OBJECTS;
        HazardDomain {
            cells: (0..MAX_OBJECTS)
                .map(|_| CacheAligned::new(ProtectionCell::new()))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            threads: (0..MAX_THREAD_COUNT)
                .map(|_| CacheAligned::new(UnsafeCell::new(RetireSlot::new(threshold))))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
            _placeholder: PhantomData,
        }
    }

    /// Capture the first free cell, or report that every cell is taken.
    pub fn try_capture_cell(&self) -> Result<&ProtectionCell<T>, Status> {
        for cell in self.cells.iter() {
            if cell.0.try_reserve() {
                return Ok(&cell.0);
            }
        }
        Err(Status::SlotsExhausted)
    }

    /// Capture the first free cell.
    ///
    /// # Panics
    ///
    /// Panics when all `MAX_OBJECTS` cells are captured. The caller
    /// guarantees the live-handle count never exceeds the table size; the
    /// table does not resize.
    pub fn capture_cell(&self) -> &ProtectionCell<T> {
        match self.try_capture_cell() {
            Ok(cell) => cell,
            Err(status) => panic!(
                "capture_cell fail, status={}, max_objects={}",
                status, MAX_OBJECTS
            ),
        }
    }

    /// Record `data` for deferred deletion on the calling thread's retire
    /// list, scanning when the list outgrows the amortisation threshold.
    ///
    /// Retiring null is a no-op.
    ///
    /// # Safety
    ///
    /// `data` must originate from `Box::into_raw`, must be retired at most
    /// once across all threads of the process, and must not be dereferenced
    /// by the caller afterwards. `T`'s destructor must not panic.
    pub unsafe fn retire(&self, data: *mut T) {
        if data.is_null() {
            warn!("invalid param, retire null pointer");
            return;
        }
        let slot = self.thread_slot();
        let (len, threshold) = {
            let slot = &mut *slot;
            slot.list.push(data);
            (slot.list.len(), slot.threshold)
        };
        if len >= threshold {
            self.scan_and_delete();
        }
    }

    /// Delete every entry of the calling thread's retire list whose address
    /// no cell was publishing at the moment of the snapshot; keep the rest
    /// for a later scan.
    pub fn scan_and_delete(&self) {
        let slot = self.thread_slot();
        let mut pending = mem::take(unsafe { &mut (*slot).list });
        if pending.is_empty() {
            return;
        }

        // One acquire-ordered pass over the table fixes the hazardous set
        // for this scan; the sentinel compares unequal to every retired
        // address and falls out naturally.
        let mut snapshot = [ptr::null_mut::<T>(); MAX_OBJECTS];
        for (shot, cell) in snapshot.iter_mut().zip(self.cells.iter()) {
            *shot = cell.0.load();
        }
        snapshot.sort_unstable();

        let mut freed = 0usize;
        let mut idx = 0usize;
        while idx < pending.len() {
            let data = pending[idx];
            if snapshot.binary_search(&data).is_ok() {
                idx += 1;
            } else {
                pending.swap_remove(idx);
                drop(unsafe { Box::from_raw(data) });
                freed += 1;
            }
        }
        trace!(
            "scan_and_delete tid={} freed={} kept={}",
            util::get_thread_id(),
            freed,
            pending.len()
        );

        let slot = unsafe { &mut *slot };
        if slot.list.is_empty() {
            slot.list = pending;
        } else {
            slot.list.append(&mut pending);
        }
        slot.parity = !slot.parity;
        if !slot.parity {
            slot.threshold = (slot.threshold * 2).min(RETIRE_THRESHOLD_CAP_FACTOR * MAX_OBJECTS);
        }
    }

    /// Number of entries waiting on the calling thread's retire list.
    pub fn pending_retired(&self) -> usize {
        unsafe { (*self.thread_slot()).list.len() }
    }

    /// Clear every cell and delete every retired entry of every thread.
    ///
    /// Exclusive access makes this safe: no handle can be live and no other
    /// thread can be inside the domain while the caller holds `&mut self`.
    /// Intended for tests and teardown.
    pub fn delete_all(&mut self) {
        for cell in self.cells.iter() {
            cell.0.clear();
        }
        for ts in self.threads.iter() {
            loop {
                let pending = {
                    let slot = unsafe { &mut *ts.0.get() };
                    mem::take(&mut slot.list)
                };
                if pending.is_empty() {
                    break;
                }
                for data in pending {
                    drop(unsafe { Box::from_raw(data) });
                }
            }
        }
    }

    fn thread_slot(&self) -> *mut RetireSlot<T> {
        let tid = util::get_thread_id();
        assert!(
            tid < MAX_THREAD_COUNT,
            "thread id {} exceeds MAX_THREAD_COUNT",
            tid
        );
        self.threads[tid].0.get()
    }
}

impl<T, P, const MAX_OBJECTS: usize> Default for HazardDomain<T, P, MAX_OBJECTS> {
    fn default() -> Self {
        HazardDomain::new()
    }
}

impl<T, P, const MAX_OBJECTS: usize> Drop for HazardDomain<T, P, MAX_OBJECTS> {
    fn drop(&mut self) {
        self.delete_all();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::cell::RefCell;

    struct Node<'a> {
        cnt: &'a RefCell<i32>,
    }

    impl<'a> Drop for Node<'a> {
        fn drop(&mut self) {
            *self.cnt.borrow_mut() += 1;
        }
    }

    fn raw_node(cnt: &RefCell<i32>) -> *mut Node {
        Box::into_raw(Box::new(Node { cnt }))
    }

    #[test]
    fn test_sentinel_distinct() {
        let p = sentinel::<Node>();
        assert!(!p.is_null());
        assert_eq!(p, sentinel::<Node>());
    }

    #[test]
    fn test_capture_uniqueness() {
        let domain: HazardDomain<i32, (), 4> = HazardDomain::new();
        let mut captured = vec![];
        for _ in 0..4 {
            captured.push(domain.capture_cell() as *const ProtectionCell<i32>);
        }
        captured.sort_unstable();
        captured.dedup();
        assert_eq!(captured.len(), 4);
        assert_eq!(domain.try_capture_cell().err(), Some(Status::SlotsExhausted));
    }

    #[test]
    #[should_panic(expected = "capture_cell fail")]
    fn test_capture_exhaustion_panics() {
        let domain: HazardDomain<i32, (), 2> = HazardDomain::new();
        let _a = domain.capture_cell();
        let _b = domain.capture_cell();
        domain.capture_cell();
    }

    #[test]
    fn test_cell_reuse_after_clear() {
        let domain: HazardDomain<i32, (), 1> = HazardDomain::new();
        let cell = domain.capture_cell();
        assert_eq!(cell.load(), sentinel::<i32>());
        assert!(domain.try_capture_cell().is_err());
        cell.clear();
        assert!(cell.load().is_null());
        assert!(domain.try_capture_cell().is_ok());
    }

    #[test]
    fn test_retire_null_is_noop() {
        let domain: HazardDomain<i32> = HazardDomain::new();
        unsafe { domain.retire(ptr::null_mut()) };
        assert_eq!(domain.pending_retired(), 0);
    }

    #[test]
    fn test_scan_triggered_by_threshold() {
        let cnt = RefCell::new(0);
        let domain: HazardDomain<Node, (), 4> = HazardDomain::new();
        // Threshold for a 4-cell domain starts at 8.
        for _ in 0..7 {
            unsafe { domain.retire(raw_node(&cnt)) };
        }
        assert_eq!(*cnt.borrow(), 0);
        assert_eq!(domain.pending_retired(), 7);
        unsafe { domain.retire(raw_node(&cnt)) };
        assert_eq!(*cnt.borrow(), 8);
        assert_eq!(domain.pending_retired(), 0);
    }

    #[test]
    fn test_protected_entry_survives_scan() {
        let cnt = RefCell::new(0);
        let mut domain: HazardDomain<Node, (), 4> = HazardDomain::new();
        let node = raw_node(&cnt);

        let cell = domain.capture_cell();
        cell.publish(node);
        unsafe { domain.retire(node) };
        for _ in 0..300 {
            unsafe { domain.retire(raw_node(&cnt)) };
        }
        domain.scan_and_delete();
        // Everything except the protected node has been deleted by now.
        assert_eq!(*cnt.borrow(), 300);
        assert_eq!(domain.pending_retired(), 1);

        cell.clear();
        domain.scan_and_delete();
        assert_eq!(*cnt.borrow(), 301);
        assert_eq!(domain.pending_retired(), 0);
        domain.delete_all();
    }

    #[test]
    fn test_delete_all() {
        let cnt = RefCell::new(0);
        let mut domain: HazardDomain<Node, (), 4> = HazardDomain::new();
        let node = raw_node(&cnt);
        let cell = domain.capture_cell();
        cell.publish(node);
        unsafe { domain.retire(node) };
        for _ in 0..3 {
            unsafe { domain.retire(raw_node(&cnt)) };
        }
        // delete_all ignores protection; it requires exclusive access.
        domain.delete_all();
        assert_eq!(*cnt.borrow(), 4);
        assert_eq!(domain.pending_retired(), 0);
    }

    #[test]
    fn test_drop_frees_pending() {
        let cnt = RefCell::new(0);
        {
            let domain: HazardDomain<Node, (), 4> = HazardDomain::new();
            for _ in 0..3 {
                unsafe { domain.retire(raw_node(&cnt)) };
            }
            assert_eq!(*cnt.borrow(), 0);
        }
        assert_eq!(*cnt.borrow(), 3);
    }
}
