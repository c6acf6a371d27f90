use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::error::Status;
use crate::hazard_domain::{sentinel, HazardDomain, ProtectionCell};
use crate::util;

/// Scoped owner of one protection cell of a [`HazardDomain`].
///
/// A handle is created through [`make`](HazardPointer::make), which captures
/// the first free cell of the domain, and returns the cell on drop. It is
/// movable but not copyable; while it lives, whatever address it publishes
/// through [`protect`](HazardPointer::protect) cannot be reclaimed by any
/// thread.
///
/// # Examples
///
/// ```
/// use rs_hazard::hazard_domain::HazardDomain;
/// use rs_hazard::hazard_pointer::HazardPointer;
/// use std::sync::atomic::{AtomicPtr, Ordering};
///
/// let mut domain: HazardDomain<i32> = HazardDomain::new();
/// let shared = AtomicPtr::new(Box::into_raw(Box::new(7)));
/// {
///     let hp = HazardPointer::make(&domain);
///     let data = hp.protect(&shared);
///     assert_eq!(unsafe { *data }, 7);
/// }
/// unsafe { domain.retire(shared.load(Ordering::Relaxed)) };
/// domain.delete_all();
/// ```
pub struct HazardPointer<'d, T> {
    cell: &'d ProtectionCell<T>,
}

impl<'d, T> HazardPointer<'d, T> {
    /// Capture a cell of `domain` and wrap it in a handle.
    ///
    /// # Panics
    ///
    /// Panics when every cell of the domain is captured; see
    /// [`HazardDomain::capture_cell`].
    pub fn make<P, const MAX_OBJECTS: usize>(
        domain: &'d HazardDomain<T, P, MAX_OBJECTS>,
    ) -> HazardPointer<'d, T> {
        HazardPointer {
            cell: domain.capture_cell(),
        }
    }

    /// Fallible variant of [`make`](HazardPointer::make).
    pub fn try_make<P, const MAX_OBJECTS: usize>(
        domain: &'d HazardDomain<T, P, MAX_OBJECTS>,
    ) -> Result<HazardPointer<'d, T>, Status> {
        Ok(HazardPointer {
            cell: domain.try_capture_cell()?,
        })
    }

    /// True iff the owned cell currently holds null.
    pub fn empty(&self) -> bool {
        self.cell.load().is_null()
    }

    /// Load from `src` and publish the loaded address into the cell,
    /// repeating until a validating reload observes the same value.
    ///
    /// On return the pointee (if any) is protected from reclamation until
    /// the cell is cleared or repointed. A null load is returned as-is with
    /// the cell cleared.
    pub fn protect(&self, src: &AtomicPtr<T>) -> *mut T {
        let mut data = src.load(Ordering::Relaxed);
        while !self.try_protect(&mut data, src) {
            util::pause();
        }
        data
    }

    /// One publish-and-validate step of [`protect`](HazardPointer::protect).
    ///
    /// Publishes `*data`, reloads `src` with acquire ordering and overwrites
    /// `*data` with the reload. Returns true when the reload matched and the
    /// cell now protects it; otherwise the cell is cleared and `*data` holds
    /// the fresher value for the next attempt.
    pub fn try_protect(&self, data: &mut *mut T, src: &AtomicPtr<T>) -> bool {
        let old = *data;
        self.reset_protection(old);
        *data = src.load(Ordering::Acquire);
        if old == *data {
            true
        } else {
            self.clear();
            false
        }
    }

    /// Publish `data` into the cell; null clears the protection instead.
    pub fn reset_protection(&self, data: *mut T) {
        if data.is_null() {
            self.clear();
        } else {
            self.cell.publish(data);
        }
    }

    /// Return the cell to the reserved state (captured, publishing nothing).
    pub fn reserve(&self) {
        self.cell.publish(sentinel::<T>());
    }

    /// Clear the protection, leaving the cell owned but free of content.
    pub fn clear(&self) {
        self.cell.clear();
    }
}

impl<'d, T> Drop for HazardPointer<'d, T> {
    fn drop(&mut self) {
        self.cell.clear();
    }
}

/// Retires a borrowed pointer at scope exit.
///
/// Wraps a node a container has just unlinked so the surrounding pop or
/// dequeue reads linearly: take the element, return it, and let the guard
/// hand the node to the domain on the way out. [`release`](RetireGuard::release)
/// disarms the guard.
pub struct RetireGuard<'d, T, P, const MAX_OBJECTS: usize> {
    data: *mut T,
    domain: &'d HazardDomain<T, P, MAX_OBJECTS>,
}

impl<'d, T, P, const MAX_OBJECTS: usize> RetireGuard<'d, T, P, MAX_OBJECTS> {
    /// Arm a guard that will retire `data` into `domain` when dropped.
    ///
    /// # Safety
    ///
    /// Same contract as [`HazardDomain::retire`]: `data` comes from
    /// `Box::into_raw`, is retired at most once and is not used by the
    /// caller after the guard drops.
    pub unsafe fn new(domain: &'d HazardDomain<T, P, MAX_OBJECTS>, data: *mut T) -> Self {
        RetireGuard { data, domain }
    }

    /// Disarm the guard and hand the pointer back to the caller.
    pub fn release(mut self) -> *mut T {
        mem::replace(&mut self.data, ptr::null_mut())
    }
}

impl<'d, T, P, const MAX_OBJECTS: usize> Drop for RetireGuard<'d, T, P, MAX_OBJECTS> {
    fn drop(&mut self) {
        if !self.data.is_null() {
            unsafe { self.domain.retire(self.data) };
        }
    }
}
