use std::cell::Cell;
use std::hint;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

cfg_if::cfg_if! {
    if #[cfg(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "powerpc64",
    ))] {
        /// Destructive-interference granularity of the target.
        ///
        /// 128 bytes on architectures whose prefetchers pull cache lines in
        /// pairs, 64 bytes elsewhere.
        pub const CACHE_LINE_SIZE: usize = 128;

        /// Wrap a value so that it occupies its own cache line(s) and never
        /// false-shares with a neighbour.
        #[repr(align(128))]
        #[derive(Default)]
        pub struct CacheAligned<T>(pub T);
    } else {
        /// Destructive-interference granularity of the target.
        pub const CACHE_LINE_SIZE: usize = 64;

        /// Wrap a value so that it occupies its own cache line(s) and never
        /// false-shares with a neighbour.
        #[repr(align(64))]
        #[derive(Default)]
        pub struct CacheAligned<T>(pub T);
    }
}

impl<T> CacheAligned<T> {
    pub const fn new(t: T) -> Self {
        CacheAligned(t)
    }
}

impl<T> Deref for CacheAligned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CacheAligned<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

static NEXT_THREAD_ID: AtomicUsize = AtomicUsize::new(0);

/// Return a small process-unique id for the current thread, assigned on
/// first call and stable for the thread's lifetime.
pub fn get_thread_id() -> usize {
    thread_local!(static THREAD_ID: Cell<usize> = const { Cell::new(usize::MAX) });
    THREAD_ID.with(|tid| {
        if usize::MAX == tid.get() {
            tid.set(NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed));
        }
        tid.get()
    })
}

/// Return current unix timestamp (microsecond).
pub fn get_cur_microseconds_time() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000) as i64
}

/// Spin-wait hint for retry loops.
#[inline]
pub fn pause() {
    hint::spin_loop();
}
