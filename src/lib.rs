//! Lock-free containers built on a [`Hazard Pointers`] safe memory
//! reclamation engine.
//!
//! A [`Hazard Pointers`](https://www.cs.otago.ac.nz/cosc440/readings/hazard-pointers.pdf)
//! scheme publishes the address a thread is about to dereference into a
//! shared table of protection cells before the dereference happens. A thread
//! that unlinks a node from a lock-free structure never frees it directly;
//! it retires the pointer into a thread-local list, and an amortised scan
//! later deletes every retired pointer that no cell publishes. Deferring
//! reuse this way is also what defeats the
//! [`ABA problem`](https://en.wikipedia.org/wiki/ABA_problem): an address
//! cannot be recycled for a new allocation while any thread still protects
//! the old one.
//!
//! [`HazardDomain`](hazard_domain::HazardDomain) owns the protection-cell
//! table and the retire lists for one node type.
//! [`HazardPointer`](hazard_pointer::HazardPointer) is a scoped handle over
//! one cell with the `protect` / `try_protect` / `reset_protection`
//! primitives container algorithms are written against.
//! [`LockFreeStack`](lockfree_stack::LockFreeStack) and
//! [`LockFreeQueue`](lockfree_queue::LockFreeQueue) are the two clients: a
//! Treiber stack and a Michael-Scott two-pointer queue.

pub mod error;
pub mod hazard_domain;
pub mod hazard_pointer;
pub mod lockfree_queue;
pub mod lockfree_stack;
pub mod util;
