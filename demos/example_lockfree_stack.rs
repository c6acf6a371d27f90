use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use log::info;

use rs_hazard::lockfree_stack::LockFreeStack;
use rs_hazard::util;

fn set_cpu_affinity() {
    if let Some(cpus) = core_affinity::get_core_ids() {
        let idx = util::get_thread_id() % cpus.len();
        core_affinity::set_for_current(cpus[idx]);
        info!("set_cpu_affinity {} {}", util::get_thread_id(), idx);
    }
}

fn main() {
    env_logger::init();

    let thread_count = core_affinity::get_core_ids().map_or(4, |c| c.len()).max(2) as i64;
    let loop_cnt = 200_000_i64;

    info!("thread_count {} loop_cnt {}", thread_count, loop_cnt);

    let stack = Arc::new(LockFreeStack::new());
    let popped = Arc::new(AtomicI64::new(0));

    let start = util::get_cur_microseconds_time();

    // Every thread pushes its own range and opportunistically pops; the
    // main thread drains whatever is left.
    let mut workers = vec![];
    for t in 0..thread_count {
        let stack = Arc::clone(&stack);
        let popped = Arc::clone(&popped);
        workers.push(thread::spawn(move || {
            set_cpu_affinity();
            for i in 0..loop_cnt {
                stack.push(t * loop_cnt + i);
                if i % 2 == 1 && stack.pop().is_some() {
                    popped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }));
    }
    for t in workers {
        t.join().unwrap();
    }

    let mut remaining = 0_i64;
    while stack.pop().is_some() {
        remaining += 1;
    }

    let cost_us = util::get_cur_microseconds_time() - start;
    let pushed = thread_count * loop_cnt;
    let popped = popped.load(Ordering::Relaxed);

    assert_eq!(pushed, popped + remaining);

    println!(
        "pushed {} popped {} drained {} in {} ms, {} ops/sec",
        pushed,
        popped,
        remaining,
        cost_us / 1000,
        (pushed + popped + remaining) * 1_000_000 / cost_us.max(1)
    );
}
