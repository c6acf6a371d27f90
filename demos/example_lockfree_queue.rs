use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;

use rs_hazard::lockfree_queue::LockFreeQueue;
use rs_hazard::util;

#[derive(Default)]
struct QueueValue {
    value: i64,
}

fn set_cpu_affinity() {
    if let Some(cpus) = core_affinity::get_core_ids() {
        let idx = util::get_thread_id() % cpus.len();
        core_affinity::set_for_current(cpus[idx]);
        info!("set_cpu_affinity {} {}", util::get_thread_id(), idx);
    }
}

fn main() {
    env_logger::init();

    let cpu_count = core_affinity::get_core_ids().map_or(4, |c| c.len()) as i64;
    let producer_count = (cpu_count + 1) / 2;
    let consumer_count = (cpu_count - producer_count).max(1);
    let loop_cnt = 200_000_i64;

    info!(
        "producer_count {} consumer_count {} loop_cnt {}",
        producer_count, consumer_count, loop_cnt
    );

    let queue = Arc::new(LockFreeQueue::new());
    let producer_cnt = Arc::new(AtomicI64::new(producer_count));
    let produced = Arc::new(AtomicI64::new(0));
    let consumed = Arc::new(AtomicI64::new(0));
    let tol_val = Arc::new(AtomicI64::new(0));

    let start = util::get_cur_microseconds_time();

    let watch = {
        let producer_cnt = Arc::clone(&producer_cnt);
        let produced = Arc::clone(&produced);
        let consumed = Arc::clone(&consumed);
        thread::spawn(move || {
            while producer_cnt.load(Ordering::Acquire) != 0 {
                info!(
                    "watch_thread produced {} consumed {}",
                    produced.load(Ordering::Relaxed),
                    consumed.load(Ordering::Relaxed)
                );
                thread::sleep(Duration::from_millis(1000));
            }
        })
    };

    let mut producer_threads = vec![];
    for _ in 0..producer_count {
        let queue = Arc::clone(&queue);
        let producer_cnt = Arc::clone(&producer_cnt);
        let produced = Arc::clone(&produced);
        producer_threads.push(thread::spawn(move || {
            set_cpu_affinity();
            let mut tol = 0;
            for i in 0..loop_cnt {
                queue.enqueue(QueueValue { value: i });
                tol += 1;
                if i % 1024 == 0 {
                    produced.fetch_add(tol, Ordering::Relaxed);
                    tol = 0;
                }
            }
            produced.fetch_add(tol, Ordering::Relaxed);
            producer_cnt.fetch_add(-1, Ordering::Release);
        }));
    }

    let mut consumer_threads = vec![];
    for _ in 0..consumer_count {
        let queue = Arc::clone(&queue);
        let producer_cnt = Arc::clone(&producer_cnt);
        let consumed = Arc::clone(&consumed);
        let tol_val = Arc::clone(&tol_val);
        consumer_threads.push(thread::spawn(move || {
            set_cpu_affinity();
            let mut saw_empty = false;
            let mut tol = 0;
            let mut val = 0;
            loop {
                if let Some(v) = queue.dequeue() {
                    val += v.value;
                    tol += 1;
                    if tol % 1024 == 0 {
                        consumed.fetch_add(tol, Ordering::Relaxed);
                        tol_val.fetch_add(val, Ordering::Relaxed);
                        tol = 0;
                        val = 0;
                    }
                    saw_empty = false;
                } else if producer_cnt.load(Ordering::Acquire) == 0 {
                    if saw_empty {
                        break;
                    }
                    saw_empty = true;
                }
            }
            consumed.fetch_add(tol, Ordering::Relaxed);
            tol_val.fetch_add(val, Ordering::Relaxed);
        }));
    }

    for t in producer_threads {
        t.join().unwrap();
    }
    info!("producer_threads joined");

    for t in consumer_threads {
        t.join().unwrap();
    }
    info!("consumer_threads joined");

    watch.join().unwrap();

    let cost_us = util::get_cur_microseconds_time() - start;
    let produced = produced.load(Ordering::Relaxed);
    let consumed = consumed.load(Ordering::Relaxed);

    assert_eq!(produced, consumed);
    assert_eq!(
        tol_val.load(Ordering::Relaxed),
        producer_count * (loop_cnt - 1) * loop_cnt / 2
    );

    println!(
        "produced {} consumed {} in {} ms, {} ops/sec",
        produced,
        consumed,
        cost_us / 1000,
        (produced + consumed) * 1_000_000 / cost_us.max(1)
    );
}
