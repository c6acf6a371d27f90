use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use rs_hazard::lockfree_queue::LockFreeQueue;

fn init_log() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_concurrent_drain_unique() {
    init_log();

    let total = 10_000_i64;
    let thread_num = 4;
    let queue = Arc::new(LockFreeQueue::new());
    for i in 0..total {
        queue.enqueue(i);
    }

    let collected = Arc::new(Mutex::new(vec![]));
    let mut handles = vec![];
    for _ in 0..thread_num {
        let queue = Arc::clone(&queue);
        let collected = Arc::clone(&collected);
        handles.push(thread::spawn(move || {
            let mut local = vec![];
            // No producers are running; the first None means empty for good.
            while let Some(v) = queue.dequeue() {
                local.push(v);
            }
            collected.lock().unwrap().append(&mut local);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let mut collected = Arc::try_unwrap(collected).unwrap().into_inner().unwrap();
    collected.sort_unstable();
    let expected: Vec<i64> = (0..total).collect();
    assert_eq!(collected, expected);
}

#[test]
fn test_producer_consumer_conservation() {
    init_log();

    let producer_num = 4;
    let consumer_num = 4;
    let per_producer = 1000_i64;
    let queue = Arc::new(LockFreeQueue::new());
    let producer_cnt = Arc::new(AtomicI64::new(producer_num));
    let collected = Arc::new(Mutex::new(vec![]));

    let mut producers = vec![];
    for p in 0..producer_num {
        let queue = Arc::clone(&queue);
        let producer_cnt = Arc::clone(&producer_cnt);
        producers.push(thread::spawn(move || {
            for i in 0..per_producer {
                queue.enqueue(p * per_producer + i);
            }
            producer_cnt.fetch_add(-1, Ordering::Release);
        }));
    }

    let mut consumers = vec![];
    for _ in 0..consumer_num {
        let queue = Arc::clone(&queue);
        let producer_cnt = Arc::clone(&producer_cnt);
        let collected = Arc::clone(&collected);
        consumers.push(thread::spawn(move || {
            let mut local = vec![];
            let mut saw_empty = false;
            loop {
                if let Some(v) = queue.dequeue() {
                    local.push(v);
                    saw_empty = false;
                } else if producer_cnt.load(Ordering::Acquire) == 0 {
                    // Recheck once after production stops: a None seen
                    // before the counter hit zero may have been transient.
                    if saw_empty {
                        break;
                    }
                    saw_empty = true;
                }
            }
            collected.lock().unwrap().append(&mut local);
        }));
    }

    for h in producers {
        h.join().unwrap();
    }
    for h in consumers {
        h.join().unwrap();
    }
    assert!(queue.dequeue().is_none());

    let mut collected = Arc::try_unwrap(collected).unwrap().into_inner().unwrap();
    collected.sort_unstable();
    let expected: Vec<i64> = (0..producer_num * per_producer).collect();
    assert_eq!(collected, expected);
}

#[derive(Default)]
struct Payload {
    a: i64,
    b: i64,
    sum: i64,
}

#[test]
fn test_payload_not_torn() {
    init_log();

    let producer_num = 2;
    let consumer_num = 2;
    let per_producer = 50_000_i64;
    let queue = Arc::new(LockFreeQueue::new());
    let producer_cnt = Arc::new(AtomicI64::new(producer_num));
    let consumed = Arc::new(AtomicI64::new(0));

    let mut handles = vec![];
    for p in 0..producer_num {
        let queue = Arc::clone(&queue);
        let producer_cnt = Arc::clone(&producer_cnt);
        handles.push(thread::spawn(move || {
            let base = p * per_producer;
            for i in 0..per_producer {
                queue.enqueue(Payload {
                    a: i,
                    b: 2 * i + base,
                    sum: 3 * i + base,
                });
            }
            producer_cnt.fetch_add(-1, Ordering::Release);
        }));
    }
    for _ in 0..consumer_num {
        let queue = Arc::clone(&queue);
        let producer_cnt = Arc::clone(&producer_cnt);
        let consumed = Arc::clone(&consumed);
        handles.push(thread::spawn(move || {
            let mut saw_empty = false;
            loop {
                if let Some(v) = queue.dequeue() {
                    assert_eq!(v.a + v.b, v.sum);
                    consumed.fetch_add(1, Ordering::Relaxed);
                    saw_empty = false;
                } else if producer_cnt.load(Ordering::Acquire) == 0 {
                    if saw_empty {
                        break;
                    }
                    saw_empty = true;
                }
            }
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(
        consumed.load(Ordering::Relaxed),
        producer_num * per_producer
    );
}

struct Counted {
    drops: Arc<AtomicI64>,
}

impl Drop for Counted {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}

#[test]
fn test_concurrent_memory_reclaimed() {
    init_log();

    let thread_num = 4;
    let per_thread = 5_000_i64;
    let drops = Arc::new(AtomicI64::new(0));

    {
        let queue = Arc::new(LockFreeQueue::new());
        let mut handles = vec![];
        for _ in 0..thread_num {
            let queue = Arc::clone(&queue);
            let drops = Arc::clone(&drops);
            handles.push(thread::spawn(move || {
                for i in 0..per_thread {
                    queue.enqueue(Counted {
                        drops: Arc::clone(&drops),
                    });
                    if i % 2 == 0 {
                        queue.dequeue();
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        while queue.dequeue().is_some() {}
    }

    assert_eq!(drops.load(Ordering::Relaxed), thread_num * per_thread);
}
