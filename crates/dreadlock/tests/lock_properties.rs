use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use dreadlock::{BackoffConfig, Dreadlock, DreadlockConfig, NotOwner, Registry, ThreadHandle};

/// Counts threads inside a critical section and remembers if it ever saw two.
#[derive(Default)]
struct ExclusionTracker {
    inside: AtomicUsize,
    violated: AtomicBool,
}

impl ExclusionTracker {
    fn enter(&self) {
        if self.inside.fetch_add(1, Ordering::SeqCst) != 0 {
            self.violated.store(true, Ordering::SeqCst);
        }
    }

    fn exit(&self) {
        self.inside.fetch_sub(1, Ordering::SeqCst);
    }

    fn critical_section(&self, work: impl FnOnce()) {
        self.enter();
        work();
        self.exit();
    }

    fn assert_never_violated(&self) {
        assert!(
            !self.violated.load(Ordering::SeqCst),
            "two threads were inside the critical section at once"
        );
    }
}

/// Slow, predictable polling for scenarios that need to reason about timing.
fn patient_registry() -> Registry {
    Registry::with_config(DreadlockConfig {
        backoff: BackoffConfig {
            spin_polls: 0,
            yield_polls: 0,
            max_sleep_micros: 100_000,
        },
        ..DreadlockConfig::default()
    })
}

fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting until {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn uncontended_lock_unlock_repeats() {
    let registry = Registry::new();
    let lock = Arc::new(Dreadlock::new("solo", &registry));

    for _ in 0..100 {
        lock.lock().expect("uncontended lock must succeed");
        lock.unlock().expect("owner must be able to unlock");
    }

    let worker = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            for _ in 0..1000 {
                lock.lock().expect("uncontended lock must succeed");
                lock.unlock().expect("owner must be able to unlock");
            }
        })
    };
    worker.join().expect("worker panicked");
    assert!(!lock.is_locked());
}

#[test]
fn independent_locks_never_report_deadlock() {
    let registry = Registry::new();
    let left = Arc::new(Dreadlock::new("left", &registry));
    let right = Arc::new(Dreadlock::new("right", &registry));

    let spawn_worker = |lock: Arc<Dreadlock>| {
        thread::spawn(move || {
            for _ in 0..1000 {
                lock.lock().expect("no shared lock, no deadlock");
                thread::yield_now();
                lock.unlock().expect("owner must be able to unlock");
            }
        })
    };
    let a = spawn_worker(Arc::clone(&left));
    let b = spawn_worker(Arc::clone(&right));
    a.join().expect("left worker panicked");
    b.join().expect("right worker panicked");
}

#[test]
fn contended_lock_keeps_mutual_exclusion_without_false_deadlocks() {
    let registry = Registry::new();
    let lock = Arc::new(Dreadlock::new("shared", &registry));
    let tracker = Arc::new(ExclusionTracker::default());
    let start = Arc::new(Barrier::new(2));

    let workers: Vec<_> = (0..2)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let tracker = Arc::clone(&tracker);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..1000 {
                    lock.lock().expect("no cyclic wait, no deadlock");
                    tracker.critical_section(thread::yield_now);
                    lock.unlock().expect("owner must be able to unlock");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }
    tracker.assert_never_violated();
    assert!(!lock.is_locked());
}

#[test]
fn relocking_a_held_lock_is_a_deadlock() {
    let registry = Registry::new();
    let lock = Dreadlock::new("reentrant", &registry);

    lock.lock().unwrap();
    let err = lock.lock().expect_err("re-entrant lock must be reported");
    assert_eq!(err.lock, "reentrant");
    assert_eq!(err.thread, ThreadHandle::current());

    // the failed attempt did not disturb ownership
    assert_eq!(lock.owner(), Some(ThreadHandle::current()));
    lock.unlock().unwrap();
}

#[test]
fn relocking_under_contention_is_a_deadlock() {
    let registry = Registry::new();
    let lock = Arc::new(Dreadlock::new("busy", &registry));
    let tracker = Arc::new(ExclusionTracker::default());

    let churn = {
        let lock = Arc::clone(&lock);
        let tracker = Arc::clone(&tracker);
        thread::spawn(move || {
            for _ in 0..100 {
                lock.lock().expect("no cyclic wait, no deadlock");
                tracker.critical_section(|| thread::sleep(Duration::from_micros(200)));
                lock.unlock().expect("owner must be able to unlock");
            }
        })
    };

    for _ in 0..100 {
        lock.lock().expect("no cyclic wait, no deadlock");
        tracker.critical_section(|| thread::sleep(Duration::from_micros(200)));
        lock.unlock().expect("owner must be able to unlock");
    }
    lock.lock().unwrap();
    assert!(lock.lock().is_err(), "second lock on a held lock must fail");
    lock.unlock().unwrap();

    churn.join().expect("churn thread panicked");
    tracker.assert_never_violated();
}

#[test]
fn two_lock_cycle_is_detected_and_waiter_completes() {
    let registry = patient_registry();
    let l1 = Arc::new(Dreadlock::new("l1", &registry));
    let l2 = Arc::new(Dreadlock::new("l2", &registry));
    let me = ThreadHandle::current();

    l2.lock().unwrap();

    let (holding_tx, holding_rx) = mpsc::channel();
    let b = {
        let l1 = Arc::clone(&l1);
        let l2 = Arc::clone(&l2);
        thread::spawn(move || {
            l1.lock().expect("l1 is free");
            holding_tx
                .send(ThreadHandle::current())
                .expect("main thread went away");
            l2.lock().expect("l2 must be handed over once the cycle is broken");
            l2.unlock().unwrap();
            l1.unlock().unwrap();
        })
    };
    let b_handle = holding_rx.recv().expect("b never acquired l1");

    // b is polling l2 once it has absorbed our identity
    wait_until("b has merged our digest", || {
        registry.snapshot_of(b_handle).contains(me.digest())
    });
    thread::sleep(Duration::from_millis(300));

    let err = l1.lock().expect_err("closing the cycle must be detected");
    assert_eq!(err.lock, "l1");
    assert_eq!(err.thread, me);
    assert_eq!(l1.owner(), Some(b_handle));

    // what we learned while waiting stays in our digest
    assert!(registry.snapshot_own().contains(b_handle.digest()));

    l2.unlock().unwrap();
    b.join().expect("b panicked");
    assert!(!l1.is_locked());
    assert!(!l2.is_locked());
}

#[test]
fn chain_without_cycle_completes() {
    let registry = Registry::new();
    let locks: Arc<Vec<Dreadlock>> = Arc::new(
        ["d1", "d2", "d3", "d4"]
            .into_iter()
            .map(|name| Dreadlock::new(name, &registry))
            .collect(),
    );
    let start = Arc::new(Barrier::new(2));

    let t1 = {
        let locks = Arc::clone(&locks);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            locks[0].lock().unwrap();
            locks[1].lock().unwrap();
            start.wait();
            thread::sleep(Duration::from_millis(100));
            locks[0].unlock().unwrap();
            locks[1].unlock().unwrap();
            locks[2].lock().unwrap();
            locks[3].lock().unwrap();
            locks[3].unlock().unwrap();
            locks[2].unlock().unwrap();
        })
    };
    let t2 = {
        let locks = Arc::clone(&locks);
        let start = Arc::clone(&start);
        thread::spawn(move || {
            locks[2].lock().unwrap();
            locks[3].lock().unwrap();
            start.wait();
            thread::sleep(Duration::from_millis(100));
            locks[2].unlock().unwrap();
            locks[3].unlock().unwrap();
            locks[1].lock().unwrap();
            locks[0].lock().unwrap();
            locks[0].unlock().unwrap();
            locks[1].unlock().unwrap();
        })
    };
    t1.join().expect("t1 panicked");
    t2.join().expect("t2 panicked");
    assert!(locks.iter().all(|lock| !lock.is_locked()));
}

/// Each philosopher holds both adjacent locks for one meal, retrying after a
/// detected deadlock. Returns how many deadlocks were reported in total.
fn dine(locks: Arc<Vec<Dreadlock>>, ordered: bool, force_cycle: bool) -> usize {
    let n = locks.len();
    let probes: Arc<Vec<ExclusionTracker>> =
        Arc::new((0..n).map(|_| ExclusionTracker::default()).collect());
    let seated = Arc::new(Barrier::new(n));
    let detections = Arc::new(AtomicUsize::new(0));

    let philosophers: Vec<_> = (0..n)
        .map(|i| {
            let locks = Arc::clone(&locks);
            let probes = Arc::clone(&probes);
            let seated = Arc::clone(&seated);
            let detections = Arc::clone(&detections);
            thread::spawn(move || {
                let (first, second) = if ordered {
                    (i.min((i + 1) % n), i.max((i + 1) % n))
                } else {
                    (i, (i + 1) % n)
                };
                let mut attempt = 0u64;
                let back_off = |attempt: u64| {
                    detections.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5 * (i as u64 + 1) * attempt.min(8)));
                };
                loop {
                    if locks[first].lock().is_err() {
                        attempt += 1;
                        back_off(attempt);
                        continue;
                    }
                    if force_cycle && attempt == 0 {
                        seated.wait();
                    }
                    if locks[second].lock().is_err() {
                        locks[first].unlock().unwrap();
                        attempt += 1;
                        back_off(attempt);
                        continue;
                    }
                    probes[first].critical_section(|| {
                        probes[second]
                            .critical_section(|| thread::sleep(Duration::from_millis(2)))
                    });
                    locks[second].unlock().unwrap();
                    locks[first].unlock().unwrap();
                    return;
                }
            })
        })
        .collect();

    for philosopher in philosophers {
        philosopher.join().expect("philosopher panicked");
    }
    for tracker in probes.iter() {
        tracker.assert_never_violated();
    }
    assert!(locks.iter().all(|lock| !lock.is_locked()));
    detections.load(Ordering::SeqCst)
}

fn table(registry: &Registry) -> Arc<Vec<Dreadlock>> {
    Arc::new(
        ["fork0", "fork1", "fork2", "fork3", "fork4"]
            .into_iter()
            .map(|name| Dreadlock::new(name, registry))
            .collect(),
    )
}

#[test]
fn ring_with_forced_cycle_reports_deadlock_then_progresses() {
    let registry = Registry::new();
    let detections = dine(table(&registry), false, true);
    assert!(detections >= 1, "a five-way cycle went unnoticed");
}

#[test]
fn ring_in_ascending_order_makes_progress() {
    let registry = Registry::new();
    // ordered acquisition has no real cycle; stale digests may still cause a
    // retry, which is fine as long as everyone eats
    dine(table(&registry), true, false);
}

#[test]
fn unlocking_a_free_lock_is_rejected() {
    let registry = Registry::new();
    let lock = Dreadlock::new("never-taken", &registry);

    let err = lock.unlock().expect_err("nobody owns the lock");
    assert_eq!(
        err,
        NotOwner {
            lock: "never-taken",
            caller: ThreadHandle::current(),
            owner: None,
        }
    );
    assert!(!lock.is_locked());
}

#[test]
fn unlocking_someone_elses_lock_is_rejected() {
    let registry = Registry::new();
    let lock = Arc::new(Dreadlock::new("theirs", &registry));
    let (held_tx, held_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let owner = {
        let lock = Arc::clone(&lock);
        thread::spawn(move || {
            lock.lock().unwrap();
            held_tx.send(ThreadHandle::current()).unwrap();
            release_rx.recv().unwrap();
            lock.unlock().expect("the owner can still unlock");
        })
    };
    let owner_handle = held_rx.recv().expect("owner never acquired the lock");

    let err = lock.unlock().expect_err("we are not the owner");
    assert_eq!(err.owner, Some(owner_handle));
    assert_eq!(err.caller, ThreadHandle::current());
    assert_eq!(lock.owner(), Some(owner_handle));

    release_tx.send(()).unwrap();
    owner.join().expect("owner panicked");
    assert!(!lock.is_locked());
}

#[test]
fn guard_protects_a_counter() {
    let registry = Registry::new();
    let lock = Arc::new(Dreadlock::new("counter", &registry));
    let tracker = Arc::new(ExclusionTracker::default());
    let total = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let tracker = Arc::clone(&tracker);
            let total = Arc::clone(&total);
            thread::spawn(move || {
                for _ in 0..250 {
                    let _guard = lock.guard().expect("no cyclic wait, no deadlock");
                    tracker.critical_section(|| {
                        let seen = total.load(Ordering::Relaxed);
                        thread::yield_now();
                        total.store(seen + 1, Ordering::Relaxed);
                    });
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker panicked");
    }
    tracker.assert_never_violated();
    assert_eq!(total.load(Ordering::Relaxed), 1000);
}

#[test]
fn locks_on_different_registries_do_not_see_each_other() {
    let first = Registry::new();
    let second = Registry::new();
    assert!(!first.ptr_eq(&second));
    assert!(first.ptr_eq(&first.clone()));

    let lock = Dreadlock::new("isolated", &first);
    lock.lock().unwrap();
    assert!(second.is_empty());
    assert!(lock.registry().ptr_eq(&first));
    lock.unlock().unwrap();
}
