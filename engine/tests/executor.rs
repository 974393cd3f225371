use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use engine::{Command, Executor, Limiter, Status};
use pretty_assertions::assert_eq;

fn counting_executor(name: &str, limiter: Option<Arc<Limiter>>) -> Executor<(), usize> {
    Executor::new(name, limiter, 0usize, |count: &mut usize, _: (), _| {
        *count += 1;
        Command::Proceed
    })
}

#[test]
fn indices_follow_submission_order() {
    let executor = Executor::new("indices", None, Vec::new(), |seen: &mut Vec<(usize, usize)>, value: usize, index| {
        seen.push((index, value));
        Command::Proceed
    });
    let first = executor.go(|| 10);
    let rest = executor.map((1..4).map(|i| move || i * 10));
    assert_eq!(first, 0);
    assert_eq!(rest, vec![1, 2, 3]);

    let mut guard = executor.wait_done_and_lock();
    guard.sort();
    assert_eq!(*guard, vec![(0, 10), (1, 10), (2, 20), (3, 30)]);
}

#[test]
fn results_land_by_index_not_completion_order() {
    let executor = Executor::new("placement", None, Vec::new(), |slots: &mut Vec<Option<String>>, text: String, index| {
        if slots.len() <= index {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(text);
        Command::Proceed
    });
    for (i, delay) in [30u64, 10, 0].into_iter().enumerate() {
        executor.go(move || {
            std::thread::sleep(Duration::from_millis(delay));
            format!("block{}", i)
        });
    }
    let guard = executor.wait_done_and_lock();
    let joined: Vec<String> = guard.iter().flatten().cloned().collect();
    assert_eq!(joined.join("\n"), "block0\nblock1\nblock2");
}

#[test]
fn map_ref_shares_items() {
    let executor = Executor::new("map-ref", None, Vec::new(), |out: &mut Vec<(usize, u64)>, value: u64, index| {
        out.push((index, value));
        Command::Proceed
    });
    let items: Arc<[u64]> = vec![1, 2, 3].into();
    executor.map_ref(items, |n| n * n);
    let mut guard = executor.wait_done_and_lock();
    guard.sort();
    assert_eq!(*guard, vec![(0, 1), (1, 4), (2, 9)]);
}

#[test]
fn limiter_bounds_running_tasks() {
    for capacity in [1, 2, 3, 4, 8, 16, 1024] {
        let limiter = Limiter::shared(capacity);
        let executor = counting_executor("bound", Some(Arc::clone(&limiter)));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..2048 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            executor.go(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::yield_now();
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        let guard = executor.wait_done_and_lock();
        assert_eq!(*guard, 2048);
        guard.unlock();
        let peak = peak.load(Ordering::SeqCst);
        assert!(peak <= capacity, "capacity {}: saw {} tasks at once", capacity, peak);
        assert_eq!(limiter.available(), capacity);
    }
}

#[test]
fn stop_skips_remaining_and_later_tasks_until_resumed() {
    let ran = Arc::new(AtomicUsize::new(0));
    let executor = Executor::new("cancel", None, Vec::new(), |seen: &mut Vec<usize>, index: usize, _| {
        seen.push(index);
        Command::Stop
    });
    let spawn = |executor: &Executor<usize, Vec<usize>>, i: usize| {
        let ran = Arc::clone(&ran);
        executor.go(move || {
            ran.fetch_add(1, Ordering::SeqCst);
            i
        });
    };

    for i in 0..8 {
        spawn(&executor, i);
    }
    let guard = executor.wait_done_and_lock();
    assert!(guard.stopped());
    assert_eq!(guard.len(), 1);
    guard.unlock();
    let after_stop = ran.load(Ordering::SeqCst);
    assert!((1..=8).contains(&after_stop), "{} tasks ran", after_stop);
    assert_eq!(executor.status(), Status::Stopped);

    // Still stopped: the task body must not run.
    spawn(&executor, 100);
    let guard = executor.wait_done_and_lock();
    assert_eq!(ran.load(Ordering::SeqCst), after_stop);
    assert_eq!(guard.len(), 1);
    guard.unlock_resume();

    spawn(&executor, 200);
    let guard = executor.wait_done_and_lock();
    assert_eq!(ran.load(Ordering::SeqCst), after_stop + 1);
    assert_eq!(guard.len(), 2);
    assert_eq!(guard[1], 200);
}

#[test]
fn panicking_tasks_release_permits_and_leave_executor_usable() {
    let limiter = Limiter::shared(4);
    let executor = counting_executor("panics", Some(Arc::clone(&limiter)));

    for _ in 0..8 {
        executor.go(|| panic!("task failure"));
    }
    for _ in 0..8 {
        executor.go(|| ());
    }

    let guard = executor.wait_done_and_lock();
    assert_eq!(*guard, 8);
    assert!(!guard.stopped());
    guard.unlock();
    assert_eq!(limiter.available(), 4);
}

#[test]
fn limiter_is_shared_across_executors() {
    let limiter = Limiter::shared(2);
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let executors: Vec<_> = (0..3)
        .map(|i| counting_executor(&format!("shared-{}", i), Some(Arc::clone(&limiter))))
        .collect();

    for executor in &executors {
        for _ in 0..32 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            executor.go(move || {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_micros(200));
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }
    }
    for executor in &executors {
        assert_eq!(*executor.wait_done_and_lock(), 32);
    }
    assert!(peak.load(Ordering::SeqCst) <= 2);
}
