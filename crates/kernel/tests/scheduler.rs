// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! End-to-end scheduler tests driving a miniature host loop: a fixed tick
//! cadence with mixed sync/async, tick/time/park/future workloads in flight
//! at once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use loam_common::tracing::init_tracing;
use loam_kernel::{Completion, ExecutionType, Schedule, Scheduler, SchedulerConfig, TaskId};
use loam_common::tasks::{FailureSink, TaskFailure};

/// Poll `predicate` until it holds or the deadline passes.
fn wait_until(predicate: impl Fn() -> bool, timeout: Duration) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    while std::time::Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    predicate()
}

struct CountingSink(AtomicUsize);

impl FailureSink for CountingSink {
    fn report(&self, _task_id: TaskId, _error: TaskFailure) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_mixed_workload_host_loop() {
    // Already-installed subscribers (other test binaries, harnesses) are fine.
    let _ = init_tracing(false);

    let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
    let scheduler = Scheduler::new(SchedulerConfig::default(), sink.clone());

    // A sync heartbeat, once per tick.
    let heartbeat = Arc::new(AtomicUsize::new(0));
    let h = heartbeat.clone();
    scheduler.submit(
        move || {
            h.fetch_add(1, Ordering::SeqCst);
            Schedule::next_tick()
        },
        ExecutionType::Sync,
    );

    // An async worker, every 3 ticks.
    let async_runs = Arc::new(AtomicUsize::new(0));
    let a = async_runs.clone();
    scheduler.submit(
        move || {
            a.fetch_add(1, Ordering::SeqCst);
            Schedule::tick(3).expect("valid tick delta")
        },
        ExecutionType::Async,
    );

    // A wall-clock task resuming once after 20ms, then stopping.
    let timed_runs = Arc::new(AtomicUsize::new(0));
    let t = timed_runs.clone();
    let mut timed_first = true;
    scheduler.submit(
        move || {
            t.fetch_add(1, Ordering::SeqCst);
            if timed_first {
                timed_first = false;
                Schedule::duration(Duration::from_millis(20))
            } else {
                Schedule::stop()
            }
        },
        ExecutionType::Sync,
    );

    // A parked task woken mid-run by an external producer.
    let park_runs = Arc::new(AtomicUsize::new(0));
    let p = park_runs.clone();
    let mut parked_once = false;
    let parked = scheduler.submit(
        move || {
            p.fetch_add(1, Ordering::SeqCst);
            if !parked_once {
                parked_once = true;
                Schedule::park()
            } else {
                Schedule::stop()
            }
        },
        ExecutionType::Sync,
    );

    // A future-suspended task completed by an external signal.
    let future_runs = Arc::new(AtomicUsize::new(0));
    let f = future_runs.clone();
    let (completion_handle, completion) = Completion::pair();
    let mut slot = Some(completion);
    scheduler.submit(
        move || {
            f.fetch_add(1, Ordering::SeqCst);
            match slot.take() {
                Some(completion) => Schedule::future(completion),
                None => Schedule::stop(),
            }
        },
        ExecutionType::Sync,
    );

    // Drive the host loop: 12 ticks at ~5ms cadence, with the external
    // events landing partway through.
    for tick in 1..=12u64 {
        std::thread::sleep(Duration::from_millis(5));
        scheduler.process_tick();
        if tick == 4 {
            parked.unpark().expect("task is parked");
        }
    }
    completion_handle.complete();

    assert_eq!(heartbeat.load(Ordering::SeqCst), 13, "submit + 12 ticks");
    assert_eq!(park_runs.load(Ordering::SeqCst), 2);
    assert!(
        wait_until(
            || future_runs.load(Ordering::SeqCst) == 2,
            Duration::from_secs(5)
        ),
        "future completion re-dispatches"
    );
    // The async re-arm and the wall-clock resume land with worker/timer
    // latency; keep ticking until they have.
    assert!(
        wait_until(
            || {
                scheduler.process_tick();
                async_runs.load(Ordering::SeqCst) >= 4
            },
            Duration::from_secs(5)
        ),
        "async task keeps re-arming every 3 ticks"
    );
    assert!(
        wait_until(
            || {
                scheduler.process();
                timed_runs.load(Ordering::SeqCst) == 2
            },
            Duration::from_secs(5)
        ),
        "wall-clock resume is dispatched"
    );
    assert_eq!(sink.0.load(Ordering::SeqCst), 0, "no failures reported");
}

#[test]
fn test_producers_on_many_threads() {
    let scheduler = Scheduler::default();
    let ran = Arc::new(AtomicUsize::new(0));

    // Producers submit tick tasks while the host loop runs concurrently.
    let mut producers = Vec::new();
    for _ in 0..4 {
        let scheduler = scheduler.clone();
        let ran = ran.clone();
        producers.push(std::thread::spawn(move || {
            for _ in 0..25 {
                let ran = ran.clone();
                let mut remaining = 2usize;
                scheduler.submit(
                    move || {
                        ran.fetch_add(1, Ordering::SeqCst);
                        remaining -= 1;
                        if remaining == 0 {
                            Schedule::stop()
                        } else {
                            Schedule::next_tick()
                        }
                    },
                    ExecutionType::Sync,
                );
            }
        }));
    }

    let driver = {
        let scheduler = scheduler.clone();
        std::thread::spawn(move || {
            for _ in 0..50 {
                scheduler.process_tick();
                std::thread::sleep(Duration::from_millis(1));
            }
        })
    };

    for producer in producers {
        producer.join().expect("producer thread");
    }
    driver.join().expect("driver thread");

    // Every task ran at submit and once more on a later tick.
    assert!(wait_until(
        || {
            scheduler.process_tick();
            ran.load(Ordering::SeqCst) == 4 * 25 * 2
        },
        Duration::from_secs(5)
    ));
    assert!(scheduler.scheduled_tasks().is_empty());
}
