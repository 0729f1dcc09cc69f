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

//! The scheduler engine: submission, tick/time processing, dispatch, and the
//! liveness registry tying them together.

use std::collections::{BTreeMap, HashMap};
use std::hash::BuildHasherDefault;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use ahash::AHasher;
use minstant::Instant;
use parking_lot::{Mutex, RwLock};
use rayon::ThreadPool;
use tracing::{debug, error, trace};

use crate::config::SchedulerConfig;
use crate::tasks::completion_monitor::{spawn_completion_monitor, CompletionMonitorHandle};
use crate::tasks::schedule::{Schedule, ScheduleKind};
use crate::tasks::task::{ScheduledTask, TaskHandle};
use crate::tasks::timer_thread::{spawn_timer_thread, TimerThreadHandle};
use loam_common::tasks::{ExecutionType, FailureSink, SchedulerError, TaskId, TracingFailureSink};
use loam_common::util::Bitset;

/// Task ids are process-wide unique and never reused, which is what makes the
/// liveness bitmap sound: a cleared bit can never be set again for that id.
static TASK_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// The engine. Cheap to clone; all clones share one core. There should be one
/// scheduler per simulation.
///
/// Producers on any thread may submit tasks and mutate liveness; the host
/// loop drives [`process`](Self::process) / [`process_tick`](Self::process_tick)
/// from its tick cadence.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

/// Live-task registry: membership map plus the liveness bitmap, mutated
/// jointly under the writer lock so one is never observed without the other.
struct TaskRegistry {
    tasks: HashMap<TaskId, Arc<ScheduledTask>, BuildHasherDefault<AHasher>>,
    live: Bitset,
}

pub(crate) struct SchedulerCore {
    registry: RwLock<TaskRegistry>,
    /// Absolute tick -> tasks waiting on that tick, insertion-ordered within
    /// a bucket. Held only across insert/remove, never across dispatch.
    tick_wheel: Mutex<BTreeMap<u64, Vec<Arc<ScheduledTask>>>>,
    /// Consumer end of the MPSC ready queue. The producing senders live with
    /// the timer thread; the queue drains FIFO on each processing pass.
    ready_rx: flume::Receiver<Arc<ScheduledTask>>,
    /// Tasks awaiting an external unpark.
    parked: papaya::HashMap<TaskId, Arc<ScheduledTask>>,
    tick: AtomicU64,
    /// Serializes processing passes. Held for the whole pass, so calling
    /// `process` from inside a Sync task body deadlocks: contract violation.
    process_guard: Mutex<()>,
    timer: TimerThreadHandle,
    completions: CompletionMonitorHandle,
    workers: ThreadPool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, sink: Arc<dyn FailureSink>) -> Self {
        let (ready_tx, ready_rx) = flume::unbounded();

        let num_threads = config.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(8)
        });
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("loam-task-pool-{i}"))
            .panic_handler(|payload| {
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %msg, "Async task body panicked");
            })
            .build()
            .expect("Failed to create worker pool");

        let timer = spawn_timer_thread(ready_tx, config.timer_resolution, sink.clone());

        let core = Arc::new_cyclic(|weak: &Weak<SchedulerCore>| {
            let completions = spawn_completion_monitor(weak.clone(), sink);
            SchedulerCore {
                registry: RwLock::new(TaskRegistry {
                    tasks: Default::default(),
                    live: Bitset::new(),
                }),
                tick_wheel: Mutex::new(BTreeMap::new()),
                ready_rx,
                parked: papaya::HashMap::new(),
                tick: AtomicU64::new(0),
                process_guard: Mutex::new(()),
                timer,
                completions,
                workers,
            }
        });

        Self { core }
    }

    pub(crate) fn from_core(core: Arc<SchedulerCore>) -> Self {
        Self { core }
    }

    /// Register a task and dispatch its immediate first execution under the
    /// chosen mode. The body is invoked once right away; the schedule it
    /// returns decides everything after that.
    pub fn submit<F>(&self, body: F, execution_type: ExecutionType) -> TaskHandle
    where
        F: FnMut() -> Schedule + Send + 'static,
    {
        let id = TASK_COUNTER.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(ScheduledTask {
            id,
            execution_type,
            body: Mutex::new(Box::new(body)),
            owner: Arc::downgrade(&self.core),
        });
        {
            let mut registry = self.core.registry.write();
            registry.live.set(id);
            registry.tasks.insert(id, task.clone());
        }
        trace!(task_id = id, %execution_type, "Submitted task");
        self.core.execute(&task);
        TaskHandle { task }
    }

    /// Process pending work against the current tick state without advancing
    /// it. Can be used to increase scheduling precision between ticks.
    pub fn process(&self) {
        self.core.process_pass(self.core.tick.load(Ordering::SeqCst));
    }

    /// Advance one tick, then process.
    pub fn process_tick(&self) {
        let tick = self.core.tick.fetch_add(1, Ordering::SeqCst) + 1;
        self.core.process_pass(tick);
    }

    pub fn current_tick(&self) -> u64 {
        self.core.tick.load(Ordering::SeqCst)
    }

    /// Weakly-consistent snapshot of the live task set. Submits and stops
    /// racing this call may or may not appear.
    pub fn scheduled_tasks(&self) -> Vec<TaskHandle> {
        let registry = self.core.registry.read();
        registry
            .tasks
            .values()
            .map(|task| TaskHandle { task: task.clone() })
            .collect()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default(), Arc::new(TracingFailureSink))
    }
}

impl SchedulerCore {
    /// One processing pass: drain tick-wheel buckets due at or before `tick`
    /// in ascending key order, then drain the ready queue FIFO. Tasks that
    /// re-schedule themselves during the pass land strictly in the future
    /// (`Tick(n >= 1)` targets past `tick`), so the pass terminates.
    fn process_pass(self: &Arc<Self>, tick: u64) {
        let _pass = self.process_guard.lock();

        loop {
            // Take the earliest due bucket with the wheel unlocked during
            // dispatch, so bodies can re-schedule without deadlock.
            let bucket = {
                let mut wheel = self.tick_wheel.lock();
                match wheel.first_key_value() {
                    Some((&key, _)) if key <= tick => wheel.pop_first().map(|(_, bucket)| bucket),
                    _ => None,
                }
            };
            let Some(bucket) = bucket else {
                break;
            };
            for task in bucket {
                self.execute(&task);
            }
        }

        while let Ok(task) = self.ready_rx.try_recv() {
            self.execute(&task);
        }
    }

    pub(crate) fn is_alive(&self, task_id: TaskId) -> bool {
        self.registry.read().live.check(task_id)
    }

    /// Dispatch: dead tasks are dropped silently; live ones run their body
    /// under their execution mode and have the returned schedule interpreted.
    pub(crate) fn execute(self: &Arc<Self>, task: &Arc<ScheduledTask>) {
        if !self.is_alive(task.id) {
            return;
        }
        match task.execution_type {
            ExecutionType::Sync => self.run_body(task),
            ExecutionType::Async => {
                let core = self.clone();
                let task = task.clone();
                self.workers.spawn(move || core.run_body(&task));
            }
        }
    }

    /// Consult the body exactly once, then place the task per the returned
    /// schedule. Never loops on the same task within one dispatch.
    fn run_body(self: &Arc<Self>, task: &Arc<ScheduledTask>) {
        let schedule = {
            let mut body = task.body.lock();
            (*body)()
        };
        match schedule.0 {
            ScheduleKind::Duration(duration) => {
                self.timer.schedule(task.clone(), Instant::now() + duration);
            }
            ScheduleKind::Tick(ticks) => {
                let target = self.tick.load(Ordering::SeqCst) + ticks;
                self.tick_wheel
                    .lock()
                    .entry(target)
                    .or_default()
                    .push(task.clone());
            }
            ScheduleKind::Future(completion) => {
                self.completions.watch(task.clone(), completion);
            }
            ScheduleKind::Park => {
                let guard = self.parked.guard();
                self.parked.insert(task.id, task.clone(), &guard);
            }
            ScheduleKind::Stop => {
                // A racing external stop() may have unregistered it already.
                if self.stop_task(task.id).is_err() {
                    debug!(task_id = task.id, "Task was stopped while its body ran");
                }
            }
        }
    }

    pub(crate) fn stop_task(&self, task_id: TaskId) -> Result<(), SchedulerError> {
        let mut registry = self.registry.write();
        if registry.tasks.remove(&task_id).is_none() {
            return Err(SchedulerError::TaskNotScheduled(task_id));
        }
        registry.live.unset(task_id);
        trace!(task_id, "Stopped task");
        Ok(())
    }

    pub(crate) fn unpark_task(
        self: &Arc<Self>,
        task: &Arc<ScheduledTask>,
    ) -> Result<(), SchedulerError> {
        {
            let guard = self.parked.guard();
            if self.parked.remove(&task.id, &guard).is_none() {
                return Err(SchedulerError::TaskNotParked(task.id));
            }
        }
        self.execute(task);
        Ok(())
    }
}
