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

//! The wall-clock timer service: a dedicated thread that turns
//! duration-suspended tasks back into ready-queue entries once their
//! deadline passes. The wheel itself tracks bare ids; the task records wait
//! in an in-flight map until their entry expires.

use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHasher;
use flume::{Receiver, RecvTimeoutError, Sender};
use hierarchical_hash_wheel_timer::wheels::{
    quad_wheel::{PruneDecision, QuadWheelWithOverflow},
    TimerEntryWithDelay,
};
use minstant::Instant;
use thiserror::Error;
use tracing::{debug, error, trace};

use crate::tasks::task::ScheduledTask;
use loam_common::tasks::{FailureSink, TaskId};

/// Asks the timer thread to deliver `task` to the ready queue once
/// `wake_time` has passed.
pub(crate) struct TimerRequest {
    pub(crate) task: Arc<ScheduledTask>,
    pub(crate) wake_time: Instant,
}

/// What rides in the wheel: an id and the delay it was armed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimerEntry {
    task_id: TaskId,
    delay: Duration,
}

impl TimerEntryWithDelay for TimerEntry {
    fn delay(&self) -> Duration {
        self.delay
    }
}

#[derive(Debug, Error)]
#[error("Could not arm wall-clock timer for task {task_id}")]
struct TimerAdmissionFailed {
    task_id: TaskId,
}

/// Producer side of the timer thread's channels.
#[derive(Clone)]
pub(crate) struct TimerThreadHandle {
    request_sender: Sender<TimerRequest>,
    poke_sender: Sender<()>,
}

impl TimerThreadHandle {
    /// Arm a timer that delivers the task to the ready queue at `wake_time`.
    /// Also pokes the timer thread so near deadlines are admitted immediately.
    pub(crate) fn schedule(&self, task: Arc<ScheduledTask>, wake_time: Instant) {
        let task_id = task.id;
        if self
            .request_sender
            .send(TimerRequest { task, wake_time })
            .is_err()
        {
            error!(task_id, "Failed to send timer request - timer thread dead?");
            return;
        }
        let _ = self.poke_sender.send(());
    }
}

/// Spawns the timer thread and returns a handle for arming timers. The thread
/// exits when the handle (and with it the poke channel) is dropped.
pub(crate) fn spawn_timer_thread(
    ready_sender: Sender<Arc<ScheduledTask>>,
    resolution: Duration,
    sink: Arc<dyn FailureSink>,
) -> TimerThreadHandle {
    let (request_sender, request_receiver) = flume::unbounded();
    let (poke_sender, poke_receiver) = flume::unbounded();

    std::thread::Builder::new()
        .name("loam-timer".to_string())
        .spawn(move || {
            TimerThread {
                requests: request_receiver,
                pokes: poke_receiver,
                ready: ready_sender,
                sink,
                wheel: QuadWheelWithOverflow::new(|_| PruneDecision::Keep),
                in_flight: HashMap::default(),
                wheel_time: Instant::now(),
            }
            .run(resolution);
        })
        .expect("Failed to spawn timer thread");

    TimerThreadHandle {
        request_sender,
        poke_sender,
    }
}

struct TimerThread {
    requests: Receiver<TimerRequest>,
    pokes: Receiver<()>,
    ready: Sender<Arc<ScheduledTask>>,
    sink: Arc<dyn FailureSink>,
    wheel: QuadWheelWithOverflow<TimerEntry>,
    /// Records whose wheel entry has not expired yet, keyed by id.
    in_flight: HashMap<TaskId, Arc<ScheduledTask>, BuildHasherDefault<AHasher>>,
    /// How far the wheel has been advanced; trails wall time by under one
    /// millisecond between rounds.
    wheel_time: Instant,
}

impl TimerThread {
    fn run(mut self, resolution: Duration) {
        debug!("Timer thread running");
        loop {
            // Sleep until poked or one resolution interval elapses. Either
            // way, admit whatever arrived and catch the wheel up.
            match self.pokes.recv_timeout(resolution) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Scheduler dropped, timer thread exiting");
                    return;
                }
            }
            if self.admit_requests().is_err() || self.advance_wheel().is_err() {
                debug!("Ready queue gone, timer thread exiting");
                return;
            }
        }
    }

    /// Pull in every queued arm request. Deadlines already in the past skip
    /// the wheel and go straight to the ready queue; the rest get a wheel
    /// entry and park their record in `in_flight`. Err means the ready queue
    /// has closed underneath us.
    fn admit_requests(&mut self) -> Result<(), ()> {
        while let Ok(TimerRequest { task, wake_time }) = self.requests.try_recv() {
            let now = Instant::now();
            if wake_time <= now {
                self.ready.send(task).map_err(|_| ())?;
                continue;
            }
            let delay = wake_time.duration_since(now);
            let entry = TimerEntry {
                task_id: task.id,
                delay,
            };
            match self.wheel.insert_with_delay(entry, delay) {
                Ok(_) => {
                    self.in_flight.insert(task.id, task);
                }
                Err(e) => {
                    error!(?e, task_id = task.id, "Failed to insert timer");
                    self.sink
                        .report(task.id, Box::new(TimerAdmissionFailed { task_id: task.id }));
                }
            }
        }
        Ok(())
    }

    /// Catch the wheel up to wall time, one millisecond per tick, handing
    /// each expired entry's record to the ready queue.
    fn advance_wheel(&mut self) -> Result<(), ()> {
        let behind = Instant::now().duration_since(self.wheel_time).as_millis() as u64;
        for _ in 0..behind {
            for entry in self.wheel.tick() {
                trace!(task_id = entry.task_id, "Timer expired");
                // Nothing in flight for an id means its record was already
                // delivered by the fast path above; the entry is stale.
                if let Some(task) = self.in_flight.remove(&entry.task_id) {
                    self.ready.send(task).map_err(|_| ())?;
                }
            }
        }
        self.wheel_time += Duration::from_millis(behind);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::schedule::Schedule;
    use loam_common::tasks::{ExecutionType, NoopFailureSink};
    use parking_lot::Mutex;
    use std::sync::Weak;

    fn test_task(id: TaskId) -> Arc<ScheduledTask> {
        Arc::new(ScheduledTask {
            id,
            execution_type: ExecutionType::Sync,
            body: Mutex::new(Box::new(Schedule::stop)),
            owner: Weak::new(),
        })
    }

    #[test]
    fn test_past_deadline_delivers_immediately() {
        let (ready_sender, ready_receiver) = flume::unbounded();
        let handle = spawn_timer_thread(
            ready_sender,
            Duration::from_millis(1),
            Arc::new(NoopFailureSink),
        );

        handle.schedule(test_task(42), Instant::now());

        let task = ready_receiver
            .recv_timeout(Duration::from_millis(500))
            .expect("past-deadline task reaches the ready queue");
        assert_eq!(task.id, 42);
    }

    #[test]
    fn test_future_deadline_waits_for_expiry() {
        let (ready_sender, ready_receiver) = flume::unbounded();
        let handle = spawn_timer_thread(
            ready_sender,
            Duration::from_millis(1),
            Arc::new(NoopFailureSink),
        );

        handle.schedule(test_task(123), Instant::now() + Duration::from_millis(50));

        assert!(
            ready_receiver.recv_timeout(Duration::from_millis(5)).is_err(),
            "nothing delivered ahead of the deadline"
        );

        let task = ready_receiver
            .recv_timeout(Duration::from_secs(5))
            .expect("expired task reaches the ready queue");
        assert_eq!(task.id, 123);
    }
}
