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

use std::fmt::Debug;
use std::time::Duration;

use thiserror::Error;

use loam_common::tasks::{SchedulerError, TaskFailure};

/// What a task asks the scheduler to do with it next. Returned by the task
/// body on every execution; the body is the task's control flow.
///
/// The variant set is closed and validated at construction, so a `Schedule`
/// in hand is always interpretable.
pub struct Schedule(pub(crate) ScheduleKind);

#[derive(Debug)]
pub(crate) enum ScheduleKind {
    /// Resume once the wall-clock duration has elapsed.
    Duration(Duration),
    /// Resume `n` ticks past the current tick. Always >= 1.
    Tick(u64),
    /// Resume when the completion signal fires successfully.
    Future(Completion),
    /// Move to the parked set until externally unparked.
    Park,
    /// Terminal. Unregister from the scheduler.
    Stop,
}

impl Schedule {
    /// Resume after `duration` of wall-clock time.
    pub fn duration(duration: Duration) -> Self {
        Self(ScheduleKind::Duration(duration))
    }

    /// Resume `ticks` ticks from now. Fails for a zero delta, which would
    /// target the tick currently being processed.
    pub fn tick(ticks: u64) -> Result<Self, SchedulerError> {
        if ticks == 0 {
            return Err(SchedulerError::InvalidTickDelay(ticks));
        }
        Ok(Self(ScheduleKind::Tick(ticks)))
    }

    /// Resume on the next tick.
    pub fn next_tick() -> Self {
        Self(ScheduleKind::Tick(1))
    }

    /// Resume when `completion` fires successfully. If it fails (or its
    /// handle is dropped unresolved), the failure goes to the scheduler's
    /// failure sink and the task is left registered but quiescent.
    pub fn future(completion: Completion) -> Self {
        Self(ScheduleKind::Future(completion))
    }

    /// Move to the parked set; stay there until an external unpark.
    pub fn park() -> Self {
        Self(ScheduleKind::Park)
    }

    /// Terminal: unregister the task.
    pub fn stop() -> Self {
        Self(ScheduleKind::Stop)
    }
}

impl Debug for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The result an external completion signal resolves to.
pub(crate) type CompletionResult = Result<(), TaskFailure>;

/// One-shot external completion signal a task can suspend on: the task side
/// of a [`Completion::pair`]. Hand it back to the scheduler with
/// [`Schedule::future`].
pub struct Completion {
    receiver: flume::Receiver<CompletionResult>,
}

impl Completion {
    /// Create a linked (handle, completion) pair.
    pub fn pair() -> (CompletionHandle, Completion) {
        let (sender, receiver) = flume::bounded(1);
        (CompletionHandle { sender }, Completion { receiver })
    }

    pub(crate) fn receiver(&self) -> &flume::Receiver<CompletionResult> {
        &self.receiver
    }
}

impl Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion").finish_non_exhaustive()
    }
}

/// The firing side of a completion signal. Resolve it exactly once with
/// [`complete`](Self::complete) or [`fail`](Self::fail); dropping it
/// unresolved counts as a failure.
pub struct CompletionHandle {
    sender: flume::Sender<CompletionResult>,
}

impl CompletionHandle {
    /// Resolve successfully; the waiting task is re-dispatched.
    pub fn complete(self) {
        let _ = self.sender.send(Ok(()));
    }

    /// Resolve with a failure; it is forwarded to the failure sink and the
    /// waiting task is not re-dispatched.
    pub fn fail(self, error: TaskFailure) {
        let _ = self.sender.send(Err(error));
    }
}

/// Reported to the failure sink when a completion handle is dropped without
/// ever being resolved.
#[derive(Debug, Error)]
#[error("Completion signal dropped without resolving")]
pub struct CompletionAborted;
