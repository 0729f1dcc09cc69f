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
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::tasks::schedule::Schedule;
use crate::tasks::scheduler::{Scheduler, SchedulerCore};
use loam_common::tasks::{ExecutionType, SchedulerError, TaskId};

/// The task's control flow: invoked once per execution, returns what the
/// scheduler should do with the task next.
pub(crate) type TaskBody = Box<dyn FnMut() -> Schedule + Send>;

/// A scheduled task record. Logically immutable after creation; the engine
/// moves it between the tick wheel, ready queue, and parked set, but never
/// mutates it. The body mutex exists only because `Async` dispatch runs the
/// body off-thread.
pub(crate) struct ScheduledTask {
    pub(crate) id: TaskId,
    pub(crate) execution_type: ExecutionType,
    pub(crate) body: Mutex<TaskBody>,
    /// Non-owning back-reference; the scheduler outlives its tasks.
    pub(crate) owner: Weak<SchedulerCore>,
}

/// Handle to a scheduled task. Cheap to clone; value-equivalent by task id.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) task: Arc<ScheduledTask>,
}

impl TaskHandle {
    pub fn task_id(&self) -> TaskId {
        self.task.id
    }

    pub fn execution_type(&self) -> ExecutionType {
        self.task.execution_type
    }

    /// The scheduler this task belongs to, if it is still around.
    pub fn owner(&self) -> Option<Scheduler> {
        self.task.owner.upgrade().map(Scheduler::from_core)
    }

    /// Pull the task out of the parked set and dispatch it immediately.
    ///
    /// Fails with `TaskNotParked` if the task is not currently parked.
    pub fn unpark(&self) -> Result<(), SchedulerError> {
        let core = self
            .task
            .owner
            .upgrade()
            .ok_or(SchedulerError::SchedulerShutdown)?;
        core.unpark_task(&self.task)
    }

    /// Unregister the task. Its liveness bit is cleared exactly once; any
    /// residue in the tick wheel, timer, or parked set is discarded at
    /// dispatch. A second stop fails with `TaskNotScheduled`.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        let core = self
            .task
            .owner
            .upgrade()
            .ok_or(SchedulerError::SchedulerShutdown)?;
        core.stop_task(self.task.id)
    }

    pub fn is_alive(&self) -> bool {
        match self.task.owner.upgrade() {
            Some(core) => core.is_alive(self.task.id),
            None => false,
        }
    }
}

impl Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("task_id", &self.task.id)
            .field("execution_type", &self.task.execution_type)
            .finish()
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.task.id == other.task.id
    }
}

impl Eq for TaskHandle {}

impl Hash for TaskHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.task.id.hash(state);
    }
}
