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

use crate::tasks::TaskId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// Tick deadlines are relative and strictly positive; a zero delta would
    /// re-run in the same processing pass, forever.
    #[error("Tick delay must be greater than 0 ({0})")]
    InvalidTickDelay(u64),
    #[error("Task is not parked: {0:?}")]
    TaskNotParked(TaskId),
    #[error("Task is not scheduled: {0:?}")]
    TaskNotScheduled(TaskId),
    #[error("Scheduler has shut down")]
    SchedulerShutdown,
}
