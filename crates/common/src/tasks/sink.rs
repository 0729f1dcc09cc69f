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

use tracing::error;

use crate::tasks::TaskId;

/// Error payload delivered out-of-band to a failure sink.
pub type TaskFailure = Box<dyn std::error::Error + Send + Sync>;

/// Consumes task failures that have no calling context to propagate through:
/// completion-signal failures and timer-service internals. Body failures on
/// the sync and async paths do not come here; they propagate through the host
/// loop or the worker pool respectively.
pub trait FailureSink: Send + Sync {
    fn report(&self, task_id: TaskId, error: TaskFailure);
}

/// The default sink. Emits a structured error event and drops the failure.
pub struct TracingFailureSink;

impl FailureSink for TracingFailureSink {
    fn report(&self, task_id: TaskId, error: TaskFailure) {
        error!(task_id, error = %error, "Unhandled task failure");
    }
}

/// Swallows failures entirely. For tests and embedders that account for
/// failures some other way.
pub struct NoopFailureSink;

impl FailureSink for NoopFailureSink {
    fn report(&self, _task_id: TaskId, _error: TaskFailure) {}
}
