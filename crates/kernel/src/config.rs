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

//! Config is created by the host and passed into the scheduler at
//! construction. Holds things typically configured by CLI flags.

use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Number of worker threads for `Async` task dispatch. `None` uses the
    /// machine's available parallelism.
    pub workers: Option<usize>,
    /// How long the timer thread parks between wheel advances when it is not
    /// poked. Bounds the latency of wall-clock wakeups.
    pub timer_resolution: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: None,
            timer_resolution: Duration::from_millis(1),
        }
    }
}
