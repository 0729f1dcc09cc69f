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

//! Completion monitoring: a dedicated thread multiplexing the completion
//! signals of `Future`-suspended tasks. Success re-dispatches the task
//! immediately; failure goes to the failure sink and the task stays
//! quiescent.

use std::sync::{Arc, Weak};

use flume::{Receiver, RecvError, Sender};
use tracing::{debug, error};

use crate::tasks::schedule::{Completion, CompletionAborted, CompletionResult};
use crate::tasks::scheduler::SchedulerCore;
use crate::tasks::task::ScheduledTask;
use loam_common::tasks::FailureSink;

/// A task suspended on its completion signal.
struct CompletionWatch {
    task: Arc<ScheduledTask>,
    completion: Completion,
}

/// Handle for registering watches with the monitor thread.
#[derive(Clone)]
pub(crate) struct CompletionMonitorHandle {
    watch_sender: Sender<CompletionWatch>,
}

impl CompletionMonitorHandle {
    pub(crate) fn watch(&self, task: Arc<ScheduledTask>, completion: Completion) {
        let task_id = task.id;
        if self
            .watch_sender
            .send(CompletionWatch { task, completion })
            .is_err()
        {
            error!(task_id, "Failed to register completion watch - monitor thread dead?");
        }
    }
}

/// Spawns the completion monitor thread. It holds only a weak reference to
/// the scheduler core and exits when the watch channel disconnects (i.e. the
/// scheduler is dropped).
pub(crate) fn spawn_completion_monitor(
    core: Weak<SchedulerCore>,
    sink: Arc<dyn FailureSink>,
) -> CompletionMonitorHandle {
    let (watch_sender, watch_receiver) = flume::unbounded();

    std::thread::Builder::new()
        .name("loam-completions".to_string())
        .spawn(move || {
            completion_monitor_loop(watch_receiver, core, sink);
        })
        .expect("Failed to spawn completion monitor thread");

    CompletionMonitorHandle { watch_sender }
}

enum Event {
    Admit(Result<CompletionWatch, RecvError>),
    Fired(usize, Result<CompletionResult, RecvError>),
}

fn completion_monitor_loop(
    watch_receiver: Receiver<CompletionWatch>,
    core: Weak<SchedulerCore>,
    sink: Arc<dyn FailureSink>,
) {
    let mut watches: Vec<CompletionWatch> = Vec::new();

    debug!("Completion monitor started");

    loop {
        // Select across the admission channel and every pending completion.
        let event = {
            let selector = flume::Selector::new().recv(&watch_receiver, Event::Admit);
            let selector = watches
                .iter()
                .enumerate()
                .fold(selector, |sel, (index, watch)| {
                    sel.recv(watch.completion.receiver(), move |result| {
                        Event::Fired(index, result)
                    })
                });
            selector.wait()
        };

        match event {
            Event::Admit(Ok(watch)) => {
                watches.push(watch);
            }
            Event::Admit(Err(RecvError::Disconnected)) => {
                debug!(
                    abandoned = watches.len(),
                    "Completion monitor shutting down - scheduler dropped"
                );
                break;
            }
            Event::Fired(index, result) => {
                let watch = watches.swap_remove(index);
                match result {
                    Ok(Ok(())) => {
                        if let Some(core) = core.upgrade() {
                            core.execute(&watch.task);
                        }
                    }
                    Ok(Err(failure)) => {
                        sink.report(watch.task.id, failure);
                    }
                    // Handle dropped without resolving.
                    Err(RecvError::Disconnected) => {
                        sink.report(watch.task.id, Box::new(CompletionAborted));
                    }
                }
            }
        }
    }

    debug!("Completion monitor exited");
}
