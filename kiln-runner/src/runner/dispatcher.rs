// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The coordinator side of the scheduler.
//!
//! The dispatcher drains the shared result channel, keeps run statistics,
//! forwards events to the reporting callback, and coordinates exit-first
//! cancellation. Its channel read carries a large fixed timeout purely as a
//! deadlock safety net: exceeding it is an unrecoverable scheduler fault,
//! not a test failure.

use crate::{
    errors::SchedulerFault,
    list::TestList,
    reporter::{
        BrokenSuite, TestResult,
        events::{RunStats, TestEvent, TestEventKind},
    },
    time::{StopwatchStart, stopwatch},
};
use chrono::Local;
use debug_ignore::DebugIgnore;
use kiln_metadata::TestCaseId;
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::{
    sync::{broadcast, mpsc::UnboundedReceiver},
    time::timeout,
};
use tracing::{debug, warn};

/// Deadlock safety net on the result channel.
pub(crate) const RESULT_CHANNEL_TIMEOUT: Duration = Duration::from_secs(300);

/// An event sent from a suite worker to the dispatcher.
#[derive(Clone, Debug)]
pub(crate) enum ExecutorEvent {
    CaseStarted { id: TestCaseId },
    CaseFinished { result: TestResult },
    SuiteBroken { broken: BrokenSuite },
}

/// Context for the dispatcher.
pub(crate) struct DispatcherContext<F> {
    callback: DebugIgnore<F>,
    stopwatch: StopwatchStart,
    run_stats: RunStats,
    exit_first: bool,
    cancel_sent: bool,
    fault: Option<SchedulerFault>,
}

impl<F> DispatcherContext<F>
where
    F: FnMut(TestEvent) + Send,
{
    pub(crate) fn new(callback: F, initial_run_count: usize, exit_first: bool) -> Self {
        Self {
            callback: DebugIgnore(callback),
            stopwatch: stopwatch(),
            run_stats: RunStats {
                initial_run_count,
                ..RunStats::default()
            },
            exit_first,
            cancel_sent: false,
            fault: None,
        }
    }

    /// Emits the initial event.
    pub(crate) fn run_started(&mut self, test_list: &TestList) {
        let event = TestEvent {
            timestamp: self.stopwatch.start_time(),
            elapsed: Duration::ZERO,
            kind: TestEventKind::RunStarted {
                test_count: test_list.run_count(),
                suite_count: test_list.suite_count(),
            },
        };
        (self.callback.0)(event);
    }

    /// Drains the result channel to completion (or to the safety-net
    /// timeout). Expected to be spawned as a task via `async_scoped`.
    pub(crate) async fn run(
        &mut self,
        mut executor_rx: UnboundedReceiver<ExecutorEvent>,
        cancelled: &AtomicBool,
        any_failed: &AtomicBool,
        cancellation_sender: broadcast::Sender<()>,
    ) {
        loop {
            match timeout(RESULT_CHANNEL_TIMEOUT, executor_rx.recv()).await {
                Ok(Some(event)) => {
                    self.handle_event(event, cancelled, any_failed, &cancellation_sender);
                }
                Ok(None) => {
                    // Every worker dropped its sender: the run is drained.
                    break;
                }
                Err(_elapsed) => {
                    warn!(
                        timeout = ?RESULT_CHANNEL_TIMEOUT,
                        "result channel went silent; treating as a scheduler fault"
                    );
                    self.fault = Some(SchedulerFault::ResultChannelTimedOut {
                        timeout: RESULT_CHANNEL_TIMEOUT,
                    });
                    cancelled.store(true, Ordering::Release);
                    let _ = cancellation_sender.send(());
                    break;
                }
            }
        }
    }

    fn handle_event(
        &mut self,
        event: ExecutorEvent,
        cancelled: &AtomicBool,
        any_failed: &AtomicBool,
        cancellation_sender: &broadcast::Sender<()>,
    ) {
        match event {
            ExecutorEvent::CaseStarted { id } => {
                self.emit(TestEventKind::CaseStarted { id });
            }
            ExecutorEvent::CaseFinished { result } => {
                self.run_stats.on_case_result(&result);
                if !result.is_passing() {
                    any_failed.store(true, Ordering::Release);
                    self.maybe_cancel(cancelled, cancellation_sender);
                }
                self.emit(TestEventKind::CaseFinished {
                    result,
                    current_stats: self.run_stats,
                });
            }
            ExecutorEvent::SuiteBroken { broken } => {
                self.run_stats.on_broken_suite(&broken);
                any_failed.store(true, Ordering::Release);
                self.maybe_cancel(cancelled, cancellation_sender);
                self.emit(TestEventKind::SuiteBroken {
                    broken,
                    current_stats: self.run_stats,
                });
            }
        }
    }

    fn maybe_cancel(&mut self, cancelled: &AtomicBool, cancellation_sender: &broadcast::Sender<()>) {
        if self.exit_first && !self.cancel_sent {
            debug!("exit-first: cancelling remaining work");
            self.cancel_sent = true;
            cancelled.store(true, Ordering::Release);
            // Receivers may already be gone; that only means there is
            // nothing left to interrupt.
            let _ = cancellation_sender.send(());
        }
    }

    /// Emits the final event.
    pub(crate) fn run_finished(&mut self) {
        let stats = self.run_stats;
        self.emit(TestEventKind::RunFinished { stats });
    }

    fn emit(&mut self, kind: TestEventKind) {
        let event = TestEvent {
            timestamp: Local::now(),
            elapsed: self.stopwatch.snapshot().duration,
            kind,
        };
        (self.callback.0)(event);
    }

    pub(crate) fn run_stats(&self) -> RunStats {
        self.run_stats
    }

    pub(crate) fn fault(&self) -> Option<&SchedulerFault> {
        self.fault.as_ref()
    }
}
