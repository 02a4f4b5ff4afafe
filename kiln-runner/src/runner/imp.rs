// Copyright (c) The kiln Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The concurrent scheduler.
//!
//! Dispatch unit is one suite. Suites are distributed over a bounded worker
//! pool; each worker owns its own execution-state lineage and streams
//! results back through a single shared FIFO channel read by the dispatcher.
//! Only that channel and the two atomic flags cross worker boundaries;
//! everything else is worker-local and reset per fork.

use crate::{
    config::RunConfig,
    errors::{TestRunnerBuildError, TestRunnerExecuteErrors},
    list::TestList,
    reporter::{
        BrokenSuite, SuiteFailure,
        events::{RunStats, TestEvent},
    },
    runner::{DispatcherContext, ExecutorEvent, SuiteRunner},
    vm::ExecutionEngine,
};
use async_scoped::TokioScope;
use futures::prelude::*;
use std::{
    convert::Infallible,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::{
    runtime::Runtime,
    sync::{broadcast, mpsc::unbounded_channel},
    task::JoinError,
};
use tracing::debug;

/// Test runner options.
#[derive(Debug, Default)]
pub struct TestRunnerBuilder {
    workers: Option<usize>,
    exit_first: Option<bool>,
}

impl TestRunnerBuilder {
    /// Overrides the number of concurrent suite workers.
    pub fn set_workers(&mut self, workers: usize) -> &mut Self {
        self.workers = Some(workers.max(1));
        self
    }

    /// Overrides exit-on-first-failure.
    pub fn set_exit_first(&mut self, exit_first: bool) -> &mut Self {
        self.exit_first = Some(exit_first);
        self
    }

    /// Creates a new test runner over a resolved test list.
    pub fn build<'a>(
        self,
        engine: Arc<dyn ExecutionEngine>,
        test_list: &'a TestList,
        config: RunConfig,
    ) -> Result<TestRunner<'a>, TestRunnerBuildError> {
        let workers = self
            .workers
            .unwrap_or_else(|| config.test_workers.compute());
        let exit_first = self.exit_first.unwrap_or(config.exit_first);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("kiln-runner-worker")
            .build()
            .map_err(TestRunnerBuildError::TokioRuntimeCreate)?;

        Ok(TestRunner {
            inner: TestRunnerInner {
                engine,
                config,
                workers,
                exit_first,
                test_list,
                runtime,
            },
        })
    }
}

/// Context for running tests.
///
/// Created using [`TestRunnerBuilder::build`].
pub struct TestRunner<'a> {
    inner: TestRunnerInner<'a>,
}

impl<'a> TestRunner<'a> {
    /// Executes the listed tests.
    ///
    /// The callback is called with every event of the run, in stream order.
    pub fn execute<F>(self, mut callback: F) -> Result<RunStats, TestRunnerExecuteErrors<Infallible>>
    where
        F: FnMut(TestEvent) + Send,
    {
        self.try_execute::<Infallible, _>(move |event| {
            callback(event);
            Ok(())
        })
    }

    /// Executes the listed tests with a fallible reporting callback.
    ///
    /// If the callback returns an error, the run is cancelled cooperatively
    /// and the first error is returned once the run has wound down.
    pub fn try_execute<E, F>(
        self,
        mut callback: F,
    ) -> Result<RunStats, TestRunnerExecuteErrors<E>>
    where
        F: FnMut(TestEvent) -> Result<(), E> + Send,
        E: fmt::Debug + Send,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let any_failed = Arc::new(AtomicBool::new(false));

        let mut first_error = None;
        let (run_stats, fault, join_errors) = {
            let callback_cancelled = Arc::clone(&cancelled);
            let first_error = &mut first_error;
            let wrapped = move |event: TestEvent| {
                if let Err(error) = callback(event) {
                    // Keep reporting in case the callback recovers, but wind
                    // the run down.
                    if first_error.is_none() {
                        *first_error = Some(error);
                    }
                    callback_cancelled.store(true, Ordering::Release);
                }
            };

            let mut dispatcher_cx = DispatcherContext::new(
                wrapped,
                self.inner.test_list.run_count(),
                self.inner.exit_first,
            );
            dispatcher_cx.run_started(self.inner.test_list);

            let join_errors = self
                .inner
                .execute(&mut dispatcher_cx, &cancelled, &any_failed);

            dispatcher_cx.run_finished();
            (
                dispatcher_cx.run_stats(),
                dispatcher_cx.fault().cloned(),
                join_errors,
            )
        };

        // Shut the runtime down aggressively; detached blocking workers are
        // abandoned rather than awaited.
        self.inner.runtime.shutdown_background();

        if first_error.is_none() && fault.is_none() && join_errors.is_empty() {
            Ok(run_stats)
        } else {
            Err(TestRunnerExecuteErrors {
                report_error: first_error,
                fault,
                join_errors,
            })
        }
    }
}

struct TestRunnerInner<'a> {
    engine: Arc<dyn ExecutionEngine>,
    config: RunConfig,
    workers: usize,
    exit_first: bool,
    test_list: &'a TestList,
    runtime: Runtime,
}

impl TestRunnerInner<'_> {
    fn execute<F>(
        &self,
        dispatcher_cx: &mut DispatcherContext<F>,
        cancelled: &Arc<AtomicBool>,
        any_failed: &Arc<AtomicBool>,
    ) -> Vec<JoinError>
    where
        F: FnMut(TestEvent) + Send,
    {
        let _guard = self.runtime.enter();

        let ((), results) = TokioScope::scope_and_block(|scope| {
            let (resp_tx, resp_rx) = unbounded_channel::<ExecutorEvent>();
            let (cancel_tx, _cancel_rx) = broadcast::channel::<()>(1);

            let dispatcher_fut = dispatcher_cx.run(
                resp_rx,
                cancelled.as_ref(),
                any_failed.as_ref(),
                cancel_tx.clone(),
            );
            scope.spawn_cancellable(dispatcher_fut, || ());

            let suites = self.test_list.suites.clone();
            debug!(
                suites = suites.len(),
                workers = self.workers,
                "dispatching suites to the worker pool"
            );

            let engine = Arc::clone(&self.engine);
            let config = self.config.clone();
            let exit_first = self.exit_first;
            let run_cancelled = Arc::clone(cancelled);
            let run_any_failed = Arc::clone(any_failed);

            let run_fut = stream::iter(suites)
                .map(move |suite| {
                    let resp_tx = resp_tx.clone();
                    let engine = Arc::clone(&engine);
                    let config = config.clone();
                    let cancelled = Arc::clone(&run_cancelled);
                    let any_failed = Arc::clone(&run_any_failed);
                    let mut cancel_rx = cancel_tx.subscribe();

                    async move {
                        if cancelled.load(Ordering::Acquire) {
                            debug!(suite = %suite.suite_path, "run cancelled; suite not started");
                            return;
                        }

                        let worker_suite = suite.clone();
                        let worker_tx = resp_tx.clone();
                        let worker_cancelled = Arc::clone(&cancelled);
                        let worker_any_failed = Arc::clone(&any_failed);
                        let join = tokio::task::spawn_blocking(move || {
                            SuiteRunner::new(engine, config, exit_first).run_suite(
                                &worker_suite,
                                &worker_cancelled,
                                &worker_any_failed,
                                &worker_tx,
                            );
                        });

                        tokio::select! {
                            joined = join => {
                                if let Err(error) = joined {
                                    // Panics are caught inside the worker, so
                                    // anything surfacing here lost its context
                                    // on the way out.
                                    let _ = resp_tx.send(ExecutorEvent::SuiteBroken {
                                        broken: BrokenSuite {
                                            suite_path: suite.suite_path.clone(),
                                            test_case_names: suite.case_names(),
                                            failure: SuiteFailure::Unexpected {
                                                message: format!("worker task failed: {error}"),
                                                trace: String::new(),
                                            },
                                        },
                                    });
                                }
                            }
                            _ = cancel_rx.recv() => {
                                debug!(
                                    suite = %suite.suite_path,
                                    "cancellation received; abandoning in-flight suite"
                                );
                            }
                        }
                    }
                })
                .buffer_unordered(self.workers)
                .collect::<Vec<()>>();
            scope.spawn_cancellable(run_fut.map(|_| ()), || ());
        });

        results.into_iter().filter_map(Result::err).collect()
    }
}
