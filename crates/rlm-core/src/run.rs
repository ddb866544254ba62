//! Run coordinator: owns the flat table of workers spawned for one query
//! tree, supervises them, and propagates crashes down the parent chain.
//!
//! The one rule that keeps this deadlock-free: `Run -> Worker` messages are
//! always one-way (`WorkerHandle::notify`), and the only call that flows
//! the other way, `start_worker`, is a request *into* the Run, never one it
//! issues itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rlm_trace::ids::Clock;
use rlm_trace::{EventBus, RunId, SpanId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::interp::InterpreterAdapter;
use crate::llm::LlmAdapter;
use crate::prompt::SystemPromptTemplates;
use crate::worker::{self, StartWorkerOpts, WorkerHandle, WorkerMsg};

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowStatus {
    Running,
    Done,
    Crashed,
}

struct RunRow {
    parent_span_id: Option<SpanId>,
    status: RowStatus,
    handle: WorkerHandle,
}

pub enum RunMsg {
    StartWorker {
        opts: StartWorkerOpts,
        reply: oneshot::Sender<Result<WorkerHandle, String>>,
    },
    WorkerDone {
        span_id: SpanId,
    },
    ForwardChildResult {
        parent_span_id: SpanId,
        child_span_id: SpanId,
        result: Result<String, String>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct RunHandle {
    tx: mpsc::Sender<RunMsg>,
}

impl RunHandle {
    /// The single synchronous Run operation: request/reply, called by a
    /// Worker wanting to spawn a child.
    pub async fn start_worker(&self, opts: StartWorkerOpts) -> Result<WorkerHandle, String> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(RunMsg::StartWorker { opts, reply: tx })
            .await
            .map_err(|_| "run has shut down".to_string())?;
        rx.await.map_err(|_| "run dropped its reply channel".to_string())?
    }

    pub fn notify_worker_done(&self, span_id: SpanId) {
        let _ = self.tx.try_send(RunMsg::WorkerDone { span_id });
    }

    pub fn forward_child_result(
        &self,
        parent_span_id: SpanId,
        child_span_id: SpanId,
        result: Result<String, String>,
    ) {
        let _ = self.tx.try_send(RunMsg::ForwardChildResult {
            parent_span_id,
            child_span_id,
            result,
        });
    }

    pub fn shutdown(&self) {
        let _ = self.tx.try_send(RunMsg::Shutdown);
    }
}

pub struct Run {
    run_id: RunId,
    config: Config,
    llm: Arc<dyn LlmAdapter>,
    interp: Arc<dyn InterpreterAdapter>,
    templates: Arc<SystemPromptTemplates>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    keep_alive: bool,

    table: HashMap<SpanId, RunRow>,
    workers: JoinSet<SpanId>,
    worker_span_ids: HashMap<tokio::task::Id, SpanId>,
    mailbox: mpsc::Receiver<RunMsg>,
    self_tx: mpsc::Sender<RunMsg>,
}

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    run_id: RunId,
    config: Config,
    llm: Arc<dyn LlmAdapter>,
    interp: Arc<dyn InterpreterAdapter>,
    templates: Arc<SystemPromptTemplates>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    keep_alive: bool,
) -> RunHandle {
    let (tx, rx) = mpsc::channel(128);
    let handle = RunHandle { tx: tx.clone() };

    let run = Run {
        run_id,
        config,
        llm,
        interp,
        templates,
        bus,
        clock,
        keep_alive,
        table: HashMap::new(),
        workers: JoinSet::new(),
        worker_span_ids: HashMap::new(),
        mailbox: rx,
        self_tx: tx,
    };

    tokio::spawn(run.run_loop());
    handle
}

impl Run {
    async fn run_loop(mut self) {
        loop {
            tokio::select! {
                msg = self.mailbox.recv() => {
                    match msg {
                        Some(RunMsg::Shutdown) | None => break,
                        Some(msg) => self.handle_message(msg).await,
                    }
                }
                Some(joined) = self.workers.join_next_with_id(), if !self.workers.is_empty() => {
                    self.handle_worker_exit(joined).await;
                }
            }

            if self.should_auto_shutdown() {
                let self_tx = self.self_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
                    let _ = self_tx.try_send(RunMsg::Shutdown);
                });
            }
        }
    }

    fn should_auto_shutdown(&self) -> bool {
        !self.keep_alive
            && !self.table.is_empty()
            && self
                .table
                .values()
                .all(|row| row.status != RowStatus::Running)
    }

    async fn handle_message(&mut self, msg: RunMsg) {
        match msg {
            RunMsg::StartWorker { opts, reply } => {
                let result = self.start_worker(opts);
                let _ = reply.send(result);
            }
            RunMsg::WorkerDone { span_id } => {
                if let Some(row) = self.table.get_mut(&span_id) {
                    if row.status == RowStatus::Running {
                        row.status = RowStatus::Done;
                    }
                }
            }
            RunMsg::ForwardChildResult {
                parent_span_id,
                child_span_id,
                result,
            } => {
                if let Some(row) = self.table.get(&parent_span_id) {
                    row.handle.notify(WorkerMsg::ChildResult {
                        child_span_id,
                        result,
                    });
                }
            }
            RunMsg::Shutdown => {}
        }
    }

    fn start_worker(&mut self, opts: StartWorkerOpts) -> Result<WorkerHandle, String> {
        if opts.depth > self.config.max_depth {
            return Err(format!("max depth {} exceeded", self.config.max_depth));
        }

        let span_id = opts.span_id.clone();
        let parent_span_id = opts.parent_span_id.clone();

        let (handle, join) = worker::spawn(
            opts,
            self.run_id.clone(),
            self.config.clone(),
            self.llm.clone(),
            self.interp.clone(),
            self.templates.clone(),
            self.bus.clone(),
            self.clock.clone(),
            RunHandle {
                tx: self.self_tx.clone(),
            },
        );

        self.table.insert(
            span_id.clone(),
            RunRow {
                parent_span_id,
                status: RowStatus::Running,
                handle: handle.clone(),
            },
        );

        let abort_handle = self.workers.spawn(async move {
            let _ = join.await;
            span_id
        });
        self.worker_span_ids
            .insert(abort_handle.id(), handle.span_id.clone());

        Ok(handle)
    }

    async fn handle_worker_exit(
        &mut self,
        joined: Result<(tokio::task::Id, SpanId), tokio::task::JoinError>,
    ) {
        let span_id = match joined {
            Ok((_, span_id)) => span_id,
            Err(join_err) => {
                let id = join_err.id();
                match self.worker_span_ids.get(&id).cloned() {
                    Some(span_id) => {
                        tracing::error!(span_id = %span_id, error = %join_err, "worker task crashed");
                        self.cascade_crash(&span_id, &join_err.to_string());
                        span_id
                    }
                    None => return,
                }
            }
        };

        if let Some(row) = self.table.get(&span_id) {
            if row.status == RowStatus::Running {
                // Task exited without sending WorkerDone (e.g. dropped
                // mailbox). Treat as a normal completion.
                self.table.get_mut(&span_id).unwrap().status = RowStatus::Done;
            }
        }
    }

    fn cascade_crash(&mut self, crashed_span_id: &SpanId, reason: &str) {
        if let Some(row) = self.table.get_mut(crashed_span_id) {
            row.status = RowStatus::Crashed;
        }

        let parent = self
            .table
            .get(crashed_span_id)
            .and_then(|r| r.parent_span_id.clone());

        // Recursively mark and notify every descendant.
        let children: Vec<SpanId> = self
            .table
            .iter()
            .filter(|(_, row)| row.parent_span_id.as_ref() == Some(crashed_span_id))
            .map(|(id, _)| id.clone())
            .collect();
        for child in children {
            self.cascade_crash(&child, "ancestor crashed");
        }

        if let Some(parent_id) = parent {
            if let Some(parent_row) = self.table.get(&parent_id) {
                if parent_row.status == RowStatus::Running {
                    parent_row.handle.notify(WorkerMsg::ChildCrashed {
                        child_span_id: crashed_span_id.clone(),
                        reason: reason.to_string(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // Run-level integration behavior is exercised end-to-end in
    // `crates/rlm-core/tests/` alongside `Worker`, since a `Run` has no
    // useful behavior to assert in isolation from at least one worker.
}
