//! The reentrant worker state machine: one actor per node in a run's
//! worker tree, driven by a mailbox so a running evaluation can call back
//! into its own owner (`spawn_subcall`/`direct_query`) without deadlocking.
//!
//! The control-flow shape (budget check -> build request -> call the model
//! -> branch on the result) is a single loop; what makes it reentrant is
//! that step (f), evaluation, is handed to a spawned task so the worker's
//! own mailbox stays responsive to `spawn_subcall`/`direct_query` callbacks
//! while that task is in flight.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rlm_trace::{event, EventBus, RunId, SpanId, TraceEventKind};
use rlm_trace::ids::Clock;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::interp::{
    Bindings, EvalOutcome, HostCallbacks, InterpreterAdapter, ModelSize, RESERVED_FINAL_ANSWER,
};
use crate::llm::{ChatMessage, ChatOpts, LlmAdapter};
use crate::prompt::{
    self, feedback_message, final_answer_unwrap_one_level, StdoutOrError, SystemPromptTemplates,
};
use crate::run::RunHandle;
use crate::truncate_message;

const LOOP_NUDGE_THRESHOLD: f64 = 0.85;
const LOOP_NUDGE_WINDOW: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Running,
    Idle,
    Completed,
    Failed,
}

/// Snapshot returned by the public API's `status` operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionStatus {
    pub run_id: String,
    pub span_id: String,
    pub status: String,
    pub iteration: u32,
    pub message_count: usize,
    pub keep_alive: bool,
}

/// Whether a worker replies once and stops, or stays around across turns.
enum Lifecycle {
    OneShot,
    KeepAlive,
}

/// A caller blocked on a reply: a real sub-call routes its result back
/// through `ChildResult`/`ChildCrashed`, a direct query's spawned task
/// replies to its own caller directly and only needs this entry removed
/// again once done. Both share one map because both count against
/// `max_concurrent_subcalls`.
enum PendingSubcall {
    Subcall { reply: oneshot::Sender<Result<String, String>> },
    DirectQuery,
}

struct EvalContext {
    handle: JoinHandle<EvalOutcome>,
}

pub struct StartWorkerOpts {
    pub span_id: SpanId,
    pub parent_span_id: Option<SpanId>,
    pub depth: u32,
    pub model: String,
    pub keep_alive: bool,
}

pub enum WorkerMsg {
    /// Kick the worker to run another iteration (self-sent after eval
    /// completion, or sent once by the public API / Run to start a run).
    Iterate,
    /// One-way initial query, used to start a child worker spawned for a
    /// sub-call: no reply is expected here, the eventual answer is routed
    /// back to the parent via `ChildResult` instead.
    Kickoff {
        text: String,
    },
    SubcallRequest {
        text: String,
        model_size: ModelSize,
        reply: oneshot::Sender<Result<String, String>>,
    },
    DirectQueryRequest {
        text: String,
        model_size: ModelSize,
        schema: Option<Value>,
        reply: oneshot::Sender<Result<Value, String>>,
    },
    BindingsInfoRequest {
        reply: oneshot::Sender<Vec<crate::interp::BindingSummary>>,
    },
    HistoryRequest {
        reply: oneshot::Sender<Vec<ChatMessage>>,
    },
    StatusRequest {
        reply: oneshot::Sender<SessionStatus>,
    },
    ChildResult {
        child_span_id: SpanId,
        result: Result<String, String>,
    },
    ChildCrashed {
        child_span_id: SpanId,
        reason: String,
    },
    DirectQueryDone {
        query_id: SpanId,
    },
    UserMessage {
        text: String,
        context: Option<Value>,
        reply: oneshot::Sender<Result<Value, String>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct WorkerHandle {
    tx: mpsc::Sender<WorkerMsg>,
    pub span_id: SpanId,
    pub run_id: RunId,
    pub parent_span_id: Option<SpanId>,
    pub depth: u32,
}

impl WorkerHandle {
    /// One-way send used by the Run coordinator; never awaited by the
    /// caller for a reply.
    pub fn notify(&self, msg: WorkerMsg) {
        let _ = self.tx.try_send(msg);
    }

    pub async fn history(&self) -> Result<Vec<ChatMessage>, String> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WorkerMsg::HistoryRequest { reply: tx })
            .await
            .map_err(|_| "worker is no longer running".to_string())?;
        rx.await.map_err(|_| "worker dropped its reply channel".to_string())
    }

    pub async fn status(&self) -> Result<SessionStatus, String> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WorkerMsg::StatusRequest { reply: tx })
            .await
            .map_err(|_| "worker is no longer running".to_string())?;
        rx.await.map_err(|_| "worker dropped its reply channel".to_string())
    }

    pub async fn send_user_message(
        &self,
        text: String,
        context: Option<Value>,
        timeout: Duration,
    ) -> Result<Value, String> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WorkerMsg::UserMessage { text, context, reply: tx })
            .await
            .map_err(|_| "worker is no longer running".to_string())?;
        tokio::time::timeout(timeout, rx)
            .await
            .map_err(|_| "timed out waiting for worker".to_string())?
            .map_err(|_| "worker dropped its reply channel".to_string())?
    }
}

#[async_trait]
impl HostCallbacks for WorkerHandle {
    async fn spawn_subcall(&self, text: String, model_size: ModelSize) -> Result<String, String> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WorkerMsg::SubcallRequest {
                text,
                model_size,
                reply: tx,
            })
            .await
            .map_err(|_| "worker is no longer running".to_string())?;
        rx.await.map_err(|_| "worker dropped its reply channel".to_string())?
    }

    async fn direct_query(
        &self,
        text: String,
        model_size: ModelSize,
        schema: Option<Value>,
    ) -> Result<Value, String> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(WorkerMsg::DirectQueryRequest {
                text,
                model_size,
                schema,
                reply: tx,
            })
            .await
            .map_err(|_| "worker is no longer running".to_string())?;
        rx.await.map_err(|_| "worker dropped its reply channel".to_string())?
    }

    async fn bindings_info(&self) -> Vec<crate::interp::BindingSummary> {
        let (tx, rx) = oneshot::channel();
        if self
            .tx
            .send(WorkerMsg::BindingsInfoRequest { reply: tx })
            .await
            .is_err()
        {
            return vec![];
        }
        rx.await.unwrap_or_default()
    }
}

pub struct Worker {
    run_id: RunId,
    span_id: SpanId,
    parent_span_id: Option<SpanId>,
    depth: u32,
    model: String,
    config: Config,
    llm: Arc<dyn LlmAdapter>,
    interp: Arc<dyn InterpreterAdapter>,
    templates: Arc<SystemPromptTemplates>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    run_handle: RunHandle,

    history: Vec<ChatMessage>,
    bindings: Bindings,
    iteration: u32,
    status: WorkerStatus,
    pending_subcalls: HashMap<SpanId, PendingSubcall>,
    prev_codes: VecDeque<String>,
    eval_context: Option<EvalContext>,
    lifecycle: Lifecycle,
    current_caller: Option<oneshot::Sender<Result<Value, String>>>,

    mailbox: mpsc::Receiver<WorkerMsg>,
    self_tx: mpsc::Sender<WorkerMsg>,
}

#[allow(clippy::too_many_arguments)]
pub fn spawn(
    opts: StartWorkerOpts,
    run_id: RunId,
    config: Config,
    llm: Arc<dyn LlmAdapter>,
    interp: Arc<dyn InterpreterAdapter>,
    templates: Arc<SystemPromptTemplates>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    run_handle: RunHandle,
) -> (WorkerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let handle = WorkerHandle {
        tx: tx.clone(),
        span_id: opts.span_id.clone(),
        run_id: run_id.clone(),
        parent_span_id: opts.parent_span_id.clone(),
        depth: opts.depth,
    };

    let mut worker = Worker {
        run_id,
        span_id: opts.span_id,
        parent_span_id: opts.parent_span_id,
        depth: opts.depth,
        model: opts.model,
        config,
        llm,
        interp,
        templates,
        bus,
        clock,
        run_handle,
        history: Vec::new(),
        bindings: Bindings::new(),
        iteration: 0,
        status: WorkerStatus::Idle,
        pending_subcalls: HashMap::new(),
        prev_codes: VecDeque::with_capacity(LOOP_NUDGE_WINDOW),
        eval_context: None,
        lifecycle: if opts.keep_alive {
            Lifecycle::KeepAlive
        } else {
            Lifecycle::OneShot
        },
        current_caller: None,
        mailbox: rx,
        self_tx: tx,
    };

    let join = tokio::spawn(async move { worker.run_loop().await });
    (handle, join)
}

impl Worker {
    fn emit(&self, kind: TraceEventKind, payload: Value) {
        self.bus.publish(
            &format!("worker:{}", self.span_id),
            event(
                self.clock.as_ref(),
                kind,
                self.run_id.clone(),
                self.span_id.clone(),
                self.parent_span_id.clone(),
                self.depth,
                payload,
            ),
        );
    }

    async fn run_loop(&mut self) {
        self.emit(
            TraceEventKind::NodeStart,
            serde_json::json!({"model": self.model, "depth": self.depth}),
        );

        loop {
            if self.eval_context.is_some() {
                tokio::select! {
                    msg = self.mailbox.recv() => {
                        match msg {
                            Some(msg) => self.handle_message(msg).await,
                            None => break,
                        }
                    }
                    result = std::future::poll_fn(|cx| {
                        // Safe: checked is_some() above; scope ends the
                        // borrow before we re-enter the loop body.
                        std::pin::Pin::new(&mut self.eval_context.as_mut().unwrap().handle).poll(cx)
                    }) => {
                        self.eval_context = None;
                        match result {
                            Ok(outcome) => self.handle_eval_completion(outcome).await,
                            Err(join_err) => self.handle_eval_crash(join_err.to_string()).await,
                        }
                        if self.finished() {
                            break;
                        }
                    }
                }
                continue;
            }

            match self.status {
                WorkerStatus::Running => self.iterate_tick().await,
                WorkerStatus::Idle => match self.mailbox.recv().await {
                    Some(msg) => self.handle_message(msg).await,
                    None => break,
                },
                WorkerStatus::Completed | WorkerStatus::Failed => break,
            }
        }

        self.emit(
            TraceEventKind::NodeStop,
            serde_json::json!({"status": status_label(self.status)}),
        );
    }

    fn finished(&self) -> bool {
        matches!(self.status, WorkerStatus::Completed | WorkerStatus::Failed)
    }

    async fn handle_message(&mut self, msg: WorkerMsg) {
        match msg {
            WorkerMsg::Iterate => {
                if self.status == WorkerStatus::Idle {
                    self.status = WorkerStatus::Running;
                }
            }
            WorkerMsg::Kickoff { text } => {
                if self.status == WorkerStatus::Idle {
                    self.history.push(ChatMessage::user(text));
                    self.status = WorkerStatus::Running;
                }
            }
            WorkerMsg::UserMessage { text, context, reply } => {
                if self.status != WorkerStatus::Idle {
                    let _ = reply.send(Err("worker is busy".to_string()));
                    return;
                }
                if let Some(context) = context {
                    self.bindings.insert(crate::interp::RESERVED_CONTEXT, context);
                }
                self.history.push(ChatMessage::user(text));
                self.current_caller = Some(reply);
                self.status = WorkerStatus::Running;
            }
            WorkerMsg::SubcallRequest {
                text,
                model_size,
                reply,
            } => self.handle_subcall_request(text, model_size, reply).await,
            WorkerMsg::DirectQueryRequest {
                text,
                model_size,
                schema,
                reply,
            } => self.handle_direct_query_request(text, model_size, schema, reply),
            WorkerMsg::BindingsInfoRequest { reply } => {
                let _ = reply.send(self.bindings.info());
            }
            WorkerMsg::HistoryRequest { reply } => {
                let _ = reply.send(self.history.clone());
            }
            WorkerMsg::StatusRequest { reply } => {
                let _ = reply.send(SessionStatus {
                    run_id: self.run_id.to_string(),
                    span_id: self.span_id.to_string(),
                    status: status_label(self.status).to_string(),
                    iteration: self.iteration,
                    message_count: self.history.len(),
                    keep_alive: matches!(self.lifecycle, Lifecycle::KeepAlive),
                });
            }
            WorkerMsg::ChildResult {
                child_span_id,
                result,
            } => {
                if let Some(PendingSubcall::Subcall { reply }) =
                    self.pending_subcalls.remove(&child_span_id)
                {
                    let _ = reply.send(result);
                }
            }
            WorkerMsg::ChildCrashed {
                child_span_id,
                reason,
            } => {
                if let Some(PendingSubcall::Subcall { reply }) =
                    self.pending_subcalls.remove(&child_span_id)
                {
                    let _ = reply.send(Err(format!("child crashed: {reason}")));
                }
            }
            WorkerMsg::DirectQueryDone { query_id } => {
                self.pending_subcalls.remove(&query_id);
            }
            WorkerMsg::Shutdown => {
                self.status = WorkerStatus::Failed;
            }
        }
    }

    async fn handle_subcall_request(
        &mut self,
        text: String,
        model_size: ModelSize,
        reply: oneshot::Sender<Result<String, String>>,
    ) {
        if self.depth >= self.config.max_depth {
            let _ = reply.send(Err(format!(
                "maximum recursion depth ({}) exceeded",
                self.config.max_depth
            )));
            return;
        }
        if self.pending_subcalls.len() as u32 >= self.config.max_concurrent_subcalls {
            let _ = reply.send(Err(format!(
                "max concurrent subcalls ({}) reached",
                self.config.max_concurrent_subcalls
            )));
            return;
        }

        let child_span_id = SpanId::new();
        let model = match model_size {
            ModelSize::Large => self.config.model_large.clone(),
            ModelSize::Small => self.config.model_small.clone(),
        };

        self.emit(
            TraceEventKind::SubcallSpawn,
            serde_json::json!({"child_span_id": child_span_id.to_string(), "text": text}),
        );

        let opts = StartWorkerOpts {
            span_id: child_span_id.clone(),
            parent_span_id: Some(self.span_id.clone()),
            depth: self.depth + 1,
            model,
            keep_alive: false,
        };

        match self.run_handle.start_worker(opts).await {
            Ok(child) => {
                self.pending_subcalls
                    .insert(child_span_id.clone(), PendingSubcall::Subcall { reply });
                child.notify(WorkerMsg::Kickoff { text });
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    fn handle_direct_query_request(
        &mut self,
        text: String,
        model_size: ModelSize,
        schema: Option<Value>,
        reply: oneshot::Sender<Result<Value, String>>,
    ) {
        if self.pending_subcalls.len() as u32 >= self.config.max_concurrent_subcalls {
            let _ = reply.send(Err(format!(
                "max concurrent subcalls ({}) reached",
                self.config.max_concurrent_subcalls
            )));
            return;
        }

        let query_id = SpanId::new();
        self.pending_subcalls.insert(query_id.clone(), PendingSubcall::DirectQuery);

        let model = match model_size {
            ModelSize::Large => self.config.model_large.clone(),
            ModelSize::Small => self.config.model_small.clone(),
        };
        let llm = self.llm.clone();
        let timeout = self.config.subcall_timeout;
        let bus = self.bus.clone();
        let clock = self.clock.clone();
        let run_id = self.run_id.clone();
        let span_id = self.span_id.clone();
        let parent_span_id = self.parent_span_id.clone();
        let depth = self.depth;
        let self_tx = self.self_tx.clone();

        bus.publish(
            &format!("worker:{span_id}"),
            event(
                clock.as_ref(),
                TraceEventKind::DirectQueryStart,
                run_id.clone(),
                span_id.clone(),
                parent_span_id.clone(),
                depth,
                serde_json::json!({"text": text, "query_id": query_id.to_string()}),
            ),
        );

        tokio::spawn(async move {
            let messages = vec![ChatMessage::user(text)];
            let opts = ChatOpts { schema };
            let result = llm
                .chat(&messages, &model, timeout, &opts)
                .await
                .map_err(|e| e.to_string())
                .and_then(|r| serde_json::from_str(&r.text).map_err(|e| e.to_string()));

            bus.publish(
                &format!("worker:{span_id}"),
                event(
                    clock.as_ref(),
                    TraceEventKind::DirectQueryStop,
                    run_id,
                    span_id,
                    parent_span_id,
                    depth,
                    serde_json::json!({"ok": result.is_ok(), "query_id": query_id.to_string()}),
                ),
            );
            let _ = reply.send(result);
            let _ = self_tx.send(WorkerMsg::DirectQueryDone { query_id }).await;
        });
    }

    async fn iterate_tick(&mut self) {
        // (a) budget check: terminate now, not one iteration late.
        if self.iteration >= self.config.max_iterations {
            self.complete(Err(format!(
                "maximum iterations ({}) reached",
                self.config.max_iterations
            )))
            .await;
            return;
        }

        // (b) history compaction
        self.maybe_compact_history();

        // (c)+(d) build request, already captured in self.history

        // (e) call the model
        self.emit(TraceEventKind::IterationStart, serde_json::json!({"iteration": self.iteration}));
        self.emit(
            TraceEventKind::LlmRequestStart,
            serde_json::json!({"model": self.model}),
        );

        let messages = self.build_messages();
        let reply = self
            .llm
            .chat(&messages, &self.model, self.config.llm_timeout, &ChatOpts::default())
            .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(err) => {
                self.emit(
                    TraceEventKind::LlmRequestException,
                    serde_json::json!({"error": err.to_string()}),
                );
                self.complete(Err(format!("llm request failed: {err}"))).await;
                return;
            }
        };
        self.emit(
            TraceEventKind::LlmRequestStop,
            serde_json::json!({"usage": reply.usage}),
        );

        let parsed = match serde_json::from_str::<LlmProgramReply>(&reply.text) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.complete(Err(format!(
                    "llm reply was not valid {{reasoning, code}} json: {err}"
                )))
                .await;
                return;
            }
        };

        if parsed.code.is_empty() {
            self.history.push(ChatMessage::assistant(parsed.reasoning));
            self.history.push(feedback_message(
                StdoutOrError::Skipped("empty code".to_string()),
                &self.bindings.info(),
                self.bindings.final_answer().is_some(),
            ));
            self.status = WorkerStatus::Running;
            return;
        }
        let program = parsed.code;

        // (f) evaluate asynchronously so the mailbox stays responsive.
        self.emit(TraceEventKind::EvalStart, serde_json::json!({}));
        self.push_prev_code(program.clone());

        let interp = self.interp.clone();
        let bindings = self.bindings.clone();
        let timeout = self.config.eval_timeout;
        let callbacks: Arc<dyn HostCallbacks> = Arc::new(WorkerHandle {
            tx: self.self_tx.clone(),
            span_id: self.span_id.clone(),
            run_id: self.run_id.clone(),
            parent_span_id: self.parent_span_id.clone(),
            depth: self.depth,
        });

        let handle = tokio::spawn(async move {
            interp.eval(&program, bindings, timeout, callbacks).await
        });
        self.eval_context = Some(EvalContext { handle });
    }

    fn build_messages(&self) -> Vec<ChatMessage> {
        let mut messages = vec![prompt::system_message(self.depth, &self.templates)];
        messages.extend(self.history.iter().cloned());
        messages
    }

    fn maybe_compact_history(&mut self) {
        if self.history.len() <= 2 {
            return;
        }
        let estimated_tokens: usize =
            self.history.iter().map(|m| m.content.chars().count() / 4).sum();
        let threshold = (self.config.context_window(&self.model) as f64 * 0.8) as usize;
        if estimated_tokens <= threshold {
            return;
        }

        self.emit(TraceEventKind::CompactionRun, serde_json::json!({}));

        let serialized: String = self
            .history
            .iter()
            .map(|m| format!("{:?}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let preview = truncate_message(&serialized, self.config.truncation_head, self.config.truncation_tail);

        self.bindings.insert("compacted_history", Value::String(serialized));
        let system = self.history.first().cloned();
        self.history.clear();
        if let Some(system) = system {
            self.history.push(system);
        }
        self.history.push(prompt::compaction_addendum(&preview));
    }

    async fn handle_eval_completion(&mut self, outcome: EvalOutcome) {
        self.emit(TraceEventKind::EvalStop, serde_json::json!({"ok": matches!(outcome, EvalOutcome::Ok { .. })}));

        match outcome {
            EvalOutcome::Ok {
                stdout,
                value,
                new_bindings,
            } => {
                self.bindings = new_bindings;
                let final_answer_set = self.bindings.final_answer().is_some();
                let stdout = truncate_message(&stdout, self.config.truncation_head, self.config.truncation_tail);
                let feedback = feedback_message(
                    StdoutOrError::Stdout(stdout),
                    &self.bindings.info(),
                    final_answer_set,
                );
                self.history.push(feedback);
                self.iteration += 1;
                self.emit(TraceEventKind::IterationStop, serde_json::json!({"iteration": self.iteration}));
                self.run_loop_nudge_check(final_answer_set);

                if final_answer_set {
                    let answer = value
                        .or_else(|| self.bindings.final_answer().cloned())
                        .unwrap_or(Value::Null);
                    self.complete(Ok(final_answer_unwrap_one_level(answer))).await;
                } else {
                    self.status = WorkerStatus::Running;
                }
            }
            EvalOutcome::Err {
                error_output,
                original_bindings,
            } => {
                self.bindings = original_bindings;
                let error_output = truncate_message(&error_output, self.config.truncation_head, self.config.truncation_tail);
                let feedback = feedback_message(
                    StdoutOrError::Error(error_output),
                    &self.bindings.info(),
                    false,
                );
                self.history.push(feedback);
                self.iteration += 1;
                self.status = WorkerStatus::Running;
            }
        }
    }

    async fn handle_eval_crash(&mut self, reason: String) {
        self.emit(TraceEventKind::EvalException, serde_json::json!({"reason": reason}));
        self.complete(Err(format!("eval process crashed: {reason}"))).await;
    }

    fn run_loop_nudge_check(&mut self, final_answer_set: bool) {
        if self.prev_codes.len() < LOOP_NUDGE_WINDOW {
            return;
        }
        let codes: Vec<&String> = self.prev_codes.iter().collect();
        let similar = jaccard_similarity(codes[0], codes[1]) > LOOP_NUDGE_THRESHOLD
            && jaccard_similarity(codes[1], codes[2]) > LOOP_NUDGE_THRESHOLD;
        if similar {
            self.history.push(feedback_message(
                StdoutOrError::Nudge(
                    "your last three programs were nearly identical; try a different \
                     approach or finalize your answer"
                        .to_string(),
                ),
                &self.bindings.info(),
                final_answer_set,
            ));
            self.prev_codes.clear();
        }
    }

    fn push_prev_code(&mut self, code: String) {
        if self.prev_codes.len() == LOOP_NUDGE_WINDOW {
            self.prev_codes.pop_front();
        }
        self.prev_codes.push_back(code);
    }

    async fn complete(&mut self, result: Result<Value, String>) {
        self.emit(
            TraceEventKind::TurnComplete,
            serde_json::json!({"ok": result.is_ok()}),
        );

        match self.lifecycle {
            Lifecycle::OneShot => {
                self.status = if result.is_ok() {
                    WorkerStatus::Completed
                } else {
                    WorkerStatus::Failed
                };
                if let Some(caller) = self.current_caller.take() {
                    let _ = caller.send(result.clone());
                }
                self.run_handle.notify_worker_done(self.span_id.clone());
                if let Some(parent) = &self.parent_span_id {
                    let answer_for_parent = result.map(|v| {
                        v.as_str().map(String::from).unwrap_or_else(|| v.to_string())
                    });
                    self.run_handle
                        .forward_child_result(parent.clone(), self.span_id.clone(), answer_for_parent);
                }
            }
            Lifecycle::KeepAlive => {
                if let Some(caller) = self.current_caller.take() {
                    let _ = caller.send(result);
                }
                self.iteration = 0;
                self.prev_codes.clear();
                self.bindings.insert(RESERVED_FINAL_ANSWER, Value::Null);
                self.status = WorkerStatus::Idle;
            }
        }
    }
}

fn status_label(status: WorkerStatus) -> &'static str {
    match status {
        WorkerStatus::Running => "running",
        WorkerStatus::Idle => "idle",
        WorkerStatus::Completed => "completed",
        WorkerStatus::Failed => "failed",
    }
}

fn jaccard_similarity(a: &str, b: &str) -> f64 {
    use std::collections::HashSet;
    let words_a: HashSet<&str> = a.split_whitespace().collect();
    let words_b: HashSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

#[derive(serde::Deserialize)]
struct LlmProgramReply {
    #[serde(default)]
    reasoning: String,
    code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jaccard_identical_strings_is_one() {
        assert_eq!(jaccard_similarity("a b c", "a b c"), 1.0);
    }

    #[test]
    fn jaccard_disjoint_strings_is_zero() {
        assert_eq!(jaccard_similarity("a b c", "d e f"), 0.0);
    }
}
