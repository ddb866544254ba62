//! Public facade: the single entry point an embedder constructs once and
//! calls `run`/`start_session`/`send_message`/`history`/`status` on.
//!
//! Every operation here is `tokio::time::timeout`-wrapped somewhere in its
//! call chain, and every error crosses the boundary as a `String` — no
//! caller on the other side of this facade should ever see an internal
//! error type.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rlm_trace::ids::Clock;
use rlm_trace::{EventBus, RunId, SpanId, TraceRegistry};
use serde_json::Value;

use crate::config::Config;
use crate::interp::InterpreterAdapter;
use crate::llm::{ChatMessage, LlmAdapter};
use crate::prompt::{self, SystemPromptTemplates};
use crate::run::{self, RunHandle};
use crate::supervisor::EngineSupervisor;
use crate::truncate_message;
use crate::worker::{SessionStatus, StartWorkerOpts, WorkerHandle};

/// A live, addressable keep-alive worker. Opaque to callers; round-trips
/// through `start_session`'s return value and every later call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    pub model: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionOpts {
    pub model: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub answer: Value,
    pub run_id: String,
    pub span_id: String,
}

struct SessionEntry {
    worker: WorkerHandle,
}

const DEFAULT_CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RlmEngine {
    config: Config,
    llm: Arc<dyn LlmAdapter>,
    interp: Arc<dyn InterpreterAdapter>,
    templates: Arc<SystemPromptTemplates>,
    bus: Arc<EventBus>,
    registry: Arc<TraceRegistry>,
    clock: Arc<dyn Clock>,
    runs: Arc<Mutex<HashMap<RunId, RunHandle>>>,
    sessions: Arc<Mutex<HashMap<SessionId, SessionEntry>>>,
    supervisor: EngineSupervisor,
}

impl RlmEngine {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Config,
        llm: Arc<dyn LlmAdapter>,
        interp: Arc<dyn InterpreterAdapter>,
        templates: Arc<SystemPromptTemplates>,
        bus: Arc<EventBus>,
        registry: Arc<TraceRegistry>,
        clock: Arc<dyn Clock>,
        runs: Arc<Mutex<HashMap<RunId, RunHandle>>>,
        supervisor: EngineSupervisor,
    ) -> Self {
        Self {
            config,
            llm,
            interp,
            templates,
            bus,
            registry,
            clock,
            runs,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            supervisor,
        }
    }

    pub fn trace_registry(&self) -> &Arc<TraceRegistry> {
        &self.registry
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// One-shot: starts a `keep_alive = false` run, starts a root worker
    /// at depth 0, and awaits either its reply or the run timeout. The
    /// run and its whole worker tree are torn down before this returns,
    /// whether it succeeded, failed, or timed out.
    pub async fn run(&self, context: &str, query: &str, opts: RunOpts) -> Result<RunOutcome, String> {
        let run_id = RunId::new();
        let span_id = SpanId::new();
        let model = opts.model.unwrap_or_else(|| self.config.model_large.clone());
        let timeout = opts.timeout.unwrap_or_else(|| self.config.run_timeout());

        let run_handle = self.spawn_run(run_id.clone(), false);

        let worker = run_handle
            .start_worker(StartWorkerOpts {
                span_id: span_id.clone(),
                parent_span_id: None,
                depth: 0,
                model,
                keep_alive: false,
            })
            .await;

        let result = match worker {
            Ok(worker) => {
                let preview =
                    truncate_message(context, self.config.truncation_head, self.config.truncation_tail);
                let message = prompt::user_message(query, context.len(), context.lines().count(), &preview);
                worker
                    .send_user_message(message.content, Some(Value::String(context.to_string())), timeout)
                    .await
            }
            Err(err) => Err(err),
        };
        let result = result.map_err(|err| {
            if err == "timed out waiting for worker" {
                format!("timed out after {} ms", timeout.as_millis())
            } else {
                err
            }
        });

        // The run auto-shuts-down once its table empties out on its own,
        // but a timed-out worker may still be mid-flight; ask explicitly
        // so nothing lingers past this call returning.
        if result.is_err() {
            run_handle.shutdown();
        }
        self.runs.lock().unwrap().remove(&run_id);

        result.map(|answer| RunOutcome {
            answer,
            run_id: run_id.to_string(),
            span_id: span_id.to_string(),
        })
    }

    /// Starts a `keep_alive = true` run with a single keep-alive worker
    /// and returns its span id as the session id. The session and its run
    /// stay alive across later `send_message` calls until the process
    /// shuts down — there is no explicit `end_session`; callers that want
    /// one stop calling `send_message` and let the run's own idle timeout
    /// reclaim it.
    pub async fn start_session(&self, opts: SessionOpts) -> Result<SessionId, String> {
        let run_id = RunId::new();
        let span_id = SpanId::new();
        let model = opts.model.unwrap_or_else(|| self.config.model_large.clone());

        let run_handle = self.spawn_run(run_id.clone(), true);

        let worker = run_handle
            .start_worker(StartWorkerOpts {
                span_id: span_id.clone(),
                parent_span_id: None,
                depth: 0,
                model,
                keep_alive: true,
            })
            .await?;

        let session_id = SessionId(span_id.to_string());
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.clone(), SessionEntry { worker });
        Ok(session_id)
    }

    pub async fn send_message(
        &self,
        session: &SessionId,
        text: &str,
        timeout: Duration,
    ) -> Result<Value, String> {
        let worker = self.session_worker(session)?;
        worker.send_user_message(text.to_string(), None, timeout).await
    }

    pub async fn history(&self, session: &SessionId) -> Result<Vec<ChatMessage>, String> {
        let worker = self.session_worker(session)?;
        tokio::time::timeout(DEFAULT_CONTROL_TIMEOUT, worker.history())
            .await
            .map_err(|_| "timed out waiting for worker".to_string())?
    }

    pub async fn status(&self, session: &SessionId) -> Result<SessionStatus, String> {
        let worker = self.session_worker(session)?;
        tokio::time::timeout(DEFAULT_CONTROL_TIMEOUT, worker.status())
            .await
            .map_err(|_| "timed out waiting for worker".to_string())?
    }

    /// Reverses the supervisor's startup order: abort every live run,
    /// abort the sweeper, then drop the registry and bus.
    pub fn shutdown(self) {
        self.supervisor.shutdown();
    }

    fn spawn_run(&self, run_id: RunId, keep_alive: bool) -> RunHandle {
        let run_handle = run::spawn(
            run_id.clone(),
            self.config.clone(),
            self.llm.clone(),
            self.interp.clone(),
            self.templates.clone(),
            self.bus.clone(),
            self.clock.clone(),
            keep_alive,
        );
        self.runs.lock().unwrap().insert(run_id, run_handle.clone());
        run_handle
    }

    fn session_worker(&self, session: &SessionId) -> Result<WorkerHandle, String> {
        self.sessions
            .lock()
            .unwrap()
            .get(session)
            .map(|entry| entry.worker.clone())
            .ok_or_else(|| format!("no such session: {session}"))
    }
}
