//! Process supervisor: brings up the engine's shared infrastructure in a
//! fixed order (event bus, trace registry + subscriber, TTL sweeper, run
//! pool) and hands back the facade an embedder actually calls into.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use rlm_trace::ids::{Clock, SystemClock};
use rlm_trace::{DurableStore, EventBus, JsonlDurableStore, RunId, SweeperHandle, TraceRegistry, TtlSweeper};
use tokio::task::JoinHandle;

use crate::api::RlmEngine;
use crate::config::Config;
use crate::interp::InterpreterAdapter;
use crate::llm::LlmAdapter;
use crate::prompt::SystemPromptTemplates;
use crate::run::RunHandle;

/// Background tasks and the dynamic run pool started by
/// [`EngineSupervisor::start`]. Lives inside the [`RlmEngine`] it hands
/// back; `shutdown` reverses the startup order.
pub struct EngineSupervisor {
    pub(crate) runs: Arc<Mutex<HashMap<RunId, RunHandle>>>,
    trace_subscriber: JoinHandle<()>,
    sweeper: SweeperHandle,
}

impl EngineSupervisor {
    /// Startup order: construct the event bus (no state to start),
    /// construct the trace registry and subscribe a bridging task to the
    /// `"runs"` topic, spawn the TTL sweeper, construct the dynamic
    /// Run-coordinator pool, then hand back the engine facade.
    pub fn start(
        config: Config,
        llm: Arc<dyn LlmAdapter>,
        interp: Arc<dyn InterpreterAdapter>,
        templates: SystemPromptTemplates,
    ) -> RlmEngine {
        Self::start_with_durable_store(config, llm, interp, templates, None)
    }

    /// Same as [`Self::start`], but persists trace events to a JSONL file
    /// at `durable_store_path` instead of discarding them after the TTL
    /// sweep drops them from memory.
    pub fn start_with_durable_store(
        config: Config,
        llm: Arc<dyn LlmAdapter>,
        interp: Arc<dyn InterpreterAdapter>,
        templates: SystemPromptTemplates,
        durable_store_path: Option<&Path>,
    ) -> RlmEngine {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(TraceRegistry::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

        let store: Arc<dyn DurableStore> = match durable_store_path {
            Some(path) => match JsonlDurableStore::open(path) {
                Ok(store) => Arc::new(store),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to open durable trace store, trace events will not be persisted");
                    Arc::new(NullDurableStore)
                }
            },
            None => Arc::new(NullDurableStore),
        };

        let trace_subscriber = spawn_trace_subscriber(bus.clone(), registry.clone(), store.clone());

        let sweeper = TtlSweeper::spawn(
            registry.clone(),
            store,
            rlm_trace::DEFAULT_SWEEP_INTERVAL,
            rlm_trace::DEFAULT_TTL,
        );

        let runs = Arc::new(Mutex::new(HashMap::new()));
        let supervisor = EngineSupervisor {
            runs: runs.clone(),
            trace_subscriber,
            sweeper,
        };

        RlmEngine::new(config, llm, interp, Arc::new(templates), bus, registry, clock, runs, supervisor)
    }

    /// Reverses the startup order: abort every live run, abort the
    /// sweeper, then let the registry/bus drop with this struct.
    pub fn shutdown(self) {
        for (_, run) in self.runs.lock().unwrap().drain() {
            run.shutdown();
        }
        self.sweeper.abort();
        self.trace_subscriber.abort();
    }
}

fn spawn_trace_subscriber(
    bus: Arc<EventBus>,
    registry: Arc<TraceRegistry>,
    store: Arc<dyn DurableStore>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sub = bus.subscribe("runs");
        while let Some(event) = sub.recv().await {
            registry.log_for(&event.run_id).append((*event).clone());
            if let Err(err) = store.insert((*event).clone()).await {
                tracing::warn!(error = %err, "failed to persist trace event to durable store");
            }
        }
    })
}

/// Used when no durable-store path is configured: events still flow
/// through the event bus and in-memory trace log, just not to disk.
struct NullDurableStore;

#[async_trait::async_trait]
impl DurableStore for NullDurableStore {
    async fn insert(&self, _event: rlm_trace::TraceEvent) -> Result<(), rlm_trace::TraceError> {
        Ok(())
    }
    async fn events_for(
        &self,
        _run_id: &rlm_trace::RunId,
    ) -> Result<Vec<rlm_trace::TraceEvent>, rlm_trace::TraceError> {
        Ok(Vec::new())
    }
    async fn run_ids(&self) -> Result<Vec<rlm_trace::RunId>, rlm_trace::TraceError> {
        Ok(Vec::new())
    }
    async fn delete_before(
        &self,
        _cutoff: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), rlm_trace::TraceError> {
        Ok(())
    }
}
