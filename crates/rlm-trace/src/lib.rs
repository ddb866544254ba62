//! Event bus, trace log and durable storage for the RLM execution engine.
//!
//! - **ids**: `SpanId`/`RunId` identity and clock abstractions
//! - **truncate**: character-safe head/tail truncation
//! - **bus**: topic-indexed pub/sub fan-out for trace events
//! - **log**: per-run append-only event buffer and its tree projection
//! - **durable**: a narrow trait plus a JSONL-backed reference store
//! - **sweeper**: periodic TTL-based reaper for both of the above
//!
//! # Usage
//!
//! ```rust,no_run
//! use rlm_trace::{EventBus, TraceRegistry, ids::RunId};
//! use std::sync::Arc;
//!
//! let bus = Arc::new(EventBus::new());
//! let registry = Arc::new(TraceRegistry::new());
//! let run_id = RunId::new();
//! let log = registry.log_for(&run_id);
//! let _ = log.events();
//! ```

pub mod bus;
pub mod durable;
pub mod ids;
pub mod log;
pub mod sweeper;
pub mod truncate;

pub use bus::{EventBus, Subscription};
pub use durable::{DurableStore, JsonlDurableStore, TraceError};
pub use ids::{Clock, FakeClock, RunId, SpanId, SystemClock};
pub use log::{event, TraceEvent, TraceEventKind, TraceLog, TraceRegistry, TreeNode};
pub use sweeper::{SweeperHandle, TtlSweeper, DEFAULT_SWEEP_INTERVAL, DEFAULT_TTL};
pub use truncate::truncate;
