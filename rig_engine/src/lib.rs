//! # Rig Engine Library
//!
//! Concurrent block engine for test rigs: independent blocks connected by
//! record links, started together on one shared time origin and stopped
//! together so that every actuator is left in a safe state.
//!
//! # Module Structure
//!
//! - [`link`] - Bounded drop-oldest record channels with fan-out
//! - [`block`] - Block trait, lifecycle types, block-side I/O
//! - [`runner`] - Per-block thread: hints, pacing, start barrier, statistics
//! - [`orchestrator`] - Graph building, supervision, shutdown propagation
//! - [`path`] - Command path state machine and segment conditions
//! - [`pipeline`] - TOML pipeline configuration
//! - [`registry`] - Device factory registry
//! - [`blocks`] - Built-in blocks (generator, io, reader, recorder)
//! - [`devices`] - Built-in simulated devices
//! - [`cancel`] - Cooperative cancellation token
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          Orchestrator                             │
//! │   prepare × N ──▶ t0 barrier ──▶ supervise ──▶ cancel ──▶ join    │
//! └──────┬──────────────────┬──────────────────────┬──────────────────┘
//!        ▼                  ▼                      ▼
//!  ┌───────────┐  link ┌───────────┐   link  ┌───────────┐
//!  │ generator │──────▶│    io     │────────▶│ recorder  │
//!  │  (Path)   │       │ (Device)  │         │  (file)   │
//!  └───────────┘       └───────────┘         └───────────┘
//!   thread              thread                thread
//! ```

#![warn(missing_docs)]

pub mod block;
pub mod blocks;
pub mod cancel;
pub mod devices;
pub mod link;
pub mod orchestrator;
pub mod path;
pub mod pipeline;
pub mod registry;
pub mod runner;

// Re-export key types for convenience
pub use crate::block::{Block, BlockError, BlockIo, CycleContext, LifecycleState};
pub use crate::cancel::CancelToken;
pub use crate::link::{LinkError, LinkRx, LinkTx, RecvError, link};
pub use crate::orchestrator::{EngineError, LinkOptions, Orchestrator, RunSummary, StopReason};
pub use crate::pipeline::PipelineConfig;
pub use crate::registry::DeviceRegistry;
pub use crate::runner::{BlockReport, CycleStats, OnExhausted, Schedule};
