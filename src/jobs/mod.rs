//! Job/Retry Orchestrator
//!
//! Durable named queues with per-queue concurrency and fixed-backoff retry,
//! plus the worker that routes decoded bridge events to the swap processors.

pub mod queue;
pub mod worker;

pub use queue::{Job, JobData, JobState, JobStore, QueueCounts, QueueError, QueueName, QueuePolicy, Retry};
pub use worker::{Orchestrator, PassReport, DEFAULT_CLAIM_INTERVAL};
