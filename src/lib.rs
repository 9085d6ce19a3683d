//! Taskrelay: task state tracking and dispatch to an external scheduler.
//!
//! Submitted tasks are persisted with a sliding retention window, indexed by
//! service and user, and handed to a downstream scheduler by a bounded pool
//! of asynchronous workers. Outcomes flow back into the stored record, where
//! API callers observe them.
//!
//! # Architecture
//!
//! Taskrelay follows hexagonal architecture principles:
//!
//! - **Domain**: task record, status state machine and log format
//! - **Ports**: repository, keyspace, scheduler and publisher traits
//! - **Adapters**: in-memory and `PostgreSQL` keyspaces, HTTP scheduler
//!
//! # Modules
//!
//! - [`task`]: domain, ports, adapters, dispatch workers and services
//! - [`config`]: environment-derived settings
//! - [`pipeline`]: explicit wiring of the running components
//! - [`telemetry`]: `tracing` subscriber setup

pub mod config;
pub mod pipeline;
pub mod task;
pub mod telemetry;
