//! Task state and dispatch pipeline.
//!
//! Tasks are persisted with a sliding retention window, indexed by service
//! and user, and handed to an external scheduler by a bounded pool of
//! workers. The module follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Dispatch workers in [`events`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod events;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
