//! Step definitions for task dispatch scenarios.

pub mod given;
pub mod then;
pub mod when;
pub mod world;
