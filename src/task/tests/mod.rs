//! Unit tests for the task module.

mod processor_tests;
