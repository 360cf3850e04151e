//! Integration test suite for waggle.
//!
//! These tests drive whole runs through the `Coordinator`: a plan streamed
//! in chunks, tasks dispatched as their dependencies complete, and the
//! abort paths. Planning and execution services are in-process mocks.
//!
//! # Test Categories
//!
//! - `streaming_plan`: Execution overlapping with plan streaming
//! - `parallel_dispatch`: Concurrency of independent tasks
//! - `failure_abort`: Task and planning failures
//! - `cancellation`: User stops and superseded runs

mod fixtures;

mod cancellation;
mod failure_abort;
mod streaming_plan;
