//! Integration test suite for wfengine.
//!
//! These tests drive the public API end to end: workflow submission,
//! scheduling, job submission through a worker, polling, and the
//! pause/resume/cancel controls.
//!
//! # Test Categories
//!
//! - `workflow_e2e`: full runs through the service and the CLI-facing config
//! - `scheduling`: placement and time-slot behaviour across ticks
//! - `submission`: retry, backoff and duplicate-job protection
//! - `control`: cancellation, failure cascades and pause/resume
//!
//! # CI Compatibility
//!
//! Everything runs against the deterministic mock worker, except one
//! test using the local `sh` worker. No batch system is required.

mod fixtures;

mod control;
mod scheduling;
mod submission;
mod workflow_e2e;
