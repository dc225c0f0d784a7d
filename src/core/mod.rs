//! Core domain types: identifiers, schedules, jobs, backoff and tasks.

pub mod job;
pub mod retry;
pub mod schedule;
pub mod task;
pub mod types;
