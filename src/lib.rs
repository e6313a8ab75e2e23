//! # laneq
//!
//! Background job processing with idempotent submission.
//!
//! Jobs are admitted through [`admission::Admission`], which claims a
//! fingerprint so that duplicate submissions resolve to the live job. Workers
//! ([`worker::Worker`]) drain the `high` lane before `default`, run the task
//! body under a timeout with cooperative cancellation, and release the claim
//! when the job ends. State lives behind the [`broker`] traits: Postgres
//! (key/value table plus pgmq) in production, an in-process broker in tests
//! and `laneq dev`.

pub mod admission;
pub mod broker;
pub mod cancel;
pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod keys;
pub mod lanes;
pub mod model;
pub mod registry;
pub mod task;
pub mod telemetry;
pub mod worker;
