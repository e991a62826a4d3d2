//! CrowdGuard - live crowd-density telemetry ingestion.
//!
//! # Overview
//!
//! CrowdGuard receives crowd-density readings from a publish/subscribe feed,
//! keeps a bounded rolling history of recent readings, logs surge (DANGER)
//! events, and exposes a consistent "latest state" for a dashboard to poll.
//!
//! All state lives in memory and is reset on restart.
//!
//! # Modules
//!
//! - [`model`]: Readings, snapshots, event log entries and counters
//! - [`decoder`]: Raw payload validation
//! - [`history`]: Fixed-capacity rolling history
//! - [`events`]: Deduplicated surge event log
//! - [`aggregation`]: The state aggregator tying the above together
//! - [`subscription`]: Ingest channel and transport adapters
//! - [`config`]: Environment configuration
//! - [`api`]: HTTP API handlers

pub mod aggregation;
pub mod api;
pub mod config;
pub mod decoder;
pub mod events;
pub mod history;
pub mod model;
pub mod subscription;
