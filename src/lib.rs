//! pg-snapshot-operator: Snapshot lifecycle for a Kubernetes-managed Postgres
//!
//! This crate validates Snapshot requests against their Postgres, provisions
//! scratch storage, renders the backup Job and wipes snapshot data on deletion.

pub mod config;
pub mod controller;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use crate::error::{Error, Result};
