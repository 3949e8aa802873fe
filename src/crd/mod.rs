//! Custom Resource Definitions for the snapshot operator
//!
//! `Snapshot` is the object this crate acts on; `Postgres` is only read.

mod postgres;
mod snapshot;
pub mod types;


pub use postgres::{Postgres, PostgresSpec};
pub use snapshot::{Snapshot, SnapshotPhase, SnapshotSpec, SnapshotStatus, SnapshotType};
pub use types::*;
