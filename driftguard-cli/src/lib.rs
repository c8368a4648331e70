//! driftguard CLI library
//!
//! File snapshot adapters, `[snapshots]` settings and report rendering.
//! The binary (main.rs) wires them to the audit core.

pub mod report;
pub mod settings;
pub mod snapshot;
