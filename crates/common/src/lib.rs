//! Shared wire types for the fleet orchestrator and the edge gateways it drives.
//!
//! Keep cross-crate DTOs and topic helpers here so both sides of the fleet
//! protocol agree on one encoding.

#![warn(missing_docs)]

/// Connection, device and job DTOs.
pub mod api;
/// Fleet topic naming (`fleet/{channel}/{connectionName}`).
pub mod topics;
