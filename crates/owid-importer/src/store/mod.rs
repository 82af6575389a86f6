//! Typed stores over the database repositories.
//!
//! `JobStore` owns the job record lifecycle and `UnitLedger` the per-unit
//! progress that makes re-running a job idempotent. Neither caches rows:
//! every call reads or writes the database so that the runner, its
//! heartbeat loop and API-triggered changes always see each other.

pub mod job_store;
pub mod unit_ledger;

pub use job_store::JobStore;
pub use unit_ledger::{Claim, UnitLedger};
