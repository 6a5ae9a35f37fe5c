//! Application layer orchestrating settlement jobs and order placement.
//!
//! `SettlementEngine` wires a bounded `WorkerPool` of job runners, the
//! `CancellationRegistry` and the boundary services over one `StoreSet`.

pub mod cancellation;
pub mod engine;
pub mod jobs;
pub mod orders;
pub mod scheduler;
pub mod settlement;
