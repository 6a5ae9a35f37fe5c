//! Domain types and the ports the application layer talks to.

pub mod job;
pub mod money;
pub mod order;
pub mod ports;
pub mod settlement;
pub mod transaction;
