//! Storage backends implementing the domain ports.

pub mod in_memory;
#[cfg(feature = "storage-postgres")]
pub mod postgres;
