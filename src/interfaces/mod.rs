//! Adapters between the engine and external formats.

pub mod csv;
