//! HTTP endpoint an external scheduler calls to start a run.

pub mod handler;
pub mod signature;
