//! Core hitl library (transport, interpreter, run state, config).

pub mod client;
pub mod config;
pub mod core;
pub mod error;
pub mod transport;
