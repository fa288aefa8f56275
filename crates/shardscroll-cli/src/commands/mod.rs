//! CLI command implementations.

pub mod config;
pub mod coordinator;
pub mod demo;
pub mod node;
pub mod scroll;
