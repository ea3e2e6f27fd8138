//! CLI command implementations.

pub mod common;
pub mod config;
pub mod courses;
pub mod publish;
pub mod transfer;
