//! CLI command implementations.

pub mod audit;
pub mod build;
pub mod control;
pub mod init;
pub mod status;
pub mod tick;
pub mod validate;
