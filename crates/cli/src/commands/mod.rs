//! CLI command implementations

pub mod cluster;
pub mod logs;
pub mod watch;
