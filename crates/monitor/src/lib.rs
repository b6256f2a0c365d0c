//! Headless monitor shell around the console core
//!
//! Runs the refresher and serves health, metrics and read-only snapshot
//! views over HTTP.

pub mod api;
pub mod config;
