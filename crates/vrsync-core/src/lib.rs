// Library root: re-exports all modules so the binary and integration tests
// can reach the crate's public API.

pub mod builder;
pub mod config;
pub mod db;
pub mod error;
pub mod event;
pub mod grading;
pub mod model;
pub mod stats;
pub mod tournament;
pub mod visited;
pub mod vrapi;
