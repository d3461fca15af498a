//! ARENA: live match wagering client
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod odds;
pub mod backend;
pub mod realtime;
pub mod engine;
pub mod llm;
pub mod storage;
pub mod dashboard;
