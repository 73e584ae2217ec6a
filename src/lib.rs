// ABOUTME: Library root for localclaw — exposes every module for the binary and integration tests.
// ABOUTME: The binary entry point is in main.rs, which uses this crate as a library.

pub mod agent;
pub mod app;
pub mod commands;
pub mod config;
pub mod mcp;
pub mod permissions;
pub mod prompt;
pub mod provider;
pub mod repl;
pub mod session;
pub mod tools;
