//! CCTP Relayer - Library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod attestation;
pub mod chain;
pub mod chains;
pub mod completion;
pub mod config;
pub mod contracts;
pub mod engine;
pub mod error;
pub mod message;
pub mod metrics;
pub mod monitor;
pub mod registry;
pub mod types;
