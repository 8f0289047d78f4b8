//! Integration tests module
//!
//! This module provides end-to-end integration tests for murmur,
//! including:
//! - Cross-instance fan-out over a shared bus
//! - Gap recovery through replay on reconnect
//! - Error handling and recovery scenarios
//! - The WebSocket gateway over real sockets

pub mod fanout_test;
pub mod fixtures;
pub mod gateway_test;
pub mod recovery_test;
