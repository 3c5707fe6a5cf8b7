//! Common test utilities for tag-tally
//!
//! - Recording/slow/failing counter stores
//! - Buffer construction helpers
//! - WireMock setups for the HTTP store
#![allow(dead_code)]

pub mod mock_server;
pub mod test_helpers;
