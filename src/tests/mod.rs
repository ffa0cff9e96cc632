//! Test suite for the RPC client
//!
//! Integration-style tests drive the full client over the in-memory
//! [`mock_transport::MockTransport`]; property tests validate the
//! framework invariants with proptest.

pub mod mock_transport;

mod batch_tests;
mod subscription_tests;
