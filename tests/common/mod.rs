//! Integration test common infrastructure.
//!
//! Provides utilities for spawning in-process gateways, creating line
//! clients, and waiting on recorded measurements.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::{TestServer, wait_for};
