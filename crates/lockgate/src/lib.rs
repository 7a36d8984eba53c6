//! A network-accessible distributed lock service: one centralized server
//! arbitrating named mutual-exclusion resources for many clients over
//! long-lived multiplexed TCP connections.
//!
//! Four lock flavors are served: simple exclusive, time-expiring exclusive,
//! reentrant exclusive, and read/write with write-to-read downgrade. All
//! state is process-local and ephemeral; nothing survives a server restart.

pub mod app;
pub mod client;
pub mod config;
pub mod proto;
pub mod server;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig};
pub use server::Server;
