//! Gateway MCP Server Library
//!
//! This crate provides a tool discovery and execution gateway speaking the
//! Model Context Protocol (MCP), with a modular architecture organized by
//! domains.
//!
//! # Architecture
//!
//! The server is organized into the following modules:
//!
//! - **core**: Core infrastructure including configuration, auth, error
//!   handling, the protocol adapter and the transport layer
//! - **domains**: Business logic organized by bounded contexts
//!   - **capabilities**: the registry, validation, permissions and the
//!     concrete capability definitions
//!   - **sessions**: per-session capability state with a sliding TTL
//!   - **resilience**: idempotency, circuit breakers, timeouts and retry
//!
//! # Example
//!
//! ```rust,no_run
//! use gateway_mcp_server::{core::Config, core::GatewayServer};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env();
//!     let server = GatewayServer::new(config);
//!     // Start the server...
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod domains;

// Re-export commonly used types for convenience
pub use core::{Config, Error, GatewayServer, Result};
