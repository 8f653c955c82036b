//! # Services
//!
//! Everything with I/O: the listener, the per-connection driver, the
//! collaborator interfaces and their in-memory implementations.

pub mod connection;
pub mod memory;
pub mod registry;
pub mod server;
