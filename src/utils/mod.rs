//! # Utility Modules
//!
//! Supporting utilities for the header cipher, logging, metrics and timing.
//!
//! ## Components
//! - **Crypto**: RC4 header cipher keyed through HMAC-SHA1, session keys
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Time**: Timestamp utilities for activity tracking and login audits
//! - **Timeout**: Async timeout wrappers for collaborator calls
//!
//! ## Security
//! - Session keys are zeroed on drop (zeroize crate)
//! - Header keystreams discard their first 1024 bytes

pub mod crypto;
pub mod logging;
pub mod metrics;
pub mod time;
pub mod timeout;
