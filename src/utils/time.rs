//! Wall-clock helpers.
//!
//! Session activity and login audits are stamped in Unix time so they can be
//! compared across processes (an external reaper, the account store).

use crate::error::{constants, ProtocolError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn current_timestamp_millis() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .map_err(|_| ProtocolError::Custom(constants::ERR_SYSTEM_TIME.to_string()))
}

/// Seconds since the Unix epoch.
pub fn current_timestamp_secs() -> Result<u64> {
    Ok(current_timestamp_millis()? / 1000)
}

/// True when `expiry_secs` is set and lies in the future.
pub fn is_in_future(expiry_secs: u64) -> bool {
    current_timestamp_secs()
        .map(|now| expiry_secs > now)
        .unwrap_or(false)
}
