//! Async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Run `future` with a deadline, mapping expiry to [`ProtocolError::Timeout`].
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completes_within_deadline() {
        let value = with_timeout_error(async { Ok(7u32) }, Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_maps_to_timeout() {
        let result: Result<()> = with_timeout_error(
            async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_error_passes_through() {
        let result: Result<()> = with_timeout_error(
            async { Err(ProtocolError::ConnectionClosed) },
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
