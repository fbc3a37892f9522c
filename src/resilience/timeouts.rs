//! Deadline enforcement for store round trips.
//!
//! Admission decisions sit on the request path, so every call into a
//! shared store is bounded. An elapsed deadline surfaces as
//! [`StoreError::Timeout`] and the caller degrades to fail-open.

use std::future::Future;
use std::time::Duration;

use crate::store::{StoreError, StoreResult};

/// Run `operation`, failing with [`StoreError::Timeout`] after `deadline`.
pub async fn with_deadline<T, F>(deadline: Duration, operation: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(deadline, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(
            u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_elapses() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<_, StoreError>(1)
        };
        let result = with_deadline(Duration::from_millis(20), slow).await;
        assert_eq!(result, Err(StoreError::Timeout(20)));
    }

    #[tokio::test]
    async fn test_fast_operation_passes_through() {
        let result = with_deadline(Duration::from_millis(20), async { Ok::<_, StoreError>(7) }).await;
        assert_eq!(result, Ok(7));
    }
}
