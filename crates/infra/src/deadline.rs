use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::StoreError;

/// Run a store call under `limit`; an elapsed deadline becomes [`StoreError::Timeout`].
///
/// Backend failures and timeouts are logged here once, at `error`.
pub(crate) async fn within<T, F>(limit: Duration, operation: &'static str, call: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    let result = tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(StoreError::Timeout));

    if let Err(err @ (StoreError::Backend(_) | StoreError::Timeout)) = &result {
        error!(operation, error = %err, "storage call failed");
    }
    result
}
