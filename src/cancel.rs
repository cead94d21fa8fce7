use std::future::Future;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Runs `operation` unless `cancel` fires first.
///
/// An already cancelled token short-circuits before `operation` is polled, so
/// no request leaves the process.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = operation => result,
    }
}
