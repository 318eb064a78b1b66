use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Run `fut` unless `token` fires first; `None` means cancelled.
pub(crate) async fn or_cancelled<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        out = fut => Some(out),
    }
}
