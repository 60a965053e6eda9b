//! Small async helpers shared across the crate.

use std::future::Future;
use std::pin::pin;
use std::time::Duration;

use futures::future::{self, Either};

/// Run `fut` with an upper bound on wall-clock time.
///
/// Returns `None` if the deadline fires first. Every network step in the
/// crate goes through this so a stuck peer becomes a retryable failure
/// instead of a hang.
pub async fn timeout<F: Future>(limit: Duration, fut: F) -> Option<F::Output> {
    let fut = pin!(fut);
    match future::select(fut, smol::Timer::after(limit)).await {
        Either::Left((out, _)) => Some(out),
        Either::Right(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_future_completes() {
        smol::block_on(async {
            let out = timeout(Duration::from_secs(1), async { 42 }).await;
            assert_eq!(out, Some(42));
        });
    }

    #[test]
    fn slow_future_is_cut_off() {
        smol::block_on(async {
            let out = timeout(Duration::from_millis(20), async {
                smol::Timer::after(Duration::from_secs(5)).await;
                42
            })
            .await;
            assert_eq!(out, None);
        });
    }
}
