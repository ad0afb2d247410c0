//! Request-scoped context handed to every engine operation.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::Span;

use crate::error::{ApiError, ApiResult};

/// Cancellation token and log span for one reconciliation invocation.
///
/// Nothing in the engine keeps process-wide state: log events are emitted
/// with `parent: &cx.span` and every remote call goes through [`Context::call`]
/// so that cancelling the token aborts it.
#[derive(Debug, Clone)]
pub struct Context {
    pub cancel: CancellationToken,
    pub span: Span,
}

impl Context {
    pub fn new(cancel: CancellationToken, span: Span) -> Self {
        Self { cancel, span }
    }

    /// A context with a fresh token and no span.
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
            span: Span::none(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Run one remote call, aborting it if the invocation is cancelled.
    ///
    /// There is no compensation for a call cut short: the next invocation
    /// re-lists remote state and picks up from there.
    pub async fn call<T, F>(&self, fut: F) -> ApiResult<T>
    where
        F: Future<Output = ApiResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ApiError::Cancelled),
            res = fut => res,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_call_passes_through_result() {
        let cx = Context::detached();
        let res = cx.call(async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(res, Ok(7));
    }

    #[tokio::test]
    async fn test_call_refuses_after_cancel() {
        let cx = Context::detached();
        cx.cancel.cancel();
        let res = cx.call(async { Ok::<_, ApiError>(7) }).await;
        assert_eq!(res, Err(ApiError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_call() {
        let cx = Context::detached();
        let token = cx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            token.cancel();
        });
        let res = cx
            .call(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, ApiError>(())
            })
            .await;
        assert_eq!(res, Err(ApiError::Cancelled));
    }
}
