use std::future::Future;

use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Per-request execution context.
///
/// Carries the request namespace and a cancellation token plus an optional
/// deadline that every store call and reference lookup is raced against.
#[derive(Debug, Clone, Default)]
pub struct Context {
    namespace: Option<String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

/// Why a context-bound call did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    Cancelled,
    DeadlineExceeded,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(namespace: &str) -> Self {
        Context {
            namespace: Some(namespace.to_owned()),
            ..Default::default()
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    /// Derives a context that is cancelled together with this one
    /// but can also be cancelled on its own.
    pub fn child(&self) -> Self {
        Context {
            namespace: self.namespace.clone(),
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Runs `fut` until it completes, the context is cancelled,
    /// or the deadline passes, whichever happens first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        if self.cancel.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Interrupted::Cancelled),
            _ = deadline => Err(Interrupted::DeadlineExceeded),
            output = fut => Ok(output),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_without_interruption() {
        let ctx = Context::with_namespace("dev");
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
        assert_eq!(ctx.namespace(), Some("dev"));
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let ctx = Context::new();
        ctx.cancel();
        assert_eq!(ctx.run(async { 7 }).await, Err(Interrupted::Cancelled));
    }

    #[tokio::test]
    async fn child_follows_parent() {
        let parent = Context::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_exceeded() {
        let ctx = Context::new().timeout(Duration::from_millis(50));
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert_eq!(ctx.run(slow).await, Err(Interrupted::DeadlineExceeded));
    }
}
