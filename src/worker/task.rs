//! The worker function contract and its closure-backed implementation.
//!
//! A [`Work`] is the caller-supplied function a [`Worker`](crate::Worker)
//! supervises. It receives the worker's shall-stop signal (a
//! [`CancellationToken`]) and must observe it at every suspension point so
//! shutdown cannot hang. Each call to [`Work::run`] produces a fresh future,
//! which is what makes restart and recovery possible: the supervisor simply
//! runs the same work again.
//!
//! [`WorkFn`] wraps a closure `F: Fn(CancellationToken) -> Fut` so simple
//! workers need no named type. The common handle is [`WorkRef`], an
//! `Arc<dyn Work>` suitable for sharing across the runtime.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WorkerError;

/// Shared handle to a worker function.
pub type WorkRef = Arc<dyn Work>;

/// An asynchronous, cancelable unit of work.
///
/// Implementors must regularly check the `shall_stop` token and exit
/// promptly during shutdown; a work that blocks without watching the token
/// makes `stop()` hang for its caller.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use tokio_util::sync::CancellationToken;
/// use hive::{Work, WorkerError};
///
/// struct Ticker;
///
/// #[async_trait]
/// impl Work for Ticker {
///     async fn run(&self, shall_stop: CancellationToken) -> Result<(), WorkerError> {
///         while !shall_stop.is_cancelled() {
///             tokio::select! {
///                 _ = shall_stop.cancelled() => break,
///                 _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
///             }
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Work: Send + Sync + 'static {
    /// Runs the work until completion or cancellation.
    ///
    /// Called once per worker start and once more per restart or recovery
    /// resumption, each time with the worker's current stop token.
    async fn run(&self, shall_stop: CancellationToken) -> Result<(), WorkerError>;
}

/// Closure-backed work implementation.
///
/// Wraps a closure that *creates* a new future per run, so there is no
/// hidden shared mutation between restarts; work that needs shared state
/// uses an explicit `Arc` inside the closure.
#[derive(Debug)]
pub struct WorkFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> WorkFn<F> {
    /// Creates a new closure-backed work.
    ///
    /// The name only shows up in `Debug` output; the supervised identity is
    /// the description given to [`Worker::start`](crate::Worker::start).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the work and returns it as a shared handle.
    ///
    /// # Example
    /// ```
    /// use tokio_util::sync::CancellationToken;
    /// use hive::{WorkFn, WorkRef, WorkerError};
    ///
    /// let w: WorkRef = WorkFn::arc("noop", |_ctx: CancellationToken| async {
    ///     Ok::<_, WorkerError>(())
    /// });
    /// ```
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }

    /// Returns the debug name of this work.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<F, Fut> Work for WorkFn<F>
where
    F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), WorkerError>> + Send + 'static,
{
    async fn run(&self, shall_stop: CancellationToken) -> Result<(), WorkerError> {
        (self.f)(shall_stop).await
    }
}
