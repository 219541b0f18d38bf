use std::future::Future;
use std::sync::Arc;

use futures::FutureExt as _;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

pub type JobFuture = BoxFuture<'static, anyhow::Result<()>>;

/// Repeatable unit of asynchronous work. Every run calls the factory again.
#[derive(Clone)]
pub struct Work(Arc<dyn Fn() -> JobFuture + Send + Sync>);

impl Work {
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self(Arc::new(move || factory().boxed()))
    }

    /// Work that reports completion through a [`DoneSignal`] instead of
    /// resolving a future.
    pub fn with_done<F>(start: F) -> Self
    where
        F: Fn(DoneSignal) + Send + Sync + 'static,
    {
        Self::new(move || {
            let (tx, rx) = oneshot::channel();
            start(DoneSignal { tx });
            async move {
                rx.await
                    .map_err(|_| anyhow::anyhow!("completion signal dropped"))?
            }
        })
    }

    pub(crate) fn start(&self) -> JobFuture {
        (self.0)()
    }
}

impl std::fmt::Debug for Work {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Work")
    }
}

/// Completion handle given to [`Work::with_done`] callbacks.
#[derive(Debug)]
pub struct DoneSignal {
    tx: oneshot::Sender<anyhow::Result<()>>,
}

impl DoneSignal {
    pub fn finish(self, result: anyhow::Result<()>) {
        // The job was dropped from the queue; nobody waits for the result.
        let _ = self.tx.send(result);
    }

    pub fn succeed(self) {
        self.finish(Ok(()));
    }

    pub fn fail(self, err: anyhow::Error) {
        self.finish(Err(err));
    }
}
