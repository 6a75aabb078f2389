use std::future::Future;
use std::sync::Arc;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

const THREAD_NAME: &str = "tuxpilot";

/// Multi-threaded runtime owned by the host so a synchronous UI thread can
/// drive the async components. Clones share the same runtime.
#[derive(Debug, Clone)]
pub struct FoundationRuntime {
    rt: Arc<Runtime>,
}

impl FoundationRuntime {
    pub fn new() -> std::io::Result<Self> {
        let rt = Builder::new_multi_thread()
            .enable_all()
            .thread_name(THREAD_NAME)
            .build()?;
        Ok(Self { rt: Arc::new(rt) })
    }

    /// Blocks the calling thread until `future` completes.
    /// Must not be called from inside the runtime.
    pub fn exec<F: Future>(&self, future: F) -> F::Output {
        self.rt.block_on(future)
    }

    pub fn spawn<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.rt.spawn(future)
    }

    pub fn handle(&self) -> Handle {
        self.rt.handle().clone()
    }
}
